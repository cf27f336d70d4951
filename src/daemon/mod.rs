// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2024 Tesseract Vault Contributors
//! Daemon hosting the FDE manager
//!
//! The daemon provides:
//! - The single manager instance of the process, started once
//! - Periodic `ensure` calls at a bounded interval
//! - IPC interface for status and parameter queries

pub mod client;
pub mod protocol;
pub mod server;

pub use client::DaemonClient;
pub use protocol::{DaemonCommand, DaemonResponse, ProtocolError, Request, RoleSummary};
pub use server::DaemonServer;
