// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2024 Tesseract Vault Contributors
//! Daemon IPC tests over a real Unix socket.

#![cfg(unix)]

mod common;

use std::io::Read;
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use common::{mock_error, Fixture, MockModel};
use tesseract_fde::daemon::{DaemonClient, DaemonCommand, DaemonResponse, DaemonServer, ProtocolError};
use tesseract_fde::{Collaborators, FdeManager, KeyTrust, KeyslotRole, State, StateManager};

struct RunningDaemon {
    client: DaemonClient,
    handle: Option<thread::JoinHandle<()>>,
}

impl RunningDaemon {
    fn start(fixture: &Fixture, state: &State, collaborators: Collaborators) -> Self {
        Self::start_with(fixture, state, collaborators, |server| server)
    }

    fn start_with<F>(fixture: &Fixture, state: &State, collaborators: Collaborators, configure: F) -> Self
    where
        F: FnOnce(DaemonServer) -> DaemonServer,
    {
        let manager = Arc::new(FdeManager::new(state, collaborators, fixture.config.clone()));
        manager.start_up().expect("start up");

        let socket = fixture.dir.path().join("run").join("fde.sock");
        let server = configure(DaemonServer::new(manager, &socket));
        let handle = thread::spawn(move || {
            server.run().expect("daemon run");
        });

        let client = DaemonClient::new(&socket);
        let deadline = Instant::now() + Duration::from_secs(5);
        while !client.is_running() {
            assert!(Instant::now() < deadline, "daemon did not come up");
            thread::sleep(Duration::from_millis(20));
        }
        Self {
            client,
            handle: Some(handle),
        }
    }
}

impl Drop for RunningDaemon {
    fn drop(&mut self) {
        let _ = self.client.shutdown();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[test]
fn test_status_of_functional_manager() {
    let fixture = Fixture::new(true);
    let state = State::in_memory();
    let daemon = RunningDaemon::start(&fixture, &state, fixture.collaborators());

    match daemon.client.send_command(DaemonCommand::Status).unwrap() {
        DaemonResponse::Status {
            functional,
            reason,
            primary_keys,
            key_trust,
            roles,
        } => {
            assert!(functional);
            assert!(reason.is_none());
            assert_eq!(primary_keys, 1);
            assert_eq!(key_trust, KeyTrust::Verified);
            let names: Vec<_> = roles.iter().map(|r| r.name.as_str()).collect();
            assert_eq!(names, vec!["recover", "run", "run+recover"]);
            assert_eq!(roles[0].pcr_policy_counter, 42);
        }
        other => panic!("unexpected response: {:?}", other),
    }
}

#[test]
fn test_status_reports_init_failure() {
    let fixture = Fixture::new(true);
    let state = State::in_memory();
    let collaborators = fixture.collaborators_with(mock_error("mock error data"), Ok("bbb".into()), true);
    let daemon = RunningDaemon::start(&fixture, &state, collaborators);

    match daemon.client.send_command(DaemonCommand::Status).unwrap() {
        DaemonResponse::Status {
            functional, reason, ..
        } => {
            assert!(!functional);
            assert_eq!(
                reason.as_deref(),
                Some("cannot initialize FDE state: cannot resolve data partition mount: mock error data")
            );
        }
        other => panic!("unexpected response: {:?}", other),
    }
}

#[test]
fn test_get_parameters_over_socket() {
    let fixture = Fixture::new(false);
    let state = State::in_memory();
    let daemon = RunningDaemon::start(&fixture, &state, fixture.collaborators());

    assert_eq!(daemon.client.get_parameters(KeyslotRole::Run, "all").unwrap(), None);

    {
        // The daemon shares the state; record parameters as another writer would.
        let manager = FdeManager::new(&state, fixture.collaborators(), fixture.config.clone());
        manager.start_up().unwrap();
        let mut lock = state.lock();
        let model = MockModel::default();
        manager
            .update_parameters(&mut lock, KeyslotRole::Run, "all", vec!["run".into()], &[&model], b"profile".to_vec())
            .unwrap();
    }

    let params = daemon
        .client
        .get_parameters(KeyslotRole::Run, "some-container")
        .unwrap()
        .expect("fallback parameters");
    assert_eq!(params.boot_modes, vec!["run".to_string()]);
    assert_eq!(params.tpm2_pcr_profile, b"profile".to_vec());
}

#[test]
fn test_invalid_request_is_answered_with_error() {
    let fixture = Fixture::new(true);
    let state = State::in_memory();
    let daemon = RunningDaemon::start(&fixture, &state, fixture.collaborators());

    let response = daemon
        .client
        .send_command(DaemonCommand::GetParameters {
            role: "bogus".to_string(),
            container_role: "all".to_string(),
        })
        .unwrap();
    match response {
        DaemonResponse::Error { message } => assert!(message.contains("bogus")),
        other => panic!("unexpected response: {:?}", other),
    }
}

#[test]
fn test_shutdown_stops_server() {
    let fixture = Fixture::new(true);
    let state = State::in_memory();
    let mut daemon = RunningDaemon::start(&fixture, &state, fixture.collaborators());

    daemon.client.shutdown().unwrap();
    if let Some(handle) = daemon.handle.take() {
        handle.join().unwrap();
    }
    assert!(!daemon.client.socket_path().exists());
    assert!(matches!(
        daemon.client.send_command(DaemonCommand::Ping),
        Err(ProtocolError::Io(_))
    ));
}

#[test]
fn test_silent_client_is_disconnected() {
    let fixture = Fixture::new(true);
    let state = State::in_memory();
    let daemon = RunningDaemon::start_with(&fixture, &state, fixture.collaborators(), |server| {
        server.with_client_timeout(Duration::from_millis(200))
    });

    let mut idle = UnixStream::connect(daemon.client.socket_path()).unwrap();
    idle.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
    let started = Instant::now();

    // The server gives up on the silent peer and closes the connection.
    let mut buf = Vec::new();
    assert_eq!(idle.read_to_end(&mut buf).unwrap(), 0);
    assert!(started.elapsed() < Duration::from_secs(10));

    assert!(daemon.client.is_running());
}
