// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Verify paired listeners hold a port until stopped.
// Author: Lukas Bower

use std::io;
use std::net::TcpListener;

use localcluster::policy::ListenerPolicy;
use localcluster::{HarnessContext, HarnessPolicy, PairedListener};
use serial_test::serial;

fn helper_policy() -> ListenerPolicy {
    ListenerPolicy {
        program: env!("CARGO_BIN_EXE_localcluster").to_owned(),
        args: ["listen", "--addr", "{addr}", "--port", "{port}"]
            .into_iter()
            .map(str::to_owned)
            .collect(),
        start_settle_ms: 500,
        stop_settle_ms: 100,
    }
}

fn free_port() -> u16 {
    TcpListener::bind(("127.0.0.1", 0))
        .and_then(|listener| listener.local_addr())
        .map(|addr| addr.port())
        .unwrap()
}

fn bind_error(port: u16) -> Option<io::ErrorKind> {
    TcpListener::bind(("127.0.0.1", port)).err().map(|err| err.kind())
}

#[test]
#[serial]
fn loopback_listener_blocks_bind_until_stopped() {
    let _ = env_logger::builder().is_test(true).try_init();
    let port = free_port();
    let mut listener = PairedListener::start(port, true, &helper_policy()).unwrap();
    assert_eq!(listener.port(), port);
    assert_eq!(listener.helper_count(), 2);
    assert_eq!(bind_error(port), Some(io::ErrorKind::AddrInUse));

    assert_eq!(listener.stop(), 0);
    assert_eq!(listener.helper_count(), 0);
    assert_eq!(bind_error(port), None);
}

#[test]
#[serial]
fn dropping_listener_releases_port() {
    let port = free_port();
    {
        let _listener = PairedListener::start(port, true, &helper_policy()).unwrap();
        assert_eq!(bind_error(port), Some(io::ErrorKind::AddrInUse));
    }
    std::thread::sleep(std::time::Duration::from_millis(100));
    assert_eq!(bind_error(port), None);
}

#[test]
#[serial]
fn context_listens_with_policy_helper() {
    let dir = tempfile::tempdir().unwrap();
    let mut policy = HarnessPolicy::default();
    policy.logs.dir = dir.path().to_path_buf();
    policy.listener = helper_policy();
    let context = HarnessContext::new(policy).unwrap();

    let port = free_port();
    let mut listener = context.listen(port, true).unwrap();
    assert_eq!(bind_error(port), Some(io::ErrorKind::AddrInUse));
    assert_eq!(listener.stop(), 0);
}

#[test]
fn missing_helper_program_is_reported() {
    let mut policy = helper_policy();
    policy.program = "/nonexistent/localcluster-helper".to_owned();
    let err = PairedListener::start(free_port(), true, &policy).unwrap_err();
    assert!(err.to_string().contains("spawn listener"));
}
