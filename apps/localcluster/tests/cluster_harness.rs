// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Drive a small simulated cluster through the harness context and pipe group.
// Author: Lukas Bower

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::process::Command;
use std::thread;
use std::time::{Duration, Instant};

use localcluster::{
    tail_file_for, Backoff, HarnessContext, HarnessPolicy, PipeGroup, PortRole, ReadyKind,
    WatchToken,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn context_in(dir: &Path) -> HarnessContext {
    let mut policy = HarnessPolicy::default();
    policy.logs.dir = dir.to_path_buf();
    HarnessContext::new(policy).unwrap()
}

fn node(host_id: u32, linger: &str) -> Command {
    let mut command = Command::new("sh");
    command.arg("-c").arg(format!(
        "printf 'INITIALIZING INITIATOR ID: {host_id}, SITEID: {host_id}:0\\nServer completed initialization\\n'; exec sleep {linger}"
    ));
    command
}

#[test]
fn group_tracks_ready_hosts_and_lowest_id() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let context = context_in(dir.path());
    let mut group = PipeGroup::new();
    for (host, id) in [5_u32, 2, 9].into_iter().enumerate() {
        let pipe = context
            .launch(node(id, "30"), "node", host, ReadyKind::Startup, None)
            .unwrap();
        assert_eq!(group.insert(pipe), host);
    }

    assert!(group.await_all_ready(Duration::from_secs(10)).unwrap());
    assert_eq!(group.lowest_host_id_index(), Some(1));
    assert!(!group.all_exited());

    assert_eq!(group.kill_all(), 3);
    assert!(group.all_exited());
    for (_, pipe) in group.iter() {
        pipe.join().unwrap();
    }
    assert!(dir.path().join("node-2.txt").exists());
}

#[test]
fn rejoin_replaces_dead_host() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let context = context_in(dir.path());
    let mut group = PipeGroup::new();
    let first = context
        .launch(node(1, "30"), "node", 0, ReadyKind::Startup, None)
        .unwrap();
    group.insert(first);
    assert!(group.await_all_ready(Duration::from_secs(10)).unwrap());
    group.kill_all();

    let mut command = Command::new("sh");
    command
        .arg("-c")
        .arg("printf 'INITIALIZING INITIATOR ID: 3\\nNode recovery complete\\n'");
    let rejoin = context
        .launch(command, "node", 0, ReadyKind::Rejoin, None)
        .unwrap();
    let previous = group.replace(0, rejoin).expect("old pipe returned");
    previous.join().unwrap();

    let pipe = group.get(0).unwrap();
    assert!(pipe.wait_ready(Duration::from_secs(10)).unwrap());
    assert_eq!(pipe.host_id(), Some(3));
    pipe.join().unwrap();
    assert!(group.remove(0).is_some());
    assert!(group.get(0).is_none());
    assert_eq!(group.len(), 1);
}

#[test]
fn await_all_ready_reports_dead_host() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let context = context_in(dir.path());
    let mut group = PipeGroup::new();
    group.insert(
        context
            .launch(node(1, "0"), "node", 0, ReadyKind::Startup, None)
            .unwrap(),
    );
    let mut crashing = Command::new("sh");
    crashing.arg("-c").arg("printf 'port in use\\n'; exit 1");
    group.insert(
        context
            .launch(crashing, "node", 1, ReadyKind::Startup, None)
            .unwrap(),
    );

    let started = Instant::now();
    assert!(!group.await_all_ready(Duration::from_secs(30)).unwrap());
    assert!(started.elapsed() < Duration::from_secs(30));
    for (_, pipe) in group.iter() {
        pipe.process().unwrap().wait().unwrap();
        pipe.join().unwrap();
    }
    assert!(group.all_exited());
}

#[test]
fn launch_merges_stderr_into_log() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let context = context_in(dir.path());
    let mut command = Command::new("sh");
    command.arg("-c").arg(
        "echo 'INITIALIZING INITIATOR ID: 4' >&2; echo 'Server completed initialization' >&2; echo 'stdout line'",
    );
    let pipe = context
        .launch(command, "node", 0, ReadyKind::Startup, None)
        .unwrap();

    assert!(pipe.wait_ready(Duration::from_secs(5)).unwrap());
    assert_eq!(pipe.host_id(), Some(4));
    pipe.process().unwrap().wait().unwrap();
    pipe.join().unwrap();
    assert_eq!(
        fs::read_to_string(dir.path().join("node-0.txt")).unwrap(),
        "INITIALIZING INITIATOR ID: 4\nServer completed initialization\nstdout line\n"
    );
}

#[test]
fn context_ports_follow_policy() {
    let dir = tempfile::tempdir().unwrap();
    let mut policy = HarnessPolicy::default();
    policy.logs.dir = dir.path().to_path_buf();
    policy.ports.base = 30000;
    policy.ports.block = 10;
    policy.ports.overrides.insert(PortRole::Http, 8080);
    let context = HarnessContext::new(policy).unwrap();

    let ports = context.port_source();
    assert_eq!(ports.next(PortRole::Client).unwrap(), 30000);
    assert_eq!(ports.next(PortRole::Admin).unwrap(), 30010);
    assert_eq!(ports.next(PortRole::Http).unwrap(), 8080);
    assert_eq!(ports.next(PortRole::Http).unwrap(), 8080);
}

#[test]
fn tail_file_sees_appended_token() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("server-0.txt");
    let writer = {
        let path = path.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .unwrap();
            file.write_all(b"booting\nServer compl").unwrap();
            file.flush().unwrap();
            thread::sleep(Duration::from_millis(50));
            file.write_all(b"eted initialization\n").unwrap();
        })
    };

    let found = tail_file_for(
        &path,
        WatchToken::new("Server completed initialization", Duration::from_secs(10)),
        Backoff::new(Duration::from_millis(1), Duration::from_millis(20)),
    )
    .unwrap();
    writer.join().unwrap();
    assert!(found);
}

#[test]
fn tail_file_times_out_without_token() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("server-0.txt");
    fs::write(&path, "booting\nstill booting\n").unwrap();

    let started = Instant::now();
    let found = tail_file_for(
        &path,
        WatchToken::new("Server completed initialization", Duration::from_millis(100)),
        Backoff::default(),
    )
    .unwrap();
    assert!(!found);
    assert!(started.elapsed() >= Duration::from_millis(100));
}
