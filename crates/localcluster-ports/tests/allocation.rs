// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Validate port generation, overrides and internal port sets end to end.
// Author: Lukas Bower

use std::collections::HashSet;

use localcluster_ports::{
    InternalPortSet, PortError, PortGenerator, PortOverrides, PortPlan, PortRole, PortSource,
};

fn internal_source_at(port: u16) -> PortSource {
    PortSource::new(PortGenerator::default().with_cursor(PortRole::Internal, port))
}

#[test]
fn generation_then_override_scenario() {
    let source = PortSource::default();
    let first = source.next(PortRole::Client).unwrap();
    let second = source.next(PortRole::Client).unwrap();
    let third = source.next(PortRole::Client).unwrap();
    assert!(first < second && second < third);

    source.enable_overrides();
    source.set_override(PortRole::Client, 5000);
    for _ in 0..4 {
        assert_eq!(source.next(PortRole::Client).unwrap(), 5000);
    }
}

#[test]
fn unset_override_falls_through_to_generation() {
    let mut overrides = PortOverrides::new();
    overrides.enable();
    overrides.set_raw(PortRole::Admin, -1).unwrap();
    let source = PortSource::with_overrides(PortGenerator::new(22000, 50), overrides);
    let mut last = None;
    for _ in 0..10 {
        let port = source.next(PortRole::Admin).unwrap();
        if let Some(prev) = last {
            assert!(port > prev, "admin ports must strictly increase");
        }
        last = Some(port);
    }
}

#[test]
fn internal_set_of_three_hosts() {
    let set = InternalPortSet::allocate(&internal_source_at(10000), 3).unwrap();
    assert_eq!(set.ports(), &[10000, 10001, 10002]);
    let coordinators: Vec<&str> = set.coordinators().iter().map(String::as_str).collect();
    assert_eq!(coordinators, vec![":10000", ":10001", ":10002"]);
}

#[test]
fn internal_set_sizes_match_host_count() {
    for host_count in 0..12 {
        let set = InternalPortSet::allocate(&PortSource::default(), host_count).unwrap();
        assert_eq!(set.ports().len(), host_count as usize);
        let unique: HashSet<u16> = set.ports().iter().copied().collect();
        assert_eq!(unique.len(), set.ports().len());
        assert!(set.coordinators().len() <= set.ports().len());
    }
}

#[test]
fn lookups_inside_the_set_are_stable() {
    let set = InternalPortSet::allocate(&internal_source_at(10000), 4).unwrap();
    for _ in 0..3 {
        for (idx, expected) in set.ports().iter().enumerate() {
            assert_eq!(set.internal_port_for(idx as i32).unwrap(), *expected);
        }
    }
}

#[test]
fn lookups_past_the_set_allocate_fresh_ports() {
    let source = internal_source_at(10000);
    let set = InternalPortSet::allocate(&source, 2).unwrap();
    let grown_a = set.internal_port_for(2).unwrap();
    let grown_b = set.internal_port_for(2).unwrap();
    let grown_c = set.internal_port_for(7).unwrap();
    assert_eq!((grown_a, grown_b, grown_c), (10002, 10003, 10004));
    assert!(!set.ports().contains(&grown_a));
    assert_eq!(source.next(PortRole::Internal).unwrap(), 10005);
}

#[test]
fn negative_host_count_is_invalid() {
    let err = InternalPortSet::allocate(&PortSource::default(), -2).unwrap_err();
    assert!(matches!(err, PortError::InvalidArgument { what: "host count", value: -2 }));
}

#[test]
fn plan_assigns_unique_ports_across_roles() {
    let source = PortSource::new(PortGenerator::new(24000, 100));
    let plan = PortPlan::build(&source, 3).unwrap();
    assert_eq!(plan.hosts.len(), 3);
    let mut seen = HashSet::new();
    for host in &plan.hosts {
        for role in PortRole::ALL {
            let port = host.port(role).expect("role assigned");
            assert!(seen.insert(port), "port {port} issued twice");
        }
    }
    assert_eq!(plan.hosts[1].port(PortRole::Internal), Some(24201));
    assert_eq!(plan.coordinators, vec![":24200", ":24201", ":24202"]);

    let json = serde_json::to_value(&plan).unwrap();
    assert_eq!(json["hosts"][0]["ports"]["client"], 24000);
    assert_eq!(json["coordinators"][2], ":24202");
}
