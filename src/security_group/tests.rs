//! Unit tests for security group reconciliation.

use std::collections::BTreeMap;

use rstest::{fixture, rstest};

use super::*;
use crate::rules::RemoteRef;
use crate::test_support::{DriverCall, FakeDriver, permissive_quirks};

fn cidr(port: u16, prefix: &str) -> IngressRule {
    IngressRule::new(port, port, "tcp", RemoteRef::IpPrefix(prefix.to_owned()))
        .unwrap_or_else(|err| panic!("rule: {err}"))
}

fn observed(rule: IngressRule, id: &str, group_id: &str) -> ObservedRule {
    ObservedRule {
        id: Some(id.to_owned()),
        security_group_id: Some(group_id.to_owned()),
        tenant_id: Some(String::from("tenant-42")),
        rule,
    }
}

fn port_rule(port: u16, prefix: &str) -> RuleSpec {
    RuleSpec {
        port: Some(port),
        remote_ip_prefix: Some(prefix.to_owned()),
        ..RuleSpec::default()
    }
}

fn request(description: Option<&str>, rules: Vec<RuleSpec>) -> SecurityGroupRequest {
    SecurityGroupRequest {
        name: Some(String::from("sg1")),
        description: description.map(str::to_owned),
        rules,
    }
}

#[fixture]
fn no_peers() -> BTreeMap<String, String> {
    BTreeMap::new()
}

#[rstest]
#[tokio::test]
async fn creates_group_then_rules_in_order(no_peers: BTreeMap<String, String>) {
    let fake = FakeDriver::new();
    let namer = ResourceNamer::new(Some(String::from("dev-")));
    let reconciler = SecurityGroupReconciler::new(&fake, permissive_quirks(), &namer);
    let mut props = RuntimeProperties::new();
    let wanted = SecurityGroupRequest {
        name: None,
        description: Some(String::from("web tier")),
        rules: vec![port_rule(443, "0.0.0.0/0"), port_rule(22, "10.0.0.0/8")],
    };

    let outcome = reconciler
        .reconcile("web", &wanted, &no_peers, &mut props)
        .await
        .unwrap_or_else(|err| panic!("reconcile: {err}"));

    let ReconciliationResult::Created(id) = outcome else {
        panic!("expected Created, got {outcome:?}");
    };
    assert_eq!(props.get_str(EXTERNAL_ID).ok().flatten(), Some(id.as_str()));
    let mutations = fake.mutations();
    assert_eq!(
        mutations.first(),
        Some(&DriverCall::CreateSecurityGroup {
            name: String::from("dev-web"),
            description: Some(String::from("web tier")),
        })
    );
    let created_rules: Vec<IngressRule> = mutations
        .into_iter()
        .filter_map(|call| match call {
            DriverCall::CreateIngressRule { rule, .. } => Some(rule),
            _ => None,
        })
        .collect();
    assert_eq!(created_rules, vec![cidr(443, "0.0.0.0/0"), cidr(22, "10.0.0.0/8")]);
}

#[rstest]
#[tokio::test]
async fn adopts_group_with_equivalent_rules_in_any_order(no_peers: BTreeMap<String, String>) {
    let fake = FakeDriver::new();
    fake.insert_security_group(
        "sg-7",
        "sg1",
        Some("D"),
        vec![
            observed(cidr(443, "0.0.0.0/0"), "r2", "sg-7"),
            observed(cidr(22, "0.0.0.0/0"), "r1", "sg-7"),
        ],
    );
    let namer = ResourceNamer::identity();
    let reconciler = SecurityGroupReconciler::new(&fake, permissive_quirks(), &namer);
    let mut props = RuntimeProperties::new();
    let wanted = request(
        Some("D"),
        vec![port_rule(22, "0.0.0.0/0"), port_rule(443, "0.0.0.0/0")],
    );

    let outcome = reconciler
        .reconcile("node", &wanted, &no_peers, &mut props)
        .await
        .unwrap_or_else(|err| panic!("reconcile: {err}"));

    assert_eq!(outcome, ReconciliationResult::Reused(String::from("sg-7")));
    assert_eq!(props.get_str(EXTERNAL_ID).ok().flatten(), Some("sg-7"));
    assert!(fake.mutations().is_empty());
}

#[rstest]
#[tokio::test]
async fn differing_rules_are_a_mismatch_carrying_both_sets(no_peers: BTreeMap<String, String>) {
    let fake = FakeDriver::new();
    fake.insert_security_group(
        "sg-7",
        "sg1",
        Some("D"),
        vec![observed(cidr(22, "0.0.0.0/0"), "r1", "sg-7")],
    );
    let namer = ResourceNamer::identity();
    let reconciler = SecurityGroupReconciler::new(&fake, permissive_quirks(), &namer);
    let mut props = RuntimeProperties::new();
    let wanted = request(
        Some("D"),
        vec![port_rule(22, "0.0.0.0/0"), port_rule(443, "0.0.0.0/0")],
    );

    let Err(err) = reconciler
        .ensure("node", &wanted, &no_peers, &mut props)
        .await
    else {
        panic!("rules should conflict");
    };

    assert_eq!(
        err,
        ProvisionError::RulesMismatch {
            name: String::from("sg1"),
            existing: vec![cidr(22, "0.0.0.0/0")],
            requested: vec![cidr(22, "0.0.0.0/0"), cidr(443, "0.0.0.0/0")],
        }
    );
    assert!(!err.is_retryable());
    assert!(fake.mutations().is_empty());
    assert!(props.is_empty());
}

#[rstest]
#[case(Some("other"), Some("D"))]
#[case(None, Some("D"))]
#[case(Some("D"), None)]
#[tokio::test]
async fn description_mismatch_is_a_conflict(
    no_peers: BTreeMap<String, String>,
    #[case] existing: Option<&str>,
    #[case] requested: Option<&str>,
) {
    let fake = FakeDriver::new();
    fake.insert_security_group("sg-7", "sg1", existing, Vec::new());
    let namer = ResourceNamer::identity();
    let reconciler = SecurityGroupReconciler::new(&fake, permissive_quirks(), &namer);
    let mut props = RuntimeProperties::new();

    let outcome = reconciler
        .reconcile("node", &request(requested, Vec::new()), &no_peers, &mut props)
        .await
        .unwrap_or_else(|err| panic!("reconcile: {err}"));

    assert!(
        matches!(
            outcome,
            ReconciliationResult::Conflict(ConflictDetail::DescriptionMismatch { .. })
        ),
        "{outcome:?}"
    );
    assert!(fake.mutations().is_empty());
}

#[rstest]
#[tokio::test]
async fn empty_description_matches_absent_description(no_peers: BTreeMap<String, String>) {
    let fake = FakeDriver::new();
    fake.insert_security_group("sg-7", "sg1", Some(""), Vec::new());
    let namer = ResourceNamer::identity();
    let reconciler = SecurityGroupReconciler::new(&fake, permissive_quirks(), &namer);
    let mut props = RuntimeProperties::new();

    let id = reconciler
        .ensure("node", &request(None, Vec::new()), &no_peers, &mut props)
        .await
        .unwrap_or_else(|err| panic!("ensure: {err}"));

    assert_eq!(id, "sg-7");
}

#[rstest]
#[tokio::test]
async fn duplicate_names_are_a_conflict(no_peers: BTreeMap<String, String>) {
    let fake = FakeDriver::new();
    fake.insert_security_group("sg-1", "sg1", None, Vec::new());
    fake.insert_security_group("sg-2", "sg1", None, Vec::new());
    let namer = ResourceNamer::identity();
    let reconciler = SecurityGroupReconciler::new(&fake, permissive_quirks(), &namer);
    let mut props = RuntimeProperties::new();

    let Err(err) = reconciler
        .ensure("node", &request(None, Vec::new()), &no_peers, &mut props)
        .await
    else {
        panic!("duplicates should conflict");
    };

    assert!(matches!(err, ProvisionError::Conflict { ref resource, .. } if resource == "sg1"));
    assert!(fake.mutations().is_empty());
}

#[rstest]
#[tokio::test]
async fn rule_defaults_fill_ports_protocol_and_remote(no_peers: BTreeMap<String, String>) {
    let fake = FakeDriver::new();
    let namer = ResourceNamer::identity();
    let reconciler = SecurityGroupReconciler::new(&fake, permissive_quirks(), &namer);
    let wanted = request(
        None,
        vec![
            RuleSpec::default(),
            RuleSpec {
                port: Some(8080),
                port_range_max: Some(8090),
                protocol: Some(String::from("UDP")),
                ..RuleSpec::default()
            },
        ],
    );

    let desired = reconciler
        .desired_spec("node", &wanted, &no_peers)
        .await
        .unwrap_or_else(|err| panic!("desired: {err}"));

    let all_ports = IngressRule::new(1, 65535, "tcp", RemoteRef::IpPrefix(String::from("0.0.0.0/0")))
        .unwrap_or_else(|err| panic!("rule: {err}"));
    let udp_range = IngressRule::new(8080, 8090, "udp", RemoteRef::IpPrefix(String::from("0.0.0.0/0")))
        .unwrap_or_else(|err| panic!("rule: {err}"));
    assert_eq!(desired.rules, vec![all_ports, udp_range]);
}

#[rstest]
#[tokio::test]
async fn group_name_takes_precedence_over_other_remotes(no_peers: BTreeMap<String, String>) {
    let fake = FakeDriver::new();
    fake.insert_security_group("sg-db", "db", None, Vec::new());
    let namer = ResourceNamer::identity();
    let reconciler = SecurityGroupReconciler::new(&fake, permissive_quirks(), &namer);
    let wanted = request(
        None,
        vec![RuleSpec {
            port: Some(5432),
            remote_group_name: Some(String::from("db")),
            remote_group_id: Some(String::from("sg-ignored")),
            remote_ip_prefix: Some(String::from("10.0.0.0/8")),
            ..RuleSpec::default()
        }],
    );

    let desired = reconciler
        .desired_spec("node", &wanted, &no_peers)
        .await
        .unwrap_or_else(|err| panic!("desired: {err}"));

    let rule = desired.rules.first().unwrap_or_else(|| panic!("no rule"));
    assert_eq!(rule.remote, RemoteRef::GroupId(String::from("sg-db")));
}

#[rstest]
#[case::missing(0)]
#[case::ambiguous(2)]
#[tokio::test]
async fn group_names_must_match_exactly_one_group(
    no_peers: BTreeMap<String, String>,
    #[case] groups: usize,
) {
    let fake = FakeDriver::new();
    for index in 0..groups {
        fake.insert_security_group(&format!("sg-{index}"), "db", None, Vec::new());
    }
    let namer = ResourceNamer::identity();
    let reconciler = SecurityGroupReconciler::new(&fake, permissive_quirks(), &namer);
    let wanted = request(
        None,
        vec![RuleSpec {
            remote_group_name: Some(String::from("db")),
            ..RuleSpec::default()
        }],
    );

    let Err(err) = reconciler
        .desired_spec("node", &wanted, &no_peers)
        .await
    else {
        panic!("group name should not resolve");
    };

    if groups == 0 {
        assert!(matches!(err, ProvisionError::NotFound { .. }), "{err:?}");
    } else {
        assert!(
            matches!(err, ProvisionError::AmbiguousReference { matches: 2, .. }),
            "{err:?}"
        );
    }
}

#[rstest]
#[case("10.0.0.5", "10.0.0.5/32")]
#[case("2001:db8::5", "2001:db8::5/128")]
#[tokio::test]
async fn peer_nodes_become_host_prefixes(#[case] address: &str, #[case] expected: &str) {
    let fake = FakeDriver::new();
    let namer = ResourceNamer::identity();
    let reconciler = SecurityGroupReconciler::new(&fake, permissive_quirks(), &namer);
    let peers = BTreeMap::from([
        (String::from("db_a1b2c3"), address.to_owned()),
        (String::from("web_d4e5f6"), String::from("10.0.0.9")),
    ]);
    let wanted = request(
        None,
        vec![RuleSpec {
            port: Some(5432),
            remote_group_node: Some(String::from("db")),
            remote_group_id: Some(String::from("sg-ignored")),
            ..RuleSpec::default()
        }],
    );

    let desired = reconciler
        .desired_spec("node", &wanted, &peers)
        .await
        .unwrap_or_else(|err| panic!("desired: {err}"));

    let rule = desired.rules.first().unwrap_or_else(|| panic!("no rule"));
    assert_eq!(rule.remote, RemoteRef::IpPrefix(expected.to_owned()));
}

#[rstest]
fn peer_lookup_rejects_missing_and_duplicate_nodes() {
    let peers = BTreeMap::from([
        (String::from("db_1"), String::from("10.0.0.5")),
        (String::from("db_2"), String::from("10.0.0.6")),
    ]);
    assert!(matches!(
        remote::resolve_peer(&peers, "db"),
        Err(ProvisionError::AmbiguousReference { matches: 2, .. })
    ));
    assert!(matches!(
        remote::resolve_peer(&peers, "cache"),
        Err(ProvisionError::NotFound { .. })
    ));
}

#[rstest]
#[case("db_a1b2", Some("db"))]
#[case("my_db_a1b2", Some("my_db"))]
#[case("standalone", None)]
fn node_names_precede_the_last_underscore(#[case] instance: &str, #[case] expected: Option<&str>) {
    assert_eq!(node_name_of(instance), expected);
}

#[rstest]
#[tokio::test]
async fn group_rules_are_refused_when_the_family_cannot_express_them(
    no_peers: BTreeMap<String, String>,
) {
    let fake = FakeDriver::new();
    let quirks = ProviderQuirks {
        remote_group_rules: false,
        ..permissive_quirks()
    };
    let namer = ResourceNamer::identity();
    let reconciler = SecurityGroupReconciler::new(&fake, quirks, &namer);
    let mut props = RuntimeProperties::new();
    let wanted = request(
        None,
        vec![RuleSpec {
            remote_group_id: Some(String::from("sg-db")),
            ..RuleSpec::default()
        }],
    );

    let Err(err) = reconciler
        .reconcile("node", &wanted, &no_peers, &mut props)
        .await
    else {
        panic!("group rule should be refused");
    };

    assert!(matches!(
        err,
        ProvisionError::Provider(DriverError::Unsupported { .. })
    ));
    assert!(fake.calls().is_empty());
}

#[rstest]
#[tokio::test]
async fn delete_removes_recorded_group() {
    let fake = FakeDriver::new();
    fake.insert_security_group("sg-7", "sg1", None, Vec::new());
    let namer = ResourceNamer::identity();
    let reconciler = SecurityGroupReconciler::new(&fake, permissive_quirks(), &namer);
    let mut props = RuntimeProperties::new();
    props.set(EXTERNAL_ID, "sg-7");

    reconciler
        .delete(&mut props)
        .await
        .unwrap_or_else(|err| panic!("delete: {err}"));

    assert!(fake.security_groups().is_empty());
    assert!(!props.contains(EXTERNAL_ID));
}

#[rstest]
#[tokio::test]
async fn delete_failures_are_never_retryable() {
    let fake = FakeDriver::new();
    fake.fail_on(
        "delete_security_group",
        DriverError::Api {
            status: 503,
            message: String::from("in use"),
        },
    );
    let namer = ResourceNamer::identity();
    let reconciler = SecurityGroupReconciler::new(&fake, permissive_quirks(), &namer);
    let mut props = RuntimeProperties::new();
    props.set(EXTERNAL_ID, "sg-7");

    let Err(err) = reconciler
        .delete(&mut props)
        .await
    else {
        panic!("delete should fail");
    };

    assert!(matches!(err, ProvisionError::DeleteFailed { ref id, .. } if id == "sg-7"));
    assert!(!err.is_retryable());
    assert!(props.contains(EXTERNAL_ID));
}
