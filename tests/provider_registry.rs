//! Logical provider name resolution and session wiring.

#[path = "common/session.rs"]
mod session;

use std::sync::Arc;

use rstest::rstest;
use serde_json::{Value, json};
use stratus::provider::{FloatingIpAttach, SizeSelection};
use stratus::test_support::{FakeDriver, FakeFactory, permissive_quirks};
use stratus::{
    ConnectionConfig, DriverError, ProviderQuirks, ProviderRegistry, ProviderSession,
    ProvisionError,
};

use session::{FAKE_REGION, FAKE_REGIONAL_NAME, config, registry};

#[rstest]
#[case("scaleway", None)]
#[case("scaleway_nl_ams_1", Some("nl-ams-1"))]
#[case("scaleway-pl-waw-2", Some("pl-waw-2"))]
#[case(" scaleway_fr_par_3 ", Some("fr-par-3"))]
fn builtin_names_resolve_to_the_scaleway_family(
    #[case] name: &str,
    #[case] region: Option<&str>,
) {
    let resolved = ProviderRegistry::with_builtin()
        .resolve(name)
        .unwrap_or_else(|err| panic!("resolve {name}: {err}"));
    assert_eq!(resolved.family(), "scaleway");
    assert_eq!(resolved.region(), region);
}

#[rstest]
#[case("openstack")]
#[case("")]
#[case("scaleway_mars_1")]
fn unknown_names_are_unsupported(#[case] name: &str) {
    let Err(err) = ProviderRegistry::with_builtin().resolve(name) else {
        panic!("name should be unsupported");
    };
    assert!(matches!(err, ProvisionError::UnsupportedProvider { .. }));
    assert!(!err.is_retryable());
}

#[rstest]
fn registered_families_extend_the_builtin_set() {
    let registry = registry(FakeFactory::new(FakeDriver::new()));
    let names: Vec<&str> = registry.names().collect();
    assert!(names.contains(&"fake"));
    assert!(names.contains(&FAKE_REGIONAL_NAME));
    assert!(names.contains(&"scaleway"));
}

#[rstest]
fn regional_names_thread_their_region_into_connect() {
    let factory = FakeFactory::new(FakeDriver::new());
    let registry = registry(factory.clone());
    let regional = ConnectionConfig {
        cloud_provider_name: String::from("fake-east-1"),
        region: Some(String::from("ignored")),
        ..config(None)
    };
    let plain = ConnectionConfig {
        region: Some(String::from("west-2")),
        ..config(None)
    };

    ProviderSession::open(&registry, &regional, &Value::Null)
        .unwrap_or_else(|err| panic!("regional session: {err}"));
    ProviderSession::open(&registry, &plain, &Value::Null)
        .unwrap_or_else(|err| panic!("plain session: {err}"));

    assert_eq!(
        factory.connections(),
        vec![Some(String::from(FAKE_REGION)), Some(String::from("west-2"))]
    );
}

#[rstest]
fn session_exposes_family_quirks_and_context() {
    let quirks = ProviderQuirks {
        size_selection: SizeSelection::ByRam,
        floating_ip_attach: FloatingIpAttach::Unsupported,
        ..permissive_quirks()
    };
    let mut registry = ProviderRegistry::new();
    registry.register_family(
        Arc::new(FakeFactory::new(FakeDriver::new()).named("vcloud").with_quirks(quirks)),
        Vec::<(String, String)>::new(),
    );
    let cfg = ConnectionConfig {
        resources_prefix: Some(String::from("ci-")),
        ..ConnectionConfig::new("vcloud", "secret")
    };

    let session = ProviderSession::open(
        &registry,
        &cfg,
        &json!({"resources": {"agents_keypair": {"name": "ci-key"}}}),
    )
    .unwrap_or_else(|err| panic!("session: {err}"));

    assert_eq!(session.provider().quirks(), quirks);
    assert_eq!(session.driver().family(), "fake");
    assert_eq!(session.context().agents_keypair_name(), Some("ci-key"));
    assert_eq!(session.context().agents_security_group_name(), None);
    assert_eq!(session.namer().prefix(), Some("ci-"));
}

#[rstest]
fn missing_secret_is_reported_before_connecting() {
    let factory = FakeFactory::new(FakeDriver::new());
    let registry = registry(factory.clone());
    let cfg = ConnectionConfig::new("fake", "");

    let Err(err) = ProviderSession::open(&registry, &cfg, &Value::Null) else {
        panic!("secret should be required");
    };

    assert!(matches!(err, ProvisionError::Config(ref message) if message.contains("CONNECTION_SECRET_KEY")));
    assert!(factory.connections().is_empty());
}

#[rstest]
fn scaleway_sessions_require_a_project() {
    let cfg = ConnectionConfig::new("scaleway_fr_par_2", "SCWSECRETKEYEXAMPLE");

    let Err(err) = ProviderSession::open(&ProviderRegistry::with_builtin(), &cfg, &Value::Null) else {
        panic!("project should be required");
    };

    assert!(matches!(
        err,
        ProvisionError::Provider(DriverError::Config(ref message)) if message.contains("project_id")
    ));
}

#[rstest]
fn scaleway_sessions_connect_to_the_named_zone() {
    let cfg = ConnectionConfig {
        project_id: Some(String::from("11111111-2222-3333-4444-555555555555")),
        ..ConnectionConfig::new("scaleway-nl-ams-2", "SCWSECRETKEYEXAMPLE")
    };

    let session = ProviderSession::open(&ProviderRegistry::with_builtin(), &cfg, &Value::Null)
        .unwrap_or_else(|err| panic!("session: {err}"));

    assert_eq!(session.driver().family(), "scaleway");
    assert_eq!(session.provider().region(), Some("nl-ams-2"));
    assert_eq!(session.provider().logical_name(), "scaleway_nl_ams_2");
}

#[rstest]
fn malformed_metadata_fails_the_session() {
    let cfg = config(None);
    let Err(err) = ProviderSession::open(
        &registry(FakeFactory::new(FakeDriver::new())),
        &cfg,
        &json!({"resources": []}),
    )
    else {
        panic!("metadata should be rejected");
    };
    assert!(matches!(err, ProvisionError::Config(_)));
}
