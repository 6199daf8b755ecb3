//! Builders shared by the integration tests.
//!
//! Each top-level file in `tests/` compiles to its own crate and pulls this
//! module in via `#[path = "common/session.rs"]`.
#![allow(dead_code, reason = "each test binary uses a different subset")]

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use stratus::test_support::{FakeDriver, FakeFactory};
use stratus::{ConnectionConfig, PollPolicy, ProviderRegistry, ProviderSession};

/// Logical name of the fake family's regional variant.
pub const FAKE_REGIONAL_NAME: &str = "fake_east_1";
/// Region bound to [`FAKE_REGIONAL_NAME`].
pub const FAKE_REGION: &str = "east-1";

pub fn config(prefix: Option<&str>) -> ConnectionConfig {
    ConnectionConfig {
        resources_prefix: prefix.map(str::to_owned),
        ..ConnectionConfig::new("fake", "secret")
    }
}

pub fn registry(factory: FakeFactory) -> ProviderRegistry {
    let mut registry = ProviderRegistry::with_builtin();
    registry.register_family(Arc::new(factory), [(FAKE_REGIONAL_NAME, FAKE_REGION)]);
    registry
}

pub fn agents_metadata() -> Value {
    json!({
        "resources": {
            "agents_security_group": {"name": "agents"},
            "agents_keypair": {"name": "agents-key"}
        }
    })
}

pub fn fast_policy() -> PollPolicy {
    PollPolicy::new(Duration::from_secs(30), Duration::from_secs(5))
        .unwrap_or_else(|err| panic!("poll policy: {err}"))
}

/// Opens a session over `fake` as one engine invocation would.
pub fn open_session(fake: &FakeDriver, prefix: Option<&str>) -> ProviderSession {
    ProviderSession::open(
        &registry(FakeFactory::new(fake.clone())),
        &config(prefix),
        &agents_metadata(),
    )
    .unwrap_or_else(|err| panic!("open session: {err}"))
    .with_poll_policy(fast_policy())
}
