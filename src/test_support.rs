//! Test support utilities shared across unit and integration tests.
//!
//! [`FakeDriver`] is an in-memory provider that records every call it
//! receives. Server state transitions are scripted per poll so convergence
//! behaviour can be exercised on a paused tokio clock.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::future::ready;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use uuid::Uuid;

use crate::config::ConnectionConfig;
use crate::driver::{
    CreateServerRequest, DriverError, DriverFuture, FloatingIp, ProviderDriver,
    SecurityGroupSnapshot, ServerSnapshot, ServerState, SizeSelector,
};
use crate::provider::{DriverFactory, FloatingIpAttach, ProviderQuirks, SizeSelection};
use crate::rules::{IngressRule, ObservedRule};

/// Family name reported by [`FakeDriver`] and [`FakeFactory`].
pub const FAKE_FAMILY: &str = "fake";

/// One call received by [`FakeDriver`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DriverCall {
    /// `get_server(id)`.
    GetServer(String),
    /// `find_server_by_name(name)`.
    FindServerByName(String),
    /// `find_image(name)`.
    FindImage(String),
    /// `find_size(selector)`.
    FindSize(SizeSelector),
    /// `create_server(request)`.
    CreateServer(CreateServerRequest),
    /// `start_server(id)`.
    StartServer(String),
    /// `stop_server(id)`.
    StopServer(String),
    /// `delete_server(id)`.
    DeleteServer(String),
    /// `allocate_floating_ip()`.
    AllocateFloatingIp,
    /// `find_floating_ip(address)`.
    FindFloatingIp(String),
    /// `release_floating_ip(ip)`, recorded by address.
    ReleaseFloatingIp(String),
    /// `associate_floating_ip(server, ip)`.
    AssociateFloatingIp {
        /// Target server.
        server_id: String,
        /// Address being routed.
        address: String,
    },
    /// `disassociate_floating_ip(ip)`, recorded by address.
    DisassociateFloatingIp(String),
    /// `list_security_groups(name)`.
    ListSecurityGroups(String),
    /// `create_security_group(name, description)`.
    CreateSecurityGroup {
        /// Group name.
        name: String,
        /// Group description.
        description: Option<String>,
    },
    /// `create_ingress_rule(group, rule)`.
    CreateIngressRule {
        /// Owning group.
        group_id: String,
        /// Rule being added.
        rule: IngressRule,
    },
    /// `delete_security_group(id)`.
    DeleteSecurityGroup(String),
}

impl DriverCall {
    /// Returns `true` for calls that change provider state.
    #[must_use]
    pub const fn is_mutation(&self) -> bool {
        matches!(
            self,
            Self::CreateServer(_)
                | Self::StartServer(_)
                | Self::StopServer(_)
                | Self::DeleteServer(_)
                | Self::AllocateFloatingIp
                | Self::ReleaseFloatingIp(_)
                | Self::AssociateFloatingIp { .. }
                | Self::DisassociateFloatingIp(_)
                | Self::CreateSecurityGroup { .. }
                | Self::CreateIngressRule { .. }
                | Self::DeleteSecurityGroup(_)
        )
    }
}

#[derive(Clone, Debug)]
struct FakeServer {
    snapshot: ServerSnapshot,
    upcoming: VecDeque<ServerState>,
    deleted: bool,
}

#[derive(Debug, Default)]
struct FakeState {
    servers: BTreeMap<String, FakeServer>,
    images: BTreeMap<String, String>,
    sizes: BTreeMap<String, String>,
    ram_sizes: BTreeMap<u32, String>,
    floating_ips: Vec<FloatingIp>,
    groups: Vec<SecurityGroupSnapshot>,
    boot_sequence: Vec<ServerState>,
    deletion_sequence: Vec<ServerState>,
    failures: BTreeMap<String, DriverError>,
    calls: Vec<DriverCall>,
    next_address: u8,
}

/// In-memory [`ProviderDriver`] that records calls.
///
/// Clones share state, so a test can hand one clone to the code under test
/// and inspect another.
#[derive(Clone, Debug, Default)]
pub struct FakeDriver {
    state: Arc<Mutex<FakeState>>,
}

impl FakeDriver {
    /// Creates an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes `name` resolvable as an image with identifier `id`.
    #[must_use]
    pub fn with_image(self, name: &str, id: &str) -> Self {
        self.state().images.insert(name.to_owned(), id.to_owned());
        self
    }

    /// Makes `name` resolvable as a size with identifier `id`.
    #[must_use]
    pub fn with_size(self, name: &str, id: &str) -> Self {
        self.state().sizes.insert(name.to_owned(), id.to_owned());
        self
    }

    /// Makes `megabytes` of RAM resolvable as the size `id`.
    #[must_use]
    pub fn with_ram_size(self, megabytes: u32, id: &str) -> Self {
        self.state().ram_sizes.insert(megabytes, id.to_owned());
        self
    }

    /// States reported by newly created servers, one per poll, before they
    /// settle on [`ServerState::Running`].
    #[must_use]
    pub fn with_boot_sequence(self, states: &[ServerState]) -> Self {
        self.state().boot_sequence = states.to_vec();
        self
    }

    /// States reported by deleted servers, one per poll, before they
    /// disappear.
    #[must_use]
    pub fn with_deletion_sequence(self, states: &[ServerState]) -> Self {
        self.state().deletion_sequence = states.to_vec();
        self
    }

    /// Seeds an existing server.
    pub fn insert_server(&self, id: &str, name: &str, state: ServerState) {
        self.insert_server_with_ips(id, name, state, &[], &[]);
    }

    /// Seeds an existing server with addresses.
    pub fn insert_server_with_ips(
        &self,
        id: &str,
        name: &str,
        state: ServerState,
        private_ips: &[&str],
        public_ips: &[&str],
    ) {
        let snapshot = ServerSnapshot {
            id: id.to_owned(),
            name: name.to_owned(),
            state,
            private_ips: private_ips.iter().map(|ip| (*ip).to_owned()).collect(),
            public_ips: public_ips.iter().map(|ip| (*ip).to_owned()).collect(),
        };
        self.state().servers.insert(
            id.to_owned(),
            FakeServer {
                snapshot,
                upcoming: VecDeque::new(),
                deleted: false,
            },
        );
    }

    /// Queues states that `get_server(id)` reports before the stored one.
    pub fn script_server_states(&self, id: &str, states: &[ServerState]) {
        if let Some(server) = self.state().servers.get_mut(id) {
            server.upcoming.extend(states.iter().copied());
        }
    }

    /// Current state of a server, ignoring scripted polls.
    #[must_use]
    pub fn server_state(&self, id: &str) -> Option<ServerState> {
        self.state()
            .servers
            .get(id)
            .filter(|server| !server.deleted)
            .map(|server| server.snapshot.state)
    }

    /// Seeds an existing floating IP.
    pub fn insert_floating_ip(&self, id: &str, address: &str) {
        self.state().floating_ips.push(FloatingIp {
            id: id.to_owned(),
            address: address.to_owned(),
            server_id: None,
        });
    }

    /// Floating IPs currently allocated.
    #[must_use]
    pub fn floating_ips(&self) -> Vec<FloatingIp> {
        self.state().floating_ips.clone()
    }

    /// Seeds an existing security group with rules.
    pub fn insert_security_group(
        &self,
        id: &str,
        name: &str,
        description: Option<&str>,
        rules: Vec<ObservedRule>,
    ) {
        self.state().groups.push(SecurityGroupSnapshot {
            id: id.to_owned(),
            name: name.to_owned(),
            description: description.map(str::to_owned),
            rules,
        });
    }

    /// Security groups currently present.
    #[must_use]
    pub fn security_groups(&self) -> Vec<SecurityGroupSnapshot> {
        self.state().groups.clone()
    }

    /// Makes every call to `operation` (a driver method name) fail.
    pub fn fail_on(&self, operation: &str, error: DriverError) {
        self.state().failures.insert(operation.to_owned(), error);
    }

    /// Calls received so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<DriverCall> {
        self.state().calls.clone()
    }

    /// Calls that changed provider state.
    #[must_use]
    pub fn mutations(&self) -> Vec<DriverCall> {
        self.calls()
            .into_iter()
            .filter(DriverCall::is_mutation)
            .collect()
    }

    /// Number of `get_server` polls received.
    #[must_use]
    pub fn get_server_calls(&self) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|call| matches!(call, DriverCall::GetServer(_)))
            .count()
    }

    fn record(&self, operation: &str, call: DriverCall) -> Result<MutexGuard<'_, FakeState>, DriverError> {
        let mut state = self.state();
        state.calls.push(call);
        if let Some(error) = state.failures.get(operation) {
            return Err(error.clone());
        }
        Ok(state)
    }

    fn not_found(kind: &str, id: &str) -> DriverError {
        DriverError::Api {
            status: 404,
            message: format!("{kind} {id} not found"),
        }
    }

    fn poll_server(&self, id: &str) -> Result<Option<ServerSnapshot>, DriverError> {
        let mut state = self.record("get_server", DriverCall::GetServer(id.to_owned()))?;
        let Some(server) = state.servers.get_mut(id) else {
            return Ok(None);
        };
        if let Some(next) = server.upcoming.pop_front() {
            let mut snapshot = server.snapshot.clone();
            snapshot.state = next;
            return Ok(Some(snapshot));
        }
        if server.deleted {
            return Ok(None);
        }
        Ok(Some(server.snapshot.clone()))
    }

    fn server_by_name(&self, name: &str) -> Result<Option<ServerSnapshot>, DriverError> {
        let state = self.record(
            "find_server_by_name",
            DriverCall::FindServerByName(name.to_owned()),
        )?;
        Ok(state
            .servers
            .values()
            .find(|server| !server.deleted && server.snapshot.name == name)
            .map(|server| server.snapshot.clone()))
    }

    fn create(&self, request: &CreateServerRequest) -> Result<ServerSnapshot, DriverError> {
        let mut state = self.record("create_server", DriverCall::CreateServer(request.clone()))?;
        let snapshot = ServerSnapshot {
            id: format!("srv-{}", Uuid::new_v4().simple()),
            name: request.name.clone(),
            state: ServerState::Running,
            private_ips: vec![String::from("10.0.0.10")],
            public_ips: vec![String::from("198.51.100.10")],
        };
        let upcoming = state.boot_sequence.iter().copied().collect();
        state.servers.insert(
            snapshot.id.clone(),
            FakeServer {
                snapshot: snapshot.clone(),
                upcoming,
                deleted: false,
            },
        );
        let mut reported = snapshot;
        reported.state = ServerState::Pending;
        Ok(reported)
    }

    fn set_server_state(
        &self,
        operation: &str,
        call: DriverCall,
        id: &str,
        target: ServerState,
    ) -> Result<(), DriverError> {
        let mut state = self.record(operation, call)?;
        let server = state
            .servers
            .get_mut(id)
            .filter(|server| !server.deleted)
            .ok_or_else(|| Self::not_found("server", id))?;
        server.snapshot.state = target;
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<(), DriverError> {
        let mut state = self.record("delete_server", DriverCall::DeleteServer(id.to_owned()))?;
        let sequence: VecDeque<ServerState> = state.deletion_sequence.iter().copied().collect();
        let server = state
            .servers
            .get_mut(id)
            .ok_or_else(|| Self::not_found("server", id))?;
        server.deleted = true;
        server.snapshot.state = ServerState::Terminated;
        server.upcoming = sequence;
        Ok(())
    }

    fn allocate(&self) -> Result<FloatingIp, DriverError> {
        let mut state = self.record("allocate_floating_ip", DriverCall::AllocateFloatingIp)?;
        state.next_address = state.next_address.wrapping_add(1);
        let ip = FloatingIp {
            id: format!("ip-{}", Uuid::new_v4().simple()),
            address: format!("203.0.113.{}", state.next_address),
            server_id: None,
        };
        state.floating_ips.push(ip.clone());
        Ok(ip)
    }

    fn ip_by_address(&self, address: &str) -> Result<Option<FloatingIp>, DriverError> {
        let state = self.record(
            "find_floating_ip",
            DriverCall::FindFloatingIp(address.to_owned()),
        )?;
        Ok(state
            .floating_ips
            .iter()
            .find(|ip| ip.address == address)
            .cloned())
    }

    fn release(&self, ip: &FloatingIp) -> Result<(), DriverError> {
        let mut state = self.record(
            "release_floating_ip",
            DriverCall::ReleaseFloatingIp(ip.address.clone()),
        )?;
        let before = state.floating_ips.len();
        state.floating_ips.retain(|known| known.id != ip.id);
        if state.floating_ips.len() == before {
            return Err(Self::not_found("floating IP", &ip.address));
        }
        Ok(())
    }

    fn route(
        &self,
        operation: &str,
        call: DriverCall,
        ip: &FloatingIp,
        server_id: Option<&str>,
    ) -> Result<(), DriverError> {
        let mut state = self.record(operation, call)?;
        let known = state
            .floating_ips
            .iter_mut()
            .find(|known| known.id == ip.id)
            .ok_or_else(|| Self::not_found("floating IP", &ip.address))?;
        known.server_id = server_id.map(str::to_owned);
        Ok(())
    }

    fn groups_named(&self, name: &str) -> Result<Vec<SecurityGroupSnapshot>, DriverError> {
        let state = self.record(
            "list_security_groups",
            DriverCall::ListSecurityGroups(name.to_owned()),
        )?;
        Ok(state
            .groups
            .iter()
            .filter(|group| group.name == name)
            .cloned()
            .collect())
    }

    fn create_group(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<SecurityGroupSnapshot, DriverError> {
        let mut state = self.record(
            "create_security_group",
            DriverCall::CreateSecurityGroup {
                name: name.to_owned(),
                description: description.map(str::to_owned),
            },
        )?;
        let group = SecurityGroupSnapshot {
            id: format!("sg-{}", Uuid::new_v4().simple()),
            name: name.to_owned(),
            description: description.map(str::to_owned),
            rules: Vec::new(),
        };
        state.groups.push(group.clone());
        Ok(group)
    }

    fn add_rule(&self, group_id: &str, rule: &IngressRule) -> Result<(), DriverError> {
        let mut state = self.record(
            "create_ingress_rule",
            DriverCall::CreateIngressRule {
                group_id: group_id.to_owned(),
                rule: rule.clone(),
            },
        )?;
        let group = state
            .groups
            .iter_mut()
            .find(|group| group.id == group_id)
            .ok_or_else(|| Self::not_found("security group", group_id))?;
        group.rules.push(ObservedRule {
            id: Some(format!("rule-{}", Uuid::new_v4().simple())),
            security_group_id: Some(group_id.to_owned()),
            tenant_id: Some(String::from("tenant")),
            rule: rule.clone(),
        });
        Ok(())
    }

    fn remove_group(&self, id: &str) -> Result<(), DriverError> {
        let mut state = self.record(
            "delete_security_group",
            DriverCall::DeleteSecurityGroup(id.to_owned()),
        )?;
        let before = state.groups.len();
        state.groups.retain(|group| group.id != id);
        if state.groups.len() == before {
            return Err(Self::not_found("security group", id));
        }
        Ok(())
    }
}

impl ProviderDriver for FakeDriver {
    fn family(&self) -> &str {
        FAKE_FAMILY
    }

    fn get_server<'a>(&'a self, id: &'a str) -> DriverFuture<'a, Option<ServerSnapshot>> {
        Box::pin(ready(self.poll_server(id)))
    }

    fn find_server_by_name<'a>(
        &'a self,
        name: &'a str,
    ) -> DriverFuture<'a, Option<ServerSnapshot>> {
        Box::pin(ready(self.server_by_name(name)))
    }

    fn find_image<'a>(&'a self, name: &'a str) -> DriverFuture<'a, Option<String>> {
        let result = self
            .record("find_image", DriverCall::FindImage(name.to_owned()))
            .map(|state| state.images.get(name).cloned());
        Box::pin(ready(result))
    }

    fn find_size<'a>(&'a self, selector: &'a SizeSelector) -> DriverFuture<'a, Option<String>> {
        let result = self
            .record("find_size", DriverCall::FindSize(selector.clone()))
            .map(|state| match selector {
                SizeSelector::Named(name) => state.sizes.get(name).cloned(),
                SizeSelector::Ram(megabytes) => state.ram_sizes.get(megabytes).cloned(),
            });
        Box::pin(ready(result))
    }

    fn create_server<'a>(
        &'a self,
        request: &'a CreateServerRequest,
    ) -> DriverFuture<'a, ServerSnapshot> {
        Box::pin(ready(self.create(request)))
    }

    fn start_server<'a>(&'a self, id: &'a str) -> DriverFuture<'a, ()> {
        Box::pin(ready(self.set_server_state(
            "start_server",
            DriverCall::StartServer(id.to_owned()),
            id,
            ServerState::Running,
        )))
    }

    fn stop_server<'a>(&'a self, id: &'a str) -> DriverFuture<'a, ()> {
        Box::pin(ready(self.set_server_state(
            "stop_server",
            DriverCall::StopServer(id.to_owned()),
            id,
            ServerState::Stopped,
        )))
    }

    fn delete_server<'a>(&'a self, id: &'a str) -> DriverFuture<'a, ()> {
        Box::pin(ready(self.delete(id)))
    }

    fn allocate_floating_ip(&self) -> DriverFuture<'_, FloatingIp> {
        Box::pin(ready(self.allocate()))
    }

    fn find_floating_ip<'a>(&'a self, address: &'a str) -> DriverFuture<'a, Option<FloatingIp>> {
        Box::pin(ready(self.ip_by_address(address)))
    }

    fn release_floating_ip<'a>(&'a self, ip: &'a FloatingIp) -> DriverFuture<'a, ()> {
        Box::pin(ready(self.release(ip)))
    }

    fn associate_floating_ip<'a>(
        &'a self,
        server_id: &'a str,
        ip: &'a FloatingIp,
    ) -> DriverFuture<'a, ()> {
        let call = DriverCall::AssociateFloatingIp {
            server_id: server_id.to_owned(),
            address: ip.address.clone(),
        };
        Box::pin(ready(self.route(
            "associate_floating_ip",
            call,
            ip,
            Some(server_id),
        )))
    }

    fn disassociate_floating_ip<'a>(&'a self, ip: &'a FloatingIp) -> DriverFuture<'a, ()> {
        let call = DriverCall::DisassociateFloatingIp(ip.address.clone());
        Box::pin(ready(self.route("disassociate_floating_ip", call, ip, None)))
    }

    fn list_security_groups<'a>(
        &'a self,
        name: &'a str,
    ) -> DriverFuture<'a, Vec<SecurityGroupSnapshot>> {
        Box::pin(ready(self.groups_named(name)))
    }

    fn create_security_group<'a>(
        &'a self,
        name: &'a str,
        description: Option<&'a str>,
    ) -> DriverFuture<'a, SecurityGroupSnapshot> {
        Box::pin(ready(self.create_group(name, description)))
    }

    fn create_ingress_rule<'a>(
        &'a self,
        group_id: &'a str,
        rule: &'a IngressRule,
    ) -> DriverFuture<'a, ()> {
        Box::pin(ready(self.add_rule(group_id, rule)))
    }

    fn delete_security_group<'a>(&'a self, id: &'a str) -> DriverFuture<'a, ()> {
        Box::pin(ready(self.remove_group(id)))
    }
}

/// Quirks of a provider that supports everything.
#[must_use]
pub const fn permissive_quirks() -> ProviderQuirks {
    ProviderQuirks {
        size_selection: SizeSelection::ByName,
        requires_network: false,
        requires_key_pair: true,
        floating_ip_attach: FloatingIpAttach::Associate,
        remote_group_rules: true,
    }
}

/// [`DriverFactory`] handing out clones of one [`FakeDriver`].
#[derive(Clone, Debug)]
pub struct FakeFactory {
    family: String,
    driver: FakeDriver,
    quirks: ProviderQuirks,
    connections: Arc<Mutex<Vec<Option<String>>>>,
}

impl FakeFactory {
    /// Creates a factory named [`FAKE_FAMILY`] with permissive quirks.
    #[must_use]
    pub fn new(driver: FakeDriver) -> Self {
        Self {
            family: FAKE_FAMILY.to_owned(),
            driver,
            quirks: permissive_quirks(),
            connections: Arc::default(),
        }
    }

    /// Overrides the family name.
    #[must_use]
    pub fn named(self, family: &str) -> Self {
        Self {
            family: family.to_owned(),
            ..self
        }
    }

    /// Overrides the quirks.
    #[must_use]
    pub fn with_quirks(self, quirks: ProviderQuirks) -> Self {
        Self { quirks, ..self }
    }

    /// Regions passed to `connect`, in call order.
    #[must_use]
    pub fn connections(&self) -> Vec<Option<String>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl DriverFactory for FakeFactory {
    fn family(&self) -> &str {
        &self.family
    }

    fn connect(
        &self,
        region: Option<&str>,
        config: &ConnectionConfig,
    ) -> Result<Box<dyn ProviderDriver>, DriverError> {
        config.validate().map_err(|err| DriverError::Config(err.to_string()))?;
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(region.map(str::to_owned));
        Ok(Box::new(self.driver.clone()))
    }

    fn quirks(&self) -> ProviderQuirks {
        self.quirks
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: AsyncMutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
