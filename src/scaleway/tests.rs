use super::error::{from_response, status_for_error_type};
use super::image::{select_commercial_type, select_image_id};
use super::types::{ProductList, RuleBody, ServerEnvelope, map_state};
use super::*;
use crate::driver::ServerState;
use crate::rules::RemoteRef;
use rstest::{fixture, rstest};
use scaleway_rs::ScalewayImage;
use serde_json::json;
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};

use crate::driver::ProviderDriver;

fn image(id: &str, name: &str, arch: &str, state: &str, creation_date: &str) -> ScalewayImage {
    ScalewayImage {
        id: id.to_owned(),
        name: name.to_owned(),
        arch: arch.to_owned(),
        creation_date: creation_date.to_owned(),
        modification_date: String::new(),
        from_server: None,
        organization: String::new(),
        public: true,
        state: state.to_owned(),
        project: String::new(),
        tags: vec![],
        zone: String::new(),
        root_volume: scaleway_rs::ScalewayImageRootVolume {
            id: String::new(),
            name: String::new(),
            size: 0,
            volume_type: String::new(),
        },
        default_bootscript: None,
        extra_volumes: scaleway_rs::ScalewayImageExtraVolumes {
            volumes: HashMap::new(),
        },
    }
}

#[fixture]
fn config() -> ConnectionConfig {
    ConnectionConfig {
        project_id: Some(String::from("proj")),
        ..ConnectionConfig::new("scaleway", "dummy")
    }
}

#[rstest]
#[case("running", ServerState::Running)]
#[case("stopped", ServerState::Stopped)]
#[case("stopped in place", ServerState::Stopped)]
#[case("starting", ServerState::Pending)]
#[case("stopping", ServerState::Stopped)]
#[case("locked", ServerState::Unknown)]
fn maps_provider_states(#[case] raw: &str, #[case] expected: ServerState) {
    assert_eq!(map_state(raw), expected);
}

#[rstest]
fn server_body_collects_private_and_public_addresses() {
    let envelope: ServerEnvelope = serde_json::from_value(json!({
        "server": {
            "id": "srv-1",
            "name": "dev-web",
            "state": "running",
            "private_ip": "10.1.2.3",
            "public_ip": {"address": "51.15.0.1"},
            "public_ips": [{"address": "51.15.0.1"}, {"address": "2001:db8::1"}]
        }
    }))
    .unwrap_or_else(|err| panic!("decode server: {err}"));
    let snapshot = envelope.server.into_snapshot();
    assert_eq!(snapshot.state, ServerState::Running);
    assert_eq!(snapshot.private_ips, vec![String::from("10.1.2.3")]);
    assert_eq!(
        snapshot.public_ips,
        vec![String::from("51.15.0.1"), String::from("2001:db8::1")]
    );
}

#[rstest]
fn inbound_rules_become_observed_rules() {
    let listing: Vec<RuleBody> = serde_json::from_value(json!([
        {"id": "r1", "protocol": "TCP", "direction": "inbound", "action": "accept",
         "ip_range": "0.0.0.0/0", "dest_port_from": 22, "dest_port_to": null},
        {"id": "r2", "protocol": "TCP", "direction": "outbound", "action": "drop",
         "ip_range": "0.0.0.0/0", "dest_port_from": 25, "editable": false},
        {"id": "r3", "protocol": "UDP", "direction": "inbound", "action": "accept",
         "ip_range": "10.0.0.0/8", "dest_port_from": 5000, "dest_port_to": 5100}
    ]))
    .unwrap_or_else(|err| panic!("decode rules: {err}"));
    let observed: Vec<_> = listing
        .into_iter()
        .filter_map(|rule| {
            rule.into_observed("sg-1")
                .unwrap_or_else(|err| panic!("convert rule: {err}"))
        })
        .collect();
    assert_eq!(observed.len(), 2);
    let ssh = observed
        .first()
        .unwrap_or_else(|| panic!("ssh rule missing"));
    assert_eq!(ssh.rule.protocol, "tcp");
    assert_eq!((ssh.rule.port_range_min, ssh.rule.port_range_max), (22, 22));
    assert_eq!(ssh.security_group_id.as_deref(), Some("sg-1"));
    let udp = observed.get(1).unwrap_or_else(|| panic!("udp rule missing"));
    assert_eq!(
        udp.rule.remote,
        RemoteRef::IpPrefix(String::from("10.0.0.0/8"))
    );
    assert_eq!((udp.rule.port_range_min, udp.rule.port_range_max), (5000, 5100));
}

#[rstest]
fn image_selection_prefers_exact_name_then_newest() {
    let images = vec![
        image("old", "Ubuntu 24.04", "x86_64", "available", "2024-01-01"),
        image("new", "Ubuntu 24.04", "x86_64", "available", "2024-06-01"),
        image("arm", "Ubuntu 24.04", "arm64", "available", "2024-09-01"),
        image("fuzzy", "Ubuntu 24.04 GPU", "x86_64", "available", "2024-12-01"),
        image("broken", "Ubuntu 24.04", "x86_64", "error", "2025-01-01"),
    ];
    assert_eq!(
        select_image_id(images, "Ubuntu 24.04", "x86_64"),
        Some(String::from("new"))
    );
}

#[rstest]
fn image_selection_returns_none_without_candidates() {
    let images = vec![image("arm", "Debian", "arm64", "available", "2024-09-01")];
    assert_eq!(select_image_id(images, "Debian", "x86_64"), None);
}

#[rstest]
#[case(SizeSelector::Named(String::from("DEV1-S")), Some("DEV1-S"))]
#[case(SizeSelector::Named(String::from("GP1-XL")), None)]
#[case(SizeSelector::Ram(4096), Some("DEV1-M"))]
#[case(SizeSelector::Ram(3000), None)]
fn commercial_types_resolve_by_name_or_ram(
    #[case] selector: SizeSelector,
    #[case] expected: Option<&str>,
) {
    let products: ProductList = serde_json::from_value(json!({
        "servers": {
            "DEV1-S": {"ram": 2_147_483_648_u64, "ncpus": 2},
            "DEV1-M": {"ram": 4_294_967_296_u64, "ncpus": 3},
            "PLAY2-MICRO": {"ram": 4_294_967_296_u64, "ncpus": 4}
        }
    }))
    .unwrap_or_else(|err| panic!("decode products: {err}"));
    assert_eq!(
        select_commercial_type(products, &selector).as_deref(),
        expected
    );
}

#[rstest]
fn api_error_bodies_keep_status_and_message() {
    let body = br#"{"type": "not_found", "message": "resource is not found", "resource": "instance_server", "resource_id": "srv-1"}"#;
    let DriverError::Api { status, message } = from_response(404, body) else {
        panic!("expected Api error");
    };
    assert_eq!(status, 404);
    assert!(message.contains("resource is not found"), "{message}");

    let plain = from_response(502, b"bad gateway");
    assert_eq!(
        plain,
        DriverError::Api {
            status: 502,
            message: String::from("bad gateway")
        }
    );
}

#[rstest]
#[case("not_found", 404)]
#[case("invalid_arguments", 400)]
#[case("resource_still_in_use", 409)]
#[case("out_of_stock", 500)]
fn sdk_error_types_map_to_statuses(#[case] etype: &str, #[case] status: u16) {
    assert_eq!(status_for_error_type(etype), status);
}

#[rstest]
fn every_zone_has_a_regional_variant() {
    let variants = ScalewayFactory::regional_variants();
    assert_eq!(variants.len(), ZONES.len());
    assert!(variants.contains(&(String::from("scaleway_nl_ams_1"), String::from("nl-ams-1"))));
}

#[rstest]
fn connect_defaults_zone_and_honours_host_override(config: ConnectionConfig) {
    let driver = ScalewayDriver::new(
        DEFAULT_ZONE,
        &ConnectionConfig {
            host: Some(String::from("http://localhost:8080/instance/v1/")),
            ..config
        },
    )
    .unwrap_or_else(|err| panic!("driver: {err}"));
    assert_eq!(driver.zone(), "fr-par-1");
    assert_eq!(
        driver.endpoint("ips"),
        "http://localhost:8080/instance/v1/zones/fr-par-1/ips"
    );
}

#[rstest]
fn connect_requires_project_id(config: ConnectionConfig) {
    let factory = ScalewayFactory::new();
    let result = factory.connect(
        Some("pl-waw-1"),
        &ConnectionConfig {
            project_id: None,
            ..config
        },
    );
    let Err(DriverError::Config(message)) = result else {
        panic!("expected configuration error");
    };
    assert!(message.contains("CONNECTION_PROJECT_ID"), "{message}");
}

#[rstest]
fn quirks_describe_scaleway_limits() {
    let quirks = ScalewayFactory::new().quirks();
    assert_eq!(quirks.size_selection, SizeSelection::ByName);
    assert!(!quirks.requires_network);
    assert!(!quirks.requires_key_pair);
    assert!(!quirks.remote_group_rules);
    assert_eq!(quirks.floating_ip_attach, FloatingIpAttach::Associate);
}

/// Answers each request on a loopback port with the page named by its
/// `page` query parameter, recording the request lines it saw.
fn serve_pages(pages: Vec<serde_json::Value>) -> (String, Arc<Mutex<Vec<String>>>) {
    let listener =
        TcpListener::bind("127.0.0.1:0").unwrap_or_else(|err| panic!("bind stub: {err}"));
    let addr = listener
        .local_addr()
        .unwrap_or_else(|err| panic!("stub address: {err}"));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    std::thread::spawn(move || {
        for incoming in listener.incoming() {
            let Ok(mut stream) = incoming else { break };
            let Ok(reader_stream) = stream.try_clone() else { break };
            let mut reader = BufReader::new(reader_stream);
            let mut request_line = String::new();
            if reader.read_line(&mut request_line).is_err() {
                break;
            }
            loop {
                let mut header = String::new();
                match reader.read_line(&mut header) {
                    Ok(0) | Err(_) => break,
                    Ok(_) if header == "\r\n" => break,
                    Ok(_) => {}
                }
            }
            let page = request_line
                .split(['?', '&', ' '])
                .find_map(|part| part.strip_prefix("page="))
                .and_then(|number| number.parse::<usize>().ok())
                .unwrap_or(1);
            let body = pages
                .get(page.saturating_sub(1))
                .cloned()
                .unwrap_or_else(|| json!({}))
                .to_string();
            if let Ok(mut requests) = log.lock() {
                requests.push(request_line.trim_end().to_owned());
            }
            let reply = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            if stream.write_all(reply.as_bytes()).is_err() {
                break;
            }
        }
    });
    (format!("http://{addr}"), seen)
}

fn ip_page(addresses: impl Iterator<Item = String>) -> serde_json::Value {
    let ips: Vec<serde_json::Value> = addresses
        .map(|address| json!({"id": format!("ip-{address}"), "address": address}))
        .collect();
    let total_count = ips.len();
    json!({ "ips": ips, "total_count": total_count })
}

#[rstest]
#[tokio::test]
async fn floating_ip_lookup_follows_every_page(config: ConnectionConfig) {
    let full_page = ip_page((0..100).map(|host| format!("192.0.2.{host}")));
    let last_page = ip_page(["198.51.100.7".to_owned()].into_iter());
    let (host, seen) = serve_pages(vec![full_page, last_page]);
    let driver = ScalewayDriver::new(
        DEFAULT_ZONE,
        &ConnectionConfig {
            host: Some(host),
            ..config
        },
    )
    .unwrap_or_else(|err| panic!("driver: {err}"));

    let found = driver
        .find_floating_ip("198.51.100.7")
        .await
        .unwrap_or_else(|err| panic!("lookup: {err}"));

    let ip = found.unwrap_or_else(|| panic!("address on the second page was missed"));
    assert_eq!(ip.id, "ip-198.51.100.7");
    let requests = seen.lock().map(|lines| lines.clone()).unwrap_or_default();
    assert_eq!(requests.len(), 2, "{requests:?}");
    assert!(requests.iter().all(|line| line.contains("/zones/fr-par-1/ips")));
    assert!(requests.iter().any(|line| line.contains("page=2")));
}

#[rstest]
#[tokio::test]
async fn short_first_page_ends_the_listing(config: ConnectionConfig) {
    let (host, seen) = serve_pages(vec![ip_page(["192.0.2.1".to_owned()].into_iter())]);
    let driver = ScalewayDriver::new(
        DEFAULT_ZONE,
        &ConnectionConfig {
            host: Some(host),
            ..config
        },
    )
    .unwrap_or_else(|err| panic!("driver: {err}"));

    let found = driver
        .find_floating_ip("203.0.113.9")
        .await
        .unwrap_or_else(|err| panic!("lookup: {err}"));

    assert_eq!(found, None);
    let requests = seen.lock().map(|lines| lines.len()).unwrap_or_default();
    assert_eq!(requests, 1);
}
