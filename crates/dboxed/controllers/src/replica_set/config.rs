//! Per-member configuration derived from the owner

use dboxed_types::ids::BoxId;
use dboxed_types::models::{PortForward, Protocol, ReplicaSetRecord, RoutingService};
use serde::Serialize;

use super::kind::ReplicaSetKind;

/// Port the member listens on for plain HTTP
pub const SANDBOX_HTTP_PORT: u16 = 80;
/// Port the member listens on for HTTPS and HTTP/3
pub const SANDBOX_HTTPS_PORT: u16 = 443;

/// The three rules every member carries: `http-tcp`, `https-tcp` and
/// `https-udp`.
pub fn port_forwards<I>(owner: &ReplicaSetRecord<I>, box_id: BoxId) -> Vec<PortForward> {
    let rule = |description: &str, protocol, host_port, sandbox_port| PortForward {
        box_id,
        description: description.to_string(),
        protocol,
        host_port_first: host_port,
        host_port_last: host_port,
        sandbox_port,
    };
    vec![
        rule("http-tcp", Protocol::Tcp, owner.http_port, SANDBOX_HTTP_PORT),
        rule("https-tcp", Protocol::Tcp, owner.https_port, SANDBOX_HTTPS_PORT),
        rule("https-udp", Protocol::Udp, owner.https_port, SANDBOX_HTTPS_PORT),
    ]
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RoutingConfig<'a> {
    kind: &'static str,
    name: &'a str,
    http_port: u16,
    https_port: u16,
    routes: Vec<Route<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Route<'a> {
    description: &'a str,
    hostname: &'a str,
    path_prefix: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    target_box: Option<String>,
    port: u16,
}

/// Render the routing configuration shared by all members.
///
/// Routes are ordered by hostname, then longest path prefix first, so the
/// output only changes when the set of services does.
pub fn render<K: ReplicaSetKind>(
    owner: &ReplicaSetRecord<K::Id>,
    services: &[RoutingService<K::Id>],
) -> Result<String, serde_yaml::Error> {
    let mut routes: Vec<Route<'_>> = services
        .iter()
        .map(|s| Route {
            description: &s.description,
            hostname: &s.hostname,
            path_prefix: &s.path_prefix,
            target_box: s.box_id.map(|id| id.to_string()),
            port: s.port,
        })
        .collect();
    routes.sort_by(|a, b| {
        a.hostname
            .cmp(b.hostname)
            .then_with(|| b.path_prefix.len().cmp(&a.path_prefix.len()))
            .then_with(|| a.path_prefix.cmp(b.path_prefix))
            .then_with(|| a.description.cmp(b.description))
    });

    let config = RoutingConfig {
        kind: K::BOX_TYPE.as_str(),
        name: &owner.name,
        http_port: SANDBOX_HTTP_PORT,
        https_port: SANDBOX_HTTPS_PORT,
        routes,
    };
    serde_yaml::to_string(&config)
}
