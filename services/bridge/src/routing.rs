//! Building route messages for instances.

use std::collections::BTreeMap;

use tether_cluster::PodInfo;
use tether_events::RouteMessage;
use tether_lrp::Route;

/// Which side of a route message to populate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteAction {
    Register,
    Unregister,
}

/// Builds one message per port for `pod`, carrying `routes` on the `action` side.
///
/// Returns nothing if the pod has no address or `routes` is empty. Hostnames
/// keep their annotation order and collapse duplicates.
pub fn route_messages(pod: &PodInfo, routes: &[Route], action: RouteAction) -> Vec<RouteMessage> {
    let Some(address) = pod.ip.as_deref().filter(|ip| !ip.is_empty()) else {
        return Vec::new();
    };

    let mut by_port: BTreeMap<u16, Vec<String>> = BTreeMap::new();
    for route in routes {
        let hostnames = by_port.entry(route.port).or_default();
        if !hostnames.contains(&route.hostname) {
            hostnames.push(route.hostname.clone());
        }
    }

    let name = pod.app_guid().unwrap_or_default();
    by_port
        .into_iter()
        .map(|(port, hostnames)| {
            let message = RouteMessage::new(pod.name.as_str(), name, address, port);
            match action {
                RouteAction::Register => message.with_registered(hostnames),
                RouteAction::Unregister => message.with_unregistered(hostnames),
            }
        })
        .collect()
}
