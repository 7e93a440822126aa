//! Listen-mode routing table computation
//!
//! Each host (the device host or an NFCEE) requests a set of listen
//! technologies. Hosts are applied from lowest to highest priority and a
//! later host overwrites the route of any technology it also requests, so
//! the highest-priority requester wins each technology. Hosts missing from
//! the priority list rank below every listed host; among them the highest id
//! wins.

use std::collections::BTreeMap;

use nexum_nci_core::types::{RoutingEntry, Technologies, Technology};

/// Merge per-host technology requests into technology routing entries
///
/// `host_priority` lists hosts highest priority first. Entries come out in
/// technology wire order.
pub fn merge(
    host_priority: &[u8],
    requests: &BTreeMap<u8, Technologies>,
    power_state: u8,
) -> Vec<RoutingEntry> {
    let unlisted = requests
        .keys()
        .copied()
        .filter(|host| !host_priority.contains(host));
    let ordered = unlisted.chain(host_priority.iter().rev().copied());

    let mut table: BTreeMap<u8, (Technology, u8)> = BTreeMap::new();
    for host in ordered {
        let Some(techs) = requests.get(&host) else {
            continue;
        };
        for tech in techs.technologies() {
            table.insert(u8::from(tech), (tech, host));
        }
    }

    table
        .into_values()
        .map(|(technology, route)| RoutingEntry::Technology {
            route,
            power_state,
            technology,
        })
        .collect()
}
