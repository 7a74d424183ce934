use std::collections::BTreeMap;
use std::net::IpAddr;
use std::ops::Bound;

use ipnet::IpNet;

use crate::types::{labels, Labels, PrefixType};

use super::addr;

/// One prefix and the labels of the claim that installed it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Route {
    prefix: IpNet,
    labels: Labels,
}

impl Route {
    /// Route for the canonical form of `prefix`.
    pub fn new(prefix: IpNet, labels: Labels) -> Self {
        Self {
            prefix: prefix.trunc(),
            labels,
        }
    }

    /// Canonical prefix.
    pub fn prefix(&self) -> IpNet {
        self.prefix
    }

    /// Labels of the route.
    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    /// Declared prefix type, `Other` when unset.
    pub fn prefix_type(&self) -> PrefixType {
        PrefixType::from_labels(&self.labels)
    }

    /// Range table backing this route, for `Range` routes.
    pub fn range_name(&self) -> Option<&str> {
        self.labels.get(labels::RANGE_NAME).map(String::as_str)
    }

    /// First and last address covered.
    pub fn span(&self) -> (u128, u128) {
        addr::span(&self.prefix)
    }
}

type RouteKey = (IpAddr, u8);

fn key(prefix: &IpNet) -> RouteKey {
    (prefix.network(), prefix.prefix_len())
}

/// Longest-prefix-match table of routes, ordered by (address, length).
#[derive(Clone, Debug, Default)]
pub struct Rib {
    routes: BTreeMap<RouteKey, Route>,
}

impl Rib {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Exact-match lookup.
    pub fn get(&self, prefix: &IpNet) -> Option<&Route> {
        self.routes.get(&key(&prefix.trunc()))
    }

    /// Inserts or replaces the route for its prefix.
    pub fn insert(&mut self, route: Route) -> Option<Route> {
        self.routes.insert(key(&route.prefix), route)
    }

    /// Removes the exact route for `prefix`.
    pub fn remove(&mut self, prefix: &IpNet) -> Option<Route> {
        self.routes.remove(&key(&prefix.trunc()))
    }

    /// Routes strictly containing `prefix`, most specific first.
    pub fn parents(&self, prefix: &IpNet) -> Vec<&Route> {
        let mut out = Vec::new();
        let network = prefix.network();
        for len in (0..prefix.prefix_len()).rev() {
            let Ok(candidate) = IpNet::new(network, len) else {
                continue;
            };
            if let Some(route) = self.routes.get(&key(&candidate.trunc())) {
                out.push(route);
            }
        }
        out
    }

    /// Most specific route strictly containing `prefix`.
    pub fn longest_parent(&self, prefix: &IpNet) -> Option<&Route> {
        let network = prefix.network();
        (0..prefix.prefix_len()).rev().find_map(|len| {
            IpNet::new(network, len)
                .ok()
                .and_then(|candidate| self.routes.get(&key(&candidate.trunc())))
        })
    }

    /// Routes strictly inside `prefix`, ascending by (address, length).
    pub fn children(&self, prefix: &IpNet) -> Vec<&Route> {
        let prefix = prefix.trunc();
        let lower = (prefix.network(), 0u8);
        let upper = (prefix.broadcast(), u8::MAX);
        self.routes
            .range((Bound::Included(lower), Bound::Included(upper)))
            .map(|(_, route)| route)
            .filter(|route| {
                route.prefix.prefix_len() > prefix.prefix_len() && prefix.contains(&route.prefix)
            })
            .collect()
    }

    /// Removes every route matching `pred`, returning them.
    pub fn remove_where<F>(&mut self, mut pred: F) -> Vec<Route>
    where
        F: FnMut(&Route) -> bool,
    {
        let keys: Vec<RouteKey> = self
            .routes
            .iter()
            .filter(|(_, route)| pred(route))
            .map(|(key, _)| *key)
            .collect();
        keys.into_iter()
            .filter_map(|key| self.routes.remove(&key))
            .collect()
    }

    /// All routes, ascending by (address, length).
    pub fn iter(&self) -> impl Iterator<Item = &Route> {
        self.routes.values()
    }
}
