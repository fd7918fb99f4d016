// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Address directory: logical address to physical route.
//!
//! Routes are learned last-write-wins from inbound requests; there is no
//! staleness detection. Two addresses may share one route, so broadcast
//! resolution deduplicates.

use crate::address::{Address, Route};
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Default)]
pub struct AddressDirectory {
    routes: HashMap<Address, Route>,
}

impl AddressDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `address` was last seen behind `route`.
    ///
    /// Wildcard sources are ignored. Returns the route previously known.
    pub fn learn(&mut self, address: &Address, route: Route) -> Option<Route> {
        if address.is_wildcard() {
            return None;
        }
        let previous = self.routes.insert(address.clone(), route);
        if previous != Some(route) {
            tracing::trace!("directory: {} -> {}", address, route);
        }
        previous
    }

    /// Route for a single address.
    ///
    /// `Main` falls back to [`Route::Primary`] until a route is learned.
    /// `Wildcard` never resolves here; use [`resolve_broadcast`](Self::resolve_broadcast).
    pub fn resolve(&self, address: &Address) -> Option<Route> {
        match address {
            Address::Wildcard => None,
            Address::Main => Some(self.routes.get(address).copied().unwrap_or(Route::Primary)),
            Address::Named(_) => self.routes.get(address).copied(),
        }
    }

    /// Distinct routes behind every known address, in stable order.
    pub fn resolve_broadcast(&self) -> BTreeSet<Route> {
        self.routes.values().copied().collect()
    }

    /// Drop an address (the frame detached).
    pub fn forget(&mut self, address: &Address) -> Option<Route> {
        self.routes.remove(address)
    }

    pub fn addresses(&self) -> impl Iterator<Item = (&Address, &Route)> {
        self.routes.iter()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn learn_is_last_write_wins() {
        let mut dir = AddressDirectory::new();
        let a = Address::named("frameA");
        assert_eq!(dir.learn(&a, Route::Frame(1)), None);
        assert_eq!(dir.learn(&a, Route::Frame(2)), Some(Route::Frame(1)));
        assert_eq!(dir.resolve(&a), Some(Route::Frame(2)));
    }

    #[test]
    fn unknown_and_wildcard_do_not_resolve() {
        let mut dir = AddressDirectory::new();
        assert_eq!(dir.resolve(&Address::named("nobody")), None);
        assert_eq!(dir.learn(&Address::Wildcard, Route::Frame(3)), None);
        assert!(dir.is_empty());
        assert_eq!(dir.resolve(&Address::Wildcard), None);
    }

    #[test]
    fn main_falls_back_to_primary() {
        let mut dir = AddressDirectory::new();
        assert_eq!(dir.resolve(&Address::Main), Some(Route::Primary));
        dir.learn(&Address::Main, Route::Frame(10));
        assert_eq!(dir.resolve(&Address::Main), Some(Route::Frame(10)));
    }

    #[test]
    fn broadcast_deduplicates_shared_routes() {
        let mut dir = AddressDirectory::new();
        dir.learn(&Address::named("a"), Route::Frame(1));
        dir.learn(&Address::named("b"), Route::Frame(1));
        dir.learn(&Address::named("c"), Route::Frame(2));
        let routes: Vec<_> = dir.resolve_broadcast().into_iter().collect();
        assert_eq!(routes, vec![Route::Frame(1), Route::Frame(2)]);
    }

    #[test]
    fn forget_removes_route() {
        let mut dir = AddressDirectory::new();
        let a = Address::named("a");
        dir.learn(&a, Route::Frame(1));
        assert_eq!(dir.forget(&a), Some(Route::Frame(1)));
        assert_eq!(dir.resolve(&a), None);
    }
}
