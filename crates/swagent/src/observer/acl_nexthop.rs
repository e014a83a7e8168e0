//! Keeps ACL redirect next hops in step with the default VRF FIB.

use super::StateObserver;
use crate::coordinator::{UpdateMode, UpdateQueue};
use crate::error::Result;
use crate::route::longest_match;
use log::{debug, warn};
use std::collections::BTreeSet;
use swagent_state::acl::AclEntry;
use swagent_state::route::{ForwardAction, NextHop};
use swagent_state::{StateDelta, StateTree, VrfId};

#[derive(Debug, Default)]
pub struct AclNexthopObserver;

impl AclNexthopObserver {
    pub fn new() -> Self {
        Self
    }

    /// Next hops the redirect addresses of `acl` forward to right now: the
    /// union of the longest-match routes' next hops in the default VRF.
    pub fn resolve(tree: &StateTree, acl: &AclEntry) -> BTreeSet<NextHop> {
        acl.redirect_next_hops
            .iter()
            .filter_map(|addr| longest_match(tree, VrfId::DEFAULT, addr))
            .filter_map(|route| route.forward_info())
            .filter(|fwd| fwd.action == ForwardAction::NextHops)
            .flat_map(|fwd| fwd.next_hops.iter().cloned())
            .collect()
    }

    /// ACLs whose resolved redirect set is out of date, with the new set.
    pub fn stale(tree: &StateTree) -> Vec<(String, BTreeSet<NextHop>)> {
        tree.acls()
            .iter()
            .filter(|(_, acl)| acl.has_redirect() || !acl.resolved_redirect.is_empty())
            .filter_map(|(name, acl)| {
                let resolved = if acl.has_redirect() {
                    Self::resolve(tree, acl)
                } else {
                    BTreeSet::new()
                };
                (resolved != acl.resolved_redirect).then(|| (name.clone(), resolved))
            })
            .collect()
    }

    /// `tree` with every stale ACL refreshed.
    pub fn refresh(tree: &StateTree) -> Result<StateTree> {
        let stale = Self::stale(tree);
        let mut tree = tree.clone();
        if stale.is_empty() {
            return Ok(tree);
        }
        let acls = tree.acls_mut();
        for (name, resolved) in stale {
            if let Some(acl) = acls.get_mut(&name) {
                debug!("acl {} redirects to {} next hops", name, resolved.len());
                acl.resolved_redirect = resolved;
            }
        }
        Ok(tree)
    }
}

impl StateObserver for AclNexthopObserver {
    fn name(&self) -> &str {
        "AclNexthopObserver"
    }

    fn state_updated(&self, delta: &StateDelta, queue: &UpdateQueue) {
        let fib_changed = delta.fib_changes().iter().any(|c| c.vrf.is_default());
        if !fib_changed && delta.acls().is_empty() {
            return;
        }
        if Self::stale(delta.new_state()).is_empty() {
            return;
        }
        if let Err(e) = queue.enqueue(
            "acl_nexthop_refresh",
            Self::refresh,
            UpdateMode::WithHardwareFailureProtection,
        ) {
            warn!("could not queue ACL redirect refresh: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use swagent_state::acl::AclAction;
    use swagent_state::route::{ForwardInfo, NextHopEntry, RouteEntry, RouteState};
    use swagent_state::InterfaceId;
    use swagent_types::{AdminDistance, ClientId};

    fn via(addr: &str) -> NextHop {
        NextHop::new(addr.parse().unwrap()).with_interface(InterfaceId::new(1))
    }

    fn route(prefix: &str, nh: NextHop) -> RouteEntry {
        let mut entry = RouteEntry::new(prefix.parse().unwrap())
            .with_client(ClientId::BGPD, NextHopEntry::new([nh.clone()], AdminDistance::EBGP));
        entry.set_state(RouteState::Resolved(ForwardInfo {
            client: ClientId::BGPD,
            admin_distance: AdminDistance::EBGP,
            action: ForwardAction::NextHops,
            next_hops: [nh].into_iter().collect(),
            counter_id: None,
        }));
        entry
    }

    fn tree() -> StateTree {
        let mut tree = StateTree::new();
        let table = tree.route_table_mut(VrfId::DEFAULT);
        table.insert("10.1.0.0/16".parse().unwrap(), route("10.1.0.0/16", via("10.0.0.2")));
        table.insert("10.1.2.0/24".parse().unwrap(), route("10.1.2.0/24", via("10.0.0.3")));

        let mut acl = AclEntry::new("redirect-web", 10);
        acl.action = AclAction::Redirect;
        acl.redirect_next_hops = vec!["10.1.2.9".parse().unwrap(), "10.1.9.9".parse().unwrap()];
        tree.acls_mut().insert(acl.name.clone(), acl);
        tree.acls_mut()
            .insert("permit-all".to_string(), AclEntry::new("permit-all", 100));
        tree
    }

    #[test]
    fn test_resolve_uses_longest_match() {
        let tree = tree();
        let acl = tree.acls().get(&"redirect-web".to_string()).unwrap();
        let addrs: Vec<String> = AclNexthopObserver::resolve(&tree, acl)
            .iter()
            .map(|nh| nh.address.to_string())
            .collect();
        assert_eq!(addrs, vec!["10.0.0.2".to_string(), "10.0.0.3".to_string()]);
    }

    #[test]
    fn test_refresh_touches_only_stale_acls() {
        let tree = tree();
        tree.publish();
        let stale = AclNexthopObserver::stale(&tree);
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].0, "redirect-web");

        let refreshed = AclNexthopObserver::refresh(&tree).unwrap();
        assert!(AclNexthopObserver::stale(&refreshed).is_empty());

        refreshed.publish();
        let again = AclNexthopObserver::refresh(&refreshed).unwrap();
        assert!(again.ptr_eq(&refreshed));
    }
}
