//! Structural checks on a candidate tree before it reaches hardware.
//!
//! Only contributions that are new or changed in the delta are checked, so a
//! transaction is never rejected for something an earlier one committed.

use crate::error::{AgentError, Result};
use swagent_state::route::{LabelAction, MultiClientEntry, NextHop, NextHopEntry};
use swagent_state::{StateDelta, StateTree, VrfId};
use swagent_types::{ClientId, MplsLabel};

pub(crate) fn validate(delta: &StateDelta) -> Result<()> {
    let tree = delta.new_state();
    for (vrf, routes) in delta.fibs() {
        for entry in routes.iter() {
            let Some(new) = entry.new_value() else {
                continue;
            };
            for (client, nhe) in changed_contributions(entry.old_value(), new) {
                check_contribution(tree, vrf, client, nhe)
                    .map_err(|msg| AgentError::Validation(format!("route {} in {}: {}", new.prefix(), vrf, msg)))?;
            }
        }
    }

    for entry in delta.label_fib().iter() {
        let Some(new) = entry.new_value() else {
            continue;
        };
        if !new.label().is_valid() {
            return Err(AgentError::Validation(format!(
                "label {} exceeds the maximum {}",
                new.label(),
                MplsLabel::MAX
            )));
        }
        for (client, nhe) in changed_contributions(entry.old_value(), new) {
            check_contribution(tree, VrfId::DEFAULT, client, nhe)
                .map_err(|msg| AgentError::Validation(format!("label {}: {}", new.label(), msg)))?;
        }
    }
    Ok(())
}

fn changed_contributions<'a, K>(
    old: Option<&'a MultiClientEntry<K>>,
    new: &'a MultiClientEntry<K>,
) -> impl Iterator<Item = (ClientId, &'a NextHopEntry)> {
    new.clients()
        .iter()
        .filter(move |(client, nhe)| old.and_then(|old| old.client(client)) != Some(*nhe))
        .map(|(client, nhe)| (*client, nhe))
}

fn check_contribution(
    tree: &StateTree,
    vrf: VrfId,
    client: ClientId,
    nhe: &NextHopEntry,
) -> std::result::Result<(), String> {
    for nh in &nhe.next_hops {
        check_next_hop(tree, vrf, client, nh)?;
    }
    Ok(())
}

fn check_next_hop(tree: &StateTree, vrf: VrfId, client: ClientId, nh: &NextHop) -> std::result::Result<(), String> {
    if let Some(intf) = nh.interface {
        if !tree.interfaces().contains_key(&intf) {
            return Err(format!("next hop {} uses unknown interface {}", nh.address, intf));
        }
    }
    // connected routes point at the interface's own address
    let pop = matches!(nh.label_action, Some(LabelAction::PopAndLookup));
    if client != ClientId::INTERFACE_ROUTE && !pop {
        if let Some(intf) = tree.interface_with_address(vrf, &nh.address) {
            return Err(format!(
                "next hop {} is a local address of {}",
                nh.address, intf.name
            ));
        }
    }
    let labels: &[MplsLabel] = match &nh.label_action {
        Some(LabelAction::Swap(label)) => std::slice::from_ref(label),
        Some(LabelAction::Push(stack)) => stack,
        _ => &[],
    };
    if let Some(label) = labels.iter().find(|label| !label.is_valid()) {
        return Err(format!(
            "next hop {} label {} exceeds the maximum {}",
            nh.address,
            label,
            MplsLabel::MAX
        ));
    }
    Ok(())
}
