//! Master-side cluster registry.
//!
//! Tracks which declared nodes have joined, their liveness, and the two
//! fixed-capacity slot tables each node carries (one per unit role). All
//! mutation happens inside the master's single serialization domain
//! ([`crate::master`]); the registry itself is plain data.

use crate::config::{ClusterConfig, NetAddress};
use crate::error::GridError;
use crate::topology::UnitRole;
use std::collections::HashMap;
use std::sync::Arc;

/// Liveness of a joined node.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NodeStatus {
  /// Heartbeat seen (or just joined).
  Alive,
  /// No information.
  Unknown,
}

/// A joined worker node.
#[derive(Clone, Debug)]
pub struct Node {
  /// Unique node name (key into the membership table).
  pub name: String,
  /// Network address from the membership table.
  pub addr: NetAddress,
  /// Current liveness.
  pub status: NodeStatus,
}

/// Fixed-length table of execution slots for one role on one node.
///
/// Each slot holds the name of the unit instance occupying it, or nothing.
/// The length never changes after construction.
#[derive(Clone, Debug)]
pub struct SlotTable {
  slots: Vec<Option<String>>,
}

impl SlotTable {
  /// Creates a table with `capacity` empty slots.
  pub fn new(capacity: usize) -> Self {
    Self {
      slots: vec![None; capacity],
    }
  }

  /// Table length (the cluster-wide constant C).
  pub fn capacity(&self) -> usize {
    self.slots.len()
  }

  /// Occupant of slot `index`, if any.
  pub fn occupant(&self, index: usize) -> Option<&str> {
    self.slots.get(index).and_then(|s| s.as_deref())
  }

  /// Index of the leftmost empty slot, if any.
  pub fn first_free(&self) -> Option<usize> {
    self.slots.iter().position(Option::is_none)
  }

  /// Writes `unit` into slot `index`. Only the scheduler calls this.
  pub(crate) fn assign(&mut self, index: usize, unit: &str) {
    self.slots[index] = Some(unit.to_string());
  }

  /// Iterates (index, occupant) pairs left to right.
  pub fn iter(&self) -> impl Iterator<Item = (usize, Option<&str>)> {
    self.slots.iter().enumerate().map(|(i, s)| (i, s.as_deref()))
  }
}

/// Cluster registry: joined nodes in join order, plus their slot tables.
pub struct Registry {
  config: Arc<ClusterConfig>,
  nodes: HashMap<String, Node>,
  spout_slots: HashMap<String, SlotTable>,
  bolt_slots: HashMap<String, SlotTable>,
  join_order: Vec<String>,
}

impl Registry {
  /// Creates an empty registry over the declared membership.
  pub fn new(config: Arc<ClusterConfig>) -> Self {
    Self {
      config,
      nodes: HashMap::new(),
      spout_slots: HashMap::new(),
      bolt_slots: HashMap::new(),
      join_order: Vec::new(),
    }
  }

  /// Registers a declared node as joined and allocates its two empty slot
  /// tables.
  ///
  /// Re-join is destructive: the node record is overwritten and both slot
  /// tables are recreated empty. Join happens once per node in normal
  /// operation, so lost assignments are accepted behavior.
  pub fn join(&mut self, name: &str) -> Result<(), GridError> {
    let addr = self
      .config
      .worker_addr(name)
      .ok_or_else(|| GridError::config(format!("node '{}' is not in the cluster membership", name)))?
      .clone();

    let capacity = self.config.slot_capacity;
    self.nodes.insert(
      name.to_string(),
      Node {
        name: name.to_string(),
        addr,
        status: NodeStatus::Alive,
      },
    );
    self.spout_slots.insert(name.to_string(), SlotTable::new(capacity));
    self.bolt_slots.insert(name.to_string(), SlotTable::new(capacity));
    if !self.join_order.iter().any(|n| n == name) {
      self.join_order.push(name.to_string());
    }
    Ok(())
  }

  /// Refreshes liveness for a joined node. A heartbeat from a node that
  /// never joined is a config error, not an implicit registration.
  pub fn alive(&mut self, name: &str) -> Result<(), GridError> {
    match self.nodes.get_mut(name) {
      Some(node) => {
        node.status = NodeStatus::Alive;
        Ok(())
      }
      None => Err(GridError::config(format!(
        "heartbeat from unregistered node '{}'",
        name
      ))),
    }
  }

  /// Number of nodes that have joined.
  pub fn joined_count(&self) -> usize {
    self.nodes.len()
  }

  /// True once every declared node has joined.
  pub fn is_complete(&self) -> bool {
    self.joined_count() == self.config.expected_workers()
  }

  /// Joined node record by name.
  pub fn node(&self, name: &str) -> Result<&Node, GridError> {
    self
      .nodes
      .get(name)
      .ok_or_else(|| GridError::config(format!("node '{}' has not joined", name)))
  }

  /// Node names in join order.
  pub fn join_order(&self) -> &[String] {
    &self.join_order
  }

  /// Slot table of `node` for `role`.
  pub fn slots(&self, role: UnitRole, node: &str) -> Result<&SlotTable, GridError> {
    self
      .table_map(role)
      .get(node)
      .ok_or_else(|| GridError::config(format!("node '{}' has not joined", node)))
  }

  /// Mutable slot table of `node` for `role`.
  pub(crate) fn slots_mut(&mut self, role: UnitRole, node: &str) -> Result<&mut SlotTable, GridError> {
    match role {
      UnitRole::Spout => &mut self.spout_slots,
      UnitRole::Bolt => &mut self.bolt_slots,
    }
    .get_mut(node)
    .ok_or_else(|| GridError::config(format!("node '{}' has not joined", node)))
  }

  /// Unit name occupying (node, role, slot), or a config error if the slot
  /// is empty or out of range.
  pub fn occupant(&self, role: UnitRole, node: &str, slot: usize) -> Result<&str, GridError> {
    self.slots(role, node)?.occupant(slot).ok_or_else(|| {
      GridError::config(format!(
        "no {} occupies slot {} of node '{}'",
        role.as_str(),
        slot,
        node
      ))
    })
  }

  /// Deployed instances of `unit` for `role`, as (node, slot) pairs in
  /// deployment order: nodes in join order, slots left to right.
  pub fn deployed_instances(&self, role: UnitRole, unit: &str) -> Vec<(String, usize)> {
    let mut out = Vec::new();
    for node in &self.join_order {
      if let Some(table) = self.table_map(role).get(node) {
        for (i, occupant) in table.iter() {
          if occupant == Some(unit) {
            out.push((node.clone(), i));
          }
        }
      }
    }
    out
  }

  fn table_map(&self, role: UnitRole) -> &HashMap<String, SlotTable> {
    match role {
      UnitRole::Spout => &self.spout_slots,
      UnitRole::Bolt => &self.bolt_slots,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::BTreeMap;

  fn config(workers: &[&str], capacity: usize) -> Arc<ClusterConfig> {
    let mut map = BTreeMap::new();
    for (i, w) in workers.iter().enumerate() {
      map.insert(w.to_string(), NetAddress::new("127.0.0.1", 7001 + i as u16));
    }
    Arc::new(ClusterConfig {
      master_name: "nimbus".into(),
      master_addr: NetAddress::new("127.0.0.1", 6000),
      workers: map,
      slot_capacity: capacity,
      resolve_timeout_ms: 1000,
      mailbox_capacity: 16,
    })
  }

  #[test]
  fn join_allocates_empty_tables_of_exact_capacity() {
    let mut r = Registry::new(config(&["s1"], 3));
    r.join("s1").unwrap();
    for role in [UnitRole::Spout, UnitRole::Bolt] {
      let table = r.slots(role, "s1").unwrap();
      assert_eq!(table.capacity(), 3);
      assert!(table.iter().all(|(_, occupant)| occupant.is_none()));
    }
    assert_eq!(r.node("s1").unwrap().status, NodeStatus::Alive);
  }

  #[test]
  fn join_rejects_undeclared_node() {
    let mut r = Registry::new(config(&["s1"], 3));
    assert!(matches!(r.join("intruder"), Err(GridError::Config(_))));
  }

  #[test]
  fn rejoin_is_destructive() {
    let mut r = Registry::new(config(&["s1"], 2));
    r.join("s1").unwrap();
    r.slots_mut(UnitRole::Bolt, "s1").unwrap().assign(0, "b");
    r.join("s1").unwrap();
    assert!(r.slots(UnitRole::Bolt, "s1").unwrap().occupant(0).is_none());
    // join order keeps a single entry for the node
    assert_eq!(r.join_order(), ["s1".to_string()]);
  }

  #[test]
  fn alive_before_join_is_config_error() {
    let mut r = Registry::new(config(&["s1"], 3));
    assert!(matches!(r.alive("s1"), Err(GridError::Config(_))));
    r.join("s1").unwrap();
    assert!(r.alive("s1").is_ok());
  }

  #[test]
  fn deployed_instances_follow_join_order_then_slot_order() {
    let mut r = Registry::new(config(&["s1", "s2"], 2));
    // join in reverse lexical order to prove join order wins
    r.join("s2").unwrap();
    r.join("s1").unwrap();
    r.slots_mut(UnitRole::Bolt, "s1").unwrap().assign(1, "b");
    r.slots_mut(UnitRole::Bolt, "s2").unwrap().assign(0, "b");
    assert_eq!(
      r.deployed_instances(UnitRole::Bolt, "b"),
      vec![("s2".to_string(), 0), ("s1".to_string(), 1)]
    );
  }

  #[test]
  fn occupant_of_empty_slot_is_config_error() {
    let mut r = Registry::new(config(&["s1"], 1));
    r.join("s1").unwrap();
    assert!(matches!(
      r.occupant(UnitRole::Spout, "s1", 0),
      Err(GridError::Config(_))
    ));
  }
}
