//! One-shot greedy slot assignment.
//!
//! Once the expected worker count has joined, the scheduler fills empty
//! slots with declared units: bolts first, then spouts, each unit greedily
//! first-fit over nodes in join order and slots left to right. The pass runs
//! exactly once per master lifetime; nothing rebalances afterwards.
//!
//! A unit that cannot be fully placed is deployed with fewer instances; the
//! shortfall is logged as a warning, never an error. Capacity planning is
//! the operator's job.

use crate::error::GridError;
use crate::registry::Registry;
use crate::topology::{Topology, UnitRole};
use tracing::{info, warn};

/// One slot assignment produced by the scheduling pass. Each assignment
/// becomes a StartUnit command to the owning node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Assignment {
  /// Unit instance placed.
  pub unit: String,
  /// Role of the unit (decides which slot table it occupies).
  pub role: UnitRole,
  /// Node that received the instance.
  pub node: String,
  /// Slot index on that node.
  pub slot: usize,
}

/// The one-shot scheduler. Guarded against re-trigger: after the first pass
/// every further call is a no-op.
pub struct Scheduler {
  fired: bool,
}

impl Scheduler {
  /// Creates a scheduler that has not fired yet.
  pub fn new() -> Self {
    Self { fired: false }
  }

  /// True once the assignment pass has run.
  pub fn has_fired(&self) -> bool {
    self.fired
  }

  /// Runs the assignment pass if the cluster is complete and the pass has
  /// not run before. Returns `None` when nothing was scheduled.
  pub fn try_schedule(
    &mut self,
    registry: &mut Registry,
    topology: &Topology,
  ) -> Option<Vec<Assignment>> {
    if self.fired || !registry.is_complete() {
      return None;
    }
    self.fired = true;
    info!(nodes = registry.joined_count(), "cluster complete, scheduling topology");
    Some(assign_all(registry, topology))
  }
}

impl Default for Scheduler {
  fn default() -> Self {
    Self::new()
  }
}

/// Greedy first-fit pass over every declared unit, bolts before spouts.
fn assign_all(registry: &mut Registry, topology: &Topology) -> Vec<Assignment> {
  let mut assignments = Vec::new();
  for role in [UnitRole::Bolt, UnitRole::Spout] {
    for unit in topology.units().iter().filter(|u| u.role == role) {
      assign_unit(registry, &unit.name, role, unit.instances, &mut assignments);
    }
  }
  assignments
}

/// Places up to `needed` instances of one unit, walking nodes in join order
/// and each node's table left to right.
fn assign_unit(
  registry: &mut Registry,
  unit: &str,
  role: UnitRole,
  needed: usize,
  assignments: &mut Vec<Assignment>,
) {
  let nodes: Vec<String> = registry.join_order().to_vec();
  let mut remaining = needed;

  for node in &nodes {
    if remaining == 0 {
      break;
    }
    let table = match registry.slots_mut(role, node) {
      Ok(table) => table,
      Err(e) => {
        warn!(%node, error = %e, "skipping node during assignment");
        continue;
      }
    };
    while remaining > 0 {
      let Some(free) = table.first_free() else {
        break;
      };
      table.assign(free, unit);
      remaining -= 1;
      info!(unit, role = role.as_str(), %node, slot = free, "assigned unit to slot");
      assignments.push(Assignment {
        unit: unit.to_string(),
        role,
        node: node.clone(),
        slot: free,
      });
    }
  }

  if remaining > 0 {
    let shortfall = GridError::Capacity {
      unit: unit.to_string(),
      deployed: needed - remaining,
      requested: needed,
    };
    warn!(%shortfall, "slot tables exhausted");
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::collector::OutputCollector;
  use crate::config::{ClusterConfig, NetAddress};
  use crate::task::{bolt_factory, spout_factory, Bolt, Spout};
  use crate::topology::Strategy;
  use crate::value::Tuple;
  use async_trait::async_trait;
  use std::collections::BTreeMap;
  use std::sync::Arc;

  struct NullSpout;

  #[async_trait]
  impl Spout for NullSpout {
    async fn open(&mut self, _c: &mut OutputCollector) -> Result<(), GridError> {
      Ok(())
    }
    async fn close(&mut self) {}
    async fn next_tuple(&mut self, _c: &mut OutputCollector) -> Result<(), GridError> {
      Ok(())
    }
  }

  struct NullBolt;

  #[async_trait]
  impl Bolt for NullBolt {
    async fn prepare(&mut self, _c: &mut OutputCollector) -> Result<(), GridError> {
      Ok(())
    }
    async fn cleanup(&mut self) {}
    async fn execute(&mut self, _t: Tuple, _c: &mut OutputCollector) -> Result<(), GridError> {
      Ok(())
    }
  }

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

  fn word_count(spout_instances: usize, bolt_instances: usize) -> Topology {
    Topology::builder()
      .spout(
        "a",
        vec!["word".into()],
        Strategy::Random,
        spout_instances,
        spout_factory(|| NullSpout),
      )
      .bolt(
        "b",
        vec!["count".into()],
        Strategy::Global,
        bolt_instances,
        bolt_factory(|| NullBolt),
      )
      .wire("a", "b")
      .build()
      .unwrap()
  }

  #[test]
  fn single_node_scenario_places_both_units_at_slot_zero() {
    let mut registry = Registry::new(config(&["s1"], 3));
    registry.join("s1").unwrap();
    let topology = word_count(1, 1);

    let mut scheduler = Scheduler::new();
    let assignments = scheduler.try_schedule(&mut registry, &topology).unwrap();

    // bolts are dispatched before spouts
    assert_eq!(
      assignments,
      vec![
        Assignment {
          unit: "b".into(),
          role: UnitRole::Bolt,
          node: "s1".into(),
          slot: 0
        },
        Assignment {
          unit: "a".into(),
          role: UnitRole::Spout,
          node: "s1".into(),
          slot: 0
        },
      ]
    );
    assert_eq!(registry.occupant(UnitRole::Spout, "s1", 0).unwrap(), "a");
    assert_eq!(registry.occupant(UnitRole::Bolt, "s1", 0).unwrap(), "b");
  }

  #[test]
  fn pass_does_not_fire_until_cluster_complete() {
    let mut registry = Registry::new(config(&["s1", "s2"], 3));
    registry.join("s1").unwrap();
    let topology = word_count(1, 1);
    let mut scheduler = Scheduler::new();
    assert!(scheduler.try_schedule(&mut registry, &topology).is_none());
    registry.join("s2").unwrap();
    assert!(scheduler.try_schedule(&mut registry, &topology).is_some());
  }

  #[test]
  fn pass_fires_exactly_once() {
    let mut registry = Registry::new(config(&["s1"], 3));
    registry.join("s1").unwrap();
    let topology = word_count(1, 1);
    let mut scheduler = Scheduler::new();
    assert!(scheduler.try_schedule(&mut registry, &topology).is_some());
    assert!(scheduler.try_schedule(&mut registry, &topology).is_none());
    assert!(scheduler.has_fired());
  }

  #[test]
  fn identical_runs_produce_identical_assignments() {
    let run = || {
      let mut registry = Registry::new(config(&["s1", "s2"], 2));
      registry.join("s2").unwrap();
      registry.join("s1").unwrap();
      let topology = word_count(2, 3);
      Scheduler::new()
        .try_schedule(&mut registry, &topology)
        .unwrap()
    };
    assert_eq!(run(), run());
  }

  #[test]
  fn shortfall_deploys_fewer_instances_without_error() {
    let mut registry = Registry::new(config(&["s1"], 2));
    registry.join("s1").unwrap();
    let topology = word_count(1, 5); // 5 bolt instances, capacity 2
    let assignments = Scheduler::new()
      .try_schedule(&mut registry, &topology)
      .unwrap();
    let bolt_count = assignments.iter().filter(|a| a.unit == "b").count();
    assert_eq!(bolt_count, 2);
    assert_eq!(registry.deployed_instances(UnitRole::Bolt, "b").len(), 2);
  }

  #[test]
  fn overflow_spills_to_next_node_in_join_order() {
    let mut registry = Registry::new(config(&["s1", "s2"], 1));
    registry.join("s1").unwrap();
    registry.join("s2").unwrap();
    let topology = word_count(1, 2);
    let assignments = Scheduler::new()
      .try_schedule(&mut registry, &topology)
      .unwrap();
    let bolts: Vec<_> = assignments.iter().filter(|a| a.unit == "b").collect();
    assert_eq!(bolts[0].node, "s1");
    assert_eq!(bolts[1].node, "s2");
  }
}
