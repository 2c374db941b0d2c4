//! Destination resolution for dynamic routing strategies.
//!
//! Answers "where does this emission go" for the two strategies that reach
//! the master: Random recomputes a uniform pick on every call; Group
//! memoizes the first pick per (source unit name, grouping field name) and
//! returns it unconditionally forever after. Global never arrives here.
//!
//! The cache key is the grouping field's *name*, not its runtime value: all
//! tuples of one unit grouped on one field land on a single destination for
//! the life of the master. That is the routing contract callers rely on.

use crate::config::NetAddress;
use crate::error::GridError;
use crate::registry::Registry;
use crate::topology::{Topology, UnitRole};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use tracing::debug;

/// A concrete resolved destination: the owning node, its address, and the
/// bolt slot index on that node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Destination {
  /// Destination node name.
  pub node: String,
  /// Destination node address.
  pub addr: NetAddress,
  /// Slot index of the consuming instance.
  pub slot: usize,
}

/// Resolver for Random and Group destination queries.
pub struct Resolver {
  /// Memoized group destinations, keyed by (source unit, field name).
  /// Entries are never evicted or overwritten.
  cache: HashMap<(String, String), (String, usize)>,
  rng: StdRng,
}

impl Resolver {
  /// Creates a resolver with an entropy-seeded generator.
  pub fn new() -> Self {
    Self {
      cache: HashMap::new(),
      rng: StdRng::from_entropy(),
    }
  }

  /// Creates a resolver with a fixed seed, for deterministic tests.
  pub fn with_seed(seed: u64) -> Self {
    Self {
      cache: HashMap::new(),
      rng: StdRng::seed_from_u64(seed),
    }
  }

  /// Resolves a Random-strategy emission from (node, role, slot).
  ///
  /// Picks a downstream consumer of the occupying unit uniformly, then one
  /// of that consumer's deployed instances uniformly. Nothing is cached;
  /// every call recomputes.
  pub fn random_destination(
    &mut self,
    registry: &Registry,
    topology: &Topology,
    src_node: &str,
    src_role: UnitRole,
    src_slot: usize,
  ) -> Result<Destination, GridError> {
    let unit = registry.occupant(src_role, src_node, src_slot)?.to_string();
    let (node, slot) = self.pick_consumer_instance(registry, topology, &unit)?;
    self.destination(registry, node, slot)
  }

  /// Resolves a Group-strategy emission from (node, role, slot) grouping on
  /// the declared field at `field_index`.
  ///
  /// The first resolution for a (unit, field name) pair is authoritative
  /// for the life of the process; later calls return the cached pick even
  /// if intervening resolutions deployed nothing new.
  pub fn group_destination(
    &mut self,
    registry: &Registry,
    topology: &Topology,
    src_node: &str,
    src_role: UnitRole,
    src_slot: usize,
    field_index: usize,
  ) -> Result<Destination, GridError> {
    let unit = registry.occupant(src_role, src_node, src_slot)?.to_string();
    let field = topology.unit(&unit)?.field_name(field_index)?.to_string();

    let key = (unit.clone(), field.clone());
    if let Some((node, slot)) = self.cache.get(&key) {
      return self.destination(registry, node.clone(), *slot);
    }

    let (node, slot) = self.pick_consumer_instance(registry, topology, &unit)?;
    debug!(unit, field, %node, slot, "memoized group destination");
    self.cache.insert(key, (node.clone(), slot));
    self.destination(registry, node, slot)
  }

  /// Number of memoized group entries.
  pub fn cached_groups(&self) -> usize {
    self.cache.len()
  }

  /// The shared consumer-selection procedure: uniform over the source
  /// unit's downstream consumers, then uniform over that consumer's
  /// deployed instances in deployment order.
  fn pick_consumer_instance(
    &mut self,
    registry: &Registry,
    topology: &Topology,
    unit: &str,
  ) -> Result<(String, usize), GridError> {
    let consumers = topology.downstream(unit);
    if consumers.is_empty() {
      return Err(GridError::routing(format!(
        "unit '{}' has no downstream consumers",
        unit
      )));
    }
    let consumer = &consumers[self.rng.gen_range(0..consumers.len())];

    let role = topology.unit(consumer)?.role;
    let instances = registry.deployed_instances(role, consumer);
    if instances.is_empty() {
      return Err(GridError::routing(format!(
        "consumer '{}' has no deployed instances",
        consumer
      )));
    }
    let (node, slot) = instances[self.rng.gen_range(0..instances.len())].clone();
    Ok((node, slot))
  }

  fn destination(
    &self,
    registry: &Registry,
    node: String,
    slot: usize,
  ) -> Result<Destination, GridError> {
    let addr = registry.node(&node)?.addr.clone();
    Ok(Destination { node, addr, slot })
  }
}

impl Default for Resolver {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::collector::OutputCollector;
  use crate::config::ClusterConfig;
  use crate::scheduler::Scheduler;
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

  fn cluster(workers: &[&str], capacity: usize) -> Registry {
    let mut map = BTreeMap::new();
    for (i, w) in workers.iter().enumerate() {
      map.insert(w.to_string(), NetAddress::new("127.0.0.1", 7001 + i as u16));
    }
    let cfg = Arc::new(ClusterConfig {
      master_name: "nimbus".into(),
      master_addr: NetAddress::new("127.0.0.1", 6000),
      workers: map,
      slot_capacity: capacity,
      resolve_timeout_ms: 1000,
      mailbox_capacity: 16,
    });
    let mut r = Registry::new(cfg);
    for w in workers {
      r.join(w).unwrap();
    }
    r
  }

  fn scheduled(bolt_instances: usize) -> (Registry, Topology) {
    let topology = Topology::builder()
      .spout(
        "a",
        vec!["user".into(), "amount".into()],
        Strategy::Group,
        1,
        spout_factory(|| NullSpout),
      )
      .group_by(0)
      .bolt(
        "b",
        vec!["total".into()],
        Strategy::Global,
        bolt_instances,
        bolt_factory(|| NullBolt),
      )
      .wire("a", "b")
      .build()
      .unwrap();
    let mut registry = cluster(&["s1", "s2"], 3);
    Scheduler::new()
      .try_schedule(&mut registry, &topology)
      .unwrap();
    (registry, topology)
  }

  #[test]
  fn random_destination_is_a_deployed_downstream_instance() {
    let (registry, topology) = scheduled(4);
    let mut resolver = Resolver::with_seed(7);
    let deployed = registry.deployed_instances(UnitRole::Bolt, "b");
    for _ in 0..50 {
      let dest = resolver
        .random_destination(&registry, &topology, "s1", UnitRole::Spout, 0)
        .unwrap();
      assert!(deployed.contains(&(dest.node.clone(), dest.slot)));
      assert_eq!(dest.addr, registry.node(&dest.node).unwrap().addr);
    }
  }

  #[test]
  fn random_from_empty_slot_is_config_error() {
    let (registry, topology) = scheduled(1);
    let mut resolver = Resolver::with_seed(1);
    let err = resolver
      .random_destination(&registry, &topology, "s1", UnitRole::Spout, 2)
      .unwrap_err();
    assert!(matches!(err, GridError::Config(_)));
  }

  #[test]
  fn unit_without_consumers_is_routing_error() {
    let (registry, topology) = scheduled(1);
    let mut resolver = Resolver::with_seed(1);
    // "b" is a sink: resolving from its slot has nowhere to go.
    let err = resolver
      .random_destination(&registry, &topology, "s1", UnitRole::Bolt, 0)
      .unwrap_err();
    assert!(matches!(err, GridError::Routing(_)));
  }

  #[test]
  fn group_destination_is_idempotent_across_interleaved_queries() {
    let (registry, topology) = scheduled(5);
    let mut resolver = Resolver::with_seed(99);
    let first = resolver
      .group_destination(&registry, &topology, "s1", UnitRole::Spout, 0, 0)
      .unwrap();
    for _ in 0..20 {
      // unrelated random resolutions advance the rng in between
      resolver
        .random_destination(&registry, &topology, "s1", UnitRole::Spout, 0)
        .unwrap();
      let again = resolver
        .group_destination(&registry, &topology, "s1", UnitRole::Spout, 0, 0)
        .unwrap();
      assert_eq!(first, again);
    }
    assert_eq!(resolver.cached_groups(), 1);
  }

  #[test]
  fn group_key_is_field_name_so_distinct_fields_may_differ() {
    let (registry, topology) = scheduled(5);
    let mut resolver = Resolver::with_seed(3);
    resolver
      .group_destination(&registry, &topology, "s1", UnitRole::Spout, 0, 0)
      .unwrap();
    resolver
      .group_destination(&registry, &topology, "s1", UnitRole::Spout, 0, 1)
      .unwrap();
    assert_eq!(resolver.cached_groups(), 2);
  }

  #[test]
  fn group_field_index_past_declaration_is_config_error() {
    let (registry, topology) = scheduled(1);
    let mut resolver = Resolver::with_seed(3);
    let err = resolver
      .group_destination(&registry, &topology, "s1", UnitRole::Spout, 0, 9)
      .unwrap_err();
    assert!(matches!(err, GridError::Config(_)));
  }
}
