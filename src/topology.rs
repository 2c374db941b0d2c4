//! Topology declarations: units, strategies, wiring.
//!
//! A topology is the static description the master schedules from: each unit
//! declares its role, instance count, ordered field names and routing
//! strategy, and the wiring gives every unit its ordered set of downstream
//! consumers. Nothing here changes after the builder finishes.

use crate::error::GridError;
use crate::task::{BoltFactory, SpoutFactory};
use std::collections::HashMap;
use std::fmt;

/// The two roles a unit can take.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum UnitRole {
  /// A data source (origin of streams).
  Spout,
  /// A data processor.
  Bolt,
}

impl UnitRole {
  /// Wire encoding of the role, as carried in command arguments.
  pub fn as_str(&self) -> &'static str {
    match self {
      UnitRole::Spout => "spout",
      UnitRole::Bolt => "bolt",
    }
  }

  /// Parses the wire encoding back into a role.
  pub fn parse(s: &str) -> Result<Self, GridError> {
    match s {
      "spout" => Ok(UnitRole::Spout),
      "bolt" => Ok(UnitRole::Bolt),
      other => Err(GridError::protocol(format!("unknown unit role '{}'", other))),
    }
  }
}

/// Routing strategy of a unit's emissions.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Strategy {
  /// Fixed destination, resolved once at preparation time. No master
  /// traffic, ever.
  Global,
  /// Uniform-random downstream instance, resolved per emission through the
  /// master.
  Random,
  /// Field-grouped: the master memoizes the destination per (unit, field
  /// name) pair, so every emission for that pair lands identically.
  Group,
}

/// Static declaration of one unit.
#[derive(Clone, Debug)]
pub struct UnitDecl {
  /// Unique unit name.
  pub name: String,
  /// Role (spout or bolt).
  pub role: UnitRole,
  /// Ordered output field names, fixed at definition time.
  pub fields: Vec<String>,
  /// Routing strategy for emissions.
  pub strategy: Strategy,
  /// Index of the grouping field among `fields`; only set for
  /// [`Strategy::Group`].
  pub group_field: Option<usize>,
  /// Requested instance count.
  pub instances: usize,
}

impl UnitDecl {
  /// Name of the declared field at `index`, or a config error past the end.
  pub fn field_name(&self, index: usize) -> Result<&str, GridError> {
    self.fields.get(index).map(String::as_str).ok_or_else(|| {
      GridError::config(format!(
        "unit '{}' declares {} fields, no index {}",
        self.name,
        self.fields.len(),
        index
      ))
    })
  }
}

/// A complete topology: unit declarations in declaration order, factories,
/// and the adjacency from unit name to its ordered downstream consumers.
pub struct Topology {
  units: Vec<UnitDecl>,
  index: HashMap<String, usize>,
  adjacency: HashMap<String, Vec<String>>,
  spout_factories: HashMap<String, SpoutFactory>,
  bolt_factories: HashMap<String, BoltFactory>,
}

impl Topology {
  /// Starts building a topology.
  pub fn builder() -> TopologyBuilder {
    TopologyBuilder::default()
  }

  /// Declared units in declaration order.
  pub fn units(&self) -> &[UnitDecl] {
    &self.units
  }

  /// Declaration for `name`, or a config error if unknown.
  pub fn unit(&self, name: &str) -> Result<&UnitDecl, GridError> {
    self
      .index
      .get(name)
      .map(|&i| &self.units[i])
      .ok_or_else(|| GridError::config(format!("unknown unit '{}'", name)))
  }

  /// Ordered downstream consumer names of `name`. Empty if the unit is a
  /// sink.
  pub fn downstream(&self, name: &str) -> &[String] {
    self
      .adjacency
      .get(name)
      .map(Vec::as_slice)
      .unwrap_or(&[])
  }

  /// Spout factory for `name`, or a config error if the unit is not a
  /// declared spout.
  pub fn spout_factory(&self, name: &str) -> Result<&SpoutFactory, GridError> {
    self
      .spout_factories
      .get(name)
      .ok_or_else(|| GridError::config(format!("no spout factory for '{}'", name)))
  }

  /// Bolt factory for `name`, or a config error if the unit is not a
  /// declared bolt.
  pub fn bolt_factory(&self, name: &str) -> Result<&BoltFactory, GridError> {
    self
      .bolt_factories
      .get(name)
      .ok_or_else(|| GridError::config(format!("no bolt factory for '{}'", name)))
  }
}

// The factory closures are opaque, so Debug covers the declarative parts
// only.
impl fmt::Debug for Topology {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Topology")
      .field("units", &self.units)
      .field("adjacency", &self.adjacency)
      .finish_non_exhaustive()
  }
}

/// Fluent builder for [`Topology`].
#[derive(Default)]
pub struct TopologyBuilder {
  units: Vec<UnitDecl>,
  adjacency: HashMap<String, Vec<String>>,
  spout_factories: HashMap<String, SpoutFactory>,
  bolt_factories: HashMap<String, BoltFactory>,
}

impl TopologyBuilder {
  /// Declares a spout.
  pub fn spout(
    mut self,
    name: impl Into<String>,
    fields: Vec<String>,
    strategy: Strategy,
    instances: usize,
    factory: SpoutFactory,
  ) -> Self {
    let name = name.into();
    self.spout_factories.insert(name.clone(), factory);
    self.units.push(UnitDecl {
      name,
      role: UnitRole::Spout,
      fields,
      strategy,
      group_field: None,
      instances,
    });
    self
  }

  /// Declares a bolt.
  pub fn bolt(
    mut self,
    name: impl Into<String>,
    fields: Vec<String>,
    strategy: Strategy,
    instances: usize,
    factory: BoltFactory,
  ) -> Self {
    let name = name.into();
    self.bolt_factories.insert(name.clone(), factory);
    self.units.push(UnitDecl {
      name,
      role: UnitRole::Bolt,
      fields,
      strategy,
      group_field: None,
      instances,
    });
    self
  }

  /// Sets the grouping field index on the most recently declared unit.
  /// Required when its strategy is [`Strategy::Group`].
  pub fn group_by(mut self, field_index: usize) -> Self {
    if let Some(last) = self.units.last_mut() {
      last.group_field = Some(field_index);
    }
    self
  }

  /// Wires `from`'s output to `to`'s input. Call order defines the
  /// downstream consumer order.
  pub fn wire(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
    self
      .adjacency
      .entry(from.into())
      .or_default()
      .push(to.into());
    self
  }

  /// Finishes the build, validating name uniqueness, wiring targets and
  /// grouping field indices.
  pub fn build(self) -> Result<Topology, GridError> {
    let mut index = HashMap::new();
    for (i, unit) in self.units.iter().enumerate() {
      if index.insert(unit.name.clone(), i).is_some() {
        return Err(GridError::config(format!("duplicate unit '{}'", unit.name)));
      }
      if unit.strategy == Strategy::Group {
        match unit.group_field {
          Some(gf) if gf < unit.fields.len() => {}
          Some(gf) => {
            return Err(GridError::config(format!(
              "unit '{}' groups by field {} but declares only {} fields",
              unit.name,
              gf,
              unit.fields.len()
            )))
          }
          None => {
            return Err(GridError::config(format!(
              "unit '{}' uses the group strategy without a grouping field",
              unit.name
            )))
          }
        }
      }
    }
    for (from, tos) in &self.adjacency {
      if !index.contains_key(from) {
        return Err(GridError::config(format!("wiring from unknown unit '{}'", from)));
      }
      for to in tos {
        if !index.contains_key(to) {
          return Err(GridError::config(format!("wiring to unknown unit '{}'", to)));
        }
      }
    }
    Ok(Topology {
      units: self.units,
      index,
      adjacency: self.adjacency,
      spout_factories: self.spout_factories,
      bolt_factories: self.bolt_factories,
    })
  }
}
