//! Unit capability traits and factories.
//!
//! A topology is built from two kinds of processing units: spouts originate
//! tuples, bolts transform them. Both are driven by a task runtime
//! ([`crate::executor`]) that owns the instance exclusively for the lifetime
//! of the task.
//!
//! Instantiation goes through factory closures producing one fresh boxed
//! instance per slot, so a unit deployed with N instances gets N independent
//! states.

use crate::collector::OutputCollector;
use crate::error::GridError;
use crate::value::Tuple;
use async_trait::async_trait;
use std::sync::Arc;

/// A data source: the origin of every stream in the topology.
#[async_trait]
pub trait Spout: Send {
  /// Called once when the task starts, before any tuple is produced.
  async fn open(&mut self, collector: &mut OutputCollector) -> Result<(), GridError>;

  /// Called once when the task stops.
  async fn close(&mut self);

  /// Produces the next batch of tuples by emitting through the collector.
  /// The runtime calls this repeatedly until the task is stopped.
  async fn next_tuple(&mut self, collector: &mut OutputCollector) -> Result<(), GridError>;
}

/// A data processor: consumes tuples from its mailbox, optionally emitting
/// downstream.
#[async_trait]
pub trait Bolt: Send {
  /// Called once when the task starts, before any tuple is delivered.
  async fn prepare(&mut self, collector: &mut OutputCollector) -> Result<(), GridError>;

  /// Called once when the task stops.
  async fn cleanup(&mut self);

  /// Handles one delivered tuple.
  async fn execute(&mut self, tuple: Tuple, collector: &mut OutputCollector)
    -> Result<(), GridError>;
}

/// Produces one fresh spout instance per deployed slot.
pub type SpoutFactory = Arc<dyn Fn() -> Box<dyn Spout> + Send + Sync>;

/// Produces one fresh bolt instance per deployed slot.
pub type BoltFactory = Arc<dyn Fn() -> Box<dyn Bolt> + Send + Sync>;

/// Wraps a plain constructor closure into a [`SpoutFactory`].
pub fn spout_factory<S, F>(make: F) -> SpoutFactory
where
  S: Spout + 'static,
  F: Fn() -> S + Send + Sync + 'static,
{
  Arc::new(move || Box::new(make()))
}

/// Wraps a plain constructor closure into a [`BoltFactory`].
pub fn bolt_factory<B, F>(make: F) -> BoltFactory
where
  B: Bolt + 'static,
  F: Fn() -> B + Send + Sync + 'static,
{
  Arc::new(move || Box::new(make()))
}
