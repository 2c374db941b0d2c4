//! Error taxonomy for the scheduling and routing runtime.
//!
//! Every fallible operation in the crate returns [`GridError`]. The variants
//! map one-to-one onto the failure classes the master and workers can hit:
//! bad configuration or lookups, slot exhaustion, unroutable emissions,
//! malformed protocol traffic, and expired destination round-trips.
//!
//! None of these are fatal to the master: command handlers log and keep
//! serving, so one bad command cannot take the registry down.

use std::time::Duration;
use thiserror::Error;

/// Errors produced by the registry, scheduler, resolver, protocol layer and
/// task runtime.
#[derive(Debug, Error)]
pub enum GridError {
  /// A lookup or value access contradicted the declared configuration:
  /// heartbeat from an unregistered node, an unknown unit name, a grouping
  /// field index past the declared field list, or a tagged-value accessor
  /// applied to the wrong kind.
  #[error("configuration error: {0}")]
  Config(String),

  /// No free slot was left for a unit during assignment. The unit is still
  /// deployed with fewer instances; this surfaces the shortfall.
  #[error("capacity exhausted: unit '{unit}' deployed {deployed} of {requested} instances")]
  Capacity {
    /// Unit that could not be fully placed.
    unit: String,
    /// Instances actually placed.
    deployed: usize,
    /// Instances requested by the declaration.
    requested: usize,
  },

  /// An emission could not be routed: the source unit has no downstream
  /// consumers, or a consumer has no deployed instances.
  #[error("routing error: {0}")]
  Routing(String),

  /// A command was malformed (missing arguments) or could not be delivered
  /// because the peer is gone.
  #[error("protocol error: {0}")]
  Protocol(String),

  /// No response arrived within the bounded wait for a destination
  /// resolution. The emit fails; the caller decides whether to retry.
  #[error("timed out after {0:?} waiting for a destination response")]
  Timeout(Duration),
}

impl GridError {
  /// Shorthand for a [`GridError::Config`] with a formatted message.
  pub fn config(msg: impl Into<String>) -> Self {
    GridError::Config(msg.into())
  }

  /// Shorthand for a [`GridError::Routing`] with a formatted message.
  pub fn routing(msg: impl Into<String>) -> Self {
    GridError::Routing(msg.into())
  }

  /// Shorthand for a [`GridError::Protocol`] with a formatted message.
  pub fn protocol(msg: impl Into<String>) -> Self {
    GridError::Protocol(msg.into())
  }
}
