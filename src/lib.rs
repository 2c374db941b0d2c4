//! # Stormgrid
//!
//! Distributed scheduling and stream routing for a Storm-like topology
//! runtime.
//!
//! A master process assigns declared processing units, spouts (data
//! sources) and bolts (data processors), onto a fixed pool of execution
//! slots spread across worker nodes, and resolves, per emitted tuple, which
//! downstream slot receives it under one of three routing strategies.
//!
//! ## Key Pieces
//!
//! - **Registry & Scheduler**: cluster membership, per-node slot tables,
//!   and a one-shot greedy assignment pass once every worker has joined
//! - **Routing Resolver**: uniform-random and field-grouped destination
//!   queries, with group results memoized for the life of the master
//! - **Command Protocol**: typed commands dispatched through a
//!   type-to-handler table on both sides
//! - **Task Runtime**: one tokio task per deployed unit instance, draining
//!   one FIFO mailbox, with cooperative stop semantics
//! - **Output Router**: per-emission strategy dispatch, blocking (bounded)
//!   round-trips to the master for the dynamic strategies
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use stormgrid::topology::{Strategy, Topology};
//! use stormgrid::task::{spout_factory, bolt_factory};
//! # fn factories() -> (stormgrid::task::SpoutFactory, stormgrid::task::BoltFactory) { unimplemented!() }
//!
//! let (words, counter) = factories();
//! let topology = Topology::builder()
//!   .spout("words", vec!["word".into()], Strategy::Random, 1, words)
//!   .bolt("counter", vec!["count".into()], Strategy::Global, 2, counter)
//!   .wire("words", "counter")
//!   .build()?;
//! # Ok::<(), stormgrid::error::GridError>(())
//! ```
//!
//! All scheduling and routing state lives in master process memory and dies
//! with it; there is no persistence and no rebalancing after the one
//! scheduling pass.

// Documentation enforcement - treat missing docs as errors
#![deny(missing_docs)]

/// Output routing: per-emission destination selection and forwarding.
pub mod collector;
/// Typed command protocol and the type-to-handler dispatch table.
pub mod command;
/// Static cluster configuration (membership, capacity, timeouts).
pub mod config;
/// Error taxonomy for the whole runtime.
pub mod error;
/// Per-instance task runtime: mailboxes, lifecycle, executors.
pub mod executor;
/// Master actor: registry, scheduler and resolver behind one command queue.
pub mod master;
/// Master-side cluster registry and slot tables.
pub mod registry;
/// Destination resolution for the dynamic routing strategies.
pub mod routing;
/// One-shot greedy slot assignment.
pub mod scheduler;
/// Spout/bolt capability traits and per-slot factories.
pub mod task;
/// Topology declarations: units, strategies, wiring.
pub mod topology;
/// Tagged scalar values and tuples.
pub mod value;
/// Worker runtime: join, heartbeat, StartUnit handling.
pub mod worker;

pub use collector::{Delivery, OutputCollector};
pub use command::{Command, CommandType};
pub use config::{ClusterConfig, NetAddress};
pub use error::GridError;
pub use executor::{Executor, ExecutorStatus, TaskMessage};
pub use master::{Master, MasterHandle};
pub use registry::{Node, NodeStatus, Registry, SlotTable};
pub use routing::{Destination, Resolver};
pub use scheduler::{Assignment, Scheduler};
pub use task::{Bolt, Spout};
pub use topology::{Strategy, Topology, UnitDecl, UnitRole};
pub use value::{Tuple, Value};
pub use worker::Worker;
