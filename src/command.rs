//! Typed command protocol.
//!
//! A command is a type tag plus an ordered list of tagged scalar arguments.
//! Both sides of the wire dispatch through a [`Dispatcher`]: a table from
//! command type to handler. A handler produces at most one [`Response`]
//! command sent back over the same connection.
//!
//! A type with no registered handler is dropped silently: no error response
//! is generated for unknown commands. That asymmetry is inherited protocol
//! behavior, kept on purpose.
//!
//! [`CommandType::Stop`] is reserved for the task runtime's local mailbox
//! and never crosses the wire.
//!
//! [`Response`]: CommandType::Response

use crate::error::GridError;
use crate::value::Value;
use std::collections::HashMap;
use tracing::debug;

/// Command type tags.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CommandType {
  /// Worker requests cluster membership: (nodeName).
  Join,
  /// Worker heartbeat: (nodeName).
  Alive,
  /// Random-strategy destination query: (nodeName, role, slotIndex).
  RandomDestination,
  /// Group-strategy destination query: (nodeName, role, slotIndex,
  /// fieldIndex).
  GroupDestination,
  /// Master tells a worker to start a unit: (unitName, slotIndex).
  /// Fire-and-forget; no response.
  StartUnit,
  /// Reply carrying a handler's result payload.
  Response,
  /// Local mailbox control only; never sent over a connection.
  Stop,
}

/// A protocol message: type tag plus ordered arguments.
#[derive(Clone, Debug, PartialEq)]
pub struct Command {
  /// Type tag.
  pub kind: CommandType,
  /// Ordered typed arguments.
  pub args: Vec<Value>,
}

impl Command {
  /// Creates a command.
  pub fn new(kind: CommandType, args: Vec<Value>) -> Self {
    Self { kind, args }
  }

  /// Creates a [`CommandType::Response`] carrying `args`.
  pub fn response(args: Vec<Value>) -> Self {
    Self::new(CommandType::Response, args)
  }

  /// String argument at `index`. Missing arguments are protocol errors;
  /// kind mismatches surface as config errors from the value accessor.
  pub fn str_arg(&self, index: usize) -> Result<&str, GridError> {
    self.arg(index)?.as_str()
  }

  /// i32 argument at `index`, widened for convenience.
  pub fn i32_arg(&self, index: usize) -> Result<i32, GridError> {
    self.arg(index)?.as_i32()
  }

  /// i32 argument at `index` converted to a slot/field index.
  pub fn index_arg(&self, index: usize) -> Result<usize, GridError> {
    let v = self.i32_arg(index)?;
    usize::try_from(v).map_err(|_| GridError::protocol(format!("negative index argument {}", v)))
  }

  fn arg(&self, index: usize) -> Result<&Value, GridError> {
    self.args.get(index).ok_or_else(|| {
      GridError::protocol(format!(
        "{:?} command has {} arguments, no index {}",
        self.kind,
        self.args.len(),
        index
      ))
    })
  }
}

/// A command handler: mutates the state it runs against and returns at most
/// one response.
pub type Handler<S> = fn(&mut S, &Command) -> Result<Option<Command>, GridError>;

/// Type-to-handler dispatch table, generic over the state the handlers run
/// against (master state on the master, worker state on workers).
pub struct Dispatcher<S> {
  handlers: HashMap<CommandType, Handler<S>>,
}

impl<S> Dispatcher<S> {
  /// Creates an empty table.
  pub fn new() -> Self {
    Self {
      handlers: HashMap::new(),
    }
  }

  /// Registers a handler for `kind`, replacing any previous one.
  pub fn on_command(mut self, kind: CommandType, handler: Handler<S>) -> Self {
    self.handlers.insert(kind, handler);
    self
  }

  /// Dispatches one command against `state`.
  ///
  /// Unknown types return `Ok(None)` without an error response. Handler
  /// errors propagate to the caller, which logs and keeps serving.
  pub fn dispatch(&self, state: &mut S, command: &Command) -> Result<Option<Command>, GridError> {
    match self.handlers.get(&command.kind) {
      Some(handler) => handler(state, command),
      None => {
        debug!(kind = ?command.kind, "dropping command with no registered handler");
        Ok(None)
      }
    }
  }
}

impl<S> Default for Dispatcher<S> {
  fn default() -> Self {
    Self::new()
  }
}
