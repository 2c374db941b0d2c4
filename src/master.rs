//! The master process: command loop over the registry, scheduler and
//! resolver.
//!
//! All registry, slot-table and routing-cache mutation runs inside one actor
//! task consuming a single command queue, so command handlers can never
//! interleave. Workers and collectors talk to it through a cloneable
//! [`MasterHandle`]; a request is a command plus a oneshot reply slot, and
//! every wait is bounded by the configured resolve timeout.
//!
//! Handler errors are logged and the reply slot is dropped, which surfaces a
//! protocol error to the requester; the loop itself keeps serving. One bad
//! command cannot take the master down.

use crate::command::{Command, CommandType, Dispatcher};
use crate::config::ClusterConfig;
use crate::error::GridError;
use crate::registry::Registry;
use crate::routing::Resolver;
use crate::scheduler::{Assignment, Scheduler};
use crate::topology::{Topology, UnitRole};
use crate::value::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

/// Depth of the master's command queue.
const COMMAND_QUEUE_DEPTH: usize = 64;

/// Requests the master actor consumes.
enum MasterRequest {
  /// A protocol command, with a reply slot when the sender expects a
  /// response.
  Command {
    command: Command,
    reply: Option<oneshot::Sender<Command>>,
  },
  /// Registers the delivery channel the master uses to push StartUnit
  /// commands to a worker.
  RegisterWorker {
    name: String,
    sender: mpsc::Sender<Command>,
  },
  /// Snapshot of all assignments made so far (for inspection and tests).
  Assignments { reply: oneshot::Sender<Vec<Assignment>> },
}

/// Cloneable handle for talking to a running master.
#[derive(Clone)]
pub struct MasterHandle {
  tx: mpsc::Sender<MasterRequest>,
  timeout: Duration,
}

impl MasterHandle {
  /// Sends a command and waits for its response, bounded by the resolve
  /// timeout. A lost request fails with [`GridError::Timeout`] instead of
  /// wedging the calling task.
  pub async fn request(&self, command: Command) -> Result<Command, GridError> {
    let (reply_tx, reply_rx) = oneshot::channel();
    self
      .tx
      .send(MasterRequest::Command {
        command,
        reply: Some(reply_tx),
      })
      .await
      .map_err(|_| GridError::protocol("master is gone"))?;
    match tokio::time::timeout(self.timeout, reply_rx).await {
      Err(_) => Err(GridError::Timeout(self.timeout)),
      Ok(Err(_)) => Err(GridError::protocol("master dropped the request")),
      Ok(Ok(response)) => Ok(response),
    }
  }

  /// Sends a command without waiting for a response.
  pub async fn notify(&self, command: Command) -> Result<(), GridError> {
    self
      .tx
      .send(MasterRequest::Command {
        command,
        reply: None,
      })
      .await
      .map_err(|_| GridError::protocol("master is gone"))
  }

  /// Registers the channel the master pushes StartUnit commands through for
  /// `name`. Workers call this before joining.
  pub async fn register_worker(
    &self,
    name: impl Into<String>,
    sender: mpsc::Sender<Command>,
  ) -> Result<(), GridError> {
    self
      .tx
      .send(MasterRequest::RegisterWorker {
        name: name.into(),
        sender,
      })
      .await
      .map_err(|_| GridError::protocol("master is gone"))
  }

  /// True once the master actor has exited and the queue is closed.
  pub fn is_closed(&self) -> bool {
    self.tx.is_closed()
  }

  /// Snapshot of every slot assignment the scheduler has made.
  pub async fn assignments(&self) -> Result<Vec<Assignment>, GridError> {
    let (reply_tx, reply_rx) = oneshot::channel();
    self
      .tx
      .send(MasterRequest::Assignments { reply: reply_tx })
      .await
      .map_err(|_| GridError::protocol("master is gone"))?;
    reply_rx
      .await
      .map_err(|_| GridError::protocol("master dropped the request"))
  }
}

/// State owned exclusively by the master actor task.
struct MasterState {
  config: Arc<ClusterConfig>,
  topology: Arc<Topology>,
  registry: Registry,
  scheduler: Scheduler,
  resolver: Resolver,
  assignments: Vec<Assignment>,
  workers: HashMap<String, mpsc::Sender<Command>>,
  /// StartUnit commands produced by a handler, drained and delivered by the
  /// actor loop after the handler returns.
  pending_starts: Vec<(String, Command)>,
}

impl MasterState {
  fn master_name(&self) -> Value {
    Value::from(self.config.master_name.clone())
  }
}

/// The master runtime. [`Master::spawn`] starts the actor task and returns
/// its handle.
pub struct Master;

impl Master {
  /// Spawns the master actor for the given cluster and topology.
  pub fn spawn(config: Arc<ClusterConfig>, topology: Arc<Topology>) -> MasterHandle {
    Self::spawn_with_resolver(config, topology, Resolver::new())
  }

  /// Like [`Master::spawn`] but with a caller-supplied resolver (seeded, in
  /// tests).
  pub fn spawn_with_resolver(
    config: Arc<ClusterConfig>,
    topology: Arc<Topology>,
    resolver: Resolver,
  ) -> MasterHandle {
    let (tx, rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
    let timeout = config.resolve_timeout();
    let state = MasterState {
      registry: Registry::new(config.clone()),
      scheduler: Scheduler::new(),
      resolver,
      assignments: Vec::new(),
      workers: HashMap::new(),
      pending_starts: Vec::new(),
      config,
      topology,
    };
    tokio::spawn(run(state, rx));
    MasterHandle { tx, timeout }
  }
}

async fn run(mut state: MasterState, mut rx: mpsc::Receiver<MasterRequest>) {
  let dispatcher = Dispatcher::new()
    .on_command(CommandType::Join, handle_join)
    .on_command(CommandType::Alive, handle_alive)
    .on_command(CommandType::RandomDestination, handle_random_destination)
    .on_command(CommandType::GroupDestination, handle_group_destination);

  info!(master = %state.config.master_name, "master started");
  while let Some(request) = rx.recv().await {
    match request {
      MasterRequest::RegisterWorker { name, sender } => {
        state.workers.insert(name, sender);
      }
      MasterRequest::Assignments { reply } => {
        let _ = reply.send(state.assignments.clone());
      }
      MasterRequest::Command { command, reply } => {
        match dispatcher.dispatch(&mut state, &command) {
          Ok(Some(response)) => {
            if let Some(reply) = reply {
              let _ = reply.send(response);
            }
          }
          Ok(None) => {}
          Err(e) => {
            warn!(kind = ?command.kind, error = %e, "command handler failed");
          }
        }
        deliver_pending_starts(&mut state).await;
      }
    }
  }
}

/// Pushes queued StartUnit commands to their workers, fire-and-forget.
async fn deliver_pending_starts(state: &mut MasterState) {
  for (node, command) in state.pending_starts.drain(..) {
    match state.workers.get(&node) {
      Some(sender) => {
        if sender.send(command).await.is_err() {
          warn!(%node, "worker channel closed, StartUnit lost");
        }
      }
      None => warn!(%node, "no registered channel for node, StartUnit lost"),
    }
  }
}

fn handle_join(state: &mut MasterState, command: &Command) -> Result<Option<Command>, GridError> {
  let name = command.str_arg(0)?;
  state.registry.join(name)?;
  info!(node = name, "node joined the cluster");

  if let Some(assignments) = state
    .scheduler
    .try_schedule(&mut state.registry, &state.topology)
  {
    for a in &assignments {
      state.pending_starts.push((
        a.node.clone(),
        Command::new(
          CommandType::StartUnit,
          vec![Value::from(a.unit.clone()), Value::Int32(a.slot as i32)],
        ),
      ));
    }
    state.assignments = assignments;
  }
  Ok(Some(Command::response(vec![state.master_name()])))
}

fn handle_alive(state: &mut MasterState, command: &Command) -> Result<Option<Command>, GridError> {
  let name = command.str_arg(0)?;
  state.registry.alive(name)?;
  Ok(Some(Command::response(vec![state.master_name()])))
}

fn handle_random_destination(
  state: &mut MasterState,
  command: &Command,
) -> Result<Option<Command>, GridError> {
  let (node, role, slot) = source_args(command)?;
  let dest = state
    .resolver
    .random_destination(&state.registry, &state.topology, node, role, slot)?;
  Ok(Some(destination_response(state, &dest)))
}

fn handle_group_destination(
  state: &mut MasterState,
  command: &Command,
) -> Result<Option<Command>, GridError> {
  let (node, role, slot) = source_args(command)?;
  let field_index = command.index_arg(3)?;
  let dest = state.resolver.group_destination(
    &state.registry,
    &state.topology,
    node,
    role,
    slot,
    field_index,
  )?;
  Ok(Some(destination_response(state, &dest)))
}

fn source_args(command: &Command) -> Result<(&str, UnitRole, usize), GridError> {
  let node = command.str_arg(0)?;
  let role = UnitRole::parse(command.str_arg(1)?)?;
  let slot = command.index_arg(2)?;
  Ok((node, role, slot))
}

fn destination_response(state: &MasterState, dest: &crate::routing::Destination) -> Command {
  Command::response(vec![
    state.master_name(),
    Value::from(dest.addr.host.clone()),
    Value::Int32(i32::from(dest.addr.port)),
    Value::Int32(dest.slot as i32),
  ])
}

/// A handle whose master is already gone: any request fails immediately
/// without a round-trip. Lets tests prove a code path issues no protocol
/// traffic.
#[cfg(test)]
pub(crate) fn dead_handle() -> MasterHandle {
  let (tx, _) = mpsc::channel(1);
  MasterHandle {
    tx,
    timeout: Duration::from_millis(100),
  }
}
