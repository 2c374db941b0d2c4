//! Worker-side runtime.
//!
//! A worker owns one pre-built executor per slot per role: the mailboxes
//! exist from startup, so tuples routed to a slot before its StartUnit has
//! been processed simply queue. It joins the master, heartbeats, and turns
//! StartUnit commands into running tasks: one fresh unit instance from the
//! topology factory, wired to an [`OutputCollector`] for its slot.
//!
//! StartUnit handling goes through the same [`Dispatcher`] table the master
//! uses for its own commands; unknown types are dropped silently on this
//! side too.

use crate::collector::{Delivery, OutputCollector};
use crate::command::{Command, CommandType, Dispatcher};
use crate::config::{ClusterConfig, NetAddress};
use crate::error::GridError;
use crate::executor::Executor;
use crate::master::MasterHandle;
use crate::topology::{Topology, UnitDecl, UnitRole};
use crate::value::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// One worker node's runtime.
pub struct Worker {
  name: String,
  addr: NetAddress,
  config: Arc<ClusterConfig>,
  topology: Arc<Topology>,
  master: MasterHandle,
  delivery: Delivery,
  spout_executors: Vec<Executor>,
  bolt_executors: Vec<Executor>,
  commands: mpsc::Receiver<Command>,
}

impl Worker {
  /// Builds the worker for a declared node and registers its command
  /// channel with the master. Call [`Worker::join`] afterwards.
  ///
  /// Every bolt slot's mailbox is registered in the delivery registry up
  /// front, so resolved destinations are reachable from the moment the
  /// master can hand them out.
  pub async fn connect(
    name: impl Into<String>,
    config: Arc<ClusterConfig>,
    topology: Arc<Topology>,
    master: MasterHandle,
    delivery: Delivery,
  ) -> Result<Self, GridError> {
    let name = name.into();
    let addr = config
      .worker_addr(&name)
      .ok_or_else(|| GridError::config(format!("node '{}' is not in the cluster membership", name)))?
      .clone();

    let capacity = config.slot_capacity;
    let mailbox = config.mailbox_capacity;
    let spout_executors: Vec<Executor> = (0..capacity).map(|_| Executor::new(mailbox)).collect();
    let bolt_executors: Vec<Executor> = (0..capacity).map(|_| Executor::new(mailbox)).collect();
    for (slot, executor) in bolt_executors.iter().enumerate() {
      delivery.register_slot(addr.clone(), slot, executor.mailbox());
    }

    let (tx, commands) = mpsc::channel(capacity.max(1) * 2);
    master.register_worker(name.clone(), tx).await?;

    Ok(Self {
      name,
      addr,
      config,
      topology,
      master,
      delivery,
      spout_executors,
      bolt_executors,
      commands,
    })
  }

  /// Node name.
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Node address from the membership table.
  pub fn addr(&self) -> &NetAddress {
    &self.addr
  }

  /// Joins the cluster: sends Join and verifies the master's response.
  pub async fn join(&self) -> Result<(), GridError> {
    let response = self
      .master
      .request(Command::new(
        CommandType::Join,
        vec![Value::from(self.name.clone())],
      ))
      .await?;
    let master_name = response.str_arg(0)?;
    info!(node = %self.name, master = master_name, "joined cluster");
    Ok(())
  }

  /// Sends one heartbeat.
  pub async fn heartbeat(&self) -> Result<(), GridError> {
    self
      .master
      .request(Command::new(
        CommandType::Alive,
        vec![Value::from(self.name.clone())],
      ))
      .await
      .map(|_| ())
  }

  /// Processes the next command from the master. Returns `false` once the
  /// master side closed the channel.
  pub async fn handle_next_command(&mut self) -> Result<bool, GridError> {
    let Some(command) = self.commands.recv().await else {
      return Ok(false);
    };
    let dispatcher = Self::dispatcher();
    match dispatcher.dispatch(self, &command) {
      Ok(_) => Ok(true),
      Err(e) => {
        warn!(node = %self.name, kind = ?command.kind, error = %e, "command failed");
        Ok(true)
      }
    }
  }

  /// Spawns the heartbeat loop: one Alive round-trip per interval until the
  /// master goes away.
  pub fn spawn_heartbeat(&self, every: Duration) -> tokio::task::JoinHandle<()> {
    let master = self.master.clone();
    let name = self.name.clone();
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(every);
      ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
      // the first tick fires immediately; skip it so join() lands first
      ticker.tick().await;
      while !master.is_closed() {
        ticker.tick().await;
        let alive = Command::new(CommandType::Alive, vec![Value::from(name.clone())]);
        if let Err(e) = master.request(alive).await {
          warn!(node = %name, error = %e, "heartbeat failed");
        }
      }
    })
  }

  /// Runs the worker's command loop until the master goes away.
  pub async fn run(mut self) {
    loop {
      match self.handle_next_command().await {
        Ok(true) => {}
        Ok(false) => break,
        Err(e) => warn!(node = %self.name, error = %e, "command processing failed"),
      }
    }
  }

  /// Requests a stop of every started task. Returns immediately; use
  /// [`Worker::join_all`] to wait for the tasks to exit.
  pub fn stop_all(&self) {
    for executor in self.spout_executors.iter().chain(&self.bolt_executors) {
      if executor.task_name().is_some() {
        executor.stop();
      }
    }
  }

  /// Waits for every started task to exit. Shutdown and test helper.
  pub async fn join_all(&mut self) {
    for executor in self
      .spout_executors
      .iter_mut()
      .chain(&mut self.bolt_executors)
    {
      executor.join().await;
    }
  }

  /// Executor at (role, slot), if the slot index is in range.
  pub fn executor(&self, role: UnitRole, slot: usize) -> Option<&Executor> {
    match role {
      UnitRole::Spout => self.spout_executors.get(slot),
      UnitRole::Bolt => self.bolt_executors.get(slot),
    }
  }

  fn dispatcher() -> Dispatcher<Worker> {
    Dispatcher::new().on_command(CommandType::StartUnit, handle_start_unit)
  }

  fn make_collector(&self, decl: &UnitDecl, slot: usize) -> OutputCollector {
    let global_consumer = self.topology.downstream(&decl.name).first().cloned();
    OutputCollector::new(
      self.name.clone(),
      decl.role,
      slot,
      decl.strategy,
      decl.group_field,
      global_consumer,
      self.master.clone(),
      self.delivery.clone(),
    )
  }
}

fn handle_start_unit(worker: &mut Worker, command: &Command) -> Result<Option<Command>, GridError> {
  let unit = command.str_arg(0)?.to_string();
  let slot = command.index_arg(1)?;
  if slot >= worker.config.slot_capacity {
    return Err(GridError::protocol(format!(
      "StartUnit slot {} past capacity {}",
      slot, worker.config.slot_capacity
    )));
  }

  let decl = worker.topology.unit(&unit)?.clone();
  let collector = worker.make_collector(&decl, slot);
  info!(node = %worker.name, unit = %unit, role = decl.role.as_str(), slot, "starting unit");

  match decl.role {
    UnitRole::Spout => {
      let spout = (worker.topology.spout_factory(&unit)?)();
      worker.spout_executors[slot].start_spout(unit.as_str(), spout, collector)?;
    }
    UnitRole::Bolt => {
      let bolt = (worker.topology.bolt_factory(&unit)?)();
      worker.bolt_executors[slot].start_bolt(unit.as_str(), bolt, collector)?;
      let mailbox = worker.bolt_executors[slot].mailbox();
      worker.delivery.register_unit_instance(&unit, mailbox);
    }
  }
  Ok(None)
}
