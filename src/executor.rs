//! Per-instance task runtime.
//!
//! Each deployed unit instance runs inside an executor: one dedicated tokio
//! task draining one FIFO mailbox. The mailbox exists from executor
//! construction, so messages enqueued before the task starts are delivered
//! once it does (up to mailbox capacity).
//!
//! Lifecycle: status flips to Running inside the spawned task strictly
//! before the creation hook (open/prepare); the mailbox loop then runs until
//! a Stop message is dispatched or the out-of-band stop signal is raised;
//! the teardown hook (close/cleanup) runs and status flips back to Stopping
//! last. Stop is cooperative: it takes effect after the currently running
//! callback returns, never preemptively.
//!
//! Status reads can trail the loop by the width of the delivery race; no
//! caller depends on immediate visibility.

use crate::collector::OutputCollector;
use crate::error::GridError;
use crate::task::{Bolt, Spout};
use crate::value::Tuple;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Lifecycle status of an executor. Stopping is both the initial and the
/// terminal state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExecutorStatus {
  /// Not running (initial, or the task has exited).
  Stopping,
  /// The task is live and draining its mailbox.
  Running,
}

/// Shared status cell between an executor and its task.
#[derive(Clone)]
struct StatusCell(Arc<AtomicU8>);

impl StatusCell {
  fn new() -> Self {
    StatusCell(Arc::new(AtomicU8::new(0)))
  }

  fn set(&self, status: ExecutorStatus) {
    let raw = match status {
      ExecutorStatus::Stopping => 0,
      ExecutorStatus::Running => 1,
    };
    self.0.store(raw, Ordering::SeqCst);
  }

  fn get(&self) -> ExecutorStatus {
    match self.0.load(Ordering::SeqCst) {
      1 => ExecutorStatus::Running,
      _ => ExecutorStatus::Stopping,
    }
  }
}

/// Out-of-band stop request, raised when the mailbox has no room for a
/// Stop message.
struct StopSignal {
  requested: AtomicBool,
  notify: Notify,
}

impl StopSignal {
  fn new() -> Self {
    Self {
      requested: AtomicBool::new(false),
      notify: Notify::new(),
    }
  }

  fn raise(&self) {
    self.requested.store(true, Ordering::SeqCst);
    self.notify.notify_one();
  }

  fn is_raised(&self) -> bool {
    self.requested.load(Ordering::SeqCst)
  }
}

/// Messages a task mailbox carries.
#[derive(Clone, Debug)]
pub enum TaskMessage {
  /// A delivered tuple.
  Data(Tuple),
  /// Cooperative stop: the loop exits after dispatching it.
  Stop,
}

/// Sender half of an executor mailbox.
pub type MailboxSender = mpsc::Sender<TaskMessage>;

/// One execution slot's runtime: mailbox, status, and (once started) the
/// dedicated task.
pub struct Executor {
  status: StatusCell,
  mailbox_tx: MailboxSender,
  mailbox_rx: Option<mpsc::Receiver<TaskMessage>>,
  stop: Arc<StopSignal>,
  task_name: Option<String>,
  handle: Option<JoinHandle<()>>,
}

impl Executor {
  /// Creates an idle executor with a mailbox of the given depth. The
  /// mailbox accepts messages immediately, before any task starts.
  pub fn new(mailbox_capacity: usize) -> Self {
    let (mailbox_tx, mailbox_rx) = mpsc::channel(mailbox_capacity);
    Self {
      status: StatusCell::new(),
      mailbox_tx,
      mailbox_rx: Some(mailbox_rx),
      stop: Arc::new(StopSignal::new()),
      task_name: None,
      handle: None,
    }
  }

  /// Sender for this executor's mailbox.
  pub fn mailbox(&self) -> MailboxSender {
    self.mailbox_tx.clone()
  }

  /// Current lifecycle status. May trail the task by one transition.
  pub fn status(&self) -> ExecutorStatus {
    self.status.get()
  }

  /// Name of the task occupying this executor, once started.
  pub fn task_name(&self) -> Option<&str> {
    self.task_name.as_deref()
  }

  /// Starts a spout task: takes exclusive ownership of the instance and
  /// spawns its driving loop. The loop calls `next_tuple` repeatedly,
  /// checking the mailbox for Stop between calls.
  ///
  /// Restarting while a previous task for this executor is still running is
  /// unsupported; this fails with a config error if the executor was ever
  /// started.
  pub fn start_spout(
    &mut self,
    task_name: impl Into<String>,
    mut spout: Box<dyn Spout>,
    mut collector: OutputCollector,
  ) -> Result<(), GridError> {
    let name = task_name.into();
    let rx = self.take_mailbox(name.clone())?;
    let status = self.status.clone();
    let stop = Arc::clone(&self.stop);
    self.handle = Some(tokio::spawn(async move {
      let mut rx = rx;
      status.set(ExecutorStatus::Running);
      if let Err(e) = spout.open(&mut collector).await {
        warn!(task = %name, error = %e, "spout open failed, task not started");
        status.set(ExecutorStatus::Stopping);
        return;
      }
      loop {
        if stop.is_raised() {
          break;
        }
        // drain control messages without blocking the emission loop
        match rx.try_recv() {
          Ok(TaskMessage::Stop) => break,
          Ok(TaskMessage::Data(_)) => {
            debug!(task = %name, "spout mailbox received data, dropping");
            continue;
          }
          Err(mpsc::error::TryRecvError::Empty) => {}
          Err(mpsc::error::TryRecvError::Disconnected) => break,
        }
        if let Err(e) = spout.next_tuple(&mut collector).await {
          warn!(task = %name, error = %e, "next_tuple failed");
        }
        tokio::task::yield_now().await;
      }
      spout.close().await;
      status.set(ExecutorStatus::Stopping);
    }));
    Ok(())
  }

  /// Starts a bolt task: takes exclusive ownership of the instance and
  /// spawns its mailbox loop. Data messages dispatch to `execute` strictly
  /// in post order.
  pub fn start_bolt(
    &mut self,
    task_name: impl Into<String>,
    mut bolt: Box<dyn Bolt>,
    mut collector: OutputCollector,
  ) -> Result<(), GridError> {
    let name = task_name.into();
    let rx = self.take_mailbox(name.clone())?;
    let status = self.status.clone();
    let stop = Arc::clone(&self.stop);
    self.handle = Some(tokio::spawn(async move {
      let mut rx = rx;
      status.set(ExecutorStatus::Running);
      if let Err(e) = bolt.prepare(&mut collector).await {
        warn!(task = %name, error = %e, "bolt prepare failed, task not started");
        status.set(ExecutorStatus::Stopping);
        return;
      }
      loop {
        let message = tokio::select! {
          message = rx.recv() => message,
          _ = stop.notify.notified() => break,
        };
        match message {
          Some(TaskMessage::Data(tuple)) => {
            if let Err(e) = bolt.execute(tuple, &mut collector).await {
              warn!(task = %name, error = %e, "execute failed, tuple dropped");
            }
          }
          Some(TaskMessage::Stop) | None => break,
        }
      }
      bolt.cleanup().await;
      status.set(ExecutorStatus::Stopping);
    }));
    Ok(())
  }

  /// Requests a cooperative stop and returns immediately, without joining
  /// the task. Stop is posted through the mailbox so already-queued tuples
  /// drain first; if the mailbox is full, the out-of-band signal is raised
  /// instead and queued tuples may be discarded. Either way the stop takes
  /// effect after the current callback returns.
  pub fn stop(&self) {
    if self.mailbox_tx.try_send(TaskMessage::Stop).is_err() {
      self.stop.raise();
    }
  }

  /// Waits for the task to exit. Test and shutdown helper; `stop` itself
  /// never joins.
  pub async fn join(&mut self) {
    if let Some(handle) = self.handle.take() {
      let _ = handle.await;
    }
  }

  fn take_mailbox(&mut self, name: String) -> Result<mpsc::Receiver<TaskMessage>, GridError> {
    let rx = self.mailbox_rx.take().ok_or_else(|| {
      GridError::config(format!(
        "executor already started (task '{}' requested '{}')",
        self.task_name.as_deref().unwrap_or("?"),
        name
      ))
    })?;
    self.task_name = Some(name);
    Ok(rx)
  }
}
