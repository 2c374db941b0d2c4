//! The client-side half of routing: per-emission destination selection and
//! forwarding.
//!
//! Every unit instance owns one [`OutputCollector`]. On `emit` the collector
//! dispatches on the unit's strategy: Global forwards to a destination fixed
//! at first use with no master traffic; Random and Group issue a bounded
//! round-trip to the master's resolver, then forward. Forwarding always
//! enqueues a Data message into the destination mailbox; a unit is never
//! invoked synchronously by its upstream.
//!
//! The [`Delivery`] registry is the in-process stand-in for the socket
//! transport: workers register each executor mailbox under its (address,
//! slot) key and each deployed unit name. A byte-level transport would plug
//! in here without touching the rest of the crate.

use crate::command::{Command, CommandType};
use crate::config::NetAddress;
use crate::error::GridError;
use crate::executor::{MailboxSender, TaskMessage};
use crate::master::MasterHandle;
use crate::topology::{Strategy, UnitRole};
use crate::value::{Tuple, Value};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

#[derive(Default)]
struct DeliveryInner {
  by_slot: HashMap<(NetAddress, usize), MailboxSender>,
  by_unit: HashMap<String, Vec<MailboxSender>>,
}

/// Routes resolved destinations to executor mailboxes.
///
/// Shared by every worker in the process; keys mirror what the master hands
/// out (destination address plus bolt slot index).
#[derive(Clone, Default)]
pub struct Delivery {
  inner: Arc<RwLock<DeliveryInner>>,
}

impl Delivery {
  /// Creates an empty delivery registry.
  pub fn new() -> Self {
    Self::default()
  }

  /// Registers a bolt executor mailbox under its slot key.
  pub fn register_slot(&self, addr: NetAddress, slot: usize, sender: MailboxSender) {
    let mut inner = self.inner.write().expect("delivery lock poisoned");
    inner.by_slot.insert((addr, slot), sender);
  }

  /// Records a deployed instance of `unit`, in deployment order. Used by
  /// Global-strategy collectors to fix their destination.
  pub fn register_unit_instance(&self, unit: &str, sender: MailboxSender) {
    let mut inner = self.inner.write().expect("delivery lock poisoned");
    inner.by_unit.entry(unit.to_string()).or_default().push(sender);
  }

  /// Mailbox registered under (addr, slot), if any.
  pub fn slot_sender(&self, addr: &NetAddress, slot: usize) -> Option<MailboxSender> {
    let inner = self.inner.read().expect("delivery lock poisoned");
    inner.by_slot.get(&(addr.clone(), slot)).cloned()
  }

  /// First registered instance of `unit` (deployment order), if any.
  pub fn first_instance(&self, unit: &str) -> Option<MailboxSender> {
    let inner = self.inner.read().expect("delivery lock poisoned");
    inner.by_unit.get(unit).and_then(|v| v.first().cloned())
  }
}

/// Per-instance output router.
///
/// Knows where its own unit sits (node, role, slot), the unit's strategy,
/// and how to reach the master and the destination mailboxes.
pub struct OutputCollector {
  node: String,
  role: UnitRole,
  slot: usize,
  strategy: Strategy,
  group_field: Option<usize>,
  /// First downstream consumer name, used by the Global strategy.
  global_consumer: Option<String>,
  /// Fixed Global destination, resolved on first emit and never again.
  global_dest: Option<MailboxSender>,
  master: MasterHandle,
  delivery: Delivery,
}

impl OutputCollector {
  /// Creates a collector for the unit instance at (node, role, slot).
  ///
  /// `global_consumer` is the first downstream consumer from the adjacency
  /// graph; only Global-strategy collectors use it.
  pub fn new(
    node: impl Into<String>,
    role: UnitRole,
    slot: usize,
    strategy: Strategy,
    group_field: Option<usize>,
    global_consumer: Option<String>,
    master: MasterHandle,
    delivery: Delivery,
  ) -> Self {
    Self {
      node: node.into(),
      role,
      slot,
      strategy,
      group_field,
      global_consumer,
      global_dest: None,
      master,
      delivery,
    }
  }

  /// Emits one tuple according to the unit's strategy.
  ///
  /// Random and Group block the calling task for the master's response,
  /// bounded by the configured timeout; on expiry the emit fails with
  /// [`GridError::Timeout`] and the caller decides whether to retry.
  pub async fn emit(&mut self, tuple: Tuple) -> Result<(), GridError> {
    match self.strategy {
      Strategy::Global => self.emit_global(tuple).await,
      Strategy::Random => {
        let request = Command::new(
          CommandType::RandomDestination,
          vec![
            Value::from(self.node.clone()),
            Value::from(self.role.as_str()),
            Value::Int32(self.slot as i32),
          ],
        );
        self.emit_resolved(request, tuple).await
      }
      Strategy::Group => {
        let field = self.group_field.ok_or_else(|| {
          GridError::config("group strategy without a grouping field".to_string())
        })?;
        let request = Command::new(
          CommandType::GroupDestination,
          vec![
            Value::from(self.node.clone()),
            Value::from(self.role.as_str()),
            Value::Int32(self.slot as i32),
            Value::Int32(field as i32),
          ],
        );
        self.emit_resolved(request, tuple).await
      }
    }
  }

  /// Global path: no protocol traffic. The destination is fixed at first
  /// use from the adjacency graph and the delivery registry.
  async fn emit_global(&mut self, tuple: Tuple) -> Result<(), GridError> {
    let sender = match &self.global_dest {
      Some(sender) => sender.clone(),
      None => {
        let consumer = self
          .global_consumer
          .as_deref()
          .ok_or_else(|| GridError::routing("global strategy with no downstream consumer"))?;
        let sender = self.delivery.first_instance(consumer).ok_or_else(|| {
          GridError::routing(format!("no deployed instance of consumer '{}'", consumer))
        })?;
        debug!(consumer, "fixed global destination");
        self.global_dest = Some(sender.clone());
        sender
      }
    };
    sender
      .send(TaskMessage::Data(tuple))
      .await
      .map_err(|_| GridError::protocol("destination mailbox closed"))
  }

  /// Dynamic path: round-trip to the master, then forward to the resolved
  /// (address, slot) mailbox.
  async fn emit_resolved(&self, request: Command, tuple: Tuple) -> Result<(), GridError> {
    let response = self.master.request(request).await?;
    let (addr, slot) = parse_destination(&response)?;
    let sender = self.delivery.slot_sender(&addr, slot).ok_or_else(|| {
      GridError::routing(format!("no mailbox registered for {} slot {}", addr, slot))
    })?;
    sender
      .send(TaskMessage::Data(tuple))
      .await
      .map_err(|_| GridError::protocol("destination mailbox closed"))
  }
}

/// Parses a destination response: (masterName, destHost, destPort,
/// destSlotIndex).
fn parse_destination(response: &Command) -> Result<(NetAddress, usize), GridError> {
  if response.kind != CommandType::Response {
    return Err(GridError::protocol(format!(
      "expected a response, got {:?}",
      response.kind
    )));
  }
  let host = response.str_arg(1)?.to_string();
  let port = response.i32_arg(2)?;
  let port =
    u16::try_from(port).map_err(|_| GridError::protocol(format!("bad destination port {}", port)))?;
  let slot = response.index_arg(3)?;
  Ok((NetAddress::new(host, port), slot))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parse_destination_reads_host_port_slot() {
    let response = Command::response(vec![
      Value::from("nimbus"),
      Value::from("127.0.0.1"),
      Value::Int32(7001),
      Value::Int32(2),
    ]);
    let (addr, slot) = parse_destination(&response).unwrap();
    assert_eq!(addr, NetAddress::new("127.0.0.1", 7001));
    assert_eq!(slot, 2);
  }

  #[test]
  fn parse_destination_rejects_non_response() {
    let cmd = Command::new(CommandType::Join, vec![]);
    assert!(matches!(
      parse_destination(&cmd),
      Err(GridError::Protocol(_))
    ));
  }

  #[test]
  fn parse_destination_rejects_bad_port() {
    let response = Command::response(vec![
      Value::from("nimbus"),
      Value::from("h"),
      Value::Int32(-1),
      Value::Int32(0),
    ]);
    assert!(matches!(
      parse_destination(&response),
      Err(GridError::Protocol(_))
    ));
  }

  #[tokio::test]
  async fn global_emits_without_any_master_round_trip() {
    let delivery = Delivery::new();
    let (tx, mut rx) = tokio::sync::mpsc::channel(4);
    delivery.register_unit_instance("b", tx);
    // a dead master handle: any round-trip attempt would fail immediately
    let mut collector = OutputCollector::new(
      "s1",
      UnitRole::Spout,
      0,
      Strategy::Global,
      None,
      Some("b".into()),
      crate::master::dead_handle(),
      delivery,
    );
    collector.emit(Tuple::new(vec![Value::from("x")])).await.unwrap();
    collector.emit(Tuple::new(vec![Value::from("y")])).await.unwrap();
    assert!(matches!(rx.recv().await, Some(TaskMessage::Data(_))));
    assert!(matches!(rx.recv().await, Some(TaskMessage::Data(_))));
  }

  #[tokio::test]
  async fn global_destination_is_fixed_at_first_use() {
    let delivery = Delivery::new();
    let (first_tx, mut first_rx) = tokio::sync::mpsc::channel(4);
    delivery.register_unit_instance("b", first_tx);
    let mut collector = OutputCollector::new(
      "s1",
      UnitRole::Spout,
      0,
      Strategy::Global,
      None,
      Some("b".into()),
      crate::master::dead_handle(),
      delivery.clone(),
    );
    collector.emit(Tuple::default()).await.unwrap();

    // a later instance never receives anything; the destination is fixed
    let (second_tx, mut second_rx) = tokio::sync::mpsc::channel(4);
    delivery.register_unit_instance("b", second_tx);
    collector.emit(Tuple::default()).await.unwrap();

    assert!(first_rx.recv().await.is_some());
    assert!(first_rx.recv().await.is_some());
    assert!(second_rx.try_recv().is_err());
  }

  #[tokio::test]
  async fn dynamic_strategies_fail_when_master_is_unreachable() {
    let mut collector = OutputCollector::new(
      "s1",
      UnitRole::Spout,
      0,
      Strategy::Random,
      None,
      None,
      crate::master::dead_handle(),
      Delivery::new(),
    );
    let err = collector.emit(Tuple::default()).await.unwrap_err();
    assert!(matches!(err, GridError::Protocol(_)));
  }

  #[test]
  fn delivery_registry_resolves_slot_and_unit_keys() {
    let delivery = Delivery::new();
    let (tx, _rx) = tokio::sync::mpsc::channel(4);
    let addr = NetAddress::new("127.0.0.1", 7001);
    delivery.register_slot(addr.clone(), 0, tx.clone());
    delivery.register_unit_instance("b", tx);
    assert!(delivery.slot_sender(&addr, 0).is_some());
    assert!(delivery.slot_sender(&addr, 1).is_none());
    assert!(delivery.first_instance("b").is_some());
    assert!(delivery.first_instance("ghost").is_none());
  }
}
