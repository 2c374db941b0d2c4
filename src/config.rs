//! Cluster configuration.
//!
//! Membership is a closed, statically declared table: node name to network
//! address. There is no discovery; a node not in this table can never join.
//! The slot capacity is a cluster-wide constant applied to every node and
//! both unit roles.

use crate::error::GridError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Network address of a node (host plus port).
#[derive(Clone, Debug, Deserialize, Serialize, Eq, PartialEq, Hash)]
pub struct NetAddress {
  /// Host name or IP.
  pub host: String,
  /// TCP port.
  pub port: u16,
}

impl NetAddress {
  /// Creates an address from host and port.
  pub fn new(host: impl Into<String>, port: u16) -> Self {
    Self {
      host: host.into(),
      port,
    }
  }
}

impl fmt::Display for NetAddress {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.host, self.port)
  }
}

fn default_resolve_timeout_ms() -> u64 {
  5_000
}

fn default_mailbox_capacity() -> usize {
  256
}

/// Static cluster configuration shared by the master and every worker.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ClusterConfig {
  /// Name the master reports in every response.
  pub master_name: String,
  /// Address the master listens on.
  pub master_addr: NetAddress,
  /// Closed membership table: worker node name to address. The expected
  /// cluster size is the size of this table.
  pub workers: BTreeMap<String, NetAddress>,
  /// Slot table length per node per role (the cluster-wide constant C).
  pub slot_capacity: usize,
  /// Bound on the wait for a destination response, in milliseconds.
  #[serde(default = "default_resolve_timeout_ms")]
  pub resolve_timeout_ms: u64,
  /// Mailbox depth of each task runtime.
  #[serde(default = "default_mailbox_capacity")]
  pub mailbox_capacity: usize,
}

impl ClusterConfig {
  /// Parses a configuration from JSON.
  pub fn from_json(text: &str) -> Result<Self, GridError> {
    serde_json::from_str(text).map_err(|e| GridError::config(format!("bad cluster config: {}", e)))
  }

  /// Number of workers that must join before scheduling runs.
  pub fn expected_workers(&self) -> usize {
    self.workers.len()
  }

  /// Address of a declared worker, if it is in the membership table.
  pub fn worker_addr(&self, name: &str) -> Option<&NetAddress> {
    self.workers.get(name)
  }

  /// Bound on the destination round-trip wait.
  pub fn resolve_timeout(&self) -> Duration {
    Duration::from_millis(self.resolve_timeout_ms)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_json_with_defaults() {
    let cfg = ClusterConfig::from_json(
      r#"{
        "master_name": "nimbus",
        "master_addr": { "host": "127.0.0.1", "port": 6000 },
        "workers": { "s1": { "host": "127.0.0.1", "port": 7001 } },
        "slot_capacity": 3
      }"#,
    )
    .unwrap();
    assert_eq!(cfg.expected_workers(), 1);
    assert_eq!(cfg.slot_capacity, 3);
    assert_eq!(cfg.resolve_timeout(), Duration::from_millis(5_000));
    assert_eq!(cfg.worker_addr("s1").unwrap().port, 7001);
    assert!(cfg.worker_addr("s2").is_none());
  }

  #[test]
  fn rejects_malformed_json() {
    assert!(matches!(
      ClusterConfig::from_json("{"),
      Err(GridError::Config(_))
    ));
  }
}
