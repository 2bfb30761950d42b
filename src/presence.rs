//! Presence Registry.
//!
//! A thin client of a hierarchical coordination store (ZooKeeper):
//! leader election among broker candidates, then publication of the
//! winning broker's contact record as an ephemeral `/broker` node that
//! clients watch to find the active broker.

use std::sync::mpsc;

use log::{debug, error, info, warn};
use zookeeper::{Acl, CreateMode, Watcher, ZkError, ZkState, ZooKeeper};

use crate::{
  config::BrokerConfig,
  error::{BrokerError, BrokerResult},
};

/// `"host,pubRegPort,subRegPort"` as UTF-8 bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactRecord {
  pub host: String,
  pub pub_reg_port: u16,
  pub sub_reg_port: u16,
}

impl ContactRecord {
  pub fn to_bytes(&self) -> Vec<u8> {
    format!("{},{},{}", self.host, self.pub_reg_port, self.sub_reg_port).into_bytes()
  }

  pub fn parse(bytes: &[u8]) -> Option<Self> {
    let text = std::str::from_utf8(bytes).ok()?;
    let mut parts = text.splitn(3, ',');
    let host = parts.next()?.to_string();
    let pub_reg_port = parts.next()?.parse().ok()?;
    let sub_reg_port = parts.next()?.parse().ok()?;
    Some(ContactRecord {
      host,
      pub_reg_port,
      sub_reg_port,
    })
  }
}

/// A `Watcher` that only handles ZooKeeper's one-shot per-call watch
/// events; session connection-state transitions are handled separately
/// through `add_listener`, same division of labor as the Python
/// original's `KazooClient.add_listener(listener4state)`.
struct DefaultWatcher;

impl Watcher for DefaultWatcher {
  fn handle(&self, event: zookeeper::WatchedEvent) {
    debug!("presence registry watch event: {event:?}");
  }
}

pub struct PresenceRegistry {
  zk: ZooKeeper,
  election_path: String,
  presence_path: String,
}

impl PresenceRegistry {
  pub fn connect(config: &BrokerConfig) -> BrokerResult<Self> {
    info!("connecting to coordination store at {}", config.zk_hosts);
    let zk = ZooKeeper::connect(&config.zk_hosts, config.session_timeout, DefaultWatcher)?;
    // LOST means the session (and any leadership held on it) is gone and
    // the caller must re-elect; SUSPENDED is transient and does not abort
    // the broker; CONNECTED is normal operation; anything else is logged
    // but not acted on.
    zk.add_listener(|state| match state {
      ZkState::NotConnected => warn!("coordination session state = LOST"),
      ZkState::Connecting => info!("coordination session state = SUSPENDED"),
      ZkState::Connected | ZkState::ConnectedReadOnly => {
        info!("coordination session state = CONNECTED")
      }
      ZkState::Closed => debug!("coordination session state = CLOSED"),
      ZkState::AuthFailed => error!("coordination session state = AUTH_FAILED"),
    });
    Ok(PresenceRegistry {
      zk,
      election_path: config.election_path.clone(),
      presence_path: config.presence_path.clone(),
    })
  }

  fn ensure_path(&self, path: &str) -> BrokerResult<()> {
    match self.zk.exists(path, false) {
      Ok(Some(_)) => Ok(()),
      Ok(None) => match self
        .zk
        .create(path, vec![], Acl::open_unsafe().clone(), CreateMode::Persistent)
      {
        Ok(_) | Err(ZkError::NodeExists) => Ok(()),
        Err(e) => Err(BrokerError::Coordination(e)),
      },
      Err(e) => Err(BrokerError::Coordination(e)),
    }
  }

  /// Enters leader election under `election_path`. Blocks (cooperatively:
  /// each wait is a single blocking receive on a watch notification)
  /// until this candidate wins, then publishes `contact` at `/broker`
  /// and returns.
  pub fn join(&self, candidate_id: &str, contact: &ContactRecord) -> BrokerResult<()> {
    self.ensure_path(&self.election_path)?;

    let my_path = self
      .zk
      .create(
        &format!("{}/n_", self.election_path),
        candidate_id.as_bytes().to_vec(),
        Acl::open_unsafe().clone(),
        CreateMode::EphemeralSequential,
      )
      .map_err(BrokerError::Coordination)?;
    let my_node = my_path
      .rsplit('/')
      .next()
      .expect("created path always has a final segment")
      .to_string();

    loop {
      let mut children = self
        .zk
        .get_children(&self.election_path, false)
        .map_err(BrokerError::Coordination)?;
      children.sort();
      debug!("election contenders: {children:?}");

      let my_index = children
        .iter()
        .position(|c| c == &my_node)
        .expect("own ephemeral node must be among the election's children");

      if my_index == 0 {
        info!("won leader election as {my_node}");
        break;
      }

      let predecessor = format!("{}/{}", self.election_path, children[my_index - 1]);
      let (tx, rx) = mpsc::channel();
      let exists = self
        .zk
        .exists_w(&predecessor, move |_event| {
          let _ = tx.send(());
        })
        .map_err(BrokerError::Coordination)?;
      if exists.is_none() {
        // predecessor already gone between get_children and exists_w
        continue;
      }
      // Block until the predecessor node changes (most likely deleted).
      let _ = rx.recv();
    }

    self.publish(contact)
  }

  /// Creates the ephemeral `/broker` node, or atomically replaces its
  /// value if a stale one is already present.
  fn publish(&self, contact: &ContactRecord) -> BrokerResult<()> {
    let value = contact.to_bytes();
    debug!(
      "publishing presence record at {}: {:?}",
      self.presence_path,
      String::from_utf8_lossy(&value)
    );
    match self.zk.create(
      &self.presence_path,
      value.clone(),
      Acl::open_unsafe().clone(),
      CreateMode::Ephemeral,
    ) {
      Ok(_) => Ok(()),
      Err(ZkError::NodeExists) => self
        .zk
        .set_data(&self.presence_path, value, None)
        .map(|_| ())
        .map_err(BrokerError::Coordination),
      Err(e) => Err(BrokerError::Coordination(e)),
    }
  }

  pub fn close(&self) -> BrokerResult<()> {
    self.zk.close().map_err(BrokerError::Coordination)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn contact_record_round_trips_through_bytes() {
    let record = ContactRecord {
      host: "127.0.0.1".to_string(),
      pub_reg_port: 5555,
      sub_reg_port: 5556,
    };
    let bytes = record.to_bytes();
    assert_eq!(bytes, b"127.0.0.1,5555,5556".to_vec());
    assert_eq!(ContactRecord::parse(&bytes), Some(record));
  }

  #[test]
  fn contact_record_parse_rejects_truncated_input() {
    assert_eq!(ContactRecord::parse(b"127.0.0.1,5555"), None);
  }
}
