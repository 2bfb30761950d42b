//! Error taxonomy for the broker.
//!
//! Each variant corresponds to one of the five failure categories: protocol
//! errors are recovered inline and never appear here as a propagated error
//! (they are mapped straight to a `{"error": ...}` reply); everything else
//! that can escape a handler and reach `Broker::run`'s caller is named here.

use thiserror::Error;

/// Top-level error type for fallible broker operations.
#[derive(Debug, Error)]
pub enum BrokerError {
  /// A ZMQ socket or context operation failed in a way that cannot be
  /// recovered locally.
  #[error("transport error: {0}")]
  Transport(#[from] zmq::Error),

  /// The coordination store (ZooKeeper) session was lost or a ZK
  /// operation failed.
  #[error("coordination error: {0}")]
  Coordination(#[from] zookeeper::ZkError),

  /// A registration or notification payload could not be decoded.
  /// Recovered at the call site; kept here so helper functions that
  /// build a reply can propagate with `?` before mapping to JSON.
  #[error("malformed request: {0}")]
  Protocol(#[from] serde_json::Error),

  /// The same, but the payload decoded fine and a required field or
  /// value was still nonsensical (e.g. an empty topic list).
  #[error("malformed request: {0}")]
  MalformedRequest(String),

  /// The dynamic port pool in [10000, 20000] has no free port left.
  #[error("dynamic port pool exhausted")]
  PortsExhausted,

  /// A registration referenced a topic, address, or subscriber id that
  /// is not currently known to the broker (e.g. disconnecting a
  /// publisher from a topic it never registered for).
  #[error("unknown {what}: {value}")]
  NotRegistered { what: &'static str, value: String },
}

pub type BrokerResult<T> = Result<T, BrokerError>;
