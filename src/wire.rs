//! JSON wire protocol types.
//!
//! These types are decoded/encoded at the edges of `registration.rs` and
//! `dissemination::decentralized`; nothing else in the crate touches JSON
//! directly.

use serde::{Deserialize, Serialize};

/// Body of a publisher disconnect request:
/// `{"disconnect": {"address": ..., "topics": [...]}}`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PublisherDisconnect {
  pub address: String,
  pub topics: Vec<String>,
}

/// Request on the `PublisherRegistration` endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum PublisherRequest {
  Disconnect {
    disconnect: PublisherDisconnect,
  },
  Register {
    address: String,
    topics: Vec<String>,
  },
}

/// Reply on the `PublisherRegistration` endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum PublisherReply {
  Success { success: String },
  Disconnect { disconnect: String },
  Error { error: String },
}

impl PublisherReply {
  pub fn success(message: impl Into<String>) -> Self {
    PublisherReply::Success {
      success: message.into(),
    }
  }

  pub fn disconnect_success() -> Self {
    PublisherReply::Disconnect {
      disconnect: "success".to_string(),
    }
  }

  pub fn error(message: impl Into<String>) -> Self {
    PublisherReply::Error {
      error: message.into(),
    }
  }
}

/// Body of a subscriber disconnect request. `notify_port` is only present
/// (and only meaningful) in decentralized mode.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SubscriberDisconnect {
  pub id: String,
  pub address: String,
  pub topics: Vec<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub notify_port: Option<u16>,
}

/// Request on the `SubscriberRegistration` endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum SubscriberRequest {
  Disconnect {
    disconnect: SubscriberDisconnect,
  },
  Register {
    id: String,
    address: String,
    topics: Vec<String>,
  },
}

/// `{"register_sub": {"notify_port": <port>}}`, the first reply frame a
/// subscriber receives in decentralized mode.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegisterSubBody {
  pub notify_port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegisterSubReply {
  pub register_sub: RegisterSubBody,
}

impl RegisterSubReply {
  pub fn new(notify_port: u16) -> Self {
    RegisterSubReply {
      register_sub: RegisterSubBody { notify_port },
    }
  }
}

/// One element of the JSON array pushed over a subscriber's notify
/// endpoint: `{"register_pub": {"topic": "T", "addresses": [...]}}`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct PublisherAnnouncement {
  pub register_pub: PublisherAnnouncementBody,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct PublisherAnnouncementBody {
  pub topic: String,
  pub addresses: Vec<String>,
}

impl PublisherAnnouncement {
  pub fn new(topic: impl Into<String>, addresses: Vec<String>) -> Self {
    PublisherAnnouncement {
      register_pub: PublisherAnnouncementBody {
        topic: topic.into(),
        addresses,
      },
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn publisher_register_request_round_trips() {
    let json = r#"{"address":"127.0.0.1:10500","topics":["A"]}"#;
    let req: PublisherRequest = serde_json::from_str(json).unwrap();
    match req {
      PublisherRequest::Register { address, topics } => {
        assert_eq!(address, "127.0.0.1:10500");
        assert_eq!(topics, vec!["A".to_string()]);
      }
      _ => panic!("expected Register"),
    }
  }

  #[test]
  fn publisher_disconnect_request_parses() {
    let json = r#"{"disconnect":{"address":"127.0.0.1:10500","topics":["A","B"]}}"#;
    let req: PublisherRequest = serde_json::from_str(json).unwrap();
    match req {
      PublisherRequest::Disconnect { disconnect } => {
        assert_eq!(disconnect.address, "127.0.0.1:10500");
        assert_eq!(disconnect.topics.len(), 2);
      }
      _ => panic!("expected Disconnect"),
    }
  }

  #[test]
  fn malformed_publisher_request_fails_to_parse() {
    let json = r#"{}"#;
    let result: Result<PublisherRequest, _> = serde_json::from_str(json);
    assert!(result.is_err());
  }

  #[test]
  fn publisher_reply_success_serializes_expected_shape() {
    let reply = PublisherReply::success("registration success");
    let json = serde_json::to_value(&reply).unwrap();
    assert_eq!(json["success"], "registration success");
  }

  #[test]
  fn register_sub_reply_shape() {
    let reply = RegisterSubReply::new(12345);
    let json = serde_json::to_value(&reply).unwrap();
    assert_eq!(json["register_sub"]["notify_port"], 12345);
  }

  #[test]
  fn publisher_announcement_shape() {
    let ann = PublisherAnnouncement::new("A", vec!["127.0.0.1:10500".to_string()]);
    let json = serde_json::to_value(&ann).unwrap();
    assert_eq!(json["register_pub"]["topic"], "A");
    assert_eq!(json["register_pub"]["addresses"][0], "127.0.0.1:10500");
  }

  #[test]
  fn subscriber_register_request_parses() {
    let json = r#"{"id":"u1","address":"127.0.0.1:0","topics":["A"]}"#;
    let req: SubscriberRequest = serde_json::from_str(json).unwrap();
    match req {
      SubscriberRequest::Register { id, address, topics } => {
        assert_eq!(id, "u1");
        assert_eq!(address, "127.0.0.1:0");
        assert_eq!(topics, vec!["A".to_string()]);
      }
      _ => panic!("expected Register"),
    }
  }
}
