//! Topic routing key and the broker's single source of truth topic index
//! (`Topic`, `TopicIndex`).

use std::{
  borrow::Borrow,
  collections::HashMap,
  fmt,
};

/// An opaque routing key, also used verbatim as a ZMQ subscription filter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Topic(String);

impl Topic {
  pub fn new(name: impl Into<String>) -> Self {
    Topic(name.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  pub fn into_string(self) -> String {
    self.0
  }
}

impl Borrow<str> for Topic {
  fn borrow(&self) -> &str {
    &self.0
  }
}

impl From<String> for Topic {
  fn from(s: String) -> Self {
    Topic(s)
  }
}

impl From<&str> for Topic {
  fn from(s: &str) -> Self {
    Topic(s.to_string())
  }
}

impl fmt::Display for Topic {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// The publishers-by-topic / subscribers-by-topic index.
///
/// Ordered lists preserve registration order; a topic key is present iff
/// at least one party for it exists (entries are removed, not left empty).
#[derive(Debug, Default)]
pub struct TopicIndex {
  publishers_by_topic: HashMap<Topic, Vec<String>>,
  subscribers_by_topic: HashMap<Topic, Vec<String>>,
}

impl TopicIndex {
  pub fn new() -> Self {
    Self::default()
  }

  /// Adds `address` as a publisher of `topic`. Returns `true` if this is
  /// the first publisher for the topic (ingress binding must be created).
  pub fn add_publisher(&mut self, topic: &Topic, address: &str) -> bool {
    let entry = self.publishers_by_topic.entry(topic.clone()).or_default();
    let is_first = entry.is_empty();
    if !entry.iter().any(|a| a == address) {
      entry.push(address.to_string());
    }
    is_first
  }

  /// Removes `address` from `topic`'s publisher list. Returns `true` if
  /// the topic now has no publishers left (ingress binding must close).
  pub fn remove_publisher(&mut self, topic: &Topic, address: &str) -> bool {
    if let Some(entry) = self.publishers_by_topic.get_mut(topic) {
      entry.retain(|a| a != address);
      if entry.is_empty() {
        self.publishers_by_topic.remove(topic);
        return true;
      }
    }
    false
  }

  /// Adds `address` as a subscriber of `topic`. Returns `true` if this is
  /// the first subscriber for the topic (egress binding must be created).
  pub fn add_subscriber(&mut self, topic: &Topic, address: &str) -> bool {
    let entry = self.subscribers_by_topic.entry(topic.clone()).or_default();
    let is_first = entry.is_empty();
    entry.push(address.to_string());
    is_first
  }

  /// Removes `address` from `topic`'s subscriber list. Returns `true` if
  /// the topic now has no subscribers left (egress binding must close).
  pub fn remove_subscriber(&mut self, topic: &Topic, address: &str) -> bool {
    if let Some(entry) = self.subscribers_by_topic.get_mut(topic) {
      if let Some(pos) = entry.iter().position(|a| a == address) {
        entry.remove(pos);
      }
      if entry.is_empty() {
        self.subscribers_by_topic.remove(topic);
        return true;
      }
    }
    false
  }

  pub fn publishers_of(&self, topic: &Topic) -> &[String] {
    self
      .publishers_by_topic
      .get(topic)
      .map(Vec::as_slice)
      .unwrap_or(&[])
  }

  pub fn has_subscribers(&self, topic: &Topic) -> bool {
    self.subscribers_by_topic.contains_key(topic)
  }

  pub fn has_publishers(&self, topic: &Topic) -> bool {
    self.publishers_by_topic.contains_key(topic)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn first_publisher_creates_binding_need() {
    let mut idx = TopicIndex::new();
    let t = Topic::new("A");
    assert!(idx.add_publisher(&t, "1.2.3.4:1000"));
    assert!(!idx.add_publisher(&t, "1.2.3.4:1001"));
  }

  #[test]
  fn duplicate_publisher_address_not_added_twice() {
    let mut idx = TopicIndex::new();
    let t = Topic::new("A");
    idx.add_publisher(&t, "1.2.3.4:1000");
    idx.add_publisher(&t, "1.2.3.4:1000");
    assert_eq!(idx.publishers_of(&t).len(), 1);
  }

  #[test]
  fn last_publisher_removal_reports_binding_teardown() {
    let mut idx = TopicIndex::new();
    let t = Topic::new("A");
    idx.add_publisher(&t, "1.2.3.4:1000");
    assert!(idx.remove_publisher(&t, "1.2.3.4:1000"));
    assert!(!idx.has_publishers(&t));
  }

  #[test]
  fn subscriber_add_remove_roundtrip() {
    let mut idx = TopicIndex::new();
    let t = Topic::new("B");
    assert!(idx.add_subscriber(&t, "127.0.0.1:0"));
    assert!(!idx.add_subscriber(&t, "127.0.0.1:1"));
    assert!(!idx.remove_subscriber(&t, "127.0.0.1:0"));
    assert!(idx.has_subscribers(&t));
    assert!(idx.remove_subscriber(&t, "127.0.0.1:1"));
    assert!(!idx.has_subscribers(&t));
  }
}
