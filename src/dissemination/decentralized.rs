//! Decentralized dissemination: the broker only brokers introductions.
//!
//! The broker never forwards payload frames; it only tells subscribers
//! which publishers to connect to. Each subscriber gets its own bound REQ
//! "notify" endpoint so one subscriber's poll loop can never steal a
//! notification meant for another.
//!
//! On a new publisher registration, only subscribers whose declared topic
//! interest intersects the publisher's topics are notified — DESIGN.md
//! open question 1, resolved as an explicit `NotifyPolicy::FilterByTopic`.

use std::collections::{HashMap, HashSet};

use log::debug;

use crate::{
  error::BrokerResult,
  port_pool::PortPool,
  topic::{Topic, TopicIndex},
  wire::PublisherAnnouncement,
};

use super::{await_ack, SubscriberRegisterOutcome};

/// DESIGN.md open question 1: the only supported policy is filter-by-topic.
/// Kept as a named type (rather than a bare `if`) so a future broadcast
/// policy has a place to live without touching call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyPolicy {
  FilterByTopic,
}

/// Per-subscriber notify endpoint.
struct NotifyBinding {
  port: u16,
  socket: zmq::Socket,
  topics: HashSet<Topic>,
}

pub struct DecentralizedEngine {
  context: zmq::Context,
  notify: HashMap<String, NotifyBinding>,
  policy: NotifyPolicy,
}

impl DecentralizedEngine {
  pub fn new(context: zmq::Context) -> Self {
    DecentralizedEngine {
      context,
      notify: HashMap::new(),
      policy: NotifyPolicy::FilterByTopic,
    }
  }

  /// Subscriber `id` registers for `topics`: allocate a dynamic port, bind
  /// a REQ notify endpoint on it, announce every topic in `topics` with
  /// whatever publishers are already registered (possibly none), then
  /// reply with the notify port.
  pub fn on_subscriber_register(
    &mut self,
    index: &mut TopicIndex,
    ports: &mut PortPool,
    id: &str,
    address: &str,
    topics: &[Topic],
  ) -> BrokerResult<SubscriberRegisterOutcome> {
    let port = ports.allocate()?;
    let socket = self.context.socket(zmq::REQ)?;
    socket.bind(&format!("tcp://*:{port}"))?;
    debug!("created notify binding for subscriber {id} on port {port}");

    let topic_set: HashSet<Topic> = topics.iter().cloned().collect();
    for topic in topics {
      index.add_subscriber(topic, address);
    }

    let announcements: Vec<PublisherAnnouncement> = topics
      .iter()
      .map(|topic| {
        let addresses = index.publishers_of(topic).to_vec();
        PublisherAnnouncement::new(topic.as_str(), addresses)
      })
      .collect();
    push_announcements(&socket, &announcements)?;

    self.notify.insert(
      id.to_string(),
      NotifyBinding {
        port,
        socket,
        topics: topic_set,
      },
    );

    Ok(SubscriberRegisterOutcome::Decentralized { notify_port: port })
  }

  /// Publisher `address` registers for `topics`. Every subscriber whose
  /// interest intersects `topics` (per `self.policy`) is sent one
  /// announcement per matching topic, in sequence, each awaited before the
  /// next subscriber is notified: registrations are serialized, never
  /// pipelined.
  pub fn on_publisher_register(
    &mut self,
    index: &mut TopicIndex,
    _ports: &mut PortPool,
    address: &str,
    topics: &[Topic],
  ) -> BrokerResult<()> {
    for topic in topics {
      index.add_publisher(topic, address);
    }

    for binding in self.notify.values() {
      let matching: Vec<&Topic> = match self.policy {
        NotifyPolicy::FilterByTopic => topics.iter().filter(|t| binding.topics.contains(*t)).collect(),
      };
      if matching.is_empty() {
        continue;
      }
      let announcements: Vec<PublisherAnnouncement> = matching
        .into_iter()
        .map(|topic| PublisherAnnouncement::new(topic.as_str(), vec![address.to_string()]))
        .collect();
      push_announcements(&binding.socket, &announcements)?;
    }
    Ok(())
  }

  pub fn on_publisher_disconnect(&mut self, index: &mut TopicIndex, address: &str, topics: &[Topic]) -> BrokerResult<()> {
    for topic in topics {
      index.remove_publisher(topic, address);
    }
    Ok(())
  }

  #[allow(clippy::too_many_arguments)]
  pub fn on_subscriber_disconnect(
    &mut self,
    index: &mut TopicIndex,
    ports: &mut PortPool,
    id: &str,
    address: &str,
    topics: &[Topic],
    notify_port: Option<u16>,
  ) -> BrokerResult<()> {
    for topic in topics {
      index.remove_subscriber(topic, address);
    }
    if let Some(binding) = self.notify.remove(id) {
      debug!("closed notify binding for subscriber {id}, released port {}", binding.port);
      drop(binding.socket);
      ports.release(binding.port);
    } else if let Some(port) = notify_port {
      // Binding already gone (e.g. duplicate disconnect); still honor the
      // port hint the client supplied so the pool does not leak it.
      ports.release(port);
    }
    Ok(())
  }
}

fn push_announcements(socket: &zmq::Socket, announcements: &[PublisherAnnouncement]) -> BrokerResult<()> {
  let body = serde_json::to_string(announcements)?;
  socket.send(body.as_str(), 0)?;
  let ack = await_ack(socket)?;
  debug!("notify endpoint acknowledged: {ack}");
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn notify_policy_defaults_to_filter_by_topic() {
    let context = zmq::Context::new();
    let engine = DecentralizedEngine::new(context);
    assert_eq!(engine.policy, NotifyPolicy::FilterByTopic);
  }
}
