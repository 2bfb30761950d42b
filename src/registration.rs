//! Registration Service: the two REP endpoints publishers and subscribers
//! use to join and leave topics.
//!
//! Two strict request/reply endpoints. Every branch that can fail is
//! caught here and mapped to a `{"error": ...}` reply rather than
//! propagated — the endpoint's request/reply discipline must be honored
//! even on failure, or the caller deadlocks waiting on its REQ socket.

use std::collections::{HashMap, HashSet};

use log::{debug, warn};

use crate::{
  dissemination::{await_ack, DisseminationEngine, SubscriberRegisterOutcome},
  error::{BrokerError, BrokerResult},
  port_pool::PortPool,
  topic::{Topic, TopicIndex},
  transport::TransportMultiplexer,
  wire::{PublisherReply, PublisherRequest, RegisterSubReply, SubscriberRequest},
};

/// Tracks the union of topics a subscriber id has registered for (so a
/// disconnect request can be validated and a repeat registration can be
/// folded in when the same id registers again for more topics), plus its
/// decentralized-mode notify port, if any.
#[derive(Debug, Default)]
struct SubscriberRecord {
  topics: HashSet<Topic>,
  notify_port: Option<u16>,
}

#[derive(Default)]
pub struct RegistrationService {
  publishers: HashMap<String, HashSet<Topic>>,
  subscribers: HashMap<String, SubscriberRecord>,
}

impl RegistrationService {
  pub fn new() -> Self {
    Self::default()
  }

  /// Binds a REP socket at `tcp://<host>:<port>`, incrementing the port on
  /// `EADDRINUSE` until it succeeds: if the default port is occupied, the
  /// service increments the port and retries. Returns the bound socket and
  /// the port actually chosen.
  pub fn bind_registration_socket(
    context: &zmq::Context,
    host: &str,
    start_port: u16,
  ) -> BrokerResult<(zmq::Socket, u16)> {
    let mut port = start_port;
    loop {
      let socket = context.socket(zmq::REP)?;
      match socket.bind(&format!("tcp://{host}:{port}")) {
        Ok(()) => return Ok((socket, port)),
        Err(zmq::Error::EADDRINUSE) => {
          debug!("registration port {port} in use, trying {}", port + 1);
          port = port.checked_add(1).ok_or(BrokerError::PortsExhausted)?;
        }
        Err(e) => return Err(e.into()),
      }
    }
  }

  /// Handles one request on the publisher-registration endpoint. Never
  /// returns an error: every failure is folded into a `{"error": ...}`
  /// reply so the REP socket's discipline stays intact.
  pub fn handle_publisher_request(
    &mut self,
    body: &str,
    index: &mut TopicIndex,
    transport: &mut TransportMultiplexer,
    ports: &mut PortPool,
    engine: &mut DisseminationEngine,
  ) -> PublisherReply {
    match self.try_handle_publisher_request(body, index, transport, ports, engine) {
      Ok(reply) => reply,
      Err(e) => {
        warn!("publisher registration request failed: {e}");
        PublisherReply::error(e.to_string())
      }
    }
  }

  fn try_handle_publisher_request(
    &mut self,
    body: &str,
    index: &mut TopicIndex,
    transport: &mut TransportMultiplexer,
    ports: &mut PortPool,
    engine: &mut DisseminationEngine,
  ) -> BrokerResult<PublisherReply> {
    let request: PublisherRequest = serde_json::from_str(body)?;
    match request {
      PublisherRequest::Register { address, topics } => {
        if topics.is_empty() {
          return Err(BrokerError::MalformedRequest("topics must not be empty".to_string()));
        }
        let topics: Vec<Topic> = topics.into_iter().map(Topic::from).collect();
        engine.on_publisher_register(index, transport, ports, &address, &topics)?;
        let entry = self.publishers.entry(address.clone()).or_default();
        entry.extend(topics);
        debug!("publisher {address} registered for {:?}", entry);
        Ok(PublisherReply::success("registration success"))
      }
      PublisherRequest::Disconnect { disconnect } => {
        let registered = self.publishers.get(&disconnect.address).ok_or_else(|| {
          BrokerError::NotRegistered {
            what: "publisher",
            value: disconnect.address.clone(),
          }
        })?;
        let topics: Vec<Topic> = disconnect
          .topics
          .iter()
          .filter(|t| registered.contains(t.as_str()))
          .cloned()
          .map(Topic::from)
          .collect();
        engine.on_publisher_disconnect(index, transport, &disconnect.address, &topics)?;
        if let Some(entry) = self.publishers.get_mut(&disconnect.address) {
          for topic in &topics {
            entry.remove(topic);
          }
          if entry.is_empty() {
            self.publishers.remove(&disconnect.address);
          }
        }
        debug!("publisher {} disconnected from {:?}", disconnect.address, topics);
        Ok(PublisherReply::disconnect_success())
      }
    }
  }

  /// Handles one request on the subscriber-registration endpoint. Unlike
  /// publisher handling, this owns the REP `socket` directly: centralized
  /// registrations are a three-frame dialogue (port map, then a blocking
  /// wait for the subscriber's acknowledgment, then a final success
  /// reply), all on the same socket.
  pub fn handle_subscriber_request(
    &mut self,
    socket: &zmq::Socket,
    body: &str,
    index: &mut TopicIndex,
    transport: &mut TransportMultiplexer,
    ports: &mut PortPool,
    engine: &mut DisseminationEngine,
  ) -> BrokerResult<()> {
    match self.try_handle_subscriber_request(socket, body, index, transport, ports, engine) {
      Ok(()) => Ok(()),
      Err(e) => {
        warn!("subscriber registration request failed: {e}");
        let reply = serde_json::to_string(&PublisherReply::error(e.to_string()))?;
        socket.send(reply.as_str(), 0)?;
        Ok(())
      }
    }
  }

  fn try_handle_subscriber_request(
    &mut self,
    socket: &zmq::Socket,
    body: &str,
    index: &mut TopicIndex,
    transport: &mut TransportMultiplexer,
    ports: &mut PortPool,
    engine: &mut DisseminationEngine,
  ) -> BrokerResult<()> {
    let request: SubscriberRequest = serde_json::from_str(body)?;
    match request {
      SubscriberRequest::Register { id, address, topics } => {
        if topics.is_empty() {
          return Err(BrokerError::MalformedRequest("topics must not be empty".to_string()));
        }
        let topics: Vec<Topic> = topics.into_iter().map(Topic::from).collect();
        let outcome = engine.on_subscriber_register(index, transport, ports, &id, &address, &topics)?;

        match outcome {
          SubscriberRegisterOutcome::Centralized(port_map) => {
            let body = serde_json::to_string(&port_map)?;
            socket.send(body.as_str(), 0)?;
            let ack = await_ack(socket)?;
            debug!("subscriber {id} acknowledged centralized registration: {ack}");
            let reply = serde_json::to_string(&PublisherReply::success("registration complete"))?;
            socket.send(reply.as_str(), 0)?;
          }
          SubscriberRegisterOutcome::Decentralized { notify_port } => {
            let reply = serde_json::to_string(&RegisterSubReply::new(notify_port))?;
            socket.send(reply.as_str(), 0)?;
            self
              .subscribers
              .entry(id.clone())
              .or_default()
              .notify_port = Some(notify_port);
          }
        }

        let record = self.subscribers.entry(id.clone()).or_default();
        record.topics.extend(topics);
        debug!("subscriber {id} registered for {:?}", record.topics);
        Ok(())
      }
      SubscriberRequest::Disconnect { disconnect } => {
        let record = self
          .subscribers
          .get(&disconnect.id)
          .ok_or_else(|| BrokerError::NotRegistered {
            what: "subscriber",
            value: disconnect.id.clone(),
          })?;
        let topics: Vec<Topic> = disconnect
          .topics
          .iter()
          .filter(|t| record.topics.contains(t.as_str()))
          .cloned()
          .map(Topic::from)
          .collect();
        let notify_port = disconnect.notify_port.or(record.notify_port);

        engine.on_subscriber_disconnect(
          index,
          transport,
          ports,
          &disconnect.id,
          &disconnect.address,
          &topics,
          notify_port,
        )?;

        if let Some(record) = self.subscribers.get_mut(&disconnect.id) {
          for topic in &topics {
            record.topics.remove(topic);
          }
          if record.topics.is_empty() {
            self.subscribers.remove(&disconnect.id);
          }
        }
        debug!("subscriber {} disconnected from {:?}", disconnect.id, topics);

        let reply = serde_json::to_string(&PublisherReply::disconnect_success())?;
        socket.send(reply.as_str(), 0)?;
        Ok(())
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn publisher_register_requires_nonempty_topics() {
    let mut svc = RegistrationService::new();
    let mut index = TopicIndex::new();
    let mut transport = TransportMultiplexer::new();
    let mut ports = PortPool::new();
    let mut engine = DisseminationEngine::new(
      crate::dissemination::Mode::Centralized,
      "127.0.0.1".to_string(),
      zmq::Context::new(),
    );
    let reply = svc.handle_publisher_request(
      r#"{"address":"127.0.0.1:1","topics":[]}"#,
      &mut index,
      &mut transport,
      &mut ports,
      &mut engine,
    );
    match reply {
      PublisherReply::Error { error } => assert!(error.contains("topics")),
      other => panic!("expected error reply, got {other:?}"),
    }
  }

  #[test]
  fn publisher_disconnect_unknown_address_errors() {
    let mut svc = RegistrationService::new();
    let mut index = TopicIndex::new();
    let mut transport = TransportMultiplexer::new();
    let mut ports = PortPool::new();
    let mut engine = DisseminationEngine::new(
      crate::dissemination::Mode::Centralized,
      "127.0.0.1".to_string(),
      zmq::Context::new(),
    );
    let reply = svc.handle_publisher_request(
      r#"{"disconnect":{"address":"127.0.0.1:1","topics":["A"]}}"#,
      &mut index,
      &mut transport,
      &mut ports,
      &mut engine,
    );
    match reply {
      PublisherReply::Error { .. } => {}
      other => panic!("expected error reply, got {other:?}"),
    }
  }
}
