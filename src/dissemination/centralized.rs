//! Centralized dissemination: every payload routes through the broker.
//!
//! Every event passes through the broker: one SUB ingress per topic with a
//! publisher, connected to every publisher of that topic; one PUB egress
//! per topic with a subscriber, bound to a dynamic port. Frames are
//! forwarded verbatim, unparsed, preserving per-publisher order because
//! each ingress is read and re-sent on the single broker thread.

use std::collections::{BTreeMap, HashMap, HashSet};

use log::debug;

use crate::{
  error::BrokerResult,
  port_pool::PortPool,
  topic::{Topic, TopicIndex},
  transport::{SocketId, TransportMultiplexer},
};

use super::SubscriberRegisterOutcome;

/// Per-topic SUB endpoint the broker reads publisher frames from. The
/// socket itself lives in the `TransportMultiplexer` (it is polled there);
/// this only tracks which publishers it is already connected to.
struct IngressBinding {
  connected_publishers: HashSet<String>,
}

/// Per-topic PUB endpoint subscribers connect to.
struct EgressBinding {
  port: u16,
  socket: zmq::Socket,
}

pub struct CentralizedEngine {
  own_host: String,
  ingress: HashMap<Topic, IngressBinding>,
  egress: HashMap<Topic, EgressBinding>,
}

impl CentralizedEngine {
  pub fn new(own_host: String) -> Self {
    CentralizedEngine {
      own_host,
      ingress: HashMap::new(),
      egress: HashMap::new(),
    }
  }

  pub fn on_publisher_register(
    &mut self,
    index: &mut TopicIndex,
    transport: &mut TransportMultiplexer,
    address: &str,
    topics: &[Topic],
  ) -> BrokerResult<()> {
    for topic in topics {
      index.add_publisher(topic, address);

      if !self.ingress.contains_key(topic) {
        let socket = transport.context().socket(zmq::SUB)?;
        socket.set_subscribe(topic.as_str().as_bytes())?;
        transport.register(SocketId::Ingress(topic.clone()), socket, true);
        debug!("created ingress binding for topic {topic}");
        self.ingress.insert(
          topic.clone(),
          IngressBinding {
            connected_publishers: HashSet::new(),
          },
        );
      }

      let binding = self
        .ingress
        .get_mut(topic)
        .expect("ingress binding just ensured above");
      if binding.connected_publishers.insert(address.to_string()) {
        let socket = transport
          .socket(&SocketId::Ingress(topic.clone()))
          .expect("ingress binding just ensured above");
        socket.connect(&format!("tcp://{address}"))?;
        debug!("ingress for topic {topic} connected to publisher {address}");
      }
    }
    Ok(())
  }

  pub fn on_subscriber_register(
    &mut self,
    index: &mut TopicIndex,
    transport: &mut TransportMultiplexer,
    ports: &mut PortPool,
    address: &str,
    topics: &[Topic],
  ) -> BrokerResult<SubscriberRegisterOutcome> {
    let mut reply = BTreeMap::new();
    for topic in topics {
      index.add_subscriber(topic, address);

      if !self.egress.contains_key(topic) {
        let port = ports.allocate()?;
        let socket = transport.context().socket(zmq::PUB)?;
        socket.bind(&format!("tcp://{}:{port}", self.own_host))?;
        debug!("created egress binding for topic {topic} on port {port}");
        self.egress.insert(topic.clone(), EgressBinding { port, socket });
      }

      let port = self
        .egress
        .get(topic)
        .expect("egress binding just ensured above")
        .port;
      reply.insert(topic.to_string(), port);
    }
    Ok(SubscriberRegisterOutcome::Centralized(reply))
  }

  /// The ingress socket for `topic` is readable; receive the two-frame
  /// `[topic, payload]` message and forward it verbatim to the egress
  /// binding for `topic`, if one exists.
  pub fn on_ingress_ready(&mut self, transport: &TransportMultiplexer, topic: &Topic) -> BrokerResult<()> {
    let ingress = transport
      .socket(&SocketId::Ingress(topic.clone()))
      .expect("ingress readiness event for an unregistered socket");

    let frames = ingress.recv_multipart(0)?;
    let Some(egress) = self.egress.get(topic) else {
      debug!("dropping frame for topic {topic}: no egress binding");
      return Ok(());
    };

    let mut iter = frames.into_iter().peekable();
    while let Some(frame) = iter.next() {
      let more = iter.peek().is_some();
      egress
        .socket
        .send(frame, if more { zmq::SNDMORE } else { 0 })?;
    }
    Ok(())
  }

  pub fn on_publisher_disconnect(
    &mut self,
    index: &mut TopicIndex,
    transport: &mut TransportMultiplexer,
    address: &str,
    topics: &[Topic],
  ) -> BrokerResult<()> {
    for topic in topics {
      let last = index.remove_publisher(topic, address);
      if let Some(binding) = self.ingress.get_mut(topic) {
        binding.connected_publishers.remove(address);
      }
      if last {
        if let Some(socket) = transport.unregister(&SocketId::Ingress(topic.clone())) {
          drop(socket);
        }
        self.ingress.remove(topic);
        debug!("closed ingress binding for topic {topic}");
      } else if let Some(socket) = transport.socket(&SocketId::Ingress(topic.clone())) {
        socket.disconnect(&format!("tcp://{address}"))?;
        debug!("ingress for topic {topic} disconnected from publisher {address}");
      }
    }
    Ok(())
  }

  pub fn on_subscriber_disconnect(
    &mut self,
    index: &mut TopicIndex,
    _transport: &mut TransportMultiplexer,
    ports: &mut PortPool,
    address: &str,
    topics: &[Topic],
  ) -> BrokerResult<()> {
    for topic in topics {
      let last = index.remove_subscriber(topic, address);
      if last {
        if let Some(binding) = self.egress.remove(topic) {
          drop(binding.socket);
          ports.release(binding.port);
          debug!("closed egress binding for topic {topic}, released port {}", binding.port);
        }
      }
    }
    Ok(())
  }
}
