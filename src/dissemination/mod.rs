//! Dissemination Engine: the mode-specific delivery core the broker
//! dispatches into.
//!
//! Mode polymorphism is expressed as a tagged-variant enum with two
//! concrete implementations behind one interface. The broker shell never
//! branches on mode itself; it only calls through [`DisseminationEngine`].

pub mod centralized;
pub mod decentralized;

use zmq::Socket;

use crate::{
  error::BrokerResult,
  port_pool::PortPool,
  topic::{Topic, TopicIndex},
  transport::TransportMultiplexer,
};

/// Selected at broker construction; never changes for the broker's
/// lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
  Centralized,
  Decentralized,
}

/// Outcome of a subscriber registration, used by `registration.rs` to
/// build the wire reply. The two modes reply with structurally different
/// JSON, so this is the one place that difference surfaces outside the
/// engine implementations.
pub enum SubscriberRegisterOutcome {
  /// Centralized: `Topic -> egress port` map, sent, then the caller must
  /// still read the subscriber's acknowledgment and send a final
  /// success reply.
  Centralized(std::collections::BTreeMap<String, u16>),
  /// Decentralized: the notify port, already announced to the
  /// subscriber's dedicated notify endpoint by the time this returns.
  Decentralized { notify_port: u16 },
}

/// One mode-parameterized delivery core behind a single interface.
/// `Broker` only ever calls through this enum; it never branches on the
/// mode itself.
pub enum DisseminationEngine {
  Centralized(centralized::CentralizedEngine),
  Decentralized(decentralized::DecentralizedEngine),
}

impl DisseminationEngine {
  pub fn new(mode: Mode, own_host: String, context: zmq::Context) -> Self {
    match mode {
      Mode::Centralized => DisseminationEngine::Centralized(centralized::CentralizedEngine::new(own_host)),
      Mode::Decentralized => {
        DisseminationEngine::Decentralized(decentralized::DecentralizedEngine::new(context))
      }
    }
  }

  pub fn mode(&self) -> Mode {
    match self {
      DisseminationEngine::Centralized(_) => Mode::Centralized,
      DisseminationEngine::Decentralized(_) => Mode::Decentralized,
    }
  }

  /// Publisher `address` has just registered for `topics`. Updates
  /// `index` and materializes whatever sockets the mode requires.
  pub fn on_publisher_register(
    &mut self,
    index: &mut TopicIndex,
    transport: &mut TransportMultiplexer,
    ports: &mut PortPool,
    address: &str,
    topics: &[Topic],
  ) -> BrokerResult<()> {
    match self {
      DisseminationEngine::Centralized(e) => {
        e.on_publisher_register(index, transport, address, topics)
      }
      DisseminationEngine::Decentralized(e) => {
        e.on_publisher_register(index, ports, address, topics)
      }
    }
  }

  /// Subscriber registers for `topics`. Returns the reply payload for
  /// the registration endpoint.
  #[allow(clippy::too_many_arguments)]
  pub fn on_subscriber_register(
    &mut self,
    index: &mut TopicIndex,
    transport: &mut TransportMultiplexer,
    ports: &mut PortPool,
    id: &str,
    address: &str,
    topics: &[Topic],
  ) -> BrokerResult<SubscriberRegisterOutcome> {
    match self {
      DisseminationEngine::Centralized(e) => {
        e.on_subscriber_register(index, transport, ports, address, topics)
      }
      DisseminationEngine::Decentralized(e) => e.on_subscriber_register(index, ports, id, address, topics),
    }
  }

  /// A registered ingress socket (centralized mode only) is readable;
  /// forward its frame to the matching egress binding, if any.
  pub fn on_ingress_ready(&mut self, transport: &TransportMultiplexer, topic: &Topic) -> BrokerResult<()> {
    match self {
      DisseminationEngine::Centralized(e) => e.on_ingress_ready(transport, topic),
      DisseminationEngine::Decentralized(_) => Ok(()),
    }
  }

  pub fn on_publisher_disconnect(
    &mut self,
    index: &mut TopicIndex,
    transport: &mut TransportMultiplexer,
    address: &str,
    topics: &[Topic],
  ) -> BrokerResult<()> {
    match self {
      DisseminationEngine::Centralized(e) => e.on_publisher_disconnect(index, transport, address, topics),
      DisseminationEngine::Decentralized(e) => e.on_publisher_disconnect(index, address, topics),
    }
  }

  pub fn on_subscriber_disconnect(
    &mut self,
    index: &mut TopicIndex,
    transport: &mut TransportMultiplexer,
    ports: &mut PortPool,
    id: &str,
    address: &str,
    topics: &[Topic],
    notify_port: Option<u16>,
  ) -> BrokerResult<()> {
    match self {
      DisseminationEngine::Centralized(e) => {
        e.on_subscriber_disconnect(index, transport, ports, address, topics)
      }
      DisseminationEngine::Decentralized(e) => {
        e.on_subscriber_disconnect(index, ports, id, address, topics, notify_port)
      }
    }
  }
}

/// Registration/notification acknowledgment helper shared by both
/// centralized (subscriber-ack) and decentralized (notify-ack) flows:
/// read one string frame with no deadline, by design (see DESIGN.md's
/// open question on acknowledgment timeouts).
pub(crate) fn await_ack(socket: &Socket) -> BrokerResult<String> {
  Ok(socket.recv_string(0)?.unwrap_or_default())
}
