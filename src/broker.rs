//! Broker state machine and event loop.
//!
//! `Uninit -> Electing -> Configuring -> Running -> Draining -> Closed`.
//! One thread, one `poll()` outstanding at a time, fixed dispatch order.
//! The indefinite-vs-bounded event loop split lives in
//! [`crate::config::EventLoopBound`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{error, info};
use uuid::Uuid;

use crate::{
  config::{BrokerConfig, EventLoopBound},
  dissemination::DisseminationEngine,
  error::BrokerResult,
  port_pool::PortPool,
  presence::{ContactRecord, PresenceRegistry},
  registration::RegistrationService,
  topic::{Topic, TopicIndex},
  transport::{SocketId, TransportMultiplexer},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerState {
  Uninit,
  Electing,
  Configuring,
  Running,
  Draining,
  Closed,
}

/// A shared, cloneable flag an external caller can set to request a clean
/// shutdown: the loop responds by exiting after the current iteration.
#[derive(Clone, Default)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn signal(&self) {
    self.0.store(true, Ordering::SeqCst);
  }

  fn is_set(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }
}

pub struct Broker {
  state: BrokerState,
  config: BrokerConfig,
  transport: TransportMultiplexer,
  ports: PortPool,
  index: TopicIndex,
  engine: DisseminationEngine,
  registration: RegistrationService,
  presence: Option<PresenceRegistry>,
  shutdown: ShutdownHandle,
}

impl Broker {
  /// Constructs a broker in state `Uninit`. The transport context is
  /// created here (not deferred to `Configuring`) because the
  /// decentralized dissemination engine needs its own handle to the same
  /// context up front.
  pub fn new(config: BrokerConfig) -> Self {
    let transport = TransportMultiplexer::new();
    let engine = DisseminationEngine::new(config.mode, config.own_host.clone(), transport.context().clone());
    Broker {
      state: BrokerState::Uninit,
      config,
      transport,
      ports: PortPool::new(),
      index: TopicIndex::new(),
      engine,
      registration: RegistrationService::new(),
      presence: None,
      shutdown: ShutdownHandle::new(),
    }
  }

  pub fn state(&self) -> BrokerState {
    self.state
  }

  pub fn shutdown_handle(&self) -> ShutdownHandle {
    self.shutdown.clone()
  }

  /// Runs the broker to completion: election, configuration, the event
  /// loop (bounded or indefinite per `config.event_loop_bound`), then
  /// drain and close. Returns once `Closed`.
  pub fn run(mut self) -> BrokerResult<()> {
    self.elect()?;
    self.configure()?;
    self.serve()?;
    self.drain_and_close()
  }

  fn elect(&mut self) -> BrokerResult<()> {
    self.state = BrokerState::Electing;
    let registry = PresenceRegistry::connect(&self.config)?;
    let candidate_id = Uuid::new_v4().to_string();
    let contact = ContactRecord {
      host: self.config.own_host.clone(),
      pub_reg_port: self.config.pub_reg_port,
      sub_reg_port: self.config.sub_reg_port,
    };
    info!("entering election as candidate {candidate_id}");
    registry.join(&candidate_id, &contact)?;
    self.presence = Some(registry);
    Ok(())
  }

  fn configure(&mut self) -> BrokerResult<()> {
    self.state = BrokerState::Configuring;

    let (pub_reg_socket, pub_reg_port) = RegistrationService::bind_registration_socket(
      self.transport.context(),
      &self.config.own_host,
      self.config.pub_reg_port,
    )?;
    self.config.pub_reg_port = pub_reg_port;
    self.ports.reserve(pub_reg_port);
    self.transport.register(SocketId::PublisherRegistration, pub_reg_socket, true);

    let (sub_reg_socket, sub_reg_port) = RegistrationService::bind_registration_socket(
      self.transport.context(),
      &self.config.own_host,
      self.config.sub_reg_port,
    )?;
    self.config.sub_reg_port = sub_reg_port;
    self.ports.reserve(sub_reg_port);
    self.transport.register(SocketId::SubscriberRegistration, sub_reg_socket, true);

    info!(
      "configured registration endpoints: pub={} sub={}",
      pub_reg_port, sub_reg_port
    );
    Ok(())
  }

  fn serve(&mut self) -> BrokerResult<()> {
    self.state = BrokerState::Running;
    match self.config.event_loop_bound {
      EventLoopBound::Indefinite => loop {
        if self.shutdown.is_set() {
          info!("shutdown signal observed, leaving Running");
          break;
        }
        self.run_one_iteration()?;
      },
      EventLoopBound::MaxEvents(n) => {
        for _ in 0..n {
          if self.shutdown.is_set() {
            break;
          }
          self.run_one_iteration()?;
        }
      }
    }
    Ok(())
  }

  /// One pass: `poll()`, then dispatch every ready socket in registration
  /// order: publisher-registration, subscriber-registration, then each
  /// ingress topic in the order its binding was created. `TransportMultiplexer`
  /// preserves that order across `poll()`, and `with_registration_socket`
  /// re-inserts a registration socket at its original position after a
  /// temporary unregister, so it never drifts behind sockets appended
  /// while a registration request was being handled.
  fn run_one_iteration(&mut self) -> BrokerResult<()> {
    let ready = self.transport.poll(None)?;
    for id in ready {
      match id {
        SocketId::PublisherRegistration => self.dispatch_publisher_registration()?,
        SocketId::SubscriberRegistration => self.dispatch_subscriber_registration()?,
        SocketId::Ingress(topic) => self.dispatch_ingress(&topic)?,
      }
    }
    Ok(())
  }

  /// Temporarily takes the socket registered under `id` out of the
  /// multiplexer so it can be used (recv/send) at the same time the
  /// multiplexer itself is passed mutably into dissemination-engine calls
  /// (e.g. binding a new egress socket), then puts it back at its original
  /// position. Avoids a borrow conflict without relying on `zmq::Socket`
  /// being cloneable, and preserves the fixed dispatch order: `f` may
  /// append new ingress sockets to the multiplexer, so re-registering at
  /// the tail would otherwise reorder this socket behind them.
  fn with_registration_socket<T>(
    &mut self,
    id: SocketId,
    f: impl FnOnce(&mut Self, &zmq::Socket) -> BrokerResult<T>,
  ) -> BrokerResult<T> {
    let index = self
      .transport
      .position(&id)
      .expect("registration socket must stay registered while Running");
    let socket = self
      .transport
      .unregister(&id)
      .expect("registration socket must stay registered while Running");
    let result = f(self, &socket);
    self.transport.reinsert(index, id, socket);
    result
  }

  fn dispatch_publisher_registration(&mut self) -> BrokerResult<()> {
    self.with_registration_socket(SocketId::PublisherRegistration, |broker, socket| {
      let body = socket
        .recv_string(0)?
        .map_err(|_| crate::error::BrokerError::MalformedRequest("non-UTF-8 request".to_string()))?;
      let reply = broker.registration.handle_publisher_request(
        &body,
        &mut broker.index,
        &mut broker.transport,
        &mut broker.ports,
        &mut broker.engine,
      );
      let encoded = serde_json::to_string(&reply)?;
      socket.send(encoded.as_str(), 0)?;
      Ok(())
    })
  }

  fn dispatch_subscriber_registration(&mut self) -> BrokerResult<()> {
    self.with_registration_socket(SocketId::SubscriberRegistration, |broker, socket| {
      let body = socket
        .recv_string(0)?
        .map_err(|_| crate::error::BrokerError::MalformedRequest("non-UTF-8 request".to_string()))?;
      // `handle_subscriber_request` owns the reply dialogue (it may send
      // more than one frame for a centralized registration), so it takes
      // the socket directly rather than returning a value to send here.
      broker.registration.handle_subscriber_request(
        socket,
        &body,
        &mut broker.index,
        &mut broker.transport,
        &mut broker.ports,
        &mut broker.engine,
      )
    })
  }

  fn dispatch_ingress(&mut self, topic: &Topic) -> BrokerResult<()> {
    self.engine.on_ingress_ready(&self.transport, topic)
  }

  fn drain_and_close(mut self) -> BrokerResult<()> {
    self.state = BrokerState::Draining;
    info!("draining: closing registration endpoints");
    self.transport.unregister(&SocketId::PublisherRegistration);
    self.transport.unregister(&SocketId::SubscriberRegistration);

    if let Some(presence) = self.presence.take() {
      if let Err(e) = presence.close() {
        error!("error closing presence registry: {e}");
      }
    }

    self.state = BrokerState::Closed;
    self.transport.shutdown();
    info!("broker closed");
    Ok(())
  }
}
