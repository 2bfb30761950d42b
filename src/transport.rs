//! Transport Multiplexer.
//!
//! Owns the single `zmq::Context` and a readiness poller over a dynamic,
//! topic-keyed set of sockets. Only sockets that are ever polled for
//! readability are registered here: the two registration REP sockets, and
//! (centralized mode only) one SUB socket per topic with at least one
//! publisher. Egress PUB sockets are write-only and decentralized notify
//! REQ sockets are driven synchronously inside registration handlers, so
//! neither is ever registered with the poller.

use log::{debug, error};

use crate::{error::BrokerResult, topic::Topic};

/// Identifies a registered socket. Order of registration is the dispatch
/// order required: publisher-registration, subscriber-registration, then
/// each ingress topic socket in the order its binding was created.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SocketId {
  PublisherRegistration,
  SubscriberRegistration,
  Ingress(Topic),
}

struct Registered {
  id: SocketId,
  socket: zmq::Socket,
}

/// Owns the ZMQ context and the poll set. `register`/`unregister`/`poll`
/// are a direct typed transcription of the multiplexer's contract.
pub struct TransportMultiplexer {
  context: zmq::Context,
  sockets: Vec<Registered>,
}

impl TransportMultiplexer {
  pub fn new() -> Self {
    TransportMultiplexer {
      context: zmq::Context::new(),
      sockets: Vec::new(),
    }
  }

  pub fn context(&self) -> &zmq::Context {
    &self.context
  }

  /// Adds `socket` to the poll set under `id`. `readable` is accepted for
  /// contract parity but every socket registered here is always polled for
  /// `POLLIN`; there is no write-readiness use case in this broker.
  pub fn register(&mut self, id: SocketId, socket: zmq::Socket, readable: bool) {
    debug_assert!(readable, "transport multiplexer only polls for POLLIN");
    debug!("registering socket {id:?} with multiplexer");
    self.sockets.push(Registered { id, socket });
  }

  /// Removes the socket registered under `id`, if any, and returns it so
  /// the caller can close it.
  pub fn unregister(&mut self, id: &SocketId) -> Option<zmq::Socket> {
    let pos = self.sockets.iter().position(|r| &r.id == id)?;
    debug!("unregistering socket {id:?} from multiplexer");
    Some(self.sockets.remove(pos).socket)
  }

  /// The socket's current position in the poll set, if registered. Used to
  /// round-trip a socket through a temporary `unregister` without losing
  /// its place in the fixed dispatch order.
  pub fn position(&self, id: &SocketId) -> Option<usize> {
    self.sockets.iter().position(|r| &r.id == id)
  }

  /// Re-registers `socket` under `id` at `index` instead of appending it at
  /// the tail, so a socket temporarily taken out via `unregister` can be put
  /// back in its original dispatch position. `index` is clamped to the
  /// current length.
  pub fn reinsert(&mut self, index: usize, id: SocketId, socket: zmq::Socket) {
    let index = index.min(self.sockets.len());
    debug!("re-registering socket {id:?} with multiplexer at position {index}");
    self.sockets.insert(index, Registered { id, socket });
  }

  pub fn socket(&self, id: &SocketId) -> Option<&zmq::Socket> {
    self.sockets.iter().find(|r| &r.id == id).map(|r| &r.socket)
  }

  /// Blocks until at least one registered socket is readable (or
  /// `timeout_ms` elapses, if given — `None` blocks indefinitely), then
  /// returns the ready socket ids in registration order, matching the
  /// fixed dispatch order the broker requires.
  pub fn poll(&self, timeout_ms: Option<i64>) -> BrokerResult<Vec<SocketId>> {
    let mut items: Vec<zmq::PollItem> = self
      .sockets
      .iter()
      .map(|r| r.socket.as_poll_item(zmq::POLLIN))
      .collect();

    let rc = zmq::poll(&mut items, timeout_ms.unwrap_or(-1));
    match rc {
      Ok(_) => {}
      Err(e) => {
        error!("poll() failed: {e}");
        return Err(e.into());
      }
    }

    let ready = self
      .sockets
      .iter()
      .zip(items.iter())
      .filter(|(_, item)| item.is_readable())
      .map(|(r, _)| r.id.clone())
      .collect();
    Ok(ready)
  }

  /// Destroys the context, which transitively closes every socket still
  /// registered: closing the context transitively closes every socket.
  pub fn shutdown(mut self) {
    self.sockets.clear();
    // zmq::Context drops (and terminates) here.
  }
}

impl Default for TransportMultiplexer {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn register_and_unregister_round_trip() {
    let mut tm = TransportMultiplexer::new();
    let socket = tm.context().socket(zmq::REP).unwrap();
    socket.bind("tcp://127.0.0.1:*").unwrap();
    tm.register(SocketId::PublisherRegistration, socket, true);
    assert!(tm.socket(&SocketId::PublisherRegistration).is_some());
    assert!(tm.unregister(&SocketId::PublisherRegistration).is_some());
    assert!(tm.socket(&SocketId::PublisherRegistration).is_none());
  }

  #[test]
  fn poll_reports_readable_registration_socket() {
    let mut tm = TransportMultiplexer::new();
    let rep = tm.context().socket(zmq::REP).unwrap();
    rep.bind("tcp://127.0.0.1:*").unwrap();
    let endpoint = rep.get_last_endpoint().unwrap().unwrap();
    tm.register(SocketId::PublisherRegistration, rep, true);

    let req = tm.context().socket(zmq::REQ).unwrap();
    req.connect(&endpoint).unwrap();
    req.send("ping", 0).unwrap();

    let ready = tm.poll(Some(2000)).unwrap();
    assert_eq!(ready, vec![SocketId::PublisherRegistration]);
  }

  #[test]
  fn dispatch_order_is_registration_order() {
    let mut tm = TransportMultiplexer::new();
    let pub_reg = tm.context().socket(zmq::REP).unwrap();
    pub_reg.bind("tcp://127.0.0.1:*").unwrap();
    let pub_reg_endpoint = pub_reg.get_last_endpoint().unwrap().unwrap();
    tm.register(SocketId::PublisherRegistration, pub_reg, true);

    let sub_reg = tm.context().socket(zmq::REP).unwrap();
    sub_reg.bind("tcp://127.0.0.1:*").unwrap();
    let sub_reg_endpoint = sub_reg.get_last_endpoint().unwrap().unwrap();
    tm.register(SocketId::SubscriberRegistration, sub_reg, true);

    let req_a = tm.context().socket(zmq::REQ).unwrap();
    req_a.connect(&sub_reg_endpoint).unwrap();
    req_a.send("a", 0).unwrap();

    let req_b = tm.context().socket(zmq::REQ).unwrap();
    req_b.connect(&pub_reg_endpoint).unwrap();
    req_b.send("b", 0).unwrap();

    let ready = tm.poll(Some(2000)).unwrap();
    assert_eq!(
      ready,
      vec![SocketId::PublisherRegistration, SocketId::SubscriberRegistration]
    );
  }
}
