//! Integration tests exercising the registration + dissemination stack
//! over real loopback `zmq` sockets. These drive
//! `RegistrationService`/`DisseminationEngine`/`TransportMultiplexer`
//! directly rather than through `Broker::run`, since the full broker
//! additionally requires a live coordination store (ZooKeeper) for leader
//! election, which is out of scope for these component-level checks.

use std::thread;
use std::time::Duration;

use pubsub_broker::dissemination::{DisseminationEngine, Mode, SubscriberRegisterOutcome};
use pubsub_broker::port_pool::PortPool;
use pubsub_broker::registration::RegistrationService;
use pubsub_broker::topic::{Topic, TopicIndex};
use pubsub_broker::transport::{SocketId, TransportMultiplexer};
use pubsub_broker::wire::PublisherReply;

/// Centralized single path end to end: registration, topic filtering by
/// construction (only topic `A` ever gets an egress binding), forwarding,
/// and disconnect cleanup returning the egress port to the pool.
#[test]
fn centralized_registration_forwarding_and_disconnect() {
  let own_host = "127.0.0.1";
  let mut transport = TransportMultiplexer::new();
  let mut index = TopicIndex::new();
  let mut ports = PortPool::new();
  let mut engine = DisseminationEngine::new(Mode::Centralized, own_host.to_string(), transport.context().clone());
  let mut registration = RegistrationService::new();

  // A real bound PUB endpoint stands in for publisher P1.
  let p1_socket = transport.context().socket(zmq::PUB).unwrap();
  p1_socket.bind("tcp://127.0.0.1:*").unwrap();
  let p1_endpoint = p1_socket.get_last_endpoint().unwrap().unwrap();
  let p1_address = p1_endpoint.trim_start_matches("tcp://").to_string();

  let reply = registration.handle_publisher_request(
    &format!(r#"{{"address":"{p1_address}","topics":["A"]}}"#),
    &mut index,
    &mut transport,
    &mut ports,
    &mut engine,
  );
  assert!(matches!(reply, PublisherReply::Success { .. }));

  let (sub_reg_socket, sub_reg_port) =
    RegistrationService::bind_registration_socket(transport.context(), own_host, 15556).unwrap();

  // Drive the three-frame centralized subscriber-registration dialogue
  // from a second thread playing the subscriber, while the test thread
  // plays the broker side via `handle_subscriber_request`.
  let subscriber_thread = thread::spawn({
    let context = transport.context().clone();
    move || {
      let client = context.socket(zmq::REQ).unwrap();
      client.connect(&format!("tcp://127.0.0.1:{sub_reg_port}")).unwrap();
      client
        .send(r#"{"id":"u1","address":"127.0.0.1:0","topics":["A"]}"#, 0)
        .unwrap();

      let port_map: serde_json::Value =
        serde_json::from_str(&client.recv_string(0).unwrap().unwrap()).unwrap();
      let egress_port = port_map["A"].as_u64().unwrap() as u16;

      client.send("ack", 0).unwrap();
      let final_reply: serde_json::Value =
        serde_json::from_str(&client.recv_string(0).unwrap().unwrap()).unwrap();
      assert_eq!(final_reply["success"], "registration complete");
      egress_port
    }
  });

  let body = sub_reg_socket.recv_string(0).unwrap().unwrap();
  registration
    .handle_subscriber_request(&sub_reg_socket, &body, &mut index, &mut transport, &mut ports, &mut engine)
    .unwrap();

  let egress_port = subscriber_thread.join().unwrap();
  assert!((10000..=20000).contains(&egress_port));

  let subscriber = transport.context().socket(zmq::SUB).unwrap();
  subscriber.connect(&format!("tcp://{own_host}:{egress_port}")).unwrap();
  subscriber.set_subscribe(b"A").unwrap();
  // SUB sockets are "slow joiners": give the connection a moment to
  // complete before the publisher sends.
  thread::sleep(Duration::from_millis(200));

  p1_socket.send_multipart(["A".as_bytes(), b"x1"], 0).unwrap();

  let ready = transport.poll(Some(2000)).unwrap();
  assert!(ready.contains(&SocketId::Ingress(Topic::from("A"))));
  engine.on_ingress_ready(&transport, &Topic::from("A")).unwrap();

  let frames = subscriber.recv_multipart(0).unwrap();
  assert_eq!(frames, vec![b"A".to_vec(), b"x1".to_vec()]);

  // Disconnecting the only subscriber of A releases its port.
  engine
    .on_subscriber_disconnect(
      &mut index,
      &mut transport,
      &mut ports,
      "u1",
      "127.0.0.1:0",
      &[Topic::from("A")],
      None,
    )
    .unwrap();
  assert!(!ports.is_claimed(egress_port));
}

/// A malformed request gets a structured error reply and the
/// endpoint keeps serving afterward.
#[test]
fn malformed_publisher_request_is_recovered() {
  let mut index = TopicIndex::new();
  let mut transport = TransportMultiplexer::new();
  let mut ports = PortPool::new();
  let mut engine = DisseminationEngine::new(
    Mode::Centralized,
    "127.0.0.1".to_string(),
    transport.context().clone(),
  );
  let mut registration = RegistrationService::new();

  let reply = registration.handle_publisher_request("{}", &mut index, &mut transport, &mut ports, &mut engine);
  assert!(matches!(reply, PublisherReply::Error { .. }));

  let reply = registration.handle_publisher_request(
    r#"{"address":"127.0.0.1:9","topics":["A"]}"#,
    &mut index,
    &mut transport,
    &mut ports,
    &mut engine,
  );
  assert!(matches!(reply, PublisherReply::Success { .. }));
}

/// Decentralized notification on subscriber registration,
/// then on a subsequent publisher registration.
#[test]
fn decentralized_notifies_subscriber_of_new_publisher() {
  let context = zmq::Context::new();
  let mut index = TopicIndex::new();
  let mut ports = PortPool::new();
  let mut transport = TransportMultiplexer::new();
  let mut engine = DisseminationEngine::new(Mode::Decentralized, "127.0.0.1".to_string(), context.clone());

  let outcome = engine
    .on_subscriber_register(
      &mut index,
      &mut transport,
      &mut ports,
      "u1",
      "127.0.0.1:0",
      &[Topic::from("A")],
    )
    .unwrap();
  let notify_port = match outcome {
    SubscriberRegisterOutcome::Decentralized { notify_port } => notify_port,
    _ => panic!("expected decentralized outcome"),
  };

  let subscriber_notify = context.socket(zmq::REP).unwrap();
  subscriber_notify
    .connect(&format!("tcp://127.0.0.1:{notify_port}"))
    .unwrap();

  let first: serde_json::Value =
    serde_json::from_str(&subscriber_notify.recv_string(0).unwrap().unwrap()).unwrap();
  assert_eq!(first[0]["register_pub"]["topic"], "A");
  assert_eq!(first[0]["register_pub"]["addresses"].as_array().unwrap().len(), 0);
  subscriber_notify.send("ack", 0).unwrap();

  engine
    .on_publisher_register(
      &mut index,
      &mut transport,
      &mut ports,
      "127.0.0.1:10500",
      &[Topic::from("A"), Topic::from("B")],
    )
    .unwrap();

  let second: serde_json::Value =
    serde_json::from_str(&subscriber_notify.recv_string(0).unwrap().unwrap()).unwrap();
  assert_eq!(second[0]["register_pub"]["topic"], "A");
  assert_eq!(second[0]["register_pub"]["addresses"][0], "127.0.0.1:10500");
  subscriber_notify.send("ack", 0).unwrap();
}
