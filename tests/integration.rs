//! Integration tests for amqp-engine.
//!
//! Two engines are wired back to back: whatever one writes is ingested by
//! the other until neither has anything left to say.

use amqp_engine::sasl::{SaslClientContext, SaslClientListener, SaslServerContext, SaslServerListener, SaslState};
use amqp_engine::types::{
    conditions, Declared, DeliveryState, ErrorCondition, SaslCode, Symbol, TransactionalState,
};
use amqp_engine::{
    DeliveryId, Endpoint, Engine, EngineConfig, EngineError, EndpointState, Event, LinkId,
    SendRequest,
};
use bytes::Bytes;

/// Auto-open whatever the peer opens and answer a remote connection close.
fn answer(engine: &mut Engine, event: &Event) {
    match event {
        Event::RemoteOpen(Endpoint::Session(id)) => {
            if engine.session(*id).map(|s| s.local_state()) == Some(EndpointState::Idle) {
                engine.open_session(*id).unwrap();
            }
        }
        Event::RemoteOpen(Endpoint::Link(link)) => {
            if engine.link(*link).map(|l| l.local_state()) == Some(EndpointState::Idle) {
                engine.open_link(*link).unwrap();
            }
        }
        Event::RemoteClose {
            endpoint: Endpoint::Connection,
            ..
        } => {
            if !engine.is_shutdown() {
                engine.close(None).unwrap();
            }
        }
        _ => {}
    }
}

fn drain_events(engine: &mut Engine, seen: &mut Vec<Event>) -> bool {
    let mut any = false;
    while let Some(event) = engine.poll_event() {
        answer(engine, &event);
        seen.push(event);
        any = true;
    }
    any
}

/// Shuttle bytes until both engines are quiet. Returns the events each side
/// raised, client first.
fn drive(client: &mut Engine, server: &mut Engine) -> (Vec<Event>, Vec<Event>) {
    let mut client_events = Vec::new();
    let mut server_events = Vec::new();
    for _ in 0..32 {
        let mut busy = drain_events(client, &mut client_events);
        busy |= drain_events(server, &mut server_events);

        let to_server = client.take_output();
        if !to_server.is_empty() {
            busy = true;
            if !server.is_shutdown() {
                let _ = server.ingest(&to_server);
            }
        }
        let to_client = server.take_output();
        if !to_client.is_empty() {
            busy = true;
            if !client.is_shutdown() {
                let _ = client.ingest(&to_client);
            }
        }
        if !busy {
            break;
        }
    }
    (client_events, server_events)
}

fn remote_link(events: &[Event]) -> LinkId {
    events
        .iter()
        .find_map(|event| match event {
            Event::RemoteOpen(Endpoint::Link(link)) => Some(*link),
            _ => None,
        })
        .expect("peer attached a link")
}

fn remote_link_named(engine: &Engine, events: &[Event], name: &str) -> LinkId {
    events
        .iter()
        .find_map(|event| match event {
            Event::RemoteOpen(Endpoint::Link(link))
                if engine.link(*link).is_some_and(|l| l.name() == name) =>
            {
                Some(*link)
            }
            _ => None,
        })
        .expect("peer attached the named link")
}

fn deliveries(events: &[Event]) -> Vec<DeliveryId> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::Delivery { delivery, .. } => Some(*delivery),
            _ => None,
        })
        .collect()
}

/// Client sender attached to an auto-opened server receiver.
fn attached_pair(server_config: EngineConfig) -> (Engine, Engine, LinkId, LinkId) {
    let mut client = Engine::builder().container_id("client").build().unwrap();
    let mut server = Engine::new(server_config).unwrap();

    client.open().unwrap();
    let session = client.new_session().unwrap();
    client.open_session(session).unwrap();
    let sender = client.new_sender(session, "orders").unwrap();
    client.open_link(sender).unwrap();
    server.open().unwrap();

    let (_, server_events) = drive(&mut client, &mut server);
    let receiver = remote_link(&server_events);
    (client, server, sender, receiver)
}

#[test]
fn test_open_and_close_handshake() {
    let mut client = Engine::new(EngineConfig::default()).unwrap();
    let mut server = Engine::builder().container_id("server").build().unwrap();

    let mut opened = client.open().unwrap();
    server.open().unwrap();
    let (client_events, _) = drive(&mut client, &mut server);

    assert!(matches!(opened.try_take(), Some(Ok(()))));
    assert!(client_events.contains(&Event::RemoteOpen(Endpoint::Connection)));
    assert_eq!(client.connection().remote_container_id(), Some("server"));

    let mut closed = client.close(None).unwrap();
    let (client_events, server_events) = drive(&mut client, &mut server);

    assert!(matches!(closed.try_take(), Some(Ok(()))));
    assert!(client.is_shutdown());
    assert!(server.is_shutdown());
    assert!(client.failure().is_none());
    assert!(client_events.contains(&Event::EngineShutdown(None)));
    assert!(server_events.contains(&Event::RemoteClose {
        endpoint: Endpoint::Connection,
        error: None,
    }));
}

#[test]
fn test_blocked_send_released_by_credit() {
    let (mut client, mut server, sender, receiver) = attached_pair(EngineConfig::default());

    let mut sent = client.send(sender, SendRequest::new("hello")).unwrap();
    drive(&mut client, &mut server);
    assert!(!sent.is_done());
    assert_eq!(client.link(sender).unwrap().queued_sends(), 1);

    server.flow(receiver, 1).unwrap();
    let (client_events, server_events) = drive(&mut client, &mut server);

    assert!(client_events.contains(&Event::CreditUpdated(sender)));
    let delivery = match sent.try_take() {
        Some(Ok(Some(id))) => id,
        other => panic!("send did not complete: {:?}", other),
    };
    assert_eq!(client.link(sender).unwrap().credit(), 0);
    assert_eq!(client.link(sender).unwrap().delivery_count(), 1);

    let received = deliveries(&server_events);
    assert_eq!(received, vec![delivery]);
    assert_eq!(server.link(receiver).unwrap().credit(), 0);
    let payload = server.read_delivery(receiver, delivery).unwrap();
    assert_eq!(&payload[..], b"hello");
}

#[test]
fn test_disposition_reaches_sender() {
    let (mut client, mut server, sender, receiver) = attached_pair(EngineConfig::default());
    server.flow(receiver, 1).unwrap();
    drive(&mut client, &mut server);

    let mut sent = client.send(sender, SendRequest::new("order-1")).unwrap();
    let (_, server_events) = drive(&mut client, &mut server);
    let delivery = deliveries(&server_events)[0];
    assert!(sent.is_done());

    server
        .disposition(receiver, delivery, Some(DeliveryState::Accepted), false)
        .unwrap();
    let (client_events, _) = drive(&mut client, &mut server);

    assert!(client_events.contains(&Event::DeliveryUpdated {
        link: sender,
        delivery,
    }));
    let outgoing = client.delivery(sender, delivery).unwrap();
    assert_eq!(outgoing.remote_state(), Some(&DeliveryState::Accepted));
    assert!(!outgoing.is_remotely_settled());
}

#[test]
fn test_large_message_spans_frames() {
    let config = EngineConfig {
        max_frame_size: 512,
        ..EngineConfig::default()
    };
    let (mut client, mut server, sender, receiver) = attached_pair(config);
    server.flow(receiver, 1).unwrap();
    drive(&mut client, &mut server);

    let body: Vec<u8> = (0..1500u32).map(|i| (i % 251) as u8).collect();
    let mut sent = client.send(sender, SendRequest::new(body.clone())).unwrap();
    let (_, server_events) = drive(&mut client, &mut server);

    assert!(sent.is_done());
    let received = deliveries(&server_events);
    assert!(received.len() >= 3);
    assert!(received.iter().all(|id| *id == received[0]));

    let delivery = server.delivery(receiver, received[0]).unwrap();
    assert!(delivery.is_complete());
    assert!(!delivery.is_partial());
    let payload = server.read_delivery(receiver, received[0]).unwrap();
    assert_eq!(&payload[..], &body[..]);
}

#[test]
fn test_drain_with_nothing_to_send() {
    let (mut client, mut server, sender, receiver) = attached_pair(EngineConfig::default());
    server.flow(receiver, 5).unwrap();
    drive(&mut client, &mut server);
    assert_eq!(client.link(sender).unwrap().credit(), 5);

    let mut drained = server.drain(receiver).unwrap();
    drive(&mut client, &mut server);

    assert!(matches!(drained.try_take(), Some(Ok(()))));
    assert_eq!(client.link(sender).unwrap().credit(), 0);
    assert_eq!(client.link(sender).unwrap().delivery_count(), 5);
    assert_eq!(server.link(receiver).unwrap().credit(), 0);
}

#[test]
fn test_cancel_waiting_send() {
    let (mut client, mut server, sender, _receiver) = attached_pair(EngineConfig::default());

    let mut sent = client.send(sender, SendRequest::new("never")).unwrap();
    assert!(client.cancel_send(sender, &sent).unwrap());
    assert!(sent.is_failed());
    assert_eq!(client.link(sender).unwrap().queued_sends(), 0);
    drive(&mut client, &mut server);
}

#[test]
fn test_transaction_declare_and_discharge() {
    let mut client = Engine::new(EngineConfig::default()).unwrap();
    let mut server = Engine::new(EngineConfig::default()).unwrap();
    client.open().unwrap();
    let session = client.new_session().unwrap();
    client.open_session(session).unwrap();
    let coordinator = client.new_coordinator(session, "txn").unwrap();
    client.open_link(coordinator).unwrap();
    server.open().unwrap();
    let (_, server_events) = drive(&mut client, &mut server);
    let controller = remote_link(&server_events);
    server.flow(controller, 2).unwrap();
    drive(&mut client, &mut server);

    let mut declared = client.declare(coordinator).unwrap();
    let (_, server_events) = drive(&mut client, &mut server);
    let declare = deliveries(&server_events)[0];
    server
        .disposition(
            controller,
            declare,
            Some(DeliveryState::Declared(Declared {
                txn_id: Bytes::from_static(b"txn-1"),
            })),
            true,
        )
        .unwrap();
    drive(&mut client, &mut server);

    match declared.try_take() {
        Some(Ok(txn_id)) => assert_eq!(&txn_id[..], b"txn-1"),
        other => panic!("declare did not complete: {:?}", other),
    }
    assert!(client.declare(coordinator).is_err());

    let mut discharged = client.discharge(coordinator, false).unwrap();
    let (_, server_events) = drive(&mut client, &mut server);
    let discharge = deliveries(&server_events)[0];
    server
        .disposition(controller, discharge, Some(DeliveryState::Accepted), true)
        .unwrap();
    drive(&mut client, &mut server);

    assert!(matches!(discharged.try_take(), Some(Ok(()))));
    assert!(client.discharge(coordinator, false).is_err());
}

#[test]
fn test_parked_send_enlisted_when_written() {
    let mut client = Engine::new(EngineConfig::default()).unwrap();
    let mut server = Engine::new(EngineConfig::default()).unwrap();
    client.open().unwrap();
    let session = client.new_session().unwrap();
    client.open_session(session).unwrap();
    let sender = client.new_sender(session, "orders").unwrap();
    client.open_link(sender).unwrap();
    let coordinator = client.new_coordinator(session, "txn").unwrap();
    client.open_link(coordinator).unwrap();
    server.open().unwrap();
    let (_, server_events) = drive(&mut client, &mut server);
    let controller = remote_link_named(&server, &server_events, "txn");
    let receiver = remote_link_named(&server, &server_events, "orders");
    server.flow(controller, 2).unwrap();
    drive(&mut client, &mut server);

    // waits for credit while the transaction is declared
    let mut sent = client.send(sender, SendRequest::new("order-1")).unwrap();
    let mut declared = client.declare(coordinator).unwrap();
    let (_, server_events) = drive(&mut client, &mut server);
    let declare = deliveries(&server_events)[0];
    server
        .disposition(
            controller,
            declare,
            Some(DeliveryState::Declared(Declared {
                txn_id: Bytes::from_static(b"txn-1"),
            })),
            true,
        )
        .unwrap();
    drive(&mut client, &mut server);
    assert!(matches!(declared.try_take(), Some(Ok(_))));
    assert!(!sent.is_done());

    server.flow(receiver, 1).unwrap();
    let (_, server_events) = drive(&mut client, &mut server);
    let delivery = match sent.try_take() {
        Some(Ok(Some(id))) => id,
        other => panic!("send did not complete: {:?}", other),
    };
    assert_eq!(deliveries(&server_events), vec![delivery]);
    let incoming = server.delivery(receiver, delivery).unwrap();
    assert_eq!(
        incoming.remote_state(),
        Some(&DeliveryState::Transactional(TransactionalState {
            txn_id: Bytes::from_static(b"txn-1"),
            outcome: None,
        }))
    );

    // discharge left unanswered: the outcome is in doubt
    server.flow(receiver, 1).unwrap();
    let _discharged = client.discharge(coordinator, false).unwrap();
    drive(&mut client, &mut server);
    assert_eq!(client.link(sender).unwrap().credit(), 1);
    let mut ignored = client.send(sender, SendRequest::new("order-2")).unwrap();
    assert_eq!(ignored.try_take(), Some(Ok(None)));
    assert_eq!(client.link(sender).unwrap().credit(), 1);
    let (_, server_events) = drive(&mut client, &mut server);
    assert!(deliveries(&server_events).is_empty());
}

#[test]
fn test_remote_close_fails_waiting_send() {
    let (mut client, mut server, sender, _receiver) = attached_pair(EngineConfig::default());
    let mut sent = client.send(sender, SendRequest::new("stuck")).unwrap();
    drive(&mut client, &mut server);

    let error = ErrorCondition::new(conditions::CONNECTION_FORCED, "maintenance");
    let mut closed = server.close(Some(error.clone())).unwrap();
    let (client_events, _) = drive(&mut client, &mut server);

    assert!(client_events.contains(&Event::RemoteClose {
        endpoint: Endpoint::Connection,
        error: Some(error.clone()),
    }));
    assert!(sent.is_failed());
    assert!(matches!(closed.try_take(), Some(Ok(()))));
    assert!(client.is_shutdown());
    assert!(server.is_shutdown());
    assert_eq!(client.connection().remote_error(), Some(&error));
}

#[test]
fn test_sessions_get_distinct_channels() {
    let mut client = Engine::new(EngineConfig::default()).unwrap();
    let mut server = Engine::new(EngineConfig::default()).unwrap();
    client.open().unwrap();
    let first = client.new_session().unwrap();
    let second = client.new_session().unwrap();
    client.open_session(first).unwrap();
    client.open_session(second).unwrap();
    server.open().unwrap();
    let (client_events, server_events) = drive(&mut client, &mut server);

    assert_ne!(
        client.session(first).unwrap().channel(),
        client.session(second).unwrap().channel()
    );
    for id in [first, second] {
        assert!(client_events.contains(&Event::RemoteOpen(Endpoint::Session(id))));
        assert_eq!(
            client.session(id).unwrap().remote_state(),
            EndpointState::Active
        );
    }
    let mut opened = server_events
        .iter()
        .filter(|e| matches!(e, Event::RemoteOpen(Endpoint::Session(_))))
        .count();
    assert_eq!(opened, 2);
}

#[test]
fn test_heartbeat_follows_peer_idle_timeout() {
    let mut client = Engine::new(EngineConfig::default()).unwrap();
    let mut server = Engine::builder().idle_timeout_ms(1_000).build().unwrap();
    client.open().unwrap();
    server.open().unwrap();
    drive(&mut client, &mut server);
    assert_eq!(client.connection().remote_idle_timeout(), Some(1_000));

    assert_eq!(client.tick(0).unwrap(), Some(500));
    assert!(client.take_output().is_empty());
    assert_eq!(client.tick(500).unwrap(), Some(1_000));
    let heartbeat = client.take_output();
    assert_eq!(heartbeat.len(), 8);

    assert_eq!(server.tick(0).unwrap(), Some(1_000));
    server.ingest(&heartbeat).unwrap();
    assert_eq!(server.tick(600).unwrap(), Some(1_600));
}

#[test]
fn test_idle_peer_fails_engine() {
    let mut client = Engine::new(EngineConfig::default()).unwrap();
    let mut server = Engine::builder().idle_timeout_ms(1_000).build().unwrap();
    client.open().unwrap();
    server.open().unwrap();
    drive(&mut client, &mut server);

    server.tick(0).unwrap();
    let err = server.tick(1_000).unwrap_err();
    assert!(matches!(err, EngineError::Timeout(_)));
    assert!(server.is_shutdown());

    // the Close carries the idle-timeout condition
    client.ingest(&server.take_output()).unwrap();
    assert_eq!(
        client.connection().remote_error().map(|e| e.condition.as_str()),
        Some(conditions::RESOURCE_LIMIT_EXCEEDED)
    );
}

struct Plain;

impl SaslClientListener for Plain {
    fn handle_mechanisms(&mut self, context: &mut SaslClientContext) {
        context
            .init("PLAIN", Some(Bytes::from_static(b"\0guest\0guest")))
            .unwrap();
    }
}

struct Authenticator {
    accept: bool,
}

impl SaslServerListener for Authenticator {
    fn initialize(&mut self, context: &mut SaslServerContext) {
        context.offer_mechanisms(vec![Symbol::from("PLAIN")]).unwrap();
    }

    fn handle_init(
        &mut self,
        context: &mut SaslServerContext,
        _mechanism: &Symbol,
        initial_response: Option<&Bytes>,
    ) {
        let ok = self.accept && initial_response.is_some_and(|r| r.ends_with(b"guest"));
        let code = if ok { SaslCode::Ok } else { SaslCode::Auth };
        context.outcome_with(code, None).unwrap();
    }
}

#[test]
fn test_sasl_then_amqp() {
    let mut client = Engine::builder()
        .hostname("broker.local")
        .sasl_client(Plain)
        .build()
        .unwrap();
    let mut server = Engine::builder()
        .sasl_server(Authenticator { accept: true })
        .build()
        .unwrap();

    let mut opened = client.open().unwrap();
    server.open().unwrap();
    let (client_events, server_events) = drive(&mut client, &mut server);

    assert_eq!(client.sasl_state(), Some(SaslState::Done));
    assert_eq!(server.sasl_state(), Some(SaslState::Done));
    assert!(client_events.contains(&Event::SaslOutcome(SaslCode::Ok)));
    assert!(server_events.contains(&Event::SaslOutcome(SaslCode::Ok)));
    assert!(matches!(opened.try_take(), Some(Ok(()))));
    assert_eq!(server.connection().remote_state(), EndpointState::Active);
}

#[test]
fn test_sasl_rejection_fails_both_sides() {
    let mut client = Engine::builder().sasl_client(Plain).build().unwrap();
    let mut server = Engine::builder()
        .sasl_server(Authenticator { accept: false })
        .build()
        .unwrap();

    let mut opened = client.open().unwrap();
    server.open().unwrap();
    drive(&mut client, &mut server);

    assert_eq!(
        client.failure(),
        Some(&EngineError::SaslFailed(SaslCode::Auth))
    );
    assert!(opened.is_failed());
    assert!(server.is_shutdown());
}
