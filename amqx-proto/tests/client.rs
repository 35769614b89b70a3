//! Blocking client facade against a scripted peer on the in-memory
//! transport.

use std::thread;
use std::time::Duration;

use bytes::Bytes;

use amqx_codec::{DeliveryState, Message, Properties, Value};
use amqx_proto::driver::Driver;
use amqx_proto::{
    memory_pair, AccessToken, Client, ClientConfig, Connection, ConnectionConfig, DeliveryOutcome,
    Event, MemoryTransport, Result, TokenSource,
};

/// Peer loop: accept every delivery, answer put-token with 200, stop at
/// CLOSE.
fn run_peer(io: MemoryTransport) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let driver = Driver::new(Connection::new(ConnectionConfig::default()), io);
        let mut last_attached = None;
        for _ in 0..500 {
            let events = match driver.do_work(Duration::from_millis(5)) {
                Ok(events) => events,
                Err(_) => return,
            };
            for event in events {
                match event {
                    Event::LinkAttached { channel, handle } => {
                        last_attached = Some((channel, handle));
                    }
                    Event::Message {
                        channel,
                        handle,
                        delivery,
                    } => {
                        let is_put = delivery
                            .message
                            .application_property(b"operation")
                            .is_some();
                        if is_put {
                            // Management-style request: answer with 200 on
                            // the most recently attached sender.
                            let correlation = delivery
                                .message
                                .properties
                                .as_ref()
                                .and_then(|p| p.message_id.clone());
                            let mut response = Message::from_value(Value::Null);
                            response.properties = Some(Properties {
                                correlation_id: correlation,
                                ..Properties::default()
                            });
                            response.application_properties = Some(vec![(
                                Value::string("status-code"),
                                Value::Int(200),
                            )]);
                            if let Some((ch, h)) = last_attached {
                                let _ = driver.with_connection(|conn| {
                                    conn.send_message(ch, h, &response, true, None)
                                });
                            }
                        } else if !delivery.settled {
                            let _ = driver.with_connection(|conn| {
                                conn.settle_delivery(
                                    channel,
                                    handle,
                                    delivery.delivery_id,
                                    DeliveryState::ACCEPTED,
                                )
                            });
                        }
                    }
                    Event::Closed { .. } => return,
                    _ => {}
                }
            }
        }
    })
}

#[test]
fn open_send_and_close_through_the_facade() {
    let (client_io, server_io) = memory_pair();
    let peer = run_peer(server_io);

    let mut client = Client::new(client_io, ClientConfig::default());
    client.open().unwrap();
    let handle = client.attach_sender("facade-sender", "examples").unwrap();
    let outcome = client
        .send_message(handle, &Message::from_data(Bytes::from_static(b"hello")))
        .unwrap();
    assert_eq!(outcome, DeliveryOutcome::Accepted);
    client.close().unwrap();
    peer.join().unwrap();
}

struct StaticToken;

impl TokenSource for StaticToken {
    fn token(&mut self) -> Result<AccessToken> {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Ok(AccessToken {
            token: "secret".into(),
            expires_on: now + 3_600,
        })
    }
}

#[test]
fn open_authenticates_when_a_token_source_is_configured() {
    let (client_io, server_io) = memory_pair();
    let peer = run_peer(server_io);

    let config = ClientConfig {
        token_source: Some(("sb://ns/q".into(), Box::new(StaticToken))),
        ..ClientConfig::default()
    };
    let mut client = Client::new(client_io, config);
    client.open().unwrap();
    client.close().unwrap();
    peer.join().unwrap();
}
