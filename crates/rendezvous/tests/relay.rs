//! Drives the client against an in-process relay.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use peerdrop_protocol::{Envelope, SessionDescription, SignalType};
use peerdrop_rendezvous::{LinkEvent, LinkState, ReconnectConfig, RendezvousClient};

type Rooms = Arc<Mutex<HashMap<String, Vec<(u64, mpsc::UnboundedSender<Message>)>>>>;

/// Minimal relay: first joiner is the initiator, everything else is
/// forwarded to the other member.
async fn spawn_relay() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let rooms: Rooms = Arc::new(Mutex::new(HashMap::new()));

    tokio::spawn(async move {
        let mut next_id = 0u64;
        while let Ok((stream, _)) = listener.accept().await {
            next_id += 1;
            let id = next_id;
            let rooms = rooms.clone();
            tokio::spawn(async move {
                let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                let (mut write, mut read) = ws.split();
                let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
                tokio::spawn(async move {
                    while let Some(msg) = rx.recv().await {
                        if write.send(msg).await.is_err() {
                            break;
                        }
                    }
                });

                let mut my_room: Option<String> = None;
                while let Some(Ok(msg)) = read.next().await {
                    let Message::Text(text) = msg else { continue };
                    let Ok(env) = Envelope::from_json(text.as_str()) else {
                        continue;
                    };
                    let mut rooms = rooms.lock().await;
                    if env.signal == SignalType::Join {
                        let room = env.room.clone().unwrap_or_default();
                        let members = rooms.entry(room.clone()).or_default();
                        let is_initiator = members.is_empty();
                        for (_, other) in members.iter() {
                            let peer_joined = Envelope {
                                room: Some(room.clone()),
                                ..Envelope::new(SignalType::PeerJoined)
                            };
                            let _ = other.send(text_msg(&peer_joined));
                        }
                        members.push((id, tx.clone()));
                        let joined = Envelope {
                            room: Some(room.clone()),
                            is_initiator: Some(is_initiator),
                            ..Envelope::new(SignalType::Joined)
                        };
                        let _ = tx.send(text_msg(&joined));
                        my_room = Some(room);
                    } else if let Some(room) = &my_room
                        && let Some(members) = rooms.get(room)
                    {
                        for (other_id, other) in members {
                            if *other_id != id {
                                let _ = other.send(Message::Text(text.clone()));
                            }
                        }
                    }
                }

                if let Some(room) = my_room
                    && let Some(members) = rooms.lock().await.get_mut(&room)
                {
                    members.retain(|(other_id, _)| *other_id != id);
                }
            });
        }
    });

    addr
}

fn text_msg(env: &Envelope) -> Message {
    Message::Text(env.to_json().unwrap().into())
}

async fn next_envelope(events: &mut broadcast::Receiver<LinkEvent>) -> Envelope {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let LinkEvent::Envelope(env) = events.recv().await.unwrap() {
                return env;
            }
        }
    })
    .await
    .expect("envelope in time")
}

async fn wait_for_state(events: &mut broadcast::Receiver<LinkEvent>, want: LinkState) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let LinkEvent::StateChanged(state) = events.recv().await.unwrap()
                && state == want
            {
                return;
            }
        }
    })
    .await
    .expect("state in time")
}

#[tokio::test]
async fn two_peers_get_roles_and_forwarding() {
    let addr = spawn_relay().await;
    let url = format!("ws://{addr}/");

    let first = RendezvousClient::default();
    let mut first_events = first.subscribe();
    first.connect(&url).await.unwrap();
    assert_eq!(first.state().await, LinkState::Open);
    assert!(first.join("ROOM42").await);

    let joined = next_envelope(&mut first_events).await;
    assert_eq!(joined.signal, SignalType::Joined);
    assert_eq!(joined.is_initiator, Some(true));

    let second = RendezvousClient::default();
    let mut second_events = second.subscribe();
    second.connect(&url).await.unwrap();
    second.join("ROOM42").await;

    let joined = next_envelope(&mut second_events).await;
    assert_eq!(joined.is_initiator, Some(false));
    let peer_joined = next_envelope(&mut first_events).await;
    assert_eq!(peer_joined.signal, SignalType::PeerJoined);

    assert!(
        first
            .send(&Envelope::offer("ROOM42", SessionDescription::offer("v=0")))
            .await
    );
    let offer = next_envelope(&mut second_events).await;
    assert_eq!(offer.signal, SignalType::Offer);
    assert_eq!(offer.description().unwrap().sdp, "v=0");

    first.close().await;
    second.close().await;
}

#[tokio::test]
async fn connect_is_idempotent_while_open() {
    let addr = spawn_relay().await;
    let url = format!("ws://{addr}/");
    let client = RendezvousClient::default();
    client.connect(&url).await.unwrap();
    client.connect(&url).await.unwrap();
    assert_eq!(client.state().await, LinkState::Open);
    client.close().await;
    assert_eq!(client.state().await, LinkState::Disconnected);
}

/// A relay that records every join, then drops the socket without a close
/// frame on the first connection only.
async fn spawn_flaky_relay(joins: mpsc::UnboundedSender<String>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut connection = 0;
        while let Ok((stream, _)) = listener.accept().await {
            connection += 1;
            let joins = joins.clone();
            let drop_after_join = connection == 1;
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                while let Some(Ok(msg)) = ws.next().await {
                    if let Message::Text(text) = msg
                        && let Ok(env) = Envelope::from_json(text.as_str())
                        && env.signal == SignalType::Join
                    {
                        let _ = joins.send(env.room.unwrap_or_default());
                        if drop_after_join {
                            return;
                        }
                    }
                }
            });
        }
    });
    addr
}

#[tokio::test]
async fn reconnect_resends_join() {
    let (joins_tx, mut joins_rx) = mpsc::unbounded_channel();
    let addr = spawn_flaky_relay(joins_tx).await;
    let url = format!("ws://{addr}/");

    let client = RendezvousClient::new(ReconnectConfig {
        delay: Duration::from_millis(50),
        max_attempts: 5,
    });
    let mut events = client.subscribe();
    client.connect(&url).await.unwrap();
    client.join("ABCDEF").await;

    let first = tokio::time::timeout(Duration::from_secs(5), joins_rx.recv())
        .await
        .unwrap();
    assert_eq!(first.as_deref(), Some("ABCDEF"));

    wait_for_state(&mut events, LinkState::Reconnecting { attempt: 1 }).await;
    wait_for_state(&mut events, LinkState::Open).await;

    let second = tokio::time::timeout(Duration::from_secs(5), joins_rx.recv())
        .await
        .unwrap();
    assert_eq!(second.as_deref(), Some("ABCDEF"));

    client.close().await;
}

#[tokio::test]
async fn normal_close_from_relay_does_not_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        if let Ok((stream, _)) = listener.accept().await
            && let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await
        {
            let _ = ws
                .close(Some(CloseFrame {
                    code: CloseCode::Normal,
                    reason: String::new().into(),
                }))
                .await;
            while ws.next().await.is_some() {}
        }
    });

    let client = RendezvousClient::new(ReconnectConfig {
        delay: Duration::from_millis(20),
        max_attempts: 3,
    });
    let mut events = client.subscribe();
    client.connect(&format!("ws://{addr}/")).await.unwrap();
    wait_for_state(&mut events, LinkState::Disconnected).await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(client.state().await, LinkState::Disconnected);
}
