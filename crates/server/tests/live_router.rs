//! Event Router driven directly through hub queues, no sockets.

use parley_common::{ClientEvent, LiveMessageRef, ServerEvent};
use parley_server::core::AppState;
use parley_server::live::{ConnectionId, Outcome};
use tokio::sync::mpsc::Receiver;

struct Peer {
    user_id: String,
    conn: ConnectionId,
    rx: Receiver<ServerEvent>,
}

impl Peer {
    fn drain(&mut self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn delivered(&mut self) -> Vec<String> {
        self.drain()
            .into_iter()
            .filter_map(|e| match e {
                ServerEvent::MessageDelivered { message } => Some(message.content),
                _ => None,
            })
            .collect()
    }
}

async fn peer(state: &AppState, name: &str) -> Peer {
    let (user, _) = state
        .auth
        .signup(name, &format!("{}@example.com", name), "pw")
        .await
        .unwrap();
    let (conn, rx) = state.hub.connect(Some(user.id.clone()));
    Peer {
        user_id: user.id,
        conn,
        rx,
    }
}

async fn identify(state: &AppState, peer: &Peer) {
    let outcome = state
        .router
        .dispatch(
            &peer.conn,
            ClientEvent::Identify {
                user_id: peer.user_id.clone(),
            },
        )
        .await;
    assert!(matches!(outcome, Outcome::Delivered(_)));
}

async fn join(state: &AppState, peer: &Peer, room: &str) {
    let outcome = state
        .router
        .dispatch(
            &peer.conn,
            ClientEvent::JoinRoom {
                conversation_id: room.to_string(),
            },
        )
        .await;
    assert_eq!(outcome, Outcome::Silent);
}

#[tokio::test]
async fn test_group_scenario_delivers_once_without_echo() {
    let state = AppState::ephemeral().await.unwrap();
    let mut a = peer(&state, "alice").await;
    let mut b = peer(&state, "bob").await;
    let mut c = peer(&state, "carol").await;

    let group = state
        .directory
        .create_group(&a.user_id, "Team", &[b.user_id.clone(), c.user_id.clone()])
        .await
        .unwrap();
    let room = group.record.id.clone();

    join(&state, &a, &room).await;
    join(&state, &b, &room).await;

    let stored = state
        .directory
        .send_message(&b.user_id, &room, "hi")
        .await
        .unwrap();
    let outcome = state
        .router
        .dispatch(
            &b.conn,
            ClientEvent::SendLive {
                message: LiveMessageRef {
                    id: stored.id.clone(),
                    conversation_id: room.clone(),
                    content: "hi".into(),
                },
            },
        )
        .await;

    // carol is neither subscribed nor identified
    assert_eq!(outcome, Outcome::Delivered(1));
    assert_eq!(a.delivered(), vec!["hi".to_string()]);
    assert!(b.delivered().is_empty());
    assert!(c.delivered().is_empty());
}

#[tokio::test]
async fn test_identified_members_get_personal_notifications() {
    let state = AppState::ephemeral().await.unwrap();
    let mut a = peer(&state, "alice").await;
    let mut b = peer(&state, "bob").await;
    let mut c = peer(&state, "carol").await;
    for p in [&a, &b, &c] {
        identify(&state, p).await;
    }

    let group = state
        .directory
        .create_group(&a.user_id, "Team", &[b.user_id.clone(), c.user_id.clone()])
        .await
        .unwrap();
    let room = group.record.id.clone();
    join(&state, &a, &room).await;
    a.drain();
    b.drain();
    c.drain();

    let stored = state
        .directory
        .send_message(&b.user_id, &room, "hi")
        .await
        .unwrap();
    let text = serde_json::json!({
        "event": "sendLive",
        "message": {"id": stored.id, "conversationId": room, "content": "hi"}
    })
    .to_string();
    let outcome = state.router.handle_text(&b.conn, &text).await;

    assert_eq!(outcome, Outcome::Delivered(2));
    assert_eq!(a.delivered(), vec!["hi".to_string()]);
    assert_eq!(c.delivered(), vec!["hi".to_string()]);
    assert!(b.delivered().is_empty());
}

#[tokio::test]
async fn test_presence_follows_identify_and_disconnect() {
    let state = AppState::ephemeral().await.unwrap();
    let mut a = peer(&state, "alice").await;
    let b = peer(&state, "bob").await;

    identify(&state, &a).await;
    identify(&state, &b).await;

    let mut expected = vec![a.user_id.clone(), b.user_id.clone()];
    expected.sort();
    let last = a.drain().into_iter().last().unwrap();
    assert_eq!(
        last,
        ServerEvent::Presence {
            online_users: expected
        }
    );

    assert!(matches!(state.router.disconnect(&b.conn), Outcome::Delivered(1)));
    assert_eq!(state.router.disconnect(&b.conn), Outcome::Silent);
    assert_eq!(
        a.drain(),
        vec![ServerEvent::Presence {
            online_users: vec![a.user_id.clone()]
        }]
    );
}

#[tokio::test]
async fn test_identify_must_match_token_identity() {
    let state = AppState::ephemeral().await.unwrap();
    let a = peer(&state, "alice").await;
    let (anon, _rx) = state.hub.connect(None);

    let spoof = state
        .router
        .dispatch(
            &a.conn,
            ClientEvent::Identify {
                user_id: "someone-else".into(),
            },
        )
        .await;
    assert!(matches!(spoof, Outcome::Dropped(_)));

    let anonymous = state
        .router
        .dispatch(
            &anon,
            ClientEvent::Identify {
                user_id: a.user_id.clone(),
            },
        )
        .await;
    assert!(matches!(anonymous, Outcome::Dropped(_)));
    assert!(state.hub.online_users().is_empty());
}

#[tokio::test]
async fn test_malformed_and_unknown_events_are_dropped() {
    let state = AppState::ephemeral().await.unwrap();
    let a = peer(&state, "alice").await;

    for text in [
        "not json",
        r#"{"event":"joinRoom"}"#,
        r#"{"event":"sendLive","message":{"id":"m1","conversationId":"c1"}}"#,
        r#"{"event":"sendLive","message":{"id":"missing","conversationId":"c1","content":"x"}}"#,
    ] {
        let outcome = state.router.handle_text(&a.conn, text).await;
        assert!(matches!(outcome, Outcome::Dropped(_)), "{}", text);
    }

    // the connection is still usable afterwards
    assert!(state.hub.is_connected(&a.conn));
    join(&state, &a, "c1").await;
    assert_eq!(state.hub.rooms_of(&a.conn), vec!["c1".to_string()]);
}

#[tokio::test]
async fn test_typing_uses_authenticated_identity() {
    let state = AppState::ephemeral().await.unwrap();
    let mut a = peer(&state, "alice").await;
    let mut b = peer(&state, "bob").await;
    join(&state, &a, "room").await;
    join(&state, &b, "room").await;

    let outcome = state
        .router
        .handle_text(
            &b.conn,
            r#"{"event":"typing","conversationId":"room","userId":"forged","isTyping":true}"#,
        )
        .await;
    assert_eq!(outcome, Outcome::Delivered(1));
    assert_eq!(
        a.drain(),
        vec![ServerEvent::TypingStatus {
            conversation_id: "room".into(),
            user_id: b.user_id.clone(),
            is_typing: true,
        }]
    );
    assert!(b.drain().is_empty());
}

#[tokio::test]
async fn test_leave_and_disconnect_stop_delivery() {
    let state = AppState::ephemeral().await.unwrap();
    let mut a = peer(&state, "alice").await;
    let b = peer(&state, "bob").await;
    let mut c = peer(&state, "carol").await;
    for p in [&a, &b, &c] {
        join(&state, p, "room").await;
    }

    state
        .router
        .dispatch(
            &a.conn,
            ClientEvent::LeaveRoom {
                conversation_id: "room".into(),
            },
        )
        .await;
    state.router.disconnect(&c.conn);

    let outcome = state
        .router
        .dispatch(
            &b.conn,
            ClientEvent::Typing {
                conversation_id: "room".into(),
                user_id: String::new(),
                is_typing: false,
            },
        )
        .await;
    assert_eq!(outcome, Outcome::Delivered(0));
    assert!(a
        .drain()
        .iter()
        .all(|e| matches!(e, ServerEvent::Presence { .. })));
    assert!(c.drain().is_empty());
}

#[tokio::test]
async fn test_other_connections_of_the_sender_still_receive() {
    let state = AppState::ephemeral().await.unwrap();
    let mut laptop = peer(&state, "alice").await;
    let bob = peer(&state, "bob").await;
    let (phone_conn, phone_rx) = state.hub.connect(Some(laptop.user_id.clone()));
    let mut phone = Peer {
        user_id: laptop.user_id.clone(),
        conn: phone_conn,
        rx: phone_rx,
    };

    let chat = state
        .directory
        .access_direct(&laptop.user_id, &bob.user_id)
        .await
        .unwrap();
    let room = chat.record.id.clone();
    join(&state, &laptop, &room).await;
    join(&state, &phone, &room).await;

    let stored = state
        .directory
        .send_message(&laptop.user_id, &room, "from the laptop")
        .await
        .unwrap();
    let outcome = state
        .router
        .dispatch(
            &laptop.conn,
            ClientEvent::SendLive {
                message: LiveMessageRef {
                    id: stored.id.clone(),
                    conversation_id: room.clone(),
                    content: stored.content.clone(),
                },
            },
        )
        .await;

    // only the originating connection is skipped
    assert_eq!(outcome, Outcome::Delivered(1));
    assert!(laptop.delivered().is_empty());
    assert_eq!(phone.delivered(), vec!["from the laptop".to_string()]);
}
