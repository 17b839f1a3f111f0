//! Client sessions against an in-process server.

use parley_client::{
    ChatSession, ClientConfig, Effect, LiveClient, LiveSender, LiveStatus, LoadState, RestClient,
};
use parley_common::{ClientEvent, ServerEvent};
use parley_server::core::AppState;
use std::time::Duration;
use tokio::sync::mpsc;

struct User {
    session: ChatSession<LiveSender>,
    live: LiveClient,
}

impl User {
    /// Apply events until one satisfies `pred`.
    async fn until(&mut self, pred: impl Fn(&ServerEvent, &Effect) -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let event = self.live.next_event().await.expect("live channel closed");
                let effect = self.session.handle_event(event.clone()).await.unwrap();
                if pred(&event, &effect) {
                    return;
                }
            }
        })
        .await
        .expect("timed out waiting for live event");
    }

    /// Whether any message arrives within `window`
    async fn receives_message_within(&mut self, window: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + window;
        loop {
            match tokio::time::timeout_at(deadline, self.live.next_event()).await {
                Ok(Some(event @ ServerEvent::MessageDelivered { .. })) => {
                    self.session.handle_event(event).await.unwrap();
                    return true;
                }
                Ok(Some(event)) => {
                    self.session.handle_event(event).await.unwrap();
                }
                Ok(None) | Err(_) => return false,
            }
        }
    }
}

async fn spawn_server() -> ClientConfig {
    let state = AppState::ephemeral().await.unwrap();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        parley_server::serve(listener, state).await.unwrap();
    });
    ClientConfig::new(format!("http://{}", addr))
}

async fn sign_up(config: &ClientConfig, name: &str) -> User {
    let mut rest = RestClient::new(config.clone()).unwrap();
    let auth = rest
        .signup(name, &format!("{}@example.com", name), "secret")
        .await
        .unwrap();
    let live = LiveClient::connect(config, rest.token()).await.unwrap();
    let session = ChatSession::new(rest, live.sender(), auth.user.id);
    User { session, live }
}

fn presence_has(event: &ServerEvent, users: &[String]) -> bool {
    matches!(event, ServerEvent::Presence { online_users }
        if users.iter().all(|u| online_users.contains(u)))
}

#[tokio::test]
async fn test_team_group_scenario() {
    let config = spawn_server().await;
    let mut a = sign_up(&config, "alice").await;
    let mut b = sign_up(&config, "bob").await;
    let mut c = sign_up(&config, "carol").await;
    let everyone = vec![
        a.session.me().to_string(),
        b.session.me().to_string(),
        c.session.me().to_string(),
    ];

    // A creates group {A, B, C} named "Team"
    let group = a
        .session
        .rest()
        .create_group("Team", &[b.session.me().to_string(), c.session.me().to_string()])
        .await
        .unwrap();
    assert!(group.is_group);
    assert_eq!(group.name, "Team");

    for user in [&mut a, &mut b, &mut c] {
        user.session.refresh_conversations().await.unwrap();
    }

    // A and B view the group; C stays on the conversation list
    a.session.open_conversation(&group.id).await.unwrap();
    b.session.open_conversation(&group.id).await.unwrap();
    for user in [&a, &b, &c] {
        user.session.identify().unwrap();
    }
    // Each socket is handled in order, so seeing everyone online means
    // every earlier join has been applied.
    for user in [&mut a, &mut b, &mut c] {
        user.until(|e, _| presence_has(e, &everyone)).await;
    }
    assert_eq!(a.session.store().load_state(&group.id), LoadState::Loaded);

    let sent = b.session.send_message("hi").await.unwrap();
    assert_eq!(sent.sender.id, b.session.me());

    // A receives it exactly once
    let sent_id = sent.id.clone();
    a.until(|e, _| matches!(e, ServerEvent::MessageDelivered { message } if message.id == sent_id))
        .await;
    let a_thread = a.session.store().open_messages().unwrap();
    assert_eq!(a_thread.iter().filter(|m| m.id == sent.id).count(), 1);
    assert_eq!(a.session.store().unread_count(&group.id), 0);

    // C is told personally and counts it as unread
    c.until(|_, effect| matches!(effect, Effect::Unread { .. })).await;
    assert_eq!(c.session.store().unread_count(&group.id), 1);
    let summary = c.session.store().summary(&group.id).unwrap();
    assert_eq!(
        summary.latest_message.as_ref().map(|m| m.content.as_str()),
        Some("hi")
    );
    assert!(c.session.store().open_messages().is_none());

    // B's own connection gets no echo and keeps a single copy
    assert!(!b.receives_message_within(Duration::from_millis(300)).await);
    assert_eq!(b.session.store().open_messages().unwrap().len(), 1);

    // Opening the group clears C's unread and loads the stored history
    c.session.open_conversation(&group.id).await.unwrap();
    assert_eq!(c.session.store().unread_count(&group.id), 0);
    let history: Vec<_> = c
        .session
        .store()
        .open_messages()
        .unwrap()
        .iter()
        .map(|m| m.content.clone())
        .collect();
    assert_eq!(history, vec!["hi".to_string()]);
}

#[tokio::test]
async fn test_new_direct_chat_appears_through_live_message() {
    let config = spawn_server().await;
    let mut a = sign_up(&config, "alice").await;
    let mut b = sign_up(&config, "bob").await;

    b.session.refresh_conversations().await.unwrap();
    assert!(b.session.store().summaries().is_empty());
    b.session.identify().unwrap();
    let bob_id = vec![b.session.me().to_string()];
    b.until(|e, _| presence_has(e, &bob_id)).await;

    let chat = a
        .session
        .rest()
        .access_direct(b.session.me())
        .await
        .unwrap();
    a.session.refresh_conversations().await.unwrap();
    a.session.open_conversation(&chat.id).await.unwrap();
    a.session.send_message("hello bob").await.unwrap();

    // bob's store learns about the chat from the refresh the message triggers
    b.until(|_, effect| matches!(effect, Effect::UnknownConversation(_)))
        .await;
    assert_eq!(b.session.store().unread_count(&chat.id), 1);
    assert_eq!(b.session.store().summaries().len(), 1);
}

#[tokio::test]
async fn test_rest_errors_carry_status() {
    let config = spawn_server().await;
    let a = sign_up(&config, "alice").await;

    let err = a
        .session
        .rest()
        .get_conversation("missing")
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(404));

    let err = a.session.rest().search_users("  ").await.unwrap_err();
    assert_eq!(err.status(), Some(400));
}

#[tokio::test]
async fn test_open_without_live_channel_still_resets_and_fetches() {
    let config = spawn_server().await;
    let mut a = sign_up(&config, "alice").await;
    let b = sign_up(&config, "bob").await;

    let chat = a
        .session
        .rest()
        .access_direct(b.session.me())
        .await
        .unwrap();
    a.session.refresh_conversations().await.unwrap();
    a.session.open_conversation(&chat.id).await.unwrap();
    let sent = a.session.send_message("while you were away").await.unwrap();

    // bob's second device whose live channel has already gone away
    let mut rest = RestClient::new(config.clone()).unwrap();
    rest.login("bob@example.com", "secret").await.unwrap();
    let (tx, rx) = mpsc::unbounded_channel::<ClientEvent>();
    drop(rx);
    let mut offline = ChatSession::new(rest, tx, b.session.me().to_string());
    offline.refresh_conversations().await.unwrap();
    offline
        .handle_event(ServerEvent::MessageDelivered {
            message: sent.clone(),
        })
        .await
        .unwrap();
    assert_eq!(offline.store().unread_count(&chat.id), 1);

    offline.open_conversation(&chat.id).await.unwrap();
    assert_eq!(offline.store().unread_count(&chat.id), 0);
    assert_eq!(offline.store().open_conversation(), Some(chat.id.as_str()));
    assert_eq!(offline.store().load_state(&chat.id), LoadState::Loaded);
    let ids: Vec<_> = offline
        .store()
        .open_messages()
        .unwrap()
        .iter()
        .map(|m| m.id.clone())
        .collect();
    assert_eq!(ids, vec![sent.id]);

    // sending still goes through REST
    let reply = offline.send_message("got it").await.unwrap();
    assert_eq!(offline.store().open_messages().unwrap().len(), 2);
    assert_eq!(reply.conversation_id, chat.id);
}

#[tokio::test]
async fn test_reconnect_rejoins_and_refetches_open_history() {
    let config = spawn_server().await;
    let mut a = sign_up(&config, "alice").await;
    let mut b = sign_up(&config, "bob").await;
    let bob_id = b.session.me().to_string();

    let chat = a.session.rest().access_direct(&bob_id).await.unwrap();
    a.session.refresh_conversations().await.unwrap();
    a.session.open_conversation(&chat.id).await.unwrap();

    b.session.refresh_conversations().await.unwrap();
    b.session.open_conversation(&chat.id).await.unwrap();
    b.session.live_connected().await.unwrap();
    assert_eq!(b.session.store().live_status(), LiveStatus::Connected);

    // bob drops off; alice keeps talking
    let User { mut session, live } = b;
    live.close();
    session.live_disconnected();
    assert_eq!(session.store().live_status(), LiveStatus::Disconnected);
    a.session.send_message("missed").await.unwrap();

    session.live_connecting();
    let live = LiveClient::connect(&config, session.rest().token())
        .await
        .unwrap();
    session.set_live(live.sender());
    session.live_connected().await.unwrap();
    let mut b = User { session, live };

    assert_eq!(b.session.store().live_status(), LiveStatus::Connected);
    assert_eq!(b.session.store().load_state(&chat.id), LoadState::Loaded);
    let contents: Vec<_> = b
        .session
        .store()
        .open_messages()
        .unwrap()
        .iter()
        .map(|m| m.content.clone())
        .collect();
    assert_eq!(contents, vec!["missed".to_string()]);

    // the rejoin is applied before the identify that yields this presence
    let bob_only = vec![bob_id];
    b.until(|e, _| presence_has(e, &bob_only)).await;
    let after = a.session.send_message("after").await.unwrap();
    b.until(|e, _| matches!(e, ServerEvent::MessageDelivered { message } if message.id == after.id))
        .await;
    assert_eq!(b.session.store().open_messages().unwrap().len(), 2);
}
