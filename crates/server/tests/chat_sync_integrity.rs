use parley_server::core::config::{AppState, ServerConfig, TEST_HASH_COST};
use parley_server::directory::DirectoryStore;
use std::fs;
use tempfile::tempdir;

#[tokio::test]
async fn test_directory_snapshot_integrity() {
    let dir = tempdir().unwrap();
    let config = ServerConfig::with_base_dir(dir.path());
    let path = config.directory_path();

    let (chat_id, message_id) = {
        // 1. Create a chat and add a message in a scoped block
        let store = DirectoryStore::open(path.clone()).await.unwrap();
        let chat = store.access_direct("user1", "user2").await.unwrap();
        let message = store
            .send_message("user1", &chat.record.id, "Hello Integrity!")
            .await
            .unwrap();
        (chat.record.id, message.id)
        // store is dropped here
    };

    assert!(path.exists(), "Directory snapshot should exist");
    assert!(
        !path.with_extension("tmp").exists(),
        "Temp file should be renamed away"
    );

    // 2. Reload from disk
    let store = DirectoryStore::open(path.clone()).await.unwrap();
    let messages = store.list_messages("user2", &chat_id).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].content, "Hello Integrity!");
    assert!(store.message(&chat_id, &message_id).await.is_some());

    let entry = store.get("user1", &chat_id).await.unwrap();
    assert_eq!(
        entry.latest.map(|m| m.id),
        Some(message_id),
        "latest message pointer should survive reload"
    );

    // 3. A corrupt snapshot refuses to load instead of starting empty
    fs::write(&path, "{ malformed json ...").unwrap();
    assert!(DirectoryStore::open(path).await.is_err());
}

#[tokio::test]
async fn test_cascade_delete_is_durable() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("directory.json");

    let chat_id = {
        let store = DirectoryStore::open(path.clone()).await.unwrap();
        let chat = store.access_direct("a", "b").await.unwrap();
        store.send_message("a", &chat.record.id, "one").await.unwrap();
        store.send_message("b", &chat.record.id, "two").await.unwrap();
        assert!(dir
            .path()
            .join("messages")
            .join(format!("{}.json", chat.record.id))
            .exists());
        store.delete("a", &chat.record.id).await.unwrap();
        chat.record.id
    };

    let raw = fs::read_to_string(&path).unwrap();
    assert!(!raw.contains(&chat_id));
    assert!(!dir
        .path()
        .join("messages")
        .join(format!("{}.json", chat_id))
        .exists());

    let store = DirectoryStore::open(path).await.unwrap();
    assert!(store.list_for("a").await.is_empty());
}

#[tokio::test]
async fn test_app_state_opens_on_disk() {
    let dir = tempdir().unwrap();
    let config = ServerConfig {
        hash_cost: TEST_HASH_COST,
        ..ServerConfig::with_base_dir(dir.path())
    };
    let users_db = config.users_db_path();

    let state = AppState::open(config).await.unwrap();
    let (user, session) = state.auth.signup("Ann", "ann@x.io", "pw").await.unwrap();
    assert_eq!(state.auth.validate_session(&session.token).await.unwrap().id, user.id);
    assert!(users_db.exists());
}
