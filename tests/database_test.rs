//! Integration tests for database operations and the transition log.

mod common;

use chrono::Utc;
use common::{create_link, setup_db};
use linkstash::archiver::ArchiveState;
use linkstash::db::{
    apply_transition, delete_link, get_archive, get_archive_by_link_id, get_archives_in_state,
    get_current_state, get_last_transition, get_link, get_transitions, get_transitions_to_state,
    ArchiveContent, ArchiveUpdate, TransitionError,
};
use serde_json::{json, Map, Value};

fn meta(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[tokio::test]
async fn test_link_starts_with_pending_archive() {
    let (db, _temp_dir) = setup_db().await;
    let (link_id, archive_id) = create_link(&db, "https://example.com/a").await;

    let link = get_link(db.pool(), link_id).await.unwrap().unwrap();
    assert_eq!(link.url, "https://example.com/a");

    let archive = get_archive_by_link_id(db.pool(), link_id).await.unwrap().unwrap();
    assert_eq!(archive.id, archive_id);
    assert!(archive.content_html.is_none());

    let transitions = get_transitions(db.pool(), archive_id).await.unwrap();
    assert_eq!(transitions.len(), 1);
    assert_eq!(transitions[0].state(), Some(ArchiveState::Pending));
    assert_eq!(transitions[0].sort_key, 0);
    assert!(transitions[0].most_recent);
    assert_eq!(
        get_current_state(db.pool(), archive_id).await.unwrap(),
        Some(ArchiveState::Pending)
    );
}

#[tokio::test]
async fn test_transitions_are_ordered_with_single_most_recent() {
    let (db, _temp_dir) = setup_db().await;
    let (_link_id, archive_id) = create_link(&db, "https://example.com/b").await;

    apply_transition(db.pool(), archive_id, ArchiveState::Processing, &meta(json!({"attempt": 1})), None)
        .await
        .unwrap();
    apply_transition(db.pool(), archive_id, ArchiveState::Processing, &meta(json!({"attempt": 2})), None)
        .await
        .unwrap();
    let last = apply_transition(
        db.pool(),
        archive_id,
        ArchiveState::Failed,
        &meta(json!({"error_reason": "network_error"})),
        Some(&ArchiveUpdate::Failure {
            error_message: "Gave up".to_string(),
        }),
    )
    .await
    .unwrap();

    assert_eq!(last.sort_key, 30);
    assert_eq!(last.error_reason().as_deref(), Some("network_error"));

    let transitions = get_transitions(db.pool(), archive_id).await.unwrap();
    let keys: Vec<_> = transitions.iter().map(|t| t.sort_key).collect();
    assert_eq!(keys, [0, 10, 20, 30]);
    assert_eq!(transitions.iter().filter(|t| t.most_recent).count(), 1);
    assert!(transitions.last().unwrap().most_recent);

    let processing = get_transitions_to_state(db.pool(), archive_id, ArchiveState::Processing)
        .await
        .unwrap();
    assert_eq!(processing.len(), 2);
    assert_eq!(processing[1].metadata_map()["attempt"], 2);

    let latest = get_last_transition(db.pool(), archive_id).await.unwrap().unwrap();
    assert_eq!(latest.id, last.id);

    let archive = get_archive(db.pool(), archive_id).await.unwrap().unwrap();
    assert_eq!(archive.error_message.as_deref(), Some("Gave up"));
}

#[tokio::test]
async fn test_disallowed_transition_writes_nothing() {
    let (db, _temp_dir) = setup_db().await;
    let (_link_id, archive_id) = create_link(&db, "https://example.com/c").await;

    let err = apply_transition(db.pool(), archive_id, ArchiveState::Completed, &Map::new(), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        TransitionError::NotAllowed {
            from: ArchiveState::Pending,
            to: ArchiveState::Completed
        }
    ));

    let transitions = get_transitions(db.pool(), archive_id).await.unwrap();
    assert_eq!(transitions.len(), 1);
    assert!(transitions[0].most_recent);
}

#[tokio::test]
async fn test_terminal_states_reject_everything() {
    let (db, _temp_dir) = setup_db().await;
    let (_link_id, archive_id) = create_link(&db, "https://example.com/d").await;

    apply_transition(db.pool(), archive_id, ArchiveState::Failed, &Map::new(), None)
        .await
        .unwrap();

    for to in [
        ArchiveState::Pending,
        ArchiveState::Processing,
        ArchiveState::Completed,
        ArchiveState::Failed,
    ] {
        let result = apply_transition(db.pool(), archive_id, to, &Map::new(), None).await;
        assert!(
            matches!(result, Err(TransitionError::NotAllowed { .. })),
            "failed -> {to} should be rejected"
        );
    }
    assert_eq!(get_transitions(db.pool(), archive_id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_content_lands_with_completed_transition() {
    let (db, _temp_dir) = setup_db().await;
    let (_link_id, archive_id) = create_link(&db, "https://example.com/e").await;

    apply_transition(db.pool(), archive_id, ArchiveState::Processing, &Map::new(), None)
        .await
        .unwrap();
    let content = ArchiveContent {
        content_html: Some("<p>Hello</p>".to_string()),
        content_text: Some("Hello".to_string()),
        title: Some("Greeting".to_string()),
        description: None,
        image_url: Some("https://example.com/i.png".to_string()),
        metadata: meta(json!({"open_graph": {}, "twitter": {}})),
        fetched_at: Utc::now(),
    };
    apply_transition(
        db.pool(),
        archive_id,
        ArchiveState::Completed,
        &meta(json!({"http_status": 200})),
        Some(&ArchiveUpdate::Content(content)),
    )
    .await
    .unwrap();

    let archive = get_archive(db.pool(), archive_id).await.unwrap().unwrap();
    assert_eq!(archive.content_html.as_deref(), Some("<p>Hello</p>"));
    assert_eq!(archive.title.as_deref(), Some("Greeting"));
    assert!(archive.fetched_at.is_some());
    assert!(archive.metadata_map().contains_key("open_graph"));
}

#[tokio::test]
async fn test_archives_in_state() {
    let (db, _temp_dir) = setup_db().await;
    let (_, first) = create_link(&db, "https://example.com/1").await;
    let (_, second) = create_link(&db, "https://example.com/2").await;

    apply_transition(db.pool(), second, ArchiveState::Processing, &Map::new(), None)
        .await
        .unwrap();

    let pending = get_archives_in_state(db.pool(), ArchiveState::Pending, 10)
        .await
        .unwrap();
    assert_eq!(pending.iter().map(|a| a.id).collect::<Vec<_>>(), [first]);

    let processing = get_archives_in_state(db.pool(), ArchiveState::Processing, 10)
        .await
        .unwrap();
    assert_eq!(processing.iter().map(|a| a.id).collect::<Vec<_>>(), [second]);
}

#[tokio::test]
async fn test_deleting_link_cascades() {
    let (db, _temp_dir) = setup_db().await;
    let (link_id, archive_id) = create_link(&db, "https://example.com/gone").await;
    apply_transition(db.pool(), archive_id, ArchiveState::Processing, &Map::new(), None)
        .await
        .unwrap();

    assert!(delete_link(db.pool(), link_id).await.unwrap());
    assert!(!delete_link(db.pool(), link_id).await.unwrap());

    assert!(get_link(db.pool(), link_id).await.unwrap().is_none());
    assert!(get_archive(db.pool(), archive_id).await.unwrap().is_none());
    assert!(get_transitions(db.pool(), archive_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_transition_for_unknown_archive() {
    let (db, _temp_dir) = setup_db().await;
    let err = apply_transition(db.pool(), 9999, ArchiveState::Processing, &Map::new(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, TransitionError::MissingHistory { archive_id: 9999 }));
}
