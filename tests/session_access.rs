//! Session binding and access gating
//!
//! Covers the token state machine (edit / view / not-found), the edit-only
//! gating with the letters exception, snapshot refresh from the live feed,
//! and share URL derivation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use standing_circle::model::{Author, Circle};
use standing_circle::store::{ApplyFn, CircleStore, MemoryStore};
use standing_circle::zone::Zone;
use standing_circle::{
    CircleError, CircleRepository, CircleSession, RepositoryConfig, SessionState,
};
use tokio::sync::Notify;

const ORIGIN: &str = "https://circle.example.org";

fn repo() -> Arc<CircleRepository> {
    Arc::new(CircleRepository::new(
        Arc::new(MemoryStore::new()),
        RepositoryConfig::default(),
    ))
}

/// Wait for the session's feed pump to apply pending pushes.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn binding_resolves_edit_view_and_not_found() {
    let repo = repo();
    let circle = repo.create().await.unwrap();

    let edit = CircleSession::bind(Arc::clone(&repo), &circle.edit_token).await;
    assert_eq!(edit.state(), SessionState::Edit);
    assert_eq!(edit.circle().await.unwrap().id, circle.id);

    let view = CircleSession::bind(Arc::clone(&repo), &circle.view_token).await;
    assert_eq!(view.state(), SessionState::View);

    let missing = CircleSession::bind(Arc::clone(&repo), "nonexistent").await;
    assert_eq!(missing.state(), SessionState::NotFound);
    assert!(missing.circle().await.is_none());

    let empty = CircleSession::bind(repo, "").await;
    assert_eq!(empty.state(), SessionState::NotFound);
}

#[tokio::test]
async fn view_mode_mutations_are_no_ops_except_letters() {
    let repo = repo();
    let circle = repo.create().await.unwrap();
    let view = CircleSession::bind(Arc::clone(&repo), &circle.view_token).await;

    assert!(!view.add_item("a pony".to_string()).await.unwrap());
    assert!(!view.update_marker_position(50.0, 50.0, None).await.unwrap());
    assert!(!view.add_condition_item("no".to_string()).await.unwrap());
    assert!(!view.toggle_condition_item("whatever").await.unwrap());

    let unchanged = repo.get_by_id(&circle.id).await.unwrap().unwrap();
    assert!(unchanged.birthday_list.is_empty());
    assert_eq!(unchanged.position_history.len(), 1);
    assert_eq!(unchanged.conditions.len(), 1);

    // The deliberate exception: the non-owning party may leave a letter
    assert!(view
        .add_new_letter(Author::Recipient, "miss you".to_string(), None)
        .await
        .unwrap());
    let with_letter = repo.get_by_id(&circle.id).await.unwrap().unwrap();
    assert_eq!(with_letter.letters.len(), 1);
    assert_eq!(with_letter.letters[0].author, Author::Recipient);
}

#[tokio::test]
async fn edit_mode_mutations_apply() {
    let repo = repo();
    let circle = repo.create().await.unwrap();
    let edit = CircleSession::bind(Arc::clone(&repo), &circle.edit_token).await;

    assert!(edit.add_item("a telescope".to_string()).await.unwrap());
    assert!(edit
        .update_marker_position(50.0, 50.0, Some("forgiven".to_string()))
        .await
        .unwrap());
    assert!(edit
        .add_new_letter(Author::Primary, "hello".to_string(), Some("day one".to_string()))
        .await
        .unwrap());

    let latest = repo.get_by_id(&circle.id).await.unwrap().unwrap();
    assert_eq!(latest.birthday_list.len(), 1);
    assert_eq!(latest.current_position.zone, Zone::Center);
    assert_eq!(latest.letters.len(), 1);
}

#[tokio::test]
async fn snapshot_follows_remote_writes() {
    let repo = repo();
    let circle = repo.create().await.unwrap();

    // One session per token holder, like the two browsers in the product
    let edit = CircleSession::bind(Arc::clone(&repo), &circle.edit_token).await;
    let view = CircleSession::bind(Arc::clone(&repo), &circle.view_token).await;

    edit.update_marker_position(50.0, 50.0, Some("moved".to_string()))
        .await
        .unwrap();
    settle().await;

    // The viewer observes the edit through the feed push
    let seen = view.circle().await.unwrap();
    assert_eq!(seen.current_position.zone, Zone::Center);
    assert_eq!(seen.current_position.note.as_deref(), Some("moved"));

    // And the pushed state is authoritative for the editor too
    let editor_seen = edit.circle().await.unwrap();
    assert_eq!(editor_seen.current_position.zone, Zone::Center);
}

#[tokio::test]
async fn closed_session_stops_following() {
    let repo = repo();
    let circle = repo.create().await.unwrap();

    let mut view = CircleSession::bind(Arc::clone(&repo), &circle.view_token).await;
    view.close();
    // Guarded: a second close is a no-op
    view.close();

    repo.add_condition(&circle.id, "after close".to_string())
        .await
        .unwrap();
    settle().await;

    let snapshot = view.circle().await.unwrap();
    assert!(snapshot.conditions.iter().all(|c| c.text != "after close"));
}

/// Store wrapper whose token lookup reads early and returns late, so a
/// write can land between the lookup's read and the session's subscribe.
struct StallingLookupStore {
    inner: MemoryStore,
    lookup_read: Notify,
    lookup_release: Notify,
}

impl StallingLookupStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            lookup_read: Notify::new(),
            lookup_release: Notify::new(),
        }
    }
}

#[async_trait]
impl CircleStore for StallingLookupStore {
    async fn insert(&self, circle: &Circle) -> Result<(), CircleError> {
        self.inner.insert(circle).await
    }

    async fn get(&self, id: &str) -> Result<Option<Circle>, CircleError> {
        self.inner.get(id).await
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<Circle>, CircleError> {
        let found = self.inner.find_by_token(token).await;
        self.lookup_read.notify_one();
        self.lookup_release.notified().await;
        found
    }

    async fn update(&self, id: &str, apply: ApplyFn<'_>) -> Result<Option<Circle>, CircleError> {
        self.inner.update(id, apply).await
    }

    async fn flush(&self) -> Result<(), CircleError> {
        self.inner.flush().await
    }
}

/// A write that lands while the bind's token lookup is in flight must show
/// up in the bound snapshot, not sit invisible until some later push.
#[tokio::test]
async fn bind_never_holds_a_snapshot_older_than_a_racing_write() {
    let store = Arc::new(StallingLookupStore::new());
    let repo = Arc::new(CircleRepository::new(
        Arc::clone(&store) as Arc<dyn CircleStore>,
        RepositoryConfig::default(),
    ));
    let circle = repo.create().await.unwrap();

    let bind_repo = Arc::clone(&repo);
    let edit_token = circle.edit_token.clone();
    let binding = tokio::spawn(async move { CircleSession::bind(bind_repo, &edit_token).await });

    // The lookup has read its (soon stale) copy; land a write before
    // letting the bind continue
    store.lookup_read.notified().await;
    repo.update_position(&circle.id, 50.0, 50.0, Some("missed".to_string()))
        .await
        .unwrap();
    store.lookup_release.notify_one();

    let session = binding.await.unwrap();
    assert_eq!(session.state(), SessionState::Edit);

    let held = session.circle().await.unwrap();
    assert_eq!(held.current_position.note.as_deref(), Some("missed"));
    assert_eq!(held.current_position.zone, Zone::Center);
    assert_eq!(held.position_history.len(), 2);
}

#[tokio::test]
async fn share_urls_require_a_bound_circle() {
    let repo = repo();
    let circle = repo.create().await.unwrap();

    let missing = CircleSession::bind(Arc::clone(&repo), "nonexistent").await;
    assert!(missing.share_urls(ORIGIN).await.is_none());

    let edit = CircleSession::bind(repo, &circle.edit_token).await;
    let urls = edit.share_urls(ORIGIN).await.unwrap();
    assert_eq!(
        urls.edit_url,
        format!("{}/circle/{}", ORIGIN, circle.edit_token)
    );
    assert_eq!(
        urls.view_url,
        format!("{}/circle/{}", ORIGIN, circle.view_token)
    );
}
