//! CircleRepository - operations over circle documents plus live fan-out
//!
//! All mutations go through the injected `CircleStore`'s atomic `update`,
//! so the closure always runs against authoritative stored state. Every
//! mutation that changed something broadcasts the post-image; `subscribe`
//! hands out a feed filtered to one circle id. The feed is the only
//! cross-session ordering channel.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::CircleError;
use crate::model::{
    generate_tokens, new_id, AccessMode, Author, BirthdayItem, Circle, Condition,
    CurrentPosition, LetterEntry, Position, PositionHistoryEntry,
};
use crate::store::CircleStore;
use crate::zone::{zone_from_position, Zone};

/// Repository tuning knobs.
#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    /// Maximum retained position history entries; 0 keeps the full trail.
    pub history_retention: usize,
    /// Broadcast channel capacity for the update feed.
    pub channel_capacity: usize,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            history_retention: 0,
            channel_capacity: 256,
        }
    }
}

/// One push on the update feed.
#[derive(Debug, Clone)]
pub enum CircleEvent {
    /// The circle changed; carries the authoritative post-image.
    Updated(Circle),
    /// The circle is gone from the store.
    Removed(String),
}

impl CircleEvent {
    fn circle_id(&self) -> &str {
        match self {
            CircleEvent::Updated(circle) => &circle.id,
            CircleEvent::Removed(id) => id,
        }
    }
}

/// Live feed for one circle. Dropping it releases the subscription; `close`
/// does so explicitly and is safe to call once (it consumes the feed).
pub struct CircleFeed {
    circle_id: String,
    rx: broadcast::Receiver<CircleEvent>,
}

impl CircleFeed {
    /// Next authoritative snapshot for this circle.
    ///
    /// `Some(None)` means the document was removed; outer `None` means the
    /// repository is gone and the feed is finished. Lagged receivers skip
    /// to the newest events rather than erroring out.
    pub async fn next(&mut self) -> Option<Option<Circle>> {
        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    if event.circle_id() != self.circle_id {
                        continue;
                    }
                    return match event {
                        CircleEvent::Updated(circle) => Some(Some(circle)),
                        CircleEvent::Removed(_) => Some(None),
                    };
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(circle_id = %self.circle_id, skipped = n, "Feed lagged, skipping");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn close(self) {
        debug!(circle_id = %self.circle_id, "Feed closed");
    }
}

/// Share URLs derived from a circle's tokens.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ShareUrls {
    pub edit_url: String,
    pub view_url: String,
}

pub struct CircleRepository {
    store: Arc<dyn CircleStore>,
    config: RepositoryConfig,
    events: broadcast::Sender<CircleEvent>,
}

impl CircleRepository {
    pub fn new(store: Arc<dyn CircleStore>, config: RepositoryConfig) -> Self {
        let (events, _) = broadcast::channel(config.channel_capacity);
        Self {
            store,
            config,
            events,
        }
    }

    /// Fixed timestamp stamped on the seed position and condition.
    fn seed_timestamp() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 28, 16, 11, 0).unwrap()
    }

    /// Create and persist a fresh circle.
    ///
    /// Every call mints a new aggregate; there is no idempotency here. The
    /// marker starts at the edge with one seeded history entry and one
    /// completed seed condition.
    pub async fn create(&self) -> Result<Circle, CircleError> {
        let (edit_token, view_token) = generate_tokens();
        let seeded_at = Self::seed_timestamp();
        let seed_note = "Initial position - hanging on by your humor";

        let circle = Circle {
            id: new_id(),
            edit_token,
            view_token,
            created_at: Utc::now(),
            current_position: CurrentPosition {
                x: 75.0,
                y: 50.0,
                zone: Zone::Edge,
                updated_at: seeded_at,
                note: Some(seed_note.to_string()),
            },
            birthday_list: Vec::new(),
            position_history: vec![PositionHistoryEntry {
                id: new_id(),
                position: Position {
                    x: 75.0,
                    y: 50.0,
                    zone: Zone::Edge,
                },
                timestamp: seeded_at,
                note: Some(seed_note.to_string()),
            }],
            letters: Vec::new(),
            conditions: vec![Condition {
                id: new_id(),
                text: "Standing granted for the last six months".to_string(),
                added_at: seeded_at,
                completed: true,
            }],
        };

        self.store.insert(&circle).await?;
        info!(circle_id = %circle.id, "Circle created");
        Ok(circle)
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<Circle>, CircleError> {
        self.store.get(id).await
    }

    /// Resolve a capability token to a circle and the mode it grants.
    pub async fn get_by_token(
        &self,
        token: &str,
    ) -> Result<Option<(Circle, AccessMode)>, CircleError> {
        let circle = match self.store.find_by_token(token).await? {
            Some(circle) => circle,
            None => return Ok(None),
        };
        match circle.mode_for_token(token) {
            Some(mode) => Ok(Some((circle, mode))),
            // Index pointed at a circle whose tokens no longer match.
            None => Ok(None),
        }
    }

    /// Commit a new marker position.
    ///
    /// The zone is derived here, a fresh history entry is prepended, and
    /// both land in one atomic update against stored history so concurrent
    /// commits from the other token holder are never dropped.
    pub async fn update_position(
        &self,
        id: &str,
        x: f64,
        y: f64,
        note: Option<String>,
    ) -> Result<Circle, CircleError> {
        let retention = self.config.history_retention;
        self.mutate(id, move |circle| {
            let now = Utc::now();
            let zone = zone_from_position(x, y);
            circle.current_position = CurrentPosition {
                x,
                y,
                zone,
                updated_at: now,
                note: note.clone(),
            };
            circle.position_history.insert(
                0,
                PositionHistoryEntry {
                    id: new_id(),
                    position: Position { x, y, zone },
                    timestamp: now,
                    note: note.clone(),
                },
            );
            if retention > 0 && circle.position_history.len() > retention {
                circle.position_history.truncate(retention);
            }
            true
        })
        .await
    }

    pub async fn add_birthday_item(&self, id: &str, text: String) -> Result<Circle, CircleError> {
        self.mutate(id, move |circle| {
            circle.birthday_list.push(BirthdayItem {
                id: new_id(),
                text: text.clone(),
                added_at: Utc::now(),
                obtained: false,
            });
            true
        })
        .await
    }

    /// Remove a wish item by id, against the authoritative list.
    pub async fn remove_birthday_item(
        &self,
        id: &str,
        item_id: &str,
    ) -> Result<Circle, CircleError> {
        let item_id = item_id.to_string();
        self.mutate(id, move |circle| {
            let before = circle.birthday_list.len();
            circle.birthday_list.retain(|item| item.id != item_id);
            circle.birthday_list.len() != before
        })
        .await
    }

    pub async fn toggle_birthday_item(
        &self,
        id: &str,
        item_id: &str,
    ) -> Result<Circle, CircleError> {
        let item_id = item_id.to_string();
        self.mutate(id, move |circle| {
            match circle.birthday_list.iter_mut().find(|i| i.id == item_id) {
                Some(item) => {
                    item.obtained = !item.obtained;
                    true
                }
                None => false,
            }
        })
        .await
    }

    /// Prepend a letter (newest first). Unlike every other mutation this is
    /// open to both token holders; the gating lives in the session layer.
    pub async fn add_letter(
        &self,
        id: &str,
        author: Author,
        content: String,
        title: Option<String>,
    ) -> Result<Circle, CircleError> {
        self.mutate(id, move |circle| {
            circle.letters.insert(
                0,
                LetterEntry {
                    id: new_id(),
                    author,
                    content: content.clone(),
                    created_at: Utc::now(),
                    title: title.clone(),
                },
            );
            true
        })
        .await
    }

    pub async fn add_condition(&self, id: &str, text: String) -> Result<Circle, CircleError> {
        self.mutate(id, move |circle| {
            circle.conditions.push(Condition {
                id: new_id(),
                text: text.clone(),
                added_at: Utc::now(),
                completed: false,
            });
            true
        })
        .await
    }

    pub async fn remove_condition(
        &self,
        id: &str,
        condition_id: &str,
    ) -> Result<Circle, CircleError> {
        let condition_id = condition_id.to_string();
        self.mutate(id, move |circle| {
            let before = circle.conditions.len();
            circle.conditions.retain(|c| c.id != condition_id);
            circle.conditions.len() != before
        })
        .await
    }

    pub async fn toggle_condition(
        &self,
        id: &str,
        condition_id: &str,
    ) -> Result<Circle, CircleError> {
        let condition_id = condition_id.to_string();
        self.mutate(id, move |circle| {
            match circle.conditions.iter_mut().find(|c| c.id == condition_id) {
                Some(condition) => {
                    condition.completed = !condition.completed;
                    true
                }
                None => false,
            }
        })
        .await
    }

    /// Open a live feed for one circle.
    pub fn subscribe(&self, id: &str) -> CircleFeed {
        debug!(circle_id = %id, "Feed opened");
        CircleFeed {
            circle_id: id.to_string(),
            rx: self.events.subscribe(),
        }
    }

    /// Pure derivation of share URLs from a circle's tokens.
    pub fn share_urls(circle: &Circle, origin: &str) -> ShareUrls {
        let origin = origin.trim_end_matches('/');
        ShareUrls {
            edit_url: format!("{}/circle/{}", origin, circle.edit_token),
            view_url: format!("{}/circle/{}", origin, circle.view_token),
        }
    }

    /// Run a closure through the store's atomic update and broadcast the
    /// post-image. Missing circles surface as `NotFound`.
    async fn mutate<F>(&self, id: &str, mut apply: F) -> Result<Circle, CircleError>
    where
        F: FnMut(&mut Circle) -> bool + Send,
    {
        let mut changed = false;
        let result = self
            .store
            .update(id, &mut |circle| {
                changed = apply(circle);
                changed
            })
            .await?;

        match result {
            Some(circle) => {
                if changed && self.events.receiver_count() > 0 {
                    let _ = self.events.send(CircleEvent::Updated(circle.clone()));
                }
                Ok(circle)
            }
            None => {
                if self.events.receiver_count() > 0 {
                    let _ = self.events.send(CircleEvent::Removed(id.to_string()));
                }
                Err(CircleError::NotFound(id.to_string()))
            }
        }
    }
}
