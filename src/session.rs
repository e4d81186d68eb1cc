//! CircleSession - binds one capability token to live circle state
//!
//! The session resolves its token once (`loading -> edit | view |
//! not-found`; not-found is terminal), then pumps every feed push into its
//! held snapshot for the lifetime of the binding. The snapshot is always
//! overwritten by the latest push - the feed is authoritative, local state
//! never is.
//!
//! Mutations are gated on edit mode and resolve as no-ops otherwise. The
//! one deliberate exception is `add_new_letter`: the non-owning party may
//! still leave a letter.

use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::CircleError;
use crate::model::{AccessMode, Author, Circle};
use crate::repo::{CircleRepository, ShareUrls};

/// Resolution state of a bound token.
///
/// `Loading` is the in-flight state while `bind` resolves; a returned
/// session is already past it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Loading,
    Edit,
    View,
    NotFound,
}

impl From<AccessMode> for SessionState {
    fn from(mode: AccessMode) -> Self {
        match mode {
            AccessMode::Edit => SessionState::Edit,
            AccessMode::View => SessionState::View,
        }
    }
}

pub struct CircleSession {
    repo: Arc<CircleRepository>,
    state: SessionState,
    circle_id: Option<String>,
    snapshot: Arc<RwLock<Option<Circle>>>,
    pump: Option<JoinHandle<()>>,
}

impl CircleSession {
    /// Resolve a token and open the live binding.
    ///
    /// Lookup failure and no-match both land in `NotFound`; there is no
    /// automatic retry. Callers present a fresh session for a new token.
    pub async fn bind(repo: Arc<CircleRepository>, token: &str) -> Self {
        if token.is_empty() {
            return Self::unbound(repo, SessionState::NotFound);
        }

        let resolved = match repo.get_by_token(token).await {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!(error = %e, "Token lookup failed");
                return Self::unbound(repo, SessionState::NotFound);
            }
        };

        let (circle, mode) = match resolved {
            Some(pair) => pair,
            None => {
                debug!("Token did not resolve to a circle");
                return Self::unbound(repo, SessionState::NotFound);
            }
        };

        info!(circle_id = %circle.id, mode = ?mode, "Session bound");

        let circle_id = circle.id.clone();
        // Subscribe before taking the snapshot: a write landing between
        // the token lookup and this point is either in the re-read below
        // or buffered on the feed, never lost.
        let mut feed = repo.subscribe(&circle_id);
        let current = repo
            .get_by_id(&circle_id)
            .await
            .ok()
            .flatten()
            .unwrap_or(circle);
        let snapshot = Arc::new(RwLock::new(Some(current)));
        let pump_snapshot = Arc::clone(&snapshot);
        let pump = tokio::spawn(async move {
            while let Some(push) = feed.next().await {
                // The latest push is authoritative, even over optimistic
                // local reads.
                *pump_snapshot.write().await = push;
            }
        });

        Self {
            repo,
            state: SessionState::from(mode),
            circle_id: Some(circle_id),
            snapshot,
            pump: Some(pump),
        }
    }

    fn unbound(repo: Arc<CircleRepository>, state: SessionState) -> Self {
        Self {
            repo,
            state,
            circle_id: None,
            snapshot: Arc::new(RwLock::new(None)),
            pump: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Latest held snapshot; refreshed by every feed push.
    pub async fn circle(&self) -> Option<Circle> {
        self.snapshot.read().await.clone()
    }

    /// Share URLs for the bound circle, or `None` while nothing is bound.
    pub async fn share_urls(&self, origin: &str) -> Option<ShareUrls> {
        self.snapshot
            .read()
            .await
            .as_ref()
            .map(|circle| CircleRepository::share_urls(circle, origin))
    }

    /// Commit a marker position. Edit mode only; `Ok(false)` when gated off.
    pub async fn update_marker_position(
        &self,
        x: f64,
        y: f64,
        note: Option<String>,
    ) -> Result<bool, CircleError> {
        let Some(id) = self.writable_id() else {
            return Ok(false);
        };
        self.repo.update_position(&id, x, y, note).await?;
        Ok(true)
    }

    pub async fn add_item(&self, text: String) -> Result<bool, CircleError> {
        let Some(id) = self.writable_id() else {
            return Ok(false);
        };
        self.repo.add_birthday_item(&id, text).await?;
        Ok(true)
    }

    pub async fn remove_item(&self, item_id: &str) -> Result<bool, CircleError> {
        let Some(id) = self.writable_id() else {
            return Ok(false);
        };
        self.repo.remove_birthday_item(&id, item_id).await?;
        Ok(true)
    }

    pub async fn toggle_item(&self, item_id: &str) -> Result<bool, CircleError> {
        let Some(id) = self.writable_id() else {
            return Ok(false);
        };
        self.repo.toggle_birthday_item(&id, item_id).await?;
        Ok(true)
    }

    /// Add a letter. Allowed in both edit and view mode.
    pub async fn add_new_letter(
        &self,
        author: Author,
        content: String,
        title: Option<String>,
    ) -> Result<bool, CircleError> {
        let Some(id) = self.bound_id() else {
            return Ok(false);
        };
        self.repo.add_letter(&id, author, content, title).await?;
        Ok(true)
    }

    pub async fn add_condition_item(&self, text: String) -> Result<bool, CircleError> {
        let Some(id) = self.writable_id() else {
            return Ok(false);
        };
        self.repo.add_condition(&id, text).await?;
        Ok(true)
    }

    pub async fn remove_condition_item(&self, condition_id: &str) -> Result<bool, CircleError> {
        let Some(id) = self.writable_id() else {
            return Ok(false);
        };
        self.repo.remove_condition(&id, condition_id).await?;
        Ok(true)
    }

    pub async fn toggle_condition_item(&self, condition_id: &str) -> Result<bool, CircleError> {
        let Some(id) = self.writable_id() else {
            return Ok(false);
        };
        self.repo.toggle_condition(&id, condition_id).await?;
        Ok(true)
    }

    /// Tear down the live binding. Guarded: runs at most once.
    pub fn close(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
            debug!(circle_id = ?self.circle_id, "Session closed");
        }
    }

    fn bound_id(&self) -> Option<String> {
        match self.state {
            SessionState::Edit | SessionState::View => self.circle_id.clone(),
            _ => None,
        }
    }

    fn writable_id(&self) -> Option<String> {
        match self.state {
            SessionState::Edit => self.circle_id.clone(),
            _ => None,
        }
    }
}

impl Drop for CircleSession {
    fn drop(&mut self) {
        self.close();
    }
}
