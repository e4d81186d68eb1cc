//! Sled-backed circle store
//!
//! Circles are rmp-serde encoded in a `circles` tree. A `tokens` tree maps
//! each capability token to its circle id so lookup never scans documents;
//! a dashmap hot cache in front of it keeps the common path off disk.
//!
//! `update` is a compare-and-swap loop: read the current bytes, apply the
//! closure, swap only if the stored bytes are unchanged. Contention retries
//! internally; exhaustion surfaces as `CircleError::Conflict`.

use std::path::Path;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::error::CircleError;
use crate::model::Circle;

use super::{ApplyFn, CircleStore};

/// CAS attempts before giving up on a contended update.
const MAX_CAS_RETRIES: usize = 16;

/// Configuration for the sled store.
#[derive(Debug, Clone)]
pub struct SledStoreConfig {
    /// Path to the sled database.
    pub db_path: std::path::PathBuf,
    /// Cache size in bytes.
    pub cache_size: u64,
}

impl Default for SledStoreConfig {
    fn default() -> Self {
        Self {
            db_path: dirs::data_local_dir()
                .unwrap_or_else(|| std::path::PathBuf::from("."))
                .join("standing-circle")
                .join("circles.sled"),
            cache_size: 16 * 1024 * 1024,
        }
    }
}

pub struct SledStore {
    db: sled::Db,
    circles: sled::Tree,
    tokens: sled::Tree,
    /// token -> circle id, warmed from the tokens tree at open.
    token_cache: DashMap<String, String>,
}

impl SledStore {
    pub async fn new(config: SledStoreConfig) -> Result<Self, CircleError> {
        if let Some(parent) = config.db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let db = sled::Config::new()
            .path(&config.db_path)
            .cache_capacity(config.cache_size)
            .open()?;

        let circles = db.open_tree("circles")?;
        let tokens = db.open_tree("tokens")?;

        let token_cache = DashMap::new();
        for item in tokens.iter() {
            let (token, id) = item?;
            token_cache.insert(
                String::from_utf8_lossy(&token).to_string(),
                String::from_utf8_lossy(&id).to_string(),
            );
        }

        info!(
            path = %config.db_path.display(),
            circles = circles.len(),
            "SledStore opened"
        );

        Ok(Self {
            db,
            circles,
            tokens,
            token_cache,
        })
    }

    pub async fn at_path(path: impl AsRef<Path>) -> Result<Self, CircleError> {
        Self::new(SledStoreConfig {
            db_path: path.as_ref().to_path_buf(),
            ..Default::default()
        })
        .await
    }

    fn encode(circle: &Circle) -> Result<Vec<u8>, CircleError> {
        rmp_serde::to_vec_named(circle).map_err(|e| CircleError::Serialization(e.to_string()))
    }

    fn decode(bytes: &[u8]) -> Result<Circle, CircleError> {
        rmp_serde::from_slice(bytes).map_err(|e| CircleError::Serialization(e.to_string()))
    }
}

#[async_trait]
impl CircleStore for SledStore {
    async fn insert(&self, circle: &Circle) -> Result<(), CircleError> {
        let bytes = Self::encode(circle)?;
        self.circles.insert(circle.id.as_bytes(), bytes)?;

        for token in [&circle.edit_token, &circle.view_token] {
            self.tokens.insert(token.as_bytes(), circle.id.as_bytes())?;
            self.token_cache.insert(token.clone(), circle.id.clone());
        }

        debug!(circle_id = %circle.id, "Circle inserted (sled)");
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Circle>, CircleError> {
        match self.circles.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<Circle>, CircleError> {
        let id = match self.token_cache.get(token) {
            Some(id) => id.clone(),
            None => match self.tokens.get(token.as_bytes())? {
                Some(bytes) => {
                    let id = String::from_utf8_lossy(&bytes).to_string();
                    self.token_cache.insert(token.to_string(), id.clone());
                    id
                }
                None => return Ok(None),
            },
        };
        self.get(&id).await
    }

    async fn update(&self, id: &str, apply: ApplyFn<'_>) -> Result<Option<Circle>, CircleError> {
        for attempt in 0..MAX_CAS_RETRIES {
            let old_bytes = match self.circles.get(id.as_bytes())? {
                Some(bytes) => bytes,
                None => return Ok(None),
            };

            let mut circle = Self::decode(&old_bytes)?;
            apply(&mut circle);
            let new_bytes = Self::encode(&circle)?;

            match self.circles.compare_and_swap(
                id.as_bytes(),
                Some(old_bytes),
                Some(new_bytes),
            )? {
                Ok(()) => return Ok(Some(circle)),
                Err(_) => {
                    debug!(circle_id = %id, attempt = attempt, "CAS contention, retrying");
                }
            }
        }

        warn!(circle_id = %id, retries = MAX_CAS_RETRIES, "Update retries exhausted");
        Err(CircleError::Conflict(id.to_string()))
    }

    async fn flush(&self) -> Result<(), CircleError> {
        self.db.flush_async().await?;
        Ok(())
    }
}
