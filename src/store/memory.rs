//! In-memory circle store
//!
//! Backs tests and `--memory` mode. A single RwLock over the whole map
//! gives `update` its atomicity: the closure runs while the write guard is
//! held, so it always sees the latest stored state.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::CircleError;
use crate::model::Circle;

use super::{ApplyFn, CircleStore};

#[derive(Default)]
pub struct MemoryStore {
    circles: RwLock<HashMap<String, Circle>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CircleStore for MemoryStore {
    async fn insert(&self, circle: &Circle) -> Result<(), CircleError> {
        let mut circles = self.circles.write().await;
        circles.insert(circle.id.clone(), circle.clone());
        debug!(circle_id = %circle.id, "Circle inserted (memory)");
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Circle>, CircleError> {
        Ok(self.circles.read().await.get(id).cloned())
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<Circle>, CircleError> {
        let circles = self.circles.read().await;
        Ok(circles
            .values()
            .find(|c| c.edit_token == token || c.view_token == token)
            .cloned())
    }

    async fn update(&self, id: &str, apply: ApplyFn<'_>) -> Result<Option<Circle>, CircleError> {
        let mut circles = self.circles.write().await;
        match circles.get_mut(id) {
            Some(circle) => {
                apply(circle);
                Ok(Some(circle.clone()))
            }
            None => Ok(None),
        }
    }

    async fn flush(&self) -> Result<(), CircleError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{generate_tokens, new_id, CurrentPosition};
    use crate::zone::Zone;
    use chrono::Utc;

    fn sample_circle() -> Circle {
        let (edit_token, view_token) = generate_tokens();
        Circle {
            id: new_id(),
            edit_token,
            view_token,
            created_at: Utc::now(),
            current_position: CurrentPosition {
                x: 75.0,
                y: 50.0,
                zone: Zone::Edge,
                updated_at: Utc::now(),
                note: None,
            },
            birthday_list: Vec::new(),
            position_history: Vec::new(),
            letters: Vec::new(),
            conditions: Vec::new(),
        }
    }

    #[tokio::test]
    async fn insert_then_get_and_token_lookup() {
        let store = MemoryStore::new();
        let circle = sample_circle();
        store.insert(&circle).await.unwrap();

        let by_id = store.get(&circle.id).await.unwrap().unwrap();
        assert_eq!(by_id.id, circle.id);

        let by_edit = store.find_by_token(&circle.edit_token).await.unwrap().unwrap();
        assert_eq!(by_edit.id, circle.id);

        let by_view = store.find_by_token(&circle.view_token).await.unwrap().unwrap();
        assert_eq!(by_view.id, circle.id);

        assert!(store.find_by_token("nonexistent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_applies_against_stored_state() {
        let store = MemoryStore::new();
        let circle = sample_circle();
        store.insert(&circle).await.unwrap();

        let updated = store
            .update(&circle.id, &mut |c| {
                c.current_position.x = 50.0;
                true
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.current_position.x, 50.0);

        // Missing id is a normal None
        assert!(store
            .update("missing", &mut |_| true)
            .await
            .unwrap()
            .is_none());
    }
}
