//! Storage backends for circle documents
//!
//! The repository never touches a database directly; it goes through the
//! `CircleStore` trait, constructed and injected explicitly. Two backends:
//! an in-memory map (tests, ephemeral mode) and sled (durable).
//!
//! The `update` operation is the load-bearing one: it applies a closure to
//! the *stored* document under the backend's atomicity primitive, so
//! concurrent writers to the same circle cannot drop each other's changes.

mod memory;
mod sled_store;

pub use memory::MemoryStore;
pub use sled_store::{SledStore, SledStoreConfig};

use async_trait::async_trait;

use crate::error::CircleError;
use crate::model::Circle;

/// Closure applied to a circle inside the store's atomic update. Returns
/// whether anything changed; the repository only broadcasts post-images
/// for applications that report a change.
pub type ApplyFn<'a> = &'a mut (dyn FnMut(&mut Circle) -> bool + Send);

#[async_trait]
pub trait CircleStore: Send + Sync {
    /// Persist a freshly created circle.
    async fn insert(&self, circle: &Circle) -> Result<(), CircleError>;

    /// Fetch by id. `None` is a normal outcome, not an error.
    async fn get(&self, id: &str) -> Result<Option<Circle>, CircleError>;

    /// Fetch by capability token, matching edit then view token.
    async fn find_by_token(&self, token: &str) -> Result<Option<Circle>, CircleError>;

    /// Atomic read-modify-write against stored state.
    ///
    /// Returns the post-image, or `None` if no circle has this id. The
    /// closure may run more than once if the backend retries on contention.
    async fn update(&self, id: &str, apply: ApplyFn<'_>) -> Result<Option<Circle>, CircleError>;

    /// Flush buffered writes to durable storage (no-op for memory).
    async fn flush(&self) -> Result<(), CircleError>;
}
