//! standing-circle - shared circle document service
//!
//! One "circle" document per gift instance: a marker position with its
//! derived standing zone and history, a wish list, letters, and conditions.
//! Two capability tokens are minted per circle - possession of the edit
//! token grants full mutation rights, the view token read plus letters.
//!
//! ## Architecture
//!
//! - **zone**: position → discrete standing zone classification
//! - **model**: the Circle aggregate and token generation
//! - **store**: injected storage backends (memory, sled) with atomic
//!   read-modify-write as the concurrency primitive
//! - **repo**: operations over circles plus the broadcast update feed
//! - **session**: one token bound to live state with access gating
//! - **http** / **ws**: token-addressed REST surface and the live feed
//!
//! The live feed is the sole cross-session ordering channel: a writer's
//! change is visible to the other token holder only through the next push.

pub mod config;
pub mod error;
pub mod http;
pub mod model;
pub mod repo;
pub mod response;
pub mod session;
pub mod store;
pub mod ws;
pub mod zone;

// Re-exports
pub use config::Config;
pub use error::CircleError;
pub use http::HttpServer;
pub use model::{AccessMode, Author, Circle};
pub use repo::{CircleEvent, CircleFeed, CircleRepository, RepositoryConfig, ShareUrls};
pub use session::{CircleSession, SessionState};
pub use store::{CircleStore, MemoryStore, SledStore};
pub use zone::{classify, distance_from_center, zone_from_position, Zone, ZoneInfo};
