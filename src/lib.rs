//! # Pet Nest
//!
//! Local persistence for a pet-owner social app: pets, photos, a feed,
//! vaccines, a family group, users, follows and settings, each stored as
//! JSON under one key of a quota-limited key-value store.
//!
//! ## Core Concepts
//!
//! - **Stores**: pluggable [`KeyValueStore`] backends that report capacity
//! - **Collections**: newest-first arrays, id-addressed repositories and
//!   default-merged documents
//! - **Trimming**: saves drop the oldest entries until the list fits
//! - **Events**: one typed [`ChangeEvent`] per successful mutation
//! - **Resolution**: weak ids resolve at read time to [`Resolved`] values
//!
//! ## Example
//!
//! ```ignore
//! use petnest::{NestConfig, PetNest, StaticIdentity, Topic};
//! use std::sync::Arc;
//!
//! let nest = PetNest::open_or_create(
//!     NestConfig::at("./my-nest"),
//!     Arc::new(StaticIdentity::new("alice")),
//! )?;
//!
//! let feed_updates = nest.bus().subscribe_to(Topic::Feed);
//!
//! let rex = nest.pets().add(json!({ "name": "Rex", "species": "dog" }))?;
//! let photo = nest.upload_photo(data_uri, "Walk", vec![rex.id.clone()])?;
//! nest.feed().publish_photo(photo.id, "Walk", vec![rex.id])?;
//!
//! for post in nest.feed_view().render() {
//!     let image = post.image.map(|i| i.unwrap_or(placeholder.clone()));
//! }
//! ```

pub mod backup;
pub mod collections;
pub mod config;
pub mod error;
pub mod events;
pub mod identity;
pub mod kv;
pub mod nest;
pub mod quota;
pub mod resolve;
pub mod types;

// Re-exports
pub use backup::{Backup, ImportReport, BACKUP_VERSION};
pub use collections::family::{Family, FamilyStore, Invite, InviteStatus, Member, MemberStatus, Role};
pub use collections::feed::{Comment, Feed, FeedPost, PostKind};
pub use collections::pets::{Pet, PetSummary, Pets};
pub use collections::photos::{Photo, Photos};
pub use collections::settings::{
    NotificationSettings, PrivacySettings, Settings, SettingsStore, Theme,
};
pub use collections::social::{FollowCounts, FollowEdge, FollowGraph, UserRecord, Users};
pub use collections::vaccines::{Vaccine, Vaccines};
pub use collections::{Collection, Document, Entity, NestContext, Repository};
pub use config::{Backend, NestConfig};
pub use error::{Result, StoreError};
pub use events::{
    Change, ChangeEvent, DropReason, EventBus, Listener, NestEvent, Subscription,
    SubscriptionConfig, SubscriptionId, Topic, TopicFilter,
};
pub use identity::{IdentityProvider, StaticIdentity};
pub use kv::{Capacity, FileStore, KeyValueStore, MemoryStore, DEFAULT_QUOTA_BYTES};
pub use nest::{PetNest, PetRemoval};
pub use quota::{save_safely, save_value, SaveOutcome};
pub use resolve::{resolve_pets, resolve_photo_src, FeedView, Lookup, RenderedPost, Resolved};
pub use types::*;
