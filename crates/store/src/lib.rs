//! Watched item model and the external store contract.
//!
//! - **Types**: [`ObjectMeta`], [`ObjectKey`], [`ResourceVersion`] and the [`Resource`] trait
//! - **Store**: the list-then-watch [`ExternalStore`] trait
//! - **Memory**: [`InMemoryStore`], a fault-injectable store for tests and demos
//!
//! # Example
//!
//! ```ignore
//! use levelwatch_store::{DynamicObject, ExternalStore, InMemoryStore, ResourceVersion};
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = InMemoryStore::new();
//!     store.create(DynamicObject::new("default", "web")).await.unwrap();
//!
//!     let list = store.list().await.unwrap();
//!     let mut watch = store.watch(list.resource_version).await.unwrap();
//!
//!     store.update(DynamicObject::new("default", "web")).await.unwrap();
//!     let event = watch.next().await;
//!     println!("{event:?}");
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod error;
pub mod memory;
pub mod store;
pub mod types;

pub use error::{KeyError, Result, StoreError};
pub use memory::InMemoryStore;
pub use store::{ExternalStore, TracingStore, WatchStream};
pub use types::{
    DynamicObject, EventKind, ListResult, ObjectKey, ObjectMeta, Resource, ResourceVersion,
    WatchEvent,
};
