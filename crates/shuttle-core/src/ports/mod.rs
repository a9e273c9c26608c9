//! Ports - the seams between the queue protocol and the outside world.
//!
//! - **ListStore**: the ordered-list store (source of truth for list contents)
//! - **Consumer**: the application code that handles deliveries

pub mod consumer;
pub mod list_store;

pub use self::consumer::Consumer;
pub use self::list_store::{KeyTtl, ListStore, StoreError};
