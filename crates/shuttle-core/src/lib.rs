//! shuttle-core
//!
//! An at-least-once message queue on top of an ordered-list store.
//!
//! # Modules
//! - **ports**: the seams (`ListStore`, `Consumer`)
//! - **impls**: `MemoryStore`, an in-process `ListStore`
//! - **connection**: named client, queue registry, heartbeat check
//! - **queue**: publish / ack / reject / consume, `Delivery`, the pipeline
//! - **heartbeat**: `HeartbeatWriter`, keeps a connection's heartbeat alive
//! - **keys**: the persisted key naming scheme
//! - **config**: `ConsumeConfig`
//! - **observability**: `QueueStats`
//! - **error**: `QueueError`
//!
//! # Example
//! ```ignore
//! let store = Arc::new(MemoryStore::new());
//! let conn = Connection::open("worker", store).await?;
//! let queue = conn.open_queue("emails");
//! queue.publish("hello").await?;
//! let handle = queue.start_consuming(Duration::from_secs(1), Arc::new(MyConsumer))?;
//! // ...
//! handle.stop_and_wait().await;
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod heartbeat;
pub mod impls;
pub mod keys;
pub mod observability;
pub mod ports;
pub mod queue;

pub use config::ConsumeConfig;
pub use connection::{Connection, HeartbeatStatus};
pub use error::{QueueError, QueueResult};
pub use heartbeat::HeartbeatWriter;
pub use impls::MemoryStore;
pub use observability::QueueStats;
pub use ports::{Consumer, KeyTtl, ListStore, StoreError};
pub use queue::{ConsumerHandle, Delivery, DeliveryId, Queue};
