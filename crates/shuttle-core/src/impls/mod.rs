//! Impls - port implementations that ship with the core.
//!
//! - **MemoryStore**: in-process ListStore (tests, demos, local runs)

pub mod memory_store;

pub use self::memory_store::MemoryStore;
