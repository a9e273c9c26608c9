//! Store key naming.
//!
//! These templates are a persisted convention shared with every other client
//! of the same store; changing them orphans existing data.

const QUEUE_READY_TEMPLATE: &str = "rmq::queue::[{queue}]::ready";
const QUEUE_REJECTED_TEMPLATE: &str = "rmq::queue::[{queue}]::rejected";
const QUEUE_ACK_TEMPLATE: &str = "rmq::queue::[{queue}]::ack";
const QUEUE_UNACKED_TEMPLATE: &str = "rmq::queue::[{queue}]::inprocess";
const CONNECTION_HEARTBEAT_TEMPLATE: &str = "rmq::connection::{connection}::heartbeat";

const PH_QUEUE: &str = "{queue}";
const PH_CONNECTION: &str = "{connection}";

/// The list keys that hold one queue's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueKeys {
    /// Payloads awaiting delivery.
    pub ready: String,
    /// Payloads a consumer declined.
    pub rejected: String,
    /// Reserved. Acknowledging removes from `unacked`; nothing is written here.
    pub ack: String,
    /// Payloads delivered but not yet resolved.
    pub unacked: String,
}

impl QueueKeys {
    pub fn for_queue(name: &str) -> Self {
        Self {
            ready: QUEUE_READY_TEMPLATE.replacen(PH_QUEUE, name, 1),
            rejected: QUEUE_REJECTED_TEMPLATE.replacen(PH_QUEUE, name, 1),
            ack: QUEUE_ACK_TEMPLATE.replacen(PH_QUEUE, name, 1),
            unacked: QUEUE_UNACKED_TEMPLATE.replacen(PH_QUEUE, name, 1),
        }
    }
}

pub fn heartbeat_key(connection: &str) -> String {
    CONNECTION_HEARTBEAT_TEMPLATE.replacen(PH_CONNECTION, connection, 1)
}
