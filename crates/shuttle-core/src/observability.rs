use serde::{Deserialize, Serialize};

/// List lengths of one queue at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub ready: u64,
    pub unacked: u64,
    pub rejected: u64,
}

impl QueueStats {
    /// No payload is waiting, in flight, or parked as rejected.
    pub fn is_drained(&self) -> bool {
        self.ready == 0 && self.unacked == 0 && self.rejected == 0
    }
}
