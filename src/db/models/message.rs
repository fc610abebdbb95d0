//! Raw broker message as captured by the listener.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row of the message store.
///
/// Immutable once stored apart from `processed`, which consumers flip after
/// they have taken the row into account. Unprocessed rows form the work
/// queue, processed rows the archive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: i64,
    pub topic: String,
    pub payload: String,
    pub received_at: DateTime<Utc>,
    pub processed: bool,
}
