pub mod store;
pub mod transaction;

use serde_derive::{Deserialize, Serialize};

/// Reply codes exchanged with the replication layer, with stable wire values.
/// Only `Ok`, `Fail`, `Retry` and `Abstain` originate from this crate; the
/// remaining codes belong to the transport above it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Reply {
    Ok = 0,
    Fail = 1,
    Retry = 2,
    Abstain = 3,
    Timeout = 4,
    NetworkFailure = 5,
}

/// Coordinator status.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Status {
    /// Number of currently prepared transactions.
    pub prepared_txns: u64,

    /// The version store underneath.
    pub storage: crate::storage::Status,
}
