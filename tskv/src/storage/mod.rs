pub mod versioned;

use serde_derive::{Deserialize, Serialize};

/// Version store status.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Status {
    /// The number of live keys in the store.
    pub keys: u64,

    /// The total number of committed versions across all keys.
    pub versions: u64,
}
