use serde_derive::{Deserialize, Serialize};

/// A totally-ordered logical timestamp, as issued by the timestamp oracle.
///
/// The `time` component is a 64-bit logical clock value; `id` identifies the
/// client that proposed it and breaks ties, so two clients can never collide
/// on the same timestamp. Ordering is lexicographic on `(time, id)`, which the
/// derived impls give us from the field order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    /// Logical clock value.
    pub time: u64,
    /// Client id, used as a tiebreaker.
    pub id: u64,
}

impl Timestamp {
    /// The invalid sentinel, used where a timestamp is not (yet) set. Orders
    /// before every valid timestamp.
    pub const INVALID: Timestamp = Timestamp { time: 0, id: 0 };

    pub fn new(time: u64, id: u64) -> Self {
        Timestamp { time, id }
    }

    /// Whether this timestamp is an actual timestamp rather than the sentinel.
    pub fn is_valid(&self) -> bool {
        *self != Timestamp::INVALID
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<{}, {}>", self.time, self.id)
    }
}
