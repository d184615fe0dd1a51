use serde_derive::{Deserialize, Serialize};

use crate::Value;

/// The operation that produced a version, also used as the kind of an
/// increment. Exchanged as stable integer codes, see [`Op::code`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    /// A plain write, replacing the value.
    Write,
    /// An additive increment over decimal text.
    Add,
    /// An append. Reserved; applying it currently leaves the value unchanged.
    Append,
}

impl Op {
    /// The stable wire code for this operation kind.
    pub fn code(self) -> u8 {
        match self {
            Op::Write => 0,
            Op::Add => 1,
            Op::Append => 2,
        }
    }

    /// Decodes a stable wire code, or None if the code is unknown.
    pub fn from_code(code: u8) -> Option<Op> {
        match code {
            0 => Some(Op::Write),
            1 => Some(Op::Add),
            2 => Some(Op::Append),
            _ => None,
        }
    }
}

/// A single increment operation carried by a transaction: a delta value and
/// the kind of mutation to perform with it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Increment {
    /// The delta, interpreted per `op`.
    #[serde(with = "serde_bytes")]
    pub value: Value,

    /// The increment kind. `Op::Write` is not an increment; applying it is a
    /// caller bug and aborts the process.
    pub op: Op,
}

impl Increment {
    pub fn new(value: Value, op: Op) -> Self {
        Increment { value, op }
    }

    /// Applies this increment to a prior value in place.
    ///
    /// `Add` interprets both the prior value and the delta as decimal text
    /// and stores their sum as decimal text. `Append` is reserved and leaves
    /// the value untouched.
    pub fn apply(&self, value: &mut Value) {
        match self.op {
            Op::Write => panic!("attempted to apply a write operation as an increment"),
            Op::Add => {
                let total = atoi(value).saturating_add(atoi(&self.value));
                *value = total.to_string().into_bytes();
            }
            Op::Append => {}
        }
    }
}

/// Parses a leading decimal integer from raw bytes the way C's `atoi` does:
/// optional ASCII whitespace, an optional sign, then a digit prefix. Anything
/// else contributes nothing, so non-numeric text parses as 0. Saturates
/// instead of overflowing.
fn atoi(bytes: &[u8]) -> i64 {
    let mut i = 0;
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    let mut negative = false;
    if i < bytes.len() && (bytes[i] == b'+' || bytes[i] == b'-') {
        negative = bytes[i] == b'-';
        i += 1;
    }
    let mut total: i64 = 0;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        total = total.saturating_mul(10).saturating_add((bytes[i] - b'0') as i64);
        i += 1;
    }
    if negative {
        -total
    } else {
        total
    }
}
