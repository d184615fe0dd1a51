use std::collections::HashMap;

use serde_derive::{Deserialize, Serialize};

use crate::error::{CResult, Error};
use crate::increment::{Increment, Op};
use crate::timestamp::Timestamp;
use crate::Value;

/// A transaction as submitted for prepare: the versions it read, the values
/// it wants to write, and the increments it wants to apply, all keyed by
/// string key.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Transaction {
    /// Key -> timestamp of the version the transaction read.
    read_set: HashMap<String, Timestamp>,

    /// Key -> value to write at commit.
    write_set: HashMap<String, Value>,

    /// Key -> increments to apply in order at commit.
    increment_set: HashMap<String, Vec<Increment>>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read_set(&self) -> &HashMap<String, Timestamp> {
        &self.read_set
    }

    pub fn write_set(&self) -> &HashMap<String, Value> {
        &self.write_set
    }

    pub fn increment_set(&self) -> &HashMap<String, Vec<Increment>> {
        &self.increment_set
    }

    /// Records that the transaction read the version of `key` committed at
    /// `read_time`.
    pub fn add_read(&mut self, key: &str, read_time: Timestamp) {
        self.read_set.insert(key.to_string(), read_time);
    }

    /// Records a write. A write supersedes any increments this transaction
    /// queued for the same key earlier; they are dropped. The reverse does
    /// not hold: a later increment stacks on top of the write.
    pub fn add_write(&mut self, key: &str, value: Value) {
        self.write_set.insert(key.to_string(), value);
        self.increment_set.remove(key);
    }

    /// Appends an increment to the key's ordered increment list.
    pub fn add_increment(&mut self, key: &str, inc: Increment) {
        self.increment_set.entry(key.to_string()).or_default().push(inc);
    }

    /// Builds a transaction from a decoded wire message, applying the three
    /// sections in order: reads, then writes, then increments.
    pub fn from_message(msg: &TransactionMessage) -> CResult<Self> {
        let mut txn = Transaction::new();
        for read in &msg.read_set {
            txn.add_read(&read.key, read.read_time);
        }
        for write in &msg.write_set {
            txn.add_write(&write.key, write.value.clone());
        }
        for inc in &msg.increment_set {
            let op = Op::from_code(inc.op)
                .ok_or_else(|| Error::InvalidInput(format!("unknown op code {}", inc.op)))?;
            txn.add_increment(&inc.key, Increment::new(inc.value.clone(), op));
        }
        Ok(txn)
    }

    /// Serializes the transaction back into its wire message form.
    pub fn to_message(&self) -> TransactionMessage {
        let mut msg = TransactionMessage::default();
        for (key, read_time) in &self.read_set {
            msg.read_set.push(ReadMessage { key: key.clone(), read_time: *read_time });
        }
        for (key, value) in &self.write_set {
            msg.write_set.push(WriteMessage { key: key.clone(), value: value.clone() });
        }
        for (key, incs) in &self.increment_set {
            for inc in incs {
                msg.increment_set.push(IncrementMessage {
                    key: key.clone(),
                    value: inc.value.clone(),
                    op: inc.op.code(),
                });
            }
        }
        msg
    }
}

/// One read entry on the wire: the key and the timestamp of the version read.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReadMessage {
    pub key: String,
    pub read_time: Timestamp,
}

/// One write entry on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WriteMessage {
    pub key: String,
    #[serde(with = "serde_bytes")]
    pub value: Value,
}

/// One increment entry on the wire, with the op kind as its stable code.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IncrementMessage {
    pub key: String,
    #[serde(with = "serde_bytes")]
    pub value: Value,
    pub op: u8,
}

/// The binary message carrying a transaction between client, replication
/// layer and store: three repeated sections of read, write and increment
/// entries.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionMessage {
    pub read_set: Vec<ReadMessage>,
    pub write_set: Vec<WriteMessage>,
    pub increment_set: Vec<IncrementMessage>,
}

impl TransactionMessage {
    pub fn encode(&self) -> CResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> CResult<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}
