//! `tskv` is the transactional storage core of a distributed,
//! timestamp-ordered key-value store. Every key maps to a multi-version
//! history, so reads at arbitrary timestamps stay consistent. On top of the
//! history, a transaction coordinator validates optimistic transactions
//! (read set, write set and increment set, with a candidate commit
//! timestamp) against both the committed state and the currently-prepared
//! transactions. Two isolation modes are supported: linearizable (strict
//! serializability) and loose timestamp-based serializability.
//!
//! The core is a deterministic single-threaded state machine. Replication,
//! transport and the timestamp oracle live above it; replaying the same
//! operation log rebuilds the same state.
//!
//! ## Getting started
//!
//! ```rust
//! use tskv::occ::store::{PrepareResult, Store};
//! use tskv::occ::transaction::Transaction;
//! use tskv::timestamp::Timestamp;
//!
//! fn main() {
//!     let mut store = Store::new(true);
//!     store.load("x", b"1".to_vec(), Timestamp::new(10, 0));
//!
//!     // A transaction reads x and writes y on top of it.
//!     let (read_time, value) = store.get(1, "x").unwrap();
//!     assert_eq!(value, b"1".to_vec());
//!
//!     let mut txn = Transaction::new();
//!     txn.add_read("x", read_time);
//!     txn.add_write("y", b"2".to_vec());
//!
//!     match store.prepare(1, txn, Timestamp::new(20, 1)) {
//!         PrepareResult::Ok => store.commit(1),
//!         decision => panic!("unexpected decision {:?}", decision),
//!     }
//!
//!     assert_eq!(store.get(1, "y").unwrap().1, b"2".to_vec());
//! }
//! ```

pub mod error;
pub mod timestamp;
pub mod increment;
pub mod storage;
pub mod occ;
pub mod oracle;

/// An opaque value: arbitrary bytes. Only increments ever interpret the
/// contents.
pub type Value = Vec<u8>;
