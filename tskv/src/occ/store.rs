use std::collections::{BTreeSet, HashMap};
use std::ops::Bound;

use crate::occ::transaction::Transaction;
use crate::occ::{Reply, Status};
use crate::storage::versioned::VersionedKVStore;
use crate::timestamp::Timestamp;
use crate::Value;

/// The coordinator's decision for a prepare request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrepareResult {
    /// The transaction may commit at its proposed timestamp.
    Ok,
    /// A conflict no retry can resolve; abort the transaction.
    Fail,
    /// Resolvable by retrying with a timestamp above the carried one.
    Retry(Timestamp),
    /// Undecidable until some concurrent prepared transaction resolves.
    Abstain,
}

impl PrepareResult {
    /// The stable reply code for this decision.
    pub fn reply(&self) -> Reply {
        match self {
            PrepareResult::Ok => Reply::Ok,
            PrepareResult::Fail => Reply::Fail,
            PrepareResult::Retry(_) => Reply::Retry,
            PrepareResult::Abstain => Reply::Abstain,
        }
    }
}

/// The transaction coordinator: drives each transaction through
/// prepare/commit/abort with optimistic concurrency checks against both the
/// committed history and the currently-prepared transactions.
///
/// Two isolation modes, chosen at construction. Linearizable mode gives
/// strict serializability: a transaction observes every lower-timestamped
/// committed transaction, and the checks reject anything that could violate
/// that. Non-linearizable mode settles for timestamp-ordered serializability
/// and lets a transaction slide into the validity window of the versions it
/// read.
///
/// Like the version store, the coordinator is a single-threaded state
/// machine; the replication layer above it drives operations one at a time in
/// log order, and replaying the same log rebuilds the same state.
pub struct Store {
    /// Strict serializability when true.
    linearizable: bool,

    /// The committed multi-version state.
    store: VersionedKVStore,

    /// Transactions that passed prepare but have not committed or aborted,
    /// by transaction id. Prepared effects are not visible in the version
    /// store; the OCC checks consult this registry instead.
    prepared: HashMap<u64, (Timestamp, Transaction)>,
}

impl Store {
    pub fn new(linearizable: bool) -> Self {
        Store { linearizable, store: VersionedKVStore::new(), prepared: HashMap::new() }
    }

    /// Returns the latest committed version of the key.
    pub fn get(&self, id: u64, key: &str) -> Option<(Timestamp, Value)> {
        log::debug!("[{}] GET {}", id, key);
        self.store.get(key).map(|v| (v.time, v.value.clone()))
    }

    /// Returns the committed version of the key valid at the given timestamp.
    pub fn get_at(&self, id: u64, key: &str, timestamp: Timestamp) -> Option<(Timestamp, Value)> {
        log::debug!("[{}] GET {} at {}", id, key, timestamp);
        self.store.get_at(key, timestamp).map(|v| (v.time, v.value.clone()))
    }

    /// Decides whether the transaction may commit at the proposed timestamp,
    /// recording it in the prepared registry on success.
    ///
    /// Re-preparing an id at its already-prepared timestamp is an idempotent
    /// Ok; re-preparing at a different timestamp discards the old entry and
    /// validates afresh.
    pub fn prepare(&mut self, id: u64, txn: Transaction, timestamp: Timestamp) -> PrepareResult {
        log::debug!("[{}] START PREPARE at {}", id, timestamp);

        if let Some((prepared_at, _)) = self.prepared.get(&id) {
            if *prepared_at == timestamp {
                log::warn!("[{}] already prepared", id);
                return PrepareResult::Ok;
            }
            // Run the checks again for the new timestamp.
            self.prepared.remove(&id);
        }

        let p_writes = self.prepared_writes();
        let p_reads = self.prepared_reads();
        let p_incs = self.prepared_increments();

        // Check for conflicts with the read set.
        for (key, read_time) in txn.read_set() {
            // A key or version we no longer hold as exactly that version
            // cannot conflict with this read.
            let Some((lo, hi)) = self.store.get_range(key, *read_time) else {
                continue;
            };
            if lo != *read_time {
                continue;
            }

            if !hi.is_valid() {
                // The read observed the still-latest version. A prepared
                // write or increment on the key may yet invalidate it: any at
                // all under linearizable, any at or below the proposed
                // timestamp otherwise.
                if let Some(writes) = p_writes.get(key) {
                    if self.linearizable || any_at_or_before(writes, timestamp) {
                        log::debug!("[{}] ABSTAIN rw conflict w/ prepared key: {}", id, key);
                        return PrepareResult::Abstain;
                    }
                }
                if let Some(incs) = p_incs.get(key) {
                    if self.linearizable || any_at_or_before(incs, timestamp) {
                        log::debug!("[{}] ABSTAIN ri conflict w/ prepared key: {}", id, key);
                        return PrepareResult::Abstain;
                    }
                }
            } else if self.linearizable || timestamp > hi {
                // A later committed version supersedes the read in the window
                // this transaction wants to occupy.
                log::debug!("[{}] ABORT rw conflict key: {}", id, key);
                return PrepareResult::Fail;
            } else {
                // Loose mode, and the proposed timestamp lands inside the
                // read's validity window. A prepared write or increment could
                // still commit between the read version and us.
                if let Some(writes) = p_writes.get(key) {
                    if any_between(writes, lo, timestamp) {
                        log::debug!("[{}] ABSTAIN rw conflict w/ prepared key: {}", id, key);
                        return PrepareResult::Abstain;
                    }
                }
                if let Some(incs) = p_incs.get(key) {
                    if any_between(incs, lo, timestamp) {
                        log::debug!("[{}] ABSTAIN ri conflict w/ prepared key: {}", id, key);
                        return PrepareResult::Abstain;
                    }
                }
            }
        }

        // Check for conflicts with the write set.
        for key in txn.write_set().keys() {
            if let Some(latest) = self.store.get(key) {
                // A committed version above the proposed timestamp forces a
                // later retry under linearizability.
                if self.linearizable && latest.time > timestamp {
                    log::debug!("[{}] RETRY ww conflict key: {}", id, key);
                    return PrepareResult::Retry(latest.time);
                }

                // A committed read above the proposed timestamp means some
                // transaction already observed state this write would slide
                // underneath. Linearizable mode guards the latest version's
                // mark; loose mode only the mark of the version being
                // overwritten.
                let last_read = if self.linearizable {
                    self.store.last_read(key)
                } else {
                    self.store.last_read_at(key, timestamp)
                };
                if let Some(last_read) = last_read {
                    if last_read > timestamp {
                        log::debug!("[{}] RETRY wr conflict key: {}", id, key);
                        return PrepareResult::Retry(last_read);
                    }
                }
            }

            if self.linearizable {
                if let Some(ts) = p_writes.get(key).and_then(|s| first_after(s, timestamp)) {
                    log::debug!("[{}] RETRY ww conflict w/ prepared key: {}", id, key);
                    return PrepareResult::Retry(ts);
                }
                if let Some(ts) = p_incs.get(key).and_then(|s| first_after(s, timestamp)) {
                    log::debug!("[{}] RETRY wi conflict w/ prepared key: {}", id, key);
                    return PrepareResult::Retry(ts);
                }
            }

            if let Some(reads) = p_reads.get(key) {
                if first_after(reads, timestamp).is_some() {
                    log::debug!("[{}] ABSTAIN wr conflict w/ prepared key: {}", id, key);
                    return PrepareResult::Abstain;
                }
            }
        }

        // Check for conflicts with the increment set.
        for (key, incs) in txn.increment_set() {
            if self.linearizable {
                // A committed version at or above the proposed timestamp
                // whose op kind matches none of ours does not commute with
                // us; propose retrying above the last such version.
                let mut suggest = Timestamp::INVALID;
                for version in self.store.versions_from(key, timestamp) {
                    if version.time >= timestamp && incs.iter().all(|inc| inc.op != version.op) {
                        suggest = version.time;
                    }
                }
                if suggest.is_valid() {
                    log::debug!("[{}] RETRY iw conflict key: {}", id, key);
                    return PrepareResult::Retry(suggest);
                }
            }

            // Same committed-read guard as for writes.
            let last_read = if self.linearizable {
                self.store.last_read(key)
            } else {
                self.store.last_read_at(key, timestamp)
            };
            if let Some(last_read) = last_read {
                if last_read > timestamp {
                    log::debug!("[{}] RETRY ir conflict key: {}", id, key);
                    return PrepareResult::Retry(last_read);
                }
            }

            if self.linearizable {
                if let Some(ts) = p_writes.get(key).and_then(|s| first_after(s, timestamp)) {
                    log::debug!("[{}] RETRY iw conflict w/ prepared key: {}", id, key);
                    return PrepareResult::Retry(ts);
                }

                // Prepared increments above the proposed timestamp conflict
                // only when their op kinds differ from ours; identical kinds
                // commute.
                if let Some(pincs) = p_incs.get(key) {
                    let mut suggest = Timestamp::INVALID;
                    for &pts in pincs.range((Bound::Excluded(timestamp), Bound::Unbounded)) {
                        let plist = self
                            .prepared
                            .values()
                            .find(|(prepared_at, _)| *prepared_at == pts)
                            .and_then(|(_, ptxn)| ptxn.increment_set().get(key));
                        let Some(plist) = plist else {
                            continue;
                        };
                        if plist.iter().any(|pinc| incs.iter().any(|inc| pinc.op != inc.op)) {
                            suggest = pts;
                        }
                    }
                    if suggest.is_valid() {
                        log::debug!("[{}] RETRY ii conflict w/ prepared key: {}", id, key);
                        return PrepareResult::Retry(suggest);
                    }
                }
            }

            if let Some(reads) = p_reads.get(key) {
                if first_after(reads, timestamp).is_some() {
                    log::debug!("[{}] ABSTAIN ir conflict w/ prepared key: {}", id, key);
                    return PrepareResult::Abstain;
                }
            }
        }

        // All checks passed; hold the transaction for commit.
        self.prepared.insert(id, (timestamp, txn));
        log::debug!("[{}] PREPARED TO COMMIT", id);
        PrepareResult::Ok
    }

    /// Commits a prepared transaction, making its effects visible. A commit
    /// for an id this replica never prepared applies nothing.
    pub fn commit(&mut self, id: u64) {
        log::debug!("[{}] COMMIT", id);
        if let Some((timestamp, txn)) = self.prepared.remove(&id) {
            self.commit_at(timestamp, &txn);
        }
    }

    /// Installs a transaction's effects at the given commit timestamp,
    /// bypassing the prepared registry: last-read marks for its reads, write
    /// versions for its writes, and its increments in order.
    pub fn commit_at(&mut self, timestamp: Timestamp, txn: &Transaction) {
        for (key, read_time) in txn.read_set() {
            self.store.commit_get(key, *read_time, timestamp);
        }
        for (key, value) in txn.write_set() {
            self.store.put(key, value.clone(), timestamp);
        }
        for (key, incs) in txn.increment_set() {
            for inc in incs {
                self.store.increment(key, inc, timestamp);
            }
        }
    }

    /// Drops the prepared entry for the transaction, if any. The version
    /// store is untouched; prepared transactions never wrote to it.
    pub fn abort(&mut self, id: u64, _txn: &Transaction) {
        log::debug!("[{}] ABORT", id);
        self.prepared.remove(&id);
    }

    /// Installs a committed write directly, bypassing validation. Used to
    /// seed state administratively or when replaying a log.
    pub fn load(&mut self, key: &str, value: Value, timestamp: Timestamp) {
        self.store.put(key, value, timestamp);
    }

    /// The committed multi-version state.
    pub fn storage(&self) -> &VersionedKVStore {
        &self.store
    }

    /// Returns coordinator status.
    pub fn status(&self) -> Status {
        Status { prepared_txns: self.prepared.len() as u64, storage: self.store.status() }
    }

    /// Commit timestamps of currently-prepared transactions that write each
    /// key. Recomputed on every prepare.
    fn prepared_writes(&self) -> HashMap<String, BTreeSet<Timestamp>> {
        let mut writes: HashMap<String, BTreeSet<Timestamp>> = HashMap::new();
        for (timestamp, txn) in self.prepared.values() {
            for key in txn.write_set().keys() {
                writes.entry(key.clone()).or_default().insert(*timestamp);
            }
        }
        writes
    }

    /// Commit timestamps of currently-prepared transactions that read each
    /// key.
    fn prepared_reads(&self) -> HashMap<String, BTreeSet<Timestamp>> {
        let mut reads: HashMap<String, BTreeSet<Timestamp>> = HashMap::new();
        for (timestamp, txn) in self.prepared.values() {
            for key in txn.read_set().keys() {
                reads.entry(key.clone()).or_default().insert(*timestamp);
            }
        }
        reads
    }

    /// Commit timestamps of currently-prepared transactions that increment
    /// each key.
    fn prepared_increments(&self) -> HashMap<String, BTreeSet<Timestamp>> {
        let mut incs: HashMap<String, BTreeSet<Timestamp>> = HashMap::new();
        for (timestamp, txn) in self.prepared.values() {
            for key in txn.increment_set().keys() {
                incs.entry(key.clone()).or_default().insert(*timestamp);
            }
        }
        incs
    }
}

/// The smallest timestamp in the set strictly above t.
fn first_after(set: &BTreeSet<Timestamp>, t: Timestamp) -> Option<Timestamp> {
    set.range((Bound::Excluded(t), Bound::Unbounded)).next().copied()
}

/// Whether the set holds any timestamp at or below t.
fn any_at_or_before(set: &BTreeSet<Timestamp>, t: Timestamp) -> bool {
    set.range(..=t).next().is_some()
}

/// Whether the set holds any timestamp strictly between lo and hi.
fn any_between(set: &BTreeSet<Timestamp>, lo: Timestamp, hi: Timestamp) -> bool {
    set.range((Bound::Excluded(lo), Bound::Excluded(hi))).next().is_some()
}
