use std::collections::{BTreeMap, HashMap};

use serde_derive::{Deserialize, Serialize};

use crate::increment::{Increment, Op};
use crate::storage::Status;
use crate::timestamp::Timestamp;
use crate::Value;

/// A committed version of a key: its commit timestamp, the value bytes, and
/// the operation that produced it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VersionedValue {
    /// The commit timestamp of the version.
    pub time: Timestamp,

    /// The value bytes.
    #[serde(with = "serde_bytes")]
    pub value: Value,

    /// The operation that produced this version.
    pub op: Op,
}

/// A timestamped version store: every key maps to an ordered history of
/// committed versions, never modified or destroyed once written. A version
/// written at timestamp t is the one observed by reads at any timestamp from
/// t up to (but excluding) the next version's timestamp; the newest version
/// has open-ended validity.
///
/// Alongside the history, the store keeps a per-version high-water mark of
/// committed reads: for each version, the largest commit timestamp of any
/// transaction that read it. The transaction coordinator consults these marks
/// to reject writes that would slide underneath an already-committed read.
///
/// The store is a plain single-threaded state machine. It holds no locks and
/// spawns nothing; callers serialize access, typically by driving it from a
/// replication log consumer.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VersionedKVStore {
    /// Per-key version history, ordered by timestamp.
    store: HashMap<String, BTreeMap<Timestamp, VersionedValue>>,

    /// Per-key, per-version timestamp of the latest committed read.
    last_reads: HashMap<String, BTreeMap<Timestamp, Timestamp>>,
}

impl VersionedKVStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the most recent version of the key, if any.
    pub fn get(&self, key: &str) -> Option<&VersionedValue> {
        self.store.get(key)?.values().next_back()
    }

    /// Returns the version of the key valid at the given timestamp: the one
    /// with the greatest timestamp <= t. None if the key had no version yet
    /// at t.
    pub fn get_at(&self, key: &str, t: Timestamp) -> Option<&VersionedValue> {
        self.store.get(key)?.range(..=t).next_back().map(|(_, v)| v)
    }

    /// Returns the validity interval of the version valid at t as
    /// `(lo, hi)`: lo is that version's timestamp, hi the next version's
    /// timestamp or [`Timestamp::INVALID`] if the version is still the
    /// latest. None if no version is valid at t.
    pub fn get_range(&self, key: &str, t: Timestamp) -> Option<(Timestamp, Timestamp)> {
        let history = self.store.get(key)?;
        let lo = *history.range(..=t).next_back()?.0;
        let hi = history
            .range((std::ops::Bound::Excluded(lo), std::ops::Bound::Unbounded))
            .next()
            .map(|(ts, _)| *ts)
            .unwrap_or(Timestamp::INVALID);
        Some((lo, hi))
    }

    /// Positions a cursor at the version valid at t and iterates forward in
    /// timestamp order through the rest of the history. Yields nothing when
    /// no version is valid at t, even if later versions exist.
    pub fn versions_from<'a>(
        &'a self,
        key: &str,
        t: Timestamp,
    ) -> impl Iterator<Item = &'a VersionedValue> + 'a {
        self.store
            .get(key)
            .and_then(|history| {
                let lo = *history.range(..=t).next_back()?.0;
                Some(history.range(lo..))
            })
            .into_iter()
            .flatten()
            .map(|(_, v)| v)
    }

    /// Inserts a write version at the given timestamp. The history is keyed
    /// by timestamp, so inserting at an already-present timestamp is a no-op;
    /// callers choose unique commit timestamps.
    pub fn put(&mut self, key: &str, value: Value, t: Timestamp) {
        self.store
            .entry(key.to_string())
            .or_default()
            .entry(t)
            .or_insert(VersionedValue { time: t, value, op: Op::Write });
    }

    /// Applies an increment to the latest version's value and inserts the
    /// result as a new version at the given timestamp. A key with no prior
    /// version starts from the empty value, so an additive increment yields
    /// the delta itself.
    pub fn increment(&mut self, key: &str, inc: &Increment, t: Timestamp) {
        let mut value = self.get(key).map(|v| v.value.clone()).unwrap_or_default();
        inc.apply(&mut value);
        self.store
            .entry(key.to_string())
            .or_default()
            .entry(t)
            .or_insert(VersionedValue { time: t, value, op: inc.op });
    }

    /// Records a committed read: bumps the last-read mark of the version that
    /// was valid at `read_time` up to `commit`, never down. A read of a key
    /// this replica doesn't have is silently ignored; it cannot be
    /// invalidated here.
    pub fn commit_get(&mut self, key: &str, read_time: Timestamp, commit: Timestamp) {
        let Some(version) = self.get_at(key, read_time).map(|v| v.time) else {
            return;
        };
        let last = self
            .last_reads
            .entry(key.to_string())
            .or_default()
            .entry(version)
            .or_insert(commit);
        if *last < commit {
            *last = commit;
        }
    }

    /// Returns the last-read mark of the key's latest version, if any
    /// committed read observed it.
    pub fn last_read(&self, key: &str) -> Option<Timestamp> {
        let latest = self.get(key)?;
        self.last_reads.get(key)?.get(&latest.time).copied()
    }

    /// Returns the last-read mark of the version valid at t, if any committed
    /// read observed it. The caller must pick a timestamp at which a version
    /// exists; calling this with none valid is a bug and aborts.
    pub fn last_read_at(&self, key: &str, t: Timestamp) -> Option<Timestamp> {
        if !self.store.contains_key(key) {
            return None;
        }
        let Some(version) = self.get_at(key, t) else {
            panic!("no version of {} is valid at {}", key, t);
        };
        self.last_reads.get(key)?.get(&version.time).copied()
    }

    /// Returns store status.
    pub fn status(&self) -> Status {
        Status {
            keys: self.store.len() as u64,
            versions: self.store.values().map(|h| h.len() as u64).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(time: u64, id: u64) -> Timestamp {
        Timestamp::new(time, id)
    }

    #[test]
    fn basic_put_get() {
        let mut store = VersionedKVStore::new();
        store.put("x", b"1".to_vec(), ts(10, 0));

        // The latest version is the one we wrote.
        let v = store.get("x").unwrap();
        assert_eq!(v.value, b"1".to_vec());
        assert_eq!(v.time, ts(10, 0));
        assert_eq!(v.op, Op::Write);

        // Before the first version there is nothing to observe.
        assert_eq!(store.get_at("x", ts(5, 0)), None);

        // After it, the version remains valid.
        assert_eq!(store.get_at("x", ts(15, 0)).unwrap().time, ts(10, 0));

        // Unknown keys are absent everywhere.
        assert_eq!(store.get("y"), None);
        assert_eq!(store.get_at("y", ts(15, 0)), None);
    }

    #[test]
    fn point_in_time_reads() {
        let mut store = VersionedKVStore::new();
        store.put("x", b"a".to_vec(), ts(10, 0));
        store.put("x", b"b".to_vec(), ts(20, 0));
        store.put("x", b"c".to_vec(), ts(30, 0));

        // Each read observes the version with the greatest timestamp <= t.
        assert_eq!(store.get_at("x", ts(10, 0)).unwrap().value, b"a".to_vec());
        assert_eq!(store.get_at("x", ts(19, 9)).unwrap().value, b"a".to_vec());
        assert_eq!(store.get_at("x", ts(20, 0)).unwrap().value, b"b".to_vec());
        assert_eq!(store.get_at("x", ts(29, 0)).unwrap().value, b"b".to_vec());
        assert_eq!(store.get_at("x", ts(99, 0)).unwrap().value, b"c".to_vec());

        // The history iterates in strictly increasing timestamp order.
        let times: Vec<_> = store.versions_from("x", ts(10, 0)).map(|v| v.time).collect();
        assert_eq!(times, vec![ts(10, 0), ts(20, 0), ts(30, 0)]);
    }

    #[test]
    fn validity_ranges() {
        let mut store = VersionedKVStore::new();
        store.put("x", b"a".to_vec(), ts(10, 0));
        store.put("x", b"b".to_vec(), ts(30, 0));

        // A superseded version is valid over [its time, next time).
        assert_eq!(store.get_range("x", ts(15, 0)), Some((ts(10, 0), ts(30, 0))));
        assert_eq!(store.get_range("x", ts(10, 0)), Some((ts(10, 0), ts(30, 0))));

        // The latest version has an open-ended range.
        assert_eq!(store.get_range("x", ts(30, 0)), Some((ts(30, 0), Timestamp::INVALID)));
        assert_eq!(store.get_range("x", ts(99, 0)), Some((ts(30, 0), Timestamp::INVALID)));

        // No version is valid before the first write.
        assert_eq!(store.get_range("x", ts(5, 0)), None);
        assert_eq!(store.get_range("y", ts(5, 0)), None);
    }

    #[test]
    fn duplicate_timestamp_is_discarded() {
        let mut store = VersionedKVStore::new();
        store.put("x", b"a".to_vec(), ts(10, 0));
        store.put("x", b"b".to_vec(), ts(10, 0));

        assert_eq!(store.get("x").unwrap().value, b"a".to_vec());
        assert_eq!(store.status().versions, 1);
    }

    #[test]
    fn increment_applies_to_latest() {
        let mut store = VersionedKVStore::new();
        store.put("n", b"5".to_vec(), ts(10, 0));

        store.increment("n", &Increment::new(b"3".to_vec(), Op::Add), ts(20, 0));
        let v = store.get("n").unwrap();
        assert_eq!(v.value, b"8".to_vec());
        assert_eq!(v.op, Op::Add);

        store.increment("n", &Increment::new(b"7".to_vec(), Op::Add), ts(25, 0));
        assert_eq!(store.get("n").unwrap().value, b"15".to_vec());

        // The older versions are still there, untouched.
        assert_eq!(store.get_at("n", ts(12, 0)).unwrap().value, b"5".to_vec());
        assert_eq!(store.get_at("n", ts(20, 0)).unwrap().value, b"8".to_vec());
    }

    #[test]
    fn increment_without_prior_version() {
        let mut store = VersionedKVStore::new();

        // The base value of a fresh key is empty, which adds as zero.
        store.increment("n", &Increment::new(b"5".to_vec(), Op::Add), ts(10, 0));
        assert_eq!(store.get("n").unwrap().value, b"5".to_vec());
    }

    #[test]
    fn append_without_prior_version() {
        let mut store = VersionedKVStore::new();

        // A fresh key starts from the empty value, and an append leaves it
        // untouched, so the recorded version is empty.
        store.increment("x", &Increment::new(b"tail".to_vec(), Op::Append), ts(10, 0));
        let v = store.get("x").unwrap();
        assert_eq!(v.value, Vec::<u8>::new());
        assert_eq!(v.op, Op::Append);
        assert_eq!(v.time, ts(10, 0));
    }

    #[test]
    fn append_carries_value_forward() {
        let mut store = VersionedKVStore::new();
        store.put("x", b"a".to_vec(), ts(10, 0));

        store.increment("x", &Increment::new(b"zzz".to_vec(), Op::Append), ts(20, 0));
        let v = store.get("x").unwrap();
        assert_eq!(v.value, b"a".to_vec());
        assert_eq!(v.op, Op::Append);
    }

    #[test]
    fn commit_get_is_monotonic() {
        let mut store = VersionedKVStore::new();
        store.put("x", b"a".to_vec(), ts(10, 0));

        assert_eq!(store.last_read("x"), None);

        store.commit_get("x", ts(10, 0), ts(20, 0));
        assert_eq!(store.last_read("x"), Some(ts(20, 0)));

        // An earlier commit never rolls the mark back.
        store.commit_get("x", ts(10, 0), ts(15, 0));
        assert_eq!(store.last_read("x"), Some(ts(20, 0)));

        store.commit_get("x", ts(10, 0), ts(40, 0));
        assert_eq!(store.last_read("x"), Some(ts(40, 0)));
    }

    #[test]
    fn commit_get_tracks_versions_separately() {
        let mut store = VersionedKVStore::new();
        store.put("x", b"a".to_vec(), ts(10, 0));
        store.put("x", b"b".to_vec(), ts(30, 0));

        // A read of the old version marks the old version only.
        store.commit_get("x", ts(15, 0), ts(20, 0));
        assert_eq!(store.last_read_at("x", ts(15, 0)), Some(ts(20, 0)));
        assert_eq!(store.last_read("x"), None);

        store.commit_get("x", ts(30, 0), ts(50, 0));
        assert_eq!(store.last_read("x"), Some(ts(50, 0)));
        assert_eq!(store.last_read_at("x", ts(15, 0)), Some(ts(20, 0)));
    }

    #[test]
    fn commit_get_of_unknown_key_is_ignored() {
        let mut store = VersionedKVStore::new();
        store.commit_get("ghost", ts(10, 0), ts(20, 0));
        assert_eq!(store, VersionedKVStore::new());
    }

    #[test]
    fn cursor_is_empty_before_first_version() {
        let mut store = VersionedKVStore::new();
        store.put("x", b"a".to_vec(), ts(10, 0));
        store.put("x", b"b".to_vec(), ts(30, 0));

        // No version is valid at t=5, so the cursor yields nothing at all,
        // later versions included.
        assert_eq!(store.versions_from("x", ts(5, 0)).count(), 0);

        // From inside the history it starts at the valid version.
        let times: Vec<_> = store.versions_from("x", ts(20, 0)).map(|v| v.time).collect();
        assert_eq!(times, vec![ts(10, 0), ts(30, 0)]);

        let times: Vec<_> = store.versions_from("x", ts(35, 0)).map(|v| v.time).collect();
        assert_eq!(times, vec![ts(30, 0)]);
    }

    #[test]
    #[should_panic(expected = "is valid at")]
    fn last_read_at_requires_valid_version() {
        let mut store = VersionedKVStore::new();
        store.put("x", b"a".to_vec(), ts(10, 0));
        let _ = store.last_read_at("x", ts(5, 0));
    }

    #[test]
    fn status_counts() {
        let mut store = VersionedKVStore::new();
        store.put("x", b"a".to_vec(), ts(10, 0));
        store.put("x", b"b".to_vec(), ts(20, 0));
        store.put("y", b"c".to_vec(), ts(10, 0));

        assert_eq!(store.status(), Status { keys: 2, versions: 3 });
    }
}
