//! Coverage database and path hashing.
//!
//! A coverage item is the guest program counter of a symbolic branch with
//! bit 48 carrying the evaluated direction. The database holds, per prefix
//! length, every exact prefix trace previously executed, keyed by the
//! running 64-bit path hash. A branch deserves a solver call exactly when
//! its flipped prefix has not been recorded at that depth: longer than
//! anything recorded, an unseen flip hash, or a hash collision with a
//! genuinely new prefix.

use std::{
    collections::BTreeMap,
    hash::Hasher,
    path::Path,
};

use twox_hash::XxHash64;

use crate::{
    consts::COV_EVAL_BIT,
    error::{EngineError, EngineResult},
};

/// Encode a coverage item: the branch site's guest program counter plus the
/// evaluated direction in bit 48.
pub fn cov_item(pc: u64, taken: bool) -> u64 {
    if taken {
        pc | (1u64 << COV_EVAL_BIT)
    } else {
        pc & !(1u64 << COV_EVAL_BIT)
    }
}

/// Flip the direction bit of a coverage item.
pub fn cov_flip(item: u64) -> u64 {
    item ^ (1u64 << COV_EVAL_BIT)
}

/// Streaming 64-bit path hash over a coverage vector.
#[derive(Debug, Clone, Default)]
pub struct PathHasher {
    inner: XxHash64,
}

impl PathHasher {
    /// Fresh hasher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one coverage item into the running hash.
    pub fn update(&mut self, item: u64) {
        self.inner.write(&item.to_le_bytes());
    }

    /// Current digest; the hasher keeps streaming afterwards.
    pub fn digest(&self) -> u64 {
        self.inner.finish()
    }

    /// Digest of this hash extended by one more item, without disturbing the
    /// running state. Used for the flip-side lookup.
    pub fn digest_with(&self, item: u64) -> u64 {
        let mut fork = self.inner.clone();
        fork.write(&item.to_le_bytes());
        fork.finish()
    }
}

/// Persistent set of observed prefix traces.
///
/// `levels[k]` maps a path hash to the exact traces of length `k` that
/// produced it; level 0 is always absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoverageDb {
    levels: Vec<BTreeMap<u64, Vec<Vec<u64>>>>,
}

impl CoverageDb {
    /// Empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a branch whose flipped prefix hashes to `flip_hash` deserves
    /// a solver call. `prefix` is the path-side coverage vector including
    /// the current branch.
    pub fn should_solve(&self, prefix: &[u64], flip_hash: u64) -> bool {
        let len = prefix.len();
        if len >= self.levels.len() {
            // no recorded trace has gone this far
            return true;
        }
        let Some(traces) = self.levels[len].get(&flip_hash) else {
            // a new path hash at this depth
            return true;
        };
        // rare path: distinguish an exact flip from a hash collision
        for trace in traces {
            if trace[..len - 1] == prefix[..len - 1] {
                return false;
            }
        }
        true
    }

    /// Record one executed prefix trace under its running hash.
    pub fn record(&mut self, prefix: &[u64], hash: u64) {
        let len = prefix.len();
        if len == 0 {
            return;
        }
        if self.levels.len() <= len {
            self.levels.resize_with(len + 1, BTreeMap::new);
        }
        let traces = self.levels[len].entry(hash).or_default();
        if traces.iter().any(|trace| trace == prefix) {
            return;
        }
        traces.push(prefix.to_vec());
    }

    /// Fold a whole session trace into the database: every prefix of the
    /// coverage vector becomes a recorded trace at its depth.
    pub fn absorb_trace(&mut self, trace: &[u64]) {
        let mut hasher = PathHasher::new();
        for (step, item) in trace.iter().enumerate() {
            hasher.update(*item);
            self.record(&trace[..=step], hasher.digest());
        }
    }

    /// Deepest recorded level.
    pub fn max_level(&self) -> usize {
        self.levels.len().saturating_sub(1)
    }

    /// Total number of recorded traces.
    pub fn trace_count(&self) -> usize {
        self.levels
            .iter()
            .flat_map(|level| level.values())
            .map(Vec::len)
            .sum()
    }

    // -- persistence ---------------------------------------------------------

    /// Serialize as the big-endian word stream described by the on-disk
    /// contract.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let num_levels = self.levels.len().saturating_sub(1) as u64;
        push_word(&mut out, num_levels);
        for (level, hashes) in self.levels.iter().enumerate().skip(1) {
            push_word(&mut out, hashes.len() as u64);
            for (hash, traces) in hashes {
                push_word(&mut out, *hash);
                push_word(&mut out, traces.len() as u64);
                for trace in traces {
                    debug_assert_eq!(trace.len(), level);
                    for item in trace {
                        push_word(&mut out, *item);
                    }
                }
            }
        }
        out
    }

    /// Parse the big-endian word stream; a valid stream ends exactly at EOF.
    pub fn parse(bytes: &[u8]) -> EngineResult<Self> {
        let mut reader = WordReader { bytes, at: 0 };

        let num_levels = reader.word()?;
        let mut levels = Vec::new();
        if num_levels > 0 {
            levels.push(BTreeMap::new()); // level 0 is absent by construction
        }
        for level in 1..=num_levels {
            let mut hashes = BTreeMap::new();
            let num_hashes = reader.word()?;
            for _ in 0..num_hashes {
                let hash = reader.word()?;
                let num_traces = reader.word()?;
                reader.ensure_words(
                    num_traces
                        .checked_mul(level)
                        .ok_or(EngineError::CorruptedCoverage("trace count overflow"))?,
                )?;
                let mut traces = Vec::with_capacity(num_traces as usize);
                for _ in 0..num_traces {
                    let mut trace = Vec::with_capacity(level as usize);
                    for _ in 0..level {
                        trace.push(reader.word()?);
                    }
                    traces.push(trace);
                }
                if hashes.insert(hash, traces).is_some() {
                    return Err(EngineError::CorruptedCoverage("duplicate path hash"));
                }
            }
            levels.push(hashes);
        }

        if reader.at != bytes.len() {
            return Err(EngineError::CorruptedCoverage("trailing data"));
        }
        Ok(CoverageDb { levels })
    }

    /// Load from disk; an absent file is an empty database.
    pub fn load(path: &Path) -> EngineResult<Self> {
        match std::fs::read(path) {
            Ok(bytes) if bytes.is_empty() => Ok(CoverageDb::new()),
            Ok(bytes) => CoverageDb::parse(&bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(CoverageDb::new()),
            Err(err) => Err(err.into()),
        }
    }

    /// Persist to disk.
    pub fn save(&self, path: &Path) -> EngineResult<()> {
        std::fs::write(path, self.to_bytes())?;
        Ok(())
    }
}

fn push_word(out: &mut Vec<u8>, word: u64) {
    out.extend_from_slice(&word.to_be_bytes());
}

struct WordReader<'a> {
    bytes: &'a [u8],
    at: usize,
}

impl WordReader<'_> {
    fn word(&mut self) -> EngineResult<u64> {
        let end = self
            .at
            .checked_add(8)
            .ok_or(EngineError::CorruptedCoverage("length overflow"))?;
        let chunk = self
            .bytes
            .get(self.at..end)
            .ok_or(EngineError::CorruptedCoverage("truncated stream"))?;
        self.at = end;
        let mut word = [0u8; 8];
        word.copy_from_slice(chunk);
        Ok(u64::from_be_bytes(word))
    }

    fn ensure_words(&self, count: u64) -> EngineResult<()> {
        let need = count
            .checked_mul(8)
            .ok_or(EngineError::CorruptedCoverage("length overflow"))?;
        let have = (self.bytes.len() - self.at) as u64;
        if need > have {
            return Err(EngineError::CorruptedCoverage("truncated stream"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_db() -> CoverageDb {
        let mut db = CoverageDb::new();
        db.absorb_trace(&[cov_item(0x1000, true), cov_item(0x1010, false)]);
        db.absorb_trace(&[cov_item(0x1000, false)]);
        db
    }

    #[test]
    fn eval_bit_encodes_direction() {
        assert_eq!(cov_item(0x1000, true), 0x1000 | (1 << 48));
        assert_eq!(cov_item(0x1000, false), 0x1000);
        assert_eq!(cov_flip(cov_item(0x1000, true)), 0x1000);
    }

    #[test]
    fn round_trips_through_bytes() {
        let db = sample_db();
        let parsed = CoverageDb::parse(&db.to_bytes()).unwrap();
        assert_eq!(parsed, db);
    }

    #[test]
    fn empty_db_round_trips() {
        let db = CoverageDb::new();
        let parsed = CoverageDb::parse(&db.to_bytes()).unwrap();
        assert_eq!(parsed, db);
    }

    #[test]
    fn truncation_is_detected() {
        let bytes = sample_db().to_bytes();
        // cut the stream mid-trace
        let corrupt = &bytes[..bytes.len() - 4];
        assert!(matches!(
            CoverageDb::parse(corrupt),
            Err(EngineError::CorruptedCoverage(_))
        ));
    }

    #[test]
    fn trailing_garbage_is_detected() {
        let mut bytes = sample_db().to_bytes();
        bytes.extend_from_slice(&[0u8; 8]);
        assert!(matches!(
            CoverageDb::parse(&bytes),
            Err(EngineError::CorruptedCoverage("trailing data"))
        ));
    }

    #[test]
    fn hashing_is_deterministic() {
        let trace = [cov_item(0x1000, true), cov_item(0x2000, false)];
        let mut first = PathHasher::new();
        let mut second = PathHasher::new();
        for item in trace {
            first.update(item);
            second.update(item);
        }
        assert_eq!(first.digest(), second.digest());
    }

    #[test]
    fn solves_when_deeper_than_any_recorded_trace() {
        let db = CoverageDb::new();
        assert!(db.should_solve(&[cov_item(0x1000, true)], 0xdead));
    }

    #[test]
    fn solves_on_unseen_flip_hash() {
        let db = sample_db();
        assert!(db.should_solve(&[cov_item(0x9999, true)], 0xdead));
    }

    #[test]
    fn skips_when_flip_already_executed() {
        // two sessions diverge at the first branch; each run's flip is the
        // other's recorded trace
        let mut db = CoverageDb::new();
        let taken = cov_item(0x1000, true);
        let skipped = cov_item(0x1000, false);
        db.absorb_trace(&[skipped]);

        let mut hasher = PathHasher::new();
        let flip_hash = hasher.digest_with(skipped);
        hasher.update(taken);
        assert!(!db.should_solve(&[taken], flip_hash));
    }

    #[test]
    fn hash_collision_with_new_prefix_still_solves() {
        let mut db = CoverageDb::new();
        let other = [cov_item(0x5000, true), cov_item(0x6000, true)];
        let mut hasher = PathHasher::new();
        hasher.update(other[0]);
        hasher.update(other[1]);
        let their_hash = hasher.digest();
        db.record(&other, their_hash);

        // same depth, same (forged) hash, different first step
        let mine = [cov_item(0x7000, true), cov_item(0x6000, false)];
        assert!(db.should_solve(&mine, their_hash));
    }

    #[test]
    fn absorbing_twice_does_not_duplicate() {
        let mut db = CoverageDb::new();
        let trace = [cov_item(0x1000, true), cov_item(0x1010, false)];
        db.absorb_trace(&trace);
        let count = db.trace_count();
        db.absorb_trace(&trace);
        assert_eq!(db.trace_count(), count);
    }
}
