//! Near-duplicate detection for normalized records.
//!
//! Two strategies sit behind the [`Deduplicator`] trait:
//!
//! - [`ContentDedup`]: exact match on the SHA-256 of the whitespace-collapsed
//!   body ([`NormalizedRecord::content_hash`]).
//! - [`SimHashDedup`]: 64-bit SimHash over word tokens plus character
//!   3-shingles; a record is a duplicate when its fingerprint lies within the
//!   Hamming threshold of any accepted fingerprint.
//!
//! State lives for one run and is mutated only when a record is accepted.
//! Neither implementation is `Sync`-safe for concurrent mutation; the pipeline
//! runs dedup in a single pass after fetching completes.

use crate::config::DedupMode;
use crate::models::NormalizedRecord;
use crate::normalize::collapse_whitespace;
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};

static WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w+").unwrap());

/// Decides whether a record is new for this run.
pub trait Deduplicator {
    /// Returns `true` and records the item when it is not a duplicate.
    fn should_accept(&mut self, record: &NormalizedRecord) -> bool;
}

/// Build the deduplicator selected by configuration.
pub fn for_mode(mode: DedupMode, simhash_threshold: u32) -> Box<dyn Deduplicator> {
    match mode {
        DedupMode::Content => Box::new(ContentDedup::default()),
        DedupMode::Simhash => Box::new(SimHashDedup::new(simhash_threshold)),
    }
}

/// Exact-content deduplication.
#[derive(Debug, Default)]
pub struct ContentDedup {
    seen: HashSet<String>,
}

impl Deduplicator for ContentDedup {
    fn should_accept(&mut self, record: &NormalizedRecord) -> bool {
        self.seen.insert(record.content_hash.clone())
    }
}

/// A 64-bit SimHash fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(pub u64);

impl Fingerprint {
    pub fn hamming_distance(&self, other: &Self) -> u32 {
        (self.0 ^ other.0).count_ones()
    }
}

/// Word tokens followed by 3-character shingles of the whitespace-free text.
pub fn tokens(text: &str) -> Vec<String> {
    let lowered = collapse_whitespace(text).to_lowercase();
    let mut out: Vec<String> = WORD_RE
        .find_iter(&lowered)
        .map(|m| m.as_str().to_string())
        .collect();

    let chars: Vec<char> = lowered.chars().filter(|c| !c.is_whitespace()).collect();
    out.extend(chars.windows(3).map(|w| w.iter().collect::<String>()));
    out
}

/// Low 64 bits of the token's SHA-256.
fn token_hash(token: &str) -> u64 {
    let digest = Sha256::digest(token.as_bytes());
    let mut tail = [0u8; 8];
    tail.copy_from_slice(&digest[24..32]);
    u64::from_be_bytes(tail)
}

/// Unweighted SimHash: every token votes +1 / -1 on each bit; ties give 0.
pub fn simhash(text: &str) -> Fingerprint {
    let mut acc = [0i64; 64];
    for token in tokens(text) {
        let h = token_hash(&token);
        for (i, slot) in acc.iter_mut().enumerate() {
            if (h >> i) & 1 == 1 {
                *slot += 1;
            } else {
                *slot -= 1;
            }
        }
    }
    let mut out = 0u64;
    for (i, slot) in acc.iter().enumerate() {
        if *slot > 0 {
            out |= 1u64 << i;
        }
    }
    Fingerprint(out)
}

/// Accepted fingerprints, bucketed so lookups avoid a full scan.
///
/// With threshold `k`, the 64 bits are cut into `k + 1` disjoint bands. Two
/// fingerprints at distance `<= k` cannot differ in every band, so they share
/// at least one exact band value; only fingerprints sharing a band are
/// compared. Thresholds of 64 and above fall back to a linear scan.
#[derive(Debug)]
struct FingerprintIndex {
    threshold: u32,
    bands: Vec<(u32, u64)>,
    tables: Vec<HashMap<u64, Vec<usize>>>,
    fingerprints: Vec<Fingerprint>,
}

impl FingerprintIndex {
    fn new(threshold: u32) -> Self {
        let band_count = threshold as usize + 1;
        let bands = if band_count <= 64 {
            let base = 64 / band_count;
            let extra = 64 % band_count;
            let mut shift = 0u32;
            (0..band_count)
                .map(|i| {
                    let width = (base + usize::from(i < extra)) as u32;
                    let mask = if width == 64 { u64::MAX } else { (1u64 << width) - 1 };
                    let band = (shift, mask);
                    shift += width;
                    band
                })
                .collect()
        } else {
            Vec::new()
        };
        Self {
            threshold,
            tables: bands.iter().map(|_| HashMap::new()).collect(),
            bands,
            fingerprints: Vec::new(),
        }
    }

    fn has_neighbor(&self, fp: Fingerprint) -> bool {
        if self.bands.is_empty() {
            return self
                .fingerprints
                .iter()
                .any(|prev| prev.hamming_distance(&fp) <= self.threshold);
        }
        self.bands
            .iter()
            .zip(&self.tables)
            .filter_map(|(&(shift, mask), table)| table.get(&((fp.0 >> shift) & mask)))
            .flatten()
            .any(|&idx| self.fingerprints[idx].hamming_distance(&fp) <= self.threshold)
    }

    fn insert(&mut self, fp: Fingerprint) {
        let idx = self.fingerprints.len();
        for (&(shift, mask), table) in self.bands.iter().zip(self.tables.iter_mut()) {
            table.entry((fp.0 >> shift) & mask).or_default().push(idx);
        }
        self.fingerprints.push(fp);
    }
}

/// Approximate deduplication by SimHash distance.
#[derive(Debug)]
pub struct SimHashDedup {
    index: FingerprintIndex,
}

impl SimHashDedup {
    pub const DEFAULT_THRESHOLD: u32 = 5;

    pub fn new(threshold: u32) -> Self {
        Self {
            index: FingerprintIndex::new(threshold),
        }
    }
}

impl Default for SimHashDedup {
    fn default() -> Self {
        Self::new(Self::DEFAULT_THRESHOLD)
    }
}

impl Deduplicator for SimHashDedup {
    fn should_accept(&mut self, record: &NormalizedRecord) -> bool {
        let fp = simhash(&record.body);
        if self.index.has_neighbor(fp) {
            return false;
        }
        self.index.insert(fp);
        true
    }
}
