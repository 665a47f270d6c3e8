//! Content deduplication for ingestion batches.
//!
//! Two layers run per batch: exact matching over a truncated content hash,
//! then near-duplicate matching over 64-bit SimHash fingerprints. Both
//! indexes are batch-scoped. A separate MinHash index supports fuzzy
//! cross-corpus similarity search and is independent of batch dedup.

use std::collections::HashMap;

use sha2::{Digest, Sha256};

use crate::models::ContentItem;

/// Hamming-distance similarity above which two fingerprints count as
/// near duplicates.
pub const DEFAULT_NEAR_THRESHOLD: f64 = 0.9;

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Canonicalizes text before hashing: lowercase, URLs removed, punctuation
/// stripped, whitespace collapsed to single spaces.
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());

    for token in text.split_whitespace() {
        let lower = token.to_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("www.")
        {
            continue;
        }

        let before = out.len();
        for ch in lower.chars() {
            if ch.is_alphanumeric() {
                out.push(ch);
            }
        }
        if out.len() > before {
            out.push(' ');
        }
    }

    if out.ends_with(' ') {
        out.pop();
    }
    out
}

/// 128-bit exact-match key: the first 16 bytes of the SHA-256 digest of
/// the normalized text.
pub fn exact_hash(normalized: &str) -> [u8; 16] {
    let digest = Sha256::digest(normalized.as_bytes());
    let mut key = [0u8; 16];
    key.copy_from_slice(&digest[..16]);
    key
}

fn token_hash(token: &str) -> u64 {
    let digest = Sha256::digest(token.as_bytes());
    u64::from_be_bytes(digest[..8].try_into().unwrap_or([0u8; 8]))
}

// ---------------------------------------------------------------------------
// SimHash
// ---------------------------------------------------------------------------

/// 64-bit SimHash fingerprint of normalized text.
///
/// Each whitespace token contributes a vote per bit position; the sign of
/// the vote total determines the fingerprint bit. Empty text hashes to 0.
pub fn simhash(normalized: &str) -> u64 {
    let mut votes = [0i32; 64];
    let mut any = false;

    for token in normalized.split_whitespace() {
        any = true;
        let h = token_hash(token);
        for (bit, vote) in votes.iter_mut().enumerate() {
            if (h >> bit) & 1 == 1 {
                *vote += 1;
            } else {
                *vote -= 1;
            }
        }
    }

    if !any {
        return 0;
    }

    let mut fingerprint = 0u64;
    for (bit, vote) in votes.iter().enumerate() {
        if *vote > 0 {
            fingerprint |= 1 << bit;
        }
    }
    fingerprint
}

/// Fraction of fingerprint bits two hashes agree on.
pub fn simhash_similarity(a: u64, b: u64) -> f64 {
    1.0 - (a ^ b).count_ones() as f64 / 64.0
}

// ---------------------------------------------------------------------------
// Batch dedup engine
// ---------------------------------------------------------------------------

/// Dedup verdict for one item.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct DedupFlags {
    pub is_duplicate: bool,
    pub is_exact_duplicate: bool,
    pub is_near_duplicate: bool,
    /// Id of the earlier item this one duplicates.
    pub duplicate_of: Option<String>,
}

impl DedupFlags {
    fn unique() -> Self {
        Self::default()
    }

    fn exact(of: &str) -> Self {
        Self {
            is_duplicate: true,
            is_exact_duplicate: true,
            is_near_duplicate: false,
            duplicate_of: Some(of.to_string()),
        }
    }

    fn near(of: &str) -> Self {
        Self {
            is_duplicate: true,
            is_exact_duplicate: false,
            is_near_duplicate: true,
            duplicate_of: Some(of.to_string()),
        }
    }
}

/// Batch-scoped dedup state. Construct one per batch, or call
/// [`reset`](Self::reset) between batches.
pub struct DedupEngine {
    near_threshold: f64,
    exact_index: HashMap<[u8; 16], String>,
    // Insertion order matters: the first sufficiently-similar earlier item
    // wins as the duplicate target.
    near_index: Vec<(u64, String)>,
}

impl DedupEngine {
    pub fn new() -> Self {
        Self {
            near_threshold: DEFAULT_NEAR_THRESHOLD,
            exact_index: HashMap::new(),
            near_index: Vec::new(),
        }
    }

    pub fn with_near_threshold(mut self, threshold: f64) -> Self {
        self.near_threshold = threshold;
        self
    }

    /// Checks one item against everything seen so far in this batch, and
    /// registers it in the indexes when it is unique.
    pub fn check(&mut self, item_id: &str, text: &str) -> DedupFlags {
        let normalized = normalize(text);
        // Empty content carries no signal and is never a duplicate.
        if normalized.is_empty() {
            return DedupFlags::unique();
        }
        let key = exact_hash(&normalized);

        if let Some(original) = self.exact_index.get(&key) {
            return DedupFlags::exact(original);
        }

        let fingerprint = simhash(&normalized);
        for (seen, original) in &self.near_index {
            if simhash_similarity(fingerprint, *seen) >= self.near_threshold {
                return DedupFlags::near(original);
            }
        }

        self.exact_index.insert(key, item_id.to_string());
        self.near_index.push((fingerprint, item_id.to_string()));
        DedupFlags::unique()
    }

    /// Runs [`check`](Self::check) over a batch, returning flags aligned
    /// by index with the input. State from any previous batch is cleared
    /// first, duplicate detection is scoped to a single batch.
    pub fn deduplicate_batch(&mut self, items: &[ContentItem]) -> Vec<DedupFlags> {
        self.reset();
        items
            .iter()
            .map(|item| self.check(&item.id, &item.content))
            .collect()
    }

    pub fn reset(&mut self) {
        self.exact_index.clear();
        self.near_index.clear();
    }
}

impl Default for DedupEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// MinHash similarity index
// ---------------------------------------------------------------------------

const MINHASH_FUNCTIONS: usize = 128;
const SHINGLE_SIZE: usize = 3;

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

/// MinHash signature over character 3-shingles of normalized text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinHashSignature([u64; MINHASH_FUNCTIONS]);

/// Derives [`MinHashSignature`]s using 128 seeded hash permutations. The
/// permutation constants are deterministic so signatures are comparable
/// across processes.
#[derive(Clone)]
pub struct MinHasher {
    multipliers: [u64; MINHASH_FUNCTIONS],
    offsets: [u64; MINHASH_FUNCTIONS],
}

impl MinHasher {
    pub fn new() -> Self {
        let mut multipliers = [0u64; MINHASH_FUNCTIONS];
        let mut offsets = [0u64; MINHASH_FUNCTIONS];
        for i in 0..MINHASH_FUNCTIONS {
            // Odd multipliers keep the permutation a bijection over u64.
            multipliers[i] = splitmix64(i as u64) | 1;
            offsets[i] = splitmix64(i as u64 ^ 0xdead_beef_cafe_f00d);
        }
        Self {
            multipliers,
            offsets,
        }
    }

    pub fn signature(&self, text: &str) -> MinHashSignature {
        let normalized = normalize(text);
        let chars: Vec<char> = normalized.chars().collect();
        let mut mins = [u64::MAX; MINHASH_FUNCTIONS];

        if chars.len() >= SHINGLE_SIZE {
            for window in chars.windows(SHINGLE_SIZE) {
                let shingle: String = window.iter().collect();
                let base = token_hash(&shingle);
                for i in 0..MINHASH_FUNCTIONS {
                    let h = base.wrapping_mul(self.multipliers[i]) ^ self.offsets[i];
                    if h < mins[i] {
                        mins[i] = h;
                    }
                }
            }
        }

        MinHashSignature(mins)
    }

    /// Estimated Jaccard similarity: fraction of matching signature slots.
    pub fn similarity(a: &MinHashSignature, b: &MinHashSignature) -> f64 {
        let matching = a.0.iter().zip(b.0.iter()).filter(|(x, y)| x == y).count();
        matching as f64 / MINHASH_FUNCTIONS as f64
    }
}

impl Default for MinHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Searchable corpus of MinHash signatures.
pub struct MinHashIndex {
    hasher: MinHasher,
    entries: Vec<(String, MinHashSignature)>,
}

impl MinHashIndex {
    pub fn new() -> Self {
        Self {
            hasher: MinHasher::new(),
            entries: Vec::new(),
        }
    }

    pub fn insert(&mut self, id: impl Into<String>, text: &str) {
        let signature = self.hasher.signature(text);
        self.entries.push((id.into(), signature));
    }

    /// Entries at least `min_similarity` similar to the query, most
    /// similar first.
    pub fn find_similar(&self, text: &str, min_similarity: f64) -> Vec<(String, f64)> {
        let query = self.hasher.signature(text);
        let mut hits: Vec<(String, f64)> = self
            .entries
            .iter()
            .map(|(id, sig)| (id.clone(), MinHasher::similarity(&query, sig)))
            .filter(|(_, score)| *score >= min_similarity)
            .collect();
        hits.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        hits
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for MinHashIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::make_test_item;

    #[test]
    fn test_normalize_lowercases_and_strips() {
        assert_eq!(normalize("Hello, World!"), "hello world");
        assert_eq!(normalize("  Many   spaces\t here "), "many spaces here");
    }

    #[test]
    fn test_normalize_removes_urls() {
        assert_eq!(
            normalize("check https://example.com/page this out"),
            "check this out"
        );
        assert_eq!(normalize("see www.example.com now"), "see now");
    }

    #[test]
    fn test_normalize_empty() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("!!! ... ???"), "");
    }

    #[test]
    fn test_exact_hash_is_stable_across_formatting() {
        let a = exact_hash(&normalize("Hello, World!"));
        let b = exact_hash(&normalize("hello   world"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_simhash_identical_texts_match() {
        let n = normalize("the quick brown fox jumps over the lazy dog");
        assert_eq!(simhash(&n), simhash(&n));
        assert_eq!(simhash_similarity(simhash(&n), simhash(&n)), 1.0);
    }

    #[test]
    fn test_simhash_similar_texts_are_close() {
        let a = simhash(&normalize(
            "the quick brown fox jumps over the lazy dog in the morning sun",
        ));
        let b = simhash(&normalize(
            "the quick brown fox jumps over the lazy cat in the morning sun",
        ));
        assert!(simhash_similarity(a, b) > 0.8);
    }

    #[test]
    fn test_simhash_unrelated_texts_are_far() {
        let a = simhash(&normalize(
            "quarterly earnings exceeded analyst expectations this fiscal year",
        ));
        let b = simhash(&normalize(
            "grandma baked seventeen chocolate cookies on sunday afternoon",
        ));
        assert!(simhash_similarity(a, b) < 0.85);
    }

    #[test]
    fn test_engine_flags_exact_duplicate() {
        let mut engine = DedupEngine::new();

        let first = engine.check("post-1", "Hello, World!");
        assert!(!first.is_duplicate);

        let second = engine.check("post-2", "hello   world");
        assert!(second.is_exact_duplicate);
        assert_eq!(second.duplicate_of.as_deref(), Some("post-1"));
    }

    #[test]
    fn test_engine_flags_near_duplicate() {
        let mut engine = DedupEngine::new();

        let text_a = "breaking news this morning the central bank raised benchmark interest \
                      rates by a quarter point citing persistent inflation pressure across \
                      the wider economy and signaled further hikes";
        let text_b = "breaking news this morning the central bank sharply raised benchmark \
                      interest rates by a quarter point citing persistent inflation pressure \
                      across the wider economy and signaled further hikes";

        let first = engine.check("post-1", text_a);
        assert!(!first.is_duplicate);

        let second = engine.check("post-2", text_b);
        assert!(second.is_near_duplicate);
        assert!(!second.is_exact_duplicate);
        assert_eq!(second.duplicate_of.as_deref(), Some("post-1"));
    }

    #[test]
    fn test_engine_flags_single_inserted_word() {
        let mut engine = DedupEngine::new();

        let text_a = "the committee voted to approve the updated budget proposal covering \
                      infrastructure spending education grants and public transit \
                      improvements for the next fiscal year";
        let text_b = "the committee voted to approve the updated annual budget proposal \
                      covering infrastructure spending education grants and public transit \
                      improvements for the next fiscal year";

        engine.check("post-1", text_a);
        let flags = engine.check("post-2", text_b);

        assert!(flags.is_near_duplicate);
        assert_eq!(flags.duplicate_of.as_deref(), Some("post-1"));
    }

    #[test]
    fn test_engine_first_match_wins() {
        let mut engine = DedupEngine::new();
        let text = "identical content for every item in the batch";

        engine.check("post-1", text);
        engine.check("post-2", text);
        let third = engine.check("post-3", text);

        assert_eq!(third.duplicate_of.as_deref(), Some("post-1"));
    }

    #[test]
    fn test_engine_ignores_empty_content() {
        let mut engine = DedupEngine::new();

        assert!(!engine.check("post-1", "").is_duplicate);
        assert!(!engine.check("post-2", "   ").is_duplicate);
        assert!(!engine.check("post-3", "!!!").is_duplicate);
    }

    #[test]
    fn test_engine_reset_clears_state() {
        let mut engine = DedupEngine::new();

        engine.check("post-1", "some unique content here");
        engine.reset();
        let flags = engine.check("post-2", "some unique content here");

        assert!(!flags.is_duplicate);
    }

    #[test]
    fn test_deduplicate_batch_aligned_output() {
        let mut engine = DedupEngine::new();
        let items = vec![
            make_test_item("a", "first piece of content about rust"),
            make_test_item("b", "completely different topic entirely about cooking pasta"),
            make_test_item("c", "first piece of content about rust"),
        ];

        let flags = engine.deduplicate_batch(&items);
        assert_eq!(flags.len(), 3);
        assert!(!flags[0].is_duplicate);
        assert!(!flags[1].is_duplicate);
        assert!(flags[2].is_exact_duplicate);
        assert_eq!(flags[2].duplicate_of.as_deref(), Some("a"));
    }

    #[test]
    fn test_deduplicate_batch_is_batch_scoped() {
        let mut engine = DedupEngine::new();
        let first_batch = vec![make_test_item("old-1", "the same story shared in two batches")];
        let second_batch = vec![make_test_item("new-1", "the same story shared in two batches")];

        engine.deduplicate_batch(&first_batch);
        let flags = engine.deduplicate_batch(&second_batch);

        assert!(!flags[0].is_duplicate);
        assert_eq!(flags[0].duplicate_of, None);
    }

    #[test]
    fn test_minhash_identical_texts_score_one() {
        let hasher = MinHasher::new();
        let a = hasher.signature("the quick brown fox jumps over the lazy dog");
        let b = hasher.signature("the quick brown fox jumps over the lazy dog");
        assert_eq!(MinHasher::similarity(&a, &b), 1.0);
    }

    #[test]
    fn test_minhash_index_find_similar() {
        let mut index = MinHashIndex::new();
        index.insert("doc-1", "rust is a systems programming language focused on safety");
        index.insert("doc-2", "a recipe for chocolate chip cookies with brown butter");

        let hits = index.find_similar(
            "rust is a systems programming language focused on speed",
            0.5,
        );

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "doc-1");
        assert!(hits[0].1 >= 0.5);
    }

    #[test]
    fn test_minhash_index_sorted_descending() {
        let mut index = MinHashIndex::new();
        index.insert("close", "the quick brown fox jumps over the lazy dog today");
        index.insert("closer", "the quick brown fox jumps over the lazy dog");

        let hits = index.find_similar("the quick brown fox jumps over the lazy dog", 0.1);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, "closer");
        assert!(hits[0].1 >= hits[1].1);
    }
}
