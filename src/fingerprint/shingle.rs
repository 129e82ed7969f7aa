//! k-token shingling with stable 64-bit hashes.
//!
//! Shingle hashes are persisted, so they must not depend on the process:
//! each shingle is hashed with BLAKE3 and truncated to 64 bits.

/// Default number of tokens per shingle.
pub const DEFAULT_SHINGLE_SIZE: usize = 3;

const SEPARATOR: u8 = 0x1f;

/// Hash one shingle.
#[must_use]
pub fn shingle_hash<S: AsRef<str>>(tokens: &[S]) -> u64 {
    let mut hasher = blake3::Hasher::new();
    for (i, token) in tokens.iter().enumerate() {
        if i > 0 {
            hasher.update(&[SEPARATOR]);
        }
        hasher.update(token.as_ref().as_bytes());
    }
    let digest = hasher.finalize();
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(head)
}

/// Sorted, de-duplicated hashes of every `k`-token window.
///
/// Inputs shorter than `k` (but non-empty) form a single shingle so that
/// short texts still compare meaningfully.
#[must_use]
pub fn token_shingles<S: AsRef<str>>(tokens: &[S], k: usize) -> Vec<u64> {
    let k = k.max(1);
    if tokens.is_empty() {
        return Vec::new();
    }
    let mut hashes: Vec<u64> = if tokens.len() < k {
        vec![shingle_hash(tokens)]
    } else {
        tokens.windows(k).map(shingle_hash).collect()
    };
    hashes.sort_unstable();
    hashes.dedup();
    hashes
}

/// Shingle whitespace-separated words of already normalized text.
#[must_use]
pub fn word_shingles(text: &str, k: usize) -> Vec<u64> {
    let words: Vec<&str> = text.split_whitespace().collect();
    token_shingles(&words, k)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_count() {
        let s = word_shingles("a b c d e", 3);
        assert_eq!(s.len(), 3);
        assert!(s.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_repeated_windows_collapse() {
        assert_eq!(word_shingles("a a a a a a", 2).len(), 1);
    }

    #[test]
    fn test_short_and_empty_input() {
        assert_eq!(word_shingles("", 3), Vec::<u64>::new());
        assert_eq!(word_shingles("hello world", 3).len(), 1);
    }

    #[test]
    fn test_separator_prevents_concatenation_collisions() {
        assert_ne!(shingle_hash(&["ab", "c"]), shingle_hash(&["a", "bc"]));
    }

    #[test]
    fn test_hash_is_stable() {
        assert_eq!(shingle_hash(&["x", "y"]), shingle_hash(&["x", "y"]));
        assert_eq!(word_shingles("x y z", 3), token_shingles(&["x", "y", "z"], 3));
    }
}
