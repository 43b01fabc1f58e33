//! Hashed n-gram text embeddings.
//!
//! Deterministic, dependency-free vectors for similarity comparisons inside
//! the compressor and for the expectation vector it exports. Not a neural
//! embedding: each word n-gram (n in 1..=3) is hashed to a bucket and a sign,
//! the buckets are accumulated, and the result is L2-normalized. SHA-256
//! supplies the bucket hash so vectors are identical across processes and
//! platforms.

use sha2::{Digest, Sha256};

/// Dimension of every vector produced here, including the expectation vector.
pub const EXPECTATION_DIM: usize = 768;

/// Embed a text as a unit vector. Returns all-zeros for text with no tokens.
pub fn embed(text: &str) -> Vec<f32> {
    let words = tokenize(text);
    let mut vector = vec![0.0f32; EXPECTATION_DIM];
    if words.is_empty() {
        return vector;
    }

    for n in 1..=3usize {
        if words.len() < n {
            break;
        }
        for gram in words.windows(n) {
            let (bucket, sign) = hash_gram(gram);
            vector[bucket] += sign;
        }
    }

    normalize(&mut vector);
    vector
}

/// Cosine similarity. Inputs are unit or zero vectors; a zero vector yields 0.
/// Accumulates in f64 so the norm invariant survives 768 summands.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b)
        .map(|(x, y)| *x as f64 * *y as f64)
        .sum::<f64>() as f32
}

/// L2 norm of a vector, accumulated in f64.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter()
        .map(|x| *x as f64 * *x as f64)
        .sum::<f64>()
        .sqrt() as f32
}

/// Scale a vector to unit length in place. Zero vectors are left untouched.
pub fn normalize(v: &mut [f32]) {
    let norm = l2_norm(v);
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Lowercased alphanumeric word stream.
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

/// Stable (bucket, sign) for one n-gram.
fn hash_gram(gram: &[String]) -> (usize, f32) {
    let mut hasher = Sha256::new();
    for (i, word) in gram.iter().enumerate() {
        if i > 0 {
            hasher.update([0x1f]);
        }
        hasher.update(word.as_bytes());
    }
    let digest = hasher.finalize();
    let h = u64::from_le_bytes(digest[..8].try_into().expect("digest is 32 bytes"));
    let bucket = (h % EXPECTATION_DIM as u64) as usize;
    let sign = if h & (1 << 63) == 0 { 1.0 } else { -1.0 };
    (bucket, sign)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_empty_text_is_zero_vector() {
        let v = embed("");
        assert_eq!(v.len(), EXPECTATION_DIM);
        assert!(v.iter().all(|x| *x == 0.0));
        assert_eq!(l2_norm(&v), 0.0);
    }

    #[test]
    fn test_embedding_is_deterministic() {
        let a = embed("Implement a JWT refresh endpoint");
        let b = embed("Implement a JWT refresh endpoint");
        assert_eq!(a, b);
    }

    #[test]
    fn test_related_texts_are_more_similar_than_unrelated() {
        let task = embed("implement a jwt refresh endpoint for the auth service");
        let related = embed("the jwt refresh endpoint should rotate the refresh token");
        let unrelated = embed("the quarterly marketing budget meeting moved to tuesday");
        assert!(cosine(&task, &related) > cosine(&task, &unrelated));
    }

    #[test]
    fn test_self_similarity_is_one() {
        let v = embed("segment text with several words in it");
        assert!((cosine(&v, &v) - 1.0).abs() < 1e-6);
    }

    proptest! {
        #[test]
        fn prop_nonempty_embeddings_are_unit_norm(text in "[a-zA-Z0-9 ]{1,200}") {
            let v = embed(&text);
            let norm = l2_norm(&v);
            // Texts of only separators tokenize to nothing and stay zero.
            if norm > 0.0 {
                prop_assert!((norm - 1.0).abs() < 1e-6);
            }
        }
    }
}
