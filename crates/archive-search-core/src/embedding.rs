//! Embedder trait, the offline feature-hashing embedder, and vector utilities.
//!
//! Every [`Embedder`] returns unit-length vectors of exactly
//! [`Embedder::dims`] components, so cosine similarity reduces to
//! [`dot`]. Backend output goes through [`finalize_vector`] to enforce that
//! contract; a backend that cannot produce a meaningful vector fails with
//! [`RetrievalError::EmbeddingUnavailable`] instead of returning zeros.
//!
//! Network-backed adapters (OpenAI, Ollama, fastembed) live in the
//! `archive-search` app crate.

use std::collections::HashMap;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::{Result, RetrievalError};

/// Maps text to fixed-dimension, L2-normalized vectors.
///
/// Implementations must be deterministic: the same text always yields the
/// same vector (within floating tolerance).
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality.
    fn dims(&self) -> usize;
    /// Embed a batch of texts, returning one vector per input in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed a single text.
pub async fn embed_one(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>> {
    embedder
        .embed(&[text.to_string()])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| RetrievalError::EmbeddingUnavailable("empty embedding response".into()))
}

/// Check a raw backend vector against `dims` and scale it to unit length.
///
/// Fails with [`RetrievalError::DimensionMismatch`] on a length mismatch and
/// with [`RetrievalError::EmbeddingUnavailable`] for non-finite or zero
/// vectors.
pub fn finalize_vector(mut vector: Vec<f32>, dims: usize) -> Result<Vec<f32>> {
    if vector.len() != dims {
        return Err(RetrievalError::DimensionMismatch {
            expected: dims,
            actual: vector.len(),
        });
    }
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(RetrievalError::EmbeddingUnavailable(
            "backend returned non-finite values".into(),
        ));
    }
    let norm = l2_norm(&vector);
    if norm < f32::EPSILON {
        return Err(RetrievalError::EmbeddingUnavailable(
            "backend returned a zero vector".into(),
        ));
    }
    for v in vector.iter_mut() {
        *v /= norm;
    }
    Ok(vector)
}

pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Dot product of two equal-length vectors; cosine similarity for unit
/// vectors. Returns `0.0` when the lengths differ.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// # Example
///
/// ```rust
/// use archive_search_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob).unwrap(), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB written by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Result<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return Err(RetrievalError::InvalidChunk(format!(
            "vector blob of {} bytes is not a whole number of f32 values",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

// ============ Hash embedder ============

/// Offline, deterministic bag-of-words embedder.
///
/// Each lower-cased alphanumeric token is hashed with SHA-256 into one of
/// `dims` buckets, weighted by `1 + ln(tf)`, and the result is
/// L2-normalized. All weights are non-negative, so two texts sharing a
/// token always have a positive similarity.
pub struct HashEmbedder {
    model: String,
    dims: usize,
}

impl HashEmbedder {
    pub const MODEL_NAME: &'static str = "feature-hash-v1";

    pub fn new(dims: usize) -> Self {
        Self {
            model: Self::MODEL_NAME.to_string(),
            dims: dims.max(1),
        }
    }

    fn bucket(&self, token: &str) -> usize {
        let digest = Sha256::digest(token.as_bytes());
        let mut word = [0u8; 8];
        word.copy_from_slice(&digest[..8]);
        (u64::from_le_bytes(word) % self.dims as u64) as usize
    }

    fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let mut tf: HashMap<String, u32> = HashMap::new();
        for token in tokenize(text) {
            *tf.entry(token).or_insert(0) += 1;
        }
        if tf.is_empty() {
            return Err(RetrievalError::UnembeddableText(format!(
                "{:?}",
                text.chars().take(40).collect::<String>()
            )));
        }

        let mut vector = vec![0.0f32; self.dims];
        // Sorted so float accumulation order never depends on map iteration.
        let mut terms: Vec<(String, u32)> = tf.into_iter().collect();
        terms.sort();
        for (token, count) in terms {
            vector[self.bucket(&token)] += 1.0 + (count as f32).ln();
        }
        finalize_vector(vector, self.dims)
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed_text(t)).collect()
    }
}
