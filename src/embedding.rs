//! Voice embedding extraction and similarity.
//!
//! The extractor is an injected capability: production wires a real
//! speaker-recognition model, the default here is a deterministic
//! hash-based stand-in. The threshold state machine in `authenticator`
//! only depends on the contract — a bounded-range similarity between two
//! embeddings — never on how embeddings are computed.

use crate::config::CoreConfig;
use crate::error::CoreError;
use async_trait::async_trait;
use sha2::{Digest, Sha256};

/// Produces a fixed-dimension embedding from a raw audio sample.
#[async_trait]
pub trait EmbeddingExtractor: Send + Sync {
    async fn extract(&self, audio: &[u8]) -> Result<Vec<f64>, CoreError>;

    /// Version tag recorded on voiceprints produced with this extractor.
    fn model_version(&self) -> &str;
}

/// Deterministic stand-in extractor: SHA-256 over the sample bytes,
/// expanded with a counter to fill the requested dimension, then
/// L2-normalized. Identical samples always produce identical embeddings.
pub struct HashEmbeddingExtractor {
    dim: usize,
}

impl HashEmbeddingExtractor {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    pub fn from_config(config: &CoreConfig) -> Self {
        Self::new(config.embedding_dim)
    }
}

#[async_trait]
impl EmbeddingExtractor for HashEmbeddingExtractor {
    async fn extract(&self, audio: &[u8]) -> Result<Vec<f64>, CoreError> {
        if audio.is_empty() {
            return Err(CoreError::InvalidInput("empty audio sample".into()));
        }
        let mut values = Vec::with_capacity(self.dim);
        let mut counter: u32 = 0;
        while values.len() < self.dim {
            let mut hasher = Sha256::new();
            hasher.update(audio);
            hasher.update(counter.to_le_bytes());
            for byte in hasher.finalize() {
                if values.len() == self.dim {
                    break;
                }
                // map each byte into [-1, 1]
                values.push((f64::from(byte) - 127.5) / 127.5);
            }
            counter += 1;
        }
        Ok(l2_normalize(values))
    }

    fn model_version(&self) -> &str {
        "hash-v1"
    }
}

fn l2_normalize(mut v: Vec<f64>) -> Vec<f64> {
    let norm = v.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

/// Cosine similarity between two embeddings, clamped to [-1, 1].
/// Mismatched dimensions or zero vectors compare as 0. Identical
/// embeddings compare as exactly 1.0.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

/// Element-wise mean of several embeddings, re-normalized. Used to fold a
/// multi-sample enrollment into one voiceprint. A single-sample
/// enrollment stores the embedding unchanged, so verification with the
/// exact sample scores exactly 1.0.
pub fn average_embeddings(samples: &[Vec<f64>]) -> Vec<f64> {
    let Some(first) = samples.first() else {
        return Vec::new();
    };
    if samples.len() == 1 {
        return first.clone();
    }
    let dim = first.len();
    let mut sum = vec![0.0; dim];
    for sample in samples {
        for (acc, x) in sum.iter_mut().zip(sample) {
            *acc += x;
        }
    }
    let n = samples.len() as f64;
    for acc in &mut sum {
        *acc /= n;
    }
    l2_normalize(sum)
}

#[cfg(test)]
mod tests {
    use super::*;

    // these futures never actually suspend; a tiny block_on is enough
    fn extract(audio: &[u8]) -> Vec<f64> {
        let extractor = HashEmbeddingExtractor::new(32);
        block_on(extractor.extract(audio)).unwrap()
    }

    fn block_on<F: std::future::Future>(fut: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(fut)
    }

    #[test]
    fn dimension_comes_from_config() {
        let config = CoreConfig {
            embedding_dim: 16,
            ..Default::default()
        };
        let extractor = HashEmbeddingExtractor::from_config(&config);
        let emb = block_on(extractor.extract(b"sized by config")).unwrap();
        assert_eq!(emb.len(), 16);
    }

    #[test]
    fn identical_samples_identical_embeddings() {
        let a = extract(b"hello voice");
        let b = extract(b"hello voice");
        assert_eq!(a, b);
        assert_eq!(cosine_similarity(&a, &b), 1.0);
    }

    #[test]
    fn different_samples_differ() {
        let a = extract(b"sample one");
        let b = extract(b"sample two");
        assert!(cosine_similarity(&a, &b) < 1.0);
    }

    #[test]
    fn embeddings_are_unit_length() {
        let a = extract(b"normalize me");
        let norm: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-9);
    }

    #[test]
    fn dimension_mismatch_scores_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn orthogonal_vectors_score_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
    }

    #[test]
    fn average_of_one_is_identity() {
        let a = extract(b"solo sample");
        let avg = average_embeddings(std::slice::from_ref(&a));
        assert_eq!(avg, a);
        assert_eq!(cosine_similarity(&a, &avg), 1.0);
    }

    #[test]
    fn average_sits_between_samples() {
        let a = extract(b"first take");
        let b = extract(b"second take");
        let avg = average_embeddings(&[a.clone(), b.clone()]);
        let ab = cosine_similarity(&a, &b);
        assert!(cosine_similarity(&a, &avg) > ab);
        assert!(cosine_similarity(&b, &avg) > ab);
    }

    #[test]
    fn empty_audio_rejected() {
        let extractor = HashEmbeddingExtractor::new(32);
        let err = block_on(extractor.extract(b"")).unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }
}
