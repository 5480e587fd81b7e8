//! Embedding capability with a deterministic fallback.
//!
//! The real embedder is an external service; the fallback generates
//! reproducible pseudo-embeddings from content hashing so retrieval works
//! (on lexical overlap, not semantics) without any provider configured.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;
use unicode_segmentation::UnicodeSegmentation;

use crate::error::Result;

/// Default embedding dimensions.
///
/// This is the authoritative source for embedding dimensions across the
/// codebase; stored vectors must all share it.
pub const DEFAULT_DIMENSIONS: usize = 384;

/// Embeds text into fixed-dimension dense vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the embedding dimensions.
    fn dimensions(&self) -> usize;

    /// Generates an embedding for the given text.
    ///
    /// # Errors
    ///
    /// Returns an error if embedding generation fails.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generates embeddings for multiple texts.
    ///
    /// The default implementation embeds sequentially; implementations may
    /// override for provider-side batching.
    ///
    /// # Errors
    ///
    /// Returns an error if embedding generation fails for any text.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

/// Buckets each word touches in the sketch.
const WORD_PROBES: u64 = 3;

/// Hash seed offset separating sign hashes from bucket hashes.
const SIGN_SEED: u64 = 0x5161;

/// Hash seed for adjacent-word-pair features.
const PAIR_SEED: u64 = 0xB16A;

/// Contribution of one word-pair feature (words contribute 1.0 per probe).
const PAIR_WEIGHT: f32 = 0.25;

/// Count-sketch fallback embedder.
///
/// Each word is projected onto [`WORD_PROBES`] sketch buckets with a
/// deterministic ±1 sign per probe, so texts sharing vocabulary accumulate
/// on the same coordinates. Adjacent word pairs add a weaker phrase-level
/// signal. Vectors are L2-normalized, making cosine similarity the dot
/// product. This is NOT semantic similarity - it's lexical overlap.
pub struct FallbackEmbedder {
    dimensions: usize,
}

impl FallbackEmbedder {
    /// Creates a fallback embedder with the specified dimensions.
    #[must_use]
    pub const fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    /// Hashes a feature under a seed, decorrelating bucket and sign draws.
    fn seeded_hash(seed: u64, feature: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        seed.hash(&mut hasher);
        feature.hash(&mut hasher);
        hasher.finish()
    }

    fn sketch(&self, embedding: &mut [f32], seed: u64, feature: &str, weight: f32) {
        let bucket = Self::seeded_hash(seed, feature);
        let sign = Self::seeded_hash(SIGN_SEED ^ seed, feature);
        let idx = (bucket as usize) % self.dimensions;
        if sign & 1 == 0 {
            embedding[idx] += weight;
        } else {
            embedding[idx] -= weight;
        }
    }

    fn generate(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimensions];

        let words: Vec<String> = text.unicode_words().map(str::to_lowercase).collect();

        // Word features: every probe lands the word on its own bucket.
        for word in &words {
            for probe in 0..WORD_PROBES {
                self.sketch(&mut embedding, probe, word, 1.0);
            }
        }

        // Adjacent pairs preserve a little word order across chunks.
        for pair in words.windows(2) {
            let joined = format!("{} {}", pair[0], pair[1]);
            self.sketch(&mut embedding, PAIR_SEED, &joined, PAIR_WEIGHT);
        }

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut embedding {
                *value /= norm;
            }
        }

        embedding
    }
}

#[async_trait]
impl Embedder for FallbackEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.generate(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        // Pure CPU work, parallelized across the batch.
        use rayon::prelude::*;

        Ok(texts.par_iter().map(|text| self.generate(text)).collect())
    }
}

/// Computes cosine similarity between two embedding vectors.
///
/// Returns a value between -1.0 (opposite) and 1.0 (identical), or 0.0 when
/// the vectors differ in length or have zero magnitude.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}
