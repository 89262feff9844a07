//! Text embedders for the vector store.
//!
//! The default embedder is Harmonic Token Projection (HTP): a deterministic, training-free
//! projection of each token onto unit circles modulo a set of coprime integers, mean-pooled
//! and L2-normalised. It needs no model file, so a fresh database works out of the box.
//! See "Harmonic Token Projection: A Vocabulary-Free, Training-Free, Deterministic, and
//! Reversible Embedding Methodology" (arXiv 2511.20665).

use std::f64::consts::PI;

use crate::core::error::Result;

/// Default HTP dimension (two components per modulus).
pub const HTP_DIM: usize = 384;

/// Tokens longer than this are truncated before projection (Unicode scalar values).
const MAX_TOKEN_CHARS: usize = 64;

/// Anything that turns text into a fixed-length vector.
pub trait Embedder: Send + Sync {
    /// Stable identifier recorded with each collection, e.g. `htp-384`.
    fn name(&self) -> String;

    fn dimension(&self) -> usize;

    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

pub struct HtpEmbedder {
    moduli: Vec<u64>,
}

impl HtpEmbedder {
    pub fn new() -> Self {
        Self::with_dimension(HTP_DIM)
    }

    /// `dimension` is rounded down to an even number (minimum 2).
    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            moduli: first_primes((dimension / 2).max(1)),
        }
    }

    /// The token is read as a base-2^16 integer; its residue modulo each prime is taken by
    /// Horner's rule so long tokens never overflow.
    fn project_token(&self, token: &str, acc: &mut [f64]) {
        for (i, &m) in self.moduli.iter().enumerate() {
            let residue = token
                .chars()
                .take(MAX_TOKEN_CHARS)
                .fold(0u64, |r, c| (r * (1 << 16) + c as u64) % m);
            let theta = 2.0 * PI * (residue as f64) / (m as f64);
            acc[2 * i] += theta.sin();
            acc[2 * i + 1] += theta.cos();
        }
    }
}

impl Default for HtpEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl Embedder for HtpEmbedder {
    fn name(&self) -> String {
        format!("htp-{}", self.dimension())
    }

    fn dimension(&self) -> usize {
        self.moduli.len() * 2
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut acc = vec![0.0f64; self.dimension()];
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return Ok(vec![0.0; self.dimension()]);
        }

        for token in &tokens {
            self.project_token(token, &mut acc);
        }

        let count = tokens.len() as f64;
        acc.iter_mut().for_each(|v| *v /= count);

        let norm = acc.iter().map(|v| v * v).sum::<f64>().sqrt();
        Ok(acc
            .into_iter()
            .map(|v| if norm > 0.0 { (v / norm) as f32 } else { v as f32 })
            .collect())
    }
}

/// Lowercased words split on whitespace and ASCII punctuation.
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| c.is_whitespace() || c.is_ascii_punctuation())
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// The first `count` primes (pairwise coprime by construction).
fn first_primes(count: usize) -> Vec<u64> {
    let mut primes: Vec<u64> = Vec::with_capacity(count);
    let mut candidate = 2u64;
    while primes.len() < count {
        if primes
            .iter()
            .take_while(|&&p| p * p <= candidate)
            .all(|&p| candidate % p != 0)
        {
            primes.push(candidate);
        }
        candidate += 1;
    }
    primes
}

/// Cosine similarity; 0.0 for mismatched lengths or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a > 0.0 && norm_b > 0.0 {
        dot / (norm_a * norm_b)
    } else {
        0.0
    }
}

pub(crate) fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub(crate) fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_primes() {
        assert_eq!(first_primes(6), vec![2, 3, 5, 7, 11, 13]);
        assert_eq!(first_primes(192).last(), Some(&1163));
    }

    #[test]
    fn test_htp_deterministic_and_normalised() -> Result<()> {
        let a = HtpEmbedder::new();
        let b = HtpEmbedder::new();

        let e1 = a.embed("A detailed explanation of quantum mechanics")?;
        let e2 = b.embed("A detailed explanation of quantum mechanics")?;
        assert_eq!(e1, e2);
        assert_eq!(e1.len(), HTP_DIM);

        let norm: f32 = e1.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.01);
        Ok(())
    }

    #[test]
    fn test_shared_tokens_score_higher() -> Result<()> {
        let model = HtpEmbedder::new();
        let query = model.embed("cardio workouts")?;
        let close = model.embed("Advice on cardio workouts and staying fit")?;
        let far = model.embed("A guide to making the perfect lasagna")?;
        assert!(cosine_similarity(&query, &close) > cosine_similarity(&query, &far));
        Ok(())
    }

    #[test]
    fn test_empty_text_is_zero_vector() -> Result<()> {
        let model = HtpEmbedder::with_dimension(8);
        assert_eq!(model.embed("  ...  ")?, vec![0.0; 8]);
        assert_eq!(model.name(), "htp-8");
        Ok(())
    }

    #[test]
    fn test_cosine_similarity() {
        let a = [1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &[1.0, 0.0, 0.0]) - 1.0).abs() < 0.001);
        assert!(cosine_similarity(&a, &[0.0, 1.0, 0.0]).abs() < 0.001);
        assert!((cosine_similarity(&a, &[-1.0, 0.0, 0.0]) + 1.0).abs() < 0.001);
        assert_eq!(cosine_similarity(&a, &[1.0]), 0.0);
    }

    #[test]
    fn test_blob_conversion() {
        let embedding = vec![1.0, 2.0, 3.0, -0.5];
        assert_eq!(blob_to_embedding(&embedding_to_blob(&embedding)), embedding);
    }
}
