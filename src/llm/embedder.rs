//! Sentence-embedding capability used by the news-dedup step in the
//! ranker (C7) and analysis engine (C8), both at cosine-similarity 0.66.
//!
//! No crate in the example pack grounds a concrete ONNX/candle runtime
//! choice for the `ko-sbert-sts` model this system's source calls for, so
//! the real backend is left as an open question rather than guessed (see
//! DESIGN.md). `IdentityEmbedder` is the default: it returns empty vectors,
//! which makes every cosine similarity computation short-circuit to "not a
//! duplicate" — dedup becomes a no-op rather than silently dropping real
//! news.

pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Vec<f32>;
}

pub struct IdentityEmbedder;

impl Embedder for IdentityEmbedder {
    fn embed(&self, _text: &str) -> Vec<f32> {
        Vec::new()
    }
}

// TODO: wire a real ONNX/candle runtime for ko-sbert-sts once a concrete
// crate choice is available; `SentenceEmbedder` below is the extension
// point `AnalysisEngine`/`rank_top_n` construct against.
pub struct SentenceEmbedder {
    #[allow(dead_code)]
    model_path: String,
}

impl SentenceEmbedder {
    pub fn new(model_path: String) -> Self {
        Self { model_path }
    }
}

impl Embedder for SentenceEmbedder {
    fn embed(&self, _text: &str) -> Vec<f32> {
        // TODO: replace with a real forward pass once the runtime is wired.
        Vec::new()
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_embedder_never_matches() {
        let embedder = IdentityEmbedder;
        let a = embedder.embed("hello");
        let b = embedder.embed("hello");
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn cosine_similarity_identical_vectors_is_one() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_orthogonal_is_zero() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }
}
