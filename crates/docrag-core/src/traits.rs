use crate::Result;

/// Embedding capability boundary.
///
/// The retrieval core never computes vectors itself; implementations may call
/// a local model, shell out to an external process, or fabricate
/// deterministic vectors for tests. Implementations must return one vector
/// per input text, in input order, all of dimensionality `dim()`.
pub trait Embedder: Send + Sync {
    /// Stable identifier for the provider/model (e.g., `hash-xx64:d384`).
    /// Persisted alongside stored vectors so a model switch is detectable.
    fn id(&self) -> &str;
    /// Embedding dimensionality (D).
    fn dim(&self) -> usize;
    /// Compute embeddings for a batch of input texts.
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}
