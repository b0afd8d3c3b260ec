//! Embedding providers behind the `docrag_core::traits::Embedder` seam.
//!
//! The retrieval core is backend-agnostic: swapping providers changes
//! neither the semantic index nor the retriever. `hash` is a deterministic
//! offline provider for development and tests; `command` shells out to an
//! external batch embedding process.

pub mod command;
pub mod hash;

pub use command::CommandEmbedder;
pub use hash::HashEmbedder;

use docrag_core::config::EmbeddingSettings;
use docrag_core::traits::Embedder;
use docrag_core::{Error, Result};

/// Build the configured embedding provider. `provider = "none"` disables the
/// semantic side entirely and the engine runs lexical-only.
pub fn embedder_from_settings(settings: &EmbeddingSettings) -> Result<Option<Box<dyn Embedder>>> {
    match settings.provider.as_str() {
        "none" => Ok(None),
        "hash" => Ok(Some(Box::new(HashEmbedder::new(settings.dimension)))),
        "command" => Ok(Some(Box::new(CommandEmbedder::new(
            &settings.command,
            settings.dimension,
            settings.timeout_ms,
        )?))),
        other => Err(Error::InvalidConfig(format!(
            "unknown embedding.provider '{}' (expected hash|command|none)",
            other
        ))),
    }
}
