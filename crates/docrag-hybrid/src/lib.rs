pub mod retriever;
pub mod tracker;

pub use retriever::{classify_query, HybridRetriever, QueryClass};
pub use tracker::{state_path, BuildReport, DocumentRecord, IndexBuilder, IndexState};
