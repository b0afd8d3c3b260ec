pub mod index;
pub mod schema;

pub use index::LexicalIndex;
