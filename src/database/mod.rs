pub mod sqlite;
pub mod vector_index;

pub use sqlite::Database;
pub use vector_index::{IndexedChunk, SearchHit, VectorIndex};
