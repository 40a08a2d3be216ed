// Database module
// SQLite holds knowledge base state, vector indexes hold chunk embeddings

pub mod lancedb;
pub mod memory;
pub mod sqlite;
pub mod vector_index;

pub use memory::MemoryVectorIndex;
pub use sqlite::*;
pub use vector_index::{ChunkRecord, ScoredRecord, VectorIndex, cosine_similarity};
