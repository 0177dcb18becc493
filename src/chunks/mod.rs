//! Discovery, visibility and persistence of transformable content regions.

pub mod chunk;
pub mod registry;
pub mod storage;
pub mod visibility;

pub use chunk::{chunk_id, content_hash, word_count, ContentChunk};
pub use registry::ChunkRegistry;
pub use storage::{MemorySessionStore, SessionStore, StoredTransform};
pub use visibility::{ObserverOptions, VisibilityEntry};
