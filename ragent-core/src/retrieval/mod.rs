//! Vector retrieval: store backends and result normalization.

pub mod normalize;
pub mod store;

pub use normalize::{PointShape, ResponseShape, normalize};
pub use store::{InMemoryStore, QdrantStore, VectorStore, create_store};
