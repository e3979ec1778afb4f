pub mod config;
pub mod embedder;
pub mod error;
pub mod matcher;
pub mod reference;
pub mod server;
pub mod service;
pub mod storage;
pub mod upload;

// Re-export vision types for convenience
pub use lookalike_vision::{face, Detection, Embedding, Pipeline};

pub use embedder::{Embedder, FaceEmbedding, OnnxEmbedder};
pub use error::CompareError;
pub use service::{Comparison, FaceService, ServiceState};
