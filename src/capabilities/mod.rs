//! External capability abstractions (C2/C3/C9). The core never names a
//! vendor directly: each trait has a `remote` implementation speaking a
//! real wire format and an in-memory fake used by tests, matching the
//! {remote, in-memory-fake, recording} variants called for in the design.

pub mod embedding;
pub mod rerank;
pub mod vector_index;

pub use embedding::{EmbeddingCapability, EmbeddingKind, InMemoryFakeEmbedding, VoyageEmbeddingCapability};
pub use rerank::{NoopReranker, RemoteReranker, RerankCapability, RerankOutcome};
pub use vector_index::{Distance, Filter, InMemoryFakeVectorIndex, Point, QdrantVectorIndex, ScrollPage, SearchHit, VectorIndexCapability};
