//! vault-rag - 마크다운 볼트 하이브리드 RAG 검색
//!
//! 마크다운 노트를 헤딩 구조에 맞춰 청크로 나누고
//! SQLite FTS5 키워드 검색 + 벡터 검색을 RRF로 통합합니다.

pub mod cli;
pub mod collector;
pub mod config;
pub mod embedding;
pub mod error;
pub mod knowledge;

// Re-exports
pub use collector::{VaultCollector, VaultScan};
pub use config::RagConfig;
pub use embedding::{create_embedder, EmbeddingProvider, HashingEmbedding, HttpEmbedding};
pub use error::{RagError, Result};
pub use knowledge::{
    Chunk, ChunkConfig, Chunker, Document, HybridRetriever, MarkdownChunker, RetrievalFilters,
    RetrievalRequest, RetrievalResponse,
};
