//! Knowledge 모듈 - 볼트 문서 하이브리드 검색 코어
//!
//! - Chunker: Markdown 헤딩 트리 기반 청크 생성
//! - SQLite: 청크 저장 + FTS5 키워드 검색 (BM25)
//! - Dense: 벡터 검색 (메모리 / LanceDB)
//! - Fusion: RRF로 두 검색 결과 통합
//! - Rerank / Explain: 재정렬과 결과 근거

mod chunker;
mod document;
mod explain;
mod frontmatter;
mod fusion;
mod hybrid;
mod lance;
mod rerank;
mod sparse;
mod store;
mod vector;

// Re-exports
pub use chunker::{
    count_tokens, markdown_chunker, BuiltDocument, ChunkConfig, Chunker, MarkdownChunker,
};
pub use document::{
    chunk_id, folder_of, Chunk, ChunkId, Document, DocumentId, Frontmatter, FrontmatterValue,
    ScoredChunk, SearchSource,
};
pub use explain::{explain, AnnotatedResult, Degradation, OrderedBy};
pub use frontmatter::normalize_tag;
pub use fusion::{RankedResult, RrfFusion, DEFAULT_RRF_CONSTANT};
pub use hybrid::{
    DateRange, HybridRetriever, HybridStats, IngestOutcome, IngestReport, RetrievalFilters,
    RetrievalMatch, RetrievalRequest, RetrievalResponse,
};
pub use lance::LanceVectorStore;
pub use rerank::{apply_rerank, create_reranker, HttpReranker, LexicalReranker, Reranker};
pub use sparse::{query_terms, SparseIndex};
pub use store::{ChunkStore, DocumentRecord, StoreStats};
pub use vector::{cosine_similarity, DenseIndex, InMemoryDenseIndex, VectorEntry};
