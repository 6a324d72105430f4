//! 하이브리드 검색 - 수집 및 검색 오케스트레이션
//!
//! 키워드 검색(FTS5)과 벡터 검색을 동시에 수행하고 RRF로 통합합니다.
//! 한쪽 인덱스가 실패하거나 타임아웃되면 남은 쪽 결과만으로 순위를 매기고
//! 응답에 degradation을 남깁니다. 둘 다 실패한 경우만 에러입니다.
//!
//! ref: https://www.elastic.co/blog/hybrid-search-rrf

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;

use crate::config::{DenseBackend, RagConfig, RetrievalConfig};
use crate::embedding::{create_embedder, EmbeddingProvider};
use crate::error::{RagError, Result};

use super::chunker::{markdown_chunker, Chunker};
use super::document::{Chunk, ChunkId, Document, DocumentId, ScoredChunk, SearchSource};
use super::explain::{explain, AnnotatedResult, Degradation};
use super::frontmatter::normalize_tag;
use super::fusion::{RankedResult, RrfFusion};
use super::lance::LanceVectorStore;
use super::rerank::{apply_rerank, create_reranker, Reranker};
use super::sparse::{query_terms, SparseIndex};
use super::store::{ChunkStore, DocumentRecord};
use super::vector::{DenseIndex, InMemoryDenseIndex, VectorEntry};

// ============================================================================
// Request / Response Types
// ============================================================================

/// 날짜 범위 (양 끝 포함)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.map_or(true, |s| date >= s) && self.end.map_or(true, |e| date <= e)
    }
}

/// 검색 필터
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalFilters {
    /// 모두 포함해야 하는 태그
    pub tags: Vec<String>,
    /// 문서 폴더 접두어 (`projects/rag`)
    pub folder: Option<String>,
    /// frontmatter `date` (없으면 수정 시각) 기준 범위
    pub date_range: Option<DateRange>,
}

impl RetrievalFilters {
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty() && self.folder.is_none() && self.date_range.is_none()
    }

    /// 청크가 모든 조건을 만족하는지 여부
    pub fn matches(&self, chunk: &Chunk) -> bool {
        let tags_ok = self
            .tags
            .iter()
            .filter_map(|t| normalize_tag(t))
            .all(|t| chunk.tags.contains(&t));
        if !tags_ok {
            return false;
        }

        if let Some(folder) = &self.folder {
            let folder = folder.trim_matches('/');
            if !folder.is_empty() && !chunk.document_id.starts_with(&format!("{}/", folder)) {
                return false;
            }
        }

        if let Some(range) = &self.date_range {
            if !range.contains(chunk.effective_date()) {
                return false;
            }
        }

        true
    }
}

/// 검색 요청
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalRequest {
    pub query: String,
    /// 결과 수 (없으면 `default_top_k`)
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub filters: RetrievalFilters,
}

impl RetrievalRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_filters(mut self, filters: RetrievalFilters) -> Self {
        self.filters = filters;
        self
    }
}

/// 검색 결과 항목
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalMatch {
    pub chunk_id: ChunkId,
    pub document_id: DocumentId,
    pub text: String,
    /// 정렬에 쓰인 점수 (리랭크 점수 또는 RRF 점수)
    pub score: f64,
    pub section_hierarchy: Vec<String>,
    pub tags: Vec<String>,
}

/// 검색 응답
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResponse {
    pub query: String,
    pub matches: Vec<RetrievalMatch>,
    pub explanations: Vec<AnnotatedResult>,
    pub degradations: Vec<Degradation>,
    /// 결과에 포함된 문서 ID (정렬, 중복 제거)
    pub sources: Vec<DocumentId>,
}

impl RetrievalResponse {
    pub fn is_degraded(&self) -> bool {
        !self.degradations.is_empty()
    }
}

// ============================================================================
// Ingestion Types
// ============================================================================

/// 문서 하나의 수집 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// 새로 색인됨
    Indexed { chunks: usize, warnings: Vec<String> },
    /// 체크섬이 같아 건너뜀
    Unchanged,
    /// 해석할 수 없는 문서
    Skipped { reason: String },
}

/// 배치 수집 요약
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub indexed: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
    pub removed: usize,
    pub chunks: usize,
    pub warnings: Vec<String>,
    pub errors: Vec<(DocumentId, String)>,
}

impl IngestReport {
    fn record(&mut self, document_id: DocumentId, outcome: Result<IngestOutcome>) {
        match outcome {
            Ok(IngestOutcome::Indexed { chunks, warnings }) => {
                self.indexed += 1;
                self.chunks += chunks;
                self.warnings
                    .extend(warnings.into_iter().map(|w| format!("{}: {}", document_id, w)));
            }
            Ok(IngestOutcome::Unchanged) => self.unchanged += 1,
            Ok(IngestOutcome::Skipped { reason }) => {
                self.skipped += 1;
                self.warnings.push(format!("{}: skipped ({})", document_id, reason));
            }
            Err(e) => {
                self.failed += 1;
                self.errors.push((document_id, e.to_string()));
            }
        }
    }
}

/// 하이브리드 저장소 통계
#[derive(Debug, Clone, Serialize)]
pub struct HybridStats {
    pub documents: usize,
    pub chunks: usize,
    pub total_tokens: usize,
    pub oversized_chunks: usize,
    pub vectors: usize,
}

// ============================================================================
// HybridRetriever
// ============================================================================

/// 검색기 동작 설정
#[derive(Debug, Clone)]
struct RetrieverSettings {
    retrieval: RetrievalConfig,
    rerank_timeout: Duration,
    ingest_concurrency: usize,
    embed_batch_size: usize,
}

impl RetrieverSettings {
    fn from_config(config: &RagConfig) -> Self {
        Self {
            retrieval: config.retrieval.clone(),
            rerank_timeout: Duration::from_millis(config.rerank.timeout_ms),
            ingest_concurrency: config.ingest.concurrency.max(1),
            embed_batch_size: config.embedding.batch_size.max(1),
        }
    }

    fn search_timeout(&self) -> Duration {
        Duration::from_millis(self.retrieval.search_timeout_ms)
    }

    /// 인덱스별 후보 수
    ///
    /// 필터는 후보를 받은 뒤 적용되므로, 필터가 있으면 후보를 넓혀
    /// 상위권이 모두 걸러져도 일치하는 청크가 남게 합니다.
    fn candidate_pool(&self, limit: usize, filters: &RetrievalFilters) -> usize {
        let pool = self.rerank_pool(limit);
        if filters.is_empty() {
            pool
        } else {
            pool.max(self.retrieval.filtered_candidate_pool)
        }
    }

    /// 통합 후 리랭커에 넘기는 후보 수
    fn rerank_pool(&self, limit: usize) -> usize {
        limit * self.retrieval.candidate_multiplier.max(1)
    }
}

/// 하이브리드 검색기
///
/// 청크 저장소, 키워드 인덱스, 벡터 인덱스를 소유하고
/// 수집/삭제/검색 경로를 모두 담당합니다.
pub struct HybridRetriever {
    store: ChunkStore,
    sparse: Arc<dyn SparseIndex>,
    dense: Arc<dyn DenseIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    reranker: Option<Arc<dyn Reranker>>,
    chunker: Box<dyn Chunker>,
    fusion: RrfFusion,
    settings: RetrieverSettings,
    /// 문서별 수집 잠금 (같은 문서의 동시 재수집 방지)
    document_locks: Mutex<HashMap<DocumentId, Arc<tokio::sync::Mutex<()>>>>,
}

impl HybridRetriever {
    /// 설정으로부터 저장소와 인덱스를 열어 검색기 생성
    pub async fn open(config: &RagConfig) -> Result<Self> {
        config.validate()?;

        if !config.data_dir.exists() {
            std::fs::create_dir_all(&config.data_dir)?;
        }

        let store = ChunkStore::open(&config.db_path())?;
        let embedder = create_embedder(&config.embedding)?;

        let dense: Arc<dyn DenseIndex> = match config.dense_backend {
            DenseBackend::Memory => Arc::new(InMemoryDenseIndex::new()),
            DenseBackend::Lance => Arc::new(
                LanceVectorStore::open(
                    &config.lance_path(),
                    &config.collection_name,
                    embedder.dimension(),
                )
                .await
                .map_err(|e| RagError::IndexUnavailable {
                    backend: SearchSource::Dense,
                    reason: e.to_string(),
                })?,
            ),
        };

        let reranker = create_reranker(&config.rerank)?;
        let sparse: Arc<dyn SparseIndex> = Arc::new(store.clone());

        tracing::info!(
            "Hybrid retriever ready: db={:?}, dense={:?}, embedder={}",
            config.db_path(),
            config.dense_backend,
            embedder.name()
        );

        Ok(Self::new(
            store,
            sparse,
            dense,
            embedder,
            reranker,
            markdown_chunker(config.chunking.clone()),
            config,
        ))
    }

    /// 구성 요소를 직접 지정하여 생성
    pub fn new(
        store: ChunkStore,
        sparse: Arc<dyn SparseIndex>,
        dense: Arc<dyn DenseIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        reranker: Option<Arc<dyn Reranker>>,
        chunker: Box<dyn Chunker>,
        config: &RagConfig,
    ) -> Self {
        Self {
            store,
            sparse,
            dense,
            embedder,
            reranker,
            chunker,
            fusion: RrfFusion::new(config.retrieval.rrf_constant),
            settings: RetrieverSettings::from_config(config),
            document_locks: Mutex::new(HashMap::new()),
        }
    }

    /// 내부 청크 저장소 접근
    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    fn document_lock(&self, document_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = match self.document_locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks.entry(document_id.to_string()).or_default().clone()
    }

    /// 다른 대기자가 없으면 잠금 항목 제거
    fn release_document_lock(&self, document_id: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = match self.document_locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        // 맵 + 호출자 = 2
        if Arc::strong_count(&lock) == 2 {
            locks.remove(document_id);
        }
    }

    // ========================================================================
    // Ingestion
    // ========================================================================

    /// 문서 하나 수집
    ///
    /// 체크섬이 같으면 `force`가 아닌 한 건너뜁니다.
    /// 체크섬은 두 인덱스 갱신이 모두 끝난 뒤 마지막에 기록되므로,
    /// 중간에 실패한 문서는 다음 수집에서 재시도됩니다.
    pub async fn ingest_document(&self, document: Document, force: bool) -> Result<IngestOutcome> {
        let document_id = document.id.clone();
        let lock = self.document_lock(&document_id);
        let outcome = {
            let _guard = lock.lock().await;
            self.ingest_locked(document, force).await
        };
        self.release_document_lock(&document_id, lock);
        outcome
    }

    async fn ingest_locked(&self, document: Document, force: bool) -> Result<IngestOutcome> {
        let checksum = document.checksum();
        let stored = self.store.document_checksum(&document.id)?;
        if !force && stored.as_deref() == Some(checksum.as_str()) {
            tracing::debug!("Unchanged document: {}", document.id);
            return Ok(IngestOutcome::Unchanged);
        }

        let built = match self.chunker.build(&document) {
            Ok(built) => built,
            Err(e) if e.is_document_local() => {
                tracing::warn!("Skipping document {}: {}", document.id, e);
                return Ok(IngestOutcome::Skipped { reason: e.to_string() });
            }
            Err(e) => return Err(e),
        };

        for warning in &built.warnings {
            tracing::warn!("{}: {}", document.id, warning);
        }

        let entries = self.embed_chunks(&built.chunks).await?;

        let dense_err = |e: anyhow::Error| RagError::IndexUnavailable {
            backend: SearchSource::Dense,
            reason: e.to_string(),
        };
        self.dense.remove_document(&document.id).await.map_err(dense_err)?;
        if !entries.is_empty() {
            self.dense.upsert(&entries).await.map_err(dense_err)?;
        }

        let sparse_err = |e: anyhow::Error| RagError::IndexUnavailable {
            backend: SearchSource::Sparse,
            reason: e.to_string(),
        };
        self.sparse.remove(&document.id).await.map_err(sparse_err)?;
        self.sparse.add(&built.chunks).await.map_err(sparse_err)?;

        // 청크 + 체크섬은 마지막에 한 트랜잭션으로 기록
        let record = DocumentRecord::new(&document, built.chunks.len());
        self.store.replace_document(&record, &built.chunks)?;

        tracing::info!(
            "Indexed document: {} (chunks={}, oversized={})",
            document.id,
            built.chunks.len(),
            built.chunks.iter().filter(|c| c.is_oversized()).count()
        );

        Ok(IngestOutcome::Indexed {
            chunks: built.chunks.len(),
            warnings: built.warnings,
        })
    }

    /// 청크 임베딩 (배치 단위)
    async fn embed_chunks(&self, chunks: &[Chunk]) -> Result<Vec<VectorEntry>> {
        let mut entries = Vec::with_capacity(chunks.len());

        for batch in chunks.chunks(self.settings.embed_batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let embeddings = self
                .embedder
                .embed_batch(&texts)
                .await
                .map_err(|e| RagError::IndexUnavailable {
                    backend: SearchSource::Dense,
                    reason: format!("embedding failed: {}", e),
                })?;

            if embeddings.len() != batch.len() {
                return Err(RagError::IndexUnavailable {
                    backend: SearchSource::Dense,
                    reason: format!(
                        "expected {} embeddings, got {}",
                        batch.len(),
                        embeddings.len()
                    ),
                });
            }

            for (chunk, embedding) in batch.iter().zip(embeddings) {
                tracing::debug!("Embedded chunk {} ({} tokens)", chunk.id, chunk.token_count);
                entries.push(VectorEntry {
                    chunk_id: chunk.id.clone(),
                    document_id: chunk.document_id.clone(),
                    embedding,
                });
            }
        }

        Ok(entries)
    }

    /// 여러 문서 병렬 수집
    ///
    /// 문서 단위 실패는 집계만 하고 배치를 중단하지 않습니다.
    pub async fn ingest_batch(&self, documents: Vec<Document>, force: bool) -> IngestReport {
        let outcomes: Vec<(DocumentId, Result<IngestOutcome>)> = stream::iter(documents)
            .map(|document| async move {
                let id = document.id.clone();
                (id, self.ingest_document(document, force).await)
            })
            .buffer_unordered(self.settings.ingest_concurrency)
            .collect()
            .await;

        let mut report = IngestReport::default();
        for (id, outcome) in outcomes {
            if let Err(e) = &outcome {
                tracing::warn!("Failed to ingest {}: {}", id, e);
            }
            report.record(id, outcome);
        }
        report
    }

    /// 볼트 전체 동기화
    ///
    /// 수집된 문서를 모두 수집하고, 볼트에서 사라진 문서는 인덱스에서 삭제합니다.
    /// `force`면 키워드 인덱스를 재구성한 뒤 모든 문서를 다시 색인합니다.
    pub async fn sync_vault(&self, documents: Vec<Document>, force: bool) -> Result<IngestReport> {
        if force {
            let rebuilt = self.store.rebuild_fts_index()?;
            tracing::info!("Rebuilt keyword index ({} chunks)", rebuilt);
        }

        let present: HashSet<DocumentId> = documents.iter().map(|d| d.id.clone()).collect();
        let stale: Vec<DocumentId> = self
            .store
            .list_documents()?
            .into_iter()
            .map(|r| r.id)
            .filter(|id| !present.contains(id))
            .collect();

        let mut report = self.ingest_batch(documents, force).await;

        for id in stale {
            match self.remove_document(&id).await {
                Ok(true) => report.removed += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!("Failed to remove {}: {}", id, e);
                    report.failed += 1;
                    report.errors.push((id, e.to_string()));
                }
            }
        }

        tracing::info!(
            "Vault sync: indexed={}, unchanged={}, skipped={}, failed={}, removed={}",
            report.indexed,
            report.unchanged,
            report.skipped,
            report.failed,
            report.removed
        );

        Ok(report)
    }

    /// 문서 삭제 (두 인덱스 모두)
    pub async fn remove_document(&self, document_id: &str) -> Result<bool> {
        let lock = self.document_lock(document_id);
        let removed = {
            let _guard = lock.lock().await;
            self.remove_locked(document_id).await
        };
        self.release_document_lock(document_id, lock);
        removed
    }

    async fn remove_locked(&self, document_id: &str) -> Result<bool> {
        self.dense
            .remove_document(document_id)
            .await
            .map_err(|e| RagError::IndexUnavailable {
                backend: SearchSource::Dense,
                reason: e.to_string(),
            })?;
        self.sparse
            .remove(document_id)
            .await
            .map_err(|e| RagError::IndexUnavailable {
                backend: SearchSource::Sparse,
                reason: e.to_string(),
            })?;

        let removed = self.store.remove_document(document_id)?;
        if removed {
            tracing::info!("Removed document: {}", document_id);
        }
        Ok(removed)
    }

    /// 저장소 통계
    pub async fn stats(&self) -> Result<HybridStats> {
        let store_stats = self.store.stats()?;
        let vectors = self.dense.count().await.map_err(|e| RagError::IndexUnavailable {
            backend: SearchSource::Dense,
            reason: e.to_string(),
        })?;

        Ok(HybridStats {
            documents: store_stats.document_count,
            chunks: store_stats.chunk_count,
            total_tokens: store_stats.total_tokens,
            oversized_chunks: store_stats.oversized_chunks,
            vectors,
        })
    }

    // ========================================================================
    // Retrieval
    // ========================================================================

    /// 하이브리드 검색
    ///
    /// 1. 키워드 / 벡터 검색 동시 실행 (각각 타임아웃)
    /// 2. 후보 필터링
    /// 3. RRF 통합
    /// 4. 리랭크 (선택, 실패 시 통합 순서 유지)
    /// 5. 설명 부착
    pub async fn retrieve(&self, request: RetrievalRequest) -> Result<RetrievalResponse> {
        let limit = self.validate_request(&request)?;
        let query = request.query.trim().to_string();
        let candidates = self.settings.candidate_pool(limit, &request.filters);
        let search_timeout = self.settings.search_timeout();
        let timeout_ms = self.settings.retrieval.search_timeout_ms;

        let terms = query_terms(&query);

        let sparse_search = async {
            match timeout(search_timeout, self.sparse.search(&terms, candidates)).await {
                Ok(Ok(results)) => Ok(results),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!("timed out after {}ms", timeout_ms)),
            }
        };

        let dense_search = async {
            let search = async {
                let embedding = self.embedder.embed(&query).await?;
                self.dense.query(&embedding, candidates).await
            };
            match timeout(search_timeout, search).await {
                Ok(Ok(results)) => Ok(results),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!("timed out after {}ms", timeout_ms)),
            }
        };

        let (sparse_result, dense_result) = tokio::join!(sparse_search, dense_search);

        let mut degradations = Vec::new();
        let (sparse_hits, dense_hits) = match (sparse_result, dense_result) {
            (Err(sparse), Err(dense)) => {
                tracing::error!("Both search backends failed for query {:?}", query);
                return Err(RagError::AllIndexesUnavailable { sparse, dense });
            }
            (sparse, dense) => (
                degrade(SearchSource::Sparse, sparse, &mut degradations),
                degrade(SearchSource::Dense, dense, &mut degradations),
            ),
        };

        tracing::debug!(
            "Candidates for {:?}: sparse={}, dense={}",
            query,
            sparse_hits.len(),
            dense_hits.len()
        );

        // 후보 청크 로드 (저장소에 없는 stale 항목과 필터 불일치 제외)
        let ids: Vec<ChunkId> = sparse_hits
            .iter()
            .chain(dense_hits.iter())
            .map(|s| s.chunk_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let mut chunks = self.store.get_chunks(&ids)?;
        chunks.retain(|_, chunk| request.filters.matches(chunk));

        let sparse_hits = retain_known(sparse_hits, &chunks);
        let dense_hits = retain_known(dense_hits, &chunks);

        let pool = self.settings.rerank_pool(limit);
        let fused = self.fusion.fuse(&sparse_hits, &dense_hits, pool);
        let ranked = self.rerank(&query, fused, &chunks, limit, &mut degradations).await;

        let explanations = explain(&query, &ranked, &chunks, &degradations);
        let matches: Vec<RetrievalMatch> = ranked
            .iter()
            .filter_map(|r| {
                chunks.get(&r.chunk_id).map(|chunk| RetrievalMatch {
                    chunk_id: chunk.id.clone(),
                    document_id: chunk.document_id.clone(),
                    text: chunk.text.clone(),
                    score: r.final_score(),
                    section_hierarchy: chunk.section_hierarchy.clone(),
                    tags: chunk.tags.iter().cloned().collect(),
                })
            })
            .collect();

        let sources: Vec<DocumentId> = matches
            .iter()
            .map(|m| m.document_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        tracing::info!(
            "Retrieved {} matches for {:?} (degraded={})",
            matches.len(),
            query,
            !degradations.is_empty()
        );

        Ok(RetrievalResponse {
            query,
            matches,
            explanations,
            degradations,
            sources,
        })
    }

    /// 요청 검증, 유효한 limit 반환
    fn validate_request(&self, request: &RetrievalRequest) -> Result<usize> {
        if request.query.trim().is_empty() {
            return Err(RagError::InvalidRequest("query must not be empty".to_string()));
        }

        let max = self.settings.retrieval.max_top_k;
        let limit = request.limit.unwrap_or(self.settings.retrieval.default_top_k);
        if limit == 0 || limit > max {
            return Err(RagError::InvalidRequest(format!(
                "limit must be between 1 and {}, got {}",
                max, limit
            )));
        }

        if let Some(DateRange {
            start: Some(start),
            end: Some(end),
        }) = &request.filters.date_range
        {
            if start > end {
                return Err(RagError::InvalidRequest(format!(
                    "date range start {} is after end {}",
                    start, end
                )));
            }
        }

        Ok(limit)
    }

    /// 리랭크 (타임아웃/실패 시 통합 순서 그대로)
    async fn rerank(
        &self,
        query: &str,
        mut fused: Vec<RankedResult>,
        chunks: &HashMap<ChunkId, Chunk>,
        limit: usize,
        degradations: &mut Vec<Degradation>,
    ) -> Vec<RankedResult> {
        let Some(reranker) = &self.reranker else {
            fused.truncate(limit);
            return fused;
        };
        if fused.is_empty() {
            return fused;
        }

        let candidates: Vec<Chunk> = fused
            .iter()
            .filter_map(|r| chunks.get(&r.chunk_id).cloned())
            .collect();

        let rerank = reranker.rerank(query, &candidates, limit);
        let reason = match timeout(self.settings.rerank_timeout, rerank).await {
            Ok(Ok(scores)) => return apply_rerank(fused, &scores, limit),
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("timed out after {}ms", self.settings.rerank_timeout.as_millis()),
        };

        tracing::warn!("{}", RagError::RerankUnavailable(reason.clone()));
        degradations.push(Degradation::new(SearchSource::Rerank, reason));
        fused.truncate(limit);
        fused
    }
}

/// 검색 결과를 꺼내고, 실패했으면 degradation 기록
fn degrade(
    source: SearchSource,
    result: std::result::Result<Vec<ScoredChunk>, String>,
    degradations: &mut Vec<Degradation>,
) -> Vec<ScoredChunk> {
    match result {
        Ok(hits) => hits,
        Err(reason) => {
            tracing::warn!(
                "{}",
                RagError::IndexUnavailable {
                    backend: source,
                    reason: reason.clone()
                }
            );
            degradations.push(Degradation::new(source, reason));
            Vec::new()
        }
    }
}

fn retain_known(hits: Vec<ScoredChunk>, chunks: &HashMap<ChunkId, Chunk>) -> Vec<ScoredChunk> {
    hits.into_iter().filter(|h| chunks.contains_key(&h.chunk_id)).collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedding;
    use crate::knowledge::chunker::MarkdownChunker;
    use crate::knowledge::explain::OrderedBy;
    use crate::knowledge::rerank::LexicalReranker;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    // ------------------------------------------------------------------------
    // Fakes
    // ------------------------------------------------------------------------

    /// 고정 목록을 돌려주는 키워드 인덱스
    struct FixedSparse(Vec<ScoredChunk>);

    #[async_trait]
    impl SparseIndex for FixedSparse {
        async fn add(&self, _chunks: &[Chunk]) -> anyhow::Result<()> {
            Ok(())
        }
        async fn remove(&self, _document_id: &str) -> anyhow::Result<usize> {
            Ok(0)
        }
        async fn search(
            &self,
            _terms: &[String],
            limit: usize,
        ) -> anyhow::Result<Vec<ScoredChunk>> {
            Ok(self.0.iter().take(limit).cloned().collect())
        }
    }

    struct FailingSparse;

    #[async_trait]
    impl SparseIndex for FailingSparse {
        async fn add(&self, _chunks: &[Chunk]) -> anyhow::Result<()> {
            Ok(())
        }
        async fn remove(&self, _document_id: &str) -> anyhow::Result<usize> {
            Ok(0)
        }
        async fn search(
            &self,
            _terms: &[String],
            _limit: usize,
        ) -> anyhow::Result<Vec<ScoredChunk>> {
            anyhow::bail!("fts offline")
        }
    }

    /// 첫 번째 add만 실패하는 실제 키워드 인덱스
    struct FlakySparse {
        inner: ChunkStore,
        failed_once: AtomicBool,
    }

    #[async_trait]
    impl SparseIndex for FlakySparse {
        async fn add(&self, chunks: &[Chunk]) -> anyhow::Result<()> {
            if !self.failed_once.swap(true, Ordering::SeqCst) {
                anyhow::bail!("fts write failed");
            }
            self.inner.add(chunks).await
        }
        async fn remove(&self, document_id: &str) -> anyhow::Result<usize> {
            self.inner.remove(document_id).await
        }
        async fn search(&self, terms: &[String], limit: usize) -> anyhow::Result<Vec<ScoredChunk>> {
            self.inner.search(terms, limit).await
        }
    }

    /// 고정 목록 / 지연 / 실패를 흉내내는 벡터 인덱스
    struct FakeDense {
        results: Vec<ScoredChunk>,
        delay: Option<Duration>,
        fail: bool,
    }

    impl FakeDense {
        fn fixed(results: Vec<ScoredChunk>) -> Self {
            Self { results, delay: None, fail: false }
        }
    }

    #[async_trait]
    impl DenseIndex for FakeDense {
        async fn upsert(&self, entries: &[VectorEntry]) -> anyhow::Result<usize> {
            Ok(entries.len())
        }
        async fn query(
            &self,
            _embedding: &[f32],
            limit: usize,
        ) -> anyhow::Result<Vec<ScoredChunk>> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                anyhow::bail!("vector store offline");
            }
            Ok(self.results.iter().take(limit).cloned().collect())
        }
        async fn remove_document(&self, _document_id: &str) -> anyhow::Result<usize> {
            Ok(0)
        }
        async fn count(&self) -> anyhow::Result<usize> {
            Ok(self.results.len())
        }
    }

    struct FailingReranker;

    #[async_trait]
    impl Reranker for FailingReranker {
        async fn rerank(
            &self,
            _query: &str,
            _candidates: &[Chunk],
            _limit: usize,
        ) -> anyhow::Result<Vec<(ChunkId, f64)>> {
            anyhow::bail!("reranker returned 503")
        }
        fn name(&self) -> &str {
            "failing"
        }
    }

    /// 후보 순서를 뒤집는 리랭커
    struct ReversingReranker;

    #[async_trait]
    impl Reranker for ReversingReranker {
        async fn rerank(
            &self,
            _query: &str,
            candidates: &[Chunk],
            limit: usize,
        ) -> anyhow::Result<Vec<(ChunkId, f64)>> {
            Ok(candidates
                .iter()
                .rev()
                .take(limit)
                .enumerate()
                .map(|(i, c)| (c.id.clone(), 1.0 - i as f64 * 0.1))
                .collect())
        }
        fn name(&self) -> &str {
            "reversing"
        }
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn test_config() -> RagConfig {
        let mut config = RagConfig::default();
        config.retrieval.search_timeout_ms = 100;
        config.rerank.timeout_ms = 100;
        config.embedding.dimension = 32;
        config
    }

    fn note(id: &str, content: &str) -> Document {
        Document::new(
            id,
            format!("/vault/{}", id),
            content,
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        )
    }

    /// A-D 네 문서를 저장소에 넣고 라벨별 chunk id 반환
    fn seeded_store(dir: &TempDir) -> (ChunkStore, HashMap<&'static str, ChunkId>) {
        let store = ChunkStore::open(&dir.path().join("chunks.db")).unwrap();
        let chunker = MarkdownChunker::with_defaults();
        let docs = [
            (
                "A",
                "notes/a.md",
                "---\ntags: [rag]\ndate: 2024-01-10\n---\n# Alpha\n\n\
                 Benefits of retrieval augmented generation.",
            ),
            (
                "B",
                "notes/b.md",
                "---\ntags: [rag, llm]\ndate: 2024-03-05\n---\n# Beta\n\n\
                 RAG grounds answers in documents.",
            ),
            ("C", "archive/c.md", "---\ntags: [rag]\n---\n# Gamma\n\nOld notes about search."),
            ("D", "notes/d.md", "# Delta\n\nDense vectors capture meaning."),
        ];

        let mut ids = HashMap::new();
        for (label, path, content) in docs {
            let doc = note(path, content);
            let built = chunker.build(&doc).unwrap();
            assert_eq!(built.chunks.len(), 1);
            store
                .replace_document(&DocumentRecord::new(&doc, 1), &built.chunks)
                .unwrap();
            ids.insert(label, built.chunks[0].id.clone());
        }
        (store, ids)
    }

    fn scored(ids: &HashMap<&str, ChunkId>, labels: &[&str]) -> Vec<ScoredChunk> {
        labels
            .iter()
            .enumerate()
            .map(|(i, l)| ScoredChunk::new(ids[l].clone(), 10.0 - i as f64))
            .collect()
    }

    fn retriever(
        store: ChunkStore,
        sparse: Arc<dyn SparseIndex>,
        dense: Arc<dyn DenseIndex>,
        reranker: Option<Arc<dyn Reranker>>,
    ) -> HybridRetriever {
        let config = test_config();
        HybridRetriever::new(
            store,
            sparse,
            dense,
            Arc::new(HashingEmbedding::new(32).unwrap()),
            reranker,
            Box::new(MarkdownChunker::with_defaults()),
            &config,
        )
    }

    fn labels_of(response: &RetrievalResponse, ids: &HashMap<&str, ChunkId>) -> Vec<String> {
        response
            .matches
            .iter()
            .map(|m| {
                ids.iter()
                    .find(|(_, id)| **id == m.chunk_id)
                    .map(|(l, _)| l.to_string())
                    .unwrap()
            })
            .collect()
    }

    // ------------------------------------------------------------------------
    // Retrieval
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_retrieve_rrf_end_to_end() {
        let dir = TempDir::new().unwrap();
        let (store, ids) = seeded_store(&dir);
        let r = retriever(
            store,
            Arc::new(FixedSparse(scored(&ids, &["A", "B", "C"]))),
            Arc::new(FakeDense::fixed(scored(&ids, &["B", "D", "A"]))),
            None,
        );

        let response = r
            .retrieve(RetrievalRequest::new("benefits of RAG").with_limit(10))
            .await
            .unwrap();

        assert_eq!(labels_of(&response, &ids), vec!["B", "A", "D", "C"]);
        assert!((response.matches[0].score - (1.0 / 61.0 + 1.0 / 62.0)).abs() < 1e-12);
        assert!((response.matches[1].score - (1.0 / 61.0 + 1.0 / 63.0)).abs() < 1e-12);
        assert!(!response.is_degraded());
        assert_eq!(
            response.sources,
            vec!["archive/c.md", "notes/a.md", "notes/b.md", "notes/d.md"]
        );

        // 리랭커 없음: 통합 순서 그대로
        assert_eq!(response.explanations.len(), 4);
        assert!(response.explanations.iter().all(|e| e.ordered_by == OrderedBy::Fusion));
        assert_eq!(response.explanations[0].source_ranks.get(&SearchSource::Dense), Some(&1));
    }

    #[tokio::test]
    async fn test_retrieve_dense_timeout_degrades_to_sparse() {
        let dir = TempDir::new().unwrap();
        let (store, ids) = seeded_store(&dir);
        let slow = FakeDense {
            results: scored(&ids, &["D"]),
            delay: Some(Duration::from_millis(500)),
            fail: false,
        };
        let sparse = FixedSparse(scored(&ids, &["A", "B", "C"]));
        let r = retriever(store, Arc::new(sparse), Arc::new(slow), None);

        let response = r.retrieve(RetrievalRequest::new("benefits of RAG")).await.unwrap();

        assert_eq!(labels_of(&response, &ids), vec!["A", "B", "C"]);
        assert!(response.is_degraded());
        assert_eq!(response.degradations[0].source, SearchSource::Dense);
        assert!(response.degradations[0].reason.contains("timed out"));
        assert!(response
            .explanations
            .iter()
            .all(|e| e.degraded_sources == vec![SearchSource::Dense]));
    }

    #[tokio::test]
    async fn test_retrieve_sparse_failure_degrades_to_dense() {
        let dir = TempDir::new().unwrap();
        let (store, ids) = seeded_store(&dir);
        let r = retriever(
            store,
            Arc::new(FailingSparse),
            Arc::new(FakeDense::fixed(scored(&ids, &["D", "B"]))),
            None,
        );

        let response = r.retrieve(RetrievalRequest::new("meaning")).await.unwrap();
        assert_eq!(labels_of(&response, &ids), vec!["D", "B"]);
        assert_eq!(response.degradations[0].source, SearchSource::Sparse);
    }

    #[tokio::test]
    async fn test_retrieve_both_unavailable_is_error() {
        let dir = TempDir::new().unwrap();
        let (store, _) = seeded_store(&dir);
        let dense = FakeDense {
            results: vec![],
            delay: None,
            fail: true,
        };
        let r = retriever(store, Arc::new(FailingSparse), Arc::new(dense), None);

        let err = r.retrieve(RetrievalRequest::new("anything")).await.unwrap_err();
        match err {
            RagError::AllIndexesUnavailable { sparse, dense } => {
                assert!(sparse.contains("fts offline"));
                assert!(dense.contains("vector store offline"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_retrieve_rerank_failure_passes_through() {
        let dir = TempDir::new().unwrap();
        let (store, ids) = seeded_store(&dir);
        let r = retriever(
            store,
            Arc::new(FixedSparse(scored(&ids, &["A", "B", "C"]))),
            Arc::new(FakeDense::fixed(scored(&ids, &["B", "D", "A"]))),
            Some(Arc::new(FailingReranker)),
        );

        let response = r
            .retrieve(RetrievalRequest::new("benefits of RAG").with_limit(3))
            .await
            .unwrap();

        assert_eq!(labels_of(&response, &ids), vec!["B", "A", "D"]);
        assert_eq!(response.degradations.len(), 1);
        assert_eq!(response.degradations[0].source, SearchSource::Rerank);
        assert!(response.explanations.iter().all(|e| e.rerank_score.is_none()));
    }

    #[tokio::test]
    async fn test_retrieve_rerank_reorders() {
        let dir = TempDir::new().unwrap();
        let (store, ids) = seeded_store(&dir);
        let r = retriever(
            store,
            Arc::new(FixedSparse(scored(&ids, &["A", "B", "C"]))),
            Arc::new(FakeDense::fixed(scored(&ids, &["B", "D", "A"]))),
            Some(Arc::new(ReversingReranker)),
        );

        let response = r
            .retrieve(RetrievalRequest::new("benefits of RAG").with_limit(2))
            .await
            .unwrap();

        // 통합 순서 B, A, D, C 를 뒤집어 상위 2개
        assert_eq!(labels_of(&response, &ids), vec!["C", "D"]);
        assert_eq!(response.matches[0].score, 1.0);
        assert_eq!(response.explanations[0].ordered_by, OrderedBy::Rerank);
        assert!(!response.is_degraded());
    }

    #[tokio::test]
    async fn test_retrieve_filters() {
        let dir = TempDir::new().unwrap();
        let (store, ids) = seeded_store(&dir);
        let r = retriever(
            store,
            Arc::new(FixedSparse(scored(&ids, &["A", "B", "C"]))),
            Arc::new(FakeDense::fixed(scored(&ids, &["B", "D", "A"]))),
            None,
        );

        let by_tag = RetrievalFilters {
            tags: vec!["#RAG".to_string(), "llm".to_string()],
            ..Default::default()
        };
        let response = r
            .retrieve(RetrievalRequest::new("rag").with_filters(by_tag))
            .await
            .unwrap();
        assert_eq!(labels_of(&response, &ids), vec!["B"]);

        let by_folder = RetrievalFilters {
            folder: Some("notes/".to_string()),
            ..Default::default()
        };
        let response = r
            .retrieve(RetrievalRequest::new("rag").with_filters(by_folder))
            .await
            .unwrap();
        assert_eq!(labels_of(&response, &ids), vec!["B", "A", "D"]);

        // frontmatter date 2024-01-10 (A), 2024-03-05 (B); C, D는 수정 시각 2024-05-01
        let by_date = RetrievalFilters {
            date_range: Some(DateRange {
                start: NaiveDate::from_ymd_opt(2024, 2, 1),
                end: NaiveDate::from_ymd_opt(2024, 4, 30),
            }),
            ..Default::default()
        };
        let response = r
            .retrieve(RetrievalRequest::new("rag").with_filters(by_date))
            .await
            .unwrap();
        assert_eq!(labels_of(&response, &ids), vec!["B"]);
    }

    #[tokio::test]
    async fn test_retrieve_filter_reaches_past_top_candidates() {
        let dir = TempDir::new().unwrap();
        let (store, ids) = seeded_store(&dir);

        // limit 1 × multiplier 4 보다 많은 상위 후보가 필터에 걸리는 경우
        let mut hits: Vec<ScoredChunk> = (0..6)
            .map(|i| ScoredChunk::new(ids["A"].clone() + &i.to_string(), 100.0 - i as f64))
            .collect();
        hits.extend(scored(&ids, &["A", "C", "D", "B"]));
        let r = retriever(
            store,
            Arc::new(FixedSparse(hits)),
            Arc::new(FakeDense::fixed(vec![])),
            None,
        );

        let filters = RetrievalFilters {
            tags: vec!["llm".to_string()],
            ..Default::default()
        };
        let response = r
            .retrieve(RetrievalRequest::new("rag").with_limit(1).with_filters(filters))
            .await
            .unwrap();
        assert_eq!(labels_of(&response, &ids), vec!["B"]);

        // 필터가 없으면 후보 수는 limit × multiplier
        let response = r
            .retrieve(RetrievalRequest::new("rag").with_limit(1))
            .await
            .unwrap();
        assert!(response.matches.is_empty());
    }

    #[tokio::test]
    async fn test_retrieve_invalid_requests() {
        let dir = TempDir::new().unwrap();
        let (store, _) = seeded_store(&dir);
        let r = retriever(
            store,
            Arc::new(FixedSparse(vec![])),
            Arc::new(FakeDense::fixed(vec![])),
            None,
        );

        for request in [
            RetrievalRequest::new("   "),
            RetrievalRequest::new("rag").with_limit(0),
            RetrievalRequest::new("rag").with_limit(21),
            RetrievalRequest::new("rag").with_filters(RetrievalFilters {
                date_range: Some(DateRange {
                    start: NaiveDate::from_ymd_opt(2024, 5, 1),
                    end: NaiveDate::from_ymd_opt(2024, 1, 1),
                }),
                ..Default::default()
            }),
        ] {
            let err = r.retrieve(request).await.unwrap_err();
            assert!(matches!(err, RagError::InvalidRequest(_)), "{err}");
        }
    }

    // ------------------------------------------------------------------------
    // Ingestion (실제 저장소 + 메모리 벡터 인덱스)
    // ------------------------------------------------------------------------

    fn local_retriever(dir: &TempDir, reranker: Option<Arc<dyn Reranker>>) -> HybridRetriever {
        let store = ChunkStore::open(&dir.path().join("chunks.db")).unwrap();
        let sparse: Arc<dyn SparseIndex> = Arc::new(store.clone());
        retriever(store, sparse, Arc::new(InMemoryDenseIndex::new()), reranker)
    }

    #[tokio::test]
    async fn test_ingest_and_retrieve() {
        let dir = TempDir::new().unwrap();
        let r = local_retriever(&dir, Some(Arc::new(LexicalReranker::new())));

        let doc = note(
            "guides/rag.md",
            "# RAG Guide\n\n## Fusion\n\n\
             Reciprocal rank fusion merges keyword and vector results.\n\n\
             ## Chunking\n\nMarkdown notes are split along headings.",
        );
        let outcome = r.ingest_document(doc, false).await.unwrap();
        assert!(matches!(outcome, IngestOutcome::Indexed { chunks: 2, .. }));

        let response = r
            .retrieve(RetrievalRequest::new("rank fusion").with_limit(2))
            .await
            .unwrap();
        assert!(!response.matches.is_empty());
        assert_eq!(response.matches[0].section_hierarchy, vec!["RAG Guide", "Fusion"]);
        assert_eq!(response.sources, vec!["guides/rag.md"]);

        let stats = r.stats().await.unwrap();
        assert_eq!(stats.documents, 1);
        assert_eq!(stats.chunks, 2);
        assert_eq!(stats.vectors, 2);
    }

    #[tokio::test]
    async fn test_ingest_unchanged_and_force() {
        let dir = TempDir::new().unwrap();
        let r = local_retriever(&dir, None);
        let doc = note("a.md", "# Title\n\nSome text.");

        assert!(matches!(
            r.ingest_document(doc.clone(), false).await.unwrap(),
            IngestOutcome::Indexed { .. }
        ));
        assert_eq!(
            r.ingest_document(doc.clone(), false).await.unwrap(),
            IngestOutcome::Unchanged
        );
        assert!(matches!(
            r.ingest_document(doc, true).await.unwrap(),
            IngestOutcome::Indexed { .. }
        ));
    }

    #[tokio::test]
    async fn test_reingest_replaces_stale_chunks() {
        let dir = TempDir::new().unwrap();
        let r = local_retriever(&dir, None);

        r.ingest_document(note("a.md", "# One\n\nFirst.\n\n# Two\n\nSecond."), false)
            .await
            .unwrap();
        r.ingest_document(note("a.md", "# One\n\nRewritten."), false)
            .await
            .unwrap();

        let stats = r.stats().await.unwrap();
        assert_eq!(stats.chunks, 1);
        assert_eq!(stats.vectors, 1);

        let response = r.retrieve(RetrievalRequest::new("second")).await.unwrap();
        assert!(response.matches.iter().all(|m| !m.text.contains("Second")));
    }

    #[tokio::test]
    async fn test_ingest_batch_isolates_bad_documents() {
        let dir = TempDir::new().unwrap();
        let r = local_retriever(&dir, None);

        let docs = vec![
            note("good.md", "# Good\n\nFine content."),
            note("binary.md", "\u{0}\u{1}\u{2}binary"),
            note("other.md", "# Other\n\nMore content."),
        ];
        let report = r.ingest_batch(docs, false).await;

        assert_eq!(report.indexed, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(report.chunks, 2);
    }

    #[tokio::test]
    async fn test_sync_vault_removes_missing_documents() {
        let dir = TempDir::new().unwrap();
        let r = local_retriever(&dir, None);

        r.sync_vault(
            vec![note("keep.md", "# Keep\n\nStays."), note("gone.md", "# Gone\n\nLeaves.")],
            false,
        )
        .await
        .unwrap();

        let report = r
            .sync_vault(vec![note("keep.md", "# Keep\n\nStays.")], false)
            .await
            .unwrap();
        assert_eq!(report.unchanged, 1);
        assert_eq!(report.removed, 1);

        let stats = r.stats().await.unwrap();
        assert_eq!(stats.documents, 1);
        assert_eq!(stats.vectors, 1);
    }

    #[tokio::test]
    async fn test_remove_document() {
        let dir = TempDir::new().unwrap();
        let r = local_retriever(&dir, None);
        r.ingest_document(note("a.md", "# A\n\nText."), false).await.unwrap();

        assert!(r.remove_document("a.md").await.unwrap());
        assert!(!r.remove_document("a.md").await.unwrap());
        assert_eq!(r.stats().await.unwrap().vectors, 0);
    }

    #[tokio::test]
    async fn test_failed_keyword_write_is_retried() {
        let dir = TempDir::new().unwrap();
        let store = ChunkStore::open(&dir.path().join("chunks.db")).unwrap();
        let sparse: Arc<dyn SparseIndex> = Arc::new(FlakySparse {
            inner: store.clone(),
            failed_once: AtomicBool::new(false),
        });
        let r = retriever(store, sparse, Arc::new(InMemoryDenseIndex::new()), None);
        let doc = note("z.md", "# Zoo\n\nA zebra grazes.");

        let err = r.ingest_document(doc.clone(), false).await.unwrap_err();
        assert!(matches!(
            err,
            RagError::IndexUnavailable {
                backend: SearchSource::Sparse,
                ..
            }
        ));
        assert!(r.store().document_checksum("z.md").unwrap().is_none());

        // 체크섬이 없으므로 같은 내용이라도 다시 색인
        let outcome = r.ingest_document(doc, false).await.unwrap();
        assert!(matches!(outcome, IngestOutcome::Indexed { chunks: 1, .. }));

        let hits = r.store().search_terms(&["zebra".to_string()], 10).unwrap();
        assert_eq!(hits.len(), 1);
        let response = r.retrieve(RetrievalRequest::new("zebra")).await.unwrap();
        assert_eq!(response.sources, vec!["z.md"]);
    }

    #[tokio::test]
    async fn test_document_locks_are_released() {
        let dir = TempDir::new().unwrap();
        let r = local_retriever(&dir, None);

        let docs = (0..8)
            .map(|i| note(&format!("n{}.md", i), "# N\n\nText."))
            .collect();
        r.ingest_batch(docs, false).await;
        r.remove_document("n0.md").await.unwrap();
        r.remove_document("missing.md").await.unwrap();

        assert!(r.document_locks.lock().unwrap().is_empty());
    }

    #[test]
    fn test_filters_folder_prefix_boundary() {
        let filters = RetrievalFilters {
            folder: Some("notes".to_string()),
            ..Default::default()
        };
        let doc = note("notebook/x.md", "# X\n\nText.");
        let chunk = MarkdownChunker::with_defaults().build(&doc).unwrap().chunks.remove(0);
        assert!(!filters.matches(&chunk));
        assert!(RetrievalFilters::default().matches(&chunk));
    }
}
