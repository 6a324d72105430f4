//! Dense Index - 벡터 검색 트레이트 및 유틸리티
//!
//! 벡터 저장소 내부 구현은 이 트레이트 뒤에 숨깁니다.
//! - `InMemoryDenseIndex`: 전수 코사인 검색 (테스트 / 소규모 볼트)
//! - `LanceVectorStore`: LanceDB ANN 검색

use std::cmp::Ordering;
use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

use super::document::{ChunkId, DocumentId, ScoredChunk};

// ============================================================================
// Types
// ============================================================================

/// 벡터 엔트리 (저장용)
#[derive(Debug, Clone, PartialEq)]
pub struct VectorEntry {
    pub chunk_id: ChunkId,
    pub document_id: DocumentId,
    /// 임베딩 벡터
    pub embedding: Vec<f32>,
}

// ============================================================================
// DenseIndex Trait
// ============================================================================

/// DenseIndex 트레이트 (async)
///
/// 벡터 저장소의 공통 인터페이스입니다.
#[async_trait]
pub trait DenseIndex: Send + Sync {
    /// 벡터 삽입 (같은 chunk id는 교체)
    async fn upsert(&self, entries: &[VectorEntry]) -> Result<usize>;

    /// 유사도 검색 (점수 내림차순, 동점이면 chunk id 오름차순)
    async fn query(&self, embedding: &[f32], limit: usize) -> Result<Vec<ScoredChunk>>;

    /// 문서의 모든 벡터 삭제
    async fn remove_document(&self, document_id: &str) -> Result<usize>;

    /// 벡터 개수 조회
    async fn count(&self) -> Result<usize>;
}

// ============================================================================
// InMemoryDenseIndex
// ============================================================================

/// 메모리 기반 전수 검색 인덱스
#[derive(Debug, Default)]
pub struct InMemoryDenseIndex {
    entries: RwLock<HashMap<ChunkId, VectorEntry>>,
}

impl InMemoryDenseIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DenseIndex for InMemoryDenseIndex {
    async fn upsert(&self, entries: &[VectorEntry]) -> Result<usize> {
        let mut map = self.entries.write().await;

        if let (Some(first), Some(existing)) = (entries.first(), map.values().next()) {
            if first.embedding.len() != existing.embedding.len() {
                anyhow::bail!(
                    "Embedding dimension mismatch: index has {}, got {}",
                    existing.embedding.len(),
                    first.embedding.len()
                );
            }
        }

        for entry in entries {
            map.insert(entry.chunk_id.clone(), entry.clone());
        }
        Ok(entries.len())
    }

    async fn query(&self, embedding: &[f32], limit: usize) -> Result<Vec<ScoredChunk>> {
        let map = self.entries.read().await;

        let mut scored: Vec<ScoredChunk> = map
            .values()
            .map(|e| {
                let score = cosine_similarity(embedding, &e.embedding) as f64;
                ScoredChunk::new(e.chunk_id.clone(), score)
            })
            .collect();

        sort_scored(&mut scored);
        scored.truncate(limit);
        Ok(scored)
    }

    async fn remove_document(&self, document_id: &str) -> Result<usize> {
        let mut map = self.entries.write().await;
        let before = map.len();
        map.retain(|_, e| e.document_id != document_id);
        Ok(before - map.len())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.entries.read().await.len())
    }
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 코사인 유사도 계산
///
/// 결과는 -1.0 ~ 1.0 범위입니다. 길이가 다르거나 영벡터면 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// 점수 내림차순, 동점이면 chunk id 오름차순 정렬
pub fn sort_scored(results: &mut [ScoredChunk]) {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
}

// ============================================================================
// Tests
// ============================================================================
