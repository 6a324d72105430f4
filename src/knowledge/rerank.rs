//! Re-ranker - 통합 결과 재정렬
//!
//! 리랭커는 후보의 순서만 바꿉니다. 후보에 없는 ID는 무시하고,
//! 리랭커가 빠뜨린 후보는 통합 순서대로 뒤에 붙입니다.
//! 실패 / 타임아웃 처리는 `HybridRetriever`가 담당합니다 (통합 결과 그대로 사용).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{RerankConfig, RerankerKind};

use super::document::{Chunk, ChunkId, SearchSource};
use super::fusion::RankedResult;
use super::sparse::query_terms;

// ============================================================================
// Reranker Trait
// ============================================================================

/// 리랭커 트레이트
#[async_trait]
pub trait Reranker: Send + Sync {
    /// 후보 청크 점수 매기기 (점수 내림차순, 최대 limit개)
    async fn rerank(
        &self,
        query: &str,
        candidates: &[Chunk],
        limit: usize,
    ) -> Result<Vec<(ChunkId, f64)>>;

    /// 리랭커 이름
    fn name(&self) -> &str;
}

/// 리랭커 점수를 통합 결과에 적용
pub fn apply_rerank(
    fused: Vec<RankedResult>,
    scores: &[(ChunkId, f64)],
    limit: usize,
) -> Vec<RankedResult> {
    let mut by_id: HashMap<ChunkId, RankedResult> =
        fused.iter().map(|r| (r.chunk_id.clone(), r.clone())).collect();
    let mut placed: HashSet<ChunkId> = HashSet::new();
    let mut ordered = Vec::with_capacity(fused.len());

    for (chunk_id, score) in scores {
        if !placed.insert(chunk_id.clone()) {
            continue;
        }
        let Some(mut result) = by_id.remove(chunk_id) else {
            tracing::debug!("Reranker returned unknown chunk id: {}", chunk_id);
            continue;
        };
        result.rerank_score = Some(*score);
        result.source_scores.insert(SearchSource::Rerank, *score);
        result.source_ranks.insert(SearchSource::Rerank, ordered.len() + 1);
        ordered.push(result);
    }

    // 리랭커가 빠뜨린 후보는 통합 순서대로
    for result in fused {
        if let Some(result) = by_id.remove(&result.chunk_id) {
            ordered.push(result);
        }
    }

    ordered.truncate(limit);
    ordered
}

// ============================================================================
// Lexical Reranker
// ============================================================================

/// 검색어 커버리지 / 근접도 기반 로컬 리랭커
///
/// score = 0.6 × 본문 커버리지 + 0.2 × 제목 커버리지 + 0.2 × 근접도
#[derive(Debug, Clone, Default)]
pub struct LexicalReranker;

impl LexicalReranker {
    pub fn new() -> Self {
        Self
    }

    /// 단일 청크 점수 (0.0 ~ 1.0)
    pub fn score(&self, terms: &[String], chunk: &Chunk) -> f64 {
        if terms.is_empty() {
            return 0.0;
        }

        let words: Vec<String> = words_of(&chunk.text);
        let heading = chunk.section_hierarchy.join(" ");
        let heading_words: HashSet<String> = words_of(&heading).into_iter().collect();

        let word_set: HashSet<&str> = words.iter().map(String::as_str).collect();
        let matched: Vec<&String> =
            terms.iter().filter(|t| word_set.contains(t.as_str())).collect();

        let coverage = matched.len() as f64 / terms.len() as f64;
        let title_coverage =
            terms.iter().filter(|t| heading_words.contains(*t)).count() as f64 / terms.len() as f64;
        let proximity = proximity(&words, &matched);

        0.6 * coverage + 0.2 * title_coverage + 0.2 * proximity
    }
}

/// 텍스트의 모든 단어 (불용어 포함, 순서 유지)
fn words_of(text: &str) -> Vec<String> {
    use unicode_segmentation::UnicodeSegmentation;
    text.unicode_words().map(str::to_lowercase).collect()
}

/// 일치한 검색어를 모두 포함하는 최소 구간의 조밀도 (1.0 = 인접)
fn proximity(words: &[String], matched: &[&String]) -> f64 {
    if matched.len() < 2 {
        return if matched.is_empty() { 0.0 } else { 1.0 };
    }

    let needed: HashSet<&str> = matched.iter().map(|s| s.as_str()).collect();
    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut have = 0;
    let mut best = usize::MAX;
    let mut left = 0;

    for (right, word) in words.iter().enumerate() {
        if needed.contains(word.as_str()) {
            let c = counts.entry(word.as_str()).or_insert(0);
            if *c == 0 {
                have += 1;
            }
            *c += 1;
        }

        while have == needed.len() {
            best = best.min(right - left + 1);
            let lw = words[left].as_str();
            if let Some(c) = counts.get_mut(lw) {
                *c -= 1;
                if *c == 0 {
                    have -= 1;
                }
            }
            left += 1;
        }
    }

    if best == usize::MAX {
        return 0.0;
    }
    needed.len() as f64 / best as f64
}

#[async_trait]
impl Reranker for LexicalReranker {
    async fn rerank(
        &self,
        query: &str,
        candidates: &[Chunk],
        limit: usize,
    ) -> Result<Vec<(ChunkId, f64)>> {
        let terms = query_terms(query);

        let mut scored: Vec<(ChunkId, f64)> = candidates
            .iter()
            .map(|c| (c.id.clone(), self.score(&terms, c)))
            .collect();

        // 안정 정렬: 동점이면 통합 순서 유지
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    fn name(&self) -> &str {
        "lexical"
    }
}

// ============================================================================
// HTTP Reranker (text-embeddings-inference)
// ============================================================================

/// HTTP 리랭커 (`POST /rerank`)
///
/// source: https://huggingface.github.io/text-embeddings-inference/
#[derive(Debug)]
pub struct HttpReranker {
    endpoint: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    texts: Vec<&'a str>,
    truncate: bool,
}

#[derive(Debug, Deserialize)]
struct RerankHit {
    index: usize,
    score: f64,
}

impl HttpReranker {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            endpoint: format!("{}/rerank", base_url.trim_end_matches('/')),
            client,
        })
    }
}

#[async_trait]
impl Reranker for HttpReranker {
    async fn rerank(
        &self,
        query: &str,
        candidates: &[Chunk],
        limit: usize,
    ) -> Result<Vec<(ChunkId, f64)>> {
        if candidates.is_empty() {
            return Ok(vec![]);
        }

        let request = RerankRequest {
            query,
            texts: candidates.iter().map(|c| c.text.as_str()).collect(),
            truncate: true,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .context("Failed to send rerank request")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Rerank server error ({}): {}", status, body);
        }

        let hits: Vec<RerankHit> = response
            .json()
            .await
            .context("Failed to parse rerank response")?;

        let mut scored: Vec<(ChunkId, f64)> = hits
            .into_iter()
            .filter_map(|hit| candidates.get(hit.index).map(|c| (c.id.clone(), hit.score)))
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    fn name(&self) -> &str {
        "http"
    }
}

// ============================================================================
// Factory Function
// ============================================================================

/// 설정에 따라 리랭커 생성 (`none`이면 None)
pub fn create_reranker(config: &RerankConfig) -> Result<Option<Arc<dyn Reranker>>> {
    let reranker: Arc<dyn Reranker> = match config.kind {
        RerankerKind::None => return Ok(None),
        RerankerKind::Lexical => Arc::new(LexicalReranker::new()),
        RerankerKind::Http => {
            let url = config
                .url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("rerank.url is not set"))?;
            Arc::new(HttpReranker::new(url, Duration::from_millis(config.timeout_ms))?)
        }
    };

    tracing::info!("Using {} reranker", reranker.name());
    Ok(Some(reranker))
}

// ============================================================================
// Tests
// ============================================================================
