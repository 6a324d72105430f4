//! Explainability - 검색 결과 근거 정리
//!
//! 결과마다 어떤 소스가 어떤 순위/점수를 줬는지, 쿼리가 어느 메타데이터와
//! 겹쳤는지, 검색 중 빠진 소스가 있었는지를 기록합니다. 부수 효과 없는 순수 함수입니다.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::document::{Chunk, ChunkId, DocumentId, SearchSource};
use super::fusion::RankedResult;
use super::sparse::{query_terms, term_set};

/// 검색 중 제외된 소스와 이유
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Degradation {
    pub source: SearchSource,
    pub reason: String,
}

impl Degradation {
    pub fn new(source: SearchSource, reason: impl Into<String>) -> Self {
        Self {
            source,
            reason: reason.into(),
        }
    }
}

/// 최종 순서를 결정한 단계
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderedBy {
    Fusion,
    Rerank,
}

/// 결과 하나에 대한 설명
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedResult {
    /// 최종 순위 (1부터)
    pub rank: usize,
    pub chunk_id: ChunkId,
    pub document_id: DocumentId,
    pub section_hierarchy: Vec<String>,
    pub source_scores: BTreeMap<SearchSource, f64>,
    pub source_ranks: BTreeMap<SearchSource, usize>,
    pub fused_score: f64,
    pub rerank_score: Option<f64>,
    pub ordered_by: OrderedBy,
    /// 쿼리와 겹친 필드 (`section_title`, `heading:<제목>`, `tag:<태그>`, `text`)
    pub matched_fields: Vec<String>,
    /// 이 쿼리에서 빠진 소스
    pub degraded_sources: Vec<SearchSource>,
}

impl AnnotatedResult {
    /// 일부 소스 없이 순위가 매겨졌는지 여부
    pub fn is_degraded(&self) -> bool {
        !self.degraded_sources.is_empty()
    }
}

/// 결과 목록에 설명 부착
///
/// `chunks`에 없는 결과는 문서/섹션 정보 없이 점수만 기록합니다.
pub fn explain(
    query: &str,
    results: &[RankedResult],
    chunks: &HashMap<ChunkId, Chunk>,
    degradations: &[Degradation],
) -> Vec<AnnotatedResult> {
    let terms: HashSet<String> = query_terms(query).into_iter().collect();

    let mut degraded_sources: Vec<SearchSource> = degradations.iter().map(|d| d.source).collect();
    degraded_sources.sort();
    degraded_sources.dedup();

    results
        .iter()
        .enumerate()
        .map(|(i, result)| {
            let chunk = chunks.get(&result.chunk_id);

            AnnotatedResult {
                rank: i + 1,
                chunk_id: result.chunk_id.clone(),
                document_id: chunk.map(|c| c.document_id.clone()).unwrap_or_default(),
                section_hierarchy: chunk.map(|c| c.section_hierarchy.clone()).unwrap_or_default(),
                source_scores: result.source_scores.clone(),
                source_ranks: result.source_ranks.clone(),
                fused_score: result.fused_score,
                rerank_score: result.rerank_score,
                ordered_by: if result.rerank_score.is_some() {
                    OrderedBy::Rerank
                } else {
                    OrderedBy::Fusion
                },
                matched_fields: chunk.map(|c| matched_fields(&terms, c)).unwrap_or_default(),
                degraded_sources: degraded_sources.clone(),
            }
        })
        .collect()
}

fn overlaps(terms: &HashSet<String>, text: &str) -> bool {
    !terms.is_empty() && term_set(text).iter().any(|t| terms.contains(t))
}

/// 쿼리와 겹치는 메타데이터 필드
fn matched_fields(terms: &HashSet<String>, chunk: &Chunk) -> Vec<String> {
    let mut fields = Vec::new();

    if let Some(title) = &chunk.section_title {
        if overlaps(terms, title) {
            fields.push("section_title".to_string());
        }
    }

    // 가장 안쪽 헤딩은 section_title과 같으므로 조상만
    let ancestors = chunk
        .section_hierarchy
        .len()
        .saturating_sub(usize::from(chunk.section_title.is_some()));
    for heading in &chunk.section_hierarchy[..ancestors] {
        if overlaps(terms, heading) {
            fields.push(format!("heading:{}", heading));
        }
    }

    for tag in &chunk.tags {
        if overlaps(terms, tag) {
            fields.push(format!("tag:{}", tag));
        }
    }

    if overlaps(terms, &chunk.text) {
        fields.push("text".to_string());
    }

    fields
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::chunker::{Chunker, MarkdownChunker};
    use crate::knowledge::document::{Document, ScoredChunk};
    use crate::knowledge::fusion::RrfFusion;
    use chrono::Utc;

    fn chunk_map() -> (Vec<Chunk>, HashMap<ChunkId, Chunk>) {
        let doc = Document::new(
            "guides/rag.md",
            "/vault/guides/rag.md",
            "---\ntags: [rag, search-engines]\n---\n# Retrieval Guide\n\n\
             ## Fusion Basics\n\nRank fusion merges lists.\n\n## Other\n\nUnrelated words.",
            Utc::now(),
        );
        let chunks = MarkdownChunker::with_defaults().build(&doc).unwrap().chunks;
        let map = chunks.iter().map(|c| (c.id.clone(), c.clone())).collect();
        (chunks, map)
    }

    #[test]
    fn test_explain_scores_and_fields() {
        let (chunks, map) = chunk_map();
        let sparse = vec![ScoredChunk::new(chunks[0].id.clone(), 3.2)];
        let dense = vec![
            ScoredChunk::new(chunks[1].id.clone(), 0.7),
            ScoredChunk::new(chunks[0].id.clone(), 0.6),
        ];
        let fused = RrfFusion::default().fuse(&sparse, &dense, 10);

        let explained = explain("retrieval fusion rag", &fused, &map, &[]);
        assert_eq!(explained.len(), 2);

        let first = &explained[0];
        assert_eq!(first.rank, 1);
        assert_eq!(first.chunk_id, chunks[0].id);
        assert_eq!(first.document_id, "guides/rag.md");
        assert_eq!(first.section_hierarchy, vec!["Retrieval Guide", "Fusion Basics"]);
        assert_eq!(first.source_scores.get(&SearchSource::Sparse), Some(&3.2));
        assert_eq!(first.source_ranks.get(&SearchSource::Dense), Some(&2));
        assert_eq!(first.ordered_by, OrderedBy::Fusion);
        assert!(!first.is_degraded());
        assert_eq!(
            first.matched_fields,
            vec!["section_title", "heading:Retrieval Guide", "tag:rag", "text"]
        );

        // "Other" 섹션은 조상 헤딩과 태그만 겹침
        assert_eq!(explained[1].matched_fields, vec!["heading:Retrieval Guide", "tag:rag"]);
    }

    #[test]
    fn test_explain_degraded_and_reranked() {
        let (chunks, map) = chunk_map();
        let sparse = [ScoredChunk::new(chunks[0].id.clone(), 1.0)];
        let mut fused = RrfFusion::default().fuse(&sparse, &[], 10);
        fused[0].rerank_score = Some(0.42);

        let degradations = vec![
            Degradation::new(SearchSource::Dense, "timed out after 2000ms"),
            Degradation::new(SearchSource::Dense, "duplicate"),
        ];
        let explained = explain("fusion", &fused, &map, &degradations);

        assert_eq!(explained[0].degraded_sources, vec![SearchSource::Dense]);
        assert!(explained[0].is_degraded());
        assert_eq!(explained[0].ordered_by, OrderedBy::Rerank);
        assert_eq!(explained[0].rerank_score, Some(0.42));
    }

    #[test]
    fn test_explain_unknown_chunk() {
        let fused = RrfFusion::default().fuse(&[ScoredChunk::new("ghost", 1.0)], &[], 10);
        let explained = explain("anything", &fused, &HashMap::new(), &[]);
        assert_eq!(explained[0].document_id, "");
        assert!(explained[0].matched_fields.is_empty());
    }
}
