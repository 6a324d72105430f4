//! Rank Fusion - RRF (Reciprocal Rank Fusion)
//!
//! 서로 다른 척도의 검색 점수를 순위만으로 통합합니다.
//! ref: https://www.elastic.co/blog/hybrid-search-rrf
//!
//! RRF Score = Σ 1 / (k + rank), rank는 1부터 시작
//! 목록에 없는 소스는 0을 기여하고, 동점이면 chunk id 오름차순입니다.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use super::document::{ChunkId, ScoredChunk, SearchSource};

/// 기본 RRF 상수
pub const DEFAULT_RRF_CONSTANT: f64 = 60.0;

/// 통합된 검색 결과 (쿼리 단위)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    pub chunk_id: ChunkId,
    /// 소스별 원래 점수
    pub source_scores: BTreeMap<SearchSource, f64>,
    /// 소스별 순위 (1부터)
    pub source_ranks: BTreeMap<SearchSource, usize>,
    pub fused_score: f64,
    /// 리랭커 점수 (리랭크된 경우만)
    pub rerank_score: Option<f64>,
}

impl RankedResult {
    /// 최종 정렬에 쓰인 점수
    pub fn final_score(&self) -> f64 {
        self.rerank_score.unwrap_or(self.fused_score)
    }
}

/// RRF 통합기
#[derive(Debug, Clone, Copy)]
pub struct RrfFusion {
    k: f64,
}

impl Default for RrfFusion {
    fn default() -> Self {
        Self::new(DEFAULT_RRF_CONSTANT)
    }
}

impl RrfFusion {
    pub fn new(k: f64) -> Self {
        Self { k }
    }

    /// 순위(1부터)에 대한 RRF 기여도
    pub fn contribution(&self, rank: usize) -> f64 {
        1.0 / (self.k + rank as f64)
    }

    /// 키워드 / 벡터 검색 결과 통합
    ///
    /// 한쪽이 비어 있으면 다른 쪽 순위만으로 정렬됩니다.
    pub fn fuse(
        &self,
        sparse: &[ScoredChunk],
        dense: &[ScoredChunk],
        limit: usize,
    ) -> Vec<RankedResult> {
        self.fuse_many(
            &[(SearchSource::Sparse, sparse), (SearchSource::Dense, dense)],
            limit,
        )
    }

    /// 임의 개수의 순위 목록 통합
    ///
    /// 한 목록 안에서 같은 ID가 반복되면 첫 번째(가장 높은) 순위만 사용합니다.
    pub fn fuse_many(
        &self,
        lists: &[(SearchSource, &[ScoredChunk])],
        limit: usize,
    ) -> Vec<RankedResult> {
        let mut fused: HashMap<&str, RankedResult> = HashMap::new();

        for (source, results) in lists {
            for (i, result) in results.iter().enumerate() {
                let rank = i + 1;
                let entry = fused
                    .entry(result.chunk_id.as_str())
                    .or_insert_with(|| RankedResult {
                        chunk_id: result.chunk_id.clone(),
                        source_scores: BTreeMap::new(),
                        source_ranks: BTreeMap::new(),
                        fused_score: 0.0,
                        rerank_score: None,
                    });

                if entry.source_ranks.contains_key(source) {
                    continue;
                }

                entry.fused_score += self.contribution(rank);
                entry.source_ranks.insert(*source, rank);
                entry.source_scores.insert(*source, result.score);
            }
        }

        let mut results: Vec<RankedResult> = fused.into_values().collect();
        results.sort_by(|a, b| {
            b.fused_score
                .partial_cmp(&a.fused_score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        results.truncate(limit);
        results
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn list(ids: &[&str]) -> Vec<ScoredChunk> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| ScoredChunk::new(*id, 10.0 - i as f64))
            .collect()
    }

    fn ids(results: &[RankedResult]) -> Vec<&str> {
        results.iter().map(|r| r.chunk_id.as_str()).collect()
    }

    #[test]
    fn test_rrf_known_ordering() {
        let fusion = RrfFusion::new(60.0);
        let sparse = list(&["A", "B", "C"]);
        let dense = list(&["B", "D", "A"]);

        let results = fusion.fuse(&sparse, &dense, 10);
        assert_eq!(ids(&results), vec!["B", "A", "D", "C"]);

        let expected = [
            1.0 / 61.0 + 1.0 / 62.0,
            1.0 / 61.0 + 1.0 / 63.0,
            1.0 / 62.0,
            1.0 / 63.0,
        ];
        for (result, score) in results.iter().zip(expected) {
            assert!((result.fused_score - score).abs() < 1e-12);
        }

        assert_eq!(results[0].source_ranks.get(&SearchSource::Sparse), Some(&2));
        assert_eq!(results[0].source_ranks.get(&SearchSource::Dense), Some(&1));
        assert_eq!(results[3].source_ranks.get(&SearchSource::Dense), None);
        assert_eq!(results[3].source_scores.get(&SearchSource::Sparse), Some(&8.0));
    }

    #[test]
    fn test_rrf_single_source_degenerates() {
        let fusion = RrfFusion::default();
        let sparse = list(&["x", "y", "z"]);

        let results = fusion.fuse(&sparse, &[], 10);
        assert_eq!(ids(&results), vec!["x", "y", "z"]);
        assert!(results.iter().all(|r| r.source_ranks.len() == 1));

        let results = fusion.fuse(&[], &sparse, 2);
        assert_eq!(ids(&results), vec!["x", "y"]);
    }

    #[test]
    fn test_rrf_tie_break_by_id() {
        let fusion = RrfFusion::default();
        let results = fusion.fuse(&list(&["m"]), &list(&["b"]), 10);
        assert_eq!(ids(&results), vec!["b", "m"]);
        assert_eq!(results[0].fused_score, results[1].fused_score);
    }

    #[test]
    fn test_rrf_duplicate_keeps_best_rank() {
        let fusion = RrfFusion::default();
        let results = fusion.fuse(&list(&["a", "b", "a"]), &[], 10);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].source_ranks.get(&SearchSource::Sparse), Some(&1));
        assert!((results[0].fused_score - 1.0 / 61.0).abs() < 1e-12);
    }

    #[test]
    fn test_rrf_ignores_score_scale() {
        let fusion = RrfFusion::default();
        let sparse = list(&["A", "B", "C"]);
        let dense = list(&["B", "D", "A"]);
        let baseline = fusion.fuse(&sparse, &dense, 10);

        // 순서를 보존하는 변환이면 결과가 같아야 함
        let rescale = |results: &[ScoredChunk], f: fn(f64) -> f64| -> Vec<ScoredChunk> {
            results
                .iter()
                .map(|r| ScoredChunk::new(r.chunk_id.clone(), f(r.score)))
                .collect()
        };
        let transforms: [fn(f64) -> f64; 2] = [|s| s * 1000.0 + 7.0, |s| s.ln()];
        for f in transforms {
            let results = fusion.fuse(&rescale(&sparse, f), &rescale(&dense, f), 10);
            assert_eq!(ids(&results), ids(&baseline));
            for (result, base) in results.iter().zip(&baseline) {
                assert_eq!(result.fused_score, base.fused_score);
                assert_eq!(result.source_ranks, base.source_ranks);
            }
        }
    }

    #[test]
    fn test_rrf_disjoint_lists_length() {
        let fusion = RrfFusion::default();
        let sparse = list(&["s1", "s2", "s3", "s4", "s5"]);
        let dense = list(&["d1", "d2", "d3", "d4"]);

        for limit in [3, 6, 9, 20] {
            let results = fusion.fuse(&sparse, &dense, limit);
            assert_eq!(results.len(), limit.min(9));

            let unique: std::collections::HashSet<&str> = ids(&results).into_iter().collect();
            assert_eq!(unique.len(), results.len());
        }

        // 같은 순위끼리는 동점, id 오름차순
        let results = fusion.fuse(&sparse, &dense, 4);
        assert_eq!(ids(&results), vec!["d1", "s1", "d2", "s2"]);
    }

    #[test]
    fn test_rrf_empty() {
        assert!(RrfFusion::default().fuse(&[], &[], 5).is_empty());
    }

    #[test]
    fn test_contribution_decreases_with_rank() {
        let fusion = RrfFusion::default();
        assert!((fusion.contribution(1) - 1.0 / 61.0).abs() < 1e-12);
        assert!(fusion.contribution(1) > fusion.contribution(5));
    }
}
