//! Sparse Index - 키워드(BM25) 검색 인터페이스
//!
//! 구현체는 SQLite FTS5 기반 `ChunkStore`입니다.
//! 쿼리 토큰화는 리랭커와 설명(explain) 단계에서도 같은 규칙을 사용합니다.

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use unicode_segmentation::UnicodeSegmentation;

use super::document::{Chunk, ScoredChunk};

/// 검색어에서 제외하는 불용어
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "how", "in", "is", "it",
    "of", "on", "or", "that", "the", "this", "to", "was", "what", "when", "where", "which",
    "who", "why", "with",
];

/// 키워드 인덱스 트레이트
#[async_trait]
pub trait SparseIndex: Send + Sync {
    /// 청크 색인 (같은 ID는 교체)
    async fn add(&self, chunks: &[Chunk]) -> Result<()>;

    /// 문서의 모든 청크를 색인에서 제거, 제거된 개수 반환
    async fn remove(&self, document_id: &str) -> Result<usize>;

    /// BM25 검색 (점수 내림차순, 동점이면 chunk id 오름차순)
    async fn search(&self, terms: &[String], limit: usize) -> Result<Vec<ScoredChunk>>;
}

/// 쿼리를 검색어로 분리
///
/// 유니코드 단어 경계로 나누고 소문자로 정규화합니다.
/// 불용어를 제외하되, 모두 불용어면 그대로 사용합니다.
pub fn query_terms(query: &str) -> Vec<String> {
    let words: Vec<String> = query.unicode_words().map(str::to_lowercase).collect();

    let mut seen = HashSet::new();
    let filtered: Vec<String> = words
        .iter()
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .filter(|w| seen.insert(w.to_string()))
        .cloned()
        .collect();

    if !filtered.is_empty() {
        return filtered;
    }

    let mut seen = HashSet::new();
    words.into_iter().filter(|w| seen.insert(w.clone())).collect()
}

/// 텍스트를 비교용 단어 집합으로 변환
pub fn term_set(text: &str) -> HashSet<String> {
    text.unicode_words().map(str::to_lowercase).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_terms() {
        assert_eq!(
            query_terms("How does the Hybrid retrieval work?"),
            vec!["does", "hybrid", "retrieval", "work"]
        );
        assert_eq!(query_terms("rust RUST Rust"), vec!["rust"]);
        assert!(query_terms("  ?! ").is_empty());
    }

    #[test]
    fn test_query_terms_only_stopwords() {
        assert_eq!(query_terms("the what"), vec!["the", "what"]);
    }

    #[test]
    fn test_query_terms_unicode() {
        assert_eq!(query_terms("하이브리드 검색"), vec!["하이브리드", "검색"]);
    }
}
