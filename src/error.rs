//! 에러 타입 정의
//!
//! 수집(ingestion) 단계 에러는 문서 단위로 격리되고,
//! 검색 단계 부분 실패는 결과의 degradation 정보로 노출됩니다.
//! 두 검색 백엔드가 동시에 실패한 경우에만 호출자에게 에러가 전달됩니다.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::knowledge::SearchSource;

/// 라이브러리 공통 에러
#[derive(Debug, Error)]
pub enum RagError {
    /// 텍스트로 해석할 수 없는 문서 (바이너리, 잘못된 인코딩)
    #[error("Unparseable document {path:?}: {reason}")]
    DocumentFormat { path: PathBuf, reason: String },

    /// 검색 백엔드 하나가 타임아웃 또는 실패
    #[error("{backend} index unavailable: {reason}")]
    IndexUnavailable { backend: SearchSource, reason: String },

    /// 두 검색 백엔드 모두 실패
    #[error("All search backends unavailable (sparse: {sparse}; dense: {dense})")]
    AllIndexesUnavailable { sparse: String, dense: String },

    /// 리랭커 실패 또는 타임아웃
    #[error("Reranker unavailable: {0}")]
    RerankUnavailable(String),

    /// 잘못된 검색 요청
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// 잘못된 설정 값
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, RagError>;

impl RagError {
    /// 배치 수집을 계속 진행해도 되는 문서 단위 에러인지 여부
    pub fn is_document_local(&self) -> bool {
        matches!(self, RagError::DocumentFormat { .. })
    }
}

/// 원자 블록(코드 블록, 테이블)이 max 크기를 초과한 경우의 기록
///
/// 에러로 전파되지 않고 청크의 플래그로만 남습니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkSizeViolation {
    pub token_count: usize,
    pub max_tokens: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_local_errors() {
        let err = RagError::DocumentFormat {
            path: PathBuf::from("notes/a.md"),
            reason: "binary content".to_string(),
        };
        assert!(err.is_document_local());
        assert!(!RagError::InvalidRequest("empty".to_string()).is_document_local());
    }

    #[test]
    fn test_index_unavailable_message() {
        let err = RagError::IndexUnavailable {
            backend: SearchSource::Dense,
            reason: "timed out after 2000ms".to_string(),
        };
        assert_eq!(err.to_string(), "dense index unavailable: timed out after 2000ms");
    }
}
