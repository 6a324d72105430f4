//! 데이터 모델 - Document, Chunk, 검색 결과 타입
//!
//! Chunk 간의 관계(부모, 형제)는 소유 관계가 아닌 ID로만 표현합니다.
//! 실제 청크는 ChunkStore에서 ID로 조회합니다.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ChunkSizeViolation;

/// 청크 식별자 (32자리 hex)
pub type ChunkId = String;

/// 문서 식별자 (볼트 기준 상대 경로, `/` 구분자)
pub type DocumentId = String;

// ============================================================================
// Document
// ============================================================================

/// 수집 대상 원본 문서
///
/// 한 번 수집되면 변경되지 않으며, 재수집 시 새 버전으로 대체됩니다.
#[derive(Debug, Clone)]
pub struct Document {
    /// 볼트 기준 상대 경로
    pub id: DocumentId,
    /// 원본 파일 경로
    pub path: PathBuf,
    /// 원본 텍스트 (frontmatter 포함)
    pub content: String,
    /// 파일 수정 시간
    pub modified_at: DateTime<Utc>,
}

impl Document {
    pub fn new(
        id: impl Into<DocumentId>,
        path: impl Into<PathBuf>,
        content: impl Into<String>,
        modified_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            content: content.into(),
            modified_at,
        }
    }

    /// 콘텐츠 체크섬 (증분 수집 판단용)
    pub fn checksum(&self) -> String {
        sha256_hex(self.content.as_bytes())
    }

    /// 문서가 속한 폴더 (상대 경로, 루트면 빈 문자열)
    pub fn folder(&self) -> &str {
        folder_of(&self.id)
    }
}

/// 문서 ID에서 폴더 부분 추출
pub fn folder_of(document_id: &str) -> &str {
    document_id.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

// ============================================================================
// Frontmatter Value
// ============================================================================

/// 정규화된 frontmatter 값
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FrontmatterValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
    Tags(BTreeSet<String>),
    List(Vec<String>),
}

impl FrontmatterValue {
    /// 날짜로 해석 가능한 값이면 날짜 반환
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            FrontmatterValue::Date(d) => Some(*d),
            FrontmatterValue::DateTime(dt) => Some(dt.date_naive()),
            _ => None,
        }
    }
}

/// 키 → 정규화된 값 (키 순서 고정)
pub type Frontmatter = BTreeMap<String, FrontmatterValue>;

// ============================================================================
// Chunk
// ============================================================================

/// 검색의 최소 단위
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub document_id: DocumentId,
    /// 문서 내 순서 (0-based)
    pub ordinal: usize,
    pub text: String,
    pub token_count: usize,
    /// 텍스트 SHA-256
    pub checksum: String,
    /// 가장 안쪽 헤딩 (헤딩 이전 본문이면 None)
    pub section_title: Option<String>,
    /// 바깥쪽부터 안쪽까지의 헤딩 경로
    pub section_hierarchy: Vec<String>,
    /// 가장 안쪽 헤딩 레벨 (1..=6, 헤딩 이전 본문이면 0)
    pub heading_level: u8,
    pub parent_id: Option<ChunkId>,
    pub prev_id: Option<ChunkId>,
    pub next_id: Option<ChunkId>,
    pub tags: BTreeSet<String>,
    pub frontmatter: Frontmatter,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub size_violation: Option<ChunkSizeViolation>,
}

impl Chunk {
    /// 원자 블록이 max 크기를 넘어 통째로 유지된 청크인지 여부
    pub fn is_oversized(&self) -> bool {
        self.size_violation.is_some()
    }

    /// 필터/날짜 범위 판단용 날짜
    ///
    /// frontmatter `date`가 있으면 우선, 없으면 문서 수정일을 사용합니다.
    pub fn effective_date(&self) -> NaiveDate {
        self.frontmatter
            .get("date")
            .and_then(FrontmatterValue::as_date)
            .unwrap_or_else(|| self.modified_at.date_naive())
    }
}

/// 문서 경로와 위치로부터 안정적인 청크 ID 생성
///
/// 같은 문서의 같은 위치는 재수집해도 같은 ID를 갖습니다.
pub fn chunk_id(document_id: &str, ordinal: usize) -> ChunkId {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update([0u8]);
    hasher.update((ordinal as u64).to_le_bytes());
    let digest = hasher.finalize();
    format!("{:x}", digest)[..32].to_string()
}

/// SHA-256 hex 문자열
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

// ============================================================================
// Search Types
// ============================================================================

/// 랭킹 출처
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchSource {
    /// BM25 키워드 검색
    Sparse,
    /// 임베딩 유사도 검색
    Dense,
    /// 리랭커 점수
    Rerank,
}

impl SearchSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchSource::Sparse => "sparse",
            SearchSource::Dense => "dense",
            SearchSource::Rerank => "rerank",
        }
    }
}

impl fmt::Display for SearchSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 단일 인덱스의 검색 결과 (점수가 높을수록 관련성 높음)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk_id: ChunkId,
    pub score: f64,
}

impl ScoredChunk {
    pub fn new(chunk_id: impl Into<ChunkId>, score: f64) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            score,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
