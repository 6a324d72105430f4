//! 설정 모듈
//!
//! 기본값 → `vault-rag.toml` (또는 `--config` 경로) → `VAULT_RAG_*` 환경변수 순으로
//! 병합합니다. 중첩 키는 `__`로 구분합니다.
//!
//! ```text
//! VAULT_RAG_VAULT_PATH=~/notes
//! VAULT_RAG_RETRIEVAL__DEFAULT_TOP_K=8
//! VAULT_RAG_RERANK__KIND=lexical
//! ```

use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};
use crate::knowledge::ChunkConfig;

/// 기본 설정 파일 이름 (현재 디렉토리)
pub const CONFIG_FILE: &str = "vault-rag.toml";

/// 환경변수 접두사
pub const ENV_PREFIX: &str = "VAULT_RAG_";

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 디렉토리 경로 (~/.vault-rag/)
pub fn get_data_dir() -> PathBuf {
    dirs::home_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".vault-rag")
}

/// `~`와 `$VAR`를 확장한 경로
pub fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    match shellexpand::full(&raw) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => PathBuf::from(shellexpand::tilde(&raw).as_ref()),
    }
}

// ============================================================================
// Sections
// ============================================================================

/// 검색 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// 요청에 limit이 없을 때의 결과 수
    pub default_top_k: usize,
    /// 허용되는 최대 결과 수
    pub max_top_k: usize,
    /// 각 인덱스에서 가져오는 후보 수 = limit × multiplier
    pub candidate_multiplier: usize,
    /// 필터가 있을 때 인덱스별 최소 후보 수
    pub filtered_candidate_pool: usize,
    /// RRF 상수 k
    pub rrf_constant: f64,
    /// 인덱스별 검색 타임아웃
    pub search_timeout_ms: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_top_k: 5,
            max_top_k: 20,
            candidate_multiplier: 4,
            filtered_candidate_pool: 200,
            rrf_constant: 60.0,
            search_timeout_ms: 2_000,
        }
    }
}

/// 임베딩 프로바이더 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbedderKind {
    /// 오프라인 feature hashing
    Hashing,
    /// text-embeddings-inference 호환 HTTP 엔드포인트
    Http,
}

/// 임베딩 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub kind: EmbedderKind,
    pub dimension: usize,
    /// HTTP 엔드포인트 (예: http://localhost:8080)
    pub url: Option<String>,
    pub timeout_secs: u64,
    /// 한 번에 임베딩할 텍스트 수
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            kind: EmbedderKind::Hashing,
            dimension: 384,
            url: None,
            timeout_secs: 30,
            batch_size: 32,
        }
    }
}

/// 벡터 저장소 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenseBackend {
    /// 프로세스 메모리 (재시작 시 사라짐)
    Memory,
    /// LanceDB (data_dir/lance)
    Lance,
}

/// 리랭커 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RerankerKind {
    None,
    /// 로컬 검색어 커버리지 / 근접도
    Lexical,
    /// text-embeddings-inference 호환 `/rerank`
    Http,
}

/// 리랭크 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankConfig {
    pub kind: RerankerKind,
    pub url: Option<String>,
    pub timeout_ms: u64,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            kind: RerankerKind::None,
            url: None,
            timeout_ms: 3_000,
        }
    }
}

/// 수집 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// 동시에 처리하는 문서 수
    pub concurrency: usize,
    /// 최대 파일 크기 (바이트)
    pub max_file_size: u64,
    pub extensions: Vec<String>,
    pub exclude_dirs: Vec<String>,
    /// .gitignore 패턴 존중 여부
    pub respect_gitignore: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_file_size: 1024 * 1024,
            extensions: vec!["md".to_string(), "mdx".to_string()],
            exclude_dirs: [".git", ".obsidian", ".trash", "node_modules", "__pycache__"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            respect_gitignore: true,
        }
    }
}

// ============================================================================
// RagConfig
// ============================================================================

/// 전체 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    /// 볼트 루트 (마크다운 폴더)
    pub vault_path: PathBuf,
    /// 인덱스 저장 위치
    pub data_dir: PathBuf,
    /// 벡터 테이블 이름
    pub collection_name: String,
    pub dense_backend: DenseBackend,
    pub chunking: ChunkConfig,
    pub retrieval: RetrievalConfig,
    pub embedding: EmbeddingConfig,
    pub rerank: RerankConfig,
    pub ingest: IngestConfig,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            vault_path: PathBuf::from("."),
            data_dir: get_data_dir(),
            collection_name: "vault_md".to_string(),
            dense_backend: DenseBackend::Lance,
            chunking: ChunkConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            rerank: RerankConfig::default(),
            ingest: IngestConfig::default(),
        }
    }
}

impl RagConfig {
    /// 설정 로드
    ///
    /// `path`를 지정하면 해당 파일이 반드시 있어야 하고,
    /// 없으면 현재 디렉토리의 `vault-rag.toml`을 (있을 때만) 읽습니다.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(RagConfig::default()));

        figment = match path {
            Some(p) => {
                if !p.exists() {
                    return Err(RagError::InvalidConfig(format!("Config file not found: {:?}", p)));
                }
                figment.merge(Toml::file(p))
            }
            None => figment.merge(Toml::file(CONFIG_FILE)),
        };

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let mut config: RagConfig = figment
            .extract()
            .map_err(|e| RagError::InvalidConfig(e.to_string()))?;

        config.vault_path = expand_path(&config.vault_path);
        config.data_dir = expand_path(&config.data_dir);
        config.validate()?;

        tracing::debug!(
            "Loaded config: vault={:?}, data_dir={:?}",
            config.vault_path,
            config.data_dir
        );
        Ok(config)
    }

    /// 설정 값 검증
    pub fn validate(&self) -> Result<()> {
        self.chunking.validate()?;

        let r = &self.retrieval;
        if r.default_top_k == 0 || r.default_top_k > r.max_top_k {
            return Err(RagError::InvalidConfig(format!(
                "retrieval.default_top_k must be in 1..={} (got {})",
                r.max_top_k, r.default_top_k
            )));
        }
        if r.candidate_multiplier == 0 || r.filtered_candidate_pool == 0 {
            return Err(RagError::InvalidConfig(
                "retrieval.candidate_multiplier and retrieval.filtered_candidate_pool must be > 0"
                    .to_string(),
            ));
        }
        if !(r.rrf_constant > 0.0) {
            return Err(RagError::InvalidConfig(format!(
                "retrieval.rrf_constant must be > 0 (got {})",
                r.rrf_constant
            )));
        }
        if r.search_timeout_ms == 0 || self.rerank.timeout_ms == 0 {
            return Err(RagError::InvalidConfig("timeouts must be > 0".to_string()));
        }

        if self.embedding.dimension == 0 || self.embedding.batch_size == 0 {
            return Err(RagError::InvalidConfig(
                "embedding.dimension and embedding.batch_size must be > 0".to_string(),
            ));
        }
        if self.embedding.kind == EmbedderKind::Http && self.embedding.url.is_none() {
            return Err(RagError::InvalidConfig(
                "embedding.url is required for the http embedder".to_string(),
            ));
        }
        if self.rerank.kind == RerankerKind::Http && self.rerank.url.is_none() {
            return Err(RagError::InvalidConfig(
                "rerank.url is required for the http reranker".to_string(),
            ));
        }
        if self.ingest.concurrency == 0 {
            return Err(RagError::InvalidConfig("ingest.concurrency must be > 0".to_string()));
        }
        if self.collection_name.trim().is_empty() {
            return Err(RagError::InvalidConfig("collection_name must not be empty".to_string()));
        }

        Ok(())
    }

    /// SQLite 청크 저장소 경로
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("chunks.db")
    }

    /// LanceDB 디렉토리 경로
    pub fn lance_path(&self) -> PathBuf {
        self.data_dir.join("lance")
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults_are_valid() {
        let config = RagConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retrieval.default_top_k, 5);
        assert_eq!(config.retrieval.max_top_k, 20);
        assert_eq!(config.retrieval.rrf_constant, 60.0);
        assert_eq!(config.retrieval.filtered_candidate_pool, 200);
        assert_eq!(config.collection_name, "vault_md");
        assert!(config.data_dir.ends_with(".vault-rag"));
        assert!(config.ingest.exclude_dirs.contains(&".obsidian".to_string()));
    }

    #[test]
    fn test_layering_file_then_env() {
        Jail::expect_with(|jail| {
            jail.create_file(
                CONFIG_FILE,
                r#"
                vault_path = "/tmp/vault"
                dense_backend = "memory"

                [retrieval]
                default_top_k = 7

                [rerank]
                kind = "lexical"
                "#,
            )?;
            jail.set_env("VAULT_RAG_RETRIEVAL__MAX_TOP_K", "30");
            jail.set_env("VAULT_RAG_COLLECTION_NAME", "notes");

            let config = RagConfig::load(None).map_err(|e| e.to_string())?;
            assert_eq!(config.vault_path, PathBuf::from("/tmp/vault"));
            assert_eq!(config.dense_backend, DenseBackend::Memory);
            assert_eq!(config.retrieval.default_top_k, 7);
            assert_eq!(config.retrieval.max_top_k, 30);
            assert_eq!(config.rerank.kind, RerankerKind::Lexical);
            assert_eq!(config.collection_name, "notes");
            // 지정하지 않은 값은 기본값 유지
            assert_eq!(config.retrieval.search_timeout_ms, 2_000);
            Ok(())
        });
    }

    #[test]
    fn test_invalid_values_rejected() {
        Jail::expect_with(|jail| {
            jail.set_env("VAULT_RAG_RETRIEVAL__DEFAULT_TOP_K", "50");
            assert!(matches!(RagConfig::load(None), Err(RagError::InvalidConfig(_))));
            Ok(())
        });

        let mut config = RagConfig::default();
        config.rerank.kind = RerankerKind::Http;
        assert!(config.validate().is_err());

        let mut config = RagConfig::default();
        config.chunking.min_tokens = 0;
        assert!(config.validate().is_err());

        let mut config = RagConfig::default();
        config.retrieval.filtered_candidate_pool = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_explicit_file() {
        let result = RagConfig::load(Some(Path::new("/definitely/not/here.toml")));
        assert!(matches!(result, Err(RagError::InvalidConfig(_))));
    }

    #[test]
    fn test_expand_path() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(expand_path(Path::new("~/vault")), home.join("vault"));
        assert_eq!(expand_path(Path::new("/abs/path")), PathBuf::from("/abs/path"));
    }
}
