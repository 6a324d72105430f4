//! 볼트 수집 모듈
//!
//! 볼트 폴더를 순회하여 마크다운 파일을 `Document`로 읽어옵니다.
//! .gitignore 패턴을 존중하고, 설정된 확장자와 크기 제한을 적용합니다.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use ignore::WalkBuilder;

use crate::config::IngestConfig;
use crate::error::{RagError, Result};
use crate::knowledge::{Document, DocumentId};

// ============================================================================
// Collected File
// ============================================================================

/// 수집 대상 파일 정보
#[derive(Debug, Clone)]
pub struct CollectedFile {
    /// 파일 절대 경로
    pub path: PathBuf,
    /// 볼트 기준 상대 경로 (`/` 구분자)
    pub document_id: DocumentId,
    /// 파일 크기 (바이트)
    pub size: u64,
    pub modified_at: Option<SystemTime>,
}

/// 볼트 스캔 결과
#[derive(Debug, Default)]
pub struct VaultScan {
    pub documents: Vec<Document>,
    /// 읽지 못한 파일과 이유
    pub failures: Vec<(PathBuf, String)>,
}

// ============================================================================
// Vault Collector
// ============================================================================

/// 볼트 수집기
pub struct VaultCollector {
    root: PathBuf,
    config: IngestConfig,
}

impl VaultCollector {
    /// 새 수집기 생성
    pub fn new(root: &Path, config: IngestConfig) -> Result<Self> {
        let root = if root.is_absolute() {
            root.to_path_buf()
        } else {
            std::env::current_dir()?.join(root)
        };

        if !root.is_dir() {
            return Err(RagError::InvalidConfig(format!("Vault directory not found: {:?}", root)));
        }

        Ok(Self { root, config })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 볼트 재귀 순회
    pub fn collect(&self) -> Vec<CollectedFile> {
        let exclude_dirs = self.config.exclude_dirs.clone();

        // ignore 크레이트로 .gitignore 지원
        let walker = WalkBuilder::new(&self.root)
            .hidden(true)
            .git_ignore(self.config.respect_gitignore)
            .git_global(self.config.respect_gitignore)
            .git_exclude(self.config.respect_gitignore)
            .require_git(false)
            .filter_entry(move |entry| {
                let is_dir = entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false);
                !(is_dir && exclude_dirs.iter().any(|d| entry.file_name() == d.as_str()))
            })
            .build();

        let mut files = Vec::new();

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!("Failed to read entry: {}", e);
                    continue;
                }
            };

            // 파일만 처리
            if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
                continue;
            }

            if let Some(file) = self.to_collected(entry.path()) {
                files.push(file);
            }
        }

        // 순회 순서와 무관하게 같은 결과
        files.sort_by(|a, b| a.document_id.cmp(&b.document_id));

        tracing::info!("Collected {} files from {:?}", files.len(), self.root);
        files
    }

    /// 필터를 통과하면 CollectedFile 생성
    fn to_collected(&self, path: &Path) -> Option<CollectedFile> {
        let ext = path.extension().and_then(|e| e.to_str())?;
        if !self.config.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)) {
            return None;
        }

        let metadata = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("Failed to read metadata {:?}: {}", path, e);
                return None;
            }
        };

        // 파일 크기 제한
        if self.config.max_file_size > 0 && metadata.len() > self.config.max_file_size {
            tracing::debug!("Skipping large file: {:?} ({} bytes)", path, metadata.len());
            return None;
        }

        Some(CollectedFile {
            path: path.to_path_buf(),
            document_id: document_id_for(&self.root, path)?,
            size: metadata.len(),
            modified_at: metadata.modified().ok(),
        })
    }

    /// 파일을 Document로 읽기
    ///
    /// UTF-8이 아닌 파일은 `DocumentFormat` 에러입니다.
    pub fn read_document(&self, file: &CollectedFile) -> Result<Document> {
        let bytes = std::fs::read(&file.path)?;
        let content = String::from_utf8(bytes).map_err(|e| RagError::DocumentFormat {
            path: file.path.clone(),
            reason: format!("invalid UTF-8: {}", e.utf8_error()),
        })?;

        let modified_at = file
            .modified_at
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(Utc::now);

        Ok(Document::new(file.document_id.clone(), file.path.clone(), content, modified_at))
    }

    /// 볼트 전체를 읽어 Document 목록 생성
    ///
    /// 읽지 못한 파일은 경고 후 `failures`에 기록합니다.
    pub fn scan(&self) -> VaultScan {
        let mut scan = VaultScan::default();

        for file in self.collect() {
            match self.read_document(&file) {
                Ok(doc) => scan.documents.push(doc),
                Err(e) => {
                    tracing::warn!("Skipping {:?}: {}", file.path, e);
                    scan.failures.push((file.path, e.to_string()));
                }
            }
        }

        scan
    }
}

/// 볼트 기준 상대 경로를 `/` 구분 ID로 변환
fn document_id_for(root: &Path, path: &Path) -> Option<DocumentId> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

// ============================================================================
// Tests
// ============================================================================
