//! Chunk Store - rusqlite 기반 청크 저장소 + FTS5 키워드 인덱스
//!
//! 청크 본문과 메타데이터를 보관하는 저장소이자 `SparseIndex` 구현체입니다.
//! 청크 간 관계(parent/prev/next)는 ID로만 저장하고 여기서 조회합니다.
//! 저장 위치: ~/.vault-rag/chunks.db

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::Result;

use super::document::{Chunk, ChunkId, Document, DocumentId, ScoredChunk};
use super::sparse::SparseIndex;

// ============================================================================
// Types
// ============================================================================

/// 수집된 문서 기록 (증분 수집 판단용)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: DocumentId,
    pub path: PathBuf,
    /// 원본 콘텐츠 SHA-256
    pub checksum: String,
    pub modified_at: DateTime<Utc>,
    pub ingested_at: DateTime<Utc>,
    pub chunk_count: usize,
}

impl DocumentRecord {
    pub fn new(document: &Document, chunk_count: usize) -> Self {
        Self {
            id: document.id.clone(),
            path: document.path.clone(),
            checksum: document.checksum(),
            modified_at: document.modified_at,
            ingested_at: Utc::now(),
            chunk_count,
        }
    }
}

/// 저장소 통계
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub document_count: usize,
    pub chunk_count: usize,
    pub total_tokens: usize,
    pub oversized_chunks: usize,
    pub db_path: PathBuf,
}

// ============================================================================
// ChunkStore
// ============================================================================

/// Chunk Store - SQLite 청크 저장소
///
/// 내부 연결은 `Arc<Mutex<_>>`로 공유되므로 clone은 같은 DB를 가리킵니다.
#[derive(Clone)]
pub struct ChunkStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl ChunkStore {
    /// 저장소 열기 (없으면 생성)
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        };

        store.initialize()?;
        Ok(store)
    }

    /// DB 경로 반환
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e).into())
    }

    /// 스키마 초기화
    fn initialize(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                path TEXT NOT NULL,
                checksum TEXT NOT NULL,
                modified_at TEXT NOT NULL,
                ingested_at TEXT NOT NULL,
                chunk_count INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL,
                ordinal INTEGER NOT NULL,
                token_count INTEGER NOT NULL,
                oversized INTEGER NOT NULL DEFAULT 0,
                data TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id, ordinal);
            "#,
        )?;

        // FTS5 가상 테이블 (키워드 검색용)
        // source: https://www.sqlite.org/fts5.html
        conn.execute(
            "CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
                chunk_id UNINDEXED,
                document_id UNINDEXED,
                title,
                hierarchy,
                tags,
                text,
                tokenize = 'porter unicode61'
            )",
            [],
        )?;

        tracing::debug!("Chunk store initialized at {:?}", self.db_path);
        Ok(())
    }

    /// 문서의 청크를 한 트랜잭션으로 교체
    ///
    /// 이전 버전의 청크는 모두 삭제되고 새 청크로 대체됩니다.
    /// 키워드 인덱스는 `SparseIndex`로 따로 갱신합니다.
    pub fn replace_document(&self, record: &DocumentRecord, chunks: &[Chunk]) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM chunks WHERE document_id = ?1", params![record.id])?;

        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO chunks
                 (id, document_id, ordinal, token_count, oversized, data)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for chunk in chunks {
                let data = serde_json::to_string(chunk)?;
                stmt.execute(params![
                    chunk.id,
                    chunk.document_id,
                    chunk.ordinal as i64,
                    chunk.token_count as i64,
                    chunk.is_oversized(),
                    data,
                ])?;
            }
        }

        tx.execute(
            "INSERT OR REPLACE INTO documents
             (id, path, checksum, modified_at, ingested_at, chunk_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.id,
                record.path.to_string_lossy().into_owned(),
                record.checksum,
                record.modified_at.to_rfc3339(),
                record.ingested_at.to_rfc3339(),
                record.chunk_count as i64,
            ],
        )?;

        tx.commit()?;

        tracing::debug!("Stored document: {} (chunks={})", record.id, chunks.len());
        Ok(())
    }

    /// 문서와 청크, 키워드 인덱스 항목 삭제
    pub fn remove_document(&self, document_id: &str) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM chunks_fts WHERE document_id = ?1", params![document_id])?;
        tx.execute("DELETE FROM chunks WHERE document_id = ?1", params![document_id])?;
        let rows = tx.execute("DELETE FROM documents WHERE id = ?1", params![document_id])?;

        tx.commit()?;
        Ok(rows > 0)
    }

    /// ID로 청크 조회
    pub fn get_chunk(&self, id: &str) -> Result<Option<Chunk>> {
        let conn = self.lock()?;

        let data: Option<String> = conn
            .query_row("SELECT data FROM chunks WHERE id = ?1", params![id], |row| row.get(0))
            .optional()?;

        match data {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    /// 여러 청크 조회 (없는 ID는 결과에서 빠짐)
    pub fn get_chunks(&self, ids: &[ChunkId]) -> Result<HashMap<ChunkId, Chunk>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached("SELECT data FROM chunks WHERE id = ?1")?;

        let mut chunks = HashMap::with_capacity(ids.len());
        for id in ids {
            if chunks.contains_key(id) {
                continue;
            }
            let data: Option<String> = stmt.query_row(params![id], |row| row.get(0)).optional()?;
            if let Some(data) = data {
                let chunk: Chunk = serde_json::from_str(&data)?;
                chunks.insert(id.clone(), chunk);
            }
        }

        Ok(chunks)
    }

    /// 문서의 청크를 순서대로 조회
    pub fn document_chunks(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT data FROM chunks WHERE document_id = ?1 ORDER BY ordinal")?;

        let rows = stmt
            .query_map(params![document_id], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.iter()
            .map(|data| serde_json::from_str(data).map_err(Into::into))
            .collect()
    }

    /// 저장된 문서 체크섬
    pub fn document_checksum(&self, document_id: &str) -> Result<Option<String>> {
        let conn = self.lock()?;

        let checksum = conn
            .query_row(
                "SELECT checksum FROM documents WHERE id = ?1",
                params![document_id],
                |row| row.get(0),
            )
            .optional()?;

        Ok(checksum)
    }

    /// 문서 목록 (ID 순)
    pub fn list_documents(&self) -> Result<Vec<DocumentRecord>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            "SELECT id, path, checksum, modified_at, ingested_at, chunk_count
             FROM documents ORDER BY id",
        )?;

        let docs = stmt
            .query_map([], |row| {
                Ok(DocumentRecord {
                    id: row.get(0)?,
                    path: PathBuf::from(row.get::<_, String>(1)?),
                    checksum: row.get(2)?,
                    modified_at: parse_datetime(row.get::<_, String>(3)?),
                    ingested_at: parse_datetime(row.get::<_, String>(4)?),
                    chunk_count: row.get::<_, i64>(5)? as usize,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(docs)
    }

    /// 저장소 통계
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.lock()?;

        let document_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;

        let (chunk_count, total_tokens, oversized): (i64, i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(token_count), 0), COALESCE(SUM(oversized), 0)
             FROM chunks",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        Ok(StoreStats {
            document_count: document_count as usize,
            chunk_count: chunk_count as usize,
            total_tokens: total_tokens as usize,
            oversized_chunks: oversized as usize,
            db_path: self.db_path.clone(),
        })
    }

    /// FTS5 인덱스 리빌드
    ///
    /// 저장된 청크로부터 키워드 인덱스 전체를 다시 만듭니다.
    pub fn rebuild_fts_index(&self) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM chunks_fts", [])?;

        let rows = {
            let mut stmt = tx.prepare("SELECT data FROM chunks ORDER BY document_id, ordinal")?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        for data in &rows {
            let chunk: Chunk = serde_json::from_str(data)?;
            insert_fts(&tx, &chunk)?;
        }

        tx.commit()?;

        tracing::info!("Rebuilt FTS5 index with {} chunks", rows.len());
        Ok(rows.len())
    }

    // ========================================================================
    // Keyword index (동기 구현, SparseIndex에서 spawn_blocking으로 호출)
    // ========================================================================

    /// 키워드 인덱스에 청크 추가 (같은 chunk id는 교체)
    pub fn index_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        for chunk in chunks {
            tx.execute("DELETE FROM chunks_fts WHERE chunk_id = ?1", params![chunk.id])?;
            insert_fts(&tx, chunk)?;
        }

        tx.commit()?;
        Ok(())
    }

    /// 키워드 인덱스에서 문서 제거
    pub fn unindex_document(&self, document_id: &str) -> Result<usize> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "DELETE FROM chunks_fts WHERE document_id = ?1",
            params![document_id],
        )?;
        Ok(rows)
    }

    /// FTS5 BM25 검색
    ///
    /// 점수는 `-bm25()` (높을수록 관련성 높음), 제목 열에 가중치를 둡니다.
    /// source: https://www.sqlite.org/fts5.html#the_bm25_function
    pub fn search_terms(&self, terms: &[String], limit: usize) -> Result<Vec<ScoredChunk>> {
        let match_expr = fts_match_expr(terms);
        if match_expr.is_empty() || limit == 0 {
            return Ok(vec![]);
        }

        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            r#"
            SELECT chunk_id, -bm25(chunks_fts, 0.0, 0.0, 2.0, 1.0, 1.5, 1.0) AS score
            FROM chunks_fts
            WHERE chunks_fts MATCH ?1
            ORDER BY score DESC, chunk_id ASC
            LIMIT ?2
            "#,
        )?;

        let results = stmt
            .query_map(params![match_expr, limit as i64], |row| {
                Ok(ScoredChunk {
                    chunk_id: row.get(0)?,
                    score: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(results)
    }
}

#[async_trait]
impl SparseIndex for ChunkStore {
    async fn add(&self, chunks: &[Chunk]) -> anyhow::Result<()> {
        let store = self.clone();
        let chunks = chunks.to_vec();
        tokio::task::spawn_blocking(move || store.index_chunks(&chunks)).await??;
        Ok(())
    }

    async fn remove(&self, document_id: &str) -> anyhow::Result<usize> {
        let store = self.clone();
        let document_id = document_id.to_string();
        let removed =
            tokio::task::spawn_blocking(move || store.unindex_document(&document_id)).await??;
        Ok(removed)
    }

    async fn search(&self, terms: &[String], limit: usize) -> anyhow::Result<Vec<ScoredChunk>> {
        let store = self.clone();
        let terms = terms.to_vec();
        let results =
            tokio::task::spawn_blocking(move || store.search_terms(&terms, limit)).await??;
        Ok(results)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn insert_fts(conn: &Connection, chunk: &Chunk) -> rusqlite::Result<()> {
    let tags = chunk.tags.iter().cloned().collect::<Vec<_>>().join(" ");
    conn.execute(
        "INSERT INTO chunks_fts (chunk_id, document_id, title, hierarchy, tags, text)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            chunk.id,
            chunk.document_id,
            chunk.section_title.as_deref().unwrap_or(""),
            chunk.section_hierarchy.join(" / "),
            tags,
            chunk.text,
        ],
    )?;
    Ok(())
}

/// RFC3339 문자열을 DateTime<Utc>로 파싱
fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// FTS5 MATCH 식 생성
///
/// 각 검색어를 따옴표로 감싸 특수 문법을 무력화하고 OR로 연결합니다.
/// source: https://www.sqlite.org/fts5.html#full_text_query_syntax
fn fts_match_expr(terms: &[String]) -> String {
    terms
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" OR ")
}

// ============================================================================
// Tests
// ============================================================================
