//! LanceDB Vector Store - 고성능 벡터 검색
//!
//! ANN (Approximate Nearest Neighbor) 검색으로 대용량 볼트에서도 빠른 검색을 지원합니다.
//! ref: https://lancedb.github.io/lancedb/

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};

use super::document::ScoredChunk;
use super::vector::{sort_scored, DenseIndex, VectorEntry};

// ============================================================================
// LanceVectorStore
// ============================================================================

/// LanceDB 벡터 저장소 구현
///
/// 행 하나가 청크 하나에 대응합니다 (chunk_id, document_id, embedding).
pub struct LanceVectorStore {
    db: Connection,
    table_name: String,
    dimension: usize,
}

impl LanceVectorStore {
    /// LanceDB 저장소 열기
    ///
    /// # Arguments
    /// * `path` - .lance 디렉토리 경로
    /// * `table_name` - 벡터 테이블 이름
    /// * `dimension` - 임베딩 차원 (임베딩 프로바이더와 일치해야 함)
    pub async fn open(path: &Path, table_name: &str, dimension: usize) -> Result<Self> {
        if dimension == 0 || dimension > i32::MAX as usize {
            anyhow::bail!("Invalid embedding dimension: {}", dimension);
        }

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context("Failed to create LanceDB directory")?;
            }
        }

        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid path encoding"))?;

        let db = lancedb::connect(path_str)
            .execute()
            .await
            .context("Failed to connect to LanceDB")?;

        tracing::debug!("LanceDB opened at {:?} (table={}, dim={})", path, table_name, dimension);

        Ok(Self {
            db,
            table_name: table_name.to_string(),
            dimension,
        })
    }

    /// 벡터 테이블 스키마 생성
    fn create_schema(&self) -> Schema {
        Schema::new(vec![
            Field::new("chunk_id", DataType::Utf8, false),
            Field::new("document_id", DataType::Utf8, false),
            Field::new(
                "embedding",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    self.dimension as i32,
                ),
                false,
            ),
        ])
    }

    /// 엔트리들을 Arrow RecordBatch로 변환
    fn entries_to_batch(&self, entries: &[VectorEntry]) -> Result<RecordBatch> {
        if entries.is_empty() {
            anyhow::bail!("Cannot create batch from empty entries");
        }

        if let Some(bad) = entries.iter().find(|e| e.embedding.len() != self.dimension) {
            anyhow::bail!(
                "Embedding dimension mismatch for chunk {}: expected {}, got {}",
                bad.chunk_id,
                self.dimension,
                bad.embedding.len()
            );
        }

        let chunk_ids: Vec<&str> = entries.iter().map(|e| e.chunk_id.as_str()).collect();
        let document_ids: Vec<&str> = entries.iter().map(|e| e.document_id.as_str()).collect();

        // 임베딩을 FixedSizeList로 변환
        let embeddings_flat: Vec<f32> = entries
            .iter()
            .flat_map(|e| e.embedding.iter().copied())
            .collect();

        let values = Float32Array::from(embeddings_flat);
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let embeddings_list = FixedSizeListArray::try_new(
            field,
            self.dimension as i32,
            Arc::new(values) as Arc<dyn Array>,
            None,
        )
        .context("Failed to create embedding array")?;

        let batch = RecordBatch::try_new(
            Arc::new(self.create_schema()),
            vec![
                Arc::new(StringArray::from(chunk_ids)),
                Arc::new(StringArray::from(document_ids)),
                Arc::new(embeddings_list),
            ],
        )
        .context("Failed to create RecordBatch")?;

        Ok(batch)
    }

    /// 테이블 존재 여부 확인
    async fn table_exists(&self) -> bool {
        self.db
            .table_names()
            .execute()
            .await
            .map(|names| names.contains(&self.table_name))
            .unwrap_or(false)
    }

    /// 테이블 열기 (없으면 None)
    async fn open_table(&self) -> Result<Option<lancedb::table::Table>> {
        if !self.table_exists().await {
            return Ok(None);
        }

        let table = self
            .db
            .open_table(&self.table_name)
            .execute()
            .await
            .context("Failed to open vector table")?;

        Ok(Some(table))
    }
}

#[async_trait]
impl DenseIndex for LanceVectorStore {
    async fn upsert(&self, entries: &[VectorEntry]) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }

        let batch = self.entries_to_batch(entries)?;
        let schema = batch.schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        match self.open_table().await? {
            Some(table) => {
                // 같은 chunk id의 이전 벡터 제거 후 추가
                let ids = entries
                    .iter()
                    .map(|e| quote_literal(&e.chunk_id))
                    .collect::<Vec<_>>()
                    .join(", ");
                table
                    .delete(&format!("chunk_id IN ({})", ids))
                    .await
                    .context("Failed to delete stale vectors")?;

                table
                    .add(batches)
                    .execute()
                    .await
                    .context("Failed to add vectors to table")?;
            }
            None => {
                self.db
                    .create_table(&self.table_name, batches)
                    .execute()
                    .await
                    .context("Failed to create table")?;
            }
        }

        Ok(entries.len())
    }

    async fn query(&self, embedding: &[f32], limit: usize) -> Result<Vec<ScoredChunk>> {
        let Some(table) = self.open_table().await? else {
            return Ok(vec![]);
        };

        if embedding.len() != self.dimension {
            anyhow::bail!(
                "Query dimension mismatch: expected {}, got {}",
                self.dimension,
                embedding.len()
            );
        }

        let results = table
            .vector_search(embedding.to_vec())
            .context("Failed to create vector search")?
            .limit(limit)
            .execute()
            .await
            .context("Failed to execute vector search")?;

        let batches: Vec<RecordBatch> = results.try_collect().await?;
        let mut scored = Vec::new();

        for batch in batches {
            let chunk_ids = batch
                .column_by_name("chunk_id")
                .and_then(|c| c.as_any().downcast_ref::<StringArray>())
                .ok_or_else(|| anyhow::anyhow!("Missing chunk_id column"))?;

            // _distance 컬럼 (LanceDB가 자동 추가)
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                .ok_or_else(|| anyhow::anyhow!("Missing _distance column"))?;

            for i in 0..batch.num_rows() {
                // L2 거리 -> 유사도
                let similarity = 1.0 / (1.0 + distances.value(i) as f64);
                scored.push(ScoredChunk::new(chunk_ids.value(i), similarity));
            }
        }

        sort_scored(&mut scored);
        scored.truncate(limit);
        Ok(scored)
    }

    async fn remove_document(&self, document_id: &str) -> Result<usize> {
        let Some(table) = self.open_table().await? else {
            return Ok(0);
        };

        let filter = format!("document_id = {}", quote_literal(document_id));
        let before = table
            .count_rows(Some(filter.clone()))
            .await
            .context("Failed to count rows for document")?;

        if before > 0 {
            table.delete(&filter).await.context("Failed to delete vectors")?;
        }

        Ok(before)
    }

    async fn count(&self) -> Result<usize> {
        let Some(table) = self.open_table().await? else {
            return Ok(0);
        };

        let count = table.count_rows(None).await.context("Failed to count rows")?;
        Ok(count)
    }
}

/// SQL 문자열 리터럴 (작은따옴표 이스케이프)
fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

// ============================================================================
// Tests
// ============================================================================
