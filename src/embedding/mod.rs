//! 임베딩 모듈 - 텍스트 벡터화
//!
//! 청크와 쿼리를 벡터로 변환하는 프로바이더입니다.
//! - `HashingEmbedding`: 오프라인 feature hashing (기본값, 외부 의존 없음)
//! - `HttpEmbedding`: text-embeddings-inference 호환 `POST /embed`
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = create_embedder(&config.embedding)?;
//! let embedding = embedder.embed("Hello, world!").await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use unicode_segmentation::UnicodeSegmentation;

use crate::config::{EmbedderKind, EmbeddingConfig};

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
///
/// 텍스트를 벡터로 변환하는 인터페이스입니다.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 단일 텍스트 임베딩
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// 배치 임베딩 (기본 구현: 순차 호출)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 프로바이더 이름
    fn name(&self) -> &str;
}

// ============================================================================
// Hashing Embedding
// ============================================================================

/// feature hashing 임베딩
///
/// 단어와 문자 trigram을 해시하여 고정 차원 벡터에 누적하고 L2 정규화합니다.
/// 같은 입력은 항상 같은 벡터가 되며, 네트워크나 모델이 필요 없습니다.
#[derive(Debug, Clone)]
pub struct HashingEmbedding {
    dimension: usize,
}

/// trigram 가중치 (단어 가중치 1.0 대비)
const TRIGRAM_WEIGHT: f32 = 0.5;

impl HashingEmbedding {
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            anyhow::bail!("Invalid dimension: 0");
        }
        Ok(Self { dimension })
    }

    fn accumulate(&self, vector: &mut [f32], feature: &str, weight: f32) {
        let digest = Sha256::digest(feature.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        let hash = u64::from_le_bytes(bytes);

        let index = (hash % self.dimension as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        vector[index] += sign * weight;
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        for word in text.unicode_words() {
            let word = word.to_lowercase();
            self.accumulate(&mut vector, &word, 1.0);

            let chars: Vec<char> = format!("<{}>", word).chars().collect();
            for window in chars.windows(3) {
                let trigram: String = window.iter().collect();
                self.accumulate(&mut vector, &trigram, TRIGRAM_WEIGHT);
            }
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_sync(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "hashing"
    }
}

// ============================================================================
// HTTP Embedding (text-embeddings-inference)
// ============================================================================

/// 재시도 가능 에러 시 최대 재시도 횟수
const MAX_RETRIES: u32 = 3;
/// 재시도 시 초기 백오프 (ms)
const INITIAL_BACKOFF_MS: u64 = 500;

/// HTTP 임베딩 구현체
///
/// source: https://huggingface.github.io/text-embeddings-inference/
#[derive(Debug)]
pub struct HttpEmbedding {
    endpoint: String,
    client: reqwest::Client,
    dimension: usize,
}

/// `/embed` 요청 본문
#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    inputs: &'a [String],
    truncate: bool,
}

/// 에러 응답
#[derive(Debug, Deserialize)]
struct EmbedError {
    error: String,
}

impl HttpEmbedding {
    /// 새 HTTP 임베딩 인스턴스 생성
    ///
    /// # Arguments
    /// * `base_url` - 서버 주소 (예: http://localhost:8080)
    /// * `dimension` - 모델 임베딩 차원
    /// * `timeout` - 요청 타임아웃
    pub fn new(base_url: &str, dimension: usize, timeout: Duration) -> Result<Self> {
        if dimension == 0 {
            anyhow::bail!("Invalid dimension: 0");
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            endpoint: format!("{}/embed", base_url.trim_end_matches('/')),
            client,
            dimension,
        })
    }

    /// 재시도 포함 `/embed` 호출
    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbedRequest {
            inputs: texts,
            truncate: true,
        };

        let mut last_error: Option<anyhow::Error> = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let backoff = Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt - 1));
                tracing::warn!(
                    "Embedding request failed, retrying in {:?} (attempt {}/{})",
                    backoff,
                    attempt,
                    MAX_RETRIES
                );
                tokio::time::sleep(backoff).await;
            }

            let response = match self.client.post(&self.endpoint).json(&request).send().await {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = Some(anyhow::anyhow!("Failed to send embedding request: {}", e));
                    continue;
                }
            };

            let status = response.status();
            let body = response
                .text()
                .await
                .context("Failed to read response body")?;

            if status.is_success() {
                let embeddings: Vec<Vec<f32>> =
                    serde_json::from_str(&body).context("Failed to parse embedding response")?;
                return self.check(embeddings, texts.len());
            }

            // 429 / 503 - 재시도
            if status.as_u16() == 429 || status.as_u16() == 503 {
                last_error = Some(anyhow::anyhow!("Embedding server busy ({})", status));
                continue;
            }

            // 다른 에러 - 즉시 실패
            if let Ok(error) = serde_json::from_str::<EmbedError>(&body) {
                anyhow::bail!("Embedding server error ({}): {}", status, error.error);
            }
            anyhow::bail!("Embedding server error ({}): {}", status, body);
        }

        Err(last_error
            .unwrap_or_else(|| anyhow::anyhow!("Embedding failed after {} retries", MAX_RETRIES)))
    }

    fn check(&self, embeddings: Vec<Vec<f32>>, expected: usize) -> Result<Vec<Vec<f32>>> {
        if embeddings.len() != expected {
            anyhow::bail!(
                "Embedding server returned {} vectors for {} inputs",
                embeddings.len(),
                expected
            );
        }
        if let Some(bad) = embeddings.iter().find(|e| e.len() != self.dimension) {
            anyhow::bail!(
                "Embedding dimension mismatch: expected {}, got {}",
                self.dimension,
                bad.len()
            );
        }
        Ok(embeddings)
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Ok(vec![0.0; self.dimension]);
        }

        let mut embeddings = self.request(&[text.to_string()]).await?;
        embeddings
            .pop()
            .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        tracing::debug!("Embedding batch of {} texts", texts.len());
        self.request(texts).await
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "http"
    }
}

// ============================================================================
// Factory Function
// ============================================================================

/// 설정에 따라 임베딩 프로바이더 생성
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    let embedder: Arc<dyn EmbeddingProvider> = match config.kind {
        EmbedderKind::Hashing => Arc::new(HashingEmbedding::new(config.dimension)?),
        EmbedderKind::Http => {
            let url = config
                .url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("embedding.url is not set"))?;
            Arc::new(HttpEmbedding::new(
                url,
                config.dimension,
                Duration::from_secs(config.timeout_secs),
            )?)
        }
    };

    tracing::info!(
        "Using {} embedding (dimension: {})",
        embedder.name(),
        embedder.dimension()
    );
    Ok(embedder)
}

// ============================================================================
// Tests
// ============================================================================
