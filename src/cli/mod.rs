//! CLI 모듈
//!
//! vault-rag CLI 명령어 정의 및 구현

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use crate::collector::VaultCollector;
use crate::config::RagConfig;
use crate::knowledge::{
    DateRange, HybridRetriever, RetrievalFilters, RetrievalRequest, RetrievalResponse,
};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "vault-rag")]
#[command(version, about = "마크다운 볼트 하이브리드 검색", long_about = None)]
pub struct Cli {
    /// 설정 파일 경로 (기본: ./vault-rag.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 볼트를 인덱스와 동기화
    Ingest {
        /// 볼트 경로 (설정 값 대신 사용)
        #[arg(short, long)]
        vault: Option<PathBuf>,

        /// 강제 재수집 (변경 없는 문서도 다시 색인)
        #[arg(long)]
        force: bool,
    },

    /// 하이브리드 검색
    Query {
        /// 검색 쿼리
        query: String,

        /// 결과 개수 (기본: default_top_k)
        #[arg(short, long)]
        limit: Option<usize>,

        /// 태그 필터 (여러 번 지정 시 모두 포함)
        #[arg(short, long = "tag")]
        tags: Vec<String>,

        /// 폴더 필터 (접두어)
        #[arg(short, long)]
        folder: Option<String>,

        /// 이 날짜 이후 (YYYY-MM-DD)
        #[arg(long, value_parser = parse_date)]
        since: Option<NaiveDate>,

        /// 이 날짜 이전 (YYYY-MM-DD)
        #[arg(long, value_parser = parse_date)]
        until: Option<NaiveDate>,

        /// JSON으로 출력
        #[arg(long)]
        json: bool,
    },

    /// 문서 삭제
    Remove {
        /// 문서 ID (볼트 기준 상대 경로)
        document_id: String,
    },

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let config = RagConfig::load(cli.config.as_deref()).context("설정 로드 실패")?;

    match cli.command {
        Commands::Ingest { vault, force } => cmd_ingest(config, vault, force).await,
        Commands::Query {
            query,
            limit,
            tags,
            folder,
            since,
            until,
            json,
        } => {
            let date_range = (since.is_some() || until.is_some()).then_some(DateRange {
                start: since,
                end: until,
            });
            let request = RetrievalRequest {
                query,
                limit,
                filters: RetrievalFilters {
                    tags,
                    folder,
                    date_range,
                },
            };
            cmd_query(config, request, json).await
        }
        Commands::Remove { document_id } => cmd_remove(config, &document_id).await,
        Commands::Status => cmd_status(config).await,
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 볼트 수집 명령어 (ingest)
///
/// 볼트의 마크다운 파일을 읽어 변경된 문서만 색인하고, 사라진 문서는 삭제합니다.
async fn cmd_ingest(mut config: RagConfig, vault: Option<PathBuf>, force: bool) -> Result<()> {
    if let Some(vault) = vault {
        config.vault_path = crate::config::expand_path(&vault);
    }

    let collector = VaultCollector::new(&config.vault_path, config.ingest.clone())
        .context("볼트 열기 실패")?;

    println!("[*] 볼트 스캔 중: {}", collector.root().display());
    let scan = collector.scan();

    for (path, reason) in &scan.failures {
        println!("[!] 읽기 실패: {:?} ({})", path, reason);
    }

    if scan.documents.is_empty() {
        println!("[!] 수집할 마크다운 파일이 없습니다.");
    } else {
        println!("[*] 수집 대상: {} 문서", scan.documents.len());
    }

    let retriever = HybridRetriever::open(&config)
        .await
        .context("HybridRetriever 초기화 실패")?;

    let report = retriever
        .sync_vault(scan.documents, force)
        .await
        .context("볼트 동기화 실패")?;

    for warning in &report.warnings {
        println!("[!] {}", warning);
    }
    for (id, error) in &report.errors {
        println!("[!] 실패: {} ({})", id, error);
    }

    println!();
    println!(
        "[OK] 완료: 색인 {} / 변경 없음 {} / 건너뜀 {} / 실패 {} / 삭제 {}",
        report.indexed, report.unchanged, report.skipped, report.failed, report.removed
    );
    println!("     생성된 청크: {}", report.chunks);

    Ok(())
}

/// 검색 명령어 (query)
async fn cmd_query(config: RagConfig, request: RetrievalRequest, json: bool) -> Result<()> {
    let retriever = HybridRetriever::open(&config)
        .await
        .context("HybridRetriever 초기화 실패")?;

    if !json {
        println!("[*] 검색 중: \"{}\"", request.query);
    }

    let response = retriever.retrieve(request).await.context("검색 실패")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    print_response(&response);
    Ok(())
}

fn print_response(response: &RetrievalResponse) {
    for degradation in &response.degradations {
        println!("[!] {} 검색 제외: {}", degradation.source, degradation.reason);
    }

    if response.matches.is_empty() {
        println!("\n[!] 검색 결과가 없습니다.");
        return;
    }

    println!("\n[OK] 검색 결과 ({} 건):\n", response.matches.len());

    for (m, explanation) in response.matches.iter().zip(&response.explanations) {
        println!("{}. [{:.4}] {}", explanation.rank, m.score, m.document_id);

        if !m.section_hierarchy.is_empty() {
            println!("   섹션: {}", m.section_hierarchy.join(" > "));
        }
        if !m.tags.is_empty() {
            println!("   태그: {}", m.tags.join(", "));
        }

        let ranks: Vec<String> = explanation
            .source_ranks
            .iter()
            .map(|(source, rank)| format!("{}#{}", source, rank))
            .collect();
        println!("   순위: {}", ranks.join(" "));

        if !explanation.matched_fields.is_empty() {
            println!("   일치: {}", explanation.matched_fields.join(", "));
        }

        println!("   내용: {}", truncate_text(&m.text, 200));
        println!();
    }
}

/// 문서 삭제 명령어 (remove)
async fn cmd_remove(config: RagConfig, document_id: &str) -> Result<()> {
    let retriever = HybridRetriever::open(&config)
        .await
        .context("HybridRetriever 초기화 실패")?;

    if retriever.remove_document(document_id).await? {
        println!("[OK] 문서 삭제됨: {}", document_id);
    } else {
        println!("[!] 삭제할 문서를 찾을 수 없습니다: {}", document_id);
    }

    Ok(())
}

/// 상태 명령어 (status)
async fn cmd_status(config: RagConfig) -> Result<()> {
    println!("vault-rag v{}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("[*] 볼트: {}", config.vault_path.display());
    println!("[*] 데이터 디렉토리: {}", config.data_dir.display());
    println!(
        "[*] 임베딩: {:?} ({}차원) / 리랭커: {:?} / 벡터 저장소: {:?}",
        config.embedding.kind, config.embedding.dimension, config.rerank.kind, config.dense_backend
    );

    let retriever = match HybridRetriever::open(&config).await {
        Ok(r) => r,
        Err(e) => {
            println!("[!] 인덱스 열기 실패: {}", e);
            return Ok(());
        }
    };

    match retriever.stats().await {
        Ok(stats) => {
            println!("[OK] 문서: {} 건", stats.documents);
            println!(
                "[OK] 청크: {} 개 (토큰 {}, oversized {})",
                stats.chunks, stats.total_tokens, stats.oversized_chunks
            );
            println!("[OK] 벡터 인덱스: {} 개", stats.vectors);
        }
        Err(e) => println!("[!] 통계 조회 실패: {}", e),
    }

    if let Ok(meta) = std::fs::metadata(retriever.store().db_path()) {
        println!("     DB 크기: {}", format_bytes(meta.len() as usize));
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

fn parse_date(s: &str) -> std::result::Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| format!("invalid date {:?}: {}", s, e))
}

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// 바이트 크기 포맷팅
fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================
