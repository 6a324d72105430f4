//! Text Chunking Module
//!
//! Markdown 구조 인식 청크 빌더입니다.
//! 문서 하나를 메타데이터가 붙은 검색 단위(Chunk)의 순서열로 변환합니다.
//!
//! - 헤딩(H1..H6) 트리 파싱, 청크는 헤딩 경계를 넘지 않음
//! - 섹션 내부는 문장 경계에서 길이 기반 분할
//! - 코드 블록 / 테이블은 분할하지 않음 (max 초과 시 oversized 플래그)
//! - frontmatter는 문서당 한 번 파싱하여 모든 청크에 동일하게 부착
//!
//! 같은 입력과 설정이면 항상 같은 경계와 ID를 생성합니다.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ChunkSizeViolation, RagError, Result};

use super::document::{
    chunk_id, sha256_hex, Chunk, ChunkId, Document, DocumentId, Frontmatter, FrontmatterValue,
};
use super::frontmatter::{frontmatter_tags, normalize_tag, parse_frontmatter};

// ============================================================================
// Chunk Configuration
// ============================================================================

/// 청킹 설정 (단위: 공백 기준 토큰 수)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkConfig {
    /// 최소 청크 크기 (섹션의 유일한 내용이 아니면 이보다 작은 조각은 병합)
    pub min_tokens: usize,
    /// 목표 청크 크기 (이 크기에 도달하면 문장 경계에서 자름)
    pub target_tokens: usize,
    /// 최대 청크 크기 (원자 블록만 초과 가능)
    pub max_tokens: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            min_tokens: 64,
            target_tokens: 800,
            max_tokens: 1024,
        }
    }
}

impl ChunkConfig {
    /// 짧은 노트 위주 볼트용 설정
    pub fn for_notes() -> Self {
        Self {
            min_tokens: 32,
            target_tokens: 256,
            max_tokens: 384,
        }
    }

    /// 설정 검증
    ///
    /// 마지막 조각 병합이 max를 넘지 않도록 `target + min <= max`를 요구합니다.
    pub fn validate(&self) -> Result<()> {
        if self.min_tokens == 0 {
            return Err(RagError::InvalidConfig("min_tokens must be > 0".to_string()));
        }
        if self.min_tokens > self.target_tokens || self.target_tokens > self.max_tokens {
            return Err(RagError::InvalidConfig(format!(
                "chunk sizes must satisfy min <= target <= max (got {}/{}/{})",
                self.min_tokens, self.target_tokens, self.max_tokens
            )));
        }
        if self.target_tokens + self.min_tokens > self.max_tokens {
            return Err(RagError::InvalidConfig(format!(
                "target_tokens + min_tokens must not exceed max_tokens (got {} + {} > {})",
                self.target_tokens, self.min_tokens, self.max_tokens
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Chunker Trait
// ============================================================================

/// 청킹 결과 (문서 하나)
#[derive(Debug, Clone)]
pub struct BuiltDocument {
    pub document_id: DocumentId,
    pub chunks: Vec<Chunk>,
    pub frontmatter: Frontmatter,
    /// 수집을 막지 않는 경고 (잘못된 frontmatter, oversized 블록 등)
    pub warnings: Vec<String>,
}

/// 문서 → 청크 변환 전략 트레이트
pub trait Chunker: Send + Sync {
    /// 문서를 청크로 분할
    fn build(&self, document: &Document) -> Result<BuiltDocument>;

    /// 청커 이름
    fn name(&self) -> &'static str;
}

// ============================================================================
// Parsing Helpers
// ============================================================================

fn heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^ {0,3}(#{1,6})[ \t]+(.*?)(?:[ \t]+#+)?[ \t]*$")
            .expect("heading regex is valid")
    })
}

fn hashtag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:^|\s)#([\p{L}\p{N}_][\p{L}\p{N}_/-]*)").expect("hashtag regex is valid")
    })
}

/// 공백 기준 토큰 수
pub fn count_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

/// 코드 펜스 시작/종료 마커
fn fence_marker(line: &str) -> Option<&'static str> {
    let trimmed = line.trim_start();
    if trimmed.starts_with("```") {
        Some("```")
    } else if trimmed.starts_with("~~~") {
        Some("~~~")
    } else {
        None
    }
}

fn is_table_line(line: &str) -> bool {
    line.trim_start().starts_with('|')
}

/// 헤딩 트리의 노드 (자기 본문만 보유)
#[derive(Debug)]
struct Section {
    level: u8,
    title: Option<String>,
    hierarchy: Vec<String>,
    /// 부모 섹션 인덱스 (헤딩 트리 기준)
    parent: Option<usize>,
    body: String,
}

/// 본문을 헤딩 트리로 분할
///
/// 코드 블록 내부의 `#`은 헤딩으로 취급하지 않습니다.
/// 첫 헤딩 이전 내용은 레벨 0의 preamble 섹션이 됩니다.
fn parse_sections(body: &str) -> Vec<Section> {
    let mut sections = vec![Section {
        level: 0,
        title: None,
        hierarchy: Vec::new(),
        parent: None,
        body: String::new(),
    }];
    // (level, section index)
    let mut stack: Vec<(u8, usize)> = Vec::new();
    let mut fence: Option<&'static str> = None;

    for line in body.lines() {
        match (fence, fence_marker(line)) {
            (None, Some(marker)) => fence = Some(marker),
            (Some(open), Some(marker)) if open == marker => fence = None,
            _ => {}
        }

        let heading = if fence.is_none() {
            heading_re().captures(line).and_then(|caps| {
                let level = caps.get(1)?.as_str().len() as u8;
                let title = caps.get(2)?.as_str().trim().to_string();
                (!title.is_empty()).then_some((level, title))
            })
        } else {
            None
        };

        let Some((level, title)) = heading else {
            if let Some(section) = sections.last_mut() {
                section.body.push_str(line);
                section.body.push('\n');
            }
            continue;
        };

        while stack.last().is_some_and(|(l, _)| *l >= level) {
            stack.pop();
        }

        let parent = stack.last().map(|(_, idx)| *idx);
        let mut hierarchy = parent
            .map(|idx| sections[idx].hierarchy.clone())
            .unwrap_or_default();
        hierarchy.push(title.clone());

        sections.push(Section {
            level,
            title: Some(title),
            hierarchy,
            parent,
            body: String::new(),
        });
        stack.push((level, sections.len() - 1));
    }

    sections
}

// ============================================================================
// Units & Pieces
// ============================================================================

/// 앞 단위와의 연결 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Joiner {
    /// 같은 줄의 다음 문장
    Space,
    /// 같은 문단의 다음 줄
    Newline,
    /// 새 문단 / 블록
    Paragraph,
}

impl Joiner {
    fn as_str(self) -> &'static str {
        match self {
            Joiner::Space => " ",
            Joiner::Newline => "\n",
            Joiner::Paragraph => "\n\n",
        }
    }
}

/// 분할의 최소 단위 (문장 또는 원자 블록)
#[derive(Debug, Clone)]
struct Unit {
    text: String,
    tokens: usize,
    atomic: bool,
    joiner: Joiner,
}

/// 청크 후보
#[derive(Debug, Clone)]
struct Piece {
    text: String,
    tokens: usize,
    lead: Joiner,
    oversized: bool,
}

impl Piece {
    fn from_unit(unit: Unit) -> Self {
        Self {
            text: unit.text,
            tokens: unit.tokens,
            lead: unit.joiner,
            oversized: false,
        }
    }

    fn push_unit(&mut self, unit: Unit) {
        self.text.push_str(unit.joiner.as_str());
        self.text.push_str(&unit.text);
        self.tokens += unit.tokens;
    }

    fn absorb(&mut self, other: Piece) {
        self.text.push_str(other.lead.as_str());
        self.text.push_str(&other.text);
        self.tokens += other.tokens;
    }
}

/// 문장 분할 (`.`, `!`, `?` 뒤 공백 기준)
fn split_sentences(line: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = line.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        let next_idx = i + c.len_utf8();
        if chars.peek().is_some_and(|(_, n)| n.is_whitespace()) {
            let sentence = line[start..next_idx].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = next_idx;
        }
    }

    let rest = line[start..].trim();
    if !rest.is_empty() {
        sentences.push(rest);
    }

    sentences
}

// ============================================================================
// MarkdownChunker
// ============================================================================

/// Markdown 구조 인식 청커
pub struct MarkdownChunker {
    config: ChunkConfig,
}

impl MarkdownChunker {
    /// 설정으로 생성
    pub fn new(config: ChunkConfig) -> Self {
        Self { config }
    }

    /// 기본 설정으로 생성
    pub fn with_defaults() -> Self {
        Self::new(ChunkConfig::default())
    }

    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    /// 섹션 본문을 분할 단위로 변환
    fn split_units(&self, body: &str) -> Vec<Unit> {
        let mut units = Vec::new();
        let mut block = String::new();
        let mut fence: Option<&'static str> = None;
        let mut in_table = false;
        let mut paragraph_start = true;

        let flush_block = |block: &mut String, units: &mut Vec<Unit>| {
            if !block.trim().is_empty() {
                let text = block.trim_end().to_string();
                units.push(Unit {
                    tokens: count_tokens(&text),
                    text,
                    atomic: true,
                    joiner: Joiner::Paragraph,
                });
            }
            block.clear();
        };

        for line in body.lines() {
            if let Some(open) = fence {
                block.push_str(line);
                block.push('\n');
                if fence_marker(line) == Some(open) {
                    fence = None;
                    flush_block(&mut block, &mut units);
                    paragraph_start = true;
                }
                continue;
            }

            if let Some(marker) = fence_marker(line) {
                if in_table {
                    in_table = false;
                    flush_block(&mut block, &mut units);
                }
                fence = Some(marker);
                block.push_str(line);
                block.push('\n');
                continue;
            }

            if is_table_line(line) {
                in_table = true;
                block.push_str(line);
                block.push('\n');
                continue;
            } else if in_table {
                in_table = false;
                flush_block(&mut block, &mut units);
                paragraph_start = true;
            }

            if line.trim().is_empty() {
                paragraph_start = true;
                continue;
            }

            for (i, sentence) in split_sentences(line).into_iter().enumerate() {
                let joiner = if paragraph_start {
                    Joiner::Paragraph
                } else if i == 0 {
                    Joiner::Newline
                } else {
                    Joiner::Space
                };
                paragraph_start = false;
                self.push_prose(&mut units, sentence, joiner);
            }
        }

        // 닫히지 않은 코드 블록 / 마지막 테이블
        flush_block(&mut block, &mut units);

        units
    }

    /// 문장 단위 추가 (max 초과 문장은 target 크기 조각으로 분할)
    fn push_prose(&self, units: &mut Vec<Unit>, sentence: &str, joiner: Joiner) {
        let tokens = count_tokens(sentence);
        if tokens <= self.config.max_tokens {
            units.push(Unit {
                text: sentence.to_string(),
                tokens,
                atomic: false,
                joiner,
            });
            return;
        }

        let words: Vec<&str> = sentence.split_whitespace().collect();
        for (i, window) in words.chunks(self.config.target_tokens).enumerate() {
            units.push(Unit {
                text: window.join(" "),
                tokens: window.len(),
                atomic: false,
                joiner: if i == 0 { joiner } else { Joiner::Space },
            });
        }
    }

    /// 분할 단위를 목표 크기까지 누적
    fn accumulate(&self, units: Vec<Unit>) -> Vec<Piece> {
        let mut pieces = Vec::new();
        let mut current: Option<Piece> = None;

        for unit in units {
            if unit.atomic && unit.tokens > self.config.max_tokens {
                if let Some(piece) = current.take() {
                    pieces.push(piece);
                }
                let mut piece = Piece::from_unit(unit);
                piece.oversized = true;
                pieces.push(piece);
                continue;
            }

            if let Some(piece) = current.as_mut() {
                if piece.tokens + unit.tokens <= self.config.target_tokens {
                    piece.push_unit(unit);
                    continue;
                }
            }

            if let Some(piece) = current.replace(Piece::from_unit(unit)) {
                pieces.push(piece);
            }
        }

        if let Some(piece) = current {
            pieces.push(piece);
        }

        self.merge_small_pieces(pieces)
    }

    /// min 미만 조각 병합
    ///
    /// 병합 결과가 max를 넘거나 oversized 블록과 합쳐지는 경우는 병합하지 않습니다.
    fn merge_small_pieces(&self, pieces: Vec<Piece>) -> Vec<Piece> {
        let min = self.config.min_tokens;
        let max = self.config.max_tokens;
        let mut result: Vec<Piece> = Vec::with_capacity(pieces.len());

        for piece in pieces {
            if let Some(last) = result.last_mut() {
                let mergeable = !piece.oversized
                    && !last.oversized
                    && last.tokens + piece.tokens <= max
                    && (piece.tokens < min || last.tokens < min);
                if mergeable {
                    last.absorb(piece);
                    continue;
                }
            }
            result.push(piece);
        }

        result
    }
}

impl Chunker for MarkdownChunker {
    fn build(&self, document: &Document) -> Result<BuiltDocument> {
        ensure_text(document)?;

        let parsed = parse_frontmatter(&document.content);
        let mut warnings = Vec::new();
        if let Some(warning) = parsed.warning {
            tracing::warn!("{}: {}", document.id, warning);
            warnings.push(warning);
        }

        let frontmatter = parsed.fields;
        let document_tags = frontmatter_tags(&frontmatter);
        let created_at = frontmatter_created(&frontmatter).unwrap_or(document.modified_at);

        let sections = parse_sections(parsed.body);
        let mut first_chunk: Vec<Option<ChunkId>> = vec![None; sections.len()];
        let mut chunks: Vec<Chunk> = Vec::new();

        for (idx, section) in sections.iter().enumerate() {
            let units = self.split_units(&section.body);
            if units.is_empty() {
                continue;
            }

            // 가장 가까운, 내용이 있는 조상 섹션의 첫 청크
            let mut parent_id = None;
            let mut ancestor = section.parent;
            while let Some(a) = ancestor {
                if let Some(id) = &first_chunk[a] {
                    parent_id = Some(id.clone());
                    break;
                }
                ancestor = sections[a].parent;
            }

            for piece in self.accumulate(units) {
                let ordinal = chunks.len();
                let id = chunk_id(&document.id, ordinal);
                let token_count = count_tokens(&piece.text);

                let size_violation = piece.oversized.then_some(ChunkSizeViolation {
                    token_count,
                    max_tokens: self.config.max_tokens,
                });
                if let Some(violation) = &size_violation {
                    let warning = format!(
                        "Oversized atomic block kept whole in section {:?} ({} > {} tokens)",
                        section.title.as_deref().unwrap_or("(preamble)"),
                        violation.token_count,
                        violation.max_tokens
                    );
                    tracing::debug!("{}: {}", document.id, warning);
                    warnings.push(warning);
                }

                let mut tags = document_tags.clone();
                tags.extend(inline_tags(&piece.text));

                if first_chunk[idx].is_none() {
                    first_chunk[idx] = Some(id.clone());
                }

                chunks.push(Chunk {
                    id,
                    document_id: document.id.clone(),
                    ordinal,
                    checksum: sha256_hex(piece.text.as_bytes()),
                    text: piece.text,
                    token_count,
                    section_title: section.title.clone(),
                    section_hierarchy: section.hierarchy.clone(),
                    heading_level: section.level,
                    parent_id: parent_id.clone(),
                    prev_id: None,
                    next_id: None,
                    tags,
                    frontmatter: frontmatter.clone(),
                    created_at,
                    modified_at: document.modified_at,
                    size_violation,
                });
            }
        }

        // 문서 순서 기준 형제 링크
        let ids: Vec<ChunkId> = chunks.iter().map(|c| c.id.clone()).collect();
        for (i, chunk) in chunks.iter_mut().enumerate() {
            chunk.prev_id = i.checked_sub(1).map(|p| ids[p].clone());
            chunk.next_id = ids.get(i + 1).cloned();
        }

        tracing::debug!(
            "Built {} chunks for {} ({} warnings)",
            chunks.len(),
            document.id,
            warnings.len()
        );

        Ok(BuiltDocument {
            document_id: document.id.clone(),
            chunks,
            frontmatter,
            warnings,
        })
    }

    fn name(&self) -> &'static str {
        "MarkdownChunker"
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 텍스트 문서인지 확인 (NUL 바이트, 과도한 제어 문자 거부)
fn ensure_text(document: &Document) -> Result<()> {
    if document.content.contains('\0') {
        return Err(RagError::DocumentFormat {
            path: document.path.clone(),
            reason: "contains NUL bytes (binary content)".to_string(),
        });
    }

    let total = document.content.chars().count();
    if total == 0 {
        return Ok(());
    }

    let control = document
        .content
        .chars()
        .filter(|c| c.is_control() && !matches!(c, '\n' | '\r' | '\t' | '\u{c}'))
        .count();

    if control * 10 > total {
        return Err(RagError::DocumentFormat {
            path: document.path.clone(),
            reason: format!("{} of {} characters are control characters", control, total),
        });
    }

    Ok(())
}

/// 본문 인라인 `#태그` 추출 (코드 블록 제외, 숫자만으로 된 태그 제외)
fn inline_tags(text: &str) -> BTreeSet<String> {
    let mut tags = BTreeSet::new();
    let mut fence: Option<&'static str> = None;

    for line in text.lines() {
        match (fence, fence_marker(line)) {
            (None, Some(marker)) => {
                fence = Some(marker);
                continue;
            }
            (Some(open), Some(marker)) if open == marker => {
                fence = None;
                continue;
            }
            (Some(_), _) => continue,
            _ => {}
        }

        for caps in hashtag_re().captures_iter(line) {
            let Some(raw) = caps.get(1) else { continue };
            if !raw.as_str().chars().any(char::is_alphabetic) {
                continue;
            }
            tags.extend(normalize_tag(raw.as_str()));
        }
    }

    tags
}

/// frontmatter `created` 값이 있으면 생성 시각으로 사용
fn frontmatter_created(frontmatter: &Frontmatter) -> Option<DateTime<Utc>> {
    match frontmatter.get("created")? {
        FrontmatterValue::DateTime(dt) => Some(*dt),
        FrontmatterValue::Date(d) => d.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc()),
        _ => None,
    }
}

// ============================================================================
// Factory Functions
// ============================================================================

/// Markdown 청커 생성 (설정 지정)
pub fn markdown_chunker(config: ChunkConfig) -> Box<dyn Chunker> {
    Box::new(MarkdownChunker::new(config))
}

// ============================================================================
// Tests
// ============================================================================
