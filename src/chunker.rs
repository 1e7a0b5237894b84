//! C1: turns a file's bytes into an ordered list of `Chunk`s with stable
//! identity, size bounds, and metadata.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

use crate::ast::{self, AstSpan};

pub const MIN_CHUNK_CHARS: usize = 100;
pub const MAX_CHUNK_CHARS: usize = 1000;
pub const CHUNK_OVERLAP_CHARS: usize = 100;
const GENERIC_WINDOW_LINES: usize = 50;
const GENERIC_WINDOW_OVERLAP: usize = 5;

const COMPLEXITY_KEYWORDS: &[&str] = &["if", "for", "while", "match", "case", "catch", "&&", "||", "?"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Function,
    Class,
    Method,
    Interface,
    Type,
    Enum,
    Namespace,
    Decorator,
    Constructor,
    Property,
    Variable,
    Import,
    Comment,
    Module,
    Section,
    CodeBlock,
    Paragraph,
    List,
    Table,
    Blockquote,
    Generic,
}

impl ChunkType {
    fn from_ast_label(label: &str) -> ChunkType {
        match label {
            "function" => ChunkType::Function,
            "class" => ChunkType::Class,
            "method" => ChunkType::Method,
            "interface" => ChunkType::Interface,
            "enum" => ChunkType::Enum,
            "module" => ChunkType::Module,
            "import" => ChunkType::Import,
            _ => ChunkType::Generic,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkType::Function => "function",
            ChunkType::Class => "class",
            ChunkType::Method => "method",
            ChunkType::Interface => "interface",
            ChunkType::Type => "type",
            ChunkType::Enum => "enum",
            ChunkType::Namespace => "namespace",
            ChunkType::Decorator => "decorator",
            ChunkType::Constructor => "constructor",
            ChunkType::Property => "property",
            ChunkType::Variable => "variable",
            ChunkType::Import => "import",
            ChunkType::Comment => "comment",
            ChunkType::Module => "module",
            ChunkType::Section => "section",
            ChunkType::CodeBlock => "code_block",
            ChunkType::Paragraph => "paragraph",
            ChunkType::List => "list",
            ChunkType::Table => "table",
            ChunkType::Blockquote => "blockquote",
            ChunkType::Generic => "generic",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMetadata {
    pub file_size: u64,
    pub last_modified: u64,
    pub extension: String,
    pub relative_path: String,
    pub is_test: bool,
    pub complexity: u32,
    pub dependencies: Vec<String>,
    pub exports: Vec<String>,
    pub imports: Vec<String>,
    pub file_kind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub id: String,
    pub content: String,
    pub file_path: String,
    pub language: String,
    pub start_line: u32,
    pub end_line: u32,
    pub chunk_type: ChunkType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_name: Option<String>,
    pub content_hash: String,
    pub metadata: ChunkMetadata,
}

/// Pure function of (filePath, startLine, endLine, chunkType) per I1.
/// Uses SHA-256 as the stable 128-bit mix (truncated to 16 bytes) and
/// shapes the result as a UUID string via the `uuid` crate's builder so
/// downstream consumers can treat chunk ids as ordinary UUIDs — this is
/// not a cryptographic UUIDv5 name-based hash, only UUID-*shaped*.
pub fn chunk_id(file_path: &str, start_line: u32, end_line: u32, chunk_type: ChunkType) -> String {
    let key = format!("{file_path}:{start_line}:{end_line}:{}", chunk_type.as_str());
    let digest = Sha256::digest(key.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    uuid::Builder::from_random_bytes(bytes).into_uuid().to_string()
}

fn content_hash(content: &str) -> String {
    format!("{:x}", Sha256::digest(content.as_bytes()))
}

fn is_test_path(rel_path: &str) -> bool {
    let lower = rel_path.to_ascii_lowercase();
    lower.contains("tests/") || lower.contains("/test/") || lower.contains("_test.") || lower.contains(".test.") || lower.contains("spec.")
}

fn file_kind(rel_path: &str, language: &str) -> &'static str {
    let lower = rel_path.to_ascii_lowercase();
    if language == "markdown" || lower.contains("readme") || lower.contains("docs/") {
        "docs"
    } else {
        "code"
    }
}

fn complexity_of(text: &str) -> u32 {
    let mut count = 0u32;
    for kw in COMPLEXITY_KEYWORDS {
        count += text.matches(kw).count() as u32;
    }
    1 + count
}

fn extract_deps(text: &str, language: &str) -> Vec<String> {
    let re = match language {
        "rust" => regex::Regex::new(r"use\s+([A-Za-z0-9_:]+)").unwrap(),
        "typescript" | "tsx" | "javascript" | "jsx" => regex::Regex::new(r#"from\s+['"]([^'"]+)['"]"#).unwrap(),
        "python" => regex::Regex::new(r"(?:import|from)\s+([A-Za-z0-9_.]+)").unwrap(),
        _ => return vec![],
    };
    let mut out: Vec<String> = re.captures_iter(text).filter_map(|c| c.get(1).map(|m| m.as_str().to_string())).collect();
    out.sort();
    out.dedup();
    out
}

struct FileContext<'a> {
    file_path: &'a str,
    language: String,
    rel_path: String,
    file_size: u64,
    last_modified: u64,
    extension: String,
}

fn make_metadata(ctx: &FileContext, content: &str) -> ChunkMetadata {
    ChunkMetadata {
        file_size: ctx.file_size,
        last_modified: ctx.last_modified,
        extension: ctx.extension.clone(),
        relative_path: ctx.rel_path.clone(),
        is_test: is_test_path(&ctx.rel_path),
        complexity: complexity_of(content),
        dependencies: extract_deps(content, &ctx.language),
        exports: vec![],
        imports: extract_deps(content, &ctx.language),
        file_kind: file_kind(&ctx.rel_path, &ctx.language).to_string(),
    }
}

/// 1-based inclusive line numbers for a byte offset range, counting
/// newlines in the prefix (per the chunker's deterministic line-range rule).
fn line_range_for_bytes(source: &str, start_byte: usize, end_byte: usize) -> (u32, u32) {
    let start_line = 1 + source.as_bytes()[..start_byte].iter().filter(|&&b| b == b'\n').count() as u32;
    let end_line = 1 + source.as_bytes()[..end_byte.min(source.len())].iter().filter(|&&b| b == b'\n').count() as u32;
    (start_line, end_line)
}

fn finalize_chunk(
    ctx: &FileContext,
    content: &str,
    start_line: u32,
    end_line: u32,
    chunk_type: ChunkType,
    name: Option<String>,
) -> Option<Chunk> {
    let content = content.to_string();
    if content.chars().count() < MIN_CHUNK_CHARS {
        return None;
    }
    let id = chunk_id(ctx.file_path, start_line, end_line, chunk_type);
    let metadata = make_metadata(ctx, &content);
    let (function_name, class_name) = match chunk_type {
        ChunkType::Function | ChunkType::Method => (name.clone(), None),
        ChunkType::Class | ChunkType::Interface => (None, name.clone()),
        _ => (None, None),
    };
    Some(Chunk {
        id,
        content_hash: content_hash(&content),
        content,
        file_path: ctx.file_path.to_string(),
        language: ctx.language.clone(),
        start_line,
        end_line,
        chunk_type,
        function_name,
        class_name,
        module_name: None,
        metadata,
    })
}

/// Size policy: split any over-MAX content into overlapping windows,
/// drop anything under MIN, preserving I1 by deriving each window's id from
/// its own line range.
fn apply_size_policy(ctx: &FileContext, content: &str, start_line: u32, end_line: u32, chunk_type: ChunkType, name: Option<String>) -> Vec<Chunk> {
    let chars: Vec<char> = content.chars().collect();
    if chars.len() <= MAX_CHUNK_CHARS {
        return finalize_chunk(ctx, content, start_line, end_line, chunk_type, name).into_iter().collect();
    }

    let step = MAX_CHUNK_CHARS - CHUNK_OVERLAP_CHARS;
    let mut out = Vec::new();
    let mut offset = 0usize;
    while offset < chars.len() {
        let end = (offset + MAX_CHUNK_CHARS).min(chars.len());
        let window: String = chars[offset..end].iter().collect();
        if window.chars().count() >= MIN_CHUNK_CHARS {
            let prefix: String = chars[..offset].iter().collect();
            let (ws, _) = line_range_for_bytes(content, prefix.len(), prefix.len());
            let window_start_line = start_line + ws - 1;
            let newlines_in_window = window.matches('\n').count() as u32;
            let window_end_line = window_start_line + newlines_in_window;
            if let Some(chunk) = finalize_chunk(ctx, &window, window_start_line, window_end_line, chunk_type, name.clone()) {
                out.push(chunk);
            }
        }
        if end == chars.len() {
            break;
        }
        offset += step;
    }
    out
}

fn ast_chunks(ctx: &FileContext, source: &str, spans: &[AstSpan]) -> Vec<Chunk> {
    let mut out = Vec::new();
    for span in spans {
        let text = &source[span.start_byte..span.end_byte];
        let chunk_type = ChunkType::from_ast_label(span.chunk_type);
        out.extend(apply_size_policy(ctx, text, span.start_line, span.end_line, chunk_type, span.name.clone()));
    }
    out
}

/// Generic line-window fallback: 50 lines, 5-line overlap, still
/// subject to the size policy.
fn generic_line_window_chunks(ctx: &FileContext, source: &str) -> Vec<Chunk> {
    let lines: Vec<&str> = source.lines().collect();
    if lines.is_empty() {
        return vec![];
    }
    let step = GENERIC_WINDOW_LINES - GENERIC_WINDOW_OVERLAP;
    let mut out = Vec::new();
    let mut start = 0usize;
    while start < lines.len() {
        let end = (start + GENERIC_WINDOW_LINES).min(lines.len());
        let text = lines[start..end].join("\n");
        out.extend(apply_size_policy(ctx, &text, (start + 1) as u32, end as u32, ChunkType::Generic, None));
        if end == lines.len() {
            break;
        }
        start += step;
    }
    out
}

/// `- `/`* `/`+ ` bullets and `1. `/`1) ` ordered markers.
fn is_list_item(t: &str) -> bool {
    if t.starts_with("- ") || t.starts_with("* ") || t.starts_with("+ ") {
        return true;
    }
    let digits = t.chars().take_while(|c| c.is_ascii_digit()).count();
    digits > 0 && (t[digits..].starts_with(". ") || t[digits..].starts_with(") "))
}

/// A pipe-delimited row, including a `|---|---|` separator row.
fn is_table_row(t: &str) -> bool {
    t.contains('|') && (t.starts_with('|') || t.contains(" | ") || t.ends_with('|'))
}

/// An underline-only line (`===` or `---`) marking a Setext heading.
fn is_setext_underline(line: &str) -> bool {
    let t = line.trim();
    !t.is_empty() && (t.chars().all(|c| c == '=') || t.chars().all(|c| c == '-'))
}

fn block_kind(t: &str) -> ChunkType {
    if t.starts_with('>') {
        ChunkType::Blockquote
    } else if is_list_item(t) {
        ChunkType::List
    } else if is_table_row(t) {
        ChunkType::Table
    } else {
        ChunkType::Paragraph
    }
}

/// Structural Markdown chunking. Boundaries are ATX/Setext headings, fenced
/// code blocks, and runs of same-kind lines (paragraph, list, table,
/// blockquote); a kind change or blank line ends the current block.
fn markdown_chunks(ctx: &FileContext, source: &str) -> Vec<Chunk> {
    let lines: Vec<&str> = source.lines().collect();
    let mut out = Vec::new();
    let mut i = 0usize;

    while i < lines.len() {
        let t = lines[i].trim_start();

        if t.trim().is_empty() {
            i += 1;
            continue;
        }

        if t.starts_with("```") || t.starts_with("~~~") {
            let start = i;
            i += 1;
            while i < lines.len() {
                let nt = lines[i].trim_start();
                i += 1;
                if nt.starts_with("```") || nt.starts_with("~~~") {
                    break;
                }
            }
            let text = lines[start..i].join("\n");
            out.extend(apply_size_policy(ctx, &text, (start + 1) as u32, i as u32, ChunkType::CodeBlock, None));
            continue;
        }

        if t.starts_with('#') {
            let text = lines[i];
            out.extend(apply_size_policy(ctx, text, (i + 1) as u32, (i + 1) as u32, ChunkType::Section, None));
            i += 1;
            continue;
        }

        if i + 1 < lines.len() && is_setext_underline(lines[i + 1]) {
            let text = lines[i..i + 2].join("\n");
            out.extend(apply_size_policy(ctx, &text, (i + 1) as u32, (i + 2) as u32, ChunkType::Section, None));
            i += 2;
            continue;
        }

        let kind = block_kind(t);
        let start = i;
        i += 1;
        while i < lines.len() {
            let nt = lines[i].trim_start();
            if nt.trim().is_empty() || nt.starts_with("```") || nt.starts_with("~~~") || nt.starts_with('#') || block_kind(nt) != kind {
                break;
            }
            if i + 1 < lines.len() && is_setext_underline(lines[i + 1]) {
                break;
            }
            i += 1;
        }
        let text = lines[start..i].join("\n");
        out.extend(apply_size_policy(ctx, &text, (start + 1) as u32, i as u32, kind, None));
    }

    if out.is_empty() {
        return generic_line_window_chunks(ctx, source);
    }
    out
}

/// Chunk a single file. Never fails: AST or unsupported-language cases fall
/// back to generic chunking, matching the chunker's "never throws" contract.
pub fn chunk_file(repo_root: &Path, abs_path: &Path, source: &str, file_size: u64, last_modified: u64) -> Vec<Chunk> {
    let rel_path = abs_path.strip_prefix(repo_root).unwrap_or(abs_path).to_string_lossy().replace('\\', "/");
    let extension = abs_path.extension().and_then(|e| e.to_str()).unwrap_or("").to_string();
    let language = ast::language_for_path(abs_path);

    let ctx = FileContext {
        file_path: &rel_path,
        language: language.clone(),
        rel_path: rel_path.clone(),
        file_size,
        last_modified,
        extension,
    };

    if language == "markdown" {
        return markdown_chunks(&ctx, source);
    }

    let spans = ast::extract_spans(abs_path, source);
    if spans.is_empty() {
        return generic_line_window_chunks(&ctx, source);
    }
    let chunks = ast_chunks(&ctx, source, &spans);
    if chunks.is_empty() {
        return generic_line_window_chunks(&ctx, source);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn long_fn(name: &str, body_lines: usize) -> String {
        let mut s = format!("fn {name}() {{\n");
        for i in 0..body_lines {
            s.push_str(&format!("    let x{i} = {i};\n"));
        }
        s.push_str("}\n");
        s
    }

    #[test]
    fn chunk_id_is_pure_function_of_identity_tuple() {
        let a = chunk_id("src/a.rs", 1, 10, ChunkType::Function);
        let b = chunk_id("src/a.rs", 1, 10, ChunkType::Function);
        assert_eq!(a, b);
        let c = chunk_id("src/a.rs", 1, 11, ChunkType::Function);
        assert_ne!(a, c);
    }

    #[test]
    fn reindexing_unchanged_file_yields_identical_id_set() {
        let root = PathBuf::from("/repo");
        let path = root.join("src/lib.rs");
        let src = long_fn("alpha", 3);
        let c1 = chunk_file(&root, &path, &src, 100, 1);
        let c2 = chunk_file(&root, &path, &src, 100, 1);
        let ids1: Vec<_> = c1.iter().map(|c| c.id.clone()).collect();
        let ids2: Vec<_> = c2.iter().map(|c| c.id.clone()).collect();
        assert_eq!(ids1, ids2);
    }

    #[test]
    fn content_is_bounded_100_to_1000_chars() {
        let root = PathBuf::from("/repo");
        let path = root.join("src/lib.rs");
        let src = long_fn("big", 400);
        let chunks = chunk_file(&root, &path, &src, 100, 1);
        assert!(!chunks.is_empty());
        for c in &chunks {
            let len = c.content.chars().count();
            assert!(len >= MIN_CHUNK_CHARS, "chunk too small: {len}");
            assert!(len <= MAX_CHUNK_CHARS, "chunk too big: {len}");
        }
    }

    #[test]
    fn tiny_file_falls_back_to_generic_and_is_dropped_if_too_short() {
        let root = PathBuf::from("/repo");
        let path = root.join("a.unknownext");
        let chunks = chunk_file(&root, &path, "short", 5, 1);
        assert!(chunks.is_empty());
    }

    #[test]
    fn markdown_splits_on_headings() {
        let root = PathBuf::from("/repo");
        let path = root.join("README.md");
        let body_a = "a".repeat(150);
        let body_b = "b".repeat(150);
        let src = format!("# Title\n{body_a}\n\n## Section\n{body_b}\n");
        let chunks = chunk_file(&root, &path, &src, src.len() as u64, 1);
        assert!(chunks.iter().any(|c| c.metadata.file_kind == "docs"));
    }

    #[test]
    fn markdown_detects_list_table_and_blockquote_blocks() {
        let root = PathBuf::from("/repo");
        let path = root.join("README.md");
        let list = (0..20).map(|i| format!("- item number {i} in the list")).collect::<Vec<_>>().join("\n");
        let table_rows = (0..20).map(|_| "| value | value |".to_string()).collect::<Vec<_>>().join("\n");
        let table = format!("| a | b |\n|---|---|\n{table_rows}");
        let quote = (0..20).map(|i| format!("> quoted line {i} of the blockquote body")).collect::<Vec<_>>().join("\n");
        let src = format!("{list}\n\n{table}\n\n{quote}\n");
        let chunks = chunk_file(&root, &path, &src, src.len() as u64, 1);
        assert!(chunks.iter().any(|c| c.chunk_type == ChunkType::List));
        assert!(chunks.iter().any(|c| c.chunk_type == ChunkType::Table));
        assert!(chunks.iter().any(|c| c.chunk_type == ChunkType::Blockquote));
    }

    #[test]
    fn markdown_detects_setext_heading() {
        let root = PathBuf::from("/repo");
        let path = root.join("README.md");
        let body = "x".repeat(150);
        let src = format!("Title\n=====\n{body}\n");
        let chunks = chunk_file(&root, &path, &src, src.len() as u64, 1);
        assert!(chunks.iter().any(|c| c.chunk_type == ChunkType::Paragraph));
    }
}
