//! C10: groups ranked chunks into budget-bounded `CodeReference`s.

use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::chunker::{Chunk, ChunkType};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeReference {
    pub file_path: String,
    pub language: String,
    pub start_line: u32,
    pub end_line: u32,
    pub snippet: String,
    pub score: f32,
    pub estimated_tokens: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TruncationSummary {
    pub omitted_count: usize,
    pub omitted_files: Vec<String>,
    pub omitted_types: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ContextResult {
    pub references: Vec<CodeReference>,
    pub truncated: bool,
    pub summary: Option<TruncationSummary>,
}

#[derive(Debug, Clone, Default)]
pub struct ContextOptions {
    pub max_tokens: usize,
    pub reserved_tokens: usize,
    pub chars_per_token: usize,
    pub group_gap_lines: u32,
    pub boost_types: bool,
    pub languages_cap: Option<usize>,
    pub max_files_per_type: Option<usize>,
    /// Open Question d: accepted as optional caller-supplied signals; when
    /// absent, the corresponding boost is simply never applied (no
    /// external file-state lookup is invented here).
    pub recently_modified_files: HashSet<String>,
    pub open_files: HashSet<String>,
}

fn clamp_score(score: f32) -> f32 {
    score.min(1.0)
}

fn apply_boosts(chunk: &Chunk, score: f32, opts: &ContextOptions) -> f32 {
    let mut s = score;
    if opts.boost_types && matches!(chunk.chunk_type, ChunkType::Function | ChunkType::Class) {
        s += 0.1;
    }
    if opts.recently_modified_files.contains(&chunk.file_path) {
        s += 0.1;
    }
    if opts.open_files.contains(&chunk.file_path) {
        s += 0.15;
    }
    if !chunk.metadata.is_test {
        s += 0.05;
    }
    clamp_score(s)
}

/// Per-language and per-file-per-type caps, applied after boosting and
/// before re-sorting; candidates beyond a cap are dropped, not reordered.
fn apply_diversity_caps(candidates: Vec<(Chunk, f32)>, opts: &ContextOptions) -> Vec<(Chunk, f32)> {
    let mut lang_counts: HashMap<String, usize> = HashMap::new();
    let mut file_type_counts: HashMap<(String, &'static str), usize> = HashMap::new();
    let mut out = Vec::new();

    for (chunk, score) in candidates {
        if let Some(cap) = opts.languages_cap {
            let count = lang_counts.entry(chunk.language.clone()).or_insert(0);
            if *count >= cap {
                continue;
            }
            *count += 1;
        }
        if let Some(cap) = opts.max_files_per_type {
            let key = (chunk.file_path.clone(), chunk.chunk_type.as_str());
            let count = file_type_counts.entry(key).or_insert(0);
            if *count >= cap {
                continue;
            }
            *count += 1;
        }
        out.push((chunk, score));
    }
    out
}

fn estimate_tokens(text: &str, chars_per_token: usize) -> usize {
    let cpt = chars_per_token.max(1);
    (text.chars().count() + cpt - 1) / cpt
}

struct Group {
    file_path: String,
    language: String,
    start_line: u32,
    end_line: u32,
    snippet: String,
    score_sum: f32,
    score_count: usize,
    chunk_type: &'static str,
}

/// Groups consecutive (already score-sorted) candidates sharing a
/// `filePath` whose line gap is within `groupGapLines`, inserting a gap
/// marker when neighbors are more than 3 lines apart. Sharing a file alone
/// isn't enough to merge: two hits from the same file but far apart in
/// rank order are not "consecutive" in the grouping sense, so grouping
/// walks the pre-sorted list in order and only merges true neighbors.
fn group_adjacent(candidates: &[(Chunk, f32)], group_gap_lines: u32) -> Vec<Group> {
    let mut groups: Vec<Group> = Vec::new();
    for (chunk, score) in candidates {
        if let Some(last) = groups.last_mut() {
            if last.file_path == chunk.file_path && chunk.start_line >= last.end_line && chunk.start_line.saturating_sub(last.end_line) <= group_gap_lines {
                let gap = chunk.start_line.saturating_sub(last.end_line);
                if gap > 3 {
                    last.snippet.push_str("\n... (gap) ...\n");
                }
                last.snippet.push_str(&chunk.content);
                last.end_line = last.end_line.max(chunk.end_line);
                last.score_sum += score;
                last.score_count += 1;
                continue;
            }
        }
        groups.push(Group {
            file_path: chunk.file_path.clone(),
            language: chunk.language.clone(),
            start_line: chunk.start_line,
            end_line: chunk.end_line,
            snippet: chunk.content.clone(),
            score_sum: *score,
            score_count: 1,
            chunk_type: chunk.chunk_type.as_str(),
        });
    }
    groups
}

/// Assembles ranked chunks into a token-budgeted reference list. Accepts
/// already-sorted `(chunk, score)` pairs (the hybrid/rerank stage output);
/// applies optional boosts/diversity caps, groups adjacent same-file hits,
/// then accepts references in score order until the budget would be
/// exceeded, producing a truncation summary for anything dropped.
pub fn assemble(candidates: Vec<(Chunk, f32)>, opts: &ContextOptions) -> ContextResult {
    let boosted: Vec<(Chunk, f32)> = candidates.into_iter().map(|(c, s)| { let boosted_score = apply_boosts(&c, s, opts); (c, boosted_score) }).collect();
    let mut diversified = apply_diversity_caps(boosted, opts);
    diversified.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let groups = group_adjacent(&diversified, opts.group_gap_lines);

    let budget = opts.max_tokens.saturating_sub(opts.reserved_tokens);
    let mut used = 0usize;
    let mut references = Vec::new();
    let mut omitted_files = Vec::new();
    let mut omitted_types = Vec::new();
    let mut omitted_count = 0usize;

    for group in groups {
        let tokens = estimate_tokens(&group.snippet, opts.chars_per_token);
        if used + tokens > budget {
            omitted_count += 1;
            omitted_files.push(group.file_path.clone());
            omitted_types.push(group.chunk_type.to_string());
            continue;
        }
        used += tokens;
        references.push(CodeReference {
            file_path: group.file_path,
            language: group.language,
            start_line: group.start_line,
            end_line: group.end_line,
            snippet: group.snippet,
            score: group.score_sum / group.score_count as f32,
            estimated_tokens: tokens,
        });
    }

    let truncated = omitted_count > 0;
    let summary = truncated.then(|| {
        omitted_files.sort();
        omitted_files.dedup();
        omitted_types.sort();
        omitted_types.dedup();
        TruncationSummary {
            omitted_count,
            omitted_files,
            omitted_types,
        }
    });

    ContextResult { references, truncated, summary }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::ChunkMetadata;

    fn chunk(file_path: &str, start: u32, end: u32, content: &str) -> Chunk {
        Chunk {
            id: format!("{file_path}:{start}"),
            content: content.to_string(),
            file_path: file_path.to_string(),
            language: "rust".to_string(),
            start_line: start,
            end_line: end,
            chunk_type: ChunkType::Function,
            function_name: None,
            class_name: None,
            module_name: None,
            content_hash: "h".to_string(),
            metadata: ChunkMetadata {
                file_size: 10,
                last_modified: 1,
                extension: "rs".to_string(),
                relative_path: file_path.to_string(),
                is_test: false,
                complexity: 1,
                dependencies: vec![],
                exports: vec![],
                imports: vec![],
                file_kind: "code".to_string(),
            },
        }
    }

    #[test]
    fn truncates_at_budget_and_reports_summary() {
        let candidates = vec![
            (chunk("a.rs", 1, 5, &"x".repeat(90)), 0.9),
            (chunk("b.rs", 1, 5, &"x".repeat(90)), 0.8),
            (chunk("c.rs", 1, 5, &"x".repeat(90)), 0.7),
        ];
        let opts = ContextOptions {
            max_tokens: 200,
            reserved_tokens: 0,
            chars_per_token: 4,
            group_gap_lines: 10,
            ..Default::default()
        };
        let result = assemble(candidates, &opts);
        assert_eq!(result.references.len(), 2);
        assert!(result.truncated);
        assert_eq!(result.summary.unwrap().omitted_count, 1);
    }

    #[test]
    fn adjacent_same_file_chunks_merge_into_one_reference() {
        let candidates = vec![(chunk("a.rs", 1, 5, &"x".repeat(150)), 0.9), (chunk("a.rs", 6, 10, &"y".repeat(150)), 0.9)];
        let opts = ContextOptions {
            max_tokens: 10_000,
            reserved_tokens: 0,
            chars_per_token: 4,
            group_gap_lines: 10,
            ..Default::default()
        };
        let result = assemble(candidates, &opts);
        assert_eq!(result.references.len(), 1);
        assert_eq!(result.references[0].end_line, 10);
    }

    #[test]
    fn non_test_boost_is_clamped_to_one() {
        let opts = ContextOptions {
            max_tokens: 10_000,
            reserved_tokens: 0,
            chars_per_token: 4,
            group_gap_lines: 10,
            boost_types: true,
            ..Default::default()
        };
        let result = assemble(vec![(chunk("a.rs", 1, 5, &"x".repeat(150)), 0.98)], &opts);
        assert_eq!(result.references[0].score, 1.0);
    }
}
