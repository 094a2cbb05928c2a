//! Analysis engines behind traits so the orchestrator stays testable with
//! mock implementations. The bundled implementations are deliberately
//! heuristic — they run offline with no model dependencies.

use regex::Regex;

use crate::models::{Claim, EntityKind, SceneSpan};

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

pub trait SceneSegmenter: Send + Sync {
    fn segment(&self, text: &str) -> Vec<SceneSpan>;
}

pub trait StyleAnalyzer: Send + Sync {
    fn analyze(&self, text: &str) -> ProseStats;
}

pub trait ClaimExtractor: Send + Sync {
    /// Extract claims from `text`, restricted to the byte range
    /// `[start, end)`. Quote offsets in the result are absolute.
    fn extract(&self, text: &str, start: usize, end: usize) -> Vec<ExtractedClaim>;
}

pub trait ContinuityChecker: Send + Sync {
    /// Find contradictions among the active claims of one entity.
    fn conflicts(&self, claims: &[Claim]) -> Vec<FieldConflict>;
}

// ---------------------------------------------------------------------------
// Outputs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ProseStats {
    pub word_count: i64,
    pub sentence_count: i64,
    pub avg_sentence_len: f64,
    pub dialogue_ratio: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedClaim {
    pub entity_name: String,
    pub entity_kind: EntityKind,
    pub field: String,
    pub value: String,
    pub confidence: f64,
    pub quote_start: usize,
    pub quote_end: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldConflict {
    pub field: String,
    pub values: Vec<String>,
}

// ---------------------------------------------------------------------------
// Scene segmentation
// ---------------------------------------------------------------------------

/// Splits on Markdown headings and conventional scene separators
/// (`***`, `* * *`, `---`). A document with no markers is one scene.
pub struct HeuristicSceneSegmenter;

fn is_separator(line: &str) -> bool {
    let t = line.trim();
    matches!(t, "***" | "* * *" | "---" | "- - -" | "#")
        || (t.len() >= 3 && t.chars().all(|c| c == '*' || c == ' '))
            && t.chars().filter(|c| *c == '*').count() >= 3
}

fn heading_text(line: &str) -> Option<String> {
    let t = line.trim_start();
    if t.starts_with('#') {
        let heading = t.trim_start_matches('#').trim();
        if !heading.is_empty() {
            return Some(heading.to_string());
        }
    }
    None
}

impl SceneSegmenter for HeuristicSceneSegmenter {
    fn segment(&self, text: &str) -> Vec<SceneSpan> {
        let mut spans = Vec::new();
        let mut scene_start = 0usize;
        let mut scene_heading: Option<String> = None;
        let mut offset = 0usize;

        let close_scene = |start: usize, end: usize, heading: &Option<String>, spans: &mut Vec<SceneSpan>| {
            if !text[start..end].trim().is_empty() {
                spans.push(SceneSpan {
                    start_offset: start as i64,
                    end_offset: end as i64,
                    heading: heading.clone(),
                });
            }
        };

        for line in text.split_inclusive('\n') {
            let heading = heading_text(line);
            if heading.is_some() || is_separator(line) {
                close_scene(scene_start, offset, &scene_heading, &mut spans);
                scene_start = offset;
                scene_heading = heading;
            }
            offset += line.len();
        }
        close_scene(scene_start, text.len(), &scene_heading, &mut spans);

        spans
    }
}

// ---------------------------------------------------------------------------
// Style metrics
// ---------------------------------------------------------------------------

/// Word/sentence counts plus the share of words spoken in dialogue.
pub struct HeuristicStyleAnalyzer {
    sentence_end: Regex,
    quoted: Regex,
}

impl HeuristicStyleAnalyzer {
    pub fn new() -> Self {
        Self {
            sentence_end: Regex::new(r"[.!?]+(\s|$)").expect("static regex"),
            quoted: Regex::new("\"[^\"]*\"|“[^”]*”").expect("static regex"),
        }
    }
}

impl Default for HeuristicStyleAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl StyleAnalyzer for HeuristicStyleAnalyzer {
    fn analyze(&self, text: &str) -> ProseStats {
        let word_count = text.split_whitespace().count() as i64;
        let mut sentence_count = self.sentence_end.find_iter(text).count() as i64;
        if sentence_count == 0 && word_count > 0 {
            sentence_count = 1;
        }

        let dialogue_words: i64 = self
            .quoted
            .find_iter(text)
            .map(|m| m.as_str().split_whitespace().count() as i64)
            .sum();

        let avg_sentence_len = if sentence_count > 0 {
            word_count as f64 / sentence_count as f64
        } else {
            0.0
        };
        let dialogue_ratio = if word_count > 0 {
            (dialogue_words as f64 / word_count as f64).min(1.0)
        } else {
            0.0
        };

        ProseStats {
            word_count,
            sentence_count,
            avg_sentence_len,
            dialogue_ratio,
        }
    }
}

// ---------------------------------------------------------------------------
// Claim extraction
// ---------------------------------------------------------------------------

/// Pattern-based extraction of `entity field value` assertions:
/// possessive attributes ("Mara's eyes were green"), ages
/// ("Mara was 30 years old"), and residences ("Mara lives in Brindle").
pub struct PatternClaimExtractor {
    attribute: Regex,
    age: Regex,
    residence: Regex,
}

impl PatternClaimExtractor {
    pub fn new() -> Self {
        Self {
            attribute: Regex::new(
                r"([A-Z][a-zA-Z]+)'s (eyes|hair|voice|beard|accent) (?:was|were|is|are) ([a-z]+)",
            )
            .expect("static regex"),
            age: Regex::new(r"([A-Z][a-zA-Z]+) (?:was|is) (\d+) years old").expect("static regex"),
            residence: Regex::new(r"([A-Z][a-zA-Z]+) (?:lives|lived) in ([A-Z][a-zA-Z]+)")
                .expect("static regex"),
        }
    }
}

impl Default for PatternClaimExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl ClaimExtractor for PatternClaimExtractor {
    fn extract(&self, text: &str, start: usize, end: usize) -> Vec<ExtractedClaim> {
        let mut start = start.min(text.len());
        let mut end = end.min(text.len());
        while start > 0 && !text.is_char_boundary(start) {
            start -= 1;
        }
        while end < text.len() && !text.is_char_boundary(end) {
            end += 1;
        }
        let window = &text[start..end];

        let mut claims = Vec::new();

        for caps in self.attribute.captures_iter(window) {
            let m = caps.get(0).expect("whole match");
            claims.push(ExtractedClaim {
                entity_name: caps[1].to_string(),
                entity_kind: EntityKind::Character,
                field: caps[2].to_string(),
                value: caps[3].to_string(),
                confidence: 0.6,
                quote_start: start + m.start(),
                quote_end: start + m.end(),
            });
        }
        for caps in self.age.captures_iter(window) {
            let m = caps.get(0).expect("whole match");
            claims.push(ExtractedClaim {
                entity_name: caps[1].to_string(),
                entity_kind: EntityKind::Character,
                field: "age".into(),
                value: caps[2].to_string(),
                confidence: 0.6,
                quote_start: start + m.start(),
                quote_end: start + m.end(),
            });
        }
        for caps in self.residence.captures_iter(window) {
            let m = caps.get(0).expect("whole match");
            claims.push(ExtractedClaim {
                entity_name: caps[1].to_string(),
                entity_kind: EntityKind::Character,
                field: "residence".into(),
                value: caps[2].to_string(),
                confidence: 0.6,
                quote_start: start + m.start(),
                quote_end: start + m.end(),
            });
        }

        claims
    }
}

// ---------------------------------------------------------------------------
// Continuity checking
// ---------------------------------------------------------------------------

/// Flags any field whose active claims assert more than one distinct value.
pub struct ClaimConflictChecker;

impl ContinuityChecker for ClaimConflictChecker {
    fn conflicts(&self, claims: &[Claim]) -> Vec<FieldConflict> {
        use std::collections::BTreeMap;

        let mut by_field: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for claim in claims {
            let values = by_field.entry(claim.field.as_str()).or_default();
            if !values.contains(&claim.value.as_str()) {
                values.push(claim.value.as_str());
            }
        }

        by_field
            .into_iter()
            .filter(|(_, values)| values.len() > 1)
            .map(|(field, values)| FieldConflict {
                field: field.to_string(),
                values: values.into_iter().map(String::from).collect(),
            })
            .collect()
    }
}
