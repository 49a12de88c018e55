//! Entity extraction from normalized user input.
//!
//! Extraction is independent of intent matching: it scans for named
//! references (quoted strings and keyword-anchored tokens), numeric
//! literals, and boolean literals, then resolves overlapping spans by
//! keeping the higher-confidence entity.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::matcher::CONFIDENCE_CAP;

/// What kind of thing an extracted entity refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityKind {
    /// A named step/node/field reference.
    Reference,
    Number,
    Boolean,
}

/// One entity pulled out of the input text.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub kind: EntityKind,
    /// Typed value: string for references, number/bool for literals.
    pub value: Value,
    /// The raw matched text.
    pub raw: String,
    /// Byte span within the normalized input.
    pub span: (usize, usize),
    pub confidence: f64,
}

/// Keywords whose following token is read as a named reference.
const REFERENCE_ANCHORS: [&str; 4] = ["step", "node", "input", "field"];

/// Confidence: match-length ratio plus a bonus when the match sits at the
/// start or end of the utterance (boundary positions carry intent).
fn confidence(span: (usize, usize), input_len: usize) -> f64 {
    let len_ratio = (span.1 - span.0) as f64 / input_len as f64;
    let boundary_bonus = if span.0 == 0 || span.1 == input_len {
        0.15
    } else {
        0.0
    };
    (0.4 + len_ratio * 0.4 + boundary_bonus).min(CONFIDENCE_CAP)
}

/// Extract all entities from normalized input, overlaps already resolved.
#[must_use]
pub fn extract_entities(input: &str) -> Vec<ExtractedEntity> {
    if input.is_empty() {
        return Vec::new();
    }
    let mut found = Vec::new();
    found.extend(quoted_references(input));
    found.extend(anchored_references(input));
    found.extend(literals(input));
    resolve_overlaps(found)
}

fn quoted_references(input: &str) -> Vec<ExtractedEntity> {
    let mut entities = Vec::new();
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'"' || bytes[i] == b'\'' {
            let quote = bytes[i];
            if let Some(rel) = input[i + 1..].find(quote as char) {
                let inner_start = i + 1;
                let inner_end = inner_start + rel;
                if inner_end > inner_start {
                    let span = (i, inner_end + 1);
                    entities.push(ExtractedEntity {
                        kind: EntityKind::Reference,
                        value: json!(&input[inner_start..inner_end]),
                        raw: input[span.0..span.1].to_string(),
                        span,
                        confidence: confidence(span, input.len()),
                    });
                }
                i = inner_end + 1;
                continue;
            }
        }
        i += 1;
    }
    entities
}

/// Tokens with their byte offsets.
fn tokens(input: &str) -> Vec<(usize, &str)> {
    let mut out = Vec::new();
    let mut start = None;
    for (i, ch) in input.char_indices() {
        if ch.is_whitespace() {
            if let Some(s) = start.take() {
                out.push((s, &input[s..i]));
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        out.push((s, &input[s..]));
    }
    out
}

fn anchored_references(input: &str) -> Vec<ExtractedEntity> {
    let toks = tokens(input);
    let mut entities = Vec::new();
    for window in toks.windows(2) {
        let (_, anchor) = window[0];
        let (offset, candidate) = window[1];
        if !REFERENCE_ANCHORS.contains(&anchor) {
            continue;
        }
        // Literals after an anchor are handled by the literal pass.
        if candidate.parse::<f64>().is_ok() || is_boolean(candidate) {
            continue;
        }
        let trimmed = candidate.trim_matches(|c: char| !c.is_ascii_alphanumeric());
        if trimmed.is_empty() {
            continue;
        }
        let span = (offset, offset + candidate.len());
        entities.push(ExtractedEntity {
            kind: EntityKind::Reference,
            value: json!(trimmed),
            raw: candidate.to_string(),
            span,
            confidence: confidence(span, input.len()),
        });
    }
    entities
}

fn is_boolean(token: &str) -> bool {
    matches!(token, "true" | "false" | "yes" | "no" | "on" | "off")
}

fn literals(input: &str) -> Vec<ExtractedEntity> {
    let mut entities = Vec::new();
    for (offset, token) in tokens(input) {
        let cleaned = token.trim_end_matches(['.', ',', '?', '!']);
        let cleaned_span = (offset, offset + cleaned.len());
        if cleaned.is_empty() {
            continue;
        }
        if let Ok(int) = cleaned.parse::<i64>() {
            entities.push(ExtractedEntity {
                kind: EntityKind::Number,
                value: json!(int),
                raw: cleaned.to_string(),
                span: cleaned_span,
                confidence: confidence(cleaned_span, input.len()),
            });
        } else if let Ok(float) = cleaned.parse::<f64>() {
            entities.push(ExtractedEntity {
                kind: EntityKind::Number,
                value: json!(float),
                raw: cleaned.to_string(),
                span: cleaned_span,
                confidence: confidence(cleaned_span, input.len()),
            });
        } else if is_boolean(cleaned) {
            let truthy = matches!(cleaned, "true" | "yes" | "on");
            entities.push(ExtractedEntity {
                kind: EntityKind::Boolean,
                value: json!(truthy),
                raw: cleaned.to_string(),
                span: cleaned_span,
                confidence: confidence(cleaned_span, input.len()),
            });
        }
    }
    entities
}

/// Keep the higher-confidence entity wherever spans overlap.
fn resolve_overlaps(mut entities: Vec<ExtractedEntity>) -> Vec<ExtractedEntity> {
    entities.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let mut kept: Vec<ExtractedEntity> = Vec::with_capacity(entities.len());
    for entity in entities {
        let overlaps = kept
            .iter()
            .any(|k| entity.span.0 < k.span.1 && k.span.0 < entity.span.1);
        if !overlaps {
            kept.push(entity);
        }
    }
    kept.sort_by_key(|e| e.span.0);
    kept
}
