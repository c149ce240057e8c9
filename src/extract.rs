//! Extraction mapping: canonical fields out of heterogeneous markup.
//!
//! Each rule tries its extractors in declared order and stops at the first
//! non-empty normalized value. Fields that stay empty after every extractor
//! are reported as missing rather than failing the whole extraction, so a
//! sparse page still yields a partial record.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::channel::{ChannelError, DocumentChannel, ElementHandle};
use crate::locator::Candidate;

/// Mapping from canonical field name to extracted string value.
///
/// A `BTreeMap` keeps iteration order deterministic, so extracting twice from
/// an unchanged document serialises byte-identically.
pub type ExtractedRecord = BTreeMap<String, String>;

/// One ancestor reported by the container-discovery walk, innermost first.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AncestorStep {
    #[serde(rename = "xpath")]
    pub handle: ElementHandle,
    pub tag: String,
    pub text: String,
    pub child_count: u32,
}

/// One way of deriving a field value from the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Extractor {
    /// Find a label cell by literal text and read the adjacent value cell.
    LabeledCell { labels: Vec<String> },
    /// Text of the first element whose class list contains the token.
    ClassToken { token: String },
    /// Field-specific pattern applied to the page's flattened text. Captures
    /// group 1 when present, the whole match otherwise.
    TextPattern { pattern: String },
    /// Ancestor-scoring container discovery from a known anchor element.
    /// Returns the full text of the best-scoring container.
    AnchorContainer {
        anchor: Candidate,
        expected: Vec<String>,
        max_depth: usize,
        min_score: u32,
    },
}

/// Optional post-processing applied to an extracted value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Normalize {
    /// Collapse surrounding whitespace (always applied anyway; explicit for
    /// rules that need nothing else).
    Trim,
    /// Re-capture through a pattern, keeping group 1 (or the whole match).
    Capture { pattern: String },
}

/// Named recipe for one canonical field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionRule {
    pub field: String,
    pub extractors: Vec<Extractor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalize: Option<Normalize>,
}

impl ExtractionRule {
    pub fn new(field: impl Into<String>, extractors: Vec<Extractor>) -> Self {
        ExtractionRule {
            field: field.into(),
            extractors,
            normalize: None,
        }
    }

    pub fn with_normalize(mut self, normalize: Normalize) -> Self {
        self.normalize = Some(normalize);
        self
    }
}

/// Result of an extraction run: the partial record plus the fields that no
/// extractor could produce.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ExtractionReport {
    pub record: ExtractedRecord,
    pub missing: Vec<String>,
}

impl ExtractionReport {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error("invalid pattern for field '{field}'")]
    Pattern {
        field: String,
        #[source]
        source: regex::Error,
    },
}

/// Count how many of the expected literal substrings appear in a container's
/// text. Pure.
pub fn score_container(text: &str, expected: &[String]) -> u32 {
    expected
        .iter()
        .filter(|needle| text.contains(needle.as_str()))
        .count() as u32
}

/// Pick the best-scoring ancestor, innermost first.
///
/// A strictly higher score replaces the current best, so ties resolve to the
/// innermost container. Walking stops at a container with more than 50
/// children — at that point we are looking at page chrome, not a card.
pub fn select_container<'a>(
    steps: &'a [AncestorStep],
    expected: &[String],
    min_score: u32,
) -> Option<&'a AncestorStep> {
    let mut best: Option<(&AncestorStep, u32)> = None;
    for step in steps {
        if step.child_count > 50 {
            break;
        }
        let score = score_container(&step.text, expected);
        if score < min_score {
            continue;
        }
        match best {
            Some((_, best_score)) if score <= best_score => {}
            _ => best = Some((step, score)),
        }
    }
    best.map(|(step, _)| step)
}

fn capture_first(pattern: &Regex, text: &str) -> Option<String> {
    pattern.captures(text).map(|caps| {
        caps.get(1)
            .or_else(|| caps.get(0))
            .map(|group| group.as_str().to_string())
            .unwrap_or_default()
    })
}

fn normalized(value: String, normalize: Option<&Normalize>, field: &str) -> Result<String, ExtractError> {
    let trimmed = value.trim().to_string();
    match normalize {
        None | Some(Normalize::Trim) => Ok(trimmed),
        Some(Normalize::Capture { pattern }) => {
            let compiled = Regex::new(pattern).map_err(|source| ExtractError::Pattern {
                field: field.to_string(),
                source,
            })?;
            Ok(capture_first(&compiled, &trimmed).unwrap_or_default())
        }
    }
}

/// Run every rule against the document and assemble the record.
///
/// Idempotent over an unchanged document: extractors are pure queries and the
/// record is an ordered map.
pub async fn extract(
    channel: &dyn DocumentChannel,
    rules: &[ExtractionRule],
) -> Result<ExtractionReport, ExtractError> {
    // Flattened text is fetched once and shared by every text-pattern rule.
    let mut body_text: Option<String> = None;
    let mut report = ExtractionReport::default();

    for rule in rules {
        let mut value: Option<String> = None;

        for extractor in &rule.extractors {
            let raw = match extractor {
                Extractor::LabeledCell { labels } => channel.label_value(labels).await?,
                Extractor::ClassToken { token } => channel.class_token_value(token).await?,
                Extractor::TextPattern { pattern } => {
                    if body_text.is_none() {
                        body_text = Some(channel.body_text().await?);
                    }
                    let text = body_text.as_deref().unwrap_or_default();
                    let compiled =
                        Regex::new(pattern).map_err(|source| ExtractError::Pattern {
                            field: rule.field.clone(),
                            source,
                        })?;
                    capture_first(&compiled, text)
                }
                Extractor::AnchorContainer {
                    anchor,
                    expected,
                    max_depth,
                    min_score,
                } => {
                    let steps = channel.anchor_ancestors(anchor, *max_depth).await?;
                    select_container(&steps, expected, *min_score).map(|step| step.text.clone())
                }
            };

            if let Some(raw) = raw {
                let cleaned = normalized(raw, rule.normalize.as_ref(), &rule.field)?;
                if !cleaned.is_empty() {
                    value = Some(cleaned);
                    break;
                }
            }
        }

        match value {
            Some(value) => {
                report.record.insert(rule.field.clone(), value);
            }
            None => report.missing.push(rule.field.clone()),
        }
    }

    Ok(report)
}

fn field_pattern(slot: &'static OnceLock<Regex>, pattern: &'static str) -> &'static Regex {
    slot.get_or_init(|| Regex::new(pattern).expect("field pattern compiles"))
}

/// Regex-derived fields of one result card, from its flattened text. Pure.
pub fn card_fields(text: &str) -> ExtractedRecord {
    static RENT: OnceLock<Regex> = OnceLock::new();
    static LAYOUT: OnceLock<Regex> = OnceLock::new();
    static AREA: OnceLock<Regex> = OnceLock::new();
    static FLOOR: OnceLock<Regex> = OnceLock::new();
    static DEPOSIT: OnceLock<Regex> = OnceLock::new();
    static KEY_MONEY: OnceLock<Regex> = OnceLock::new();

    let mut fields = ExtractedRecord::new();

    if let Some(caps) = field_pattern(&RENT, r"\d+(?:\.\d+)?\s*万円").find(text) {
        fields.insert("rent".to_string(), caps.as_str().to_string());
    }
    if let Some(caps) = field_pattern(&LAYOUT, r"\d+S?[LDK]+|ワンルーム").find(text) {
        fields.insert("layout".to_string(), caps.as_str().to_string());
    }
    if let Some(caps) = field_pattern(&AREA, r"\d+(?:\.\d+)?\s*(?:㎡|m²)").find(text) {
        fields.insert("area".to_string(), caps.as_str().to_string());
    }
    if let Some(caps) = field_pattern(&FLOOR, r"(\d+)階").find(text) {
        fields.insert("floor".to_string(), caps.as_str().to_string());
    }
    if text.contains("募集中") {
        fields.insert("status".to_string(), "募集中".to_string());
    }
    if let Some(caps) = field_pattern(&DEPOSIT, r"敷金[：:\s]*(\d+(?:\.\d+)?)\s*万円").captures(text)
    {
        if let Some(amount) = caps.get(1) {
            fields.insert("deposit".to_string(), format!("{}万円", amount.as_str()));
        }
    }
    if let Some(caps) =
        field_pattern(&KEY_MONEY, r"礼金[：:\s]*(\d+(?:\.\d+)?)\s*万円").captures(text)
    {
        if let Some(amount) = caps.get(1) {
            fields.insert("key_money".to_string(), format!("{}万円", amount.as_str()));
        }
    }

    fields
}
