//! QA item model: the unit of generated training data.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// A single question/answer training item, optionally with chain-of-thought
/// reasoning and a curation score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QaItem {
    /// Position within its document, 1-based and contiguous.
    pub id: u32,
    pub question: String,
    pub answer: String,
    /// Chain-of-thought reasoning, present for cot-type generation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Quality score assigned by curation, in [0, 10].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f64>,
}

impl QaItem {
    pub fn new(id: u32, question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            id,
            question: question.into(),
            answer: answer.into(),
            reasoning: None,
            quality_score: None,
        }
    }

    /// Case- and whitespace-insensitive question key used for deduplication.
    pub fn normalized_question(&self) -> String {
        self.question
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Removes duplicate questions, keeping the first occurrence, then renumbers
/// the survivors contiguously from 1.
pub fn dedup_and_renumber(items: Vec<QaItem>) -> Vec<QaItem> {
    let mut seen = HashSet::new();
    let mut out: Vec<QaItem> = items
        .into_iter()
        .filter(|item| seen.insert(item.normalized_question()))
        .collect();
    for (i, item) in out.iter_mut().enumerate() {
        item.id = (i + 1) as u32;
    }
    out
}

/// The on-disk shape of a generated (or curated) artifact.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GeneratedDocument {
    /// Document summary produced alongside generation, when available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default)]
    pub items: Vec<QaItem>,
}

impl GeneratedDocument {
    /// Parses an artifact, accepting both the document object shape and a
    /// bare item array (older artifacts).
    pub fn from_json(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        if value.is_array() {
            let items: Vec<QaItem> = serde_json::from_value(value)?;
            Ok(Self {
                summary: None,
                items,
            })
        } else {
            serde_json::from_value(value)
        }
    }
}
