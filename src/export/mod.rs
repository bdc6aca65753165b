//! Training-data export formats.
//!
//! Four formats share one lossless field mapping: question, answer and
//! optional reasoning survive an encode/decode round trip in every format.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::qa::QaItem;

/// System prompt embedded in conversation-style formats.
const SYSTEM_PROMPT: &str =
    "You are a helpful assistant that provides accurate and informative answers.";

/// The supported export formats. Closed set; unknown names are rejected at
/// submission time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// One item object per line.
    Jsonl,
    /// Alpaca instruction/input/output records, one per line.
    Alpaca,
    /// OpenAI fine-tuning `messages` records, one per line.
    Ft,
    /// ChatML text blocks.
    Chatml,
}

impl ExportFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "jsonl" => Some(ExportFormat::Jsonl),
            "alpaca" => Some(ExportFormat::Alpaca),
            "ft" => Some(ExportFormat::Ft),
            "chatml" => Some(ExportFormat::Chatml),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Jsonl => "jsonl",
            ExportFormat::Alpaca => "alpaca",
            ExportFormat::Ft => "ft",
            ExportFormat::Chatml => "chatml",
        }
    }

    /// File extension of the exported artifact.
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Chatml => "txt",
            _ => "jsonl",
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Unknown export format: {0}")]
    UnknownFormat(String),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Malformed {format} payload: {reason}")]
    Malformed { format: ExportFormat, reason: String },

    #[error("Dataset sink error: {0}")]
    Sink(String),
}

/// Encodes items into the textual payload of the given format.
pub fn encode(items: &[QaItem], format: ExportFormat) -> Result<String, ExportError> {
    let mut out = String::new();
    for item in items {
        match format {
            ExportFormat::Jsonl => {
                out.push_str(&serde_json::to_string(item)?);
                out.push('\n');
            }
            ExportFormat::Alpaca => {
                let record = json!({
                    "instruction": item.question,
                    "input": item.reasoning.as_deref().unwrap_or(""),
                    "output": item.answer,
                });
                out.push_str(&serde_json::to_string(&record)?);
                out.push('\n');
            }
            ExportFormat::Ft => {
                let mut record = json!({
                    "messages": [
                        {"role": "system", "content": SYSTEM_PROMPT},
                        {"role": "user", "content": item.question},
                        {"role": "assistant", "content": item.answer},
                    ]
                });
                if let Some(reasoning) = &item.reasoning {
                    record["reasoning"] = json!(reasoning);
                }
                out.push_str(&serde_json::to_string(&record)?);
                out.push('\n');
            }
            ExportFormat::Chatml => {
                out.push_str(&format!(
                    "<|im_start|>user\n{}<|im_end|>\n",
                    item.question
                ));
                if let Some(reasoning) = &item.reasoning {
                    out.push_str(&format!(
                        "<|im_start|>reasoning\n{reasoning}<|im_end|>\n"
                    ));
                }
                out.push_str(&format!(
                    "<|im_start|>assistant\n{}<|im_end|>\n",
                    item.answer
                ));
            }
        }
    }
    Ok(out)
}

/// Decodes a payload back into items. Inverse of [`encode`] up to ids and
/// scores for the non-jsonl formats.
pub fn decode(payload: &str, format: ExportFormat) -> Result<Vec<QaItem>, ExportError> {
    match format {
        ExportFormat::Jsonl => payload
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(ExportError::from))
            .collect(),
        ExportFormat::Alpaca => {
            let mut items = Vec::new();
            for line in payload.lines().filter(|l| !l.trim().is_empty()) {
                let record: serde_json::Value = serde_json::from_str(line)?;
                let mut item = QaItem::new(
                    (items.len() + 1) as u32,
                    field(&record, "instruction", format)?,
                    field(&record, "output", format)?,
                );
                let input = field(&record, "input", format)?;
                if !input.is_empty() {
                    item.reasoning = Some(input);
                }
                items.push(item);
            }
            Ok(items)
        }
        ExportFormat::Ft => {
            let mut items = Vec::new();
            for line in payload.lines().filter(|l| !l.trim().is_empty()) {
                let record: serde_json::Value = serde_json::from_str(line)?;
                let messages = record["messages"].as_array().ok_or_else(|| {
                    ExportError::Malformed {
                        format,
                        reason: "missing messages array".to_string(),
                    }
                })?;
                let content_of = |role: &str| -> Option<String> {
                    messages
                        .iter()
                        .find(|m| m["role"] == role)
                        .and_then(|m| m["content"].as_str())
                        .map(String::from)
                };
                let question = content_of("user").ok_or_else(|| ExportError::Malformed {
                    format,
                    reason: "missing user message".to_string(),
                })?;
                let answer = content_of("assistant").ok_or_else(|| ExportError::Malformed {
                    format,
                    reason: "missing assistant message".to_string(),
                })?;
                let mut item = QaItem::new((items.len() + 1) as u32, question, answer);
                item.reasoning = record["reasoning"].as_str().map(String::from);
                items.push(item);
            }
            Ok(items)
        }
        ExportFormat::Chatml => decode_chatml(payload),
    }
}

fn field(
    record: &serde_json::Value,
    key: &str,
    format: ExportFormat,
) -> Result<String, ExportError> {
    record[key]
        .as_str()
        .map(String::from)
        .ok_or_else(|| ExportError::Malformed {
            format,
            reason: format!("missing field: {key}"),
        })
}

fn decode_chatml(payload: &str) -> Result<Vec<QaItem>, ExportError> {
    let mut items: Vec<QaItem> = Vec::new();
    let mut rest = payload;

    while let Some(start) = rest.find("<|im_start|>") {
        let block = &rest[start + "<|im_start|>".len()..];
        let end = block.find("<|im_end|>").ok_or_else(|| ExportError::Malformed {
            format: ExportFormat::Chatml,
            reason: "unterminated block".to_string(),
        })?;
        let body = &block[..end];
        let (role, content) = body.split_once('\n').unwrap_or((body, ""));

        match role.trim() {
            // A user block opens a new record.
            "user" => items.push(QaItem::new((items.len() + 1) as u32, content, "")),
            "reasoning" => {
                let item = items.last_mut().ok_or_else(|| ExportError::Malformed {
                    format: ExportFormat::Chatml,
                    reason: "reasoning block before any user block".to_string(),
                })?;
                item.reasoning = Some(content.to_string());
            }
            "assistant" => {
                let item = items.last_mut().ok_or_else(|| ExportError::Malformed {
                    format: ExportFormat::Chatml,
                    reason: "assistant block before any user block".to_string(),
                })?;
                item.answer = content.to_string();
            }
            other => {
                return Err(ExportError::Malformed {
                    format: ExportFormat::Chatml,
                    reason: format!("unknown role: {other}"),
                })
            }
        }
        rest = &block[end + "<|im_end|>".len()..];
    }

    Ok(items)
}

/// Destination for exported datasets other than the local artifact root
/// (e.g. a dataset hub). Injected by the embedding application.
#[async_trait]
pub trait DatasetSink: Send + Sync {
    async fn publish(
        &self,
        name: &str,
        format: ExportFormat,
        payload: &str,
    ) -> Result<(), ExportError>;
}
