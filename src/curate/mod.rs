//! LLM-based quality curation.
//!
//! Items are rated in batches; a malformed batch reply degrades to per-item
//! scoring, and an unscorable item conservatively gets a 0 so it can never
//! pass the retention threshold by accident.

use std::sync::Arc;

use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::llm::{GenerationRequest, LlmProvider, Message};
use crate::qa::QaItem;
use crate::utils::json_extraction::extract_json;

const BATCH_RATING_PROMPT: &str = r#"Rate the quality of each question-answer pair below on a scale of 0 to 10, considering accuracy, clarity, and usefulness for training.

Respond with ONLY a JSON array of numbers, one score per pair, in the same order. Example for 3 pairs: [8, 5, 9]

Pairs:
"#;

const SINGLE_RATING_PROMPT: &str = r#"Rate the quality of the question-answer pair below on a scale of 0 to 10, considering accuracy, clarity, and usefulness for training.

Respond with ONLY a single number.

Pair:
"#;

/// The curate stage could not score anything at all.
#[derive(Debug, Error)]
pub enum ScoringError {
    /// Every scoring request failed; there is no signal to filter on, so the
    /// run fails rather than silently dropping or keeping everything.
    #[error("Scoring unavailable: no scoring request produced a response")]
    Unavailable,
}

/// Outcome of a curation run.
#[derive(Debug)]
pub struct CurationOutcome {
    /// Items at or above the threshold, scores filled in.
    pub retained: Vec<QaItem>,
    pub summary: CurationSummary,
}

/// Statistics recorded on the curate job.
#[derive(Debug, Clone, Serialize)]
pub struct CurationSummary {
    pub original_count: usize,
    pub curated_count: usize,
    /// Batches whose reply was unusable and fell back to per-item scoring.
    pub batch_fallbacks: usize,
    /// Items that could not be scored at all and defaulted to 0.
    pub failed_items: usize,
}

/// Scores QA items with an LLM and filters by threshold.
pub struct CurationScorer {
    provider: Arc<dyn LlmProvider>,
    model: String,
    temperature: f64,
    batch_size: usize,
}

impl CurationScorer {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        model: impl Into<String>,
        temperature: f64,
        batch_size: usize,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature,
            batch_size: batch_size.max(1),
        }
    }

    /// Scores every unscored item and retains those with score >= `threshold`
    /// (inclusive). Items arriving with a score keep it and are not re-rated.
    pub async fn score_and_filter(
        &self,
        mut items: Vec<QaItem>,
        threshold: f64,
    ) -> Result<CurationOutcome, ScoringError> {
        let original_count = items.len();
        let unscored: Vec<usize> = items
            .iter()
            .enumerate()
            .filter(|(_, item)| item.quality_score.is_none())
            .map(|(i, _)| i)
            .collect();

        let mut batch_fallbacks = 0usize;
        let mut failed_items = 0usize;
        let mut attempted = false;
        let mut any_response = false;

        for batch in unscored.chunks(self.batch_size) {
            attempted = true;
            let batch_items: Vec<&QaItem> = batch.iter().map(|&i| &items[i]).collect();

            match self.score_batch(&batch_items).await {
                Ok(scores) => {
                    any_response = true;
                    for (&index, score) in batch.iter().zip(scores) {
                        items[index].quality_score = Some(score);
                    }
                }
                Err(got_response) => {
                    any_response |= got_response;
                    batch_fallbacks += 1;
                    debug!(batch_len = batch.len(), "batch scoring failed, rating items individually");
                    for &index in batch {
                        match self.score_single(&items[index]).await {
                            Ok(score) => {
                                any_response = true;
                                items[index].quality_score = Some(score);
                            }
                            Err(got_response) => {
                                any_response |= got_response;
                                failed_items += 1;
                                items[index].quality_score = Some(0.0);
                            }
                        }
                    }
                }
            }
        }

        if attempted && !any_response {
            return Err(ScoringError::Unavailable);
        }

        let retained: Vec<QaItem> = items
            .into_iter()
            .filter(|item| item.quality_score.unwrap_or(0.0) >= threshold)
            .collect();

        let summary = CurationSummary {
            original_count,
            curated_count: retained.len(),
            batch_fallbacks,
            failed_items,
        };
        debug!(
            original = summary.original_count,
            curated = summary.curated_count,
            fallbacks = summary.batch_fallbacks,
            failed = summary.failed_items,
            "curation pass complete"
        );

        Ok(CurationOutcome { retained, summary })
    }

    /// Rates a batch. The `Err` payload reports whether the provider returned
    /// any response at all (a parse failure still counts as a response).
    async fn score_batch(&self, batch: &[&QaItem]) -> Result<Vec<f64>, bool> {
        let mut prompt = String::from(BATCH_RATING_PROMPT);
        for (i, item) in batch.iter().enumerate() {
            prompt.push_str(&format!(
                "{}. Q: {}\n   A: {}\n",
                i + 1,
                item.question,
                item.answer
            ));
        }

        let request = GenerationRequest::new(&self.model, vec![Message::user(prompt)])
            .with_temperature(self.temperature);

        let response = match self.provider.generate(request).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "batch scoring request failed");
                return Err(false);
            }
        };

        let content = response.first_content().ok_or(true)?;
        let value = extract_json(content).ok_or(true)?;
        let array = value.as_array().ok_or(true)?;
        if array.len() != batch.len() {
            warn!(
                expected = batch.len(),
                got = array.len(),
                "batch score count mismatch"
            );
            return Err(true);
        }

        let mut scores = Vec::with_capacity(array.len());
        for v in array {
            let score = v.as_f64().filter(|s| s.is_finite()).ok_or(true)?;
            scores.push(score.clamp(0.0, 10.0));
        }
        Ok(scores)
    }

    /// Rates one item. Same `Err` convention as [`score_batch`](Self::score_batch).
    async fn score_single(&self, item: &QaItem) -> Result<f64, bool> {
        let prompt = format!(
            "{SINGLE_RATING_PROMPT}Q: {}\nA: {}\n",
            item.question, item.answer
        );
        let request = GenerationRequest::new(&self.model, vec![Message::user(prompt)])
            .with_temperature(self.temperature);

        let response = match self.provider.generate(request).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, item_id = item.id, "item scoring request failed");
                return Err(false);
            }
        };

        let content = response.first_content().ok_or(true)?;
        let score = parse_score(content).ok_or(true)?;
        Ok(score.clamp(0.0, 10.0))
    }
}

/// Parses a single numeric score from a reply, tolerating surrounding prose.
fn parse_score(content: &str) -> Option<f64> {
    if let Ok(score) = content.trim().parse::<f64>() {
        return Some(score).filter(|s| s.is_finite());
    }
    let re = Regex::new(r"-?\d+(?:\.\d+)?").ok()?;
    re.find(content)?
        .as_str()
        .parse::<f64>()
        .ok()
        .filter(|s| s.is_finite())
}
