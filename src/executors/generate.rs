//! Create stage: extracted text to generated QA items.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::chunker::split_text;
use crate::config::GenerationConfig;
use crate::llm::{GenerationRequest, LlmError, LlmProvider, Message};
use crate::paths::{timestamped_name, ArtifactRoot, PathResolver};
use crate::qa::{dedup_and_renumber, GeneratedDocument, QaItem};
use crate::store::Job;
use crate::utils::json_extraction::extract_json;

use super::{StageExecutor, StageFailure, StageOutcome};

const QA_GENERATION_PROMPT: &str = r#"Create {count} question-answer pairs from the text below, for training a language model.

Rules:
1. Questions must be about important facts in the text
2. Answers must be directly supported by the text
3. Respond with ONLY valid JSON: an array of {"question": "...", "answer": "..."} objects

Text:
"#;

const COT_GENERATION_PROMPT: &str = r#"Create {count} question-answer pairs with step-by-step reasoning from the text below, for training a language model.

Rules:
1. Questions must be about important facts in the text
2. Reasoning must walk through the steps that lead to the answer
3. Answers must be directly supported by the text
4. Respond with ONLY valid JSON: an array of {"question": "...", "reasoning": "...", "answer": "..."} objects

Text:
"#;

const SUMMARY_PROMPT: &str =
    "Summarize this document in 2-3 sentences:\n\n";

/// Per-job generation parameters, merged over the configured defaults.
#[derive(Debug, Clone)]
struct CreateParams {
    chunk_size: usize,
    num_pairs: usize,
    temperature: f64,
    max_tokens: Option<u32>,
    qa_type: String,
}

impl CreateParams {
    fn from_defaults(defaults: &GenerationConfig) -> Self {
        Self {
            chunk_size: defaults.chunk_size,
            num_pairs: defaults.num_pairs,
            temperature: defaults.temperature,
            max_tokens: defaults.max_tokens,
            qa_type: defaults.qa_type.clone(),
        }
    }

    /// Overlays job config keys onto the defaults.
    fn merged(defaults: &GenerationConfig, config: &serde_json::Value) -> Self {
        let mut params = Self::from_defaults(defaults);
        if let Some(v) = config.get("chunk_size").and_then(|v| v.as_u64()) {
            params.chunk_size = v as usize;
        }
        if let Some(v) = config.get("num_pairs").and_then(|v| v.as_u64()) {
            params.num_pairs = v as usize;
        }
        if let Some(v) = config.get("temperature").and_then(|v| v.as_f64()) {
            params.temperature = v;
        }
        if let Some(v) = config.get("max_tokens").and_then(|v| v.as_u64()) {
            params.max_tokens = Some(v as u32);
        }
        if let Some(v) = config.get("qa_type").and_then(|v| v.as_str()) {
            params.qa_type = v.to_string();
        }
        params
    }
}

/// Generates QA (or chain-of-thought) items from an extracted text artifact.
pub struct GenerateExecutor {
    resolver: PathResolver,
    provider: Arc<dyn LlmProvider>,
    model: String,
    defaults: GenerationConfig,
}

impl GenerateExecutor {
    pub fn new(
        resolver: PathResolver,
        provider: Arc<dyn LlmProvider>,
        model: impl Into<String>,
        defaults: GenerationConfig,
    ) -> Self {
        Self {
            resolver,
            provider,
            model: model.into(),
            defaults,
        }
    }

    async fn summarize(&self, text: &str, params: &CreateParams) -> Option<String> {
        // A summary is nice-to-have; its failure never fails the job.
        let excerpt: String = text.chars().take(params.chunk_size).collect();
        let request = GenerationRequest::new(
            &self.model,
            vec![Message::user(format!("{SUMMARY_PROMPT}{excerpt}"))],
        )
        .with_temperature(0.3);

        match self.provider.generate(request).await {
            Ok(response) => response.first_content().map(|s| s.trim().to_string()),
            Err(e) => {
                debug!(error = %e, "summary generation failed, continuing without");
                None
            }
        }
    }

    async fn generate_chunk(
        &self,
        chunk: String,
        count: usize,
        params: &CreateParams,
    ) -> Result<Vec<QaItem>, LlmError> {
        let template = if params.qa_type == "cot" {
            COT_GENERATION_PROMPT
        } else {
            QA_GENERATION_PROMPT
        };
        let prompt = format!(
            "{}{}",
            template.replace("{count}", &count.to_string()),
            chunk
        );

        let mut request = GenerationRequest::new(&self.model, vec![Message::user(prompt)])
            .with_temperature(params.temperature);
        if let Some(max_tokens) = params.max_tokens {
            request = request.with_max_tokens(max_tokens);
        }

        let response = self.provider.generate(request).await?;
        let content = response
            .first_content()
            .ok_or_else(|| LlmError::ParseError("empty response".to_string()))?;
        let value = extract_json(content)
            .ok_or_else(|| LlmError::ParseError("no JSON in response".to_string()))?;

        parse_items(value).ok_or_else(|| LlmError::ParseError("unexpected JSON shape".to_string()))
    }
}

#[async_trait]
impl StageExecutor for GenerateExecutor {
    async fn execute(&self, job: &Job) -> Result<StageOutcome, StageFailure> {
        let input = job
            .input_file
            .as_deref()
            .ok_or_else(|| StageFailure::Other("create job has no input".to_string()))?;
        let params = CreateParams::merged(&self.defaults, &job.config);

        let input_path = self.resolver.resolve(input, ArtifactRoot::Output)?;
        let text = tokio::fs::read_to_string(&input_path).await?;

        let chunks = split_text(&text, params.chunk_size);
        if chunks.is_empty() {
            return Err(StageFailure::Other(format!("input artifact {input} is empty")));
        }

        // Spread the requested item count over chunks, remainder to the front.
        let base = params.num_pairs / chunks.len();
        let remainder = params.num_pairs % chunks.len();
        let counts: Vec<usize> = (0..chunks.len())
            .map(|i| (base + usize::from(i < remainder)).max(1))
            .collect();

        let summary = self.summarize(&text, &params).await;

        debug!(job_id = %job.id, chunks = chunks.len(), num_pairs = params.num_pairs, "generating items");

        // Concurrent fan-out; buffered() preserves chunk order in the output.
        let concurrency = self.defaults.concurrency.max(1);
        let results: Vec<Result<Vec<QaItem>, LlmError>> = stream::iter(
            chunks
                .into_iter()
                .zip(counts)
                .map(|(chunk, count)| self.generate_chunk(chunk, count, &params)),
        )
        .buffered(concurrency)
        .collect()
        .await;

        let total_chunks = results.len();
        let mut items = Vec::new();
        let mut failed_chunks = 0usize;
        let mut saw_timeout = false;
        let mut last_error = String::new();
        for result in results {
            match result {
                Ok(chunk_items) => items.extend(chunk_items),
                Err(e) => {
                    failed_chunks += 1;
                    saw_timeout |= matches!(e, LlmError::Timeout(_));
                    last_error = e.to_string();
                    warn!(error = %last_error, "chunk generation failed");
                }
            }
        }

        if items.is_empty() {
            // Nothing usable came back from any chunk.
            return Err(if saw_timeout {
                StageFailure::Timeout(last_error)
            } else {
                StageFailure::Other(format!("generation produced no items: {last_error}"))
            });
        }

        let raw_count = items.len();
        let items = dedup_and_renumber(items);
        let deduplicated = raw_count - items.len();

        let stem = std::path::Path::new(input)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("document");
        let name = timestamped_name(&format!("{stem}_{}", params.qa_type), "json");
        let output_path = self.resolver.resolve(&name, ArtifactRoot::Generated)?;

        let document = GeneratedDocument {
            summary,
            items,
        };
        let payload = serde_json::to_string_pretty(&document)?;
        tokio::fs::write(&output_path, &payload).await?;

        let output_file = self
            .resolver
            .relative_logical(&output_path, ArtifactRoot::Generated);
        info!(
            job_id = %job.id,
            output = %output_file,
            items = document.items.len(),
            failed_chunks,
            "generation complete"
        );

        Ok(StageOutcome {
            output_file,
            stats: serde_json::json!({
                "chunks": total_chunks,
                "failed_chunks": failed_chunks,
                "items": document.items.len(),
                "deduplicated": deduplicated,
                "sha256": crate::utils::checksum::sha256_hex(payload.as_bytes()),
            }),
        })
    }
}

/// Accepts an array of items, or an object wrapping one under common keys.
fn parse_items(value: serde_json::Value) -> Option<Vec<QaItem>> {
    let array = if value.is_array() {
        value
    } else {
        value
            .get("pairs")
            .or_else(|| value.get("items"))
            .or_else(|| value.get("qa_pairs"))
            .cloned()?
    };

    let raw = array.as_array()?;
    let mut items = Vec::with_capacity(raw.len());
    for entry in raw {
        let question = entry.get("question")?.as_str()?.to_string();
        let answer = entry.get("answer")?.as_str()?.to_string();
        let mut item = QaItem::new((items.len() + 1) as u32, question, answer);
        item.reasoning = entry
            .get("reasoning")
            .and_then(|r| r.as_str())
            .map(String::from);
        items.push(item);
    }
    Some(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::GenerationResponse;
    use crate::store::{JobStatus, JobType};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use uuid::Uuid;

    struct ScriptedProvider {
        replies: Mutex<VecDeque<Result<String, ()>>>,
    }

    impl ScriptedProvider {
        fn new(replies: Vec<Result<&str, ()>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into_iter().map(|r| r.map(String::from)).collect()),
            })
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn generate(
            &self,
            _request: GenerationRequest,
        ) -> Result<GenerationResponse, LlmError> {
            let next = self.replies.lock().unwrap().pop_front().unwrap_or(Err(()));
            match next {
                Ok(content) => Ok(serde_json::from_value(serde_json::json!({
                    "choices": [{"message": {"role": "assistant", "content": content}}]
                }))
                .unwrap()),
                Err(()) => Err(LlmError::RequestFailed("scripted failure".to_string())),
            }
        }
    }

    fn job(input: &str, config: serde_json::Value) -> Job {
        let now = chrono::Utc::now();
        Job {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            job_type: JobType::Create,
            status: JobStatus::Running,
            input_file: Some(input.to_string()),
            output_file: None,
            config,
            stats: None,
            error: None,
            created_at: now,
            updated_at: now,
            heartbeat_at: None,
        }
    }

    fn executor(provider: Arc<dyn LlmProvider>) -> (tempfile::TempDir, GenerateExecutor, PathResolver) {
        let dir = tempfile::TempDir::new().unwrap();
        let resolver = PathResolver::new(dir.path());
        resolver.ensure_roots().unwrap();
        let mut defaults = GenerationConfig::default();
        defaults.concurrency = 1; // deterministic request order in tests
        let executor = GenerateExecutor::new(resolver.clone(), provider, "test-model", defaults);
        (dir, executor, resolver)
    }

    fn write_input(resolver: &PathResolver, name: &str, text: &str) {
        std::fs::write(resolver.root_dir(ArtifactRoot::Output).join(name), text).unwrap();
    }

    #[tokio::test]
    async fn test_generate_single_chunk() {
        // Request order with one chunk: summary, then the chunk.
        let provider = ScriptedProvider::new(vec![
            Ok("A short document about Rust."),
            Ok(r#"[{"question": "What is Rust?", "answer": "A language."},
                   {"question": "what  is rust?", "answer": "dup"},
                   {"question": "What is Cargo?", "answer": "A build tool."}]"#),
        ]);
        let (_dir, executor, resolver) = executor(provider);
        write_input(&resolver, "doc.txt", "Rust is a language. Cargo builds it.");

        let outcome = executor
            .execute(&job("output/doc.txt", serde_json::json!({"num_pairs": 3})))
            .await
            .unwrap();

        assert!(outcome.output_file.starts_with("generated/doc_qa_"));
        assert_eq!(outcome.stats["items"], 2);
        assert_eq!(outcome.stats["deduplicated"], 1);
        assert_eq!(outcome.stats["failed_chunks"], 0);

        let path = resolver
            .resolve(&outcome.output_file, ArtifactRoot::Generated)
            .unwrap();
        let document: GeneratedDocument =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(document.summary.as_deref(), Some("A short document about Rust."));
        assert_eq!(document.items[0].id, 1);
        assert_eq!(document.items[1].id, 2);
    }

    #[tokio::test]
    async fn test_cot_items_carry_reasoning() {
        let provider = ScriptedProvider::new(vec![
            Err(()), // summary fails, job continues
            Ok(r#"[{"question": "Q?", "reasoning": "Think.", "answer": "A."}]"#),
        ]);
        let (_dir, executor, resolver) = executor(provider);
        write_input(&resolver, "doc.txt", "Text.");

        let outcome = executor
            .execute(&job("output/doc.txt", serde_json::json!({"qa_type": "cot"})))
            .await
            .unwrap();

        assert!(outcome.output_file.contains("_cot_"));
        let path = resolver
            .resolve(&outcome.output_file, ArtifactRoot::Generated)
            .unwrap();
        let document: GeneratedDocument =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert!(document.summary.is_none());
        assert_eq!(document.items[0].reasoning.as_deref(), Some("Think."));
    }

    #[tokio::test]
    async fn test_partial_chunk_failure_tolerated() {
        let text = format!(
            "{}\n\n{}",
            "First paragraph sentence. ".repeat(5),
            "Second paragraph sentence. ".repeat(5)
        );
        let provider = ScriptedProvider::new(vec![
            Ok("Summary."),
            Ok(r#"[{"question": "Q1?", "answer": "A1."}]"#),
            Err(()), // second chunk fails
        ]);
        let (_dir, executor, resolver) = executor(provider);
        write_input(&resolver, "doc.txt", &text);

        let outcome = executor
            .execute(&job(
                "output/doc.txt",
                serde_json::json!({"chunk_size": 140, "num_pairs": 4}),
            ))
            .await
            .unwrap();

        assert_eq!(outcome.stats["failed_chunks"], 1);
        assert_eq!(outcome.stats["items"], 1);
    }

    #[tokio::test]
    async fn test_all_chunks_failed() {
        let provider = ScriptedProvider::new(vec![Ok("Summary."), Err(())]);
        let (_dir, executor, resolver) = executor(provider);
        write_input(&resolver, "doc.txt", "Text.");

        let err = executor
            .execute(&job("output/doc.txt", serde_json::json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, StageFailure::Other(_)));
    }

    #[test]
    fn test_parse_items_shapes() {
        let bare = serde_json::json!([{"question": "Q?", "answer": "A."}]);
        assert_eq!(parse_items(bare).unwrap().len(), 1);

        let wrapped = serde_json::json!({"pairs": [{"question": "Q?", "answer": "A."}]});
        assert_eq!(parse_items(wrapped).unwrap().len(), 1);

        assert!(parse_items(serde_json::json!({"nothing": true})).is_none());
        assert!(parse_items(serde_json::json!([{"question": "Q?"}])).is_none());
    }

    #[test]
    fn test_params_merge() {
        let defaults = GenerationConfig::default();
        let params = CreateParams::merged(
            &defaults,
            &serde_json::json!({"num_pairs": 10, "qa_type": "cot"}),
        );
        assert_eq!(params.num_pairs, 10);
        assert_eq!(params.qa_type, "cot");
        assert_eq!(params.chunk_size, defaults.chunk_size);
    }
}
