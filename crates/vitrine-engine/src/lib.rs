use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Map, Value};
use vitrine_contracts::concepts::{ConceptRegistry, MACRO_VARIANTS};
use vitrine_contracts::costs::{PricingTable, TokenUsage};
use vitrine_contracts::events::{EventWriter, SessionEvent};
use vitrine_contracts::prompts::{build_prompt, PromptRequest, PROMPT_OPTIMIZER_SYSTEM};
use vitrine_contracts::session::{
    AspectRatio, FlowMode, GeneratedImage, GenerationSettings, Resolution, SourceImage,
    WizardSession,
};

pub const DEFAULT_IMAGE_MODEL: &str = "gemini-3-pro-image-preview";
pub const DEFAULT_TEXT_MODEL: &str = "gemini-3-flash-preview";

const REQUEST_TIMEOUT_S: f64 = 90.0;
const TRANSPORT_RETRIES: usize = 2;
const RETRY_BACKOFF_S: f64 = 1.2;

/// One generation call's worth of output from the client.
#[derive(Debug, Clone)]
pub struct GeneratedPayload {
    pub image_data: String,
    pub usage: Option<TokenUsage>,
}

/// Contract the orchestrator needs from the external image service: one
/// image-from-image call and one free-text refinement call.
pub trait GenerationClient: Send + Sync {
    fn generate(
        &self,
        image: &SourceImage,
        prompt: &str,
        settings: &GenerationSettings,
    ) -> Result<GeneratedPayload>;

    fn optimize(&self, draft: &str) -> Result<String>;
}

/// Gemini `generateContent` client over plain REST.
pub struct GeminiClient {
    api_base: String,
    http: HttpClient,
    image_model: String,
    text_model: String,
}

impl GeminiClient {
    pub fn new() -> Self {
        Self::with_models(DEFAULT_IMAGE_MODEL, DEFAULT_TEXT_MODEL)
    }

    pub fn with_models(image_model: impl Into<String>, text_model: impl Into<String>) -> Self {
        Self {
            api_base: env::var("GEMINI_API_BASE")
                .ok()
                .map(|value| value.trim().trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string()),
            http: HttpClient::new(),
            image_model: image_model.into(),
            text_model: text_model.into(),
        }
    }

    fn api_key() -> Option<String> {
        non_empty_env("GEMINI_API_KEY").or_else(|| non_empty_env("GOOGLE_API_KEY"))
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn default_safety_settings() -> Vec<Value> {
        [
            "HARM_CATEGORY_HARASSMENT",
            "HARM_CATEGORY_HATE_SPEECH",
            "HARM_CATEGORY_SEXUALLY_EXPLICIT",
            "HARM_CATEGORY_DANGEROUS_CONTENT",
        ]
        .into_iter()
        .map(|category| {
            json!({
                "category": category,
                "threshold": "OFF",
            })
        })
        .collect()
    }

    fn post_with_transport_retries(
        &self,
        endpoint: &str,
        api_key: &str,
        payload: &Value,
    ) -> Result<HttpResponse> {
        for attempt in 0..=TRANSPORT_RETRIES {
            let response = self
                .http
                .post(endpoint)
                .query(&[("key", api_key)])
                .timeout(Duration::from_secs_f64(REQUEST_TIMEOUT_S))
                .json(payload)
                .send();

            match response {
                Ok(ok) => return Ok(ok),
                Err(raw) => {
                    let err = anyhow::Error::new(raw)
                        .context(format!("Gemini request failed ({endpoint})"));
                    if !is_retryable_transport_error(&err) || attempt >= TRANSPORT_RETRIES {
                        return Err(err);
                    }
                    thread::sleep(Duration::from_secs_f64(
                        RETRY_BACKOFF_S * (attempt as f64 + 1.0),
                    ));
                }
            }
        }

        unreachable!("transport retry loop always returns a response or error")
    }

    fn image_config(settings: &GenerationSettings) -> Value {
        let mut config = Map::new();
        if settings.aspect_ratio != AspectRatio::Auto {
            config.insert(
                "aspectRatio".to_string(),
                Value::String(settings.aspect_ratio.as_str().to_string()),
            );
        }
        let size_hint = match settings.resolution {
            Resolution::OneK => "1K",
            Resolution::TwoK => "2K",
            Resolution::FourK => "4K",
        };
        config.insert("imageSize".to_string(), Value::String(size_hint.to_string()));
        Value::Object(config)
    }

    fn extract_inline_image(response_payload: &Value) -> Option<String> {
        let candidates = response_payload.get("candidates")?.as_array()?;
        for candidate in candidates {
            let parts = candidate.get("content")?.get("parts")?.as_array()?;
            for part in parts {
                let data = part
                    .get("inlineData")
                    .or_else(|| part.get("inline_data"))
                    .and_then(|inline| inline.get("data"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if !data.is_empty() {
                    return Some(data.to_string());
                }
            }
        }
        None
    }

    fn extract_text(response_payload: &Value) -> Option<String> {
        let candidates = response_payload.get("candidates")?.as_array()?;
        for candidate in candidates {
            let parts = candidate.get("content")?.get("parts")?.as_array()?;
            for part in parts {
                if let Some(text) = part.get("text").and_then(Value::as_str) {
                    if !text.trim().is_empty() {
                        return Some(text.to_string());
                    }
                }
            }
        }
        None
    }

    fn extract_usage(response_payload: &Value) -> Option<TokenUsage> {
        let usage = response_payload.get("usageMetadata")?.as_object()?;
        let field = |key: &str| usage.get(key).and_then(Value::as_u64).unwrap_or(0);
        Some(TokenUsage {
            input_tokens: field("promptTokenCount"),
            output_tokens: field("candidatesTokenCount"),
            total_tokens: field("totalTokenCount"),
        })
    }
}

impl Default for GeminiClient {
    fn default() -> Self {
        Self::new()
    }
}

impl GenerationClient for GeminiClient {
    fn generate(
        &self,
        image: &SourceImage,
        prompt: &str,
        settings: &GenerationSettings,
    ) -> Result<GeneratedPayload> {
        let Some(api_key) = Self::api_key() else {
            bail!("GEMINI_API_KEY or GOOGLE_API_KEY not set");
        };
        let endpoint = self.endpoint_for_model(&self.image_model);

        let payload = json!({
            "contents": [{
                "role": "user",
                "parts": [
                    {
                        "inlineData": {
                            "mimeType": image.mime_type,
                            "data": image.data,
                        }
                    },
                    { "text": prompt },
                ],
            }],
            "generationConfig": {
                "responseModalities": ["TEXT", "IMAGE"],
                "imageConfig": Self::image_config(settings),
            },
            "safetySettings": Self::default_safety_settings(),
        });

        let response = self.post_with_transport_retries(&endpoint, &api_key, &payload)?;
        let response_payload = response_json_or_error("Gemini", response)?;

        let Some(image_data) = Self::extract_inline_image(&response_payload) else {
            bail!("Gemini returned no image for this prompt");
        };
        BASE64
            .decode(image_data.as_bytes())
            .context("Gemini image base64 decode failed")?;

        Ok(GeneratedPayload {
            image_data,
            usage: Self::extract_usage(&response_payload),
        })
    }

    fn optimize(&self, draft: &str) -> Result<String> {
        let Some(api_key) = Self::api_key() else {
            bail!("GEMINI_API_KEY or GOOGLE_API_KEY not set");
        };
        let endpoint = self.endpoint_for_model(&self.text_model);

        let prompt = format!(
            "{PROMPT_OPTIMIZER_SYSTEM}\n\nUser's prompt to optimize:\n\"{draft}\"\n\nOptimized prompt:"
        );
        let payload = json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": prompt }],
            }],
        });

        let response = self.post_with_transport_retries(&endpoint, &api_key, &payload)?;
        let response_payload = response_json_or_error("Gemini", response)?;

        let Some(text) = Self::extract_text(&response_payload) else {
            bail!("Gemini returned no text for the optimization request");
        };
        Ok(strip_wrapping_quotes(text.trim()).to_string())
    }
}

/// One unit of work: exactly one generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationTask {
    pub index: usize,
    pub label: String,
    pub concept_id: Option<u32>,
    pub concept_name: Option<String>,
    pub prompt: String,
}

/// Enumerates the task list for a run. Grid and custom flows fan out per
/// requested variation; the individual flow iterates concept-major then
/// variation-minor; the macro set is always the fixed quartet and ignores
/// the variation setting.
pub fn plan_tasks(
    mode: FlowMode,
    settings: &GenerationSettings,
    selected_concepts: &[u32],
    custom_text: &str,
    registry: &ConceptRegistry,
) -> Result<Vec<GenerationTask>> {
    let variations = settings.variations.max(1) as usize;
    let mut tasks = Vec::new();

    match mode {
        FlowMode::Grid => {
            let prompt = build_prompt(PromptRequest::Grid, settings);
            for variation in 0..variations {
                tasks.push(GenerationTask {
                    index: tasks.len(),
                    label: if variations > 1 {
                        format!("Grid {}", variation + 1)
                    } else {
                        "Full Grid".to_string()
                    },
                    concept_id: None,
                    concept_name: None,
                    prompt: prompt.clone(),
                });
            }
        }
        FlowMode::Individual => {
            for concept_id in selected_concepts {
                let concept = registry
                    .get(*concept_id)
                    .with_context(|| format!("concept {concept_id} not found in the catalog"))?;
                let prompt = build_prompt(PromptRequest::Concept(concept), settings);
                for _ in 0..variations {
                    tasks.push(GenerationTask {
                        index: tasks.len(),
                        label: concept.name.to_string(),
                        concept_id: Some(concept.id),
                        concept_name: Some(concept.name.to_string()),
                        prompt: prompt.clone(),
                    });
                }
            }
        }
        FlowMode::MacroSet => {
            for variant in &MACRO_VARIANTS {
                tasks.push(GenerationTask {
                    index: tasks.len(),
                    label: variant.name.to_string(),
                    concept_id: None,
                    concept_name: Some(variant.name.to_string()),
                    prompt: build_prompt(PromptRequest::Macro(variant), settings),
                });
            }
        }
        FlowMode::Custom => {
            let prompt = build_prompt(PromptRequest::Custom(custom_text), settings);
            for variation in 0..variations {
                tasks.push(GenerationTask {
                    index: tasks.len(),
                    label: if variations > 1 {
                        format!("Variation {}", variation + 1)
                    } else {
                        "Custom Creative".to_string()
                    },
                    concept_id: None,
                    concept_name: None,
                    prompt: prompt.clone(),
                });
            }
        }
    }

    Ok(tasks)
}

/// Monotone progress snapshot handed to the caller after every settled task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
    pub label: String,
}

/// Outcome of one orchestration run over its full task list.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub accepted: bool,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub last_error: Option<String>,
}

impl RunReport {
    fn rejected() -> Self {
        Self::default()
    }

    /// Zero successes out of a non-empty task list is the blocking case;
    /// partial failure is only a soft warning next to the results.
    pub fn is_total_failure(&self) -> bool {
        self.accepted && self.succeeded == 0
    }
}

/// Drives one sequential generation run per session, routing every outcome
/// back into the session and usage into the cost totals. At most one run is
/// active at a time; duplicate invocations are ignored, not queued.
pub struct Orchestrator {
    client: Box<dyn GenerationClient>,
    events: Option<EventWriter>,
    pricing: PricingTable,
    registry: ConceptRegistry,
    active: AtomicBool,
}

impl Orchestrator {
    pub fn new(client: Box<dyn GenerationClient>, pricing: PricingTable) -> Self {
        Self {
            client,
            events: None,
            pricing,
            registry: ConceptRegistry::default(),
            active: AtomicBool::new(false),
        }
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn registry(&self) -> &ConceptRegistry {
        &self.registry
    }

    /// Runs every enumerated task to completion, success or failure, before
    /// releasing the run latch. Single task failures are recorded and the
    /// batch continues; only zero successes makes the run a blocking failure.
    pub fn run(
        &self,
        session: &mut WizardSession,
        mut on_progress: impl FnMut(&Progress),
    ) -> RunReport {
        // Start latch: flips once per run, before any task is dispatched,
        // and stays set no matter how individual calls settle.
        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return RunReport::rejected();
        }
        if !session.begin_run() {
            self.active.store(false, Ordering::SeqCst);
            return RunReport::rejected();
        }

        let report = self.run_locked(session, &mut on_progress);

        session.finish_run();
        self.active.store(false, Ordering::SeqCst);
        report
    }

    fn run_locked(
        &self,
        session: &mut WizardSession,
        on_progress: &mut dyn FnMut(&Progress),
    ) -> RunReport {
        let mut report = RunReport {
            accepted: true,
            ..RunReport::default()
        };

        let Some(mode) = session.mode() else {
            report.last_error = Some("no flow selected".to_string());
            session.set_run_error("no flow selected");
            return report;
        };
        let Some(source_image) = session.source_image().cloned() else {
            report.last_error = Some("no product image uploaded".to_string());
            session.set_run_error("no product image uploaded");
            return report;
        };
        let settings = *session.settings();

        let tasks = match plan_tasks(
            mode,
            &settings,
            session.selected_concepts(),
            session.custom_prompt(),
            &self.registry,
        ) {
            Ok(tasks) => tasks,
            Err(err) => {
                let message = error_chain_text(&err, 2048);
                session.set_run_error(message.clone());
                report.last_error = Some(message);
                return report;
            }
        };

        let total = tasks.len();
        self.emit(&SessionEvent::RunStarted {
            flow: mode.as_str().to_string(),
            total,
        });
        if let Some(first) = tasks.first() {
            on_progress(&Progress {
                completed: 0,
                total,
                label: first.label.clone(),
            });
        }

        for task in &tasks {
            report.attempted += 1;
            match self
                .client
                .generate(&source_image, &task.prompt, &settings)
            {
                Ok(payload) => {
                    let mut image = GeneratedImage::new(payload.image_data, task.prompt.clone())
                        .with_usage(payload.usage);
                    if let (Some(id), Some(name)) = (task.concept_id, task.concept_name.as_ref()) {
                        image = image.with_concept(id, name.clone());
                    }
                    if let Some(usage) = payload.usage {
                        session.record_usage(&usage, &self.pricing);
                        self.emit(&SessionEvent::UsageRecorded {
                            task: task.index,
                            input_tokens: usage.input_tokens,
                            output_tokens: usage.output_tokens,
                            estimated_cost_usd: session.session_costs().estimated_cost_usd,
                        });
                    }
                    session.push_result(image);
                    report.succeeded += 1;
                    self.emit(&SessionEvent::TaskCompleted {
                        task: task.index,
                        label: task.label.clone(),
                    });
                }
                Err(err) => {
                    let message = error_chain_text(&err, 2048);
                    session.set_run_error(message.clone());
                    report.failed += 1;
                    report.last_error = Some(message.clone());
                    self.emit(&SessionEvent::TaskFailed {
                        task: task.index,
                        label: task.label.clone(),
                        error: message,
                    });
                }
            }
            on_progress(&Progress {
                completed: report.attempted,
                total,
                label: task.label.clone(),
            });
        }

        self.emit(&SessionEvent::RunCompleted {
            attempted: report.attempted,
            succeeded: report.succeeded,
            failed: report.failed,
        });
        report
    }

    /// Refines the custom draft through the text model. Failures are soft:
    /// the session's run error is never touched from here.
    pub fn optimize_custom_prompt(&self, session: &mut WizardSession) -> Result<String> {
        let draft = session.custom_prompt().to_string();
        if draft.trim().is_empty() {
            bail!("nothing to optimize: the custom prompt is empty");
        }
        let optimized = self.client.optimize(&draft)?;
        session.set_optimized_prompt(Some(optimized.clone()));
        Ok(optimized)
    }

    fn emit(&self, event: &SessionEvent) {
        if let Some(events) = &self.events {
            // Observability only; a failed write must not abort the run.
            let _ = events.emit(event);
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn strip_wrapping_quotes(value: &str) -> &str {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

fn is_retryable_transport_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<reqwest::Error>()
            .map(|reqwest_err| {
                reqwest_err.is_timeout() || reqwest_err.is_connect() || reqwest_err.is_request()
            })
            .unwrap_or(false)
    })
}

fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
