use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::OnceCell;

use crate::quiz::engine::{EngineError, EngineLoader, EngineOptions, TextEngine};

pub const MIN_NEW_TOKENS: u32 = 64;
pub const MAX_NEW_TOKENS: u32 = 512;

const FORMAT_CONSTRAINTS: &str = "IMPORTANT:
- Answer STRICTLY with valid JSON (an array of objects).
- No text before or after the JSON.
- Use exactly the keys: \"question\", \"options\", \"answer\", \"explanation\".
- \"options\" is an array of 4 entries \"A) ...\", \"B) ...\", \"C) ...\", \"D) ...\".
- \"answer\" is one of the letters \"A\" | \"B\" | \"C\" | \"D\".
";

/// Why a quiz did not come from the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum FallbackReason {
    EngineUnavailable,
    EngineFailure,
    MalformedShape,
    Extraction,
    Validation,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("the generation engine could not be loaded")]
    Unavailable,
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("the engine output is not a JSON array")]
    MalformedShape,
}

impl GatewayError {
    pub fn fallback_reason(&self) -> FallbackReason {
        match self {
            GatewayError::Unavailable => FallbackReason::EngineUnavailable,
            GatewayError::Engine(_) => FallbackReason::EngineFailure,
            GatewayError::MalformedShape => FallbackReason::MalformedShape,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayOutput {
    pub text: String,
    /// Set when `text` is the substituted fallback rather than model output.
    pub fallback: Option<FallbackReason>,
}

/// Shared front door to the generation engine.
///
/// The engine is loaded at most once per gateway; callers arriving while the
/// load is in flight wait on that same load. A failed load is cached too, so
/// a gateway without a working engine stays on the fallback path.
pub struct TextGenerationGateway {
    loader: Box<dyn EngineLoader>,
    engine: OnceCell<Option<Arc<dyn TextEngine>>>,
}

impl TextGenerationGateway {
    pub fn new(loader: impl EngineLoader + 'static) -> Self {
        Self {
            loader: Box::new(loader),
            engine: OnceCell::new(),
        }
    }

    async fn engine(&self) -> Option<Arc<dyn TextEngine>> {
        self.engine
            .get_or_init(|| async {
                match self.loader.load().await {
                    Ok(engine) => {
                        log::info!("Generation engine loaded");
                        Some(engine)
                    }
                    Err(err) => {
                        log::warn!("Generation engine unavailable, using offline quizzes: {}", err);
                        None
                    }
                }
            })
            .await
            .clone()
    }

    /// Quiz path: never fails. Any engine error or output that does not look
    /// like a JSON array is replaced by whatever `fallback` produces.
    pub async fn generate<F>(
        &self,
        prompt: &str,
        max_new_tokens: u32,
        temperature: f32,
        fallback: F,
    ) -> GatewayOutput
    where
        F: FnOnce() -> String,
    {
        match self.try_generate(prompt, max_new_tokens, temperature).await {
            Ok(text) => GatewayOutput {
                text,
                fallback: None,
            },
            Err(err) => {
                log::warn!("Substituting fallback quiz: {}", err);
                GatewayOutput {
                    text: fallback(),
                    fallback: Some(err.fallback_reason()),
                }
            }
        }
    }

    async fn try_generate(
        &self,
        prompt: &str,
        max_new_tokens: u32,
        temperature: f32,
    ) -> Result<String, GatewayError> {
        let text = self
            .invoke(&reinforce(prompt), max_new_tokens, temperature)
            .await?;
        log::debug!("Raw model output: {:?}", text);

        let trimmed = text.trim();
        if !trimmed.starts_with('[') || !trimmed.ends_with(']') {
            return Err(GatewayError::MalformedShape);
        }
        Ok(text)
    }

    /// Free-text path: no format reinforcement and no shape check.
    pub async fn complete(
        &self,
        prompt: &str,
        max_new_tokens: u32,
        temperature: f32,
    ) -> Result<String, GatewayError> {
        self.invoke(prompt, max_new_tokens, temperature).await
    }

    async fn invoke(
        &self,
        prompt: &str,
        max_new_tokens: u32,
        temperature: f32,
    ) -> Result<String, GatewayError> {
        let engine = self.engine().await.ok_or(GatewayError::Unavailable)?;
        let options = clamp_options(max_new_tokens, temperature);
        let output = engine.invoke(prompt, options).await?;
        Ok(normalize_output(output))
    }
}

pub fn clamp_options(max_new_tokens: u32, temperature: f32) -> EngineOptions {
    let temperature = if temperature.is_nan() {
        0.0
    } else {
        temperature.clamp(0.0, 1.0)
    };
    EngineOptions {
        max_new_tokens: max_new_tokens.clamp(MIN_NEW_TOKENS, MAX_NEW_TOKENS),
        temperature,
    }
}

/// The caller's prompt followed by the strict output format rules.
pub fn reinforce(prompt: &str) -> String {
    format!("{}\n\n{}", prompt, FORMAT_CONSTRAINTS)
}

/// Flattens the engine's return value into plain text.
pub fn normalize_output(output: Value) -> String {
    let generated = output
        .as_array()
        .and_then(|items| items.first())
        .and_then(|first| first.get("generated_text"))
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
        .map(str::to_string);

    match (generated, output) {
        (Some(text), _) => text,
        (None, Value::String(text)) => text,
        (None, other) => other.to_string(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Replays a fixed answer and remembers what it was asked.
    pub(crate) struct ScriptedEngine {
        pub reply: Result<Value, String>,
        pub calls: Mutex<Vec<(String, EngineOptions)>>,
    }

    impl ScriptedEngine {
        pub(crate) fn replying(reply: Value) -> Self {
            Self {
                reply: Ok(reply),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn failing(message: &str) -> Self {
            Self {
                reply: Err(message.to_string()),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TextEngine for ScriptedEngine {
        async fn invoke(&self, prompt: &str, options: EngineOptions) -> Result<Value, EngineError> {
            self.calls
                .lock()
                .unwrap()
                .push((prompt.to_string(), options));
            self.reply.clone().map_err(EngineError::Unavailable)
        }
    }

    /// Hands out a prepared engine and counts how often it was asked to.
    pub(crate) struct StaticLoader {
        pub engine: Option<Arc<ScriptedEngine>>,
        pub loads: Arc<AtomicUsize>,
        pub delay: Duration,
    }

    impl StaticLoader {
        pub(crate) fn with(engine: Arc<ScriptedEngine>) -> Self {
            Self {
                engine: Some(engine),
                loads: Arc::new(AtomicUsize::new(0)),
                delay: Duration::ZERO,
            }
        }

        pub(crate) fn broken() -> Self {
            Self {
                engine: None,
                loads: Arc::new(AtomicUsize::new(0)),
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl EngineLoader for StaticLoader {
        async fn load(&self) -> Result<Arc<dyn TextEngine>, EngineError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            match &self.engine {
                Some(engine) => Ok(engine.clone() as Arc<dyn TextEngine>),
                None => Err(EngineError::Unavailable("model download blocked".to_string())),
            }
        }
    }

    #[test]
    fn clamps_tokens_and_temperature() {
        assert_eq!(clamp_options(10, -1.0).max_new_tokens, 64);
        assert_eq!(clamp_options(10, -1.0).temperature, 0.0);
        assert_eq!(clamp_options(4096, 3.5).max_new_tokens, 512);
        assert_eq!(clamp_options(4096, 3.5).temperature, 1.0);
        assert_eq!(clamp_options(256, 0.7), EngineOptions { max_new_tokens: 256, temperature: 0.7 });
        assert_eq!(clamp_options(256, f32::NAN).temperature, 0.0);
    }

    #[test]
    fn normalizes_every_engine_shape() {
        assert_eq!(normalize_output(json!([{ "generated_text": "[1]" }])), "[1]");
        assert_eq!(normalize_output(json!("plain")), "plain");
        assert_eq!(normalize_output(json!({ "text": "x" })), r#"{"text":"x"}"#);
        assert_eq!(normalize_output(json!([{ "generated_text": "" }])), r#"[{"generated_text":""}]"#);
        assert_eq!(normalize_output(json!(42)), "42");
    }

    #[test]
    fn reinforced_prompt_keeps_caller_text_first() {
        let prompt = reinforce("Create 3 questions");
        assert!(prompt.starts_with("Create 3 questions\n\n"));
        assert!(prompt.contains("\"answer\" is one of the letters"));
    }

    #[tokio::test]
    async fn passes_array_output_through() {
        let engine = Arc::new(ScriptedEngine::replying(json!([{ "generated_text": "  [ {} ]  " }])));
        let gateway = TextGenerationGateway::new(StaticLoader::with(engine.clone()));

        let output = gateway.generate("quiz please", 2000, 0.7, || "fallback".to_string()).await;

        assert_eq!(output.fallback, None);
        assert_eq!(output.text, "  [ {} ]  ");
        let calls = engine.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].0.starts_with("quiz please"));
        assert!(calls[0].0.contains("IMPORTANT:"));
        assert_eq!(calls[0].1.max_new_tokens, 512);
    }

    #[tokio::test]
    async fn substitutes_fallback_for_non_array_text() {
        let engine = Arc::new(ScriptedEngine::replying(json!("not json at all")));
        let gateway = TextGenerationGateway::new(StaticLoader::with(engine));

        let output = gateway.generate("quiz", 256, 0.7, || "[]".to_string()).await;

        assert_eq!(output.text, "[]");
        assert_eq!(output.fallback, Some(FallbackReason::MalformedShape));
    }

    #[tokio::test]
    async fn substitutes_fallback_when_engine_throws() {
        let engine = Arc::new(ScriptedEngine::failing("network blocked"));
        let gateway = TextGenerationGateway::new(StaticLoader::with(engine));

        let output = gateway.generate("quiz", 256, 0.7, || "[]".to_string()).await;

        assert_eq!(output.fallback, Some(FallbackReason::EngineFailure));
    }

    #[tokio::test]
    async fn failed_load_is_cached_and_never_retried() {
        let loader = StaticLoader::broken();
        let loads = loader.loads.clone();
        let gateway = TextGenerationGateway::new(loader);

        for _ in 0..3 {
            let output = gateway.generate("quiz", 256, 0.7, || "[]".to_string()).await;
            assert_eq!(output.fallback, Some(FallbackReason::EngineUnavailable));
        }
        assert!(matches!(
            gateway.complete("hi", 96, 0.2).await,
            Err(GatewayError::Unavailable)
        ));
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_share_one_load() {
        let engine = Arc::new(ScriptedEngine::replying(json!("a sentence")));
        let mut loader = StaticLoader::with(engine.clone());
        loader.delay = Duration::from_millis(50);
        let loads = loader.loads.clone();
        let gateway = Arc::new(TextGenerationGateway::new(loader));

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let gateway = gateway.clone();
            tasks.spawn(async move { gateway.complete("hello", 96, 0.2).await });
        }
        while let Some(joined) = tasks.join_next().await {
            assert_eq!(joined.unwrap().unwrap(), "a sentence");
        }

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(engine.calls.lock().unwrap().len(), 8);
    }

    #[tokio::test]
    async fn complete_skips_reinforcement_and_shape_check() {
        let engine = Arc::new(ScriptedEngine::replying(json!([{ "generated_text": "B is right." }])));
        let gateway = TextGenerationGateway::new(StaticLoader::with(engine.clone()));

        let text = gateway.complete("Explain", 96, 0.2).await.unwrap();

        assert_eq!(text, "B is right.");
        assert_eq!(engine.calls.lock().unwrap()[0].0, "Explain");
    }
}
