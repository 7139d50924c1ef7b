use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::quiz::gateway::{FallbackReason, TextGenerationGateway};
use crate::quiz::{extract, fallback, validate, GenerationRequest, QuizItem};

pub const QUIZ_TOKENS: u32 = 512;
pub const QUIZ_TEMPERATURE: f32 = 0.7;

/// What happens when the model returns a parseable array in which no item
/// passes validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum ValidationPolicy {
    /// Serve the offline quiz instead.
    #[default]
    Fallback,
    /// Report a retryable error to the user.
    Surface,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GenerationError {
    #[error("Unexpected model answer. Try again, or ask for fewer questions.")]
    Malformed { raw_text: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum QuizOrigin {
    Model,
    Fallback(FallbackReason),
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GeneratedQuiz {
    pub items: Vec<QuizItem>,
    /// Text exactly as the gateway returned it, for display and diagnostics.
    pub raw_text: String,
    pub origin: QuizOrigin,
}

enum ParseFailure {
    Extraction,
    Validation,
}

pub struct QuizGenerator {
    gateway: Arc<TextGenerationGateway>,
    policy: ValidationPolicy,
}

impl QuizGenerator {
    pub fn new(gateway: Arc<TextGenerationGateway>, policy: ValidationPolicy) -> Self {
        Self { gateway, policy }
    }

    pub fn policy(&self) -> ValidationPolicy {
        self.policy
    }

    pub async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedQuiz, GenerationError> {
        log::info!(
            "Generating {} question(s) on {:?} at level {}",
            request.count,
            request.topic,
            request.level
        );

        let offline = || fallback::synthesize(&request.topic, &request.level, request.count);
        let output = self
            .gateway
            .generate(&quiz_prompt(request), QUIZ_TOKENS, QUIZ_TEMPERATURE, || {
                fallback::synthesize_json(&request.topic, &request.level, request.count)
                    .unwrap_or_else(|_| "[]".to_string())
            })
            .await;

        if let Some(reason) = output.fallback {
            return Ok(GeneratedQuiz {
                items: offline(),
                raw_text: output.text,
                origin: QuizOrigin::Fallback(reason),
            });
        }

        match parse_quiz(&output.text, request.count) {
            Ok(items) => Ok(GeneratedQuiz {
                items,
                raw_text: output.text,
                origin: QuizOrigin::Model,
            }),
            Err(ParseFailure::Validation) if self.policy == ValidationPolicy::Surface => {
                log::warn!("Model quiz failed validation, reporting it");
                Err(GenerationError::Malformed {
                    raw_text: output.text,
                })
            }
            Err(failure) => {
                let reason = match failure {
                    ParseFailure::Extraction => FallbackReason::Extraction,
                    ParseFailure::Validation => FallbackReason::Validation,
                };
                log::warn!("Model quiz unusable ({:?}), serving offline quiz", reason);
                Ok(GeneratedQuiz {
                    items: offline(),
                    raw_text: output.text,
                    origin: QuizOrigin::Fallback(reason),
                })
            }
        }
    }
}

fn parse_quiz(text: &str, expected_count: usize) -> Result<Vec<QuizItem>, ParseFailure> {
    let json = extract::extract(text).ok_or(ParseFailure::Extraction)?;
    let parsed: Vec<Value> = serde_json::from_str(json).map_err(|_| ParseFailure::Extraction)?;
    validate::validate(validate::normalize(&parsed), expected_count).ok_or(ParseFailure::Validation)
}

fn quiz_prompt(request: &GenerationRequest) -> String {
    let mut prompt = format!(
        "You are a multiple-choice quiz generator for teachers.

Task: Create {count} multiple-choice questions on the subject: \"{topic}\".
Level: {level}.
Output STRICTLY as JSON (nothing but JSON!), with this schema:
[
  {{
    \"question\": \"...\",
    \"options\": [\"A) ...\",\"B) ...\",\"C) ...\",\"D) ...\"],
    \"answer\": \"A\",
    \"explanation\": \"...\"
  }}
]

Constraints:
- Exactly 1 correct answer per question (A, B, C or D).
- No text before or after the JSON.
- Concise explanations (1-2 sentences).
",
        count = request.count,
        topic = request.topic,
        level = request.level,
    );

    let context = request.context.trim();
    if !context.is_empty() {
        prompt.push_str("\nBase the questions on this material:\n");
        prompt.push_str(context);
        prompt.push('\n');
    }
    prompt
}
