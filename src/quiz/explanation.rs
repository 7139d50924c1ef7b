use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::task::JoinSet;

use crate::quiz::gateway::TextGenerationGateway;
use crate::quiz::{AnswerSet, Letter, QuizItem};

pub const EXPLANATION_TOKENS: u32 = 96;
pub const EXPLANATION_TEMPERATURE: f32 = 0.2;
pub const APOLOGY: &str = "Sorry, no explanation could be generated for this question right now.";

/// Asks the model for a short verdict on each of the student's picks.
pub struct ExplanationRequester {
    gateway: Arc<TextGenerationGateway>,
}

impl ExplanationRequester {
    pub fn new(gateway: Arc<TextGenerationGateway>) -> Self {
        Self { gateway }
    }

    /// Always resolves to displayable text; failures become [`APOLOGY`].
    pub async fn explain(&self, question: &QuizItem, student_pick: Option<Letter>) -> String {
        log::debug!("Generating explanation for question: {:?}", question.question);
        let prompt = explanation_prompt(question, student_pick);

        match self
            .gateway
            .complete(&prompt, EXPLANATION_TOKENS, EXPLANATION_TEMPERATURE)
            .await
        {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => {
                log::warn!("Empty explanation for question: {:?}", question.question);
                APOLOGY.to_string()
            }
            Err(err) => {
                log::warn!("Explanation request failed: {}", err);
                APOLOGY.to_string()
            }
        }
    }

    /// One independent request per question. `on_ready` sees each
    /// `(index, text)` as soon as that request finishes, in no fixed order.
    /// Every index is reported exactly once: a task that panics or is
    /// cancelled reports [`APOLOGY`].
    pub async fn explain_all<F>(self: &Arc<Self>, items: &[QuizItem], answers: &AnswerSet, mut on_ready: F)
    where
        F: FnMut(usize, String),
    {
        let mut requests = JoinSet::new();
        for (index, item) in items.iter().enumerate() {
            let requester = Arc::clone(self);
            let item = item.clone();
            let pick = answers.get(&index).copied();
            requests.spawn(async move { (index, requester.explain(&item, pick).await) });
        }

        let mut pending: BTreeSet<usize> = (0..items.len()).collect();
        while let Some(joined) = requests.join_next().await {
            match joined {
                Ok((index, text)) => {
                    pending.remove(&index);
                    on_ready(index, text);
                }
                Err(err) => log::error!("Explanation task aborted: {}", err),
            }
        }

        for index in pending {
            on_ready(index, APOLOGY.to_string());
        }
    }
}

fn explanation_prompt(question: &QuizItem, student_pick: Option<Letter>) -> String {
    let student = match student_pick {
        Some(letter) => question.option_for(letter).to_string(),
        None => "no answer".to_string(),
    };

    format!(
        "You are a teaching assistant reviewing a multiple-choice answer.
Question: {}
Options:
{}
Correct answer: {}
Student's answer: {}
In 1-2 short, factual sentences, say whether the student's answer is right and why.
Reply in plain text only. Do NOT answer in JSON.",
        question.question,
        question.options.join("\n"),
        question.correct_option(),
        student
    )
}
