use std::collections::BTreeMap;

use thiserror::Error;

use crate::quiz::generator::{GeneratedQuiz, GenerationError, QuizOrigin};
use crate::quiz::{export_json, grading, AnswerSet, GradingResult, Letter, QuizItem};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("answers are locked once the quiz is graded")]
    Locked,
    #[error("there is no question number {0}")]
    NoSuchQuestion(usize),
}

/// Identifies the generation a response belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationTicket(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExplanationTicket {
    generation: u64,
    index: usize,
}

impl ExplanationTicket {
    pub fn index(&self) -> usize {
        self.index
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ExplanationSlot {
    Loading,
    Ready(String),
}

/// Everything one student sees of one quiz, from request to explanations.
///
/// A newer generation always wins: responses carrying a ticket from an
/// earlier `begin_generation` are dropped.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct QuizSession {
    generation: u64,
    loading: bool,
    quiz: Vec<QuizItem>,
    raw_text: String,
    origin: Option<QuizOrigin>,
    error: Option<String>,
    answers: AnswerSet,
    result: Option<GradingResult>,
    explanations: BTreeMap<usize, ExplanationSlot>,
}

impl QuizSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_generation(&mut self) -> GenerationTicket {
        self.generation += 1;
        self.loading = true;
        self.quiz.clear();
        self.raw_text.clear();
        self.origin = None;
        self.error = None;
        self.answers.clear();
        self.result = None;
        self.explanations.clear();
        GenerationTicket(self.generation)
    }

    /// Returns `false` and changes nothing when `ticket` is stale.
    pub fn complete_generation(
        &mut self,
        ticket: GenerationTicket,
        outcome: Result<GeneratedQuiz, GenerationError>,
    ) -> bool {
        if ticket.0 != self.generation {
            log::debug!("Dropping stale generation {} (current {})", ticket.0, self.generation);
            return false;
        }

        match outcome {
            Ok(generated) => {
                self.quiz = generated.items;
                self.raw_text = generated.raw_text;
                self.origin = Some(generated.origin);
            }
            Err(err) => {
                self.error = Some(err.to_string());
                let GenerationError::Malformed { raw_text } = err;
                self.raw_text = raw_text;
            }
        }
        self.loading = false;
        true
    }

    pub fn select(&mut self, index: usize, letter: Letter) -> Result<(), SessionError> {
        if self.result.is_some() {
            return Err(SessionError::Locked);
        }
        if index >= self.quiz.len() {
            return Err(SessionError::NoSuchQuestion(index));
        }
        self.answers.insert(index, letter);
        Ok(())
    }

    pub fn grade(&mut self) -> GradingResult {
        let result = grading::grade(&self.quiz, &self.answers);
        self.result = Some(result);
        result
    }

    /// Marks the slot as loading. `None` for an index outside the quiz.
    pub fn begin_explanation(&mut self, index: usize) -> Option<ExplanationTicket> {
        if index >= self.quiz.len() {
            return None;
        }
        self.explanations.insert(index, ExplanationSlot::Loading);
        Some(ExplanationTicket {
            generation: self.generation,
            index,
        })
    }

    pub fn fill_explanation(&mut self, ticket: ExplanationTicket, text: String) -> bool {
        if ticket.generation != self.generation {
            return false;
        }
        self.explanations.insert(ticket.index, ExplanationSlot::Ready(text));
        true
    }

    pub fn export_json(&self) -> serde_json::Result<String> {
        export_json(&self.quiz)
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn quiz(&self) -> &[QuizItem] {
        &self.quiz
    }

    pub fn raw_text(&self) -> &str {
        &self.raw_text
    }

    pub fn origin(&self) -> Option<QuizOrigin> {
        self.origin
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn answers(&self) -> &AnswerSet {
        &self.answers
    }

    pub fn result(&self) -> Option<GradingResult> {
        self.result
    }

    pub fn explanation(&self, index: usize) -> Option<&ExplanationSlot> {
        self.explanations.get(&index)
    }
}
