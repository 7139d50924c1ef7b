pub mod engine;
pub mod explanation;
pub mod extract;
pub mod fallback;
pub mod gateway;
pub mod generator;
pub mod grading;
pub mod session;
pub mod validate;

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

pub const MIN_QUESTIONS: usize = 1;
pub const MAX_QUESTIONS: usize = 10;

/// Difficulty requested for a quiz. The three known levels are recognised in
/// French and English, anything else is carried verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum Level {
    Beginner,
    #[default]
    Intermediate,
    Advanced,
    Other(String),
}

impl Level {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "débutant" | "debutant" | "beginner" => Level::Beginner,
            "intermédiaire" | "intermediaire" | "intermediate" => Level::Intermediate,
            "avancé" | "avance" | "advanced" => Level::Advanced,
            _ => Level::Other(raw.trim().to_string()),
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Beginner => f.write_str("beginner"),
            Level::Intermediate => f.write_str("intermediate"),
            Level::Advanced => f.write_str("advanced"),
            Level::Other(level) => f.write_str(level),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("the quiz topic must not be empty")]
    EmptyTopic,
    #[error("a quiz holds between 1 and 10 questions, got {0}")]
    CountOutOfRange(usize),
}

/// One user submission asking for a quiz.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GenerationRequest {
    pub topic: String,
    pub level: Level,
    pub count: usize,
    pub context: String,
}

impl GenerationRequest {
    pub fn new(
        topic: impl Into<String>,
        level: Level,
        count: usize,
        context: impl Into<String>,
    ) -> Result<Self, RequestError> {
        let topic = topic.into().trim().to_string();
        if topic.is_empty() {
            return Err(RequestError::EmptyTopic);
        }
        if !(MIN_QUESTIONS..=MAX_QUESTIONS).contains(&count) {
            return Err(RequestError::CountOutOfRange(count));
        }
        Ok(Self {
            topic,
            level,
            count,
            context: context.into(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub enum Letter {
    A,
    B,
    C,
    D,
}

impl Letter {
    pub const ALL: [Letter; 4] = [Letter::A, Letter::B, Letter::C, Letter::D];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Exact match on the upper-case letter; callers normalise case first.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "A" => Some(Letter::A),
            "B" => Some(Letter::B),
            "C" => Some(Letter::C),
            "D" => Some(Letter::D),
            _ => None,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Letter::A => 'A',
            Letter::B => 'B',
            Letter::C => 'C',
            Letter::D => 'D',
        }
    }

    /// The literal marker every option at this position starts with, e.g. `"B) "`.
    pub fn marker(self) -> String {
        format!("{}) ", self.as_char())
    }
}

impl fmt::Display for Letter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// A question with exactly four lettered options and one correct letter.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct QuizItem {
    pub question: String,
    pub options: [String; 4],
    pub answer: Letter,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

impl QuizItem {
    pub fn new(
        question: String,
        options: [String; 4],
        answer: Letter,
        explanation: Option<String>,
    ) -> Self {
        Self {
            question,
            options,
            answer,
            explanation,
        }
    }

    pub fn option_for(&self, letter: Letter) -> &str {
        &self.options[letter.index()]
    }

    pub fn correct_option(&self) -> &str {
        self.option_for(self.answer)
    }
}

pub type Quiz = Vec<QuizItem>;

/// The student's picks, keyed by 0-based question index.
pub type AnswerSet = BTreeMap<usize, Letter>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingResult {
    pub correct_count: usize,
    pub total: usize,
    pub graded: bool,
}

/// Indented JSON of the quiz, the shape handed out for clipboard export.
pub fn export_json(items: &[QuizItem]) -> serde_json::Result<String> {
    serde_json::to_string_pretty(items)
}

pub fn import_json(text: &str) -> serde_json::Result<Quiz> {
    serde_json::from_str(text)
}
