use crate::quiz::{AnswerSet, GradingResult, QuizItem};

/// Counts the questions whose pick matches the stored answer letter.
/// Unanswered questions count as wrong; picks for indices past the end of
/// the quiz are ignored.
pub fn grade(quiz: &[QuizItem], answers: &AnswerSet) -> GradingResult {
    let correct_count = quiz
        .iter()
        .enumerate()
        .filter(|(i, item)| answers.get(i) == Some(&item.answer))
        .count();

    GradingResult {
        correct_count,
        total: quiz.len(),
        graded: true,
    }
}
