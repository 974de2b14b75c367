use crate::error::{Error, Result};
use crate::models::question::{Question, QuestionType};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Sentinel option index submitted for an unanswered multiple-choice question.
pub const NO_ANSWER: i64 = -1;

/// A concrete answer: an option index for multiple choice, text otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Choice(i64),
    Text(String),
}

impl AnswerValue {
    pub fn no_answer() -> Self {
        AnswerValue::Choice(NO_ANSWER)
    }

    /// Parses a raw input line: integers become option indices.
    pub fn parse_input(raw: &str) -> Self {
        match raw.trim().parse::<i64>() {
            Ok(idx) => AnswerValue::Choice(idx),
            Err(_) => AnswerValue::Text(raw.to_string()),
        }
    }
}

/// Fills every gap so the backend receives one gradable value per question.
/// Unanswered multiple choice becomes [`NO_ANSWER`], unanswered free text an
/// empty string. Values are coerced to the question's kind, and entries
/// beyond the question list are dropped.
pub fn normalize_answers(questions: &[Question], answers: &[Option<AnswerValue>]) -> Vec<AnswerValue> {
    questions
        .iter()
        .enumerate()
        .map(|(idx, q)| match answers.get(idx).cloned().flatten() {
            Some(AnswerValue::Text(text)) if q.question_type == QuestionType::MultipleChoice => {
                text.trim()
                    .parse::<i64>()
                    .map(AnswerValue::Choice)
                    .unwrap_or_else(|_| AnswerValue::no_answer())
            }
            Some(AnswerValue::Choice(n)) if q.question_type.is_free_text() => AnswerValue::Text(n.to_string()),
            Some(value) => value,
            None if q.question_type.is_free_text() => AnswerValue::Text(String::new()),
            None => AnswerValue::no_answer(),
        })
        .collect()
}

/// The student's in-progress answers, aligned with question order.
#[derive(Debug)]
pub struct AnswerSheet {
    slots: Mutex<Vec<Option<AnswerValue>>>,
}

impl AnswerSheet {
    pub fn new(question_count: usize) -> Self {
        Self {
            slots: Mutex::new(vec![None; question_count]),
        }
    }

    pub fn set(&self, index: usize, value: Option<AnswerValue>) -> Result<()> {
        let mut slots = self.lock();
        let len = slots.len();
        let slot = slots.get_mut(index).ok_or_else(|| {
            Error::InvalidInput(format!("Question index {} out of range (0..{})", index, len))
        })?;
        *slot = value;
        Ok(())
    }

    pub fn snapshot(&self) -> Vec<Option<AnswerValue>> {
        self.lock().clone()
    }

    /// Fills empty slots from previously saved answers. Slots the student
    /// has already answered are kept, and extra saved entries are ignored.
    pub fn restore(&self, saved: Vec<Option<AnswerValue>>) {
        let mut slots = self.lock();
        for (slot, value) in slots.iter_mut().zip(saved) {
            if slot.is_none() {
                *slot = value;
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Option<AnswerValue>>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
