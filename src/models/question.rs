use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    #[serde(default)]
    pub id: i32,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    pub question: String,
    #[serde(default = "default_points")]
    pub points: i32,
    #[serde(default)]
    pub options: Vec<String>,
}

fn default_points() -> i32 {
    1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    #[serde(alias = "MCQ", alias = "mcq")]
    MultipleChoice,
    #[serde(alias = "SUBJECTIVE", alias = "subjective")]
    ShortAnswer,
    Code,
}

impl QuestionType {
    pub fn is_free_text(self) -> bool {
        !matches!(self, QuestionType::MultipleChoice)
    }
}

impl Question {
    pub fn multiple_choice(id: i32, question: &str, options: &[&str]) -> Self {
        Self {
            id,
            question_type: QuestionType::MultipleChoice,
            question: question.to_string(),
            points: 1,
            options: options.iter().map(|o| o.to_string()).collect(),
        }
    }

    pub fn short_answer(id: i32, question: &str) -> Self {
        Self {
            id,
            question_type: QuestionType::ShortAnswer,
            question: question.to_string(),
            points: 1,
            options: Vec::new(),
        }
    }
}
