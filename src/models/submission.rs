use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::db::types::SubmissionType;
use crate::models::exercise::DragAndDropMapping;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizSubmission {
    pub id: Option<i64>,
    pub participation_id: Option<i64>,
    /// At most one answer per question; the owning submission is implied by
    /// containment.
    pub submitted_answers: Vec<SubmittedAnswer>,
    pub submitted: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub submission_date: Option<OffsetDateTime>,
    pub submission_type: Option<SubmissionType>,
    pub score_in_points: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmittedAnswer {
    pub question_id: i64,
    pub selection: AnswerSelection,
    pub score_in_points: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnswerSelection {
    MultipleChoice { selected_options: BTreeSet<i64> },
    DragAndDrop { mappings: Vec<DragAndDropMapping> },
    ShortAnswer { spot_texts: BTreeMap<i64, String> },
}

impl QuizSubmission {
    pub fn new(submitted_answers: Vec<SubmittedAnswer>) -> Self {
        Self {
            id: None,
            participation_id: None,
            submitted_answers,
            submitted: false,
            submission_date: None,
            submission_type: None,
            score_in_points: None,
        }
    }

    pub fn answer_for(&self, question_id: i64) -> Option<&SubmittedAnswer> {
        self.submitted_answers.iter().find(|answer| answer.question_id == question_id)
    }

    /// Marks a submission that was still open when its window closed.
    pub(crate) fn force_timeout(&mut self, now: OffsetDateTime) {
        self.submitted = true;
        self.submission_type = Some(SubmissionType::Timeout);
        self.submission_date = Some(now);
    }
}

impl SubmittedAnswer {
    pub fn new(question_id: i64, selection: AnswerSelection) -> Self {
        Self { question_id, selection, score_in_points: None }
    }
}

impl AnswerSelection {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::MultipleChoice { .. } => "multiple_choice",
            Self::DragAndDrop { .. } => "drag_and_drop",
            Self::ShortAnswer { .. } => "short_answer",
        }
    }
}
