//! Stateless scoring of quiz submissions.
//!
//! Every question kind dispatches on its tag; invalid questions and invalid
//! elements are left out of both the achieved and the achievable points, so a
//! re-evaluation after an edit always derives totals from scratch.

use std::collections::BTreeSet;

use thiserror::Error;

use crate::db::types::ScoringType;
use crate::models::{
    AnswerOption, AnswerSelection, DragAndDropMapping, DragItem, DropLocation, QuestionKind,
    QuizExercise, QuizQuestion, QuizSubmission, ShortAnswerSpot,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScoringError {
    #[error("answer references question {0} which is not part of the exercise")]
    UnknownQuestion(i64),
    #[error("question {question_id} expects a {expected} answer, got {actual}")]
    AnswerKindMismatch { question_id: i64, expected: &'static str, actual: &'static str },
    #[error("question {0} was answered more than once")]
    DuplicateAnswer(i64),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct QuestionScore {
    pub(crate) question_id: i64,
    pub(crate) points: f64,
    pub(crate) max_points: f64,
}

impl QuestionScore {
    pub(crate) fn is_fully_correct(&self) -> bool {
        self.max_points > 0.0 && (self.points - self.max_points).abs() < 1e-9
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ScoreBreakdown {
    pub(crate) total: f64,
    pub(crate) max_score: f64,
    /// One entry per valid question, in exercise order.
    pub(crate) questions: Vec<QuestionScore>,
}

impl ScoreBreakdown {
    /// Used in place of a real breakdown when a submission cannot be scored.
    pub(crate) fn zero(exercise: &QuizExercise) -> Self {
        Self {
            total: 0.0,
            max_score: exercise.max_score(),
            questions: exercise
                .questions
                .iter()
                .filter(|question| !question.invalid)
                .map(|question| QuestionScore {
                    question_id: question.id,
                    points: 0.0,
                    max_points: question.points,
                })
                .collect(),
        }
    }
}

pub(crate) fn score_submission(
    submission: &QuizSubmission,
    exercise: &QuizExercise,
) -> Result<ScoreBreakdown, ScoringError> {
    let mut answered = BTreeSet::new();
    for answer in &submission.submitted_answers {
        let question = exercise
            .question(answer.question_id)
            .ok_or(ScoringError::UnknownQuestion(answer.question_id))?;
        if !answered.insert(answer.question_id) {
            return Err(ScoringError::DuplicateAnswer(answer.question_id));
        }
        ensure_kind_matches(question, &answer.selection)?;
    }

    let mut questions = Vec::with_capacity(exercise.questions.len());
    for question in exercise.questions.iter().filter(|question| !question.invalid) {
        let selection = submission.answer_for(question.id).map(|answer| &answer.selection);
        questions.push(QuestionScore {
            question_id: question.id,
            points: score_question(question, selection),
            max_points: question.points,
        });
    }

    let max_score = exercise.max_score();
    let total = questions.iter().map(|score| score.points).sum::<f64>();
    let total = total.clamp(0.0, max_score.max(0.0));

    Ok(ScoreBreakdown { total, max_score, questions })
}

/// Writes the breakdown back onto the submission and its answers.
pub(crate) fn apply_scores(submission: &mut QuizSubmission, breakdown: &ScoreBreakdown) {
    for answer in &mut submission.submitted_answers {
        answer.score_in_points = breakdown
            .questions
            .iter()
            .find(|score| score.question_id == answer.question_id)
            .map(|score| score.points);
    }
    submission.score_in_points = Some(breakdown.total);
}

pub(crate) fn score_question(question: &QuizQuestion, selection: Option<&AnswerSelection>) -> f64 {
    if question.invalid {
        return 0.0;
    }
    let Some(selection) = selection else {
        return 0.0;
    };

    let tally = match (&question.kind, selection) {
        (
            QuestionKind::MultipleChoice { options },
            AnswerSelection::MultipleChoice { selected_options },
        ) => tally_multiple_choice(options, selected_options),
        (
            QuestionKind::DragAndDrop { drag_items, drop_locations, correct_mappings },
            AnswerSelection::DragAndDrop { mappings },
        ) => tally_drag_and_drop(drag_items, drop_locations, correct_mappings, mappings),
        (QuestionKind::ShortAnswer { spots }, AnswerSelection::ShortAnswer { spot_texts }) => {
            tally_short_answer(spots, |spot_id| spot_texts.get(&spot_id).map(String::as_str))
        }
        _ => return 0.0,
    };

    tally.points(question.points, question.scoring_type)
}

/// Element ids that feed the per-element statistic counters: selected options
/// for multiple choice, correctly filled drop locations and spots otherwise.
pub(crate) fn counted_elements(question: &QuizQuestion, selection: &AnswerSelection) -> Vec<i64> {
    match (&question.kind, selection) {
        (
            QuestionKind::MultipleChoice { options },
            AnswerSelection::MultipleChoice { selected_options },
        ) => options
            .iter()
            .filter(|option| !option.invalid && selected_options.contains(&option.id))
            .map(|option| option.id)
            .collect(),
        (
            QuestionKind::DragAndDrop { drag_items, drop_locations, correct_mappings },
            AnswerSelection::DragAndDrop { mappings },
        ) => drop_locations
            .iter()
            .filter(|location| {
                location_outcome(location, drag_items, correct_mappings, mappings)
                    == Outcome::Correct
            })
            .map(|location| location.id)
            .collect(),
        (QuestionKind::ShortAnswer { spots }, AnswerSelection::ShortAnswer { spot_texts }) => spots
            .iter()
            .filter(|spot| {
                spot_outcome(spot, spot_texts.get(&spot.id).map(String::as_str)) == Outcome::Correct
            })
            .map(|spot| spot.id)
            .collect(),
        _ => Vec::new(),
    }
}

fn ensure_kind_matches(
    question: &QuizQuestion,
    selection: &AnswerSelection,
) -> Result<(), ScoringError> {
    let expected = question.kind.name();
    let actual = selection.kind_name();
    if expected == actual {
        Ok(())
    } else {
        Err(ScoringError::AnswerKindMismatch { question_id: question.id, expected, actual })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Correct,
    Wrong,
    Unanswered,
    Excluded,
}

#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    correct: usize,
    wrong: usize,
    /// Number of scorable elements; the denominator of proportional scoring.
    total: usize,
    /// All-or-nothing verdict, which is not always derivable from the counts.
    exact: bool,
}

impl Tally {
    fn points(self, max_points: f64, scoring_type: ScoringType) -> f64 {
        let max_points = max_points.max(0.0);
        if self.total == 0 {
            return if self.exact { max_points } else { 0.0 };
        }
        let fraction = match scoring_type {
            ScoringType::AllOrNothing => {
                if self.exact {
                    1.0
                } else {
                    0.0
                }
            }
            ScoringType::ProportionalWithPenalty => {
                (self.correct as f64 - self.wrong as f64) / self.total as f64
            }
            ScoringType::ProportionalWithoutPenalty => self.correct as f64 / self.total as f64,
        };
        (max_points * fraction).clamp(0.0, max_points)
    }
}

fn tally_multiple_choice(options: &[AnswerOption], selected: &BTreeSet<i64>) -> Tally {
    let valid = options.iter().filter(|option| !option.invalid);
    let mut tally = Tally { exact: true, ..Tally::default() };
    for option in valid {
        let is_selected = selected.contains(&option.id);
        if option.is_correct {
            tally.total += 1;
        }
        match (option.is_correct, is_selected) {
            (true, true) => tally.correct += 1,
            (false, true) => {
                tally.wrong += 1;
                tally.exact = false;
            }
            (true, false) => tally.exact = false,
            (false, false) => {}
        }
    }
    tally
}

fn tally_drag_and_drop(
    drag_items: &[DragItem],
    drop_locations: &[DropLocation],
    correct_mappings: &[DragAndDropMapping],
    submitted: &[DragAndDropMapping],
) -> Tally {
    let mut tally = Tally { exact: true, ..Tally::default() };
    for location in drop_locations {
        match location_outcome(location, drag_items, correct_mappings, submitted) {
            Outcome::Correct => {
                tally.total += 1;
                tally.correct += 1;
            }
            Outcome::Wrong => {
                tally.total += 1;
                tally.wrong += 1;
                tally.exact = false;
            }
            Outcome::Unanswered => {
                tally.total += 1;
                tally.exact = false;
            }
            Outcome::Excluded => {}
        }
    }
    tally
}

fn location_outcome(
    location: &DropLocation,
    drag_items: &[DragItem],
    correct_mappings: &[DragAndDropMapping],
    submitted: &[DragAndDropMapping],
) -> Outcome {
    if location.invalid {
        return Outcome::Excluded;
    }
    let is_valid_item =
        |item_id: i64| drag_items.iter().any(|item| item.id == item_id && !item.invalid);

    let placed = submitted
        .iter()
        .find(|mapping| mapping.drop_location_id == location.id)
        .map(|mapping| mapping.drag_item_id);
    if let Some(item_id) = placed {
        if drag_items.iter().any(|item| item.id == item_id && item.invalid) {
            return Outcome::Excluded;
        }
    }

    let accepted: Vec<i64> = correct_mappings
        .iter()
        .filter(|mapping| {
            mapping.drop_location_id == location.id && is_valid_item(mapping.drag_item_id)
        })
        .map(|mapping| mapping.drag_item_id)
        .collect();

    match placed {
        None if accepted.is_empty() => Outcome::Correct,
        None => Outcome::Unanswered,
        Some(item_id) if accepted.contains(&item_id) => Outcome::Correct,
        Some(_) => Outcome::Wrong,
    }
}

fn tally_short_answer<'a>(
    spots: &[ShortAnswerSpot],
    text_for: impl Fn(i64) -> Option<&'a str>,
) -> Tally {
    let mut tally = Tally { exact: true, ..Tally::default() };
    for spot in spots {
        match spot_outcome(spot, text_for(spot.id)) {
            Outcome::Correct => {
                tally.total += 1;
                tally.correct += 1;
            }
            Outcome::Wrong => {
                tally.total += 1;
                tally.wrong += 1;
                tally.exact = false;
            }
            Outcome::Unanswered => {
                tally.total += 1;
                tally.exact = false;
            }
            Outcome::Excluded => {}
        }
    }
    tally
}

fn spot_outcome(spot: &ShortAnswerSpot, text: Option<&str>) -> Outcome {
    if spot.invalid {
        return Outcome::Excluded;
    }
    let Some(text) = text.map(str::trim).filter(|text| !text.is_empty()) else {
        return Outcome::Unanswered;
    };
    let normalized = text.to_lowercase();
    if spot.solutions.iter().any(|solution| solution.trim().to_lowercase() == normalized) {
        Outcome::Correct
    } else {
        Outcome::Wrong
    }
}
