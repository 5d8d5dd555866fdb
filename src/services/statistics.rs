use std::collections::{BTreeMap, HashSet};

use thiserror::Error;

use crate::models::{
    ElementCounter, PointCounter, QuestionKind, QuestionStatistic, QuizExercise, QuizStatistics,
    ScoredSubmission, ValidationError,
};
use crate::repositories::RepositoryError;
use crate::services::scoring::{self, ScoreBreakdown};

#[derive(Debug, Error)]
pub enum StatisticsError {
    #[error("exercise {0} does not exist")]
    NotFound(i64),
    #[error(transparent)]
    InvalidExercise(#[from] ValidationError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Counts {
    rated: u64,
    unrated: u64,
}

impl Counts {
    fn bump(&mut self, rated: bool) {
        if rated {
            self.rated += 1;
        } else {
            self.unrated += 1;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct QuestionCounts {
    correct: Counts,
    elements: BTreeMap<i64, Counts>,
}

/// Running statistics of one exercise. Counting is a multiset fold over
/// results, so the outcome does not depend on the order results are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LiveStatistics {
    exercise_id: i64,
    /// bucket key (points scaled by the precision) -> counts
    points: BTreeMap<i64, Counts>,
    questions: BTreeMap<i64, QuestionCounts>,
    participants: Counts,
    counted_results: HashSet<i64>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct StatisticsEngine {
    scale: i64,
}

impl StatisticsEngine {
    pub(crate) fn new(precision: u32) -> Self {
        Self { scale: 10_i64.pow(precision) }
    }

    pub(crate) fn bucket(&self, points: f64) -> i64 {
        (points * self.scale as f64).round() as i64
    }

    /// Empty statistics carrying one counter per integer point total and one
    /// question statistic per valid question.
    pub(crate) fn baseline(&self, exercise: &QuizExercise) -> LiveStatistics {
        let max_points = exercise.max_score().floor().max(0.0) as i64;
        let points =
            (0..=max_points).map(|value| (value * self.scale, Counts::default())).collect();

        let questions = exercise
            .questions
            .iter()
            .filter(|question| !question.invalid)
            .map(|question| {
                let elements = element_ids(&question.kind)
                    .into_iter()
                    .map(|id| (id, Counts::default()))
                    .collect();
                (question.id, QuestionCounts { correct: Counts::default(), elements })
            })
            .collect();

        LiveStatistics {
            exercise_id: exercise.id,
            points,
            questions,
            participants: Counts::default(),
            counted_results: HashSet::new(),
        }
    }

    /// Full rebuild from the complete set of persisted results.
    pub(crate) fn rebuild(
        &self,
        exercise: &QuizExercise,
        results: &[ScoredSubmission],
    ) -> LiveStatistics {
        let mut statistics = self.baseline(exercise);
        for scored in results {
            self.apply(&mut statistics, exercise, scored);
        }
        statistics
    }

    /// Adds a single result. Returns `false` when the result was already
    /// counted.
    pub(crate) fn apply(
        &self,
        statistics: &mut LiveStatistics,
        exercise: &QuizExercise,
        scored: &ScoredSubmission,
    ) -> bool {
        if let Some(id) = scored.result.id {
            if !statistics.counted_results.insert(id) {
                return false;
            }
        }

        let rated = scored.result.rated;
        let breakdown = scoring::score_submission(&scored.submission, exercise)
            .unwrap_or_else(|_| ScoreBreakdown::zero(exercise));

        statistics.participants.bump(rated);
        statistics.points.entry(self.bucket(breakdown.total)).or_default().bump(rated);

        for question_score in &breakdown.questions {
            let Some(counts) = statistics.questions.get_mut(&question_score.question_id) else {
                continue;
            };
            if question_score.is_fully_correct() {
                counts.correct.bump(rated);
            }

            let (Some(question), Some(answer)) = (
                exercise.question(question_score.question_id),
                scored.submission.answer_for(question_score.question_id),
            ) else {
                continue;
            };
            for element_id in scoring::counted_elements(question, &answer.selection) {
                counts.elements.entry(element_id).or_default().bump(rated);
            }
        }

        true
    }

    pub(crate) fn snapshot(&self, statistics: &LiveStatistics) -> QuizStatistics {
        QuizStatistics {
            exercise_id: statistics.exercise_id,
            participants_rated: statistics.participants.rated,
            participants_unrated: statistics.participants.unrated,
            point_counters: statistics
                .points
                .iter()
                .map(|(key, counts)| PointCounter {
                    points: *key as f64 / self.scale as f64,
                    rated_count: counts.rated,
                    unrated_count: counts.unrated,
                })
                .collect(),
            question_statistics: statistics
                .questions
                .iter()
                .map(|(question_id, counts)| QuestionStatistic {
                    question_id: *question_id,
                    rated_correct_count: counts.correct.rated,
                    unrated_correct_count: counts.correct.unrated,
                    element_counters: counts
                        .elements
                        .iter()
                        .map(|(element_id, element)| ElementCounter {
                            element_id: *element_id,
                            rated_count: element.rated,
                            unrated_count: element.unrated,
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}

fn element_ids(kind: &QuestionKind) -> Vec<i64> {
    match kind {
        QuestionKind::MultipleChoice { options } => {
            options.iter().filter(|option| !option.invalid).map(|option| option.id).collect()
        }
        QuestionKind::DragAndDrop { drop_locations, .. } => drop_locations
            .iter()
            .filter(|location| !location.invalid)
            .map(|location| location.id)
            .collect(),
        QuestionKind::ShortAnswer { spots } => {
            spots.iter().filter(|spot| !spot.invalid).map(|spot| spot.id).collect()
        }
    }
}
