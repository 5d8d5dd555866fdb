use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex, OnceLock};

use async_trait::async_trait;
use time::{Duration, OffsetDateTime};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::core::config::{EngineSettings, Settings};
use crate::core::state::AppState;
use crate::db::types::CourseRole;
use crate::models::{
    Participation, QuizExercise, QuizResult, QuizStatistics, QuizSubmission, ScoredSubmission,
};
use crate::repositories::{
    AuthorizationCheck, ExerciseRepository, ParticipationRepository, Repositories,
    RepositoryError, ResultRepository, StatisticsRepository, SubmissionRepository,
};

pub(crate) async fn env_lock() -> OwnedMutexGuard<()> {
    static LOCK: OnceLock<Arc<Mutex<()>>> = OnceLock::new();
    let lock = LOCK.get_or_init(|| Arc::new(Mutex::new(()))).clone();
    lock.lock_owned().await
}

pub(crate) fn test_settings() -> Settings {
    Settings::with_engine(EngineSettings {
        fast_tick_millis: 20,
        slow_tick_millis: 40,
        lifecycle_tick_millis: 30,
        persist_max_attempts: 3,
        ..EngineSettings::default()
    })
    .expect("test settings")
}

pub(crate) fn test_state(store: &Arc<InMemoryStore>) -> AppState {
    AppState::new(test_settings(), store.repositories())
}

#[derive(Debug, Default)]
struct StoreData {
    exercises: BTreeMap<i64, QuizExercise>,
    memberships: BTreeMap<(i64, String), CourseRole>,
    participations: BTreeMap<i64, Participation>,
    submissions: BTreeMap<i64, QuizSubmission>,
    results: BTreeMap<i64, QuizResult>,
    statistics: BTreeMap<i64, QuizStatistics>,
}

/// Storage double implementing every repository trait over plain maps.
///
/// Failures are injected per operation: `fail_*` makes the next `n` calls of
/// that kind return `RepositoryError::Unavailable`.
#[derive(Debug, Default)]
pub(crate) struct InMemoryStore {
    data: StdMutex<StoreData>,
    next_id: AtomicI64,
    restricted: AtomicBool,
    failing_participation_saves: AtomicU32,
    failing_submission_saves: AtomicU32,
    failing_result_saves: AtomicU32,
    failing_statistics_saves: AtomicU32,
    failing_result_queries: AtomicU32,
}

fn take_failure(counter: &AtomicU32, operation: &str) -> Result<(), RepositoryError> {
    let injected = counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
        .is_ok();
    if injected {
        return Err(RepositoryError::Unavailable(format!("injected {operation} failure")));
    }
    Ok(())
}

impl InMemoryStore {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn repositories(self: &Arc<Self>) -> Repositories {
        Repositories {
            exercises: self.clone(),
            participations: self.clone(),
            submissions: self.clone(),
            results: self.clone(),
            statistics: self.clone(),
            authorization: self.clone(),
        }
    }

    fn data(&self) -> std::sync::MutexGuard<'_, StoreData> {
        self.data.lock().expect("store lock")
    }

    fn allocate_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn insert_exercise(&self, exercise: QuizExercise) {
        self.data().exercises.insert(exercise.id, exercise);
    }

    pub(crate) fn delete_exercise(&self, exercise_id: i64) {
        self.data().exercises.remove(&exercise_id);
    }

    pub(crate) fn exercise(&self, exercise_id: i64) -> Option<QuizExercise> {
        self.data().exercises.get(&exercise_id).cloned()
    }

    /// Switches from "everyone is a student" to explicit memberships.
    pub(crate) fn restrict_access(&self) {
        self.restricted.store(true, Ordering::SeqCst);
    }

    pub(crate) fn grant(&self, course_id: i64, username: &str, role: CourseRole) {
        self.data().memberships.insert((course_id, username.to_string()), role);
    }

    pub(crate) fn fail_participation_saves(&self, count: u32) {
        self.failing_participation_saves.store(count, Ordering::SeqCst);
    }

    pub(crate) fn fail_submission_saves(&self, count: u32) {
        self.failing_submission_saves.store(count, Ordering::SeqCst);
    }

    pub(crate) fn fail_result_saves(&self, count: u32) {
        self.failing_result_saves.store(count, Ordering::SeqCst);
    }

    pub(crate) fn fail_statistics_saves(&self, count: u32) {
        self.failing_statistics_saves.store(count, Ordering::SeqCst);
    }

    pub(crate) fn fail_result_queries(&self, count: u32) {
        self.failing_result_queries.store(count, Ordering::SeqCst);
    }

    pub(crate) fn results_for_exercise(&self, exercise_id: i64) -> Vec<QuizResult> {
        let data = self.data();
        data.results
            .values()
            .filter(|result| {
                result
                    .participation_id
                    .and_then(|id| data.participations.get(&id))
                    .is_some_and(|participation| participation.exercise_id == exercise_id)
            })
            .cloned()
            .collect()
    }

    pub(crate) fn submission_count(&self) -> usize {
        self.data().submissions.len()
    }

    pub(crate) fn participation_count(&self) -> usize {
        self.data().participations.len()
    }

    pub(crate) fn stored_statistics(&self, exercise_id: i64) -> Option<QuizStatistics> {
        self.data().statistics.get(&exercise_id).cloned()
    }

    /// Stores a participation, submission and result directly, bypassing the
    /// engine.
    pub(crate) fn seed_result(
        &self,
        exercise_id: i64,
        username: &str,
        mut submission: QuizSubmission,
        mut result: QuizResult,
    ) -> ScoredSubmission {
        let participation_id = self.allocate_id();
        let submission_id = self.allocate_id();
        let result_id = self.allocate_id();

        let mut participation = Participation::new(exercise_id, username);
        participation.id = Some(participation_id);
        submission.id = Some(submission_id);
        submission.participation_id = Some(participation_id);
        result.id = Some(result_id);
        result.participation_id = Some(participation_id);
        result.submission_id = Some(submission_id);

        let mut data = self.data();
        data.participations.insert(participation_id, participation);
        data.submissions.insert(submission_id, submission.clone());
        data.results.insert(result_id, result.clone());

        ScoredSubmission { username: username.to_string(), result, submission }
    }
}

#[async_trait]
impl ExerciseRepository for InMemoryStore {
    async fn find_active_quizzes(
        &self,
        now: OffsetDateTime,
        lookahead: Duration,
    ) -> Result<Vec<QuizExercise>, RepositoryError> {
        let horizon = now.saturating_add(lookahead);
        Ok(self
            .data()
            .exercises
            .values()
            .filter(|exercise| exercise.is_planned_to_start)
            .filter(|exercise| exercise.release_date.is_some_and(|release| release <= horizon))
            .filter(|exercise| {
                exercise.is_open_for_practice
                    || exercise.latest_deadline().is_some_and(|deadline| deadline >= now)
            })
            .cloned()
            .collect())
    }

    async fn find_by_id(&self, exercise_id: i64) -> Result<Option<QuizExercise>, RepositoryError> {
        Ok(self.exercise(exercise_id))
    }

    async fn save(&self, exercise: &QuizExercise) -> Result<QuizExercise, RepositoryError> {
        self.insert_exercise(exercise.clone());
        Ok(exercise.clone())
    }
}

#[async_trait]
impl ParticipationRepository for InMemoryStore {
    async fn find_by_exercise_and_username(
        &self,
        exercise_id: i64,
        username: &str,
    ) -> Result<Option<Participation>, RepositoryError> {
        Ok(self
            .data()
            .participations
            .values()
            .find(|participation| {
                participation.exercise_id == exercise_id && participation.username == username
            })
            .cloned())
    }

    async fn save(&self, participation: &Participation) -> Result<Participation, RepositoryError> {
        take_failure(&self.failing_participation_saves, "participation save")?;
        let existing = self
            .data()
            .participations
            .values()
            .find(|stored| {
                stored.exercise_id == participation.exercise_id
                    && stored.username == participation.username
            })
            .and_then(|stored| stored.id);

        let id = match existing {
            Some(id) => id,
            None => self.allocate_id(),
        };
        let mut row = participation.clone();
        row.id = Some(id);
        row.submission = None;
        row.result = None;
        self.data().participations.insert(id, row);

        let mut saved = participation.clone();
        saved.id = Some(id);
        Ok(saved)
    }
}

#[async_trait]
impl SubmissionRepository for InMemoryStore {
    async fn save(&self, submission: &QuizSubmission) -> Result<QuizSubmission, RepositoryError> {
        take_failure(&self.failing_submission_saves, "submission save")?;
        if submission.participation_id.is_none() {
            return Err(RepositoryError::MissingReference("submission"));
        }
        let mut saved = submission.clone();
        let id = submission.id.unwrap_or_else(|| self.allocate_id());
        saved.id = Some(id);
        self.data().submissions.insert(id, saved.clone());
        Ok(saved)
    }

    async fn exists_by_participation_id(
        &self,
        participation_id: i64,
    ) -> Result<bool, RepositoryError> {
        Ok(self
            .data()
            .submissions
            .values()
            .any(|submission| submission.participation_id == Some(participation_id)))
    }
}

#[async_trait]
impl ResultRepository for InMemoryStore {
    async fn save(&self, result: &QuizResult) -> Result<QuizResult, RepositoryError> {
        take_failure(&self.failing_result_saves, "result save")?;
        if result.participation_id.is_none() || result.submission_id.is_none() {
            return Err(RepositoryError::MissingReference("result"));
        }
        let mut saved = result.clone();
        let id = result.id.unwrap_or_else(|| self.allocate_id());
        saved.id = Some(id);
        self.data().results.insert(id, saved.clone());
        Ok(saved)
    }

    async fn find_rated_results_for_exercise(
        &self,
        exercise_id: i64,
    ) -> Result<Vec<QuizResult>, RepositoryError> {
        take_failure(&self.failing_result_queries, "result query")?;
        let results = self.results_for_exercise(exercise_id);
        Ok(results.into_iter().filter(|result| result.rated).collect())
    }

    async fn find_with_submissions_by_exercise(
        &self,
        exercise_id: i64,
    ) -> Result<Vec<ScoredSubmission>, RepositoryError> {
        take_failure(&self.failing_result_queries, "result query")?;
        let data = self.data();
        let mut scored = Vec::new();
        for result in data.results.values() {
            let Some(participation) =
                result.participation_id.and_then(|id| data.participations.get(&id))
            else {
                continue;
            };
            if participation.exercise_id != exercise_id {
                continue;
            }
            let Some(submission) = result.submission_id.and_then(|id| data.submissions.get(&id))
            else {
                continue;
            };
            scored.push(ScoredSubmission {
                username: participation.username.clone(),
                result: result.clone(),
                submission: submission.clone(),
            });
        }
        Ok(scored)
    }

    async fn find_latest_for_participant(
        &self,
        exercise_id: i64,
        username: &str,
    ) -> Result<Option<QuizResult>, RepositoryError> {
        take_failure(&self.failing_result_queries, "result query")?;
        let data = self.data();
        Ok(data
            .results
            .values()
            .filter(|result| {
                result
                    .participation_id
                    .and_then(|id| data.participations.get(&id))
                    .is_some_and(|participation| {
                        participation.exercise_id == exercise_id
                            && participation.username == username
                    })
            })
            .max_by_key(|result| (result.completion_date, result.id))
            .cloned())
    }
}

#[async_trait]
impl StatisticsRepository for InMemoryStore {
    async fn save(&self, statistics: &QuizStatistics) -> Result<(), RepositoryError> {
        take_failure(&self.failing_statistics_saves, "statistics save")?;
        self.data().statistics.insert(statistics.exercise_id, statistics.clone());
        Ok(())
    }

    async fn find_by_exercise(
        &self,
        exercise_id: i64,
    ) -> Result<Option<QuizStatistics>, RepositoryError> {
        Ok(self.stored_statistics(exercise_id))
    }
}

impl InMemoryStore {
    fn role(&self, course_id: i64, username: &str) -> Option<CourseRole> {
        if !self.restricted.load(Ordering::SeqCst) {
            return Some(CourseRole::Student);
        }
        self.data().memberships.get(&(course_id, username.to_string())).copied()
    }
}

#[async_trait]
impl AuthorizationCheck for InMemoryStore {
    async fn is_at_least_student(
        &self,
        course_id: i64,
        username: &str,
    ) -> Result<bool, RepositoryError> {
        Ok(self.role(course_id, username).is_some_and(|role| role >= CourseRole::Student))
    }

    async fn is_at_least_tutor(
        &self,
        course_id: i64,
        username: &str,
    ) -> Result<bool, RepositoryError> {
        Ok(self.role(course_id, username).is_some_and(|role| role >= CourseRole::Tutor))
    }

    async fn is_at_least_instructor(
        &self,
        course_id: i64,
        username: &str,
    ) -> Result<bool, RepositoryError> {
        Ok(self.role(course_id, username).is_some_and(|role| role >= CourseRole::Instructor))
    }
}

pub(crate) mod fixtures {
    use std::collections::{BTreeMap, BTreeSet};

    use time::macros::datetime;
    use time::{Duration, OffsetDateTime};

    use crate::db::types::ScoringType;
    use crate::models::{
        AnswerOption, AnswerSelection, DragAndDropMapping, DragItem, DropLocation, QuestionKind,
        QuizExercise, QuizQuestion, QuizResult, QuizSubmission, ScoredSubmission,
        ShortAnswerSpot, SubmittedAnswer,
    };
    use crate::services::scoring;

    fn option(id: i64, is_correct: bool) -> AnswerOption {
        AnswerOption { id, text: format!("option {id}"), is_correct, invalid: false }
    }

    fn mapping(drag_item_id: i64, drop_location_id: i64) -> DragAndDropMapping {
        DragAndDropMapping { drag_item_id, drop_location_id }
    }

    /// Released 2026-03-01 10:00 UTC, ten minutes of working time, due 10:30.
    /// Questions: multiple choice (4 points, all or nothing), drag and drop
    /// (3 points, proportional with penalty), short answer (2 points,
    /// proportional without penalty).
    pub(crate) fn three_question_exercise(id: i64) -> QuizExercise {
        QuizExercise {
            id,
            course_id: 1,
            title: format!("Quiz {id}"),
            release_date: Some(datetime!(2026-03-01 10:00 UTC)),
            due_date: Some(datetime!(2026-03-01 10:30 UTC)),
            duration_seconds: 600,
            is_open_for_practice: false,
            is_visible_before_start: false,
            is_planned_to_start: true,
            individual_durations: BTreeMap::new(),
            questions: vec![
                QuizQuestion {
                    id: 1,
                    title: "Pick the primes".to_string(),
                    points: 4.0,
                    scoring_type: ScoringType::AllOrNothing,
                    invalid: false,
                    kind: QuestionKind::MultipleChoice {
                        options: vec![
                            option(11, true),
                            option(12, true),
                            option(13, false),
                            option(14, false),
                        ],
                    },
                },
                QuizQuestion {
                    id: 2,
                    title: "Match the capitals".to_string(),
                    points: 3.0,
                    scoring_type: ScoringType::ProportionalWithPenalty,
                    invalid: false,
                    kind: QuestionKind::DragAndDrop {
                        drag_items: vec![
                            DragItem { id: 21, invalid: false },
                            DragItem { id: 22, invalid: false },
                        ],
                        drop_locations: vec![
                            DropLocation { id: 31, invalid: false },
                            DropLocation { id: 32, invalid: false },
                        ],
                        correct_mappings: vec![mapping(21, 31), mapping(22, 32)],
                    },
                },
                QuizQuestion {
                    id: 3,
                    title: "Name the capitals".to_string(),
                    points: 2.0,
                    scoring_type: ScoringType::ProportionalWithoutPenalty,
                    invalid: false,
                    kind: QuestionKind::ShortAnswer {
                        spots: vec![
                            ShortAnswerSpot {
                                id: 41,
                                solutions: vec!["Paris".to_string()],
                                invalid: false,
                            },
                            ShortAnswerSpot {
                                id: 42,
                                solutions: vec!["Berlin".to_string()],
                                invalid: false,
                            },
                        ],
                    },
                },
            ],
        }
    }

    /// One minute into the live window.
    pub(crate) fn during(exercise: &QuizExercise) -> OffsetDateTime {
        exercise.release_date.expect("release date") + Duration::minutes(1)
    }

    /// One second past the default deadline.
    pub(crate) fn after_deadline(exercise: &QuizExercise) -> OffsetDateTime {
        exercise.default_deadline().expect("deadline") + Duration::seconds(1)
    }

    fn answers(mc: &[i64], dnd: &[(i64, i64)], sa: &[(i64, &str)]) -> QuizSubmission {
        QuizSubmission::new(vec![
            SubmittedAnswer::new(
                1,
                AnswerSelection::MultipleChoice {
                    selected_options: mc.iter().copied().collect::<BTreeSet<_>>(),
                },
            ),
            SubmittedAnswer::new(
                2,
                AnswerSelection::DragAndDrop {
                    mappings: dnd
                        .iter()
                        .map(|(item, location)| mapping(*item, *location))
                        .collect(),
                },
            ),
            SubmittedAnswer::new(
                3,
                AnswerSelection::ShortAnswer {
                    spot_texts: sa.iter().map(|(spot, text)| (*spot, text.to_string())).collect(),
                },
            ),
        ])
    }

    /// Both correct options, one of two pairs, one of two spots: 6.5 of 9.
    pub(crate) fn scenario_submission() -> QuizSubmission {
        answers(&[11, 12], &[(21, 31)], &[(41, "paris"), (42, "Rome")])
    }

    pub(crate) fn perfect_submission() -> QuizSubmission {
        answers(&[11, 12], &[(21, 31), (22, 32)], &[(41, "Paris"), (42, "Berlin")])
    }

    pub(crate) fn empty_submission() -> QuizSubmission {
        QuizSubmission::new(Vec::new())
    }

    /// A persisted result for `submission`, scored against
    /// `three_question_exercise`. All ids equal `id`.
    pub(crate) fn scored(id: i64, submission: QuizSubmission, rated: bool) -> ScoredSubmission {
        let exercise = three_question_exercise(0);
        let points = scoring::score_submission(&submission, &exercise)
            .map(|breakdown| breakdown.total)
            .unwrap_or(0.0);
        let mut result = QuizResult::automatic(points, exercise.max_score(), rated);
        result.id = Some(id);
        result.participation_id = Some(id);
        result.submission_id = Some(id);
        result.completion_date = exercise.release_date;

        let mut submission = submission;
        submission.id = Some(id);
        submission.participation_id = Some(id);
        submission.submitted = true;

        ScoredSubmission { username: format!("user-{id}"), result, submission }
    }
}
