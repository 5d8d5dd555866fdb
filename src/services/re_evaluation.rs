use crate::core::state::AppState;
use crate::models::{QuizExercise, ScoredSubmission};
use crate::repositories::RepositoryError;
use crate::services::scoring::{self, ScoreBreakdown};

const SCORE_EPSILON: f64 = 1e-9;

/// Re-scores every persisted submission of `exercise` against its current
/// definition and stores the submissions and results whose score moved.
///
/// Returns the complete, re-scored result set so the caller can rebuild
/// statistics from it without a second query.
pub(crate) async fn re_evaluate(
    state: &AppState,
    exercise: &QuizExercise,
) -> Result<Vec<ScoredSubmission>, RepositoryError> {
    let repos = state.repos();
    let caches = state.caches();
    let mut rows = repos.results.find_with_submissions_by_exercise(exercise.id).await?;
    let max_score = exercise.max_score();
    let mut changed = 0_usize;

    for scored in &mut rows {
        let scored_now = scoring::score_submission(&scored.submission, exercise);
        let breakdown = scored_now.unwrap_or_else(|err| {
            tracing::warn!(
                exercise_id = exercise.id,
                username = %scored.username,
                error = %err,
                "Scoring failed during re-evaluation; counting as zero"
            );
            metrics::counter!("quiz_scoring_errors_total").increment(1);
            ScoreBreakdown::zero(exercise)
        });

        let unchanged = (scored.result.score_in_points - breakdown.total).abs() < SCORE_EPSILON
            && scored
                .submission
                .score_in_points
                .is_some_and(|points| (points - breakdown.total).abs() < SCORE_EPSILON);
        if unchanged {
            continue;
        }

        scoring::apply_scores(&mut scored.submission, &breakdown);
        scored.result.rescore(breakdown.total, max_score);
        scored.submission = repos.submissions.save(&scored.submission).await?;
        scored.result = repos.results.save(&scored.result).await?;
        changed += 1;

        if caches.results.contains(exercise.id, &scored.username) {
            caches.results.put(exercise.id, &scored.username, scored.result.clone());
        }
        if let Some(mut participation) = caches.participations.get(exercise.id, &scored.username) {
            if participation.result.is_some() {
                participation.submission = Some(scored.submission.clone());
                participation.result = Some(scored.result.clone());
                caches.participations.put(exercise.id, &scored.username, participation);
            }
        }
    }

    if changed > 0 {
        tracing::info!(
            exercise_id = exercise.id,
            re_scored = changed,
            total = rows.len(),
            "Re-evaluated quiz results"
        );
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{QuizResult, QuizSubmission};
    use crate::test_support::{fixtures, test_state, InMemoryStore};

    fn seed(
        store: &InMemoryStore,
        exercise: &QuizExercise,
        username: &str,
        mut submission: QuizSubmission,
    ) {
        let breakdown = scoring::score_submission(&submission, exercise).expect("scored");
        scoring::apply_scores(&mut submission, &breakdown);
        submission.submitted = true;
        let mut result = QuizResult::automatic(breakdown.total, exercise.max_score(), true);
        result.completion_date = exercise.release_date;
        store.seed_result(exercise.id, username, submission, result);
    }

    #[tokio::test]
    async fn invalidated_question_is_dropped_from_stored_scores() {
        let store = InMemoryStore::new();
        let mut exercise = fixtures::three_question_exercise(1);
        seed(&store, &exercise, "alice", fixtures::scenario_submission());
        seed(&store, &exercise, "bob", fixtures::perfect_submission());
        let state = test_state(&store);

        exercise.questions[2].invalid = true;
        let rows = re_evaluate(&state, &exercise).await.expect("re-evaluated");

        assert_eq!(rows.len(), 2);
        let mut stored: Vec<f64> =
            store.results_for_exercise(1).iter().map(|result| result.score_in_points).collect();
        stored.sort_by(f64::total_cmp);
        assert_eq!(stored, vec![5.5, 7.0]);
        let perfect = rows.iter().find(|row| row.username == "bob").expect("bob");
        assert_eq!(perfect.result.score, 100.0);
        assert_eq!(perfect.submission.score_in_points, Some(7.0));
    }

    #[tokio::test]
    async fn unchanged_scores_are_not_written_again() {
        let store = InMemoryStore::new();
        let exercise = fixtures::three_question_exercise(1);
        seed(&store, &exercise, "alice", fixtures::scenario_submission());
        let state = test_state(&store);
        store.fail_result_saves(1);

        let rows = re_evaluate(&state, &exercise).await.expect("nothing to save");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].result.score_in_points, 6.5);
    }

    #[tokio::test]
    async fn cached_results_follow_the_new_scores() {
        let store = InMemoryStore::new();
        let mut exercise = fixtures::three_question_exercise(1);
        seed(&store, &exercise, "alice", fixtures::scenario_submission());
        let state = test_state(&store);
        let before = store.results_for_exercise(1).remove(0);
        state.caches().results.put(1, "alice", before);

        exercise.questions[0].invalid = true;
        re_evaluate(&state, &exercise).await.expect("re-evaluated");

        let cached = state.caches().results.get(1, "alice").expect("cached");
        assert_eq!(cached.score_in_points, 2.5);
    }
}
