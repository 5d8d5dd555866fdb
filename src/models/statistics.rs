use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointCounter {
    pub points: f64,
    pub rated_count: u64,
    pub unrated_count: u64,
}

/// Counters of a single scorable element (answer option, drop location or
/// short-answer spot).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementCounter {
    pub element_id: i64,
    pub rated_count: u64,
    pub unrated_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionStatistic {
    pub question_id: i64,
    pub rated_correct_count: u64,
    pub unrated_correct_count: u64,
    pub element_counters: Vec<ElementCounter>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizStatistics {
    pub exercise_id: i64,
    pub participants_rated: u64,
    pub participants_unrated: u64,
    /// Sorted by ascending points.
    pub point_counters: Vec<PointCounter>,
    pub question_statistics: Vec<QuestionStatistic>,
}

impl QuizStatistics {
    pub fn total_rated(&self) -> u64 {
        self.point_counters.iter().map(|counter| counter.rated_count).sum()
    }

    pub fn total_unrated(&self) -> u64 {
        self.point_counters.iter().map(|counter| counter.unrated_count).sum()
    }

    pub fn counter_at(&self, points: f64) -> Option<&PointCounter> {
        self.point_counters.iter().find(|counter| (counter.points - points).abs() < 1e-9)
    }
}
