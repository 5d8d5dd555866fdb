pub mod exercise;
pub mod participation;
pub mod result;
pub mod statistics;
pub mod submission;

pub use exercise::{
    AnswerOption, DragAndDropMapping, DragItem, DropLocation, QuestionKind, QuizExercise,
    QuizQuestion, ShortAnswerSpot, ValidationError,
};
pub use participation::Participation;
pub use result::{QuizResult, ScoredSubmission};
pub use statistics::{ElementCounter, PointCounter, QuestionStatistic, QuizStatistics};
pub use submission::{AnswerSelection, QuizSubmission, SubmittedAnswer};
