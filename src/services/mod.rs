pub(crate) mod re_evaluation;
pub(crate) mod scoring;
pub(crate) mod statistics;
pub(crate) mod submission_ingest;
