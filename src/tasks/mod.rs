pub(crate) mod quiz;
pub(crate) mod scheduler;
