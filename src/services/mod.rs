pub mod capability;
pub mod escalation_controller;
pub mod evidence_recorder;
pub mod exam_api;
pub mod exam_runtime;
pub mod notices;
pub mod resume_store;
pub mod session_timer;
pub mod submission_coordinator;
pub mod violation_detector;

#[cfg(test)]
pub(crate) mod test_support;
