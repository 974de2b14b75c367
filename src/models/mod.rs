pub mod answer;
pub mod evidence_clip;
pub mod exam_session;
pub mod question;
pub mod resume_record;
pub mod violation;
