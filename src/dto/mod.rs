pub mod proctoring_dto;
pub mod session_dto;
