pub mod average;
pub mod core;
pub mod exams;
pub mod plans;
