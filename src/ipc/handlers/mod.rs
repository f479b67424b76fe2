pub mod classes;
pub mod core;
pub mod evaluations;
pub mod exchange;
pub mod reports;
pub mod students;
pub mod visits;
