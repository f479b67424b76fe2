pub mod config;
pub mod db;
pub mod grading;
pub mod ipc;
pub mod logging;

pub use grading::{evaluate_rubric, evaluate_term, LetterGrade, RubricScores, TermScores};
