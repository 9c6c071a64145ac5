//! Result records, failure diagnostics and case log parsing

pub mod builder;
pub mod diagnose;
pub mod parse;

pub use builder::{ExecutionResultBuilder, ResultRecord};
pub use diagnose::FailureCategory;
pub use parse::{CaseLogReport, TestStatistics};
