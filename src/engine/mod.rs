//! Execution engine
//!
//! - `request`: what to run and for whom
//! - `supervisor`: runs one request under a deadline and returns its outcome
//! - `outcome`: the immutable result of one run
//!
//! The engine does NOT:
//! - Publish artifacts or report results (see `storage` and `report`)
//! - Decide about retries; a retry is a new request with the next round

pub mod outcome;
pub mod request;
pub mod supervisor;

pub use outcome::{ExecutionOutcome, Supervised};
pub use request::{CaseRoundIdentity, ExecutionRequest};
pub use supervisor::ProcessSupervisor;
