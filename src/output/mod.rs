//! Output capture and log artifacts

pub mod artifact;
pub mod collector;

pub use artifact::{ArtifactRef, LogArtifact, StreamCapture, StreamKind};
pub use collector::OutputCollector;
