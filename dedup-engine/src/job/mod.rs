//! Job orchestration: the batch pipeline and the cross-source linking pass.

mod cross_source;
mod runner;

pub use runner::{CancelFlag, JobRunner};
