//! Files written at the end of a run.
//!
//! - [`json`]: the per-run audit report

pub mod json;
