//! crbl — incremental reciprocal-best-hit annotation.
//!
//! A file-dependency-tracked task engine (`core`) drives an eight-task
//! pipeline (`pipeline`): LAST index builds and searches (`align`),
//! reciprocal best hits, and a one-class boundary model that labels
//! transcripts as known or novel.

pub mod align;
pub mod cli;
pub mod core;
pub mod pipeline;
pub mod transport;
