//! CR-011: Pairwise alignment records, the MAF chunk reader, and LAST tasks.

pub mod last;
pub mod maf;

pub use maf::AlignmentSource;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Alignment strand of one sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strand {
    #[serde(rename = "+")]
    Forward,
    #[serde(rename = "-")]
    Reverse,
}

impl Strand {
    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "+" => Ok(Self::Forward),
            "-" => Ok(Self::Reverse),
            other => Err(format!("invalid strand '{}'", other)),
        }
    }
}

impl fmt::Display for Strand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forward => write!(f, "+"),
            Self::Reverse => write!(f, "-"),
        }
    }
}

/// One pairwise alignment: a query against a database subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentRecord {
    pub q_name: String,
    pub q_start: u64,
    pub q_aln_len: u64,
    pub q_strand: Strand,
    pub q_len: u64,
    pub s_name: String,
    pub s_start: u64,
    pub s_aln_len: u64,
    pub s_strand: Strand,
    pub s_len: u64,
    pub score: f64,
    pub e_value: f64,
    /// Expected alignments with this score between two random sequences
    /// of 1e9 letters each; absent when LAST was run without it.
    pub eg2: Option<f64>,
}

impl AlignmentRecord {
    /// Column header matching `to_row`.
    pub const HEADER: [&'static str; 13] = [
        "q_name", "q_start", "q_aln_len", "q_strand", "q_len", "s_name", "s_start", "s_aln_len",
        "s_strand", "s_len", "score", "E", "EG2",
    ];

    /// Fields in `HEADER` order, for tabular output.
    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.q_name.clone(),
            self.q_start.to_string(),
            self.q_aln_len.to_string(),
            self.q_strand.to_string(),
            self.q_len.to_string(),
            self.s_name.clone(),
            self.s_start.to_string(),
            self.s_aln_len.to_string(),
            self.s_strand.to_string(),
            self.s_len.to_string(),
            self.score.to_string(),
            format!("{:e}", self.e_value),
            self.eg2.map(|v| format!("{:e}", v)).unwrap_or_default(),
        ]
    }
}
