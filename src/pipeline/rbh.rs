//! CR-012: Best hits and reciprocal best hits over alignment records.
//!
//! Both reductions borrow their input and return a fresh, query-sorted
//! result, so the output does not depend on input row order (except for
//! exact key ties, which keep the first row encountered).

use crate::align::AlignmentRecord;
use crate::core::table::{split_csv_line, AtomicFile};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Comparison key used by the pipeline: the alignment E-value.
pub fn by_e_value(r: &AlignmentRecord) -> f64 {
    r.e_value
}

/// Keep the single record with the minimum `key` for each query name.
/// Ties keep the first record encountered. NaN keys lose to any number.
pub fn best_hits<F>(records: &[AlignmentRecord], key: F) -> Vec<AlignmentRecord>
where
    F: Fn(&AlignmentRecord) -> f64,
{
    let mut best: BTreeMap<&str, (usize, f64)> = BTreeMap::new();
    for (i, r) in records.iter().enumerate() {
        let k = key(r);
        best.entry(r.q_name.as_str())
            .and_modify(|cur| {
                if k.total_cmp(&cur.1) == Ordering::Less {
                    *cur = (i, k);
                }
            })
            .or_insert((i, k));
    }
    best.into_values().map(|(i, _)| records[i].clone()).collect()
}

/// One reciprocal pair. Names follow the A direction: `q_name` is A's
/// query and `s_name` its subject; `s_len` is the subject's own length as
/// seen when it was the query in B.
#[derive(Debug, Clone, PartialEq)]
pub struct RbhPair {
    pub q_name: String,
    pub s_name: String,
    pub q_aln_len: u64,
    pub e_value: f64,
    pub q_len: u64,
    pub s_len: u64,
}

/// Reciprocal best hits between A (queries vs subjects) and B (subjects
/// vs queries). Sorted by query name; each query appears at most once.
pub fn reciprocal_best_hits<F>(a: &[AlignmentRecord], b: &[AlignmentRecord], key: F) -> Vec<RbhPair>
where
    F: Fn(&AlignmentRecord) -> f64,
{
    let best_a = best_hits(a, &key);
    let best_b = best_hits(b, &key);
    let b_by_query: HashMap<&str, &AlignmentRecord> =
        best_b.iter().map(|r| (r.q_name.as_str(), r)).collect();

    best_a
        .iter()
        .filter_map(|ra| {
            let rb = b_by_query.get(ra.s_name.as_str())?;
            (rb.s_name == ra.q_name).then(|| RbhPair {
                q_name: ra.q_name.clone(),
                s_name: ra.s_name.clone(),
                q_aln_len: ra.q_aln_len,
                e_value: ra.e_value,
                q_len: ra.q_len,
                s_len: rb.q_len,
            })
        })
        .collect()
}

const RBH_HEADER: [&str; 6] = ["q_name", "s_name", "q_aln_len", "E", "q_len", "s_len"];

/// Write pairs as CSV (atomic replace).
pub fn write_rbh_csv(path: &Path, pairs: &[RbhPair]) -> Result<(), String> {
    let mut out = AtomicFile::create(path)?;
    out.write_row(&RBH_HEADER)?;
    for p in pairs {
        out.write_row(&[
            p.q_name.clone(),
            p.s_name.clone(),
            p.q_aln_len.to_string(),
            format!("{:e}", p.e_value),
            p.q_len.to_string(),
            p.s_len.to_string(),
        ])?;
    }
    out.commit()
}

/// Read pairs written by `write_rbh_csv`.
pub fn read_rbh_csv(path: &Path) -> Result<Vec<RbhPair>, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    let mut lines = content.lines().enumerate();
    match lines.next() {
        Some((_, header)) if split_csv_line(header)? == RBH_HEADER => {}
        Some((_, header)) => {
            return Err(format!("{}: unexpected header '{}'", path.display(), header))
        }
        None => return Err(format!("{}: empty file", path.display())),
    }
    lines
        .filter(|(_, line)| !line.is_empty())
        .map(|(i, line)| {
            parse_rbh_row(line).map_err(|e| format!("{}:{}: {}", path.display(), i + 1, e))
        })
        .collect()
}

fn parse_rbh_row(line: &str) -> Result<RbhPair, String> {
    let f = split_csv_line(line)?;
    if f.len() != RBH_HEADER.len() {
        return Err(format!("expected {} fields, got {}", RBH_HEADER.len(), f.len()));
    }
    let int = |i: usize| {
        f[i].parse::<u64>()
            .map_err(|_| format!("invalid {} '{}'", RBH_HEADER[i], f[i]))
    };
    Ok(RbhPair {
        q_name: f[0].clone(),
        s_name: f[1].clone(),
        q_aln_len: int(2)?,
        e_value: f[3]
            .parse::<f64>()
            .map_err(|_| format!("invalid E '{}'", f[3]))?,
        q_len: int(4)?,
        s_len: int(5)?,
    })
}
