//! CR-014: Decision-boundary reports.
//!
//! A report is fire-and-forget: a failure to write one is logged and never
//! fails the task that asked for it.

use super::model::{Classifier, Features, OneClassModel};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Write as _;
use std::path::Path;
use tracing::{info, warn};

/// Grid resolution per axis.
pub const GRID_STEPS: usize = 50;

/// Running min/max of raw features.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FeatureRange {
    bounds: Option<(Features, Features)>,
}

impl FeatureRange {
    pub fn update(&mut self, data: &[Features]) {
        for x in data.iter().filter(|x| x[0].is_finite() && x[1].is_finite()) {
            let (min, max) = self.bounds.get_or_insert((*x, *x));
            for j in 0..2 {
                min[j] = min[j].min(x[j]);
                max[j] = max[j].max(x[j]);
            }
        }
    }

    pub fn bounds(&self) -> Option<(Features, Features)> {
        self.bounds
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_none()
    }
}

/// Decision values sampled on a regular grid plus optional data points.
#[derive(Debug, Clone, Default)]
pub struct BoundaryGrid {
    pub range: FeatureRange,
    pub cells: Vec<(Features, f64)>,
    pub points: Vec<(Features, f64)>,
}

impl BoundaryGrid {
    /// Evaluate `classifier` on a `GRID_STEPS`² grid spanning `range`.
    /// An empty range yields an empty grid.
    pub fn compute<M>(
        classifier: &Classifier<M>,
        range: FeatureRange,
        points: &[Features],
    ) -> Result<Self, String>
    where
        M: OneClassModel + Clone + Serialize + DeserializeOwned,
    {
        let Some((min, max)) = range.bounds() else {
            return Ok(Self::default());
        };
        let axis = |j: usize| -> Vec<f64> {
            let span = max[j] - min[j];
            (0..GRID_STEPS)
                .map(|i| min[j] + span * i as f64 / (GRID_STEPS - 1) as f64)
                .collect()
        };
        let (xs, ys) = (axis(0), axis(1));
        let coords: Vec<Features> = xs
            .iter()
            .flat_map(|x| ys.iter().map(move |y| [*x, *y]))
            .collect();
        let cells = coords
            .iter()
            .copied()
            .zip(classifier.decision(&coords)?)
            .collect();
        let points = points
            .iter()
            .copied()
            .zip(classifier.decision(points)?)
            .collect();
        Ok(Self {
            range,
            cells,
            points,
        })
    }
}

/// Renders a computed boundary to a file.
pub trait BoundaryReport: Send + Sync {
    fn render(&self, path: &Path, title: &str, grid: &BoundaryGrid) -> Result<(), String>;
}

/// Tab-separated report: `kind x y decision` rows.
#[derive(Debug, Clone, Copy, Default)]
pub struct TsvBoundaryReport;

impl BoundaryReport for TsvBoundaryReport {
    fn render(&self, path: &Path, title: &str, grid: &BoundaryGrid) -> Result<(), String> {
        let mut out = String::new();
        let _ = writeln!(out, "# {}", title);
        if let Some((min, max)) = grid.range.bounds() {
            let _ = writeln!(
                out,
                "# range q_aln_len=[{}, {}] neg_log10_e=[{}, {}]",
                min[0], max[0], min[1], max[1]
            );
        }
        out.push_str("kind\tx\ty\tdecision\n");
        let rows = grid
            .cells
            .iter()
            .map(|c| ("grid", c))
            .chain(grid.points.iter().map(|p| ("point", p)));
        for (kind, (x, d)) in rows {
            let _ = writeln!(out, "{}\t{}\t{}\t{}", kind, x[0], x[1], d);
        }
        crate::core::table::write_atomic(path, out.as_bytes())
    }
}

/// Render and log; failures are warnings only.
pub fn emit(report: &dyn BoundaryReport, path: &Path, title: &str, grid: &BoundaryGrid) {
    match report.render(path, title, grid) {
        Ok(()) => info!("wrote boundary report {}", path.display()),
        Err(e) => warn!("boundary report {} not written: {}", path.display(), e),
    }
}
