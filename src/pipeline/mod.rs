//! CR-015: The crbl pipeline — eight tasks wired through file dependencies.
//!
//! ```text
//! format-training ──┐                 ┌── training-reciprocals ── fit ──┐
//! format-database ──┼── align-training┤                                 ├── predict
//!                   ├── align-database┘                                 │
//!                   └── align-transcriptome ────────────────────────────┘
//! ```
//!
//! Derived files are named from the input basenames and live in the
//! execution root.

pub mod model;
pub mod rbh;
pub mod report;

use crate::align::last::{lastal_task, lastdb_task, LastConfig};
use crate::align::{AlignmentRecord, AlignmentSource};
use crate::core::table::AtomicFile;
use crate::core::types::PipelineConfig;
use crate::core::{CleanTargets, Engine, EngineError, FileTable, FnCleanup, Task, TaskContext};
use model::{features, Classifier, EllipticEnvelope, Features, OneClassModel, SharedClassifier};
use rbh::{by_e_value, read_rbh_csv, reciprocal_best_hits, write_rbh_csv};
use report::{emit, BoundaryGrid, BoundaryReport, FeatureRange, TsvBoundaryReport};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

pub const FORMAT_TRAINING: &str = "format-training";
pub const FORMAT_DATABASE: &str = "format-database";
pub const ALIGN_TRAINING: &str = "align-training";
pub const ALIGN_DATABASE: &str = "align-database";
pub const ALIGN_TRANSCRIPTOME: &str = "align-transcriptome";
pub const TRAINING_RECIPROCALS: &str = "training-reciprocals";
pub const FIT: &str = "fit";
pub const PREDICT: &str = "predict";

/// Task names in registration order.
pub const TASK_NAMES: [&str; 8] = [
    FORMAT_TRAINING,
    FORMAT_DATABASE,
    ALIGN_TRAINING,
    ALIGN_DATABASE,
    ALIGN_TRANSCRIPTOME,
    TRAINING_RECIPROCALS,
    FIT,
    PREDICT,
];

fn basename(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Every file the pipeline reads or writes.
#[derive(Debug, Clone, PartialEq)]
pub struct CrblPaths {
    pub training: PathBuf,
    pub transcriptome: PathBuf,
    pub database: PathBuf,
    /// lastdb prefix for the training proteins
    pub training_db: PathBuf,
    /// lastdb prefix for the database proteins
    pub database_db: PathBuf,
    pub train_x_db: PathBuf,
    pub db_x_train: PathBuf,
    pub transcriptome_x_db: PathBuf,
    pub train_rbh: PathBuf,
    pub crbl: PathBuf,
    pub model: PathBuf,
    pub scaler: PathBuf,
    pub training_report: PathBuf,
    pub fitted_report: PathBuf,
}

impl CrblPaths {
    pub fn new(
        training: impl Into<PathBuf>,
        transcriptome: impl Into<PathBuf>,
        database: impl Into<PathBuf>,
        model: impl Into<PathBuf>,
    ) -> Self {
        let training = training.into();
        let transcriptome = transcriptome.into();
        let database = database.into();
        let model = model.into();
        let (t, x, d) = (
            basename(&training),
            basename(&transcriptome),
            basename(&database),
        );
        Self {
            training_db: PathBuf::from(&t),
            database_db: PathBuf::from(&d),
            train_x_db: PathBuf::from(format!("{}.x.{}.maf", t, d)),
            db_x_train: PathBuf::from(format!("{}.x.{}.maf", d, t)),
            transcriptome_x_db: PathBuf::from(format!("{}.x.{}.maf", x, d)),
            train_rbh: PathBuf::from(format!("{}.rbhx.{}.csv", t, d)),
            crbl: PathBuf::from(format!("{}.crbl.{}.csv", x, d)),
            scaler: with_suffix(&model, ".scaler"),
            training_report: with_suffix(&model, ".training.tsv"),
            fitted_report: with_suffix(&model, ".fitted.tsv"),
            training,
            transcriptome,
            database,
            model,
        }
    }
}

/// Outcome of streaming prediction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PredictSummary {
    pub processed: usize,
    pub retained: usize,
    pub range: FeatureRange,
}

/// Reciprocal best hits of two alignment files, written as CSV.
pub fn extract_reciprocals(
    a: &AlignmentSource,
    b: &AlignmentSource,
    out: &Path,
) -> Result<usize, String> {
    let pairs = reciprocal_best_hits(&a.read_all()?, &b.read_all()?, by_e_value);
    write_rbh_csv(out, &pairs)?;
    info!("{} reciprocal best hit(s) → {}", pairs.len(), out.display());
    Ok(pairs.len())
}

/// Features of the RBH-selected alignment of every reciprocal pair. Other
/// local alignments of the same (query, subject) are dropped: each pair keeps
/// its lowest E-value row, the first one on ties, as `best_hits` does.
pub fn training_features(alignments: &AlignmentSource, rbh: &Path) -> Result<Vec<Features>, String> {
    let selected: HashSet<(String, String)> = read_rbh_csv(rbh)?
        .into_iter()
        .map(|p| (p.q_name, p.s_name))
        .collect();
    let mut best: BTreeMap<(String, String), AlignmentRecord> = BTreeMap::new();
    for chunk in alignments.chunks()? {
        for record in chunk? {
            let pair = (record.q_name.clone(), record.s_name.clone());
            if !selected.contains(&pair) {
                continue;
            }
            match best.entry(pair) {
                Entry::Vacant(slot) => {
                    slot.insert(record);
                }
                Entry::Occupied(mut slot) => {
                    if by_e_value(&record).total_cmp(&by_e_value(slot.get())) == Ordering::Less {
                        slot.insert(record);
                    }
                }
            }
        }
    }
    let rows: Vec<AlignmentRecord> = best.into_values().collect();
    debug!(
        "{} training alignment(s) selected by {} pair(s)",
        rows.len(),
        selected.len()
    );
    Ok(features(&rows))
}

/// Fit and persist the classifier, then render the training report.
pub fn train<M>(
    classifier: &mut Classifier<M>,
    alignments: &AlignmentSource,
    rbh: &Path,
    report: &dyn BoundaryReport,
    report_path: &Path,
) -> Result<usize, String>
where
    M: OneClassModel + Clone + Serialize + DeserializeOwned,
{
    let data = training_features(alignments, rbh)?;
    if data.is_empty() {
        return Err(format!(
            "no alignments in {} match the reciprocal best hits in {}",
            alignments.path().display(),
            rbh.display()
        ));
    }
    classifier.train(&data)?;
    let mut range = FeatureRange::default();
    range.update(&data);
    let grid = BoundaryGrid::compute(classifier, range, &data)?;
    emit(report, report_path, "Boundaries and Training Data", &grid);
    Ok(data.len())
}

/// Classify `source` chunk by chunk, appending in-model rows to `out`.
/// The model is loaded on the first non-empty chunk if not already trained.
pub fn predict<M>(
    classifier: &mut Classifier<M>,
    source: &AlignmentSource,
    out: &Path,
) -> Result<PredictSummary, String>
where
    M: OneClassModel + Clone + Serialize + DeserializeOwned,
{
    let mut file = AtomicFile::create(out)?;
    file.write_row(&AlignmentRecord::HEADER)?;
    let mut summary = PredictSummary::default();
    for chunk in source.chunks()? {
        let chunk = chunk?;
        let data = features(&chunk);
        let mask = classifier.predict(&data)?;
        for (record, keep) in chunk.iter().zip(mask) {
            if keep {
                file.write_row(&record.to_row())?;
                summary.retained += 1;
            }
        }
        summary.processed += chunk.len();
        summary.range.update(&data);
    }
    file.commit()?;
    Ok(summary)
}

/// Boundary reports are side outputs, not targets: a failed render must not
/// keep fit or predict stale. They are still removed on clean.
fn remove_report(
    path: PathBuf,
) -> FnCleanup<impl Fn(&TaskContext) -> Result<(), String> + Send + Sync> {
    FnCleanup(move |ctx: &TaskContext| {
        let path = ctx.resolve(&path);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(format!("cannot remove {}: {}", path.display(), e)),
        }
    })
}

/// Pipeline definition: inputs, LAST settings, and the shared classifier.
pub struct Crbl<M = EllipticEnvelope> {
    paths: CrblPaths,
    last: LastConfig,
    chunk_size: usize,
    classifier: SharedClassifier<M>,
    report: Arc<dyn BoundaryReport>,
}

impl Crbl<EllipticEnvelope> {
    /// Build from `crbl.yaml`; relative inputs resolve against `base`.
    pub fn from_config(config: &PipelineConfig, base: &Path) -> Self {
        let input = |p: &str| {
            let p = Path::new(p);
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                base.join(p)
            }
        };
        let paths = CrblPaths::new(
            input(&config.inputs.training),
            input(&config.inputs.transcriptome),
            input(&config.inputs.database),
            &config.model,
        );
        Self::new(
            paths,
            LastConfig::from(&config.last),
            config.chunk_size,
            EllipticEnvelope::new(config.classifier.nu),
        )
    }
}

impl<M> Crbl<M>
where
    M: OneClassModel + Clone + Serialize + DeserializeOwned + 'static,
{
    pub fn new(paths: CrblPaths, last: LastConfig, chunk_size: usize, prototype: M) -> Self {
        let classifier =
            Classifier::new(prototype, paths.model.clone(), paths.scaler.clone()).shared();
        Self {
            paths,
            last,
            chunk_size: chunk_size.max(1),
            classifier,
            report: Arc::new(TsvBoundaryReport),
        }
    }

    /// Replace the boundary report renderer.
    pub fn with_report(mut self, report: Arc<dyn BoundaryReport>) -> Self {
        self.report = report;
        self
    }

    pub fn paths(&self) -> &CrblPaths {
        &self.paths
    }

    pub fn classifier(&self) -> &SharedClassifier<M> {
        &self.classifier
    }

    pub fn format_training_task(&self) -> Result<Task, EngineError> {
        lastdb_task(FORMAT_TRAINING, &self.paths.training, &self.paths.training_db, &self.last)
    }

    pub fn format_database_task(&self) -> Result<Task, EngineError> {
        lastdb_task(FORMAT_DATABASE, &self.paths.database, &self.paths.database_db, &self.last)
    }

    pub fn align_training_task(&self) -> Result<Task, EngineError> {
        let p = &self.paths;
        lastal_task(ALIGN_TRAINING, &p.training, &p.database_db, &p.train_x_db, false, &self.last)
    }

    pub fn align_database_task(&self) -> Result<Task, EngineError> {
        let p = &self.paths;
        lastal_task(ALIGN_DATABASE, &p.database, &p.training_db, &p.db_x_train, false, &self.last)
    }

    pub fn align_transcriptome_task(&self) -> Result<Task, EngineError> {
        let p = &self.paths;
        lastal_task(
            ALIGN_TRANSCRIPTOME,
            &p.transcriptome,
            &p.database_db,
            &p.transcriptome_x_db,
            true,
            &self.last,
        )
    }

    pub fn training_reciprocals_task(&self) -> Result<Task, EngineError> {
        let p = self.paths.clone();
        let chunk_size = self.chunk_size;
        Task::builder(TRAINING_RECIPROCALS)
            .func("extract reciprocal best hits", move |ctx: &TaskContext| {
                let a = AlignmentSource::new(ctx.resolve(&p.train_x_db), chunk_size);
                let b = AlignmentSource::new(ctx.resolve(&p.db_x_train), chunk_size);
                extract_reciprocals(&a, &b, &ctx.resolve(&p.train_rbh)).map(|_| ())
            })
            .file_deps([&self.paths.train_x_db, &self.paths.db_x_train])
            .target(&self.paths.train_rbh)
            .clean_targets()
            .build()
    }

    pub fn fit_task(&self) -> Result<Task, EngineError> {
        let p = self.paths.clone();
        let chunk_size = self.chunk_size;
        let classifier = Arc::clone(&self.classifier);
        let report = Arc::clone(&self.report);
        let reset = Arc::clone(&self.classifier);
        Task::builder(FIT)
            .func("fit classifier", move |ctx: &TaskContext| {
                let alignments = AlignmentSource::new(ctx.resolve(&p.train_x_db), chunk_size);
                let mut classifier = classifier.lock();
                let n = train(
                    &mut *classifier,
                    &alignments,
                    &ctx.resolve(&p.train_rbh),
                    report.as_ref(),
                    &ctx.resolve(&p.training_report),
                )?;
                info!("fit on {} training alignment(s)", n);
                Ok(())
            })
            .file_deps([&self.paths.train_rbh, &self.paths.train_x_db])
            .targets([&self.paths.model, &self.paths.scaler])
            .clean(CleanTargets)
            .clean(remove_report(self.paths.training_report.clone()))
            .clean(FnCleanup(move |_: &TaskContext| {
                reset.lock().reset();
                Ok::<(), String>(())
            }))
            .build()
    }

    pub fn predict_task(&self) -> Result<Task, EngineError> {
        let p = self.paths.clone();
        let chunk_size = self.chunk_size;
        let classifier = Arc::clone(&self.classifier);
        let report = Arc::clone(&self.report);
        Task::builder(PREDICT)
            .func("predict transcriptome", move |ctx: &TaskContext| {
                let source = AlignmentSource::new(ctx.resolve(&p.transcriptome_x_db), chunk_size);
                let mut classifier = classifier.lock();
                let summary = predict(&mut *classifier, &source, &ctx.resolve(&p.crbl))?;
                info!(
                    "{} processed, {} retained → {}",
                    summary.processed,
                    summary.retained,
                    p.crbl.display()
                );
                let grid = BoundaryGrid::compute(&*classifier, summary.range, &[])?;
                emit(
                    report.as_ref(),
                    &ctx.resolve(&p.fitted_report),
                    "Boundary and Predict Data",
                    &grid,
                );
                Ok(())
            })
            .file_deps([
                &self.paths.model,
                &self.paths.scaler,
                &self.paths.transcriptome_x_db,
            ])
            .target(&self.paths.crbl)
            .clean_targets()
            .clean(remove_report(self.paths.fitted_report.clone()))
            .build()
    }

    /// All eight tasks in registration order.
    pub fn tasks(&self) -> Result<Vec<Task>, EngineError> {
        Ok(vec![
            self.format_training_task()?,
            self.format_database_task()?,
            self.align_training_task()?,
            self.align_database_task()?,
            self.align_transcriptome_task()?,
            self.training_reciprocals_task()?,
            self.fit_task()?,
            self.predict_task()?,
        ])
    }

    /// Register every task; `files` is merged into the engine's file table.
    pub fn register(&self, engine: &mut Engine, files: FileTable) -> Result<usize, EngineError> {
        let mut files = Some(files);
        let tasks = self.tasks()?;
        let count = tasks.len();
        for task in tasks {
            let name = task.name().to_string();
            engine.register_task(&name, task, files.take().unwrap_or_default())?;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Cleanup, EngineConfig};

    fn block(q: &str, s: &str, len: u64, e: f64) -> String {
        format!(
            "a score=100 E={:e}\ns {} 0 {} + 1000 MKVL\ns {} 0 {} + 500 MKVL\n\n",
            e, s, len, q, len
        )
    }

    /// Training vs database: one true hit per query plus a non-reciprocal decoy.
    fn train_x_db_maf() -> String {
        let mut out = String::from("# LAST version 1409\n\n");
        for i in 0..20u64 {
            let e = 10f64.powi(-(20 + ((i * 7) % 13) as i32));
            out.push_str(&block(&format!("t{}", i), &format!("d{}", i), 100 + i * 3, e));
            out.push_str(&block(&format!("t{}", i), &format!("d{}", (i + 1) % 20), 40, 1e-3));
        }
        out
    }

    fn db_x_train_maf() -> String {
        (0..20u64)
            .map(|i| block(&format!("d{}", i), &format!("t{}", i), 100 + i * 3, 1e-30))
            .collect()
    }

    fn transcriptome_maf() -> String {
        let mut out: String = (0..10u64)
            .map(|i| {
                let e = 10f64.powi(-(20 + ((i * 7) % 13) as i32));
                block(&format!("c{}", i), &format!("d{}", i), 100 + i * 3, e)
            })
            .collect();
        out.push_str(&block("novel", "d3", 5, 1.0));
        out
    }

    fn classifier(dir: &Path) -> Classifier<EllipticEnvelope> {
        Classifier::new(
            EllipticEnvelope::new(0.1),
            dir.join("m.json"),
            dir.join("m.json.scaler"),
        )
    }

    #[test]
    fn test_cr015_paths_from_basenames() {
        let p = CrblPaths::new("/in/ref.pep", "/in/tx.fa", "/db/uniref.pep", "crbl.model.json");
        assert_eq!(p.train_x_db, PathBuf::from("ref.pep.x.uniref.pep.maf"));
        assert_eq!(p.db_x_train, PathBuf::from("uniref.pep.x.ref.pep.maf"));
        assert_eq!(p.transcriptome_x_db, PathBuf::from("tx.fa.x.uniref.pep.maf"));
        assert_eq!(p.train_rbh, PathBuf::from("ref.pep.rbhx.uniref.pep.csv"));
        assert_eq!(p.crbl, PathBuf::from("tx.fa.crbl.uniref.pep.csv"));
        assert_eq!(p.scaler, PathBuf::from("crbl.model.json.scaler"));
        assert_eq!(p.fitted_report, PathBuf::from("crbl.model.json.fitted.tsv"));
        assert_eq!(p.training_db, PathBuf::from("ref.pep"));
    }

    #[test]
    fn test_cr015_task_wiring() {
        let paths = CrblPaths::new("/in/t.pep", "/in/x.fa", "/in/d.pep", "m.json");
        let crbl = Crbl::new(paths.clone(), LastConfig::default(), 100, EllipticEnvelope::new(0.1));
        let tasks = crbl.tasks().unwrap();
        let names: Vec<_> = tasks.iter().map(|t| t.name()).collect();
        assert_eq!(names, TASK_NAMES);

        let fit = &tasks[6];
        assert_eq!(fit.file_deps(), &[paths.train_rbh.clone(), paths.train_x_db.clone()]);
        assert_eq!(fit.targets(), &[paths.model.clone(), paths.scaler.clone()]);
        assert_eq!(fit.cleanup().len(), 3);

        let predict = &tasks[7];
        assert!(predict.file_deps().contains(&paths.model));
        assert!(predict.file_deps().contains(&paths.transcriptome_x_db));
        assert!(tasks[4].title().contains("-F15"));
        assert!(!tasks[2].title().contains("-F15"));
    }

    #[test]
    fn test_cr015_train_and_predict() {
        let dir = tempfile::tempdir().unwrap();
        let d = dir.path();
        std::fs::write(d.join("t.x.d.maf"), train_x_db_maf()).unwrap();
        std::fs::write(d.join("d.x.t.maf"), db_x_train_maf()).unwrap();
        std::fs::write(d.join("x.x.d.maf"), transcriptome_maf()).unwrap();

        let pairs = extract_reciprocals(
            &AlignmentSource::new(d.join("t.x.d.maf"), 7),
            &AlignmentSource::new(d.join("d.x.t.maf"), 7),
            &d.join("rbh.csv"),
        )
        .unwrap();
        assert_eq!(pairs, 20);

        let mut c = classifier(d);
        let n = train(
            &mut c,
            &AlignmentSource::new(d.join("t.x.d.maf"), 7),
            &d.join("rbh.csv"),
            &TsvBoundaryReport,
            &d.join("m.json.training.tsv"),
        )
        .unwrap();
        // decoy hits are not reciprocal
        assert_eq!(n, 20);
        assert!(d.join("m.json").exists());
        assert!(d.join("m.json.training.tsv").exists());

        let summary = predict(
            &mut c,
            &AlignmentSource::new(d.join("x.x.d.maf"), 4),
            &d.join("out.csv"),
        )
        .unwrap();
        assert_eq!(summary.processed, 11);
        assert!(summary.retained >= 1 && summary.retained < 11);

        let out = std::fs::read_to_string(d.join("out.csv")).unwrap();
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines[0], AlignmentRecord::HEADER.join(","));
        assert_eq!(lines.len(), summary.retained + 1);
        assert!(!out.contains("novel"));
        // chunk order preserved
        let names: Vec<_> = lines[1..].iter().map(|l| l.split(',').next().unwrap()).collect();
        let mut sorted = names.clone();
        sorted.sort_by_key(|n| n[1..].parse::<u32>().unwrap());
        assert_eq!(names, sorted);
    }

    #[test]
    fn test_cr015_predict_loads_persisted_model() {
        let dir = tempfile::tempdir().unwrap();
        let d = dir.path();
        std::fs::write(d.join("t.x.d.maf"), train_x_db_maf()).unwrap();
        std::fs::write(d.join("d.x.t.maf"), db_x_train_maf()).unwrap();
        std::fs::write(d.join("x.x.d.maf"), transcriptome_maf()).unwrap();
        let src = |n: &str| AlignmentSource::new(d.join(n), 100);
        extract_reciprocals(&src("t.x.d.maf"), &src("d.x.t.maf"), &d.join("rbh.csv")).unwrap();

        let mut trained = classifier(d);
        train(&mut trained, &src("t.x.d.maf"), &d.join("rbh.csv"), &TsvBoundaryReport, &d.join("r.tsv"))
            .unwrap();
        let a = predict(&mut trained, &src("x.x.d.maf"), &d.join("a.csv")).unwrap();

        let mut fresh = classifier(d);
        let b = predict(&mut fresh, &src("x.x.d.maf"), &d.join("b.csv")).unwrap();
        assert_eq!(a, b);
        assert_eq!(
            std::fs::read_to_string(d.join("a.csv")).unwrap(),
            std::fs::read_to_string(d.join("b.csv")).unwrap()
        );
    }

    #[test]
    fn test_cr015_empty_predict_stream() {
        let dir = tempfile::tempdir().unwrap();
        let d = dir.path();
        std::fs::write(d.join("empty.maf"), "# LAST version 1409\n").unwrap();
        // no model on disk: an empty stream never needs one
        let mut c = classifier(d);
        let summary = predict(&mut c, &AlignmentSource::new(d.join("empty.maf"), 10), &d.join("out.csv"))
            .unwrap();
        assert_eq!((summary.processed, summary.retained), (0, 0));
        assert!(summary.range.is_empty());
        assert_eq!(
            std::fs::read_to_string(d.join("out.csv")).unwrap(),
            format!("{}\n", AlignmentRecord::HEADER.join(","))
        );
    }

    #[test]
    fn test_cr015_train_without_matches_fails() {
        let dir = tempfile::tempdir().unwrap();
        let d = dir.path();
        std::fs::write(d.join("t.x.d.maf"), train_x_db_maf()).unwrap();
        write_rbh_csv(&d.join("rbh.csv"), &[]).unwrap();
        let mut c = classifier(d);
        let err = train(
            &mut c,
            &AlignmentSource::new(d.join("t.x.d.maf"), 10),
            &d.join("rbh.csv"),
            &TsvBoundaryReport,
            &d.join("r.tsv"),
        )
        .unwrap_err();
        assert!(err.contains("match the reciprocal best hits"));
        assert!(!c.is_trained());
    }

    #[test]
    fn test_cr015_training_keeps_best_row_per_pair() {
        let dir = tempfile::tempdir().unwrap();
        let d = dir.path();
        let a = [
            block("t0", "d0", 12, 5.0),
            block("t0", "d0", 300, 1e-80),
            block("t0", "d0", 20, 1e-3),
            block("t1", "d1", 150, 1e-40),
        ]
        .concat();
        let b = [block("d0", "t0", 300, 1e-80), block("d1", "t1", 150, 1e-40)].concat();
        std::fs::write(d.join("a.maf"), a).unwrap();
        std::fs::write(d.join("b.maf"), b).unwrap();
        let src = |n: &str| AlignmentSource::new(d.join(n), 2);
        assert_eq!(extract_reciprocals(&src("a.maf"), &src("b.maf"), &d.join("rbh.csv")).unwrap(), 2);

        let rows = training_features(&src("a.maf"), &d.join("rbh.csv")).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0], 300.0);
        assert!((rows[0][1] - 80.0).abs() < 1e-9);
        assert_eq!(rows[1][0], 150.0);
        assert!((rows[1][1] - 40.0).abs() < 1e-9);
    }

    struct FailingReport;

    impl BoundaryReport for FailingReport {
        fn render(&self, _: &Path, _: &str, _: &BoundaryGrid) -> Result<(), String> {
            Err("disk full".to_string())
        }
    }

    #[test]
    fn test_cr015_failed_report_keeps_fit_up_to_date() {
        let root = tempfile::tempdir().unwrap();
        let r = root.path();
        let paths = CrblPaths::new("t.pep", "x.fa", "d.pep", "m.json");
        std::fs::write(r.join(&paths.train_x_db), train_x_db_maf()).unwrap();
        std::fs::write(r.join(&paths.db_x_train), db_x_train_maf()).unwrap();
        extract_reciprocals(
            &AlignmentSource::new(r.join(&paths.train_x_db), 10),
            &AlignmentSource::new(r.join(&paths.db_x_train), 10),
            &r.join(&paths.train_rbh),
        )
        .unwrap();

        let crbl = Crbl::new(paths.clone(), LastConfig::default(), 10, EllipticEnvelope::new(0.1))
            .with_report(Arc::new(FailingReport));
        let mut engine = Engine::open(EngineConfig::new(r)).unwrap();
        engine
            .register_task(FIT, crbl.fit_task().unwrap(), FileTable::new())
            .unwrap();

        let first = engine.run(&[]).unwrap();
        assert_eq!(first.executed, vec![FIT]);
        assert!(r.join(&paths.model).exists());
        assert!(!r.join(&paths.training_report).exists());

        let second = engine.run(&[]).unwrap();
        assert!(second.executed.is_empty());
        assert_eq!(second.skipped, vec![FIT]);
    }

    #[test]
    fn test_cr015_clean_removes_reports() {
        let dir = tempfile::tempdir().unwrap();
        let d = dir.path();
        let paths = CrblPaths::new("t.pep", "x.fa", "d.pep", "m.json");
        std::fs::write(d.join(&paths.training_report), "# training\n").unwrap();
        let task = Crbl::new(paths.clone(), LastConfig::default(), 10, EllipticEnvelope::new(0.1))
            .fit_task()
            .unwrap();
        let ctx = TaskContext::new(d, &task);
        task.cleanup().clean(&ctx).unwrap();
        assert!(!d.join(&paths.training_report).exists());
        // already gone
        task.cleanup().clean(&ctx).unwrap();
    }

    fn executable(path: &Path, body: &str) {
        std::fs::write(path, body).unwrap();
        std::process::Command::new("chmod").arg("+x").arg(path).status().unwrap();
    }

    #[test]
    fn test_cr015_engine_runs_pipeline_incrementally() {
        let inputs = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let i = inputs.path();
        for name in ["t.pep", "d.pep", "x.fa"] {
            std::fs::write(i.join(name), ">s\nMKVL\n").unwrap();
        }
        std::fs::write(i.join("t.pep.fixture.maf"), train_x_db_maf()).unwrap();
        std::fs::write(i.join("d.pep.fixture.maf"), db_x_train_maf()).unwrap();
        std::fs::write(i.join("x.fa.fixture.maf"), transcriptome_maf()).unwrap();

        let lastdb = i.join("fake-lastdb");
        executable(
            &lastdb,
            "#!/bin/bash\nprefix=\"${@: -2:1}\"\nfor e in bck des prj sds ssp suf tis; do echo x > \"$prefix.$e\"; done\n",
        );
        let lastal = i.join("fake-lastal");
        executable(&lastal, "#!/bin/bash\ncat \"${@: -1}.fixture.maf\"\n");

        let last = LastConfig {
            lastdb: lastdb.to_string_lossy().into_owned(),
            lastal: lastal.to_string_lossy().into_owned(),
            ..Default::default()
        };
        let paths = CrblPaths::new(i.join("t.pep"), i.join("x.fa"), i.join("d.pep"), "m.json");
        let crbl = Crbl::new(paths.clone(), last, 5, EllipticEnvelope::new(0.1));

        let mut engine = Engine::open(EngineConfig::new(root.path())).unwrap();
        assert_eq!(crbl.register(&mut engine, FileTable::new()).unwrap(), 8);

        let first = engine.run(&[]).unwrap();
        assert_eq!(first.executed, TASK_NAMES);
        assert!(root.path().join(&paths.crbl).exists());
        assert!(root.path().join(&paths.fitted_report).exists());
        assert!(crbl.classifier().lock().is_trained());

        let second = engine.run(&[]).unwrap();
        assert!(second.executed.is_empty());
        assert_eq!(second.skipped.len(), 8);

        // touching the transcriptome alignment only reruns predict
        std::fs::write(
            root.path().join(&paths.transcriptome_x_db),
            format!("{}{}", transcriptome_maf(), block("c99", "d1", 103, 1e-27)),
        )
        .unwrap();
        let third = engine.run(&[]).unwrap();
        assert_eq!(third.executed, vec![PREDICT]);

        let cleaned = engine.clean(&[FIT.to_string()]).unwrap();
        assert_eq!(cleaned, vec![FIT]);
        assert!(!root.path().join(&paths.model).exists());
        assert!(!crbl.classifier().lock().is_trained());
    }
}
