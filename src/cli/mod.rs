//! CR-016: CLI subcommands — init, validate, run, status, clean, list.

use crate::core::types::{FailurePolicy, PipelineConfig};
use crate::core::{parser, Engine, EngineConfig, FileTable, StatusKind};
use crate::pipeline::Crbl;
use clap::Subcommand;
use std::path::{Path, PathBuf};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new crbl project
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Validate crbl.yaml without running anything
    Validate {
        /// Path to crbl.yaml
        #[arg(short, long, default_value = "crbl.yaml")]
        file: PathBuf,
    },

    /// Run out-of-date tasks (all, or the named ones plus their producers)
    Run {
        /// Path to crbl.yaml
        #[arg(short, long, default_value = "crbl.yaml")]
        file: PathBuf,

        /// Tasks to run
        tasks: Vec<String>,

        /// Write profile.csv into the execution directory
        #[arg(long)]
        profile: bool,

        /// Keep running tasks that do not depend on a failed one
        #[arg(long)]
        continue_on_error: bool,
    },

    /// Show which tasks are up to date
    Status {
        /// Path to crbl.yaml
        #[arg(short, long, default_value = "crbl.yaml")]
        file: PathBuf,
    },

    /// Remove task targets and forget their recorded dependencies
    Clean {
        /// Path to crbl.yaml
        #[arg(short, long, default_value = "crbl.yaml")]
        file: PathBuf,

        /// Tasks to clean (default: all, in reverse order)
        tasks: Vec<String>,
    },

    /// List pipeline tasks in execution order
    List {
        /// Path to crbl.yaml
        #[arg(short, long, default_value = "crbl.yaml")]
        file: PathBuf,
    },
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<(), String> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Run {
            file,
            tasks,
            profile,
            continue_on_error,
        } => cmd_run(&file, &tasks, profile, continue_on_error),
        Commands::Status { file } => cmd_status(&file),
        Commands::Clean { file, tasks } => cmd_clean(&file, &tasks),
        Commands::List { file } => cmd_list(&file),
    }
}

const TEMPLATE: &str = r#"version: "1.0"
name: my-annotation
description: "Reciprocal-best-hit annotation"

inputs:
  training: reference.pep.fa
  transcriptome: transcriptome.fa
  database: database.pep.fa

model: crbl.model.json
chunk_size: 10000

last:
  lastdb: lastdb
  lastal: lastal
  threads: 1

classifier:
  nu: 0.1

execution:
  directory: crbl-work
  profile: false
  failure: stop_on_first

files: {}
"#;

fn cmd_init(path: &Path) -> Result<(), String> {
    let config_path = path.join("crbl.yaml");
    if config_path.exists() {
        return Err(format!("{} already exists", config_path.display()));
    }
    std::fs::write(&config_path, TEMPLATE)
        .map_err(|e| format!("cannot write {}: {}", config_path.display(), e))?;

    println!("Initialized crbl project at {}", path.display());
    println!("  Created: {}", config_path.display());
    Ok(())
}

fn cmd_validate(file: &Path) -> Result<(), String> {
    let config = parse_and_validate(file)?;
    println!(
        "OK: {} (training {}, transcriptome {}, database {})",
        config.name,
        config.inputs.training,
        config.inputs.transcriptome,
        config.inputs.database
    );
    Ok(())
}

/// Parse and validate a crbl config file, returning errors if invalid.
fn parse_and_validate(file: &Path) -> Result<PipelineConfig, String> {
    let config = parser::parse_config_file(file)?;
    let errors = parser::validate_config(&config);
    if errors.is_empty() {
        return Ok(config);
    }
    for e in &errors {
        eprintln!("  ERROR: {}", e);
    }
    Err(format!("{} validation error(s)", errors.len()))
}

/// Directory holding the config file, absolute.
fn config_base(file: &Path) -> Result<PathBuf, String> {
    let parent = match file.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::canonicalize(parent).map_err(|e| format!("cannot resolve {}: {}", parent.display(), e))
}

/// Open the engine for `file` and register the pipeline's tasks.
fn open_engine(file: &Path, profile: bool, continue_on_error: bool) -> Result<Engine, String> {
    let config = parse_and_validate(file)?;
    let base = config_base(file)?;

    let mut engine_config = EngineConfig::new(base.join(&config.execution.directory));
    engine_config.namespace = config.execution.namespace.clone();
    engine_config.profile = profile || config.execution.profile;
    engine_config.failure = if continue_on_error {
        FailurePolicy::ContinueIndependent
    } else {
        config.execution.failure
    };

    let mut engine = Engine::open(engine_config).map_err(|e| e.to_string())?;
    let files = FileTable::from_yaml(&config.files).map_err(|e| e.to_string())?;
    Crbl::from_config(&config, &base)
        .register(&mut engine, files)
        .map_err(|e| e.to_string())?;
    Ok(engine)
}

fn cmd_run(
    file: &Path,
    tasks: &[String],
    profile: bool,
    continue_on_error: bool,
) -> Result<(), String> {
    let mut engine = open_engine(file, profile, continue_on_error)?;
    let report = engine.run(tasks).map_err(|e| e.to_string())?;

    for name in &report.executed {
        println!("  ran:        {}", name);
    }
    for name in &report.skipped {
        println!("  up-to-date: {}", name);
    }
    for name in &report.blocked {
        println!("  blocked:    {}", name);
    }
    for f in &report.failures {
        println!("  FAILED:     {} ({})", f.task, f.error);
    }
    println!();
    if !report.success() {
        println!("Run completed with errors: {}", report);
        return Err(format!("{} task(s) failed", report.failures.len()));
    }
    println!("Run complete: {}", report);
    Ok(())
}

fn cmd_status(file: &Path) -> Result<(), String> {
    let engine = open_engine(file, false, false)?;
    let statuses = engine.statuses().map_err(|e| e.to_string())?;
    for (name, status) in &statuses {
        println!("{:<22} {}", name, status.kind);
        if status.kind != StatusKind::UpToDate {
            for reason in &status.reasons {
                println!("    {}", reason);
            }
        }
    }
    engine
        .print_statuses("\nAll tasks up to date.")
        .map_err(|e| e.to_string())?;
    Ok(())
}

fn cmd_clean(file: &Path, tasks: &[String]) -> Result<(), String> {
    let mut engine = open_engine(file, false, false)?;
    let cleaned = engine.clean(tasks).map_err(|e| e.to_string())?;
    for name in &cleaned {
        println!("  cleaned: {}", name);
    }
    println!("Clean complete: {} task(s).", cleaned.len());
    Ok(())
}

fn cmd_list(file: &Path) -> Result<(), String> {
    let engine = open_engine(file, false, false)?;
    let names: Vec<String> = engine.registry().names().map(String::from).collect();
    let order = crate::core::resolver::execution_order(engine.registry(), &names)
        .map_err(|e| e.to_string())?;
    for name in &order {
        let task = engine.registry().get(name).map_err(|e| e.to_string())?;
        println!(
            "{:<22} {} dep(s), {} target(s)",
            name,
            task.file_deps().len(),
            task.targets().len()
        );
    }
    Ok(())
}
