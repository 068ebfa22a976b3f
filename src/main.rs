//! # Workbook Merger CLI
//!
//! Scans a folder for `.xlsx`/`.xlsm` workbooks and merges every sheet into a
//! single workbook. The merge runs on a background task; its narrative and
//! progress are streamed to stdout while it works.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

use workbook_merger::merge::error::error_chain;
use workbook_merger::merge::{join_merge, MergeOutcome};
use workbook_merger::{spawn_merge, FolderScanner, MergeError, MergeSettings, XlsxStore};

/// Merge many Excel workbooks into one
#[derive(Parser, Debug)]
#[command(name = "workbook-merger")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Folder to scan for workbooks
    source_dir: PathBuf,

    /// Folder to write the merged workbook to (defaults to the source folder)
    #[arg(long, value_name = "DIR")]
    output_folder: Option<PathBuf>,

    /// File name of the merged workbook
    #[arg(long, value_name = "NAME")]
    output_filename: Option<String>,

    /// Also scan subfolders
    #[arg(long)]
    subfolders: bool,

    /// Include `~$` lock files left behind by open workbooks
    #[arg(long)]
    include_temp: bool,

    /// Add an index sheet linking to every copied sheet
    #[arg(long)]
    index: bool,

    /// Copy last computed values instead of formulas
    #[arg(long)]
    values_only: bool,

    /// File name to leave out of the merge (repeatable)
    #[arg(long, value_name = "FILE_NAME")]
    exclude: Vec<String>,

    /// JSON settings file; flags override its values
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, value_name = "LEVEL", default_value = "warn")]
    log_level: String,
}

impl Cli {
    fn settings(&self) -> Result<MergeSettings, MergeError> {
        let mut settings = match &self.config {
            Some(path) => MergeSettings::load(path)?,
            None => MergeSettings::default(),
        };

        if let Some(folder) = &self.output_folder {
            settings.output_folder = folder.clone();
        }
        if settings.output_folder.as_os_str().is_empty() {
            settings.output_folder = self.source_dir.clone();
        }
        if let Some(name) = &self.output_filename {
            settings.output_filename = name.clone();
        }
        if self.subfolders {
            settings.include_subfolders = true;
        }
        if self.include_temp {
            settings.skip_temp_files = false;
        }
        if self.index {
            settings.create_index_sheet = true;
        }
        if self.values_only {
            settings.preserve_formulas = false;
        }

        Ok(settings)
    }
}

async fn run(cli: Cli) -> Result<MergeOutcome, MergeError> {
    let settings = cli.settings()?;

    let scanner = FolderScanner::new(settings.include_subfolders, settings.skip_temp_files);
    let mut files = scanner.scan(&cli.source_dir)?;

    let output_path = settings.output_path();
    for file in files.iter_mut() {
        let excluded = cli
            .exclude
            .iter()
            .any(|name| name.eq_ignore_ascii_case(&file.display_name));
        // A previous run's output must not be merged into itself
        if excluded || file.path == output_path {
            file.selected = false;
        }
    }

    let selected = files.iter().filter(|f| f.selected).count();
    println!(
        "Found {} workbooks in {} ({} selected)",
        files.len(),
        cli.source_dir.display(),
        selected
    );

    let mut handle = spawn_merge(XlsxStore::new(), files, settings);

    let mut logs_open = true;
    let mut progress_open = true;
    while logs_open || progress_open {
        tokio::select! {
            line = handle.logs.recv(), if logs_open => match line {
                Some(line) => println!("{}", line),
                None => logs_open = false,
            },
            update = handle.progress.recv(), if progress_open => match update {
                Some(update) => println!("[{}/{}]", update.current, update.total),
                None => progress_open = false,
            },
        }
    }

    join_merge(handle.task).await
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(cli.log_level.as_str()))
        .init();

    match run(cli).await {
        Ok(outcome) => {
            if !outcome.warnings.is_empty() {
                println!("{} features could not be copied", outcome.warnings.len());
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", error_chain(&e));
            ExitCode::FAILURE
        }
    }
}
