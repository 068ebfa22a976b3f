//! Drives a merge run: open each selected workbook, copy its sheets, build the
//! index, save.

use chrono::Local;
use log::{error, info, warn};
use std::path::PathBuf;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use super::copier::SheetCopyEngine;
use super::error::{error_chain, MergeError};
use super::index::IndexBuilder;
use super::model::TargetDocument;
use super::naming::NameAllocator;
use super::settings::MergeSettings;
use super::store::{compute_checksum, WorkbookStore};
use super::types::{CopyWarning, FileDescriptor, MergeRecord, Progress};

/// Where a run reports its narrative and progress.
///
/// Every line also goes through the `log` facade; the channels are optional
/// so library callers can run silently.
#[derive(Debug, Clone, Default)]
pub struct MergeEvents {
    log_tx: Option<UnboundedSender<String>>,
    progress_tx: Option<UnboundedSender<Progress>>,
}

impl MergeEvents {
    pub fn new(log_tx: UnboundedSender<String>, progress_tx: UnboundedSender<Progress>) -> Self {
        MergeEvents {
            log_tx: Some(log_tx),
            progress_tx: Some(progress_tx),
        }
    }

    /// Events wired to fresh channels, plus their receiving ends
    pub fn channel() -> (Self, UnboundedReceiver<String>, UnboundedReceiver<Progress>) {
        let (log_tx, log_rx) = mpsc::unbounded_channel();
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        (MergeEvents::new(log_tx, progress_tx), log_rx, progress_rx)
    }

    pub fn silent() -> Self {
        Self::default()
    }

    fn info(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{}", message);
        self.send(message);
    }

    fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        warn!("{}", message);
        self.send(message);
    }

    fn error(&self, message: impl Into<String>) {
        let message = message.into();
        error!("{}", message);
        self.send(message);
    }

    fn send(&self, message: String) {
        // A dropped receiver only means nobody is listening any more
        if let Some(tx) = &self.log_tx {
            let _ = tx.send(message);
        }
    }

    fn progress(&self, progress: Progress) {
        if let Some(tx) = &self.progress_tx {
            let _ = tx.send(progress);
        }
    }
}

/// Result of a successful run
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub output_path: PathBuf,
    /// Copied sheets in copy order
    pub records: Vec<MergeRecord>,
    pub warnings: Vec<CopyWarning>,
    /// Files that could not be opened
    pub skipped_files: Vec<PathBuf>,
    pub index_sheet: Option<String>,
    pub checksum: Option<String>,
}

pub struct MergeOrchestrator<S: WorkbookStore> {
    store: S,
}

impl<S: WorkbookStore> MergeOrchestrator<S> {
    pub fn new(store: S) -> Self {
        MergeOrchestrator { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Merge the selected files into one workbook at the configured output path.
    ///
    /// A fatal error is written to the log channel before it is returned.
    pub fn run(
        &self,
        files: &[FileDescriptor],
        settings: &MergeSettings,
        events: &MergeEvents,
    ) -> Result<MergeOutcome, MergeError> {
        self.merge(files, settings, events).map_err(|e| {
            events.error(format!("CRITICAL ERROR in merge: {}", error_chain(&e)));
            e
        })
    }

    fn merge(
        &self,
        files: &[FileDescriptor],
        settings: &MergeSettings,
        events: &MergeEvents,
    ) -> Result<MergeOutcome, MergeError> {
        events.info("Initializing merge process...");

        let selected: Vec<&FileDescriptor> = files.iter().filter(|f| f.selected).collect();
        if selected.is_empty() {
            return Err(MergeError::validation("No files selected for merging."));
        }
        settings.validate()?;

        events.info(format!("Preserving formulas: {}", settings.preserve_formulas));

        let total: usize = selected.iter().map(|f| f.sheet_count).sum();
        let engine = SheetCopyEngine::new(settings.preserve_formulas);
        let sheet_names = NameAllocator::sheets();

        let mut target = TargetDocument::new();
        let mut records = Vec::new();
        let mut warnings = Vec::new();
        let mut skipped_files = Vec::new();

        for (position, file) in selected.iter().enumerate() {
            let file_index = position + 1;
            events.info(format!(
                "Processing File {}/{}: {}",
                file_index,
                selected.len(),
                file.display_name
            ));

            let source = match self.store.open(&file.path, settings.preserve_formulas) {
                Ok(document) => document,
                Err(e) => {
                    events.warn(format!("ERROR opening file {}: {}", file.display_name, e));
                    skipped_files.push(file.path.clone());
                    continue;
                }
            };

            let prefix = format!("{}_", file_index);
            for sheet in &source.sheets {
                let new_name = sheet_names.allocate(&prefix, &sheet.name, &target.sheet_names());
                events.info(format!("  > Copying '{}' -> '{}'", sheet.name, new_name));

                match engine.copy_sheet(sheet, &source.dxfs, &mut target, &new_name) {
                    Ok(report) => {
                        let read_losses = source
                            .warnings
                            .iter()
                            .filter(|w| w.sheet == sheet.name)
                            .map(|w| CopyWarning {
                                sheet: report.sheet_name.clone(),
                                ..w.clone()
                            });
                        let sheet_warnings: Vec<CopyWarning> =
                            read_losses.chain(report.warnings).collect();
                        // Already on the `log` facade; only the channel still needs them
                        for warning in &sheet_warnings {
                            events.send(warning.to_string());
                        }
                        warnings.extend(sheet_warnings);
                        records.push(MergeRecord {
                            file_index,
                            file_name: file.display_name.clone(),
                            original_sheet_name: sheet.name.clone(),
                            new_sheet_name: report.sheet_name,
                        });
                        events.progress(Progress::new(records.len(), total));
                    }
                    Err(e) => events.warn(format!("ERROR copying sheet '{}': {}", sheet.name, e)),
                }
            }
        }

        let mut index_sheet = None;
        if settings.create_index_sheet && !records.is_empty() {
            events.info("Generating Index sheet...");
            match IndexBuilder::new().build(&mut target, &records, Local::now().naive_local()) {
                Ok(name) => index_sheet = name,
                Err(e) => events.warn(format!("ERROR creating index sheet: {}", e)),
            }
        }

        if target.sheets().is_empty() {
            return Err(MergeError::validation("No sheets were copied; nothing to save."));
        }
        if let Some(name) = target.ensure_visible_sheet() {
            events.warn(format!("All sheets were hidden; made '{}' visible", name));
        }

        let output_path = settings.output_path();
        events.info(format!("Saving to {}...", output_path.display()));
        self.store.save(&target, &output_path)?;

        let checksum = match compute_checksum(&output_path) {
            Ok(sum) => {
                info!("SHA-256 {}: {}", output_path.display(), sum);
                Some(sum)
            }
            Err(e) => {
                warn!("Could not checksum {}: {}", output_path.display(), e);
                None
            }
        };

        events.info("Merge Complete!");
        events.info(format!("File saved: {}", output_path.display()));

        Ok(MergeOutcome {
            output_path,
            records,
            warnings,
            skipped_files,
            index_sheet,
            checksum,
        })
    }
}

// ==================== Background Task ====================

/// A merge running on a blocking task
pub struct MergeHandle {
    pub logs: UnboundedReceiver<String>,
    pub progress: UnboundedReceiver<Progress>,
    pub task: JoinHandle<Result<MergeOutcome, MergeError>>,
}

/// Start a merge on tokio's blocking pool.
///
/// Both receivers close once the run finishes, so draining them to the end and
/// then awaiting [`join_merge`] never blocks forever.
pub fn spawn_merge<S>(store: S, files: Vec<FileDescriptor>, settings: MergeSettings) -> MergeHandle
where
    S: WorkbookStore + 'static,
{
    let (events, logs, progress) = MergeEvents::channel();

    let task = tokio::task::spawn_blocking(move || {
        let orchestrator = MergeOrchestrator::new(store);
        orchestrator.run(&files, &settings, &events)
    });

    MergeHandle { logs, progress, task }
}

/// Await a spawned merge, mapping a panicked or cancelled task to an error
pub async fn join_merge(
    task: JoinHandle<Result<MergeOutcome, MergeError>>,
) -> Result<MergeOutcome, MergeError> {
    task.await
        .map_err(|e| MergeError::Task(e.to_string()))?
}
