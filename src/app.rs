use std::path::Path;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use chrono::NaiveDate;
use serde::Serialize;

use crate::archive::{ArchiveOpener, ArchiveState, OpenArchive};
use crate::codec::ArchiveCodec;
use crate::config::{BatchPolicy, PackageFormat, RunConfig};
use crate::domain::{RefCodeRecord, RunId};
use crate::error::CrateError;
use crate::ghost::{GhostResult, create_ghost};
use crate::graph::{AssemblyInput, GraphAssembler};
use crate::lookup::LookupService;
use crate::manifest::ManifestResolver;
use crate::packager::{PackageResult, Packager};
use crate::placeholder::Context;
use crate::prepare::{PrepareResult, prepare_run};
use crate::workspace::Workspace;

#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub object_store_root: String,
    pub format: PackageFormat,
    pub preview_renderer: Option<String>,
    pub today: NaiveDate,
    pub repair: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum RunOutcome {
    Packaged {
        run_id: RunId,
        ref_code: String,
        archive_state: ArchiveState,
        fixed_archive: Option<Utf8PathBuf>,
        missing: Vec<String>,
        package: PackageResult,
    },
    Skipped {
        run_id: RunId,
        reason: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub items: Vec<BatchItemResult>,
}

impl BatchResult {
    pub fn count(&self, status: &str) -> usize {
        self.items.iter().filter(|item| item.status == status).count()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchItemResult {
    pub archive: String,
    pub status: String,
    pub run_id: Option<String>,
    pub ref_code: Option<String>,
    pub package: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct App<L: LookupService, C: ArchiveCodec> {
    workspace: Workspace,
    lookup: L,
    codec: C,
    assembler: GraphAssembler,
}

impl<L: LookupService, C: ArchiveCodec> App<L, C> {
    pub fn new(workspace: Workspace, lookup: L, codec: C, assembler: GraphAssembler) -> Self {
        Self {
            workspace,
            lookup,
            codec,
            assembler,
        }
    }

    pub fn open(&self, archive: &Path, sink: &dyn ProgressSink) -> Result<OpenArchive, CrateError> {
        sink.event(ProgressEvent {
            message: format!("phase=Open; {}", archive.display()),
            elapsed: None,
        });
        ArchiveOpener::new(&self.workspace, &self.codec).open(archive)
    }

    pub fn repair(
        &self,
        archive: &Path,
        sink: &dyn ProgressSink,
    ) -> Result<Option<Utf8PathBuf>, CrateError> {
        let open = self.open(archive, sink)?;
        sink.event(ProgressEvent {
            message: format!("phase=Repair; {}", open.run_id),
            elapsed: None,
        });
        ArchiveOpener::new(&self.workspace, &self.codec).repair(&open)
    }

    pub fn ghost(&self, archive: &Path, sink: &dyn ProgressSink) -> Result<GhostResult, CrateError> {
        let open = self.open(archive, sink)?;
        sink.event(ProgressEvent {
            message: format!("phase=Ghost; {}", open.run_id),
            elapsed: None,
        });
        create_ghost(&self.workspace, &open.run_id, open.root.as_std_path())
    }

    pub fn prepare(
        &self,
        archive: &Path,
        sink: &dyn ProgressSink,
    ) -> Result<PrepareResult, CrateError> {
        let run_id = RunId::from_archive_path(archive)?;
        if !self.workspace.prepared_dir(&run_id).as_std_path().exists() {
            self.open(archive, sink)?;
        }
        sink.event(ProgressEvent {
            message: format!("phase=Prepare; {run_id}"),
            elapsed: None,
        });
        prepare_run(&self.workspace, &self.codec, &run_id)
    }

    pub fn build(
        &self,
        archive: &Path,
        config: &RunConfig,
        options: &BuildOptions,
        sink: &dyn ProgressSink,
    ) -> Result<RunOutcome, CrateError> {
        let started = Instant::now();
        let run_id = RunId::from_archive_path(archive)?;

        let ghost = self.workspace.ghost_dir(&run_id);
        if ghost.as_std_path().exists() {
            tracing::info!("skipping {run_id}: ghost archive {ghost} exists");
            return Ok(RunOutcome::Skipped {
                run_id,
                reason: format!("ghost archive exists: {ghost}"),
            });
        }

        sink.event(ProgressEvent {
            message: format!("phase=Lookup; {run_id}"),
            elapsed: None,
        });
        let record = match self.lookup.resolve_ref_code(&run_id) {
            Ok(record) => record,
            Err(err) => {
                if archive.is_file() {
                    self.open(archive, sink)?;
                }
                return Err(err);
            }
        };
        if let Some(existing) = self.workspace.existing_package(&record.ref_code) {
            tracing::info!("skipping {run_id}: {} already packaged", record.ref_code);
            return Ok(RunOutcome::Skipped {
                run_id,
                reason: format!("already packaged: {existing}"),
            });
        }

        let opener = ArchiveOpener::new(&self.workspace, &self.codec);
        let open = self.open(archive, sink)?;
        let fixed_archive = if options.repair {
            opener.repair(&open)?
        } else {
            None
        };

        sink.event(ProgressEvent {
            message: format!("phase=Resolve; {run_id}"),
            elapsed: None,
        });
        let context = manifest_context(config, &run_id, &record);
        let manifest =
            ManifestResolver::default().resolve(open.root.as_std_path(), config, &context)?;

        sink.event(ProgressEvent {
            message: format!("phase=Assemble; {}", record.ref_code),
            elapsed: None,
        });
        let provenance = self.lookup.resolve_provenance(&record.ref_code)?;
        let accession_number = self
            .lookup
            .resolve_ena_accession(&record.ref_code, record.batch_number)?;
        let document = self.assembler.assemble(&AssemblyInput {
            run_id: &run_id,
            config,
            manifest: &manifest,
            record: &record,
            provenance: &provenance,
            accession_number: &accession_number,
            object_store_root: &options.object_store_root,
            today: options.today,
        })?;

        sink.event(ProgressEvent {
            message: format!("phase=Package; {}", record.ref_code),
            elapsed: None,
        });
        let packager = Packager::new(
            &self.workspace,
            options.format,
            options.preview_renderer.clone(),
        );
        let package =
            packager.package(&record.ref_code, open.root.as_std_path(), &manifest, &document)?;

        sink.event(ProgressEvent {
            message: format!("phase=Done; {} -> {}", run_id, package.path),
            elapsed: Some(started.elapsed()),
        });
        Ok(RunOutcome::Packaged {
            run_id,
            ref_code: record.ref_code,
            archive_state: open.state,
            fixed_archive,
            missing: manifest.missing().map(|entry| entry.path.clone()).collect(),
            package,
        })
    }

    pub fn batch(
        &self,
        config: &RunConfig,
        options: &BuildOptions,
        policy: BatchPolicy,
        sink: &dyn ProgressSink,
    ) -> Result<BatchResult, CrateError> {
        let archives = self.workspace.list_archives()?;
        sink.event(ProgressEvent {
            message: format!("phase=Batch; {} archives", archives.len()),
            elapsed: None,
        });
        let mut items = Vec::new();
        for archive in archives {
            match self.build(&archive, config, options, sink) {
                Ok(outcome) => items.push(item_from_outcome(&archive, &outcome)),
                Err(err) if policy.skips(&err) => {
                    tracing::warn!("skipping {}: {err}", archive.display());
                    items.push(BatchItemResult {
                        archive: archive.display().to_string(),
                        status: "failed".to_string(),
                        run_id: RunId::from_archive_path(&archive)
                            .ok()
                            .map(|run_id| run_id.to_string()),
                        ref_code: None,
                        package: None,
                        reason: Some(err.to_string()),
                    });
                }
                Err(err) => return Err(err),
            }
        }
        Ok(BatchResult { items })
    }
}

pub fn manifest_context(config: &RunConfig, run_id: &RunId, record: &RefCodeRecord) -> Context {
    let mut context = Context::new();
    context.extend(config.placeholders());
    context.insert("run_id", run_id.as_str());
    context.insert("ref_code", record.ref_code.as_str());
    context.insert("prefix", record.prefix.as_str());
    context
}

fn item_from_outcome(archive: &Path, outcome: &RunOutcome) -> BatchItemResult {
    match outcome {
        RunOutcome::Packaged {
            run_id,
            ref_code,
            package,
            ..
        } => BatchItemResult {
            archive: archive.display().to_string(),
            status: "packaged".to_string(),
            run_id: Some(run_id.to_string()),
            ref_code: Some(ref_code.clone()),
            package: Some(package.path.to_string()),
            reason: None,
        },
        RunOutcome::Skipped { run_id, reason } => BatchItemResult {
            archive: archive.display().to_string(),
            status: "skipped".to_string(),
            run_id: Some(run_id.to_string()),
            ref_code: None,
            package: None,
            reason: Some(reason.clone()),
        },
    }
}
