use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Serialize;

use crate::config::RunConfig;
use crate::error::CrateError;
use crate::fs_util::{self, fs_err};
use crate::placeholder::Context;

pub const FIXED_ENTRIES: &[&str] = &[
    "fastp.html",
    "final.contigs.fa",
    "RNA-counts",
    "functional-annotation/stats/go.stats",
    "functional-annotation/stats/interproscan.stats",
    "functional-annotation/stats/ko.stats",
    "functional-annotation/stats/orf.stats",
    "functional-annotation/stats/pfam.stats",
    "taxonomy-summary/LSU/krona.html",
    "taxonomy-summary/SSU/krona.html",
];

pub const PREFIXED_ENTRIES: &[&str] = &[
    CDS_ENTRY,
    "functional-annotation/{prefix}.merged.hmm.tsv.gz",
    "functional-annotation/{prefix}.merged.summary.go",
    "functional-annotation/{prefix}.merged.summary.go_slim",
    "functional-annotation/{prefix}.merged.summary.ips",
    "functional-annotation/{prefix}.merged.summary.ko",
    "functional-annotation/{prefix}.merged.summary.pfam",
    "taxonomy-summary/SSU/{prefix}.merged_SSU.fasta.mseq.gz",
    "taxonomy-summary/SSU/{prefix}.merged_SSU.fasta.mseq_hdf5.biom",
    "taxonomy-summary/SSU/{prefix}.merged_SSU.fasta.mseq_json.biom",
    "taxonomy-summary/SSU/{prefix}.merged_SSU.fasta.mseq.tsv",
    "taxonomy-summary/SSU/{prefix}.merged_SSU.fasta.mseq.txt",
    "taxonomy-summary/LSU/{prefix}.merged_LSU.fasta.mseq.gz",
    "taxonomy-summary/LSU/{prefix}.merged_LSU.fasta.mseq_hdf5.biom",
    "taxonomy-summary/LSU/{prefix}.merged_LSU.fasta.mseq_json.biom",
    "taxonomy-summary/LSU/{prefix}.merged_LSU.fasta.mseq.tsv",
    "taxonomy-summary/LSU/{prefix}.merged_LSU.fasta.mseq.txt",
];

pub const CDS_ENTRY: &str = "functional-annotation/{prefix}.merged_CDS.I5.tsv.gz";

pub const SEQUENCE_CATEGORISATION_DIR: &str = "sequence-categorisation";

const MAX_DEPTH: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryKind {
    WorkflowConfig,
    Result,
    SequenceCategorisation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestEntry {
    pub template: String,
    pub path: String,
    pub present: bool,
    pub depth: usize,
    pub kind: EntryKind,
}

impl ManifestEntry {
    fn new(
        template: &str,
        path: String,
        present: bool,
        kind: EntryKind,
    ) -> Result<Self, CrateError> {
        let depth = path_depth(&path)?;
        Ok(Self {
            template: template.to_string(),
            path,
            present,
            depth,
            kind,
        })
    }

    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.path.split('/')
    }

    pub fn source_path(&self, run_root: &Path) -> PathBuf {
        match self.kind {
            EntryKind::WorkflowConfig => run_root.join(&self.path),
            EntryKind::Result | EntryKind::SequenceCategorisation => {
                run_root.join("results").join(&self.path)
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Manifest {
    pub entries: Vec<ManifestEntry>,
    pub workflow_file: String,
}

impl Manifest {
    pub fn files(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.entries.iter().filter(|entry| entry.present)
    }

    pub fn missing(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.entries.iter().filter(|entry| !entry.present)
    }

    pub fn sequence_categorisation(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.kind == EntryKind::SequenceCategorisation)
    }
}

pub struct ManifestResolver {
    templates: Vec<String>,
}

impl Default for ManifestResolver {
    fn default() -> Self {
        Self::new(
            FIXED_ENTRIES
                .iter()
                .chain(PREFIXED_ENTRIES.iter())
                .map(|entry| entry.to_string())
                .collect(),
        )
    }
}

impl ManifestResolver {
    pub fn new(templates: Vec<String>) -> Self {
        Self { templates }
    }

    pub fn resolve(
        &self,
        run_root: &Path,
        config: &RunConfig,
        context: &Context,
    ) -> Result<Manifest, CrateError> {
        let results = run_root.join("results");
        let mut entries = Vec::new();

        let workflow_file = config.workflow_file_name();
        let workflow_path = run_root.join(&workflow_file);
        if !workflow_path.is_file() {
            return Err(CrateError::MissingWorkflowFile(workflow_path));
        }
        entries.push(ManifestEntry::new(
            "{run_parameter}.yml",
            workflow_file.clone(),
            true,
            EntryKind::WorkflowConfig,
        )?);

        for template in &self.templates {
            let path = context.substitute(template)?;
            let depth = path_depth(&path)?;
            let absolute = results.join(&path);
            let mut present = absolute.is_file();
            if !present && template == CDS_ENTRY {
                present = merge_cds_chunks(&absolute)?;
            }
            if !present {
                if !config.is_allowed_missing(&path) {
                    return Err(CrateError::MissingFile {
                        entry: path,
                        path: absolute,
                    });
                }
                tracing::info!("{path} is absent and allow-listed");
            }
            tracing::debug!("manifest entry {path} (depth {depth}, present {present})");
            entries.push(ManifestEntry::new(template, path, present, EntryKind::Result)?);
        }

        let categorisation = results.join(SEQUENCE_CATEGORISATION_DIR);
        let discovered = fs_util::list_files(&categorisation, |name| name.ends_with(".gz"))?;
        tracing::debug!("discovered {} sequence-categorisation files", discovered.len());
        for file in discovered {
            let Some(name) = file.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            let path = format!("{SEQUENCE_CATEGORISATION_DIR}/{name}");
            entries.push(ManifestEntry::new(
                "sequence-categorisation/*.gz",
                path,
                true,
                EntryKind::SequenceCategorisation,
            )?);
        }

        Ok(Manifest {
            entries,
            workflow_file,
        })
    }
}

pub fn path_depth(path: &str) -> Result<usize, CrateError> {
    let segments = path.split('/').collect::<Vec<_>>();
    if segments
        .iter()
        .any(|segment| segment.is_empty() || *segment == "." || *segment == "..")
    {
        return Err(CrateError::InvalidTemplate(format!(
            "manifest path {path:?} is not a plain relative path"
        )));
    }
    if segments.len() > MAX_DEPTH {
        return Err(CrateError::PathTooDeep {
            path: path.to_string(),
            depth: segments.len(),
        });
    }
    Ok(segments.len())
}

/// Joins `<prefix>.merged_CDS.I5_<n>.tsv.gz` chunks into `target`, in filename
/// order, then removes the chunks and their `.chunks` list. Returns whether
/// `target` now exists.
fn merge_cds_chunks(target: &Path) -> Result<bool, CrateError> {
    let (Some(dir), Some(name)) = (target.parent(), target.file_name().and_then(|n| n.to_str()))
    else {
        return Ok(false);
    };
    let Some(stem) = name.strip_suffix(".tsv.gz") else {
        return Ok(false);
    };
    let pattern = Regex::new(&format!(r"^{}_\d+\.tsv\.gz$", regex::escape(stem)))
        .map_err(|err| CrateError::InvalidTemplate(err.to_string()))?;
    let chunks = fs_util::list_files(dir, |file| pattern.is_match(file))?;
    if chunks.is_empty() {
        return Ok(false);
    }

    tracing::info!("merging {} chunks into {}", chunks.len(), target.display());
    let mut staging = tempfile::Builder::new()
        .prefix(".cds-merge")
        .tempfile_in(dir)
        .map_err(|err| fs_err(dir.display(), err))?;
    for chunk in &chunks {
        let mut input = fs::File::open(chunk).map_err(|err| fs_err(chunk.display(), err))?;
        io::copy(&mut input, staging.as_file_mut()).map_err(|err| fs_err(chunk.display(), err))?;
    }
    fs_util::validate_gzip(staging.path())?;
    fs_util::set_shared_mode(staging.path())?;
    staging
        .persist(target)
        .map_err(|err| fs_err(target.display(), err.error))?;

    for chunk in &chunks {
        fs::remove_file(chunk).map_err(|err| fs_err(chunk.display(), err))?;
    }
    let sidecar = dir.join(format!("{stem}.tsv.chunks"));
    if sidecar.exists() {
        fs::remove_file(&sidecar).map_err(|err| fs_err(sidecar.display(), err))?;
    }
    Ok(true)
}
