use camino::Utf8PathBuf;
use serde::Serialize;

use crate::codec::ArchiveCodec;
use crate::domain::RunId;
use crate::error::CrateError;
use crate::fs_util;
use crate::workspace::Workspace;

pub const FILE_PATTERNS: &[&str] = &[
    "*.fastq.trimmed.fasta",
    "*.merged_CDS.faa",
    "*.merged_CDS.ffn",
    "*.merged.cmsearch.all.tblout.deoverlapped",
    "*.merged.fasta",
    "*.merged.motus.tsv",
    "*.merged.unfiltered_fasta",
    "final.contigs.fa",
];

#[derive(Debug, Clone, Serialize)]
pub struct PrepareResult {
    pub run_id: RunId,
    pub path: Utf8PathBuf,
    pub compressed: Vec<String>,
    pub skipped: bool,
}

pub fn matches_pattern(pattern: &str, name: &str) -> bool {
    match pattern.strip_prefix('*') {
        Some(suffix) => name.len() > suffix.len() && name.ends_with(suffix),
        None => name == pattern,
    }
}

pub fn prepare_run<C: ArchiveCodec>(
    workspace: &Workspace,
    codec: &C,
    run_id: &RunId,
) -> Result<PrepareResult, CrateError> {
    let target = workspace.prepared_dir(run_id);
    if target.as_std_path().exists() {
        tracing::info!("{run_id} already prepared at {target}");
        return Ok(PrepareResult {
            run_id: run_id.clone(),
            path: target,
            compressed: Vec::new(),
            skipped: true,
        });
    }
    let run_root = workspace.run_dir(run_id);
    let results = run_root.join("results");
    if !results.as_std_path().is_dir() {
        return Err(CrateError::Filesystem(format!(
            "no results directory in {run_root}"
        )));
    }

    let mut compressed = Vec::new();
    for file in fs_util::list_files(results.as_std_path(), is_bulky)? {
        tracing::debug!("compressing {}", file.display());
        let output = codec.compress(&file)?;
        let relative = output
            .strip_prefix(run_root.as_std_path())
            .unwrap_or(&output)
            .to_string_lossy()
            .to_string();
        compressed.push(relative);
    }
    tracing::info!("compressed {} files in {run_id}", compressed.len());

    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent.as_std_path())
            .map_err(|err| fs_util::fs_err(parent, err))?;
    }
    fs_util::move_dir(run_root.as_std_path(), target.as_std_path())?;
    Ok(PrepareResult {
        run_id: run_id.clone(),
        path: target,
        compressed,
        skipped: false,
    })
}

fn is_bulky(name: &str) -> bool {
    FILE_PATTERNS
        .iter()
        .any(|pattern| matches_pattern(pattern, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patterns() {
        assert!(matches_pattern("*.merged.fasta", "DBH.merged.fasta"));
        assert!(!matches_pattern("*.merged.fasta", "DBH.merged.fasta.bz2"));
        assert!(!matches_pattern("*.merged.fasta", ".merged.fasta"));
        assert!(matches_pattern("final.contigs.fa", "final.contigs.fa"));
        assert!(!matches_pattern("final.contigs.fa", "x.final.contigs.fa"));
    }
}
