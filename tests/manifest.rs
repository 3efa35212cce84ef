mod common;

use std::fs;
use std::io::Read;
use std::path::Path;

use assert_matches::assert_matches;
use flate2::read::MultiGzDecoder;

use metagoflow_crate::app::manifest_context;
use metagoflow_crate::config::{ConfigLoader, RunConfig};
use metagoflow_crate::domain::{RefCodeRecord, RunId};
use metagoflow_crate::error::CrateError;
use metagoflow_crate::manifest::{Manifest, ManifestResolver};

use common::{PREFIX, REF_CODE, RUN_ID, gz, write_run_tree};

const CDS: &str = "functional-annotation/DBH.merged_CDS.I5.tsv.gz";

fn config() -> RunConfig {
    ConfigLoader::resolve_str("run_parameter: green\nmetagoflow_version: v5.1\n").unwrap()
}

fn resolve(root: &Path) -> Result<Manifest, CrateError> {
    let config = config();
    let run_id: RunId = RUN_ID.parse().unwrap();
    let record = RefCodeRecord {
        ref_code: REF_CODE.to_string(),
        prefix: PREFIX.to_string(),
        batch_number: 1,
        source_mat_id: None,
    };
    let context = manifest_context(&config, &run_id, &record);
    ManifestResolver::default().resolve(root, &config, &context)
}

fn cds_present(manifest: &Manifest) -> bool {
    manifest
        .entries
        .iter()
        .find(|entry| entry.path == CDS)
        .map(|entry| entry.present)
        .unwrap_or(false)
}

fn decompressed(path: &Path) -> String {
    let mut text = String::new();
    MultiGzDecoder::new(fs::File::open(path).unwrap())
        .read_to_string(&mut text)
        .unwrap();
    text
}

#[test]
fn chunked_interproscan_output_is_merged_on_resolve() {
    let temp = tempfile::tempdir().unwrap();
    write_run_tree(temp.path(), &[CDS]);
    let annotation = temp.path().join("results/functional-annotation");
    fs::write(annotation.join("DBH.merged_CDS.I5_2.tsv.gz"), gz("second\n")).unwrap();
    fs::write(annotation.join("DBH.merged_CDS.I5_1.tsv.gz"), gz("first\n")).unwrap();
    fs::write(annotation.join("DBH.merged_CDS.I5.tsv.chunks"), "chunk list").unwrap();

    let manifest = resolve(temp.path()).unwrap();
    assert!(cds_present(&manifest));
    assert_eq!(manifest.missing().count(), 0);

    let merged = temp.path().join("results").join(CDS);
    assert_eq!(decompressed(&merged), "first\nsecond\n");
    assert!(!annotation.join("DBH.merged_CDS.I5_1.tsv.gz").exists());
    assert!(!annotation.join("DBH.merged_CDS.I5_2.tsv.gz").exists());
    assert!(!annotation.join("DBH.merged_CDS.I5.tsv.chunks").exists());

    let again = resolve(temp.path()).unwrap();
    assert!(cds_present(&again));
    assert_eq!(decompressed(&merged), "first\nsecond\n");
}

#[test]
fn absent_interproscan_output_without_chunks_is_missing() {
    let temp = tempfile::tempdir().unwrap();
    write_run_tree(temp.path(), &[CDS]);

    assert_matches!(
        resolve(temp.path()).unwrap_err(),
        CrateError::MissingFile { entry, .. } if entry == CDS
    );
}

#[test]
fn corrupt_chunks_leave_the_run_untouched() {
    let temp = tempfile::tempdir().unwrap();
    write_run_tree(temp.path(), &[CDS]);
    let annotation = temp.path().join("results/functional-annotation");
    fs::write(annotation.join("DBH.merged_CDS.I5_1.tsv.gz"), b"not gzip").unwrap();

    assert!(resolve(temp.path()).is_err());
    assert!(!temp.path().join("results").join(CDS).exists());
    assert!(annotation.join("DBH.merged_CDS.I5_1.tsv.gz").exists());
}
