#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use flate2::Compression;
use flate2::write::GzEncoder;

use metagoflow_crate::codec::ArchiveCodec;
use metagoflow_crate::domain::{Organization, Person, ProvenanceRecord, RefCodeRecord};
use metagoflow_crate::error::CrateError;
use metagoflow_crate::fs_util::copy_dir_recursive;
use metagoflow_crate::lookup::InMemoryLookup;
use metagoflow_crate::manifest::{FIXED_ENTRIES, PREFIXED_ENTRIES};

pub const RUN_ID: &str = "HWLTKDRXY.UDI210";
pub const REF_CODE: &str = "EMOBON_AAOT_Wa_42";
pub const PREFIX: &str = "DBH";
pub const ACCESSION: &str = "ERS14961234";

/// Archive codec that "extracts" by copying a registered fixture tree.
/// Archives without a fixture behave like corrupt tarballs.
#[derive(Default)]
pub struct FakeCodec {
    fixtures: HashMap<PathBuf, PathBuf>,
    pub packed: Mutex<Vec<(PathBuf, String)>>,
}

impl FakeCodec {
    pub fn with_fixture(mut self, archive: &Path, tree: &Path) -> Self {
        self.fixtures
            .insert(archive.to_path_buf(), tree.to_path_buf());
        self
    }
}

impl ArchiveCodec for FakeCodec {
    fn extract(&self, archive: &Path, destination: &Path) -> Result<(), CrateError> {
        match self.fixtures.get(archive) {
            Some(tree) => copy_dir_recursive(tree, destination),
            None => Err(CrateError::ExternalTool {
                tool: "tar".to_string(),
                message: "bzip2: data integrity error".to_string(),
            }),
        }
    }

    fn pack(&self, root: &Path, entry: &str, destination: &Path) -> Result<(), CrateError> {
        assert!(root.join(entry).is_dir());
        fs::write(destination, format!("tar of {entry}")).unwrap();
        self.packed
            .lock()
            .unwrap()
            .push((destination.to_path_buf(), entry.to_string()));
        Ok(())
    }

    fn compress(&self, file: &Path) -> Result<PathBuf, CrateError> {
        let mut compressed = file.as_os_str().to_owned();
        compressed.push(".bz2");
        let compressed = PathBuf::from(compressed);
        fs::rename(file, &compressed).unwrap();
        Ok(compressed)
    }
}

pub fn gz(content: &str) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(content.as_bytes()).unwrap();
    encoder.finish().unwrap()
}

/// Writes the contents of a complete run directory into `root`: two yml files
/// at the top and every result file except those in `skip`.
pub fn write_run_tree(root: &Path, skip: &[&str]) {
    fs::create_dir_all(root.join("results")).unwrap();
    fs::create_dir_all(root.join("prov")).unwrap();
    fs::write(root.join("green.yml"), "threads: 4\n").unwrap();
    fs::write(root.join("green-job.yml"), "job: true\n").unwrap();

    let results = root.join("results");
    for template in FIXED_ENTRIES.iter().chain(PREFIXED_ENTRIES.iter()) {
        let relative = template.replace("{prefix}", PREFIX);
        if skip.contains(&relative.as_str()) {
            continue;
        }
        let path = results.join(&relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        if relative.ends_with(".gz") {
            fs::write(&path, gz(&relative)).unwrap();
        } else {
            fs::write(&path, relative.as_bytes()).unwrap();
        }
    }

    let categorisation = results.join("sequence-categorisation");
    fs::create_dir_all(&categorisation).unwrap();
    for name in [
        "DBH.merged_SSU.fasta.gz",
        "DBH.merged_5S.fasta.gz",
        "DBH.merged_LSU.fasta.gz",
    ] {
        fs::write(categorisation.join(name), gz(name)).unwrap();
    }
    fs::write(categorisation.join("README.txt"), "not packaged").unwrap();
}

pub fn provenance() -> ProvenanceRecord {
    ProvenanceRecord {
        sampling_person: Person {
            name: "Ana Costa".to_string(),
            identifier: Some("https://orcid.org/0000-0002-1825-0097".to_string()),
        },
        sampling_institution: Organization {
            name: "Flanders Marine Institute".to_string(),
            identifier: Some("https://ror.org/0496vr396".to_string()),
        },
        creator_person: Person {
            name: "Jan Peeters".to_string(),
            identifier: None,
        },
        creator_institution: Organization {
            name: "Flanders Marine Institute".to_string(),
            identifier: Some("https://ror.org/0496vr396".to_string()),
        },
        software_version: "v5.1".to_string(),
    }
}

pub fn lookup() -> InMemoryLookup {
    InMemoryLookup::new()
        .with_run(
            RUN_ID,
            RefCodeRecord {
                ref_code: REF_CODE.to_string(),
                prefix: PREFIX.to_string(),
                batch_number: 2,
                source_mat_id: Some("EMOBON_AAOT_Wa_42_so".to_string()),
            },
        )
        .with_provenance(REF_CODE, provenance())
        .with_accession(REF_CODE, 2, ACCESSION)
}

pub fn tree_has_temp_residue(dir: &Path) -> bool {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(Result::ok)
        .any(|entry| entry.file_name().to_string_lossy().starts_with('.'))
}
