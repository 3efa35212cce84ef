use std::fs;
use std::path::{Path, PathBuf};

use camino::{Utf8Path, Utf8PathBuf};

use crate::domain::RunId;
use crate::error::CrateError;
use crate::fs_util::fs_err;

#[derive(Debug, Clone)]
pub struct Workspace {
    work_root: Utf8PathBuf,
    output_root: Utf8PathBuf,
}

impl Workspace {
    pub fn new(work_root: Utf8PathBuf, output_root: Utf8PathBuf) -> Self {
        Self {
            work_root,
            output_root,
        }
    }

    pub fn from_std(work_root: &Path, output_root: &Path) -> Result<Self, CrateError> {
        let work_root = Utf8PathBuf::from_path_buf(work_root.to_path_buf())
            .map_err(|_| CrateError::Filesystem("non-utf8 work directory".to_string()))?;
        let output_root = Utf8PathBuf::from_path_buf(output_root.to_path_buf())
            .map_err(|_| CrateError::Filesystem("non-utf8 output directory".to_string()))?;
        Ok(Self::new(work_root, output_root))
    }

    pub fn work_root(&self) -> &Utf8Path {
        &self.work_root
    }

    pub fn output_root(&self) -> &Utf8Path {
        &self.output_root
    }

    pub fn run_dir(&self, run_id: &RunId) -> Utf8PathBuf {
        self.work_root.join(run_id.as_str())
    }

    pub fn fixed_archives_dir(&self) -> Utf8PathBuf {
        self.work_root.join("fixed-archives")
    }

    pub fn fixed_archive_path(&self, run_id: &RunId) -> Utf8PathBuf {
        self.fixed_archives_dir()
            .join(format!("{}.tar.bz2", run_id.as_str()))
    }

    /// Left behind while a flat archive's open directory has no fixed archive.
    pub fn repair_marker_path(&self, run_id: &RunId) -> Utf8PathBuf {
        self.fixed_archives_dir()
            .join(format!("{}.needs-repair", run_id.as_str()))
    }

    pub fn prepared_dir(&self, run_id: &RunId) -> Utf8PathBuf {
        self.work_root
            .join("prepared_archives")
            .join(run_id.as_str())
    }

    pub fn ghost_dir(&self, run_id: &RunId) -> Utf8PathBuf {
        self.work_root.join(format!("{}-ghost", run_id.as_str()))
    }

    pub fn package_dir(&self, ref_code: &str) -> Utf8PathBuf {
        self.output_root.join(format!("{ref_code}-ro-crate"))
    }

    pub fn package_zip(&self, ref_code: &str) -> Utf8PathBuf {
        self.output_root.join(format!("{ref_code}-ro-crate.zip"))
    }

    pub fn ensure_work_root(&self) -> Result<(), CrateError> {
        fs::create_dir_all(self.work_root.as_std_path())
            .map_err(|err| fs_err(&self.work_root, err))
    }

    pub fn ensure_output_root(&self) -> Result<(), CrateError> {
        fs::create_dir_all(self.output_root.as_std_path())
            .map_err(|err| fs_err(&self.output_root, err))
    }

    pub fn existing_package(&self, ref_code: &str) -> Option<Utf8PathBuf> {
        [self.package_dir(ref_code), self.package_zip(ref_code)]
            .into_iter()
            .find(|path| path.as_std_path().exists())
    }

    pub fn list_archives(&self) -> Result<Vec<PathBuf>, CrateError> {
        crate::fs_util::list_files(self.work_root.as_std_path(), |name| {
            name.ends_with(".tar.bz2")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths() {
        let workspace = Workspace::new(Utf8PathBuf::from("/data/mgf"), Utf8PathBuf::from("/out"));
        let run_id: RunId = "HWLTKDRXY.UDI210".parse().unwrap();

        assert_eq!(
            workspace.run_dir(&run_id),
            Utf8PathBuf::from("/data/mgf/HWLTKDRXY.UDI210")
        );
        assert!(
            workspace
                .fixed_archive_path(&run_id)
                .ends_with("fixed-archives/HWLTKDRXY.UDI210.tar.bz2")
        );
        assert!(
            workspace
                .ghost_dir(&run_id)
                .ends_with("HWLTKDRXY.UDI210-ghost")
        );
        assert_eq!(
            workspace.package_zip("EMOBON00084"),
            Utf8PathBuf::from("/out/EMOBON00084-ro-crate.zip")
        );
    }

    #[test]
    fn existing_package_detects_directory_and_zip() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let workspace = Workspace::new(root.clone(), root.join("out"));
        assert!(workspace.existing_package("EMOBON00084").is_none());

        fs::create_dir_all(workspace.package_dir("EMOBON00084").as_std_path()).unwrap();
        assert_eq!(
            workspace.existing_package("EMOBON00084"),
            Some(workspace.package_dir("EMOBON00084"))
        );

        fs::write(workspace.package_zip("EMOBON00085").as_std_path(), b"zip").unwrap();
        assert!(workspace.existing_package("EMOBON00085").is_some());
    }
}
