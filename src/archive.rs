use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use camino::Utf8PathBuf;
use serde::Serialize;

use crate::codec::ArchiveCodec;
use crate::domain::RunId;
use crate::error::CrateError;
use crate::fs_util::{self, fs_err};
use crate::workspace::Workspace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArchiveState {
    Existing,
    ExtractedNested,
    ExtractedFlat,
}

#[derive(Debug, Clone, Serialize)]
pub struct OpenArchive {
    pub run_id: RunId,
    pub root: Utf8PathBuf,
    pub state: ArchiveState,
    pub lacked_top_level_dir: bool,
    pub source: PathBuf,
}

impl OpenArchive {

    pub fn results_dir(&self) -> Utf8PathBuf {
        self.root.join("results")
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Layout {
    Nested(PathBuf),
    Flat,
    Broken,
}

pub struct ArchiveOpener<'a, C: ArchiveCodec> {
    workspace: &'a Workspace,
    codec: &'a C,
}

impl<'a, C: ArchiveCodec> ArchiveOpener<'a, C> {
    pub fn new(workspace: &'a Workspace, codec: &'a C) -> Self {
        Self { workspace, codec }
    }

    pub fn open(&self, archive: &Path) -> Result<OpenArchive, CrateError> {
        let run_id = RunId::from_archive_path(archive)?;
        let run_dir = self.workspace.run_dir(&run_id);
        if run_dir.as_std_path().exists() {
            tracing::debug!("found open archive {run_dir}");
            let lacked_top_level_dir = self
                .workspace
                .repair_marker_path(&run_id)
                .as_std_path()
                .exists();
            return Ok(OpenArchive {
                run_id,
                root: run_dir,
                state: ArchiveState::Existing,
                lacked_top_level_dir,
                source: archive.to_path_buf(),
            });
        }

        self.workspace.ensure_work_root()?;
        let temp = tempfile::Builder::new()
            .prefix(&format!(".{}-open-", run_id.as_str()))
            .tempdir_in(self.workspace.work_root().as_std_path())
            .map_err(|err| fs_err(self.workspace.work_root(), err))?;

        tracing::info!("opening archive {}", archive.display());
        let layout = match self.codec.extract(archive, temp.path()) {
            Ok(()) => classify(temp.path(), &run_id)?,
            Err(err) => {
                tracing::warn!("extraction of {} failed: {err}", archive.display());
                Layout::Broken
            }
        };

        let state = match layout {
            Layout::Nested(inner) => {
                fs_util::move_dir(&inner, run_dir.as_std_path())?;
                ArchiveState::ExtractedNested
            }
            Layout::Flat => {
                tracing::info!("archive {} has no top-level directory", archive.display());
                let kept = temp.keep();
                if let Err(err) = fs_util::set_shared_mode(&kept)
                    .and_then(|()| fs_util::move_dir(&kept, run_dir.as_std_path()))
                {
                    let _ = fs::remove_dir_all(&kept);
                    return Err(err);
                }
                self.mark_needs_repair(&run_id)?;
                ArchiveState::ExtractedFlat
            }
            Layout::Broken => {
                drop(temp);
                let renamed_to = broken_path(archive);
                tracing::error!("archive looks completely broken: {}", archive.display());
                fs::rename(archive, &renamed_to).map_err(|err| fs_err(archive.display(), err))?;
                return Err(CrateError::BrokenArchive {
                    archive: archive.to_path_buf(),
                    renamed_to,
                });
            }
        };

        Ok(OpenArchive {
            run_id,
            root: run_dir,
            state,
            lacked_top_level_dir: state == ArchiveState::ExtractedFlat,
            source: archive.to_path_buf(),
        })
    }

    fn mark_needs_repair(&self, run_id: &RunId) -> Result<(), CrateError> {
        let fixed_dir = self.workspace.fixed_archives_dir();
        fs::create_dir_all(fixed_dir.as_std_path()).map_err(|err| fs_err(&fixed_dir, err))?;
        let marker = self.workspace.repair_marker_path(run_id);
        fs::write(marker.as_std_path(), b"").map_err(|err| fs_err(&marker, err))
    }

    fn clear_repair_marker(&self, run_id: &RunId) -> Result<(), CrateError> {
        let marker = self.workspace.repair_marker_path(run_id);
        match fs::remove_file(marker.as_std_path()) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(fs_err(&marker, err)),
            _ => Ok(()),
        }
    }

    pub fn repair(&self, open: &OpenArchive) -> Result<Option<Utf8PathBuf>, CrateError> {
        if !open.lacked_top_level_dir {
            tracing::debug!("{} needs no repair ({:?})", open.run_id, open.state);
            return Ok(None);
        }
        let fixed = self.workspace.fixed_archive_path(&open.run_id);
        if fixed.as_std_path().exists() {
            tracing::info!("fixed archive already exists: {fixed}");
            self.clear_repair_marker(&open.run_id)?;
            return Ok(Some(fixed));
        }
        let fixed_dir = self.workspace.fixed_archives_dir();
        fs::create_dir_all(fixed_dir.as_std_path()).map_err(|err| fs_err(&fixed_dir, err))?;

        let staging = tempfile::Builder::new()
            .prefix(&format!(".{}-", open.run_id.as_str()))
            .suffix(".tar.bz2")
            .tempfile_in(fixed_dir.as_std_path())
            .map_err(|err| fs_err(&fixed_dir, err))?;
        let parent = open
            .root
            .parent()
            .ok_or_else(|| CrateError::Filesystem("open archive has no parent".to_string()))?;
        tracing::info!("repacking {} into {fixed}", open.root);
        self.codec
            .pack(parent.as_std_path(), open.run_id.as_str(), staging.path())?;
        fs_util::set_shared_mode(staging.path())?;
        staging
            .persist(fixed.as_std_path())
            .map_err(|err| fs_err(&fixed, err.error))?;
        self.clear_repair_marker(&open.run_id)?;
        Ok(Some(fixed))
    }
}

fn classify(extracted: &Path, run_id: &RunId) -> Result<Layout, CrateError> {
    let nested = extracted.join(run_id.as_str());
    if nested.is_dir() {
        return Ok(Layout::Nested(nested));
    }
    let yml_files = fs_util::list_files(extracted, |name| name.ends_with(".yml"))?;
    tracing::debug!("found {} yml files at top level", yml_files.len());
    if extracted.join("results").is_dir() && yml_files.len() == 2 {
        return Ok(Layout::Flat);
    }
    Ok(Layout::Broken)
}

fn broken_path(archive: &Path) -> PathBuf {
    let mut name = archive.as_os_str().to_owned();
    name.push("-broken");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_layouts() {
        let temp = tempfile::tempdir().unwrap();
        let run_id: RunId = "HWLTKDRXY.UDI210".parse().unwrap();

        assert_eq!(classify(temp.path(), &run_id).unwrap(), Layout::Broken);

        fs::create_dir_all(temp.path().join("results")).unwrap();
        fs::write(temp.path().join("green.yml"), b"").unwrap();
        assert_eq!(classify(temp.path(), &run_id).unwrap(), Layout::Broken);

        fs::write(temp.path().join("green-job.yml"), b"").unwrap();
        assert_eq!(classify(temp.path(), &run_id).unwrap(), Layout::Flat);

        fs::create_dir_all(temp.path().join("HWLTKDRXY.UDI210")).unwrap();
        assert_eq!(
            classify(temp.path(), &run_id).unwrap(),
            Layout::Nested(temp.path().join("HWLTKDRXY.UDI210"))
        );
    }

    #[test]
    fn broken_suffix() {
        assert_eq!(
            broken_path(Path::new("/data/HWLTKDRXY.UDI210.tar.bz2")),
            PathBuf::from("/data/HWLTKDRXY.UDI210.tar.bz2-broken")
        );
    }
}
