use std::fs;
use std::path::Path;

use camino::Utf8PathBuf;
use serde::Serialize;

use crate::domain::RunId;
use crate::error::CrateError;
use crate::fs_util::{self, fs_err};
use crate::workspace::Workspace;

#[derive(Debug, Clone, Serialize)]
pub struct GhostResult {
    pub run_id: RunId,
    pub path: Utf8PathBuf,
    pub directories: usize,
    pub files: usize,
}

pub fn create_ghost(
    workspace: &Workspace,
    run_id: &RunId,
    run_root: &Path,
) -> Result<GhostResult, CrateError> {
    let ghost = workspace.ghost_dir(run_id);
    if ghost.as_std_path().exists() {
        return Err(CrateError::Filesystem(format!(
            "ghost archive already exists: {ghost}"
        )));
    }
    if !run_root.is_dir() {
        return Err(CrateError::Filesystem(format!(
            "open archive not found: {}",
            run_root.display()
        )));
    }

    let staging = tempfile::Builder::new()
        .prefix(&format!(".{}-ghost-", run_id.as_str()))
        .tempdir_in(workspace.work_root().as_std_path())
        .map_err(|err| fs_err(workspace.work_root(), err))?;
    let mirror = staging.path().join(run_id.as_str());
    fs::create_dir_all(&mirror).map_err(|err| fs_err(mirror.display(), err))?;

    let mut directories = 0;
    let mut files = 0;
    for entry in fs_util::walk_dir(run_root)? {
        let relative = entry
            .strip_prefix(run_root)
            .map_err(|err| CrateError::Filesystem(err.to_string()))?;
        let target = mirror.join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&target).map_err(|err| fs_err(target.display(), err))?;
            directories += 1;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|err| fs_err(parent.display(), err))?;
            }
            fs::File::create(&target).map_err(|err| fs_err(target.display(), err))?;
            files += 1;
        }
    }

    fs_util::move_dir(&mirror, ghost.as_std_path())?;
    tracing::info!("created ghost archive {ghost} ({files} files)");
    Ok(GhostResult {
        run_id: run_id.clone(),
        path: ghost,
        directories,
        files,
    })
}
