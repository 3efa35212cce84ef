use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use camino::Utf8PathBuf;
use serde::Serialize;

use crate::codec::find_in_path;
use crate::config::PackageFormat;
use crate::error::CrateError;
use crate::fs_util::{self, fs_err};
use crate::graph::MetadataDocument;
use crate::manifest::Manifest;
use crate::workspace::Workspace;

pub const METADATA_FILE: &str = "ro-crate-metadata.json";
pub const PREVIEW_FILE: &str = "ro-crate-preview.html";

#[derive(Debug, Clone, Serialize)]
pub struct PackageResult {
    pub ref_code: String,
    pub path: Utf8PathBuf,
    pub format: PackageFormat,
    pub files: usize,
    pub preview: bool,
}

pub struct Packager<'a> {
    workspace: &'a Workspace,
    format: PackageFormat,
    preview_renderer: Option<String>,
}

impl<'a> Packager<'a> {
    pub fn new(
        workspace: &'a Workspace,
        format: PackageFormat,
        preview_renderer: Option<String>,
    ) -> Self {
        Self {
            workspace,
            format,
            preview_renderer,
        }
    }

    pub fn package(
        &self,
        ref_code: &str,
        run_root: &Path,
        manifest: &Manifest,
        document: &MetadataDocument,
    ) -> Result<PackageResult, CrateError> {
        if let Some(existing) = self.workspace.existing_package(ref_code) {
            return Err(CrateError::Filesystem(format!(
                "package already exists: {existing}"
            )));
        }
        self.workspace.ensure_output_root()?;
        let output_root = self.workspace.output_root();
        let staging = tempfile::Builder::new()
            .prefix(&format!(".{ref_code}-staging-"))
            .tempdir_in(output_root.as_std_path())
            .map_err(|err| fs_err(output_root, err))?;
        let crate_dir = staging.path().join(format!("{ref_code}-ro-crate"));
        fs::create_dir_all(&crate_dir).map_err(|err| fs_err(crate_dir.display(), err))?;

        let mut files = 0;
        for entry in manifest.files() {
            let source = entry.source_path(run_root);
            let target = crate_dir.join(&entry.path);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|err| fs_err(parent.display(), err))?;
            }
            fs::copy(&source, &target).map_err(|err| fs_err(source.display(), err))?;
            files += 1;
        }
        tracing::debug!("staged {files} files for {ref_code}");

        let metadata = crate_dir.join(METADATA_FILE);
        fs::write(&metadata, document.to_json_pretty()?)
            .map_err(|err| fs_err(metadata.display(), err))?;

        let preview = match &self.preview_renderer {
            Some(renderer) => {
                render_preview(renderer, &crate_dir)?;
                true
            }
            None => false,
        };

        let path = match self.format {
            PackageFormat::Directory => {
                let target = self.workspace.package_dir(ref_code);
                fs_util::move_dir(&crate_dir, target.as_std_path())?;
                target
            }
            PackageFormat::Zip => {
                let target = self.workspace.package_zip(ref_code);
                let zip_path = staging.path().join(format!("{ref_code}-ro-crate.zip"));
                fs_util::write_zip(&crate_dir, &zip_path)?;
                fs::rename(&zip_path, target.as_std_path()).map_err(|err| fs_err(&target, err))?;
                target
            }
        };
        tracing::info!("wrote package {path}");

        Ok(PackageResult {
            ref_code: ref_code.to_string(),
            path,
            format: self.format,
            files: files + 1,
            preview,
        })
    }
}

fn render_preview(renderer: &str, crate_dir: &Path) -> Result<(), CrateError> {
    let program = resolve_program(renderer)
        .ok_or_else(|| CrateError::MissingTool(renderer.to_string()))?;
    tracing::debug!("rendering preview with {}", program.display());
    let output = Command::new(&program)
        .arg(crate_dir)
        .output()
        .map_err(|err| CrateError::ExternalTool {
            tool: renderer.to_string(),
            message: err.to_string(),
        })?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(CrateError::ExternalTool {
            tool: renderer.to_string(),
            message: if stderr.is_empty() {
                format!("exited with {}", output.status)
            } else {
                stderr
            },
        });
    }
    if !crate_dir.join(PREVIEW_FILE).is_file() {
        tracing::warn!("{renderer} did not produce {PREVIEW_FILE}");
    }
    Ok(())
}

fn resolve_program(renderer: &str) -> Option<PathBuf> {
    let path = Path::new(renderer);
    if path.components().count() > 1 {
        return path.is_file().then(|| path.to_path_buf());
    }
    find_in_path(renderer)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn missing_renderer_is_reported() {
        let temp = tempfile::tempdir().unwrap();
        assert_matches!(
            render_preview("definitely-not-a-renderer-mgf", temp.path()).unwrap_err(),
            CrateError::MissingTool(tool) if tool == "definitely-not-a-renderer-mgf"
        );
    }

    #[test]
    fn explicit_paths_are_not_searched() {
        let temp = tempfile::tempdir().unwrap();
        let script = temp.path().join("render");
        assert!(resolve_program(script.to_str().unwrap()).is_none());
        fs::write(&script, b"#!/bin/sh\n").unwrap();
        assert_eq!(resolve_program(script.to_str().unwrap()), Some(script));
    }
}
