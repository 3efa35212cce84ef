use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use flate2::read::MultiGzDecoder;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::CrateError;

pub(crate) fn fs_err(context: impl std::fmt::Display, err: io::Error) -> CrateError {
    CrateError::Filesystem(format!("{context}: {err}"))
}

/// Renames `from` to `to`; when the rename crosses devices, copies then
/// deletes the source instead. Refuses to replace an existing `to`.
pub fn move_dir(from: &Path, to: &Path) -> Result<(), CrateError> {
    if to.exists() {
        return Err(CrateError::Filesystem(format!(
            "refusing to overwrite {}",
            to.display()
        )));
    }
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::CrossesDevices => {
            tracing::debug!(
                "rename {} -> {} crosses devices; copying",
                from.display(),
                to.display()
            );
            let parent = to
                .parent()
                .ok_or_else(|| CrateError::Filesystem("invalid destination path".to_string()))?;
            let staging = tempfile::Builder::new()
                .prefix(".mgf-move")
                .tempdir_in(parent)
                .map_err(|err| fs_err(parent.display(), err))?;
            let staged = staging.path().join("payload");
            copy_dir_recursive(from, &staged)?;
            fs::rename(&staged, to).map_err(|err| fs_err(to.display(), err))?;
            fs::remove_dir_all(from).map_err(|err| fs_err(from.display(), err))?;
            Ok(())
        }
        Err(err) => Err(fs_err(
            format!("rename {} -> {}", from.display(), to.display()),
            err,
        )),
    }
}

#[cfg(unix)]
pub(crate) fn set_shared_mode(path: &Path) -> Result<(), CrateError> {
    use std::os::unix::fs::PermissionsExt;

    let mode = if path.is_dir() { 0o755 } else { 0o644 };
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .map_err(|err| fs_err(path.display(), err))
}

#[cfg(not(unix))]
pub(crate) fn set_shared_mode(_path: &Path) -> Result<(), CrateError> {
    Ok(())
}

pub fn copy_dir_recursive(source: &Path, dest: &Path) -> Result<(), CrateError> {
    fs::create_dir_all(dest).map_err(|err| fs_err(dest.display(), err))?;
    for entry in walk_dir(source)? {
        let relative = entry
            .strip_prefix(source)
            .map_err(|err| CrateError::Filesystem(err.to_string()))?;
        let target = dest.join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&target).map_err(|err| fs_err(target.display(), err))?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|err| fs_err(parent.display(), err))?;
            }
            fs::copy(&entry, &target).map_err(|err| fs_err(entry.display(), err))?;
        }
    }
    Ok(())
}

pub fn walk_dir(root: &Path) -> Result<Vec<PathBuf>, CrateError> {
    let mut items = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(path) = stack.pop() {
        let entries = fs::read_dir(&path).map_err(|err| fs_err(path.display(), err))?;
        for entry in entries {
            let entry = entry.map_err(|err| fs_err(path.display(), err))?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path.clone());
            }
            items.push(path);
        }
    }
    items.sort();
    Ok(items)
}

pub fn list_files(dir: &Path, keep: impl Fn(&str) -> bool) -> Result<Vec<PathBuf>, CrateError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for entry in fs::read_dir(dir).map_err(|err| fs_err(dir.display(), err))? {
        let entry = entry.map_err(|err| fs_err(dir.display(), err))?;
        let path = entry.path();
        let matches = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(&keep)
            .unwrap_or(false);
        if path.is_file() && matches {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}

pub fn write_zip(source: &Path, destination: &Path) -> Result<(), CrateError> {
    let file = fs::File::create(destination).map_err(|err| fs_err(destination.display(), err))?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for entry in walk_dir(source)? {
        let relative = entry
            .strip_prefix(source)
            .map_err(|err| CrateError::Filesystem(err.to_string()))?;
        let name = relative
            .components()
            .map(|part| part.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if entry.is_dir() {
            writer
                .add_directory(format!("{name}/"), options)
                .map_err(|err| CrateError::Filesystem(err.to_string()))?;
            continue;
        }
        writer
            .start_file(name, options)
            .map_err(|err| CrateError::Filesystem(err.to_string()))?;
        let mut input = fs::File::open(&entry).map_err(|err| fs_err(entry.display(), err))?;
        io::copy(&mut input, &mut writer).map_err(|err| fs_err(entry.display(), err))?;
    }
    writer
        .finish()
        .map_err(|err| CrateError::Filesystem(err.to_string()))?;
    Ok(())
}

pub fn validate_gzip(path: &Path) -> Result<(), CrateError> {
    let file = fs::File::open(path).map_err(|err| fs_err(path.display(), err))?;
    let mut decoder = MultiGzDecoder::new(io::BufReader::new(file));
    io::copy(&mut decoder, &mut io::sink())
        .map_err(|err| CrateError::Filesystem(format!("invalid gzip {}: {err}", path.display())))?;
    Ok(())
}
