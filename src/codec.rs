use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Serialize;

use crate::error::CrateError;

pub trait ArchiveCodec: Send + Sync {
    fn extract(&self, archive: &Path, destination: &Path) -> Result<(), CrateError>;
    fn pack(&self, root: &Path, entry: &str, destination: &Path) -> Result<(), CrateError>;
    fn compress(&self, file: &Path) -> Result<PathBuf, CrateError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressorKind {
    Lbzip2,
    Bzip2,
}

impl CompressorKind {
    pub fn program(&self) -> &'static str {
        match self {
            CompressorKind::Lbzip2 => "lbzip2",
            CompressorKind::Bzip2 => "bzip2",
        }
    }
}

impl fmt::Display for CompressorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.program())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compressor {
    pub kind: CompressorKind,
    pub path: PathBuf,
}

impl Compressor {
    pub fn select(locate: impl Fn(&str) -> Option<PathBuf>) -> Result<Self, CrateError> {
        for kind in [CompressorKind::Lbzip2, CompressorKind::Bzip2] {
            if let Some(path) = locate(kind.program()) {
                return Ok(Self { kind, path });
            }
        }
        Err(CrateError::MissingCodec)
    }

    fn compress_args(&self, threads: usize) -> Vec<String> {
        match self.kind {
            CompressorKind::Lbzip2 => vec!["-9".to_string(), "-n".to_string(), threads.to_string()],
            CompressorKind::Bzip2 => vec!["-9".to_string()],
        }
    }

    fn tar_program(&self, threads: usize) -> String {
        match self.kind {
            CompressorKind::Lbzip2 => format!("{} -n {threads}", self.path.display()),
            CompressorKind::Bzip2 => self.path.display().to_string(),
        }
    }
}

#[derive(Clone)]
pub struct SystemCodec {
    tar: PathBuf,
    compressor: Compressor,
    threads: usize,
}

impl SystemCodec {
    pub fn detect() -> Result<Self, CrateError> {
        let compressor = Compressor::select(find_in_path)?;
        let tar = find_in_path("tar").ok_or_else(|| CrateError::MissingTool("tar".to_string()))?;
        let threads = worker_threads();
        tracing::info!(
            "using {} ({} threads) at {}",
            compressor.kind,
            threads,
            compressor.path.display()
        );
        Ok(Self {
            tar,
            compressor,
            threads,
        })
    }

    fn run_cmd(&self, program: &Path, args: &[String]) -> Result<(), String> {
        tracing::debug!("running {} {}", program.display(), args.join(" "));
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|err| err.to_string())?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if stderr.is_empty() {
            Err(format!("command failed: {}", program.display()))
        } else {
            Err(stderr)
        }
    }
}

impl ArchiveCodec for SystemCodec {
    fn extract(&self, archive: &Path, destination: &Path) -> Result<(), CrateError> {
        let args = vec![
            "--use-compress-program".to_string(),
            self.compressor.tar_program(self.threads),
            "-xf".to_string(),
            archive.to_string_lossy().to_string(),
            "-C".to_string(),
            destination.to_string_lossy().to_string(),
        ];
        self.run_cmd(&self.tar, &args)
            .map_err(|message| CrateError::ExternalTool {
                tool: "tar".to_string(),
                message,
            })
    }

    fn pack(&self, root: &Path, entry: &str, destination: &Path) -> Result<(), CrateError> {
        let args = vec![
            "--use-compress-program".to_string(),
            self.compressor.tar_program(self.threads),
            "-cf".to_string(),
            destination.to_string_lossy().to_string(),
            "-C".to_string(),
            root.to_string_lossy().to_string(),
            entry.to_string(),
        ];
        self.run_cmd(&self.tar, &args)
            .map_err(|message| CrateError::ExternalTool {
                tool: "tar".to_string(),
                message,
            })
    }

    fn compress(&self, file: &Path) -> Result<PathBuf, CrateError> {
        let mut args = self.compressor.compress_args(self.threads);
        args.push(file.to_string_lossy().to_string());
        self.run_cmd(&self.compressor.path, &args)
            .map_err(|message| CrateError::ExternalTool {
                tool: self.compressor.kind.to_string(),
                message,
            })?;
        let mut compressed = file.as_os_str().to_owned();
        compressed.push(".bz2");
        Ok(PathBuf::from(compressed))
    }
}

fn worker_threads() -> usize {
    std::thread::available_parallelism()
        .map(|count| count.get().saturating_sub(4))
        .unwrap_or(1)
        .max(1)
}

pub fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.exists() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.exists() {
            return Some(plain);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn prefers_multithreaded_codec() {
        let selected = Compressor::select(|name| Some(PathBuf::from(format!("/usr/bin/{name}"))))
            .unwrap();
        assert_eq!(selected.kind, CompressorKind::Lbzip2);
    }

    #[test]
    fn falls_back_to_bzip2() {
        let selected = Compressor::select(|name| {
            (name == "bzip2").then(|| PathBuf::from("/bin/bzip2"))
        })
        .unwrap();
        assert_eq!(selected.kind, CompressorKind::Bzip2);
        assert_eq!(selected.path, PathBuf::from("/bin/bzip2"));
    }

    #[test]
    fn no_codec_is_fatal() {
        let err = Compressor::select(|_| None).unwrap_err();
        assert_matches!(err, CrateError::MissingCodec);
    }

    #[test]
    fn lbzip2_gets_thread_count() {
        let compressor = Compressor {
            kind: CompressorKind::Lbzip2,
            path: PathBuf::from("/usr/bin/lbzip2"),
        };
        assert_eq!(compressor.tar_program(8), "/usr/bin/lbzip2 -n 8");
        assert_eq!(compressor.compress_args(8), vec!["-9", "-n", "8"]);
    }
}
