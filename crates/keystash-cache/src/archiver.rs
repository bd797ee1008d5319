//! Archive creation and extraction through the external `tar` tool.

use crate::compression::Negotiator;
use keystash_core::{ArchiveStage, CompressionMethod, Error, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// Creates and extracts cache archives.
#[derive(Clone)]
pub struct Archiver {
    tar_program: String,
    negotiator: Negotiator,
}

impl Archiver {
    pub fn new(negotiator: Negotiator) -> Self {
        Self {
            tar_program: "tar".to_string(),
            negotiator,
        }
    }

    pub fn with_tar_program(mut self, program: impl Into<String>) -> Self {
        self.tar_program = program.into();
        self
    }

    /// Archive `paths` (relative to `cwd`, or absolute) into `archive_path`.
    ///
    /// Returns the compression method used so it can be stored with the
    /// archive.
    pub async fn create(
        &self,
        archive_path: &Path,
        paths: &[PathBuf],
        cwd: &Path,
    ) -> Result<CompressionMethod> {
        if paths.is_empty() {
            return Err(Error::create("no paths to archive"));
        }

        let method = self.negotiator.choose_method_for_create().await;
        let args = create_args(method, archive_path, paths, cwd);

        info!(
            archive = %archive_path.display(),
            cwd = %cwd.display(),
            paths = paths.len(),
            method = %method,
            "Creating archive"
        );
        self.run_tar(ArchiveStage::Create, &args).await?;

        Ok(method)
    }

    /// Unpack `archive_path` into `cwd`, overwriting existing files.
    ///
    /// `method` must be the one recorded when the archive was created.
    pub async fn extract(
        &self,
        archive_path: &Path,
        method: CompressionMethod,
        cwd: &Path,
    ) -> Result<()> {
        info!(archive = %archive_path.display(), method = %method, "Extracting archive");

        if method.uses_zstd() && !self.negotiator.prober().probe_zstd().await.is_runnable() {
            return Err(Error::extract(format!(
                "archive was created with '{}' but zstd is not available on this host",
                method
            )));
        }

        tokio::fs::create_dir_all(cwd).await.map_err(|e| {
            Error::extract(format!("Failed to create {}: {}", cwd.display(), e))
        })?;

        let args = extract_args(method, archive_path, cwd);
        self.run_tar(ArchiveStage::Extract, &args).await
    }

    async fn run_tar(&self, stage: ArchiveStage, args: &[OsString]) -> Result<()> {
        debug!(program = %self.tar_program, ?args, "Running tar");

        let output = Command::new(&self.tar_program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| Error::Archive {
                stage,
                message: format!("Failed to spawn {}: {}", self.tar_program, e),
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(Error::Archive {
                stage,
                message: format!("{} exited with {}: {}", self.tar_program, output.status, stderr.trim()),
            });
        }
        if !stderr.trim().is_empty() {
            debug!(stderr = %stderr.trim(), "tar diagnostics");
        }

        Ok(())
    }
}

impl Default for Archiver {
    fn default() -> Self {
        Self::new(Negotiator::default())
    }
}

/// Method-specific tar flags.
pub fn compression_args(method: CompressionMethod, stage: ArchiveStage) -> Vec<&'static str> {
    match (method, stage) {
        (CompressionMethod::Gzip, _) => vec!["-z"],
        (CompressionMethod::ZstdWithoutLong, ArchiveStage::Create) => {
            vec!["--use-compress-program", "zstd -T0"]
        }
        (CompressionMethod::ZstdWithoutLong, ArchiveStage::Extract) => {
            vec!["--use-compress-program", "zstd -d"]
        }
        (CompressionMethod::Zstd, ArchiveStage::Create) => {
            vec!["--use-compress-program", "zstd -T0 --long=30"]
        }
        (CompressionMethod::Zstd, ArchiveStage::Extract) => {
            vec!["--use-compress-program", "zstd -d --long=30"]
        }
    }
}

/// Full argument list for `tar -c`.
pub fn create_args(
    method: CompressionMethod,
    archive_path: &Path,
    paths: &[PathBuf],
    cwd: &Path,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-c".into()];
    args.extend(compression_args(method, ArchiveStage::Create).into_iter().map(OsString::from));
    args.extend(["--posix", "-P", "-f"].map(OsString::from));
    args.push(archive_path.as_os_str().to_owned());
    args.push("-C".into());
    args.push(cwd.as_os_str().to_owned());
    args.extend(paths.iter().map(|p| p.as_os_str().to_owned()));
    args
}

/// Full argument list for `tar -x`.
pub fn extract_args(method: CompressionMethod, archive_path: &Path, cwd: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-x".into()];
    args.extend(compression_args(method, ArchiveStage::Extract).into_iter().map(OsString::from));
    args.extend(["-P", "-f"].map(OsString::from));
    args.push(archive_path.as_os_str().to_owned());
    args.push("-C".into());
    args.push(cwd.as_os_str().to_owned());
    args
}
