//! PV-033: source-build handler (fetch, verify, extract, build, install).
//!
//! All work happens inside a scoped `provisio-build-*` directory under the
//! configured work dir. The directory is a [`tempfile::TempDir`], so it is
//! removed on every exit path, including each early `?` return below.
//!
//! Recipe lines run one at a time from the source root with `PREFIX`,
//! `SRC_DIR` and `JOBS` exported; a failing line becomes the `BuildError`'s
//! command.

use crate::core::error::StepError;
use crate::core::executor::ExecContext;
use crate::core::types::Step;
use crate::transport::{self, quote, ExecOptions};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const STREAM_BUF_SIZE: usize = 65536;

/// Scratch directory of the build in progress. A forced exit skips
/// `TempDir`'s drop, so it removes this path through `discard_active_scratch`.
static ACTIVE_SCRATCH: Mutex<Option<PathBuf>> = Mutex::new(None);

struct ScratchRegistration;

impl ScratchRegistration {
    fn register(path: &Path) -> Self {
        if let Ok(mut slot) = ACTIVE_SCRATCH.lock() {
            *slot = Some(path.to_path_buf());
        }
        Self
    }
}

impl Drop for ScratchRegistration {
    fn drop(&mut self) {
        if let Ok(mut slot) = ACTIVE_SCRATCH.lock() {
            *slot = None;
        }
    }
}

/// Remove the scratch directory of a build still in progress. Called just
/// before the process exits without unwinding.
pub fn discard_active_scratch() {
    let path = match ACTIVE_SCRATCH.lock() {
        Ok(mut slot) => slot.take(),
        Err(_) => None,
    };
    if let Some(path) = path {
        if let Err(e) = std::fs::remove_dir_all(&path) {
            tracing::warn!(dir = %path.display(), error = %e, "could not remove build directory");
        }
    }
}

/// Archive formats the extractor understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Tar,
    TarGz,
    TarBz2,
    TarZst,
    Zip,
}

impl ArchiveFormat {
    /// Detect the format from a file name or URL.
    pub fn detect(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if lower.ends_with(".tar.bz2") || lower.ends_with(".tbz2") {
            Some(Self::TarBz2)
        } else if lower.ends_with(".tar.zst") || lower.ends_with(".tzst") {
            Some(Self::TarZst)
        } else if lower.ends_with(".tar") {
            Some(Self::Tar)
        } else if lower.ends_with(".zip") {
            Some(Self::Zip)
        } else {
            None
        }
    }
}

/// Last path segment of a source, without query string or fragment.
pub fn archive_name(source: &str) -> String {
    let no_query = source.split(['?', '#']).next().unwrap_or(source);
    match no_query.rsplit('/').next() {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => "source.archive".to_string(),
    }
}

/// Split a recipe into commands: blank lines and `#` comments dropped,
/// trailing-backslash continuations joined.
pub fn recipe_commands(recipe: &str) -> Vec<String> {
    let mut commands = Vec::new();
    let mut pending = String::new();
    for raw in recipe.lines() {
        let line = raw.trim();
        if pending.is_empty() && (line.is_empty() || line.starts_with('#')) {
            continue;
        }
        if let Some(head) = line.strip_suffix('\\') {
            pending.push_str(head.trim_end());
            pending.push(' ');
            continue;
        }
        pending.push_str(line);
        commands.push(std::mem::take(&mut pending).trim().to_string());
    }
    if !pending.trim().is_empty() {
        commands.push(pending.trim().to_string());
    }
    commands
}

/// Hex SHA-256 of a file.
pub fn sha256_file(path: &Path) -> Result<String, String> {
    let mut file =
        File::open(path).map_err(|e| format!("cannot open {}: {}", path.display(), e))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; STREAM_BUF_SIZE];
    loop {
        let n = file
            .read(&mut buf)
            .map_err(|e| format!("read error {}: {}", path.display(), e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Unpack an archive into `dest`.
pub fn unpack(format: ArchiveFormat, archive: &Path, dest: &Path) -> Result<(), String> {
    std::fs::create_dir_all(dest)
        .map_err(|e| format!("cannot create {}: {}", dest.display(), e))?;
    let file =
        File::open(archive).map_err(|e| format!("cannot open {}: {}", archive.display(), e))?;
    let unpack_err = |e: std::io::Error| format!("cannot unpack {}: {}", archive.display(), e);

    match format {
        ArchiveFormat::Tar => tar::Archive::new(file).unpack(dest).map_err(unpack_err),
        ArchiveFormat::TarGz => tar::Archive::new(flate2::read::GzDecoder::new(file))
            .unpack(dest)
            .map_err(unpack_err),
        ArchiveFormat::TarBz2 => tar::Archive::new(bzip2::read::BzDecoder::new(file))
            .unpack(dest)
            .map_err(unpack_err),
        ArchiveFormat::TarZst => {
            let decoder = zstd::stream::read::Decoder::new(file).map_err(unpack_err)?;
            tar::Archive::new(decoder).unpack(dest).map_err(unpack_err)
        }
        ArchiveFormat::Zip => {
            let mut zip = zip::ZipArchive::new(file)
                .map_err(|e| format!("cannot read zip {}: {}", archive.display(), e))?;
            zip.extract(dest)
                .map_err(|e| format!("cannot unpack {}: {}", archive.display(), e))
        }
    }
}

/// The directory to build in: the single top-level directory if the archive
/// has one (the `name-1.2.3/` convention), otherwise `dir` itself.
pub fn source_root(dir: &Path) -> PathBuf {
    let entries: Vec<_> = match std::fs::read_dir(dir) {
        Ok(rd) => rd.filter_map(|e| e.ok()).collect(),
        Err(_) => return dir.to_path_buf(),
    };
    if let [only] = entries.as_slice() {
        if only.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            return only.path();
        }
    }
    dir.to_path_buf()
}

/// Build and install the step's library from source.
pub fn apply(step: &Step, ctx: &ExecContext) -> Result<String, StepError> {
    let target = &step.target;
    let source = step
        .require_param("source")
        .map_err(|e| StepError::build(target, "configure", e))?;
    let recipe = step
        .require_param("recipe")
        .map_err(|e| StepError::build(target, "configure", e))?;
    let commands = recipe_commands(&recipe);
    if commands.is_empty() {
        return Err(StepError::build(target, "configure", "recipe has no commands"));
    }
    let prefix = match step.param("prefix") {
        Some(p) if !p.is_empty() => PathBuf::from(transport::expand_home(&p)),
        _ => ctx.prefix.clone(),
    };
    let format = ArchiveFormat::detect(&archive_name(&source)).ok_or_else(|| {
        StepError::build(target, "extract", format!("unsupported archive format: {}", source))
    })?;

    std::fs::create_dir_all(&ctx.work_dir).map_err(|e| {
        StepError::build(
            target,
            format!("mkdir {}", ctx.work_dir.display()),
            e.to_string(),
        )
    })?;
    let scratch = tempfile::Builder::new()
        .prefix("provisio-build-")
        .tempdir_in(&ctx.work_dir)
        .map_err(|e| {
            StepError::build(
                target,
                format!("mkdtemp {}", ctx.work_dir.display()),
                e.to_string(),
            )
        })?;
    tracing::debug!(dir = %scratch.path().display(), "scratch directory");
    let _registration = ScratchRegistration::register(scratch.path());

    let archive = fetch(target, &source, scratch.path())?;

    if let Some(expected) = step.param("sha256").filter(|s| !s.is_empty()) {
        let actual = sha256_file(&archive).map_err(|e| StepError::build(target, "sha256", e))?;
        if !actual.eq_ignore_ascii_case(expected.trim()) {
            return Err(StepError::build(
                target,
                "sha256",
                format!("checksum mismatch: expected {}, got {}", expected.trim(), actual),
            ));
        }
    }

    let src_dir = scratch.path().join("src");
    unpack(format, &archive, &src_dir).map_err(|e| StepError::build(target, "extract", e))?;
    let root = source_root(&src_dir);

    let jobs = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let opts = ExecOptions::in_dir(&root)
        .env("PREFIX", prefix.display().to_string())
        .env("SRC_DIR", root.display().to_string())
        .env("JOBS", jobs.to_string());

    let mut log = Vec::new();
    for command in &commands {
        tracing::info!(library = %target, command = %command, "build");
        let script = format!("set -euo pipefail\n{}", command);
        let out = transport::exec_with(&script, &opts)
            .map_err(|e| StepError::build(target, command.clone(), e))?;
        if !out.success() {
            return Err(StepError::build(target, command.clone(), out.combined()));
        }
        log.push(format!("$ {}", command));
        if !(out.stdout.trim().is_empty() && out.stderr.trim().is_empty()) {
            log.push(out.combined());
        }
    }

    if let Err(e) = scratch.close() {
        tracing::warn!(library = %target, error = %e, "could not remove build directory");
    }
    Ok(log.join("\n"))
}

/// Place the source archive inside `dest_dir`.
fn fetch(target: &str, source: &str, dest_dir: &Path) -> Result<PathBuf, StepError> {
    let dest = dest_dir.join(archive_name(source));
    if source.starts_with("http://") || source.starts_with("https://") {
        let cmd = format!(
            "curl -fsSL --retry 2 -o {} {}",
            quote(&dest.display().to_string()),
            quote(source)
        );
        let out = transport::exec_script(&cmd).map_err(|e| StepError::build(target, &cmd, e))?;
        if !out.success() {
            return Err(StepError::build(target, cmd, out.combined()));
        }
    } else {
        let local = transport::expand_home(source.strip_prefix("file://").unwrap_or(source));
        std::fs::copy(&local, &dest).map_err(|e| {
            StepError::build(target, format!("fetch {}", local), e.to_string())
        })?;
    }
    Ok(dest)
}
