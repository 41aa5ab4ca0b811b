//! Filesystem helpers shared by the variants and the command solver.

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::{Result, WorkflowError};

/// Creates a directory and its parents if missing.
pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path).map_err(|e| WorkflowError::io(path, e))?;
        debug!("Created directory: {}", path.display());
    }
    Ok(())
}

/// Regular files and links directly inside `dir`, sorted by name.
///
/// A missing directory lists as empty.
pub fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| WorkflowError::io(dir, e))? {
        let entry = entry.map_err(|e| WorkflowError::io(dir, e))?;
        let path = entry.path();
        if !path.is_dir() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Subdirectories directly inside `dir`, sorted by name.
pub fn list_dirs(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut dirs = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| WorkflowError::io(dir, e))? {
        let path = entry.map_err(|e| WorkflowError::io(dir, e))?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// True when `dir` contains at least one file.
pub fn has_files(dir: &Path) -> Result<bool> {
    Ok(!list_files(dir)?.is_empty())
}

/// Removes every file directly inside `dir`.
pub fn clear_files(dir: &Path) -> Result<usize> {
    let files = list_files(dir)?;
    for file in &files {
        fs::remove_file(file).map_err(|e| WorkflowError::io(file, e))?;
    }
    Ok(files.len())
}

/// Removes symbolic links directly inside `dir`, leaving real files.
pub fn remove_links(dir: &Path) -> Result<usize> {
    let mut removed = 0;
    for file in list_files(dir)? {
        let is_link = fs::symlink_metadata(&file)
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false);
        if is_link {
            fs::remove_file(&file).map_err(|e| WorkflowError::io(&file, e))?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// Links `src` into `dst_dir` under the same file name.
///
/// Falls back to copying where symbolic links are unavailable. An
/// existing entry with the same name is replaced.
pub fn link_into(src: &Path, dst_dir: &Path) -> Result<PathBuf> {
    let name = src
        .file_name()
        .ok_or_else(|| WorkflowError::step(format!("cannot link '{}'", src.display())))?;
    let dst = dst_dir.join(name);
    replace_with_link(src, &dst)?;
    Ok(dst)
}

/// Points `dst` at `src`, replacing whatever `dst` was.
pub fn replace_with_link(src: &Path, dst: &Path) -> Result<()> {
    if fs::symlink_metadata(dst).is_ok() {
        if dst.is_dir() && !is_symlink(dst) {
            fs::remove_dir_all(dst).map_err(|e| WorkflowError::io(dst, e))?;
        } else {
            fs::remove_file(dst).map_err(|e| WorkflowError::io(dst, e))?;
        }
    }
    let src = fs::canonicalize(src).map_err(|e| WorkflowError::io(src, e))?;

    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(&src, dst).map_err(|e| WorkflowError::io(dst, e))?;
    }

    #[cfg(not(unix))]
    {
        if src.is_dir() {
            copy_files(&src, dst)?;
        } else {
            fs::copy(&src, dst).map_err(|e| WorkflowError::io(dst, e))?;
        }
    }

    Ok(())
}

/// Copies the files directly inside `src` into `dst`.
pub fn copy_files(src: &Path, dst: &Path) -> Result<usize> {
    ensure_dir(dst)?;
    let files = list_files(src)?;
    for file in &files {
        if let Some(name) = file.file_name() {
            fs::copy(file, dst.join(name)).map_err(|e| WorkflowError::io(file, e))?;
        }
    }
    Ok(files.len())
}

fn is_symlink(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
}
