//! Gzip-compressed tar bundles used to upload modules

use super::error::ModuleError;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs;
use std::io::{Cursor, Read};
use std::path::{Component, Path, PathBuf};
use tar::{Archive, Builder};
use tracing::{debug, warn};

fn invalid(locator: &str, reason: impl ToString) -> ModuleError {
    ModuleError::InvalidArchive {
        locator: locator.to_string(),
        reason: reason.to_string(),
    }
}

fn is_unsafe_path(path: &Path) -> bool {
    path.components()
        .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
}

/// Unpacks a `.tgz` bundle into `destination`
pub fn unpack_tgz(bytes: &[u8], destination: &Path, locator: &str) -> Result<(), ModuleError> {
    let mut archive = Archive::new(GzDecoder::new(Cursor::new(bytes)));
    let entries = archive.entries().map_err(|e| invalid(locator, e))?;

    let mut unpacked = 0usize;
    for entry in entries {
        let mut entry = entry.map_err(|e| invalid(locator, e))?;
        let path = entry.path().map_err(|e| invalid(locator, e))?.to_path_buf();
        if is_unsafe_path(&path) {
            warn!("Skipping unsafe archive path {:?} in {}", path, locator);
            continue;
        }
        if entry
            .unpack_in(destination)
            .map_err(|e| invalid(locator, e))?
        {
            unpacked += 1;
        }
    }

    if unpacked == 0 {
        return Err(invalid(locator, "archive is empty"));
    }
    debug!("Unpacked {} entries for {}", unpacked, locator);
    Ok(())
}

/// The directory holding the package contents: an archive with a single
/// top-level directory is rooted at that directory
pub fn package_root(unpacked: &Path) -> Result<PathBuf, ModuleError> {
    let mut entries = fs::read_dir(unpacked)
        .map_err(|e| ModuleError::io("reading unpacked archive", unpacked, e))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ModuleError::io("reading unpacked archive", unpacked, e))?;

    if entries.len() == 1 {
        let only = entries.remove(0).path();
        if only.is_dir() {
            return Ok(only);
        }
    }
    Ok(unpacked.to_path_buf())
}

/// Reads every regular file of a `.tgz` bundle into memory, with paths
/// relative to the package root
pub fn read_tgz_files(bytes: &[u8], locator: &str) -> Result<Vec<(PathBuf, Vec<u8>)>, ModuleError> {
    let mut archive = Archive::new(GzDecoder::new(Cursor::new(bytes)));
    let mut files = Vec::new();

    for entry in archive.entries().map_err(|e| invalid(locator, e))? {
        let mut entry = entry.map_err(|e| invalid(locator, e))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = entry.path().map_err(|e| invalid(locator, e))?.to_path_buf();
        if is_unsafe_path(&path) {
            warn!("Skipping unsafe archive path {:?} in {}", path, locator);
            continue;
        }
        let mut contents = Vec::new();
        entry
            .read_to_end(&mut contents)
            .map_err(|e| invalid(locator, e))?;
        files.push((path, contents));
    }

    if files.is_empty() {
        return Err(invalid(locator, "archive is empty"));
    }

    let first_components: Vec<Option<Component>> = files
        .iter()
        .map(|(path, _)| {
            let mut components = path.components();
            let first = components.next();
            components.next().and(first)
        })
        .collect();
    let shared_root = match first_components.first() {
        Some(Some(first)) if first_components.iter().all(|c| c.as_ref() == Some(first)) => {
            Some(PathBuf::from(first.as_os_str()))
        }
        _ => None,
    };
    if let Some(root) = shared_root {
        for (path, _) in files.iter_mut() {
            if let Ok(stripped) = path.strip_prefix(&root) {
                *path = stripped.to_path_buf();
            }
        }
    }
    Ok(files)
}

/// Packs the contents of `dir` into a `.tgz` bundle
pub fn pack_directory(dir: &Path) -> Result<Vec<u8>, ModuleError> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = Builder::new(encoder);
    builder
        .append_dir_all(".", dir)
        .map_err(|e| ModuleError::io("archiving module directory", dir, e))?;
    let encoder = builder
        .into_inner()
        .map_err(|e| ModuleError::io("archiving module directory", dir, e))?;
    encoder
        .finish()
        .map_err(|e| ModuleError::io("compressing module archive", dir, e))
}
