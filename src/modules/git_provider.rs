use super::archive;
use super::error::ModuleError;
use super::locator::ParsedModuleLocator;
use super::ModuleContentProvider;
use crate::context::Context;
use crate::types::EngineConfig;
use git2::build::RepoBuilder;
use git2::{FetchOptions, RemoteCallbacks};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, info, warn};

const TEMP_REPO_PREFIX: &str = "tmp-repo-dir-";
const TEMP_ARCHIVE_PREFIX: &str = "tmp-archive-dir-";

/// Module provider that clones GitHub repositories into a local cache
///
/// Layout is `<modules_dir>/<author>/<repo>/...`. Installs go through a
/// temporary directory under `tmp_dir` (same filesystem) and are renamed into
/// place, so a reader never observes a half-written repository.
#[derive(Debug)]
pub struct GitModuleContentProvider {
    modules_dir: PathBuf,
    tmp_dir: PathBuf,
    install_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl GitModuleContentProvider {
    pub fn new(modules_dir: impl Into<PathBuf>, tmp_dir: impl Into<PathBuf>) -> Self {
        Self {
            modules_dir: modules_dir.into(),
            tmp_dir: tmp_dir.into(),
            install_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(&config.modules_dir, &config.modules_tmp_dir)
    }

    pub fn modules_dir(&self) -> &Path {
        &self.modules_dir
    }

    /// Clones the whole repository behind `locator` unless it is cached
    pub fn clone_module(&self, ctx: &Context, locator: &str) -> Result<PathBuf, ModuleError> {
        let parsed = ParsedModuleLocator::parse(locator)?;
        let destination = self.modules_dir.join(&parsed.relative_repo_path);
        if destination.is_dir() {
            debug!("Module repository {} already cached", parsed.relative_repo_path);
            return Ok(destination);
        }
        self.atomic_clone(ctx, &parsed)?;
        Ok(destination)
    }

    /// Removes temporary install directories older than `min_age` left
    /// behind by interrupted clones or uploads
    pub fn collect_orphaned_temp_dirs(&self, min_age: Duration) -> Result<usize, ModuleError> {
        let entries = match fs::read_dir(&self.tmp_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(ModuleError::io("listing temp dir", &self.tmp_dir, e)),
        };

        let mut removed = 0;
        for entry in entries {
            let entry = entry.map_err(|e| ModuleError::io("listing temp dir", &self.tmp_dir, e))?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with(TEMP_REPO_PREFIX) && !name.starts_with(TEMP_ARCHIVE_PREFIX) {
                continue;
            }

            let age = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| modified.elapsed().ok())
                .unwrap_or_default();
            if age < min_age {
                continue;
            }

            match fs::remove_dir_all(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to remove orphaned temp dir {:?}: {}", entry.path(), e),
            }
        }

        if removed > 0 {
            info!("Removed {} orphaned module temp dirs", removed);
        }
        Ok(removed)
    }

    fn install_lock(&self, relative_repo_path: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .install_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        locks
            .entry(relative_repo_path.to_string())
            .or_default()
            .clone()
    }

    fn temp_dir(&self, prefix: &str) -> Result<TempDir, ModuleError> {
        fs::create_dir_all(&self.tmp_dir)
            .map_err(|e| ModuleError::io("creating temp dir", &self.tmp_dir, e))?;
        tempfile::Builder::new()
            .prefix(prefix)
            .tempdir_in(&self.tmp_dir)
            .map_err(|e| ModuleError::io("creating temp dir", &self.tmp_dir, e))
    }

    /// Renames `source` to `destination`, creating the author directory first
    fn install(&self, source: &Path, destination: &Path) -> Result<(), ModuleError> {
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| ModuleError::io("creating author dir", parent, e))?;
        }
        match fs::rename(source, destination) {
            Ok(()) => Ok(()),
            Err(_) if destination.is_dir() => {
                debug!("{:?} was installed concurrently, using it", destination);
                Ok(())
            }
            Err(e) => Err(ModuleError::io("installing module", destination, e)),
        }
    }

    fn atomic_clone(&self, ctx: &Context, parsed: &ParsedModuleLocator) -> Result<(), ModuleError> {
        ctx.check()?;

        let lock = self.install_lock(&parsed.relative_repo_path);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let destination = self.modules_dir.join(&parsed.relative_repo_path);
        if destination.is_dir() {
            return Ok(());
        }

        let temp = self.temp_dir(TEMP_REPO_PREFIX)?;
        let clone_path = temp.path().join(&parsed.relative_repo_path);
        info!("Cloning {} into the module cache", parsed.source_url);

        let mut callbacks = RemoteCallbacks::new();
        callbacks.transfer_progress(|stats| {
            debug!(
                "Transfer progress: {}/{} objects, {} bytes",
                stats.received_objects(),
                stats.total_objects(),
                stats.received_bytes()
            );
            ctx.err().is_none()
        });
        let mut fetch_options = FetchOptions::new();
        fetch_options.remote_callbacks(callbacks);
        fetch_options.depth(1);

        let mut builder = RepoBuilder::new();
        builder.fetch_options(fetch_options);
        if let Err(e) = builder.clone(&parsed.source_url, &clone_path) {
            if let Some(interrupted) = ctx.err() {
                return Err(ModuleError::Interrupted(interrupted));
            }
            return Err(ModuleError::CloneFailed {
                url: parsed.source_url.clone(),
                error: e.message().to_string(),
            });
        }

        self.install(&clone_path, &destination)?;
        info!("Installed module repository {}", parsed.relative_repo_path);
        Ok(())
    }

    fn read_module_file(&self, path: &Path) -> Result<String, ModuleError> {
        fs::read_to_string(path).map_err(|e| ModuleError::io("reading module file", path, e))
    }
}

impl ModuleContentProvider for GitModuleContentProvider {
    fn get_module_contents(&self, ctx: &Context, locator: &str) -> Result<String, ModuleError> {
        let parsed = ParsedModuleLocator::parse(locator)?;
        if parsed.relative_file_path.is_empty() {
            return Err(ModuleError::EmptyFilePath(locator.to_string()));
        }

        let file_path = self.modules_dir.join(&parsed.relative_file_path);
        let repo_path = self.modules_dir.join(&parsed.relative_repo_path);
        let path_not_found = || ModuleError::PathNotFound {
            path: parsed.path_in_package().to_string(),
            package: parsed.relative_repo_path.clone(),
        };

        if file_path.is_file() {
            debug!("Module cache hit for {}", locator);
            return self.read_module_file(&file_path);
        }
        if repo_path.is_dir() {
            return Err(path_not_found());
        }

        self.atomic_clone(ctx, &parsed)?;
        if !file_path.is_file() {
            return Err(path_not_found());
        }
        self.read_module_file(&file_path)
    }

    fn store_module_contents(
        &self,
        locator: &str,
        archive: &[u8],
        overwrite: bool,
    ) -> Result<PathBuf, ModuleError> {
        let parsed = ParsedModuleLocator::parse(locator)?;
        let lock = self.install_lock(&parsed.relative_repo_path);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let destination = self.modules_dir.join(&parsed.relative_repo_path);
        if destination.exists() && !overwrite {
            return Err(ModuleError::AlreadyExists(parsed.relative_repo_path.clone()));
        }

        let temp = self.temp_dir(TEMP_ARCHIVE_PREFIX)?;
        archive::unpack_tgz(archive, temp.path(), locator)?;
        let root = archive::package_root(temp.path())?;

        if destination.exists() {
            fs::remove_dir_all(&destination)
                .map_err(|e| ModuleError::io("removing previous module", &destination, e))?;
        }
        self.install(&root, &destination)?;
        info!("Stored uploaded module {}", parsed.relative_repo_path);
        Ok(destination)
    }
}
