//! Module resolution: locators to script content, backed by an on-disk cache

pub mod archive;
pub mod error;
pub mod git_provider;
pub mod locator;
pub mod memory;

use crate::context::Context;
use std::path::PathBuf;

pub use error::ModuleError;
pub use git_provider::GitModuleContentProvider;
pub use locator::ParsedModuleLocator;
pub use memory::InMemoryModuleProvider;

/// Resolves module locators to file contents
///
/// Implementations are shared between concurrent interpretations and must
/// keep their cache consistent under concurrent installs.
pub trait ModuleContentProvider: Send + Sync {
    /// Returns the content of the file behind `locator`, fetching the
    /// enclosing repository if it is not cached yet
    fn get_module_contents(&self, ctx: &Context, locator: &str) -> Result<String, ModuleError>;

    /// Installs an uploaded `.tgz` package as the repository named by
    /// `locator` and returns where it now lives
    fn store_module_contents(
        &self,
        locator: &str,
        archive: &[u8],
        overwrite: bool,
    ) -> Result<PathBuf, ModuleError>;
}
