use super::archive;
use super::error::ModuleError;
use super::locator::ParsedModuleLocator;
use super::ModuleContentProvider;
use crate::context::Context;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{PoisonError, RwLock};

/// Module provider backed by a map from locator to content
#[derive(Debug, Default)]
pub struct InMemoryModuleProvider {
    modules: RwLock<HashMap<String, String>>,
}

impl InMemoryModuleProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_modules<I, K, V>(modules: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            modules: RwLock::new(
                modules
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }

    pub fn add(&self, locator: impl Into<String>, contents: impl Into<String>) {
        self.modules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(locator.into(), contents.into());
    }

    pub fn remove(&self, locator: &str) -> Option<String> {
        self.modules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(locator)
    }

    pub fn len(&self) -> usize {
        self.modules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ModuleContentProvider for InMemoryModuleProvider {
    fn get_module_contents(&self, ctx: &Context, locator: &str) -> Result<String, ModuleError> {
        ctx.check()?;
        self.modules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(locator)
            .cloned()
            .ok_or_else(|| ModuleError::NotFound(locator.to_string()))
    }

    /// Files land under `github.com/<author>/<repo>/<path>`
    fn store_module_contents(
        &self,
        locator: &str,
        archive: &[u8],
        overwrite: bool,
    ) -> Result<PathBuf, ModuleError> {
        let parsed = ParsedModuleLocator::parse(locator)?;
        let prefix = format!("github.com/{}/", parsed.relative_repo_path);
        let files = archive::read_tgz_files(archive, locator)?;

        let mut modules = self.modules.write().unwrap_or_else(PoisonError::into_inner);
        if modules.keys().any(|k| k.starts_with(&prefix)) {
            if !overwrite {
                return Err(ModuleError::AlreadyExists(parsed.relative_repo_path));
            }
            modules.retain(|k, _| !k.starts_with(&prefix));
        }

        for (path, contents) in files {
            let contents = String::from_utf8(contents).map_err(|e| ModuleError::InvalidArchive {
                locator: locator.to_string(),
                reason: format!("{} is not UTF-8: {}", path.display(), e),
            })?;
            let relative = path
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            modules.insert(format!("{prefix}{relative}"), contents);
        }
        Ok(PathBuf::from(parsed.relative_repo_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::archive::tests::tgz;

    #[test]
    fn test_missing_module_is_not_found() {
        let provider = InMemoryModuleProvider::new();
        let err = provider
            .get_module_contents(&Context::background(), "github.com/foo/bar/lib.star")
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "An error occurred while loading the module 'github.com/foo/bar/lib.star'"
        );
    }

    #[test]
    fn test_added_module_becomes_visible() {
        let provider = InMemoryModuleProvider::new();
        provider.add("github.com/foo/bar/lib.star", "a = 1");
        let contents = provider
            .get_module_contents(&Context::background(), "github.com/foo/bar/lib.star")
            .unwrap();
        assert_eq!(contents, "a = 1");
    }

    #[test]
    fn test_stored_archive_is_keyed_by_locator() {
        let provider = InMemoryModuleProvider::new();
        let bytes = tgz(&[("pkg/main.star", "def main():\n    pass\n"), ("pkg/lib/x.star", "x = 1\n")]);
        provider
            .store_module_contents("github.com/foo/bar", &bytes, false)
            .unwrap();

        let ctx = Context::background();
        assert!(provider.get_module_contents(&ctx, "github.com/foo/bar/main.star").is_ok());
        assert_eq!(
            provider.get_module_contents(&ctx, "github.com/foo/bar/lib/x.star").unwrap(),
            "x = 1\n"
        );
        assert!(matches!(
            provider.store_module_contents("github.com/foo/bar", &bytes, false),
            Err(ModuleError::AlreadyExists(_))
        ));
    }
}
