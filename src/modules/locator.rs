//! Module locator parsing
//!
//! A locator is `github.com/<author>/<repo>[/<path>...]`, optionally prefixed
//! with `https://`. The repository part selects what gets cloned; the full
//! path selects the file inside the cache.

use super::error::ModuleError;
use url::Url;

const GITHUB_DOMAIN: &str = "github.com";
const HTTPS_SCHEME: &str = "https";
const GIT_SUFFIX: &str = ".git";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedModuleLocator {
    /// Clone URL, e.g. `https://github.com/author/repo.git`
    pub source_url: String,
    pub author: String,
    pub repository: String,
    /// `author/repo`, relative to the module cache root
    pub relative_repo_path: String,
    /// `author/repo/path/to/file.star`; empty for a bare repository locator
    pub relative_file_path: String,
}

impl ParsedModuleLocator {
    pub fn parse(locator: &str) -> Result<Self, ModuleError> {
        let with_scheme = if locator.contains("://") {
            locator.to_string()
        } else {
            format!("{HTTPS_SCHEME}://{locator}")
        };

        let url = Url::parse(&with_scheme)
            .map_err(|e| ModuleError::invalid_locator(locator, e.to_string()))?;
        if url.scheme() != HTTPS_SCHEME {
            return Err(ModuleError::invalid_locator(
                locator,
                format!("scheme '{}' is not supported", url.scheme()),
            ));
        }
        if url.host_str() != Some(GITHUB_DOMAIN) {
            return Err(ModuleError::invalid_locator(
                locator,
                format!("only modules hosted on '{GITHUB_DOMAIN}' are supported"),
            ));
        }
        if url.port().is_some()
            || !url.username().is_empty()
            || url.query().is_some()
            || url.fragment().is_some()
        {
            return Err(ModuleError::invalid_locator(
                locator,
                "credentials, ports, queries and fragments are not allowed",
            ));
        }

        // The url crate normalizes `.` and `..` away, so components are
        // checked on the raw text.
        let raw_path = with_scheme
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or_default()
            .split_once('/')
            .map(|(_, path)| path)
            .unwrap_or_default();
        let components: Vec<&str> = raw_path.split('/').collect();
        if let Some(bad) = components
            .iter()
            .find(|c| c.is_empty() || **c == "." || **c == "..")
        {
            return Err(ModuleError::invalid_locator(
                locator,
                format!("path component '{bad}' is not allowed"),
            ));
        }
        if components.len() < 2 {
            return Err(ModuleError::invalid_locator(
                locator,
                "expected at least an author and a repository",
            ));
        }

        let author = components[0].to_string();
        let repository = components[1]
            .strip_suffix(GIT_SUFFIX)
            .unwrap_or(components[1])
            .to_string();
        let relative_repo_path = format!("{author}/{repository}");
        let relative_file_path = if components.len() > 2 {
            format!("{relative_repo_path}/{}", components[2..].join("/"))
        } else {
            String::new()
        };

        Ok(Self {
            source_url: format!("{HTTPS_SCHEME}://{GITHUB_DOMAIN}/{relative_repo_path}{GIT_SUFFIX}"),
            author,
            repository,
            relative_repo_path,
            relative_file_path,
        })
    }

    /// Path of the file inside its package, as shown in error messages
    pub fn path_in_package(&self) -> &str {
        self.relative_file_path
            .strip_prefix(&self.relative_repo_path)
            .unwrap_or(&self.relative_file_path)
    }
}
