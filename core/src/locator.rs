//! Dated-file discovery on the remote export tree.
//!
//! Layout: `{base_path}/{date folder}/{stocks_dir}/<file>`.
//! The first directory entry whose name fully matches the pattern wins.

use crate::{
    config::RemoteConfig,
    error::{ReconError, ReconResult},
    types::BusinessDate,
};
use regex::Regex;
use std::fmt::Write;
use std::path::PathBuf;

/// The seam to wherever the depository files live.
pub trait RemoteSource {
    /// Entry names (not paths) directly under `dir`.
    fn list(&self, dir: &str) -> ReconResult<Vec<String>>;

    /// Full contents of the file at `path`.
    fn retrieve(&self, path: &str) -> ReconResult<Vec<u8>>;
}

/// A remote tree mounted on the local filesystem.
#[derive(Debug)]
pub struct LocalDirSource;

impl RemoteSource for LocalDirSource {
    fn list(&self, dir: &str) -> ReconResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        // read_dir order is platform dependent; listing order must be stable.
        names.sort();
        Ok(names)
    }

    fn retrieve(&self, path: &str) -> ReconResult<Vec<u8>> {
        Ok(std::fs::read(path)?)
    }
}

/// A filename pattern that must match the whole entry name.
#[derive(Debug, Clone)]
pub struct FilePattern {
    source: String,
    regex: Regex,
}

impl FilePattern {
    pub fn new(pattern: &str) -> ReconResult<Self> {
        let regex = Regex::new(&format!("^(?:{pattern})$"))
            .map_err(|e| ReconError::Config(format!("bad file pattern '{pattern}': {e}")))?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    pub fn matches(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

#[derive(Debug)]
pub struct RemoteFileLocator<S: RemoteSource> {
    source: S,
    config: RemoteConfig,
}

impl<S: RemoteSource> RemoteFileLocator<S> {
    pub fn new(source: S, config: RemoteConfig) -> Self {
        Self { source, config }
    }

    /// `{base_path}/{formatted date}/{stocks_dir}` for a business day.
    pub fn dated_dir(&self, date: BusinessDate) -> ReconResult<String> {
        let mut folder = String::new();
        write!(folder, "{}", date.format(&self.config.date_folder_format)).map_err(|_| {
            ReconError::Config(format!(
                "bad remote.date_folder_format '{}'",
                self.config.date_folder_format
            ))
        })?;
        let mut dir = PathBuf::from(&self.config.base_path);
        dir.push(folder);
        dir.push(&self.config.stocks_dir);
        Ok(dir.to_string_lossy().into_owned())
    }

    /// Resolve the single file for `date` whose name matches `pattern`.
    pub fn locate(&self, date: BusinessDate, pattern: &FilePattern) -> ReconResult<String> {
        let dir = self.dated_dir(date)?;
        let not_found = || ReconError::NotFound {
            dir: dir.clone(),
            pattern: pattern.as_str().to_string(),
        };

        let names = match self.source.list(&dir) {
            Ok(names) => names,
            // The dated folder itself not existing yet is the same condition
            // as the file not having landed.
            Err(ReconError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(not_found())
            }
            Err(e) => return Err(e),
        };

        match names.iter().find(|name| pattern.matches(name)) {
            Some(name) => {
                let path = PathBuf::from(&dir).join(name).to_string_lossy().into_owned();
                log::info!("Found file: {path}");
                Ok(path)
            }
            None => {
                log::warn!("No file matching '{}' in {dir}", pattern.as_str());
                Err(not_found())
            }
        }
    }

    pub fn retrieve(&self, path: &str) -> ReconResult<Vec<u8>> {
        self.source.retrieve(path)
    }
}
