//! Enumerating the cases of a suite directory

use crate::case::{stem_of, CaseRequirements, TestCase};
use crate::config::Features;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

const CASE_PATTERN: &str = "*.wast";
const SIMD_DIR: &str = "simd";
const MEMORY64_DIR: &str = "memory64";

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("can not find spec test cases at {}", .0.display())]
    MissingSuite(PathBuf),

    #[error("invalid case pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("failed to read suite entry: {0}")]
    Entry(#[from] glob::GlobError),
}

pub struct CaseDiscovery {
    suite_dir: PathBuf,
}

impl CaseDiscovery {
    pub fn new(suite_dir: impl Into<PathBuf>) -> Self {
        Self {
            suite_dir: suite_dir.into(),
        }
    }

    /// All cases of the suite, in run order: the top-level listing sorted by
    /// path, then each enabled feature directory's own sorted listing
    pub fn discover(&self, features: &Features) -> Result<Vec<TestCase>, DiscoveryError> {
        if !self.suite_dir.is_dir() {
            return Err(DiscoveryError::MissingSuite(self.suite_dir.clone()));
        }

        let mut cases = self.list(None, CaseRequirements::default())?;

        if features.simd {
            let requires = CaseRequirements {
                simd: true,
                ..CaseRequirements::default()
            };
            cases.extend(self.list(Some(SIMD_DIR), requires)?);
        }

        if features.memory64 {
            let requires = CaseRequirements {
                memory64: true,
                ..CaseRequirements::default()
            };
            cases.extend(self.list(Some(MEMORY64_DIR), requires)?);
        }

        debug!(count = cases.len(), suite = %self.suite_dir.display(), "discovered cases");
        Ok(cases)
    }

    fn list(
        &self,
        subdir: Option<&str>,
        requires: CaseRequirements,
    ) -> Result<Vec<TestCase>, DiscoveryError> {
        let dir = match subdir {
            Some(subdir) => self.suite_dir.join(subdir),
            None => self.suite_dir.clone(),
        };
        let pattern = format!(
            "{}/{}",
            glob::Pattern::escape(&dir.to_string_lossy()),
            CASE_PATTERN
        );

        let mut paths = glob::glob(&pattern)?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .filter(|path| path.is_file())
            .collect::<Vec<_>>();
        paths.sort();

        Ok(paths
            .into_iter()
            .map(|path| self.case_for(path, requires))
            .collect())
    }

    fn case_for(&self, path: PathBuf, requires: CaseRequirements) -> TestCase {
        TestCase {
            id: relative_id(&self.suite_dir, &path),
            name: stem_of(&path),
            path,
            requires,
        }
    }
}

fn relative_id(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path).with_extension("");
    relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
