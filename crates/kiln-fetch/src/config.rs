use kiln_schema::FetchPlan;
use std::path::PathBuf;

pub const DEFAULT_THREADS: usize = 8;

/// Where the default source looks for artifacts, and how many fetches run at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchConfig {
    pub local_repository: Option<PathBuf>,
    pub remote_repositories: Vec<String>,
    pub threads: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            local_repository: None,
            remote_repositories: Vec::new(),
            threads: DEFAULT_THREADS,
        }
    }
}

impl FetchConfig {
    pub fn from_plan(plan: &FetchPlan) -> Self {
        let mut config = Self {
            local_repository: plan.local_repository.clone(),
            remote_repositories: Vec::new(),
            threads: plan.threads.max(1),
        };
        config.add_remote_repositories(&plan.remote_repositories);
        config
    }

    #[must_use]
    pub fn with_local_repository(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_repository = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    /// Append repositories, dropping `@option` suffixes, trailing slashes and duplicates.
    pub fn add_remote_repositories(&mut self, repositories: &[String]) {
        for repo in repositories {
            let url = clean_repository_url(repo);
            if !url.is_empty() && !self.remote_repositories.contains(&url) {
                self.remote_repositories.push(url);
            }
        }
    }
}

/// `http://repo/m2@id=central@snapshots` -> `http://repo/m2`
pub fn clean_repository_url(repo: &str) -> String {
    let trimmed = repo.trim();
    let base = trimmed.split('@').next().unwrap_or(trimmed);
    base.trim_end_matches('/').to_owned()
}
