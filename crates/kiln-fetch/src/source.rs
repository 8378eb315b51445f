use crate::config::{clean_repository_url, FetchConfig};
use crate::http::HttpClient;
use crate::{file_name_for, ArtifactSource, FetchError};
use kiln_schema::{MavenCoordinate, MVN_SCHEME};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Resolves `file:` paths in place, `mvn:` coordinates through the local
/// repository and then each remote repository, and `http(s):` URLs directly.
pub struct DefaultSource {
    local_repository: Option<PathBuf>,
    remote_repositories: RwLock<Vec<String>>,
    http: HttpClient,
}

impl DefaultSource {
    pub fn new(config: &FetchConfig) -> Self {
        Self {
            local_repository: config.local_repository.clone(),
            remote_repositories: RwLock::new(config.remote_repositories.clone()),
            http: HttpClient::new(),
        }
    }

    pub fn remote_repositories(&self) -> Vec<String> {
        self.remote_repositories.read().clone()
    }

    fn fetch_file(location: &str, rest: &str) -> Result<PathBuf, FetchError> {
        let path = PathBuf::from(file_path(rest));
        if path.is_file() {
            Ok(path)
        } else {
            Err(FetchError::NotFound(location.to_owned()))
        }
    }

    fn fetch_maven(&self, location: &str, dest_dir: &Path) -> Result<PathBuf, FetchError> {
        let coord = MavenCoordinate::parse(location)?;
        let relative = coord.relative_path();

        if let Some(local) = &self.local_repository {
            let candidate = local.join(&relative);
            if candidate.is_file() {
                debug!("{location} found in local repository");
                return Ok(candidate);
            }
        }

        let mut remotes = Vec::new();
        if let Some(repo) = &coord.repository {
            remotes.push(clean_repository_url(repo));
        }
        remotes.extend(self.remote_repositories.read().iter().cloned());

        let dest = dest_dir.join(coord.file_name());
        for remote in remotes {
            let url = format!("{remote}/{relative}");
            match self.http.download(&url, &dest) {
                Ok(_) => return Ok(dest),
                Err(FetchError::NotFound(_)) => debug!("{location} not in {remote}"),
                Err(e) => return Err(e),
            }
        }
        Err(FetchError::NotFound(location.to_owned()))
    }

    fn fetch_http(&self, location: &str, dest_dir: &Path) -> Result<PathBuf, FetchError> {
        let dest = dest_dir.join(file_name_for(location));
        self.http.download(location, &dest)?;
        Ok(dest)
    }
}

impl ArtifactSource for DefaultSource {
    fn fetch(&self, location: &str, dest_dir: &Path) -> Result<PathBuf, FetchError> {
        if let Some(rest) = location.strip_prefix("file:") {
            Self::fetch_file(location, rest)
        } else if location.starts_with(MVN_SCHEME) {
            self.fetch_maven(location, dest_dir)
        } else if location.starts_with("http://") || location.starts_with("https://") {
            self.fetch_http(location, dest_dir)
        } else {
            Err(FetchError::UnsupportedScheme(location.to_owned()))
        }
    }

    fn add_remote_repositories(&self, repositories: &[String]) {
        let mut remotes = self.remote_repositories.write();
        for repo in repositories {
            let url = clean_repository_url(repo);
            if !url.is_empty() && !remotes.contains(&url) {
                debug!("adding remote repository {url}");
                remotes.push(url);
            }
        }
    }
}

/// `file:///a`, `file:/a` and `file:a` all name a local path.
fn file_path(rest: &str) -> &str {
    rest.strip_prefix("//").unwrap_or(rest)
}
