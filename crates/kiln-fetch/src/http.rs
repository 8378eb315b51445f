use crate::FetchError;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Blocking HTTP client for remote repositories and plain URLs.
pub struct HttpClient {
    agent: ureq::Agent,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    pub fn new() -> Self {
        let agent = ureq::Agent::new_with_defaults();
        Self { agent }
    }

    fn open(&self, url: &str) -> Result<impl Read, FetchError> {
        tracing::debug!("GET {url}");
        let resp = match self.agent.get(url).call() {
            Ok(r) => r,
            Err(ureq::Error::StatusCode(404)) => {
                return Err(FetchError::NotFound(url.to_owned()));
            }
            Err(ureq::Error::StatusCode(code)) => {
                return Err(FetchError::Http(format!("HTTP {code} for {url}")));
            }
            Err(e) => {
                return Err(FetchError::Http(e.to_string()));
            }
        };

        let code = resp.status().as_u16();
        if code == 404 {
            return Err(FetchError::NotFound(url.to_owned()));
        }
        if code >= 400 {
            return Err(FetchError::Http(format!("HTTP {code} for {url}")));
        }
        Ok(resp.into_body().into_reader())
    }

    pub fn get(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let mut body = Vec::new();
        self.open(url)?
            .read_to_end(&mut body)
            .map_err(|e| FetchError::Http(e.to_string()))?;
        Ok(body)
    }

    /// Stream `url` into `dest`.
    pub fn download(&self, url: &str, dest: &Path) -> Result<u64, FetchError> {
        let mut reader = self.open(url)?;
        let mut file = File::create(dest)?;
        let written = io::copy(&mut reader, &mut file)?;
        file.sync_all()?;
        Ok(written)
    }
}
