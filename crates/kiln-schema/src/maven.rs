//! `mvn:` coordinate handling.

use std::fmt;
use thiserror::Error;

pub const MVN_SCHEME: &str = "mvn:";

/// Wrapper schemes that decorate an inner artifact location.
const WRAPPER_SCHEMES: &[&str] = &["wrap:", "blueprint:", "spring:", "war:", "webbundle:"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoordinateError {
    #[error("not a maven location: {0}")]
    NotMaven(String),
    #[error("invalid maven coordinate '{0}', expected mvn:group/artifact/version[/type[/classifier]]")]
    Invalid(String),
}

/// A parsed `mvn:[repo!]group/artifact/version[/type[/classifier]]` location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MavenCoordinate {
    pub repository: Option<String>,
    pub group: String,
    pub artifact: String,
    pub version: String,
    pub kind: String,
    pub classifier: Option<String>,
}

impl MavenCoordinate {
    pub fn parse(location: &str) -> Result<Self, CoordinateError> {
        let rest = location
            .strip_prefix(MVN_SCHEME)
            .ok_or_else(|| CoordinateError::NotMaven(location.to_owned()))?;
        let (repository, coords) = match rest.split_once('!') {
            Some((repo, coords)) => (Some(repo.to_owned()), coords),
            None => (None, rest),
        };
        let coords = coords.trim_end_matches('/');

        let parts: Vec<&str> = coords.split('/').collect();
        if parts.len() < 3 || parts.len() > 5 || parts[..3].iter().any(|p| p.is_empty()) {
            return Err(CoordinateError::Invalid(location.to_owned()));
        }

        let kind = parts
            .get(3)
            .filter(|s| !s.is_empty())
            .map_or("jar", |s| *s)
            .to_owned();
        let classifier = parts
            .get(4)
            .filter(|s| !s.is_empty())
            .map(|s| (*s).to_owned());

        Ok(Self {
            repository,
            group: parts[0].to_owned(),
            artifact: parts[1].to_owned(),
            version: parts[2].to_owned(),
            kind,
            classifier,
        })
    }

    /// `artifact-version[-classifier].type`
    pub fn file_name(&self) -> String {
        match &self.classifier {
            Some(c) => format!("{}-{}-{c}.{}", self.artifact, self.version, self.kind),
            None => format!("{}-{}.{}", self.artifact, self.version, self.kind),
        }
    }

    /// Repository-relative path in the standard maven layout.
    pub fn relative_path(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.group.replace('.', "/"),
            self.artifact,
            self.version,
            self.file_name()
        )
    }

    /// `mvn:group/artifact`, used to match overrides against bundles.
    pub fn key(&self) -> String {
        format!("{MVN_SCHEME}{}/{}", self.group, self.artifact)
    }
}

impl fmt::Display for MavenCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{MVN_SCHEME}{}/{}/{}", self.group, self.artifact, self.version)?;
        match (&self.classifier, self.kind.as_str()) {
            (Some(c), kind) => write!(f, "/{kind}/{c}"),
            (None, "jar") => Ok(()),
            (None, kind) => write!(f, "/{kind}"),
        }
    }
}

/// Relative maven-layout path for a `mvn:` location.
pub fn path_from_maven(location: &str) -> Result<String, CoordinateError> {
    MavenCoordinate::parse(location).map(|c| c.relative_path())
}

/// Peel wrapper schemes and `$`-instructions off an artifact location.
pub fn strip_url(location: &str) -> String {
    let mut current = location.trim();
    loop {
        let Some(inner) = WRAPPER_SCHEMES
            .iter()
            .find_map(|scheme| current.strip_prefix(scheme))
        else {
            break;
        };
        current = inner;
    }
    let current = current.split('$').next().unwrap_or(current);
    current.to_owned()
}
