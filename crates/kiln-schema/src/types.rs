//! Identifier newtypes and the staged-input vocabulary shared by every crate.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance from a string.
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Return the inner string as a slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<String> for $name {
            fn eq(&self, other: &String) -> bool {
                self.0 == *other
            }
        }

        impl PartialEq<$name> for String {
            fn eq(&self, other: &$name) -> bool {
                *self == other.0
            }
        }

        impl AsRef<std::path::Path> for $name {
            fn as_ref(&self) -> &std::path::Path {
                std::path::Path::new(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_newtype!(
    /// Full 64-character hex assembly identifier, derived from the normalized plan.
    AssemblyId
);

string_newtype!(
    /// Truncated 12-character prefix of an [`AssemblyId`], used for display.
    ShortId
);

/// Install-time phase of a staged input. Ordered by load sequence.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    #[default]
    Startup,
    Boot,
    Installed,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Startup, Stage::Boot, Stage::Installed];
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Startup => write!(f, "startup"),
            Self::Boot => write!(f, "boot"),
            Self::Installed => write!(f, "installed"),
        }
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "startup" => Ok(Self::Startup),
            "boot" => Ok(Self::Boot),
            "installed" => Ok(Self::Installed),
            other => Err(format!("unknown stage '{other}', expected startup, boot or installed")),
        }
    }
}

/// Stage and implicit-feature policy attached to a repository source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryInfo {
    pub stage: Stage,
    /// Require every feature the repository declares.
    pub add_all: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembly_id_display_and_as_ref() {
        let id = AssemblyId::new("abc123");
        assert_eq!(id.to_string(), "abc123");
        assert_eq!(id.as_str(), "abc123");
        assert_eq!(AsRef::<str>::as_ref(&id), "abc123");
    }

    #[test]
    fn assembly_id_serde_is_transparent() {
        let id = AssemblyId::new("deadbeef");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"deadbeef\"");
        let back: AssemblyId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn stages_follow_load_order() {
        assert!(Stage::Startup < Stage::Boot);
        assert!(Stage::Boot < Stage::Installed);
        assert_eq!(Stage::ALL.len(), 3);
    }

    #[test]
    fn stage_parses_case_insensitively() {
        assert_eq!("Boot".parse::<Stage>().unwrap(), Stage::Boot);
        assert_eq!(" installed ".parse::<Stage>().unwrap(), Stage::Installed);
        assert!("later".parse::<Stage>().is_err());
    }

    #[test]
    fn stage_serializes_lowercase() {
        let json = serde_json::to_string(&Stage::Installed).unwrap();
        assert_eq!(json, "\"installed\"");
    }
}
