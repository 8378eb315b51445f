//! Flattening profiles across their parent chain and substituting placeholders.

use indexmap::IndexMap;
use kiln_schema::profile::{ATTRIBUTE_PREFIX, ABSTRACT, HIDDEN, INTERNAL_PID, PARENTS, PROPERTIES_SUFFIX};
use kiln_schema::{Profile, ProfileError, Properties};
use std::collections::{BTreeMap, HashSet};

/// Maximum nesting of `${...}` expansions before a placeholder is left as is.
const MAX_SUBSTITUTION_DEPTH: usize = 16;

enum Merged {
    Raw(Vec<u8>),
    Config(IndexMap<String, String>),
}

/// Flatten `profile` across its ancestors.
///
/// Parents are applied depth-first in declared order, so a later parent
/// overrides an earlier one and the profile itself overrides all of them.
/// Configuration files merge key by key; `<pid>#<env>.cfg` is applied on top
/// of `<pid>.cfg` only when `environment` equals `<env>`. Other files are
/// replaced wholesale. An ancestor reachable twice is applied once.
pub fn overlay(
    profile: &Profile,
    universe: &BTreeMap<String, Profile>,
    environment: Option<&str>,
    allow_missing: bool,
) -> Result<Profile, ProfileError> {
    if profile.is_overlay() {
        return Ok(profile.clone());
    }

    let mut chain = Vec::new();
    let mut visited = HashSet::new();
    visited.insert(profile.id().to_owned());
    collect_ancestors(profile, universe, allow_missing, &mut visited, &mut chain)?;

    let mut merged: IndexMap<String, Merged> = IndexMap::new();
    for ancestor in chain {
        apply(&mut merged, ancestor, environment, true)?;
    }
    apply(&mut merged, profile, environment, false)?;

    let files = merged
        .into_iter()
        .map(|(name, entry)| match entry {
            Merged::Raw(bytes) => (name, bytes),
            Merged::Config(map) => (name, Properties::from(map).to_bytes()),
        })
        .collect();
    Profile::new(profile.id(), profile.parent_ids().to_vec(), files, true)
}

fn collect_ancestors<'a>(
    profile: &Profile,
    universe: &'a BTreeMap<String, Profile>,
    allow_missing: bool,
    visited: &mut HashSet<String>,
    chain: &mut Vec<&'a Profile>,
) -> Result<(), ProfileError> {
    for parent_id in profile.parent_ids() {
        if !visited.insert(parent_id.clone()) {
            continue;
        }
        let Some(parent) = universe.get(parent_id) else {
            if allow_missing {
                continue;
            }
            return Err(ProfileError::MissingParent {
                profile: profile.id().to_owned(),
                parent: parent_id.clone(),
            });
        };
        collect_ancestors(parent, universe, allow_missing, visited, chain)?;
        chain.push(parent);
    }
    Ok(())
}

fn apply(
    merged: &mut IndexMap<String, Merged>,
    profile: &Profile,
    environment: Option<&str>,
    inherited: bool,
) -> Result<(), ProfileError> {
    let mut env_specific = Vec::new();
    for (name, bytes) in profile.file_configurations() {
        let Some(pid) = name.strip_suffix(PROPERTIES_SUFFIX) else {
            merged.insert(name.clone(), Merged::Raw(bytes.clone()));
            continue;
        };
        match pid.split_once('#') {
            Some((base, env)) => {
                if environment == Some(env) {
                    env_specific.push((base, bytes));
                }
            }
            None => merge_config(merged, pid, bytes, inherited)?,
        }
    }
    for (pid, bytes) in env_specific {
        merge_config(merged, pid, bytes, inherited)?;
    }
    Ok(())
}

fn merge_config(
    merged: &mut IndexMap<String, Merged>,
    pid: &str,
    bytes: &[u8],
    inherited: bool,
) -> Result<(), ProfileError> {
    let props = Properties::parse_bytes(bytes)?;
    let name = format!("{pid}{PROPERTIES_SUFFIX}");
    let entry = merged
        .entry(name)
        .or_insert_with(|| Merged::Config(IndexMap::new()));
    if let Merged::Raw(_) = entry {
        *entry = Merged::Config(IndexMap::new());
    }
    let Merged::Config(target) = entry else {
        return Ok(());
    };
    for (key, value) in props.iter() {
        if inherited && pid == INTERNAL_PID && is_local_attribute(key) {
            continue;
        }
        target.insert(key.to_owned(), value.to_owned());
    }
    Ok(())
}

/// Attributes that describe a single profile and never propagate to children.
fn is_local_attribute(key: &str) -> bool {
    key == PARENTS
        || key
            .strip_prefix(ATTRIBUTE_PREFIX)
            .is_some_and(|attr| attr == ABSTRACT || attr == HIDDEN)
}

/// Substitute `${key}` and `${pid:key}` placeholders in every configuration.
///
/// Lookups use the profile's own merged values. Unresolved placeholders are
/// kept literally, or reported as [`ProfileError::UnresolvedPlaceholder`]
/// when `strict` is set.
pub fn effective(profile: &Profile, strict: bool) -> Result<Profile, ProfileError> {
    let configs = profile.configurations();
    let mut files = IndexMap::with_capacity(profile.file_configurations().len());

    for (name, bytes) in profile.file_configurations() {
        let Some(config) = name
            .strip_suffix(PROPERTIES_SUFFIX)
            .and_then(|pid| configs.get(pid).map(|c| (pid, c)))
        else {
            files.insert(name.clone(), bytes.clone());
            continue;
        };
        let (pid, values) = config;

        let mut changed = false;
        let mut substituted = IndexMap::with_capacity(values.len());
        for (key, value) in values {
            let resolver = Substitution {
                configs,
                strict,
                key,
            };
            let new_value = resolver.expand(value, pid, 0)?;
            changed |= new_value != *value;
            substituted.insert(key.clone(), new_value);
        }

        if changed {
            files.insert(name.clone(), Properties::from(substituted).to_bytes());
        } else {
            files.insert(name.clone(), bytes.clone());
        }
    }

    Profile::new(
        profile.id(),
        profile.parent_ids().to_vec(),
        files,
        profile.is_overlay(),
    )
}

struct Substitution<'a> {
    configs: &'a IndexMap<String, IndexMap<String, String>>,
    strict: bool,
    key: &'a str,
}

impl Substitution<'_> {
    fn expand(&self, value: &str, pid: &str, depth: usize) -> Result<String, ProfileError> {
        let mut out = String::with_capacity(value.len());
        let mut rest = value;

        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let body = &rest[start + 2..];
            let Some(end) = closing_brace(body) else {
                out.push_str(&rest[start..]);
                return Ok(out);
            };
            let raw_name = &body[..end];
            let name = if raw_name.contains("${") {
                self.expand(raw_name, pid, depth)?
            } else {
                raw_name.to_owned()
            };

            match self.lookup(&name, pid) {
                Some((value, source_pid)) if depth < MAX_SUBSTITUTION_DEPTH => {
                    out.push_str(&self.expand(value, source_pid, depth + 1)?);
                }
                _ => {
                    if self.strict {
                        return Err(ProfileError::UnresolvedPlaceholder {
                            pid: pid.to_owned(),
                            key: self.key.to_owned(),
                            placeholder: name,
                        });
                    }
                    out.push_str("${");
                    out.push_str(&name);
                    out.push('}');
                }
            }
            rest = &body[end + 1..];
        }

        out.push_str(rest);
        Ok(out)
    }

    fn lookup<'s>(&'s self, name: &str, pid: &'s str) -> Option<(&'s str, &'s str)> {
        if let Some((other, key)) = name.split_once(':') {
            if let Some((other_pid, config)) = self.configs.get_key_value(other) {
                return config
                    .get(key)
                    .map(|v| (v.as_str(), other_pid.as_str()));
            }
        }
        self.configs
            .get(pid)
            .and_then(|config| config.get(name))
            .map(|v| (v.as_str(), pid))
    }
}

/// Index of the `}` closing a placeholder body, honouring nested `${`.
fn closing_brace(body: &str) -> Option<usize> {
    let bytes = body.as_bytes();
    let mut depth = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'$' if bytes.get(i + 1) == Some(&b'{') => {
                depth += 1;
                i += 1;
            }
            b'}' if depth == 0 => return Some(i),
            b'}' => depth -= 1,
            _ => {}
        }
        i += 1;
    }
    None
}
