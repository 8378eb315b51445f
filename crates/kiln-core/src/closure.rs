//! Transitive feature dependency closure.

use crate::CoreError;
use kiln_schema::Feature;
use std::collections::HashSet;

struct Frame {
    index: usize,
    next_dependency: usize,
    started: bool,
}

/// Accumulates features reachable from one or more targets.
///
/// Dependencies are emitted before the feature that declares them. Each
/// feature appears once, however many paths reach it, and dependency cycles
/// are cut at the first feature seen twice on the walk. Prerequisite
/// dependencies are not followed.
pub struct FeatureClosure<'a> {
    universe: &'a [Feature],
    visited: HashSet<String>,
    ordered: Vec<&'a Feature>,
}

impl<'a> FeatureClosure<'a> {
    pub fn new(universe: &'a [Feature]) -> Self {
        Self {
            universe,
            visited: HashSet::new(),
            ordered: Vec::new(),
        }
    }

    /// Add every feature matching `target`, bare name or `name/version`,
    /// along with its dependencies.
    pub fn add(&mut self, target: &str) -> Result<(), CoreError> {
        let mut stack: Vec<Frame> = self
            .matching(target)?
            .into_iter()
            .rev()
            .map(Frame::new)
            .collect();

        let universe = self.universe;
        while let Some(frame) = stack.last_mut() {
            let feature = &universe[frame.index];
            if !frame.started {
                if !self.visited.insert(feature.id()) {
                    stack.pop();
                    continue;
                }
                frame.started = true;
            }

            let Some(dependency) = feature.dependencies.get(frame.next_dependency) else {
                stack.pop();
                self.ordered.push(feature);
                continue;
            };
            frame.next_dependency += 1;
            if dependency.is_prerequisite() {
                continue;
            }

            let matches = self.matching(&dependency.name)?;
            stack.extend(matches.into_iter().rev().map(Frame::new));
        }
        Ok(())
    }

    pub fn contains(&self, feature: &Feature) -> bool {
        self.visited.contains(&feature.id())
    }

    pub fn features(&self) -> &[&'a Feature] {
        &self.ordered
    }

    pub fn into_features(self) -> Vec<&'a Feature> {
        self.ordered
    }

    fn matching(&self, target: &str) -> Result<Vec<usize>, CoreError> {
        let matches: Vec<usize> = self
            .universe
            .iter()
            .enumerate()
            .filter(|(_, f)| f.matches(target))
            .map(|(i, _)| i)
            .collect();
        if matches.is_empty() {
            return Err(CoreError::UnresolvedReference(target.to_owned()));
        }
        Ok(matches)
    }
}

impl Frame {
    fn new(index: usize) -> Self {
        Self {
            index,
            next_dependency: 0,
            started: false,
        }
    }
}

/// Close over several targets in order.
pub fn close_features<'a, S: AsRef<str>>(
    universe: &'a [Feature],
    targets: &[S],
) -> Result<Vec<&'a Feature>, CoreError> {
    let mut closure = FeatureClosure::new(universe);
    for target in targets {
        closure.add(target.as_ref())?;
    }
    Ok(closure.into_features())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_schema::Dependency;

    fn feature(name: &str, deps: &[&str]) -> Feature {
        let mut f = Feature::new(name);
        f.dependencies = deps.iter().map(|d| Dependency::new(*d)).collect();
        f
    }

    fn names(features: &[&Feature]) -> Vec<String> {
        features.iter().map(|f| f.name.clone()).collect()
    }

    #[test]
    fn dependencies_come_before_dependents() {
        let universe = vec![
            feature("web", &["http", "jaas"]),
            feature("http", &["jaas"]),
            feature("jaas", &[]),
        ];
        let closed = close_features(&universe, &["web"]).unwrap();
        assert_eq!(names(&closed), vec!["jaas", "http", "web"]);
    }

    #[test]
    fn closing_twice_is_idempotent() {
        let universe = vec![feature("a", &["b"]), feature("b", &[])];
        let mut closure = FeatureClosure::new(&universe);
        closure.add("a").unwrap();
        closure.add("a").unwrap();
        closure.add("b").unwrap();
        assert_eq!(names(closure.features()), vec!["b", "a"]);
    }

    #[test]
    fn mutual_dependencies_terminate_with_both_once() {
        let universe = vec![feature("a", &["b"]), feature("b", &["a"])];
        let closed = close_features(&universe, &["a"]).unwrap();
        assert_eq!(names(&closed), vec!["b", "a"]);
    }

    #[test]
    fn self_dependency_terminates() {
        let universe = vec![feature("loop", &["loop"])];
        let closed = close_features(&universe, &["loop"]).unwrap();
        assert_eq!(names(&closed), vec!["loop"]);
    }

    #[test]
    fn prerequisites_are_not_followed() {
        let mut web = feature("web", &[]);
        let mut prereq = Dependency::new("deployer");
        prereq.prerequisite = Some(true);
        web.dependencies.push(prereq);
        let universe = vec![web, feature("deployer", &[])];

        let closed = close_features(&universe, &["web"]).unwrap();
        assert_eq!(names(&closed), vec!["web"]);
    }

    #[test]
    fn unknown_target_is_fatal() {
        let universe = vec![feature("a", &["missing"])];
        let err = close_features(&universe, &["a"]).unwrap_err();
        assert!(matches!(err, CoreError::UnresolvedReference(ref n) if n == "missing"));
        assert!(matches!(
            close_features(&universe, &["nope"]),
            Err(CoreError::UnresolvedReference(_))
        ));
    }

    #[test]
    fn versioned_target_selects_one_version() {
        let mut old = feature("http", &[]);
        old.version = "1.0.0".to_owned();
        let mut new = feature("http", &[]);
        new.version = "2.0.0".to_owned();
        let universe = vec![old, new];

        let closed = close_features(&universe, &["http/2.0.0"]).unwrap();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].version, "2.0.0");

        let all = close_features(&universe, &["http"]).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn deep_chains_do_not_exhaust_the_stack() {
        let universe: Vec<Feature> = (0..5_000)
            .map(|i| {
                if i + 1 < 5_000 {
                    feature(&format!("f{i}"), &[&format!("f{}", i + 1)])
                } else {
                    feature(&format!("f{i}"), &[])
                }
            })
            .collect();
        let closed = close_features(&universe, &["f0"]).unwrap();
        assert_eq!(closed.len(), 5_000);
        assert_eq!(closed[0].name, "f4999");
    }
}
