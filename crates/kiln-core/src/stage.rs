//! Partitioning of staged inputs.

use indexmap::IndexMap;
use kiln_schema::{RepositoryInfo, Stage};

/// Names tagged with `stage`, in input order.
pub fn staged(stage: Stage, data: &IndexMap<String, Stage>) -> Vec<String> {
    data.iter()
        .filter(|(_, s)| **s == stage)
        .map(|(name, _)| name.clone())
        .collect()
}

/// Repository locations whose info is tagged with `stage`, in input order.
pub fn staged_repositories(stage: Stage, data: &IndexMap<String, RepositoryInfo>) -> Vec<String> {
    data.iter()
        .filter(|(_, info)| info.stage == stage)
        .map(|(location, _)| location.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_input_order_per_stage() {
        let mut data = IndexMap::new();
        data.insert("z".to_owned(), Stage::Boot);
        data.insert("a".to_owned(), Stage::Startup);
        data.insert("m".to_owned(), Stage::Boot);

        assert_eq!(staged(Stage::Boot, &data), vec!["z", "m"]);
        assert_eq!(staged(Stage::Startup, &data), vec!["a"]);
        assert!(staged(Stage::Installed, &data).is_empty());
    }

    #[test]
    fn partitions_repositories_by_info_stage() {
        let mut data = IndexMap::new();
        data.insert(
            "mvn:g/r1/1.0/xml/features".to_owned(),
            RepositoryInfo {
                stage: Stage::Installed,
                add_all: true,
            },
        );
        data.insert(
            "mvn:g/r2/1.0/xml/features".to_owned(),
            RepositoryInfo {
                stage: Stage::Boot,
                add_all: false,
            },
        );
        assert_eq!(
            staged_repositories(Stage::Boot, &data),
            vec!["mvn:g/r2/1.0/xml/features"]
        );
    }

    #[test]
    fn every_name_lands_in_exactly_one_stage() {
        let mut data = IndexMap::new();
        for (i, stage) in [Stage::Startup, Stage::Boot, Stage::Installed, Stage::Boot]
            .into_iter()
            .enumerate()
        {
            data.insert(format!("n{i}"), stage);
        }
        let total: usize = Stage::ALL.iter().map(|s| staged(*s, &data).len()).sum();
        assert_eq!(total, data.len());
    }
}
