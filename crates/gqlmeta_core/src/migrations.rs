use std::collections::BTreeMap;
use std::path::Path;

use walkdir::WalkDir;

use crate::errors::DriverError;

/// A versioned migration found in the local migrations directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalMigration {
    pub version: u64,
    pub name: String,
    pub has_up: bool,
    pub has_down: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Up,
    Down,
}

/// Collect migrations from flat files (`<version>_<name>.up.sql`) and from
/// per-version directories (`<version>_<name>/up.yaml`), ordered by version.
pub fn scan_migrations(dir: &Path) -> Result<Vec<LocalMigration>, DriverError> {
    let mut by_version: BTreeMap<u64, LocalMigration> = BTreeMap::new();

    for entry in WalkDir::new(dir).min_depth(1).max_depth(2).follow_links(true) {
        let entry = entry.map_err(|source| DriverError::MigrationsDir {
            path: dir.to_path_buf(),
            source,
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(file_name) = entry.file_name().to_str() else {
            continue;
        };

        let parsed = if entry.depth() == 1 {
            parse_flat_file(file_name)
        } else {
            let parent = entry
                .path()
                .parent()
                .and_then(Path::file_name)
                .and_then(|value| value.to_str());
            match (parent.and_then(parse_version_prefix), direction_of(file_name)) {
                (Some((version, name)), Some(direction)) => Some((version, name, direction)),
                _ => None,
            }
        };
        let Some((version, name, direction)) = parsed else {
            continue;
        };

        let migration = by_version.entry(version).or_insert_with(|| LocalMigration {
            version,
            name: name.to_string(),
            has_up: false,
            has_down: false,
        });
        if migration.name != name {
            return Err(DriverError::Migrations {
                path: dir.to_path_buf(),
                reason: format!(
                    "version {version} is used by both `{}` and `{name}`",
                    migration.name
                ),
            });
        }
        match direction {
            Direction::Up => migration.has_up = true,
            Direction::Down => migration.has_down = true,
        }
    }

    Ok(by_version.into_values().collect())
}

fn parse_flat_file(file_name: &str) -> Option<(u64, &str, Direction)> {
    let stem = strip_one_of(file_name, &[".sql", ".yaml"])?;
    let (stem, direction) = if let Some(stem) = stem.strip_suffix(".up") {
        (stem, Direction::Up)
    } else {
        (stem.strip_suffix(".down")?, Direction::Down)
    };
    let (version, name) = parse_version_prefix(stem)?;
    Some((version, name, direction))
}

fn direction_of(file_name: &str) -> Option<Direction> {
    match strip_one_of(file_name, &[".sql", ".yaml"])? {
        "up" => Some(Direction::Up),
        "down" => Some(Direction::Down),
        _ => None,
    }
}

fn parse_version_prefix(value: &str) -> Option<(u64, &str)> {
    let (version, name) = value.split_once('_')?;
    if name.is_empty() {
        return None;
    }
    Some((version.parse().ok()?, name))
}

fn strip_one_of<'a>(value: &'a str, extensions: &[&str]) -> Option<&'a str> {
    extensions
        .iter()
        .find_map(|extension| value.strip_suffix(extension))
}
