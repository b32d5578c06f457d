//! Unit files - change units authored as JSON
//!
//! One unit per `*.json` file. The version defaults to the file stem and the
//! backward operation, when omitted, is derived from the forward one.

use std::fs;
use std::path::Path;

use log::debug;
use serde::Deserialize;

use crate::domain::result::{Error, Result};
use crate::domain::{ChangeUnit, Operation};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct UnitFile {
    version: Option<String>,
    description: Option<String>,
    forward: Operation,
    backward: Option<Operation>,
}

/// Parse one unit file's contents
///
/// `fallback_version` is used when the file does not name its version.
pub fn parse_unit(contents: &str, fallback_version: &str) -> Result<ChangeUnit> {
    let file: UnitFile = serde_json::from_str(contents)
        .map_err(|e| Error::invalid_unit(format!("{}: {}", fallback_version, e)))?;

    let version = file.version.unwrap_or_else(|| fallback_version.to_string());
    let unit = match file.backward {
        Some(backward) => ChangeUnit::new(version, file.forward, backward),
        None => ChangeUnit::reversible(version, file.forward)?,
    };

    Ok(match file.description {
        Some(description) => unit.with_description(description),
        None => unit,
    })
}

/// Load every `*.json` unit in a directory, sorted by file name
///
/// A missing directory yields no units.
pub fn load_dir(dir: &Path) -> Result<Vec<ChangeUnit>> {
    if !dir.exists() {
        debug!("Unit directory {} does not exist", dir.display());
        return Ok(Vec::new());
    }

    let mut paths = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().map_or(false, |ext| ext == "json") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut units = Vec::with_capacity(paths.len());
    for path in paths {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| Error::invalid_unit(format!("bad unit file name {}", path.display())))?;
        let contents = fs::read_to_string(&path)?;
        debug!("Loading unit {} from {}", stem, path.display());
        units.push(parse_unit(&contents, stem)?);
    }
    Ok(units)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_backward_derived_when_omitted() {
        let unit = parse_unit(
            r#"{
                "forward": {
                    "op": "add_column",
                    "table": "jeune",
                    "column": { "name": "email", "type": "varchar(255)" }
                }
            }"#,
            "20220101000000-jeune-email",
        )
        .unwrap();

        assert_eq!(unit.version, "20220101000000-jeune-email");
        assert_eq!(
            unit.backward,
            Operation::RemoveColumn {
                table: "jeune".to_string(),
                column: "email".to_string(),
            }
        );
    }

    #[test]
    fn test_explicit_version_and_backward() {
        let unit = parse_unit(
            r#"{
                "version": "003-fix",
                "description": "clear codes",
                "forward": { "op": "raw_sql", "sql": "UPDATE t SET c = 1" },
                "backward": { "op": "noop" }
            }"#,
            "ignored",
        )
        .unwrap();

        assert_eq!(unit.version, "003-fix");
        assert_eq!(unit.description.as_deref(), Some("clear codes"));
        assert_eq!(unit.backward, Operation::Noop);
    }

    #[test]
    fn test_underivable_backward_rejected() {
        let err = parse_unit(
            r#"{ "forward": { "op": "raw_sql", "sql": "DELETE FROM t" } }"#,
            "004-purge",
        )
        .unwrap_err();
        assert_eq!(err.kind(), "InvalidUnit");
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let err = parse_unit(r#"{ "forward": { "op": "noop" }, "down": {} }"#, "x").unwrap_err();
        assert_eq!(err.kind(), "InvalidUnit");
    }

    #[test]
    fn test_malformed_json_names_the_unit() {
        let err = parse_unit("{ \"forward\": ", "20230101000000-agence").unwrap_err();
        assert_eq!(err.kind(), "InvalidUnit");
        assert!(err.to_string().contains("20230101000000-agence"));
    }

    #[test]
    fn test_load_dir_reads_json_only() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("002-b.json"),
            r#"{ "forward": { "op": "drop_table", "table": "t" }, "backward": { "op": "noop" } }"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("001-a.json"),
            r#"{ "forward": { "op": "noop" }, "backward": { "op": "noop" } }"#,
        )
        .unwrap();
        fs::write(dir.path().join("README.md"), "not a unit").unwrap();

        let units = load_dir(dir.path()).unwrap();
        let versions: Vec<&str> = units.iter().map(|u| u.version.as_str()).collect();
        assert_eq!(versions, vec!["001-a", "002-b"]);
    }

    #[test]
    fn test_missing_dir_is_empty() {
        let dir = tempdir().unwrap();
        assert!(load_dir(&dir.path().join("absent")).unwrap().is_empty());
    }
}
