//! Reading and writing dotenv files.
//!
//! Files are parsed with `dotenvy`. Values are always written quoted so that
//! `dotenvy` reads them back verbatim: single quotes when possible, double
//! quotes with escapes when the value holds a single quote or a newline.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use crate::error::{Result, StateError};

/// Header written at the top of every managed file.
const FILE_HEADER: &str = "# Managed by vaulter. Edit with `vaulter set`.\n";

/// Parses a dotenv file into a sorted map. A missing file is empty.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn read_env_file(path: &Path) -> Result<BTreeMap<String, String>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }

    let read_failed = |message: String| StateError::ReadFailed {
        path: path.to_path_buf(),
        message,
    };

    let iter = dotenvy::from_path_iter(path).map_err(|e| read_failed(e.to_string()))?;
    let mut vars = BTreeMap::new();
    for item in iter {
        let (key, value) = item.map_err(|e| read_failed(e.to_string()))?;
        vars.insert(key, value);
    }
    Ok(vars)
}

/// Reads a dotenv file that must exist, such as one being imported.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn read_import_file(path: &Path) -> Result<BTreeMap<String, String>> {
    let content = std::fs::read_to_string(path).map_err(|e| StateError::ReadFailed {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    parse_env_str(&content, path)
}

/// Parses dotenv content held in memory.
///
/// # Errors
///
/// Returns an error if the content is not valid dotenv syntax.
pub fn parse_env_str(content: &str, origin: &Path) -> Result<BTreeMap<String, String>> {
    let mut vars = BTreeMap::new();
    for item in dotenvy::from_read_iter(content.as_bytes()) {
        let (key, value) = item.map_err(|e| StateError::ReadFailed {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })?;
        vars.insert(key, value);
    }
    Ok(vars)
}

/// Quotes a value so `dotenvy` parses it back unchanged.
#[must_use]
pub fn quote_value(value: &str) -> String {
    if !value.contains('\'') && !value.contains('\n') {
        return format!("'{value}'");
    }

    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        match c {
            '\\' => quoted.push_str("\\\\"),
            '"' => quoted.push_str("\\\""),
            '$' => quoted.push_str("\\$"),
            '\n' => quoted.push_str("\\n"),
            other => quoted.push(other),
        }
    }
    quoted.push('"');
    quoted
}

/// Renders `KEY='value'` lines in key order.
#[must_use]
pub fn render_lines(vars: &BTreeMap<String, String>) -> String {
    vars.iter()
        .map(|(key, value)| format!("{key}={}\n", quote_value(value)))
        .collect()
}

/// Writes a dotenv file atomically. Empty maps remove the file.
///
/// # Errors
///
/// Returns an error if the file cannot be written or renamed.
pub fn write_env_file(path: &Path, vars: &BTreeMap<String, String>, owner_only: bool) -> Result<()> {
    if vars.is_empty() {
        if path.exists() {
            std::fs::remove_file(path).map_err(|e| StateError::WriteFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        }
        return Ok(());
    }

    let content = format!("{FILE_HEADER}{}", render_lines(vars));
    write_atomic(path, &content, owner_only)
}

/// Writes content to a temporary sibling file, then renames it into place.
///
/// # Errors
///
/// Returns an error if any filesystem step fails.
pub fn write_atomic(path: &Path, content: &str, owner_only: bool) -> Result<()> {
    let write_failed = |message: String| StateError::WriteFailed {
        path: path.to_path_buf(),
        message,
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| write_failed(e.to_string()))?;
    }

    let temp_path = path.with_extension("tmp");
    let mut file = std::fs::File::create(&temp_path).map_err(|e| write_failed(e.to_string()))?;
    if owner_only {
        restrict_permissions(&temp_path).map_err(|e| write_failed(e.to_string()))?;
    }
    file.write_all(content.as_bytes())
        .map_err(|e| write_failed(e.to_string()))?;
    file.sync_all().map_err(|e| write_failed(e.to_string()))?;

    std::fs::rename(&temp_path, path).map_err(|e| write_failed(e.to_string()))?;
    Ok(())
}

/// Makes a file readable by its owner only.
#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

/// Permissions are left to the platform default elsewhere.
#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn round_trip(value: &str) -> String {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("test.env");
        let mut vars = BTreeMap::new();
        vars.insert(String::from("KEY"), value.to_string());
        write_env_file(&path, &vars, false).expect("write");
        read_env_file(&path).expect("read").remove("KEY").expect("present")
    }

    #[test]
    fn test_values_survive_quoting() {
        for value in [
            "plain",
            "with spaces  ",
            "postgres://u:p@h:5432/db?ssl=true",
            "it's quoted",
            "line one\nline two",
            "$HOME and ${PATH}",
            "it's $HOME",
            "back\\slash \"double\"",
            "# not a comment",
            "",
        ] {
            assert_eq!(round_trip(value), value, "value {value:?}");
        }
    }

    #[test]
    fn test_quote_value_forms() {
        assert_eq!(quote_value("abc"), "'abc'");
        assert_eq!(quote_value("it's"), "\"it's\"");
        assert_eq!(quote_value("a\nb"), "\"a\\nb\"");
        assert_eq!(quote_value("it's $X"), "\"it's \\$X\"");
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().expect("temp dir");
        assert!(read_env_file(&dir.path().join("absent.env")).expect("read").is_empty());
    }

    #[test]
    fn test_empty_map_removes_file() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("test.env");
        let mut vars = BTreeMap::new();
        vars.insert(String::from("A"), String::from("1"));
        write_env_file(&path, &vars, false).expect("write");
        assert!(path.exists());

        write_env_file(&path, &BTreeMap::new(), false).expect("write");
        assert!(!path.exists());
    }

    #[test]
    fn test_parse_env_str() {
        let vars = parse_env_str("A=1\n# comment\nexport B='two'\n", Path::new("inline"))
            .expect("parse");
        assert_eq!(vars.get("A").map(String::as_str), Some("1"));
        assert_eq!(vars.get("B").map(String::as_str), Some("two"));
    }

    #[cfg(unix)]
    #[test]
    fn test_owner_only_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("secrets.env");
        let mut vars = BTreeMap::new();
        vars.insert(String::from("TOKEN"), String::from("x"));
        write_env_file(&path, &vars, true).expect("write");

        let mode = std::fs::metadata(&path).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
