//! Loading descriptions and item data from disk.
//!
//! `.toml` files are read as TOML, everything else as JSON. Scalar values of
//! any type are accepted and kept as their textual form, which is how submit
//! descriptions carry them.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde_json::Value;

use super::{ItemData, JobDescription, JobError};

fn load_error(path: &Path, message: impl Into<String>) -> JobError {
    JobError::Load {
        path: path.display().to_string(),
        message: message.into(),
    }
}

fn read_value(path: &Path) -> Result<Value, JobError> {
    let contents = fs::read_to_string(path).map_err(|e| load_error(path, e.to_string()))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);

    if is_toml {
        let value: toml::Value =
            toml::from_str(&contents).map_err(|e| load_error(path, e.to_string()))?;
        serde_json::to_value(value).map_err(|e| load_error(path, e.to_string()))
    } else {
        serde_json::from_str(&contents).map_err(|e| load_error(path, e.to_string()))
    }
}

fn scalar_text(path: &Path, key: &str, value: &Value) -> Result<String, JobError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(load_error(path, format!("value of {} must be a scalar", key))),
    }
}

fn string_map(path: &Path, value: &Value) -> Result<BTreeMap<String, String>, JobError> {
    let object = value
        .as_object()
        .ok_or_else(|| load_error(path, "expected a table of keyword = value"))?;
    object
        .iter()
        .map(|(k, v)| Ok((k.clone(), scalar_text(path, k, v)?)))
        .collect()
}

/// Load a submit description
pub fn load_description(path: &Path) -> Result<JobDescription, JobError> {
    let value = read_value(path)?;
    Ok(string_map(path, &value)?.into_iter().collect())
}

/// Load item data: a JSON array of objects, or TOML `[[items]]` tables
pub fn load_item_data(path: &Path) -> Result<ItemData, JobError> {
    let value = read_value(path)?;
    let rows = match &value {
        Value::Array(rows) => rows,
        Value::Object(table) => table
            .get("items")
            .and_then(Value::as_array)
            .ok_or_else(|| load_error(path, "expected an `items` array"))?,
        _ => return Err(load_error(path, "expected an array of item rows")),
    };
    rows.iter().map(|row| string_map(path, row)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_json_description() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "job.json",
            r#"{"executable": "/bin/cat", "request_cpus": 1, "hold": false}"#,
        );
        let d = load_description(&path).unwrap();
        assert_eq!(d.get("executable"), Some("/bin/cat"));
        assert_eq!(d.get("request_cpus"), Some("1"));
        assert_eq!(d.get("hold"), Some("false"));
    }

    #[test]
    fn test_load_toml_items() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "items.toml",
            "[[items]]\nitem = \"README.md\"\n\n[[items]]\nitem = \"LICENSE\"\n",
        );
        let items = load_item_data(&path).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1]["item"], "LICENSE");
    }

    #[test]
    fn test_load_rejects_nested_values() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "job.json", r#"{"executable": ["a"]}"#);
        let err = load_description(&path).unwrap_err();
        assert!(err.to_string().contains("executable"));
    }
}
