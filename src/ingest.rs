//! JSON record loading for the `index` command.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use walkdir::WalkDir;

use crate::error::{CatalogError, Result};
use crate::model::Record;

#[derive(Deserialize)]
#[serde(untagged)]
enum Document {
    Many(Vec<Record>),
    One(Box<Record>),
}

/// Read a file holding a single record or an array of records.
pub fn load_records(path: &Path) -> Result<Vec<Record>> {
    let text = fs::read_to_string(path)?;
    let document: Document = serde_json::from_str(&text).map_err(|e| {
        CatalogError::serialization(format!("{}: not a record or list of records: {}", path.display(), e))
            .with_source(e)
    })?;

    Ok(match document {
        Document::Many(records) => records,
        Document::One(record) => vec![*record],
    })
}

/// All `.json` files under `dir`, sorted by path. Unreadable entries are skipped.
pub fn collect_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .flatten()
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("json"))
        })
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::tempdir;

    #[test]
    fn test_single_and_array_documents() {
        let dir = tempdir().unwrap();
        let one = dir.path().join("one.json");
        let many = dir.path().join("many.json");
        fs::write(&one, r#"{"identifier": "a", "properties": {"title": "A"}}"#).unwrap();
        fs::write(
            &many,
            r#"[{"identifier": "b"}, {"identifier": "c", "geometry": {"type": "Polygon", "coordinates": []}}]"#,
        )
        .unwrap();

        let records = load_records(&one).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].properties.title, "A");

        let records = load_records(&many).unwrap();
        let ids: Vec<_> = records.iter().map(|r| r.identifier.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn test_invalid_document() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, r#"{"title": "no identifier"}"#).unwrap();

        let err = load_records(&path).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Serialization);

        let err = load_records(&dir.path().join("absent.json")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Io);
    }

    #[test]
    fn test_collect_files() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("nested/deeper")).unwrap();
        fs::write(dir.path().join("b.json"), "{}").unwrap();
        fs::write(dir.path().join("notes.txt"), "").unwrap();
        fs::write(dir.path().join("nested/deeper/a.JSON"), "{}").unwrap();

        let files = collect_files(dir.path());
        assert_eq!(
            files,
            vec![dir.path().join("b.json"), dir.path().join("nested/deeper/a.JSON")]
        );
    }
}
