use crate::{Database, LoadOptions, Params};

use std::fs;
use std::path::{Path, PathBuf};

//-----------------------------------------------------------------------------

// Files.

pub(crate) fn write_text(dir: &Path, name: &str, text: &str) -> PathBuf {
    let filename = dir.join(name);
    let result = fs::write(&filename, text);
    assert!(result.is_ok(), "Failed to write {}: {}", filename.display(), result.unwrap_err());
    filename
}

pub(crate) fn read_text(filename: &Path) -> String {
    let result = crate::utils::read_lines(filename);
    assert!(result.is_ok(), "Failed to read {}: {}", filename.display(), result.unwrap_err());
    result.unwrap().join("\n")
}

//-----------------------------------------------------------------------------

// Parameters.

pub(crate) fn params_from(text: &str) -> Params {
    let params = Params::from_toml_str(text);
    assert!(params.is_ok(), "Failed to parse parameters: {}", params.unwrap_err());
    params.unwrap()
}

//-----------------------------------------------------------------------------

// Databases.

pub(crate) fn database_with_tables(dir: &Path, tables: &[(&str, &str)]) -> Database {
    let database = Database::open(dir.join("csvdb"));
    assert!(database.is_ok(), "Failed to open database: {}", database.unwrap_err());
    let mut database = database.unwrap();
    for (name, text) in tables {
        let filename = write_text(dir, &format!("{}.tsv", name), text);
        let result = database.load(&filename, name, &LoadOptions::default());
        assert!(result.is_ok(), "Failed to load table {}: {}", name, result.unwrap_err());
    }
    database
}

//-----------------------------------------------------------------------------
