//! SQLite database for pipeline results.
//!
//! Pipeline stages produce tab-separated tables that are loaded into a single SQLite database.
//! Each table is named `<track>_<stage>` by convention, and loading a table replaces any earlier version of it.
//! The loading job writes a sentinel file (`*.load`) that records the table name and the number of rows.
//!
//! Column types are inferred from the data:
//!
//! * `INTEGER` if all values are integers;
//! * `REAL` if all values are numbers;
//! * `TEXT` otherwise.
//!
//! Values `NA`, `na`, and empty strings are stored as `NULL`.

use crate::table::Table;
use crate::{tracks, utils};

use std::collections::{BTreeSet, HashSet};
use std::fmt::Display;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use log::{debug, info, warn};
use regex::Regex;
use rusqlite::types::{Value, ValueRef};
use rusqlite::{params_from_iter, Connection, OptionalExtension};

#[cfg(test)]
mod tests;

//-----------------------------------------------------------------------------

/// Options for loading a table.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoadOptions {
    /// Create an index on each of these columns.
    ///
    /// Columns that do not exist are skipped with a warning.
    pub add_index: Vec<String>,
    /// Loading a table without data rows succeeds without creating a table.
    pub allow_empty: bool,
    /// Rename the first column.
    pub first_column: Option<String>,
    /// The file has no header line, and these are the column names.
    pub header_names: Option<Vec<String>>,
}

impl LoadOptions {
    /// Returns options that index the given columns.
    pub fn with_index(columns: &[&str]) -> Self {
        LoadOptions {
            add_index: columns.iter().map(|x| x.to_string()).collect(),
            ..LoadOptions::default()
        }
    }
}

/// How to determine the track of a file when merging tables.
#[derive(Clone, Debug)]
pub enum TrackPattern {
    /// Remove this suffix from the file name.
    Suffix(String),
    /// Use the first capture group of the regex on the file name.
    Regex(Regex),
}

impl TrackPattern {
    /// Returns the track for the file.
    pub fn track<P: AsRef<Path>>(&self, filename: P) -> Result<String, String> {
        let name = utils::basename(&filename);
        match self {
            TrackPattern::Suffix(suffix) => utils::snip(&name, suffix),
            TrackPattern::Regex(pattern) => {
                let captures = pattern.captures(&name).and_then(|x| x.get(1));
                captures.map(|x| x.as_str().to_string()).ok_or_else(|| {
                    format!("Cannot determine the track for {}", filename.as_ref().display())
                })
            },
        }
    }
}

/// Kind of object created by [`Database::create_view`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViewKind {
    View,
    Table,
}

impl ViewKind {
    fn keyword(&self) -> &'static str {
        match self {
            ViewKind::View => "VIEW",
            ViewKind::Table => "TABLE",
        }
    }
}

//-----------------------------------------------------------------------------

/// A value returned by a query.
#[derive(Clone, Debug, PartialEq)]
pub enum Cell {
    Null,
    Int(i64),
    Real(f64),
    Text(String),
}

impl Cell {
    /// Returns the value as a float, if it is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Int(value) => Some(*value as f64),
            Cell::Real(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the value as an integer, if it is an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Cell::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the value as a string, if it is text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Cell::Text(value) => Some(value),
            _ => None,
        }
    }

    fn from_ref(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Cell::Null,
            ValueRef::Integer(value) => Cell::Int(value),
            ValueRef::Real(value) => Cell::Real(value),
            ValueRef::Text(bytes) | ValueRef::Blob(bytes) => Cell::Text(String::from_utf8_lossy(bytes).into_owned()),
        }
    }
}

impl Display for Cell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Cell::Null => write!(f, "NA"),
            Cell::Int(value) => write!(f, "{}", value),
            Cell::Real(value) => write!(f, "{}", value),
            Cell::Text(value) => write!(f, "{}", value),
        }
    }
}

/// The result of a query: column names and rows.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryResult {
    pub header: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl QueryResult {
    /// Returns the index of the named column.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|x| x == name)
    }
}

//-----------------------------------------------------------------------------

// Inferred SQL type of a column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum ColumnType {
    Integer,
    Real,
    Text,
}

impl ColumnType {
    fn sql(&self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Text => "TEXT",
        }
    }

    fn infer<'a, I: Iterator<Item = &'a str>>(values: I) -> Self {
        let mut result = ColumnType::Integer;
        let mut seen = false;
        for value in values {
            if is_null(value) {
                continue;
            }
            seen = true;
            if result == ColumnType::Integer && value.parse::<i64>().is_ok() {
                continue;
            }
            // Tokens such as `inf` and `nan` are text.
            match value.parse::<f64>() {
                Ok(number) if number.is_finite() => result = ColumnType::Real,
                _ => return ColumnType::Text,
            }
        }
        if seen { result } else { ColumnType::Text }
    }

    fn convert(&self, value: &str) -> Value {
        if is_null(value) {
            return Value::Null;
        }
        match self {
            ColumnType::Integer => value.parse::<i64>().map(Value::Integer).unwrap_or(Value::Null),
            ColumnType::Real => value.parse::<f64>().map(Value::Real).unwrap_or(Value::Null),
            ColumnType::Text => Value::Text(value.to_string()),
        }
    }
}

fn is_null(value: &str) -> bool {
    value.is_empty() || value == "NA" || value == "na"
}

/// Quotes an SQL identifier.
pub fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Converts column names into valid SQL identifiers.
///
/// Characters other than ASCII alphanumerics and `_` become `_`, a leading digit is prefixed with `_`, and duplicate names (ignoring case) get a numeric suffix.
pub fn sanitize_columns(names: &[String]) -> Vec<String> {
    let mut used: HashSet<String> = HashSet::new();
    let mut result = Vec::with_capacity(names.len());
    for name in names {
        let mut clean: String = name.trim().chars().map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' }).collect();
        if clean.is_empty() {
            clean = String::from("column");
        }
        if clean.starts_with(|c: char| c.is_ascii_digit()) {
            clean.insert(0, '_');
        }
        let mut candidate = clean.clone();
        let mut suffix = 2;
        while used.contains(&candidate.to_lowercase()) {
            candidate = format!("{}_{}", clean, suffix);
            suffix += 1;
        }
        used.insert(candidate.to_lowercase());
        result.push(candidate);
    }
    result
}

//-----------------------------------------------------------------------------

/// A connection to the pipeline database.
///
/// Each job should open its own connection.
#[derive(Debug)]
pub struct Database {
    connection: Connection,
}

/// Opening the database.
impl Database {
    /// Time to wait for a lock held by another connection.
    pub const BUSY_TIMEOUT: Duration = Duration::from_secs(60);

    /// Opens the database in the given file, creating it if necessary.
    pub fn open<P: AsRef<Path>>(filename: P) -> Result<Self, String> {
        let connection = Connection::open(&filename).map_err(|x| {
            format!("Cannot open database {}: {}", filename.as_ref().display(), x)
        })?;
        connection.busy_timeout(Self::BUSY_TIMEOUT).map_err(|x| x.to_string())?;
        Ok(Database { connection })
    }

    /// Opens a temporary in-memory database.
    pub fn open_in_memory() -> Result<Self, String> {
        let connection = Connection::open_in_memory().map_err(|x| x.to_string())?;
        Ok(Database { connection })
    }

    /// Attaches another database under the given alias.
    ///
    /// Tables in the attached database are available as `alias.table`.
    pub fn attach<P: AsRef<Path>>(&self, filename: P, alias: &str) -> Result<(), String> {
        if !utils::file_exists(&filename) {
            return Err(format!("Database {} does not exist", filename.as_ref().display()));
        }
        let filename = utils::path_str(&filename);
        self.connection.execute("ATTACH DATABASE ?1 AS ?2", (&filename, alias)).map_err(|x| x.to_string())?;
        debug!("Attached {} as {}", filename, alias);
        Ok(())
    }

    /// Returns the underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }
}

//-----------------------------------------------------------------------------

/// Loading tables.
impl Database {
    /// Loads a table from a tsv file and returns the number of rows.
    ///
    /// Lines starting with `#` are skipped.
    /// An existing table with the same name is replaced.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or the table has no data rows and [`LoadOptions::allow_empty`] is not set.
    /// Passes through database errors.
    pub fn load<P: AsRef<Path>>(&mut self, filename: P, name: &str, options: &LoadOptions) -> Result<usize, String> {
        info!("Loading {} into table {}", filename.as_ref().display(), name);
        let has_header = options.header_names.is_none();
        let table = Table::read_file(&filename, has_header)?;
        self.load_table(&table, name, options).map_err(|x| format!("{}: {}", filename.as_ref().display(), x))
    }

    /// Loads an in-memory table and returns the number of rows.
    pub fn load_table(&mut self, table: &Table, name: &str, options: &LoadOptions) -> Result<usize, String> {
        let mut header = match &options.header_names {
            Some(names) => names.clone(),
            None => table.header.clone(),
        };
        if let Some(first) = &options.first_column {
            if let Some(column) = header.first_mut() {
                *column = first.clone();
            }
        }

        self.drop_object(name)?;
        if table.rows.is_empty() || header.is_empty() {
            if options.allow_empty {
                warn!("No data for table {}", name);
                return Ok(0);
            }
            return Err(format!("No data for table {}", name));
        }
        if let Some(row) = table.rows.iter().find(|x| x.len() > header.len()) {
            return Err(format!("Row has {} fields but the header has {}: {}", row.len(), header.len(), row.join("\t")));
        }

        let columns = sanitize_columns(&header);
        let types: Vec<ColumnType> = (0..columns.len()).map(|c| {
            ColumnType::infer(table.rows.iter().map(move |row| row.get(c).map(|x| x.as_str()).unwrap_or("")))
        }).collect();

        let definitions: Vec<String> = columns.iter().zip(types.iter()).map(|(column, t)| {
            format!("{} {}", quote(column), t.sql())
        }).collect();
        let create = format!("CREATE TABLE {} ({}) STRICT", quote(name), definitions.join(", "));
        self.connection.execute(&create, ()).map_err(|x| x.to_string())?;

        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
        let insert_sql = format!("INSERT INTO {} VALUES ({})", quote(name), placeholders.join(", "));
        let mut inserted = 0;
        let transaction = self.connection.transaction().map_err(|x| x.to_string())?;
        {
            let mut insert = transaction.prepare(&insert_sql).map_err(|x| x.to_string())?;
            for row in table.rows.iter() {
                let values = types.iter().enumerate().map(|(c, t)| {
                    t.convert(row.get(c).map(|x| x.as_str()).unwrap_or(""))
                });
                insert.execute(params_from_iter(values)).map_err(|x| x.to_string())?;
                inserted += 1;
            }
        }
        transaction.commit().map_err(|x| x.to_string())?;

        for column in options.add_index.iter() {
            match columns.iter().find(|x| x.eq_ignore_ascii_case(column)) {
                Some(column) => {
                    let index = format!("{}_{}", name, column);
                    let sql = format!("CREATE INDEX {} ON {} ({})", quote(&index), quote(name), quote(column));
                    self.connection.execute(&sql, ()).map_err(|x| x.to_string())?;
                },
                None => warn!("Cannot index missing column {} in table {}", column, name),
            }
        }

        info!("Inserted {} rows into table {}", inserted, name);
        Ok(inserted)
    }

    /// Loads a tsv file into the table named by the sentinel file, and writes the sentinel.
    ///
    /// The table name is derived with [`tracks::to_table`].
    pub fn load_file<P: AsRef<Path>, Q: AsRef<Path>>(&mut self, infile: P, outfile: Q, options: &LoadOptions) -> Result<usize, String> {
        let name = tracks::to_table(&outfile);
        let rows = self.load(infile, &name, options)?;
        write_sentinel(outfile, &name, rows)?;
        Ok(rows)
    }

    /// Concatenates tables with identical headers and loads the result.
    ///
    /// A `track` column determined by the pattern is added as the first column.
    /// The table is named by the sentinel file, and the sentinel is written.
    ///
    /// # Errors
    ///
    /// Returns an error if the headers differ or a track cannot be determined.
    pub fn merge_and_load<P: AsRef<Path>, Q: AsRef<Path>>(
        &mut self, files: &[P], outfile: Q, pattern: &TrackPattern, options: &LoadOptions
    ) -> Result<usize, String> {
        let mut merged = Table::default();
        for (index, filename) in files.iter().enumerate() {
            let track = pattern.track(filename)?;
            let table = Table::read_file(filename, true)?;
            if index == 0 {
                merged.header.push(String::from("track"));
                merged.header.extend(table.header.iter().cloned());
            } else if merged.header[1..] != table.header[..] {
                return Err(format!("Header of {} differs from the header of the first file", filename.as_ref().display()));
            }
            for row in table.rows {
                let mut full = Vec::with_capacity(row.len() + 1);
                full.push(track.clone());
                full.extend(row);
                merged.rows.push(full);
            }
        }

        let name = tracks::to_table(&outfile);
        let rows = self.load_table(&merged, &name, options)?;
        write_sentinel(outfile, &name, rows)?;
        Ok(rows)
    }

    /// Concatenates tables with possibly different headers and loads the result.
    ///
    /// The header is the union of the headers in order of appearance.
    /// Missing cells are filled with `missing`.
    /// A `track` column determined by the pattern is added as the first column.
    pub fn concatenate_and_load<P: AsRef<Path>, Q: AsRef<Path>>(
        &mut self, files: &[P], outfile: Q, pattern: &TrackPattern, missing: &str, options: &LoadOptions
    ) -> Result<usize, String> {
        let mut columns: Vec<String> = Vec::new();
        let mut tables = Vec::with_capacity(files.len());
        for filename in files {
            let track = pattern.track(filename)?;
            let table = Table::read_file(filename, true)?;
            for column in table.header.iter() {
                if !columns.contains(column) {
                    columns.push(column.clone());
                }
            }
            tables.push((track, table));
        }

        let mut merged = Table::default();
        merged.header.push(String::from("track"));
        merged.header.extend(columns.iter().cloned());
        for (track, table) in tables {
            let positions: Vec<Option<usize>> = columns.iter().map(|x| table.column_index(x)).collect();
            for row in table.rows.iter() {
                let mut full = vec![track.clone()];
                for position in positions.iter() {
                    let value = position.and_then(|i| row.get(i)).map(|x| x.as_str()).unwrap_or(missing);
                    full.push(value.to_string());
                }
                merged.rows.push(full);
            }
        }

        let name = tracks::to_table(&outfile);
        let rows = self.load_table(&merged, &name, options)?;
        write_sentinel(outfile, &name, rows)?;
        Ok(rows)
    }

    // Drops a table or a view with the given name.
    fn drop_object(&self, name: &str) -> Result<(), String> {
        let kind: Option<String> = self.connection.query_row(
            "SELECT type FROM sqlite_master WHERE name = ?1 AND type IN ('table', 'view')",
            (name,),
            |row| row.get(0)
        ).optional().map_err(|x| x.to_string())?;
        if let Some(kind) = kind {
            debug!("Dropping {} {}", kind, name);
            let sql = format!("DROP {} {}", kind.to_uppercase(), quote(name));
            self.connection.execute(&sql, ()).map_err(|x| x.to_string())?;
        }
        Ok(())
    }

    /// Creates a view or a table that joins the given tables on their key columns.
    ///
    /// Each table is given as `(table, key column)`, and all keys are matched against the key of the first table.
    /// The output has all columns of the first table and the non-key columns of the other tables, skipping names that already appear.
    /// An existing object with the same name is replaced.
    pub fn create_view(&self, tables: &[(&str, &str)], name: &str, kind: ViewKind) -> Result<(), String> {
        if tables.is_empty() {
            return Err(format!("No tables for view {}", name));
        }
        let mut used: BTreeSet<String> = BTreeSet::new();
        let mut selected: Vec<String> = Vec::new();
        for (index, (table, key)) in tables.iter().enumerate() {
            let columns = self.columns(table)?;
            if !columns.iter().any(|x| x == key) {
                return Err(format!("Table {} has no column {}", table, key));
            }
            for column in columns {
                if (index > 0 && column == *key) || used.contains(&column.to_lowercase()) {
                    continue;
                }
                used.insert(column.to_lowercase());
                selected.push(format!("t{}.{}", index, quote(&column)));
            }
        }

        let (first, first_key) = tables[0];
        let mut from = format!("{} AS t0", quote(first));
        for (index, (table, key)) in tables.iter().enumerate().skip(1) {
            from.push_str(&format!(
                " JOIN {} AS t{} ON t0.{} = t{}.{}",
                quote(table), index, quote(first_key), index, quote(key)
            ));
        }

        self.drop_object(name)?;
        let sql = format!("CREATE {} {} AS SELECT {} FROM {}", kind.keyword(), quote(name), selected.join(", "), from);
        self.connection.execute(&sql, ()).map_err(|x| x.to_string())?;
        info!("Created {} {}", kind.keyword().to_lowercase(), name);
        Ok(())
    }
}

/// Writes a sentinel file recording the table name and the number of rows.
pub fn write_sentinel<P: AsRef<Path>>(filename: P, table: &str, rows: usize) -> Result<(), String> {
    let mut file = utils::create_file(&filename)?;
    writeln!(file, "{}\t{}", table, rows).map_err(|x| format!("{}: {}", filename.as_ref().display(), x))?;
    file.flush().map_err(|x| x.to_string())
}

//-----------------------------------------------------------------------------

/// Queries.
impl Database {
    /// Returns the names of the tables and views in sorted order.
    pub fn tables(&self) -> Result<Vec<String>, String> {
        let mut statement = self.connection.prepare(
            "SELECT name FROM sqlite_master WHERE type IN ('table', 'view') ORDER BY name"
        ).map_err(|x| x.to_string())?;
        let names = statement.query_map((), |row| row.get::<_, String>(0)).map_err(|x| x.to_string())?;
        let mut result = Vec::new();
        for name in names {
            result.push(name.map_err(|x| x.to_string())?);
        }
        Ok(result)
    }

    /// Returns `true` if a table or a view with the given name exists.
    pub fn table_exists(&self, name: &str) -> Result<bool, String> {
        let count: usize = self.connection.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type IN ('table', 'view') AND name = ?1",
            (name,),
            |row| row.get(0)
        ).map_err(|x| x.to_string())?;
        Ok(count > 0)
    }

    /// Returns the column names of the table.
    pub fn columns(&self, table: &str) -> Result<Vec<String>, String> {
        let sql = format!("SELECT * FROM {} LIMIT 0", quote(table));
        let statement = self.connection.prepare(&sql).map_err(|x| x.to_string())?;
        Ok(statement.column_names().iter().map(|x| x.to_string()).collect())
    }

    /// Runs a query and returns all rows.
    pub fn query(&self, sql: &str) -> Result<QueryResult, String> {
        let mut statement = self.connection.prepare(sql).map_err(|x| format!("{}: {}", sql, x))?;
        let header: Vec<String> = statement.column_names().iter().map(|x| x.to_string()).collect();
        let width = header.len();
        let mut rows = statement.query(()).map_err(|x| x.to_string())?;
        let mut result = QueryResult { header, rows: Vec::new() };
        while let Some(row) = rows.next().map_err(|x| x.to_string())? {
            let mut values = Vec::with_capacity(width);
            for c in 0..width {
                let value = row.get_ref(c).map_err(|x| x.to_string())?;
                values.push(Cell::from_ref(value));
            }
            result.rows.push(values);
        }
        Ok(result)
    }

    /// Runs a query and returns the first column of the first row, or [`None`] if there are no rows.
    pub fn query_value(&self, sql: &str) -> Result<Option<Cell>, String> {
        let result = self.query(sql)?;
        Ok(result.rows.into_iter().next().and_then(|row| row.into_iter().next()))
    }

    /// Runs a query and returns the first column of each row.
    pub fn query_column(&self, sql: &str) -> Result<Vec<Cell>, String> {
        let result = self.query(sql)?;
        Ok(result.rows.into_iter().filter_map(|row| row.into_iter().next()).collect())
    }

    /// Executes one or more statements that do not return rows.
    pub fn execute(&self, sql: &str) -> Result<(), String> {
        self.connection.execute_batch(sql).map_err(|x| format!("{}: {}", sql, x))
    }
}

//-----------------------------------------------------------------------------
