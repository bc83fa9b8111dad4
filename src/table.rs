//! Tab-separated tables and table transformations.
//!
//! [`Table`] is an in-memory tsv table with an optional header.
//! The operations correspond to the methods of the `table2table` tool.
//! [`combine`] builds a matrix from the same column of several tables, as used for count and FPKM matrices.

use crate::utils;

use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Write};
use std::path::Path;

use regex::Regex;


//-----------------------------------------------------------------------------

/// A tab-separated table.
///
/// Lines starting with `#` are treated as comments and skipped when reading.
/// Rows may have different lengths.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Table {
    /// Column names, or an empty vector if the table has no header.
    pub header: Vec<String>,
    /// Data rows.
    pub rows: Vec<Vec<String>>,
}

/// Reading and writing tables.
impl Table {
    /// Creates a new table.
    pub fn new(header: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Table { header, rows }
    }

    /// Reads a table from the reader.
    ///
    /// If `has_header` is set, the first non-comment line becomes the header.
    pub fn read<R: Read>(reader: R, has_header: bool) -> Result<Self, String> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .flexible(true)
            .quoting(false)
            .comment(Some(b'#'))
            .from_reader(reader);

        let mut result = Table::default();
        let mut first = has_header;
        for record in reader.records() {
            let record = record.map_err(|x| x.to_string())?;
            let fields: Vec<String> = record.iter().map(String::from).collect();
            if first {
                result.header = fields;
                first = false;
            } else {
                result.rows.push(fields);
            }
        }
        Ok(result)
    }

    /// Reads a table from a possibly gzip-compressed file.
    pub fn read_file<P: AsRef<Path>>(filename: P, has_header: bool) -> Result<Self, String> {
        let reader = utils::open_file(&filename)?;
        Self::read(reader, has_header).map_err(|x| format!("{}: {}", filename.as_ref().display(), x))
    }

    /// Writes the table in tsv format.
    ///
    /// The header is written only if it is not empty.
    pub fn write<W: Write>(&self, writer: W) -> Result<(), String> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .flexible(true)
            .quote_style(csv::QuoteStyle::Never)
            .from_writer(writer);
        if !self.header.is_empty() {
            writer.write_record(&self.header).map_err(|x| x.to_string())?;
        }
        for row in self.rows.iter() {
            writer.write_record(row).map_err(|x| x.to_string())?;
        }
        writer.flush().map_err(|x| x.to_string())
    }

    /// Writes the table to a file, compressing it if the name ends with `.gz`.
    pub fn write_file<P: AsRef<Path>>(&self, filename: P) -> Result<(), String> {
        let writer = utils::create_file(&filename)?;
        self.write(writer).map_err(|x| format!("{}: {}", filename.as_ref().display(), x))
    }

    /// Returns the number of columns: the length of the header or the longest row.
    pub fn ncols(&self) -> usize {
        let longest = self.rows.iter().map(|x| x.len()).max().unwrap_or(0);
        self.header.len().max(longest)
    }

    /// Returns the number of data rows.
    pub fn nrows(&self) -> usize {
        self.rows.len()
    }

    /// Returns the index of the named column.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|x| x == name)
    }

    /// Returns the values in the named column, with missing cells as empty strings.
    pub fn column(&self, name: &str) -> Result<Vec<&str>, String> {
        let index = self.column_index(name).ok_or_else(|| format!("Missing column: {}", name))?;
        Ok(self.rows.iter().map(|row| row.get(index).map(|x| x.as_str()).unwrap_or("")).collect())
    }

    // Name of the column, or its 1-based number if there is no header.
    fn field_name(&self, column: usize) -> String {
        self.header.get(column).cloned().unwrap_or_else(|| (column + 1).to_string())
    }

    fn cell(row: &[String], column: usize) -> &str {
        row.get(column).map(|x| x.as_str()).unwrap_or("")
    }
}

//-----------------------------------------------------------------------------

/// Column selection for the numeric operations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Columns {
    /// All columns.
    All,
    /// All columns except the first.
    AllButFirst,
    /// Listed columns (0-based).
    List(Vec<usize>),
}

impl Columns {
    /// Parses `all`, `all-but-first`, or a comma-separated list of 1-based column numbers.
    pub fn parse(value: &str) -> Result<Self, String> {
        match value {
            "all" => Ok(Columns::All),
            "all-but-first" => Ok(Columns::AllButFirst),
            _ => {
                let mut columns = Vec::new();
                for field in value.split(',') {
                    let column: usize = field.trim().parse().map_err(|_| format!("Invalid column: {}", field))?;
                    if column == 0 {
                        return Err(String::from("Column numbers start from 1"));
                    }
                    columns.push(column - 1);
                }
                Ok(Columns::List(columns))
            },
        }
    }

    /// Returns the selected column indexes for a table with the given number of columns.
    pub fn resolve(&self, ncols: usize) -> Result<Vec<usize>, String> {
        match self {
            Columns::All => Ok((0..ncols).collect()),
            Columns::AllButFirst => Ok((1..ncols.max(1)).collect()),
            Columns::List(columns) => {
                if let Some(column) = columns.iter().find(|&&x| x >= ncols) {
                    return Err(format!("Column {} does not exist", column + 1));
                }
                Ok(columns.clone())
            },
        }
    }
}

//-----------------------------------------------------------------------------

/// Structural operations.
impl Table {
    /// Transposes the table, treating the header as the first row.
    ///
    /// Ragged rows are padded with empty strings.
    pub fn transpose(&self) -> Table {
        let mut matrix: Vec<&Vec<String>> = Vec::with_capacity(self.rows.len() + 1);
        if !self.header.is_empty() {
            matrix.push(&self.header);
        }
        matrix.extend(self.rows.iter());
        let ncols = self.ncols();

        let mut transposed: Vec<Vec<String>> = (0..ncols).map(|c| {
            matrix.iter().map(|row| Self::cell(row, c).to_string()).collect()
        }).collect();
        if self.header.is_empty() || transposed.is_empty() {
            return Table::new(Vec::new(), transposed);
        }
        let header = transposed.remove(0);
        Table::new(header, transposed)
    }

    /// Returns the table without its header.
    pub fn remove_header(self) -> Table {
        Table::new(Vec::new(), self.rows)
    }

    /// Lists every cell as a `field`, `value` pair.
    pub fn flatten(&self) -> Table {
        let header = vec![String::from("field"), String::from("value")];
        let ncols = if self.header.is_empty() { self.ncols() } else { self.header.len() };
        let mut rows = Vec::new();
        for row in self.rows.iter() {
            for column in 0..ncols {
                rows.push(vec![self.field_name(column), Self::cell(row, column).to_string()]);
            }
        }
        Table::new(header, rows)
    }

    /// Splits every cell at the separator and outputs the cartesian product of the values in each row.
    pub fn split_fields(&self, separator: &str) -> Table {
        let mut rows = Vec::new();
        for row in self.rows.iter() {
            let values: Vec<Vec<&str>> = row.iter().map(|x| x.split(separator).collect()).collect();
            let mut products: Vec<Vec<String>> = vec![Vec::new()];
            for options in values.iter() {
                let mut next = Vec::with_capacity(products.len() * options.len());
                for prefix in products.iter() {
                    for value in options.iter() {
                        let mut extended = prefix.clone();
                        extended.push(value.to_string());
                        next.push(extended);
                    }
                }
                products = next;
            }
            rows.extend(products);
        }
        Table::new(self.header.clone(), rows)
    }

    /// Splits every cell at the separator and spreads the values over multiple rows.
    ///
    /// Columns with fewer values are padded with empty strings.
    pub fn expand(&self, separator: &str) -> Table {
        let ncols = self.ncols();
        let mut rows = Vec::new();
        for row in self.rows.iter() {
            let values: Vec<Vec<&str>> = (0..ncols).map(|c| Self::cell(row, c).split(separator).collect()).collect();
            let height = values.iter().map(|x| x.len()).max().unwrap_or(0);
            for n in 0..height {
                rows.push(values.iter().map(|x| x.get(n).copied().unwrap_or("").to_string()).collect());
            }
        }
        Table::new(self.header.clone(), rows)
    }

    /// Outputs the rows in the order given by the values in the first column.
    ///
    /// Names without a matching row are skipped.
    pub fn sort_rows(&self, order: &[String]) -> Table {
        let mut by_name: HashMap<&str, &Vec<String>> = HashMap::new();
        for row in self.rows.iter() {
            by_name.insert(Self::cell(row, 0), row);
        }
        let rows = order.iter().filter_map(|name| by_name.get(name.as_str()).map(|row| (*row).clone())).collect();
        Table::new(self.header.clone(), rows)
    }

    /// Pivots the table.
    ///
    /// Output rows are the distinct values of `join_column` and output columns are the distinct values of `name_column` crossed with the remaining columns.
    /// The header of a value column is `name<separator>field`.
    /// Missing combinations are `na`.
    pub fn join(&self, join_column: usize, name_column: usize, separator: &str) -> Result<Table, String> {
        let ncols = self.header.len();
        if join_column >= ncols || name_column >= ncols {
            return Err(format!("Join columns must be within the header ({} columns)", ncols));
        }
        let value_columns: Vec<usize> = (0..ncols).filter(|&c| c != join_column && c != name_column).collect();

        let mut keys: BTreeMap<&str, usize> = BTreeMap::new();
        let mut names: BTreeMap<&str, usize> = BTreeMap::new();
        for row in self.rows.iter() {
            keys.insert(Self::cell(row, join_column), 0);
            names.insert(Self::cell(row, name_column), 0);
        }
        for (index, value) in keys.values_mut().enumerate() {
            *value = index;
        }
        for (index, value) in names.values_mut().enumerate() {
            *value = 1 + index * value_columns.len();
        }

        let width = 1 + names.len() * value_columns.len();
        let mut rows: Vec<Vec<String>> = keys.keys().map(|key| {
            let mut row = vec![String::from("na"); width];
            row[0] = key.to_string();
            row
        }).collect();
        for row in self.rows.iter() {
            let target = keys[Self::cell(row, join_column)];
            let start = names[Self::cell(row, name_column)];
            for (offset, &column) in value_columns.iter().enumerate() {
                rows[target][start + offset] = Self::cell(row, column).to_string();
            }
        }

        let mut header = vec![self.header[join_column].clone()];
        for name in names.keys() {
            for &column in value_columns.iter() {
                header.push(format!("{}{}{}", name, separator, self.header[column]));
            }
        }
        Ok(Table::new(header, rows))
    }
}

//-----------------------------------------------------------------------------

/// Aggregation functions for [`Table::group`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupFunction {
    Min,
    Max,
    Sum,
    Mean,
    /// Concatenate the non-empty values with `;`.
    Cat,
    /// Concatenate the distinct non-empty values with `;`.
    Uniq,
}

impl GroupFunction {
    /// Parses the function name.
    pub fn parse(value: &str) -> Result<Self, String> {
        match value {
            "min" => Ok(GroupFunction::Min),
            "max" => Ok(GroupFunction::Max),
            "sum" => Ok(GroupFunction::Sum),
            "mean" => Ok(GroupFunction::Mean),
            "cat" => Ok(GroupFunction::Cat),
            "uniq" => Ok(GroupFunction::Uniq),
            _ => Err(format!("Unknown group function: {}", value)),
        }
    }

    fn is_numeric(&self) -> bool {
        !matches!(self, GroupFunction::Cat | GroupFunction::Uniq)
    }

    fn apply(&self, values: &[&str], missing: &str) -> String {
        match self {
            GroupFunction::Cat => {
                values.iter().filter(|x| !x.is_empty()).copied().collect::<Vec<&str>>().join(";")
            },
            GroupFunction::Uniq => {
                let mut unique: Vec<&str> = values.iter().filter(|x| !x.is_empty()).copied().collect();
                unique.sort_unstable();
                unique.dedup();
                unique.join(";")
            },
            _ => {
                let numbers: Vec<f64> = values.iter().filter_map(|x| x.parse::<f64>().ok()).collect();
                if numbers.is_empty() {
                    return missing.to_string();
                }
                let result = match self {
                    GroupFunction::Min => numbers.iter().copied().fold(f64::INFINITY, f64::min),
                    GroupFunction::Max => numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                    GroupFunction::Sum => numbers.iter().sum(),
                    _ => numbers.iter().sum::<f64>() / numbers.len() as f64,
                };
                result.to_string()
            },
        }
    }
}

impl Table {
    /// Groups the rows by the values in a column and aggregates the selected columns.
    ///
    /// For numeric functions, rows with values that are neither numbers nor the missing value are dropped.
    /// Groups are output in sorted order, and the output has the group column followed by the selected columns.
    pub fn group(&self, group_column: usize, function: GroupFunction, columns: &Columns, missing: &str) -> Result<Table, String> {
        let ncols = self.ncols();
        if group_column >= ncols {
            return Err(format!("Group column {} does not exist", group_column + 1));
        }
        let selected: Vec<usize> = columns.resolve(ncols)?.into_iter().filter(|&c| c != group_column).collect();

        let mut groups: BTreeMap<&str, Vec<&Vec<String>>> = BTreeMap::new();
        for row in self.rows.iter() {
            if function.is_numeric() {
                let valid = selected.iter().all(|&c| {
                    let value = Self::cell(row, c);
                    value == missing || value.parse::<f64>().is_ok()
                });
                if !valid {
                    continue;
                }
            }
            groups.entry(Self::cell(row, group_column)).or_default().push(row);
        }

        let mut header = Vec::new();
        if !self.header.is_empty() {
            header.push(self.field_name(group_column));
            header.extend(selected.iter().map(|&c| self.field_name(c)));
        }
        let rows = groups.iter().map(|(key, members)| {
            let mut row = vec![key.to_string()];
            for &column in selected.iter() {
                let values: Vec<&str> = members.iter().map(|x| Self::cell(x, column)).collect();
                row.push(function.apply(&values, missing));
            }
            row
        }).collect();
        Ok(Table::new(header, rows))
    }
}

//-----------------------------------------------------------------------------

/// Numeric column transformations applied by [`Table::apply`].
#[derive(Clone, Debug, PartialEq)]
pub enum Method {
    NormalizeByValue(f64),
    MultiplyByValue(f64),
    NormalizeByMax,
    /// Replace the values with their 0-based ranks.
    Rank,
    /// Replace values above the boundary with the given value.
    UpperBound { boundary: f64, value: f64 },
    /// Replace values below the boundary with the given value.
    LowerBound { boundary: f64, value: f64 },
    /// Divide by the corresponding cells of another table.
    NormalizeByTable(Table),
}

// A cell during numeric transformations.
#[derive(Clone, Debug, PartialEq)]
enum Entry {
    Number(f64),
    Rank(usize),
    Text(String),
}

impl Entry {
    fn parse(value: &str) -> Self {
        match value.parse::<f64>() {
            Ok(number) => Entry::Number(number),
            Err(_) => Entry::Text(value.to_string()),
        }
    }

    fn format(&self, precision: usize) -> String {
        match self {
            Entry::Number(value) => format!("{:.*}", precision, value),
            Entry::Rank(rank) => rank.to_string(),
            Entry::Text(value) => value.clone(),
        }
    }
}

impl Table {
    /// Applies the numeric methods in order to the selected columns.
    ///
    /// Numbers are formatted with the given precision.
    /// Cells that are not numbers are left unchanged, except that [`Method::NormalizeByTable`] replaces them with the missing value.
    pub fn apply(&self, methods: &[Method], columns: &Columns, precision: usize, missing: &str) -> Result<Table, String> {
        let ncols = self.ncols();
        let selected = columns.resolve(ncols)?;
        let mut matrix: Vec<Vec<Entry>> = self.rows.iter().map(|row| {
            (0..ncols).map(|c| {
                let value = Self::cell(row, c);
                if selected.contains(&c) { Entry::parse(value) } else { Entry::Text(value.to_string()) }
            }).collect()
        }).collect();

        for method in methods {
            match method {
                Method::NormalizeByValue(value) => {
                    if *value == 0.0 {
                        return Err(String::from("Cannot normalize by zero"));
                    }
                    map_numbers(&mut matrix, &selected, |x| x / value);
                },
                Method::MultiplyByValue(value) => map_numbers(&mut matrix, &selected, |x| x * value),
                Method::NormalizeByMax => {
                    for &c in selected.iter() {
                        let max = matrix.iter().filter_map(|row| match row[c] {
                            Entry::Number(x) => Some(x),
                            _ => None,
                        }).fold(f64::NEG_INFINITY, f64::max);
                        if max == 0.0 {
                            return Err(format!("Maximum of column {} is zero", self.field_name(c)));
                        }
                        map_numbers(&mut matrix, &[c], |x| x / max);
                    }
                },
                Method::Rank => {
                    for &c in selected.iter() {
                        let mut order: Vec<(f64, usize)> = matrix.iter().enumerate().filter_map(|(r, row)| match row[c] {
                            Entry::Number(x) => Some((x, r)),
                            _ => None,
                        }).collect();
                        order.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
                        for (rank, (_, r)) in order.into_iter().enumerate() {
                            matrix[r][c] = Entry::Rank(rank);
                        }
                    }
                },
                Method::UpperBound { boundary, value } => {
                    map_numbers(&mut matrix, &selected, |x| if x > *boundary { *value } else { x });
                },
                Method::LowerBound { boundary, value } => {
                    map_numbers(&mut matrix, &selected, |x| if x < *boundary { *value } else { x });
                },
                Method::NormalizeByTable(other) => {
                    for (r, row) in matrix.iter_mut().enumerate() {
                        for &c in selected.iter() {
                            let divisor = other.rows.get(r).and_then(|x| x.get(c)).and_then(|x| x.parse::<f64>().ok());
                            row[c] = match (&row[c], divisor) {
                                (Entry::Number(x), Some(y)) if y != 0.0 => Entry::Number(x / y),
                                _ => Entry::Text(missing.to_string()),
                            };
                        }
                    }
                },
            }
        }

        let rows = matrix.iter().map(|row| row.iter().map(|x| x.format(precision)).collect()).collect();
        Ok(Table::new(self.header.clone(), rows))
    }

    /// Applies the numeric methods to the full table and then outputs the rows in the given order.
    ///
    /// Column maxima, ranks, and row-wise divisors are taken from the full table.
    /// An empty order keeps all rows.
    pub fn apply_in_order(&self, methods: &[Method], columns: &Columns, precision: usize, missing: &str, order: &[String]) -> Result<Table, String> {
        let result = if methods.is_empty() { self.clone() } else { self.apply(methods, columns, precision, missing)? };
        if order.is_empty() {
            Ok(result)
        } else {
            Ok(result.sort_rows(order))
        }
    }

    /// Computes the Kullback-Leibler divergence in both directions between all pairs of selected columns.
    ///
    /// The output has columns `category1`, `category2`, `kl1`, `kl2`, and `mean`.
    /// Terms with a zero probability in the first argument contribute zero.
    pub fn kullback_leibler(&self, columns: &Columns, precision: usize) -> Result<Table, String> {
        let selected = columns.resolve(self.ncols())?;
        let mut values: Vec<Vec<f64>> = Vec::with_capacity(selected.len());
        for &c in selected.iter() {
            let mut column = Vec::with_capacity(self.rows.len());
            for row in self.rows.iter() {
                let value = Self::cell(row, c);
                let number = value.parse::<f64>().map_err(|_| {
                    format!("Non-numeric value in column {}: {}", self.field_name(c), value)
                })?;
                column.push(number);
            }
            values.push(column);
        }

        let divergence = |p: &[f64], q: &[f64]| -> f64 {
            p.iter().zip(q.iter()).map(|(&p, &q)| if p == 0.0 { 0.0 } else { p * (p / q).ln() }).sum()
        };
        let header = ["category1", "category2", "kl1", "kl2", "mean"].iter().map(|x| x.to_string()).collect();
        let mut rows = Vec::new();
        for x in 0..selected.len() {
            for y in (x + 1)..selected.len() {
                let e1 = divergence(&values[x], &values[y]);
                let e2 = divergence(&values[y], &values[x]);
                rows.push(vec![
                    self.field_name(selected[x]), self.field_name(selected[y]),
                    format!("{:.*}", precision, e1), format!("{:.*}", precision, e2),
                    format!("{:.*}", precision, (e1 + e2) / 2.0),
                ]);
            }
        }
        Ok(Table::new(header, rows))
    }
}

fn map_numbers<F: Fn(f64) -> f64>(matrix: &mut [Vec<Entry>], columns: &[usize], f: F) {
    for row in matrix.iter_mut() {
        for &c in columns {
            if let Entry::Number(x) = row[c] {
                row[c] = Entry::Number(f(x));
            }
        }
    }
}

//-----------------------------------------------------------------------------

/// Combines one column from each file into a matrix keyed by another column.
///
/// Every file must have a header line.
/// The output has the key column followed by one column per file, named by the first capture group of `pattern` on the file name.
/// Keys appear in first-seen order, and missing entries are filled with `missing`.
/// The key column is named `key_name` if given, and otherwise by the header of the first file.
///
/// # Errors
///
/// Returns an error if a file cannot be read, the pattern does not match a file name, or two files have the same column name.
pub fn combine<P: AsRef<Path>>(
    files: &[P], key_column: usize, take_column: usize,
    pattern: &Regex, key_name: Option<&str>, missing: &str
) -> Result<Table, String> {
    if files.is_empty() {
        return Err(String::from("No files to combine"));
    }

    let mut names: Vec<String> = Vec::with_capacity(files.len());
    let mut keys: Vec<String> = Vec::new();
    let mut key_index: HashMap<String, usize> = HashMap::new();
    let mut values: Vec<HashMap<usize, String>> = Vec::with_capacity(files.len());
    let mut header_key = None;

    for filename in files {
        let filename = filename.as_ref();
        let base = utils::basename(filename);
        let name = pattern.captures(&base).and_then(|x| x.get(1)).map(|x| x.as_str().to_string());
        let name = name.ok_or_else(|| format!("Cannot determine the column name for {}", filename.display()))?;
        if names.contains(&name) {
            return Err(format!("Duplicate column name {} from {}", name, filename.display()));
        }

        let table = Table::read_file(filename, true)?;
        if header_key.is_none() {
            header_key = Some(table.field_name(key_column));
        }
        let mut column = HashMap::new();
        for row in table.rows.iter() {
            let key = Table::cell(row, key_column);
            let index = match key_index.get(key) {
                Some(index) => *index,
                None => {
                    key_index.insert(key.to_string(), keys.len());
                    keys.push(key.to_string());
                    keys.len() - 1
                },
            };
            column.insert(index, Table::cell(row, take_column).to_string());
        }
        names.push(name);
        values.push(column);
    }

    let mut header = vec![key_name.map(String::from).or(header_key).unwrap_or_default()];
    header.extend(names);
    let rows = keys.into_iter().enumerate().map(|(index, key)| {
        let mut row = vec![key];
        row.extend(values.iter().map(|column| column.get(&index).cloned().unwrap_or_else(|| missing.to_string())));
        row
    }).collect();
    Ok(Table::new(header, rows))
}

/// Combines the column named `take` from each file into a matrix, as in [`combine`].
///
/// The column is located by the header of the first file.
pub fn combine_named<P: AsRef<Path>>(
    files: &[P], key_column: usize, take: &str,
    pattern: &Regex, key_name: Option<&str>, missing: &str
) -> Result<Table, String> {
    let first = files.first().ok_or(String::from("No files to combine"))?;
    let take_column = Table::read_file(first, true)?.column_index(take).ok_or_else(|| {
        format!("No column {} in {}", take, first.as_ref().display())
    })?;
    combine(files, key_column, take_column, pattern, key_name, missing)
}

//-----------------------------------------------------------------------------
