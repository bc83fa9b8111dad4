use std::time::Instant;
use std::{env, io, process};

use ngs_pipelines::table::{Columns, GroupFunction, Method};
use ngs_pipelines::Table;

use env_logger::Builder;
use getopts::Options;
use log::{info, LevelFilter};

//-----------------------------------------------------------------------------

fn main() -> Result<(), String> {
    let start_time = Instant::now();

    // Parse arguments.
    let config = Config::new();
    Builder::new().filter(None, config.log_level).parse_default_env().init();

    // Read the table.
    let table = Table::read(io::stdin().lock(), config.has_header)?;
    info!("Read a table with {} rows and {} columns", table.nrows(), table.ncols());

    // Operations.
    let result = transform(table, &config)?;
    result.write(io::stdout().lock())?;

    let end_time = Instant::now();
    let seconds = end_time.duration_since(start_time).as_secs_f64();
    info!("Used {:.3} seconds", seconds);

    Ok(())
}

// Structural operations take precedence over the numeric methods, in the order below.
fn transform(table: Table, config: &Config) -> Result<Table, String> {
    if config.methods.iter().any(|x| x == "remove-header") && config.methods.len() == 1 {
        return Ok(table.remove_header());
    }
    if config.transpose || config.methods.iter().any(|x| x == "transpose") {
        return Ok(table.transpose());
    }
    if config.flatten {
        return Ok(table.flatten());
    }
    if config.split_fields {
        return Ok(table.split_fields(&config.separator));
    }
    if let Some(column) = config.group_column {
        return table.group(column, config.group_function, &config.columns, &config.missing);
    }
    if let Some(column) = config.join_column {
        let name_column = config.join_name_column.ok_or(String::from("--join-table requires --join-column-name"))?;
        return table.join(column, name_column, &config.separator);
    }
    if config.expand || config.methods.iter().any(|x| x == "expand") {
        return Ok(table.expand(&config.separator));
    }

    // Kullback-Leibler uses all rows regardless of the requested order.
    if config.methods.iter().any(|x| x == "kullback-leibler") {
        return table.kullback_leibler(&config.columns, config.precision);
    }
    let methods = parse_methods(&config.methods, &config.parameters, config.has_header)?;
    table.apply_in_order(&methods, &config.columns, config.precision, &config.missing, &config.sort_rows)
}

// Methods consume their parameters from the list in order.
fn parse_methods(names: &[String], parameters: &[String], has_header: bool) -> Result<Vec<Method>, String> {
    let mut parameters = parameters.iter();
    let mut result = Vec::new();
    for name in names {
        let method = match name.as_str() {
            "normalize-by-value" => Method::NormalizeByValue(next_value(&mut parameters, name)?),
            "multiply-by-value" => Method::MultiplyByValue(next_value(&mut parameters, name)?),
            "normalize-by-max" => Method::NormalizeByMax,
            "rank" => Method::Rank,
            "upper-bound" => Method::UpperBound { boundary: next_value(&mut parameters, name)?, value: next_value(&mut parameters, name)? },
            "lower-bound" => Method::LowerBound { boundary: next_value(&mut parameters, name)?, value: next_value(&mut parameters, name)? },
            "normalize-by-table" => {
                // The other table is the only non-numeric parameter.
                let filename = parameters.next().ok_or(format!("Method {} needs a file name", name))?;
                Method::NormalizeByTable(Table::read_file(filename, has_header)?)
            },
            "transpose" | "remove-header" | "expand" | "kullback-leibler" => continue,
            _ => return Err(format!("Unknown method: {}", name)),
        };
        result.push(method);
    }
    Ok(result)
}

fn next_value<'a, I: Iterator<Item = &'a String>>(parameters: &mut I, method: &str) -> Result<f64, String> {
    let value = parameters.next().ok_or(format!("Method {} needs a parameter", method))?;
    value.parse::<f64>().map_err(|_| format!("Invalid parameter for {}: {}", method, value))
}

//-----------------------------------------------------------------------------

struct Config {
    pub has_header: bool,
    pub methods: Vec<String>,
    pub parameters: Vec<String>,
    pub columns: Columns,
    pub transpose: bool,
    pub flatten: bool,
    pub split_fields: bool,
    pub expand: bool,
    pub group_column: Option<usize>,
    pub group_function: GroupFunction,
    pub join_column: Option<usize>,
    pub join_name_column: Option<usize>,
    pub sort_rows: Vec<String>,
    pub separator: String,
    pub missing: String,
    pub precision: usize,
    pub log_level: LevelFilter,
}

impl Config {
    const DEFAULT_SEPARATOR: &'static str = ";";
    const DEFAULT_MISSING: &'static str = "na";
    const DEFAULT_PRECISION: usize = 2;

    pub fn new() -> Config {
        let args: Vec<String> = env::args().collect();
        let program = args[0].clone();

        let mut opts = Options::new();
        opts.optflag("h", "help", "print this help");
        opts.optmulti("m", "method", "numeric method or operation (may repeat)", "NAME");
        opts.optopt("p", "parameters", "comma-separated parameters for the methods", "LIST");
        opts.optflag("", "no-headers", "the table has no header");
        opts.optopt("", "columns", "columns to use: all, all-but-first, or a list (default: all)", "COLS");
        opts.optflag("", "transpose", "transpose the table");
        opts.optflag("", "flatten-table", "output field-value pairs");
        opts.optflag("", "split-fields", "split multi-valued fields into rows");
        opts.optflag("", "expand", "expand multi-valued fields");
        opts.optopt("", "group", "group rows by this column (1-based)", "INT");
        opts.optopt("", "group-function", "min, max, sum, mean, cat, or uniq (default: mean)", "NAME");
        opts.optopt("", "join-table", "join rows by this column (1-based)", "INT");
        opts.optopt("", "join-column-name", "column with the names of the joined columns (1-based)", "INT");
        opts.optopt("", "sort-by-rows", "comma-separated output order of rows", "LIST");
        let separator_desc = format!("separator for multi-valued fields (default: {})", Self::DEFAULT_SEPARATOR);
        opts.optopt("", "separator", &separator_desc, "STR");
        let missing_desc = format!("missing value (default: {})", Self::DEFAULT_MISSING);
        opts.optopt("", "missing", &missing_desc, "STR");
        let precision_desc = format!("decimal places in numeric output (default: {})", Self::DEFAULT_PRECISION);
        opts.optopt("", "precision", &precision_desc, "INT");
        opts.optflag("v", "verbose", "print progress information");
        let matches = match opts.parse(&args[1..]) {
            Ok(m) => m,
            Err(f) => {
                eprintln!("{}", f);
                process::exit(1);
            }
        };

        if matches.opt_present("h") {
            let header = format!("Usage: {} [options] < input.tsv > output.tsv", program);
            eprint!("{}", opts.usage(&header));
            process::exit(0);
        }

        let parameters: Vec<String> = match matches.opt_str("p") {
            Some(s) => s.split(',').map(String::from).collect(),
            None => Vec::new(),
        };
        let columns = Self::parse_or_exit(Columns::parse(&matches.opt_str("columns").unwrap_or(String::from("all"))));
        let group_function = Self::parse_or_exit(GroupFunction::parse(&matches.opt_str("group-function").unwrap_or(String::from("mean"))));
        let sort_rows: Vec<String> = match matches.opt_str("sort-by-rows") {
            Some(s) => s.split(',').map(String::from).collect(),
            None => Vec::new(),
        };
        let mut precision = Self::DEFAULT_PRECISION;
        if let Some(s) = matches.opt_str("precision") {
            precision = Self::parse_or_exit(s.parse::<usize>().map_err(|_| format!("Invalid precision: {}", s)));
        }
        let log_level = if matches.opt_present("v") { LevelFilter::Info } else { LevelFilter::Warn };

        Config {
            has_header: !matches.opt_present("no-headers"),
            methods: matches.opt_strs("m"),
            parameters,
            columns,
            transpose: matches.opt_present("transpose"),
            flatten: matches.opt_present("flatten-table"),
            split_fields: matches.opt_present("split-fields"),
            expand: matches.opt_present("expand"),
            group_column: Self::column(matches.opt_str("group")),
            group_function,
            join_column: Self::column(matches.opt_str("join-table")),
            join_name_column: Self::column(matches.opt_str("join-column-name")),
            sort_rows,
            separator: matches.opt_str("separator").unwrap_or(String::from(Self::DEFAULT_SEPARATOR)),
            missing: matches.opt_str("missing").unwrap_or(String::from(Self::DEFAULT_MISSING)),
            precision,
            log_level,
        }
    }

    fn parse_or_exit<T>(result: Result<T, String>) -> T {
        match result {
            Ok(value) => value,
            Err(message) => {
                eprintln!("{}", message);
                process::exit(1);
            }
        }
    }

    // Converts a 1-based column number to a 0-based index.
    fn column(value: Option<String>) -> Option<usize> {
        let value = value?;
        match value.parse::<usize>() {
            Ok(n) if n > 0 => Some(n - 1),
            _ => {
                eprintln!("Invalid column number: {}", value);
                process::exit(1);
            }
        }
    }
}

//-----------------------------------------------------------------------------
