use std::time::Instant;
use std::{env, process};

use ngs_pipelines::{tracks, utils, Database, LoadOptions};

use env_logger::Builder;
use getopts::Options;
use log::{info, LevelFilter};

//-----------------------------------------------------------------------------

fn main() -> Result<(), String> {
    let start_time = Instant::now();

    // Parse arguments.
    let config = Config::new();
    Builder::new().filter(None, config.log_level).parse_default_env().init();

    // Load the table.
    let mut database = Database::open(&config.db_file)?;
    let rows = database.load(&config.tsv_file, &config.table, &config.options)?;
    info!("Loaded {} rows from {} into table {}", rows, config.tsv_file, config.table);

    let end_time = Instant::now();
    let seconds = end_time.duration_since(start_time).as_secs_f64();
    info!("Used {:.3} seconds", seconds);

    Ok(())
}

//-----------------------------------------------------------------------------

struct Config {
    pub db_file: String,
    pub tsv_file: String,
    pub table: String,
    pub options: LoadOptions,
    pub log_level: LevelFilter,
}

impl Config {
    pub fn new() -> Config {
        let args: Vec<String> = env::args().collect();
        let program = args[0].clone();

        let mut opts = Options::new();
        opts.optflag("h", "help", "print this help");
        opts.optopt("t", "table", "table name (default: derived from the file name)", "NAME");
        opts.optmulti("i", "add-index", "create an index on this column (may repeat)", "COLUMN");
        opts.optflag("", "allow-empty", "succeed without creating a table if there are no data rows");
        opts.optopt("", "first-column", "rename the first column", "NAME");
        opts.optopt("", "header-names", "comma-separated column names for a file without a header", "LIST");
        opts.optflag("v", "verbose", "print progress information");
        let matches = match opts.parse(&args[1..]) {
            Ok(m) => m,
            Err(f) => {
                eprintln!("{}", f);
                process::exit(1);
            }
        };

        let header = format!("Usage: {} [options] database.db table.tsv", program);
        if matches.opt_present("h") {
            eprint!("{}", opts.usage(&header));
            process::exit(0);
        }
        if matches.free.len() != 2 {
            eprint!("{}", opts.usage(&header));
            process::exit(1);
        }
        let db_file = matches.free[0].clone();
        let tsv_file = matches.free[1].clone();

        let table = match matches.opt_str("t") {
            Some(s) => s,
            None => Self::table_name(&tsv_file),
        };
        let options = LoadOptions {
            add_index: matches.opt_strs("i"),
            allow_empty: matches.opt_present("allow-empty"),
            first_column: matches.opt_str("first-column"),
            header_names: matches.opt_str("header-names").map(|s| s.split(',').map(String::from).collect()),
        };
        let log_level = if matches.opt_present("v") { LevelFilter::Info } else { LevelFilter::Warn };

        Config {
            db_file,
            tsv_file,
            table,
            options,
            log_level,
        }
    }

    // `sample-1.bam_stats.tsv.gz` becomes `sample_1_bam_stats`.
    fn table_name(filename: &str) -> String {
        let mut name = utils::basename(filename);
        for suffix in [".gz", ".tsv", ".txt", ".csv"] {
            if let Ok(snipped) = utils::snip(&name, suffix) {
                name = snipped;
            }
        }
        tracks::table_name(&name)
    }
}

//-----------------------------------------------------------------------------
