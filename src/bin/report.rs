use std::io::Write;
use std::time::Instant;
use std::{env, io, process};

use ngs_pipelines::report::{self, TRACKERS};
use ngs_pipelines::Database;

use env_logger::Builder;
use getopts::Options;
use log::{info, LevelFilter};

//-----------------------------------------------------------------------------

fn main() -> Result<(), String> {
    let start_time = Instant::now();

    // Parse arguments.
    let config = Config::new();
    Builder::new().filter(None, config.log_level).parse_default_env().init();

    let database = Database::open(&config.db_file)?;
    let tracker = report::tracker(&config.tracker)?;

    // Tracks.
    let tracks = match &config.track {
        Some(track) => vec![track.clone()],
        None => tracker.tracks(&database)?,
    };
    if config.list_tracks {
        for track in tracks.iter() {
            println!("{}", track);
        }
        return Ok(());
    }
    info!("Tracker {}: {} tracks", tracker.name(), tracks.len());

    // Results, one block per track.
    let stdout = io::stdout();
    let mut output = stdout.lock();
    for track in tracks.iter() {
        let result = tracker.call(&database, track)?;
        writeln!(output, "# {}", track).map_err(|x| x.to_string())?;
        result.write(&mut output)?;
    }
    output.flush().map_err(|x| x.to_string())?;

    let end_time = Instant::now();
    let seconds = end_time.duration_since(start_time).as_secs_f64();
    info!("Used {:.3} seconds", seconds);

    Ok(())
}

//-----------------------------------------------------------------------------

struct Config {
    pub db_file: String,
    pub tracker: String,
    pub track: Option<String>,
    pub list_tracks: bool,
    pub log_level: LevelFilter,
}

impl Config {
    pub fn new() -> Config {
        let args: Vec<String> = env::args().collect();
        let program = args[0].clone();

        let mut opts = Options::new();
        opts.optflag("h", "help", "print this help");
        opts.optflag("l", "list-tracks", "list the tracks of the tracker instead of the results");
        opts.optflag("v", "verbose", "print progress information");
        let matches = match opts.parse(&args[1..]) {
            Ok(m) => m,
            Err(f) => {
                eprintln!("{}", f);
                process::exit(1);
            }
        };

        let header = format!("Usage: {} [options] database.db TRACKER [track]\n\nTrackers: {}", program, TRACKERS.join(", "));
        if matches.opt_present("h") {
            eprint!("{}", opts.usage(&header));
            process::exit(0);
        }
        if matches.free.len() < 2 || matches.free.len() > 3 {
            eprint!("{}", opts.usage(&header));
            process::exit(1);
        }
        let log_level = if matches.opt_present("v") { LevelFilter::Info } else { LevelFilter::Warn };

        Config {
            db_file: matches.free[0].clone(),
            tracker: matches.free[1].clone(),
            track: matches.free.get(2).cloned(),
            list_tracks: matches.opt_present("l"),
            log_level,
        }
    }
}

//-----------------------------------------------------------------------------
