use std::path::PathBuf;
use std::time::Instant;
use std::{env, process};

use ngs_pipelines::workflows::{rnaseq, Workspace};
use ngs_pipelines::{Executor, Mode, Runner};

use env_logger::Builder;
use getopts::Options;
use log::{info, LevelFilter};

//-----------------------------------------------------------------------------

fn main() -> Result<(), String> {
    let start_time = Instant::now();

    // Parse arguments.
    let config = Config::new();
    Builder::new().filter(None, config.log_level).parse_default_env().init();

    // Build the pipeline.
    let workspace = Workspace::load(&config.workdir, &config.config_files, rnaseq::DEFAULTS)?;
    let pipeline = rnaseq::pipeline(&workspace)?;

    // Run the target.
    let executor = if config.dry_run { Executor::dry_run(workspace.workdir()) } else { Executor::new(workspace.workdir()) };
    let runner = Runner::new(executor, config.processes).force(config.force);
    let summary = runner.run(&pipeline, &config.target, config.mode)?;
    if config.mode == Mode::Show {
        for job in summary.jobs.iter() {
            println!("{}", job);
        }
    }
    info!("Target {}: {} jobs, {} up to date", config.target, summary.jobs.len(), summary.skipped);

    let end_time = Instant::now();
    let seconds = end_time.duration_since(start_time).as_secs_f64();
    info!("Used {:.3} seconds", seconds);

    Ok(())
}

//-----------------------------------------------------------------------------

struct Config {
    pub workdir: PathBuf,
    pub config_files: Vec<PathBuf>,
    pub processes: usize,
    pub force: bool,
    pub dry_run: bool,
    pub log_level: LevelFilter,
    pub mode: Mode,
    pub target: String,
}

impl Config {
    const DEFAULT_PROCESSES: usize = 4;

    pub fn new() -> Config {
        let args: Vec<String> = env::args().collect();
        let program = args[0].clone();

        let mut opts = Options::new();
        opts.optflag("h", "help", "print this help");
        opts.optmulti("c", "config", "configuration file (may repeat; default: ../pipeline.toml and pipeline.toml)", "FILE");
        opts.optopt("d", "workdir", "working directory (default: .)", "DIR");
        let processes_desc = format!("number of parallel processes (default: {})", Self::DEFAULT_PROCESSES);
        opts.optopt("p", "processes", &processes_desc, "INT");
        opts.optflag("f", "force", "run all jobs even if they are up to date");
        opts.optflag("n", "dry-run", "log shell statements instead of running them");
        opts.optflag("v", "verbose", "print debug messages");
        let matches = match opts.parse(&args[1..]) {
            Ok(m) => m,
            Err(f) => {
                eprintln!("{}", f);
                process::exit(1);
            }
        };

        let header = format!("Usage: {} [options] (make|show|touch) TARGET", program);
        if matches.opt_present("h") {
            eprint!("{}", opts.usage(&header));
            process::exit(0);
        }

        let config_files: Vec<PathBuf> = matches.opt_strs("c").into_iter().map(PathBuf::from).collect();
        let workdir = PathBuf::from(matches.opt_str("d").unwrap_or(String::from(".")));
        let mut processes = Self::DEFAULT_PROCESSES;
        if let Some(s) = matches.opt_str("p") {
            match s.parse::<usize>() {
                Ok(n) if n > 0 => processes = n,
                _ => {
                    eprintln!("Invalid number of processes: {}", s);
                    process::exit(1);
                }
            }
        }
        let log_level = if matches.opt_present("v") { LevelFilter::Debug } else { LevelFilter::Info };

        if matches.free.len() != 2 {
            eprint!("{}", opts.usage(&header));
            process::exit(1);
        }
        let mode = match Mode::parse(&matches.free[0]) {
            Ok(mode) => mode,
            Err(message) => {
                eprintln!("{}", message);
                process::exit(1);
            }
        };
        let target = matches.free[1].clone();

        Config {
            workdir,
            config_files,
            processes,
            force: matches.opt_present("f"),
            dry_run: matches.opt_present("n"),
            log_level,
            mode,
            target,
        }
    }
}

//-----------------------------------------------------------------------------
