//! A minimal task runner for pipelines.
//!
//! A [`Pipeline`] consists of [`Stage`]s in declaration order, and each stage consists of [`Job`]s.
//! A job has input and output files and an action, which is either a shell statement or a native closure.
//! Named targets select stages, and the stages a selected stage follows are included transitively.
//!
//! The [`Runner`] only runs jobs that are out of date.
//! A job is up to date when all of its outputs exist and the oldest output is at least as new as the newest input.
//! A job without outputs always runs, and a job whose input is produced by a job that runs earlier is out of date.
//!
//! Stages run one after another.
//! Jobs within a stage run in parallel using at most `processes` slots, where a job requiring `t` threads uses `t` slots.
//! The first failure stops the run after the jobs already running have finished.

use crate::statement::Executor;
use crate::utils;

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use std::time::{Instant, SystemTime};

use log::{debug, info, warn};


//-----------------------------------------------------------------------------

/// A native job action.
pub type NativeAction = Box<dyn Fn() -> Result<(), String> + Send + Sync>;

/// The action of a job.
pub enum Action {
    /// A shell statement executed with bash.
    Shell(String),
    /// A closure executed in the pipeline process.
    Native(NativeAction),
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Shell(statement) => f.debug_tuple("Shell").field(statement).finish(),
            Action::Native(_) => f.write_str("Native"),
        }
    }
}

/// A single job: an action that transforms input files into output files.
#[derive(Debug)]
pub struct Job {
    inputs: Vec<PathBuf>,
    outputs: Vec<PathBuf>,
    threads: usize,
    memory: Option<String>,
    action: Action,
}

impl Job {
    /// Creates a job that runs a shell statement.
    pub fn shell(statement: String) -> Self {
        Self::with_action(Action::Shell(statement))
    }

    /// Creates a job that runs a closure.
    pub fn native<F>(action: F) -> Self
        where F: Fn() -> Result<(), String> + Send + Sync + 'static
    {
        Self::with_action(Action::Native(Box::new(action)))
    }

    fn with_action(action: Action) -> Self {
        Job {
            inputs: Vec::new(),
            outputs: Vec::new(),
            threads: 1,
            memory: None,
            action,
        }
    }

    /// Adds an input file.
    pub fn input<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.inputs.push(path.as_ref().to_path_buf());
        self
    }

    /// Adds input files.
    pub fn inputs<P: AsRef<Path>, I: IntoIterator<Item = P>>(mut self, paths: I) -> Self {
        self.inputs.extend(paths.into_iter().map(|x| x.as_ref().to_path_buf()));
        self
    }

    /// Adds an output file.
    pub fn output<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.outputs.push(path.as_ref().to_path_buf());
        self
    }

    /// Adds output files.
    pub fn outputs<P: AsRef<Path>, I: IntoIterator<Item = P>>(mut self, paths: I) -> Self {
        self.outputs.extend(paths.into_iter().map(|x| x.as_ref().to_path_buf()));
        self
    }

    /// Sets the number of threads the job uses.
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    /// Sets the memory requirement of the job (e.g. `4G`).
    pub fn memory(mut self, memory: &str) -> Self {
        self.memory = Some(memory.to_string());
        self
    }

    /// Returns the input files.
    pub fn input_files(&self) -> &[PathBuf] {
        &self.inputs
    }

    /// Returns the output files.
    pub fn output_files(&self) -> &[PathBuf] {
        &self.outputs
    }

    /// Returns the number of threads the job uses.
    pub fn thread_count(&self) -> usize {
        self.threads
    }

    /// Returns the memory requirement, if specified.
    pub fn memory_requirement(&self) -> Option<&str> {
        self.memory.as_deref()
    }

    /// Returns the action.
    pub fn action(&self) -> &Action {
        &self.action
    }

    /// Returns a short description of the job.
    pub fn describe(&self) -> String {
        let files = if self.outputs.is_empty() { &self.inputs } else { &self.outputs };
        let names: Vec<String> = files.iter().map(utils::path_str).collect();
        names.join(", ")
    }

    // Runs the job using the executor for shell statements.
    // A dry run skips native actions.
    fn execute(&self, executor: &Executor) -> Result<(), String> {
        match &self.action {
            Action::Shell(statement) => executor.run(statement),
            Action::Native(_) if executor.is_dry_run() => {
                info!("Native job: {}", self.describe());
                Ok(())
            },
            Action::Native(action) => action(),
        }
    }
}

//-----------------------------------------------------------------------------

/// A named group of jobs.
#[derive(Debug)]
pub struct Stage {
    name: String,
    follows: Vec<String>,
    active: bool,
    dirs: Vec<PathBuf>,
    jobs: Vec<Job>,
}

impl Stage {
    /// Creates an empty active stage.
    pub fn new(name: &str) -> Self {
        Stage {
            name: name.to_string(),
            follows: Vec::new(),
            active: true,
            dirs: Vec::new(),
            jobs: Vec::new(),
        }
    }

    /// Declares that this stage follows the given stage.
    pub fn follows(mut self, stage: &str) -> Self {
        self.follows.push(stage.to_string());
        self
    }

    /// Sets whether the stage is active.
    ///
    /// An inactive stage does not run any jobs, but the stages it follows are still included in targets.
    pub fn active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    /// Adds a directory that is created before the stage runs.
    pub fn mkdir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.dirs.push(dir.as_ref().to_path_buf());
        self
    }

    /// Adds a job to the stage.
    pub fn job(mut self, job: Job) -> Self {
        self.jobs.push(job);
        self
    }

    /// Adds jobs to the stage.
    pub fn jobs<I: IntoIterator<Item = Job>>(mut self, jobs: I) -> Self {
        self.jobs.extend(jobs);
        self
    }

    /// Returns the name of the stage.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the names of the stages this stage follows.
    pub fn predecessors(&self) -> &[String] {
        &self.follows
    }

    /// Returns `true` if the stage is active.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Returns the jobs of the stage, or an empty slice if the stage is inactive.
    pub fn job_list(&self) -> &[Job] {
        if self.active { &self.jobs } else { &[] }
    }
}

//-----------------------------------------------------------------------------

/// Stages in declaration order with named targets.
#[derive(Debug, Default)]
pub struct Pipeline {
    stages: Vec<Stage>,
    targets: BTreeMap<String, Vec<String>>,
}

impl Pipeline {
    /// Creates an empty pipeline.
    pub fn new() -> Self {
        Pipeline::default()
    }

    /// Adds a stage.
    ///
    /// # Errors
    ///
    /// Returns an error if a stage with the same name exists or if the stage follows an undeclared stage.
    pub fn add_stage(&mut self, stage: Stage) -> Result<(), String> {
        if self.stage_index(&stage.name).is_some() {
            return Err(format!("Duplicate stage: {}", stage.name));
        }
        for predecessor in stage.follows.iter() {
            if self.stage_index(predecessor).is_none() {
                return Err(format!("Stage {} follows undeclared stage {}", stage.name, predecessor));
            }
        }
        self.stages.push(stage);
        Ok(())
    }

    /// Adds a named target consisting of the given stages.
    ///
    /// # Errors
    ///
    /// Returns an error if one of the stages has not been declared.
    pub fn add_target(&mut self, name: &str, stages: &[&str]) -> Result<(), String> {
        for stage in stages {
            if self.stage_index(stage).is_none() {
                return Err(format!("Target {} refers to undeclared stage {}", name, stage));
            }
        }
        self.targets.insert(name.to_string(), stages.iter().map(|x| x.to_string()).collect());
        Ok(())
    }

    /// Returns the stages in declaration order.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Returns the names of the targets.
    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.targets.keys().map(|x| x.as_str())
    }

    fn stage_index(&self, name: &str) -> Option<usize> {
        self.stages.iter().position(|x| x.name == name)
    }

    /// Resolves a target or a stage name into stage indexes in declaration order.
    ///
    /// The result includes all stages the selected stages follow transitively.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is neither a target nor a stage.
    pub fn resolve(&self, name: &str) -> Result<Vec<usize>, String> {
        let roots: Vec<String> = if let Some(stages) = self.targets.get(name) {
            stages.clone()
        } else if self.stage_index(name).is_some() {
            vec![name.to_string()]
        } else {
            return Err(format!("Unknown target: {}", name));
        };

        let mut selected = BTreeSet::new();
        let mut stack = roots;
        while let Some(stage) = stack.pop() {
            let index = self.stage_index(&stage).ok_or_else(|| format!("Unknown stage: {}", stage))?;
            if selected.insert(index) {
                stack.extend(self.stages[index].follows.iter().cloned());
            }
        }
        Ok(selected.into_iter().collect())
    }
}

//-----------------------------------------------------------------------------

/// What the runner does with out-of-date jobs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Run the jobs.
    Make,
    /// List the jobs without running them.
    Show,
    /// Update the modification times of the outputs without running the jobs.
    Touch,
}

impl Mode {
    /// Parses the mode from a command-line argument.
    pub fn parse(value: &str) -> Result<Self, String> {
        match value {
            "make" => Ok(Mode::Make),
            "show" => Ok(Mode::Show),
            "touch" => Ok(Mode::Touch),
            _ => Err(format!("Unknown mode: {}", value)),
        }
    }
}

/// A job selected for running: stage index and job index within the stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JobRef {
    pub stage: usize,
    pub job: usize,
}

/// Statistics from a pipeline run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunSummary {
    /// Jobs that were run, shown, or touched.
    pub jobs: Vec<String>,
    /// Jobs that were up to date.
    pub skipped: usize,
    /// Elapsed time in seconds.
    pub seconds: f64,
}

/// Runs out-of-date jobs of a pipeline.
#[derive(Clone, Debug)]
pub struct Runner {
    executor: Executor,
    processes: usize,
    force: bool,
}

impl Runner {
    /// Creates a runner using the given executor and number of parallel slots.
    pub fn new(executor: Executor, processes: usize) -> Self {
        Runner {
            executor,
            processes: processes.max(1),
            force: false,
        }
    }

    /// Sets whether all jobs should run regardless of modification times.
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Returns the jobs of the target that need to run, in order.
    ///
    /// # Errors
    ///
    /// Returns an error if the target is unknown or a job has a missing input that no earlier job produces.
    pub fn plan(&self, pipeline: &Pipeline, target: &str) -> Result<(Vec<JobRef>, usize), String> {
        let mut result = Vec::new();
        let mut skipped = 0;
        let mut pending: HashSet<PathBuf> = HashSet::new();
        for stage_index in pipeline.resolve(target)? {
            let stage = &pipeline.stages[stage_index];
            for (job_index, job) in stage.job_list().iter().enumerate() {
                if self.needs_run(job, &pending).map_err(|x| format!("{}: {}", stage.name, x))? {
                    pending.extend(job.outputs.iter().cloned());
                    result.push(JobRef { stage: stage_index, job: job_index });
                } else {
                    skipped += 1;
                }
            }
        }
        Ok((result, skipped))
    }

    // A missing input is an error only if the job has to run.
    fn needs_run(&self, job: &Job, pending: &HashSet<PathBuf>) -> Result<bool, String> {
        let mut newest_input: Option<SystemTime> = None;
        let mut input_pending = false;
        let mut missing: Option<&PathBuf> = None;
        for input in job.inputs.iter() {
            if pending.contains(input) {
                input_pending = true;
                continue;
            }
            match utils::modification_time(input) {
                Some(time) => newest_input = Some(newest_input.map_or(time, |x| x.max(time))),
                None => {
                    missing.get_or_insert(input);
                },
            }
        }

        let run = self.force || input_pending || job.outputs.is_empty() || Self::out_of_date(job, newest_input);
        if let (true, Some(input)) = (run, missing) {
            return Err(format!("Missing input {}", input.display()));
        }
        Ok(run)
    }

    fn out_of_date(job: &Job, newest_input: Option<SystemTime>) -> bool {
        let mut oldest_output: Option<SystemTime> = None;
        for output in job.outputs.iter() {
            match utils::modification_time(output) {
                Some(time) => oldest_output = Some(oldest_output.map_or(time, |x| x.min(time))),
                None => return true,
            }
        }
        match (newest_input, oldest_output) {
            (Some(input), Some(output)) => output < input,
            _ => false,
        }
    }

    /// Runs the target in the given mode.
    ///
    /// # Errors
    ///
    /// Returns the first error from planning or from the jobs.
    pub fn run(&self, pipeline: &Pipeline, target: &str, mode: Mode) -> Result<RunSummary, String> {
        let start = Instant::now();
        let (plan, skipped) = self.plan(pipeline, target)?;
        info!("Target {}: {} jobs to run, {} up to date", target, plan.len(), skipped);

        let mut summary = RunSummary { skipped, ..RunSummary::default() };
        let mut offset = 0;
        while offset < plan.len() {
            let stage_index = plan[offset].stage;
            let mut end = offset;
            while end < plan.len() && plan[end].stage == stage_index {
                end += 1;
            }
            let stage = &pipeline.stages[stage_index];
            let jobs: Vec<&Job> = plan[offset..end].iter().map(|x| &stage.jobs[x.job]).collect();
            match mode {
                Mode::Show => {
                    for job in jobs.iter() {
                        info!("{}: {}", stage.name, job.describe());
                    }
                },
                Mode::Touch => {
                    create_dirs(stage)?;
                    for job in jobs.iter() {
                        for output in job.outputs.iter() {
                            utils::touch(output)?;
                        }
                    }
                },
                Mode::Make => {
                    if !self.executor.is_dry_run() {
                        create_dirs(stage)?;
                    }
                    info!("Running stage {} ({} jobs)", stage.name, jobs.len());
                    self.run_stage(stage, &jobs)?;
                },
            }
            summary.jobs.extend(jobs.iter().map(|x| format!("{}: {}", stage.name, x.describe())));
            offset = end;
        }

        summary.seconds = start.elapsed().as_secs_f64();
        info!("Target {}: {} jobs in {:.3} seconds", target, summary.jobs.len(), summary.seconds);
        Ok(summary)
    }

    // Runs the jobs of a stage in parallel, limited by the available slots.
    fn run_stage(&self, stage: &Stage, jobs: &[&Job]) -> Result<(), String> {
        let mut first_error: Option<String> = None;
        thread::scope(|scope| {
            let (sender, receiver) = mpsc::channel::<(usize, Result<(), String>)>();
            let mut available = self.processes;
            let mut in_flight = 0;

            let record = |result: Result<(), String>, first_error: &mut Option<String>| {
                if let Err(message) = result {
                    if first_error.is_none() {
                        *first_error = Some(format!("Stage {} failed: {}", stage.name, message));
                    }
                }
            };

            for job in jobs.iter() {
                let slots = job.threads.min(self.processes);
                while available < slots {
                    match receiver.recv() {
                        Ok((freed, result)) => {
                            available += freed;
                            in_flight -= 1;
                            record(result, &mut first_error);
                        },
                        Err(_) => break,
                    }
                }
                if first_error.is_some() {
                    break;
                }
                available -= slots;
                in_flight += 1;
                let sender = sender.clone();
                let executor = &self.executor;
                scope.spawn(move || {
                    debug!("Starting {}", job.describe());
                    let result = job.execute(executor);
                    if result.is_ok() {
                        for output in job.outputs.iter() {
                            if !utils::file_exists(output) {
                                warn!("Job did not create output {}", output.display());
                            }
                        }
                    }
                    let _ = sender.send((slots, result));
                });
            }

            while in_flight > 0 {
                match receiver.recv() {
                    Ok((_, result)) => {
                        in_flight -= 1;
                        record(result, &mut first_error);
                    },
                    Err(_) => break,
                }
            }
        });

        match first_error {
            Some(message) => Err(message),
            None => Ok(()),
        }
    }
}

fn create_dirs(stage: &Stage) -> Result<(), String> {
    for dir in stage.dirs.iter() {
        fs::create_dir_all(dir).map_err(|x| format!("Cannot create directory {}: {}", dir.display(), x))?;
    }
    Ok(())
}

//-----------------------------------------------------------------------------
