//! Pipeline definitions.
//!
//! A pipeline is built when the program starts from the files present in the working directory.
//! Every job therefore knows its inputs and outputs before anything runs, and the [`Runner`](crate::tasks::Runner) decides what is out of date.
//!
//! All paths used by the jobs are absolute paths under the working directory of a [`Workspace`].
//! Database jobs open their own connection to the pipeline database and write a `.load` sentinel.
//!
//! * [`mapping`]: read mapping and mapping quality control.
//! * [`rnaseq`]: read counting and differential expression analysis of RNA-seq data.

use crate::db::{Database, LoadOptions};
use crate::params::Params;
use crate::tasks::Job;
use crate::utils;

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::info;

pub mod mapping;
pub mod rnaseq;

#[cfg(test)]
mod tests;

//-----------------------------------------------------------------------------

/// Working directory and parameters of a pipeline run.
#[derive(Clone, Debug)]
pub struct Workspace {
    workdir: PathBuf,
    params: Arc<Params>,
}

impl Workspace {
    /// Alias of the attached annotation database.
    pub const ANNOTATIONS: &'static str = "annotations";

    /// Default name of the pipeline database.
    pub const DATABASE: &'static str = "csvdb";

    /// Creates a workspace with the given parameters.
    ///
    /// A relative working directory is resolved against the current directory.
    pub fn new<P: AsRef<Path>>(workdir: P, params: Params) -> Result<Self, String> {
        let workdir = if workdir.as_ref().is_absolute() {
            workdir.as_ref().to_path_buf()
        } else {
            let current = env::current_dir().map_err(|x| format!("Cannot determine the current directory: {}", x))?;
            current.join(workdir)
        };
        Ok(Workspace { workdir, params: Arc::new(params) })
    }

    /// Reads the configuration for a pipeline in the working directory.
    ///
    /// Configuration files are read on top of `defaults` (see [`Params::default_files`]).
    /// If `annotations_dir` is set and contains a configuration file, its parameters are added with prefix `annotations_`.
    pub fn load<P: AsRef<Path>>(workdir: P, config_files: &[PathBuf], defaults: &str) -> Result<Self, String> {
        let workdir = workdir.as_ref();
        let files = if config_files.is_empty() { Params::default_files(workdir) } else { config_files.to_vec() };
        let mut params = Params::load(&files, defaults)?;
        let annotations_dir = params.get_str_or("annotations_dir", "");
        if !annotations_dir.is_empty() {
            let dir = workdir.join(&annotations_dir);
            if utils::file_exists(dir.join(Params::CONFIG_FILE)) {
                let added = params.peek(&dir, Params::CONFIG_FILE, "annotations_")?;
                info!("Added {} parameters from the annotation pipeline", added);
            }
        }
        Self::new(workdir, params)
    }

    /// Returns the working directory.
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Returns the parameters.
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Returns the path of a file in the working directory.
    ///
    /// Absolute paths are returned unchanged.
    pub fn path<P: AsRef<Path>>(&self, name: P) -> PathBuf {
        self.workdir.join(name)
    }

    /// Returns the path to the pipeline database (`database_name`).
    pub fn database(&self) -> PathBuf {
        self.path(self.params.get_str_or("database_name", Self::DATABASE))
    }

    /// Returns the directory of read or alignment input files.
    ///
    /// Parameter `input`: `0` is the working directory, `1` is `data.dir`, and any other value is a path.
    pub fn input_dir(&self) -> PathBuf {
        let value = self.params.get_str_or("input", "0");
        match value.as_str() {
            "0" => self.workdir.clone(),
            "1" => self.path("data.dir"),
            other => self.path(other),
        }
    }

    fn annotations_dir(&self) -> PathBuf {
        self.path(self.params.get_str_or("annotations_dir", "."))
    }

    /// Returns the annotation file `annotations_interface_<name>`.
    ///
    /// Relative paths are relative to `annotations_dir`.
    pub fn annotation(&self, name: &str) -> Result<PathBuf, String> {
        let value = self.params.get_str(&format!("annotations_interface_{}", name))?;
        Ok(self.annotations_dir().join(value))
    }

    /// Returns the annotation database `annotations_database`.
    pub fn annotations_database(&self) -> Result<PathBuf, String> {
        let value = self.params.get_str("annotations_database")?;
        Ok(self.annotations_dir().join(value))
    }

    /// Returns the table name of the annotation file `annotations_interface_<name>` in the attached annotation database.
    pub fn annotation_table(&self, name: &str) -> Result<String, String> {
        let value = self.params.get_str(&format!("annotations_interface_{}", name))?;
        Ok(format!("{}.{}", Self::ANNOTATIONS, utils::basename(value)))
    }
}

//-----------------------------------------------------------------------------

// Database jobs.

impl Workspace {
    /// Returns a native job that runs the action on the pipeline database.
    pub fn database_job<F>(&self, action: F) -> Job
    where
        F: Fn(&mut Database) -> Result<(), String> + Send + Sync + 'static,
    {
        let filename = self.database();
        Job::native(move || {
            let mut database = Database::open(&filename)?;
            action(&mut database)
        })
    }

    /// Returns a native job that runs the action on the pipeline database with the annotation database attached.
    ///
    /// The annotation database is an input of the job.
    pub fn annotations_job<F>(&self, action: F) -> Result<Job, String>
    where
        F: Fn(&mut Database) -> Result<(), String> + Send + Sync + 'static,
    {
        let filename = self.database();
        let annotations = self.annotations_database()?;
        let input = annotations.clone();
        let job = Job::native(move || {
            let mut database = Database::open(&filename)?;
            database.attach(&annotations, Self::ANNOTATIONS)?;
            action(&mut database)
        });
        Ok(job.input(input))
    }

    /// Returns a job that loads a tsv file into the table named by the sentinel file.
    pub fn load_job<P: AsRef<Path>, Q: AsRef<Path>>(&self, infile: P, sentinel: Q, options: LoadOptions) -> Job {
        let (from, to) = (infile.as_ref().to_path_buf(), sentinel.as_ref().to_path_buf());
        self.database_job(move |database| {
            database.load_file(&from, &to, &options)?;
            Ok(())
        }).input(infile).output(sentinel)
    }
}

//-----------------------------------------------------------------------------

/// Returns the path with a suffix appended to the file name.
pub fn with_suffix<P: AsRef<Path>>(path: P, suffix: &str) -> PathBuf {
    let mut result = path.as_ref().as_os_str().to_os_string();
    result.push(suffix);
    PathBuf::from(result)
}

/// Returns the path with `suffix` replaced by `replacement`.
pub fn replace_suffix<P: AsRef<Path>>(path: P, suffix: &str, replacement: &str) -> Result<PathBuf, String> {
    let prefix = utils::snip(&utils::path_str(path), suffix)?;
    Ok(PathBuf::from(format!("{}{}", prefix, replacement)))
}

//-----------------------------------------------------------------------------
