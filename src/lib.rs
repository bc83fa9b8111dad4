//! # NGS pipelines: read mapping and RNA-seq differential expression.
//!
//! The pipelines run external tools (mappers, samtools, Picard, featureCounts, cufflinks, R scripts) and store their results in a SQLite database.
//! Each pipeline is a set of named stages with explicit dependencies, and each stage consists of jobs with known input and output files.
//! A job runs when one of its outputs is missing or older than an input.
//!
//! # Components
//!
//! * [`params`]: hierarchical TOML configuration flattened to `section_key` parameters.
//! * [`statement`]: shell command templates with `%(name)s` placeholders, and the executor that runs them.
//! * [`tasks`]: stages, targets, and the runner that executes them in parallel.
//! * [`db`]: loading tab-separated tables into the pipeline database.
//! * [`table`]: tab-separated tables and the operations of `table2table`.
//! * [`tracks`]: sample names derived from file names.
//! * [`gtf`]: gene sets in GTF format.
//! * [`mapping`]: mapper commands and read counting.
//! * [`qc`]: mapping quality control.
//! * [`expression`]: experimental designs, read counting, and differential expression.
//! * [`report`]: trackers that render database queries as report tables.
//! * [`workflows`]: the mapping and RNA-seq pipelines.
//!
//! ### Files and tables
//!
//! Every database table is created by a job that writes a sentinel file `<table>.load`.
//! The sentinel records the number of loaded rows, and later jobs depend on the sentinel instead of the table.
//! Table names are derived from file names by replacing `-` and `.` with `_`.

pub mod db;
pub mod expression;
pub mod gtf;
pub mod mapping;
pub mod params;
pub mod qc;
pub mod report;
pub mod statement;
pub mod table;
pub mod tasks;
pub mod tracks;
pub mod utils;
pub mod workflows;

#[cfg(test)]
pub(crate) mod internal;

pub use db::{Database, LoadOptions};
pub use params::{Params, Value};
pub use statement::{Executor, Statement};
pub use table::Table;
pub use tasks::{Job, Mode, Pipeline, Runner, Stage};
pub use tracks::Track;
pub use workflows::Workspace;
