//! Shell statements built from templates and executed with bash.
//!
//! A template contains placeholders of the form `%(name)s`, `%(name)i`, `%(name)d`, and `%(name)f`.
//! Values are looked up first in the local values of the statement and then in the pipeline [`Params`].
//! A literal `%` must be written as `%%`.
//!
//! Statements are executed with `bash -c` using `set -o pipefail`.
//! The shell function `checkpoint` can be used between commands to stop the statement if the previous command failed.
//! A non-zero exit status is reported as an error; there are no retries.
//!
//! # Examples
//!
//! ```
//! use ngs_pipelines::{Params, Statement};
//!
//! let mut params = Params::new();
//! params.set("samtools_threads", 4i64);
//! let statement = Statement::new("samtools sort -@ %(samtools_threads)i -o %(outfile)s %(infile)s")
//!     .local("infile", "sample.bam")
//!     .local("outfile", "sample.sorted.bam")
//!     .build(&params)
//!     .unwrap();
//! assert_eq!(statement, "samtools sort -@ 4 -o sample.sorted.bam sample.bam");
//! ```

use crate::params::{Params, Value};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use log::{debug, info};

#[cfg(test)]
mod tests;

//-----------------------------------------------------------------------------

/// A statement template with local values.
#[derive(Clone, Debug)]
pub struct Statement {
    template: String,
    locals: BTreeMap<String, Value>,
}

impl Statement {
    /// Creates a new statement from the template.
    pub fn new(template: &str) -> Self {
        Statement {
            template: template.to_string(),
            locals: BTreeMap::new(),
        }
    }

    /// Adds a local value that takes precedence over the parameters.
    pub fn local<V: Into<Value>>(mut self, name: &str, value: V) -> Self {
        self.locals.insert(name.to_string(), value.into());
        self
    }

    /// Adds a local path value.
    pub fn path<P: AsRef<Path>>(self, name: &str, path: P) -> Self {
        let value = path.as_ref().to_string_lossy().into_owned();
        self.local(name, value)
    }

    /// Substitutes the placeholders and returns the cleaned-up statement.
    ///
    /// # Errors
    ///
    /// Returns an error if a placeholder refers to an unknown name, the value has the wrong type, the template is malformed, or the statement is empty.
    pub fn build(&self, params: &Params) -> Result<String, String> {
        let substituted = substitute(&self.template, |name| {
            self.locals.get(name).or_else(|| params.get(name))
        })?;
        let cleaned = clean(&substituted);
        if cleaned.is_empty() {
            return Err(String::from("Empty statement"));
        }
        Ok(cleaned)
    }
}

//-----------------------------------------------------------------------------

/// Substitutes `%(name)x` placeholders in the template using the lookup function.
pub fn substitute<'a, F>(template: &str, lookup: F) -> Result<String, String>
    where F: Fn(&str) -> Option<&'a Value>
{
    let mut result = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            result.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => result.push('%'),
            Some('(') => {
                let mut name = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == ')' {
                        closed = true;
                        break;
                    }
                    name.push(c);
                }
                if !closed {
                    return Err(format!("Unterminated placeholder %({}", name));
                }
                let conversion = chars.next().ok_or_else(|| format!("Missing conversion for %({})", name))?;
                let value = lookup(&name).ok_or_else(|| format!("Unknown name in statement: {}", name))?;
                let formatted = match conversion {
                    's' => value.to_string(),
                    'i' | 'd' => {
                        let number = value.as_int().or_else(|| value.as_float().map(|x| x as i64));
                        let number = number.ok_or_else(|| format!("%({}){} requires an integer: {}", name, conversion, value))?;
                        number.to_string()
                    },
                    'f' => {
                        let number = value.as_float().ok_or_else(|| format!("%({})f requires a number: {}", name, value))?;
                        format!("{:.6}", number)
                    },
                    other => return Err(format!("Unsupported conversion %({}){}", name, other)),
                };
                result.push_str(&formatted);
            },
            Some(other) => return Err(format!("Invalid format sequence %{}", other)),
            None => return Err(String::from("Template ends with %")),
        }
    }
    Ok(result)
}

/// Trims the lines of the statement and joins the non-empty ones with single spaces.
pub fn clean(statement: &str) -> String {
    let lines: Vec<&str> = statement.lines().map(|x| x.trim()).filter(|x| !x.is_empty()).collect();
    lines.join(" ")
}

//-----------------------------------------------------------------------------

/// Executes statements in a working directory.
#[derive(Clone, Debug)]
pub struct Executor {
    workdir: PathBuf,
    dry_run: bool,
}

impl Executor {
    /// Number of stderr lines included in error messages.
    pub const ERROR_CONTEXT: usize = 20;

    // Shell prologue for all statements.
    const PROLOGUE: &'static str = "set -o pipefail\ncheckpoint() { if [ $? != 0 ]; then exit 1; fi; }\n";

    /// Creates an executor that runs statements in the given directory.
    pub fn new<P: AsRef<Path>>(workdir: P) -> Self {
        Executor {
            workdir: workdir.as_ref().to_path_buf(),
            dry_run: false,
        }
    }

    /// Creates an executor that only logs the statements.
    pub fn dry_run<P: AsRef<Path>>(workdir: P) -> Self {
        Executor {
            workdir: workdir.as_ref().to_path_buf(),
            dry_run: true,
        }
    }

    /// Returns the working directory.
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Returns `true` if the executor only logs what it would do.
    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Runs the statement.
    ///
    /// # Errors
    ///
    /// Returns an error if bash cannot be started or the statement exits with a non-zero status.
    /// The error contains the statement and the last lines of stderr.
    pub fn run(&self, statement: &str) -> Result<(), String> {
        if self.dry_run {
            info!("Would run: {}", statement);
            return Ok(());
        }
        debug!("Running: {}", statement);

        let script = format!("{}{}\n", Self::PROLOGUE, statement);
        let output = Command::new("bash")
            .arg("-c")
            .arg(&script)
            .current_dir(&self.workdir)
            .output()
            .map_err(|x| format!("Cannot start bash: {}", x))?;

        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let lines: Vec<&str> = stderr.lines().collect();
        let tail = &lines[lines.len().saturating_sub(Self::ERROR_CONTEXT)..];
        let status = match output.status.code() {
            Some(code) => format!("exit status {}", code),
            None => String::from("terminated by a signal"),
        };
        Err(format!("Statement failed with {}: {}\n{}", status, statement, tail.join("\n")))
    }
}

//-----------------------------------------------------------------------------
