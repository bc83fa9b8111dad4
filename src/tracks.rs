//! Tracks: sample names derived from input file names.
//!
//! A track name consists of `-`-separated parts such as `CW-CD14-R1`.
//! The parts are labeled from the right using the labels `experiment`, `tissue`, `condition`, and `replicate`.
//! A track with three parts has no experiment label, a track with two parts has only condition and replicate, and so on.
//!
//! Database tables derived from a track use the table form of the name, where `-` and `.` are replaced with `_`.

use crate::utils;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;
use std::path::Path;

use log::warn;
use regex::Regex;


//-----------------------------------------------------------------------------

/// A track (sample) name.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Track {
    name: String,
}

impl Track {
    /// Separator between the parts of the name.
    pub const SEPARATOR: char = '-';

    /// Labels for the parts of a name with the maximal number of labeled parts.
    pub const LABELS: [&'static str; 4] = ["experiment", "tissue", "condition", "replicate"];

    /// Creates a new track with the given name.
    pub fn new(name: &str) -> Self {
        Track { name: name.to_string() }
    }

    /// Extracts the track from a file name using a regex.
    ///
    /// The regex is matched against the last component of the path, and the first capture group becomes the track.
    /// Returns [`None`] if the regex does not match or does not have a capture group.
    pub fn from_file<P: AsRef<Path>>(path: P, pattern: &Regex) -> Option<Self> {
        let name = utils::basename(path);
        let captures = pattern.captures(&name)?;
        let track = captures.get(1)?.as_str();
        if track.is_empty() {
            return None;
        }
        Some(Track::new(track))
    }

    /// Returns the name as used in file names.
    pub fn as_file(&self) -> &str {
        &self.name
    }

    /// Returns the name as used in database table names.
    pub fn as_table(&self) -> String {
        table_name(&self.name)
    }

    /// Returns the `-`-separated parts of the name.
    pub fn parts(&self) -> Vec<&str> {
        self.name.split(Self::SEPARATOR).collect()
    }

    /// Returns the part of the name with the given label, or [`None`] if the name has no such part.
    pub fn label(&self, label: &str) -> Option<&str> {
        let label_index = Self::LABELS.iter().position(|x| *x == label)?;
        let parts = self.parts();
        // Labels are aligned to the right end of the name.
        let part_index = (label_index + parts.len()).checked_sub(Self::LABELS.len())?;
        parts.get(part_index).copied()
    }
}

impl Display for Track {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

//-----------------------------------------------------------------------------

/// Returns the table form of a name, with `-` and `.` replaced with `_`.
pub fn table_name(name: &str) -> String {
    name.replace(['-', '.'], "_")
}

/// Returns the name of the table loaded by a job with the given sentinel file.
///
/// Takes the last component of the path, removes a `.load` suffix, and converts the rest into a table name.
///
/// # Examples
///
/// ```
/// use ngs_pipelines::tracks;
///
/// assert_eq!(tracks::to_table("bowtie.dir/CW-CD14-R1.bowtie.load"), "CW_CD14_R1_bowtie");
/// ```
pub fn to_table<P: AsRef<Path>>(filename: P) -> String {
    let name = utils::basename(filename);
    let name = name.strip_suffix(".load").unwrap_or(&name);
    table_name(name)
}

/// Finds the tracks of input files in a directory.
///
/// Lists the files matching the glob pattern and extracts the track using the first capture group of the regex.
/// Returns the tracks in sorted order without duplicates.
///
/// # Errors
///
/// Returns an error if the glob pattern is invalid.
pub fn discover<P: AsRef<Path>>(dir: P, glob_pattern: &str, pattern: &Regex) -> Result<Vec<Track>, String> {
    let mut result = BTreeSet::new();
    for path in list_files(dir, glob_pattern)? {
        match Track::from_file(&path, pattern) {
            Some(track) => { result.insert(track); },
            None => warn!("Cannot determine the track for {}", path.display()),
        }
    }
    Ok(result.into_iter().collect())
}

/// Lists the files in the directory matching the glob pattern in sorted order.
pub fn list_files<P: AsRef<Path>>(dir: P, glob_pattern: &str) -> Result<Vec<std::path::PathBuf>, String> {
    let full_pattern = dir.as_ref().join(glob_pattern);
    let full_pattern = utils::path_str(&full_pattern);
    let paths = glob::glob(&full_pattern).map_err(|x| format!("Invalid pattern {}: {}", full_pattern, x))?;
    let mut result = Vec::new();
    for path in paths {
        let path = path.map_err(|x| x.to_string())?;
        if path.is_file() {
            result.push(path);
        }
    }
    result.sort();
    Ok(result)
}

/// Groups the tracks by the values of the given labels.
///
/// The name of a group is the `-`-joined label values.
/// For example, grouping by `tissue` and `condition` puts `CW-CD14-R1` and `CW-CD14-R2` into group `CW-CD14`.
///
/// # Errors
///
/// Returns an error if a track does not have one of the labels.
pub fn aggregate(tracks: &[Track], labels: &[&str]) -> Result<BTreeMap<String, Vec<Track>>, String> {
    let mut result: BTreeMap<String, Vec<Track>> = BTreeMap::new();
    for track in tracks {
        let mut values = Vec::with_capacity(labels.len());
        for label in labels {
            let value = track.label(label).ok_or_else(|| {
                format!("Track {} has no {} label", track, label)
            })?;
            values.push(value);
        }
        let group = values.join("-");
        result.entry(group).or_default().push(track.clone());
    }
    Ok(result)
}

//-----------------------------------------------------------------------------
