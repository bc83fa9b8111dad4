//! Report trackers: named queries over the pipeline database.
//!
//! A [`Tracker`] finds its tracks by matching table names against a pattern and returns a [`TrackerResult`] for each track.
//! Trackers are looked up by name with [`tracker`].
//!
//! # Examples
//!
//! ```
//! use ngs_pipelines::report::{split_locus, link_to_ucsc};
//!
//! let (contig, start, end) = split_locus("chr1:100..200").unwrap();
//! assert_eq!((contig.as_str(), start, end), ("chr1", 100, 200));
//! let link = link_to_ucsc("hg38", &contig, start, end);
//! assert!(link.starts_with("`chr1:100-200 <"));
//! ```

use crate::db::{quote, Database, QueryResult};
use crate::table::Table;

use std::collections::BTreeSet;
use std::fmt::Display;
use std::io::Write;

use regex::Regex;

#[cfg(test)]
mod tests;

//-----------------------------------------------------------------------------

/// Data returned by a tracker.
#[derive(Clone, Debug, PartialEq)]
pub enum TrackerResult {
    /// A single number.
    Value(f64),
    /// A table with a header.
    Table(Table),
    /// Values by level and name, in level order.
    Nested(Vec<(String, Vec<(String, f64)>)>),
    /// Counts by name.
    Counts(Vec<(String, usize)>),
}

impl TrackerResult {
    /// Converts the result into a table.
    pub fn to_table(&self) -> Table {
        match self {
            TrackerResult::Value(value) => Table::new(vec![String::from("value")], vec![vec![value.to_string()]]),
            TrackerResult::Table(table) => table.clone(),
            TrackerResult::Nested(levels) => {
                let mut rows = Vec::new();
                for (level, values) in levels.iter() {
                    for (name, value) in values.iter() {
                        rows.push(vec![level.clone(), name.clone(), value.to_string()]);
                    }
                }
                Table::new(vec![String::from("level"), String::from("name"), String::from("value")], rows)
            },
            TrackerResult::Counts(counts) => {
                let rows = counts.iter().map(|(name, count)| vec![name.clone(), count.to_string()]).collect();
                Table::new(vec![String::from("name"), String::from("count")], rows)
            },
        }
    }

    /// Writes the result in tsv format.
    pub fn write<W: Write>(&self, writer: W) -> Result<(), String> {
        self.to_table().write(writer)
    }
}

impl Display for TrackerResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.to_table();
        writeln!(f, "{}", table.header.join("\t"))?;
        for row in table.rows.iter() {
            writeln!(f, "{}", row.join("\t"))?;
        }
        Ok(())
    }
}

fn query_table(database: &Database, sql: &str) -> Result<Table, String> {
    let QueryResult { header, rows } = database.query(sql)?;
    let rows = rows.into_iter().map(|row| row.iter().map(|x| x.to_string()).collect()).collect();
    Ok(Table::new(header, rows))
}

//-----------------------------------------------------------------------------

/// A named query over the database.
pub trait Tracker {
    /// Name used for looking up the tracker.
    fn name(&self) -> &str;

    /// Regex matched against whole table names; the first capture group is the track.
    fn pattern(&self) -> &str;

    /// Returns the tracks in sorted order.
    fn tracks(&self, database: &Database) -> Result<Vec<String>, String> {
        let pattern = format!("^(?:{})$", self.pattern());
        let regex = Regex::new(&pattern).map_err(|x| x.to_string())?;
        let mut result = BTreeSet::new();
        for table in database.tables()? {
            if let Some(captures) = regex.captures(&table) {
                let track = captures.get(1).or_else(|| captures.get(0)).map(|x| x.as_str().to_string());
                if let Some(track) = track {
                    result.insert(track);
                }
            }
        }
        Ok(result.into_iter().collect())
    }

    /// Returns the data for the track.
    fn call(&self, database: &Database, track: &str) -> Result<TrackerResult, String>;
}

//-----------------------------------------------------------------------------

/// Taxonomic levels in relative abundance tables.
pub const TAXON_LEVELS: [&str; 6] = ["phylum", "class", "order", "family", "genus", "species"];

/// Fraction of reads that contribute to relative abundance estimates.
///
/// Divides the number of rows in `<track>_readmap` by `total_reads` in `reads_summary`.
/// The track in `reads_summary` uses dashes: `a_b_c_d` becomes `a-b_c-d`, and other tracks replace every `_` with `-`.
pub struct ContributingReads;

impl ContributingReads {
    /// Returns the name of the track in `reads_summary`.
    pub fn summary_track(track: &str) -> String {
        let parts: Vec<&str> = track.split('_').collect();
        if parts.len() == 4 {
            format!("{}-{}_{}-{}", parts[0], parts[1], parts[2], parts[3])
        } else {
            track.replace('_', "-")
        }
    }
}

impl Tracker for ContributingReads {
    fn name(&self) -> &str {
        "ContributingReads"
    }

    fn pattern(&self) -> &str {
        "(.*)_readmap"
    }

    fn call(&self, database: &Database, track: &str) -> Result<TrackerResult, String> {
        let summary_track = Self::summary_track(track);
        let sql = format!("SELECT total_reads FROM reads_summary WHERE track = '{}'", summary_track.replace('\'', "''"));
        let total = database.query_value(&sql)?.and_then(|x| x.as_f64()).ok_or_else(|| {
            format!("No total read count for track {}", summary_track)
        })?;
        if total == 0.0 {
            return Err(format!("Total read count for track {} is zero", summary_track));
        }
        let sql = format!("SELECT COUNT(*) FROM {}", quote(&format!("{}_readmap", track)));
        let count = database.query_value(&sql)?.and_then(|x| x.as_f64()).unwrap_or(0.0);
        Ok(TrackerResult::Value(count / total))
    }
}

/// Taxa with relative abundance above 1% at each taxonomic level.
pub struct RelativeAbundance;

impl Tracker for RelativeAbundance {
    fn name(&self) -> &str {
        "RelativeAbundance"
    }

    fn pattern(&self) -> &str {
        "(.*)_relab"
    }

    fn call(&self, database: &Database, track: &str) -> Result<TrackerResult, String> {
        let table = quote(&format!("{}_relab", track));
        let mut result = Vec::with_capacity(TAXON_LEVELS.len());
        for level in TAXON_LEVELS {
            let sql = format!(
                "SELECT taxon, rel_abundance FROM {} WHERE taxon_level = '{}' AND rel_abundance > 1",
                table, level
            );
            let query = database.query(&sql)?;
            let values = query.rows.iter().map(|row| {
                (row[0].to_string(), row[1].as_f64().unwrap_or(0.0))
            }).collect();
            result.push((level.to_string(), values));
        }
        Ok(TrackerResult::Nested(result))
    }
}

/// Number of taxa detected at each taxonomic level.
pub struct TotalSpecies;

impl Tracker for TotalSpecies {
    fn name(&self) -> &str {
        "TotalSpecies"
    }

    fn pattern(&self) -> &str {
        "(.*)_relab"
    }

    fn call(&self, database: &Database, track: &str) -> Result<TrackerResult, String> {
        let table = quote(&format!("{}_relab", track));
        let mut result = Vec::with_capacity(TAXON_LEVELS.len());
        for level in TAXON_LEVELS {
            let sql = format!("SELECT COUNT(*) FROM {} WHERE taxon_level = '{}'", table, level);
            let count = database.query_value(&sql)?.and_then(|x| x.as_i64()).unwrap_or(0);
            result.push((level.to_string(), count as usize));
        }
        Ok(TrackerResult::Counts(result))
    }
}

//-----------------------------------------------------------------------------

/// A tracker that returns a whole table named by a prefix and a suffix around the track.
pub struct TableTracker {
    name: &'static str,
    pattern: &'static str,
    prefix: &'static str,
    suffix: &'static str,
}

impl TableTracker {
    /// Correlations between tracks in `<track>_correlation`.
    pub const TAG_COUNTS_CORRELATIONS: TableTracker = TableTracker {
        name: "TagCountsCorrelations", pattern: "(.*)_correlation", prefix: "", suffix: "_correlation",
    };

    /// Count summaries in `<track>counts_stats`.
    pub const TAG_COUNTS_SUMMARY_ALL: TableTracker = TableTracker {
        name: "TagCountsSummaryAll", pattern: "(.*)counts_stats", prefix: "", suffix: "counts_stats",
    };

    /// Per-design count summaries in `design<track>_stats`.
    pub const TAG_COUNTS_SUMMARY_PER_DESIGN: TableTracker = TableTracker {
        name: "TagCountsSummaryPerDesign", pattern: "design(.*)_stats", prefix: "design", suffix: "_stats",
    };

    /// The single table `featurecounts_summary`.
    pub const FEATURE_COUNTS_SUMMARY: TableTracker = TableTracker {
        name: "FeatureCountsSummary", pattern: "featurecounts_summary", prefix: "", suffix: "",
    };

    fn table_name(&self, track: &str) -> String {
        format!("{}{}{}", self.prefix, track, self.suffix)
    }
}

impl Tracker for TableTracker {
    fn name(&self) -> &str {
        self.name
    }

    fn pattern(&self) -> &str {
        self.pattern
    }

    fn call(&self, database: &Database, track: &str) -> Result<TrackerResult, String> {
        let sql = format!("SELECT * FROM {}", quote(&self.table_name(track)));
        Ok(TrackerResult::Table(query_table(database, &sql)?))
    }
}

/// Differential expression results in `<track>_gene_diff`, ordered by significance and fold change.
pub struct DifferentialExpression {
    significant_only: bool,
}

impl DifferentialExpression {
    pub fn new(significant_only: bool) -> Self {
        DifferentialExpression { significant_only }
    }
}

impl Tracker for DifferentialExpression {
    fn name(&self) -> &str {
        if self.significant_only { "DifferentialExpressionSignificant" } else { "DifferentialExpression" }
    }

    fn pattern(&self) -> &str {
        "(.*)_gene_diff"
    }

    fn call(&self, database: &Database, track: &str) -> Result<TrackerResult, String> {
        let filter = if self.significant_only { " WHERE significant = 1" } else { "" };
        let sql = format!(
            "SELECT * FROM {}{} ORDER BY significant DESC, fold DESC",
            quote(&format!("{}_gene_diff", track)), filter
        );
        Ok(TrackerResult::Table(query_table(database, &sql)?))
    }
}

/// Transcript-level Sleuth results in `<track>_DEresults`, ordered by significance and fold change.
///
/// Column `flagged` holds the reason from `kallisto_flagged_transcripts`, or `NA` if the transcript was not flagged.
pub struct SleuthResults {
    significant_only: bool,
}

impl SleuthResults {
    /// Table of transcripts flagged during quantification.
    pub const FLAGGED: &'static str = "kallisto_flagged_transcripts";

    pub fn new(significant_only: bool) -> Self {
        SleuthResults { significant_only }
    }
}

impl Tracker for SleuthResults {
    fn name(&self) -> &str {
        if self.significant_only { "SleuthResultsSignificant" } else { "SleuthResults" }
    }

    fn pattern(&self) -> &str {
        "(.*)_DEresults"
    }

    fn call(&self, database: &Database, track: &str) -> Result<TrackerResult, String> {
        let (flagged, join) = if database.table_exists(Self::FLAGGED)? {
            (
                "B.reason",
                format!(" LEFT JOIN {} AS B ON A.transcript_id = B.transcript_id", quote(Self::FLAGGED)),
            )
        } else {
            ("NULL", String::new())
        };
        let filter = if self.significant_only { " WHERE A.significant = 1" } else { "" };
        let sql = format!(
            "SELECT A.gene_name, A.gene_id, A.transcript_id, A.transcript_biotype, \
             A.control_mean AS expression, A.fold, A.l2fold AS log2_fold, \
             A.p_value, A.p_value_adj, A.significant, {} AS flagged \
             FROM {} AS A{}{} ORDER BY A.significant DESC, A.fold DESC",
            flagged, quote(&format!("{}_DEresults", track)), join, filter
        );
        Ok(TrackerResult::Table(query_table(database, &sql)?))
    }
}

//-----------------------------------------------------------------------------

/// Names of the available trackers.
pub const TRACKERS: [&str; 11] = [
    "ContributingReads", "RelativeAbundance", "TotalSpecies",
    "TagCountsCorrelations", "TagCountsSummaryAll", "TagCountsSummaryPerDesign", "FeatureCountsSummary",
    "DifferentialExpression", "DifferentialExpressionSignificant",
    "SleuthResults", "SleuthResultsSignificant",
];

/// Returns the tracker with the given name.
pub fn tracker(name: &str) -> Result<Box<dyn Tracker>, String> {
    match name {
        "ContributingReads" => Ok(Box::new(ContributingReads)),
        "RelativeAbundance" => Ok(Box::new(RelativeAbundance)),
        "TotalSpecies" => Ok(Box::new(TotalSpecies)),
        "TagCountsCorrelations" => Ok(Box::new(TableTracker::TAG_COUNTS_CORRELATIONS)),
        "TagCountsSummaryAll" => Ok(Box::new(TableTracker::TAG_COUNTS_SUMMARY_ALL)),
        "TagCountsSummaryPerDesign" => Ok(Box::new(TableTracker::TAG_COUNTS_SUMMARY_PER_DESIGN)),
        "FeatureCountsSummary" => Ok(Box::new(TableTracker::FEATURE_COUNTS_SUMMARY)),
        "DifferentialExpression" => Ok(Box::new(DifferentialExpression::new(false))),
        "DifferentialExpressionSignificant" => Ok(Box::new(DifferentialExpression::new(true))),
        "SleuthResults" => Ok(Box::new(SleuthResults::new(false))),
        "SleuthResultsSignificant" => Ok(Box::new(SleuthResults::new(true))),
        _ => Err(format!("Unknown tracker: {} (available: {})", name, TRACKERS.join(", "))),
    }
}

//-----------------------------------------------------------------------------

/// Splits a locus `contig:start..end` or `contig:start-end`.
pub fn split_locus(locus: &str) -> Result<(String, usize, usize), String> {
    let (contig, range) = locus.rsplit_once(':').ok_or_else(|| format!("Invalid locus: {}", locus))?;
    let (start, end) = range.split_once("..").or_else(|| range.split_once('-')).ok_or_else(|| {
        format!("Invalid locus: {}", locus)
    })?;
    let start = start.parse::<usize>().map_err(|_| format!("Invalid start in locus: {}", locus))?;
    let end = end.parse::<usize>().map_err(|_| format!("Invalid end in locus: {}", locus))?;
    if contig.is_empty() {
        return Err(format!("Missing contig in locus: {}", locus));
    }
    Ok((contig.to_string(), start, end))
}

/// Returns a reStructuredText link to the locus in the UCSC genome browser.
pub fn link_to_ucsc(database: &str, contig: &str, start: usize, end: usize) -> String {
    format!(
        "`{contig}:{start}-{end} <http://genome.ucsc.edu/cgi-bin/hgTracks?db={database}&position={contig}:{start}..{end}>`_"
    )
}

//-----------------------------------------------------------------------------
