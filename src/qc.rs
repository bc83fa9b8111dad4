//! Quality control: parsers for the logs and metrics of external tools.
//!
//! The parsers turn tool output into [`Table`]s that can be loaded into the database.
//! Each table has a `track` column derived from the file name.

use crate::db::TrackPattern;
use crate::params::Params;
use crate::statement::Statement;
use crate::table::Table;
use crate::utils;

use std::fs;
use std::io::Write;
use std::path::Path;

use log::{info, warn};
use regex::Regex;


//-----------------------------------------------------------------------------

// Read counts.

/// Reads the number of reads from a `.nreads` file.
///
/// The file contains a line `nreads\t<n>`.
pub fn read_nreads<P: AsRef<Path>>(filename: P) -> Result<u64, String> {
    for line in utils::read_lines(&filename)? {
        if let Some(value) = line.strip_prefix("nreads\t") {
            return value.trim().parse::<u64>().map_err(|x| {
                format!("{}: invalid read count {}: {}", filename.as_ref().display(), value, x)
            });
        }
    }
    Err(format!("{}: no read count", filename.as_ref().display()))
}

/// Sums the read counts of the input files and writes the total to the output file.
pub fn merge_read_counts<P: AsRef<Path>, Q: AsRef<Path>>(infiles: &[P], outfile: Q) -> Result<u64, String> {
    let mut total = 0;
    for infile in infiles {
        let count = read_nreads(infile)?;
        info!("{}: {} reads", infile.as_ref().display(), count);
        total += count;
    }
    write_nreads(outfile, total)?;
    Ok(total)
}

/// Writes a `.nreads` file.
pub fn write_nreads<P: AsRef<Path>>(filename: P, count: u64) -> Result<(), String> {
    let mut output = utils::create_file(&filename)?;
    writeln!(output, "nreads\t{}", count).map_err(|x| x.to_string())?;
    output.flush().map_err(|x| x.to_string())
}

/// Builds the `track`, `total_reads` table from `.nreads` files.
pub fn read_counts_table<P: AsRef<Path>>(infiles: &[P]) -> Result<Table, String> {
    let pattern = TrackPattern::Suffix(String::from(".nreads"));
    let mut result = Table::new(vec![String::from("track"), String::from("total_reads")], Vec::new());
    for infile in infiles {
        let track = pattern.track(infile)?;
        let count = read_nreads(infile)?;
        result.rows.push(vec![track, count.to_string()]);
    }
    Ok(result)
}

//-----------------------------------------------------------------------------

/// Statistics from the logs of a tophat run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TophatStats {
    pub reads_in: u64,
    pub reads_removed: u64,
    pub reads_out: u64,
    pub junctions_loaded: u64,
    pub junctions_found: u64,
    /// Blank when the segment junction log is missing or empty.
    pub possible_splices: Option<u64>,
}

impl TophatStats {
    /// Column names for [`TophatStats::to_row`], without the track.
    pub const HEADER: [&'static str; 6] = [
        "reads_in", "reads_removed", "reads_out", "junctions_loaded", "junctions_found", "possible_splices",
    ];

    /// Parses the logs in the tophat log directory.
    ///
    /// With paired-end reads, tophat reports pairs, and the read numbers are doubled.
    ///
    /// # Errors
    ///
    /// Returns an error if a log cannot be read or an expected line is missing.
    pub fn from_logs<P: AsRef<Path>>(dir: P, paired: bool) -> Result<Self, String> {
        let dir = dir.as_ref();
        let lines = utils::read_lines(dir.join("prep_reads.log"))?;
        let counts = select(&lines, r"(\d+) out of (\d+) reads have been filtered out")?;
        let mut reads_removed = parse_count(&counts[0])?;
        let mut reads_in = parse_count(&counts[1])?;

        let lines = utils::read_lines(dir.join("reports.log"))?;
        let junctions_loaded = parse_count(&select(&lines, r"Loaded (\d+) junctions")?[0])?;
        let junctions_found = parse_count(&select(&lines, r"Found (\d+) junctions from happy spliced reads")?[0])?;

        let segment_log = dir.join("segment_juncs.log");
        let mut possible_splices = None;
        if utils::file_exists(&segment_log) {
            let lines = utils::read_lines(&segment_log)?;
            if !lines.is_empty() {
                possible_splices = Some(parse_count(&select(&lines, r"Reported (\d+) total potential splices")?[0])?);
            }
        }

        if paired {
            reads_in *= 2;
            reads_removed *= 2;
        }
        Ok(TophatStats {
            reads_in,
            reads_removed,
            reads_out: reads_in - reads_removed,
            junctions_loaded,
            junctions_found,
            possible_splices,
        })
    }

    /// Returns the statistics as table cells.
    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.reads_in.to_string(),
            self.reads_removed.to_string(),
            self.reads_out.to_string(),
            self.junctions_loaded.to_string(),
            self.junctions_found.to_string(),
            self.possible_splices.map(|x| x.to_string()).unwrap_or_default(),
        ]
    }
}

// Returns the capture groups of the first line matching the pattern.
fn select(lines: &[String], pattern: &str) -> Result<Vec<String>, String> {
    let regex = Regex::new(pattern).map_err(|x| x.to_string())?;
    for line in lines {
        if let Some(captures) = regex.captures(line) {
            return Ok(captures.iter().skip(1).map(|x| x.map(|m| m.as_str().to_string()).unwrap_or_default()).collect());
        }
    }
    Err(format!("pattern '{}' not found", pattern))
}

fn parse_count(value: &str) -> Result<u64, String> {
    value.parse::<u64>().map_err(|x| format!("Invalid count {}: {}", value, x))
}

/// Builds the tophat statistics table for the BAM files.
///
/// The logs of `sample.tophat.bam` are in `sample.tophat.bam.logs`.
pub fn tophat_stats_table<P: AsRef<Path>>(bamfiles: &[P], paired: bool) -> Result<Table, String> {
    let mut header = vec![String::from("track")];
    header.extend(TophatStats::HEADER.iter().map(|x| x.to_string()));
    let mut result = Table::new(header, Vec::new());
    let pattern = TrackPattern::Suffix(String::from(".bam"));
    for bamfile in bamfiles {
        let track = pattern.track(bamfile)?;
        let mut logs = bamfile.as_ref().as_os_str().to_os_string();
        logs.push(".logs");
        let stats = TophatStats::from_logs(&logs, paired).map_err(|x| {
            format!("{}: {}", bamfile.as_ref().display(), x)
        })?;
        let mut row = vec![track];
        row.extend(stats.to_row());
        result.rows.push(row);
    }
    Ok(result)
}

//-----------------------------------------------------------------------------

/// Builds the STAR statistics table from the final logs `<bamfile>.final.log`.
///
/// Each line of the log containing `|` is a statistic.
/// Column names are trimmed, with `%` replaced by `percent`, in the order of first appearance.
///
/// # Errors
///
/// Returns an error if a log is missing, which indicates an incomplete run.
pub fn star_stats<P: AsRef<Path>>(bamfiles: &[P]) -> Result<Table, String> {
    let pattern = TrackPattern::Suffix(String::from(".bam"));
    let mut columns: Vec<String> = Vec::new();
    let mut records: Vec<(String, Vec<(String, String)>)> = Vec::new();
    for bamfile in bamfiles {
        let mut log = bamfile.as_ref().as_os_str().to_os_string();
        log.push(".final.log");
        if !utils::file_exists(&log) {
            return Err(format!("incomplete run: {}", bamfile.as_ref().display()));
        }
        let mut values = Vec::new();
        for line in utils::read_lines(&log)? {
            let Some((name, value)) = line.split_once('|') else {
                continue;
            };
            let name = name.trim().replace('%', "percent");
            if !columns.contains(&name) {
                columns.push(name.clone());
            }
            values.push((name, value.trim().to_string()));
        }
        records.push((pattern.track(bamfile)?, values));
    }

    let mut header = vec![String::from("track")];
    header.extend(columns.iter().cloned());
    let mut result = Table::new(header, Vec::new());
    for (track, values) in records {
        let mut row = vec![track];
        for column in columns.iter() {
            let value = values.iter().find(|(name, _)| name == column).map(|(_, v)| v.clone());
            row.push(value.unwrap_or_default());
        }
        result.rows.push(row);
    }
    Ok(result)
}

//-----------------------------------------------------------------------------

/// Alignment counts reported by `samtools flagstat`.
///
/// Counts are the QC-passed alignments.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FlagStats {
    pub total: u64,
    pub secondary: u64,
    pub supplementary: u64,
    pub duplicates: u64,
    pub mapped: u64,
    pub paired: u64,
    pub proper_pairs: u64,
    pub singletons: u64,
}

impl FlagStats {
    /// Column names for [`FlagStats::to_row`].
    pub const HEADER: [&'static str; 8] = [
        "alignments_total", "alignments_secondary", "alignments_supplementary", "alignments_duplicates",
        "alignments_mapped", "reads_paired", "reads_proper_pairs", "reads_singletons",
    ];

    /// Parses the output of `samtools flagstat`.
    ///
    /// # Errors
    ///
    /// Returns an error if the total or the number of mapped alignments is missing.
    pub fn parse(text: &str) -> Result<Self, String> {
        let line_regex = Regex::new(r"^(\d+) \+ \d+ ([^(]+?)\s*(\(.*)?$").map_err(|x| x.to_string())?;
        let mut result = FlagStats::default();
        let mut found_total = false;
        let mut found_mapped = false;
        for line in text.lines() {
            let Some(captures) = line_regex.captures(line.trim()) else {
                continue;
            };
            let count = parse_count(&captures[1])?;
            match &captures[2] {
                "in total" => { result.total = count; found_total = true; },
                "secondary" => result.secondary = count,
                "supplementary" => result.supplementary = count,
                "duplicates" => result.duplicates = count,
                "mapped" => { result.mapped = count; found_mapped = true; },
                "paired in sequencing" => result.paired = count,
                "properly paired" => result.proper_pairs = count,
                "singletons" => result.singletons = count,
                _ => {},
            }
        }
        if !found_total || !found_mapped {
            return Err(String::from("Not samtools flagstat output"));
        }
        Ok(result)
    }

    /// Returns the counts as table cells.
    pub fn to_row(&self) -> Vec<String> {
        [
            self.total, self.secondary, self.supplementary, self.duplicates,
            self.mapped, self.paired, self.proper_pairs, self.singletons,
        ].iter().map(|x| x.to_string()).collect()
    }
}

/// Builds the `bam_stats` table from flagstat files and read counts.
///
/// Each input is `(track, flagstat file, number of input reads)`.
pub fn bam_stats_table<P: AsRef<Path>>(inputs: &[(String, P, u64)]) -> Result<Table, String> {
    let mut header = vec![String::from("track"), String::from("reads_total")];
    header.extend(FlagStats::HEADER.iter().map(|x| x.to_string()));
    let mut result = Table::new(header, Vec::new());
    for (track, filename, nreads) in inputs {
        let text = fs::read_to_string(filename).map_err(|x| {
            format!("Cannot read {}: {}", filename.as_ref().display(), x)
        })?;
        let stats = FlagStats::parse(&text).map_err(|x| format!("{}: {}", filename.as_ref().display(), x))?;
        let mut row = vec![track.clone(), nreads.to_string()];
        row.extend(stats.to_row());
        result.rows.push(row);
    }
    Ok(result)
}

//-----------------------------------------------------------------------------

/// Metrics from a picard metrics file.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PicardMetrics {
    /// The `## METRICS CLASS` section.
    pub metrics: Table,
    /// The `## HISTOGRAM` section, if present.
    pub histogram: Option<Table>,
}

/// Parses a picard metrics file.
///
/// A section starts after its `##` marker line: the next line is the header, and the rows continue until a blank line.
pub fn picard_metrics<P: AsRef<Path>>(filename: P) -> Result<PicardMetrics, String> {
    let lines = utils::read_lines(&filename)?;
    let metrics = picard_section(&lines, "## METRICS CLASS").ok_or_else(|| {
        format!("{}: no metrics section", filename.as_ref().display())
    })?;
    let histogram = picard_section(&lines, "## HISTOGRAM");
    Ok(PicardMetrics { metrics, histogram })
}

fn picard_section(lines: &[String], marker: &str) -> Option<Table> {
    let start = lines.iter().position(|x| x.starts_with(marker))?;
    let mut section = lines[start + 1..].iter().take_while(|x| !x.trim().is_empty() && !x.starts_with('#'));
    let header: Vec<String> = section.next()?.split('\t').map(String::from).collect();
    let rows = section.map(|x| x.split('\t').map(String::from).collect()).collect();
    Some(Table::new(header, rows))
}

/// Merges the metrics sections of picard files with a `track` column.
///
/// Returns the merged metrics and the merged histograms; the latter is empty if no file has a histogram.
///
/// # Errors
///
/// Returns an error if the headers of the files differ.
pub fn merge_picard_metrics<P: AsRef<Path>>(files: &[P], pattern: &TrackPattern) -> Result<(Table, Table), String> {
    let mut metrics = Table::default();
    let mut histograms = Table::default();
    for filename in files {
        let track = pattern.track(filename)?;
        let parsed = picard_metrics(filename)?;
        append_with_track(&mut metrics, &parsed.metrics, &track, filename.as_ref())?;
        if let Some(histogram) = parsed.histogram {
            append_with_track(&mut histograms, &histogram, &track, filename.as_ref())?;
        } else {
            warn!("{}: no histogram", filename.as_ref().display());
        }
    }
    Ok((metrics, histograms))
}

fn append_with_track(merged: &mut Table, table: &Table, track: &str, filename: &Path) -> Result<(), String> {
    if merged.header.is_empty() {
        merged.header.push(String::from("track"));
        merged.header.extend(table.header.iter().cloned());
    } else if merged.header[1..] != table.header[..] {
        return Err(format!("Header of {} differs from the header of the first file", filename.display()));
    }
    for row in table.rows.iter() {
        let mut full = vec![track.to_string()];
        full.extend(row.iter().cloned());
        merged.rows.push(full);
    }
    Ok(())
}

/// Returns the statement computing picard alignment summary metrics.
pub fn picard_alignment_statement<P: AsRef<Path>, Q: AsRef<Path>, R: AsRef<Path>>(
    params: &Params, bamfile: P, reference: Q, outfile: R
) -> Result<String, String> {
    Statement::new("
        %(picard_executable)s CollectAlignmentSummaryMetrics
        I=%(bamfile)s
        R=%(reference)s
        O=%(outfile)s
        VALIDATION_STRINGENCY=SILENT
        > %(outfile)s.log 2>&1
    ")
        .local("picard_executable", params.get_str_or("picard_executable", "picard"))
        .path("bamfile", bamfile)
        .path("reference", reference)
        .path("outfile", outfile)
        .build(params)
}

/// Returns the statement computing picard duplication metrics without keeping the marked BAM file.
pub fn picard_duplication_statement<P: AsRef<Path>, Q: AsRef<Path>>(
    params: &Params, bamfile: P, outfile: Q
) -> Result<String, String> {
    Statement::new("
        %(picard_executable)s MarkDuplicates
        I=%(bamfile)s
        O=/dev/null
        M=%(outfile)s
        VALIDATION_STRINGENCY=SILENT
        > %(outfile)s.log 2>&1
    ")
        .local("picard_executable", params.get_str_or("picard_executable", "picard"))
        .path("bamfile", bamfile)
        .path("outfile", outfile)
        .build(params)
}

//-----------------------------------------------------------------------------

/// Returns the statement building a bigWig coverage file scaled to reads per million mapped alignments.
pub fn bigwig_statement<P: AsRef<Path>, Q: AsRef<Path>, R: AsRef<Path>>(
    params: &Params, bamfile: P, contig_sizes: Q, outfile: R
) -> Result<String, String> {
    Statement::new("
        scale=`samtools view -c -F 4 %(bamfile)s | awk '{ print 1000000.0 / $1 }'`;
        checkpoint;
        bedtools genomecov -ibam %(bamfile)s -g %(contig_sizes)s -bg -split -scale $scale
        > %(outfile)s.bedgraph;
        checkpoint;
        bedGraphToBigWig %(outfile)s.bedgraph %(contig_sizes)s %(outfile)s;
        checkpoint;
        rm -f %(outfile)s.bedgraph
    ")
        .path("bamfile", bamfile)
        .path("contig_sizes", contig_sizes)
        .path("outfile", outfile)
        .build(params)
}

/// Builds the IGV sample information table for the files.
///
/// The header is `sample` followed by the part indexes `0`, `1`, ... of the first file name split at `-`.
/// Each row is the file name followed by its parts.
pub fn igv_sample_information<P: AsRef<Path>>(files: &[P]) -> Table {
    let mut result = Table::default();
    for filename in files {
        let name = utils::basename(filename);
        let parts: Vec<String> = name.split('-').map(String::from).collect();
        if result.header.is_empty() {
            result.header.push(String::from("sample"));
            result.header.extend((0..parts.len()).map(|x| x.to_string()));
        }
        let mut row = vec![name.clone()];
        row.extend(parts);
        result.rows.push(row);
    }
    result
}

//-----------------------------------------------------------------------------
