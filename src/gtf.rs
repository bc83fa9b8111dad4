//! GTF gene sets.
//!
//! Most gene set processing is done by external tools.
//! This module covers the parts the pipelines do themselves: splice junctions for the spliced mappers, gene statistics, mask files for cufflinks, and coding exon sets.
//!
//! Coordinates are 1-based and inclusive, as in the GTF format.

use crate::table::Table;
use crate::utils;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt::Display;
use std::io::{BufRead, Write};
use std::path::Path;

use log::{info, warn};

#[cfg(test)]
mod tests;

//-----------------------------------------------------------------------------

/// A GTF record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GtfEntry {
    pub contig: String,
    pub source: String,
    pub feature: String,
    pub start: usize,
    pub end: usize,
    pub score: String,
    pub strand: String,
    pub frame: String,
    /// Attributes in the original order.
    pub attributes: Vec<(String, String)>,
}

impl GtfEntry {
    /// Parses a GTF line.
    pub fn parse(line: &str) -> Result<Self, String> {
        let fields: Vec<&str> = line.trim_end_matches(['\r', '\n']).split('\t').collect();
        if fields.len() < 9 {
            return Err(format!("Expected 9 fields, found {}", fields.len()));
        }
        let start = fields[3].parse::<usize>().map_err(|_| format!("Invalid start: {}", fields[3]))?;
        let end = fields[4].parse::<usize>().map_err(|_| format!("Invalid end: {}", fields[4]))?;
        if start == 0 {
            return Err(String::from("Start 0 in 1-based coordinates"));
        }
        if end < start {
            return Err(format!("End {} is before start {}", end, start));
        }

        let mut attributes = Vec::new();
        for attribute in fields[8].split(';') {
            let attribute = attribute.trim();
            if attribute.is_empty() {
                continue;
            }
            let (key, value) = attribute.split_once(char::is_whitespace).ok_or_else(|| {
                format!("Invalid attribute: {}", attribute)
            })?;
            attributes.push((key.to_string(), value.trim().trim_matches('"').to_string()));
        }

        Ok(GtfEntry {
            contig: fields[0].to_string(),
            source: fields[1].to_string(),
            feature: fields[2].to_string(),
            start, end,
            score: fields[5].to_string(),
            strand: fields[6].to_string(),
            frame: fields[7].to_string(),
            attributes,
        })
    }

    /// Returns the value of the attribute, or [`None`] if the entry does not have it.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    /// Returns the gene identifier.
    pub fn gene_id(&self) -> Option<&str> {
        self.attribute("gene_id")
    }

    /// Returns the transcript identifier.
    pub fn transcript_id(&self) -> Option<&str> {
        self.attribute("transcript_id")
    }

    /// Returns the length of the interval.
    pub fn length(&self) -> usize {
        self.end + 1 - self.start
    }

    /// Returns a copy of the entry with only the given attributes, in the given order.
    pub fn with_attributes(&self, keys: &[&str]) -> Self {
        let attributes = keys.iter().filter_map(|key| {
            self.attribute(key).map(|value| (key.to_string(), value.to_string()))
        }).collect();
        GtfEntry { attributes, ..self.clone() }
    }
}

impl Display for GtfEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t",
            self.contig, self.source, self.feature, self.start, self.end,
            self.score, self.strand, self.frame
        )?;
        let attributes: Vec<String> = self.attributes.iter().map(|(k, v)| format!("{} \"{}\";", k, v)).collect();
        write!(f, "{}", attributes.join(" "))
    }
}

//-----------------------------------------------------------------------------

/// Reads a possibly gzip-compressed GTF file.
///
/// Comment lines and empty lines are skipped.
/// Parse errors name the line number.
pub fn read_gtf<P: AsRef<Path>>(filename: P) -> Result<Vec<GtfEntry>, String> {
    let reader = utils::open_file(&filename)?;
    let mut result = Vec::new();
    for (line_num, line) in reader.lines().enumerate() {
        let line = line.map_err(|x| format!("{}: {}", filename.as_ref().display(), x))?;
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let entry = GtfEntry::parse(&line).map_err(|x| {
            format!("{}, line {}: {}", filename.as_ref().display(), line_num + 1, x)
        })?;
        result.push(entry);
    }
    Ok(result)
}

/// Writes the entries to a GTF file, compressing it if the name ends with `.gz`.
pub fn write_gtf<'a, P, I>(entries: I, filename: P) -> Result<usize, String>
    where P: AsRef<Path>, I: IntoIterator<Item = &'a GtfEntry>
{
    let mut output = utils::create_file(&filename)?;
    let mut written = 0;
    for entry in entries {
        writeln!(output, "{}", entry).map_err(|x| format!("{}: {}", filename.as_ref().display(), x))?;
        written += 1;
    }
    output.flush().map_err(|x| x.to_string())?;
    Ok(written)
}

/// Groups the entries by transcript identifier in order of first appearance.
///
/// Entries without a transcript identifier are skipped.
pub fn transcripts(entries: &[GtfEntry]) -> Vec<(String, Vec<&GtfEntry>)> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut result: Vec<(String, Vec<&GtfEntry>)> = Vec::new();
    for entry in entries {
        let Some(id) = entry.transcript_id() else { continue; };
        match index.get(id) {
            Some(&i) => result[i].1.push(entry),
            None => {
                index.insert(id, result.len());
                result.push((id.to_string(), vec![entry]));
            },
        }
    }
    result
}

//-----------------------------------------------------------------------------

/// Returns the splice junctions of the transcripts as sorted unique lines.
///
/// Each line is `contig`, last retained residue of the upstream exon, first retained residue of the downstream exon, and `strand`, with 0-based coordinates.
pub fn junctions(entries: &[GtfEntry]) -> Vec<String> {
    let mut result = BTreeSet::new();
    for (_, members) in transcripts(entries) {
        let mut exons: Vec<&GtfEntry> = members.into_iter().filter(|x| x.feature == "exon").collect();
        exons.sort_by_key(|x| x.start);
        for pair in exons.windows(2) {
            result.insert(format!("{}\t{}\t{}\t{}", pair[1].contig, pair[0].end - 1, pair[1].start - 1, pair[1].strand));
        }
    }
    result.into_iter().collect()
}

/// Writes the splice junctions of the gene set and returns the number of junctions.
pub fn build_junctions<P: AsRef<Path>, Q: AsRef<Path>>(infile: P, outfile: Q) -> Result<usize, String> {
    let entries = read_gtf(&infile)?;
    let lines = junctions(&entries);
    if lines.is_empty() {
        warn!("No junctions found in {}", infile.as_ref().display());
    } else {
        info!("Found {} junctions in {}", lines.len(), infile.as_ref().display());
    }
    let mut output = utils::create_file(&outfile)?;
    for line in lines.iter() {
        writeln!(output, "{}", line).map_err(|x| x.to_string())?;
    }
    output.flush().map_err(|x| x.to_string())?;
    Ok(lines.len())
}

//-----------------------------------------------------------------------------

/// Statistics for a gene.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeneStats {
    pub gene_id: String,
    pub contig: String,
    pub strand: String,
    pub start: usize,
    pub end: usize,
    pub transcripts: usize,
    pub exons: usize,
    /// Total length of the exons after merging overlapping ones.
    pub exonic_length: usize,
    pub biotype: String,
}

/// Computes statistics for each gene in order of first appearance.
///
/// The biotype is the `gene_biotype` attribute if present and the source otherwise.
pub fn gene_stats(entries: &[GtfEntry]) -> Vec<GeneStats> {
    let mut order: Vec<&str> = Vec::new();
    let mut genes: HashMap<&str, Vec<&GtfEntry>> = HashMap::new();
    for entry in entries {
        let Some(id) = entry.gene_id() else { continue; };
        genes.entry(id).or_insert_with(|| { order.push(id); Vec::new() }).push(entry);
    }

    order.into_iter().map(|id| {
        let members = &genes[id];
        let first = members[0];
        let transcripts: BTreeSet<&str> = members.iter().filter_map(|x| x.transcript_id()).collect();
        let exons: Vec<(usize, usize)> = members.iter().filter(|x| x.feature == "exon").map(|x| (x.start, x.end)).collect();
        let exonic_length = merge_intervals(exons.clone()).iter().map(|(s, e)| e + 1 - s).sum();
        GeneStats {
            gene_id: id.to_string(),
            contig: first.contig.clone(),
            strand: first.strand.clone(),
            start: members.iter().map(|x| x.start).min().unwrap_or(first.start),
            end: members.iter().map(|x| x.end).max().unwrap_or(first.end),
            transcripts: transcripts.len(),
            exons: exons.len(),
            exonic_length,
            biotype: first.attribute("gene_biotype").unwrap_or(&first.source).to_string(),
        }
    }).collect()
}

/// Returns the gene statistics as a table.
pub fn gene_stats_table(stats: &[GeneStats]) -> Table {
    let header = ["gene_id", "contig", "strand", "start", "end", "ntranscripts", "nexons", "exonic_length", "gene_biotype"];
    let rows = stats.iter().map(|x| vec![
        x.gene_id.clone(), x.contig.clone(), x.strand.clone(),
        x.start.to_string(), x.end.to_string(),
        x.transcripts.to_string(), x.exons.to_string(), x.exonic_length.to_string(),
        x.biotype.clone(),
    ]).collect();
    Table::new(header.iter().map(|x| x.to_string()).collect(), rows)
}

// Merges overlapping and adjacent intervals.
fn merge_intervals(mut intervals: Vec<(usize, usize)>) -> Vec<(usize, usize)> {
    intervals.sort_unstable();
    let mut result: Vec<(usize, usize)> = Vec::with_capacity(intervals.len());
    for (start, end) in intervals {
        match result.last_mut() {
            Some(last) if start <= last.1 + 1 => last.1 = last.1.max(end),
            _ => result.push((start, end)),
        }
    }
    result
}

//-----------------------------------------------------------------------------

/// Reads gene identifiers from the first column of a tsv file with a header.
pub fn read_gene_ids<P: AsRef<Path>>(filename: P) -> Result<HashSet<String>, String> {
    let table = Table::read_file(&filename, true)?;
    Ok(table.rows.into_iter().filter_map(|row| row.into_iter().next()).filter(|x| !x.is_empty()).collect())
}

/// Returns the entries belonging to the given genes.
pub fn filter_by_genes<'a>(entries: &'a [GtfEntry], gene_ids: &HashSet<String>) -> Vec<&'a GtfEntry> {
    entries.iter().filter(|x| x.gene_id().map(|id| gene_ids.contains(id)).unwrap_or(false)).collect()
}

/// Writes the entries of the given genes with only `transcript_id` and `gene_id` attributes.
///
/// Returns the number of entries written.
pub fn write_mask<P: AsRef<Path>>(entries: &[GtfEntry], gene_ids: &HashSet<String>, outfile: P) -> Result<usize, String> {
    let masked: Vec<GtfEntry> = filter_by_genes(entries, gene_ids).into_iter().map(|x| {
        let mut entry = x.with_attributes(&["transcript_id", "gene_id"]);
        entry.score = String::from(".");
        entry.frame = String::from(".");
        entry
    }).collect();
    write_gtf(masked.iter(), outfile)
}

/// Returns the coding exons of each gene.
///
/// CDS entries are relabeled as exons, and overlapping or adjacent intervals are merged within each gene.
/// The transcript identifier of the merged exons is the gene identifier.
pub fn coding_exons(entries: &[GtfEntry]) -> Vec<GtfEntry> {
    let mut order: Vec<&str> = Vec::new();
    let mut genes: BTreeMap<&str, Vec<&GtfEntry>> = BTreeMap::new();
    for entry in entries.iter().filter(|x| x.feature == "CDS") {
        let Some(id) = entry.gene_id() else { continue; };
        genes.entry(id).or_insert_with(|| { order.push(id); Vec::new() }).push(entry);
    }

    let mut result = Vec::new();
    for id in order {
        let members = &genes[id];
        let first = members[0];
        let intervals = merge_intervals(members.iter().map(|x| (x.start, x.end)).collect());
        for (start, end) in intervals {
            result.push(GtfEntry {
                contig: first.contig.clone(),
                source: first.source.clone(),
                feature: String::from("exon"),
                start, end,
                score: String::from("."),
                strand: first.strand.clone(),
                frame: String::from("."),
                attributes: vec![
                    (String::from("gene_id"), id.to_string()),
                    (String::from("transcript_id"), id.to_string()),
                ],
            });
        }
    }
    result
}

//-----------------------------------------------------------------------------
