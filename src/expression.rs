//! Differential expression: experimental designs, statements for the expression tools, and result processing.
//!
//! A design file `design*.tsv` assigns tracks to groups.
//! Count matrices from featureCounts are analysed with DESeq, DESeq2, or EdgeR through an external runner script, and BAM files are analysed with cuffdiff.
//! Results follow a common schema (see [`DIFF_COLUMNS`]) and are loaded into tables named `<design>_<geneset>_<method>_gene_diff`.

use crate::db::{Database, LoadOptions};
use crate::params::Params;
use crate::statement::Statement;
use crate::table::Table;
use crate::utils;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;
use std::path::{Path, PathBuf};

use log::{info, warn};


//-----------------------------------------------------------------------------

/// A row in a design file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DesignEntry {
    pub track: String,
    pub include: bool,
    pub group: String,
    pub pair: i64,
}

/// An experimental design with columns `track`, `include`, `group`, and `pair`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Design {
    name: String,
    entries: Vec<DesignEntry>,
}

impl Design {
    /// Expected header of a design file.
    pub const HEADER: [&'static str; 4] = ["track", "include", "group", "pair"];

    /// Reads and validates a design file.
    ///
    /// The name of the design is the file name without `.tsv`.
    pub fn read<P: AsRef<Path>>(filename: P) -> Result<Self, String> {
        let base = utils::basename(&filename);
        let name = base.strip_suffix(".tsv").unwrap_or(base.as_str()).to_string();
        let table = Table::read_file(&filename, true)?;
        Self::from_table(&name, &table).map_err(|x| format!("{}: {}", filename.as_ref().display(), x))
    }

    /// Validates a design table.
    ///
    /// # Errors
    ///
    /// Returns an error if the header is wrong, a value is invalid, an included track appears twice, or the included tracks form fewer than two groups.
    pub fn from_table(name: &str, table: &Table) -> Result<Self, String> {
        let header: Vec<String> = table.header.iter().map(|x| x.trim().to_lowercase()).collect();
        if header.len() < Self::HEADER.len() || header[..Self::HEADER.len()] != Self::HEADER {
            return Err(format!("Design {} must have columns {}", name, Self::HEADER.join(", ")));
        }

        let mut entries = Vec::with_capacity(table.nrows());
        let mut seen = BTreeSet::new();
        for (index, row) in table.rows.iter().enumerate() {
            if row.len() < Self::HEADER.len() {
                return Err(format!("Design {} row {} has too few columns", name, index + 1));
            }
            let include = match row[1].trim() {
                "0" => false,
                "1" => true,
                other => return Err(format!("Design {} row {}: include must be 0 or 1, not {}", name, index + 1, other)),
            };
            let pair = row[3].trim().parse::<i64>().map_err(|_| {
                format!("Design {} row {}: pair must be an integer, not {}", name, index + 1, row[3])
            })?;
            let track = row[0].trim().to_string();
            if include && !seen.insert(track.clone()) {
                return Err(format!("Design {}: track {} appears more than once", name, track));
            }
            entries.push(DesignEntry { track, include, group: row[2].trim().to_string(), pair });
        }

        let result = Design { name: name.to_string(), entries };
        if result.groups().len() < 2 {
            return Err(format!("Design {} needs at least two groups", name));
        }
        Ok(result)
    }

    /// Returns the name of the design.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns all entries.
    pub fn entries(&self) -> &[DesignEntry] {
        &self.entries
    }

    /// Returns the included entries.
    pub fn included(&self) -> impl Iterator<Item = &DesignEntry> {
        self.entries.iter().filter(|x| x.include)
    }

    /// Returns the groups of the included tracks in sorted order.
    pub fn groups(&self) -> Vec<String> {
        let groups: BTreeSet<&str> = self.included().map(|x| x.group.as_str()).collect();
        groups.into_iter().map(String::from).collect()
    }

    /// Returns `true` if the design pairs samples.
    pub fn is_paired(&self) -> bool {
        self.included().any(|x| x.pair != 0)
    }

    /// Returns the group of each included track.
    pub fn group_map(&self) -> BTreeMap<String, String> {
        self.included().map(|x| (x.track.clone(), x.group.clone())).collect()
    }

    /// Returns the included tracks of each group in design order.
    pub fn tracks_by_group(&self) -> BTreeMap<String, Vec<String>> {
        let mut result: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for entry in self.included() {
            result.entry(entry.group.clone()).or_default().push(entry.track.clone());
        }
        result
    }
}

//-----------------------------------------------------------------------------

/// Differential expression methods.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DeMethod {
    Deseq,
    Deseq2,
    EdgeR,
    Cuffdiff,
}

impl DeMethod {
    pub fn parse(value: &str) -> Result<Self, String> {
        match value.trim().to_lowercase().as_str() {
            "deseq" => Ok(DeMethod::Deseq),
            "deseq2" => Ok(DeMethod::Deseq2),
            "edger" => Ok(DeMethod::EdgeR),
            "cuffdiff" => Ok(DeMethod::Cuffdiff),
            _ => Err(format!("Unknown differential expression method: {}", value)),
        }
    }

    /// Name used in directories and table names.
    pub fn name(&self) -> &'static str {
        match self {
            DeMethod::Deseq => "deseq",
            DeMethod::Deseq2 => "deseq2",
            DeMethod::EdgeR => "edger",
            DeMethod::Cuffdiff => "cuffdiff",
        }
    }

    /// Reads the methods from parameter `methods`.
    pub fn from_params(params: &Params) -> Result<Vec<Self>, String> {
        params.as_list("methods")?.iter().map(|x| Self::parse(x)).collect()
    }
}

impl Display for DeMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

//-----------------------------------------------------------------------------

// Statements.

fn runner(params: &Params) -> String {
    params.get_str_or("expression_runner", "runExpression")
}

/// Returns the statement running DESeq on a count matrix.
pub fn deseq_statement<P: AsRef<Path>, Q: AsRef<Path>, R: AsRef<Path>>(
    params: &Params, design_file: P, count_file: Q, outfile: R
) -> Result<String, String> {
    let prefix = utils::snip(&utils::path_str(&outfile), ".tsv.gz")?;
    Statement::new("
        %(runner)s
        --method=deseq
        --tags-tsv-file=%(count_file)s
        --design-tsv-file=%(design_file)s
        --output-filename-pattern=%(prefix)s.
        --outfile=%(outfile)s
        --fdr=%(deseq_fdr)f
        --deseq-fit-type=%(deseq_fit_type)s
        --deseq-dispersion-method=%(deseq_dispersion_method)s
        --deseq-sharing-mode=%(deseq_sharing_mode)s
        --filter-min-counts-per-row=%(tags_filter_min_counts_per_row)i
        --filter-min-counts-per-sample=%(tags_filter_min_counts_per_sample)i
        --filter-percentile-rowsums=%(tags_filter_percentile_rowsums)i
        > %(outfile)s.log
    ")
        .local("runner", runner(params))
        .path("design_file", design_file)
        .path("count_file", count_file)
        .path("outfile", outfile)
        .local("prefix", prefix)
        .build(params)
}

/// Returns the statement running EdgeR on a count matrix.
pub fn edger_statement<P: AsRef<Path>, Q: AsRef<Path>, R: AsRef<Path>>(
    params: &Params, design_file: P, count_file: Q, outfile: R
) -> Result<String, String> {
    let prefix = utils::snip(&utils::path_str(&outfile), ".tsv.gz")?;
    Statement::new("
        %(runner)s
        --method=edger
        --tags-tsv-file=%(count_file)s
        --design-tsv-file=%(design_file)s
        --output-filename-pattern=%(prefix)s.
        --outfile=%(outfile)s
        --fdr=%(edger_fdr)f
        --filter-min-counts-per-row=%(tags_filter_min_counts_per_row)i
        --filter-min-counts-per-sample=%(tags_filter_min_counts_per_sample)i
        --filter-percentile-rowsums=%(tags_filter_percentile_rowsums)i
        > %(outfile)s.log
    ")
        .local("runner", runner(params))
        .path("design_file", design_file)
        .path("count_file", count_file)
        .path("outfile", outfile)
        .local("prefix", prefix)
        .build(params)
}

/// Returns the statement running DESeq2 on a count matrix.
pub fn deseq2_statement<P: AsRef<Path>, Q: AsRef<Path>, R: AsRef<Path>>(
    params: &Params, design_file: P, count_file: Q, outfile: R
) -> Result<String, String> {
    let prefix = utils::snip(&utils::path_str(&outfile), ".tsv.gz")?;
    Statement::new("
        %(runner)s
        --method=deseq2
        --outfile=%(outfile)s
        --output-filename-pattern=%(prefix)s_
        --fdr=%(deseq2_fdr)f
        --tags-tsv-file=%(count_file)s
        --design-tsv-file=%(design_file)s
        --deseq2-design-formula=%(deseq2_model)s
        --deseq2-contrasts=%(deseq2_contrasts)s
        --filter-min-counts-per-row=%(tags_filter_min_counts_per_row)i
        --filter-min-counts-per-sample=%(tags_filter_min_counts_per_sample)i
        --filter-percentile-rowsums=%(deseq2_filter_percentile_rowsums)i
        > %(outfile)s.log
    ")
        .local("runner", runner(params))
        .path("design_file", design_file)
        .path("count_file", count_file)
        .path("outfile", outfile)
        .local("prefix", prefix)
        .build(params)
}

/// Returns the statement running cuffdiff for a design.
///
/// The groups of the design are the labels, and the BAM files `<bam_dir>/<track>.bam` of each group are given in label order.
/// The cuffdiff output directory is `<outfile without .fpkm.tsv.gz>.dir`, and the gene FPKM table is copied to `outfile`.
pub fn cuffdiff_statement<P: AsRef<Path>, Q: AsRef<Path>, R: AsRef<Path>>(
    params: &Params, design: &Design, bam_dir: P, geneset: Q, outfile: R, mask: Option<&Path>
) -> Result<String, String> {
    let outdir = cuffdiff_dir(&outfile)?;
    let groups = design.tracks_by_group();
    let labels: Vec<&str> = groups.keys().map(|x| x.as_str()).collect();
    let bamfiles: Vec<String> = groups.values().map(|tracks| {
        let files: Vec<String> = tracks.iter().map(|x| utils::path_str(bam_dir.as_ref().join(format!("{}.bam", x)))).collect();
        files.join(",")
    }).collect();
    let mask_option = match mask {
        Some(mask) => format!("--mask-file {}", mask.display()),
        None => String::new(),
    };

    Statement::new("
        mkdir -p %(outdir)s;
        %(cuffdiff_executable)s
        --output-dir %(outdir)s
        --verbose
        --num-threads %(cuffdiff_threads)i
        --labels %(labels)s
        --FDR %(cuffdiff_fdr)f
        --library-type %(cufflinks_library_type)s
        %(mask_option)s
        %(cuffdiff_options)s
        <(zcat %(geneset)s)
        %(bamfiles)s
        > %(outfile)s.log 2>&1;
        checkpoint;
        gzip -c %(outdir)s/genes.fpkm_tracking > %(outfile)s
    ")
        .local("outdir", utils::path_str(&outdir))
        .local("cuffdiff_executable", params.get_str_or("cuffdiff_executable", "cuffdiff"))
        .local("cuffdiff_threads", params.get_int_or("cuffdiff_threads", 4)?)
        .local("cuffdiff_options", params.get_str_or("cuffdiff_options", ""))
        .local("labels", labels.join(","))
        .local("mask_option", mask_option)
        .path("geneset", geneset)
        .local("bamfiles", bamfiles.join(" "))
        .path("outfile", outfile)
        .build(params)
}

/// Returns the cuffdiff output directory for the output file `<name>.fpkm.tsv.gz`.
pub fn cuffdiff_dir<P: AsRef<Path>>(outfile: P) -> Result<PathBuf, String> {
    let prefix = utils::snip(&utils::path_str(outfile), ".fpkm.tsv.gz")?;
    Ok(PathBuf::from(format!("{}.dir", prefix)))
}

/// Returns the statement estimating expression levels with cufflinks.
///
/// The log is written to `outfile`, and the tracking files to `<outfile>.genes.fpkm_tracking` and `<outfile>.isoforms.fpkm_tracking`.
pub fn cufflinks_statement<P: AsRef<Path>, Q: AsRef<Path>, R: AsRef<Path>>(
    params: &Params, geneset: P, bamfile: Q, outfile: R, mask: Option<&Path>
) -> Result<String, String> {
    let mask_option = match mask {
        Some(mask) => format!("--mask-file {}", mask.display()),
        None => String::new(),
    };
    Statement::new("
        rm -rf %(outfile)s.dir; mkdir -p %(outfile)s.dir;
        %(cufflinks_executable)s
        --GTF <(zcat %(geneset)s)
        --num-threads %(cufflinks_threads)i
        --library-type %(cufflinks_library_type)s
        %(mask_option)s
        %(cufflinks_options)s
        --output-dir %(outfile)s.dir
        %(bamfile)s
        > %(outfile)s 2>&1;
        checkpoint;
        mv %(outfile)s.dir/genes.fpkm_tracking %(outfile)s.genes.fpkm_tracking;
        checkpoint;
        mv %(outfile)s.dir/isoforms.fpkm_tracking %(outfile)s.isoforms.fpkm_tracking;
        checkpoint;
        rm -rf %(outfile)s.dir
    ")
        .local("cufflinks_executable", params.get_str_or("cufflinks_executable", "cufflinks"))
        .local("cufflinks_threads", params.get_int_or("cufflinks_threads", 4)?)
        .local("cufflinks_options", params.get_str_or("cufflinks_options", ""))
        .local("mask_option", mask_option)
        .path("geneset", geneset)
        .path("bamfile", bamfile)
        .path("outfile", outfile)
        .build(params)
}

/// Returns the statement counting reads per gene with featureCounts.
///
/// Paired-end BAM files are detected from the first alignment and counted by fragment with `-p`.
/// The counts are written to `outfile` (`.tsv.gz`) and the summary to `<outfile without .gz>.summary`.
pub fn featurecounts_statement<P: AsRef<Path>, Q: AsRef<Path>, R: AsRef<Path>>(
    params: &Params, geneset: P, bamfile: Q, outfile: R
) -> Result<String, String> {
    let prefix = utils::snip(&utils::path_str(&outfile), ".gz")?;
    Statement::new("
        zcat %(geneset)s > %(prefix)s.gtf;
        checkpoint;
        paired=`samtools view -f 1 %(bamfile)s 2> /dev/null | head -n 1 | wc -l`;
        if [ $paired -gt 0 ]; then paired_option=-p; else paired_option=; fi;
        %(featurecounts_executable)s
        -T %(featurecounts_threads)i
        -s %(featurecounts_strand)s
        $paired_option
        %(featurecounts_options)s
        -a %(prefix)s.gtf
        -o %(prefix)s
        %(bamfile)s
        > %(outfile)s.log 2>&1;
        checkpoint;
        gzip -c %(prefix)s > %(outfile)s;
        checkpoint;
        rm -f %(prefix)s %(prefix)s.gtf
    ")
        .local("featurecounts_executable", params.get_str_or("featurecounts_executable", "featureCounts"))
        .local("featurecounts_threads", params.get_int_or("featurecounts_threads", 1)?)
        .local("featurecounts_strand", params.get_str_or("featurecounts_strand", "0"))
        .local("featurecounts_options", params.get_str_or("featurecounts_options", ""))
        .path("geneset", geneset)
        .path("bamfile", bamfile)
        .path("outfile", outfile)
        .local("prefix", prefix)
        .build(params)
}

/// Features that reads are counted over with `gtf2table`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CountLevel {
    Gene,
    Transcript,
}

impl CountLevel {
    /// Returns the `gtf2table` reporter.
    pub fn reporter(&self) -> &'static str {
        match self {
            CountLevel::Gene => "genes",
            CountLevel::Transcript => "transcripts",
        }
    }

    /// Returns the identifier column of the output.
    pub fn key(&self) -> &'static str {
        match self {
            CountLevel::Gene => "gene_id",
            CountLevel::Transcript => "transcript_id",
        }
    }
}

/// Returns the statement counting reads and coverage per gene or transcript.
///
/// Reads are counted by pair in paired-end BAM files, and multi-mapping reads are ignored.
pub fn read_counts_statement<P: AsRef<Path>, Q: AsRef<Path>, R: AsRef<Path>>(
    params: &Params, level: CountLevel, geneset: P, bamfile: Q, outfile: R
) -> Result<String, String> {
    Statement::new("
        paired=`samtools view -f 1 %(bamfile)s 2> /dev/null | head -n 1 | wc -l`;
        if [ $paired -gt 0 ]; then counter=readpair-counts; else counter=read-counts; fi;
        zcat %(geneset)s
        | %(counting_executable)s
        --reporter=%(reporter)s
        --bam-file=%(bamfile)s
        --counter=length
        --column-prefix=exons_
        --counter=$counter
        --column-prefix=
        --counter=read-coverage
        --column-prefix=coverage_
        --min-mapping-quality=%(min_mapping_quality)i
        --multi-mapping-method=ignore
        --log=%(outfile)s.log
        | gzip
        > %(outfile)s
    ")
        .local("counting_executable", params.get_str_or("counting_executable", "gtf2table"))
        .local("reporter", level.reporter())
        .local("min_mapping_quality", params.get_int_or("counting_min_mapping_quality", 0)?)
        .path("geneset", geneset)
        .path("bamfile", bamfile)
        .path("outfile", outfile)
        .build(params)
}

/// Returns the statement plotting count statistics of a matrix within a design.
pub fn plot_tag_stats_statement<P: AsRef<Path>, Q: AsRef<Path>, R: AsRef<Path>>(
    params: &Params, design_file: P, count_file: Q, outfile: R
) -> Result<String, String> {
    Statement::new("
        %(runner)s
        --method=plottagstats
        --tags-tsv-file=%(count_file)s
        --design-tsv-file=%(design_file)s
        --output-filename-pattern=%(outfile)s
        > %(outfile)s
    ")
        .local("runner", runner(params))
        .path("design_file", design_file)
        .path("count_file", count_file)
        .path("outfile", outfile)
        .build(params)
}

/// Returns the statement plotting the results of a differential expression run.
pub fn plot_de_tag_stats_statement<P: AsRef<Path>, Q: AsRef<Path>>(
    params: &Params, result_file: P, outfile: Q
) -> Result<String, String> {
    Statement::new("
        %(runner)s
        --method=plotdetagstats
        --result-tsv-file=%(result_file)s
        --output-filename-pattern=%(outfile)s
        > %(outfile)s
    ")
        .local("runner", runner(params))
        .path("result_file", result_file)
        .path("outfile", outfile)
        .build(params)
}

/// Combines featureCounts summaries `<track>.<geneset>.tsv.summary` into a table with one row per file.
///
/// The columns are `track` followed by the assignment categories of the first file.
/// A category missing from a later file is counted as 0.
pub fn featurecounts_summary<P: AsRef<Path>>(files: &[P]) -> Result<Table, String> {
    let mut result = Table::new(vec![String::from("track")], Vec::with_capacity(files.len()));
    for (index, filename) in files.iter().enumerate() {
        let track = utils::snip(&utils::basename(filename), ".tsv.summary")?;
        let summary = Table::read_file(filename, true)?;
        if index == 0 {
            result.header.extend(summary.rows.iter().filter_map(|row| row.first().cloned()));
        }
        let mut row = vec![track];
        for category in result.header[1..].iter() {
            let count = summary.rows.iter().find(|x| x.first() == Some(category)).and_then(|x| x.get(1));
            row.push(count.cloned().unwrap_or_else(|| String::from("0")));
        }
        result.rows.push(row);
    }
    Ok(result)
}

//-----------------------------------------------------------------------------

/// Adjusts p-values for multiple testing with the Benjamini-Hochberg procedure.
///
/// Missing and NaN values are passed through and do not count as tests.
/// The adjusted values are monotone in the p-values and at most 1.
pub fn benjamini_hochberg(pvalues: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut order: Vec<usize> = (0..pvalues.len()).filter(|&i| pvalues[i].map(|x| !x.is_nan()).unwrap_or(false)).collect();
    let tests = order.len();
    order.sort_by(|&a, &b| pvalues[a].unwrap_or(0.0).total_cmp(&pvalues[b].unwrap_or(0.0)));

    let mut result: Vec<Option<f64>> = pvalues.iter().map(|x| x.filter(|p| p.is_nan())).collect();
    let mut running_min = 1.0_f64;
    for (rank, &index) in order.iter().enumerate().rev() {
        let pvalue = pvalues[index].unwrap_or(0.0);
        let adjusted = pvalue * (tests as f64) / ((rank + 1) as f64);
        running_min = running_min.min(adjusted);
        result[index] = Some(running_min);
    }
    result
}

/// Replaces the per-contrast `padj` column of a DESeq2 result with `padj_global`.
///
/// `padj_global` is computed with [`benjamini_hochberg`] over the `pvalue` column of all contrasts.
/// Missing p-values (from outlier detection) stay missing.
/// Returns the number of rows.
pub fn adjust_deseq2<P: AsRef<Path>, Q: AsRef<Path>>(infile: P, outfile: Q) -> Result<usize, String> {
    let mut table = Table::read_file(&infile, true)?;
    let pvalue_column = table.column_index("pvalue").ok_or_else(|| {
        format!("{}: no pvalue column", infile.as_ref().display())
    })?;
    let pvalues: Vec<Option<f64>> = table.rows.iter().map(|row| {
        row.get(pvalue_column).and_then(|x| x.parse::<f64>().ok())
    }).collect();
    let adjusted = benjamini_hochberg(&pvalues);

    let padj_column = table.column_index("padj");
    if let Some(column) = padj_column {
        table.header.remove(column);
    }
    table.header.push(String::from("padj_global"));
    for (row, value) in table.rows.iter_mut().zip(adjusted) {
        if let Some(column) = padj_column {
            if column < row.len() {
                row.remove(column);
            }
        }
        row.push(value.filter(|x| !x.is_nan()).map(|x| x.to_string()).unwrap_or_else(|| String::from("NA")));
    }
    table.write_file(&outfile)?;
    Ok(table.nrows())
}

//-----------------------------------------------------------------------------

/// Columns of differential expression results.
pub const DIFF_COLUMNS: [&str; 11] = [
    "test_id", "treatment_name", "control_name", "treatment_mean", "control_mean",
    "pvalue", "qvalue", "l2fold", "fold", "significant", "status",
];

/// Levels of cuffdiff results.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CuffdiffLevel {
    Gene,
    Isoform,
    Cds,
    Tss,
}

impl CuffdiffLevel {
    pub const ALL: [CuffdiffLevel; 4] = [CuffdiffLevel::Gene, CuffdiffLevel::Isoform, CuffdiffLevel::Cds, CuffdiffLevel::Tss];

    /// Name of the level in table names.
    pub fn name(&self) -> &'static str {
        match self {
            CuffdiffLevel::Gene => "gene",
            CuffdiffLevel::Isoform => "isoform",
            CuffdiffLevel::Cds => "cds",
            CuffdiffLevel::Tss => "tss",
        }
    }

    /// Name of the cuffdiff output file for the level.
    pub fn filename(&self) -> &'static str {
        match self {
            CuffdiffLevel::Gene => "gene_exp.diff",
            CuffdiffLevel::Isoform => "isoform_exp.diff",
            CuffdiffLevel::Cds => "cds_exp.diff",
            CuffdiffLevel::Tss => "tss_group_exp.diff",
        }
    }
}

/// Converts a cuffdiff `*_exp.diff` file into the common differential expression schema.
///
/// Status becomes `NOCALL` when either mean is below `fpkm_silent`.
/// Fold changes are `2^l2fold`; infinite or undefined log fold changes become 0 with status `NOCALL`.
/// `significant` is 1 for `yes` and 0 otherwise.
pub fn parse_cuffdiff<P: AsRef<Path>>(filename: P, fpkm_silent: f64) -> Result<Table, String> {
    let table = Table::read_file(&filename, true)?;
    let column = |name: &str| -> Result<usize, String> {
        table.column_index(name).ok_or_else(|| format!("{}: no column {}", filename.as_ref().display(), name))
    };
    let test_id = column("test_id")?;
    let sample_1 = column("sample_1")?;
    let sample_2 = column("sample_2")?;
    let status = column("status")?;
    let value_1 = column("value_1")?;
    let value_2 = column("value_2")?;
    let l2fold = table.header.iter().position(|x| x.starts_with("log2(fold_change)")).ok_or_else(|| {
        format!("{}: no log2 fold change column", filename.as_ref().display())
    })?;
    let p_value = column("p_value")?;
    let q_value = column("q_value")?;
    let significant = column("significant")?;

    let mut result = Table::new(DIFF_COLUMNS.iter().map(|x| x.to_string()).collect(), Vec::with_capacity(table.nrows()));
    for row in table.rows.iter() {
        let cell = |index: usize| row.get(index).map(|x| x.as_str()).unwrap_or("");
        let treatment_mean: f64 = cell(value_1).parse().unwrap_or(0.0);
        let control_mean: f64 = cell(value_2).parse().unwrap_or(0.0);
        let mut row_status = cell(status).to_string();
        if treatment_mean < fpkm_silent || control_mean < fpkm_silent {
            row_status = String::from("NOCALL");
        }
        let mut log_fold: f64 = cell(l2fold).parse().unwrap_or(f64::NAN);
        if !log_fold.is_finite() {
            log_fold = 0.0;
            row_status = String::from("NOCALL");
        }
        let is_significant = if cell(significant) == "yes" { "1" } else { "0" };
        result.rows.push(vec![
            cell(test_id).to_string(),
            cell(sample_1).to_string(),
            cell(sample_2).to_string(),
            treatment_mean.to_string(),
            control_mean.to_string(),
            cell(p_value).to_string(),
            cell(q_value).to_string(),
            log_fold.to_string(),
            log_fold.exp2().to_string(),
            is_significant.to_string(),
            row_status,
        ]);
    }
    Ok(result)
}

/// Loads all cuffdiff levels from the output directory into tables `<prefix>_<level>_diff`.
///
/// Returns the total number of rows loaded.
/// Missing level files are skipped with a warning.
pub fn load_cuffdiff<P: AsRef<Path>>(database: &mut Database, outdir: P, prefix: &str, fpkm_silent: f64) -> Result<usize, String> {
    let mut total = 0;
    for level in CuffdiffLevel::ALL {
        let filename = outdir.as_ref().join(level.filename());
        if !utils::file_exists(&filename) {
            warn!("Cuffdiff output {} does not exist", filename.display());
            continue;
        }
        let table = parse_cuffdiff(&filename, fpkm_silent)?;
        let name = format!("{}_{}_diff", prefix, level.name());
        let options = LoadOptions { allow_empty: true, ..LoadOptions::with_index(&["test_id"]) };
        total += database.load_table(&table, &name, &options)?;
    }
    Ok(total)
}

//-----------------------------------------------------------------------------

/// Summary statistics of a count matrix.
#[derive(Clone, Debug, PartialEq)]
pub struct CountSummary {
    /// Per track: `track`, `total`, `nfeatures`, `min`, `max`, `median`, `mean`.
    pub stats: Table,
    /// Pearson correlations of `log2(count + 1)` between the tracks.
    pub correlation: Table,
}

/// Summarizes a count matrix with the feature id in the first column and one column per track.
///
/// `nfeatures` is the number of features with a non-zero count.
/// Rows with non-numeric counts are skipped.
pub fn count_summary(matrix: &Table) -> Result<CountSummary, String> {
    if matrix.header.len() < 2 {
        return Err(String::from("Count matrix has no tracks"));
    }
    let tracks: Vec<String> = matrix.header[1..].to_vec();
    let mut columns: Vec<Vec<f64>> = vec![Vec::new(); tracks.len()];
    let mut skipped = 0;
    for row in matrix.rows.iter() {
        let values: Option<Vec<f64>> = (1..matrix.header.len()).map(|i| row.get(i).and_then(|x| x.parse::<f64>().ok())).collect();
        match values {
            Some(values) => {
                for (column, value) in columns.iter_mut().zip(values) {
                    column.push(value);
                }
            },
            None => skipped += 1,
        }
    }
    if skipped > 0 {
        warn!("Skipped {} rows with non-numeric counts", skipped);
    }

    let mut stats = Table::new(
        ["track", "total", "nfeatures", "min", "max", "median", "mean"].iter().map(|x| x.to_string()).collect(),
        Vec::with_capacity(tracks.len())
    );
    for (track, values) in tracks.iter().zip(columns.iter()) {
        let total: f64 = values.iter().sum();
        let nfeatures = values.iter().filter(|x| **x > 0.0).count();
        let mut sorted = values.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let (min, max, median, mean) = if sorted.is_empty() {
            (0.0, 0.0, 0.0, 0.0)
        } else {
            (sorted[0], sorted[sorted.len() - 1], median_of(&sorted), total / sorted.len() as f64)
        };
        stats.rows.push(vec![
            track.clone(), format_number(total), nfeatures.to_string(),
            format_number(min), format_number(max), format_number(median), format_number(mean),
        ]);
    }

    let logs: Vec<Vec<f64>> = columns.iter().map(|x| x.iter().map(|v| (v + 1.0).log2()).collect()).collect();
    let mut header = vec![String::from("track")];
    header.extend(tracks.iter().cloned());
    let mut correlation = Table::new(header, Vec::with_capacity(tracks.len()));
    for (i, track) in tracks.iter().enumerate() {
        let mut row = vec![track.clone()];
        for j in 0..tracks.len() {
            row.push(match pearson(&logs[i], &logs[j]) {
                Some(r) => format!("{:.6}", r),
                None => String::from("NA"),
            });
        }
        correlation.rows.push(row);
    }

    Ok(CountSummary { stats, correlation })
}

/// Summarizes the count matrix restricted to the included tracks of the design.
///
/// # Errors
///
/// Returns an error if an included track is not in the matrix.
pub fn count_summary_for_design(matrix: &Table, design: &Design) -> Result<CountSummary, String> {
    let mut selected = vec![0];
    for entry in design.included() {
        let column = matrix.column_index(&entry.track).ok_or_else(|| {
            format!("Track {} of design {} is not in the count matrix", entry.track, design.name())
        })?;
        selected.push(column);
    }
    let header = selected.iter().map(|&i| matrix.header[i].clone()).collect();
    let rows = matrix.rows.iter().map(|row| {
        selected.iter().map(|&i| row.get(i).cloned().unwrap_or_default()).collect()
    }).collect();
    count_summary(&Table::new(header, rows))
}

fn median_of(sorted: &[f64]) -> f64 {
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 { (sorted[mid - 1] + sorted[mid]) / 2.0 } else { sorted[mid] }
}

fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }
    let n = x.len() as f64;
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;
    let mut covariance = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (a, b) in x.iter().zip(y.iter()) {
        covariance += (a - mean_x) * (b - mean_y);
        var_x += (a - mean_x) * (a - mean_x);
        var_y += (b - mean_y) * (b - mean_y);
    }
    if var_x == 0.0 || var_y == 0.0 {
        return None;
    }
    Some(covariance / (var_x * var_y).sqrt())
}

// Integers without decimals, other values with two.
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{:.2}", value)
    }
}

//-----------------------------------------------------------------------------

/// Counts tests and significant results in differential expression tables.
///
/// The output has columns `tablename`, `tested`, `ok`, `significant`, `up`, and `down`.
/// Up and down count significant results with positive and negative log fold change.
/// Tables that do not exist are skipped with a warning.
pub fn expression_stats<S: AsRef<str>>(database: &Database, tables: &[S]) -> Result<Table, String> {
    let mut result = Table::new(
        ["tablename", "tested", "ok", "significant", "up", "down"].iter().map(|x| x.to_string()).collect(),
        Vec::new()
    );
    for table in tables {
        let table = table.as_ref();
        if !database.table_exists(table)? {
            warn!("Table {} does not exist", table);
            continue;
        }
        let sql = format!(
            "SELECT COUNT(*), \
            COALESCE(SUM(status = 'OK'), 0), \
            COALESCE(SUM(significant = 1), 0), \
            COALESCE(SUM(significant = 1 AND l2fold > 0), 0), \
            COALESCE(SUM(significant = 1 AND l2fold < 0), 0) \
            FROM {}",
            crate::db::quote(table)
        );
        let query = database.query(&sql)?;
        let mut row = vec![table.to_string()];
        if let Some(values) = query.rows.first() {
            row.extend(values.iter().map(|x| x.to_string()));
        }
        info!("{}: {}", table, row[1..].join(" "));
        result.rows.push(row);
    }
    Ok(result)
}

//-----------------------------------------------------------------------------
