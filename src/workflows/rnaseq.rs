//! The RNA-seq differential expression pipeline.
//!
//! Inputs in the working directory:
//!
//! * `*.bam`: mapped reads, one track per file (in the input directory);
//! * `*.gtf.gz`: gene sets, one count matrix per gene set;
//! * `design*.tsv`: experimental designs (see [`Design`]).
//!
//! Reads are counted per gene with featureCounts and aggregated into `featurecounts.dir/<geneset>.featurecounts.tsv.gz`.
//! Read counts and coverage per gene are also computed with `gtf2table` and aggregated into `genecounts.dir/<geneset>.genecounts.tsv.gz`.
//! Transcript-level counts are only built on request (stage `loadTranscriptLevelReadCounts`).
//! Each differential expression method in parameter `methods` is run for every design and gene set, and the results are loaded into tables `<design>_<geneset>_<method>_gene_diff`.
//!
//! Targets: `counting`, `expression`, `diff_expression`, `qc`, and `full`.

use super::Workspace;

use crate::db::{self, LoadOptions, TrackPattern};
use crate::expression::{self, CountLevel, DeMethod, Design};
use crate::gtf;
use crate::table::{self, Table};
use crate::tasks::{Job, Pipeline, Stage};
use crate::tracks;
use crate::utils;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use log::{info, warn};
use regex::Regex;

//-----------------------------------------------------------------------------

/// Default parameters of the RNA-seq pipeline.
pub const DEFAULTS: &str = r#"
database_name = "csvdb"
input = 0
methods = "deseq2"

[cufflinks]
library_type = "fr-unstranded"
include_mask = false

[cuffdiff]
fdr = 0.05
fpkm_expressed = 1.0
include_mask = false

[deseq]
fdr = 0.05
fit_type = "parametric"
dispersion_method = "pooled"
sharing_mode = "maximum"

[deseq2]
fdr = 0.05
model = "~group"
contrasts = "group"
filter_percentile_rowsums = 0

[edger]
fdr = 0.05

[counting]
type = "anysense_unique"
min_mapping_quality = 0

[tags_filter]
min_counts_per_row = 1
min_counts_per_sample = 10
percentile_rowsums = 0
"#;

// Stage name fragment of each method.
fn label(method: DeMethod) -> &'static str {
    match method {
        DeMethod::Deseq => "DESeq",
        DeMethod::Deseq2 => "DESeq2",
        DeMethod::EdgeR => "EdgeR",
        DeMethod::Cuffdiff => "Cuffdiff",
    }
}

const ALL_METHODS: [DeMethod; 4] = [DeMethod::Deseq, DeMethod::EdgeR, DeMethod::Deseq2, DeMethod::Cuffdiff];

//-----------------------------------------------------------------------------

// Input files discovered in the working directory.
struct Inputs {
    // Track name and BAM file.
    bams: Vec<(String, PathBuf)>,
    // Gene set name and GTF file.
    genesets: Vec<(String, PathBuf)>,
    designs: Vec<(Design, PathBuf)>,
}

impl Inputs {
    fn discover(workspace: &Workspace) -> Result<Self, String> {
        let mut bams = Vec::new();
        for path in tracks::list_files(workspace.input_dir(), "*.bam")? {
            bams.push((utils::snip(&utils::basename(&path), ".bam")?, path));
        }
        let mut genesets = Vec::new();
        for path in tracks::list_files(workspace.workdir(), "*.gtf.gz")? {
            genesets.push((utils::snip(&utils::basename(&path), ".gtf.gz")?, path));
        }
        let mut designs = Vec::new();
        for path in tracks::list_files(workspace.workdir(), "design*.tsv")? {
            designs.push((Design::read(&path)?, path));
        }
        info!("Found {} BAM files, {} gene sets, and {} designs", bams.len(), genesets.len(), designs.len());
        if genesets.is_empty() {
            warn!("No gene sets in {}", workspace.workdir().display());
        }
        Ok(Inputs { bams, genesets, designs })
    }
}

//-----------------------------------------------------------------------------

/// Builds the differential expression pipeline for the files in the working directory.
///
/// # Errors
///
/// Returns an error if a design is invalid, a method is unknown, or a statement cannot be built.
pub fn pipeline(workspace: &Workspace) -> Result<Pipeline, String> {
    let inputs = Inputs::discover(workspace)?;
    let methods = DeMethod::from_params(workspace.params())?;

    let mut pipeline = Pipeline::new();
    add_annotation_stages(&mut pipeline, workspace, &inputs)?;
    add_cufflinks_stages(&mut pipeline, workspace, &inputs)?;
    add_counting_stages(&mut pipeline, workspace, &inputs)?;
    let mut results = Vec::new();
    for method in ALL_METHODS {
        results.extend(add_method_stages(&mut pipeline, workspace, &inputs, method, methods.contains(&method))?);
    }
    add_result_plots(&mut pipeline, workspace, &results)?;

    let stats_files: Vec<PathBuf> = methods.iter().map(|x| stats_file(workspace, *x)).collect();
    let (infiles, sentinel) = (stats_files.clone(), workspace.path("de_stats.load"));
    let job = workspace.database_job(move |database| {
        let pattern = Regex::new(r"(.*)_stats\.tsv").map_err(|x| x.to_string())?;
        database.concatenate_and_load(&infiles, &sentinel, &TrackPattern::Regex(pattern), "0", &LoadOptions::default())?;
        Ok(())
    }).inputs(stats_files).output(workspace.path("de_stats.load"));
    let mut stage = Stage::new("loadDEStats").active(!methods.is_empty()).job(job);
    for method in ALL_METHODS {
        stage = stage.follows(&format!("load{}Stats", label(method)));
    }
    pipeline.add_stage(stage)?;

    add_targets(&mut pipeline)?;
    Ok(pipeline)
}

fn mask_file(workspace: &Workspace) -> PathBuf {
    workspace.path("geneset_mask.gtf")
}

fn count_matrix(workspace: &Workspace, geneset: &str) -> PathBuf {
    workspace.path(format!("featurecounts.dir/{}.featurecounts.tsv.gz", geneset))
}

fn gene_count_matrix(workspace: &Workspace, geneset: &str) -> PathBuf {
    workspace.path(format!("genecounts.dir/{}.genecounts.tsv.gz", geneset))
}

fn stats_file(workspace: &Workspace, method: DeMethod) -> PathBuf {
    workspace.path(format!("{}_stats.tsv", method.name()))
}

// Name of the tables of a differential expression run, e.g. `design1_refcoding_deseq2`.
fn result_prefix(design: &Design, geneset: &str, method: DeMethod) -> String {
    tracks::table_name(&format!("{}_{}_{}", design.name(), geneset, method.name()))
}

//-----------------------------------------------------------------------------

fn add_annotation_stages(pipeline: &mut Pipeline, workspace: &Workspace, inputs: &Inputs) -> Result<(), String> {
    let params = workspace.params();

    // Ribosomal and mitochondrial genes are masked from cufflinks and cuffdiff.
    let active = params.flag("cufflinks_include_mask")? || params.flag("cuffdiff_include_mask")?;
    let mut stage = Stage::new("buildMaskGtf").active(active);
    if active {
        let geneset = workspace.annotation("geneset_all_gtf")?;
        let gene_info = workspace.annotation_table("table_gene_info")?;
        let gene_stats = workspace.annotation_table("table_gene_stats")?;
        let (infile, outfile) = (geneset.clone(), mask_file(workspace));
        let job = workspace.annotations_job(move |database| {
            let mut ids: HashSet<String> = HashSet::new();
            let rrna = format!("SELECT DISTINCT gene_id FROM {} WHERE gene_biotype = 'rRNA'", gene_info);
            ids.extend(database.query_column(&rrna)?.iter().map(|x| x.to_string()));
            let chrm = format!("SELECT DISTINCT gene_id FROM {} WHERE contig = 'chrM'", gene_stats);
            ids.extend(database.query_column(&chrm)?.iter().map(|x| x.to_string()));
            let entries = gtf::read_gtf(&infile)?;
            let written = gtf::write_mask(&entries, &ids, &outfile)?;
            info!("Masked {} genes with {} entries", ids.len(), written);
            Ok(())
        })?;
        stage = stage.job(job.input(geneset).output(mask_file(workspace)));
    }
    pipeline.add_stage(stage)?;

    let mut stage = Stage::new("loadGeneSetGeneInformation");
    for (name, path) in inputs.genesets.iter() {
        let sentinel = workspace.path(format!("{}_geneinfo.load", name));
        let (infile, outfile) = (path.clone(), sentinel.clone());
        let job = workspace.database_job(move |database| {
            let stats = gtf::gene_stats(&gtf::read_gtf(&infile)?);
            let table = gtf::gene_stats_table(&stats);
            let name = tracks::to_table(&outfile);
            let rows = database.load_table(&table, &name, &LoadOptions::with_index(&["gene_id"]))?;
            db::write_sentinel(&outfile, &name, rows)
        });
        stage = stage.job(job.input(path).output(sentinel));
    }
    pipeline.add_stage(stage)
}

//-----------------------------------------------------------------------------

fn add_cufflinks_stages(pipeline: &mut Pipeline, workspace: &Workspace, inputs: &Inputs) -> Result<(), String> {
    let params = workspace.params();
    let fpkm_dir = workspace.path("fpkm.dir");
    let mask = if params.flag("cufflinks_include_mask")? { Some(mask_file(workspace)) } else { None };
    let threads = params.get_int_or("cufflinks_threads", 4)?.max(1) as usize;

    let mut run = Stage::new("runCufflinks").follows("buildMaskGtf").mkdir(&fpkm_dir);
    let mut load = Stage::new("loadCufflinks").follows("runCufflinks");
    let mut merge_genes = Stage::new("mergeCufflinksGeneFPKM").follows("runCufflinks");
    let mut merge_isoforms = Stage::new("mergeCufflinksIsoformFPKM").follows("runCufflinks");
    let mut load_merged = Stage::new("loadCufflinksFPKM").follows("mergeCufflinksGeneFPKM").follows("mergeCufflinksIsoformFPKM");

    for (geneset, gtf_file) in inputs.genesets.iter() {
        let mut gene_files = Vec::new();
        let mut isoform_files = Vec::new();
        for (track, bam) in inputs.bams.iter() {
            let outfile = fpkm_dir.join(format!("{}_{}.cufflinks", geneset, track));
            let genes = super::with_suffix(&outfile, ".genes.fpkm_tracking");
            let isoforms = super::with_suffix(&outfile, ".isoforms.fpkm_tracking");
            let statement = expression::cufflinks_statement(params, gtf_file, bam, &outfile, mask.as_deref())?;
            let mut job = Job::shell(statement)
                .input(gtf_file).input(bam).inputs(mask.clone())
                .outputs([&outfile, &genes, &isoforms])
                .threads(threads);
            if let Some(memory) = params.get("cufflinks_memory") {
                job = job.memory(&memory.to_string());
            }
            run = run.job(job);

            let prefix = tracks::table_name(&format!("{}_{}", geneset, track));
            let sentinel = fpkm_dir.join(format!("{}_{}.load", geneset, track));
            let (sources, output) = ([genes.clone(), isoforms.clone()], sentinel.clone());
            let job = workspace.database_job(move |database| {
                let genes = database.load(&sources[0], &format!("{}_genefpkm", prefix), &LoadOptions::with_index(&["gene_id"]))?;
                let isoforms = database.load(&sources[1], &format!("{}_isoformfpkm", prefix), &LoadOptions::with_index(&["tracking_id"]))?;
                db::write_sentinel(&output, &format!("{}_genefpkm", prefix), genes + isoforms)
            });
            load = load.job(job.inputs([&genes, &isoforms]).output(sentinel));
            gene_files.push(genes);
            isoform_files.push(isoforms);
        }

        if gene_files.is_empty() {
            continue;
        }
        let (merge, load) = merge_fpkm_jobs(workspace, &fpkm_dir, geneset, gene_files, "genes", "gene_id")?;
        merge_genes = merge_genes.job(merge);
        load_merged = load_merged.job(load);
        let (merge, load) = merge_fpkm_jobs(workspace, &fpkm_dir, geneset, isoform_files, "isoforms", "transcript_id")?;
        merge_isoforms = merge_isoforms.job(merge);
        load_merged = load_merged.job(load);
    }

    pipeline.add_stage(run)?;
    pipeline.add_stage(load)?;
    pipeline.add_stage(merge_genes)?;
    pipeline.add_stage(merge_isoforms)?;
    pipeline.add_stage(load_merged)
}

// Jobs merging the FPKM values of a gene set into a matrix and loading it.
fn merge_fpkm_jobs(
    workspace: &Workspace, fpkm_dir: &Path, geneset: &str, files: Vec<PathBuf>, kind: &str, key: &'static str
) -> Result<(Job, Job), String> {
    let outfile = fpkm_dir.join(format!("{}_fpkm_{}.tsv.gz", geneset, kind));
    let pattern = format!(r"^{}_(.+)\.cufflinks\.{}\.fpkm_tracking$", regex::escape(geneset), kind);
    let pattern = Regex::new(&pattern).map_err(|x| x.to_string())?;
    let (sources, output) = (files.clone(), outfile.clone());
    // Column 9 of the tracking files is the FPKM value.
    let merge = Job::native(move || {
        let table = table::combine(&sources, 0, 9, &pattern, Some(key), "0")?;
        table.write_file(&output)
    }).inputs(files).output(&outfile);
    let sentinel = fpkm_dir.join(format!("{}_fpkm_{}.load", geneset, kind));
    let load = workspace.load_job(&outfile, sentinel, LoadOptions::with_index(&[key]));
    Ok((merge, load))
}

//-----------------------------------------------------------------------------

fn add_counting_stages(pipeline: &mut Pipeline, workspace: &Workspace, inputs: &Inputs) -> Result<(), String> {
    let params = workspace.params();
    let counts_dir = workspace.path("featurecounts.dir");
    let threads = params.get_int_or("featurecounts_threads", 1)?.max(1) as usize;

    let mut build = Stage::new("buildFeatureCounts").mkdir(&counts_dir);
    let mut aggregate = Stage::new("aggregateFeatureCounts").follows("buildFeatureCounts");
    let mut load = Stage::new("loadFeatureCounts").follows("aggregateFeatureCounts");
    let mut summary_files = Vec::new();
    let mut matrices = Vec::new();

    for (geneset, gtf_file) in inputs.genesets.iter() {
        let mut count_files = Vec::new();
        for (track, bam) in inputs.bams.iter() {
            let outfile = counts_dir.join(format!("{}.{}.tsv.gz", track, geneset));
            let summary = counts_dir.join(format!("{}.{}.tsv.summary", track, geneset));
            let statement = expression::featurecounts_statement(params, gtf_file, bam, &outfile)?;
            build = build.job(Job::shell(statement).input(gtf_file).input(bam).outputs([&outfile, &summary]).threads(threads));
            count_files.push(outfile);
            summary_files.push(summary);
        }
        if count_files.is_empty() {
            continue;
        }

        // Column 7 of featureCounts output holds the counts.
        let matrix = count_matrix(workspace, geneset);
        let (sources, output) = (count_files.clone(), matrix.clone());
        let job = Job::native(move || {
            let pattern = Regex::new(r"([^.]+)\..+\.tsv\.gz").map_err(|x| x.to_string())?;
            let table = table::combine(&sources, 0, 6, &pattern, Some("gene_id"), "0")?;
            table.write_file(&output)
        });
        aggregate = aggregate.job(job.inputs(count_files).output(&matrix));
        load = load.job(workspace.load_job(
            &matrix, counts_dir.join(format!("{}.featurecounts.load", geneset)), LoadOptions::with_index(&["gene_id"])
        ));
        matrices.push(CountMatrix { path: matrix, dir: counts_dir.clone(), name: format!("{}.featurecounts", geneset) });
    }

    let sentinel = workspace.path("featurecounts_summary.load");
    let (sources, output) = (summary_files.clone(), sentinel.clone());
    let job = workspace.database_job(move |database| {
        let table = expression::featurecounts_summary(&sources)?;
        let rows = database.load_table(&table, "featurecounts_summary", &LoadOptions::with_index(&["track"]))?;
        db::write_sentinel(&output, "featurecounts_summary", rows)
    }).inputs(summary_files).output(sentinel);
    let load_fc_summary = Stage::new("loadFeatureCountsSummary").follows("buildFeatureCounts").job(job);

    pipeline.add_stage(build)?;
    pipeline.add_stage(aggregate)?;
    pipeline.add_stage(load)?;
    pipeline.add_stage(load_fc_summary)?;

    matrices.extend(add_read_count_stages(pipeline, workspace, inputs)?);
    add_summary_stages(pipeline, workspace, inputs, &matrices)
}

// A count matrix with genes as rows and tracks as columns.
struct CountMatrix {
    path: PathBuf,
    // Directory of the overall summaries.
    dir: PathBuf,
    // File name without `.tsv.gz`, e.g. `refcoding.featurecounts`.
    name: String,
}

// Read counts and coverage per gene and per transcript.
// Only the gene-level counts are aggregated into a matrix.
fn add_read_count_stages(pipeline: &mut Pipeline, workspace: &Workspace, inputs: &Inputs) -> Result<Vec<CountMatrix>, String> {
    let params = workspace.params();
    let genes_dir = workspace.path("genecounts.dir");
    let transcripts_dir = workspace.path("transcript_counts.dir");
    let counting_type = params.get_str_or("counting_type", "anysense_unique");

    let mut build = Stage::new("buildGeneLevelReadCounts").mkdir(&genes_dir);
    let mut load = Stage::new("loadGeneLevelReadCounts").follows("buildGeneLevelReadCounts");
    let mut aggregate = Stage::new("aggregateGeneLevelReadCounts").follows("buildGeneLevelReadCounts");
    let mut build_transcripts = Stage::new("buildTranscriptLevelReadCounts").mkdir(&transcripts_dir);
    let mut load_transcripts = Stage::new("loadTranscriptLevelReadCounts").follows("buildTranscriptLevelReadCounts");
    let mut matrices = Vec::new();

    for (geneset, gtf_file) in inputs.genesets.iter() {
        let mut count_files = Vec::new();
        for (track, bam) in inputs.bams.iter() {
            let outfile = genes_dir.join(format!("{}.{}.tsv.gz", track, geneset));
            let statement = expression::read_counts_statement(params, CountLevel::Gene, gtf_file, bam, &outfile)?;
            build = build.job(Job::shell(statement).input(gtf_file).input(bam).output(&outfile).memory("4G"));
            let sentinel = super::replace_suffix(&outfile, ".tsv.gz", "_genecounts.load")?;
            load = load.job(workspace.load_job(&outfile, sentinel, LoadOptions::with_index(&[CountLevel::Gene.key()])));
            count_files.push(outfile);

            let outfile = transcripts_dir.join(format!("{}.{}.tsv.gz", track, geneset));
            let statement = expression::read_counts_statement(params, CountLevel::Transcript, gtf_file, bam, &outfile)?;
            build_transcripts = build_transcripts.job(Job::shell(statement).input(gtf_file).input(bam).output(&outfile));
            let sentinel = super::replace_suffix(&outfile, ".tsv.gz", ".load")?;
            load_transcripts = load_transcripts.job(
                workspace.load_job(&outfile, sentinel, LoadOptions::with_index(&[CountLevel::Transcript.key()]))
            );
        }
        if count_files.is_empty() {
            continue;
        }

        let matrix = gene_count_matrix(workspace, geneset);
        let (sources, output, column) = (count_files.clone(), matrix.clone(), counting_type.clone());
        let job = Job::native(move || {
            let pattern = Regex::new(r"([^.]+)\..+\.tsv\.gz").map_err(|x| x.to_string())?;
            let table = table::combine_named(&sources, 0, &column, &pattern, Some("gene_id"), "0")?;
            table.write_file(&output)
        });
        aggregate = aggregate.job(job.inputs(count_files).output(&matrix));
        matrices.push(CountMatrix { path: matrix, dir: genes_dir.clone(), name: format!("{}.genecounts", geneset) });
    }

    pipeline.add_stage(build)?;
    pipeline.add_stage(load)?;
    pipeline.add_stage(aggregate)?;
    pipeline.add_stage(build_transcripts)?;
    pipeline.add_stage(load_transcripts)?;
    Ok(matrices)
}

// Count statistics and tag plots for each matrix, overall and within each design.
fn add_summary_stages(pipeline: &mut Pipeline, workspace: &Workspace, inputs: &Inputs, matrices: &[CountMatrix]) -> Result<(), String> {
    let params = workspace.params();
    let designs_dir = workspace.path("designs.dir");
    let plots_dir = workspace.path("tagplots.dir");
    let aggregated = ["aggregateFeatureCounts", "aggregateGeneLevelReadCounts"];

    let mut summarize = Stage::new("summarizeCounts");
    let mut per_design = Stage::new("summarizeCountsPerDesign").mkdir(&designs_dir);
    let mut plots = Stage::new("plotTagStats").mkdir(&plots_dir);
    for name in aggregated {
        summarize = summarize.follows(name);
        per_design = per_design.follows(name);
        plots = plots.follows(name);
    }
    let mut load_summary = Stage::new("loadTagCountSummary").follows("summarizeCounts").follows("summarizeCountsPerDesign");

    for matrix in matrices.iter() {
        let (stats, correlation) = summary_files_for(&matrix.dir.join(&matrix.name));
        let (source, outputs) = (matrix.path.clone(), (stats.clone(), correlation.clone()));
        let job = Job::native(move || {
            let summary = expression::count_summary(&Table::read_file(&source, true)?)?;
            summary.stats.write_file(&outputs.0)?;
            summary.correlation.write_file(&outputs.1)
        }).input(&matrix.path).outputs([&stats, &correlation]);
        summarize = summarize.job(job);
        load_summary = add_summary_loads(load_summary, workspace, &stats, &correlation)?;

        for (design, design_file) in inputs.designs.iter() {
            let prefix = designs_dir.join(format!("{}.{}", design.name(), matrix.name));
            let (stats, correlation) = summary_files_for(&prefix);
            let (source, design_copy, outputs) = (matrix.path.clone(), design.clone(), (stats.clone(), correlation.clone()));
            let job = Job::native(move || {
                let counts = Table::read_file(&source, true)?;
                let summary = expression::count_summary_for_design(&counts, &design_copy)?;
                summary.stats.write_file(&outputs.0)?;
                summary.correlation.write_file(&outputs.1)
            }).input(&matrix.path).input(design_file).outputs([&stats, &correlation]);
            per_design = per_design.job(job);
            load_summary = add_summary_loads(load_summary, workspace, &stats, &correlation)?;

            let outfile = plots_dir.join(format!("{}.{}.log", design.name(), matrix.name));
            let statement = expression::plot_tag_stats_statement(params, design_file, &matrix.path, &outfile)?;
            plots = plots.job(Job::shell(statement).input(design_file).input(&matrix.path).output(outfile));
        }
    }

    pipeline.add_stage(summarize)?;
    pipeline.add_stage(per_design)?;
    pipeline.add_stage(load_summary)?;
    pipeline.add_stage(plots)
}

// Statistics and correlation files for a count matrix prefix.
fn summary_files_for(prefix: &Path) -> (PathBuf, PathBuf) {
    (super::with_suffix(prefix, "_stats.tsv"), super::with_suffix(prefix, "_correlation.tsv"))
}

fn add_summary_loads(stage: Stage, workspace: &Workspace, stats: &Path, correlation: &Path) -> Result<Stage, String> {
    let stats_sentinel = super::replace_suffix(stats, ".tsv", ".load")?;
    let correlation_sentinel = super::replace_suffix(correlation, ".tsv", ".load")?;
    let options = LoadOptions { first_column: Some(String::from("track")), ..LoadOptions::default() };
    Ok(stage
        .job(workspace.load_job(stats, stats_sentinel, LoadOptions::with_index(&["track"])))
        .job(workspace.load_job(correlation, correlation_sentinel, options)))
}

//-----------------------------------------------------------------------------

// Returns the result files to plot.
fn add_method_stages(
    pipeline: &mut Pipeline, workspace: &Workspace, inputs: &Inputs, method: DeMethod, active: bool
) -> Result<Vec<PathBuf>, String> {
    let label = label(method);
    let outdir = workspace.path(format!("{}.dir", method.name()));
    let mut run = Stage::new(&format!("run{}", label)).active(active).mkdir(&outdir);
    let mut load = Stage::new(&format!("load{}", label)).follows(&format!("run{}", label)).active(active);
    run = match method {
        DeMethod::Cuffdiff => run.follows("buildMaskGtf"),
        _ => run.follows("loadTagCountSummary").follows("loadFeatureCounts").follows("loadFeatureCountsSummary"),
    };

    let mut tables = Vec::new();
    let mut sentinels = Vec::new();
    let mut results = Vec::new();
    if active {
        for (design, design_file) in inputs.designs.iter() {
            for (geneset, gtf_file) in inputs.genesets.iter() {
                let prefix = result_prefix(design, geneset, method);
                let sentinel = outdir.join(format!("{}.{}_{}.load", design.name(), geneset, method.name()));
                let (run_job, load_job) = if method == DeMethod::Cuffdiff {
                    cuffdiff_jobs(workspace, inputs, design, design_file, gtf_file, &outdir, geneset, &prefix, &sentinel)?
                } else {
                    count_method_jobs(workspace, method, design, design_file, geneset, &outdir, &prefix, &sentinel)?
                };
                if method != DeMethod::Deseq2 {
                    results.extend(run_job.output_files().iter().cloned());
                }
                run = run.job(run_job);
                load = load.job(load_job);
                tables.push(format!("{}_gene_diff", prefix));
                sentinels.push(sentinel);
            }
        }
    }

    let outfile = stats_file(workspace, method);
    let mut build = Stage::new(&format!("build{}Stats", label))
        .follows(&format!("load{}", label))
        .follows("loadGeneSetGeneInformation")
        .active(active);
    let mut load_stats = Stage::new(&format!("load{}Stats", label)).follows(&format!("build{}Stats", label)).active(active);
    if active {
        let output = outfile.clone();
        let job = workspace.database_job(move |database| {
            expression::expression_stats(database, &tables)?.write_file(&output)
        });
        build = build.job(job.inputs(sentinels).output(&outfile));
        let sentinel = workspace.path(format!("{}_stats.load", method.name()));
        load_stats = load_stats.job(workspace.load_job(&outfile, sentinel, LoadOptions::default()));
    }

    pipeline.add_stage(run)?;
    pipeline.add_stage(load)?;
    pipeline.add_stage(build)?;
    pipeline.add_stage(load_stats)?;
    Ok(results)
}

// Plots of the DESeq, EdgeR, and cuffdiff results.
fn add_result_plots(pipeline: &mut Pipeline, workspace: &Workspace, results: &[PathBuf]) -> Result<(), String> {
    let params = workspace.params();
    let mut stage = Stage::new("plotDETagStats");
    for method in [DeMethod::Deseq, DeMethod::EdgeR, DeMethod::Cuffdiff] {
        stage = stage.follows(&format!("run{}", label(method)));
    }
    for result in results.iter() {
        let outfile = super::replace_suffix(result, ".tsv.gz", ".plots")?;
        let statement = expression::plot_de_tag_stats_statement(params, result, &outfile)?;
        stage = stage.job(Job::shell(statement).input(result).output(outfile).memory("8G"));
    }
    pipeline.add_stage(stage)
}

// Jobs running DESeq, EdgeR, or DESeq2 on a count matrix and loading the results.
#[allow(clippy::too_many_arguments)]
fn count_method_jobs(
    workspace: &Workspace, method: DeMethod, design: &Design, design_file: &Path,
    geneset: &str, outdir: &Path, prefix: &str, sentinel: &Path
) -> Result<(Job, Job), String> {
    let params = workspace.params();
    let matrix = count_matrix(workspace, geneset);
    let outfile = outdir.join(format!("{}.{}.tsv.gz", design.name(), geneset));
    let statement = match method {
        DeMethod::Deseq => expression::deseq_statement(params, design_file, &matrix, &outfile)?,
        DeMethod::EdgeR => expression::edger_statement(params, design_file, &matrix, &outfile)?,
        DeMethod::Deseq2 => expression::deseq2_statement(params, design_file, &matrix, &outfile)?,
        DeMethod::Cuffdiff => return Err(String::from("Cuffdiff does not use a count matrix")),
    };
    let run = Job::shell(statement).input(design_file).input(&matrix).output(&outfile);

    let table = format!("{}_gene_diff", prefix);
    let (infile, output) = (outfile.clone(), sentinel.to_path_buf());
    let load = if method == DeMethod::Deseq2 {
        // DESeq2 p-values are adjusted over all contrasts of the design.
        let adjusted = outdir.join(format!("{}.{}.adjusted.tsv.gz", design.name(), geneset));
        let target = adjusted.clone();
        workspace.database_job(move |database| {
            expression::adjust_deseq2(&infile, &target)?;
            let rows = database.load(&target, &table, &LoadOptions::with_index(&["test_id"]))?;
            db::write_sentinel(&output, &table, rows)
        }).outputs([&adjusted])
    } else {
        workspace.database_job(move |database| {
            let options = LoadOptions { allow_empty: true, ..LoadOptions::with_index(&["test_id"]) };
            let rows = database.load(&infile, &table, &options)?;
            db::write_sentinel(&output, &table, rows)
        })
    };
    Ok((run, load.input(&outfile).output(sentinel)))
}

// Jobs running cuffdiff for a design and a gene set and loading all levels.
#[allow(clippy::too_many_arguments)]
fn cuffdiff_jobs(
    workspace: &Workspace, inputs: &Inputs, design: &Design, design_file: &Path,
    gtf_file: &Path, outdir: &Path, geneset: &str, prefix: &str, sentinel: &Path
) -> Result<(Job, Job), String> {
    let params = workspace.params();
    let mask = if params.flag("cuffdiff_include_mask")? { Some(mask_file(workspace)) } else { None };
    let outfile = outdir.join(format!("{}.{}.fpkm.tsv.gz", design.name(), geneset));
    let bam_dir = workspace.input_dir();
    let statement = expression::cuffdiff_statement(params, design, &bam_dir, gtf_file, &outfile, mask.as_deref())?;
    let bams: Vec<PathBuf> = design.included().map(|x| bam_dir.join(format!("{}.bam", x.track))).collect();
    for bam in bams.iter() {
        if !inputs.bams.iter().any(|(_, path)| path == bam) {
            warn!("Design {} refers to a missing BAM file {}", design.name(), bam.display());
        }
    }
    let threads = params.get_int_or("cuffdiff_threads", 4)?.max(1) as usize;
    let memory = params.get_str_or("cuffdiff_memory", "4G");
    let run = Job::shell(statement)
        .input(design_file).input(gtf_file).inputs(bams).inputs(mask)
        .output(&outfile)
        .threads(threads)
        .memory(&memory);

    let fpkm_silent = params.get_float("cuffdiff_fpkm_expressed")?;
    let results = expression::cuffdiff_dir(&outfile)?;
    let (table_prefix, output) = (prefix.to_string(), sentinel.to_path_buf());
    let load = workspace.database_job(move |database| {
        let rows = expression::load_cuffdiff(database, &results, &table_prefix, fpkm_silent)?;
        db::write_sentinel(&output, &format!("{}_gene_diff", table_prefix), rows)
    }).input(&outfile).output(sentinel);
    Ok((run, load))
}

//-----------------------------------------------------------------------------

fn add_targets(pipeline: &mut Pipeline) -> Result<(), String> {
    let counting = [
        "loadTagCountSummary", "loadFeatureCounts", "loadFeatureCountsSummary",
        "aggregateFeatureCounts", "aggregateGeneLevelReadCounts",
    ];
    pipeline.add_target("counting", &counting)?;
    let expression = ["loadCufflinks", "loadCufflinksFPKM", "loadGeneLevelReadCounts"];
    pipeline.add_target("expression", &expression)?;
    let qc = ["plotTagStats", "plotDETagStats", "loadTagCountSummary", "loadDEStats"];
    pipeline.add_target("qc", &qc)?;
    let stats: Vec<String> = ALL_METHODS.iter().map(|x| format!("load{}Stats", label(*x))).collect();
    let diff_expression: Vec<&str> = stats.iter().map(|x| x.as_str()).collect();
    pipeline.add_target("diff_expression", &diff_expression)?;

    let mut full: Vec<&str> = Vec::new();
    full.extend(counting);
    full.extend(expression);
    full.extend(diff_expression.iter());
    full.extend(qc);
    pipeline.add_target("full", &full)
}

//-----------------------------------------------------------------------------
