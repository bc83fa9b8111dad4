//! The read mapping pipeline.
//!
//! Read files in the input directory (see [`Workspace::input_dir`]) are mapped with each mapper listed in parameter `mappers`.
//! The output of mapper `m` for track `t` is `m.dir/t.m.bam`.
//! Quality control results are loaded into the pipeline database.
//!
//! Spliced mappers need a reference gene set built from the annotation pipeline.
//! Mapper options may refer to the reference files with `%(junctions)s`, `%(transcriptome)s`, and `%(splicesites)s`.
//!
//! Targets: `mapping`, `qc`, `duplication`, `wig`, `views`, and `full`.

use super::{replace_suffix, Workspace};

use crate::db::{self, LoadOptions, TrackPattern, ViewKind};
use crate::gtf;
use crate::mapping::{self, MergePattern, ReadCounter, ReadFile};
use crate::qc;
use crate::statement::Statement;
use crate::tasks::{Job, Pipeline, Stage};
use crate::utils;

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{info, warn};

//-----------------------------------------------------------------------------

/// Default parameters of the mapping pipeline.
pub const DEFAULTS: &str = r#"
database_name = "csvdb"
input = 0
genome_dir = "."
paired_end = false
strip_sequence = false
"#;

/// Mapper names and the stages that run them, in declaration order.
pub const MAPPER_STAGES: [(&str, &str); 9] = [
    ("tophat", "mapReadsWithTophat"),
    ("tophat2", "mapReadsWithTophat2"),
    ("hisat", "mapReadsWithHisat"),
    ("gsnap", "mapReadsWithGSNAP"),
    ("star", "mapReadsWithSTAR"),
    ("transcriptome", "mapReadsWithBowtieAgainstTranscriptome"),
    ("bowtie", "mapReadsWithBowtie"),
    ("bowtie2", "mapReadsWithBowtie2"),
    ("bwa", "mapReadsWithBWA"),
];

const REFERENCE_STAGES: [&str; 6] = [
    "identifyProteinCodingGenes", "buildCodingGeneSet", "buildCodingExons",
    "buildReferenceTranscriptome", "buildJunctions", "buildGSNAPSpliceSites",
];

const QC_STAGES: [&str; 5] = ["loadReadCounts", "loadBAMStats", "loadPicardStats", "loadTophatStats", "loadSTARStats"];

//-----------------------------------------------------------------------------

// A mapped BAM file and the track of its read count file.
#[derive(Clone, Debug)]
struct BamFile {
    path: PathBuf,
    reads: String,
}

// Reference files for spliced mapping.
struct Reference {
    protein_coding: PathBuf,
    coding_gtf: PathBuf,
    coding_exons: PathBuf,
    transcriptome: PathBuf,
    junctions: PathBuf,
    splicesites: PathBuf,
}

impl Reference {
    fn new(workspace: &Workspace) -> Self {
        Reference {
            protein_coding: workspace.path("protein_coding_gene_ids.tsv"),
            coding_gtf: workspace.path("geneset.dir/refcoding.gtf.gz"),
            coding_exons: workspace.path("geneset.dir/coding_exons.gtf.gz"),
            transcriptome: workspace.path("geneset.dir/refcoding.fa"),
            junctions: workspace.path("geneset.dir/refcoding.junctions"),
            splicesites: workspace.path("gsnap.dir/splicesites.iit"),
        }
    }

    // Index prefix of the transcriptome.
    fn prefix(&self) -> Result<String, String> {
        utils::snip(&utils::path_str(&self.transcriptome), ".fa")
    }

    // Additional inputs of a spliced mapper.
    fn inputs(&self, mapper: &str) -> Vec<PathBuf> {
        match mapper {
            "tophat" | "tophat2" => vec![self.junctions.clone(), self.transcriptome.clone()],
            "transcriptome" => vec![self.transcriptome.clone()],
            "gsnap" => vec![self.splicesites.clone()],
            _ => Vec::new(),
        }
    }
}

//-----------------------------------------------------------------------------

/// Builds the mapping pipeline for the read files in the input directory.
///
/// # Errors
///
/// Returns an error if a configured mapper is unknown or misconfigured, a read file is incomplete, or a statement cannot be built.
pub fn pipeline(workspace: &Workspace) -> Result<Pipeline, String> {
    let params = workspace.params();
    let mappers = params.as_list("mappers")?;
    for name in mappers.iter() {
        if !mapping::MAPPERS.contains(&name.as_str()) {
            return Err(format!("Unknown mapper: {}", name));
        }
    }
    let spliced = mapping::spliced_mapping(&mappers);
    let reads = mapping::discover_reads(workspace.input_dir())?;
    if reads.is_empty() {
        warn!("No read files in {}", workspace.input_dir().display());
    }
    info!("Mapping {} read files with {}", reads.len(), mappers.join(", "));
    let reference = Reference::new(workspace);
    let merge = MergePattern::from_params(params)?;

    let mut pipeline = Pipeline::new();
    add_reference_stages(&mut pipeline, workspace, &reference, &mappers, spliced)?;

    pipeline.add_stage(Stage::new("countReads").mkdir(workspace.path("nreads.dir")).jobs(
        reads.iter().map(|read| {
            let outfile = nreads_file(workspace, &read.track);
            Job::shell(ReadCounter.build(read, &outfile)).input(&read.path).output(outfile)
        })
    ))?;

    let mut bams: Vec<BamFile> = Vec::new();
    for (name, stage_name) in MAPPER_STAGES {
        let configured = mappers.iter().any(|x| x == name);
        let mut stage = Stage::new(stage_name).active(configured);
        if mapping::SPLICED_MAPPERS.contains(&name) {
            for predecessor in REFERENCE_STAGES {
                stage = stage.follows(predecessor);
            }
        }
        if configured {
            let (jobs, outputs) = mapping_jobs(workspace, &reference, name, &reads)?;
            stage = stage.mkdir(workspace.path(format!("{}.dir", name))).jobs(jobs);
            bams.extend(outputs);
        }
        pipeline.add_stage(stage)?;
    }
    add_mapper_stats_stages(&mut pipeline, workspace, &bams, &mappers)?;

    let merged = add_merge_stages(&mut pipeline, workspace, merge.as_ref(), &bams, &reads)?;
    let mut all_reads: Vec<String> = reads.iter().map(|x| x.track.clone()).collect();
    all_reads.extend(merged.iter().map(|x| x.reads.clone()));
    all_reads.sort();
    all_reads.dedup();
    bams.extend(merged);

    add_qc_stages(&mut pipeline, workspace, &reference, &bams, &all_reads, spliced)?;
    add_targets(&mut pipeline)?;
    Ok(pipeline)
}

fn nreads_file(workspace: &Workspace, track: &str) -> PathBuf {
    workspace.path(format!("nreads.dir/{}.nreads", track))
}

fn mapping_jobs(
    workspace: &Workspace, reference: &Reference, name: &str, reads: &[ReadFile]
) -> Result<(Vec<Job>, Vec<BamFile>), String> {
    let mut params = workspace.params().clone();
    params.set("junctions", utils::path_str(&reference.junctions));
    params.set("transcriptome", reference.prefix()?);
    params.set("splicesites", utils::path_str(replace_suffix(&reference.splicesites, ".iit", "")?));
    let mapper = mapping::mapper(name, &params, &reference.prefix()?)?;

    let mut jobs = Vec::new();
    let mut outputs = Vec::new();
    for read in reads {
        if !mapper.supports(read.format) {
            warn!("Mapper {} does not support {}, skipping", name, read.path.display());
            continue;
        }
        let outfile = workspace.path(format!("{0}.dir/{1}.{0}.bam", name, read.track));
        let statement = mapping::build_statement(mapper.as_ref(), read, &outfile)?;
        let mut job = Job::shell(statement)
            .input(&read.path)
            .inputs(read.mate())
            .inputs(reference.inputs(name))
            .output(&outfile)
            .threads(mapper.config().threads);
        if let Some(memory) = &mapper.config().memory {
            job = job.memory(memory);
        }
        jobs.push(job);
        outputs.push(BamFile { path: outfile, reads: read.track.clone() });
    }
    Ok((jobs, outputs))
}

//-----------------------------------------------------------------------------

fn add_reference_stages(
    pipeline: &mut Pipeline, workspace: &Workspace, reference: &Reference, mappers: &[String], spliced: bool
) -> Result<(), String> {
    let geneset_dir = workspace.path("geneset.dir");

    // Protein coding genes from the annotation database.
    let mut stage = Stage::new("identifyProteinCodingGenes").active(spliced);
    if spliced {
        let gene_info = workspace.annotation_table("table_gene_info")?;
        let outfile = reference.protein_coding.clone();
        let job = workspace.annotations_job(move |database| {
            let sql = format!("SELECT DISTINCT gene_id FROM {} WHERE gene_biotype = 'protein_coding'", gene_info);
            let ids = database.query_column(&sql)?;
            let mut output = utils::create_file(&outfile)?;
            writeln!(output, "gene_id").map_err(|x| x.to_string())?;
            for id in ids.iter() {
                writeln!(output, "{}", id).map_err(|x| x.to_string())?;
            }
            output.flush().map_err(|x| x.to_string())?;
            info!("Found {} protein coding genes", ids.len());
            Ok(())
        })?;
        stage = stage.job(job.output(&reference.protein_coding));
    }
    pipeline.add_stage(stage)?;

    // Gene set of protein coding genes.
    let mut stage = Stage::new("buildCodingGeneSet").follows("identifyProteinCodingGenes").active(spliced).mkdir(&geneset_dir);
    if spliced {
        let geneset = workspace.annotation("geneset_all_gtf")?;
        let (infile, ids, outfile) = (geneset.clone(), reference.protein_coding.clone(), reference.coding_gtf.clone());
        let job = Job::native(move || {
            let entries = gtf::read_gtf(&infile)?;
            let gene_ids = gtf::read_gene_ids(&ids)?;
            let written = gtf::write_gtf(gtf::filter_by_genes(&entries, &gene_ids), &outfile)?;
            info!("Wrote {} of {} entries to {}", written, entries.len(), outfile.display());
            Ok(())
        });
        stage = stage.job(job.input(geneset).input(&reference.protein_coding).output(&reference.coding_gtf));
    }
    pipeline.add_stage(stage)?;

    // Coding exons for splice site validation.
    let mut stage = Stage::new("buildCodingExons").follows("identifyProteinCodingGenes").active(spliced).mkdir(&geneset_dir);
    if spliced {
        let geneset = workspace.annotation("geneset_all_gtf")?;
        let (infile, ids, outfile) = (geneset.clone(), reference.protein_coding.clone(), reference.coding_exons.clone());
        let job = Job::native(move || {
            let entries = gtf::read_gtf(&infile)?;
            let gene_ids = gtf::read_gene_ids(&ids)?;
            let coding: Vec<gtf::GtfEntry> = gtf::filter_by_genes(&entries, &gene_ids).into_iter().cloned().collect();
            let exons = gtf::coding_exons(&coding);
            gtf::write_gtf(exons.iter(), &outfile)?;
            Ok(())
        });
        stage = stage.job(job.input(geneset).input(&reference.protein_coding).output(&reference.coding_exons));
    }
    pipeline.add_stage(stage)?;

    // Transcript sequences and their indexes.
    let mut stage = Stage::new("buildReferenceTranscriptome").follows("buildCodingGeneSet").active(spliced);
    if spliced {
        let params = workspace.params();
        let genome = workspace.path(params.get_str_or("genome_dir", ".")).join(format!("{}.fa", params.get_str("genome")?));
        let gtf_file = replace_suffix(&reference.coding_gtf, ".gtf.gz", ".gtf")?;
        let mut statement = Statement::new("
            zcat %(infile)s | awk '$3 == \"exon\"' > %(gtf_file)s;
            checkpoint;
            gtf_to_fasta %(gtf_file)s %(genome)s %(outfile)s > %(outfile)s.log 2>&1;
            checkpoint;
            samtools faidx %(outfile)s
        ")
            .path("infile", &reference.coding_gtf)
            .path("gtf_file", &gtf_file)
            .path("genome", &genome)
            .path("outfile", &reference.transcriptome)
            .build(params)?;
        let prefix = reference.prefix()?;
        if mappers.iter().any(|x| x == "tophat" || x == "transcriptome") {
            statement.push_str(&format!("; checkpoint; bowtie-build -f {0} {1} >> {0}.log 2>&1", reference.transcriptome.display(), prefix));
        }
        if mappers.iter().any(|x| x == "tophat2") {
            statement.push_str(&format!("; checkpoint; bowtie2-build -f {0} {1} >> {0}.log 2>&1", reference.transcriptome.display(), prefix));
        }
        stage = stage.job(Job::shell(statement).input(&reference.coding_gtf).input(genome).output(&reference.transcriptome));
    }
    pipeline.add_stage(stage)?;

    let mut stage = Stage::new("buildJunctions").follows("buildCodingGeneSet").active(spliced);
    if spliced {
        let (infile, outfile) = (reference.coding_gtf.clone(), reference.junctions.clone());
        let job = Job::native(move || {
            gtf::build_junctions(&infile, &outfile)?;
            Ok(())
        });
        stage = stage.job(job.input(&reference.coding_gtf).output(&reference.junctions));
    }
    pipeline.add_stage(stage)?;

    let gsnap = mappers.iter().any(|x| x == "gsnap");
    let mut stage = Stage::new("buildGSNAPSpliceSites").active(spliced && gsnap).mkdir(workspace.path("gsnap.dir"));
    if spliced && gsnap {
        let exons = workspace.annotation("geneset_exons_gtf")?;
        let prefix = replace_suffix(&reference.splicesites, ".iit", "")?;
        let statement = format!(
            "zcat {0} | gtf_splicesites | iit_store -o {1} > {1}.log",
            exons.display(), prefix.display()
        );
        stage = stage.job(Job::shell(statement).input(exons).output(&reference.splicesites));
    }
    pipeline.add_stage(stage)?;

    Ok(())
}

//-----------------------------------------------------------------------------

fn bams_of(bams: &[BamFile], mappers: &[&str]) -> Vec<PathBuf> {
    bams.iter().filter(|bam| {
        mappers.iter().any(|mapper| bam.path.to_string_lossy().ends_with(&format!(".{}.bam", mapper)))
    }).map(|x| x.path.clone()).collect()
}

fn add_mapper_stats_stages(pipeline: &mut Pipeline, workspace: &Workspace, bams: &[BamFile], mappers: &[String]) -> Result<(), String> {
    let paired = workspace.params().flag("paired_end")?;

    let tophat_bams = bams_of(bams, &["tophat", "tophat2"]);
    let active = mappers.iter().any(|x| x == "tophat" || x == "tophat2");
    let outfile = workspace.path("tophat_stats.tsv");
    let mut stage = Stage::new("buildTophatStats").follows("mapReadsWithTophat").follows("mapReadsWithTophat2").active(active);
    if active {
        let (infiles, output) = (tophat_bams.clone(), outfile.clone());
        let job = Job::native(move || {
            qc::tophat_stats_table(&infiles, paired)?.write_file(&output)
        });
        stage = stage.job(job.inputs(tophat_bams).output(&outfile));
    }
    pipeline.add_stage(stage)?;
    let mut stage = Stage::new("loadTophatStats").follows("buildTophatStats").active(active);
    if active {
        stage = stage.job(workspace.load_job(&outfile, workspace.path("tophat_stats.load"), LoadOptions::with_index(&["track"])));
    }
    pipeline.add_stage(stage)?;

    let star_bams = bams_of(bams, &["star"]);
    let active = mappers.iter().any(|x| x == "star");
    let outfile = workspace.path("star_stats.tsv");
    let mut stage = Stage::new("buildSTARStats").follows("mapReadsWithSTAR").active(active);
    if active {
        let (infiles, output) = (star_bams.clone(), outfile.clone());
        let job = Job::native(move || {
            qc::star_stats(&infiles)?.write_file(&output)
        });
        stage = stage.job(job.inputs(star_bams).output(&outfile));
    }
    pipeline.add_stage(stage)?;
    let mut stage = Stage::new("loadSTARStats").follows("buildSTARStats").active(active);
    if active {
        stage = stage.job(workspace.load_job(&outfile, workspace.path("star_stats.load"), LoadOptions::with_index(&["track"])));
    }
    pipeline.add_stage(stage)?;

    Ok(())
}

//-----------------------------------------------------------------------------

// Adds the merging stages and returns the merged BAM files.
fn add_merge_stages(
    pipeline: &mut Pipeline, workspace: &Workspace, merge: Option<&MergePattern>, bams: &[BamFile], reads: &[ReadFile]
) -> Result<Vec<BamFile>, String> {
    let mut merged = Vec::new();
    let mut bam_stage = Stage::new("mergeBAMFiles").active(merge.is_some());
    for (_, stage_name) in MAPPER_STAGES {
        bam_stage = bam_stage.follows(stage_name);
    }
    let mut count_stage = Stage::new("mergeReadCounts").follows("countReads").active(merge.is_some());

    if let Some(pattern) = merge {
        // BAM files are collated separately for each mapper.
        let mut by_mapper: BTreeMap<String, Vec<&BamFile>> = BTreeMap::new();
        for bam in bams {
            let track = bam_track(&bam.path)?;
            if let Some(mapper) = track.strip_prefix(&format!("{}.", bam.reads)) {
                by_mapper.entry(mapper.to_string()).or_default().push(bam);
            }
        }
        for (mapper, files) in by_mapper.iter() {
            let tracks: Vec<&str> = files.iter().map(|x| x.reads.as_str()).collect();
            for (output, members) in pattern.collate(&tracks) {
                let infiles: Vec<PathBuf> = files.iter().filter(|x| members.contains(&x.reads)).map(|x| x.path.clone()).collect();
                let outfile = workspace.path(format!("{0}.dir/{1}.{0}.bam", mapper, output));
                bam_stage = bam_stage.job(mapping::merge_bams_job(infiles, outfile.clone()));
                merged.push(BamFile { path: outfile, reads: output });
            }
        }

        let tracks: Vec<&str> = reads.iter().map(|x| x.track.as_str()).collect();
        for (output, members) in pattern.collate(&tracks) {
            let infiles: Vec<PathBuf> = members.iter().map(|x| nreads_file(workspace, x)).collect();
            let outfile = nreads_file(workspace, &output);
            let (sources, target) = (infiles.clone(), outfile.clone());
            let job = Job::native(move || {
                qc::merge_read_counts(&sources, &target)?;
                Ok(())
            });
            count_stage = count_stage.job(job.inputs(infiles).output(outfile));
        }
    }

    pipeline.add_stage(bam_stage)?;
    pipeline.add_stage(count_stage)?;
    Ok(merged)
}

//-----------------------------------------------------------------------------

fn add_qc_stages(
    pipeline: &mut Pipeline, workspace: &Workspace, reference: &Reference,
    bams: &[BamFile], read_tracks: &[String], spliced: bool
) -> Result<(), String> {
    let params = workspace.params();

    // Read counts.
    let count_files: Vec<PathBuf> = read_tracks.iter().map(|x| nreads_file(workspace, x)).collect();
    let (infiles, sentinel) = (count_files.clone(), workspace.path("reads_summary.load"));
    let job = workspace.database_job(move |database| {
        let table = qc::read_counts_table(&infiles)?;
        let rows = database.load_table(&table, "reads_summary", &LoadOptions::with_index(&["track"]))?;
        db::write_sentinel(&sentinel, "reads_summary", rows)
    }).inputs(count_files).output(workspace.path("reads_summary.load"));
    pipeline.add_stage(Stage::new("loadReadCounts").follows("countReads").follows("mergeReadCounts").job(job))?;

    // Alignment statistics with samtools flagstat.
    let mut stage = Stage::new("buildBAMStats").follows("mergeBAMFiles").follows("mergeReadCounts");
    let mut stats_inputs: Vec<(String, PathBuf, PathBuf)> = Vec::new();
    for bam in bams {
        let outfile = replace_suffix(&bam.path, ".bam", ".readstats")?;
        let statement = format!("samtools flagstat {} > {}", bam.path.display(), outfile.display());
        let nreads = nreads_file(workspace, &bam.reads);
        stage = stage.job(Job::shell(statement).input(&bam.path).input(&nreads).output(&outfile));
        stats_inputs.push((bam_track(&bam.path)?, outfile, nreads));
    }
    pipeline.add_stage(stage)?;

    let inputs: Vec<PathBuf> = stats_inputs.iter().flat_map(|(_, stats, nreads)| [stats.clone(), nreads.clone()]).collect();
    let sentinel = workspace.path("bam_stats.load");
    let output = sentinel.clone();
    let job = workspace.database_job(move |database| {
        let mut rows = Vec::with_capacity(stats_inputs.len());
        for (track, stats, nreads) in stats_inputs.iter() {
            rows.push((track.clone(), stats.clone(), qc::read_nreads(nreads)?));
        }
        let table = qc::bam_stats_table(&rows)?;
        let loaded = database.load_table(&table, "bam_stats", &LoadOptions::with_index(&["track"]))?;
        db::write_sentinel(&output, "bam_stats", loaded)
    }).inputs(inputs).output(sentinel);
    pipeline.add_stage(Stage::new("loadBAMStats").follows("buildBAMStats").job(job))?;

    // Picard alignment statistics.
    let genome_dir = workspace.path(params.get_str_or("genome_dir", "."));
    let genome = params.get_str_or("genome", "genome");
    let mut stage = Stage::new("buildPicardStats").follows("mergeBAMFiles");
    let mut picard_files = Vec::new();
    for bam in bams {
        let outfile = replace_suffix(&bam.path, ".bam", ".picard_stats")?;
        let in_transcriptome = bam.path.parent().map(|x| utils::basename(x) == "transcriptome.dir").unwrap_or(false);
        let fasta = if spliced && in_transcriptome { reference.transcriptome.clone() } else { genome_dir.join(format!("{}.fa", genome)) };
        let statement = qc::picard_alignment_statement(params, &bam.path, &fasta, &outfile)?;
        stage = stage.job(Job::shell(statement).input(&bam.path).output(&outfile));
        picard_files.push(outfile);
    }
    pipeline.add_stage(stage)?;
    let (infiles, sentinel) = (picard_files.clone(), workspace.path("picard_stats.load"));
    let job = workspace.database_job(move |database| {
        let (metrics, _) = qc::merge_picard_metrics(&infiles, &TrackPattern::Suffix(String::from(".picard_stats")))?;
        let rows = database.load_table(&metrics, "picard_stats", &LoadOptions::with_index(&["track"]))?;
        db::write_sentinel(&sentinel, "picard_stats", rows)
    }).inputs(picard_files).output(workspace.path("picard_stats.load"));
    pipeline.add_stage(Stage::new("loadPicardStats").follows("buildPicardStats").job(job))?;

    // Picard duplication statistics.
    let mut stage = Stage::new("buildPicardDuplicationStats").follows("mergeBAMFiles");
    let mut duplication_files = Vec::new();
    for bam in bams {
        let outfile = replace_suffix(&bam.path, ".bam", ".picard_duplication_metrics")?;
        let statement = qc::picard_duplication_statement(params, &bam.path, &outfile)?;
        stage = stage.job(Job::shell(statement).input(&bam.path).output(&outfile).memory("8G"));
        duplication_files.push(outfile);
    }
    pipeline.add_stage(stage)?;
    let sentinels = [workspace.path("picard_duplication_stats.load"), workspace.path("picard_duplication_histogram.load")];
    let (infiles, outputs) = (duplication_files.clone(), sentinels.clone());
    let job = workspace.database_job(move |database| {
        let pattern = TrackPattern::Suffix(String::from(".picard_duplication_metrics"));
        let (metrics, histograms) = qc::merge_picard_metrics(&infiles, &pattern)?;
        let rows = database.load_table(&metrics, "picard_duplication_stats", &LoadOptions::with_index(&["track"]))?;
        db::write_sentinel(&outputs[0], "picard_duplication_stats", rows)?;
        let rows = if histograms.nrows() > 0 {
            database.load_table(&histograms, "picard_duplication_histogram", &LoadOptions::with_index(&["track"]))?
        } else {
            0
        };
        db::write_sentinel(&outputs[1], "picard_duplication_histogram", rows)
    }).inputs(duplication_files).outputs(sentinels);
    pipeline.add_stage(Stage::new("loadPicardDuplicationStats").follows("buildPicardDuplicationStats").job(job))?;

    // Coverage tracks.
    let mut stage = Stage::new("buildBigWig").follows("mergeBAMFiles");
    let mut bigwigs = Vec::new();
    if !bams.is_empty() {
        let contigs = workspace.annotation("contigs")?;
        for bam in bams {
            let outfile = replace_suffix(&bam.path, ".bam", ".bw")?;
            let statement = qc::bigwig_statement(params, &bam.path, &contigs, &outfile)?;
            stage = stage.job(Job::shell(statement).input(&bam.path).input(&contigs).output(&outfile).memory("3G"));
            bigwigs.push(outfile);
        }
    }
    pipeline.add_stage(stage)?;
    let outfile = workspace.path("igv_sample_information.tsv");
    let (infiles, output) = (bigwigs.clone(), outfile.clone());
    let job = Job::native(move || {
        qc::igv_sample_information(&infiles).write_file(&output)
    }).inputs(bigwigs).output(outfile);
    pipeline.add_stage(Stage::new("buildIGVSampleInformation").follows("buildBigWig").job(job))?;

    // Summary view.
    let sentinel = workspace.path("view_mapping.load");
    let output = sentinel.clone();
    let job = workspace.database_job(move |database| {
        database.create_view(&[("bam_stats", "track"), ("picard_stats", "track")], "view_mapping", ViewKind::Table)?;
        let rows = database.query_value("SELECT COUNT(*) FROM view_mapping")?.and_then(|x| x.as_i64()).unwrap_or(0);
        db::write_sentinel(&output, "view_mapping", rows as usize)
    }).input(workspace.path("bam_stats.load")).input(workspace.path("picard_stats.load")).output(sentinel);
    pipeline.add_stage(Stage::new("createViewMapping").follows("loadBAMStats").follows("loadPicardStats").job(job))?;

    Ok(())
}

// The track of a mapped file is the file name without `.bam`, e.g. `liver-R1.bowtie`.
fn bam_track(path: &Path) -> Result<String, String> {
    utils::snip(&utils::basename(path), ".bam")
}

//-----------------------------------------------------------------------------

fn add_targets(pipeline: &mut Pipeline) -> Result<(), String> {
    let mut mapping: Vec<&str> = MAPPER_STAGES.iter().map(|(_, stage)| *stage).collect();
    mapping.push("mergeBAMFiles");
    pipeline.add_target("mapping", &mapping)?;
    pipeline.add_target("qc", &QC_STAGES)?;
    pipeline.add_target("duplication", &["loadPicardDuplicationStats"])?;
    pipeline.add_target("wig", &["buildBigWig", "buildIGVSampleInformation"])?;
    pipeline.add_target("views", &["createViewMapping"])?;

    let mut full = mapping.clone();
    full.extend(QC_STAGES);
    full.extend(["loadPicardDuplicationStats", "buildIGVSampleInformation", "createViewMapping"]);
    pipeline.add_target("full", &full)
}

