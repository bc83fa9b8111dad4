use super::*;

use crate::internal;
use crate::statement::Executor;
use crate::tasks::{Mode, Pipeline, Runner, Stage};

use std::collections::BTreeSet;
use std::fs;

//-----------------------------------------------------------------------------

fn workspace_from(dir: &Path, defaults: &str, text: &str) -> Workspace {
    let workspace = Workspace::new(dir, internal::params_from(defaults));
    assert!(workspace.is_ok(), "Failed to create the workspace: {}", workspace.unwrap_err());
    with_params(&workspace.unwrap(), text)
}

fn with_params(workspace: &Workspace, text: &str) -> Workspace {
    let mut params = workspace.params().clone();
    for (key, value) in internal::params_from(text).iter() {
        params.set(key, value.clone());
    }
    let result = Workspace::new(workspace.workdir(), params);
    assert!(result.is_ok(), "Failed to create the workspace: {}", result.unwrap_err());
    result.unwrap()
}

fn stage<'a>(pipeline: &'a Pipeline, name: &str) -> &'a Stage {
    let result = pipeline.stages().iter().find(|x| x.name() == name);
    assert!(result.is_some(), "Missing stage {}", name);
    result.unwrap()
}

// Stages with jobs that need to run for the target.
fn planned_stages(pipeline: &Pipeline, target: &str, dir: &Path) -> BTreeSet<String> {
    let runner = Runner::new(Executor::dry_run(dir), 1);
    let plan = runner.plan(pipeline, target);
    assert!(plan.is_ok(), "Failed to plan target {}: {}", target, plan.unwrap_err());
    let (jobs, _) = plan.unwrap();
    jobs.iter().map(|x| pipeline.stages()[x.stage].name().to_string()).collect()
}

//-----------------------------------------------------------------------------

#[test]
fn workspace_paths() {
    let dir = tempfile::tempdir().unwrap();
    let workspace = workspace_from(dir.path(), "", "
        [annotations]
        dir = \"annotations\"
        database = \"csvdb\"
        interface_contigs = \"assembly.dir/contigs.tsv\"
        interface_table_gene_info = \"gene_info\"
    ");

    assert_eq!(workspace.workdir(), dir.path());
    assert_eq!(workspace.path("nreads.dir"), dir.path().join("nreads.dir"));
    assert_eq!(workspace.database(), dir.path().join("csvdb"));
    assert_eq!(workspace.input_dir(), dir.path());

    let contigs = workspace.annotation("contigs");
    assert!(contigs.is_ok(), "Failed to find the contigs annotation: {}", contigs.unwrap_err());
    assert_eq!(contigs.unwrap(), dir.path().join("annotations/assembly.dir/contigs.tsv"));
    assert!(workspace.annotation("missing").is_err(), "Found a missing annotation");
    assert_eq!(workspace.annotations_database(), Ok(dir.path().join("annotations/csvdb")));
    assert_eq!(workspace.annotation_table("table_gene_info"), Ok(String::from("annotations.gene_info")));
}

#[test]
fn input_directories() {
    let dir = tempfile::tempdir().unwrap();
    let data = workspace_from(dir.path(), "", "input = 1");
    assert_eq!(data.input_dir(), dir.path().join("data.dir"));
    let other = workspace_from(dir.path(), "", "input = \"reads\"");
    assert_eq!(other.input_dir(), dir.path().join("reads"));
    let named = workspace_from(dir.path(), "", "database_name = \"results.db\"");
    assert_eq!(named.database(), dir.path().join("results.db"));
}

#[test]
fn configuration_with_annotations() {
    let dir = tempfile::tempdir().unwrap();
    let config = internal::write_text(dir.path(), "pipeline.toml", "genome = \"hg38\"\n[annotations]\ndir = \"annotations\"\n");
    fs::create_dir(dir.path().join("annotations")).unwrap();
    internal::write_text(&dir.path().join("annotations"), "pipeline.toml", "genome = \"hg19\"\n[interface]\ncontigs = \"contigs.tsv\"\n");

    let workspace = Workspace::load(dir.path(), &[config], "paired_end = false");
    assert!(workspace.is_ok(), "Failed to load the workspace: {}", workspace.unwrap_err());
    let workspace = workspace.unwrap();
    let params = workspace.params();
    assert_eq!(params.get_str_or("genome", ""), "hg38");
    assert_eq!(params.get_str_or("annotations_genome", ""), "hg19");
    assert_eq!(params.get_str_or("annotations_interface_contigs", ""), "contigs.tsv");
    assert_eq!(params.get_bool("paired_end"), Ok(false));
}

#[test]
fn suffixes() {
    let path = Path::new("/data/bowtie.dir/liver-R1.bowtie.bam");
    assert_eq!(with_suffix(path, ".bai"), PathBuf::from("/data/bowtie.dir/liver-R1.bowtie.bam.bai"));
    assert_eq!(replace_suffix(path, ".bam", ".readstats"), Ok(PathBuf::from("/data/bowtie.dir/liver-R1.bowtie.readstats")));
    assert!(replace_suffix(path, ".sam", ".readstats").is_err(), "Replaced a missing suffix");
}

#[test]
fn database_jobs() {
    let dir = tempfile::tempdir().unwrap();
    let workspace = workspace_from(dir.path(), "", "");
    let infile = internal::write_text(dir.path(), "bam_stats.tsv", "track\treads_mapped\nliver-R1\t100\nbrain-R1\t80\n");
    let sentinel = dir.path().join("bam_stats.load");

    let mut pipeline = Pipeline::new();
    let job = workspace.load_job(&infile, &sentinel, LoadOptions::with_index(&["track"]));
    pipeline.add_stage(Stage::new("loadBAMStats").job(job)).unwrap();
    let runner = Runner::new(Executor::new(dir.path()), 1);
    let result = runner.run(&pipeline, "loadBAMStats", Mode::Make);
    assert!(result.is_ok(), "Failed to run the load job: {}", result.unwrap_err());
    assert!(utils::file_exists(&sentinel), "The sentinel was not written");

    let database = Database::open(workspace.database()).unwrap();
    assert_eq!(database.table_exists("bam_stats"), Ok(true));
    let count = database.query_value("SELECT COUNT(*) FROM bam_stats").unwrap();
    assert_eq!(count.and_then(|x| x.as_i64()), Some(2));
}

//-----------------------------------------------------------------------------

const MAPPING_PARAMS: &str = "
mappers = \"bowtie\"
genome = \"hg19\"

[annotations]
dir = \"annotations\"
database = \"csvdb\"
interface_contigs = \"contigs.tsv\"
";

fn mapping_workspace(dir: &Path, extra: &str) -> Workspace {
    internal::write_text(dir, "liver-R1.fastq.gz", "@read1\nACGT\n+\nIIII\n");
    internal::write_text(dir, "brain-R1.fastq.gz", "@read1\nACGT\n+\nIIII\n");
    fs::create_dir_all(dir.join("annotations")).unwrap();
    internal::write_text(&dir.join("annotations"), "contigs.tsv", "chr1\t1000\n");
    let workspace = workspace_from(dir, mapping::DEFAULTS, MAPPING_PARAMS);
    with_params(&workspace, extra)
}

#[test]
fn mapping_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let workspace = mapping_workspace(dir.path(), "");
    let pipeline = mapping::pipeline(&workspace);
    assert!(pipeline.is_ok(), "Failed to build the mapping pipeline: {}", pipeline.unwrap_err());
    let pipeline = pipeline.unwrap();

    let targets: Vec<&str> = pipeline.targets().collect();
    for target in ["mapping", "qc", "duplication", "wig", "views", "full"] {
        assert!(targets.contains(&target), "Missing target {}", target);
    }

    let bowtie = stage(&pipeline, "mapReadsWithBowtie");
    assert!(bowtie.is_active(), "Configured mapper is inactive");
    let outputs: Vec<PathBuf> = bowtie.job_list().iter().flat_map(|x| x.output_files().to_vec()).collect();
    assert_eq!(outputs, vec![
        dir.path().join("bowtie.dir/brain-R1.bowtie.bam"),
        dir.path().join("bowtie.dir/liver-R1.bowtie.bam"),
    ]);
    let tophat = stage(&pipeline, "mapReadsWithTophat");
    assert!(!tophat.is_active(), "Unconfigured mapper is active");
    assert!(tophat.job_list().is_empty(), "Unconfigured mapper has jobs");
    assert!(stage(&pipeline, "identifyProteinCodingGenes").job_list().is_empty(), "Reference built without spliced mappers");

    let mapping = planned_stages(&pipeline, "mapping", dir.path());
    assert_eq!(mapping.into_iter().collect::<Vec<_>>(), vec![String::from("mapReadsWithBowtie")]);
    let full = planned_stages(&pipeline, "full", dir.path());
    for name in ["countReads", "mapReadsWithBowtie", "buildBAMStats", "loadBAMStats", "loadPicardStats", "createViewMapping"] {
        assert!(full.contains(name), "Stage {} is not planned for target full", name);
    }
    assert!(!full.contains("mergeBAMFiles"), "Merging without a merge pattern");
}

#[test]
fn merged_mapping() {
    let dir = tempfile::tempdir().unwrap();
    let extra = r#"
        [merge_pattern]
        input = '(\S+)-(\S+)'
        output = 'all-\2'
    "#;
    let workspace = mapping_workspace(dir.path(), extra);
    let pipeline = mapping::pipeline(&workspace);
    assert!(pipeline.is_ok(), "Failed to build the mapping pipeline: {}", pipeline.unwrap_err());
    let pipeline = pipeline.unwrap();

    let merge = stage(&pipeline, "mergeBAMFiles");
    assert!(merge.is_active(), "Merging is inactive with a merge pattern");
    let outputs: Vec<PathBuf> = merge.job_list().iter().flat_map(|x| x.output_files().to_vec()).collect();
    assert_eq!(outputs, vec![dir.path().join("bowtie.dir/all-R1.bowtie.bam")]);
    let counts = stage(&pipeline, "mergeReadCounts");
    assert_eq!(counts.job_list().len(), 1);
    assert_eq!(counts.job_list()[0].output_files(), &[dir.path().join("nreads.dir/all-R1.nreads")]);
}

#[test]
fn invalid_mapping_configurations() {
    let dir = tempfile::tempdir().unwrap();
    let unknown = mapping_workspace(dir.path(), "mappers = \"bowtie,mapper\"");
    assert!(mapping::pipeline(&unknown).is_err(), "Accepted an unknown mapper");

    // Spliced mapping needs the gene information table from the annotations.
    let spliced = with_params(&unknown, "mappers = \"tophat\"");
    assert!(mapping::pipeline(&spliced).is_err(), "Built a spliced mapping pipeline without annotations");
}

//-----------------------------------------------------------------------------

const GENESET: &str = "\
chr1\tprotein_coding\texon\t100\t200\t.\t+\t.\tgene_id \"G1\"; transcript_id \"T1\"; gene_biotype \"protein_coding\";
chr1\tprotein_coding\texon\t300\t400\t.\t+\t.\tgene_id \"G1\"; transcript_id \"T1\"; gene_biotype \"protein_coding\";
chr2\tlincRNA\texon\t10\t50\t.\t-\t.\tgene_id \"G2\"; transcript_id \"T2\"; gene_biotype \"lincRNA\";
";

const DESIGN: &str = "\
track\tinclude\tgroup\tpair
liver-R1\t1\tliver\t0
liver-R2\t1\tliver\t0
brain-R1\t1\tbrain\t0
brain-R2\t1\tbrain\t0
";

fn rnaseq_workspace(dir: &Path, extra: &str) -> Workspace {
    for track in ["liver-R1", "liver-R2", "brain-R1", "brain-R2"] {
        internal::write_text(dir, &format!("{}.bam", track), "");
    }
    internal::write_text(dir, "refcoding.gtf.gz", GENESET);
    internal::write_text(dir, "design1.tsv", DESIGN);
    workspace_from(dir, rnaseq::DEFAULTS, extra)
}

#[test]
fn rnaseq_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let workspace = rnaseq_workspace(dir.path(), "");
    let pipeline = rnaseq::pipeline(&workspace);
    assert!(pipeline.is_ok(), "Failed to build the RNA-seq pipeline: {}", pipeline.unwrap_err());
    let pipeline = pipeline.unwrap();

    let targets: Vec<&str> = pipeline.targets().collect();
    for target in ["counting", "expression", "diff_expression", "qc", "full"] {
        assert!(targets.contains(&target), "Missing target {}", target);
    }

    assert_eq!(stage(&pipeline, "buildFeatureCounts").job_list().len(), 4);
    assert_eq!(stage(&pipeline, "runCufflinks").job_list().len(), 4);
    let aggregate = stage(&pipeline, "aggregateFeatureCounts");
    assert_eq!(aggregate.job_list()[0].output_files(), &[dir.path().join("featurecounts.dir/refcoding.featurecounts.tsv.gz")]);

    let genes = stage(&pipeline, "buildGeneLevelReadCounts");
    assert_eq!(genes.job_list().len(), 4);
    assert_eq!(stage(&pipeline, "loadGeneLevelReadCounts").job_list().len(), 4);
    assert_eq!(stage(&pipeline, "buildTranscriptLevelReadCounts").job_list().len(), 4);
    let aggregate = stage(&pipeline, "aggregateGeneLevelReadCounts");
    assert_eq!(aggregate.job_list().len(), 1);
    assert_eq!(aggregate.job_list()[0].input_files().len(), 4);
    assert_eq!(aggregate.job_list()[0].output_files(), &[dir.path().join("genecounts.dir/refcoding.genecounts.tsv.gz")]);

    // Both count matrices are summarized and plotted.
    assert_eq!(stage(&pipeline, "summarizeCounts").job_list().len(), 2);
    let plots = stage(&pipeline, "plotTagStats");
    assert_eq!(plots.job_list().len(), 2);
    assert_eq!(plots.job_list()[1].output_files(), &[dir.path().join("tagplots.dir/design1.refcoding.genecounts.log")]);
    assert!(stage(&pipeline, "plotDETagStats").job_list().is_empty(), "DESeq2 results are plotted");

    let deseq2 = stage(&pipeline, "runDESeq2");
    assert!(deseq2.is_active(), "Default method is inactive");
    assert_eq!(deseq2.job_list()[0].output_files(), &[dir.path().join("deseq2.dir/design1.refcoding.tsv.gz")]);
    for name in ["runDESeq", "runEdgeR", "runCuffdiff", "buildMaskGtf"] {
        assert!(stage(&pipeline, name).job_list().is_empty(), "Unconfigured stage {} has jobs", name);
    }

    let full = planned_stages(&pipeline, "full", dir.path());
    for name in [
        "loadGeneSetGeneInformation", "loadCufflinksFPKM", "loadFeatureCounts", "loadFeatureCountsSummary",
        "summarizeCountsPerDesign", "loadTagCountSummary", "loadDESeq2", "buildDESeq2Stats", "loadDEStats",
    ] {
        assert!(full.contains(name), "Stage {} is not planned for target full", name);
    }
    assert!(!full.contains("runEdgeR"), "Unconfigured method is planned");
    assert!(!full.contains("buildTranscriptLevelReadCounts"), "Transcript counts are planned for target full");

    let qc = planned_stages(&pipeline, "qc", dir.path());
    for name in ["plotTagStats", "aggregateGeneLevelReadCounts", "buildGeneLevelReadCounts", "loadDEStats"] {
        assert!(qc.contains(name), "Stage {} is not planned for target qc", name);
    }
    let expression = planned_stages(&pipeline, "expression", dir.path());
    assert!(expression.contains("loadGeneLevelReadCounts"), "Gene-level counts are not loaded for target expression");
}

#[test]
fn rnaseq_cuffdiff() {
    let dir = tempfile::tempdir().unwrap();
    let workspace = rnaseq_workspace(dir.path(), "methods = \"cuffdiff,edger\"");
    let pipeline = rnaseq::pipeline(&workspace);
    assert!(pipeline.is_ok(), "Failed to build the RNA-seq pipeline: {}", pipeline.unwrap_err());
    let pipeline = pipeline.unwrap();

    let cuffdiff = stage(&pipeline, "runCuffdiff");
    assert_eq!(cuffdiff.job_list().len(), 1);
    let job = &cuffdiff.job_list()[0];
    assert!(job.input_files().contains(&dir.path().join("brain-R2.bam")), "BAM files are not inputs of cuffdiff");
    assert_eq!(job.output_files(), &[dir.path().join("cuffdiff.dir/design1.refcoding.fpkm.tsv.gz")]);
    assert_eq!(stage(&pipeline, "runEdgeR").job_list().len(), 1);
    assert!(stage(&pipeline, "runDESeq2").job_list().is_empty(), "Unconfigured method has jobs");

    let plots: Vec<PathBuf> = stage(&pipeline, "plotDETagStats").job_list().iter()
        .flat_map(|x| x.output_files().iter().cloned())
        .collect();
    assert_eq!(plots, vec![
        dir.path().join("edger.dir/design1.refcoding.plots"),
        dir.path().join("cuffdiff.dir/design1.refcoding.fpkm.plots"),
    ]);

    let unknown = rnaseq_workspace(dir.path(), "methods = \"limma\"");
    assert!(rnaseq::pipeline(&unknown).is_err(), "Accepted an unknown method");
}

#[test]
fn rnaseq_gene_information() {
    let dir = tempfile::tempdir().unwrap();
    let workspace = rnaseq_workspace(dir.path(), "");
    let pipeline = rnaseq::pipeline(&workspace).unwrap();
    let runner = Runner::new(Executor::new(dir.path()), 2);
    let result = runner.run(&pipeline, "loadGeneSetGeneInformation", Mode::Make);
    assert!(result.is_ok(), "Failed to load gene information: {}", result.unwrap_err());
    assert_eq!(result.unwrap().jobs.len(), 1);

    let database = Database::open(workspace.database()).unwrap();
    let rows = database.query_column("SELECT gene_id FROM refcoding_geneinfo ORDER BY gene_id");
    assert!(rows.is_ok(), "Failed to query gene information: {}", rows.unwrap_err());
    let rows: Vec<String> = rows.unwrap().iter().map(|x| x.to_string()).collect();
    assert_eq!(rows, vec!["G1", "G2"]);
    let length = database.query_value("SELECT exonic_length FROM refcoding_geneinfo WHERE gene_id = 'G1'").unwrap();
    assert_eq!(length.and_then(|x| x.as_i64()), Some(202));
}

//-----------------------------------------------------------------------------
