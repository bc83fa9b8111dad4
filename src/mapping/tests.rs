use super::*;

use crate::internal;
use crate::tasks::Action;

//-----------------------------------------------------------------------------

// Test-only: lets `Result<Box<dyn Mapper>, _>::unwrap_err()` appear in assertion messages.
impl std::fmt::Debug for dyn Mapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn Mapper")
    }
}

const PARAMS: &str = "
genome = \"hg38\"
genome_dir = \"/data/genomes\"
strip_sequence = false

[bowtie]
threads = 4
options = \"-v 2 --best --strata\"
transcriptome_options = \"-a --best --strata\"

[bowtie2]
index_dir = \"/data/bowtie2\"
options = \"--genome %(genome)s\"

[bwa]
algorithm = \"mem\"
threads = 8

[star]
threads = 12
memory = \"32G\"
";

fn read_file(dir: &Path, name: &str) -> ReadFile {
    let path = internal::write_text(dir, name, "");
    let result = ReadFile::new(&path);
    assert!(result.is_ok(), "Failed to recognize {}: {}", name, result.unwrap_err());
    result.unwrap()
}

fn statement(mapper: &dyn Mapper, input: &ReadFile, outfile: &str) -> String {
    let result = build_statement(mapper, input, Path::new(outfile));
    assert!(result.is_ok(), "Failed to build the statement for {}: {}", mapper.name(), result.unwrap_err());
    result.unwrap()
}

//-----------------------------------------------------------------------------

#[test]
fn format_detection() {
    let cases = [
        ("sample.fastq.1.gz", Some(ReadFormat::PairedFastq)),
        ("sample.fastq.gz", Some(ReadFormat::Fastq)),
        ("sample.fa.gz", Some(ReadFormat::Fasta)),
        ("SRR000001.sra", Some(ReadFormat::Sra)),
        ("sample.csfasta.F3.gz", Some(ReadFormat::PairedCsfasta)),
        ("sample.csfasta.gz", Some(ReadFormat::Csfasta)),
        ("sample.export.txt.gz", Some(ReadFormat::Export)),
        ("sample.fastq.2.gz", None),
        ("sample.bam", None),
        (".fastq.gz", None),
    ];
    for (name, truth) in cases {
        assert_eq!(ReadFormat::detect(name), truth, "Wrong format for {}", name);
    }
    assert_eq!(ReadFormat::PairedFastq.to_string(), "fastq.1.gz");
}

#[test]
fn read_files() {
    let dir = tempfile::tempdir().unwrap();
    let single = read_file(dir.path(), "liver-R1.fastq.gz");
    assert_eq!(single.track, "liver-R1");
    assert_eq!(single.mate(), None);

    internal::write_text(dir.path(), "liver-R2.fastq.2.gz", "");
    let paired = read_file(dir.path(), "liver-R2.fastq.1.gz");
    assert_eq!(paired.track, "liver-R2");
    assert_eq!(paired.mate(), Some(dir.path().join("liver-R2.fastq.2.gz")));

    let orphan = internal::write_text(dir.path(), "liver-R3.fastq.1.gz", "");
    assert!(ReadFile::new(&orphan).is_err(), "Accepted a paired file without the second mate");
    assert!(ReadFile::new(dir.path().join("liver-R4.txt")).is_err(), "Accepted an unknown format");
}

#[test]
fn read_discovery() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["b-R1.fastq.gz", "a-R1.fastq.1.gz", "a-R1.fastq.2.gz", "c-R1.sra", "notes.txt"] {
        internal::write_text(dir.path(), name, "");
    }
    let reads = discover_reads(dir.path());
    assert!(reads.is_ok(), "Failed to discover reads: {}", reads.unwrap_err());
    let reads = reads.unwrap();
    let found: Vec<(&str, ReadFormat)> = reads.iter().map(|x| (x.track.as_str(), x.format)).collect();
    assert_eq!(found, vec![
        ("a-R1", ReadFormat::PairedFastq),
        ("b-R1", ReadFormat::Fastq),
        ("c-R1", ReadFormat::Sra),
    ]);
}

//-----------------------------------------------------------------------------

#[test]
fn mapper_configuration() {
    let params = internal::params_from(PARAMS);
    let config = MapperConfig::from_params(&params, "bowtie2", "bowtie2").unwrap();
    assert_eq!(config.executable, "bowtie2");
    assert_eq!(config.options, "--genome hg38", "Options were not substituted");
    assert_eq!(config.threads, 1);
    assert_eq!(config.index(), "/data/bowtie2/hg38");

    let config = MapperConfig::from_params(&params, "star", "STAR").unwrap();
    assert_eq!(config.threads, 12);
    assert_eq!(config.memory.as_deref(), Some("32G"));
    assert_eq!(config.index(), "/data/genomes/hg38");

    assert!(mapper("stampy", &params, "").is_err(), "Created an unknown mapper");
    let mut broken = params.clone();
    broken.set("bwa_algorithm", "bwasw");
    assert!(mapper("bwa", &broken, "").is_err(), "Accepted an unknown bwa algorithm");
    assert!(mapper("bowtie", &Params::new(), "").is_err(), "Created a mapper without a genome");

    for name in MAPPERS {
        let result = mapper(name, &params, "geneset.dir/refcoding");
        assert!(result.is_ok(), "Failed to create mapper {}: {}", name, result.unwrap_err());
        let result = result.unwrap();
        assert_eq!(result.name(), name);
        assert_eq!(result.is_spliced(), SPLICED_MAPPERS.contains(&name), "Wrong splicing for {}", name);
    }
}

#[test]
fn spliced_mappers() {
    assert!(!spliced_mapping(&["bowtie", "bwa"]));
    assert!(spliced_mapping(&["bowtie", "star"]));
    assert!(!spliced_mapping::<&str>(&[]));
}

//-----------------------------------------------------------------------------

#[test]
fn bowtie2_statement() {
    let dir = tempfile::tempdir().unwrap();
    let params = internal::params_from(PARAMS);
    let mapper = mapper("bowtie2", &params, "").unwrap();
    internal::write_text(dir.path(), "liver-R1.fastq.2.gz", "");
    let input = read_file(dir.path(), "liver-R1.fastq.1.gz");
    let first = input.path_str();
    let second = utils::path_str(input.mate().unwrap());

    let statement = statement(mapper.as_ref(), &input, "bowtie2.dir/liver-R1.bowtie2.bam");
    let expected = [
        String::from("rm -rf bowtie2.dir/liver-R1.bowtie2.tmp; mkdir -p bowtie2.dir/liver-R1.bowtie2.tmp"),
        format!(
            "bowtie2 -p 1 --genome hg38 -x /data/bowtie2/hg38 -1 {} -2 {} 2> bowtie2.dir/liver-R1.bowtie2.bam.log | samtools view -b -o bowtie2.dir/liver-R1.bowtie2.tmp/unsorted.bam -",
            first, second
        ),
        String::from("samtools sort -@ 1 -o bowtie2.dir/liver-R1.bowtie2.bam bowtie2.dir/liver-R1.bowtie2.tmp/unsorted.bam"),
        String::from("samtools index bowtie2.dir/liver-R1.bowtie2.bam"),
        String::from("rm -rf bowtie2.dir/liver-R1.bowtie2.tmp"),
    ];
    assert_eq!(statement, expected.join("; checkpoint; "));

    assert!(build_statement(mapper.as_ref(), &input, Path::new("liver-R1.sam")).is_err(), "Accepted a non-BAM output");
}

#[test]
fn colour_space() {
    let dir = tempfile::tempdir().unwrap();
    let params = internal::params_from(PARAMS);
    let input = read_file(dir.path(), "solid-R1.csfasta.gz");

    let bowtie2 = mapper("bowtie2", &params, "").unwrap();
    let result = build_statement(bowtie2.as_ref(), &input, Path::new("solid-R1.bowtie2.bam"));
    assert!(result.is_err(), "Bowtie2 accepted colour-space reads");

    let bowtie = mapper("bowtie", &params, "").unwrap();
    let statement = statement(bowtie.as_ref(), &input, "solid-R1.bowtie.bam");
    assert!(statement.contains("bowtie --sam -p 4 -C -f -v 2 --best --strata /data/genomes/hg38_cs <(zcat "), "Wrong colour-space command: {}", statement);
}

#[test]
fn sra_and_export_input() {
    let dir = tempfile::tempdir().unwrap();
    let mut params = internal::params_from(PARAMS);
    let sra = read_file(dir.path(), "SRR01.sra");
    let bwa = mapper("bwa", &params, "").unwrap();
    let statement = statement(bwa.as_ref(), &sra, "bwa.dir/SRR01.bwa.bam");
    assert!(statement.contains(&format!("fastq-dump --split-files --gzip --outdir bwa.dir/SRR01.bwa.tmp {}", sra.path_str())));
    assert!(statement.contains("bwa mem -t 8 /data/genomes/hg38.fa bwa.dir/SRR01.bwa.tmp/SRR01_1.fastq.gz 2>"), "Wrong bwa command: {}", statement);

    params.set("paired_end", true);
    let bwa = mapper("bwa", &params, "").unwrap();
    let statement = self::statement(bwa.as_ref(), &sra, "bwa.dir/SRR01.bwa.bam");
    assert!(statement.contains("SRR01_1.fastq.gz bwa.dir/SRR01.bwa.tmp/SRR01_2.fastq.gz"), "Mates not used: {}", statement);

    let export = read_file(dir.path(), "lane1.export.txt.gz");
    let statement = self::statement(bwa.as_ref(), &export, "bwa.dir/lane1.bwa.bam");
    assert!(statement.contains("| gzip > bwa.dir/lane1.bwa.tmp/lane1.fastq.gz"), "Export not converted: {}", statement);
}

#[test]
fn bwa_aln_statement() {
    let dir = tempfile::tempdir().unwrap();
    let mut params = internal::params_from(PARAMS);
    params.set("bwa_algorithm", "aln");
    let input = read_file(dir.path(), "liver-R1.fastq.gz");
    let bwa = mapper("bwa", &params, "").unwrap();
    let statement = statement(bwa.as_ref(), &input, "liver-R1.bwa.bam");
    assert!(statement.contains("bwa aln -t 8 /data/genomes/hg38.fa"), "No alignment step: {}", statement);
    assert!(statement.contains("bwa samse /data/genomes/hg38.fa liver-R1.bwa.tmp/1.sai"), "No samse step: {}", statement);
    assert!(!statement.contains("sampe"), "Single-end reads used sampe");
}

#[test]
fn spliced_statements() {
    let dir = tempfile::tempdir().unwrap();
    let mut params = internal::params_from(PARAMS);
    params.set("strip_sequence", true);
    let input = read_file(dir.path(), "liver-R1.fastq.gz");

    let star = mapper("star", &params, "").unwrap();
    let statement = statement(star.as_ref(), &input, "star.dir/liver-R1.star.bam");
    assert!(statement.contains("STAR --runMode alignReads --runThreadN 12 --genomeDir /data/genomes/hg38"));
    assert!(statement.contains("mv star.dir/liver-R1.star.tmp/Log.final.out star.dir/liver-R1.star.bam.final.log"), "STAR log not kept: {}", statement);
    assert!(statement.contains("$10 = \"*\""), "Sequences not stripped: {}", statement);

    let tophat = mapper("tophat", &params, "").unwrap();
    let statement = self::statement(tophat.as_ref(), &input, "tophat.dir/liver-R1.tophat.bam");
    assert!(statement.contains("mv tophat.dir/liver-R1.tophat.tmp/tophat/logs tophat.dir/liver-R1.tophat.bam.logs"), "Tophat logs not kept: {}", statement);

    let transcriptome = mapper("transcriptome", &params, "geneset.dir/refcoding").unwrap();
    let statement = self::statement(transcriptome.as_ref(), &input, "transcriptome.dir/liver-R1.transcriptome.bam");
    assert!(statement.contains("bowtie --sam -p 4 -a --best --strata geneset.dir/refcoding <(zcat"), "Wrong transcriptome command: {}", statement);
}

//-----------------------------------------------------------------------------

#[test]
fn read_counting() {
    let dir = tempfile::tempdir().unwrap();
    let fastq = read_file(dir.path(), "liver-R1.fastq.gz");
    let statement = ReadCounter.build(&fastq, "nreads.dir/liver-R1.nreads");
    assert_eq!(
        statement,
        format!("zcat {} | awk 'END {{ printf(\"nreads\\t%i\\n\", NR / 4) }}' > nreads.dir/liver-R1.nreads", fastq.path_str())
    );
    let fasta = read_file(dir.path(), "liver-R2.fa.gz");
    assert!(ReadCounter.build(&fasta, "x.nreads").contains("/^>/ { n++ }"));
}

#[test]
fn merge_patterns() {
    let pattern = MergePattern::new(r"(.*)-(R\d+)-L\d+", r"\1-\2").unwrap();
    assert_eq!(pattern.merged_name("liver-R1-L001"), Some(String::from("liver-R1")));
    assert_eq!(pattern.merged_name("liver-R1"), None);

    let tracks = ["liver-R1-L001", "liver-R1-L002", "liver-R2-L001", "other"];
    let groups = pattern.collate(&tracks);
    assert_eq!(groups.len(), 2);
    assert_eq!(groups["liver-R1"], vec!["liver-R1-L001", "liver-R1-L002"]);
    assert_eq!(groups["liver-R2"], vec!["liver-R2-L001"]);

    let mut params = Params::new();
    assert!(MergePattern::from_params(&params).unwrap().is_none());
    params.set("merge_pattern_input", "(.*)-L\\d+");
    assert!(MergePattern::from_params(&params).is_err(), "Accepted an input pattern without output");
    params.set("merge_pattern_output", "\\1");
    let pattern = MergePattern::from_params(&params).unwrap().unwrap();
    assert_eq!(pattern.merged_name("liver-R1-L001"), Some(String::from("liver-R1")));
}

#[test]
fn merge_single_file() {
    let dir = tempfile::tempdir().unwrap();
    let bam = internal::write_text(dir.path(), "liver-R1-L001.bowtie.bam", "bam");
    internal::write_text(dir.path(), "liver-R1-L001.bowtie.bam.bai", "bai");
    let outfile = dir.path().join("liver-R1.bowtie.bam");

    let job = merge_bams_job(vec![bam.clone()], outfile.clone());
    assert_eq!(job.input_files(), &[bam.clone()]);
    match job.action() {
        Action::Native(action) => {
            let result = action();
            assert!(result.is_ok(), "Failed to link: {}", result.unwrap_err());
        },
        Action::Shell(statement) => panic!("Single file merged with a statement: {}", statement),
    }
    assert_eq!(fs::read_to_string(&outfile).unwrap(), "bam");
    assert_eq!(fs::read_to_string(dir.path().join("liver-R1.bowtie.bam.bai")).unwrap(), "bai");

    let second = dir.path().join("liver-R1-L002.bowtie.bam");
    let job = merge_bams_job(vec![bam, second], outfile);
    match job.action() {
        Action::Shell(statement) => assert!(statement.starts_with("samtools merge -f "), "Wrong merge statement: {}", statement),
        Action::Native(_) => panic!("Multiple files linked"),
    }
}

//-----------------------------------------------------------------------------
