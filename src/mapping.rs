//! Read files and the commands for mapping them.
//!
//! Input read files are recognized by their suffix (see [`ReadFormat`]), and the part of the file name before the suffix is the track.
//! A [`Mapper`] turns a [`ReadFile`] into a shell statement that produces a coordinate-sorted and indexed BAM file.
//! Mappers are created by name with [`mapper`], using the parameters `<name>_executable`, `<name>_options`, `<name>_threads`, and `<name>_index_dir`.
//!
//! Mapping results from several tracks can be merged with a [`MergePattern`].

use crate::params::Params;
use crate::statement::Statement;
use crate::tasks::Job;
use crate::tracks;
use crate::utils;

use std::collections::BTreeMap;
use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};
use regex::Regex;

#[cfg(test)]
mod tests;

//-----------------------------------------------------------------------------

/// Formats of input read files.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReadFormat {
    /// Paired-end reads in `.fastq.1.gz` and `.fastq.2.gz`.
    PairedFastq,
    /// Single-end reads in `.fastq.gz`.
    Fastq,
    /// Reads in `.fa.gz`.
    Fasta,
    /// Short read archive `.sra`.
    Sra,
    /// Paired-end colour-space reads in `.csfasta.F3.gz` and `.csfasta.F5.gz`.
    PairedCsfasta,
    /// Colour-space reads in `.csfasta.gz`.
    Csfasta,
    /// Illumina export files `.export.txt.gz`.
    Export,
}

impl ReadFormat {
    /// All formats in the order they are tried.
    pub const ALL: [ReadFormat; 7] = [
        ReadFormat::PairedFastq, ReadFormat::Fastq, ReadFormat::Fasta, ReadFormat::Sra,
        ReadFormat::PairedCsfasta, ReadFormat::Csfasta, ReadFormat::Export,
    ];

    /// Returns the file name suffix of the format.
    pub fn suffix(&self) -> &'static str {
        match self {
            ReadFormat::PairedFastq => ".fastq.1.gz",
            ReadFormat::Fastq => ".fastq.gz",
            ReadFormat::Fasta => ".fa.gz",
            ReadFormat::Sra => ".sra",
            ReadFormat::PairedCsfasta => ".csfasta.F3.gz",
            ReadFormat::Csfasta => ".csfasta.gz",
            ReadFormat::Export => ".export.txt.gz",
        }
    }

    /// Returns the suffix of the second mate for paired formats.
    pub fn mate_suffix(&self) -> Option<&'static str> {
        match self {
            ReadFormat::PairedFastq => Some(".fastq.2.gz"),
            ReadFormat::PairedCsfasta => Some(".csfasta.F5.gz"),
            _ => None,
        }
    }

    /// Returns `true` if the reads are in colour space.
    pub fn is_colour_space(&self) -> bool {
        matches!(self, ReadFormat::PairedCsfasta | ReadFormat::Csfasta)
    }

    /// Detects the format from the file name.
    pub fn detect<P: AsRef<Path>>(filename: P) -> Option<Self> {
        let name = utils::basename(filename);
        Self::ALL.into_iter().find(|format| name.ends_with(format.suffix()) && name.len() > format.suffix().len())
    }
}

impl Display for ReadFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.suffix()[1..])
    }
}

//-----------------------------------------------------------------------------

/// An input read file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadFile {
    /// Path to the file.
    pub path: PathBuf,
    /// Format of the file.
    pub format: ReadFormat,
    /// File name without the format suffix.
    pub track: String,
}

impl ReadFile {
    /// Recognizes a read file.
    ///
    /// # Errors
    ///
    /// Returns an error if the suffix is not recognized or if the second mate of a paired file does not exist.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let path = path.as_ref().to_path_buf();
        let format = ReadFormat::detect(&path).ok_or_else(|| {
            format!("Unknown read file format: {}", path.display())
        })?;
        let name = utils::basename(&path);
        let track = utils::snip(&name, format.suffix())?;
        let result = ReadFile { path, format, track };
        if let Some(mate) = result.mate() {
            if !utils::file_exists(&mate) {
                return Err(format!("Paired file {} is missing the second mate {}", result.path.display(), mate.display()));
            }
        }
        Ok(result)
    }

    /// Returns the path to the second mate for paired formats.
    pub fn mate(&self) -> Option<PathBuf> {
        let suffix = self.format.mate_suffix()?;
        Some(self.path.with_file_name(format!("{}{}", self.track, suffix)))
    }

    /// Returns the path as a string.
    pub fn path_str(&self) -> String {
        utils::path_str(&self.path)
    }
}

/// Finds the read files in the directory, sorted by file name.
pub fn discover_reads<P: AsRef<Path>>(dir: P) -> Result<Vec<ReadFile>, String> {
    let mut result = Vec::new();
    for format in ReadFormat::ALL {
        let pattern = format!("*{}", format.suffix());
        for path in tracks::list_files(dir.as_ref(), &pattern)? {
            // A `.fastq.1.gz` file does not match `*.fastq.gz`, but other formats may overlap.
            if ReadFormat::detect(&path) == Some(format) {
                result.push(ReadFile::new(&path)?);
            }
        }
    }
    result.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(result)
}

//-----------------------------------------------------------------------------

/// Sequences ready for a mapper.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreparedReads {
    /// First (or only) file, gzip-compressed.
    pub first: String,
    /// Second mate for paired reads.
    pub second: Option<String>,
    /// Sequences are in fasta format.
    pub fasta: bool,
    /// Sequences are in colour space.
    pub colour_space: bool,
}

impl PreparedReads {
    /// Returns `true` if the reads are paired.
    pub fn is_paired(&self) -> bool {
        self.second.is_some()
    }

    /// Returns the files separated by the given string.
    pub fn files(&self, separator: &str) -> String {
        match &self.second {
            Some(second) => format!("{}{}{}", self.first, separator, second),
            None => self.first.clone(),
        }
    }
}

/// File names used while mapping reads into a BAM file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MappingContext {
    /// Final sorted BAM file.
    pub outfile: String,
    /// Temporary directory removed after mapping.
    pub tmpdir: String,
    /// Unsorted BAM file written by the mapper.
    pub unsorted: String,
    /// Log file of the mapper.
    pub log: String,
}

impl MappingContext {
    /// Creates a context for the output file, which must end with `.bam`.
    pub fn new<P: AsRef<Path>>(outfile: P) -> Result<Self, String> {
        let outfile = utils::path_str(outfile);
        let prefix = utils::snip(&outfile, ".bam")?;
        let tmpdir = format!("{}.tmp", prefix);
        Ok(MappingContext {
            unsorted: format!("{}/unsorted.bam", tmpdir),
            log: format!("{}.log", outfile),
            tmpdir,
            outfile,
        })
    }
}

// Commands that turn the read file into files the mappers can read.
fn prepare_reads(input: &ReadFile, tmpdir: &str, sra_paired: bool) -> (Vec<String>, PreparedReads) {
    let path = input.path_str();
    let mate = input.mate().map(utils::path_str);
    match input.format {
        ReadFormat::PairedFastq | ReadFormat::Fastq => (Vec::new(), PreparedReads {
            first: path, second: mate, fasta: false, colour_space: false,
        }),
        ReadFormat::Fasta => (Vec::new(), PreparedReads {
            first: path, second: None, fasta: true, colour_space: false,
        }),
        ReadFormat::PairedCsfasta | ReadFormat::Csfasta => (Vec::new(), PreparedReads {
            first: path, second: mate, fasta: true, colour_space: true,
        }),
        ReadFormat::Sra => {
            let command = format!("fastq-dump --split-files --gzip --outdir {} {}", tmpdir, path);
            let first = format!("{}/{}_1.fastq.gz", tmpdir, input.track);
            let second = if sra_paired { Some(format!("{}/{}_2.fastq.gz", tmpdir, input.track)) } else { None };
            (vec![command], PreparedReads { first, second, fasta: false, colour_space: false })
        },
        ReadFormat::Export => {
            // Columns 9 and 10 are the sequence and the quality string.
            let fastq = format!("{}/{}.fastq.gz", tmpdir, input.track);
            let command = format!(
                "zcat {} | awk -F'\\t' '{{ printf(\"@%s_%s:%s:%s:%s\\n%s\\n+\\n%s\\n\", $1, $2, $3, $4, $5, $9, $10) }}' | gzip > {}",
                path, fastq
            );
            (vec![command], PreparedReads { first: fastq, second: None, fasta: false, colour_space: false })
        },
    }
}

//-----------------------------------------------------------------------------

/// Parameters shared by all mappers.
#[derive(Clone, Debug, PartialEq)]
pub struct MapperConfig {
    /// Executable of the mapper.
    pub executable: String,
    /// Additional command line options.
    pub options: String,
    /// Number of threads.
    pub threads: usize,
    /// Memory requirement, if given.
    pub memory: Option<String>,
    /// Directory containing the index.
    pub index_dir: String,
    /// Name of the genome (the index prefix).
    pub genome: String,
    /// Replace sequences and qualities with `*` in the output.
    pub strip_sequence: bool,
    /// Treat `.sra` archives as paired-end data.
    pub paired_end: bool,
}

impl MapperConfig {
    /// Reads the configuration for the mapper from the parameters.
    ///
    /// Options may refer to other parameters with `%(name)s` placeholders.
    pub fn from_params(params: &Params, name: &str, default_executable: &str) -> Result<Self, String> {
        let options = params.get_str_or(&format!("{}_options", name), "");
        let options = if options.trim().is_empty() { String::new() } else { Statement::new(&options).build(params)? };
        let threads = params.get_int_or(&format!("{}_threads", name), 1)?;
        let memory = params.get(&format!("{}_memory", name)).map(|x| x.to_string());
        let genome_dir = params.get_str_or("genome_dir", ".");
        let genome = params.get_str_or(&format!("{}_genome", name), "");
        let genome = if genome.is_empty() { params.get_str("genome")? } else { genome };
        Ok(MapperConfig {
            executable: params.get_str_or(&format!("{}_executable", name), default_executable),
            options,
            threads: threads.max(1) as usize,
            memory,
            index_dir: params.get_str_or(&format!("{}_index_dir", name), &genome_dir),
            genome,
            strip_sequence: params.flag("strip_sequence")?,
            paired_end: params.flag("paired_end")?,
        })
    }

    /// Returns the index prefix `index_dir/genome`.
    pub fn index(&self) -> String {
        format!("{}/{}", self.index_dir, self.genome)
    }

    /// Returns the options with a leading space, or an empty string.
    fn extra_options(&self) -> String {
        if self.options.is_empty() { String::new() } else { format!(" {}", self.options) }
    }
}

/// A read mapper.
///
/// Implementations provide the mapping command, which writes an unsorted BAM file to [`MappingContext::unsorted`].
/// The provided method [`Mapper::build`] wraps it into a complete statement.
pub trait Mapper: Send + Sync {
    /// Name of the mapper, used for directory and file names.
    fn name(&self) -> &str;

    /// Configuration of the mapper.
    fn config(&self) -> &MapperConfig;

    /// Returns the executable.
    fn executable(&self) -> &str {
        &self.config().executable
    }

    /// Returns `true` if the mapper creates spliced alignments.
    fn is_spliced(&self) -> bool {
        false
    }

    /// Returns `true` if the mapper can map reads in the given format.
    fn supports(&self, format: ReadFormat) -> bool {
        !format.is_colour_space()
    }

    /// Returns the command that maps the reads.
    fn mapping_statement(&self, reads: &PreparedReads, context: &MappingContext) -> Result<String, String>;

    /// Returns the statement that maps the read file into a sorted and indexed BAM file.
    ///
    /// # Errors
    ///
    /// Returns an error if the mapper does not support the format or the output is not a BAM file.
    fn build<P: AsRef<Path>>(&self, input: &ReadFile, outfile: P) -> Result<String, String> where Self: Sized {
        build_statement(self, input, outfile.as_ref())
    }
}

/// Builds the full mapping statement for any mapper.
pub fn build_statement(mapper: &dyn Mapper, input: &ReadFile, outfile: &Path) -> Result<String, String> {
    if !mapper.supports(input.format) {
        return Err(format!("Mapper {} does not support {} input: {}", mapper.name(), input.format, input.path.display()));
    }
    let config = mapper.config();
    let context = MappingContext::new(outfile)?;
    let (preparation, reads) = prepare_reads(input, &context.tmpdir, config.paired_end);

    let mut commands = vec![format!("rm -rf {0}; mkdir -p {0}", context.tmpdir)];
    commands.extend(preparation);
    commands.push(mapper.mapping_statement(&reads, &context)?);
    if config.strip_sequence {
        commands.push(format!(
            "samtools view -h {} | awk 'BEGIN {{ OFS = \"\\t\" }} /^@/ {{ print; next }} {{ $10 = \"*\"; $11 = \"*\"; print }}' | samtools sort -@ {} -o {} -",
            context.unsorted, config.threads, context.outfile
        ));
    } else {
        commands.push(format!("samtools sort -@ {} -o {} {}", config.threads, context.outfile, context.unsorted));
    }
    commands.push(format!("samtools index {}", context.outfile));
    commands.push(format!("rm -rf {}", context.tmpdir));
    Ok(commands.join("; checkpoint; "))
}

//-----------------------------------------------------------------------------

/// Bowtie, which also maps colour-space reads.
///
/// The same implementation maps reads against the reference transcriptome under the name `transcriptome`.
#[derive(Clone, Debug)]
pub struct Bowtie {
    name: String,
    config: MapperConfig,
}

impl Bowtie {
    /// Creates a genomic bowtie mapper.
    pub fn new(config: MapperConfig) -> Self {
        Bowtie { name: String::from("bowtie"), config }
    }

    /// Creates a bowtie mapper against the transcriptome with the given index prefix.
    pub fn transcriptome(mut config: MapperConfig, prefix: &str) -> Self {
        if let Some((dir, genome)) = prefix.rsplit_once('/') {
            config.index_dir = dir.to_string();
            config.genome = genome.to_string();
        } else {
            config.index_dir = String::from(".");
            config.genome = prefix.to_string();
        }
        Bowtie { name: String::from("transcriptome"), config }
    }
}

impl Mapper for Bowtie {
    fn name(&self) -> &str {
        &self.name
    }

    fn config(&self) -> &MapperConfig {
        &self.config
    }

    fn is_spliced(&self) -> bool {
        self.name == "transcriptome"
    }

    fn supports(&self, _format: ReadFormat) -> bool {
        true
    }

    fn mapping_statement(&self, reads: &PreparedReads, context: &MappingContext) -> Result<String, String> {
        let mut flags = String::new();
        let mut index = self.config.index();
        if reads.colour_space {
            flags.push_str(" -C");
            index.push_str("_cs");
        }
        if reads.fasta {
            flags.push_str(" -f");
        }
        let input = match &reads.second {
            Some(second) => format!("-1 <(zcat {}) -2 <(zcat {})", reads.first, second),
            None => format!("<(zcat {})", reads.first),
        };
        Ok(format!(
            "{} --sam -p {}{}{} {} {} 2> {} | samtools view -b -o {} -",
            self.config.executable, self.config.threads, flags, self.config.extra_options(),
            index, input, context.log, context.unsorted
        ))
    }
}

/// Bowtie2.
#[derive(Clone, Debug)]
pub struct Bowtie2 {
    config: MapperConfig,
}

impl Bowtie2 {
    pub fn new(config: MapperConfig) -> Self {
        Bowtie2 { config }
    }
}

impl Mapper for Bowtie2 {
    fn name(&self) -> &str {
        "bowtie2"
    }

    fn config(&self) -> &MapperConfig {
        &self.config
    }

    fn mapping_statement(&self, reads: &PreparedReads, context: &MappingContext) -> Result<String, String> {
        let input = match &reads.second {
            Some(second) => format!("-1 {} -2 {}", reads.first, second),
            None => format!("-U {}", reads.first),
        };
        let fasta = if reads.fasta { " -f" } else { "" };
        Ok(format!(
            "{} -p {}{}{} -x {} {} 2> {} | samtools view -b -o {} -",
            self.config.executable, self.config.threads, fasta, self.config.extra_options(),
            self.config.index(), input, context.log, context.unsorted
        ))
    }
}

/// BWA algorithms.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BwaAlgorithm {
    /// `bwa aln` followed by `bwa samse` or `bwa sampe`.
    Aln,
    /// `bwa mem`.
    Mem,
}

impl BwaAlgorithm {
    pub fn parse(value: &str) -> Result<Self, String> {
        match value {
            "aln" => Ok(BwaAlgorithm::Aln),
            "mem" => Ok(BwaAlgorithm::Mem),
            _ => Err(format!("bwa algorithm '{}' not known", value)),
        }
    }
}

/// BWA with the index `index_dir/genome.fa`.
#[derive(Clone, Debug)]
pub struct Bwa {
    config: MapperConfig,
    algorithm: BwaAlgorithm,
}

impl Bwa {
    pub fn new(config: MapperConfig, algorithm: BwaAlgorithm) -> Self {
        Bwa { config, algorithm }
    }

    pub fn algorithm(&self) -> BwaAlgorithm {
        self.algorithm
    }
}

impl Mapper for Bwa {
    fn name(&self) -> &str {
        "bwa"
    }

    fn config(&self) -> &MapperConfig {
        &self.config
    }

    fn mapping_statement(&self, reads: &PreparedReads, context: &MappingContext) -> Result<String, String> {
        let exe = &self.config.executable;
        let threads = self.config.threads;
        let options = self.config.extra_options();
        let index = format!("{}.fa", self.config.index());
        let to_bam = format!("samtools view -b -o {} -", context.unsorted);
        match self.algorithm {
            BwaAlgorithm::Mem => Ok(format!(
                "{} mem -t {}{} {} {} 2> {} | {}",
                exe, threads, options, index, reads.files(" "), context.log, to_bam
            )),
            BwaAlgorithm::Aln => {
                let first_sai = format!("{}/1.sai", context.tmpdir);
                let mut commands = vec![format!(
                    "{} aln -t {}{} {} {} > {} 2> {}", exe, threads, options, index, reads.first, first_sai, context.log
                )];
                match &reads.second {
                    Some(second) => {
                        let second_sai = format!("{}/2.sai", context.tmpdir);
                        commands.push(format!(
                            "{} aln -t {}{} {} {} > {} 2>> {}", exe, threads, options, index, second, second_sai, context.log
                        ));
                        commands.push(format!(
                            "{} sampe {} {} {} {} {} 2>> {} | {}",
                            exe, index, first_sai, second_sai, reads.first, second, context.log, to_bam
                        ));
                    },
                    None => {
                        commands.push(format!(
                            "{} samse {} {} {} 2>> {} | {}", exe, index, first_sai, reads.first, context.log, to_bam
                        ));
                    },
                }
                Ok(commands.join("; checkpoint; "))
            },
        }
    }
}

/// Tophat and tophat2.
///
/// Tophat logs are kept in `<outfile>.logs`.
#[derive(Clone, Debug)]
pub struct Tophat {
    name: String,
    config: MapperConfig,
}

impl Tophat {
    /// Creates a tophat mapper using a bowtie index.
    pub fn new(config: MapperConfig) -> Self {
        Tophat { name: String::from("tophat"), config }
    }

    /// Creates a tophat2 mapper using a bowtie2 index.
    pub fn tophat2(config: MapperConfig) -> Self {
        Tophat { name: String::from("tophat2"), config }
    }
}

impl Mapper for Tophat {
    fn name(&self) -> &str {
        &self.name
    }

    fn config(&self) -> &MapperConfig {
        &self.config
    }

    fn is_spliced(&self) -> bool {
        true
    }

    fn mapping_statement(&self, reads: &PreparedReads, context: &MappingContext) -> Result<String, String> {
        let outdir = format!("{}/{}", context.tmpdir, self.name);
        let commands = [
            format!(
                "{} --output-dir {} --num-threads {}{} {} {} >> {} 2>&1",
                self.config.executable, outdir, self.config.threads, self.config.extra_options(),
                self.config.index(), reads.files(" "), context.log
            ),
            format!("mv {}/accepted_hits.bam {}", outdir, context.unsorted),
            format!("rm -rf {0}.logs; mv {1}/logs {0}.logs", context.outfile, outdir),
        ];
        Ok(commands.join("; checkpoint; "))
    }
}

/// Hisat.
#[derive(Clone, Debug)]
pub struct Hisat {
    config: MapperConfig,
    library_type: String,
}

impl Hisat {
    /// Creates a hisat mapper; a non-empty library type is passed as `--rna-strandness`.
    pub fn new(config: MapperConfig, library_type: &str) -> Self {
        Hisat { config, library_type: library_type.to_string() }
    }
}

impl Mapper for Hisat {
    fn name(&self) -> &str {
        "hisat"
    }

    fn config(&self) -> &MapperConfig {
        &self.config
    }

    fn is_spliced(&self) -> bool {
        true
    }

    fn mapping_statement(&self, reads: &PreparedReads, context: &MappingContext) -> Result<String, String> {
        let input = match &reads.second {
            Some(second) => format!("-1 {} -2 {}", reads.first, second),
            None => format!("-U {}", reads.first),
        };
        let strandness = if self.library_type.is_empty() {
            String::new()
        } else {
            format!(" --rna-strandness {}", self.library_type)
        };
        let fasta = if reads.fasta { " -f" } else { "" };
        Ok(format!(
            "{} -p {}{}{}{} -x {} {} 2> {} | samtools view -b -o {} -",
            self.config.executable, self.config.threads, fasta, strandness, self.config.extra_options(),
            self.config.index(), input, context.log, context.unsorted
        ))
    }
}

/// GSNAP.
#[derive(Clone, Debug)]
pub struct Gsnap {
    config: MapperConfig,
}

impl Gsnap {
    pub fn new(config: MapperConfig) -> Self {
        Gsnap { config }
    }
}

impl Mapper for Gsnap {
    fn name(&self) -> &str {
        "gsnap"
    }

    fn config(&self) -> &MapperConfig {
        &self.config
    }

    fn is_spliced(&self) -> bool {
        true
    }

    fn mapping_statement(&self, reads: &PreparedReads, context: &MappingContext) -> Result<String, String> {
        Ok(format!(
            "{} --format=sam --nthreads={} --gunzip{} -D {} -d {} {} 2> {} | samtools view -b -o {} -",
            self.config.executable, self.config.threads, self.config.extra_options(),
            self.config.index_dir, self.config.genome, reads.files(" "), context.log, context.unsorted
        ))
    }
}

/// STAR.
///
/// The final log of a run is kept in `<outfile>.final.log`.
#[derive(Clone, Debug)]
pub struct Star {
    config: MapperConfig,
}

impl Star {
    pub fn new(config: MapperConfig) -> Self {
        Star { config }
    }
}

impl Mapper for Star {
    fn name(&self) -> &str {
        "star"
    }

    fn config(&self) -> &MapperConfig {
        &self.config
    }

    fn is_spliced(&self) -> bool {
        true
    }

    fn mapping_statement(&self, reads: &PreparedReads, context: &MappingContext) -> Result<String, String> {
        let commands = [
            format!(
                "{} --runMode alignReads --runThreadN {} --genomeDir {}{} --readFilesIn {} --readFilesCommand zcat --outSAMtype BAM Unsorted --outFileNamePrefix {}/ >> {} 2>&1",
                self.config.executable, self.config.threads, self.config.index(), self.config.extra_options(),
                reads.files(" "), context.tmpdir, context.log
            ),
            format!("mv {}/Aligned.out.bam {}", context.tmpdir, context.unsorted),
            format!("mv {}/Log.final.out {}.final.log", context.tmpdir, context.outfile),
        ];
        Ok(commands.join("; checkpoint; "))
    }
}

//-----------------------------------------------------------------------------

/// Names of all supported mappers.
pub const MAPPERS: [&str; 9] = ["bowtie", "bowtie2", "bwa", "tophat", "tophat2", "hisat", "gsnap", "star", "transcriptome"];

/// Mappers that produce spliced alignments.
pub const SPLICED_MAPPERS: [&str; 6] = ["tophat", "tophat2", "gsnap", "star", "transcriptome", "hisat"];

/// Returns `true` if any of the configured mappers produces spliced alignments.
pub fn spliced_mapping<S: AsRef<str>>(mappers: &[S]) -> bool {
    mappers.iter().any(|x| SPLICED_MAPPERS.contains(&x.as_ref()))
}

/// Creates the named mapper using the parameters.
///
/// The `transcriptome` mapper uses the bowtie parameters with `bowtie_transcriptome_options` and maps against `transcriptome_prefix`.
///
/// # Errors
///
/// Returns an error if the mapper is not known, a required parameter is missing, or the bwa algorithm is not known.
pub fn mapper(name: &str, params: &Params, transcriptome_prefix: &str) -> Result<Box<dyn Mapper>, String> {
    let result: Box<dyn Mapper> = match name {
        "bowtie" => Box::new(Bowtie::new(MapperConfig::from_params(params, "bowtie", "bowtie")?)),
        "bowtie2" => Box::new(Bowtie2::new(MapperConfig::from_params(params, "bowtie2", "bowtie2")?)),
        "bwa" => {
            let algorithm = BwaAlgorithm::parse(&params.get_str_or("bwa_algorithm", "aln"))?;
            Box::new(Bwa::new(MapperConfig::from_params(params, "bwa", "bwa")?, algorithm))
        },
        "tophat" => Box::new(Tophat::new(MapperConfig::from_params(params, "tophat", "tophat")?)),
        "tophat2" => Box::new(Tophat::tophat2(MapperConfig::from_params(params, "tophat2", "tophat2")?)),
        "hisat" => {
            let library_type = params.get_str_or("hisat_library_type", "");
            Box::new(Hisat::new(MapperConfig::from_params(params, "hisat", "hisat")?, &library_type))
        },
        "gsnap" => Box::new(Gsnap::new(MapperConfig::from_params(params, "gsnap", "gsnap")?)),
        "star" => Box::new(Star::new(MapperConfig::from_params(params, "star", "STAR")?)),
        "transcriptome" => {
            let mut config = MapperConfig::from_params(params, "bowtie", "bowtie")?;
            config.options = params.get_str_or("bowtie_transcriptome_options", "");
            Box::new(Bowtie::transcriptome(config, transcriptome_prefix))
        },
        _ => return Err(format!("Unknown mapper: {}", name)),
    };
    Ok(result)
}

//-----------------------------------------------------------------------------

/// Counts the reads in an input file.
///
/// The output file contains a single line `nreads\t<n>`.
/// Paired files are counted by the first mate, so the count is the number of fragments.
#[derive(Clone, Debug, Default)]
pub struct ReadCounter;

impl ReadCounter {
    /// Returns the statement counting the reads.
    pub fn build<P: AsRef<Path>>(&self, input: &ReadFile, outfile: P) -> String {
        let path = input.path_str();
        let outfile = utils::path_str(outfile);
        let count = match input.format {
            ReadFormat::PairedFastq | ReadFormat::Fastq => {
                format!("zcat {} | awk 'END {{ printf(\"nreads\\t%i\\n\", NR / 4) }}'", path)
            },
            ReadFormat::Fasta | ReadFormat::PairedCsfasta | ReadFormat::Csfasta => {
                format!("zcat {} | awk '/^>/ {{ n++ }} END {{ printf(\"nreads\\t%i\\n\", n) }}'", path)
            },
            ReadFormat::Sra => {
                format!("fastq-dump --stdout {} | awk 'END {{ printf(\"nreads\\t%i\\n\", NR / 4) }}'", path)
            },
            ReadFormat::Export => {
                format!("zcat {} | awk 'END {{ printf(\"nreads\\t%i\\n\", NR) }}'", path)
            },
        };
        format!("{} > {}", count, outfile)
    }
}

//-----------------------------------------------------------------------------

/// Collates tracks for merging.
///
/// The input pattern is a regex matched against the whole track name.
/// The output template refers to its capture groups with `\1`, `\2`, and so on.
/// For example, input `(.*)-(R\d+)-L\d+` with output `\1-\2` merges the lanes of each replicate.
#[derive(Clone, Debug)]
pub struct MergePattern {
    input: Regex,
    output: String,
}

impl MergePattern {
    /// Creates a merge pattern.
    pub fn new(input: &str, output: &str) -> Result<Self, String> {
        let input = Regex::new(&format!("^(?:{})$", input.trim())).map_err(|x| x.to_string())?;
        let references = Regex::new(r"\\(\d+)").map_err(|x| x.to_string())?;
        let output = references.replace_all(output.trim(), "$${$1}").into_owned();
        Ok(MergePattern { input, output })
    }

    /// Reads the pattern from parameters `merge_pattern_input` and `merge_pattern_output`.
    ///
    /// Returns [`None`] if neither is set.
    ///
    /// # Errors
    ///
    /// Returns an error if only one of the parameters is set or the pattern is invalid.
    pub fn from_params(params: &Params) -> Result<Option<Self>, String> {
        let input = params.get_str_or("merge_pattern_input", "");
        let output = params.get_str_or("merge_pattern_output", "");
        match (input.trim().is_empty(), output.trim().is_empty()) {
            (true, true) => Ok(None),
            (false, true) => Err(String::from("no output pattern 'merge_pattern_output' specified")),
            (true, false) => Err(String::from("no input pattern 'merge_pattern_input' specified")),
            (false, false) => Ok(Some(Self::new(&input, &output)?)),
        }
    }

    /// Returns the merged name of the track, or [`None`] if the track does not match.
    pub fn merged_name(&self, track: &str) -> Option<String> {
        let captures = self.input.captures(track)?;
        let mut result = String::new();
        captures.expand(&self.output, &mut result);
        Some(result)
    }

    /// Groups the tracks by their merged names.
    ///
    /// Tracks that do not match the pattern are skipped with a warning.
    pub fn collate<S: AsRef<str>>(&self, tracks: &[S]) -> BTreeMap<String, Vec<String>> {
        let mut result: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for track in tracks {
            let track = track.as_ref();
            match self.merged_name(track) {
                Some(name) => result.entry(name).or_default().push(track.to_string()),
                None => warn!("Track {} does not match the merge pattern", track),
            }
        }
        result
    }
}

/// Replaces `link` with a symbolic link to the absolute path of `target`.
pub fn link_file<P: AsRef<Path>, Q: AsRef<Path>>(target: P, link: Q) -> Result<(), String> {
    let target = fs::canonicalize(target.as_ref()).map_err(|x| {
        format!("Cannot resolve {}: {}", target.as_ref().display(), x)
    })?;
    let link = link.as_ref();
    if fs::symlink_metadata(link).is_ok() {
        fs::remove_file(link).map_err(|x| format!("Cannot remove {}: {}", link.display(), x))?;
    }
    std::os::unix::fs::symlink(&target, link).map_err(|x| {
        format!("Cannot link {} to {}: {}", link.display(), target.display(), x)
    })
}

/// Returns a job that merges BAM files into the output file.
///
/// A single input file is linked together with its index instead of merging.
pub fn merge_bams_job(infiles: Vec<PathBuf>, outfile: PathBuf) -> Job {
    if infiles.len() == 1 {
        let source = infiles[0].clone();
        let target = outfile.clone();
        return Job::native(move || {
            info!("{}: only one file for merging, creating a link", target.display());
            link_file(&source, &target)?;
            let mut source_index = source.clone().into_os_string();
            source_index.push(".bai");
            let mut target_index = target.clone().into_os_string();
            target_index.push(".bai");
            link_file(source_index, target_index)
        }).input(&infiles[0]).output(outfile);
    }
    let outname = utils::path_str(&outfile);
    let names: Vec<String> = infiles.iter().map(utils::path_str).collect();
    let statement = format!(
        "samtools merge -f {0} {1} > {0}.log 2>&1; checkpoint; samtools index {0}",
        outname, names.join(" ")
    );
    Job::shell(statement).inputs(infiles).output(outfile)
}

//-----------------------------------------------------------------------------
