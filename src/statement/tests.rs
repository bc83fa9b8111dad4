use super::*;

use crate::utils;

//-----------------------------------------------------------------------------

fn test_params() -> Params {
    let mut params = Params::new();
    params.set("genome", "hg38");
    params.set("bowtie_threads", 4i64);
    params.set("deseq_fdr", 0.1);
    params.set("mappers", "bowtie,star");
    params
}

//-----------------------------------------------------------------------------

#[test]
fn parameters_and_locals() {
    let params = test_params();
    let statement = Statement::new("bowtie -p %(bowtie_threads)i %(genome)s %(infile)s > %(outfile)s")
        .local("infile", "reads.fastq.gz")
        .local("outfile", "reads.sam")
        .build(&params);
    assert!(statement.is_ok(), "Failed to build statement: {}", statement.unwrap_err());
    assert_eq!(statement.unwrap(), "bowtie -p 4 hg38 reads.fastq.gz > reads.sam");
}

#[test]
fn locals_take_precedence() {
    let params = test_params();
    let statement = Statement::new("%(genome)s").local("genome", "mm10").build(&params).unwrap();
    assert_eq!(statement, "mm10", "Parameter used instead of the local value");
}

#[test]
fn conversions() {
    let params = test_params();
    let statement = Statement::new("--fdr=%(deseq_fdr)f --threads=%(bowtie_threads)d --mappers=%(mappers)s")
        .build(&params).unwrap();
    assert_eq!(statement, "--fdr=0.100000 --threads=4 --mappers=bowtie,star");

    let result = Statement::new("%(genome)i").build(&params);
    assert!(result.is_err(), "Formatted a string as an integer");
}

#[test]
fn literal_percent() {
    let params = test_params();
    let statement = Statement::new("awk '{printf(\"%%s\\n\", $1)}' --pattern=%(genome)s.%%s").build(&params).unwrap();
    assert_eq!(statement, "awk '{printf(\"%s\\n\", $1)}' --pattern=hg38.%s");
}

#[test]
fn template_errors() {
    let params = test_params();
    for template in ["%(missing)s", "%(genome", "%(genome)", "%(genome)x", "100%", "%d"] {
        let result = Statement::new(template).build(&params);
        assert!(result.is_err(), "Accepted invalid template {}", template);
    }
    let result = Statement::new("  \n \n").build(&params);
    assert!(result.is_err(), "Accepted an empty statement");
}

#[test]
fn cleanup() {
    let statement = "\n    zcat %(infile)s\n    | sort\n\n    | uniq > out\n    ";
    assert_eq!(clean(statement), "zcat %(infile)s | sort | uniq > out");
}

//-----------------------------------------------------------------------------

#[test]
fn successful_execution() {
    let dir = tempfile::tempdir().unwrap();
    let executor = Executor::new(dir.path());
    let result = executor.run("echo hello > out.txt");
    assert!(result.is_ok(), "Statement failed: {}", result.unwrap_err());
    let lines = utils::read_lines(dir.path().join("out.txt")).unwrap();
    assert_eq!(lines, vec!["hello"]);
}

#[test]
fn failed_execution() {
    let dir = tempfile::tempdir().unwrap();
    let executor = Executor::new(dir.path());
    let result = executor.run("echo broken >&2; exit 3");
    assert!(result.is_err(), "Failed statement reported success");
    let message = result.unwrap_err();
    assert!(message.contains("exit status 3"), "Missing exit status in: {}", message);
    assert!(message.contains("broken"), "Missing stderr in: {}", message);
}

#[test]
fn pipefail_and_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let executor = Executor::new(dir.path());
    assert!(executor.run("false | cat").is_err(), "Failure inside a pipe was ignored");

    let result = executor.run("false; checkpoint; touch after.txt");
    assert!(result.is_err(), "Checkpoint did not stop the statement");
    assert!(!utils::file_exists(dir.path().join("after.txt")), "Commands after a failed checkpoint were run");
}

#[test]
fn dry_run() {
    let dir = tempfile::tempdir().unwrap();
    let executor = Executor::dry_run(dir.path());
    let result = executor.run("touch created.txt; exit 1");
    assert!(result.is_ok(), "Dry run failed: {}", result.unwrap_err());
    assert!(!utils::file_exists(dir.path().join("created.txt")), "Dry run executed the statement");
}

//-----------------------------------------------------------------------------
