use super::*;

use std::fs;

//-----------------------------------------------------------------------------

const DEFAULTS: &str = r#"
database_name = "csvdb"
paired_end = false
mappers = ["bowtie"]

[bowtie]
executable = "bowtie"
threads = 4
memory = "2G"
"#;

fn write_config(dir: &Path, name: &str, text: &str) -> PathBuf {
    let filename = dir.join(name);
    fs::write(&filename, text).unwrap();
    filename
}

//-----------------------------------------------------------------------------

#[test]
fn flattened_sections() {
    let params = Params::from_toml_str(DEFAULTS);
    assert!(params.is_ok(), "Failed to parse parameters: {}", params.unwrap_err());
    let params = params.unwrap();

    assert_eq!(params.get_str("bowtie_executable").unwrap(), "bowtie");
    assert_eq!(params.get_int("bowtie_threads").unwrap(), 4);
    assert_eq!(params.get_str("bowtie_memory").unwrap(), "2G");
    assert!(!params.get_bool("paired_end").unwrap());
    assert!(!params.contains("bowtie"), "Section name stored as a parameter");
}

#[test]
fn nested_sections() {
    let params = Params::from_toml_str(r#"
        [annotations.interface]
        geneset_all_gtf = "geneset_all.gtf.gz"
    "#).unwrap();
    assert_eq!(params.get_str("annotations_interface_geneset_all_gtf").unwrap(), "geneset_all.gtf.gz");
}

#[test]
fn later_files_override() {
    let dir = tempfile::tempdir().unwrap();
    let first = write_config(dir.path(), "first.toml", "[bowtie]\nthreads = 8\n");
    let second = write_config(dir.path(), "second.toml", "mappers = \"bowtie,star\"\n");
    let missing = dir.path().join("missing.toml");

    let params = Params::load(&[first, missing, second], DEFAULTS);
    assert!(params.is_ok(), "Failed to load parameters: {}", params.unwrap_err());
    let params = params.unwrap();
    assert_eq!(params.get_int("bowtie_threads").unwrap(), 8, "The first file did not override the defaults");
    assert_eq!(params.as_list("mappers").unwrap(), vec!["bowtie", "star"], "The second file did not override the defaults");
    assert_eq!(params.get_str("bowtie_memory").unwrap(), "2G", "Lost a default value");
}

#[test]
fn no_configuration() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("pipeline.toml");
    let params = Params::load(&[missing], "");
    assert!(params.is_err(), "Loaded parameters without any configuration");
}

#[test]
fn invalid_configuration() {
    let dir = tempfile::tempdir().unwrap();
    let broken = write_config(dir.path(), "pipeline.toml", "[bowtie\nthreads = 4\n");
    let params = Params::load(&[broken], DEFAULTS);
    assert!(params.is_err(), "Parsed a broken configuration file");
}

//-----------------------------------------------------------------------------

#[test]
fn typed_access() {
    let mut params = Params::new();
    params.set("threads", "12");
    params.set("fdr", 0.05);
    params.set("paired", "yes");
    params.set("genome", "hg38");

    assert_eq!(params.get_int("threads").unwrap(), 12, "String not coerced to an integer");
    assert_eq!(params.get_float("fdr").unwrap(), 0.05);
    assert!(params.get_bool("paired").unwrap(), "String not coerced to a boolean");
    assert!(params.get_int("genome").is_err(), "Coerced a non-numeric string to an integer");
    assert!(params.get_str("missing").is_err(), "Found a missing parameter");
    assert_eq!(params.get_str_or("missing", "default"), "default");
    assert_eq!(params.get_int_or("missing", 3).unwrap(), 3);
    assert!(!params.flag("missing").unwrap(), "Missing flag should be false");
}

#[test]
fn list_values() {
    let mut params = Params::new();
    params.set("empty", "");
    params.set("methods", " deseq , edger,");
    params.set("single", "star");
    assert!(params.as_list("empty").unwrap().is_empty(), "Empty string gave a non-empty list");
    assert_eq!(params.as_list("methods").unwrap(), vec!["deseq", "edger"]);
    assert_eq!(params.as_list("single").unwrap(), vec!["star"]);
}

#[test]
fn peek_other_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), "pipeline.toml", "database = \"annotations.db\"\n[interface]\ncontigs = \"contigs.tsv\"\n");

    let mut params = Params::new();
    params.set("annotations_database", "already.db");
    let added = params.peek(dir.path(), "pipeline.toml", "annotations_");
    assert!(added.is_ok(), "Failed to peek: {}", added.unwrap_err());
    assert_eq!(added.unwrap(), 1, "Wrong number of added parameters");
    assert_eq!(params.get_str("annotations_database").unwrap(), "already.db", "Existing parameter was overridden");
    assert_eq!(params.get_str("annotations_interface_contigs").unwrap(), "contigs.tsv");
}

//-----------------------------------------------------------------------------
