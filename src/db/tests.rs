use super::*;

use crate::internal;

use std::fs;

//-----------------------------------------------------------------------------

fn open_database(dir: &Path) -> Database {
    let database = Database::open(dir.join("csvdb"));
    assert!(database.is_ok(), "Failed to open database: {}", database.unwrap_err());
    database.unwrap()
}

fn load(database: &mut Database, filename: &Path, name: &str, options: &LoadOptions) -> usize {
    let rows = database.load(filename, name, options);
    assert!(rows.is_ok(), "Failed to load {}: {}", filename.display(), rows.unwrap_err());
    rows.unwrap()
}

fn query(database: &Database, sql: &str) -> QueryResult {
    let result = database.query(sql);
    assert!(result.is_ok(), "Query {} failed: {}", sql, result.unwrap_err());
    result.unwrap()
}

//-----------------------------------------------------------------------------

#[test]
fn type_inference() {
    let dir = tempfile::tempdir().unwrap();
    let filename = internal::write_text(dir.path(), "bam_stats.tsv",
        "# flagstat\ntrack\tmapped\tpercent\tnote\nliver-R1\t100\t95.5\tok\nliver-R2\tNA\t90\t\n"
    );
    let mut database = open_database(dir.path());
    assert_eq!(load(&mut database, &filename, "bam_stats", &LoadOptions::default()), 2);

    let result = query(&database, "SELECT typeof(mapped), typeof(percent), typeof(note) FROM bam_stats ORDER BY track");
    assert_eq!(result.rows[0], vec![Cell::Text("integer".into()), Cell::Text("real".into()), Cell::Text("text".into())]);
    assert_eq!(result.rows[1], vec![Cell::Text("null".into()), Cell::Text("real".into()), Cell::Text("null".into())]);

    let total = database.query_value("SELECT SUM(mapped) FROM bam_stats").unwrap();
    assert_eq!(total, Some(Cell::Int(100)));
}

#[test]
fn non_finite_values_are_text() {
    assert_eq!(ColumnType::infer(["1.5", "inf"].into_iter()), ColumnType::Text);
    assert_eq!(ColumnType::infer(["nan", "2"].into_iter()), ColumnType::Text);
    assert_eq!(ColumnType::infer(["1.5", "-2e3", "NA"].into_iter()), ColumnType::Real);

    let dir = tempfile::tempdir().unwrap();
    let filename = internal::write_text(dir.path(), "diff.tsv", "test_id\tl2fold\nG1\t1.5\nG2\tinf\nG3\t-0.5\n");
    let mut database = open_database(dir.path());
    assert_eq!(load(&mut database, &filename, "diff", &LoadOptions::default()), 3);
    let result = query(&database, "SELECT l2fold FROM diff WHERE test_id = 'G2'");
    assert_eq!(result.rows[0], vec![Cell::Text("inf".into())]);
}

#[test]
fn reload_replaces_table() {
    let dir = tempfile::tempdir().unwrap();
    let first = internal::write_text(dir.path(), "first.tsv", "gene_id\tcount\nA\t1\nB\t2\n");
    let second = internal::write_text(dir.path(), "second.tsv", "gene_id\tcount\tlength\nC\t3\t100\n");
    let mut database = open_database(dir.path());
    load(&mut database, &first, "counts", &LoadOptions::default());
    load(&mut database, &second, "counts", &LoadOptions::default());

    assert_eq!(database.columns("counts").unwrap(), vec!["gene_id", "count", "length"]);
    assert_eq!(database.query_value("SELECT COUNT(*) FROM counts").unwrap(), Some(Cell::Int(1)));
}

#[test]
fn load_options() {
    let dir = tempfile::tempdir().unwrap();
    let headerless = internal::write_text(dir.path(), "headerless.tsv", "A\t1\nB\t2\n");
    let mut database = open_database(dir.path());

    let options = LoadOptions {
        header_names: Some(vec![String::from("gene id"), String::from("1count")]),
        first_column: Some(String::from("gene_id")),
        add_index: vec![String::from("gene_id"), String::from("missing")],
        allow_empty: false,
    };
    assert_eq!(load(&mut database, &headerless, "genes", &options), 2);
    assert_eq!(database.columns("genes").unwrap(), vec!["gene_id", "_1count"]);
    let indexes = database.query_column("SELECT name FROM sqlite_master WHERE type = 'index' AND tbl_name = 'genes'").unwrap();
    assert_eq!(indexes, vec![Cell::Text(String::from("genes_gene_id"))]);

    let empty = internal::write_text(dir.path(), "empty.tsv", "gene_id\tcount\n");
    let result = database.load(&empty, "empty", &LoadOptions::default());
    assert!(result.is_err(), "Loaded a table without data");
    let allow = LoadOptions { allow_empty: true, ..LoadOptions::default() };
    assert_eq!(load(&mut database, &empty, "empty", &allow), 0);
    assert!(!database.table_exists("empty").unwrap(), "Created an empty table");
}

#[test]
fn column_names() {
    let names: Vec<String> = ["track", "% mapped", "Track", "", "2nd"].iter().map(|x| x.to_string()).collect();
    assert_eq!(sanitize_columns(&names), vec!["track", "__mapped", "Track_2", "column", "_2nd"]);
}

//-----------------------------------------------------------------------------

#[test]
fn load_file_with_sentinel() {
    let dir = tempfile::tempdir().unwrap();
    let infile = internal::write_text(dir.path(), "reads.tsv", "track\ttotal_reads\nliver-R1\t1000\n");
    let outfile = dir.path().join("reads_summary.load");
    let mut database = open_database(dir.path());
    let rows = database.load_file(&infile, &outfile, &LoadOptions::default());
    assert!(rows.is_ok(), "Failed to load file: {}", rows.unwrap_err());
    assert_eq!(rows.unwrap(), 1);
    assert!(database.table_exists("reads_summary").unwrap(), "Table not named by the sentinel");
    assert_eq!(fs::read_to_string(&outfile).unwrap(), "reads_summary\t1\n");
}

#[test]
fn merge_tables() {
    let dir = tempfile::tempdir().unwrap();
    let first = internal::write_text(dir.path(), "liver-R1.picard_stats", "category\treads\nPAIR\t10\n");
    let second = internal::write_text(dir.path(), "liver-R2.picard_stats", "category\treads\nPAIR\t20\n");
    let broken = internal::write_text(dir.path(), "liver-R3.picard_stats", "category\tbases\nPAIR\t30\n");
    let mut database = open_database(dir.path());

    let pattern = TrackPattern::Suffix(String::from(".picard_stats"));
    let rows = database.merge_and_load(&[&first, &second], dir.path().join("picard_stats.load"), &pattern, &LoadOptions::default());
    assert!(rows.is_ok(), "Failed to merge tables: {}", rows.unwrap_err());
    assert_eq!(rows.unwrap(), 2);
    let result = query(&database, "SELECT track, reads FROM picard_stats ORDER BY track");
    assert_eq!(result.rows, vec![
        vec![Cell::Text("liver-R1".into()), Cell::Int(10)],
        vec![Cell::Text("liver-R2".into()), Cell::Int(20)],
    ]);

    let result = database.merge_and_load(&[&first, &broken], dir.path().join("broken.load"), &pattern, &LoadOptions::default());
    assert!(result.is_err(), "Merged tables with different headers");
}

#[test]
fn concatenate_tables() {
    let dir = tempfile::tempdir().unwrap();
    let first = internal::write_text(dir.path(), "liver-R1.star.tsv", "reads\tmapped\n10\t8\n");
    let second = internal::write_text(dir.path(), "liver-R2.star.tsv", "reads\tspliced\n20\t5\n");
    let mut database = open_database(dir.path());

    let pattern = TrackPattern::Regex(Regex::new(r"(.+)\.star\.tsv").unwrap());
    let rows = database.concatenate_and_load(&[&first, &second], dir.path().join("star_stats.load"), &pattern, "na", &LoadOptions::default());
    assert!(rows.is_ok(), "Failed to concatenate tables: {}", rows.unwrap_err());
    assert_eq!(database.columns("star_stats").unwrap(), vec!["track", "reads", "mapped", "spliced"]);
    let result = query(&database, "SELECT track, mapped, spliced FROM star_stats ORDER BY track");
    assert_eq!(result.rows[0], vec![Cell::Text("liver-R1".into()), Cell::Int(8), Cell::Null]);
    assert_eq!(result.rows[1], vec![Cell::Text("liver-R2".into()), Cell::Null, Cell::Int(5)]);
}

//-----------------------------------------------------------------------------

#[test]
fn views() {
    let dir = tempfile::tempdir().unwrap();
    let bam = internal::write_text(dir.path(), "bam.tsv", "track\tmapped\na\t10\nb\t20\n");
    let picard = internal::write_text(dir.path(), "picard.tsv", "sample\ttrack_reads\nb\t25\na\t15\n");
    let mut database = open_database(dir.path());
    load(&mut database, &bam, "bam_stats", &LoadOptions::default());
    load(&mut database, &picard, "picard_stats", &LoadOptions::default());

    let result = database.create_view(&[("bam_stats", "track"), ("picard_stats", "sample")], "view_mapping", ViewKind::View);
    assert!(result.is_ok(), "Failed to create view: {}", result.unwrap_err());
    let rows = query(&database, "SELECT * FROM view_mapping ORDER BY track");
    assert_eq!(rows.header, vec!["track", "mapped", "track_reads"]);
    assert_eq!(rows.rows[0], vec![Cell::Text("a".into()), Cell::Int(10), Cell::Int(15)]);

    // Replace the view with a table.
    let result = database.create_view(&[("bam_stats", "track"), ("picard_stats", "sample")], "view_mapping", ViewKind::Table);
    assert!(result.is_ok(), "Failed to replace view: {}", result.unwrap_err());
    let kind = database.query_value("SELECT type FROM sqlite_master WHERE name = 'view_mapping'").unwrap();
    assert_eq!(kind, Some(Cell::Text(String::from("table"))));

    assert!(database.create_view(&[("bam_stats", "missing")], "broken", ViewKind::View).is_err(), "Used a missing key column");
    assert_eq!(database.tables().unwrap(), vec!["bam_stats", "picard_stats", "view_mapping"]);
}

#[test]
fn attach_database() {
    let dir = tempfile::tempdir().unwrap();
    let annotations_dir = dir.path().join("annotations");
    fs::create_dir(&annotations_dir).unwrap();
    let genes = internal::write_text(&annotations_dir, "genes.tsv", "gene_id\tgene_biotype\nG1\trRNA\n");
    let mut annotations = open_database(&annotations_dir);
    load(&mut annotations, &genes, "gene_info", &LoadOptions::default());
    drop(annotations);

    let database = open_database(dir.path());
    let result = database.attach(annotations_dir.join("csvdb"), "annotations");
    assert!(result.is_ok(), "Failed to attach database: {}", result.unwrap_err());
    let value = database.query_value("SELECT gene_biotype FROM annotations.gene_info").unwrap();
    assert_eq!(value, Some(Cell::Text(String::from("rRNA"))));
    assert!(database.attach(dir.path().join("missing.db"), "missing").is_err(), "Attached a missing database");
}

//-----------------------------------------------------------------------------
