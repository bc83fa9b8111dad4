use super::*;

use crate::internal;

//-----------------------------------------------------------------------------

const GENESET: &str = "\
#!genome-build GRCh38
chr1\tprotein_coding\texon\t100\t200\t.\t+\t.\tgene_id \"G1\"; transcript_id \"T1\"; gene_biotype \"protein_coding\";
chr1\tprotein_coding\tCDS\t150\t200\t.\t+\t0\tgene_id \"G1\"; transcript_id \"T1\";
chr1\tprotein_coding\texon\t300\t400\t.\t+\t.\tgene_id \"G1\"; transcript_id \"T1\";
chr1\tprotein_coding\tCDS\t300\t350\t.\t+\t2\tgene_id \"G1\"; transcript_id \"T1\";
chr1\tprotein_coding\texon\t100\t250\t.\t+\t.\tgene_id \"G1\"; transcript_id \"T2\";
chr1\tprotein_coding\texon\t300\t400\t.\t+\t.\tgene_id \"G1\"; transcript_id \"T2\";
chr1\tprotein_coding\tCDS\t340\t380\t.\t+\t0\tgene_id \"G1\"; transcript_id \"T2\";
chrM\trRNA\texon\t10\t50\t.\t-\t.\tgene_id \"G2\"; transcript_id \"T3\";
";

fn read_geneset(dir: &Path) -> Vec<GtfEntry> {
    let filename = internal::write_text(dir, "geneset.gtf", GENESET);
    let entries = read_gtf(&filename);
    assert!(entries.is_ok(), "Failed to read GTF: {}", entries.unwrap_err());
    entries.unwrap()
}

//-----------------------------------------------------------------------------

#[test]
fn parse_entries() {
    let dir = tempfile::tempdir().unwrap();
    let entries = read_geneset(dir.path());
    assert_eq!(entries.len(), 8);
    let first = &entries[0];
    assert_eq!(first.contig, "chr1");
    assert_eq!((first.start, first.end), (100, 200));
    assert_eq!(first.length(), 101);
    assert_eq!(first.gene_id(), Some("G1"));
    assert_eq!(first.transcript_id(), Some("T1"));
    assert_eq!(first.attribute("gene_biotype"), Some("protein_coding"));
    assert_eq!(first.attribute("missing"), None);
    assert_eq!(
        first.to_string(),
        "chr1\tprotein_coding\texon\t100\t200\t.\t+\t.\tgene_id \"G1\"; transcript_id \"T1\"; gene_biotype \"protein_coding\";"
    );

    assert!(GtfEntry::parse("chr1\tsource\texon\t100").is_err(), "Parsed a truncated line");
    assert!(GtfEntry::parse("chr1\ts\texon\t200\t100\t.\t+\t.\tgene_id \"G\";").is_err(), "Parsed an inverted interval");
    assert!(GtfEntry::parse("chr1\ts\texon\t0\t100\t.\t+\t.\tgene_id \"G\";").is_err(), "Parsed start 0");
    assert!(GtfEntry::parse("chr1\ts\texon\t1\t100\t.\t+\t.\tgene_id \"G\";").is_ok(), "Failed to parse start 1");

    let broken = internal::write_text(dir.path(), "broken.gtf", "chr1\ts\texon\tx\t100\t.\t+\t.\tgene_id \"G\";\n");
    let result = read_gtf(&broken);
    assert!(result.is_err(), "Read a broken GTF file");
    assert!(result.unwrap_err().contains("line 1"), "Error does not name the line");
}

#[test]
fn group_transcripts() {
    let dir = tempfile::tempdir().unwrap();
    let entries = read_geneset(dir.path());
    let grouped = transcripts(&entries);
    let names: Vec<&str> = grouped.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(names, vec!["T1", "T2", "T3"]);
    assert_eq!(grouped[0].1.len(), 4);
}

#[test]
fn splice_junctions() {
    let dir = tempfile::tempdir().unwrap();
    let entries = read_geneset(dir.path());
    assert_eq!(junctions(&entries), vec!["chr1\t199\t299\t+", "chr1\t249\t299\t+"]);

    let infile = internal::write_text(dir.path(), "refcoding.gtf", GENESET);
    let outfile = dir.path().join("reference.junctions");
    let count = build_junctions(&infile, &outfile);
    assert!(count.is_ok(), "Failed to build junctions: {}", count.unwrap_err());
    assert_eq!(count.unwrap(), 2);
    assert_eq!(internal::read_text(&outfile), "chr1\t199\t299\t+\nchr1\t249\t299\t+");
}

//-----------------------------------------------------------------------------

#[test]
fn statistics() {
    let dir = tempfile::tempdir().unwrap();
    let entries = read_geneset(dir.path());
    let stats = gene_stats(&entries);
    assert_eq!(stats.len(), 2);
    assert_eq!(stats[0], GeneStats {
        gene_id: String::from("G1"),
        contig: String::from("chr1"),
        strand: String::from("+"),
        start: 100,
        end: 400,
        transcripts: 2,
        exons: 4,
        exonic_length: 151 + 101,
        biotype: String::from("protein_coding"),
    });
    assert_eq!(stats[1].biotype, "rRNA", "Source not used as the biotype");

    let table = gene_stats_table(&stats);
    assert_eq!(table.column("gene_id").unwrap(), vec!["G1", "G2"]);
    assert_eq!(table.column("exonic_length").unwrap(), vec!["252", "41"]);
}

#[test]
fn mask_file() {
    let dir = tempfile::tempdir().unwrap();
    let entries = read_geneset(dir.path());
    let ids: HashSet<String> = [String::from("G2")].into_iter().collect();
    let outfile = dir.path().join("geneset_mask.gtf");
    let written = write_mask(&entries, &ids, &outfile);
    assert!(written.is_ok(), "Failed to write mask: {}", written.unwrap_err());
    assert_eq!(written.unwrap(), 1);
    assert_eq!(
        internal::read_text(&outfile),
        "chrM\trRNA\texon\t10\t50\t.\t-\t.\ttranscript_id \"T3\"; gene_id \"G2\";"
    );
}

#[test]
fn coding_exon_set() {
    let dir = tempfile::tempdir().unwrap();
    let entries = read_geneset(dir.path());
    let exons = coding_exons(&entries);
    let intervals: Vec<(usize, usize)> = exons.iter().map(|x| (x.start, x.end)).collect();
    assert_eq!(intervals, vec![(150, 200), (300, 380)]);
    assert!(exons.iter().all(|x| x.feature == "exon" && x.transcript_id() == Some("G1")));
}

#[test]
fn gene_filter() {
    let dir = tempfile::tempdir().unwrap();
    let entries = read_geneset(dir.path());
    let ids_file = internal::write_text(dir.path(), "protein_coding_gene_ids.tsv", "gene_id\nG1\n");
    let ids = read_gene_ids(&ids_file).unwrap();
    assert_eq!(ids.len(), 1);
    let filtered = filter_by_genes(&entries, &ids);
    assert_eq!(filtered.len(), 7);
}

//-----------------------------------------------------------------------------
