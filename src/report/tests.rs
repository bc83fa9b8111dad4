use super::*;

use crate::internal;

//-----------------------------------------------------------------------------

// Test-only: lets `Result<Box<dyn Tracker>, _>::unwrap_err()` appear in assertion messages.
impl std::fmt::Debug for dyn Tracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn Tracker")
    }
}

#[test]
fn locus_helpers() {
    assert_eq!(split_locus("chr1:100..200"), Ok((String::from("chr1"), 100, 200)));
    assert_eq!(split_locus("chrUn_gl000220:5-17"), Ok((String::from("chrUn_gl000220"), 5, 17)));
    assert!(split_locus("chr1").is_err(), "Split a locus without a range");
    assert!(split_locus("chr1:a-b").is_err(), "Split a locus with invalid coordinates");
    assert!(split_locus(":1-2").is_err(), "Split a locus without a contig");

    assert_eq!(
        link_to_ucsc("hg38", "chr1", 100, 200),
        "`chr1:100-200 <http://genome.ucsc.edu/cgi-bin/hgTracks?db=hg38&position=chr1:100..200>`_"
    );
}

#[test]
fn tracker_lookup() {
    for name in TRACKERS {
        let found = tracker(name);
        assert!(found.is_ok(), "Failed to find tracker {}: {}", name, found.unwrap_err());
        assert_eq!(found.unwrap().name(), name);
    }
    assert!(tracker("Unknown").is_err(), "Found an unknown tracker");
}

//-----------------------------------------------------------------------------

#[test]
fn contributing_reads() {
    assert_eq!(ContributingReads::summary_track("stool_R1_lane_1"), "stool-R1_lane-1");
    assert_eq!(ContributingReads::summary_track("stool_R1"), "stool-R1");

    let dir = tempfile::tempdir().unwrap();
    let database = internal::database_with_tables(dir.path(), &[
        ("reads_summary", "track\ttotal_reads\nstool-R1\t10\nstool-R2\t0\n"),
        ("stool_R1_readmap", "read_id\ttaxon\nr1\ta\nr2\tb\nr3\tc\nr4\td\n"),
        ("stool_R2_readmap", "read_id\ttaxon\nr1\ta\n"),
        ("gut_R1_readmap", "read_id\ttaxon\nr1\ta\n"),
    ]);

    let tracker = ContributingReads;
    assert_eq!(tracker.tracks(&database), Ok(vec![
        String::from("gut_R1"), String::from("stool_R1"), String::from("stool_R2"),
    ]));
    assert_eq!(tracker.call(&database, "stool_R1"), Ok(TrackerResult::Value(0.4)));
    assert!(tracker.call(&database, "stool_R2").is_err(), "Divided by a zero total");
    assert!(tracker.call(&database, "gut_R1").is_err(), "Used a missing total");
}

#[test]
fn relative_abundance() {
    let dir = tempfile::tempdir().unwrap();
    let database = internal::database_with_tables(dir.path(), &[
        ("stool_relab", "taxon_level\ttaxon\trel_abundance\n\
            phylum\tFirmicutes\t60.5\nphylum\tBacteroidetes\t39.0\nphylum\tRare\t0.5\n\
            genus\tBacteroides\t20.0\n"),
    ]);

    let result = RelativeAbundance.call(&database, "stool").unwrap();
    let TrackerResult::Nested(levels) = result else {
        panic!("Relative abundance is not nested");
    };
    assert_eq!(levels.len(), TAXON_LEVELS.len());
    assert_eq!(levels[0].0, "phylum");
    assert_eq!(levels[0].1.len(), 2, "Rare taxon was included");
    assert_eq!(levels[4].1, vec![(String::from("Bacteroides"), 20.0)]);

    let counts = TotalSpecies.call(&database, "stool").unwrap();
    let TrackerResult::Counts(counts) = counts else {
        panic!("Total species are not counts");
    };
    assert_eq!(counts[0], (String::from("phylum"), 3));
    assert_eq!(counts[1], (String::from("class"), 0));
    assert_eq!(counts[4], (String::from("genus"), 1));
}

//-----------------------------------------------------------------------------

#[test]
fn table_trackers() {
    let dir = tempfile::tempdir().unwrap();
    let database = internal::database_with_tables(dir.path(), &[
        ("refcoding_featurecounts_stats", "track\ttotal\na\t10\nb\t20\n"),
        ("refcoding_featurecounts_correlation", "track\ta\tb\na\t1\t0.5\nb\t0.5\t1\n"),
        ("design1_stats", "track\ttotal\na\t10\n"),
        ("featurecounts_summary", "track\tAssigned\na\t8\n"),
    ]);

    let all = TableTracker::TAG_COUNTS_SUMMARY_ALL;
    assert_eq!(all.tracks(&database), Ok(vec![String::from("refcoding_feature")]));
    let result = all.call(&database, "refcoding_feature").unwrap();
    assert_eq!(result.to_table().rows, vec![vec!["a", "10"], vec!["b", "20"]]);

    let per_design = TableTracker::TAG_COUNTS_SUMMARY_PER_DESIGN;
    assert_eq!(per_design.tracks(&database), Ok(vec![String::from("1")]));

    let correlations = TableTracker::TAG_COUNTS_CORRELATIONS;
    let table = correlations.call(&database, "refcoding_featurecounts").unwrap().to_table();
    assert_eq!(table.header, vec!["track", "a", "b"]);

    let summary = TableTracker::FEATURE_COUNTS_SUMMARY;
    assert_eq!(summary.tracks(&database), Ok(vec![String::from("featurecounts_summary")]));
    let result = summary.call(&database, "featurecounts_summary").unwrap();
    assert_eq!(result.to_string(), "track\tAssigned\na\t8\n");
}

#[test]
fn differential_expression() {
    let dir = tempfile::tempdir().unwrap();
    let database = internal::database_with_tables(dir.path(), &[
        ("design1_refcoding_deseq2_gene_diff", "test_id\tfold\tsignificant\n\
            g1\t1.5\t0\ng2\t0.5\t1\ng3\t4.0\t1\ng4\t2.0\t0\n"),
    ]);

    let all = DifferentialExpression::new(false);
    assert_eq!(all.tracks(&database), Ok(vec![String::from("design1_refcoding_deseq2")]));
    let table = all.call(&database, "design1_refcoding_deseq2").unwrap().to_table();
    assert_eq!(table.column("test_id").unwrap(), vec!["g3", "g2", "g4", "g1"]);

    let significant = DifferentialExpression::new(true);
    let table = significant.call(&database, "design1_refcoding_deseq2").unwrap().to_table();
    assert_eq!(table.column("test_id").unwrap(), vec!["g3", "g2"]);
}

const SLEUTH: &str = "\
gene_name\tgene_id\ttranscript_id\ttranscript_biotype\tcontrol_mean\tfold\tl2fold\tp_value\tp_value_adj\tsignificant
A\tG1\tT1\tprotein_coding\t10.5\t2.0\t1.0\t0.001\t0.01\t1
A\tG1\tT2\tretained_intron\t3.0\t0.5\t-1.0\t0.2\t0.4\t0
B\tG2\tT3\tprotein_coding\t8.0\t4.0\t2.0\t0.0001\t0.001\t1
";

#[test]
fn sleuth_results() {
    let dir = tempfile::tempdir().unwrap();
    let database = internal::database_with_tables(dir.path(), &[("design1_kallisto_DEresults", SLEUTH)]);

    let all = SleuthResults::new(false);
    assert_eq!(all.tracks(&database), Ok(vec![String::from("design1_kallisto")]));
    let table = all.call(&database, "design1_kallisto");
    assert!(table.is_ok(), "Failed to query Sleuth results: {}", table.unwrap_err());
    let table = table.unwrap().to_table();
    assert_eq!(table.header, vec![
        "gene_name", "gene_id", "transcript_id", "transcript_biotype", "expression",
        "fold", "log2_fold", "p_value", "p_value_adj", "significant", "flagged",
    ]);
    assert_eq!(table.column("transcript_id").unwrap(), vec!["T3", "T1", "T2"]);
    assert_eq!(table.column("flagged").unwrap(), vec!["NA", "NA", "NA"]);

    // Flagged transcripts are reported when the table exists.
    let dir = tempfile::tempdir().unwrap();
    let database = internal::database_with_tables(dir.path(), &[
        ("design1_kallisto_DEresults", SLEUTH),
        ("kallisto_flagged_transcripts", "transcript_id\treason\nT1\tlow_counts\n"),
    ]);
    let significant = SleuthResults::new(true);
    let table = significant.call(&database, "design1_kallisto").unwrap().to_table();
    assert_eq!(table.column("transcript_id").unwrap(), vec!["T3", "T1"]);
    assert_eq!(table.column("flagged").unwrap(), vec!["NA", "low_counts"]);
}

#[test]
fn result_output() {
    let counts = TrackerResult::Counts(vec![(String::from("phylum"), 3)]);
    let mut buffer = Vec::new();
    assert!(counts.write(&mut buffer).is_ok());
    assert_eq!(String::from_utf8(buffer).unwrap(), "name\tcount\nphylum\t3\n");
    assert_eq!(TrackerResult::Value(0.5).to_string(), "value\n0.5\n");
}

//-----------------------------------------------------------------------------
