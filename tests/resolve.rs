//! Resolver behavior: CIGAR segment extraction, containment lookup, and the
//! per-read equivalence-class algebra, driven through small on-disk fixtures.

use bam2tcc_rs::exon_index::{self, ExonIndex};
use bam2tcc_rs::resolve::{self, ReadGroup, Segment};
use rust_htslib::bam::{self, Read as HtsRead, Record};
use std::fs;
use std::path::{Path, PathBuf};

// ── helpers ──────────────────────────────────────────────────────────────────

fn temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("bam2tcc_rs_resolve_{}_{}", tag, std::process::id()));
    if dir.exists() {
        let _ = fs::remove_dir_all(&dir);
    }
    fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

/// Three transcripts on chr1: a = [100,200) + [300,400), b = [300,400),
/// c = [100,400) (0-based half-open after ingest).
const GTF: &str = "\
chr1\ttest\texon\t101\t200\t.\t+\t.\tgene_id \"g1\"; transcript_id \"A\";
chr1\ttest\texon\t301\t400\t.\t+\t.\tgene_id \"g1\"; transcript_id \"A\";
chr1\ttest\texon\t301\t400\t.\t+\t.\tgene_id \"g1\"; transcript_id \"B\";
chr1\ttest\texon\t101\t400\t.\t+\t.\tgene_id \"g1\"; transcript_id \"C\";
";

fn build_index(dir: &Path) -> ExonIndex {
    let gtf = dir.join("annotation.gtf");
    fs::write(&gtf, GTF).expect("write gtf");
    let (index, total) = exon_index::build(&[gtf], &[], false).expect("build index");
    assert_eq!(total, 3);
    index
}

fn sam_records(dir: &Path, name: &str, body: &[&str]) -> Vec<Record> {
    let mut text = String::from("@HD\tVN:1.0\tSO:unsorted\n");
    text.push_str("@SQ\tSN:chr1\tLN:100000\n@SQ\tSN:chr2\tLN:100000\n");
    for line in body {
        text.push_str(line);
        text.push('\n');
    }
    let path = dir.join(name);
    fs::write(&path, text).expect("write sam");

    let mut reader = bam::Reader::from_path(&path).expect("open sam");
    let mut records = Vec::new();
    let mut record = Record::new();
    while let Some(result) = reader.read(&mut record) {
        result.expect("read record");
        records.push(record.clone());
    }
    records
}

// ── segment extraction ────────────────────────────────────────────────────────

#[test]
fn plain_match_yields_one_segment() {
    let dir = temp_dir("seg_plain");
    let records = sam_records(&dir, "r.sam", &["r1\t0\tchr1\t101\t255\t100M\t*\t0\t0\t*\t*"]);
    assert_eq!(
        resolve::alignment_segments(&records[0]),
        vec![Segment { start: 100, end: 200 }]
    );
}

#[test]
fn skip_op_splits_segments() {
    let dir = temp_dir("seg_skip");
    let records = sam_records(
        &dir,
        "r.sam",
        &["r1\t0\tchr1\t301\t255\t50M50N50M\t*\t0\t0\t*\t*"],
    );
    assert_eq!(
        resolve::alignment_segments(&records[0]),
        vec![
            Segment { start: 300, end: 350 },
            Segment { start: 400, end: 450 },
        ]
    );
}

#[test]
fn deletion_extends_the_current_segment() {
    let dir = temp_dir("seg_del");
    let records = sam_records(
        &dir,
        "r.sam",
        &["r1\t0\tchr1\t101\t255\t10M5D10M\t*\t0\t0\t*\t*"],
    );
    assert_eq!(
        resolve::alignment_segments(&records[0]),
        vec![Segment { start: 100, end: 125 }]
    );
}

#[test]
fn missing_cigar_yields_no_segments() {
    let dir = temp_dir("seg_none");
    let records = sam_records(&dir, "r.sam", &["r1\t0\tchr1\t101\t255\t*\t*\t0\t0\t*\t*"]);
    assert!(resolve::alignment_segments(&records[0]).is_empty());
}

// ── per-alignment EC ──────────────────────────────────────────────────────────

#[test]
fn contained_alignment_collects_all_covering_transcripts() {
    let dir = temp_dir("ec_contained");
    let index = build_index(&dir);
    let records = sam_records(&dir, "r.sam", &["r1\t0\tchr1\t101\t255\t50M\t*\t0\t0\t*\t*"]);
    // [100,150) sits inside a's first exon and inside c.
    assert_eq!(resolve::alignment_ec(&index, "chr1", &records[0]), vec![0, 2]);
}

#[test]
fn spliced_alignment_intersects_across_segments() {
    let dir = temp_dir("ec_spliced");
    let index = build_index(&dir);
    let records = sam_records(
        &dir,
        "r.sam",
        &["r1\t0\tchr1\t151\t255\t50M100N50M\t*\t0\t0\t*\t*"],
    );
    // [150,200) -> {a, c}; [300,350) -> {a, b, c}; intersection {a, c}.
    assert_eq!(resolve::alignment_ec(&index, "chr1", &records[0]), vec![0, 2]);
}

#[test]
fn overhanging_alignment_resolves_to_nothing() {
    let dir = temp_dir("ec_overhang");
    let index = build_index(&dir);
    let records = sam_records(&dir, "r.sam", &["r1\t0\tchr1\t351\t255\t100M\t*\t0\t0\t*\t*"]);
    // [350,450) extends past every annotated exon.
    assert!(resolve::alignment_ec(&index, "chr1", &records[0]).is_empty());
}

#[test]
fn unknown_contig_resolves_to_nothing() {
    let dir = temp_dir("ec_contig");
    let index = build_index(&dir);
    let records = sam_records(&dir, "r.sam", &["r1\t0\tchr2\t101\t255\t50M\t*\t0\t0\t*\t*"]);
    assert!(resolve::alignment_ec(&index, "chr2", &records[0]).is_empty());
}

#[test]
fn missing_cigar_resolves_to_nothing() {
    let dir = temp_dir("ec_nocigar");
    let index = build_index(&dir);
    let records = sam_records(&dir, "r.sam", &["r1\t0\tchr1\t101\t255\t*\t*\t0\t0\t*\t*"]);
    assert!(resolve::alignment_ec(&index, "chr1", &records[0]).is_empty());
}

// ── per-read EC ───────────────────────────────────────────────────────────────

fn names() -> Vec<String> {
    vec!["chr1".to_string(), "chr2".to_string()]
}

fn group_of(records: Vec<Record>) -> ReadGroup {
    let mut group = ReadGroup::default();
    for record in records {
        if !record.is_unmapped() {
            group.push(record);
        }
    }
    group
}

#[test]
fn paired_read_intersects_mate_classes() {
    let dir = temp_dir("read_paired");
    let index = build_index(&dir);
    let records = sam_records(
        &dir,
        "r.sam",
        &[
            "r1\t67\tchr1\t101\t255\t100M\t=\t301\t300\t*\t*",
            "r1\t131\tchr1\t301\t255\t100M\t=\t101\t-300\t*\t*",
        ],
    );
    let group = group_of(records);
    // mate 1 -> {a, c}, mate 2 -> {a, b, c}; pair -> {a, c}.
    assert_eq!(resolve::read_ec(&group, &index, &names(), false, true), vec![0, 2]);
}

#[test]
fn orphaned_mate_drops_the_read_in_paired_mode() {
    let dir = temp_dir("read_orphan");
    let index = build_index(&dir);
    let records = sam_records(
        &dir,
        "r.sam",
        &[
            "r1\t73\tchr1\t101\t255\t100M\t*\t0\t0\t*\t*",
            "r1\t133\tchr1\t101\t0\t*\t*\t0\t0\t*\t*",
        ],
    );
    let group = group_of(records);
    assert!(resolve::read_ec(&group, &index, &names(), false, true).is_empty());
    // The same group counts in single-end mode.
    assert_eq!(resolve::read_ec(&group, &index, &names(), false, false), vec![0, 2]);
}

#[test]
fn single_end_unions_across_alignments() {
    let dir = temp_dir("read_union");
    let index = build_index(&dir);
    let records = sam_records(
        &dir,
        "r.sam",
        &[
            "r1\t0\tchr1\t101\t255\t50M\t*\t0\t0\t*\t*",
            "r1\t0\tchr1\t301\t255\t50M\t*\t0\t0\t*\t*",
        ],
    );
    let group = group_of(records);
    // {a, c} from the first site, {a, b, c} from the second.
    assert_eq!(resolve::read_ec(&group, &index, &names(), false, false), vec![0, 1, 2]);
}

#[test]
fn removing_a_mate_alignment_never_enlarges_the_class() {
    let dir = temp_dir("read_monotone");
    let index = build_index(&dir);
    let full = sam_records(
        &dir,
        "full.sam",
        &[
            "r1\t67\tchr1\t101\t255\t50M\t=\t301\t250\t*\t*",
            "r1\t67\tchr1\t301\t255\t50M\t=\t301\t50\t*\t*",
            "r1\t131\tchr1\t301\t255\t50M\t=\t101\t-250\t*\t*",
        ],
    );
    let reduced = sam_records(
        &dir,
        "reduced.sam",
        &[
            "r1\t67\tchr1\t101\t255\t50M\t=\t301\t250\t*\t*",
            "r1\t131\tchr1\t301\t255\t50M\t=\t101\t-250\t*\t*",
        ],
    );
    let full_ec = resolve::read_ec(&group_of(full), &index, &names(), false, true);
    let reduced_ec = resolve::read_ec(&group_of(reduced), &index, &names(), false, true);
    assert!(!full_ec.is_empty());
    assert!(reduced_ec.iter().all(|id| full_ec.contains(id)));
}

#[test]
fn lightweight_mode_uses_reference_ids_verbatim() {
    let dir = temp_dir("read_lightweight");
    let index = ExonIndex::default();
    let mut text = String::from("@HD\tVN:1.0\n");
    for i in 0..10 {
        text.push_str(&format!("@SQ\tSN:t{i}\tLN:1000\n"));
    }
    text.push_str("r1\t0\tt5\t1\t255\t10M\t*\t0\t0\t*\t*\n");
    text.push_str("r1\t0\tt9\t1\t255\t10M\t*\t0\t0\t*\t*\n");
    let path = dir.join("r.sam");
    fs::write(&path, text).expect("write sam");

    let mut reader = bam::Reader::from_path(&path).expect("open sam");
    let mut group = ReadGroup::default();
    let mut record = Record::new();
    while let Some(result) = reader.read(&mut record) {
        result.expect("read record");
        group.push(record.clone());
    }

    let contig_names: Vec<String> = (0..10).map(|i| format!("t{i}")).collect();
    assert_eq!(
        resolve::read_ec(&group, &index, &contig_names, true, false),
        vec![5, 9]
    );
}

#[test]
fn intersect_sorted_basics() {
    assert_eq!(resolve::intersect_sorted(&[1, 3, 5], &[2, 3, 5, 9]), vec![3, 5]);
    assert!(resolve::intersect_sorted(&[1, 2], &[3, 4]).is_empty());
    assert!(resolve::intersect_sorted(&[], &[1]).is_empty());
}
