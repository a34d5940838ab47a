use crate::annotation::{self, TranscriptNumbering};
use crate::remap;
use crate::types::{HashMap, HashMapExt, Tid};
use anyhow::Result;
use coitrees::{BasicCOITree, Interval, IntervalTree as CoitreeIntervalTree};
use std::path::PathBuf;

/// A genomic exon [start, end) with the transcripts that contain it,
/// ascending and duplicate-free.
#[derive(Debug, Clone)]
pub struct Exon {
    pub start: u32,
    pub end: u32,
    pub transcripts: Vec<Tid>,
}

/// All exons of one contig, sorted by (start, end), plus an interval tree
/// for containment queries.
pub struct ExonList {
    exons: Vec<Exon>,
    tree: BasicCOITree<u32, u32>,
}

impl ExonList {
    fn from_exons(mut exons: Vec<Exon>) -> Self {
        exons.sort_by_key(|e| (e.start, e.end));

        // Exons with identical spans merge; their transcript sets union.
        let mut merged: Vec<Exon> = Vec::with_capacity(exons.len());
        for exon in exons {
            match merged.last_mut() {
                Some(last) if last.start == exon.start && last.end == exon.end => {
                    last.transcripts.extend(exon.transcripts);
                }
                _ => merged.push(exon),
            }
        }
        for exon in &mut merged {
            exon.transcripts.sort_unstable();
            exon.transcripts.dedup();
        }

        // COITree intervals are end-inclusive; convert [start, end) -> [start, end-1].
        let intervals: Vec<Interval<u32>> = merged
            .iter()
            .enumerate()
            .filter(|(_, e)| e.end > e.start)
            .map(|(i, e)| Interval::new(e.start as i32, (e.end - 1) as i32, i as u32))
            .collect();

        Self {
            tree: BasicCOITree::new(&intervals),
            exons: merged,
        }
    }

    pub fn exons(&self) -> &[Exon] {
        &self.exons
    }

    /// Collect the transcript ids of every annotated exon containing
    /// [start, end). Ids may repeat across exons; callers sort and dedup.
    pub fn containing(&self, start: u32, end: u32, out: &mut Vec<Tid>) {
        if end <= start {
            return;
        }
        self.tree.query(start as i32, (end - 1) as i32, |node| {
            let exon = &self.exons[node.metadata as usize];
            if exon.start <= start && end <= exon.end {
                out.extend_from_slice(&exon.transcripts);
            }
        });
    }
}

/// Per-contig exon lists keyed by lower-cased contig name. Immutable after
/// `build`; shared read-only by all workers.
#[derive(Default)]
pub struct ExonIndex {
    contigs: HashMap<String, ExonList>,
}

impl ExonIndex {
    pub fn contig(&self, name: &str) -> Option<&ExonList> {
        self.contigs.get(name)
    }

    pub fn num_contigs(&self) -> usize {
        self.contigs.len()
    }
}

struct ContigBuilder {
    by_span: HashMap<(u32, u32), usize>,
    exons: Vec<Exon>,
}

impl ContigBuilder {
    fn new() -> Self {
        Self {
            by_span: HashMap::new(),
            exons: Vec::new(),
        }
    }

    fn add(&mut self, start: u32, end: u32, tid: Tid) {
        match self.by_span.get(&(start, end)) {
            Some(&i) => self.exons[i].transcripts.push(tid),
            None => {
                self.by_span.insert((start, end), self.exons.len());
                self.exons.push(Exon {
                    start,
                    end,
                    transcripts: vec![tid],
                });
            }
        }
    }
}

/// Build the exon index from annotation files, in input order.
///
/// Returns the index and the transcript count to use for row indexing.
/// When transcriptome FASTAs are given, every stored transcript id is
/// rewritten through the remap translation table and the count covers the
/// translated range instead.
pub fn build(
    annotation_files: &[PathBuf],
    transcriptome_files: &[PathBuf],
    verbose: bool,
) -> Result<(ExonIndex, u64)> {
    let mut numbering = TranscriptNumbering::new();
    let mut builders: HashMap<String, ContigBuilder> = HashMap::new();

    annotation::for_each_exon_row(annotation_files, |row| {
        let tid = numbering.observe(&row.seqname, &row.transcript);
        builders
            .entry(row.seqname)
            .or_insert_with(ContigBuilder::new)
            .add(row.start, row.end, tid);
    })?;

    let mut total_transcripts = numbering.assigned();
    let mut translation = None;
    if !transcriptome_files.is_empty() {
        let table = remap::build_translation(annotation_files, transcriptome_files, verbose)?;
        total_transcripts = table.values().map(|&id| id as u64 + 1).max().unwrap_or(0);
        translation = Some(table);
    }

    let mut contigs = HashMap::with_capacity(builders.len());
    for (name, builder) in builders {
        let mut exons = builder.exons;
        if let Some(table) = &translation {
            for exon in &mut exons {
                for tid in &mut exon.transcripts {
                    if let Some(&mapped) = table.get(tid) {
                        *tid = mapped;
                    }
                }
            }
        }
        contigs.insert(name, ExonList::from_exons(exons));
    }

    Ok((ExonIndex { contigs }, total_transcripts))
}
