use crate::exon_index::ExonIndex;
use crate::types::Tid;
use rust_htslib::bam::record::{Cigar, Record};

/// A reference interval [start, end) covered by one stretch of an
/// alignment, 0-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub start: u32,
    pub end: u32,
}

/// Split an alignment into its reference segments.
///
/// `M`/`=`/`X`/`D` consume reference, `N` closes the current segment and
/// opens the next one after the gap; everything else is ignored for
/// coordinates. An alignment with no reference-consuming op yields no
/// segments.
pub fn alignment_segments(record: &Record) -> Vec<Segment> {
    if record.pos() < 0 {
        return Vec::new();
    }
    let mut ref_pos = record.pos() as u32;
    let mut seg_start = ref_pos;
    let mut segs: Vec<Segment> = Vec::new();

    for op in record.cigar().iter() {
        match op {
            Cigar::Match(n) | Cigar::Equal(n) | Cigar::Diff(n) | Cigar::Del(n) => {
                ref_pos = ref_pos.saturating_add(*n);
            }
            Cigar::RefSkip(n) => {
                if ref_pos > seg_start {
                    segs.push(Segment {
                        start: seg_start,
                        end: ref_pos,
                    });
                }
                ref_pos = ref_pos.saturating_add(*n);
                seg_start = ref_pos;
            }
            // Non-reference-consuming: Ins, SoftClip, HardClip, Pad
            _ => {}
        }
    }

    if ref_pos > seg_start {
        segs.push(Segment {
            start: seg_start,
            end: ref_pos,
        });
    }

    segs
}

/// Intersection of two ascending duplicate-free id lists.
pub fn intersect_sorted(a: &[Tid], b: &[Tid]) -> Vec<Tid> {
    let mut out = Vec::with_capacity(a.len().min(b.len()));
    let (mut i, mut j) = (0usize, 0usize);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Equal => {
                out.push(a[i]);
                i += 1;
                j += 1;
            }
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
        }
    }
    out
}

/// Equivalence class of a single alignment: the transcripts whose annotated
/// exons contain every segment of it.
///
/// Each segment is checked by pure containment; segments are not required
/// to be flush with exon boundaries, not even across splice junctions.
/// A contig absent from the index, an empty segment list, or any segment
/// contained by no exon all produce the empty class.
pub fn alignment_ec(index: &ExonIndex, contig: &str, record: &Record) -> Vec<Tid> {
    let list = match index.contig(contig) {
        Some(list) => list,
        None => return Vec::new(),
    };
    let segs = alignment_segments(record);

    let mut ec: Option<Vec<Tid>> = None;
    for seg in &segs {
        let mut ids: Vec<Tid> = Vec::new();
        list.containing(seg.start, seg.end, &mut ids);
        ids.sort_unstable();
        ids.dedup();
        ec = Some(match ec {
            None => ids,
            Some(prev) => intersect_sorted(&prev, &ids),
        });
        if ec.as_ref().map_or(false, |e| e.is_empty()) {
            break;
        }
    }

    ec.unwrap_or_default()
}

/// Alignments of one read, bucketed by the last-segment flag. For
/// single-end data the `last` bucket stays empty.
#[derive(Debug, Default)]
pub struct ReadGroup {
    pub first: Vec<Record>,
    pub last: Vec<Record>,
}

impl ReadGroup {
    pub fn push(&mut self, record: Record) {
        if record.is_last_in_template() {
            self.last.push(record);
        } else {
            self.first.push(record);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.first.is_empty() && self.last.is_empty()
    }

    pub fn len(&self) -> usize {
        self.first.len() + self.last.len()
    }
}

/// Union of the per-alignment classes of one bucket. Multi-mapping within
/// a segment means "any of these places", hence union, not intersection.
fn bucket_ec(
    records: &[Record],
    index: &ExonIndex,
    contig_names: &[String],
    lightweight: bool,
) -> Vec<Tid> {
    let mut acc: Vec<Tid> = Vec::new();
    for record in records {
        if record.is_unmapped() || record.tid() < 0 {
            continue;
        }
        if lightweight {
            // The reference IS the transcript; no index lookup.
            acc.push(record.tid() as Tid);
        } else {
            match contig_names.get(record.tid() as usize) {
                Some(contig) => acc.extend(alignment_ec(index, contig, record)),
                None => continue,
            }
        }
    }
    acc.sort_unstable();
    acc.dedup();
    acc
}

/// Equivalence class of a whole read group.
///
/// Paired reads intersect the two segment unions, so both mates must agree
/// on at least one transcript; a read with an empty side (orphan) yields
/// the empty class. Single-end reads union both buckets.
pub fn read_ec(
    group: &ReadGroup,
    index: &ExonIndex,
    contig_names: &[String],
    lightweight: bool,
    paired: bool,
) -> Vec<Tid> {
    let first = bucket_ec(&group.first, index, contig_names, lightweight);
    let last = bucket_ec(&group.last, index, contig_names, lightweight);

    if paired {
        if first.is_empty() || last.is_empty() {
            return Vec::new();
        }
        intersect_sorted(&first, &last)
    } else {
        let mut ec = first;
        ec.extend(last);
        ec.sort_unstable();
        ec.dedup();
        ec
    }
}
