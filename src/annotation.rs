use crate::types::{HashMap, HashMapExt, Tid};
use anyhow::{Context, Result};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Gtf,
    Gff3,
}

/// One accepted exon row, normalized for the index.
///
/// Coordinate conventions:
/// - GTF/GFF are 1-based inclusive.
/// - Internally everything is 0-based, half-open [start, end), so `start`
///   is decremented and `end` kept as-is.
/// - Contig and transcript names are lower-cased; all downstream name
///   comparisons rely on that.
#[derive(Debug, Clone)]
pub struct ExonRow {
    pub seqname: String,
    pub start: u32,
    pub end: u32,
    pub transcript: String,
}

pub fn detect_format(path: &Path) -> InputFormat {
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    match ext.as_str() {
        "gff" | "gff3" => InputFormat::Gff3,
        _ => InputFormat::Gtf,
    }
}

/// Stream every accepted exon row of `paths`, in file order then row order.
///
/// Transcript numbering depends on this traversal order, so both the index
/// build and the transcriptome remap walk rows through this single entry
/// point. Malformed rows are skipped, never errors; an unreadable file is
/// an error carrying the path.
pub fn for_each_exon_row<F>(paths: &[PathBuf], mut f: F) -> Result<()>
where
    F: FnMut(ExonRow),
{
    for path in paths {
        match detect_format(path) {
            InputFormat::Gtf => read_gtf_rows(path, &mut f)?,
            InputFormat::Gff3 => read_gff3_rows(path, &mut f)?,
        }
    }
    Ok(())
}

fn read_gtf_rows<F: FnMut(ExonRow)>(path: &Path, f: &mut F) -> Result<()> {
    let file = File::open(path)
        .with_context(|| format!("failed to open annotation {}", path.display()))?;
    let mut reader = noodles::gtf::io::Reader::new(BufReader::new(file));

    for result in reader.record_bufs() {
        // Malformed rows are skipped silently; a real read error ends the file.
        let record = match result {
            Ok(record) => record,
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => continue,
            Err(_) => break,
        };

        let feature_type: &[u8] = record.ty().as_ref();
        if !feature_type.eq_ignore_ascii_case(b"exon") {
            continue;
        }

        let transcript = match get_record_buf_attribute(record.attributes(), "transcript_id") {
            Some(id) => id,
            None => continue,
        };

        if let Some(row) = make_row(
            record.reference_sequence_name().to_string(),
            record.start().get(),
            record.end().get(),
            transcript,
        ) {
            f(row);
        }
    }

    Ok(())
}

fn read_gff3_rows<F: FnMut(ExonRow)>(path: &Path, f: &mut F) -> Result<()> {
    let file = File::open(path)
        .with_context(|| format!("failed to open annotation {}", path.display()))?;
    let mut reader = noodles::gff::io::Reader::new(BufReader::new(file));

    for result in reader.record_bufs() {
        let record = match result {
            Ok(record) => record,
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => continue,
            Err(_) => break,
        };

        let feature_type: &[u8] = record.ty().as_ref();
        if !feature_type.eq_ignore_ascii_case(b"exon") {
            continue;
        }

        // GFF3 exons name their transcript through Parent when no
        // transcript_id attribute is present.
        let attrs = record.attributes();
        let transcript = match get_record_buf_attribute(attrs, "transcript_id")
            .or_else(|| get_record_buf_attribute(attrs, "Parent"))
        {
            Some(id) => id,
            None => continue,
        };

        if let Some(row) = make_row(
            record.reference_sequence_name().to_string(),
            record.start().get(),
            record.end().get(),
            transcript,
        ) {
            f(row);
        }
    }

    Ok(())
}

fn make_row(seqname: String, start_1: usize, end_1: usize, transcript: String) -> Option<ExonRow> {
    if seqname.is_empty() || start_1 == 0 {
        return None;
    }
    let start_1 = u32::try_from(start_1).ok()?;
    let end = u32::try_from(end_1).ok()?;
    if end < start_1 {
        return None;
    }
    Some(ExonRow {
        seqname: seqname.to_ascii_lowercase(),
        start: start_1 - 1,
        end,
        transcript: transcript.to_ascii_lowercase(),
    })
}

fn get_record_buf_attribute(
    attrs: &noodles::gff::feature::record_buf::Attributes,
    key: &str,
) -> Option<String> {
    let value = attrs.get(key)?;
    value.iter().next().map(|v| v.to_string())
}

/// Order-dependent transcript numbering.
///
/// The counter advances whenever the `(seqname, transcript)` pair differs
/// from the previous exon row; a name keeps the id it was first assigned.
/// Identical inputs in identical order always reproduce the same ids, which
/// is what lets the transcriptome remap re-derive the numbering later.
#[derive(Debug, Default)]
pub struct TranscriptNumbering {
    prev: Option<(String, String)>,
    ids: HashMap<String, Tid>,
    next_id: Tid,
    current: Tid,
}

impl TranscriptNumbering {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, seqname: &str, transcript: &str) -> Tid {
        let changed = match &self.prev {
            Some((prev_seq, prev_tx)) => prev_seq != seqname || prev_tx != transcript,
            None => true,
        };
        if changed {
            self.current = *self
                .ids
                .entry(transcript.to_string())
                .or_insert(self.next_id);
            self.next_id += 1;
            self.prev = Some((seqname.to_string(), transcript.to_string()));
        }
        self.current
    }

    /// Value of the counter, i.e. one past the highest id it could have
    /// handed out.
    pub fn assigned(&self) -> u64 {
        self.next_id as u64
    }

    pub fn names(&self) -> HashMap<Tid, String> {
        let mut names = HashMap::with_capacity(self.ids.len());
        for (name, &id) in &self.ids {
            names.insert(id, name.clone());
        }
        names
    }
}
