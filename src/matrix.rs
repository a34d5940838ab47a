use crate::types::{HashMap, HashSet, HashSetExt, Tid};
use anyhow::{bail, Context, Result};
use dashmap::DashMap;
use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Canonical textual form of an equivalence class: comma-separated decimal
/// transcript ids, e.g. `3,7,42`. Callers pass ids already sorted and
/// duplicate-free.
pub fn ec_to_string(ec: &[Tid]) -> String {
    let mut text = String::with_capacity(ec.len() * 4);
    for (i, id) in ec.iter().enumerate() {
        if i > 0 {
            text.push(',');
        }
        let _ = write!(text, "{id}");
    }
    text
}

/// Concurrent map from equivalence class to a per-sample count vector.
///
/// `inc` is the only mutation and is linearizable: the DashMap entry holds
/// its shard lock across the fetch-or-insert and the increment. Any number
/// of workers, for any number of samples, may increment at once.
pub struct TccMatrix {
    counts: DashMap<String, Vec<u64>, ahash::RandomState>,
    num_samples: usize,
}

impl TccMatrix {
    pub fn new(num_samples: usize) -> Self {
        Self {
            counts: DashMap::with_hasher(ahash::RandomState::new()),
            num_samples,
        }
    }

    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Count one read for `ec` in `sample`. Empty classes are the caller's
    /// problem; out-of-range samples are ignored.
    pub fn inc(&self, ec: &[Tid], sample: usize) {
        if ec.is_empty() {
            return;
        }
        let key = ec_to_string(ec);
        let mut row = self
            .counts
            .entry(key)
            .or_insert_with(|| vec![0; self.num_samples]);
        if let Some(cell) = row.get_mut(sample) {
            *cell += 1;
        }
    }

    /// Snapshot of one class's counts, for inspection.
    pub fn get(&self, ec_text: &str) -> Option<Vec<u64>> {
        self.counts.get(ec_text).map(|row| row.value().clone())
    }

    fn snapshot_sorted(&self) -> Vec<(String, Vec<u64>)> {
        let mut rows: Vec<(String, Vec<u64>)> = self
            .counts
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows
    }

    // Row indexing: a single-transcript class reuses its transcript id, a
    // multi-transcript class takes the next index from `total_transcripts`
    // upward. Classes are visited in ascending textual order, which makes
    // the assignment independent of the order workers first saw them.
    fn row_index(ec: &str, next_multi: &mut u64) -> Result<u64> {
        if ec.contains(',') {
            let row = *next_multi;
            *next_multi += 1;
            Ok(row)
        } else {
            ec.parse::<u64>()
                .with_context(|| format!("invalid equivalence class key '{ec}'"))
        }
    }

    /// Write `prefix.ec` and a dense `prefix.tsv` (one column per sample).
    pub fn write_dense(&self, prefix: &str, total_transcripts: u64) -> Result<()> {
        let (mut ec_out, mut tsv_out) = open_outputs(prefix)?;
        let mut next_multi = total_transcripts;
        for (ec, counts) in self.snapshot_sorted() {
            let row = Self::row_index(&ec, &mut next_multi)?;
            writeln!(ec_out, "{row}\t{ec}")?;
            write!(tsv_out, "{row}")?;
            for count in &counts {
                write!(tsv_out, "\t{count}")?;
            }
            writeln!(tsv_out)?;
        }
        ec_out.flush()?;
        tsv_out.flush()?;
        Ok(())
    }

    /// Write `prefix.ec` and a sparse `prefix.tsv`: one line per non-zero
    /// cell, `row \t sample \t count`.
    pub fn write_sparse(&self, prefix: &str, total_transcripts: u64) -> Result<()> {
        let (mut ec_out, mut tsv_out) = open_outputs(prefix)?;
        let mut next_multi = total_transcripts;
        for (ec, counts) in self.snapshot_sorted() {
            let row = Self::row_index(&ec, &mut next_multi)?;
            writeln!(ec_out, "{row}\t{ec}")?;
            for (sample, count) in counts.iter().enumerate() {
                if *count > 0 {
                    writeln!(tsv_out, "{row}\t{sample}\t{count}")?;
                }
            }
        }
        ec_out.flush()?;
        tsv_out.flush()?;
        Ok(())
    }

    /// Write classes in a reference order: every reference class keeps its
    /// reference row (zero-filled when unobserved here), classes unknown to
    /// the reference append afterwards, indexed from `order.len()` upward
    /// in ascending textual order.
    pub fn write_ordered(
        &self,
        prefix: &str,
        order: &[String],
        known: &HashSet<String>,
        sparse: bool,
    ) -> Result<()> {
        let (mut ec_out, mut tsv_out) = open_outputs(prefix)?;
        let zeros = vec![0u64; self.num_samples];
        let snapshot: HashMap<String, Vec<u64>> = self
            .counts
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        for (row, ec) in order.iter().enumerate() {
            let counts = snapshot.get(ec).unwrap_or(&zeros);
            write_row(&mut ec_out, &mut tsv_out, row as u64, ec, counts, sparse)?;
        }

        let mut extras: Vec<&String> = snapshot.keys().filter(|ec| !known.contains(*ec)).collect();
        extras.sort();
        for (i, ec) in extras.into_iter().enumerate() {
            let row = order.len() as u64 + i as u64;
            let counts = snapshot.get(ec).unwrap_or(&zeros);
            write_row(&mut ec_out, &mut tsv_out, row, ec, counts, sparse)?;
        }

        ec_out.flush()?;
        tsv_out.flush()?;
        Ok(())
    }
}

fn write_row(
    ec_out: &mut BufWriter<File>,
    tsv_out: &mut BufWriter<File>,
    row: u64,
    ec: &str,
    counts: &[u64],
    sparse: bool,
) -> Result<()> {
    writeln!(ec_out, "{row}\t{ec}")?;
    if sparse {
        for (sample, count) in counts.iter().enumerate() {
            if *count > 0 {
                writeln!(tsv_out, "{row}\t{sample}\t{count}")?;
            }
        }
    } else {
        write!(tsv_out, "{row}")?;
        for count in counts {
            write!(tsv_out, "\t{count}")?;
        }
        writeln!(tsv_out)?;
    }
    Ok(())
}

fn open_outputs(prefix: &str) -> Result<(BufWriter<File>, BufWriter<File>)> {
    let ec_path = format!("{prefix}.ec");
    let tsv_path = format!("{prefix}.tsv");
    let ec_out = BufWriter::new(
        File::create(&ec_path).with_context(|| format!("failed to open {ec_path}"))?,
    );
    let tsv_out = BufWriter::new(
        File::create(&tsv_path).with_context(|| format!("failed to open {tsv_path}"))?,
    );
    Ok((ec_out, tsv_out))
}

/// Read a reference EC file: `row \t comma-separated-ids` per line.
/// Returns the classes in file order plus a membership set; the text is
/// lower-cased like every other ingested string.
pub fn read_reference_ecs(path: &Path) -> Result<(Vec<String>, HashSet<String>)> {
    let file = File::open(path)
        .with_context(|| format!("failed to open reference EC file {}", path.display()))?;
    let mut order = Vec::new();
    let mut known = HashSet::new();

    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        let line = line.to_ascii_lowercase();
        let mut fields = line.split('\t');
        let _row = fields.next();
        let ec = match fields.next() {
            Some(ec) => ec,
            None => bail!(
                "{}: line {}: expected two tab-separated fields",
                path.display(),
                lineno + 1
            ),
        };
        order.push(ec.to_string());
        known.insert(ec.to_string());
    }

    Ok((order, known))
}

/// Write `prefix.cells`: one sample name per line, in input order, with the
/// `.sam`/`.bam` extension stripped.
pub fn write_cells(prefix: &str, samples: &[PathBuf]) -> Result<()> {
    let path = format!("{prefix}.cells");
    let mut out =
        BufWriter::new(File::create(&path).with_context(|| format!("failed to open {path}"))?);
    for sample in samples {
        let stem = sample
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| sample.to_string_lossy().into_owned());
        writeln!(out, "{stem}")?;
    }
    out.flush()?;
    Ok(())
}
