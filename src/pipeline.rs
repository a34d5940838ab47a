use crate::exon_index::ExonIndex;
use crate::matrix::TccMatrix;
use crate::resolve::{self, ReadGroup};
use anyhow::{anyhow, Context, Result};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use rust_htslib::bam::header::HeaderRecord;
use rust_htslib::bam::{self, Read as HtsRead, Record};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::thread;

const BATCH_SIZE: usize = 64;
const PROGRESS_UPDATE_INTERVAL: u64 = 1000;
const UNMATCHED_FLUSH_GROUPS: usize = 8;

/// Run-wide scan settings, passed explicitly instead of living in globals.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Reads are paired; orphaned mates are dropped, not recovered.
    pub paired: bool,
    /// Treat reference ids as transcript ids even without a rapmap @PG tag.
    pub force_lightweight: bool,
    /// Additionally require same-reference, all-proper pairs per record.
    pub strict: bool,
    /// Worker threads per sample.
    pub threads: usize,
    /// Suppress the progress spinner.
    pub quiet: bool,
}

#[derive(Debug, Default, Clone)]
pub struct ScanStats {
    pub total_records: u64,
    pub unmapped_records: u64,
    pub read_groups: u64,
    pub matched_groups: u64,
    pub unmatched_reads: u64,
}

#[derive(Default)]
struct WorkerCounters {
    matched_groups: AtomicU64,
    unmatched_reads: AtomicU64,
}

struct WorkItem {
    groups: Vec<Vec<Record>>,
}

/// Sink for reads that match no transcript. Created once with the first
/// sample's header (a SAM file holds exactly one header); every sample
/// appends records under it. Workers buffer locally and flush under the
/// mutex.
pub struct UnmatchedOut {
    writer: Mutex<bam::Writer>,
}

impl UnmatchedOut {
    pub fn create(path: &Path, first_sample: &Path) -> Result<Self> {
        let reader = bam::Reader::from_path(first_sample)
            .with_context(|| format!("failed to open alignment file {}", first_sample.display()))?;
        let mut header = bam::Header::from_template(reader.header());

        let command_line = std::env::args().collect::<Vec<_>>().join(" ");
        let mut pg = HeaderRecord::new(b"PG");
        pg.push_tag(b"ID", &"bam2tcc-rs");
        pg.push_tag(b"PN", &"bam2tcc-rs");
        pg.push_tag(b"CL", &command_line.as_str());
        header.push_record(&pg);

        let writer = bam::Writer::from_path(path, &header, bam::Format::Sam)
            .with_context(|| format!("failed to open unmatched output {}", path.display()))?;
        Ok(Self {
            writer: Mutex::new(writer),
        })
    }

    fn write_all(&self, records: &[Record]) -> Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| anyhow!("unmatched output lock poisoned"))?;
        for record in records {
            writer.write(record)?;
        }
        Ok(())
    }
}

/// Number of reference sequences a file's header declares.
pub fn reference_count(path: &Path) -> Result<u64> {
    let reader = bam::Reader::from_path(path)
        .with_context(|| format!("failed to open alignment file {}", path.display()))?;
    Ok(reader.header().target_count() as u64)
}

/// Scan one sample and add its reads to the matrix under `sample_index`.
///
/// One reader thread streams the file and groups consecutive records by
/// effective query name onto a bounded channel; a pool of workers resolves
/// each group's equivalence class and increments the matrix. The exon index
/// is shared read-only; the matrix increment is the only shared mutation.
pub fn run_sample(
    path: &Path,
    sample_index: usize,
    index: &ExonIndex,
    matrix: &TccMatrix,
    config: &ScanConfig,
    unmatched: Option<&UnmatchedOut>,
) -> Result<ScanStats> {
    let mut reader = bam::Reader::from_path(path)
        .with_context(|| format!("failed to open alignment file {}", path.display()))?;

    let header_text =
        String::from_utf8_lossy(&bam::Header::from_template(reader.header()).to_bytes())
            .into_owned();
    let lightweight = config.force_lightweight
        || header_pg_id(&header_text).map_or(false, |id| id.eq_ignore_ascii_case("rapmap"));
    if lightweight {
        tracing::info!(
            file = %path.display(),
            "lightweight alignments: reference ids are transcript ids"
        );
    }

    let contig_names: Vec<String> = reader
        .header()
        .target_names()
        .iter()
        .map(|name| String::from_utf8_lossy(name).to_ascii_lowercase())
        .collect();

    let all_same = if config.paired {
        detect_pair_naming(path)?
    } else {
        true
    };

    let progress = if !config.quiet {
        let pb = ProgressBar::new_spinner();
        pb.set_draw_target(ProgressDrawTarget::stderr_with_hz(2));
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(format!("Scanning {}", path.display()));
        Some(pb)
    } else {
        None
    };

    let worker_count = config.threads.max(1);
    let cap = worker_count.saturating_mul(4).max(8);
    let (tx_work, rx_work) = flume::bounded::<WorkItem>(cap);
    let counters = WorkerCounters::default();

    let counters_ref = &counters;
    let names_ref = &contig_names;
    let paired = config.paired;
    let strict = config.strict;

    let mut stats = thread::scope(|scope| -> Result<ScanStats> {
        let mut handles = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let rx_work = rx_work.clone();
            handles.push(scope.spawn(move || -> Result<()> {
                let mut pending_unmatched: Vec<Record> = Vec::new();
                let mut pending_groups = 0usize;

                while let Ok(item) = rx_work.recv() {
                    for records in item.groups {
                        let mut group = ReadGroup::default();
                        for record in records {
                            if keep_record(&record, strict) {
                                group.push(record);
                            }
                        }

                        let ec = resolve::read_ec(&group, index, names_ref, lightweight, paired);
                        if ec.is_empty() {
                            counters_ref.unmatched_reads.fetch_add(1, Ordering::Relaxed);
                            if unmatched.is_some() && !group.is_empty() {
                                pending_unmatched.extend(group.first);
                                pending_unmatched.extend(group.last);
                                pending_groups += 1;
                            }
                        } else {
                            matrix.inc(&ec, sample_index);
                            counters_ref.matched_groups.fetch_add(1, Ordering::Relaxed);
                        }
                    }

                    if pending_groups >= UNMATCHED_FLUSH_GROUPS {
                        if let Some(out) = unmatched {
                            out.write_all(&pending_unmatched)?;
                        }
                        pending_unmatched.clear();
                        pending_groups = 0;
                    }
                }

                if !pending_unmatched.is_empty() {
                    if let Some(out) = unmatched {
                        out.write_all(&pending_unmatched)?;
                    }
                }
                Ok(())
            }));
        }
        drop(rx_work); // workers own the remaining receivers

        // Reader runs here; dropping tx_work inside signals workers to exit.
        let stats = read_and_group(&mut reader, tx_work, all_same, &progress);

        for (i, handle) in handles.into_iter().enumerate() {
            handle
                .join()
                .map_err(|_| anyhow!("worker thread {i} panicked"))?
                .with_context(|| format!("worker thread {i} failed"))?;
        }
        Ok(stats)
    })?;

    stats.matched_groups = counters.matched_groups.load(Ordering::Relaxed);
    stats.unmatched_reads = counters.unmatched_reads.load(Ordering::Relaxed);

    if let Some(pb) = progress {
        pb.finish_with_message(format!(
            "{}: {} records in {} read groups",
            path.display(),
            stats.total_records,
            stats.read_groups
        ));
    }

    Ok(stats)
}

/// Reads records, groups consecutive ones by effective query name, batches
/// groups, and sends batches to `tx`. Returns the reader-side statistics.
///
/// Dropping `tx` (when this function returns) closes the channel,
/// signalling the workers to exit their recv loops.
fn read_and_group(
    reader: &mut bam::Reader,
    tx: flume::Sender<WorkItem>,
    all_same: bool,
    progress: &Option<ProgressBar>,
) -> ScanStats {
    let mut stats = ScanStats::default();
    let mut current_name: Option<Vec<u8>> = None;
    let mut group: Vec<Record> = Vec::new();
    let mut batch: Vec<Vec<Record>> = Vec::with_capacity(BATCH_SIZE);

    let mut record = Record::new();
    loop {
        match reader.read(&mut record) {
            None => break,
            Some(Err(_)) => break,
            Some(Ok(())) => {}
        }
        stats.total_records += 1;
        if record.is_unmapped() {
            stats.unmapped_records += 1;
        }
        if let Some(pb) = progress {
            if stats.total_records % PROGRESS_UPDATE_INTERVAL == 0 {
                pb.set_message(format!("Scanned {} records", stats.total_records));
                pb.tick();
            }
        }

        let name = effective_qname(record.qname(), all_same).to_vec();
        let same_name = current_name.as_deref() == Some(name.as_slice());
        if same_name || current_name.is_none() {
            if current_name.is_none() {
                current_name = Some(name);
            }
            group.push(record.clone());
        } else {
            // Name changed: flush current group into the batch.
            stats.read_groups += 1;
            batch.push(std::mem::take(&mut group));
            if batch.len() >= BATCH_SIZE
                && tx
                    .send(WorkItem {
                        groups: std::mem::replace(&mut batch, Vec::with_capacity(BATCH_SIZE)),
                    })
                    .is_err()
            {
                break;
            }
            current_name = Some(name);
            group.push(record.clone());
        }
    }

    if !group.is_empty() {
        stats.read_groups += 1;
        batch.push(group);
    }
    if !batch.is_empty() {
        let _ = tx.send(WorkItem { groups: batch });
    }
    // `tx` drops here, closing the channel.
    stats
}

fn keep_record(record: &Record, strict: bool) -> bool {
    if record.is_unmapped() {
        return false;
    }
    if strict && record.is_paired() {
        if record.tid() != record.mtid() {
            return false;
        }
        if !record.is_proper_pair() {
            return false;
        }
    }
    true
}

/// Query name with the mate suffix stripped when mates are distinguished
/// by their last two characters (`.1`/`.2`, `/1`/`/2`).
fn effective_qname(qname: &[u8], all_same: bool) -> &[u8] {
    if !all_same && qname.len() > 2 {
        &qname[..qname.len() - 2]
    } else {
        qname
    }
}

/// Figure out how mates of a pair are named: identical query names
/// (`all_same = true`) or a two-character `.1`/`.2` / `/1`/`/2` suffix
/// (`all_same = false`).
///
/// Scans from the top of the file until both a mate-1 and a mate-2 suffix
/// have been seen, or until a name that fits neither convention appears.
/// Requiring the separator keeps plain sequential names like `r1, r2` from
/// looking like mate suffixes. Assumes mate 1 precedes mate 2, which holds
/// for name-grouped files.
fn detect_pair_naming(path: &Path) -> Result<bool> {
    let mut reader = bam::Reader::from_path(path)
        .with_context(|| format!("failed to open alignment file {}", path.display()))?;

    let mut one_seen = false;
    let mut two_seen = false;
    let mut record = Record::new();
    loop {
        match reader.read(&mut record) {
            None => break,
            Some(Err(_)) => break,
            Some(Ok(())) => {}
        }
        let qname = record.qname();
        if qname.len() < 2 {
            break;
        }
        let separator = qname[qname.len() - 2];
        if separator != b'.' && separator != b'/' {
            break;
        }
        match qname[qname.len() - 1] {
            b'1' => one_seen = true,
            b'2' => two_seen = true,
            _ => break,
        }
        if one_seen && two_seen {
            return Ok(false);
        }
    }
    Ok(true)
}

/// `ID:` value of the first `@PG` header line, if any.
fn header_pg_id(header_text: &str) -> Option<String> {
    for line in header_text.lines() {
        if !line.starts_with("@PG") {
            continue;
        }
        for field in line.split('\t').skip(1) {
            if let Some(id) = field.strip_prefix("ID:") {
                return Some(id.to_string());
            }
        }
        return None;
    }
    None
}
