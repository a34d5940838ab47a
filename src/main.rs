use anyhow::{bail, Result};
use bam2tcc_rs::{cli, exon_index, matrix, pipeline};
use clap::Parser;
use mimalloc::MiMalloc;
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn main() -> Result<()> {
    let args = match cli::Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            // clap exits 2 on usage errors by default; everything fatal here
            // exits 1.
            let is_help = matches!(
                e.kind(),
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion
            );
            let _ = e.print();
            std::process::exit(if is_help { 0 } else { 1 });
        }
    };

    // Initialize tracing subscriber
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if args.quiet {
            EnvFilter::new("warn")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if args.annotation.is_empty() && !args.lightweight {
        bail!("at least one annotation file (-g) is required unless -r is given");
    }

    let started = std::time::Instant::now();

    let (index, mut total_transcripts) = if args.annotation.is_empty() {
        (exon_index::ExonIndex::default(), 0)
    } else {
        exon_index::build(&args.annotation, &args.transcriptomes, !args.quiet)?
    };
    tracing::info!(
        contigs = index.num_contigs(),
        transcripts = total_transcripts,
        "annotation index ready"
    );

    if args.lightweight {
        // References are transcripts here, so the row-index base is the
        // widest reference dictionary among the inputs.
        for sample in &args.alignments {
            total_transcripts = total_transcripts.max(pipeline::reference_count(sample)?);
        }
    }

    let matrix = matrix::TccMatrix::new(args.alignments.len());
    let config = pipeline::ScanConfig {
        paired: !args.single_end,
        force_lightweight: args.lightweight,
        strict: false,
        threads: args.threads.max(1),
        quiet: args.quiet,
    };

    let unmatched = match (&args.unmatched_out, args.alignments.first()) {
        (Some(path), Some(first_sample)) => {
            Some(pipeline::UnmatchedOut::create(path, first_sample)?)
        }
        _ => None,
    };

    let mut total_records = 0u64;
    let mut unmatched_reads = 0u64;
    for (sample_index, sample) in args.alignments.iter().enumerate() {
        let stats = pipeline::run_sample(
            sample,
            sample_index,
            &index,
            &matrix,
            &config,
            unmatched.as_ref(),
        )?;
        tracing::info!(
            sample = %sample.display(),
            records = stats.total_records,
            read_groups = stats.read_groups,
            matched = stats.matched_groups,
            unmatched = stats.unmatched_reads,
            "sample scan complete"
        );
        total_records += stats.total_records;
        unmatched_reads += stats.unmatched_reads;
    }

    match &args.reference_ec {
        Some(path) => {
            let (order, known) = matrix::read_reference_ecs(path)?;
            matrix.write_ordered(&args.output, &order, &known, !args.full_matrix)?;
        }
        None if args.full_matrix => matrix.write_dense(&args.output, total_transcripts)?,
        None => matrix.write_sparse(&args.output, total_transcripts)?,
    }
    matrix::write_cells(&args.output, &args.alignments)?;

    tracing::info!(
        elapsed_s = started.elapsed().as_secs(),
        records = total_records,
        equivalence_classes = matrix.len(),
        unmatched_reads,
        "bam2tcc-rs: processing complete"
    );
    Ok(())
}
