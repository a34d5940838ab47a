use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "bam2tcc-rs",
    about = "Collapse aligned reads into transcript-compatibility counts",
    version
)]
pub struct Args {
    /// Comma-separated GTF/GFF annotation files (required unless -r)
    #[arg(short = 'g', long = "gtf", value_name = "GTF", value_delimiter = ',')]
    pub annotation: Vec<PathBuf>,

    /// Comma-separated SAM/BAM files with aligned reads
    #[arg(
        short = 'S',
        long = "sam",
        value_name = "SAM",
        value_delimiter = ',',
        required = true
    )]
    pub alignments: Vec<PathBuf>,

    /// Prefix for the .ec/.tsv/.cells output files
    #[arg(short = 'o', long = "output", value_name = "PREFIX", default_value = "matrix")]
    pub output: String,

    /// FASTA transcriptome(s); renumber transcripts to their order of
    /// appearance across these files
    #[arg(short = 't', long = "transcriptome", value_name = "FASTA", value_delimiter = ',')]
    pub transcriptomes: Vec<PathBuf>,

    /// Reference EC file; emit equivalence classes in the same order
    #[arg(short = 'e', long = "ec", value_name = "EC")]
    pub reference_ec: Option<PathBuf>,

    /// Write the reads that match no transcript to this SAM file
    #[arg(short = 'u', long = "unmatched-output", value_name = "SAM")]
    pub unmatched_out: Option<PathBuf>,

    /// Number of worker threads per sample
    #[arg(short = 'p', long = "threads", default_value_t = 1)]
    pub threads: usize,

    /// Reads are single-end
    #[arg(short = 'U', long = "single-end")]
    pub single_end: bool,

    /// Reference ids are transcript ids already (lightweight mappers);
    /// the annotation index is never consulted
    #[arg(short = 'r', long = "transcript-refs")]
    pub lightweight: bool,

    /// Write the dense count matrix instead of the sparse default
    #[arg(long = "full-matrix")]
    pub full_matrix: bool,

    /// Suppress progress output and set logging level to WARN
    #[arg(short = 'q', long = "quiet")]
    pub quiet: bool,
}
