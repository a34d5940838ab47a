//! bam2tcc-rs: collapse aligned reads (SAM/BAM) into transcript-compatibility
//! counts guided by a GTF/GFF annotation.
//!
//! # Library usage
//!
//! ```no_run
//! use bam2tcc_rs::exon_index;
//! use bam2tcc_rs::matrix::TccMatrix;
//! use bam2tcc_rs::pipeline::{self, ScanConfig};
//! use std::path::PathBuf;
//!
//! # fn main() -> anyhow::Result<()> {
//! let annotation = vec![PathBuf::from("annotation.gtf")];
//! let samples = vec![PathBuf::from("sample.bam")];
//!
//! let (index, transcripts) = exon_index::build(&annotation, &[], true)?;
//! let matrix = TccMatrix::new(samples.len());
//! let config = ScanConfig {
//!     paired: true,
//!     force_lightweight: false,
//!     strict: false,
//!     threads: 4,
//!     quiet: true,
//! };
//! for (sample_index, sample) in samples.iter().enumerate() {
//!     pipeline::run_sample(sample, sample_index, &index, &matrix, &config, None)?;
//! }
//! matrix.write_sparse("matrix", transcripts)?;
//! # Ok(())
//! # }
//! ```

pub mod annotation;
pub mod cli;
pub mod exon_index;
pub mod matrix;
pub mod pipeline;
pub mod remap;
pub mod resolve;
pub mod types;

// Flat re-exports for the most commonly used public types.
pub use exon_index::ExonIndex;
pub use matrix::TccMatrix;
pub use pipeline::{ScanConfig, ScanStats};
pub use types::Tid;
