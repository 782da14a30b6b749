//! # trionovo
//!
//! Indexed allele-depth stores and a Bayesian trio model for de novo variant
//! detection.
//!
//! The crate has two halves:
//!
//! - **Stores** ([`store`], [`mdl`]): compact, block-compressed, randomly seekable
//!   file formats for per-position, per-sample allele-depth counts (`.idx` for a
//!   single sample, `.ldx` for a panel of samples) and for pre-computed per-position
//!   model parameters (`.mdl`).
//! - **Model** ([`model`], [`detector`]): an EM-fitted strand-bias and genotype-prior
//!   background model learned from a panel of unrelated samples, and a closed-form
//!   posterior calculator scoring a mother/father/child trio for a de novo event.
//!
//! A typical pipeline reads background allele depths from a
//! [`store::LibraryCollection`], fits a [`variant::BackgroundFit`] per candidate site
//! (or looks one up in a [`model::ApproxModelReader`] cache), and hands it together
//! with the trio's own pileup counts to a [`DenovoDetector`].

pub mod ad;
pub mod chrom;
pub mod detector;
mod error;
pub mod liftover;
pub mod mdl;
pub mod model;
pub mod pileup;
pub mod store;
pub mod variant;

pub use ad::AlleleDepth;
pub use chrom::Chromosome;
pub use detector::DenovoDetector;
pub use error::{Error, FormatError, ModelError, Result, StoreError};
pub use variant::{BackgroundFit, CandidateSite, SiteReport, TrioVerdict};

/// Magic prefix of a multi-sample library file (`.ldx`).
pub const LIBRARY_MAGIC: &[u8; 12] = b"#LibBlockAD\n";
/// Magic prefix of a single-sample file (`.idx`).
pub const PERSON_MAGIC: &[u8; 12] = b"#SeqBlockAD\n";
/// Prefix of a non-final chunk within a portion.
pub const CHUNK_MAGIC_PRE: &[u8; 7] = b"#Blk-0\n";
/// Prefix of the final chunk within a portion.
pub const CHUNK_MAGIC_LAST: &[u8; 7] = b"#Block\n";

/// Upper bound on distinct allele-depth code points per chunk (code point 0 is
/// reserved for the all-zero depth).
pub const CHUNK_TABLE_LIMIT: usize = 64_000;
