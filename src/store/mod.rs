//! Indexed binary stores for per-position allele-depth counts.
//!
//! Two file formats share one portion codec:
//!
//! - `.idx` ([`PersonWriter`]/[`PersonReader`]): one sample per file.
//! - `.ldx` ([`LibraryBuilder`]/[`LibraryReader`]): a panel of samples batched
//!   per genomic block, so one decompression yields the whole panel's counts
//!   for a position range.
//!
//! Both are write-once: a builder appends portions in (chromosome, shift) order
//! and finalizes a trailing index table on close; readers are randomly seekable
//! and keep a one-block residency cache.

mod library;
mod person;
mod portion;

pub use library::{LibraryBuilder, LibraryCollection, LibraryReader};
pub use person::{PersonReader, PersonWriter};
pub use portion::{Chunk, Portion};
