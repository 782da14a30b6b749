//! Coordinate conversion between genome assemblies.
//!
//! The conversion itself is a collaborator ([`CoordinateMapper`], typically a
//! chain-file liftover engine); [`LiftoverCache`] wraps one instance with a
//! per-chromosome name cache and the 1-based/0-based adjustment. The cache is
//! an explicit component created once per run and passed where needed — never
//! a process-wide global.

use std::collections::HashMap;

use crate::chrom::Chromosome;

/// Maps a 0-based position on a named chromosome to the target assembly;
/// `None` when the position has no image.
pub trait CoordinateMapper {
    fn convert(&self, chrom_name: &str, pos: u64) -> Option<u64>;
}

/// A [`CoordinateMapper`] with cached chromosome-name normalization and
/// 1-based position handling.
pub struct LiftoverCache {
    mapper: Box<dyn CoordinateMapper>,
    names: HashMap<Chromosome, String>,
}

impl LiftoverCache {
    #[must_use]
    pub fn new(mapper: Box<dyn CoordinateMapper>) -> Self {
        Self {
            mapper,
            names: HashMap::new(),
        }
    }

    /// The `chr`-prefixed name handed to the mapper; mitochondrial is `chrM`
    /// in chain files.
    fn chain_name(chrom: Chromosome) -> String {
        if chrom == Chromosome::MT {
            "chrM".to_string()
        } else {
            chrom.to_string()
        }
    }

    /// Converts a 1-based position; `None` when unmappable.
    pub fn convert_pos(&mut self, chrom: Chromosome, pos: u64) -> Option<u64> {
        let name = self
            .names
            .entry(chrom)
            .or_insert_with(|| Self::chain_name(chrom));
        self.mapper.convert(name, pos - 1).map(|p| p + 1)
    }
}
