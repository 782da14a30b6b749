//! Collaborator interface to alignment pileups.
//!
//! The crate does not read alignments itself; a [`PileupProvider`] yields, for
//! one sample at one position, the per-read strand and ref/alt classification.
//! [`accumulate_ad`] folds those observations into an [`AlleleDepth`] under
//! explicit quality thresholds.

use crate::ad::AlleleDepth;
use crate::chrom::Chromosome;
use crate::error::Result;
use crate::model::trio::TrioAd;

/// Mapping/base quality cutoffs applied while folding reads. Defaults are
/// -100/-100, i.e. disabled; overridable per run.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QualityThresholds {
    pub mapping_quality: f64,
    pub base_quality: f64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            mapping_quality: -100.0,
            base_quality: -100.0,
        }
    }
}

/// One aligned read overlapping the queried position.
#[derive(Clone, Copy, Debug)]
pub struct ReadObservation {
    pub reverse_strand: bool,
    /// The read base matches the site's reference allele
    pub matches_ref: bool,
    pub mapping_quality: f64,
    pub base_quality: f64,
}

/// Source of per-read observations for one sample.
pub trait PileupProvider {
    fn reads_at(&mut self, chrom: Chromosome, pos: u64) -> Result<Vec<ReadObservation>>;
}

/// Folds read observations into strand-split allele-depth counts, dropping
/// reads below the quality thresholds.
#[must_use]
pub fn accumulate_ad(reads: &[ReadObservation], thresholds: &QualityThresholds) -> AlleleDepth {
    let mut ad = AlleleDepth::zero();
    for read in reads {
        if read.mapping_quality < thresholds.mapping_quality
            || read.base_quality < thresholds.base_quality
        {
            continue;
        }
        let strand = if read.reverse_strand {
            &mut ad.rev
        } else {
            &mut ad.fwd
        };
        strand[usize::from(!read.matches_ref)] += 1.0;
    }
    ad
}

/// The trio's pileup sources in mother, father, child order.
pub struct TrioPileup<P: PileupProvider> {
    mother: P,
    father: P,
    child: P,
    thresholds: QualityThresholds,
}

impl<P: PileupProvider> TrioPileup<P> {
    #[must_use]
    pub fn new(mother: P, father: P, child: P) -> Self {
        Self::with_thresholds(mother, father, child, QualityThresholds::default())
    }

    #[must_use]
    pub fn with_thresholds(
        mother: P,
        father: P,
        child: P,
        thresholds: QualityThresholds,
    ) -> Self {
        Self {
            mother,
            father,
            child,
            thresholds,
        }
    }

    /// Mines the trio's allele depths at one position.
    pub fn mine(&mut self, chrom: Chromosome, pos: u64) -> Result<TrioAd> {
        let mother = accumulate_ad(&self.mother.reads_at(chrom, pos)?, &self.thresholds);
        let father = accumulate_ad(&self.father.reads_at(chrom, pos)?, &self.thresholds);
        let child = accumulate_ad(&self.child.reads_at(chrom, pos)?, &self.thresholds);
        Ok(TrioAd::new(mother, father, child))
    }
}
