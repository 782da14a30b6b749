//! Candidate sites and the per-stage result structs threaded through the
//! detection pipeline.

use crate::chrom::Chromosome;
use crate::model::rho::RhoModel;

/// One candidate genomic site, created per query and discarded after use.
#[derive(Clone, Debug)]
pub struct CandidateSite {
    pub chrom: Chromosome,
    /// 1-based position
    pub pos: u64,
    pub ref_allele: String,
    pub alt_allele: String,
    /// Externally supplied population allele frequency; negative = unknown
    pub allele_freq: f64,
}

impl CandidateSite {
    #[must_use]
    pub fn new(
        chrom: Chromosome,
        pos: u64,
        ref_allele: impl Into<String>,
        alt_allele: impl Into<String>,
        allele_freq: f64,
    ) -> Self {
        Self {
            chrom,
            pos,
            ref_allele: ref_allele.into(),
            alt_allele: alt_allele.into(),
            allele_freq,
        }
    }

    /// Rejects spanning-deletion and multi-allelic records.
    #[must_use]
    pub fn is_admissible(&self) -> bool {
        !self.alt_allele.contains('*') && !self.alt_allele.contains(',')
    }

    /// True for single-nucleotide substitutions only.
    #[must_use]
    pub fn is_biallelic_snv(&self) -> bool {
        self.is_admissible() && self.ref_allele.len() == 1 && self.alt_allele.len() == 1
    }
}

/// A fitted background model for one site: the rho pair with its likelihood
/// matrices, the EM genotype prior, and the panel-implied allele frequency.
#[derive(Clone, Debug)]
pub struct BackgroundFit {
    pub model: RhoModel,
    /// Genotype prior, log domain
    pub prior_l: [f64; 3],
    pub af_unrel: f64,
}

/// Reduced, copyable view of a [`BackgroundFit`] for reporting.
#[derive(Clone, Copy, Debug)]
pub struct BackgroundSummary {
    pub rho_f: f64,
    pub rho_r: f64,
    pub prior_l: [f64; 3],
    pub af_unrel: f64,
}

impl From<&BackgroundFit> for BackgroundSummary {
    fn from(fit: &BackgroundFit) -> Self {
        let (rho_f, rho_r) = fit.model.rho_pair();
        Self {
            rho_f,
            rho_r,
            prior_l: fit.prior_l,
            af_unrel: fit.af_unrel,
        }
    }
}

/// Why a site was excluded. These are legitimate negative results, not errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// No background coverage, a cache miss, or a background allele frequency
    /// too high for a credible de novo event
    NoBackgroundModel,
    /// The parents carry more raw alternate reads than a de novo site allows
    ParentAltEvidence,
}

/// The de novo posterior split of a passed site.
#[derive(Clone, Copy, Debug)]
pub struct PosteriorResult {
    /// Posterior probability of a de novo event in the child:
    /// `max(p_het, p_hom_alt)`
    pub pp: f64,
    /// Probability mass of "parents hom-ref, child het"
    pub p_het: f64,
    /// Probability mass of "parents hom-ref, child hom-alt"
    pub p_hom_alt: f64,
}

/// Outcome of the trio evaluation stage.
#[derive(Clone, Copy, Debug)]
pub enum TrioVerdict {
    NotPassed(SkipReason),
    Passed(PosteriorResult),
}

/// Final per-site report emitted by the detector.
#[derive(Clone, Copy, Debug)]
pub struct SiteReport {
    pub passed: bool,
    pub reason: Option<SkipReason>,
    /// Present whenever a background model was fitted or looked up
    pub background: Option<BackgroundSummary>,
    /// Present when a trio source was wired and both gates passed
    pub posterior: Option<PosteriorResult>,
}

impl SiteReport {
    #[must_use]
    pub fn not_passed(reason: SkipReason) -> Self {
        Self {
            passed: false,
            reason: Some(reason),
            background: None,
            posterior: None,
        }
    }

    /// Posterior probability, when one was computed.
    #[must_use]
    pub fn pp(&self) -> Option<f64> {
        self.posterior.map(|p| p.pp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admissibility() {
        let site = CandidateSite::new(Chromosome::new(1).unwrap(), 100, "C", "T", 0.001);
        assert!(site.is_admissible());
        assert!(site.is_biallelic_snv());

        let multi = CandidateSite::new(Chromosome::new(1).unwrap(), 100, "C", "T,G", 0.001);
        assert!(!multi.is_admissible());

        let indel = CandidateSite::new(Chromosome::new(1).unwrap(), 100, "CA", "C", 0.001);
        assert!(indel.is_admissible());
        assert!(!indel.is_biallelic_snv());
    }
}
