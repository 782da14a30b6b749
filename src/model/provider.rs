//! Sources of per-position background models.
//!
//! The detector does not care whether a model is fitted on the fly from a
//! library panel or looked up in a pre-computed cache; both are
//! [`PositionModelProvider`]s chosen at construction time.

use log::debug;

use crate::error::Result;
use crate::model::approx::ApproxModelReader;
use crate::model::em::{af_unrel, fit_joint, fit_prior, uniform_prior_l, FitStrategy};
use crate::model::rho::RhoModel;
use crate::model::BACKGROUND_AF_LIMIT;
use crate::store::LibraryCollection;
use crate::variant::{BackgroundFit, CandidateSite};

/// Yields the fitted background model for a candidate site, or `None` when the
/// site has no credible model (no coverage, cache miss, or too common in the
/// background panel). `None` is the first gate of the evaluation pipeline: a
/// site without a model is "not passed" and its trio data is never touched.
pub trait PositionModelProvider {
    fn position_model(&mut self, site: &CandidateSite) -> Result<Option<BackgroundFit>>;
}

/// Fits the EM model on the fly from a background library collection.
pub struct LiveEmProvider {
    libraries: LibraryCollection,
    strategy: FitStrategy,
}

impl LiveEmProvider {
    #[must_use]
    pub fn new(libraries: LibraryCollection) -> Self {
        Self::with_strategy(libraries, FitStrategy::default())
    }

    #[must_use]
    pub fn with_strategy(libraries: LibraryCollection, strategy: FitStrategy) -> Self {
        Self {
            libraries,
            strategy,
        }
    }

    #[must_use]
    pub fn libraries(&self) -> &LibraryCollection {
        &self.libraries
    }
}

impl PositionModelProvider for LiveEmProvider {
    fn position_model(&mut self, site: &CandidateSite) -> Result<Option<BackgroundFit>> {
        let Some((adfs, adrs)) = self.libraries.mine_ad(site.chrom.id(), site.pos)? else {
            return Ok(None);
        };
        if adfs.is_empty() {
            return Ok(None);
        }

        let (model, prior_l) = match self.strategy {
            FitStrategy::PriorOnly => {
                let model = RhoModel::from_counts(&adfs, &adrs);
                let (prior_l, _) =
                    fit_prior(&model, &adfs, &adrs, site.allele_freq, uniform_prior_l())?;
                (model, prior_l)
            }
            FitStrategy::JointRho => {
                let fit = fit_joint(&adfs, &adrs, site.allele_freq)?;
                (fit.model, fit.prior_l)
            }
        };

        let afu = af_unrel(&model, &prior_l, &adfs, &adrs);
        if afu >= BACKGROUND_AF_LIMIT {
            debug!("{} {}: rejected by background allele frequency {afu:.5}", site.chrom, site.pos);
            return Ok(None);
        }
        Ok(Some(BackgroundFit {
            model,
            prior_l,
            af_unrel: afu,
        }))
    }
}

/// Looks up pre-computed models in an approximate `.mdl` cache.
pub struct CachedApproxProvider {
    reader: ApproxModelReader,
}

impl CachedApproxProvider {
    #[must_use]
    pub fn new(reader: ApproxModelReader) -> Self {
        Self { reader }
    }
}

impl PositionModelProvider for CachedApproxProvider {
    fn position_model(&mut self, site: &CandidateSite) -> Result<Option<BackgroundFit>> {
        self.reader.fit_for(site)
    }
}
