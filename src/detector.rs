//! The de novo detector: background model gate, raw-evidence veto, posterior.

use log::debug;

use crate::error::Result;
use crate::liftover::LiftoverCache;
use crate::model::provider::PositionModelProvider;
use crate::model::trio::{evaluate_trio, TrioAd};
use crate::pileup::{PileupProvider, TrioPileup};
use crate::variant::{BackgroundSummary, CandidateSite, SiteReport, SkipReason, TrioVerdict};

/// Source of the trio's own allele depths for a candidate site.
pub trait TrioAdSource {
    fn trio_ad(&mut self, site: &CandidateSite) -> Result<TrioAd>;
}

/// A [`TrioAdSource`] backed by alignment pileups, with optional coordinate
/// conversion when the alignments use a different assembly than the candidate
/// coordinates. An unmappable position yields zero depths, not an error.
pub struct PileupTrioSource<P: PileupProvider> {
    pileup: TrioPileup<P>,
    liftover: Option<LiftoverCache>,
}

impl<P: PileupProvider> PileupTrioSource<P> {
    #[must_use]
    pub fn new(pileup: TrioPileup<P>) -> Self {
        Self {
            pileup,
            liftover: None,
        }
    }

    #[must_use]
    pub fn with_liftover(pileup: TrioPileup<P>, liftover: LiftoverCache) -> Self {
        Self {
            pileup,
            liftover: Some(liftover),
        }
    }
}

impl<P: PileupProvider> TrioAdSource for PileupTrioSource<P> {
    fn trio_ad(&mut self, site: &CandidateSite) -> Result<TrioAd> {
        let pos = match &mut self.liftover {
            Some(cache) => match cache.convert_pos(site.chrom, site.pos) {
                Some(pos) => pos,
                None => {
                    debug!("{} {}: position not liftable", site.chrom, site.pos);
                    return Ok(TrioAd::default());
                }
            },
            None => site.pos,
        };
        self.pileup.mine(site.chrom, pos)
    }
}

/// Scores candidate sites for de novo events in the child.
///
/// The background model provider is chosen at construction (live EM over a
/// library panel, or a pre-computed cache). Without a trio source the detector
/// only reports whether a credible background model exists; with one it also
/// computes the posterior. Thresholding the posterior is the caller's policy.
pub struct DenovoDetector<M: PositionModelProvider> {
    provider: M,
    trio: Option<Box<dyn TrioAdSource>>,
}

impl<M: PositionModelProvider> DenovoDetector<M> {
    #[must_use]
    pub fn new(provider: M) -> Self {
        Self {
            provider,
            trio: None,
        }
    }

    #[must_use]
    pub fn with_trio(provider: M, trio: Box<dyn TrioAdSource>) -> Self {
        Self {
            provider,
            trio: Some(trio),
        }
    }

    /// Whether reports carry a posterior probability.
    #[must_use]
    pub fn gives_pp(&self) -> bool {
        self.trio.is_some()
    }

    pub fn detect(&mut self, site: &CandidateSite) -> Result<SiteReport> {
        let Some(fit) = self.provider.position_model(site)? else {
            return Ok(SiteReport::not_passed(SkipReason::NoBackgroundModel));
        };
        let background = BackgroundSummary::from(&fit);

        let Some(trio_source) = self.trio.as_mut() else {
            return Ok(SiteReport {
                passed: true,
                reason: None,
                background: Some(background),
                posterior: None,
            });
        };

        let trio = trio_source.trio_ad(site)?;
        match evaluate_trio(&fit, &trio)? {
            TrioVerdict::NotPassed(reason) => {
                debug!("{} {}: not passed by trio data", site.chrom, site.pos);
                Ok(SiteReport {
                    passed: false,
                    reason: Some(reason),
                    background: Some(background),
                    posterior: None,
                })
            }
            TrioVerdict::Passed(posterior) => Ok(SiteReport {
                passed: true,
                reason: None,
                background: Some(background),
                posterior: Some(posterior),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    use crate::ad::AlleleDepth;
    use crate::chrom::Chromosome;
    use crate::liftover::CoordinateMapper;
    use crate::model::approx::{build_approx_cache, ApproxModelReader};
    use crate::model::provider::{CachedApproxProvider, LiveEmProvider};
    use crate::model::BACKGROUND_AF_LIMIT;
    use crate::pileup::ReadObservation;
    use crate::store::{LibraryBuilder, LibraryCollection, LibraryReader, Portion};

    const PANEL: usize = 50;

    /// Library with a clean block at chr1:1000..1005 and a block at
    /// chr2:2000..2005 where half the panel is heterozygous.
    fn write_panel_library(path: &std::path::Path) {
        let names: Vec<String> = (0..PANEL).map(|i| format!("U{i:03}")).collect();
        let name_refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let mut builder = LibraryBuilder::create(path, &name_refs).unwrap();

        let clean: Vec<Portion> = (0..PANEL)
            .map(|_| Portion::encode(1, 1000, &[[48, 1, 49, 2]; 5]))
            .collect();
        builder.add_portions(&clean).unwrap();

        let common: Vec<Portion> = (0..PANEL)
            .map(|i| {
                let counts = if i < PANEL / 2 {
                    [[25, 25, 25, 25]; 5]
                } else {
                    [[50, 0, 50, 0]; 5]
                };
                Portion::encode(2, 2000, &counts)
            })
            .collect();
        builder.add_portions(&common).unwrap();
        builder.finish().unwrap();
    }

    fn panel_collection(dir: &std::path::Path) -> LibraryCollection {
        let path = dir.join("panel.ldx");
        if !path.exists() {
            write_panel_library(&path);
        }
        LibraryCollection::from_readers(vec![LibraryReader::open(&path).unwrap()])
    }

    struct FixedTrio {
        trio: TrioAd,
        calls: Rc<RefCell<usize>>,
    }

    impl TrioAdSource for FixedTrio {
        fn trio_ad(&mut self, _site: &CandidateSite) -> Result<TrioAd> {
            *self.calls.borrow_mut() += 1;
            Ok(self.trio)
        }
    }

    fn de_novo_trio() -> TrioAd {
        TrioAd::new(
            AlleleDepth::new(50.0, 0.0, 50.0, 0.0),
            AlleleDepth::new(50.0, 0.0, 50.0, 0.0),
            AlleleDepth::new(5.0, 45.0, 4.0, 46.0),
        )
    }

    fn site(pos: u64, af: f64) -> CandidateSite {
        CandidateSite::new(Chromosome::new(1).unwrap(), pos, "C", "T", af)
    }

    fn site_on(chrom: u8, pos: u64, af: f64) -> CandidateSite {
        CandidateSite::new(Chromosome::new(chrom).unwrap(), pos, "C", "T", af)
    }

    #[test]
    fn live_detector_passes_canonical_de_novo() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LiveEmProvider::new(panel_collection(dir.path()));
        let calls = Rc::new(RefCell::new(0));
        let mut detector = DenovoDetector::with_trio(
            provider,
            Box::new(FixedTrio {
                trio: de_novo_trio(),
                calls: calls.clone(),
            }),
        );
        assert!(detector.gives_pp());

        let report = detector.detect(&site(1002, 0.0005)).unwrap();
        assert!(report.passed);
        let pp = report.pp().expect("passed site must carry a posterior");
        assert!((pp - 1.0).abs() < 0.01, "PP = {pp}");

        let background = report.background.unwrap();
        assert!(background.rho_f > 0.9);
        assert!(background.af_unrel < BACKGROUND_AF_LIMIT);
    }

    #[test]
    fn alt_supporting_father_is_vetoed() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LiveEmProvider::new(panel_collection(dir.path()));
        let trio = TrioAd::new(
            AlleleDepth::new(50.0, 0.0, 50.0, 0.0),
            AlleleDepth::new(10.0, 40.0, 9.0, 41.0),
            AlleleDepth::new(5.0, 45.0, 4.0, 46.0),
        );
        let mut detector = DenovoDetector::with_trio(
            provider,
            Box::new(FixedTrio {
                trio,
                calls: Rc::new(RefCell::new(0)),
            }),
        );

        let report = detector.detect(&site(1002, 0.0005)).unwrap();
        assert!(!report.passed);
        assert_eq!(report.reason, Some(SkipReason::ParentAltEvidence));
        assert!(report.posterior.is_none());
    }

    #[test]
    fn uncovered_site_short_circuits_before_trio_mining() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LiveEmProvider::new(panel_collection(dir.path()));
        let calls = Rc::new(RefCell::new(0));
        let mut detector = DenovoDetector::with_trio(
            provider,
            Box::new(FixedTrio {
                trio: de_novo_trio(),
                calls: calls.clone(),
            }),
        );

        let report = detector.detect(&site(5000, 0.0005)).unwrap();
        assert!(!report.passed);
        assert_eq!(report.reason, Some(SkipReason::NoBackgroundModel));
        assert_eq!(*calls.borrow(), 0, "trio data must not be touched");
    }

    #[test]
    fn common_background_site_short_circuits_before_trio_mining() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LiveEmProvider::new(panel_collection(dir.path()));
        let calls = Rc::new(RefCell::new(0));
        let mut detector = DenovoDetector::with_trio(
            provider,
            Box::new(FixedTrio {
                trio: de_novo_trio(),
                calls: calls.clone(),
            }),
        );

        let report = detector.detect(&site_on(2, 2002, 0.0005)).unwrap();
        assert!(!report.passed);
        assert_eq!(report.reason, Some(SkipReason::NoBackgroundModel));
        assert_eq!(*calls.borrow(), 0);
    }

    #[test]
    fn detector_without_trio_reports_model_availability() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LiveEmProvider::new(panel_collection(dir.path()));
        let mut detector = DenovoDetector::new(provider);
        assert!(!detector.gives_pp());

        let report = detector.detect(&site(1002, 0.0005)).unwrap();
        assert!(report.passed);
        assert!(report.posterior.is_none());
        assert!(report.background.is_some());

        let report = detector.detect(&site(5000, 0.0005)).unwrap();
        assert!(!report.passed);
    }

    #[test]
    fn cached_detector_matches_live_verdicts() {
        let dir = tempfile::tempdir().unwrap();
        let mdl_path = dir.path().join("panel.mdl");
        let mut collection = panel_collection(dir.path());
        let written = build_approx_cache(&mut collection, &mdl_path).unwrap();
        assert_eq!(written, 10);

        let reader = ApproxModelReader::open(&mdl_path).unwrap();
        let provider = CachedApproxProvider::new(reader);
        let mut detector = DenovoDetector::with_trio(
            provider,
            Box::new(FixedTrio {
                trio: de_novo_trio(),
                calls: Rc::new(RefCell::new(0)),
            }),
        );

        let report = detector.detect(&site(1002, 0.0005)).unwrap();
        assert!(report.passed);
        let pp = report.pp().unwrap();
        assert!((pp - 1.0).abs() < 0.01, "PP = {pp}");

        // the common block was cached as rejected
        let report = detector.detect(&site_on(2, 2002, 0.0005)).unwrap();
        assert!(!report.passed);

        // cache miss behaves like missing coverage
        let report = detector.detect(&site(5000, 0.0005)).unwrap();
        assert_eq!(report.reason, Some(SkipReason::NoBackgroundModel));
    }

    // ==================== pileup-backed trio source ====================

    struct TableauPileup {
        /// (pos, reads) pairs for this sample
        rows: Vec<(u64, Vec<ReadObservation>)>,
    }

    impl PileupProvider for TableauPileup {
        fn reads_at(&mut self, _chrom: Chromosome, pos: u64) -> Result<Vec<ReadObservation>> {
            Ok(self
                .rows
                .iter()
                .find(|(p, _)| *p == pos)
                .map(|(_, reads)| reads.clone())
                .unwrap_or_default())
        }
    }

    fn reads(fwd_ref: usize, fwd_alt: usize, rev_ref: usize, rev_alt: usize) -> Vec<ReadObservation> {
        let mut out = Vec::new();
        let mut push = |n: usize, reverse: bool, matches_ref: bool| {
            for _ in 0..n {
                out.push(ReadObservation {
                    reverse_strand: reverse,
                    matches_ref,
                    mapping_quality: 60.0,
                    base_quality: 30.0,
                });
            }
        };
        push(fwd_ref, false, true);
        push(fwd_alt, false, false);
        push(rev_ref, true, true);
        push(rev_alt, true, false);
        out
    }

    struct OffsetMapper(u64);

    impl CoordinateMapper for OffsetMapper {
        fn convert(&self, _chrom_name: &str, pos: u64) -> Option<u64> {
            Some(pos + self.0)
        }
    }

    #[test]
    fn pileup_source_with_liftover_mines_converted_positions() {
        // alignments live 100 positions downstream of the candidate coordinates
        let aligned_pos = 1102;
        let pileup = TrioPileup::new(
            TableauPileup {
                rows: vec![(aligned_pos, reads(50, 0, 50, 0))],
            },
            TableauPileup {
                rows: vec![(aligned_pos, reads(50, 0, 50, 0))],
            },
            TableauPileup {
                rows: vec![(aligned_pos, reads(5, 45, 4, 46))],
            },
        );
        let cache = LiftoverCache::new(Box::new(OffsetMapper(100)));
        let mut source = PileupTrioSource::with_liftover(pileup, cache);

        let trio = source.trio_ad(&site(1002, 0.0005)).unwrap();
        assert_eq!(trio, de_novo_trio());

        let dir = tempfile::tempdir().unwrap();
        let provider = LiveEmProvider::new(panel_collection(dir.path()));
        let mut detector = DenovoDetector::with_trio(provider, Box::new(source));
        let report = detector.detect(&site(1002, 0.0005)).unwrap();
        assert!(report.passed);
        assert!((report.pp().unwrap() - 1.0).abs() < 0.01);
    }
}
