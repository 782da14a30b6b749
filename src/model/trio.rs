//! Trio posterior: scores a mother/father/child genotype configuration for a
//! de novo event under a fitted background model.

use crate::ad::AlleleDepth;
use crate::error::{ModelError, Result};
use crate::variant::{BackgroundFit, PosteriorResult, SkipReason, TrioVerdict};

/// Smoothing of the Mendelian transmission table; keeps impossible
/// transmissions at a tiny probability instead of locking them out at zero.
const MENDEL_DD: f64 = 1e-8;

/// A site fails the raw-evidence veto when the parents carry more than this
/// many alternate-supporting reads across both strands.
pub const PARENT_ALT_READ_LIMIT: f64 = 3.0;

/// The trio's allele depths in mother, father, child order.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TrioAd {
    pub mother: AlleleDepth,
    pub father: AlleleDepth,
    pub child: AlleleDepth,
}

impl TrioAd {
    #[must_use]
    pub fn new(mother: AlleleDepth, father: AlleleDepth, child: AlleleDepth) -> Self {
        Self {
            mother,
            father,
            child,
        }
    }

    /// Alternate-supporting reads in both parents, both strands.
    #[must_use]
    pub fn parent_alt_reads(&self) -> f64 {
        self.mother.alt_total() + self.father.alt_total()
    }
}

/// `P(child gt | mother gt, father gt)` for each genotype triple, smoothed by
/// `dd` and returned in the log domain.
fn mendelian_log_table(dd: f64) -> [[[f64; 3]; 3]; 3] {
    let table = [
        [
            [1.0 - 2.0 * dd, (2.0 - dd) * dd, dd * dd],
            [0.5 - dd / 2.0, 0.5, dd / 2.0],
            [dd * (1.0 - dd), 1.0 - 2.0 * dd * (1.0 - dd), dd * (1.0 - dd)],
        ],
        [
            [0.5 - dd / 2.0, 0.5, dd / 2.0],
            [0.25, 0.5, 0.25],
            [dd / 2.0, 0.5, 0.5 - dd / 2.0],
        ],
        [
            [dd * (1.0 - dd), 1.0 - 2.0 * dd * (1.0 - dd), dd * (1.0 - dd)],
            [dd / 2.0, 0.5, 0.5 - dd / 2.0],
            [dd * dd, (2.0 - dd) * dd, 1.0 - 2.0 * dd],
        ],
    ];
    let mut log = [[[0.0; 3]; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            for k in 0..3 {
                log[i][j][k] = table[i][j][k].ln();
            }
        }
    }
    log
}

/// Builds the normalized 27-cell joint probability over (mother, father,
/// child) genotypes and extracts the de novo posterior split.
///
/// Fails with [`ModelError::NumericalInstability`] when the normalized table
/// degenerates to NaN or zero mass — such a site must be dropped, not called.
pub fn posterior_probability(fit: &BackgroundFit, trio: &TrioAd) -> Result<PosteriorResult> {
    let gtl = [
        fit.model.gtl(trio.mother.fwd, trio.mother.rev),
        fit.model.gtl(trio.father.fwd, trio.father.rev),
        fit.model.gtl(trio.child.fwd, trio.child.rev),
    ];
    let mendel = mendelian_log_table(MENDEL_DD);

    let mut work = [0.0f64; 27];
    for i in 0..3 {
        for j in 0..3 {
            for k in 0..3 {
                work[i * 9 + j * 3 + k] = mendel[i][j][k]
                    + gtl[2][k]
                    + fit.prior_l[j]
                    + gtl[1][j]
                    + fit.prior_l[i]
                    + gtl[0][i];
            }
        }
    }

    let max = work.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut total = 0.0;
    for cell in &mut work {
        *cell = (*cell - max).exp();
        total += *cell;
    }
    if !total.is_finite() || total <= 0.0 {
        return Err(ModelError::NumericalInstability("trio joint table").into());
    }

    // cells [0][0][1] and [0][0][2]: both parents hom-ref, child carries alt
    let p_het = work[1] / total;
    let p_hom_alt = work[2] / total;
    if p_het.is_nan() || p_hom_alt.is_nan() {
        return Err(ModelError::NumericalInstability("de novo posterior").into());
    }
    Ok(PosteriorResult {
        pp: p_het.max(p_hom_alt),
        p_het,
        p_hom_alt,
    })
}

/// Applies the raw-evidence veto, then computes the posterior. The background
/// consistency gate (`AF_unrel`) ran earlier, in the model provider: a site
/// that failed it never produces a [`BackgroundFit`] at all.
pub fn evaluate_trio(fit: &BackgroundFit, trio: &TrioAd) -> Result<TrioVerdict> {
    if trio.parent_alt_reads() > PARENT_ALT_READ_LIMIT {
        return Ok(TrioVerdict::NotPassed(SkipReason::ParentAltEvidence));
    }
    Ok(TrioVerdict::Passed(posterior_probability(fit, trio)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::em::{fit_prior, uniform_prior_l};
    use crate::model::rho::RhoModel;

    fn clean_background(n: usize) -> BackgroundFit {
        let adfs = vec![[48.0, 1.0]; n];
        let adrs = vec![[49.0, 2.0]; n];
        let model = RhoModel::from_counts(&adfs, &adrs);
        let (prior_l, _) = fit_prior(&model, &adfs, &adrs, 0.0005, uniform_prior_l()).unwrap();
        BackgroundFit {
            model,
            prior_l,
            af_unrel: 0.0,
        }
    }

    #[test]
    fn mendel_table_rows_are_distributions() {
        let mendel = mendelian_log_table(MENDEL_DD);
        for row in &mendel {
            for cell in row {
                let sum: f64 = cell.iter().map(|l| l.exp()).sum();
                assert!((sum - 1.0).abs() < 1e-6, "row sums to {sum}");
            }
        }
    }

    #[test]
    fn canonical_de_novo_scores_near_one() {
        let fit = clean_background(50);
        let trio = TrioAd::new(
            AlleleDepth::new(50.0, 0.0, 50.0, 0.0),
            AlleleDepth::new(50.0, 0.0, 50.0, 0.0),
            AlleleDepth::new(5.0, 45.0, 4.0, 46.0),
        );
        let verdict = evaluate_trio(&fit, &trio).unwrap();
        match verdict {
            TrioVerdict::Passed(post) => {
                assert!((post.pp - 1.0).abs() < 0.01, "PP = {}", post.pp);
                assert!(post.p_het >= post.p_hom_alt);
            }
            TrioVerdict::NotPassed(reason) => panic!("unexpected veto: {reason:?}"),
        }
    }

    #[test]
    fn alt_supporting_father_triggers_veto() {
        let fit = clean_background(50);
        let trio = TrioAd::new(
            AlleleDepth::new(50.0, 0.0, 50.0, 0.0),
            AlleleDepth::new(10.0, 40.0, 9.0, 41.0),
            AlleleDepth::new(5.0, 45.0, 4.0, 46.0),
        );
        match evaluate_trio(&fit, &trio).unwrap() {
            TrioVerdict::NotPassed(reason) => {
                assert_eq!(reason, SkipReason::ParentAltEvidence);
            }
            TrioVerdict::Passed(_) => panic!("veto should have fired"),
        }
    }

    #[test]
    fn veto_threshold_is_exclusive() {
        let fit = clean_background(20);
        // exactly 3 parental alt reads: still allowed
        let trio = TrioAd::new(
            AlleleDepth::new(50.0, 1.0, 50.0, 1.0),
            AlleleDepth::new(50.0, 1.0, 50.0, 0.0),
            AlleleDepth::new(25.0, 25.0, 25.0, 25.0),
        );
        assert!(matches!(
            evaluate_trio(&fit, &trio).unwrap(),
            TrioVerdict::Passed(_)
        ));
    }

    #[test]
    fn clean_child_scores_near_zero() {
        let fit = clean_background(50);
        let trio = TrioAd::new(
            AlleleDepth::new(50.0, 0.0, 50.0, 0.0),
            AlleleDepth::new(50.0, 0.0, 50.0, 0.0),
            AlleleDepth::new(50.0, 0.0, 50.0, 0.0),
        );
        match evaluate_trio(&fit, &trio).unwrap() {
            TrioVerdict::Passed(post) => assert!(post.pp < 0.01, "PP = {}", post.pp),
            TrioVerdict::NotPassed(reason) => panic!("unexpected veto: {reason:?}"),
        }
    }

    #[test]
    fn posterior_reports_the_larger_alt_mass() {
        let fit = clean_background(50);
        // heterozygous child: mass should sit on the het cell
        let het_child = TrioAd::new(
            AlleleDepth::new(50.0, 0.0, 50.0, 0.0),
            AlleleDepth::new(50.0, 0.0, 50.0, 0.0),
            AlleleDepth::new(25.0, 25.0, 25.0, 25.0),
        );
        if let TrioVerdict::Passed(post) = evaluate_trio(&fit, &het_child).unwrap() {
            assert!(post.p_het > post.p_hom_alt);
            assert_eq!(post.pp, post.p_het);
        } else {
            panic!("veto should not fire");
        }

        // hom-alt child: mass moves to the hom-alt cell
        let hom_child = TrioAd::new(
            AlleleDepth::new(50.0, 0.0, 50.0, 0.0),
            AlleleDepth::new(50.0, 0.0, 50.0, 0.0),
            AlleleDepth::new(0.0, 50.0, 0.0, 50.0),
        );
        if let TrioVerdict::Passed(post) = evaluate_trio(&fit, &hom_child).unwrap() {
            assert!(post.p_hom_alt > post.p_het);
            assert_eq!(post.pp, post.p_hom_alt);
        } else {
            panic!("veto should not fire");
        }
    }
}
