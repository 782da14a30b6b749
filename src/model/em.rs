//! EM fits of the genotype prior (and optionally rho) from a background panel.
//!
//! Two strategies coexist deliberately: [`FitStrategy::PriorOnly`] estimates
//! rho once from raw counts and iterates only the prior — this is the variant
//! the detector and the approximate cache are built on. [`FitStrategy::JointRho`]
//! additionally refines rho per iteration from per-observation allele
//! marginals. Downstream consumers select one at construction time.

use log::warn;

use crate::error::{ModelError, Result};
use crate::model::rho::{make_mm2, norm_log3, RhoModel};

/// Convergence needs at least this many EM iterations.
pub const EM_MIN_ITERATIONS: usize = 3;
/// Absolute joint log-probability change that counts as converged.
pub const EM_TOLERANCE: f64 = 1e-7;
/// Safety bound on EM iterations; hitting it logs a warning and keeps the
/// current state instead of spinning on pathological input.
pub const EM_MAX_ITERATIONS: usize = 1000;

/// Pseudo-observation weight of the Hardy-Weinberg prior seed.
const HWE_WEIGHT: f64 = 1000.0;

/// Which EM variant fits the background model.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FitStrategy {
    /// Rho from raw counts, EM over the prior only
    #[default]
    PriorOnly,
    /// Full EM refining rho and prior together
    JointRho,
}

/// Result of an EM fit.
#[derive(Clone, Debug)]
pub struct EmFit {
    pub model: RhoModel,
    /// Genotype prior, log domain
    pub prior_l: [f64; 3],
    pub iterations: usize,
}

/// The uniform log prior used to seed every fit.
#[must_use]
pub fn uniform_prior_l() -> [f64; 3] {
    let third = (1.0f64 / 3.0).ln();
    [third; 3]
}

/// Hardy-Weinberg genotype expectation at `af`, scaled to pseudo-observations
/// with a one-count floor per category. Unknown (negative) frequencies clamp
/// to zero.
fn hwe_pseudocounts(allele_freq: f64) -> [f64; 3] {
    let af = allele_freq.max(0.0);
    let f0 = (1.0 - af) * (1.0 - af);
    let f2 = af * af;
    [
        f0 * HWE_WEIGHT + 1.0,
        (1.0 - f0 - f2) * HWE_WEIGHT + 1.0,
        f2 * HWE_WEIGHT + 1.0,
    ]
}

/// One prior-only EM step: refreshed log prior and the joint log-probability
/// of the current state.
fn em_step_prior(
    model: &RhoModel,
    adfs: &[[f64; 2]],
    adrs: &[[f64; 2]],
    prior_l: &[f64; 3],
    allele_freq: f64,
) -> ([f64; 3], f64) {
    let mut t_prior = hwe_pseudocounts(allele_freq);
    let mut joint = model.log_joint_term();
    for j in 0..3 {
        joint += t_prior[j] * prior_l[j];
    }

    for (adf, adr) in adfs.iter().zip(adrs) {
        let lik = model.site_log_lik(*adf, *adr);
        let marg_l = [
            prior_l[0] + lik[0],
            prior_l[1] + lik[1],
            prior_l[2] + lik[2],
        ];
        let (marg, logsum) = norm_log3(marg_l);
        for j in 0..3 {
            t_prior[j] += marg[j];
        }
        joint += logsum;
    }

    let total: f64 = t_prior.iter().sum();
    (
        [
            (t_prior[0] / total).ln(),
            (t_prior[1] / total).ln(),
            (t_prior[2] / total).ln(),
        ],
        joint,
    )
}

/// Fits the genotype prior with rho held fixed. Runs to joint log-probability
/// convergence; at least [`EM_MIN_ITERATIONS`], at most [`EM_MAX_ITERATIONS`].
pub fn fit_prior(
    model: &RhoModel,
    adfs: &[[f64; 2]],
    adrs: &[[f64; 2]],
    allele_freq: f64,
    start_prior_l: [f64; 3],
) -> Result<([f64; 3], usize)> {
    let mut prior_l = start_prior_l;
    let mut prev_joint = f64::NAN;
    for iteration in 1..=EM_MAX_ITERATIONS {
        let (next, joint) = em_step_prior(model, adfs, adrs, &prior_l, allele_freq);
        if !joint.is_finite() {
            return Err(ModelError::NumericalInstability("EM joint log-probability").into());
        }
        prior_l = next;
        if iteration >= EM_MIN_ITERATIONS && (joint - prev_joint).abs() <= EM_TOLERANCE {
            return Ok((prior_l, iteration));
        }
        prev_joint = joint;
    }
    warn!("EM did not converge within {EM_MAX_ITERATIONS} iterations");
    Ok((prior_l, EM_MAX_ITERATIONS))
}

/// `mm4[i][j] = log_mean_k(gtl_t[i][k] + gt_marg_l[k] - mm2[j][k])`: the
/// per-allele marginal used by the joint fit to reassign read mass to alleles.
fn make_mm4(gt_marg_l: [f64; 3], mm2: &[[f64; 3]; 2]) -> [[f64; 2]; 2] {
    // transpose of the genotype likelihood table: allele rows, genotype columns
    let gtl_t = [
        [1.0f64.ln(), 0.5f64.ln(), 1e-100f64.ln()],
        [1e-100f64.ln(), 0.5f64.ln(), 1.0f64.ln()],
    ];
    let mut mm4 = [[0.0; 2]; 2];
    for i in 0..2 {
        for j in 0..2 {
            let mut mean = 0.0;
            for k in 0..3 {
                mean += (gtl_t[i][k] + gt_marg_l[k] - mm2[j][k]).exp();
            }
            mm4[i][j] = (mean / 3.0 + 1e-100).ln();
        }
    }
    mm4
}

/// Splits one strand's reads into allele-concordant and discordant mass using
/// the softmax of the combined allele marginal.
fn rho_mass_terms(mm1: &[[f64; 2]; 2], mm4: &[[f64; 2]; 2], ad: [f64; 2]) -> (f64, f64) {
    // column k of (mm1 + mm4) is the log marginal of read class k
    let mut t1 = 0.0;
    let mut t2 = 0.0;
    for k in 0..2 {
        let col = [mm1[0][k] + mm4[0][k], mm1[1][k] + mm4[1][k]];
        let max = col[0].max(col[1]);
        let exp = [(col[0] - max).exp(), (col[1] - max).exp()];
        let own = exp[k] / (exp[0] + exp[1]);
        t1 += own * ad[k];
        t2 += (1.0 - own) * ad[k];
    }
    (t1, t2)
}

/// One joint EM step refining rho and prior together.
#[allow(clippy::similar_names)]
fn em_step_joint(
    adfs: &[[f64; 2]],
    adrs: &[[f64; 2]],
    rho_f: f64,
    rho_r: f64,
    prior_l: &[f64; 3],
    allele_freq: f64,
) -> (f64, f64, [f64; 3], f64) {
    let mut t_prior = hwe_pseudocounts(allele_freq);
    let mut joint =
        rho_f.ln() + (1.0 - rho_f).ln() + rho_r.ln() + (1.0 - rho_r).ln();
    for j in 0..3 {
        joint += t_prior[j] * prior_l[j];
    }

    let mm1_f = [[rho_f.ln(), (1.0 - rho_f).ln()], [(1.0 - rho_f).ln(), rho_f.ln()]];
    let mm1_r = [[rho_r.ln(), (1.0 - rho_r).ln()], [(1.0 - rho_r).ln(), rho_r.ln()]];
    let mm2_f = make_mm2(rho_f);
    let mm2_r = make_mm2(rho_r);

    let (mut t1_f, mut t2_f, mut t1_r, mut t2_r) = (1.0, 1.0, 1.0, 1.0);
    for (adf, adr) in adfs.iter().zip(adrs) {
        let mut marg_l = [0.0; 3];
        for (j, slot) in marg_l.iter_mut().enumerate() {
            *slot = prior_l[j]
                + adf[0] * mm2_f[0][j]
                + adf[1] * mm2_f[1][j]
                + adr[0] * mm2_r[0][j]
                + adr[1] * mm2_r[1][j];
        }
        let mm4_f = make_mm4(marg_l, &mm2_f);
        let mm4_r = make_mm4(marg_l, &mm2_r);

        let (marg, logsum) = norm_log3(marg_l);
        for j in 0..3 {
            t_prior[j] += marg[j];
        }
        joint += logsum;

        let (a1, a2) = rho_mass_terms(&mm1_f, &mm4_f, *adf);
        t1_f += a1;
        t2_f += a2;
        let (b1, b2) = rho_mass_terms(&mm1_r, &mm4_r, *adr);
        t1_r += b1;
        t2_r += b2;
    }

    let rho_f_new = t1_f / (t1_f + t2_f);
    let rho_r_new = t1_r / (t1_r + t2_r);
    let total: f64 = t_prior.iter().sum();
    let prior_l_new = [
        (t_prior[0] / total).ln(),
        (t_prior[1] / total).ln(),
        (t_prior[2] / total).ln(),
    ];
    (rho_f_new, rho_r_new, prior_l_new, joint)
}

/// Fits rho and prior jointly (the historical full-EM variant).
pub fn fit_joint(adfs: &[[f64; 2]], adrs: &[[f64; 2]], allele_freq: f64) -> Result<EmFit> {
    let mut rho_f = 0.8;
    let mut rho_r = 0.8;
    let mut prior_l = uniform_prior_l();
    let mut prev_joint = f64::NAN;
    let mut iterations = EM_MAX_ITERATIONS;
    for iteration in 1..=EM_MAX_ITERATIONS {
        let (rf, rr, next, joint) =
            em_step_joint(adfs, adrs, rho_f, rho_r, &prior_l, allele_freq);
        if !joint.is_finite() {
            return Err(ModelError::NumericalInstability("EM joint log-probability").into());
        }
        rho_f = rf;
        rho_r = rr;
        prior_l = next;
        if iteration >= EM_MIN_ITERATIONS && (joint - prev_joint).abs() <= EM_TOLERANCE {
            iterations = iteration;
            break;
        }
        prev_joint = joint;
        if iteration == EM_MAX_ITERATIONS {
            warn!("joint EM did not converge within {EM_MAX_ITERATIONS} iterations");
        }
    }
    Ok(EmFit {
        model: RhoModel::new(rho_f, rho_r),
        prior_l,
        iterations,
    })
}

/// Posterior-weighted alternate-allele frequency of the panel under a fitted
/// model: `(Σ p_het + 2 p_hom_alt) / 2N`.
#[must_use]
pub fn af_unrel(
    model: &RhoModel,
    prior_l: &[f64; 3],
    adfs: &[[f64; 2]],
    adrs: &[[f64; 2]],
) -> f64 {
    let mut af = 0.0;
    for (adf, adr) in adfs.iter().zip(adrs) {
        let gtl = model.gtl(*adf, *adr);
        let (probs, _) = norm_log3([
            prior_l[0] + gtl[0],
            prior_l[1] + gtl[1],
            prior_l[2] + gtl[2],
        ]);
        af += probs[1] + 2.0 * probs[2];
    }
    af / (2.0 * adfs.len() as f64)
}
