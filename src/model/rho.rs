//! Per-strand read-fidelity model.
//!
//! `rho` is the modeled probability that a read supports the true underlying
//! allele on one strand. Per genotype (hom-ref, het, hom-alt) and strand the
//! model carries a 2×3 matrix of per-read log-likelihoods, so a sample's
//! genotype log-likelihood is a dot product with its `[ref, alt]` counts.

/// Floor added inside log-domain means so an all-zero mass never produces
/// `ln(0)`.
const LOG_FLOOR: f64 = 1e-100;

/// Genotype likelihood of observing a ref/alt-supporting read:
/// rows hom-ref, het, hom-alt; columns `[ref, alt]`.
fn gt_likelihood_l() -> [[f64; 2]; 3] {
    [
        [1.0f64.ln(), LOG_FLOOR.ln()],
        [0.5f64.ln(), 0.5f64.ln()],
        [LOG_FLOOR.ln(), 1.0f64.ln()],
    ]
}

/// `ln(mean(exp(v)) + floor)` over a fixed pair.
fn log_mean2(v: [f64; 2]) -> f64 {
    ((v[0].exp() + v[1].exp()) / 2.0 + LOG_FLOOR).ln()
}

/// Normalizes a log-domain 3-vector; returns the probabilities and the
/// log of the normalization mass (`max + ln(sum)`).
pub(crate) fn norm_log3(v: [f64; 3]) -> ([f64; 3], f64) {
    let max = v[0].max(v[1]).max(v[2]);
    let exp = [(v[0] - max).exp(), (v[1] - max).exp(), (v[2] - max).exp()];
    let sum = exp[0] + exp[1] + exp[2];
    ([exp[0] / sum, exp[1] / sum, exp[2] / sum], max + sum.ln())
}

/// Per-strand read-fidelity estimates with their derived genotype
/// log-likelihood matrices. Immutable once built; constructed only from panel
/// counts ([`RhoModel::from_counts`]) or by the approximate-cache reader
/// ([`RhoModel::new`]).
#[derive(Clone, Debug)]
pub struct RhoModel {
    rho_f: f64,
    rho_r: f64,
    /// `mm2[strand-allele][genotype]` log-likelihood per observed read
    mm2_f: [[f64; 3]; 2],
    mm2_r: [[f64; 3]; 2],
}

impl RhoModel {
    #[must_use]
    pub fn new(rho_f: f64, rho_r: f64) -> Self {
        Self {
            rho_f,
            rho_r,
            mm2_f: make_mm2(rho_f),
            mm2_r: make_mm2(rho_r),
        }
    }

    /// Estimates rho per strand from panel counts with add-one smoothing:
    /// `(Σref + 1) / (Σref + Σalt + 2)`.
    #[must_use]
    pub fn from_counts(adfs: &[[f64; 2]], adrs: &[[f64; 2]]) -> Self {
        Self::new(eval_rho(adfs), eval_rho(adrs))
    }

    #[must_use]
    pub fn rho_pair(&self) -> (f64, f64) {
        (self.rho_f, self.rho_r)
    }

    /// Un-normalized genotype log-likelihood of one sample's strand counts.
    #[must_use]
    pub fn site_log_lik(&self, adf: [f64; 2], adr: [f64; 2]) -> [f64; 3] {
        let mut out = [0.0; 3];
        for (j, slot) in out.iter_mut().enumerate() {
            *slot = adf[0] * self.mm2_f[0][j]
                + adf[1] * self.mm2_f[1][j]
                + adr[0] * self.mm2_r[0][j]
                + adr[1] * self.mm2_r[1][j];
        }
        out
    }

    /// Genotype log-likelihood shifted so its maximum is zero.
    #[must_use]
    pub fn gtl(&self, adf: [f64; 2], adr: [f64; 2]) -> [f64; 3] {
        let raw = self.site_log_lik(adf, adr);
        let max = raw[0].max(raw[1]).max(raw[2]);
        [raw[0] - max, raw[1] - max, raw[2] - max]
    }

    /// `ln(rho) + ln(1-rho)` terms of both strands, the rho contribution to the
    /// EM joint log-probability.
    #[must_use]
    pub(crate) fn log_joint_term(&self) -> f64 {
        self.rho_f.ln() + (1.0 - self.rho_f).ln() + self.rho_r.ln() + (1.0 - self.rho_r).ln()
    }
}

/// `mm2[i][j] = log_mean(mm1[i] + gtl[j])` where `mm1` pairs `ln(rho)` with
/// `ln(1-rho)` for ref- and alt-supporting reads.
pub(crate) fn make_mm2(rho: f64) -> [[f64; 3]; 2] {
    let main = rho.ln();
    let side = (1.0 - rho).ln();
    let mm1 = [[main, side], [side, main]];
    let gtl = gt_likelihood_l();
    let mut mm2 = [[0.0; 3]; 2];
    for i in 0..2 {
        for j in 0..3 {
            mm2[i][j] = log_mean2([mm1[i][0] + gtl[j][0], mm1[i][1] + gtl[j][1]]);
        }
    }
    mm2
}

/// Add-one smoothed fraction of reference-supporting reads on one strand.
pub(crate) fn eval_rho(ads: &[[f64; 2]]) -> f64 {
    let mut tt = [1.0, 1.0];
    for ad in ads {
        tt[0] += ad[0];
        tt[1] += ad[1];
    }
    tt[0] / (tt[0] + tt[1])
}
