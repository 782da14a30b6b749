//! Quantized per-position model cache.
//!
//! The EM fit is pre-computed at two allele-frequency anchors (0 and 0.05) and
//! persisted as eight quantized u16 values per position through the generic
//! `.mdl` codec. At lookup time the fit for the query's actual allele frequency
//! is reconstructed by linear interpolation — O(1) instead of re-running the EM
//! over the panel.

use std::path::Path;

use log::debug;

use crate::error::Result;
use crate::mdl::{MdlReader, MdlWriter, DEFAULT_BLOCK_RECORDS};
use crate::model::em::{af_unrel, fit_prior, uniform_prior_l};
use crate::model::rho::{norm_log3, RhoModel};
use crate::model::BACKGROUND_AF_LIMIT;
use crate::store::LibraryCollection;
use crate::variant::{BackgroundFit, CandidateSite};

/// ASCII prefix of the de novo approximate-model cache.
pub const APPROX_MDL_PREFIX: &str = "AD/MDL.v1.0";

/// Quantization scale: probability 1.0 maps to this value.
pub const QUANT_SCALE: u16 = 50_000;

/// Upper allele-frequency anchor; queries above it are rejected.
pub const AF_ANCHOR_HIGH: f64 = 0.05;

/// One cached record: `[rho_f, rho_r, p0@0, p2@0, afu@0, p0@.05, p2@.05,
/// afu@.05]`, quantized.
pub type ApproxRecord = [u16; 8];

/// Maps a probability into `[0, QUANT_SCALE]`, clamping outside-range inputs.
#[must_use]
pub fn quantize(p: f64) -> u16 {
    let scaled = (p * f64::from(QUANT_SCALE)) as i64;
    scaled.clamp(0, i64::from(QUANT_SCALE)) as u16
}

/// Inverse of [`quantize`]; always lands in `[0, 1]`.
#[must_use]
pub fn dequantize(q: u16) -> f64 {
    (f64::from(q) / f64::from(QUANT_SCALE)).clamp(0.0, 1.0)
}

/// Runs the EM fit at both anchors and quantizes the result. Panels with no
/// observations, or only zero depths, produce the all-zero sentinel record.
pub fn make_approx_model(adfs: &[[f64; 2]], adrs: &[[f64; 2]]) -> Result<ApproxRecord> {
    let max_count = adfs
        .iter()
        .chain(adrs)
        .flatten()
        .fold(0.0f64, |a, &b| a.max(b));
    if adfs.is_empty() || max_count == 0.0 {
        return Ok([0; 8]);
    }

    let model = RhoModel::from_counts(adfs, adrs);
    let (rho_f, rho_r) = model.rho_pair();
    let mut record = [0u16; 8];
    record[0] = quantize(rho_f);
    record[1] = quantize(rho_r);
    for (slot, af) in [(2usize, 0.0), (5, AF_ANCHOR_HIGH)] {
        let (prior_l, _) = fit_prior(&model, adfs, adrs, af, uniform_prior_l())?;
        let (prior, _) = norm_log3(prior_l);
        record[slot] = quantize(prior[0]);
        record[slot + 1] = quantize(prior[2]);
        record[slot + 2] = quantize(af_unrel(&model, &prior_l, adfs, adrs));
    }
    Ok(record)
}

/// Reconstructs a background fit from a cached record by interpolating between
/// the anchors at the site's allele frequency.
///
/// Returns `None` — a graceful rejection, not an error — for the all-zero
/// no-data sentinel, for allele frequencies above the upper anchor, and for
/// interpolated background frequencies at or above the common-variant bound.
#[must_use]
pub fn from_approx_record(record: &ApproxRecord, allele_freq: f64) -> Option<BackgroundFit> {
    if record.iter().all(|&v| v == 0) {
        return None;
    }
    let af = allele_freq.max(0.0);
    if af > AF_ANCHOR_HIGH {
        debug!("rejected by allele frequency: {af:.5}");
        return None;
    }

    let q1 = af / AF_ANCHOR_HIGH;
    let q0 = 1.0 - q1;
    let v: Vec<f64> = record.iter().copied().map(dequantize).collect();
    let (rho_f, rho_r) = (v[0], v[1]);
    let (p0_0, p2_0, afu_0, p0_1, p2_1, afu_1) = (v[2], v[3], v[4], v[5], v[6], v[7]);

    let afu = q0 * afu_0 + q1 * afu_1;
    if afu >= BACKGROUND_AF_LIMIT {
        debug!("rejected by background allele frequency: {afu:.5}");
        return None;
    }

    let p0 = q0 * p0_0 + q1 * p0_1;
    let p2 = q0 * p2_0 + q1 * p2_1;
    // quantization error can push p0 + p2 marginally above 1
    let p1 = (1.0 - p0 - p2).max(1e-10);
    Some(BackgroundFit {
        model: RhoModel::new(rho_f, rho_r),
        prior_l: [p0.ln(), p1.ln(), p2.ln()],
        af_unrel: afu,
    })
}

/// Writer of the de novo `.mdl` cache.
pub struct ApproxModelWriter {
    inner: MdlWriter<u16>,
}

impl ApproxModelWriter {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self {
            inner: MdlWriter::create(path, APPROX_MDL_PREFIX, 8, DEFAULT_BLOCK_RECORDS)?,
        })
    }

    pub fn add_record(&mut self, chrom: u32, pos: u64, record: &ApproxRecord) -> Result<()> {
        self.inner.add_record(chrom, pos, record)
    }

    pub fn finish(self) -> Result<()> {
        self.inner.finish()
    }
}

/// Reader of the de novo `.mdl` cache.
pub struct ApproxModelReader {
    inner: MdlReader<u16>,
}

impl ApproxModelReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self {
            inner: MdlReader::open(path, APPROX_MDL_PREFIX, 8)?,
        })
    }

    /// The raw cached record at `(chrom, pos)`.
    pub fn record(&mut self, chrom: u32, pos: u64) -> Result<Option<ApproxRecord>> {
        Ok(self.inner.record(chrom, pos)?.map(|rec| {
            let mut out = [0u16; 8];
            out.copy_from_slice(rec);
            out
        }))
    }

    /// Interpolated background fit for a candidate site; `None` on cache miss
    /// or graceful rejection.
    pub fn fit_for(&mut self, site: &CandidateSite) -> Result<Option<BackgroundFit>> {
        match self.record(site.chrom.id(), site.pos)? {
            Some(record) => Ok(from_approx_record(&record, site.allele_freq)),
            None => Ok(None),
        }
    }
}

/// Sweeps a library collection and pre-computes the approximate model for
/// every covered position. Returns the number of records written.
pub fn build_approx_cache<P: AsRef<Path>>(
    collection: &mut LibraryCollection,
    path: P,
) -> Result<u64> {
    let mut writer = ApproxModelWriter::create(path)?;
    let mut written = 0u64;
    while let Some((chrom, start, end)) = collection.next_portions()? {
        for pos in start..end {
            let record = match collection.mine_ad(chrom, pos)? {
                Some((adfs, adrs)) => make_approx_model(&adfs, &adrs)?,
                None => [0; 8],
            };
            writer.add_record(chrom, pos, &record)?;
            written += 1;
        }
    }
    writer.finish()?;
    Ok(written)
}
