//! The strand-bias / genotype-prior background model and the trio posterior.
//!
//! [`RhoModel`] carries the per-strand read-fidelity estimates and their derived
//! genotype log-likelihood matrices. [`em`] fits the genotype prior from a
//! background panel (two strategies, see [`FitStrategy`]). [`trio`] turns a
//! fitted background model plus a trio's own counts into a de novo posterior.
//! [`approx`] quantizes pre-computed fits into a `.mdl` cache, and
//! [`provider`] abstracts over "fit live" vs "look up cached".

pub mod approx;
pub mod em;
pub mod provider;
pub mod rho;
pub mod trio;

pub use approx::{ApproxModelReader, ApproxModelWriter, ApproxRecord};
pub use em::FitStrategy;
pub use provider::{CachedApproxProvider, LiveEmProvider, PositionModelProvider};
pub use rho::RhoModel;
pub use trio::TrioAd;

/// A site whose background panel implies an alternate-allele frequency at or
/// above this bound is too common to be a credible de novo candidate.
pub const BACKGROUND_AF_LIMIT: f64 = 0.01;
