//! Numeric chromosome identifiers.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, FormatError};

/// A chromosome encoded as a small integer: 0 = mitochondrial, 1–22 autosomes,
/// 23 = X, 24 = Y. This is the id stored in every index table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Chromosome(u8);

impl Chromosome {
    pub const MT: Self = Self(0);
    pub const X: Self = Self(23);
    pub const Y: Self = Self(24);

    /// Builds a chromosome from its numeric id, rejecting ids above 24.
    pub fn new(id: u8) -> crate::Result<Self> {
        if id > 24 {
            return Err(Error::FormatError(FormatError::InconsistentHeader(
                format!("chromosome id out of range: {id}"),
            )));
        }
        Ok(Self(id))
    }

    /// The numeric id as stored on disk.
    #[must_use]
    pub fn id(self) -> u32 {
        u32::from(self.0)
    }

    /// Short name without the `chr` prefix (`MT`, `1`..`22`, `X`, `Y`).
    #[must_use]
    pub fn short_name(self) -> String {
        match self.0 {
            0 => "MT".to_string(),
            23 => "X".to_string(),
            24 => "Y".to_string(),
            n => n.to_string(),
        }
    }
}

impl FromStr for Chromosome {
    type Err = Error;

    /// Parses `chr`-prefixed and bare names, digits and M/MT/X/Y aliases.
    fn from_str(name: &str) -> crate::Result<Self> {
        let bare = name.strip_prefix("chr").unwrap_or(name);
        let id = match bare {
            "M" | "MT" | "m" | "mt" => 0,
            "X" | "x" => 23,
            "Y" | "y" => 24,
            digits => digits
                .parse::<u8>()
                .ok()
                .filter(|n| (1..=22).contains(n))
                .ok_or_else(|| {
                    Error::FormatError(FormatError::InconsistentHeader(format!(
                        "bad chromosome name: {name}"
                    )))
                })?,
        };
        Ok(Self(id))
    }
}

impl fmt::Display for Chromosome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chr{}", self.short_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_aliases() {
        assert_eq!("chrM".parse::<Chromosome>().unwrap(), Chromosome::MT);
        assert_eq!("MT".parse::<Chromosome>().unwrap(), Chromosome::MT);
        assert_eq!("chrX".parse::<Chromosome>().unwrap(), Chromosome::X);
        assert_eq!("y".parse::<Chromosome>().unwrap(), Chromosome::Y);
        assert_eq!("chr7".parse::<Chromosome>().unwrap().id(), 7);
        assert_eq!("22".parse::<Chromosome>().unwrap().id(), 22);
    }

    #[test]
    fn parse_rejects_bad_names() {
        assert!("chr25".parse::<Chromosome>().is_err());
        assert!("0".parse::<Chromosome>().is_err());
        assert!("banana".parse::<Chromosome>().is_err());
    }

    #[test]
    fn display_round_trip() {
        for id in 0..=24u8 {
            let chrom = Chromosome::new(id).unwrap();
            let parsed: Chromosome = chrom.to_string().parse().unwrap();
            assert_eq!(parsed, chrom);
        }
    }

    #[test]
    fn id_range_enforced() {
        assert!(Chromosome::new(24).is_ok());
        assert!(Chromosome::new(25).is_err());
    }
}
