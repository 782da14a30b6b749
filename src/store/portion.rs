//! Portion codec: a contiguous run of allele-depth counts for one chromosome,
//! serialized as one or more dedup-compressed chunks.
//!
//! Each chunk stores, per position, a `u16` code point into a table of distinct
//! allele-depth 4-tuples. Code point 0 means "all-zero depth" and is never stored
//! in the table. A chunk holds at most [`CHUNK_TABLE_LIMIT`] distinct code points;
//! an encoding run that would exceed the bound is split into a `#Blk-0` chunk
//! followed by the remainder, so the bound is a wire invariant, not an error the
//! caller ever sees.

use std::collections::HashMap;
use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::ad::AlleleDepth;
use crate::error::{FormatError, Result};
use crate::{CHUNK_MAGIC_LAST, CHUNK_MAGIC_PRE, CHUNK_TABLE_LIMIT};

/// One physical chunk of a [`Portion`].
#[derive(Clone, Debug, PartialEq)]
pub struct Chunk {
    chrom: u32,
    shift: u64,
    /// Per-position code points; 0 = all-zero depth, `k >= 1` = `table[k - 1]`
    pos_index: Vec<u16>,
    /// Distinct non-zero allele-depth tuples, wire order
    table: Vec<[u16; 4]>,
}

impl Chunk {
    #[must_use]
    pub fn chrom(&self) -> u32 {
        self.chrom
    }

    #[must_use]
    pub fn shift(&self) -> u64 {
        self.shift
    }

    /// Number of positions covered by this chunk.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.pos_index.len() as u64
    }

    #[must_use]
    pub fn contains(&self, pos: u64) -> bool {
        self.shift <= pos && pos < self.shift + self.size()
    }

    /// O(1) lookup of the depth at `pos`; the caller must have checked
    /// [`Chunk::contains`].
    #[must_use]
    pub fn ad_at(&self, pos: u64) -> AlleleDepth {
        let code = self.pos_index[(pos - self.shift) as usize];
        if code == 0 {
            AlleleDepth::zero()
        } else {
            AlleleDepth::from_wire(self.table[usize::from(code) - 1])
        }
    }

    fn read_body<R: Read>(reader: &mut R) -> Result<Self> {
        let chrom = reader.read_u32::<LittleEndian>()?;
        let shift = reader.read_u32::<LittleEndian>()?;
        let size = reader.read_u32::<LittleEndian>()? as usize;
        let table_len = reader.read_u32::<LittleEndian>()? as usize;
        if table_len == 0 || table_len > CHUNK_TABLE_LIMIT {
            return Err(FormatError::InconsistentHeader(format!(
                "chunk dedup table length {table_len} outside [1, {CHUNK_TABLE_LIMIT}]"
            ))
            .into());
        }

        let pos_index = read_u16s(reader, size)?;
        let flat = read_u16s(reader, (table_len - 1) * 4)?;
        let table = flat.chunks_exact(4).map(|t| [t[0], t[1], t[2], t[3]]).collect();

        Ok(Self {
            chrom,
            shift: u64::from(shift),
            pos_index,
            table,
        })
    }

    fn write_body<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32::<LittleEndian>(self.chrom)?;
        writer.write_u32::<LittleEndian>(self.shift as u32)?;
        writer.write_u32::<LittleEndian>(self.pos_index.len() as u32)?;
        writer.write_u32::<LittleEndian>(self.table.len() as u32 + 1)?;
        writer.write_all(bytemuck::cast_slice(&self.pos_index))?;
        writer.write_all(bytemuck::cast_slice(&self.table))?;
        Ok(())
    }
}

/// A contiguous run of per-position allele depths for one chromosome. A portion
/// with more than one chunk is "complex": its dedup table overflowed during
/// encoding and was split.
#[derive(Clone, Debug, PartialEq)]
pub struct Portion {
    chunks: Vec<Chunk>,
}

impl Portion {
    /// Encodes a run of wire-form counts starting at `shift`, splitting into
    /// multiple chunks whenever the dedup table would exceed the bound.
    #[must_use]
    pub fn encode(chrom: u32, shift: u64, counts: &[[u16; 4]]) -> Self {
        let mut chunks = Vec::new();
        let mut chunk_shift = shift;
        let mut pos_index: Vec<u16> = Vec::new();
        let mut table: Vec<[u16; 4]> = Vec::new();
        let mut codes: HashMap<[u16; 4], u16> = HashMap::new();
        codes.insert([0; 4], 0);

        for &tuple in counts {
            if !codes.contains_key(&tuple) {
                if codes.len() >= CHUNK_TABLE_LIMIT {
                    let flushed = pos_index.len() as u64;
                    chunks.push(Chunk {
                        chrom,
                        shift: chunk_shift,
                        pos_index: std::mem::take(&mut pos_index),
                        table: std::mem::take(&mut table),
                    });
                    chunk_shift += flushed;
                    codes.clear();
                    codes.insert([0; 4], 0);
                }
                let code = codes.len() as u16;
                codes.insert(tuple, code);
                table.push(tuple);
            }
            pos_index.push(codes[&tuple]);
        }

        chunks.push(Chunk {
            chrom,
            shift: chunk_shift,
            pos_index,
            table,
        });
        Self { chunks }
    }

    /// Encodes a run of [`AlleleDepth`] values (counts clamped to `u16`).
    #[must_use]
    pub fn from_depths(chrom: u32, shift: u64, depths: &[AlleleDepth]) -> Self {
        let wire: Vec<[u16; 4]> = depths.iter().map(AlleleDepth::to_wire).collect();
        Self::encode(chrom, shift, &wire)
    }

    /// Parses one portion: zero or more `#Blk-0` chunks followed by the final
    /// `#Block` chunk.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut chunks: Vec<Chunk> = Vec::new();
        loop {
            let mut prefix = [0u8; CHUNK_MAGIC_LAST.len()];
            read_fully(reader, &mut prefix)?;
            let last = if prefix == *CHUNK_MAGIC_PRE {
                false
            } else if prefix == *CHUNK_MAGIC_LAST {
                true
            } else {
                return Err(FormatError::InvalidChunkPrefix(prefix.to_vec()).into());
            };
            let chunk = Chunk::read_body(reader)?;
            if let Some(prev) = chunks.last() {
                if chunk.chrom != prev.chrom || chunk.shift != prev.shift + prev.size() {
                    return Err(FormatError::InconsistentHeader(
                        "portion chunks are not contiguous".to_string(),
                    )
                    .into());
                }
            }
            chunks.push(chunk);
            if last {
                break;
            }
        }
        Ok(Self { chunks })
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        for (idx, chunk) in self.chunks.iter().enumerate() {
            let prefix = if idx + 1 == self.chunks.len() {
                CHUNK_MAGIC_LAST
            } else {
                CHUNK_MAGIC_PRE
            };
            writer.write_all(prefix)?;
            chunk.write_body(writer)?;
        }
        Ok(())
    }

    #[must_use]
    pub fn chrom(&self) -> u32 {
        self.chunks[0].chrom
    }

    #[must_use]
    pub fn shift(&self) -> u64 {
        self.chunks[0].shift
    }

    /// Number of positions covered across all chunks.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.chunks.iter().map(Chunk::size).sum()
    }

    /// Covered range as `(chrom, start, end)` with `end` exclusive.
    #[must_use]
    pub fn info(&self) -> (u32, u64, u64) {
        (self.chrom(), self.shift(), self.shift() + self.size())
    }

    #[must_use]
    pub fn is_complex(&self) -> bool {
        self.chunks.len() > 1
    }

    #[must_use]
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    #[must_use]
    pub fn contains(&self, chrom: u32, pos: u64) -> bool {
        self.chrom() == chrom && self.chunks.iter().any(|c| c.contains(pos))
    }

    /// Depth at `pos`, or `None` when the position falls outside this portion.
    #[must_use]
    pub fn ad_at(&self, pos: u64) -> Option<AlleleDepth> {
        self.chunks
            .iter()
            .find(|c| c.contains(pos))
            .map(|c| c.ad_at(pos))
    }
}

/// Reads `n` little-endian u16 values.
fn read_u16s<R: Read>(reader: &mut R, n: usize) -> Result<Vec<u16>> {
    let mut buf = vec![0u8; n * 2];
    read_fully(reader, &mut buf)?;
    Ok(bytemuck::pod_collect_to_vec(&buf))
}

/// `read_exact` with EOF reported as a format-level truncation.
fn read_fully<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            FormatError::Truncated(format!("expected {} more bytes", buf.len())).into()
        } else {
            crate::Error::IoError(e)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn round_trip(portion: &Portion) -> Portion {
        let mut buf = Vec::new();
        portion.write_to(&mut buf).unwrap();
        Portion::read_from(&mut Cursor::new(buf)).unwrap()
    }

    #[test]
    fn encode_decode_simple() {
        let counts = vec![[10, 0, 12, 1], [0, 0, 0, 0], [10, 0, 12, 1], [3, 3, 3, 3]];
        let portion = Portion::encode(7, 1000, &counts);
        assert!(!portion.is_complex());
        assert_eq!(portion.info(), (7, 1000, 1004));

        let back = round_trip(&portion);
        assert_eq!(back, portion);
        assert_eq!(back.ad_at(1000), Some(AlleleDepth::new(10.0, 0.0, 12.0, 1.0)));
        assert_eq!(back.ad_at(1001), Some(AlleleDepth::zero()));
        assert_eq!(back.ad_at(1003), Some(AlleleDepth::new(3.0, 3.0, 3.0, 3.0)));
        assert_eq!(back.ad_at(999), None);
        assert_eq!(back.ad_at(1004), None);
    }

    #[test]
    fn zero_depth_not_in_table() {
        let counts = vec![[0, 0, 0, 0]; 5];
        let portion = Portion::encode(1, 1, &counts);
        assert_eq!(portion.chunks()[0].table.len(), 0);
        assert_eq!(round_trip(&portion).ad_at(3), Some(AlleleDepth::zero()));
    }

    #[test]
    fn dedup_overflow_splits_chunks() {
        // every position distinct: forces a split at the table bound
        let n = CHUNK_TABLE_LIMIT + 500;
        let counts: Vec<[u16; 4]> = (0..n)
            .map(|i| {
                let lo = (i & 0xffff) as u16;
                let hi = (i >> 16) as u16;
                [lo, hi, 1, 0]
            })
            .collect();
        let portion = Portion::encode(2, 100, &counts);
        assert!(portion.is_complex());
        assert_eq!(portion.size(), n as u64);
        for chunk in portion.chunks() {
            assert!(chunk.table.len() + 1 <= CHUNK_TABLE_LIMIT);
        }

        let back = round_trip(&portion);
        for (i, &tuple) in counts.iter().enumerate().step_by(997) {
            let pos = 100 + i as u64;
            assert_eq!(back.ad_at(pos), Some(AlleleDepth::from_wire(tuple)), "pos {pos}");
        }
        // positions on both sides of the chunk boundary
        let boundary = 100 + portion.chunks()[0].size();
        assert_eq!(back.ad_at(boundary - 1), portion.ad_at(boundary - 1));
        assert_eq!(back.ad_at(boundary), portion.ad_at(boundary));
    }

    #[test]
    fn random_portions_round_trip() {
        use rand::{rngs::SmallRng, Rng, SeedableRng};
        let mut rng = SmallRng::seed_from_u64(0x5eed);
        for _ in 0..10 {
            let n = rng.random_range(1..400usize);
            let counts: Vec<[u16; 4]> = (0..n)
                .map(|_| {
                    if rng.random_bool(0.3) {
                        [0; 4]
                    } else {
                        [
                            rng.random_range(0..80),
                            rng.random_range(0..4),
                            rng.random_range(0..80),
                            rng.random_range(0..4),
                        ]
                    }
                })
                .collect();
            let chrom = rng.random_range(0..25u32);
            let shift = rng.random_range(1..1_000_000u64);
            let back = round_trip(&Portion::encode(chrom, shift, &counts));
            for (i, &tuple) in counts.iter().enumerate() {
                assert_eq!(
                    back.ad_at(shift + i as u64),
                    Some(AlleleDepth::from_wire(tuple))
                );
            }
        }
    }

    #[test]
    fn bad_prefix_rejected() {
        let err = Portion::read_from(&mut Cursor::new(b"#Nope!\n\0\0\0\0".to_vec()));
        assert!(err.is_err());
    }

    #[test]
    fn truncated_chunk_rejected() {
        let counts = vec![[5, 1, 4, 0]; 10];
        let portion = Portion::encode(3, 50, &counts);
        let mut buf = Vec::new();
        portion.write_to(&mut buf).unwrap();
        buf.truncate(buf.len() - 3);
        assert!(Portion::read_from(&mut Cursor::new(buf)).is_err());
    }
}
