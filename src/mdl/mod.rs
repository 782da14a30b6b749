//! Generic block-compressed model cache (`.mdl`).
//!
//! Stores one fixed-size binary record per genomic position, indexed by
//! (chromosome, position) with the same root-pointer/index-table framing as the
//! allele-depth stores. Records are buffered into blocks of contiguous
//! positions, bz2-compressed per block. Used to memoize per-position model
//! parameters so lookups skip the EM fit entirely.
//!
//! Layout: ASCII prefix, `"{array-type}/{record-size}\n"` meta line, 2×u64 root
//! pointer, bz2 blocks, trailing index of 5×u64 entries
//! (chrom, start, record count, offset, bytes).

use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use bzip2::read::BzDecoder;
use bzip2::write::BzEncoder;
use bzip2::Compression;
use log::debug;
use memmap2::Mmap;

use crate::error::{FormatError, Result, StoreError};

/// Default number of positions buffered into one block.
pub const DEFAULT_BLOCK_RECORDS: usize = 50_000;

const ENTRY_BYTES: usize = 5 * 8;

/// Scalar element of a cache record, bound to its array-type token in the
/// meta line.
pub trait MdlScalar: bytemuck::Pod {
    /// Single-character array-type token written to the meta line.
    const TOKEN: char;
}

impl MdlScalar for u16 {
    const TOKEN: char = 'H';
}

#[derive(Clone, Copy, Debug)]
struct MdlEntry {
    chrom: u64,
    start: u64,
    count: u64,
    offset: u64,
    bytes: u64,
}

impl MdlEntry {
    fn contains(&self, chrom: u32, pos: u64) -> bool {
        self.chrom == u64::from(chrom) && self.start <= pos && pos < self.start + self.count
    }
}

/// Append-only builder of a `.mdl` file.
pub struct MdlWriter<T: MdlScalar> {
    out: BufWriter<File>,
    root_pos: u64,
    pos: u64,
    record_len: usize,
    block_records: usize,
    tab: Vec<MdlEntry>,
    cur_chrom: Option<u32>,
    block_start: u64,
    next_pos: u64,
    buffer: Vec<T>,
}

impl<T: MdlScalar> MdlWriter<T> {
    pub fn create<P: AsRef<Path>>(
        path: P,
        prefix: &str,
        record_len: usize,
        block_records: usize,
    ) -> Result<Self> {
        let mut out = BufWriter::new(File::create(path)?);
        out.write_all(prefix.as_bytes())?;
        let meta = format!("{}/{}\n", T::TOKEN, record_len);
        out.write_all(meta.as_bytes())?;
        let root_pos = (prefix.len() + meta.len()) as u64;
        out.write_u64::<LittleEndian>(0)?;
        out.write_u64::<LittleEndian>(0)?;

        Ok(Self {
            out,
            root_pos,
            pos: root_pos + 16,
            record_len,
            block_records,
            tab: Vec::new(),
            cur_chrom: None,
            block_start: 0,
            next_pos: 0,
            buffer: Vec::new(),
        })
    }

    fn flush_block(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let Some(chrom) = self.cur_chrom else {
            return Ok(());
        };
        let mut encoder = BzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(bytemuck::cast_slice(&self.buffer))?;
        let block = encoder.finish()?;
        self.tab.push(MdlEntry {
            chrom: u64::from(chrom),
            start: self.block_start,
            count: (self.buffer.len() / self.record_len) as u64,
            offset: self.pos,
            bytes: block.len() as u64,
        });
        self.out.write_all(&block)?;
        self.pos += block.len() as u64;
        self.buffer.clear();
        self.block_start = self.next_pos;
        Ok(())
    }

    /// Appends the record for `(chrom, pos)`. Within a chromosome positions
    /// must be contiguous; a chromosome change or a full buffer starts a new
    /// block.
    pub fn add_record(&mut self, chrom: u32, pos: u64, record: &[T]) -> Result<()> {
        if record.len() != self.record_len {
            return Err(StoreError::RecordLength {
                expected: self.record_len,
                found: record.len(),
            }
            .into());
        }
        match self.cur_chrom {
            Some(c) if c == chrom => {
                if pos != self.next_pos {
                    return Err(StoreError::NonContiguousRecord {
                        last: self.next_pos - 1,
                        found: pos,
                    }
                    .into());
                }
            }
            _ => {
                self.flush_block()?;
                self.cur_chrom = Some(chrom);
                self.block_start = pos;
            }
        }
        self.buffer.extend_from_slice(record);
        self.next_pos = pos + 1;
        if (self.buffer.len() / self.record_len) >= self.block_records {
            self.flush_block()?;
        }
        Ok(())
    }

    /// Flushes the pending block, writes the index table, and backpatches the
    /// root pointer.
    pub fn finish(mut self) -> Result<()> {
        self.flush_block()?;
        let index_offset = self.pos;
        for entry in &self.tab {
            self.out.write_u64::<LittleEndian>(entry.chrom)?;
            self.out.write_u64::<LittleEndian>(entry.start)?;
            self.out.write_u64::<LittleEndian>(entry.count)?;
            self.out.write_u64::<LittleEndian>(entry.offset)?;
            self.out.write_u64::<LittleEndian>(entry.bytes)?;
        }
        self.out.seek(SeekFrom::Start(self.root_pos))?;
        self.out.write_u64::<LittleEndian>(index_offset)?;
        self.out.write_u64::<LittleEndian>(self.tab.len() as u64)?;
        self.out.flush()?;
        Ok(())
    }
}

/// Memory-mapped random/sequential reader of a `.mdl` file.
pub struct MdlReader<T: MdlScalar> {
    mmap: Mmap,
    record_len: usize,
    tab: Vec<MdlEntry>,
    cur: Option<usize>,
    resident: Vec<T>,
}

impl<T: MdlScalar> MdlReader<T> {
    pub fn open<P: AsRef<Path>>(path: P, prefix: &str, record_len: usize) -> Result<Self> {
        let file = File::open(&path)?;
        let mmap = unsafe { Mmap::map(&file) }?;

        let plen = prefix.len();
        if mmap.len() < plen {
            return Err(FormatError::Truncated("model cache shorter than prefix".into()).into());
        }
        if &mmap[..plen] != prefix.as_bytes() {
            return Err(FormatError::InvalidMagic {
                expected: prefix.to_string(),
                found: String::from_utf8_lossy(&mmap[..plen]).into_owned(),
            }
            .into());
        }

        let nl = mmap[plen..]
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| FormatError::Truncated("unterminated meta line".into()))?;
        let meta = std::str::from_utf8(&mmap[plen..plen + nl])?;
        let expected = format!("{}/{}", T::TOKEN, record_len);
        if meta != expected {
            return Err(FormatError::MetaMismatch {
                expected,
                found: meta.to_string(),
            }
            .into());
        }

        let at = plen + nl + 1;
        if mmap.len() < at + 16 {
            return Err(FormatError::Truncated("model cache root pointer missing".into()).into());
        }
        let mut root = &mmap[at..at + 16];
        let index_offset = root.read_u64::<LittleEndian>()? as usize;
        let entries = root.read_u64::<LittleEndian>()? as usize;
        if index_offset == 0 || index_offset + entries * ENTRY_BYTES > mmap.len() {
            return Err(FormatError::Truncated("model cache index out of bounds".into()).into());
        }

        let mut cursor = &mmap[index_offset..index_offset + entries * ENTRY_BYTES];
        let mut tab = Vec::with_capacity(entries);
        for _ in 0..entries {
            tab.push(MdlEntry {
                chrom: cursor.read_u64::<LittleEndian>()?,
                start: cursor.read_u64::<LittleEndian>()?,
                count: cursor.read_u64::<LittleEndian>()?,
                offset: cursor.read_u64::<LittleEndian>()?,
                bytes: cursor.read_u64::<LittleEndian>()?,
            });
        }
        debug!("opened model cache with {} blocks", tab.len());

        Ok(Self {
            mmap,
            record_len,
            tab,
            cur: None,
            resident: Vec::new(),
        })
    }

    #[must_use]
    pub fn num_blocks(&self) -> usize {
        self.tab.len()
    }

    fn load_block(&self, idx: usize) -> Result<Vec<T>> {
        let entry = &self.tab[idx];
        let start = entry.offset as usize;
        let end = start + entry.bytes as usize;
        let mut decoder = BzDecoder::new(&self.mmap[start..end]);
        let mut raw = Vec::new();
        decoder.read_to_end(&mut raw)?;

        let expected = entry.count as usize * self.record_len * size_of::<T>();
        if raw.len() != expected {
            return Err(FormatError::InconsistentHeader(format!(
                "model block holds {} bytes, index declares {expected}",
                raw.len()
            ))
            .into());
        }
        Ok(bytemuck::pod_collect_to_vec(&raw))
    }

    /// The record at `(chrom, pos)`, or `None` for positions outside every
    /// block. The containing block stays resident between calls.
    pub fn record(&mut self, chrom: u32, pos: u64) -> Result<Option<&[T]>> {
        let idx = if let Some(i) = self.cur.filter(|&i| self.tab[i].contains(chrom, pos)) {
            i
        } else {
            let Some(i) = self.tab.iter().position(|e| e.contains(chrom, pos)) else {
                self.cur = None;
                self.resident.clear();
                return Ok(None);
            };
            self.resident = self.load_block(i)?;
            self.cur = Some(i);
            i
        };
        let at = (pos - self.tab[idx].start) as usize * self.record_len;
        Ok(Some(&self.resident[at..at + self.record_len]))
    }

    /// Advances the sequential cursor to the next block and reports its
    /// coverage as `(chrom, start, count)`.
    pub fn next_block(&mut self) -> Result<Option<(u32, u64, u64)>> {
        let next = self.cur.map_or(0, |c| c + 1);
        if next >= self.tab.len() {
            return Ok(None);
        }
        self.resident = self.load_block(next)?;
        self.cur = Some(next);
        let entry = &self.tab[next];
        Ok(Some((entry.chrom as u32, entry.start, entry.count)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const PREFIX: &str = "TST/MDL.v1";

    fn rec(seed: u16) -> [u16; 3] {
        [seed, seed.wrapping_mul(3), seed.wrapping_add(7)]
    }

    fn write_cache(path: &std::path::Path) {
        let mut writer: MdlWriter<u16> = MdlWriter::create(path, PREFIX, 3, 4).unwrap();
        for pos in 1000..1010 {
            writer.add_record(5, pos, &rec(pos as u16)).unwrap();
        }
        for pos in 20..23 {
            writer.add_record(6, pos, &rec(pos as u16)).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn blocks_split_on_limit_and_chrom_change() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.mdl");
        write_cache(&path);

        let mut reader: MdlReader<u16> = MdlReader::open(&path, PREFIX, 3).unwrap();
        // 10 records at 4 per block -> 3 blocks, plus 1 for the second chromosome
        assert_eq!(reader.num_blocks(), 4);

        let mut blocks = Vec::new();
        while let Some(info) = reader.next_block().unwrap() {
            blocks.push(info);
        }
        assert_eq!(
            blocks,
            vec![(5, 1000, 4), (5, 1004, 4), (5, 1008, 2), (6, 20, 3)]
        );
    }

    #[test]
    fn random_lookup_across_blocks() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.mdl");
        write_cache(&path);

        let mut reader: MdlReader<u16> = MdlReader::open(&path, PREFIX, 3).unwrap();
        for pos in [1000u64, 1003, 1004, 1009] {
            assert_eq!(reader.record(5, pos).unwrap(), Some(&rec(pos as u16)[..]));
        }
        assert_eq!(reader.record(6, 22).unwrap(), Some(&rec(22)[..]));
        // back to an earlier block after residency moved on
        assert_eq!(reader.record(5, 1001).unwrap(), Some(&rec(1001)[..]));

        assert_eq!(reader.record(5, 999).unwrap(), None);
        assert_eq!(reader.record(5, 1010).unwrap(), None);
        assert_eq!(reader.record(7, 1000).unwrap(), None);
    }

    #[test]
    fn rejects_gap_within_chromosome() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.mdl");
        let mut writer: MdlWriter<u16> = MdlWriter::create(&path, PREFIX, 3, 100).unwrap();
        writer.add_record(1, 10, &rec(1)).unwrap();
        assert!(writer.add_record(1, 12, &rec(2)).is_err());
    }

    #[test]
    fn rejects_wrong_record_width() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.mdl");
        let mut writer: MdlWriter<u16> = MdlWriter::create(&path, PREFIX, 3, 100).unwrap();
        assert!(writer.add_record(1, 10, &[1, 2]).is_err());
    }

    #[test]
    fn rejects_meta_mismatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.mdl");
        write_cache(&path);
        assert!(MdlReader::<u16>::open(&path, PREFIX, 8).is_err());
        assert!(MdlReader::<u16>::open(&path, "OTHER/MDL", 3).is_err());
    }
}
