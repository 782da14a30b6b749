//! Multi-sample allele-depth library (`.ldx`).
//!
//! A library batches a whole background panel: every block holds one portion per
//! sample, all aligned to the same (chromosome, shift, size) range, compressed
//! together so a single decompression yields the panel's counts for the range.
//!
//! Layout: 12-byte magic, newline-terminated sample names, a blank line, a
//! 2×u64 root pointer (index byte offset, index entry count), the bz2 blocks,
//! and the trailing index of 5×u64 entries (chrom, shift, size, offset, bytes).

use std::fs::File;
use std::io::{BufWriter, Cursor, Read, Seek, SeekFrom, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use bzip2::read::BzDecoder;
use bzip2::write::BzEncoder;
use bzip2::Compression;
use log::debug;
use memmap2::Mmap;

use crate::ad::AlleleDepth;
use crate::error::{FormatError, Result, StoreError};
use crate::store::Portion;
use crate::LIBRARY_MAGIC;

const ENTRY_BYTES: usize = 5 * 8;

#[derive(Clone, Copy, Debug)]
struct LibEntry {
    chrom: u64,
    shift: u64,
    size: u64,
    offset: u64,
    bytes: u64,
}

impl LibEntry {
    fn contains(&self, chrom: u32, pos: u64) -> bool {
        self.chrom == u64::from(chrom) && self.shift <= pos && pos < self.shift + self.size
    }
}

/// Append-only builder of a `.ldx` file.
pub struct LibraryBuilder {
    out: BufWriter<File>,
    samples: usize,
    root_pos: u64,
    tab: Vec<LibEntry>,
    pos: u64,
}

impl LibraryBuilder {
    pub fn create<P: AsRef<Path>>(path: P, sample_names: &[&str]) -> Result<Self> {
        if sample_names.is_empty() {
            return Err(FormatError::InconsistentHeader(
                "a library needs at least one sample".to_string(),
            )
            .into());
        }
        let mut out = BufWriter::new(File::create(path)?);
        out.write_all(LIBRARY_MAGIC)?;
        let mut pos = LIBRARY_MAGIC.len() as u64;
        for name in sample_names {
            if name.is_empty() || name.contains('\n') {
                return Err(FormatError::InconsistentHeader(format!(
                    "bad sample name: {name:?}"
                ))
                .into());
            }
            out.write_all(name.as_bytes())?;
            out.write_all(b"\n")?;
            pos += name.len() as u64 + 1;
        }
        out.write_all(b"\n")?;
        pos += 1;

        let root_pos = pos;
        out.write_u64::<LittleEndian>(0)?;
        out.write_u64::<LittleEndian>(0)?;
        pos += 16;

        Ok(Self {
            out,
            samples: sample_names.len(),
            root_pos,
            tab: Vec::new(),
            pos,
        })
    }

    /// Appends one block: a portion per sample, all covering the same range,
    /// in non-decreasing (chromosome, shift) order across calls.
    pub fn add_portions(&mut self, portions: &[Portion]) -> Result<()> {
        if portions.len() != self.samples {
            return Err(StoreError::PortionSetMismatch {
                expected: self.samples,
                found: portions.len(),
            }
            .into());
        }
        let (chrom, start, end) = portions[0].info();
        for portion in &portions[1..] {
            if portion.info() != (chrom, start, end) {
                return Err(FormatError::InconsistentHeader(
                    "portions in a library block must cover the same range".to_string(),
                )
                .into());
            }
        }
        if let Some(last) = self.tab.last() {
            if (u64::from(chrom), start) < (last.chrom, last.shift) {
                return Err(
                    StoreError::OutOfOrder(chrom, start, last.chrom as u32, last.shift).into(),
                );
            }
        }

        let mut encoder = BzEncoder::new(Vec::new(), Compression::default());
        for portion in portions {
            portion.write_to(&mut encoder)?;
        }
        let block = encoder.finish()?;
        self.tab.push(LibEntry {
            chrom: u64::from(chrom),
            shift: start,
            size: end - start,
            offset: self.pos,
            bytes: block.len() as u64,
        });
        self.out.write_all(&block)?;
        self.pos += block.len() as u64;
        Ok(())
    }

    /// Writes the index table, backpatches the root pointer, and flushes.
    pub fn finish(mut self) -> Result<()> {
        let index_offset = self.pos;
        for entry in &self.tab {
            self.out.write_u64::<LittleEndian>(entry.chrom)?;
            self.out.write_u64::<LittleEndian>(entry.shift)?;
            self.out.write_u64::<LittleEndian>(entry.size)?;
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

/// Memory-mapped random/sequential reader of a `.ldx` file.
pub struct LibraryReader {
    mmap: Mmap,
    samples: Vec<String>,
    tab: Vec<LibEntry>,
    cursor: Option<usize>,
    resident: Option<Vec<Portion>>,
}

impl LibraryReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(&path)?;
        let mmap = unsafe { Mmap::map(&file) }?;

        let magic_len = LIBRARY_MAGIC.len();
        if mmap.len() < magic_len {
            return Err(FormatError::Truncated("library file shorter than magic".into()).into());
        }
        if &mmap[..magic_len] != LIBRARY_MAGIC {
            return Err(FormatError::InvalidMagic {
                expected: String::from_utf8_lossy(LIBRARY_MAGIC).into_owned(),
                found: String::from_utf8_lossy(&mmap[..magic_len]).into_owned(),
            }
            .into());
        }

        // newline-terminated sample names, ended by a blank line
        let mut samples = Vec::new();
        let mut at = magic_len;
        loop {
            let rest = &mmap[at..];
            let nl = rest
                .iter()
                .position(|&b| b == b'\n')
                .ok_or_else(|| FormatError::Truncated("unterminated sample name".into()))?;
            at += nl + 1;
            if nl == 0 {
                break;
            }
            samples.push(std::str::from_utf8(&rest[..nl])?.to_string());
        }

        if mmap.len() < at + 16 {
            return Err(FormatError::Truncated("library root pointer missing".into()).into());
        }
        let mut root = &mmap[at..at + 16];
        let index_offset = root.read_u64::<LittleEndian>()? as usize;
        let entries = root.read_u64::<LittleEndian>()? as usize;
        if index_offset == 0 || index_offset + entries * ENTRY_BYTES > mmap.len() {
            return Err(FormatError::Truncated("library index out of bounds".into()).into());
        }

        let mut cursor = &mmap[index_offset..index_offset + entries * ENTRY_BYTES];
        let mut tab = Vec::with_capacity(entries);
        for _ in 0..entries {
            tab.push(LibEntry {
                chrom: cursor.read_u64::<LittleEndian>()?,
                shift: cursor.read_u64::<LittleEndian>()?,
                size: cursor.read_u64::<LittleEndian>()?,
                offset: cursor.read_u64::<LittleEndian>()?,
                bytes: cursor.read_u64::<LittleEndian>()?,
            });
        }
        debug!(
            "opened library with {} samples, {} blocks",
            samples.len(),
            tab.len()
        );

        Ok(Self {
            mmap,
            samples,
            tab,
            cursor: None,
            resident: None,
        })
    }

    #[must_use]
    pub fn sample_names(&self) -> &[String] {
        &self.samples
    }

    #[must_use]
    pub fn num_blocks(&self) -> usize {
        self.tab.len()
    }

    fn load_block(&self, idx: usize) -> Result<Vec<Portion>> {
        let entry = &self.tab[idx];
        let start = entry.offset as usize;
        let end = start + entry.bytes as usize;
        let mut decoder = BzDecoder::new(&self.mmap[start..end]);
        let mut raw = Vec::new();
        decoder.read_to_end(&mut raw)?;

        let mut cursor = Cursor::new(raw);
        let mut portions = Vec::with_capacity(self.samples.len());
        for _ in 0..self.samples.len() {
            portions.push(Portion::read_from(&mut cursor)?);
        }
        Ok(portions)
    }

    /// Advances the sequential cursor to the next block and reports its covered
    /// range as `(chrom, start, end)`; the block stays resident for
    /// [`LibraryReader::ad_seq`] lookups.
    pub fn next_portions(&mut self) -> Result<Option<(u32, u64, u64)>> {
        let next = self.cursor.map_or(0, |c| c + 1);
        if next >= self.tab.len() {
            return Ok(None);
        }
        let block = self.load_block(next)?;
        self.cursor = Some(next);
        let info = block[0].info();
        self.resident = Some(block);
        Ok(Some(info))
    }

    /// Per-sample depths at `(chrom, pos)`, or `None` for uncovered positions.
    pub fn ad_seq(&mut self, chrom: u32, pos: u64) -> Result<Option<Vec<AlleleDepth>>> {
        if let Some(block) = &self.resident {
            if block[0].contains(chrom, pos) {
                return Ok(Some(block.iter().filter_map(|p| p.ad_at(pos)).collect()));
            }
        }
        self.resident = None;
        self.cursor = None;
        for idx in 0..self.tab.len() {
            if self.tab[idx].contains(chrom, pos) {
                let block = self.load_block(idx)?;
                let depths = block.iter().filter_map(|p| p.ad_at(pos)).collect();
                self.cursor = Some(idx);
                self.resident = Some(block);
                return Ok(Some(depths));
            }
        }
        Ok(None)
    }
}

/// All `.ldx` libraries of a directory, read as one background panel.
pub struct LibraryCollection {
    libs: Vec<LibraryReader>,
}

impl LibraryCollection {
    /// Opens every `*.ldx` file under `dir`, sorted by file name.
    pub fn open_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let mut paths: Vec<_> = std::fs::read_dir(dir)?
            .collect::<std::io::Result<Vec<_>>>()?
            .into_iter()
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "ldx"))
            .collect();
        paths.sort();
        let libs = paths
            .iter()
            .map(LibraryReader::open)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { libs })
    }

    #[must_use]
    pub fn from_readers(libs: Vec<LibraryReader>) -> Self {
        Self { libs }
    }

    #[must_use]
    pub fn num_libraries(&self) -> usize {
        self.libs.len()
    }

    /// Total panel size across libraries.
    #[must_use]
    pub fn num_samples(&self) -> usize {
        self.libs.iter().map(|l| l.sample_names().len()).sum()
    }

    /// Sequential portion walk, driven by the first library (all libraries of a
    /// panel are built over the same genomic blocks).
    pub fn next_portions(&mut self) -> Result<Option<(u32, u64, u64)>> {
        match self.libs.first_mut() {
            Some(lib) => lib.next_portions(),
            None => Ok(None),
        }
    }

    /// Panel rows at `(chrom, pos)`: per-sample forward and reverse
    /// `[ref, alt]` pairs, concatenated across libraries. `None` when no
    /// library covers the position.
    pub fn mine_ad(
        &mut self,
        chrom: u32,
        pos: u64,
    ) -> Result<Option<(Vec<[f64; 2]>, Vec<[f64; 2]>)>> {
        let mut fwd = Vec::new();
        let mut rev = Vec::new();
        let mut covered = false;
        for lib in &mut self.libs {
            if let Some(depths) = lib.ad_seq(chrom, pos)? {
                covered = true;
                for ad in depths {
                    fwd.push(ad.fwd);
                    rev.push(ad.rev);
                }
            }
        }
        if covered {
            Ok(Some((fwd, rev)))
        } else {
            Ok(None)
        }
    }
}
