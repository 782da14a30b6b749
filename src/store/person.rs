//! Single-sample allele-depth store (`.idx`).
//!
//! Layout: 12-byte magic, a 2×u32 root pointer (index byte offset, index entry
//! count), the bz2-compressed portion blocks, and the trailing index table of
//! 4×u32 entries (chrom, shift, size, offset). The root pointer is backpatched
//! when the writer finishes, so a reader can locate the index without scanning.

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
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
use crate::PERSON_MAGIC;

const ROOT_OFFSET: u64 = PERSON_MAGIC.len() as u64;
const ENTRY_BYTES: usize = 4 * 4;

#[derive(Clone, Copy, Debug)]
struct PersonEntry {
    chrom: u32,
    shift: u32,
    size: u32,
    offset: u32,
}

impl PersonEntry {
    fn contains(&self, chrom: u32, pos: u64) -> bool {
        self.chrom == chrom
            && u64::from(self.shift) <= pos
            && pos < u64::from(self.shift) + u64::from(self.size)
    }
}

/// Append-only builder of a `.idx` file.
pub struct PersonWriter {
    out: BufWriter<File>,
    tab: Vec<PersonEntry>,
    pos: u64,
}

impl PersonWriter {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut out = BufWriter::new(File::create(path)?);
        out.write_all(PERSON_MAGIC)?;
        // root pointer placeholder, backpatched by finish()
        out.write_u32::<LittleEndian>(0)?;
        out.write_u32::<LittleEndian>(0)?;
        Ok(Self {
            out,
            tab: Vec::new(),
            pos: ROOT_OFFSET + 8,
        })
    }

    /// Appends one portion as a bz2 block. Portions must arrive in
    /// non-decreasing (chromosome, shift) order.
    pub fn add_portion(&mut self, portion: &Portion) -> Result<()> {
        let (chrom, shift, _) = portion.info();
        if let Some(last) = self.tab.last() {
            if (chrom, shift) < (last.chrom, u64::from(last.shift)) {
                return Err(StoreError::OutOfOrder(
                    chrom,
                    shift,
                    last.chrom,
                    u64::from(last.shift),
                )
                .into());
            }
        }
        let entry = PersonEntry {
            chrom,
            shift: narrow(shift, "portion shift")?,
            size: narrow(portion.size(), "portion size")?,
            offset: narrow(self.pos, "block offset")?,
        };

        let mut encoder = BzEncoder::new(Vec::new(), Compression::default());
        portion.write_to(&mut encoder)?;
        let block = encoder.finish()?;
        self.out.write_all(&block)?;
        self.pos += block.len() as u64;
        self.tab.push(entry);
        Ok(())
    }

    /// Writes the index table, backpatches the root pointer, and flushes.
    pub fn finish(mut self) -> Result<()> {
        let index_offset = narrow(self.pos, "index offset")?;
        for entry in &self.tab {
            self.out.write_u32::<LittleEndian>(entry.chrom)?;
            self.out.write_u32::<LittleEndian>(entry.shift)?;
            self.out.write_u32::<LittleEndian>(entry.size)?;
            self.out.write_u32::<LittleEndian>(entry.offset)?;
        }
        self.out.seek(SeekFrom::Start(ROOT_OFFSET))?;
        self.out.write_u32::<LittleEndian>(index_offset)?;
        self.out.write_u32::<LittleEndian>(self.tab.len() as u32)?;
        self.out.flush()?;
        Ok(())
    }
}

/// Memory-mapped random/sequential reader of a `.idx` file.
pub struct PersonReader {
    mmap: Mmap,
    tab: Vec<PersonEntry>,
    bulk_end: usize,
    cursor: Option<usize>,
    resident: Option<Portion>,
}

impl PersonReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(&path)?;
        let mmap = unsafe { Mmap::map(&file) }?;

        let magic_len = PERSON_MAGIC.len();
        if mmap.len() < magic_len + 8 {
            return Err(FormatError::Truncated("person file shorter than header".into()).into());
        }
        if &mmap[..magic_len] != PERSON_MAGIC {
            return Err(FormatError::InvalidMagic {
                expected: String::from_utf8_lossy(PERSON_MAGIC).into_owned(),
                found: String::from_utf8_lossy(&mmap[..magic_len]).into_owned(),
            }
            .into());
        }

        let mut root = &mmap[magic_len..magic_len + 8];
        let index_offset = root.read_u32::<LittleEndian>()? as usize;
        let entries = root.read_u32::<LittleEndian>()? as usize;
        if index_offset == 0 || index_offset + entries * ENTRY_BYTES > mmap.len() {
            return Err(FormatError::Truncated("person index out of bounds".into()).into());
        }

        let mut cursor = &mmap[index_offset..index_offset + entries * ENTRY_BYTES];
        let mut tab = Vec::with_capacity(entries);
        for _ in 0..entries {
            tab.push(PersonEntry {
                chrom: cursor.read_u32::<LittleEndian>()?,
                shift: cursor.read_u32::<LittleEndian>()?,
                size: cursor.read_u32::<LittleEndian>()?,
                offset: cursor.read_u32::<LittleEndian>()?,
            });
        }
        debug!("opened person store with {} blocks", tab.len());

        Ok(Self {
            mmap,
            tab,
            bulk_end: index_offset,
            cursor: None,
            resident: None,
        })
    }

    /// Number of indexed blocks.
    #[must_use]
    pub fn num_blocks(&self) -> usize {
        self.tab.len()
    }

    fn load_portion(&self, idx: usize) -> Result<Portion> {
        let offset = self.tab[idx].offset as usize;
        let mut decoder = BzDecoder::new(&self.mmap[offset..self.bulk_end]);
        Portion::read_from(&mut decoder)
    }

    /// Advances the sequential cursor and decodes the next portion in file
    /// order; `None` once the index is exhausted.
    pub fn next_portion(&mut self) -> Result<Option<Portion>> {
        let next = self.cursor.map_or(0, |c| c + 1);
        if next >= self.tab.len() {
            return Ok(None);
        }
        self.cursor = Some(next);
        self.load_portion(next).map(Some)
    }

    /// Depth at `(chrom, pos)`, or `None` when the position has no stored
    /// coverage. Keeps the last touched portion resident, so queries in roughly
    /// increasing position order stay O(1).
    pub fn ad_at(&mut self, chrom: u32, pos: u64) -> Result<Option<AlleleDepth>> {
        if let Some(portion) = &self.resident {
            if portion.contains(chrom, pos) {
                return Ok(portion.ad_at(pos));
            }
        }
        self.resident = None;
        for idx in 0..self.tab.len() {
            if self.tab[idx].contains(chrom, pos) {
                let portion = self.load_portion(idx)?;
                let ad = portion.ad_at(pos);
                self.resident = Some(portion);
                return Ok(ad);
            }
        }
        Ok(None)
    }
}

fn narrow(value: u64, field: &'static str) -> Result<u32> {
    u32::try_from(value).map_err(|_| StoreError::FieldOverflow { field, value }.into())
}
