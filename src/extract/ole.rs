//! OLE2 compound file reader (the container format of legacy Office
//! documents). Only what is needed to pull named streams out of a file.

use crate::error::ExtractionError;

pub(crate) const MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

const HEADER_LEN: usize = 512;
const DIR_ENTRY_LEN: usize = 128;
const HEADER_DIFAT_ENTRIES: usize = 109;
const MINI_SECTOR_LEN: usize = 64;

const MAX_REGULAR_SECTOR: u32 = 0xFFFF_FFFA;
const END_OF_CHAIN: u32 = 0xFFFF_FFFE;
const FREE_SECTOR: u32 = 0xFFFF_FFFF;

const ENTRY_STREAM: u8 = 2;
const ENTRY_ROOT: u8 = 5;

fn format_error(reason: impl Into<String>) -> ExtractionError {
    ExtractionError::Format {
        format: "ole2".into(),
        reason: reason.into(),
    }
}

pub(crate) fn u16_at(bytes: &[u8], offset: usize) -> Option<u16> {
    let raw = bytes.get(offset..offset + 2)?;
    Some(u16::from_le_bytes([raw[0], raw[1]]))
}

pub(crate) fn u32_at(bytes: &[u8], offset: usize) -> Option<u32> {
    let raw = bytes.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

fn u64_at(bytes: &[u8], offset: usize) -> Option<u64> {
    let low = u64::from(u32_at(bytes, offset)?);
    let high = u64::from(u32_at(bytes, offset + 4)?);
    Some(high << 32 | low)
}

fn le_u32s(bytes: &[u8]) -> impl Iterator<Item = u32> + '_ {
    bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
}

/// Sector `n` of the file. The last sector may be short.
fn sector(bytes: &[u8], sector_len: usize, n: u32) -> Result<&[u8], ExtractionError> {
    let start = (n as usize)
        .checked_add(1)
        .and_then(|i| i.checked_mul(sector_len))
        .ok_or_else(|| format_error(format!("sector {n} out of range")))?;
    let end = start.saturating_add(sector_len).min(bytes.len());
    bytes
        .get(start..end)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format_error(format!("sector {n} past end of file")))
}

/// Follow a sector chain through an allocation table. Every sector may be
/// visited once, so a chain is never longer than the table.
fn chain(table: &[u32], start: u32) -> Result<Vec<u32>, ExtractionError> {
    let mut sectors = Vec::new();
    let mut seen = vec![false; table.len()];
    let mut current = start;

    while current != END_OF_CHAIN && current != FREE_SECTOR {
        let index = current as usize;
        if current > MAX_REGULAR_SECTOR || index >= table.len() {
            return Err(format_error(format!(
                "sector {current} outside allocation table"
            )));
        }
        if std::mem::replace(&mut seen[index], true) {
            return Err(format_error("cyclic sector chain"));
        }
        sectors.push(current);
        current = table[index];
    }
    Ok(sectors)
}

#[derive(Debug)]
struct DirEntry {
    name: String,
    kind: u8,
    start: u32,
    size: u64,
}

/// A parsed compound file borrowing the original bytes.
pub(crate) struct CompoundFile<'a> {
    bytes: &'a [u8],
    sector_len: usize,
    mini_cutoff: u64,
    fat: Vec<u32>,
    mini_fat: Vec<u32>,
    entries: Vec<DirEntry>,
    mini_stream: Vec<u8>,
}

impl<'a> CompoundFile<'a> {
    pub(crate) fn parse(bytes: &'a [u8]) -> Result<Self, ExtractionError> {
        if !bytes.starts_with(MAGIC) {
            return Err(format_error("missing compound file signature"));
        }
        if bytes.len() < HEADER_LEN {
            return Err(format_error("truncated header"));
        }

        let header_u32 =
            |offset| u32_at(bytes, offset).ok_or_else(|| format_error("truncated header"));

        let sector_len = match u16_at(bytes, 0x1E) {
            Some(9) => 512,
            Some(12) => 4096,
            other => {
                return Err(format_error(format!("unsupported sector shift {other:?}")));
            }
        };
        if u16_at(bytes, 0x20) != Some(6) {
            return Err(format_error("unsupported mini sector shift"));
        }

        let fat_sectors = header_u32(0x2C)? as usize;
        let first_dir = header_u32(0x30)?;
        let mini_cutoff = u64::from(header_u32(0x38)?);
        let first_mini_fat = header_u32(0x3C)?;
        let mut next_difat = header_u32(0x44)?;
        let difat_sectors = header_u32(0x48)? as usize;

        // Locations of the FAT sectors: 109 in the header, the rest in a
        // chain of DIFAT sectors whose last slot links to the next one.
        let mut difat: Vec<u32> = le_u32s(&bytes[0x4C..0x4C + HEADER_DIFAT_ENTRIES * 4]).collect();
        let max_sectors = bytes.len() / sector_len + 1;
        for _ in 0..difat_sectors.min(max_sectors) {
            if next_difat > MAX_REGULAR_SECTOR {
                break;
            }
            let block = sector(bytes, sector_len, next_difat)?;
            let (entries, link) = block.split_at(block.len().saturating_sub(4));
            difat.extend(le_u32s(entries));
            next_difat = u32_at(link, 0).unwrap_or(END_OF_CHAIN);
        }

        let mut fat = Vec::new();
        for &location in difat
            .iter()
            .filter(|&&s| s <= MAX_REGULAR_SECTOR)
            .take(fat_sectors)
        {
            fat.extend(le_u32s(sector(bytes, sector_len, location)?));
        }
        if fat.is_empty() {
            return Err(format_error("empty allocation table"));
        }

        let read_chain = |start: u32| -> Result<Vec<u8>, ExtractionError> {
            let mut out = Vec::new();
            for n in chain(&fat, start)? {
                out.extend_from_slice(sector(bytes, sector_len, n)?);
            }
            Ok(out)
        };

        let directory = read_chain(first_dir)?;
        let entries: Vec<DirEntry> = directory
            .chunks_exact(DIR_ENTRY_LEN)
            .filter_map(|raw| dir_entry(raw, sector_len))
            .collect();

        let root = entries
            .first()
            .filter(|e| e.kind == ENTRY_ROOT)
            .ok_or_else(|| format_error("missing root directory entry"))?;

        let mut mini_stream = read_chain(root.start)?;
        mini_stream.truncate(usize::try_from(root.size).unwrap_or(usize::MAX));

        let mini_fat: Vec<u32> = le_u32s(&read_chain(first_mini_fat)?).collect();

        Ok(Self {
            bytes,
            sector_len,
            mini_cutoff,
            fat,
            mini_fat,
            entries,
            mini_stream,
        })
    }

    /// Contents of the stream called `name`, if the file has one.
    pub(crate) fn stream(&self, name: &str) -> Result<Option<Vec<u8>>, ExtractionError> {
        let Some(entry) = self
            .entries
            .iter()
            .find(|e| e.kind == ENTRY_STREAM && e.name.eq_ignore_ascii_case(name))
        else {
            return Ok(None);
        };

        let mut out = Vec::new();
        if entry.size < self.mini_cutoff {
            for n in chain(&self.mini_fat, entry.start)? {
                let start = n as usize * MINI_SECTOR_LEN;
                let block = self
                    .mini_stream
                    .get(start..start + MINI_SECTOR_LEN)
                    .or_else(|| self.mini_stream.get(start..))
                    .filter(|b| !b.is_empty())
                    .ok_or_else(|| format_error(format!("mini sector {n} out of range")))?;
                out.extend_from_slice(block);
            }
        } else {
            for n in chain(&self.fat, entry.start)? {
                out.extend_from_slice(sector(self.bytes, self.sector_len, n)?);
            }
        }

        let size = usize::try_from(entry.size).unwrap_or(usize::MAX);
        if out.len() < size {
            return Err(format_error(format!(
                "stream {name} is shorter than its declared size"
            )));
        }
        out.truncate(size);
        Ok(Some(out))
    }
}

fn dir_entry(raw: &[u8], sector_len: usize) -> Option<DirEntry> {
    let kind = *raw.get(0x42)?;
    if kind == 0 {
        return None;
    }
    let name_units = (usize::from(u16_at(raw, 0x40)?) / 2).saturating_sub(1).min(31);
    let units: Vec<u16> = raw[..name_units * 2]
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    let size = u64_at(raw, 0x78)?;
    Some(DirEntry {
        name: String::from_utf16_lossy(&units),
        kind,
        start: u32_at(raw, 0x74)?,
        // Version 3 files only define the low 32 bits.
        size: if sector_len == 512 {
            size & 0xFFFF_FFFF
        } else {
            size
        },
    })
}


#[cfg(test)]
mod tests {
    use super::fixtures::compound_file;
    use super::*;

    #[test]
    fn reads_named_streams() {
        let first = vec![b'a'; 5000];
        let second: Vec<u8> = (0..4200u32).map(|i| (i % 251) as u8).collect();
        let file = compound_file(&[("WordDocument", &first), ("1Table", &second)]);

        let cf = CompoundFile::parse(&file).unwrap();
        assert_eq!(cf.stream("WordDocument").unwrap().unwrap(), first);
        assert_eq!(cf.stream("1table").unwrap().unwrap(), second);
        assert!(cf.stream("0Table").unwrap().is_none());
    }

    #[test]
    fn short_input_is_rejected() {
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(b"Quarterly revenue grew by ten percent");
        let err = CompoundFile::parse(&bytes).err().unwrap();
        assert!(matches!(err, ExtractionError::Format { .. }));
    }

    #[test]
    fn cyclic_chain_is_rejected() {
        assert!(chain(&[1, 0], 0).is_err());
        assert_eq!(chain(&[1, END_OF_CHAIN], 0).unwrap(), vec![0, 1]);
        assert!(chain(&[7], 0).is_err());
    }
}
