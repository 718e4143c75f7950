//! Header block decoding and encoding.
//!
//! The header is the first block of every compound file. Only its first 512
//! bytes carry data; with 4096-byte blocks the remainder is zero padding.
//! It records the block geometry, the counts and start pointers of every
//! table, and the first 109 BAT block locations. BAT block locations beyond
//! those live in XBAT blocks, which are written by the allocation table.

use super::consts::*;
use super::options::BlockSize;
use crate::common::binary::{read_u16_le, read_u32_le, write_u16_le, write_u32_le};
use crate::common::error::{Error, Result};

const OFF_MINOR_VERSION: usize = 0x18;
const OFF_MAJOR_VERSION: usize = 0x1A;
const OFF_BYTE_ORDER: usize = 0x1C;
const OFF_SECTOR_SHIFT: usize = 0x1E;
const OFF_MINI_SECTOR_SHIFT: usize = 0x20;
const OFF_DIR_SECTOR_COUNT: usize = 0x28;
const OFF_BAT_COUNT: usize = 0x2C;
const OFF_PROPERTY_START: usize = 0x30;
const OFF_MINI_CUTOFF: usize = 0x38;
const OFF_SBAT_START: usize = 0x3C;
const OFF_SBAT_COUNT: usize = 0x40;
const OFF_XBAT_START: usize = 0x44;
const OFF_XBAT_COUNT: usize = 0x48;
const OFF_INLINE_BAT: usize = 0x4C;

/// Decoded header block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderBlock {
    block_size: BlockSize,
    bat_count: u32,
    /// BAT block locations held inline (at most 109)
    inline_bat: Vec<u32>,
    property_start: u32,
    dir_sector_count: u32,
    mini_stream_cutoff: u32,
    sbat_start: u32,
    sbat_count: u32,
    xbat_start: u32,
    xbat_count: u32,
}

impl HeaderBlock {
    /// Header of an empty file: no tables, no directory yet.
    pub fn new(block_size: BlockSize) -> Self {
        Self {
            block_size,
            bat_count: 0,
            inline_bat: Vec::new(),
            property_start: ENDOFCHAIN,
            dir_sector_count: 0,
            mini_stream_cutoff: MINI_STREAM_CUTOFF,
            sbat_start: ENDOFCHAIN,
            sbat_count: 0,
            xbat_start: ENDOFCHAIN,
            xbat_count: 0,
        }
    }

    /// Decode a header from the first bytes of a file.
    ///
    /// Only the first 512 bytes are inspected. Consistency with the rest of
    /// the file (block count, XBAT chain) is checked by the caller once the
    /// block store exists.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(Error::CorruptedFile(format!(
                "header truncated: {} of {} bytes",
                data.len(),
                HEADER_SIZE
            )));
        }

        if &data[0..8] != MAGIC {
            return Err(Error::InvalidFormat(
                "signature does not match a compound file".to_string(),
            ));
        }

        let byte_order = read_u16_le(data, OFF_BYTE_ORDER)?;
        if byte_order != BYTE_ORDER_LE {
            return Err(Error::InvalidFormat(format!(
                "invalid byte order mark {:#06x}",
                byte_order
            )));
        }

        let sector_shift = read_u16_le(data, OFF_SECTOR_SHIFT)?;
        let block_size = BlockSize::from_shift(sector_shift).ok_or_else(|| {
            Error::InvalidFormat(format!("unsupported sector shift {}", sector_shift))
        })?;

        let major_version = read_u16_le(data, OFF_MAJOR_VERSION)?;
        if major_version != block_size.major_version() {
            log::warn!(
                "major version {} does not match {}-byte blocks",
                major_version,
                block_size.bytes()
            );
        }

        let mini_shift = read_u16_le(data, OFF_MINI_SECTOR_SHIFT)?;
        if mini_shift != MINI_SECTOR_SHIFT {
            return Err(Error::InvalidFormat(format!(
                "unsupported mini sector shift {}",
                mini_shift
            )));
        }

        let bat_count = read_u32_le(data, OFF_BAT_COUNT)?;
        let mut inline_bat = Vec::with_capacity(HEADER_DIFAT_ENTRIES);
        for i in 0..(bat_count as usize).min(HEADER_DIFAT_ENTRIES) {
            inline_bat.push(read_u32_le(data, OFF_INLINE_BAT + i * 4)?);
        }

        let mini_stream_cutoff = read_u32_le(data, OFF_MINI_CUTOFF)?;
        if mini_stream_cutoff != MINI_STREAM_CUTOFF {
            log::warn!(
                "non-standard mini stream cutoff {}, using {}",
                mini_stream_cutoff,
                MINI_STREAM_CUTOFF
            );
        }

        // Exactly as many XBAT blocks as the BAT pointers past the inline slots need
        let xbat_count = read_u32_le(data, OFF_XBAT_COUNT)?;
        let overflow = (bat_count as usize).saturating_sub(HEADER_DIFAT_ENTRIES);
        let xbat_needed = overflow.div_ceil(block_size.xbat_entries_per_block());
        if xbat_count as usize != xbat_needed {
            return Err(Error::InvalidFormat(format!(
                "{} BAT blocks need {} XBAT blocks, header declares {}",
                bat_count, xbat_needed, xbat_count
            )));
        }

        Ok(Self {
            block_size,
            bat_count,
            inline_bat,
            property_start: read_u32_le(data, OFF_PROPERTY_START)?,
            dir_sector_count: read_u32_le(data, OFF_DIR_SECTOR_COUNT)?,
            mini_stream_cutoff,
            sbat_start: read_u32_le(data, OFF_SBAT_START)?,
            sbat_count: read_u32_le(data, OFF_SBAT_COUNT)?,
            xbat_start: read_u32_le(data, OFF_XBAT_START)?,
            xbat_count,
        })
    }

    /// Encode the header as one full block.
    pub fn to_block(&self) -> Vec<u8> {
        let mut header = vec![0u8; self.block_size.bytes()];

        header[0..8].copy_from_slice(MAGIC);
        // CLSID at 0x08..0x18 stays zero
        write_u16_le(&mut header, OFF_MINOR_VERSION, MINOR_VERSION);
        write_u16_le(
            &mut header,
            OFF_MAJOR_VERSION,
            self.block_size.major_version(),
        );
        write_u16_le(&mut header, OFF_BYTE_ORDER, BYTE_ORDER_LE);
        write_u16_le(&mut header, OFF_SECTOR_SHIFT, self.block_size.shift());
        write_u16_le(&mut header, OFF_MINI_SECTOR_SHIFT, MINI_SECTOR_SHIFT);

        // csectDir must be zero for version 3 files
        let dir_sectors = match self.block_size {
            BlockSize::Small => 0,
            BlockSize::Large => self.dir_sector_count,
        };
        write_u32_le(&mut header, OFF_DIR_SECTOR_COUNT, dir_sectors);
        write_u32_le(&mut header, OFF_BAT_COUNT, self.bat_count);
        write_u32_le(&mut header, OFF_PROPERTY_START, self.property_start);
        write_u32_le(&mut header, OFF_MINI_CUTOFF, MINI_STREAM_CUTOFF);
        write_u32_le(&mut header, OFF_SBAT_START, self.sbat_start);
        write_u32_le(&mut header, OFF_SBAT_COUNT, self.sbat_count);
        write_u32_le(&mut header, OFF_XBAT_START, self.xbat_start);
        write_u32_le(&mut header, OFF_XBAT_COUNT, self.xbat_count);

        for i in 0..HEADER_DIFAT_ENTRIES {
            let location = self.inline_bat.get(i).copied().unwrap_or(FREESECT);
            write_u32_le(&mut header, OFF_INLINE_BAT + i * 4, location);
        }

        header
    }

    pub fn block_size(&self) -> BlockSize {
        self.block_size
    }

    /// Number of BAT blocks in the file.
    pub fn bat_count(&self) -> u32 {
        self.bat_count
    }

    /// BAT block locations stored inline in the header.
    pub fn inline_bat(&self) -> &[u32] {
        &self.inline_bat
    }

    /// Record the full list of BAT block locations.
    ///
    /// The count covers every BAT block; only the first 109 locations are
    /// kept inline, the rest belong to the XBAT chain.
    pub fn set_bat_locations(&mut self, locations: &[u32]) {
        self.bat_count = locations.len() as u32;
        self.inline_bat = locations
            .iter()
            .take(HEADER_DIFAT_ENTRIES)
            .copied()
            .collect();
    }

    /// Number of XBAT blocks in the file.
    pub fn xbat_count(&self) -> u32 {
        self.xbat_count
    }

    /// First XBAT block, or `ENDOFCHAIN`.
    pub fn xbat_start(&self) -> u32 {
        self.xbat_start
    }

    pub fn set_xbat(&mut self, start: u32, count: u32) {
        self.xbat_start = start;
        self.xbat_count = count;
    }

    /// First block of the property table.
    pub fn property_start(&self) -> u32 {
        self.property_start
    }

    /// Record the property table chain start and length.
    pub fn set_property_table(&mut self, start: u32, block_count: u32) {
        self.property_start = start;
        self.dir_sector_count = block_count;
    }

    /// Mini stream cutoff as read from the file.
    pub fn mini_stream_cutoff(&self) -> u32 {
        self.mini_stream_cutoff
    }

    /// First mini-FAT block, or `ENDOFCHAIN`.
    pub fn sbat_start(&self) -> u32 {
        self.sbat_start
    }

    /// Number of mini-FAT blocks.
    pub fn sbat_count(&self) -> u32 {
        self.sbat_count
    }

    pub fn set_sbat(&mut self, start: u32, count: u32) {
        self.sbat_start = start;
        self.sbat_count = count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_generation() {
        let mut header = HeaderBlock::new(BlockSize::Small);
        header.set_property_table(10, 1);
        header.set_bat_locations(&[1, 2, 3]);

        let block = header.to_block();

        assert_eq!(block.len(), 512);
        assert_eq!(&block[0..8], MAGIC);
        assert_eq!(&block[28..30], &0xFFFEu16.to_le_bytes());
        assert_eq!(&block[44..48], &3u32.to_le_bytes());
        // Unused inline slots are free
        assert_eq!(&block[88..92], &FREESECT.to_le_bytes());
    }

    #[test]
    fn test_sector_size_512() {
        let block = HeaderBlock::new(BlockSize::Small).to_block();

        // DLL version should be 3
        assert_eq!(&block[26..28], &3u16.to_le_bytes());
        // Sector shift should be 9 (2^9 = 512)
        assert_eq!(&block[30..32], &9u16.to_le_bytes());
    }

    #[test]
    fn test_sector_size_4096() {
        let mut header = HeaderBlock::new(BlockSize::Large);
        header.set_property_table(3, 2);
        let block = header.to_block();

        assert_eq!(block.len(), 4096);
        assert_eq!(&block[26..28], &4u16.to_le_bytes());
        assert_eq!(&block[30..32], &12u16.to_le_bytes());
        // Version 4 headers carry the directory sector count
        assert_eq!(&block[40..44], &2u32.to_le_bytes());
    }

    #[test]
    fn test_decode_encoded_header() {
        let mut header = HeaderBlock::new(BlockSize::Small);
        header.set_property_table(7, 1);
        header.set_sbat(9, 2);
        let locations: Vec<u32> = (0..112).collect();
        header.set_bat_locations(&locations);
        header.set_xbat(200, 1);

        let decoded = HeaderBlock::from_bytes(&header.to_block()).unwrap();
        assert_eq!(decoded.bat_count(), 112);
        assert_eq!(decoded.inline_bat().len(), 109);
        assert_eq!(decoded.inline_bat()[108], 108);
        assert_eq!(decoded.xbat_start(), 200);
        assert_eq!(decoded.xbat_count(), 1);
        assert_eq!(decoded.sbat_start(), 9);
        assert_eq!(decoded.sbat_count(), 2);
        assert_eq!(decoded.property_start(), 7);
    }

    #[test]
    fn test_bad_signature() {
        let mut block = HeaderBlock::new(BlockSize::Small).to_block();
        block[0] = 0x50;
        assert!(matches!(
            HeaderBlock::from_bytes(&block),
            Err(Error::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_truncated_header() {
        let block = HeaderBlock::new(BlockSize::Small).to_block();
        assert!(matches!(
            HeaderBlock::from_bytes(&block[..100]),
            Err(Error::CorruptedFile(_))
        ));
    }

    #[test]
    fn test_bat_count_without_xbat_capacity() {
        let mut header = HeaderBlock::new(BlockSize::Small);
        let locations: Vec<u32> = (0..110).collect();
        header.set_bat_locations(&locations);
        // 110 BAT blocks but no XBAT block to hold the 110th pointer
        assert!(matches!(
            HeaderBlock::from_bytes(&header.to_block()),
            Err(Error::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_xbat_count_beyond_bat_count() {
        let mut header = HeaderBlock::new(BlockSize::Small);
        header.set_bat_locations(&[0]);
        header.set_xbat(0, 0xFFFF_FFF0);
        assert!(matches!(
            HeaderBlock::from_bytes(&header.to_block()),
            Err(Error::InvalidFormat(_))
        ));

        // One XBAT block too many for 110 BAT blocks
        let locations: Vec<u32> = (0..110).collect();
        header.set_bat_locations(&locations);
        header.set_xbat(200, 2);
        assert!(matches!(
            HeaderBlock::from_bytes(&header.to_block()),
            Err(Error::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_unsupported_shift() {
        let mut block = HeaderBlock::new(BlockSize::Small).to_block();
        block[30..32].copy_from_slice(&10u16.to_le_bytes());
        assert!(matches!(
            HeaderBlock::from_bytes(&block),
            Err(Error::InvalidFormat(_))
        ));
    }
}
