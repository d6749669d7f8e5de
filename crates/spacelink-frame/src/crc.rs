//! Table-driven CRC-16 with configurable polynomial and bit order.
//!
//! | Preset | Order | Poly | Init | XorOut | Check ("123456789") |
//! |--------|-------|------|------|--------|---------------------|
//! | ccitt-false | MSB | 0x1021 | 0xFFFF | 0x0000 | 0x29B1 |
//! | xmodem | MSB | 0x1021 | 0x0000 | 0x0000 | 0x31C3 |
//! | hdlc | LSB | 0x1021 | 0xFFFF | 0xFFFF | 0x906E |
//! | kermit | LSB | 0x1021 | 0x0000 | 0x0000 | 0x2189 |
//! | maxim | LSB | 0x8005 | 0x0000 | 0xFFFF | 0x44C2 |
//! | usb | LSB | 0x8005 | 0xFFFF | 0xFFFF | 0xB4C8 |
//!
//! ```
//! use spacelink_frame::crc::{Crc16, CrcPreset};
//!
//! let crc = Crc16::new(CrcPreset::Hdlc);
//! assert_eq!(crc.calculate(b"123456789"), 0x906E);
//! ```

use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{FrameError, Result};

/// Standard check input used by every preset's known-answer value.
pub const CHECK_INPUT: &[u8] = b"123456789";

/// Named CRC-16 parameter sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrcPreset {
    CcittFalse,
    Xmodem,
    Hdlc,
    Kermit,
    Maxim,
    Usb,
}

/// Polynomial, initial value, output xor and bit order of a CRC-16.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrcParams {
    pub polynomial: u16,
    pub initial: u16,
    pub xorout: u16,
    pub lsb_first: bool,
}

impl CrcPreset {
    pub const ALL: [CrcPreset; 6] = [
        CrcPreset::CcittFalse,
        CrcPreset::Xmodem,
        CrcPreset::Hdlc,
        CrcPreset::Kermit,
        CrcPreset::Maxim,
        CrcPreset::Usb,
    ];

    pub const fn params(self) -> CrcParams {
        let (lsb_first, polynomial, initial, xorout) = match self {
            CrcPreset::CcittFalse => (false, 0x1021, 0xFFFF, 0x0000),
            CrcPreset::Xmodem => (false, 0x1021, 0x0000, 0x0000),
            CrcPreset::Hdlc => (true, 0x1021, 0xFFFF, 0xFFFF),
            CrcPreset::Kermit => (true, 0x1021, 0x0000, 0x0000),
            CrcPreset::Maxim => (true, 0x8005, 0x0000, 0xFFFF),
            CrcPreset::Usb => (true, 0x8005, 0xFFFF, 0xFFFF),
        };
        CrcParams {
            polynomial,
            initial,
            xorout,
            lsb_first,
        }
    }

    /// Known-answer value over [`CHECK_INPUT`].
    pub fn check_value(self) -> u16 {
        match self {
            CrcPreset::CcittFalse => 0x29B1,
            CrcPreset::Xmodem => 0x31C3,
            CrcPreset::Hdlc => 0x906E,
            CrcPreset::Kermit => 0x2189,
            CrcPreset::Maxim => 0x44C2,
            CrcPreset::Usb => 0xB4C8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CrcPreset::CcittFalse => "ccitt-false",
            CrcPreset::Xmodem => "xmodem",
            CrcPreset::Hdlc => "hdlc",
            CrcPreset::Kermit => "kermit",
            CrcPreset::Maxim => "maxim",
            CrcPreset::Usb => "usb",
        }
    }
}

impl FromStr for CrcPreset {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        CrcPreset::ALL
            .into_iter()
            .find(|preset| preset.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown crc preset: {s}"))
    }
}

const fn reflect16(mut value: u16) -> u16 {
    let mut out = 0u16;
    let mut i = 0;
    while i < 16 {
        out = (out << 1) | (value & 1);
        value >>= 1;
        i += 1;
    }
    out
}

/// Remainder table for every possible dividend byte.
///
/// LSB-first tables use the bit-reflected polynomial.
pub const fn build_table(polynomial: u16, lsb_first: bool) -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut dividend = 0;
    if lsb_first {
        let poly = reflect16(polynomial);
        while dividend < 256 {
            let mut rem = dividend as u16;
            let mut bit = 0;
            while bit < 8 {
                rem = if rem & 1 != 0 { (rem >> 1) ^ poly } else { rem >> 1 };
                bit += 1;
            }
            table[dividend] = rem;
            dividend += 1;
        }
    } else {
        while dividend < 256 {
            let mut rem = (dividend as u16) << 8;
            let mut bit = 0;
            while bit < 8 {
                rem = if rem & 0x8000 != 0 {
                    (rem << 1) ^ polynomial
                } else {
                    rem << 1
                };
                bit += 1;
            }
            table[dividend] = rem;
            dividend += 1;
        }
    }
    table
}

/// A configured CRC-16 engine.
#[derive(Clone)]
pub struct Crc16 {
    params: CrcParams,
    table: [u16; 256],
}

impl Crc16 {
    pub const fn new(preset: CrcPreset) -> Self {
        Self::with_params(preset.params())
    }

    pub const fn with_params(params: CrcParams) -> Self {
        Self {
            params,
            table: build_table(params.polynomial, params.lsb_first),
        }
    }

    /// Replace the parameters and rebuild the lookup table.
    pub fn configure(&mut self, polynomial: u16, initial: u16, xorout: u16, lsb_first: bool) {
        *self = Self::with_params(CrcParams {
            polynomial,
            initial,
            xorout,
            lsb_first,
        });
    }

    pub fn set_preset(&mut self, preset: CrcPreset) {
        *self = Self::new(preset);
    }

    pub fn params(&self) -> CrcParams {
        self.params
    }

    /// Initial remainder for a streaming calculation.
    pub fn start(&self) -> u16 {
        self.params.initial
    }

    /// Feed `data` into a running remainder.
    pub fn update(&self, mut rem: u16, data: &[u8]) -> u16 {
        if self.params.lsb_first {
            for &byte in data {
                let index = (u16::from(byte) ^ (rem & 0xFF)) as usize;
                rem = self.table[index] ^ (rem >> 8);
            }
        } else {
            for &byte in data {
                let index = (u16::from(byte) ^ (rem >> 8)) as usize;
                rem = self.table[index] ^ (rem << 8);
            }
        }
        rem
    }

    /// Apply the output xor to a running remainder.
    pub fn finish(&self, rem: u16) -> u16 {
        rem ^ self.params.xorout
    }

    /// CRC of a whole buffer.
    pub fn calculate(&self, data: &[u8]) -> u16 {
        self.finish(self.update(self.start(), data))
    }

    /// CRC of a whole file, streamed through `buffer`.
    pub fn calculate_file(&self, path: impl AsRef<Path>, buffer: &mut FileReadBuffer) -> Result<u16> {
        let path = path.as_ref();
        let mut file = File::open(path).map_err(|source| FrameError::FileOpen {
            path: path.to_path_buf(),
            source,
        })?;
        let mut rem = self.start();
        let mut offset = 0u64;
        loop {
            let region = buffer
                .region(&mut file, path, offset)
                .map_err(|source| FrameError::FileRead {
                    path: path.to_path_buf(),
                    source,
                })?;
            if region.is_empty() {
                break;
            }
            rem = self.update(rem, region);
            offset += region.len() as u64;
        }
        Ok(self.finish(rem))
    }
}

impl Default for Crc16 {
    fn default() -> Self {
        Self::new(CrcPreset::CcittFalse)
    }
}

impl std::fmt::Debug for Crc16 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crc16").field("params", &self.params).finish()
    }
}

/// One 8 KiB window over a file, reused across reads.
///
/// Only one region is held at a time. A read that falls inside the
/// current window for the same file is served without touching the disk.
#[derive(Debug)]
pub struct FileReadBuffer {
    data: Vec<u8>,
    len: usize,
    key: Option<PathBuf>,
    offset: u64,
}

impl FileReadBuffer {
    pub const SIZE: usize = 8 * 1024;

    pub fn new() -> Self {
        Self {
            data: vec![0u8; Self::SIZE],
            len: 0,
            key: None,
            offset: 0,
        }
    }

    /// Forget the buffered region, e.g. after the file was rewritten.
    pub fn invalidate(&mut self) {
        self.key = None;
        self.len = 0;
    }

    /// Buffered bytes starting at `offset`, refilling from `file` if needed.
    ///
    /// Returns an empty slice at end of file.
    pub fn region(&mut self, file: &mut File, key: &Path, offset: u64) -> std::io::Result<&[u8]> {
        let hit = self.key.as_deref() == Some(key)
            && offset >= self.offset
            && offset < self.offset + self.len as u64;
        if !hit {
            self.fill(file, key, offset)?;
        }
        let start = (offset - self.offset) as usize;
        Ok(&self.data[start.min(self.len)..self.len])
    }

    /// Copy up to `out.len()` bytes at `offset` into `out`.
    pub fn read_at(
        &mut self,
        file: &mut File,
        key: &Path,
        offset: u64,
        out: &mut [u8],
    ) -> std::io::Result<usize> {
        let mut copied = 0;
        while copied < out.len() {
            let region = self.region(file, key, offset + copied as u64)?;
            if region.is_empty() {
                break;
            }
            let take = region.len().min(out.len() - copied);
            out[copied..copied + take].copy_from_slice(&region[..take]);
            copied += take;
        }
        Ok(copied)
    }

    fn fill(&mut self, file: &mut File, key: &Path, offset: u64) -> std::io::Result<()> {
        self.invalidate();
        file.seek(SeekFrom::Start(offset))?;
        let mut filled = 0;
        while filled < self.data.len() {
            match file.read(&mut self.data[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
        self.len = filled;
        self.offset = offset;
        self.key = Some(key.to_path_buf());
        Ok(())
    }
}

impl Default for FileReadBuffer {
    fn default() -> Self {
        Self::new()
    }
}
