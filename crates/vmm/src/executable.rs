//! NOFF executable images.
//!
//! A NOFF file starts with a fixed 40-byte header: the magic word followed by three segment
//! descriptors (code, initialized data, uninitialized data). Every field is a 32-bit
//! little-endian word. Images produced on a machine of the other endianness are accepted by
//! byte-swapping the header when only the swapped magic matches.

use alloc::vec;
use alloc::vec::Vec;

use thiserror::Error;

use crate::VirtualAddress;

/// Magic word identifying a NOFF image.
pub const NOFF_MAGIC: u32 = 0x00BA_DFAD;

/// Number of 32-bit words in a NOFF header.
const HEADER_WORDS: usize = 10;

/// Errors produced while decoding a NOFF header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ImageError {
    /// Fewer bytes than a full header.
    #[error("image truncated: {0} bytes is smaller than the NOFF header")]
    Truncated(usize),
    /// Neither the raw nor the byte-swapped magic matched.
    #[error("bad magic {0:#010x}")]
    BadMagic(u32),
}

/// A segment descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Segment {
    /// Where the segment starts in the address space.
    pub virtual_addr: u32,
    /// Where the segment's bytes start in the executable file.
    pub in_file_addr: u32,
    /// Segment size in bytes.
    pub size: u32,
}

impl Segment {
    /// Creates a segment descriptor.
    pub const fn new(virtual_addr: u32, in_file_addr: u32, size: u32) -> Self {
        Self {
            virtual_addr,
            in_file_addr,
            size,
        }
    }

    /// Returns the first virtual address of the segment.
    pub fn start(&self) -> VirtualAddress {
        VirtualAddress::from(self.virtual_addr)
    }

    /// Returns the virtual address one past the end of the segment.
    pub fn end(&self) -> VirtualAddress {
        self.start() + self.size as usize
    }

    fn swapped(self) -> Self {
        Self {
            virtual_addr: self.virtual_addr.swap_bytes(),
            in_file_addr: self.in_file_addr.swap_bytes(),
            size: self.size.swap_bytes(),
        }
    }
}

/// The decoded NOFF header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoffHeader {
    /// Executable code.
    pub code: Segment,
    /// Initialized data.
    pub init_data: Segment,
    /// Uninitialized data; never present in the file.
    pub uninit_data: Segment,
}

impl NoffHeader {
    /// Size of the encoded header in bytes.
    pub const SIZE: usize = HEADER_WORDS * 4;

    /// Decodes the header at the start of `bytes`.
    pub fn parse(bytes: &[u8]) -> Result<Self, ImageError> {
        if bytes.len() < Self::SIZE {
            return Err(ImageError::Truncated(bytes.len()));
        }

        let word = |index: usize| {
            let at = index * 4;
            u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
        };
        let segment = |first: usize| Segment::new(word(first), word(first + 1), word(first + 2));

        let magic = word(0);
        let header = Self {
            code: segment(1),
            init_data: segment(4),
            uninit_data: segment(7),
        };

        if magic == NOFF_MAGIC {
            Ok(header)
        } else if magic.swap_bytes() == NOFF_MAGIC {
            log::debug!("NOFF header is byte-swapped, converting");
            Ok(header.swapped())
        } else {
            Err(ImageError::BadMagic(magic))
        }
    }

    /// Encodes the header as little-endian words.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        self.encode(u32::to_le_bytes)
    }

    /// Encodes the header as big-endian words, as a foreign-endian toolchain would.
    pub fn to_be_bytes(&self) -> [u8; Self::SIZE] {
        self.encode(u32::to_be_bytes)
    }

    fn encode(&self, to_bytes: fn(u32) -> [u8; 4]) -> [u8; Self::SIZE] {
        let words = [
            NOFF_MAGIC,
            self.code.virtual_addr,
            self.code.in_file_addr,
            self.code.size,
            self.init_data.virtual_addr,
            self.init_data.in_file_addr,
            self.init_data.size,
            self.uninit_data.virtual_addr,
            self.uninit_data.in_file_addr,
            self.uninit_data.size,
        ];
        let mut out = [0u8; Self::SIZE];
        for (chunk, word) in out.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&to_bytes(word));
        }
        out
    }

    /// Returns the number of bytes the program needs in memory, stack included.
    pub fn memory_size(&self, stack_size: usize) -> usize {
        self.code.size as usize
            + self.init_data.size as usize
            + self.uninit_data.size as usize
            + stack_size
    }

    fn swapped(self) -> Self {
        Self {
            code: self.code.swapped(),
            init_data: self.init_data.swapped(),
            uninit_data: self.uninit_data.swapped(),
        }
    }
}

/// Builds NOFF images with the usual layout: header, then code, then initialized data, with
/// the segments placed back to back in the address space starting at zero.
#[derive(Debug, Clone, Default)]
pub struct ImageBuilder {
    code: Vec<u8>,
    data: Vec<u8>,
    bss_size: usize,
    big_endian: bool,
}

impl ImageBuilder {
    /// Creates a builder for an empty program.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the code segment contents.
    pub fn code(mut self, code: &[u8]) -> Self {
        self.code = code.to_vec();
        self
    }

    /// Sets the initialized data segment contents.
    pub fn data(mut self, data: &[u8]) -> Self {
        self.data = data.to_vec();
        self
    }

    /// Sets the size of the uninitialized data segment.
    pub fn bss(mut self, size: usize) -> Self {
        self.bss_size = size;
        self
    }

    /// Emits the header in big-endian byte order.
    pub fn big_endian(mut self, big_endian: bool) -> Self {
        self.big_endian = big_endian;
        self
    }

    /// Returns the header describing the image.
    pub fn header(&self) -> NoffHeader {
        let code_size = self.code.len() as u32;
        let data_size = self.data.len() as u32;
        let file_code = NoffHeader::SIZE as u32;
        NoffHeader {
            code: Segment::new(0, file_code, code_size),
            init_data: Segment::new(code_size, file_code + code_size, data_size),
            uninit_data: Segment::new(code_size + data_size, 0, self.bss_size as u32),
        }
    }

    /// Produces the encoded image.
    pub fn build(&self) -> Vec<u8> {
        let header = self.header();
        let mut image = vec![];
        if self.big_endian {
            image.extend_from_slice(&header.to_be_bytes());
        } else {
            image.extend_from_slice(&header.to_bytes());
        }
        image.extend_from_slice(&self.code);
        image.extend_from_slice(&self.data);
        image
    }
}
