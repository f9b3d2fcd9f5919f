//! Address types for physical and virtual memory.
//!
//! User programs see 32-bit virtual addresses starting at zero; physical addresses index the
//! simulated main memory, one [`PAGE_SIZE`](crate::PAGE_SIZE) frame after another.

use core::fmt;
use core::ops::{Add, Sub};

use crate::{FrameNumber, PAGE_SIZE, PageNumber};

/// Macro to define common address type functionality.
///
/// Generates the newtype and the methods shared by physical and virtual addresses.
macro_rules! impl_address_common {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        #[repr(transparent)]
        pub struct $name(usize);

        impl $name {
            /// Creates a new address.
            #[inline]
            pub const fn new(addr: usize) -> Self {
                Self(addr)
            }

            /// Returns the raw address value.
            #[inline]
            pub const fn as_usize(self) -> usize {
                self.0
            }

            /// Returns the byte offset of this address within its page or frame.
            #[inline]
            pub const fn page_offset(self) -> usize {
                self.0 % PAGE_SIZE
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:#x})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#x}", self.0)
            }
        }

        impl From<usize> for $name {
            #[inline]
            fn from(addr: usize) -> Self {
                Self::new(addr)
            }
        }

        impl From<u32> for $name {
            #[inline]
            fn from(addr: u32) -> Self {
                Self::new(addr as usize)
            }
        }

        impl Add<usize> for $name {
            type Output = Self;

            #[inline]
            fn add(self, rhs: usize) -> Self::Output {
                Self(self.0 + rhs)
            }
        }

        impl Sub<$name> for $name {
            type Output = usize;

            #[inline]
            fn sub(self, rhs: $name) -> Self::Output {
                self.0 - rhs.0
            }
        }
    };
}

impl_address_common!(
    PhysicalAddress,
    "A physical memory address.\n\n\
     Offsets into main memory; frame `n` covers `n * PAGE_SIZE .. (n + 1) * PAGE_SIZE`."
);

impl PhysicalAddress {
    /// Returns the frame containing this address.
    #[inline]
    pub const fn frame_number(self) -> FrameNumber {
        FrameNumber::new(self.0 / PAGE_SIZE)
    }
}

impl_address_common!(
    VirtualAddress,
    "A user virtual address.\n\n\
     Virtual addresses are relative to the start of an address space; page `n` covers\n\
     `n * PAGE_SIZE .. (n + 1) * PAGE_SIZE`."
);

impl VirtualAddress {
    /// Returns the page containing this address.
    #[inline]
    pub const fn page_number(self) -> PageNumber {
        PageNumber::new(self.0 / PAGE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_virtual_address() {
        let addr = VirtualAddress::new(PAGE_SIZE * 3 + 17);
        assert_eq!(addr.page_number(), PageNumber::new(3));
        assert_eq!(addr.page_offset(), 17);
    }

    #[test]
    fn splits_physical_address() {
        let addr = PhysicalAddress::new(PAGE_SIZE * 7);
        assert_eq!(addr.frame_number(), FrameNumber::new(7));
        assert_eq!(addr.page_offset(), 0);
    }

    #[test]
    fn formats_as_hex() {
        assert_eq!(format!("{}", VirtualAddress::new(0x80)), "0x80");
        assert_eq!(
            format!("{:?}", PhysicalAddress::new(0x100)),
            "PhysicalAddress(0x100)"
        );
    }
}
