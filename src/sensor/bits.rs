//! # Bit Access Primitive
//!
//! Single-bit test/set/clear/toggle and multi-bit field extraction at an
//! arbitrary offset, for unsigned register-sized integers.
//!
//! Every bit-level decode in the crate goes through this module: the TMP117
//! status/configuration register, the RuuviTag RAWv2 power field and the
//! sign bit of the Eddystone-URL temperature byte.
//!
//! Offsets are counted from the least significant bit (offset 0). An offset
//! outside the integer's width is reported as [`BitError::OffsetOutOfRange`]
//! instead of silently wrapping like a raw shift would.
//!
//! ```
//! use tracker_link::sensor::bits::BitField;
//!
//! let reg: u16 = 0b1100_0000_0000_0000;
//! assert!(reg.test_bit(15).unwrap());
//! assert_eq!(reg.clear_bit(15).unwrap(), 0b0100_0000_0000_0000);
//! assert_eq!(0x0ACFu16.field(5, 11).unwrap(), 0x56);
//! ```

use thiserror::Error;

/// Bit access errors
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BitError {
    /// Offset (or offset + width) does not fit in the integer
    #[error("Bit range {offset}..{end} out of range for {bits}-bit value")]
    OffsetOutOfRange { offset: u32, end: u32, bits: u32 },
}

/// Bit-level accessors for unsigned integers.
pub trait BitField: Copy + Sized {
    /// Width of the integer in bits.
    const BITS: u32;

    /// Returns `true` if the bit at `offset` is one.
    fn test_bit(self, offset: u32) -> Result<bool, BitError>;

    /// Returns the value with the bit at `offset` set to one.
    fn set_bit(self, offset: u32) -> Result<Self, BitError>;

    /// Returns the value with the bit at `offset` cleared.
    fn clear_bit(self, offset: u32) -> Result<Self, BitError>;

    /// Returns the value with the bit at `offset` inverted.
    fn toggle_bit(self, offset: u32) -> Result<Self, BitError>;

    /// Returns the value with the bit at `offset` forced to `on`.
    fn write_bit(self, offset: u32, on: bool) -> Result<Self, BitError> {
        if on {
            self.set_bit(offset)
        } else {
            self.clear_bit(offset)
        }
    }

    /// Extracts `width` bits starting at `offset`, shifted down to bit 0.
    fn field(self, offset: u32, width: u32) -> Result<Self, BitError>;

    /// Returns the value with `width` bits at `offset` replaced by `value`.
    ///
    /// Bits of `value` above `width` are ignored.
    fn with_field(self, offset: u32, width: u32, value: Self) -> Result<Self, BitError>;
}

fn check_range(offset: u32, width: u32, bits: u32) -> Result<(), BitError> {
    let end = offset.saturating_add(width);
    if width == 0 || end > bits {
        return Err(BitError::OffsetOutOfRange { offset, end, bits });
    }
    Ok(())
}

macro_rules! impl_bit_field {
    ($($t:ty),*) => {$(
        impl BitField for $t {
            const BITS: u32 = <$t>::BITS;

            fn test_bit(self, offset: u32) -> Result<bool, BitError> {
                check_range(offset, 1, Self::BITS)?;
                Ok((self >> offset) & 1 == 1)
            }

            fn set_bit(self, offset: u32) -> Result<Self, BitError> {
                check_range(offset, 1, Self::BITS)?;
                Ok(self | (1 << offset))
            }

            fn clear_bit(self, offset: u32) -> Result<Self, BitError> {
                check_range(offset, 1, Self::BITS)?;
                Ok(self & !(1 << offset))
            }

            fn toggle_bit(self, offset: u32) -> Result<Self, BitError> {
                check_range(offset, 1, Self::BITS)?;
                Ok(self ^ (1 << offset))
            }

            fn field(self, offset: u32, width: u32) -> Result<Self, BitError> {
                check_range(offset, width, Self::BITS)?;
                let mask = <$t>::MAX >> (Self::BITS - width);
                Ok((self >> offset) & mask)
            }

            fn with_field(self, offset: u32, width: u32, value: Self) -> Result<Self, BitError> {
                check_range(offset, width, Self::BITS)?;
                let mask = <$t>::MAX >> (Self::BITS - width);
                Ok((self & !(mask << offset)) | ((value & mask) << offset))
            }
        }
    )*};
}

impl_bit_field!(u8, u16, u32);
