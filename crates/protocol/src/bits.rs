//! Bit-addressable reads and writes over a byte buffer.
//!
//! Offsets and widths are in bits. Bit 0 is the least significant bit of the
//! first byte and fields grow towards higher bits and later bytes, so a 16-bit
//! field at a byte boundary reads as a little-endian `u16`.
//!
//! ```
//! use protocol::bits::Bits;
//!
//! let mut buf = [0u8; 4];
//! Bits::new(&mut buf[..]).set_bits(8, 0xBEEF, 16).unwrap();
//! assert_eq!(buf, [0x00, 0xEF, 0xBE, 0x00]);
//!
//! let bits = Bits::new(&buf[..]);
//! assert_eq!(bits.get_unsigned(8, 16).unwrap(), 0xBEEF);
//! assert_eq!(bits.get_signed(8, 16).unwrap(), 0xBEEFu16 as i16 as i64);
//! ```

use crate::error::BitsError;

/// Bit view over any byte container.
#[derive(Debug, Clone, Copy)]
pub struct Bits<B> {
    buf: B,
}

impl<B> Bits<B> {
    pub fn new(buf: B) -> Self {
        Self { buf }
    }
}

fn check_range(len_bytes: usize, offset: usize, size: usize) -> Result<(), BitsError> {
    if size == 0 || size > 64 {
        return Err(BitsError::InvalidWidth(size));
    }
    let len_bits = len_bytes * 8;
    match offset.checked_add(size) {
        Some(end) if end <= len_bits => Ok(()),
        _ => Err(BitsError::OutOfBounds {
            offset,
            size,
            len_bits,
        }),
    }
}

impl<B: AsRef<[u8]>> Bits<B> {
    pub fn len_bits(&self) -> usize {
        self.buf.as_ref().len() * 8
    }

    /// Reads `size` bits at `offset` as an unsigned value.
    pub fn get_unsigned(&self, offset: usize, size: usize) -> Result<u64, BitsError> {
        let bytes = self.buf.as_ref();
        check_range(bytes.len(), offset, size)?;

        let mut value = 0u64;
        let mut done = 0;
        while done < size {
            let pos = offset + done;
            let shift = pos % 8;
            // Take as many bits as remain in the current byte
            let take = (8 - shift).min(size - done);
            let chunk = (bytes[pos / 8] >> shift) as u64 & ((1u64 << take) - 1);
            value |= chunk << done;
            done += take;
        }
        Ok(value)
    }

    /// Reads `size` bits at `offset` and sign-extends from bit `size - 1`.
    pub fn get_signed(&self, offset: usize, size: usize) -> Result<i64, BitsError> {
        let raw = self.get_unsigned(offset, size)?;
        if size < 64 && raw & (1u64 << (size - 1)) != 0 {
            Ok((raw | (u64::MAX << size)) as i64)
        } else {
            Ok(raw as i64)
        }
    }
}

impl<B: AsMut<[u8]>> Bits<B> {
    /// Writes the low `size` bits of `value` at `offset`. Bits outside the
    /// field are left untouched.
    pub fn set_bits(&mut self, offset: usize, value: u64, size: usize) -> Result<(), BitsError> {
        let bytes = self.buf.as_mut();
        check_range(bytes.len(), offset, size)?;

        let mut done = 0;
        while done < size {
            let pos = offset + done;
            let shift = pos % 8;
            let take = (8 - shift).min(size - done);
            let mask = (((1u16 << take) - 1) as u8) << shift;
            let chunk = (((value >> done) as u8) << shift) & mask;
            let byte = &mut bytes[pos / 8];
            *byte = (*byte & !mask) | chunk;
            done += take;
        }
        Ok(())
    }
}
