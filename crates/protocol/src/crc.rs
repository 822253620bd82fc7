//! Table-less CRC routines used by both channels.
//!
//! - CRC-16/ARC: polynomial 0xA001 (reflected 0x8005), init 0xFFFF, LSB-first.
//! - CRC-8: polynomial 0x31, init 0xFF, MSB-first.

const CRC16_POLY: u16 = 0xA001;
const CRC8_POLY: u8 = 0x31;

fn crc16_byte(mut crc: u16, byte: u8) -> u16 {
    crc ^= byte as u16;
    for _ in 0..8 {
        if crc & 1 != 0 {
            crc = (crc >> 1) ^ CRC16_POLY;
        } else {
            crc >>= 1;
        }
    }
    crc
}

pub fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(0xFFFF, |crc, &b| crc16_byte(crc, b))
}

/// CRC-16 of `data` as if the two bytes at `field` were zero.
///
/// Both frame formats store their checksum inside the covered range, zeroed
/// during computation.
pub fn crc16_zeroed(data: &[u8], field: usize) -> u16 {
    data.iter().enumerate().fold(0xFFFF, |crc, (i, &b)| {
        let b = if i == field || i == field + 1 { 0 } else { b };
        crc16_byte(crc, b)
    })
}

pub fn crc8(data: &[u8]) -> u8 {
    let mut crc: u8 = 0xFF;
    for &byte in data {
        crc ^= byte;
        for _ in 0..8 {
            if crc & 0x80 != 0 {
                crc = (crc << 1) ^ CRC8_POLY;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_vectors() {
        assert_eq!(crc16(b"123456789"), 0x4B37);
        assert_eq!(crc8(b"123456789"), 0xF7);
    }

    #[test]
    fn test_empty_input_returns_init() {
        assert_eq!(crc16(&[]), 0xFFFF);
        assert_eq!(crc8(&[]), 0xFF);
    }

    #[test]
    fn test_zeroed_field_matches_explicit_copy() {
        let frame = [0xAA, 0xCC, 0x0E, 0x00, 0x08, 0x00, 0x00, 0x8E, 0x53];
        let mut copy = frame;
        copy[7] = 0;
        copy[8] = 0;
        assert_eq!(crc16_zeroed(&frame, 7), crc16(&copy));
        assert_eq!(crc16_zeroed(&frame, 7), 0x538E);
    }
}
