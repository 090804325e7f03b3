//! Frame checksum algorithms for binary recognizers
//!
//! Supports: Sum-16 (default), Sum-8, XOR, CRC-16 (CCITT, Modbus).
//! The checksum always occupies the tail of the frame, big-endian, and covers
//! every byte before it (tag included).

use serde::{Deserialize, Serialize};

/// Checksum algorithm types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecksumType {
    /// Sum of unsigned bytes mod 65536
    #[default]
    Sum16,
    /// Sum of unsigned bytes mod 256
    Sum8,
    /// XOR of all bytes
    Xor,
    /// CRC-16 CCITT (polynomial 0x1021, init 0xFFFF)
    Crc16Ccitt,
    /// CRC-16 Modbus (polynomial 0x8005, init 0xFFFF, reflect)
    Crc16Modbus,
}

impl ChecksumType {
    /// Get name of checksum type
    pub fn name(&self) -> &'static str {
        match self {
            ChecksumType::Sum16 => "Sum-16",
            ChecksumType::Sum8 => "Sum-8",
            ChecksumType::Xor => "XOR",
            ChecksumType::Crc16Ccitt => "CRC-16/CCITT",
            ChecksumType::Crc16Modbus => "CRC-16/Modbus",
        }
    }

    /// Trailer size in bytes
    pub fn size(&self) -> usize {
        match self {
            ChecksumType::Sum8 | ChecksumType::Xor => 1,
            ChecksumType::Sum16 | ChecksumType::Crc16Ccitt | ChecksumType::Crc16Modbus => 2,
        }
    }

    /// Compute the checksum over `data`
    pub fn compute(&self, data: &[u8]) -> u16 {
        match self {
            ChecksumType::Sum16 => sum16_checksum(data),
            ChecksumType::Sum8 => u16::from(sum8_checksum(data)),
            ChecksumType::Xor => u16::from(xor_checksum(data)),
            ChecksumType::Crc16Ccitt => crc16_ccitt(data),
            ChecksumType::Crc16Modbus => crc16_modbus(data),
        }
    }

    /// Check a complete frame whose trailer holds the big-endian checksum.
    ///
    /// Frames shorter than the trailer never verify.
    pub fn verify_frame(&self, frame: &[u8]) -> bool {
        let width = self.size();
        if frame.len() <= width {
            return false;
        }
        let (body, trailer) = frame.split_at(frame.len() - width);
        let expected = trailer.iter().fold(0u16, |acc, &b| (acc << 8) | u16::from(b));
        self.compute(body) == expected
    }

    /// Append the checksum of `frame` as a big-endian trailer
    pub fn seal(&self, frame: &mut Vec<u8>) {
        let value = self.compute(frame);
        match self.size() {
            1 => frame.push(value as u8),
            _ => frame.extend_from_slice(&value.to_be_bytes()),
        }
    }
}

/// XOR checksum - XOR of all bytes
pub fn xor_checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc ^ b)
}

/// Simple 8-bit sum
pub fn sum8_checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Simple 16-bit sum
pub fn sum16_checksum(data: &[u8]) -> u16 {
    data.iter().fold(0u16, |acc, &b| acc.wrapping_add(u16::from(b)))
}

/// CRC-16/CCITT (Kermit)
/// Polynomial: 0x1021, Init: 0xFFFF, RefIn: false, RefOut: false
pub fn crc16_ccitt(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;

    for &byte in data {
        crc ^= u16::from(byte) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }

    crc
}

/// CRC-16/Modbus
/// Polynomial: 0x8005, Init: 0xFFFF, RefIn: true, RefOut: true, XorOut: 0x0000
pub fn crc16_modbus(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;

    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }

    crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sum16_wraps() {
        let data = vec![0xFFu8; 300];
        assert_eq!(sum16_checksum(&data), ((300u32 * 0xFF) % 65536) as u16);
    }

    #[test]
    fn test_crc16_modbus() {
        // Test vector: "123456789" should give 0x4B37
        assert_eq!(crc16_modbus(b"123456789"), 0x4B37);
    }

    #[test]
    fn test_crc16_ccitt() {
        // CRC-16/CCITT-FALSE check value
        assert_eq!(crc16_ccitt(b"123456789"), 0x29B1);
    }

    #[test]
    fn test_verify_frame() {
        let mut frame = vec![0xCB, 0x01, 0x02, 0x03];
        ChecksumType::Sum16.seal(&mut frame);
        assert_eq!(&frame[4..], &[0x00, 0xD1]);
        assert!(ChecksumType::Sum16.verify_frame(&frame));

        frame[2] ^= 0x40;
        assert!(!ChecksumType::Sum16.verify_frame(&frame));
        assert!(!ChecksumType::Sum16.verify_frame(&[0x01, 0x02]));
    }

    #[test]
    fn test_one_byte_trailer() {
        let mut frame = vec![0x10, 0x20, 0x30];
        ChecksumType::Xor.seal(&mut frame);
        assert_eq!(frame.len(), 4);
        assert!(ChecksumType::Xor.verify_frame(&frame));
    }
}
