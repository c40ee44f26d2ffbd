use crate::crc::crc_step;
use rand::RngCore;

/// Length of the encryption header that precedes every ZipCrypto stream.
pub const ZIPCRYPTO_HEADER_SIZE: usize = 12;

/// The traditional PKWARE stream cipher state.
#[derive(Clone, PartialEq, Eq)]
pub struct ZipCryptoKeys {
    k0: u32,
    k1: u32,
    k2: u32,
}

impl std::fmt::Debug for ZipCryptoKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ZipCryptoKeys { .. }")
    }
}

impl ZipCryptoKeys {
    pub fn new(password: &[u8]) -> Self {
        let mut keys = ZipCryptoKeys {
            k0: 0x12345678,
            k1: 0x23456789,
            k2: 0x34567890,
        };

        for &byte in password {
            keys.update(byte);
        }

        keys
    }

    fn update(&mut self, byte: u8) {
        self.k0 = crc_step(self.k0, byte);
        self.k1 = self
            .k1
            .wrapping_add(self.k0 & 0xff)
            .wrapping_mul(134775813)
            .wrapping_add(1);
        self.k2 = crc_step(self.k2, (self.k1 >> 24) as u8);
    }

    fn stream_byte(&self) -> u8 {
        let t = (self.k2 | 2) & 0xffff;
        (t.wrapping_mul(t ^ 1) >> 8) as u8
    }

    pub fn encrypt_byte(&mut self, plain: u8) -> u8 {
        let t = self.stream_byte();
        self.update(plain);
        t ^ plain
    }

    pub fn decrypt_byte(&mut self, cipher: u8) -> u8 {
        let plain = cipher ^ self.stream_byte();
        self.update(plain);
        plain
    }

    pub fn encrypt(&mut self, data: &mut [u8]) {
        for byte in data {
            *byte = self.encrypt_byte(*byte);
        }
    }

    pub fn decrypt(&mut self, data: &mut [u8]) {
        for byte in data {
            *byte = self.decrypt_byte(*byte);
        }
    }

    /// Produces the encrypted 12 byte header: random filler followed by the
    /// two check bytes, little-endian.
    pub(crate) fn encryption_header(&mut self, check: u16) -> [u8; ZIPCRYPTO_HEADER_SIZE] {
        let mut header = [0u8; ZIPCRYPTO_HEADER_SIZE];
        rand::thread_rng().fill_bytes(&mut header[..10]);
        header[10..].copy_from_slice(&check.to_le_bytes());
        self.encrypt(&mut header);
        header
    }

    /// Decrypts a header and compares its last byte against the expected
    /// check byte. Only one byte is compared, as most writers fill the other
    /// with noise.
    pub(crate) fn verify_header(&mut self, mut header: [u8; ZIPCRYPTO_HEADER_SIZE], check: u16) -> bool {
        self.decrypt(&mut header);
        header[11] == (check >> 8) as u8
    }
}

/// Picks the value whose high byte authenticates the password.
///
/// Entries written with a trailing data descriptor do not know their CRC
/// when the header is written, so the DOS time stands in for it.
pub(crate) fn check_value(crc: u32, dos_time: u16, has_data_descriptor: bool) -> u16 {
    if has_data_descriptor {
        dos_time
    } else {
        (crc >> 16) as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[test]
    fn test_initial_keys() {
        let keys = ZipCryptoKeys::new(b"");
        assert_eq!(
            keys,
            ZipCryptoKeys {
                k0: 0x12345678,
                k1: 0x23456789,
                k2: 0x34567890
            }
        );
    }

    #[test]
    fn test_header_verification() {
        let mut writer = ZipCryptoKeys::new(b"secret");
        let header = writer.encryption_header(0xBEEF);

        let mut reader = ZipCryptoKeys::new(b"secret");
        assert!(reader.verify_header(header, 0xBEEF));

        // The keystream continues in sync after the header
        let mut data = *b"payload";
        writer.encrypt(&mut data);
        reader.decrypt(&mut data);
        assert_eq!(&data, b"payload");
    }

    #[test]
    fn test_check_value_source() {
        assert_eq!(check_value(0xAABB_CCDD, 0x1234, false), 0xAABB);
        assert_eq!(check_value(0xAABB_CCDD, 0x1234, true), 0x1234);
    }

    #[quickcheck]
    fn test_decrypt_inverts_encrypt(password: Vec<u8>, data: Vec<u8>) -> bool {
        let mut buf = data.clone();
        ZipCryptoKeys::new(&password).encrypt(&mut buf);
        ZipCryptoKeys::new(&password).decrypt(&mut buf);
        buf == data
    }
}
