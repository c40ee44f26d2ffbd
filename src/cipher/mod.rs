//! Entry encryption.
//!
//! Both ciphers are pure byte transforms. The writer feeds them compressed
//! bytes and writes whatever header and trailer they hand back.

mod winzip_aes;
mod zipcrypto;

pub use winzip_aes::{AesDecryptor, AesEncryptor, AesStrength, AUTHENTICATION_CODE_LEN};
pub use zipcrypto::{ZipCryptoKeys, ZIPCRYPTO_HEADER_SIZE};
pub(crate) use zipcrypto::check_value;

use crate::errors::Error;

/// Which cipher protects newly written entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encryption {
    ZipCrypto,
    Aes128,
    Aes256,
}

impl Encryption {
    pub(crate) fn aes_strength(self) -> Option<AesStrength> {
        match self {
            Encryption::ZipCrypto => None,
            Encryption::Aes128 => Some(AesStrength::Aes128),
            Encryption::Aes256 => Some(AesStrength::Aes256),
        }
    }

    /// Bytes the cipher adds in front of the data.
    pub fn header_len(self) -> usize {
        match self.aes_strength() {
            Some(strength) => strength.header_len(),
            None => ZIPCRYPTO_HEADER_SIZE,
        }
    }

    /// Bytes the cipher adds after the data.
    pub fn trailer_len(self) -> usize {
        match self {
            Encryption::ZipCrypto => 0,
            _ => AUTHENTICATION_CODE_LEN,
        }
    }
}

/// The live cipher state for the entry being written.
#[derive(Debug, Clone)]
pub(crate) enum EncryptionContext {
    ZipCrypto(ZipCryptoKeys),
    Aes(AesEncryptor),
}

impl EncryptionContext {
    /// Initializes the cipher for one entry and returns the encryption
    /// header that must precede the data. `check` is only used by ZipCrypto.
    pub(crate) fn start(
        encryption: Encryption,
        password: &[u8],
        check: u16,
    ) -> Result<(Self, Vec<u8>), Error> {
        match encryption.aes_strength() {
            Some(strength) => {
                let (encryptor, header) = AesEncryptor::new(password, strength)?;
                Ok((EncryptionContext::Aes(encryptor), header))
            }
            None => {
                let mut keys = ZipCryptoKeys::new(password);
                let header = keys.encryption_header(check);
                Ok((EncryptionContext::ZipCrypto(keys), header.to_vec()))
            }
        }
    }

    pub(crate) fn encrypt(&mut self, data: &mut [u8]) {
        match self {
            EncryptionContext::ZipCrypto(keys) => keys.encrypt(data),
            EncryptionContext::Aes(encryptor) => encryptor.encrypt(data),
        }
    }

    /// Ends the stream, returning the trailer to write after the data.
    pub(crate) fn finish(self) -> Vec<u8> {
        match self {
            EncryptionContext::ZipCrypto(_) => Vec::new(),
            EncryptionContext::Aes(encryptor) => encryptor.finish().to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Encryption::ZipCrypto, 12, 0)]
    #[case(Encryption::Aes128, 10, 10)]
    #[case(Encryption::Aes256, 18, 10)]
    fn test_overhead(#[case] encryption: Encryption, #[case] header: usize, #[case] trailer: usize) {
        let (mut ctx, written) = EncryptionContext::start(encryption, b"pw", 0x1234).unwrap();
        assert_eq!(written.len(), header);
        assert_eq!(encryption.header_len(), header);
        let mut data = *b"abc";
        ctx.encrypt(&mut data);
        assert_eq!(ctx.finish().len(), trailer);
        assert_eq!(encryption.trailer_len(), trailer);
    }
}
