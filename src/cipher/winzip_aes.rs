use ::aes::cipher::{BlockEncrypt, KeyInit};
use ::aes::{Aes128, Aes192, Aes256, Block};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha1::Sha1;

use crate::errors::{Error, ErrorKind};

const KEY_DERIVATION_ITERATIONS: u32 = 1000;

/// Length of the password verification value following the salt.
pub const PASSWORD_VERIFIER_LEN: usize = 2;

/// Length of the truncated HMAC-SHA1 trailing the ciphertext.
pub const AUTHENTICATION_CODE_LEN: usize = 10;

/// The WinZip AES key size, as stored in the AES extra field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AesStrength {
    Aes128,
    Aes192,
    Aes256,
}

impl AesStrength {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(AesStrength::Aes128),
            2 => Some(AesStrength::Aes192),
            3 => Some(AesStrength::Aes256),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            AesStrength::Aes128 => 1,
            AesStrength::Aes192 => 2,
            AesStrength::Aes256 => 3,
        }
    }

    pub fn key_len(self) -> usize {
        match self {
            AesStrength::Aes128 => 16,
            AesStrength::Aes192 => 24,
            AesStrength::Aes256 => 32,
        }
    }

    pub fn salt_len(self) -> usize {
        self.key_len() / 2
    }

    /// Bytes written before the ciphertext: salt plus verifier.
    pub fn header_len(self) -> usize {
        self.salt_len() + PASSWORD_VERIFIER_LEN
    }
}

#[derive(Clone)]
enum BlockCipher {
    Aes128(Aes128),
    Aes192(Aes192),
    Aes256(Aes256),
}

impl BlockCipher {
    fn new(strength: AesStrength, key: &[u8]) -> Result<Self, Error> {
        let invalid = |_| Error::invalid_input("invalid AES key length");
        Ok(match strength {
            AesStrength::Aes128 => BlockCipher::Aes128(<Aes128 as KeyInit>::new_from_slice(key).map_err(invalid)?),
            AesStrength::Aes192 => BlockCipher::Aes192(<Aes192 as KeyInit>::new_from_slice(key).map_err(invalid)?),
            AesStrength::Aes256 => BlockCipher::Aes256(<Aes256 as KeyInit>::new_from_slice(key).map_err(invalid)?),
        })
    }

    fn encrypt_block(&self, block: &mut Block) {
        match self {
            BlockCipher::Aes128(c) => c.encrypt_block(block),
            BlockCipher::Aes192(c) => c.encrypt_block(block),
            BlockCipher::Aes256(c) => c.encrypt_block(block),
        }
    }
}

/// AES in counter mode with the little-endian counter WinZip uses, starting
/// at one.
#[derive(Clone)]
struct AesCtr {
    cipher: BlockCipher,
    counter: u128,
    keystream: [u8; 16],
    keystream_pos: usize,
}

impl AesCtr {
    fn new(cipher: BlockCipher) -> Self {
        AesCtr {
            cipher,
            counter: 1,
            keystream: [0u8; 16],
            keystream_pos: 16,
        }
    }

    fn process(&mut self, data: &mut [u8]) {
        for byte in data.iter_mut() {
            if self.keystream_pos == self.keystream.len() {
                let mut block = Block::clone_from_slice(&self.counter.to_le_bytes());
                self.cipher.encrypt_block(&mut block);
                self.keystream.copy_from_slice(&block);
                self.keystream_pos = 0;
                self.counter = self.counter.wrapping_add(1);
            }
            *byte ^= self.keystream[self.keystream_pos];
            self.keystream_pos += 1;
        }
    }
}

struct DerivedKeys {
    cipher: BlockCipher,
    mac: Hmac<Sha1>,
    verifier: [u8; PASSWORD_VERIFIER_LEN],
}

fn derive_keys(password: &[u8], salt: &[u8], strength: AesStrength) -> Result<DerivedKeys, Error> {
    let key_len = strength.key_len();
    let mut derived = vec![0u8; key_len * 2 + PASSWORD_VERIFIER_LEN];
    pbkdf2::pbkdf2_hmac::<Sha1>(password, salt, KEY_DERIVATION_ITERATIONS, &mut derived);

    let cipher = BlockCipher::new(strength, &derived[..key_len])?;
    let mac = <Hmac<Sha1> as Mac>::new_from_slice(&derived[key_len..key_len * 2])
        .map_err(|_| Error::invalid_input("invalid HMAC key length"))?;
    let verifier = [derived[key_len * 2], derived[key_len * 2 + 1]];
    Ok(DerivedKeys {
        cipher,
        mac,
        verifier,
    })
}

/// Encrypts one entry's compressed stream.
#[derive(Clone)]
pub struct AesEncryptor {
    ctr: AesCtr,
    mac: Hmac<Sha1>,
}

impl std::fmt::Debug for AesEncryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AesEncryptor { .. }")
    }
}

impl AesEncryptor {
    /// Generates a fresh salt and returns the encryptor together with the
    /// header (salt and password verifier) to write before the ciphertext.
    pub fn new(password: &[u8], strength: AesStrength) -> Result<(Self, Vec<u8>), Error> {
        let mut header = vec![0u8; strength.header_len()];
        rand::thread_rng().fill_bytes(&mut header[..strength.salt_len()]);
        let keys = derive_keys(password, &header[..strength.salt_len()], strength)?;
        header[strength.salt_len()..].copy_from_slice(&keys.verifier);

        let encryptor = AesEncryptor {
            ctr: AesCtr::new(keys.cipher),
            mac: keys.mac,
        };
        Ok((encryptor, header))
    }

    pub fn encrypt(&mut self, data: &mut [u8]) {
        self.ctr.process(data);
        self.mac.update(data);
    }

    /// The authentication code appended after the ciphertext.
    pub fn finish(self) -> [u8; AUTHENTICATION_CODE_LEN] {
        let full = self.mac.finalize().into_bytes();
        let mut code = [0u8; AUTHENTICATION_CODE_LEN];
        code.copy_from_slice(&full[..AUTHENTICATION_CODE_LEN]);
        code
    }
}

/// Decrypts and authenticates one entry's stream.
pub struct AesDecryptor {
    ctr: AesCtr,
    mac: Hmac<Sha1>,
}

impl AesDecryptor {
    /// Verifies the password against the header. A mismatch is
    /// [`ErrorKind::Password`].
    pub fn new(password: &[u8], header: &[u8], strength: AesStrength) -> Result<Self, Error> {
        if header.len() != strength.header_len() {
            return Err(Error::from(ErrorKind::Eof));
        }

        let (salt, verifier) = header.split_at(strength.salt_len());
        let keys = derive_keys(password, salt, strength)?;
        if keys.verifier != verifier {
            return Err(Error::from(ErrorKind::Password));
        }

        Ok(AesDecryptor {
            ctr: AesCtr::new(keys.cipher),
            mac: keys.mac,
        })
    }

    pub fn decrypt(&mut self, data: &mut [u8]) {
        self.mac.update(data);
        self.ctr.process(data);
    }

    /// Compares the computed authentication code with the stored one.
    pub fn verify(self, code: &[u8]) -> Result<(), Error> {
        let full = self.mac.finalize().into_bytes();
        if code.len() != AUTHENTICATION_CODE_LEN || full[..AUTHENTICATION_CODE_LEN] != *code {
            return Err(Error::from(ErrorKind::Password));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(AesStrength::Aes128, 8)]
    #[case(AesStrength::Aes192, 12)]
    #[case(AesStrength::Aes256, 16)]
    fn test_salt_lengths(#[case] strength: AesStrength, #[case] salt: usize) {
        assert_eq!(strength.salt_len(), salt);
        assert_eq!(AesStrength::from_code(strength.code()), Some(strength));
    }

    #[rstest]
    #[case(AesStrength::Aes128)]
    #[case(AesStrength::Aes256)]
    fn test_encrypt_decrypt(#[case] strength: AesStrength) {
        let plain = b"The quick brown fox jumps over the lazy dog, twice over.".to_vec();
        let (mut encryptor, header) = AesEncryptor::new(b"hunter2", strength).unwrap();
        let mut data = plain.clone();
        encryptor.encrypt(&mut data[..10]);
        encryptor.encrypt(&mut data[10..]);
        assert_ne!(data, plain);
        let code = encryptor.finish();

        let mut decryptor = AesDecryptor::new(b"hunter2", &header, strength).unwrap();
        decryptor.decrypt(&mut data);
        assert_eq!(data, plain);
        decryptor.verify(&code).unwrap();
    }

    #[test]
    fn test_wrong_password() {
        let (_, header) = AesEncryptor::new(b"right", AesStrength::Aes256).unwrap();
        // A two byte verifier collides once in 65536 tries; pick passwords
        // until one is rejected.
        let rejected = (0..4u8).any(|i| {
            let password = [b'w', b'r', b'o', b'n', b'g', i];
            matches!(
                AesDecryptor::new(&password, &header, AesStrength::Aes256)
                    .err()
                    .map(|e| e.category()),
                Some(crate::ErrorCategory::Password)
            )
        });
        assert!(rejected);
    }

    #[test]
    fn test_counter_is_little_endian_from_one() {
        // With an all-zero key the first keystream block is AES(1 as LE).
        let key = [0u8; 16];
        let mut ctr = AesCtr::new(BlockCipher::new(AesStrength::Aes128, &key).unwrap());
        let mut data = [0u8; 16];
        ctr.process(&mut data);

        let mut expected = Block::clone_from_slice(&1u128.to_le_bytes());
        <Aes128 as KeyInit>::new_from_slice(&key)
            .unwrap()
            .encrypt_block(&mut expected);
        assert_eq!(&data[..], &expected[..]);
    }
}
