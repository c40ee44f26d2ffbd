//! Listing and verifying archives.

use crate::central_dir::CentralDirectoryStore;
use crate::cipher::{check_value, AesDecryptor, AesStrength, ZipCryptoKeys, AUTHENTICATION_CODE_LEN, ZIPCRYPTO_HEADER_SIZE};
use crate::codec::Decompressor;
use crate::crc::Crc32;
use crate::errors::{Error, ErrorKind};
use crate::host::{Host, PasswordDecision};
use crate::locator::{ArchiveTail, ZipLocator};
use crate::reader_at::{ReaderAt, ReaderAtExt};
use crate::records::{CompressionMethod, FileRecord, LocalHeaderFixed, LOCAL_HEADER_SIZE};
use std::io::{Read, Seek};

const AES_VENDOR_AE2: u16 = 2;

/// A read-only view of an archive.
#[derive(Debug)]
pub struct ArchiveReader<R> {
    reader: R,
    tail: ArchiveTail,
    store: CentralDirectoryStore,
}

impl<R: ReaderAt + Seek> ArchiveReader<R> {
    pub fn open(mut reader: R) -> Result<Self, Error> {
        let mut buffer = vec![0u8; 64 * 1024];
        let tail = ZipLocator::new().locate_in_reader(&mut reader, &mut buffer)?;
        if tail.is_multi_disk() {
            return Err(Error::unsupported("multi-disk archives can only be read volume by volume"));
        }
        let store = CentralDirectoryStore::load(&reader, &tail)?;
        Ok(ArchiveReader { reader, tail, store })
    }
}

impl<R: ReaderAt> ArchiveReader<R> {
    pub fn tail(&self) -> &ArchiveTail {
        &self.tail
    }

    pub fn comment(&self) -> &[u8] {
        &self.tail.comment
    }

    pub fn entries(&self) -> Result<Vec<FileRecord>, Error> {
        self.store.to_vec()
    }

    pub fn find(&self, name: &str) -> Result<Option<FileRecord>, Error> {
        self.store.find(name, true)
    }

    /// Reads, decrypts and decompresses one entry, checking its CRC and, for
    /// AES, its authentication code.
    pub fn read_entry(&self, record: &FileRecord, password: Option<&[u8]>) -> Result<Vec<u8>, Error> {
        let header_position = self.tail.base_offset + record.local_header_offset;
        let fixed = self.reader.read_vec_at(LOCAL_HEADER_SIZE as u64, header_position)?;
        let header = LocalHeaderFixed::parse(&fixed)?;
        let data_position = header_position + header.total_len();
        let mut data = self.reader.read_vec_at(record.compressed_size, data_position)?;

        let mut payload = &mut data[..];
        if record.is_encrypted() {
            let password = password.ok_or(ErrorKind::Password)?;
            payload = decrypt(record, payload, password)?;
        }

        let mut plain = Vec::new();
        plain.try_reserve(usize::try_from(record.size).map_err(|_| ErrorKind::LowMemory)?)?;
        Decompressor::new(record.actual_method(), &*payload)?.read_to_end(&mut plain)?;

        if plain.len() as u64 != record.size {
            return Err(Error::from(ErrorKind::CorruptRecord {
                position: header_position,
            }));
        }

        let skip_crc = matches!(record.aes, Some(aes) if aes.vendor_version == AES_VENDOR_AE2);
        if !skip_crc {
            let mut crc = Crc32::new();
            crc.update(&plain);
            if crc.value() != record.crc {
                return Err(Error::from(ErrorKind::InvalidChecksum {
                    expected: record.crc,
                    actual: crc.value(),
                }));
            }
        }
        Ok(plain)
    }

    /// Reads every entry, asking the host for passwords as needed.
    pub fn verify(&self, host: &dyn Host) -> Result<VerifyReport, Error> {
        let mut report = VerifyReport::default();
        let mut sticky_password: Option<Vec<u8>> = None;
        let mut skip_encrypted = false;

        for record in self.store.records() {
            let record = record?;
            if record.is_dir() {
                continue;
            }

            let mut password = None;
            if record.is_encrypted() {
                if skip_encrypted {
                    report.skipped.push(record.name);
                    continue;
                }
                password = match sticky_password.clone() {
                    Some(password) => Some(password),
                    None => match host.password(&record.name) {
                        PasswordDecision::Ok(password) => Some(password),
                        PasswordDecision::All(password) => {
                            sticky_password = Some(password.clone());
                            Some(password)
                        }
                        PasswordDecision::Skip => None,
                        PasswordDecision::SkipAll => {
                            skip_encrypted = true;
                            None
                        }
                        PasswordDecision::Cancel => return Err(Error::cancelled()),
                    },
                };
                if password.is_none() {
                    report.skipped.push(record.name);
                    continue;
                }
            }

            match self.read_entry(&record, password.as_deref()) {
                Ok(_) => report.ok += 1,
                Err(e) => {
                    log::warn!("{} failed verification: {}", record.name, e);
                    report.failed.push((record.name, e));
                }
            }
        }
        Ok(report)
    }
}

fn decrypt<'a>(record: &FileRecord, data: &'a mut [u8], password: &[u8]) -> Result<&'a mut [u8], Error> {
    match record.aes {
        Some(aes) if record.method == CompressionMethod::Aes => {
            let strength = AesStrength::from_code(aes.strength)
                .ok_or_else(|| Error::unsupported(format!("unknown AES strength {}", aes.strength)))?;
            let header_len = strength.header_len();
            if data.len() < header_len + AUTHENTICATION_CODE_LEN {
                return Err(Error::from(ErrorKind::Eof));
            }
            let (header, rest) = data.split_at_mut(header_len);
            let (payload, code) = rest.split_at_mut(rest.len() - AUTHENTICATION_CODE_LEN);
            let mut decryptor = AesDecryptor::new(password, header, strength)?;
            decryptor.decrypt(payload);
            decryptor.verify(code)?;
            Ok(payload)
        }
        _ => {
            if data.len() < ZIPCRYPTO_HEADER_SIZE {
                return Err(Error::from(ErrorKind::Eof));
            }
            let (header, payload) = data.split_at_mut(ZIPCRYPTO_HEADER_SIZE);
            let mut keys = ZipCryptoKeys::new(password);
            let mut fixed = [0u8; ZIPCRYPTO_HEADER_SIZE];
            fixed.copy_from_slice(header);
            let (time, _) = record.modified.into_parts();
            let check = check_value(record.crc, time, record.has_data_descriptor());
            if !keys.verify_header(fixed, check) {
                return Err(Error::from(ErrorKind::Password));
            }
            keys.decrypt(payload);
            Ok(payload)
        }
    }
}

/// The outcome of [`ArchiveReader::verify`].
#[derive(Debug, Default)]
pub struct VerifyReport {
    pub ok: u64,
    /// Encrypted entries the host chose not to unlock.
    pub skipped: Vec<String>,
    pub failed: Vec<(String, Error)>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}
