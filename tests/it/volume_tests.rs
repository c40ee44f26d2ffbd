use crate::{item, read_with_zip_crate};
use rstest::rstest;
use std::io::Cursor;
use zippack::volume::{MemoryVolumes, VolumeManager};
use zippack::{
    ArchiveReader, ArchiveUpdater, ArchiveWriter, CentralDirectoryStore, Encryption, ErrorKind, FinalizeReason,
    ItemList, PackOptions, PackOutcome, SeekableSink, SourceItem, Unattended, VolumeNaming, VolumeOptions,
};

fn noise(len: usize, seed: u32) -> Vec<u8> {
    let mut state = seed.wrapping_mul(2654435761).max(1);
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state as u8
        })
        .collect()
}

#[test]
fn test_local_headers_never_split() {
    let items: Vec<SourceItem> = [700usize, 10, 2000, 0, 300, 1019, 5]
        .iter()
        .enumerate()
        .map(|(i, &len)| item(&format!("file{i}.bin"), &noise(len, i as u32)))
        .collect();

    let host = Unattended;
    let mut manager = VolumeManager::new(MemoryVolumes::new(), VolumeOptions::fixed(1024), &host);
    manager.start().unwrap();

    let mut store = CentralDirectoryStore::new();
    let mut writer = ArchiveWriter::new(&mut manager, &host).level(6);
    for item in &items {
        match writer.pack_one(&item.name, item).unwrap() {
            PackOutcome::Written(record) => store.append_record(&record).unwrap(),
            PackOutcome::Skipped => panic!("{} was skipped", item.name),
        }
    }
    let end = writer
        .finalize_archive(&store, b"", FinalizeReason::Normal)
        .unwrap();
    let volumes = manager.finish().unwrap();
    let volumes = volumes.volumes();

    assert!(volumes.len() >= 4);
    assert!(volumes.iter().all(|v| v.len() <= 1024));
    assert_eq!(end.disk as usize, volumes.len() - 1);

    for record in store.to_vec().unwrap() {
        let volume = volumes[record.start_disk as usize];
        let at = record.local_header_offset as usize;
        let header_len = 30 + record.name.len();
        assert!(at + header_len <= volume.len(), "{} header split", record.name);
        assert_eq!(&volume[at..at + 4], &0x04034b50u32.to_le_bytes());
        assert_eq!(&volume[at + 30..at + header_len], record.name.as_bytes());
        assert_eq!(record.has_data_descriptor(), record.size > 0);
    }

    // The end record sits at the very end of the last volume.
    let last = volumes[volumes.len() - 1];
    let eocd = &last[last.len() - 22..];
    assert_eq!(&eocd[..4], &0x06054b50u32.to_le_bytes());
    assert_eq!(u16::from_le_bytes([eocd[4], eocd[5]]) as u32, end.disk);
    assert_eq!(u16::from_le_bytes([eocd[10], eocd[11]]), items.len() as u16);
}

#[rstest]
#[case(VolumeNaming::Sequential, &["span01.zip", "span02.zip", "span03.zip"])]
#[case(VolumeNaming::WinZip, &["span.z01", "span.z02", "span.zip"])]
fn test_spanned_files_on_disk(#[case] naming: VolumeNaming, #[case] expected: &[&str]) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("span.zip");

    let mut volumes = VolumeOptions::fixed(1024);
    volumes.naming = naming;
    let options = PackOptions::new().level(0).volumes(volumes);
    let summary = ArchiveUpdater::new(&path, options, &Unattended)
        .pack(&mut ItemList::new([item("big.bin", &noise(2200, 7))]))
        .unwrap();
    assert_eq!(summary.added, 1);

    let mut names: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, expected);

    let first = std::fs::read(dir.path().join(expected[0])).unwrap();
    assert_eq!(&first[..4], &0x08074b50u32.to_le_bytes());
}

#[test]
fn test_spanning_refuses_existing_archive() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("existing.zip");
    ArchiveUpdater::new(&path, PackOptions::new(), &Unattended)
        .pack(&mut ItemList::new([item("a.txt", b"a")]))
        .unwrap();

    let options = PackOptions::new().volumes(VolumeOptions::fixed(4096));
    let err = ArchiveUpdater::new(&path, options, &Unattended)
        .pack(&mut ItemList::new([item("b.txt", b"b")]))
        .unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Unsupported { .. }));
}

/// Follows an entry through the volumes. Units must sit inside a single
/// volume while data runs on into the next one.
struct Walk<'a> {
    volumes: &'a [&'a [u8]],
    disk: usize,
    pos: usize,
}

impl Walk<'_> {
    fn next_if_full(&mut self) {
        if self.pos == self.volumes[self.disk].len() {
            self.disk += 1;
            self.pos = 0;
        }
    }

    fn unit(&mut self, len: usize) -> Vec<u8> {
        self.next_if_full();
        let volume = self.volumes[self.disk];
        assert!(
            self.pos + len <= volume.len(),
            "{len} byte unit at {}:{} crosses into the next volume",
            self.disk,
            self.pos
        );
        self.pos += len;
        volume[self.pos - len..self.pos].to_vec()
    }

    fn data(&mut self, mut len: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(len);
        while len > 0 {
            self.next_if_full();
            let volume = self.volumes[self.disk];
            let take = len.min(volume.len() - self.pos);
            out.extend_from_slice(&volume[self.pos..self.pos + take]);
            self.pos += take;
            len -= take;
        }
        out
    }
}

#[rstest]
#[case(Encryption::ZipCrypto)]
#[case(Encryption::Aes128)]
#[case(Encryption::Aes256)]
fn test_encrypted_units_never_split(#[case] encryption: Encryption) {
    let password = b"span secret";
    let expected: Vec<(String, Vec<u8>)> = [700usize, 10, 2000, 300, 1019, 5, 990]
        .iter()
        .enumerate()
        .map(|(i, &len)| (format!("file{i}.bin"), noise(len, 100 + i as u32)))
        .collect();
    let items: Vec<SourceItem> = expected.iter().map(|(name, data)| item(name, data)).collect();

    let host = Unattended;
    let mut manager = VolumeManager::new(MemoryVolumes::new(), VolumeOptions::fixed(1024), &host);
    manager.start().unwrap();
    let mut store = CentralDirectoryStore::new();
    let mut writer = ArchiveWriter::new(&mut manager, &host)
        .level(6)
        .encryption(Some((encryption, password.to_vec())));
    for item in &items {
        match writer.pack_one(&item.name, item).unwrap() {
            PackOutcome::Written(record) => store.append_record(&record).unwrap(),
            PackOutcome::Skipped => panic!("{} was skipped", item.name),
        }
    }
    writer
        .finalize_archive(&store, b"", FinalizeReason::Normal)
        .unwrap();
    let volumes = manager.finish().unwrap();
    let volumes = volumes.volumes();
    assert!(volumes.len() >= 5);

    // Lay the entries out back to back to get a single-disk archive.
    let mut image = Vec::new();
    let mut joined = CentralDirectoryStore::new();
    for record in store.to_vec().unwrap() {
        assert!(record.is_encrypted());
        assert!(record.has_data_descriptor());

        let volume = volumes[record.start_disk as usize];
        let at = record.local_header_offset as usize;
        let name_len = u16::from_le_bytes([volume[at + 26], volume[at + 27]]) as usize;
        let extra_len = u16::from_le_bytes([volume[at + 28], volume[at + 29]]) as usize;

        let mut walk = Walk {
            volumes: &volumes,
            disk: record.start_disk as usize,
            pos: at,
        };
        let header = walk.unit(30 + name_len + extra_len);
        assert_eq!(&header[..4], &0x04034b50u32.to_le_bytes());
        let cipher_header = walk.unit(encryption.header_len());
        let data_len = record.compressed_size as usize - encryption.header_len() - encryption.trailer_len();
        let data = walk.data(data_len);
        let trailer = walk.data(encryption.trailer_len());
        let descriptor = walk.unit(16);
        assert_eq!(&descriptor[..4], &0x08074b50u32.to_le_bytes());

        let mut moved = record.clone();
        moved.start_disk = 0;
        moved.local_header_offset = image.len() as u64;
        joined.append_record(&moved).unwrap();
        for part in [header, cipher_header, data, trailer, descriptor] {
            image.extend_from_slice(&part);
        }
    }

    let position = image.len() as u64;
    let mut writer = ArchiveWriter::new(SeekableSink::new(Cursor::new(image), 0, position).unwrap(), &host);
    writer
        .finalize_archive(&joined, b"", FinalizeReason::Normal)
        .unwrap();
    let image = writer.into_sink().into_inner().into_inner();

    assert_eq!(read_with_zip_crate(&image, Some(password)), expected);

    let reader = ArchiveReader::open(Cursor::new(image)).unwrap();
    for (name, content) in &expected {
        let record = reader.find(name).unwrap().unwrap();
        assert_eq!(&reader.read_entry(&record, Some(password)).unwrap(), content);
    }
}
