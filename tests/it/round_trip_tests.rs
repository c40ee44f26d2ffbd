use crate::{item, pack_in_memory, read_with_zip_crate};
use quickcheck_macros::quickcheck;
use rstest::rstest;
use std::io::Cursor;
use zippack::{ArchiveReader, CompressionMethod, Encryption, ErrorKind, PackOptions};

fn sample() -> Vec<u8> {
    let mut data = Vec::new();
    for i in 0..2000u32 {
        data.extend_from_slice(format!("line {i}: the quick brown fox\n").as_bytes());
    }
    data
}

#[rstest]
fn test_round_trip(
    #[values(0, 6)] level: u32,
    #[values(None, Some(Encryption::ZipCrypto), Some(Encryption::Aes128), Some(Encryption::Aes256))]
    encryption: Option<Encryption>,
) {
    let password = b"correct horse";
    let mut options = PackOptions::new().level(level);
    if let Some(encryption) = encryption {
        options = options.encryption(encryption, password);
    }

    let content = sample();
    let data = pack_in_memory(vec![item("docs/sample.txt", &content), item("empty.txt", b"")], &options);

    let password = encryption.map(|_| &password[..]);
    let entries = read_with_zip_crate(&data, password);
    assert_eq!(entries[0], ("docs/sample.txt".to_string(), content.clone()));
    assert_eq!(entries[1].0, "empty.txt");

    let reader = ArchiveReader::open(Cursor::new(data)).unwrap();
    let record = reader.find("docs/sample.txt").unwrap().unwrap();
    let expected_method = if level == 0 {
        CompressionMethod::Stored
    } else {
        CompressionMethod::Deflated
    };
    assert_eq!(record.actual_method(), expected_method);
    assert_eq!(record.is_encrypted(), encryption.is_some());
    assert_eq!(reader.read_entry(&record, password).unwrap(), content);

    // Empty files never carry compressed data.
    let empty = reader.find("empty.txt").unwrap().unwrap();
    assert_eq!(empty.actual_method(), CompressionMethod::Stored);
    assert!(reader.read_entry(&empty, password).unwrap().is_empty());
}

#[rstest]
#[case(Encryption::ZipCrypto)]
#[case(Encryption::Aes256)]
fn test_wrong_password_is_rejected(#[case] encryption: Encryption) {
    let options = PackOptions::new().encryption(encryption, "right");
    let data = pack_in_memory(vec![item("secret.txt", &sample())], &options);

    let reader = ArchiveReader::open(Cursor::new(data)).unwrap();
    let record = reader.find("secret.txt").unwrap().unwrap();
    let err = reader.read_entry(&record, Some(b"wrong")).unwrap_err();
    // A ZipCrypto check byte matches a wrong password one time in 256, which
    // then surfaces as a corrupt entry instead.
    if encryption != Encryption::ZipCrypto {
        assert!(matches!(err.kind(), ErrorKind::Password));
    }
}

#[test]
fn test_directories_are_stored_with_trailing_slash() {
    let data = pack_in_memory(
        vec![
            zippack::SourceItem::directory("photos", crate::stamp(), true),
            item("photos/a.jpg", b"jpeg"),
        ],
        &PackOptions::new(),
    );
    let archive = zip::ZipArchive::new(Cursor::new(data)).unwrap();
    let names: Vec<&str> = archive.file_names().collect();
    assert!(names.contains(&"photos/"));
    assert!(names.contains(&"photos/a.jpg"));
}

#[quickcheck]
fn test_read_what_we_pack(data: Vec<u8>, level: u8) -> bool {
    let options = PackOptions::new().level(u32::from(level % 10));
    let archive = pack_in_memory(vec![item("file.bin", &data)], &options);
    let reader = ArchiveReader::open(Cursor::new(archive)).unwrap();
    let record = reader.find("file.bin").unwrap().unwrap();
    record.size == data.len() as u64 && reader.read_entry(&record, None).unwrap() == data
}
