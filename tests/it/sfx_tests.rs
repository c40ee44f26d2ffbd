use crate::{item, pack_in_memory, read_with_zip_crate};
use std::fs::File;
use std::io::Cursor;
use zippack::sfx::{read_header, SfxPackage, StubVariant, SFX_FLAG_AUTO, SFX_FLAG_REMOVE_AFTER};
use zippack::{
    ArchiveReader, ArchiveUpdater, Encryption, ErrorKind, ItemList, PackOptions, SelfExtractorBuilder, SfxSettings,
    Unattended,
};

const STUB: &[u8] = b"MZ\x90\x00 pretend this is an extractor executable";

fn builder(settings: SfxSettings) -> SelfExtractorBuilder {
    SelfExtractorBuilder::new(STUB.to_vec(), settings).unwrap()
}

#[test]
fn test_empty_source_archive_writes_nothing() {
    let mut out = Vec::new();
    let err = builder(SfxSettings::default())
        .build(Cursor::new(Vec::<u8>::new()), &mut out)
        .unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::EmptyArchive));
    assert!(out.is_empty());

    // An archive without entries is just as empty.
    let empty = pack_in_memory(Vec::new(), &PackOptions::new());
    let err = builder(SfxSettings::default())
        .build(Cursor::new(empty), &mut out)
        .unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::EmptyArchive));
    assert!(out.is_empty());
}

#[test]
fn test_wrap_existing_archive() {
    let archive = pack_in_memory(
        vec![item("setup/readme.txt", b"read me first"), item("setup/app.bin", &[7u8; 4096])],
        &PackOptions::new(),
    );

    let settings = SfxSettings {
        title: "Setup".to_string(),
        target_dir: "$(Temp)\\setup".to_string(),
        flags: SFX_FLAG_AUTO | SFX_FLAG_REMOVE_AFTER,
        ..SfxSettings::default()
    };
    let builder = builder(settings);
    let mut out = Vec::new();
    let layout = builder.build(Cursor::new(archive.clone()), &mut out).unwrap();

    assert!(out.starts_with(STUB));
    assert_eq!(layout.archive_data_offset, builder.archive_data_offset());
    assert_eq!(layout.archive_size, archive.len() as u64);
    assert_eq!(&out[layout.archive_data_offset as usize..], &archive[..]);

    let header = read_header(&out, layout.header_offset).unwrap();
    assert_eq!(header.archive_size as u64, layout.archive_size);
    assert_eq!(header.eocd_offset as u64, archive.len() as u64 - 22);
    assert_ne!(header.flags & SFX_FLAG_REMOVE_AFTER, 0);

    let reader = ArchiveReader::open(Cursor::new(out.clone())).unwrap();
    assert_eq!(reader.tail().base_offset, layout.archive_data_offset);
    let readme = reader.find("setup/readme.txt").unwrap().unwrap();
    assert_eq!(reader.read_entry(&readme, None).unwrap(), b"read me first");

    // Stripping the prefix leaves the original archive.
    let stripped = &out[layout.archive_data_offset as usize..];
    assert_eq!(read_with_zip_crate(stripped, None).len(), 2);
}

#[test]
fn test_aes_archives_are_incompatible() {
    let options = PackOptions::new().encryption(Encryption::Aes256, "pw");
    let archive = pack_in_memory(vec![item("a.txt", b"secret")], &options);
    let err = builder(SfxSettings::default())
        .build(Cursor::new(archive), Vec::new())
        .unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Unsupported { .. }));
}

#[test]
fn test_pack_directly_into_self_extractor() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("setup.exe");
    let builder = builder(SfxSettings::default());

    let summary = ArchiveUpdater::new(&path, PackOptions::new(), &Unattended)
        .pack_self_extractor(
            &mut ItemList::new([item("a.txt", b"alpha"), item("b.txt", b"bravo")]),
            &builder,
        )
        .unwrap();
    assert_eq!(summary.total_entries, 2);

    let data = std::fs::read(&path).unwrap();
    assert!(data.starts_with(STUB));
    let payload_start = builder.archive_data_offset();
    let header = read_header(&data, builder.stub_len()).unwrap();
    assert_eq!(header.archive_size as u64, data.len() as u64 - payload_start);
    assert_eq!(header.eocd_offset as u64, header.archive_size as u64 - 22);

    let reader = ArchiveReader::open(File::open(&path).unwrap()).unwrap();
    assert_eq!(reader.tail().base_offset, payload_start);
    let report = reader.verify(&Unattended).unwrap();
    assert_eq!(report.ok, 2);
}

#[test]
fn test_pack_self_extractor_without_entries() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nothing.exe");
    let err = ArchiveUpdater::new(&path, PackOptions::new(), &Unattended)
        .pack_self_extractor(&mut ItemList::default(), &builder(SfxSettings::default()))
        .unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::EmptyArchive));
    assert!(!path.exists());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn test_stub_package_selects_variant() {
    let small = b"small extractor".repeat(20);
    let big = b"big extractor with decryption support".repeat(20);
    let package = SfxPackage::build(&small, &big).unwrap();
    let package = SfxPackage::parse(package).unwrap();

    let settings = SfxSettings::default();
    let plain = StubVariant::for_archive(false, &settings);
    let encrypted = StubVariant::for_archive(true, &settings);
    assert_eq!(package.stub(plain).unwrap(), small);
    assert_eq!(package.stub(encrypted).unwrap(), big);
}
