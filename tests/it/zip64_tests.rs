use crate::{item, pack_in_memory};
use rstest::rstest;
use std::io::Cursor;
use zippack::sfx::read_header;
use zippack::{
    ArchiveReader, ArchiveUpdater, ErrorKind, ItemList, PackOptions, SelfExtractorBuilder, SfxSettings, SourceItem,
    Unattended,
};

const ZIP64_EOCD_SIGNATURE: u32 = 0x06064b50;
const ZIP64_EOCD_LOCATOR_SIGNATURE: u32 = 0x07064b50;

fn contains_zip64_signatures(data: &[u8]) -> bool {
    let eocd = ZIP64_EOCD_SIGNATURE.to_le_bytes();
    let locator = ZIP64_EOCD_LOCATOR_SIGNATURE.to_le_bytes();
    data.windows(4).any(|w| w == eocd) && data.windows(4).any(|w| w == locator)
}

#[rstest]
#[case(65534, false)]
#[case(65535, true)]
#[case(65536, true)]
fn test_zip64_threshold_entries(#[case] entry_count: usize, #[case] should_be_zip64: bool) {
    let items: Vec<SourceItem> = (0..entry_count)
        .map(|i| item(&format!("file_{i:05}.txt"), b"x"))
        .collect();
    let data = pack_in_memory(items, &PackOptions::new().level(0));

    // Only the tail can hold the Zip64 end records.
    let tail = &data[data.len().saturating_sub(200)..];
    assert_eq!(contains_zip64_signatures(tail), should_be_zip64);

    let reader = ArchiveReader::open(Cursor::new(data.clone())).unwrap();
    assert_eq!(reader.tail().total_entries, entry_count as u64);
    assert_eq!(reader.tail().is_zip64, should_be_zip64);
    assert_eq!(reader.entries().unwrap().len(), entry_count);

    let archive = zip::ZipArchive::new(Cursor::new(data)).unwrap();
    assert_eq!(archive.len(), entry_count);
}

#[rstest]
#[case(65534, true)]
#[case(65535, false)]
fn test_self_extractor_entry_limit(#[case] entry_count: usize, #[case] fits: bool) {
    let items = || -> Vec<SourceItem> {
        (0..entry_count)
            .map(|i| item(&format!("f{i:05}"), b""))
            .collect()
    };
    let builder = SelfExtractorBuilder::new(b"MZ stub".to_vec(), SfxSettings::default()).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("setup.exe");
    let result = ArchiveUpdater::new(&path, PackOptions::new(), &Unattended)
        .pack_self_extractor(&mut ItemList::new(items()), &builder);

    let archive = pack_in_memory(items(), &PackOptions::new());
    let wrapped = builder.build(Cursor::new(archive), Vec::new());

    if !fits {
        let err = result.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Unsupported { .. }));
        assert!(!path.exists());
        let err = wrapped.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Unsupported { .. }));
        return;
    }

    assert_eq!(result.unwrap().total_entries, entry_count as u64);
    assert!(wrapped.is_ok());

    let data = std::fs::read(&path).unwrap();
    assert!(!contains_zip64_signatures(&data[data.len() - 200..]));
    let payload_start = builder.archive_data_offset() as usize;
    let header = read_header(&data, builder.stub_len()).unwrap();
    assert_eq!(header.archive_size as usize, data.len() - payload_start);
    let eocd = payload_start + header.eocd_offset as usize;
    assert_eq!(&data[eocd..eocd + 4], &0x06054b50u32.to_le_bytes());
    assert_eq!(eocd + 22, data.len());
}
