use std::io::{Cursor, Read};
use zippack::{
    ArchiveSession, DosDateTime, FinalizeReason, ItemList, Matcher, PackOptions, PackSummary, SourceItem,
    Unattended,
};

mod round_trip_tests;
mod sfx_tests;
mod update_tests;
mod volume_tests;
mod zip64_tests;

pub(crate) fn stamp() -> DosDateTime {
    DosDateTime::from_components(2024, 3, 14, 15, 9, 26)
}

pub(crate) fn item(name: &str, data: &[u8]) -> SourceItem {
    SourceItem::from_bytes(name, data.to_vec(), stamp())
}

/// Packs `items` into a fresh in-memory archive.
pub(crate) fn pack_in_memory(items: Vec<SourceItem>, options: &PackOptions) -> Vec<u8> {
    pack_onto(Vec::new(), items, options)
}

/// Packs `items` into the archive held in `data`, which may be empty.
pub(crate) fn pack_onto(data: Vec<u8>, items: Vec<SourceItem>, options: &PackOptions) -> Vec<u8> {
    let mut session = ArchiveSession::open(Cursor::new(data)).unwrap();
    let plan = Matcher::new(session.store(), options, &Unattended)
        .unwrap()
        .plan(&mut ItemList::new(items))
        .unwrap();
    let mut summary = PackSummary::default();
    session.apply(&plan, options, &Unattended, &mut summary).unwrap();
    session.write_directory(&Unattended, FinalizeReason::Normal).unwrap();
    session.into_storage().into_inner()
}

/// Reads every file entry with the `zip` crate.
pub(crate) fn read_with_zip_crate(data: &[u8], password: Option<&[u8]>) -> Vec<(String, Vec<u8>)> {
    let mut archive = zip::ZipArchive::new(Cursor::new(data)).unwrap();
    let mut entries = Vec::new();
    for i in 0..archive.len() {
        let mut file = match password {
            Some(password) => archive.by_index_decrypt(i, password).unwrap(),
            None => archive.by_index(i).unwrap(),
        };
        if file.is_dir() {
            continue;
        }
        let mut content = Vec::new();
        file.read_to_end(&mut content).unwrap();
        entries.push((file.name().to_string(), content));
    }
    entries
}

/// Checks that a local header with the record's name sits at every
/// recorded offset.
pub(crate) fn assert_offsets_point_at_headers(data: &[u8], base: u64) {
    let session = ArchiveSession::open(Cursor::new(data.to_vec())).unwrap();
    for record in session.store().to_vec().unwrap() {
        let at = (base + record.local_header_offset) as usize;
        assert_eq!(&data[at..at + 4], &0x04034b50u32.to_le_bytes(), "{}", record.name);
        let name_len = u16::from_le_bytes([data[at + 26], data[at + 27]]) as usize;
        assert_eq!(&data[at + 30..at + 30 + name_len], record.name.as_bytes());
    }
}
