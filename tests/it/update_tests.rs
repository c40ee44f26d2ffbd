use crate::{assert_offsets_point_at_headers, item, pack_in_memory, pack_onto, read_with_zip_crate};
use std::fs::File;
use std::io::Cursor;
use zippack::{
    ArchiveReader, ArchiveSession, ArchiveUpdater, DosDateTime, ErrorKind, FsEnumerator, ItemList, PackOptions,
    SourceItem, Unattended,
};

fn entry_names(path: &std::path::Path) -> Vec<String> {
    let reader = ArchiveReader::open(File::open(path).unwrap()).unwrap();
    reader.entries().unwrap().into_iter().map(|r| r.name).collect()
}

#[test]
fn test_add_then_delete_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scenario.zip");

    let stored = PackOptions::new().level(0);
    ArchiveUpdater::new(&path, stored, &Unattended)
        .pack(&mut ItemList::new([item("a.txt", b"0123456789")]))
        .unwrap();

    let text = "all work and no play makes jack a dull boy\n".repeat(40);
    let summary = ArchiveUpdater::new(&path, PackOptions::new(), &Unattended)
        .pack(&mut ItemList::new([item("b.txt", text.as_bytes())]))
        .unwrap();
    assert_eq!(summary.added, 1);
    assert_eq!(summary.total_entries, 2);

    let summary = ArchiveUpdater::new(&path, PackOptions::new(), &Unattended)
        .delete(&["a.txt"])
        .unwrap();
    assert_eq!(summary.deleted, 1);
    assert_eq!(summary.total_entries, 1);

    let data = std::fs::read(&path).unwrap();
    assert_eq!(
        read_with_zip_crate(&data, None),
        vec![("b.txt".to_string(), text.into_bytes())]
    );
    assert_offsets_point_at_headers(&data, 0);
}

#[test]
fn test_overwrite_is_idempotent() {
    let overwrite = PackOptions::new().overwrite_all(true);
    let first = pack_in_memory(vec![item("a.txt", b"alpha alpha alpha"), item("b.txt", b"beta")], &overwrite);
    let second = pack_onto(first.clone(), vec![item("a.txt", b"alpha alpha alpha")], &overwrite);

    let before = ArchiveSession::open(Cursor::new(first)).unwrap();
    let after = ArchiveSession::open(Cursor::new(second.clone())).unwrap();
    assert_eq!(after.store().len(), 2);

    let mut old = before.store().find("a.txt", true).unwrap().unwrap();
    let new = after.store().find("a.txt", true).unwrap().unwrap();
    assert_ne!(old.local_header_offset, new.local_header_offset);
    old.local_header_offset = new.local_header_offset;
    assert_eq!(old, new);

    let b = after.store().find("b.txt", true).unwrap().unwrap();
    assert_eq!(b.local_header_offset, 0);
    assert_offsets_point_at_headers(&second, 0);
}

#[test]
fn test_existing_entries_are_kept_without_consent() {
    let data = pack_in_memory(vec![item("a.txt", b"old")], &PackOptions::new());
    let data = pack_onto(data, vec![item("a.txt", b"new"), item("c.txt", b"c")], &PackOptions::new());
    let entries = read_with_zip_crate(&data, None);
    assert_eq!(
        entries,
        vec![
            ("a.txt".to_string(), b"old".to_vec()),
            ("c.txt".to_string(), b"c".to_vec())
        ]
    );
}

#[test]
fn test_deletion_keeps_offsets_consistent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("many.zip");
    let items: Vec<SourceItem> = (0..20)
        .map(|i| item(&format!("dir{}/file{i}.txt", i % 3), format!("content {i}").repeat(i + 1).as_bytes()))
        .collect();
    ArchiveUpdater::new(&path, PackOptions::new(), &Unattended)
        .pack(&mut ItemList::new(items))
        .unwrap();

    let summary = ArchiveUpdater::new(&path, PackOptions::new().backup(false), &Unattended)
        .delete(&["dir1", "dir0/file3.txt"])
        .unwrap();
    assert_eq!(summary.deleted, 7 + 1);
    assert_eq!(summary.total_entries, 12);

    let data = std::fs::read(&path).unwrap();
    assert_offsets_point_at_headers(&data, 0);

    let reader = ArchiveReader::open(Cursor::new(data.clone())).unwrap();
    let report = reader.verify(&Unattended).unwrap();
    assert_eq!(report.ok, 12);
    assert!(report.is_clean());

    // Compaction leaves no gap between the data and the directory.
    let tail = reader.tail();
    let records = reader.entries().unwrap();
    let last = records.iter().max_by_key(|r| r.local_header_offset).unwrap();
    let end_of_last = last.local_header_offset + 30 + last.name.len() as u64 + last.compressed_size;
    assert_eq!(tail.cd_offset, end_of_last);
}

#[test]
fn test_set_comment() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("commented.zip");
    ArchiveUpdater::new(&path, PackOptions::new().comment("first"), &Unattended)
        .pack(&mut ItemList::new([item("a.txt", b"a")]))
        .unwrap();

    let updater = ArchiveUpdater::new(&path, PackOptions::new(), &Unattended);
    updater.set_comment("second comment").unwrap();
    let reader = ArchiveReader::open(File::open(&path).unwrap()).unwrap();
    assert_eq!(reader.comment(), b"second comment");

    let err = updater.set_comment(vec![b'x'; 70_000]).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::InvalidInput { .. }));

    let data = std::fs::read(&path).unwrap();
    let archive = zip::ZipArchive::new(Cursor::new(data)).unwrap();
    assert_eq!(archive.comment(), b"second comment");
}

#[test]
fn test_time_is_set_to_newest_entry() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dated.zip");
    let newest = DosDateTime::from_components(2021, 6, 30, 8, 15, 42);
    let items = [
        SourceItem::from_bytes("old.txt", b"1".to_vec(), DosDateTime::MIN),
        SourceItem::from_bytes("new.txt", b"2".to_vec(), newest),
    ];
    ArchiveUpdater::new(&path, PackOptions::new().time_to_newest(true), &Unattended)
        .pack(&mut ItemList::new(items))
        .unwrap();

    let modified = std::fs::metadata(&path).unwrap().modified().unwrap();
    assert_eq!(modified, newest.to_system_time());
}

#[test]
fn test_move_removes_sources() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("outbox");
    std::fs::create_dir_all(source.join("nested")).unwrap();
    std::fs::write(source.join("one.txt"), b"one").unwrap();
    std::fs::write(source.join("nested/two.txt"), b"two").unwrap();

    let path = dir.path().join("moved.zip");
    let summary = ArchiveUpdater::new(&path, PackOptions::new().move_files(true), &Unattended)
        .pack(&mut FsEnumerator::new([&source]))
        .unwrap();
    assert_eq!(summary.added, 4);
    assert!(!source.exists());

    let names = entry_names(&path);
    assert_eq!(names, vec!["outbox/", "outbox/nested/", "outbox/nested/two.txt", "outbox/one.txt"]);
}

#[test]
fn test_archive_root_is_recreated_when_emptied() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rooted.zip");
    let options = PackOptions::new().archive_root("backup/2024");
    ArchiveUpdater::new(&path, options.clone(), &Unattended)
        .pack(&mut ItemList::new([item("a.txt", b"a"), item("b.txt", b"b")]))
        .unwrap();
    assert_eq!(entry_names(&path), vec!["backup/2024/a.txt", "backup/2024/b.txt"]);

    ArchiveUpdater::new(&path, options, &Unattended)
        .delete(&["backup/2024"])
        .unwrap();
    assert_eq!(entry_names(&path), vec!["backup/2024/"]);
}

#[test]
fn test_prefixed_archive_keeps_prefix() {
    let prefix = b"#!/bin/sh\necho not really a stub\nexit 0\n".to_vec();
    let archive = pack_in_memory(vec![item("a.txt", b"first")], &PackOptions::new());
    let mut data = prefix.clone();
    data.extend_from_slice(&archive);

    let data = pack_onto(data, vec![item("b.txt", b"second")], &PackOptions::new());
    assert!(data.starts_with(&prefix));
    assert_offsets_point_at_headers(&data, prefix.len() as u64);

    let reader = ArchiveReader::open(Cursor::new(data)).unwrap();
    assert_eq!(reader.tail().base_offset, prefix.len() as u64);
    let b = reader.find("b.txt").unwrap().unwrap();
    assert_eq!(reader.read_entry(&b, None).unwrap(), b"second");
}

#[test]
fn test_failed_pack_leaves_archive_untouched() {
    struct Refuse;
    impl zippack::Host for Refuse {
        fn progress(&self, _bytes: u64) -> bool {
            false
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("safe.zip");
    ArchiveUpdater::new(&path, PackOptions::new(), &Unattended)
        .pack(&mut ItemList::new([item("a.txt", b"a")]))
        .unwrap();
    let before = std::fs::read(&path).unwrap();

    let err = ArchiveUpdater::new(&path, PackOptions::new(), &Refuse)
        .pack(&mut ItemList::new([item("b.txt", b"b")]))
        .unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(std::fs::read(&path).unwrap(), before);

    // Only the archive itself is left behind.
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[test]
fn test_multi_disk_archives_are_refused() {
    let mut data = pack_in_memory(vec![item("a.txt", b"a")], &PackOptions::new());
    // Claim the end record lives on the second disk.
    let eocd = data.len() - 22;
    data[eocd + 4] = 1;
    let err = ArchiveSession::open(Cursor::new(data)).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Unsupported { .. }));
}
