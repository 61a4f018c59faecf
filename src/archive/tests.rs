//! Whole-archive scenarios over archives synthesized in memory.

use std::io::Write;

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use flate2::Compression;
use flate2::write::DeflateEncoder;

use super::crypto::zip_encrypt;
use super::*;
use crate::checksum::crc16;
use crate::error::Error;

/// 1980-01-01 in DOS date format.
const DOS_DATE: u16 = 0x0021;

fn put16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn deflate(data: &[u8]) -> Vec<u8> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

struct Member {
    name: &'static str,
    method: u16,
    flags: u16,
    payload: Vec<u8>,
    size: u32,
    crc: u32,
    /// Packed DOS time.
    time: u16,
    comment: &'static str,
    /// Write a local header (and payload) for this member.
    local: bool,
    /// Sizes and CRC go in a trailing data descriptor.
    descriptor: bool,
    /// Directory offset to record instead of the real one.
    offset: Option<u32>,
}

impl Member {
    fn stored(name: &'static str, data: &[u8]) -> Self {
        Member {
            name,
            method: 0,
            flags: 0,
            payload: data.to_vec(),
            size: data.len() as u32,
            crc: crc32fast::hash(data),
            time: 0,
            comment: "",
            local: true,
            descriptor: false,
            offset: None,
        }
    }

    fn deflated(name: &'static str, data: &[u8]) -> Self {
        Member {
            method: 8,
            payload: deflate(data),
            ..Member::stored(name, data)
        }
    }
}

fn build_zip(members: &[Member], banner: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut offsets = Vec::new();
    for m in members {
        offsets.push(out.len() as u32);
        if !m.local {
            continue;
        }
        let (crc, csize, size) = if m.descriptor {
            (0, 0, 0)
        } else {
            (m.crc, m.payload.len() as u32, m.size)
        };
        out.extend_from_slice(b"PK\x03\x04");
        put16(&mut out, 20);
        put16(&mut out, m.flags);
        put16(&mut out, m.method);
        put16(&mut out, m.time);
        put16(&mut out, DOS_DATE);
        put32(&mut out, crc);
        put32(&mut out, csize);
        put32(&mut out, size);
        put16(&mut out, m.name.len() as u16);
        put16(&mut out, 0);
        out.extend_from_slice(m.name.as_bytes());
        out.extend_from_slice(&m.payload);
        if m.descriptor {
            out.extend_from_slice(b"PK\x07\x08");
            put32(&mut out, m.crc);
            put32(&mut out, m.payload.len() as u32);
            put32(&mut out, m.size);
        }
    }

    let cd_offset = out.len() as u32;
    for (m, offset) in members.iter().zip(offsets) {
        out.extend_from_slice(b"PK\x01\x02");
        put16(&mut out, 20);
        put16(&mut out, 20);
        put16(&mut out, m.flags);
        put16(&mut out, m.method);
        put16(&mut out, m.time);
        put16(&mut out, DOS_DATE);
        put32(&mut out, m.crc);
        put32(&mut out, m.payload.len() as u32);
        put32(&mut out, m.size);
        put16(&mut out, m.name.len() as u16);
        put16(&mut out, 0);
        put16(&mut out, m.comment.len() as u16);
        put16(&mut out, 0);
        put16(&mut out, 0);
        put32(&mut out, 0x20);
        put32(&mut out, m.offset.unwrap_or(offset));
        out.extend_from_slice(m.name.as_bytes());
        out.extend_from_slice(m.comment.as_bytes());
    }
    let cd_size = out.len() as u32 - cd_offset;

    out.extend_from_slice(b"PK\x05\x06");
    put16(&mut out, 0);
    put16(&mut out, 0);
    put16(&mut out, members.len() as u16);
    put16(&mut out, members.len() as u16);
    put32(&mut out, cd_size);
    put32(&mut out, cd_offset);
    put16(&mut out, banner.len() as u16);
    out.extend_from_slice(banner);
    out
}

struct ArcMember {
    name: &'static str,
    kind: u8,
    payload: Vec<u8>,
    plain: Vec<u8>,
}

fn build_arc(members: &[ArcMember]) -> Vec<u8> {
    let mut out = Vec::new();
    for m in members {
        out.push(0x1A);
        out.push(m.kind);
        let mut name = [0u8; 13];
        name[..m.name.len()].copy_from_slice(m.name.as_bytes());
        out.extend_from_slice(&name);
        put32(&mut out, m.payload.len() as u32);
        put16(&mut out, DOS_DATE);
        put16(&mut out, 0);
        put16(&mut out, crc16(&m.plain));
        put32(&mut out, m.plain.len() as u32);
        out.extend_from_slice(&m.payload);
    }
    out.extend_from_slice(&[0x1A, 0x00]);
    out
}

fn arc_stored(name: &'static str, data: &[u8]) -> ArcMember {
    ArcMember {
        name,
        kind: 2,
        payload: data.to_vec(),
        plain: data.to_vec(),
    }
}

async fn open(data: Vec<u8>) -> Archive {
    Archive::open(data, OpenOptions::default()).await.unwrap()
}

async fn open_with(data: Vec<u8>, options: OpenOptions) -> Archive {
    Archive::open(data, options).await.unwrap()
}

fn scan_options() -> OpenOptions {
    OpenOptions {
        nodirs: true,
        ..OpenOptions::default()
    }
}

#[tokio::test]
async fn test_stored_entry_without_warnings() {
    let mut archive = open(build_zip(&[Member::stored("A.TXT", b"HELLOWORLD")], b"")).await;
    assert_eq!(archive.kind(), ArchiveKind::Zip);

    let mut entries = archive.read_directory(&EntryFilter::default()).await.unwrap();
    assert_eq!(entries.len(), 1);
    let entry = &mut entries[0];
    assert_eq!(entry.name(), "A.TXT");
    assert_eq!(entry.method(), Method::Zip(0));
    assert_eq!(entry.size(), 10);
    assert!(entry.warnings().is_empty());

    let data = archive.read_file(entry, None).await.unwrap();
    assert_eq!(data, b"HELLOWORLD");
    assert!(entry.warnings().is_empty());
    assert!(archive.warnings().is_empty());
    assert!(archive.exceptions().is_empty());
}

#[tokio::test]
async fn test_directory_offset_without_local_header() {
    let missing = Member {
        local: false,
        offset: Some(100),
        ..Member::stored("B.BIN", b"0123456789")
    };
    let data = build_zip(&[Member::stored("A.TXT", b"HELLOWORLD"), missing], b"");
    let mut archive = open(data).await;

    let mut entries = archive.read_directory(&EntryFilter::default()).await.unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries[0].warnings().is_empty());

    let entry = &mut entries[1];
    assert_eq!(entry.name(), "B.BIN");
    assert!(entry.local().is_none());
    assert_eq!(entry.warnings().as_slice(), ["Position 100 missing FileHeader"]);

    let result = archive.read_file(entry, None).await;
    assert!(matches!(result, Err(Error::NotLocatable(name)) if name == "B.BIN"));
    assert_eq!(entry.warnings().len(), 1);
}

#[tokio::test]
async fn test_directory_and_scan_agree() {
    let members = [
        Member::stored("README.TXT", b"read me first"),
        Member::deflated("DATA.DAT", &b"abcabcabcabc".repeat(40)),
        Member::stored("EMPTY.TXT", b""),
    ];
    let data = build_zip(&members, b"");

    let mut trusted = open(data.clone()).await;
    let mut scanned = open_with(data, scan_options()).await;
    let listed = trusted.read_directory(&EntryFilter::default()).await.unwrap();
    let found = scanned.read_directory(&EntryFilter::default()).await.unwrap();

    assert!(scanned.exceptions().contains(Exception::NoDirs));
    assert!(!trusted.exceptions().contains(Exception::NoDirs));
    assert_eq!(listed.len(), 3);
    assert_eq!(found.len(), 3);
    for (a, b) in listed.iter().zip(&found) {
        assert_eq!(a.name(), b.name());
        assert_eq!(a.size(), b.size());
        assert_eq!(a.compressed_size(), b.compressed_size());
        assert_eq!(a.crc(), b.crc());
        assert_eq!(a.method(), b.method());
        assert!(b.directory().is_none());
    }

    let mut entry = found[1].clone();
    let decoded = scanned.read_file(&mut entry, None).await.unwrap();
    assert_eq!(decoded, b"abcabcabcabc".repeat(40));
    assert!(entry.warnings().is_empty());
}

#[tokio::test]
async fn test_method_filter() {
    let members = [
        Member::stored("PLAIN.TXT", b"plain"),
        Member::deflated("PACKED.TXT", &b"packed ".repeat(20)),
    ];
    let mut archive = open(build_zip(&members, b"")).await;

    let all = archive.read_directory(&EntryFilter::default()).await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(
        EntryFilter::default().method,
        NO_METHOD_FILTER
    );

    let deflate = EntryFilter::parse_list("deflate").unwrap();
    let only = archive.read_directory(&deflate).await.unwrap();
    assert_eq!(only.len(), 1);
    assert_eq!(only[0].name(), "PACKED.TXT");

    // "store" names the ARC method, so no ZIP entry matches
    let store = EntryFilter::parse_list("store").unwrap();
    assert_eq!(store.method, -2);
    assert!(archive.read_directory(&store).await.unwrap().is_empty());
    let stored = EntryFilter::parse_list("stored").unwrap();
    assert_eq!(archive.read_directory(&stored).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_name_filter() {
    let members = [
        Member::stored("DOCS/README.TXT", b"a"),
        Member::stored("GAME.EXE", b"b"),
    ];
    let mut archive = open(build_zip(&members, b"")).await;
    let filter = EntryFilter::default().with_names(["*.txt"]);
    let entries = archive.read_directory(&filter).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name(), "DOCS/README.TXT");
    assert_eq!(archive.entries().map(<[Entry]>::len), Some(2));
}

#[tokio::test]
async fn test_reextraction_is_idempotent() {
    let text = b"the quick brown fox jumps over the lazy dog. ".repeat(30);
    let data = build_zip(&[Member::deflated("FOX.TXT", &text)], b"");

    let mut results = Vec::new();
    for _ in 0..2 {
        let mut archive = open(data.clone()).await;
        let mut entries = archive.read_directory(&EntryFilter::default()).await.unwrap();
        let decoded = archive.read_file(&mut entries[0], None).await.unwrap();
        results.push((decoded, entries[0].warnings().clone()));
        archive.close();
    }
    assert_eq!(results[0], results[1]);
    assert_eq!(results[0].0, text);

    // Twice on the same entry as well
    let mut archive = open(data).await;
    let mut entries = archive.read_directory(&EntryFilter::default()).await.unwrap();
    let first = archive.read_file(&mut entries[0], None).await.unwrap();
    let second = archive.read_file(&mut entries[0], None).await.unwrap();
    assert_eq!(first, second);
    assert!(entries[0].warnings().is_empty());
}

#[tokio::test]
async fn test_crc_mismatch_is_a_warning() {
    let bad = Member {
        crc: 0xDEADBEEF,
        ..Member::stored("BAD.TXT", b"HELLOWORLD")
    };
    let mut archive = open(build_zip(&[bad], b"")).await;
    let mut entries = archive.read_directory(&EntryFilter::default()).await.unwrap();
    let data = archive.read_file(&mut entries[0], None).await.unwrap();
    assert_eq!(data, b"HELLOWORLD");
    assert!(entries[0].warnings().mentions("CRC mismatch: expected deadbeef"));
}

#[tokio::test]
async fn test_encrypted_entry() {
    let plain = b"attack at dawn";
    let crc = crc32fast::hash(plain);
    let secret = Member {
        flags: 0x0001,
        payload: zip_encrypt(b"swordfish", (crc >> 24) as u8, plain),
        ..Member::stored("SECRET.TXT", plain)
    };
    let data = build_zip(&[secret], b"");

    let mut archive = open(data.clone()).await;
    let mut entries = archive.read_directory(&EntryFilter::default()).await.unwrap();
    assert!(archive.exceptions().contains(Exception::Encrypted));
    assert!(entries[0].is_encrypted());
    let result = archive.read_file(&mut entries[0], None).await;
    assert!(matches!(result, Err(Error::NeedsPassword(_))));
    assert!(entries[0].warnings().mentions("Password required"));

    let options = OpenOptions {
        password: Some(b"swordfish".to_vec()),
        ..OpenOptions::default()
    };
    let mut archive = open_with(data, options).await;
    let mut entries = archive.read_directory(&EntryFilter::default()).await.unwrap();
    let decoded = archive.read_file(&mut entries[0], None).await.unwrap();
    assert_eq!(decoded, plain);
    assert!(entries[0].warnings().is_empty());
}

#[tokio::test]
async fn test_unsupported_method() {
    let bzip = Member {
        method: 12,
        ..Member::stored("BZ.DAT", b"BZh91AY&SY")
    };
    let mut archive = open(build_zip(&[bzip, Member::stored("OK.TXT", b"ok")], b"")).await;
    let mut entries = archive.read_directory(&EntryFilter::default()).await.unwrap();
    let data = archive.read_file(&mut entries[0], None).await.unwrap();
    assert!(data.is_empty());
    assert_eq!(entries[0].warnings().as_slice(), ["Unsupported method: Bzip2"]);
    assert_eq!(archive.read_file(&mut entries[1], None).await.unwrap(), b"ok");
}

#[tokio::test]
async fn test_data_descriptor_entries() {
    let member = Member {
        flags: 0x0008,
        descriptor: true,
        ..Member::stored("STREAMED.TXT", b"written by a pipe")
    };
    let data = build_zip(&[member, Member::stored("NEXT.TXT", b"next")], b"");

    for options in [OpenOptions::default(), scan_options()] {
        let mut archive = open_with(data.clone(), options).await;
        let mut entries = archive.read_directory(&EntryFilter::default()).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].size(), 17);
        let decoded = archive.read_file(&mut entries[0], None).await.unwrap();
        assert_eq!(decoded, b"written by a pipe");
        assert!(entries[0].warnings().is_empty(), "{}", entries[0].warnings());
        assert_eq!(archive.read_file(&mut entries[1], None).await.unwrap(), b"next");
    }
}

#[tokio::test]
async fn test_prefixed_archive_offsets_are_shifted() {
    let mut data = vec![b'#'; 16];
    data.extend(build_zip(&[Member::stored("A.TXT", b"HELLOWORLD")], b""));
    let mut archive = open(data).await;
    let mut entries = archive.read_directory(&EntryFilter::default()).await.unwrap();
    assert_eq!(archive.warnings().as_slice(), ["Directory offset adjusted by 16"]);
    assert_eq!(archive.read_file(&mut entries[0], None).await.unwrap(), b"HELLOWORLD");
}

#[tokio::test]
async fn test_banner_and_comments() {
    let commented = Member {
        comment: "uploaded 1991",
        ..Member::stored("GAME.EXE", b"MZ")
    };
    let mut archive = open(build_zip(&[commented], b"WELCOME TO THE BBS")).await;
    assert_eq!(archive.comment(), Some("WELCOME TO THE BBS"));
    assert!(archive.exceptions().contains(Exception::Banner));

    let entries = archive.read_directory(&EntryFilter::default()).await.unwrap();
    assert_eq!(entries[0].comment(), Some("uploaded 1991"));
    assert!(archive.exceptions().contains(Exception::Comment));

    let only_banner = EntryFilter::parse_list("banner").unwrap();
    assert_eq!(archive.read_directory(&only_banner).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_empty_directory_sets_nofiles() {
    let mut archive = open(build_zip(&[], b"")).await;
    let entries = archive.read_directory(&EntryFilter::default()).await.unwrap();
    assert!(entries.is_empty());
    assert!(archive.exceptions().contains(Exception::NoFiles));
    assert!(archive.warnings().is_empty());
}

#[tokio::test]
async fn test_not_an_archive() {
    let result = Archive::open(b"just some text, nothing to see".to_vec(), OpenOptions::default()).await;
    assert!(matches!(result, Err(Error::NotAnArchive(_))));
}

#[tokio::test]
async fn test_wrong_type_hint() {
    let options = OpenOptions {
        kind_hint: Some(ArchiveKind::Arc),
        ..OpenOptions::default()
    };
    let archive = open_with(build_zip(&[Member::stored("A.TXT", b"x")], b""), options).await;
    assert_eq!(archive.kind(), ArchiveKind::Zip);
    assert!(archive.exceptions().contains(Exception::WrongType));
}

#[derive(Default)]
struct ChunkSink {
    chunks: Vec<usize>,
    data: Vec<u8>,
    finished: bool,
}

#[async_trait]
impl Sink for ChunkSink {
    async fn write(&mut self, chunk: &[u8]) -> AnyResult<()> {
        self.chunks.push(chunk.len());
        self.data.extend_from_slice(chunk);
        Ok(())
    }

    async fn finish(&mut self) -> AnyResult<()> {
        self.finished = true;
        Ok(())
    }
}

#[tokio::test]
async fn test_sink_receives_bounded_chunks() {
    let big: Vec<u8> = (0..70_000u32).map(|i| (i % 251) as u8).collect();
    let mut archive = open(build_zip(&[Member::stored("BIG.BIN", &big)], b"")).await;
    let mut entries = archive.read_directory(&EntryFilter::default()).await.unwrap();

    let mut sink = ChunkSink::default();
    let data = archive.read_file(&mut entries[0], Some(&mut sink)).await.unwrap();
    assert_eq!(data, big);
    assert_eq!(sink.data, big);
    assert!(sink.finished);
    assert_eq!(sink.chunks.len(), 3);
    assert!(sink.chunks.iter().all(|&len| len <= CHUNK_SIZE));
    assert!(entries[0].warnings().is_empty());
}

#[tokio::test]
async fn test_arc_listing_and_extraction() {
    let packed = ArcMember {
        name: "RUNS.TXT",
        kind: 3,
        payload: b"AB\x90\x04C".to_vec(),
        plain: b"ABBBBC".to_vec(),
    };
    let data = build_arc(&[arc_stored("HELLO.TXT", b"HELLOWORLD"), packed]);
    let mut archive = open(data).await;
    assert_eq!(archive.kind(), ArchiveKind::Arc);

    let mut entries = archive.read_directory(&EntryFilter::default()).await.unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].method().name(), "Store");
    assert_eq!(entries[1].method().name(), "Pack");
    assert_eq!(entries[1].method().filter_index(), -3);
    assert!(entries[0].directory().is_none());

    assert_eq!(archive.read_file(&mut entries[0], None).await.unwrap(), b"HELLOWORLD");
    assert_eq!(archive.read_file(&mut entries[1], None).await.unwrap(), b"ABBBBC");
    assert!(entries.iter().all(|e| e.warnings().is_empty()));

    let only_pack = EntryFilter::parse_list("pack").unwrap();
    assert_eq!(archive.read_directory(&only_pack).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_arc_crc_mismatch_uses_four_digits() {
    let mut member = arc_stored("BAD.TXT", b"HELLOWORLD");
    member.plain = b"HELLOWORLX".to_vec();
    let mut archive = open(build_arc(&[member])).await;
    let mut entries = archive.read_directory(&EntryFilter::default()).await.unwrap();
    archive.read_file(&mut entries[0], None).await.unwrap();
    let expected = format!("CRC mismatch: expected {:04x}", crc16(b"HELLOWORLX"));
    assert!(entries[0].warnings().mentions(&expected));
}

#[tokio::test]
async fn test_arc_resync_in_scan_mode() {
    let mut data = build_arc(&[arc_stored("ONE.TXT", b"one")]);
    data.truncate(data.len() - 2);
    data.extend_from_slice(&[0; 5]);
    data.extend(build_arc(&[arc_stored("TWO.TXT", b"two")]));

    let mut archive = open(data.clone()).await;
    let entries = archive.read_directory(&EntryFilter::default()).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert!(archive.warnings().mentions("missing FileHeader"));

    let mut archive = open_with(data, scan_options()).await;
    let mut entries = archive.read_directory(&EntryFilter::default()).await.unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(archive.read_file(&mut entries[1], None).await.unwrap(), b"two");
}

#[tokio::test]
async fn test_nested_archive() {
    let inner = build_arc(&[arc_stored("INSIDE.TXT", b"nested data")]);
    let outer = build_zip(
        &[
            Member::stored("README.TXT", b"not an archive"),
            Member::stored("INNER.ARC", &inner),
        ],
        b"",
    );
    let mut archive = open(outer).await;
    let mut entries = archive.read_directory(&EntryFilter::default()).await.unwrap();

    let readme = archive.read_file(&mut entries[0], None).await.unwrap();
    assert!(archive.open_nested(&entries[0], readme).await.unwrap().is_none());

    let bytes = archive.read_file(&mut entries[1], None).await.unwrap();
    let mut nested = archive.open_nested(&entries[1], bytes).await.unwrap().unwrap();
    assert_eq!(nested.kind(), ArchiveKind::Arc);
    assert!(nested.name().ends_with("/INNER.ARC"));
    assert!(!nested.exceptions().contains(Exception::WrongType));

    let mut inside = nested.read_directory(&EntryFilter::default()).await.unwrap();
    assert_eq!(inside[0].name(), "INSIDE.TXT");
    assert_eq!(nested.read_file(&mut inside[0], None).await.unwrap(), b"nested data");
}

#[tokio::test]
async fn test_directory_unreadable_without_fallback() {
    // Local headers but no end of central directory
    let mut data = build_zip(&[Member::stored("A.TXT", b"HELLOWORLD")], b"");
    data.truncate(45);

    let mut archive = open(data.clone()).await;
    assert!(archive.read_directory(&EntryFilter::default()).await.unwrap().is_empty());
    assert!(archive.exceptions().contains(Exception::NoFiles));
    assert!(archive.warnings().mentions("Directory unreadable"));

    let options = OpenOptions {
        scan_fallback: true,
        ..OpenOptions::default()
    };
    let mut archive = open_with(data, options).await;
    let mut entries = archive.read_directory(&EntryFilter::default()).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(archive.read_file(&mut entries[0], None).await.unwrap(), b"HELLOWORLD");
}

const LOREM: &[u8] = include_bytes!("../../__fixtures__/legacy/lorem.txt.expected");

#[tokio::test]
async fn test_reference_zip_streams() {
    let implode_8k = Member {
        method: 6,
        flags: 0x0006,
        payload: include_bytes!("../../__fixtures__/legacy/lorem_8k_literals.imploded").to_vec(),
        ..Member::stored("IMPL8K.TXT", LOREM)
    };
    let implode_4k = Member {
        method: 6,
        payload: include_bytes!("../../__fixtures__/legacy/lorem_head_4k.imploded").to_vec(),
        ..Member::stored("IMPL4K.TXT", &LOREM[..1500])
    };
    let shrunk = Member {
        method: 1,
        payload: include_bytes!("../../__fixtures__/legacy/lorem.shrunk").to_vec(),
        ..Member::stored("SHRINK.TXT", LOREM)
    };
    let data = build_zip(&[implode_8k, implode_4k, shrunk], b"");

    for options in [OpenOptions::default(), scan_options()] {
        let mut archive = open_with(data.clone(), options).await;
        let mut entries = archive.read_directory(&EntryFilter::default()).await.unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].method().name(), "Implode");
        assert_eq!(entries[2].method().name(), "Shrink");

        let expected = [LOREM, &LOREM[..1500], LOREM];
        for (entry, expected) in entries.iter_mut().zip(expected) {
            let decoded = archive.read_file(entry, None).await.unwrap();
            assert_eq!(decoded.len(), expected.len(), "{}", entry.name());
            assert_eq!(decoded, expected, "{}", entry.name());
            assert!(entry.warnings().is_empty(), "{}: {}", entry.name(), entry.warnings());
        }
    }
}

#[tokio::test]
async fn test_reference_arc_streams() {
    fn member(name: &'static str, kind: u8, payload: &[u8]) -> ArcMember {
        ArcMember {
            name,
            kind,
            payload: payload.to_vec(),
            plain: LOREM.to_vec(),
        }
    }
    let data = build_arc(&[
        member("LOREM.SQZ", 4, include_bytes!("../../__fixtures__/legacy/lorem.squeezed")),
        member("LOREM.CRN", 8, include_bytes!("../../__fixtures__/legacy/lorem.crunched")),
        member("LOREM.SQS", 9, include_bytes!("../../__fixtures__/legacy/lorem.squashed")),
    ]);
    let mut archive = open(data).await;
    let mut entries = archive.read_directory(&EntryFilter::default()).await.unwrap();
    let methods: Vec<_> = entries.iter().map(|e| e.method().name()).collect();
    assert_eq!(methods, ["Squeeze", "Crunch", "Squash"]);

    for entry in &mut entries {
        let decoded = archive.read_file(entry, None).await.unwrap();
        assert_eq!(decoded, LOREM, "{}", entry.name());
        assert!(entry.warnings().is_empty(), "{}: {}", entry.name(), entry.warnings());
    }
}

#[tokio::test]
async fn test_sink_chunks_bounded_for_whole_stream_codecs() {
    let plain: Vec<u8> = (0..70_000u32).map(|i| b'A' + (i % 26) as u8).collect();
    let packed = ArcMember {
        name: "ALPHA.TXT",
        kind: 3,
        payload: plain.clone(),
        plain: plain.clone(),
    };
    let mut archive = open(build_arc(&[packed])).await;
    let mut entries = archive.read_directory(&EntryFilter::default()).await.unwrap();

    let mut sink = ChunkSink::default();
    let data = archive.read_file(&mut entries[0], Some(&mut sink)).await.unwrap();
    assert_eq!(data, plain);
    assert_eq!(sink.data, plain);
    assert_eq!(sink.chunks.len(), 3);
    assert!(sink.chunks.iter().all(|&len| len <= CHUNK_SIZE));
}

#[tokio::test]
async fn test_encrypted_streamed_entry_checks_time_byte() {
    let plain = b"attack at dawn";
    let streamed = |check| Member {
        flags: 0x0009,
        descriptor: true,
        time: 0x7A31,
        payload: zip_encrypt(b"swordfish", check, plain),
        ..Member::stored("SECRET.TXT", plain)
    };
    let options = OpenOptions {
        password: Some(b"swordfish".to_vec()),
        ..OpenOptions::default()
    };

    for mode in [options.clone(), OpenOptions { nodirs: true, ..options.clone() }] {
        let mut archive = open_with(build_zip(&[streamed(0x7A)], b""), mode).await;
        let mut entries = archive.read_directory(&EntryFilter::default()).await.unwrap();
        assert_eq!(entries[0].dos_time(), 0x7A31);
        let decoded = archive.read_file(&mut entries[0], None).await.unwrap();
        assert_eq!(decoded, plain);
        assert!(entries[0].warnings().is_empty(), "{}", entries[0].warnings());
    }

    let mut archive = open_with(build_zip(&[streamed(0x00)], b""), options).await;
    let mut entries = archive.read_directory(&EntryFilter::default()).await.unwrap();
    let decoded = archive.read_file(&mut entries[0], None).await.unwrap();
    assert_eq!(decoded, plain);
    assert_eq!(entries[0].warnings().as_slice(), ["Incorrect password"]);
}

/// A lone local header whose ZIP64 extra field declares `size`.
fn zip64_local(name: &str, payload: &[u8], size: u64) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"PK\x03\x04");
    put16(&mut out, 45);
    put16(&mut out, 0);
    put16(&mut out, 0);
    put16(&mut out, 0);
    put16(&mut out, DOS_DATE);
    put32(&mut out, crc32fast::hash(payload));
    put32(&mut out, payload.len() as u32);
    put32(&mut out, u32::MAX);
    put16(&mut out, name.len() as u16);
    put16(&mut out, 12);
    out.extend_from_slice(name.as_bytes());
    put16(&mut out, 0x0001);
    put16(&mut out, 8);
    out.extend_from_slice(&size.to_le_bytes());
    out.extend_from_slice(payload);
    out
}

#[tokio::test]
async fn test_huge_declared_size_is_not_allocated() {
    let mut archive = open_with(zip64_local("X.TXT", b"hi", 1 << 62), scan_options()).await;
    let mut entries = archive.read_directory(&EntryFilter::default()).await.unwrap();
    assert_eq!(entries[0].size(), 1 << 62);
    let data = archive.read_file(&mut entries[0], None).await.unwrap();
    assert_eq!(data, b"hi");
    assert!(entries[0].warnings().mentions("Decoded 2 of 4611686018427387904 bytes"));
    assert!(entries[0].warnings().mentions("Not padded"));

    let inflated = Member {
        size: u32::MAX,
        ..Member::stored("Y.TXT", b"hi")
    };
    let mut archive = open(build_zip(&[inflated], b"")).await;
    let mut entries = archive.read_directory(&EntryFilter::default()).await.unwrap();
    let data = archive.read_file(&mut entries[0], None).await.unwrap();
    assert_eq!(data, b"hi");
    assert!(entries[0].warnings().mentions("Not padded"));
    assert!(!entries[0].warnings().mentions("CRC mismatch"));
}

#[tokio::test]
async fn test_small_shortfall_is_padded() {
    let short = Member {
        size: 6,
        ..Member::stored("SHORT.TXT", b"abc")
    };
    let mut archive = open(build_zip(&[short], b"")).await;
    let mut entries = archive.read_directory(&EntryFilter::default()).await.unwrap();
    let data = archive.read_file(&mut entries[0], None).await.unwrap();
    assert_eq!(data, b"abc\0\0\0");
    assert!(entries[0].warnings().mentions("Decoded 3 of 6 bytes"));
    assert!(!entries[0].warnings().mentions("Not padded"));
}
