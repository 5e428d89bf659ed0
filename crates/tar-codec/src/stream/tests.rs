//! Tests for the streaming decoder and encoder.

use std::cell::Cell;
use std::io::{self, Cursor, Read};
use std::rc::Rc;

use bytes::Bytes;

use super::*;
use crate::pax::encode_pax;
use crate::{DecodeOptions, EncodeOptions, EntryType, Header, Limits, LongNameFormat, PaxMap};

/// Helper to create a tar archive using the tar crate.
fn create_tar_with<F>(f: F) -> Vec<u8>
where
    F: FnOnce(&mut tar::Builder<&mut Vec<u8>>),
{
    let mut data = Vec::new();
    {
        let mut builder = tar::Builder::new(&mut data);
        f(&mut builder);
        builder.finish().unwrap();
    }
    data
}

/// Helper to append a file to a tar builder.
fn append_file(builder: &mut tar::Builder<&mut Vec<u8>>, path: &str, content: &[u8]) {
    let mut header = tar::Header::new_gnu();
    header.set_mode(0o644);
    header.set_uid(1000);
    header.set_gid(1000);
    header.set_mtime(1234567890);
    header.set_size(content.len() as u64);
    header.set_entry_type(tar::EntryType::Regular);
    builder.append_data(&mut header, path, content).unwrap();
}

/// Helper to append a raw PAX record of the given type.
fn append_pax(
    builder: &mut tar::Builder<&mut Vec<u8>>,
    kind: tar::EntryType,
    records: &[(&str, &str)],
) {
    let payload = encode_pax(records.iter().copied());
    let mut header = tar::Header::new_ustar();
    header.set_path("PaxHeader/entry").unwrap();
    header.set_mode(0o644);
    header.set_size(payload.len() as u64);
    header.set_entry_type(kind);
    header.set_cksum();
    builder.append(&header, payload.as_slice()).unwrap();
}

fn file_header(name: &str, size: u64) -> Header {
    Header {
        name: name.into(),
        mode: 0o644,
        uid: 1000,
        gid: 1000,
        size,
        mtime: 1234567890,
        uname: "user".into(),
        gname: "group".into(),
        ..Header::default()
    }
}

fn decoder(data: Vec<u8>) -> TarDecoder<ReadSource<Cursor<Vec<u8>>>> {
    TarDecoder::from_reader(Cursor::new(data))
}

/// Decode all entries into headers and bodies.
fn decode_all<S: ByteSource>(mut decoder: TarDecoder<S>) -> Vec<(Header, Vec<u8>)> {
    let mut out = Vec::new();
    while let Some(mut entry) = decoder.next_entry().unwrap() {
        let body = entry.body.to_vec().unwrap();
        out.push((entry.header, body));
    }
    out
}

/// Byte source serving fixed-size chunks and counting `close` calls.
#[derive(Debug)]
struct ChunkedSource {
    data: Bytes,
    chunk: usize,
    closes: Rc<Cell<usize>>,
}

impl ChunkedSource {
    fn new(data: Vec<u8>, chunk: usize) -> (Self, Rc<Cell<usize>>) {
        let closes = Rc::new(Cell::new(0));
        let source = Self {
            data: data.into(),
            chunk,
            closes: closes.clone(),
        };
        (source, closes)
    }
}

impl ByteSource for ChunkedSource {
    fn next_chunk(&mut self) -> io::Result<Option<Bytes>> {
        if self.data.is_empty() {
            return Ok(None);
        }
        let n = self.chunk.min(self.data.len());
        Ok(Some(self.data.split_to(n)))
    }

    fn close(&mut self) -> io::Result<()> {
        self.closes.set(self.closes.get() + 1);
        Ok(())
    }
}

// =============================================================================
// Decoding archives written by the tar crate
// =============================================================================

#[test]
fn test_empty_tar() {
    let data = create_tar_with(|_| {});
    let mut decoder = decoder(data);
    assert!(decoder.next_entry().unwrap().is_none());
    assert_eq!(decoder.position(), 1024);
    assert!(decoder.next_entry().unwrap().is_none());
}

#[test]
fn test_empty_input() {
    let mut decoder = decoder(Vec::new());
    assert!(decoder.next_entry().unwrap().is_none());
}

#[test]
fn test_single_file() {
    let data = create_tar_with(|b| {
        append_file(b, "hello.txt", b"Hello, World!");
    });

    let mut decoder = decoder(data);
    let mut entry = decoder.next_entry().unwrap().expect("should have entry");
    assert_eq!(entry.header.name, "hello.txt");
    assert_eq!(entry.header.entry_type, EntryType::File);
    assert_eq!(entry.header.size, 13);
    assert_eq!(entry.header.mode, 0o644);
    assert_eq!(entry.header.uid, 1000);
    assert_eq!(entry.header.gid, 1000);
    assert_eq!(entry.header.mtime, 1234567890);
    assert!(entry.header.pax.is_none());
    assert_eq!(entry.body.size(), 13);
    assert_eq!(entry.body.to_vec().unwrap(), b"Hello, World!");
    assert_eq!(entry.body.remaining(), 0);
    drop(entry);

    assert!(decoder.next_entry().unwrap().is_none());
}

#[test]
fn test_multiple_files_unread_bodies() {
    let data = create_tar_with(|b| {
        append_file(b, "file1.txt", b"Content 1");
        append_file(b, "file2.txt", &[b'x'; 2000]);
        append_file(b, "file3.txt", b"Content 3");
    });

    let mut decoder = decoder(data);
    for i in 1..=3 {
        let entry = decoder.next_entry().unwrap().expect("should have entry");
        assert_eq!(entry.header.name, format!("file{i}.txt"));
    }
    assert!(decoder.next_entry().unwrap().is_none());
}

#[test]
fn test_partially_read_body_is_drained() {
    let data = create_tar_with(|b| {
        append_file(b, "big", &[7u8; 3000]);
        append_file(b, "small", b"tail");
    });

    let (source, _) = ChunkedSource::new(data, 512);
    let mut decoder = TarDecoder::new(source);
    let mut entry = decoder.next_entry().unwrap().unwrap();
    let chunk = entry.body.next_chunk().unwrap().unwrap();
    assert_eq!(chunk.len(), 512);
    assert_eq!(entry.body.remaining(), 2488);
    drop(entry);

    let mut entry = decoder.next_entry().unwrap().unwrap();
    assert_eq!(entry.header.name, "small");
    assert_eq!(entry.body.to_vec().unwrap(), b"tail");
}

#[test]
fn test_directory() {
    let data = create_tar_with(|b| {
        let mut header = tar::Header::new_gnu();
        header.set_mode(0o755);
        header.set_entry_type(tar::EntryType::Directory);
        header.set_size(0);
        b.append_data(&mut header, "mydir/", io::empty()).unwrap();
        append_file(b, "mydir/file", b"x");
    });

    let entries = decode_all(decoder(data));
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].0.name, "mydir/");
    assert_eq!(entries[0].0.entry_type, EntryType::Directory);
    assert!(entries[0].1.is_empty());
    assert_eq!(entries[1].0.name, "mydir/file");
}

#[test]
fn test_symlink_and_hardlink() {
    let data = create_tar_with(|b| {
        append_file(b, "original.txt", b"content");

        let mut header = tar::Header::new_gnu();
        header.set_mode(0o777);
        header.set_entry_type(tar::EntryType::Symlink);
        header.set_size(0);
        b.append_link(&mut header, "link", "original.txt").unwrap();

        let mut header = tar::Header::new_gnu();
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Link);
        header.set_size(0);
        b.append_link(&mut header, "hard", "original.txt").unwrap();
    });

    let entries = decode_all(decoder(data));
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[1].0.entry_type, EntryType::Symlink);
    assert_eq!(entries[1].0.linkname.as_deref(), Some("original.txt"));
    assert_eq!(entries[2].0.entry_type, EntryType::Link);
    assert_eq!(entries[2].0.linkname.as_deref(), Some("original.txt"));
    assert!(entries[2].1.is_empty());
}

#[test]
fn test_symlink_with_stored_size() {
    // Some writers store a size for symlinks. The data is skipped and the
    // entry reports size zero.
    let data = create_tar_with(|b| {
        let mut header = tar::Header::new_ustar();
        header.set_path("link").unwrap();
        header.set_link_name("test.txt").unwrap();
        header.set_mode(0o777);
        header.set_entry_type(tar::EntryType::Symlink);
        header.set_size(9);
        header.set_cksum();
        b.append(&header, &b"ignored!!"[..]).unwrap();
        append_file(b, "after", b"ok");
    });

    let entries = decode_all(decoder(data));
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].0.size, 0);
    assert!(entries[0].1.is_empty());
    assert_eq!(entries[1].0.name, "after");
    assert_eq!(entries[1].1, b"ok");
}

#[test]
fn test_gnu_long_name() {
    let long_path = format!("{}/{}", "a".repeat(80), "b".repeat(80));
    let data = create_tar_with(|b| {
        append_file(b, &long_path, b"content");
    });

    let entries = decode_all(decoder(data));
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].0.name, long_path);
    assert_eq!(entries[0].1, b"content");
}

#[test]
fn test_gnu_long_link() {
    let long_target = "t".repeat(150);
    let data = create_tar_with(|b| {
        let mut header = tar::Header::new_gnu();
        header.set_mode(0o777);
        header.set_entry_type(tar::EntryType::Symlink);
        header.set_size(0);
        b.append_link(&mut header, "link", &long_target).unwrap();
    });

    let entries = decode_all(decoder(data));
    assert_eq!(entries[0].0.name, "link");
    assert_eq!(entries[0].0.linkname.as_deref(), Some(long_target.as_str()));
}

#[test]
fn test_pax_local_and_global() {
    let data = create_tar_with(|b| {
        append_pax(b, tar::EntryType::XGlobalHeader, &[("uname", "globaluser"), ("comment", "g")]);
        append_pax(b, tar::EntryType::XHeader, &[("special", "sauce"), ("comment", "local")]);
        append_file(b, "first", b"1");
        append_file(b, "second", b"2");
    });

    let entries = decode_all(decoder(data));
    assert_eq!(entries.len(), 2);

    let first = &entries[0].0;
    assert_eq!(first.uname, "globaluser");
    let pax = first.pax.as_ref().unwrap();
    assert_eq!(pax["special"], "sauce");
    assert_eq!(pax["comment"], "local");

    let second = &entries[1].0;
    assert_eq!(second.uname, "globaluser");
    let expected: PaxMap = [("uname", "globaluser"), ("comment", "g")]
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .collect();
    similar_asserts::assert_eq!(second.pax.as_ref(), Some(&expected));
}

#[test]
fn test_pax_overrides_header_fields() {
    let data = create_tar_with(|b| {
        append_pax(
            b,
            tar::EntryType::XHeader,
            &[
                ("path", "renamed.txt"),
                ("uid", "3000000"),
                ("gid", "nonsense"),
                ("mtime", "1387580181.5"),
                ("size", "4"),
                ("gname", "wheel"),
            ],
        );
        let mut header = tar::Header::new_ustar();
        header.set_path("short").unwrap();
        header.set_mode(0o600);
        header.set_gid(20);
        header.set_size(4);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();
        b.append(&header, &b"data"[..]).unwrap();
    });

    let entries = decode_all(decoder(data));
    let header = &entries[0].0;
    assert_eq!(header.name, "renamed.txt");
    assert_eq!(header.uid, 3000000);
    assert_eq!(header.gid, 20);
    assert_eq!(header.mtime, 1387580181);
    assert_eq!(header.size, 4);
    assert_eq!(header.gname, "wheel");
    assert_eq!(header.pax.as_ref().unwrap()["mtime"], "1387580181.5");
    assert_eq!(entries[0].1, b"data");
}

#[test]
fn test_pax_path_beats_gnu_long_name() {
    let data = create_tar_with(|b| {
        append_pax(b, tar::EntryType::XHeader, &[("path", "from-pax")]);
        append_file(b, &"g".repeat(120), b"x");
    });

    let entries = decode_all(decoder(data));
    assert_eq!(entries[0].0.name, "from-pax");
}

#[test]
fn test_pax_invalid_size() {
    let data = create_tar_with(|b| {
        append_pax(b, tar::EntryType::XHeader, &[("size", "12abc")]);
        append_file(b, "f", b"x");
    });

    let err = decoder(data).next_entry().unwrap_err();
    assert!(matches!(err, StreamError::Header(crate::HeaderError::InvalidPax(_))));
}

// =============================================================================
// Failure handling
// =============================================================================

#[test]
fn test_truncated_header() {
    let mut data = create_tar_with(|b| append_file(b, "f", b"x"));
    data.truncate(300);
    let mut decoder = decoder(data);
    let err = decoder.next_entry().unwrap_err();
    assert!(matches!(
        err,
        StreamError::UnderRead { expected: 512, actual: 300 }
    ));
    assert!(matches!(decoder.next_entry().unwrap_err(), StreamError::Stopped));
}

#[test]
fn test_truncated_body() {
    let mut data = create_tar_with(|b| append_file(b, "f", &[1u8; 100]));
    data.truncate(512 + 40);

    let (source, closes) = ChunkedSource::new(data, 512);
    let mut decoder = TarDecoder::new(source);
    let mut entry = decoder.next_entry().unwrap().unwrap();
    let err = entry.body.to_vec().unwrap_err();
    assert!(matches!(
        err,
        StreamError::UnderRead { expected: 100, actual: 40 }
    ));
    assert!(matches!(entry.body.next_chunk().unwrap_err(), StreamError::Stopped));
    drop(entry);
    assert_eq!(closes.get(), 1);
    assert!(matches!(decoder.next_entry().unwrap_err(), StreamError::Stopped));
    assert!(matches!(decoder.next_entry().unwrap_err(), StreamError::Stopped));
    drop(decoder);
    assert_eq!(closes.get(), 1);
}

#[test]
fn test_body_read_error_kind() {
    let mut data = create_tar_with(|b| append_file(b, "f", &[1u8; 100]));
    data.truncate(512 + 40);
    let mut decoder = decoder(data);
    let mut entry = decoder.next_entry().unwrap().unwrap();
    let mut buf = Vec::new();
    let err = entry.body.read_to_end(&mut buf).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    assert_eq!(buf.len(), 40);
}

#[test]
fn test_orphaned_metadata() {
    let mut data = Vec::new();
    {
        let mut builder = tar::Builder::new(&mut data);
        append_pax(&mut builder, tar::EntryType::XHeader, &[("path", "nothing")]);
        builder.finish().unwrap();
    }
    let err = decoder(data).next_entry().unwrap_err();
    assert!(matches!(err, StreamError::OrphanedMetadata));
}

#[test]
fn test_global_only_is_not_orphaned() {
    let data = create_tar_with(|b| {
        append_pax(b, tar::EntryType::XGlobalHeader, &[("comment", "x")]);
    });
    assert!(decoder(data).next_entry().unwrap().is_none());
}

#[test]
fn test_release_once_on_end() {
    let data = create_tar_with(|b| append_file(b, "f", b"x"));
    let (source, closes) = ChunkedSource::new(data, 7);
    let mut decoder = TarDecoder::new(source);
    while decoder.next_entry().unwrap().is_some() {}
    assert_eq!(closes.get(), 1);
    assert!(decoder.next_entry().unwrap().is_none());
    drop(decoder);
    assert_eq!(closes.get(), 1);
}

#[test]
fn test_release_on_abandoned_decoder() {
    let data = create_tar_with(|b| append_file(b, "f", b"x"));
    let (source, closes) = ChunkedSource::new(data, 512);
    let mut decoder = TarDecoder::new(source);
    assert!(decoder.next_entry().unwrap().is_some());
    drop(decoder);
    assert_eq!(closes.get(), 1);
}

#[test]
fn test_one_byte_chunks() {
    let long_path = format!("{}/{}", "dir".repeat(40), "file");
    let data = create_tar_with(|b| {
        append_pax(b, tar::EntryType::XHeader, &[("special", "sauce")]);
        append_file(b, "a.txt", b"hello world\n");
        append_file(b, &long_path, &[3u8; 700]);
    });

    let (source, _) = ChunkedSource::new(data, 1);
    let entries = decode_all(TarDecoder::new(source));
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].1, b"hello world\n");
    assert_eq!(entries[1].0.name, long_path);
    assert_eq!(entries[1].1, vec![3u8; 700]);
}

// =============================================================================
// Limits
// =============================================================================

fn with_limits(data: Vec<u8>, limits: Limits) -> TarDecoder<ReadSource<Cursor<Vec<u8>>>> {
    let options = DecodeOptions {
        limits,
        ..DecodeOptions::default()
    };
    TarDecoder::from_reader_with_options(Cursor::new(data), options)
}

#[test]
fn test_path_too_long() {
    let data = create_tar_with(|b| append_file(b, &"x".repeat(200), b"content"));
    let limits = Limits {
        max_path_len: 100,
        ..Limits::default()
    };
    let err = with_limits(data, limits).next_entry().unwrap_err();
    assert!(matches!(
        err,
        StreamError::PathTooLong { len: 200, limit: 100 }
    ));
}

#[test]
fn test_gnu_long_too_large() {
    let data = create_tar_with(|b| append_file(b, &"x".repeat(200), b"content"));
    let limits = Limits {
        max_gnu_long_size: 100,
        ..Limits::default()
    };
    let err = with_limits(data, limits).next_entry().unwrap_err();
    assert!(matches!(err, StreamError::GnuLongTooLarge { size: 200, limit: 100 }));
}

#[test]
fn test_gnu_long_limit_excludes_nul() {
    let limits = Limits {
        max_gnu_long_size: 150,
        ..Limits::default()
    };
    let encode_name = |name: &str| {
        let mut encoder = TarEncoder::new(Vec::new());
        encoder.append_bytes(&file_header(name, 0), b"").unwrap();
        encoder.finish().unwrap()
    };

    let name = "x".repeat(150);
    let mut decoder = with_limits(encode_name(&name), limits.clone());
    assert_eq!(decoder.next_entry().unwrap().unwrap().header.name, name);

    let err = with_limits(encode_name(&"x".repeat(151)), limits)
        .next_entry()
        .unwrap_err();
    assert!(matches!(err, StreamError::GnuLongTooLarge { size: 152, limit: 150 }));
}

#[test]
fn test_pax_too_large() {
    let comment = "c".repeat(100);
    let data = create_tar_with(|b| {
        append_pax(b, tar::EntryType::XHeader, &[("comment", comment.as_str())]);
        append_file(b, "f", b"");
    });
    let limits = Limits {
        max_pax_size: 64,
        ..Limits::default()
    };
    let err = with_limits(data, limits).next_entry().unwrap_err();
    assert!(matches!(err, StreamError::PaxTooLarge { limit: 64, .. }));
}

#[test]
fn test_too_many_pending_entries() {
    let data = create_tar_with(|b| {
        for _ in 0..5 {
            append_pax(b, tar::EntryType::XHeader, &[("comment", "again")]);
        }
        append_file(b, "f", b"");
    });
    let limits = Limits {
        max_pending_entries: 4,
        ..Limits::default()
    };
    let err = with_limits(data.clone(), limits).next_entry().unwrap_err();
    assert!(matches!(
        err,
        StreamError::TooManyPendingEntries { count: 5, limit: 4 }
    ));

    assert_eq!(decode_all(decoder(data)).len(), 1);
}

// =============================================================================
// Encoding, cross-checked with the tar crate
// =============================================================================

fn read_with_tar_crate(data: &[u8]) -> Vec<(String, Option<String>, Vec<u8>)> {
    let mut archive = tar::Archive::new(Cursor::new(data));
    archive
        .entries()
        .unwrap()
        .map(|entry| {
            let mut entry = entry.unwrap();
            let path = entry.path().unwrap().to_string_lossy().into_owned();
            let link = entry
                .link_name()
                .unwrap()
                .map(|l| l.to_string_lossy().into_owned());
            let mut body = Vec::new();
            entry.read_to_end(&mut body).unwrap();
            (path, link, body)
        })
        .collect()
}

#[test]
fn test_encode_readable_by_tar_crate() {
    let mut encoder = TarEncoder::new(Vec::new());
    encoder
        .append_bytes(&file_header("hello.txt", 12), b"hello world\n")
        .unwrap();
    let dir = Header {
        name: "dir/".into(),
        mode: 0o755,
        entry_type: EntryType::Directory,
        ..Header::default()
    };
    encoder.append_bytes(&dir, b"").unwrap();
    let link = Header {
        name: "dir/link".into(),
        entry_type: EntryType::Symlink,
        linkname: Some("../hello.txt".into()),
        ..Header::default()
    };
    encoder.append(&link, io::empty()).unwrap();
    let data = encoder.finish().unwrap();
    assert_eq!(data.len() % 512, 0);

    let entries = read_with_tar_crate(&data);
    similar_asserts::assert_eq!(
        entries,
        vec![
            ("hello.txt".to_owned(), None, b"hello world\n".to_vec()),
            ("dir/".to_owned(), None, Vec::new()),
            ("dir/link".to_owned(), Some("../hello.txt".to_owned()), Vec::new()),
        ]
    );
}

#[test]
fn test_encode_long_names_readable_by_tar_crate() {
    let long_name = format!("{}/{}", "n".repeat(160), "file.txt");
    let long_link = "l".repeat(120);

    for format in [LongNameFormat::Gnu, LongNameFormat::Pax] {
        let options = EncodeOptions {
            long_name_format: format,
            ..EncodeOptions::default()
        };
        let mut encoder = TarEncoder::with_options(Vec::new(), options);
        encoder
            .append_bytes(&file_header(&long_name, 3), b"abc")
            .unwrap();
        let link = Header {
            name: "link".into(),
            entry_type: EntryType::Symlink,
            linkname: Some(long_link.clone()),
            ..Header::default()
        };
        encoder.append_bytes(&link, b"").unwrap();
        let data = encoder.finish().unwrap();

        let entries = read_with_tar_crate(&data);
        assert_eq!(entries.len(), 2, "{format:?}");
        assert_eq!(entries[0].0, long_name, "{format:?}");
        assert_eq!(entries[0].2, b"abc");
        assert_eq!(entries[1].1.as_deref(), Some(long_link.as_str()), "{format:?}");

        let ours = decode_all(decoder(data));
        assert_eq!(ours[0].0.name, long_name);
        assert_eq!(ours[1].0.linkname.as_deref(), Some(long_link.as_str()));
    }
}

#[test]
fn test_encode_gnu_record_layout() {
    let long_name = "z".repeat(150);
    let mut encoder = TarEncoder::new(Vec::new());
    encoder.append_bytes(&file_header(&long_name, 0), b"").unwrap();
    let data = encoder.finish().unwrap();

    // 'L' header, 151-byte payload padded to one block, real header, end marker
    assert_eq!(data.len(), 5 * 512);
    assert_eq!(&data[..13], b"././@LongLink");
    assert_eq!(data[156], b'L');
    assert_eq!(&data[512..512 + 151], format!("{long_name}\0").as_bytes());
    assert_eq!(&data[1024..1124], "z".repeat(100).as_bytes());
    assert_eq!(data[1024 + 156], b'0');
}

#[test]
fn test_encode_caller_pax_and_global() {
    let mut global = PaxMap::new();
    global.insert("comment".into(), "archive-wide".into());

    let mut header = file_header("x.txt", 1);
    header.pax = Some([("SCHILY.xattr.user.k".to_owned(), "v".to_owned())].into());

    let mut encoder = TarEncoder::new(Vec::new());
    encoder.append_global_pax(&global).unwrap();
    encoder.append_bytes(&header, b"!").unwrap();
    let position = encoder.position();
    let data = encoder.finish().unwrap();
    assert_eq!(data.len() as u64, position + 1024);
    assert_eq!(data[156], b'g');

    let entries = decode_all(decoder(data));
    assert_eq!(entries.len(), 1);
    let pax = entries[0].0.pax.as_ref().unwrap();
    assert_eq!(pax["comment"], "archive-wide");
    assert_eq!(pax["SCHILY.xattr.user.k"], "v");
}

#[test]
fn test_encode_body_size_mismatch() {
    let mut encoder = TarEncoder::new(Vec::new());
    let err = encoder
        .append_bytes(&file_header("short", 10), b"12345")
        .unwrap_err();
    assert!(matches!(
        err,
        StreamError::BodySizeMismatch { expected: 10, actual: 5 }
    ));

    let mut encoder = TarEncoder::new(Vec::new());
    let err = encoder
        .append_bytes(&file_header("long", 3), b"12345")
        .unwrap_err();
    assert!(matches!(
        err,
        StreamError::BodySizeMismatch { expected: 3, actual: 4 }
    ));
}

#[test]
fn test_encode_streams_large_body() {
    let size = 3 * 1024 * 1024 + 17;
    let body = io::repeat(0xab).take(size);
    let mut encoder = TarEncoder::new(Vec::new());
    encoder.append(&file_header("big.bin", size), body).unwrap();
    let data = encoder.finish().unwrap();
    assert_eq!(data.len() as u64, 512 + size + crate::padding_for(size) + 1024);

    let (source, _) = ChunkedSource::new(data, 4096);
    let mut decoder = TarDecoder::new(source);
    let mut entry = decoder.next_entry().unwrap().unwrap();
    let mut total = 0u64;
    for chunk in Iterator::by_ref(&mut entry.body) {
        let chunk = chunk.unwrap();
        assert!(chunk.len() <= 4096);
        assert!(chunk.iter().all(|&b| b == 0xab));
        total += chunk.len() as u64;
    }
    assert_eq!(total, size);
}

mod proptest_tests {
    use super::*;
    use proptest::prelude::*;

    fn segment_strategy() -> impl Strategy<Value = String> {
        proptest::string::string_regex("[a-zA-Z0-9_][a-zA-Z0-9_.+-]{0,40}").expect("valid regex")
    }

    /// Paths of up to six segments, so some exceed 100 bytes.
    fn path_strategy() -> impl Strategy<Value = String> {
        prop::collection::vec(segment_strategy(), 1..6).prop_map(|parts| parts.join("/"))
    }

    fn content_strategy() -> impl Strategy<Value = Vec<u8>> {
        prop::collection::vec(any::<u8>(), 0..1500)
    }

    fn format_strategy() -> impl Strategy<Value = LongNameFormat> {
        prop_oneof![Just(LongNameFormat::Gnu), Just(LongNameFormat::Pax)]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn test_roundtrip(
            files in prop::collection::vec((path_strategy(), content_strategy()), 1..5),
            uid in any::<u32>(),
            format in format_strategy(),
            chunk in 1usize..2048,
        ) {
            let options = EncodeOptions { long_name_format: format, ..EncodeOptions::default() };
            let mut encoder = TarEncoder::with_options(Vec::new(), options);
            let mut headers = Vec::new();
            for (path, content) in &files {
                let mut header = file_header(path, content.len() as u64);
                header.uid = u64::from(uid);
                encoder.append_bytes(&header, content).unwrap();
                headers.push(header);
            }
            let data = encoder.finish().unwrap();
            prop_assert_eq!(data.len() % 512, 0);

            let tar_entries = read_with_tar_crate(&data);
            prop_assert_eq!(tar_entries.len(), files.len());

            let (source, _) = ChunkedSource::new(data, chunk);
            let decoded = decode_all(TarDecoder::new(source));
            prop_assert_eq!(decoded.len(), files.len());
            for ((header, body), ((path, content), expected)) in
                decoded.iter().zip(files.iter().zip(&headers))
            {
                prop_assert_eq!(&header.name, path);
                prop_assert_eq!(body, content);
                prop_assert_eq!(header.uid, expected.uid);
                prop_assert_eq!(header.size, expected.size);
            }
            for ((tar_path, _, tar_body), (path, content)) in tar_entries.iter().zip(&files) {
                prop_assert_eq!(tar_path, path);
                prop_assert_eq!(tar_body, content);
            }
        }

        #[test]
        fn test_decode_tar_crate_archives(
            paths in prop::collection::vec(path_strategy(), 1..8)
        ) {
            let data = create_tar_with(|b| {
                for (i, path) in paths.iter().enumerate() {
                    let content = format!("content{i}");
                    append_file(b, path, content.as_bytes());
                }
            });

            let entries = decode_all(decoder(data));
            prop_assert_eq!(entries.len(), paths.len());
            for (i, ((header, body), path)) in entries.iter().zip(&paths).enumerate() {
                prop_assert_eq!(&header.name, path);
                let expected = format!("content{i}");
                prop_assert_eq!(body, expected.as_bytes());
            }
        }
    }
}
