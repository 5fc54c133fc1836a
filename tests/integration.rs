use charstream::alias::AliasTable;
use charstream::codec::{CodecRegistry, CodecResult, ErrorMode};
use charstream::filter::Filter;
use charstream::input_stream::{InputStream, PeekResult};
use std::sync::Arc;

fn collect_all(stream: &mut InputStream) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        match stream.peek(0) {
            PeekResult::Byte { pos, len } => {
                out.extend_from_slice(stream.slice(pos, len));
                stream.advance(len as usize);
            }
            PeekResult::Eof => break,
            PeekResult::OutOfData => break,
        }
    }
    out
}

#[test]
fn utf8_bom_is_stripped() {
    let table = Arc::new(AliasTable::builtin());
    let registry = Arc::new(CodecRegistry::with_defaults());
    let mut stream = InputStream::new(table, registry, Some("UTF-8"), 0, None).unwrap();
    stream.append(Some(b"\xef\xbb\xbfhello"));
    stream.append(None);
    assert_eq!(collect_all(&mut stream), b"hello");
}

#[test]
fn latin1_is_decoded_via_forced_encoding() {
    let table = Arc::new(AliasTable::builtin());
    let registry = Arc::new(CodecRegistry::with_defaults());
    // Scenario 2: the stream is told up front it's reading ISO-8859-1, no
    // content sniffing involved.
    let mut stream =
        InputStream::new(table, registry, Some("ISO-8859-1"), 10, None).unwrap();
    // 0xE9 in Latin-1 is 'é'; space and 'a' are ASCII-identical in both.
    stream.append(Some(&[0xE9, b' ', b'a']));
    stream.append(None);
    let out = collect_all(&mut stream);
    assert_eq!(out, "é a".as_bytes());
    assert_eq!(stream.read_charset(), ("ISO-8859-1", 10));
}

#[test]
fn no_detector_defaults_to_utf8() {
    let table = Arc::new(AliasTable::builtin());
    let registry = Arc::new(CodecRegistry::with_defaults());
    let mut stream = InputStream::new(table, registry, None, 0, None).unwrap();
    stream.append(Some(b"plain text"));
    stream.append(None);
    assert_eq!(collect_all(&mut stream), b"plain text");
    assert_eq!(stream.read_charset(), ("UTF-8", 0));
}

#[test]
fn illegal_utf8_in_loose_mode_substitutes() {
    let table = Arc::new(AliasTable::builtin());
    let registry = Arc::new(CodecRegistry::with_defaults());
    let mut stream = InputStream::new(table, registry, None, 0, None)
        .unwrap()
        .with_error_mode(ErrorMode::Loose);
    // 'A', an invalid UTF-8 lead byte, 'A'
    stream.append(Some(b"A\xc0A"));
    stream.append(None);
    let out = collect_all(&mut stream);
    assert_eq!(out, "A\u{FFFD}A".as_bytes());
}

#[test]
fn alias_names_are_equivalent() {
    let table = AliasTable::builtin();
    let a = table.canonicalise("utf-8").unwrap();
    let b = table.canonicalise("UTF8").unwrap();
    let c = table.canonicalise("unicode-1-1-utf-8").unwrap();
    assert_eq!(a.mib, b.mib);
    assert_eq!(b.mib, c.mib);
}

#[test]
fn chunked_append_accumulates_across_calls() {
    let table = Arc::new(AliasTable::builtin());
    let registry = Arc::new(CodecRegistry::with_defaults());
    let mut stream = InputStream::new(table, registry, None, 0, None).unwrap();
    for byte in b"hello, world" {
        stream.append(Some(std::slice::from_ref(byte)));
    }
    stream.append(None);
    assert_eq!(collect_all(&mut stream), b"hello, world");
}

#[test]
fn empty_append_then_eof_is_immediately_drained() {
    let table = Arc::new(AliasTable::builtin());
    let registry = Arc::new(CodecRegistry::with_defaults());
    let mut stream = InputStream::new(table, registry, None, 0, None).unwrap();
    stream.append(Some(b""));
    stream.append(None);
    assert_eq!(stream.peek(0), PeekResult::Eof);
}

#[test]
fn bom_split_across_two_appends_is_still_recognized() {
    let table = Arc::new(AliasTable::builtin());
    let registry = Arc::new(CodecRegistry::with_defaults());
    let mut stream = InputStream::new(table, registry, None, 0, None).unwrap();
    stream.append(Some(&[0xEFu8]));
    stream.append(Some(&[0xBB, 0xBF]));
    stream.append(Some(b"hi"));
    stream.append(None);
    assert_eq!(collect_all(&mut stream), b"hi");
}

#[test]
fn filter_set_encoding_then_reset_drops_prior_state() {
    let table = AliasTable::builtin();
    let registry = CodecRegistry::with_defaults();
    let mut filter = Filter::new(&registry, &table, "UTF-16BE", "UTF-8", ErrorMode::Strict).unwrap();
    let mut dst = [0u8; 32];
    // Feed a lone lead byte of a surrogate pair, leaving retained state.
    let (_, _, _) = filter.process_chunk(&[0xD8, 0x00], &mut dst);
    filter.set_encoding("UTF-8", &table, &registry).unwrap();
    filter.reset();
    let (res, consumed, produced) = filter.process_chunk(b"hi", &mut dst);
    assert_eq!(res, CodecResult::Ok);
    assert_eq!(consumed, 2);
    assert_eq!(&dst[0..produced], b"hi");
}

#[test]
fn insert_at_start_middle_and_end() {
    let table = Arc::new(AliasTable::builtin());
    let registry = Arc::new(CodecRegistry::with_defaults());
    let mut stream = InputStream::new(table, registry, None, 0, None).unwrap();
    stream.append(Some(b"bd"));
    stream.append(None);

    // Insert "a" before everything.
    stream.insert(b"a");
    let PeekResult::Byte { pos, len } = stream.peek(0) else {
        panic!("expected a byte")
    };
    assert_eq!(stream.slice(pos, len), b"a");
    stream.advance(len as usize);
    stream.advance(1); // past 'b'

    // Insert "c" between 'b' and 'd'.
    stream.insert(b"c");
    assert_eq!(collect_all(&mut stream), b"cd");
}
