//! # Low-level text-ingestion primitives for markup parsers
//!
//! This crate gives a markup parser (HTML, XML, or similar) three things
//! it needs before it can even start tokenizing: a way to canonicalize the
//! bewildering number of names the web uses for character encodings
//! ([`alias::AliasTable`]), codecs that turn any of those encodings into a
//! stream of Unicode code points ([`codec`]), and a cursor-oriented input
//! stream that does the sniffing, BOM stripping, and incremental
//! decode/refill bookkeeping a streaming tokenizer expects
//! ([`input_stream::InputStream`]).
//!
//! Typical use:
//!
//! ```no_run
//! use std::sync::Arc;
//! use charstream::alias::AliasTable;
//! use charstream::codec::CodecRegistry;
//! use charstream::input_stream::InputStream;
//!
//! let table = Arc::new(AliasTable::builtin());
//! let registry = Arc::new(CodecRegistry::with_defaults());
//! let mut stream = InputStream::new(table, registry, None, 0, None).unwrap();
//! stream.append(Some(b"hello"));
//! stream.append(None);
//! ```

#![warn(missing_docs)]

pub mod alias;
pub mod buffer;
pub mod codec;
pub mod error;
pub mod filter;
pub mod input_stream;
pub mod intern;

pub use alias::AliasTable;
pub use codec::{Codec, CodecFactory, CodecRegistry, CodecResult, ErrorMode};
pub use error::Error;
pub use filter::Filter;
pub use input_stream::{DetectFn, InputStream, PeekResult};

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn end_to_end_ascii_round_trip() {
        let table = Arc::new(AliasTable::builtin());
        let registry = Arc::new(CodecRegistry::with_defaults());
        let mut stream = InputStream::new(table, registry, None, 0, None).unwrap();
        stream.append(Some(b"abc"));
        stream.append(None);
        let mut out = Vec::new();
        loop {
            match stream.peek(0) {
                PeekResult::Byte { pos, len } => {
                    out.extend_from_slice(stream.slice(pos, len));
                    stream.advance(len as usize);
                }
                PeekResult::Eof => break,
                PeekResult::OutOfData => panic!("unexpected OutOfData with EOF already flagged"),
            }
        }
        assert_eq!(out, b"abc");
    }
}
