//! Two-stage converter from any source encoding to the internal UTF-8
//! representation, pivoting through UCS-4, §4.3.

use crate::alias::AliasTable;
use crate::codec::{Codec, CodecRegistry, CodecResult, ErrorMode};
use crate::error::Error;

/// Code points the pivot buffer holds between a decode call and the
/// matching encode call.
const PIVOT_CAP: usize = 64;
const PIVOT_BYTES: usize = PIVOT_CAP * 4;

/// Decodes `src` through `read_codec` into the UCS-4 pivot, then encodes the
/// pivot through `write_codec` into `dst`, retaining any pivot tail the
/// write side couldn't fit across calls.
pub struct Filter {
    read_codec: Box<dyn Codec>,
    write_codec: Box<dyn Codec>,
    mode: ErrorMode,
    pivot_buf: [u8; PIVOT_BYTES],
    /// True while `pivot_buf[pivot_left..pivot_len]` still needs encoding.
    leftover: bool,
    pivot_left: usize,
    pivot_len: usize,
    current_mib: u16,
}

impl Filter {
    /// Builds a filter that decodes `src_name` and encodes `dst_name`
    /// (ordinarily `UTF-8`, the internal representation used everywhere
    /// else in this crate).
    pub fn new(
        registry: &CodecRegistry,
        table: &AliasTable,
        src_name: &str,
        dst_name: &str,
        mode: ErrorMode,
    ) -> Result<Self, Error> {
        let read_codec = registry.create(table, src_name, mode)?;
        let write_codec = registry.create(table, dst_name, mode)?;
        let current_mib = read_codec.mib();
        Ok(Self {
            read_codec,
            write_codec,
            mode,
            pivot_buf: [0; PIVOT_BYTES],
            leftover: false,
            pivot_left: 0,
            pivot_len: 0,
            current_mib,
        })
    }

    /// The MIB enum of the encoding currently being read.
    pub fn current_mib(&self) -> u16 {
        self.current_mib
    }

    /// Converts as much of `src` as fits into `dst`. Returns
    /// `(result, consumed, produced)`; `result` is `Ok` only once all of
    /// `src` has been consumed and fully flushed through to `dst`.
    pub fn process_chunk(&mut self, src: &[u8], dst: &mut [u8]) -> (CodecResult, usize, usize) {
        let mut dst_pos = 0usize;

        if self.leftover {
            let (res, c, p) = {
                let write_codec = &mut self.write_codec;
                write_codec.encode(&self.pivot_buf[self.pivot_left..self.pivot_len], dst)
            };
            self.pivot_left += c;
            dst_pos += p;
            if self.pivot_left >= self.pivot_len {
                self.leftover = false;
                self.pivot_left = 0;
                self.pivot_len = 0;
            }
            if res != CodecResult::Ok {
                // `src` is untouched until the leftover is fully flushed.
                return (res, 0, dst_pos);
            }
        }

        let mut src_pos = 0usize;
        while src_pos < src.len() {
            let (dres, dc, dp) = {
                let read_codec = &mut self.read_codec;
                let pivot_buf = &mut self.pivot_buf;
                read_codec.decode(&src[src_pos..], pivot_buf)
            };
            src_pos += dc;
            self.pivot_len = dp;
            self.pivot_left = 0;
            if !matches!(dres, CodecResult::Ok | CodecResult::NoMem) {
                return (dres, src_pos, dst_pos);
            }

            if self.pivot_len > 0 {
                let (eres, ec, ep) = {
                    let write_codec = &mut self.write_codec;
                    let pivot_buf = &self.pivot_buf;
                    write_codec.encode(&pivot_buf[0..self.pivot_len], &mut dst[dst_pos..])
                };
                self.pivot_left += ec;
                dst_pos += ep;
                if eres != CodecResult::Ok {
                    self.leftover = self.pivot_left < self.pivot_len;
                    return (eres, src_pos, dst_pos);
                }
            }

            if dc == 0 && dres == CodecResult::NoMem {
                // Decode made no progress against a fully-sized pivot
                // buffer; further looping here cannot help.
                return (CodecResult::NoMem, src_pos, dst_pos);
            }
        }
        (CodecResult::Ok, src_pos, dst_pos)
    }

    /// Switches the read side to `name`. A no-op if `name` canonicalizes to
    /// the encoding already in use. The write side never changes. State
    /// (leftover pivot, codec internals) is left untouched; call
    /// [`Filter::reset`] afterwards if a clean slate is wanted.
    pub fn set_encoding(&mut self, name: &str, table: &AliasTable, registry: &CodecRegistry) -> Result<(), Error> {
        let canonical = table
            .canonicalise(name)
            .ok_or_else(|| Error::BadEncoding(name.to_string()))?;
        if canonical.mib == self.current_mib {
            return Ok(());
        }
        let new_codec = registry.create(table, &canonical.name, self.mode)?;
        self.current_mib = new_codec.mib();
        self.read_codec = new_codec;
        Ok(())
    }

    /// Drops any retained pivot tail and resets both codecs.
    pub fn reset(&mut self) {
        self.leftover = false;
        self.pivot_left = 0;
        self.pivot_len = 0;
        self.read_codec.reset();
        self.write_codec.reset();
    }
}
