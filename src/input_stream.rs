//! Cursor-oriented UTF-8 input stream, §4.4: detects the source encoding
//! from the first chunk, strips any matching BOM, and incrementally
//! refills a UTF-8 buffer a parser can `peek`/`advance` over.

use crate::alias::AliasTable;
use crate::buffer::{ByteBuffer, GrowableBuffer};
use crate::codec::{self, CodecRegistry, CodecResult, ErrorMode};
use crate::error::Error;
use crate::filter::Filter;
use std::sync::Arc;
use tracing::{trace, warn};

/// Detects the source encoding of the first chunk of raw input. Returns
/// `Some((mib, encsrc))` to commit to an encoding, or `None` to defer to
/// the default (UTF-8, `encsrc = 0`).
pub type DetectFn = Box<dyn Fn(&[u8]) -> Option<(u16, u32)> + Send + Sync>;

/// The outcome of a [`InputStream::peek`] call.
///
/// Carries an offset and length into the stream's internal UTF-8 buffer
/// rather than a raw pointer: a live borrow from `peek` would otherwise
/// prevent the following `&mut self` call to `advance`/`insert`, which
/// Rust's borrow checker (correctly) does not allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeekResult {
    /// No more data will ever arrive (`append(None)` was called and the
    /// buffered UTF-8 is exhausted).
    Eof,
    /// No character is available yet, but more input may still arrive.
    OutOfData,
    /// A full character is available at `pos`, `len` bytes long.
    Byte { pos: usize, len: u8 },
}

/// Scratch buffer size used to drain [`Filter::process_chunk`] per refill.
const SCRATCH_LEN: usize = 4096;

/// UTF-8-normalizing input stream with a stable read cursor.
pub struct InputStream {
    raw: GrowableBuffer,
    utf8: GrowableBuffer,
    cursor: usize,
    had_eof: bool,
    done_first_chunk: bool,
    mibenum: u16,
    encsrc: u32,
    filter: Option<Filter>,
    table: Arc<AliasTable>,
    registry: Arc<CodecRegistry>,
    mode: ErrorMode,
    csdetect: Option<DetectFn>,
    /// Encoding forced at construction time (`enc`, `encsrc`), bypassing
    /// sniffing entirely. Resolved once, eagerly, so a bad name is reported
    /// at construction rather than on first use.
    forced: Option<(u16, u32)>,
}

impl InputStream {
    /// Creates a fresh stream. `enc`, if given, forces the source encoding
    /// and `csdetect` is never consulted; `encsrc` is the priority recorded
    /// alongside it for [`InputStream::read_charset`]. If `enc` is `None`,
    /// `csdetect` (if given) is consulted once, on the first non-empty
    /// chunk, to choose the source encoding, defaulting to UTF-8 if absent
    /// or declining.
    ///
    /// Returns [`Error::BadEncoding`] if `enc` is given but does not
    /// canonicalize.
    pub fn new(
        table: Arc<AliasTable>,
        registry: Arc<CodecRegistry>,
        enc: Option<&str>,
        encsrc: u32,
        csdetect: Option<DetectFn>,
    ) -> Result<Self, Error> {
        let forced = match enc {
            Some(name) => {
                let canonical = table
                    .canonicalise(name)
                    .ok_or_else(|| Error::BadEncoding(name.to_string()))?;
                Some((canonical.mib, encsrc))
            }
            None => None,
        };
        Ok(Self {
            raw: GrowableBuffer::new(),
            utf8: GrowableBuffer::new(),
            cursor: 0,
            had_eof: false,
            done_first_chunk: false,
            mibenum: 0,
            encsrc: 0,
            filter: None,
            table,
            registry,
            mode: ErrorMode::Loose,
            csdetect,
            forced,
        })
    }

    /// Like [`InputStream::new`], but codec errors are reported as
    /// [`crate::codec::CodecResult::Invalid`] instead of silently
    /// substituted with `U+FFFD`.
    pub fn with_error_mode(mut self, mode: ErrorMode) -> Self {
        self.mode = mode;
        self
    }

    /// Appends more raw bytes (`Some`), or flags that no more will ever
    /// arrive (`None`).
    pub fn append(&mut self, data: Option<&[u8]>) {
        match data {
            Some(bytes) => self.raw.append(bytes),
            None => self.had_eof = true,
        }
    }

    /// Splices `data`, which must already be valid UTF-8, directly into the
    /// buffer at the current cursor. Used for re-entrant sources (e.g. an
    /// HTML `document.write`).
    pub fn insert(&mut self, data: &[u8]) {
        self.utf8.insert(self.cursor, data);
    }

    /// Looks `offset` UTF-8 characters ahead of the cursor.
    pub fn peek(&mut self, offset: usize) -> PeekResult {
        loop {
            if self.cursor + offset < self.utf8.len() {
                let pos = self.cursor + offset;
                let lead = self.utf8.data()[pos];
                let len = utf8_char_len(lead);
                if pos + len as usize <= self.utf8.len() {
                    return PeekResult::Byte { pos, len };
                }
                // A sequence starting inside the buffer runs past its end;
                // this cannot happen with this crate's own codecs (they
                // only ever emit whole characters) but a refill can only
                // help, never hurt.
            }
            if self.raw.is_empty() {
                return if self.had_eof {
                    PeekResult::Eof
                } else {
                    PeekResult::OutOfData
                };
            }
            self.refill();
        }
    }

    /// Returns the bytes a [`PeekResult::Byte`] refers to.
    pub fn slice(&self, pos: usize, len: u8) -> &[u8] {
        &self.utf8.data()[pos..pos + len as usize]
    }

    /// Advances the cursor past a character already returned by `peek`.
    /// Panics if `bytes` would move the cursor past the occupied length of
    /// the UTF-8 buffer — a programmer error, not a recoverable one.
    pub fn advance(&mut self, bytes: usize) {
        if self.cursor == self.utf8.len() {
            return;
        }
        let remaining = self.utf8.len() - self.cursor;
        assert!(
            bytes <= remaining,
            "advance({bytes}) exceeds {remaining} bytes available past the cursor"
        );
        self.cursor += bytes;
    }

    /// The canonical name and `encsrc` priority of the encoding currently
    /// in use. Before the first chunk is processed this is always
    /// `("UTF-8", 0)`.
    pub fn read_charset(&self) -> (&str, u32) {
        if !self.done_first_chunk {
            return ("UTF-8", 0);
        }
        (
            self.table.mibenum_to_name(self.mibenum).unwrap_or("UTF-8"),
            self.encsrc,
        )
    }

    fn sniff_and_init(&mut self) {
        let (mib, encsrc) = self.forced.unwrap_or_else(|| {
            self.csdetect
                .as_ref()
                .and_then(|detect| detect(self.raw.data()))
                .unwrap_or((codec::MIB_UTF8, 0))
        });
        assert!(mib != 0, "encoding detection must resolve a non-zero MIB enum");
        self.strip_bom(mib);
        let name = self
            .table
            .mibenum_to_name(mib)
            .map(|s| s.to_string())
            .unwrap_or_else(|| "UTF-8".to_string());
        debug_log_detected(&name, encsrc);
        self.filter = Some(
            Filter::new(&self.registry, &self.table, &name, "UTF-8", self.mode)
                .expect("the detected encoding must be constructible"),
        );
        self.mibenum = mib;
        self.encsrc = encsrc;
        self.done_first_chunk = true;
    }

    fn strip_bom(&mut self, mib: u16) {
        let bom: &[u8] = match mib {
            codec::MIB_UTF8 => &[0xEF, 0xBB, 0xBF],
            codec::MIB_UTF32BE => &[0x00, 0x00, 0xFE, 0xFF],
            codec::MIB_UTF32LE => &[0xFF, 0xFE, 0x00, 0x00],
            codec::MIB_UTF16BE => &[0xFE, 0xFF],
            codec::MIB_UTF16LE => &[0xFF, 0xFE],
            _ => &[],
        };
        if !bom.is_empty() && self.raw.data().starts_with(bom) {
            self.raw.discard(bom.len());
        }
    }

    fn refill(&mut self) {
        if !self.done_first_chunk {
            if self.raw.is_empty() {
                return;
            }
            self.sniff_and_init();
        }

        if self.cursor == self.utf8.len() {
            self.utf8.clear();
        } else {
            let remaining = self.utf8.len() - self.cursor;
            let tail = self.utf8.data()[self.cursor..].to_vec();
            self.utf8.clear();
            self.utf8.append(&tail);
            if remaining * 2 > self.utf8.capacity() {
                self.utf8.grow(self.utf8.capacity().max(16));
            }
        }
        self.cursor = 0;

        let mut scratch = [0u8; SCRATCH_LEN];
        loop {
            if self.raw.is_empty() {
                break;
            }
            let filter = self.filter.as_mut().expect("filter initialized above");
            let (res, consumed, produced) = filter.process_chunk(self.raw.data(), &mut scratch);
            if produced > 0 {
                self.utf8.append(&scratch[0..produced]);
            }
            self.raw.discard(consumed);
            trace!(consumed, produced, ?res, "input stream refill step");
            match res {
                CodecResult::Invalid => {
                    warn!("stream hit an invalid byte sequence in strict mode; stopping refill");
                    break;
                }
                CodecResult::NeedData => break,
                _ if consumed == 0 && produced == 0 => break,
                _ => continue,
            }
        }
    }
}

fn debug_log_detected(name: &str, encsrc: u32) {
    tracing::debug!(name, encsrc, "input stream committed to source encoding");
}

/// Length, in bytes, of the UTF-8 sequence starting with `lead`. This
/// stream's own buffer only ever holds well-formed UTF-8 (it is the output
/// of this crate's codecs), so `lead` is trusted rather than re-validated.
fn utf8_char_len(lead: u8) -> u8 {
    if lead & 0x80 == 0 {
        1
    } else if lead & 0xE0 == 0xC0 {
        2
    } else if lead & 0xF0 == 0xE0 {
        3
    } else if lead & 0xF8 == 0xF0 {
        4
    } else {
        1
    }
}
