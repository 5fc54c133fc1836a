//! Native UTF-16 (BE, LE, and unmarked) ⇄ UCS-4 codec, §4.2.2.

use super::{Codec, CodecFactory, CodecResult, ErrorMode, MIB_UTF16, MIB_UTF16BE, MIB_UTF16LE};

const REPLACEMENT: u32 = 0xFFFD;

/// Byte order a [`Utf16Codec`] reads and writes 16-bit units in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Big,
    Little,
}

fn read_unit(b: &[u8; 2], endian: Endian) -> u16 {
    match endian {
        Endian::Big => u16::from_be_bytes(*b),
        Endian::Little => u16::from_le_bytes(*b),
    }
}

fn write_unit(unit: u16, endian: Endian, dst: &mut [u8; 2]) {
    *dst = match endian {
        Endian::Big => unit.to_be_bytes(),
        Endian::Little => unit.to_le_bytes(),
    };
}

fn is_high_surrogate(u: u16) -> bool {
    (0xD800..=0xDBFF).contains(&u)
}

fn is_low_surrogate(u: u16) -> bool {
    (0xDC00..=0xDFFF).contains(&u)
}

/// Native UTF-16 codec. `mib` is whichever of UTF-16/UTF-16BE/UTF-16LE this
/// instance was constructed for; unmarked `UTF-16` assumes big-endian, per
/// the IANA default, since BOM handling is [`crate::input_stream::InputStream`]'s
/// responsibility, not the codec's.
pub struct Utf16Codec {
    mib: u16,
    endian: Endian,
    mode: ErrorMode,
    /// A retained lead byte of a not-yet-complete 16-bit unit.
    partial_byte: Option<u8>,
    /// A retained high surrogate awaiting its low surrogate.
    pending_high: Option<u16>,
    last_was_repl: bool,
}

impl Utf16Codec {
    pub fn new(mib: u16, mode: ErrorMode) -> Self {
        let endian = if mib == MIB_UTF16LE {
            Endian::Little
        } else {
            Endian::Big
        };
        Self {
            mib,
            endian,
            mode,
            partial_byte: None,
            pending_high: None,
            last_was_repl: false,
        }
    }

    fn emit_replacement(&mut self, dst: &mut [u8], dst_pos: &mut usize) -> bool {
        if !self.last_was_repl {
            if dst.len() - *dst_pos < 4 {
                return false;
            }
            dst[*dst_pos..*dst_pos + 4].copy_from_slice(&REPLACEMENT.to_be_bytes());
            *dst_pos += 4;
            self.last_was_repl = true;
        }
        true
    }
}

impl Codec for Utf16Codec {
    fn mib(&self) -> u16 {
        self.mib
    }

    fn decode(&mut self, src: &[u8], dst: &mut [u8]) -> (CodecResult, usize, usize) {
        let mut src_pos = 0usize;
        let mut dst_pos = 0usize;
        loop {
            // Assemble the next 16-bit unit from a retained lead byte (if
            // any) plus fresh src bytes.
            let mut unit_src_len = 0usize;
            let unit = match self.partial_byte.take() {
                Some(lead) => {
                    if src_pos >= src.len() {
                        if src.is_empty() && src_pos == 0 {
                            // Flush with a dangling lead byte.
                            self.pending_high = None;
                            return match self.mode {
                                ErrorMode::Strict => (CodecResult::Invalid, 0, dst_pos),
                                ErrorMode::Loose | ErrorMode::Translit => {
                                    if !self.emit_replacement(dst, &mut dst_pos) {
                                        return (CodecResult::NoMem, 0, dst_pos);
                                    }
                                    (CodecResult::Ok, 0, dst_pos)
                                }
                            };
                        }
                        self.partial_byte = Some(lead);
                        return (CodecResult::NeedData, src_pos, dst_pos);
                    }
                    let second = src[src_pos];
                    src_pos += 1;
                    unit_src_len = 1;
                    read_unit(&[lead, second], self.endian)
                }
                None => {
                    if src_pos >= src.len() {
                        if let Some(high) = self.pending_high.take() {
                            if src.is_empty() && src_pos == 0 {
                                return match self.mode {
                                    ErrorMode::Strict => (CodecResult::Invalid, 0, dst_pos),
                                    ErrorMode::Loose | ErrorMode::Translit => {
                                        if !self.emit_replacement(dst, &mut dst_pos) {
                                            return (CodecResult::NoMem, 0, dst_pos);
                                        }
                                        (CodecResult::Ok, 0, dst_pos)
                                    }
                                };
                            }
                            self.pending_high = Some(high);
                        }
                        break;
                    }
                    if src.len() - src_pos < 2 {
                        self.partial_byte = Some(src[src_pos]);
                        src_pos += 1;
                        if src_pos >= src.len() {
                            return (CodecResult::NeedData, src_pos, dst_pos);
                        }
                        continue;
                    }
                    let pair = [src[src_pos], src[src_pos + 1]];
                    src_pos += 2;
                    unit_src_len = 2;
                    read_unit(&pair, self.endian)
                }
            };

            if let Some(high) = self.pending_high.take() {
                if is_low_surrogate(unit) {
                    let scalar = 0x10000
                        + ((high as u32 - 0xD800) << 10)
                        + (unit as u32 - 0xDC00);
                    if dst.len() - dst_pos < 4 {
                        // Roll back: re-arm pending_high and un-consume the
                        // low surrogate's bytes so the retry sees them again.
                        self.pending_high = Some(high);
                        src_pos -= unit_src_len;
                        return (CodecResult::NoMem, src_pos, dst_pos);
                    }
                    dst[dst_pos..dst_pos + 4].copy_from_slice(&scalar.to_be_bytes());
                    dst_pos += 4;
                    self.last_was_repl = false;
                    continue;
                } else {
                    // Lone high surrogate: substitute/fail, then reprocess
                    // `unit` as a fresh unit.
                    match self.mode {
                        ErrorMode::Strict => {
                            src_pos -= unit_src_len;
                            return (CodecResult::Invalid, src_pos, dst_pos);
                        }
                        ErrorMode::Loose | ErrorMode::Translit => {
                            if !self.emit_replacement(dst, &mut dst_pos) {
                                src_pos -= unit_src_len;
                                return (CodecResult::NoMem, src_pos, dst_pos);
                            }
                        }
                    }
                }
            }

            if is_high_surrogate(unit) {
                self.pending_high = Some(unit);
                continue;
            }
            if is_low_surrogate(unit) {
                // Lone low surrogate, no preceding high.
                match self.mode {
                    ErrorMode::Strict => return (CodecResult::Invalid, src_pos, dst_pos),
                    ErrorMode::Loose | ErrorMode::Translit => {
                        if !self.emit_replacement(dst, &mut dst_pos) {
                            return (CodecResult::NoMem, src_pos, dst_pos);
                        }
                        continue;
                    }
                }
            }
            if dst.len() - dst_pos < 4 {
                return (CodecResult::NoMem, src_pos, dst_pos);
            }
            dst[dst_pos..dst_pos + 4].copy_from_slice(&(unit as u32).to_be_bytes());
            dst_pos += 4;
            self.last_was_repl = false;
        }
        (CodecResult::Ok, src_pos, dst_pos)
    }

    fn encode(&mut self, src: &[u8], dst: &mut [u8]) -> (CodecResult, usize, usize) {
        let mut src_pos = 0usize;
        let mut dst_pos = 0usize;
        while src.len() - src_pos >= 4 {
            let scalar = u32::from_be_bytes([
                src[src_pos],
                src[src_pos + 1],
                src[src_pos + 2],
                src[src_pos + 3],
            ]);
            if (0xD800..=0xDFFF).contains(&scalar) || scalar > 0x10FFFF {
                match self.mode {
                    ErrorMode::Strict => return (CodecResult::Invalid, src_pos, dst_pos),
                    ErrorMode::Loose | ErrorMode::Translit => {
                        if dst.len() - dst_pos < 2 {
                            return (CodecResult::NoMem, src_pos, dst_pos);
                        }
                        let mut unit_bytes = [0u8; 2];
                        write_unit(REPLACEMENT as u16, self.endian, &mut unit_bytes);
                        dst[dst_pos..dst_pos + 2].copy_from_slice(&unit_bytes);
                        dst_pos += 2;
                        src_pos += 4;
                        continue;
                    }
                }
            }
            if scalar <= 0xFFFF {
                if dst.len() - dst_pos < 2 {
                    return (CodecResult::NoMem, src_pos, dst_pos);
                }
                let mut unit_bytes = [0u8; 2];
                write_unit(scalar as u16, self.endian, &mut unit_bytes);
                dst[dst_pos..dst_pos + 2].copy_from_slice(&unit_bytes);
                dst_pos += 2;
            } else {
                if dst.len() - dst_pos < 4 {
                    return (CodecResult::NoMem, src_pos, dst_pos);
                }
                let v = scalar - 0x10000;
                let high = 0xD800 + (v >> 10) as u16;
                let low = 0xDC00 + (v & 0x3FF) as u16;
                let mut unit_bytes = [0u8; 2];
                write_unit(high, self.endian, &mut unit_bytes);
                dst[dst_pos..dst_pos + 2].copy_from_slice(&unit_bytes);
                dst_pos += 2;
                write_unit(low, self.endian, &mut unit_bytes);
                dst[dst_pos..dst_pos + 2].copy_from_slice(&unit_bytes);
                dst_pos += 2;
            }
            src_pos += 4;
        }
        (CodecResult::Ok, src_pos, dst_pos)
    }

    fn reset(&mut self) {
        self.partial_byte = None;
        self.pending_high = None;
        self.last_was_repl = false;
    }
}

/// Constructs [`Utf16Codec`]s for `UTF-16`, `UTF-16BE`, and `UTF-16LE`.
pub struct Utf16Factory;

impl CodecFactory for Utf16Factory {
    fn handles(&self, mib: u16) -> bool {
        matches!(mib, MIB_UTF16 | MIB_UTF16BE | MIB_UTF16LE)
    }

    fn create(&self, mib: u16, _canonical_name: &str, mode: ErrorMode) -> Box<dyn Codec> {
        Box::new(Utf16Codec::new(mib, mode))
    }
}
