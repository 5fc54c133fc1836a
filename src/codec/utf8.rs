//! Native UTF-8 ⇄ UCS-4 codec: validation and error fixup, §4.2.1.

use super::{Codec, CodecFactory, CodecResult, ErrorMode, MIB_UTF8};

const REPLACEMENT: u32 = 0xFFFD;

/// Expected sequence length from a lead byte, or `0` if the byte can never
/// start a well-formed sequence.
fn utf8_width(lead: u8) -> usize {
    if lead & 0x80 == 0 {
        1
    } else if lead & 0xE0 == 0xC0 {
        2
    } else if lead & 0xF0 == 0xE0 {
        3
    } else if lead & 0xF8 == 0xF0 {
        4
    } else {
        0
    }
}

fn decode_scalar(width: usize, window: &[u8; 4]) -> u32 {
    match width {
        1 => window[0] as u32,
        2 => (((window[0] & 0x1F) as u32) << 6) | (window[1] & 0x3F) as u32,
        3 => {
            (((window[0] & 0x0F) as u32) << 12)
                | (((window[1] & 0x3F) as u32) << 6)
                | (window[2] & 0x3F) as u32
        }
        4 => {
            (((window[0] & 0x07) as u32) << 18)
                | (((window[1] & 0x3F) as u32) << 12)
                | (((window[2] & 0x3F) as u32) << 6)
                | (window[3] & 0x3F) as u32
        }
        _ => unreachable!("width is always 1..=4 here"),
    }
}

fn is_overlong(width: usize, scalar: u32) -> bool {
    match width {
        2 => scalar < 0x80,
        3 => scalar < 0x800,
        4 => scalar < 0x10000,
        _ => false,
    }
}

fn utf8_encoded_len(scalar: u32) -> usize {
    match scalar {
        0..=0x7F => 1,
        0x80..=0x7FF => 2,
        0x800..=0xFFFF => 3,
        _ => 4,
    }
}

fn encode_scalar_to(scalar: u32, dst: &mut [u8]) {
    match dst.len() {
        1 => dst[0] = scalar as u8,
        2 => {
            dst[0] = 0xC0 | (scalar >> 6) as u8;
            dst[1] = 0x80 | (scalar & 0x3F) as u8;
        }
        3 => {
            dst[0] = 0xE0 | (scalar >> 12) as u8;
            dst[1] = 0x80 | ((scalar >> 6) & 0x3F) as u8;
            dst[2] = 0x80 | (scalar & 0x3F) as u8;
        }
        4 => {
            dst[0] = 0xF0 | (scalar >> 18) as u8;
            dst[1] = 0x80 | ((scalar >> 12) & 0x3F) as u8;
            dst[2] = 0x80 | ((scalar >> 6) & 0x3F) as u8;
            dst[3] = 0x80 | (scalar & 0x3F) as u8;
        }
        _ => unreachable!(),
    }
}

/// Native, allocation-free UTF-8 codec.
pub struct Utf8Codec {
    mode: ErrorMode,
    /// Bytes of an in-progress sequence retained across calls.
    partial: [u8; 4],
    partial_len: usize,
    /// Squashes a run of consecutive invalid bytes into a single `U+FFFD`.
    last_was_repl: bool,
}

impl Utf8Codec {
    pub fn new(mode: ErrorMode) -> Self {
        Self {
            mode,
            partial: [0; 4],
            partial_len: 0,
            last_was_repl: false,
        }
    }

    fn logical_len(&self, src: &[u8], src_pos: usize) -> usize {
        self.partial_len + (src.len() - src_pos)
    }

    fn logical_byte(&self, src: &[u8], src_pos: usize, i: usize) -> u8 {
        if i < self.partial_len {
            self.partial[i]
        } else {
            src[src_pos + (i - self.partial_len)]
        }
    }

    /// Commits `k` logical bytes (partial-then-src) as consumed.
    fn commit(&mut self, src_pos: &mut usize, k: usize) {
        if k <= self.partial_len {
            self.partial.copy_within(k..self.partial_len, 0);
            self.partial_len -= k;
        } else {
            let from_src = k - self.partial_len;
            self.partial_len = 0;
            *src_pos += from_src;
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

impl Codec for Utf8Codec {
    fn mib(&self) -> u16 {
        MIB_UTF8
    }

    fn decode(&mut self, src: &[u8], dst: &mut [u8]) -> (CodecResult, usize, usize) {
        let mut src_pos = 0usize;
        let mut dst_pos = 0usize;
        loop {
            let avail = self.logical_len(src, src_pos);
            if avail == 0 {
                break;
            }
            let lead = self.logical_byte(src, src_pos, 0);
            let width = utf8_width(lead);
            if width == 0 {
                match self.mode {
                    ErrorMode::Strict => return (CodecResult::Invalid, src_pos, dst_pos),
                    ErrorMode::Loose | ErrorMode::Translit => {
                        if !self.emit_replacement(dst, &mut dst_pos) {
                            return (CodecResult::NoMem, src_pos, dst_pos);
                        }
                        self.commit(&mut src_pos, 1);
                        continue;
                    }
                }
            }
            if avail < width {
                // Flush call (no new input at all): resolve the leftover.
                if src.is_empty() && src_pos == 0 {
                    return match self.mode {
                        ErrorMode::Strict => {
                            self.partial_len = 0;
                            (CodecResult::Invalid, 0, dst_pos)
                        }
                        ErrorMode::Loose | ErrorMode::Translit => {
                            if !self.emit_replacement(dst, &mut dst_pos) {
                                return (CodecResult::NoMem, 0, dst_pos);
                            }
                            self.partial_len = 0;
                            (CodecResult::Ok, 0, dst_pos)
                        }
                    };
                }
                // Retain everything available and consume the rest of src.
                let mut buf = [0u8; 4];
                for (i, slot) in buf.iter_mut().enumerate().take(avail) {
                    *slot = self.logical_byte(src, src_pos, i);
                }
                self.partial[0..avail].copy_from_slice(&buf[0..avail]);
                self.partial_len = avail;
                src_pos = src.len();
                return (CodecResult::NeedData, src_pos, dst_pos);
            }
            let mut window = [0u8; 4];
            for (i, slot) in window.iter_mut().enumerate().take(width) {
                *slot = self.logical_byte(src, src_pos, i);
            }
            let mut valid = (1..width).all(|i| window[i] & 0xC0 == 0x80);
            let mut scalar = 0u32;
            if valid {
                scalar = decode_scalar(width, &window);
                if is_overlong(width, scalar)
                    || (0xD800..=0xDFFF).contains(&scalar)
                    || scalar > 0x10FFFF
                {
                    valid = false;
                }
            }
            if valid {
                if dst.len() - dst_pos < 4 {
                    return (CodecResult::NoMem, src_pos, dst_pos);
                }
                dst[dst_pos..dst_pos + 4].copy_from_slice(&scalar.to_be_bytes());
                dst_pos += 4;
                self.last_was_repl = false;
                self.commit(&mut src_pos, width);
                continue;
            }
            match self.mode {
                ErrorMode::Strict => return (CodecResult::Invalid, src_pos, dst_pos),
                ErrorMode::Loose | ErrorMode::Translit => {
                    if !self.emit_replacement(dst, &mut dst_pos) {
                        return (CodecResult::NoMem, src_pos, dst_pos);
                    }
                    self.commit(&mut src_pos, 1);
                    continue;
                }
            }
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
                        if dst.len() - dst_pos < 3 {
                            return (CodecResult::NoMem, src_pos, dst_pos);
                        }
                        dst[dst_pos..dst_pos + 3].copy_from_slice(&[0xEF, 0xBF, 0xBD]);
                        dst_pos += 3;
                        src_pos += 4;
                        continue;
                    }
                }
            }
            let need = utf8_encoded_len(scalar);
            if dst.len() - dst_pos < need {
                return (CodecResult::NoMem, src_pos, dst_pos);
            }
            encode_scalar_to(scalar, &mut dst[dst_pos..dst_pos + need]);
            dst_pos += need;
            src_pos += 4;
        }
        (CodecResult::Ok, src_pos, dst_pos)
    }

    fn reset(&mut self) {
        self.partial_len = 0;
        self.last_was_repl = false;
    }
}

/// Constructs [`Utf8Codec`]s for the `UTF-8` MIB enum.
pub struct Utf8Factory;

impl CodecFactory for Utf8Factory {
    fn handles(&self, mib: u16) -> bool {
        mib == MIB_UTF8
    }

    fn create(&self, _mib: u16, _canonical_name: &str, mode: ErrorMode) -> Box<dyn Codec> {
        Box::new(Utf8Codec::new(mode))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn decode_all(codec: &mut Utf8Codec, mut src: &[u8]) -> Vec<u32> {
        let mut out = Vec::new();
        loop {
            let mut dst = [0u8; 256];
            let (res, c, p) = codec.decode(src, &mut dst);
            for chunk in dst[0..p].chunks_exact(4) {
                out.push(u32::from_be_bytes(chunk.try_into().unwrap()));
            }
            src = &src[c..];
            match res {
                CodecResult::Ok if src.is_empty() => break,
                CodecResult::Ok => continue,
                CodecResult::NeedData => break,
                other => panic!("unexpected result {other:?}"),
            }
        }
        out
    }

    #[test]
    fn decodes_ascii() {
        let mut c = Utf8Codec::new(ErrorMode::Strict);
        assert_eq!(decode_all(&mut c, b"abc"), vec!['a' as u32, 'b' as u32, 'c' as u32]);
    }

    #[test]
    fn decodes_multibyte() {
        let mut c = Utf8Codec::new(ErrorMode::Strict);
        // 'é' = C3 A9
        assert_eq!(decode_all(&mut c, b"\xc3\xa9"), vec![0xE9]);
    }

    #[test]
    fn rejects_overlong_strict() {
        let mut c = Utf8Codec::new(ErrorMode::Strict);
        let mut dst = [0u8; 16];
        // C0 80 is an overlong encoding of NUL
        let (res, _, _) = c.decode(b"\xc0\x80", &mut dst);
        assert_eq!(res, CodecResult::Invalid);
    }

    #[test]
    fn loose_mode_substitutes() {
        let mut c = Utf8Codec::new(ErrorMode::Loose);
        // A, invalid lead byte 0xC0, A
        assert_eq!(
            decode_all(&mut c, b"A\xc0A"),
            vec!['A' as u32, 0xFFFD, 'A' as u32]
        );
    }

    #[test]
    fn need_data_across_calls() {
        let mut c = Utf8Codec::new(ErrorMode::Strict);
        let mut dst = [0u8; 16];
        let (res, consumed, produced) = c.decode(b"\xe2\x82", &mut dst);
        assert_eq!(res, CodecResult::NeedData);
        assert_eq!(consumed, 2);
        assert_eq!(produced, 0);
        let (res, consumed, produced) = c.decode(b"\xac", &mut dst);
        assert_eq!(res, CodecResult::Ok);
        assert_eq!(consumed, 1);
        assert_eq!(produced, 4);
        assert_eq!(u32::from_be_bytes(dst[0..4].try_into().unwrap()), 0x20AC);
    }

    #[test]
    fn flush_incomplete_strict_is_invalid() {
        let mut c = Utf8Codec::new(ErrorMode::Strict);
        let mut dst = [0u8; 16];
        let (res, _, _) = c.decode(b"\xe2\x82", &mut dst);
        assert_eq!(res, CodecResult::NeedData);
        let (res, consumed, produced) = c.decode(b"", &mut dst);
        assert_eq!(res, CodecResult::Invalid);
        assert_eq!(consumed, 0);
        assert_eq!(produced, 0);
    }

    #[test]
    fn flush_incomplete_loose_substitutes() {
        let mut c = Utf8Codec::new(ErrorMode::Loose);
        let mut dst = [0u8; 16];
        let (res, _, _) = c.decode(b"\xe2\x82", &mut dst);
        assert_eq!(res, CodecResult::NeedData);
        let (res, _, produced) = c.decode(b"", &mut dst);
        assert_eq!(res, CodecResult::Ok);
        assert_eq!(&dst[0..produced], b"\xef\xbf\xbd");
    }

    #[test]
    fn encode_round_trip() {
        let mut dec = Utf8Codec::new(ErrorMode::Strict);
        let text = "héllo wörld".as_bytes();
        let points = decode_all(&mut dec, text);
        let mut pivot = Vec::new();
        for p in &points {
            pivot.extend_from_slice(&p.to_be_bytes());
        }
        let mut enc = Utf8Codec::new(ErrorMode::Strict);
        let mut dst = vec![0u8; 256];
        let (res, consumed, produced) = enc.encode(&pivot, &mut dst);
        assert_eq!(res, CodecResult::Ok);
        assert_eq!(consumed, pivot.len());
        assert_eq!(&dst[0..produced], text);
    }

    #[test]
    fn reset_clears_partial_state() {
        let mut c = Utf8Codec::new(ErrorMode::Strict);
        let mut dst = [0u8; 16];
        let (res, _, _) = c.decode(b"\xe2\x82", &mut dst);
        assert_eq!(res, CodecResult::NeedData);
        c.reset();
        assert_eq!(c.partial_len, 0);
        assert_eq!(decode_all(&mut c, b"A"), vec!['A' as u32]);
    }
}
