//! Fallback codec for everything the native codecs don't claim, backed by
//! the system `iconv(3)`. Pragmatic and best-effort rather than a validator:
//! gated behind the `iconv` feature since it pulls in `libc` and a real
//! iconv implementation.

mod ffi;

use super::{Codec, CodecFactory, CodecResult, ErrorMode};
use tracing::warn;

/// Name iconv is asked to convert to/from on the pivot side. UTF-32BE is a
/// fixed-width, unambiguous big-endian 32-bit encoding, i.e. exactly this
/// crate's UCS-4 pivot wire format.
const PIVOT_CODESET: &str = "UTF-32BE";

/// Largest multi-byte sequence any iconv-supported legacy encoding produces
/// for a single character, with headroom.
const PARTIAL_CAP: usize = 8;

/// Ring capacity for UCS-4 output produced by `decode` that didn't fit in
/// the caller's `dst` (8 code points, matching spec.md's `E2BIG` handling).
const RING_CAP: usize = 8 * 4;

enum ConvResult {
    InputEmpty,
    OutputFull,
    InvalidSeq,
    IncompleteSeq,
}

impl From<usize> for ConvResult {
    fn from(val: usize) -> Self {
        if val as isize != -1 {
            ConvResult::InputEmpty
        } else {
            let errno = std::io::Error::last_os_error().raw_os_error().unwrap();
            match errno {
                libc::E2BIG => ConvResult::OutputFull,
                libc::EILSEQ => ConvResult::InvalidSeq,
                libc::EINVAL => ConvResult::IncompleteSeq,
                _ => ConvResult::InvalidSeq,
            }
        }
    }
}

fn iconv_conv(cd: ffi::iconv_t, src: &[u8], dst: &mut [u8]) -> (ConvResult, usize, usize) {
    let mut src_ptr = src.as_ptr() as *const ::std::os::raw::c_char;
    let mut src_size = src.len();
    let mut dst_ptr = dst.as_mut_ptr() as *mut ::std::os::raw::c_char;
    let mut dst_size = dst.len();
    let res = unsafe { ffi::iconv(cd, &mut src_ptr, &mut src_size, &mut dst_ptr, &mut dst_size) };
    let consumed = src.len() - src_size;
    let produced = dst.len() - dst_size;
    (res.into(), consumed, produced)
}

fn iconv_reset(cd: ffi::iconv_t) {
    unsafe {
        ffi::iconv(
            cd,
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
        )
    };
}

/// Wrapper needed because `*mut c_void` is not `Send`; an `IconvCodec` only
/// ever touches its descriptor from the thread that owns it.
struct IconvWrap(ffi::iconv_t);
unsafe impl Send for IconvWrap {}

impl Drop for IconvWrap {
    fn drop(&mut self) {
        if self.0.is_null() {
            return;
        }
        let rc = unsafe { ffi::iconv_close(self.0) };
        if rc != 0 {
            warn!(rc, "iconv_close failed");
        }
    }
}

fn open(from: &str, to: &str) -> Option<IconvWrap> {
    let from = std::ffi::CString::new(from).ok()?;
    let to = std::ffi::CString::new(to).ok()?;
    let cd = unsafe { ffi::iconv_open(to.as_ptr(), from.as_ptr()) };
    if cd as isize == -1 {
        None
    } else {
        Some(IconvWrap(cd))
    }
}

/// Codec backed by two iconv descriptors: one converting the named charset
/// to the UCS-4 pivot, one converting the pivot back to the named charset.
pub struct IconvCodec {
    mib: u16,
    cd_decode: Option<IconvWrap>,
    cd_encode: Option<IconvWrap>,
    mode: ErrorMode,
    partial: [u8; PARTIAL_CAP],
    partial_len: usize,
    last_was_repl: bool,
    /// UCS-4 output from `decode` that didn't fit in a previous call's
    /// `dst`, drained at the start of the next call before new input is
    /// touched.
    ring: [u8; RING_CAP],
    ring_pos: usize,
    ring_len: usize,
}

impl IconvCodec {
    fn new(mib: u16, canonical_name: &str, mode: ErrorMode) -> Self {
        let cd_decode = open(canonical_name, PIVOT_CODESET);
        let cd_encode = open(PIVOT_CODESET, canonical_name);
        if cd_decode.is_none() || cd_encode.is_none() {
            warn!(canonical_name, "iconv does not support this charset");
        }
        Self {
            mib,
            cd_decode,
            cd_encode,
            mode,
            partial: [0; PARTIAL_CAP],
            partial_len: 0,
            last_was_repl: false,
            ring: [0; RING_CAP],
            ring_pos: 0,
            ring_len: 0,
        }
    }

    /// Writes a single `U+FFFD` into `dst` if it has room, else into the
    /// ring so the substitution isn't lost when `dst` is already full.
    fn emit_replacement(&mut self, dst: &mut [u8], produced: &mut usize) -> bool {
        if self.last_was_repl {
            return true;
        }
        if dst.len() - *produced >= 4 {
            dst[*produced..*produced + 4].copy_from_slice(&0xFFFDu32.to_be_bytes());
            *produced += 4;
            self.last_was_repl = true;
            return true;
        }
        if self.ring.len() - self.ring_len >= 4 {
            self.ring[self.ring_len..self.ring_len + 4].copy_from_slice(&0xFFFDu32.to_be_bytes());
            self.ring_len += 4;
            self.last_was_repl = true;
            return true;
        }
        false
    }
}

impl Codec for IconvCodec {
    fn mib(&self) -> u16 {
        self.mib
    }

    fn decode(&mut self, src: &[u8], dst: &mut [u8]) -> (CodecResult, usize, usize) {
        let Some(cd) = self.cd_decode.as_ref().map(|w| w.0) else {
            return (CodecResult::Invalid, 0, 0);
        };

        let mut produced = 0usize;

        // Drain UCS-4 output retained from a previous call's `E2BIG` before
        // consuming any new input.
        if self.ring_len > 0 {
            let avail = self.ring_len - self.ring_pos;
            let n = avail.min(dst.len());
            dst[..n].copy_from_slice(&self.ring[self.ring_pos..self.ring_pos + n]);
            self.ring_pos += n;
            produced += n;
            if self.ring_pos < self.ring_len {
                return (CodecResult::NoMem, 0, produced);
            }
            self.ring_pos = 0;
            self.ring_len = 0;
        }

        let mut consumed = 0usize;

        if self.partial_len > 0 {
            let borrow = (self.partial.len() - self.partial_len).min(src.len());
            let in_now = self.partial_len + borrow;
            self.partial[self.partial_len..in_now].copy_from_slice(&src[0..borrow]);
            let (res, c, p) = iconv_conv(cd, &self.partial[0..in_now], &mut dst[produced..]);
            produced += p;
            if p > 0 {
                self.last_was_repl = false;
            }
            if c > 0 {
                if self.partial_len > c {
                    self.partial.copy_within(c..self.partial_len, 0);
                    self.partial_len -= c;
                    return (CodecResult::Ok, 0, produced);
                }
                consumed = c - self.partial_len;
                self.partial_len = 0;
            } else {
                match self.mode {
                    ErrorMode::Loose | ErrorMode::Translit
                        if matches!(res, ConvResult::InvalidSeq) =>
                    {
                        if !self.emit_replacement(dst, &mut produced) {
                            self.partial_len = in_now;
                            return (CodecResult::NoMem, 0, produced);
                        }
                        self.partial.copy_within(1..in_now, 0);
                        self.partial_len = in_now - 1;
                        return (CodecResult::Ok, 0, produced);
                    }
                    ErrorMode::Strict if matches!(res, ConvResult::InvalidSeq) => {
                        return (CodecResult::Invalid, 0, produced);
                    }
                    _ => {
                        self.partial_len = in_now;
                        return (CodecResult::NeedData, 0, produced);
                    }
                }
            }
        }

        loop {
            let (res, c, p) = iconv_conv(cd, &src[consumed..], &mut dst[produced..]);
            consumed += c;
            produced += p;
            if p > 0 {
                self.last_was_repl = false;
            }
            match res {
                ConvResult::InputEmpty => return (CodecResult::Ok, consumed, produced),
                ConvResult::OutputFull => {
                    // `dst` is full; keep converting into the ring so src
                    // progress isn't blocked on the caller's buffer size.
                    // The ring is drained at the top of the next call.
                    let ring_space = self.ring.len() - self.ring_len;
                    if ring_space == 0 {
                        return (CodecResult::NoMem, consumed, produced);
                    }
                    let ring_start = self.ring_len;
                    let (rres, rc, rp) =
                        iconv_conv(cd, &src[consumed..], &mut self.ring[ring_start..]);
                    consumed += rc;
                    self.ring_len += rp;
                    if rp > 0 {
                        self.last_was_repl = false;
                    }
                    match rres {
                        ConvResult::InputEmpty => return (CodecResult::Ok, consumed, produced),
                        ConvResult::OutputFull => return (CodecResult::NoMem, consumed, produced),
                        ConvResult::IncompleteSeq => {
                            if src.is_empty() {
                                return (CodecResult::Ok, consumed, produced);
                            }
                            let avail = self.partial.len().min(src.len() - consumed);
                            self.partial[0..avail]
                                .copy_from_slice(&src[consumed..consumed + avail]);
                            self.partial_len = avail;
                            consumed += avail;
                            return (CodecResult::NeedData, consumed, produced);
                        }
                        ConvResult::InvalidSeq => match self.mode {
                            ErrorMode::Strict => {
                                return (CodecResult::Invalid, consumed, produced);
                            }
                            ErrorMode::Loose | ErrorMode::Translit => {
                                if !self.emit_replacement(dst, &mut produced) {
                                    return (CodecResult::NoMem, consumed, produced);
                                }
                                consumed += 1;
                                continue;
                            }
                        },
                    }
                }
                ConvResult::IncompleteSeq => {
                    if src.is_empty() {
                        return (CodecResult::Ok, consumed, produced);
                    }
                    let avail = self.partial.len().min(src.len() - consumed);
                    self.partial[0..avail].copy_from_slice(&src[consumed..consumed + avail]);
                    self.partial_len = avail;
                    consumed += avail;
                    return (CodecResult::NeedData, consumed, produced);
                }
                ConvResult::InvalidSeq => match self.mode {
                    ErrorMode::Strict => return (CodecResult::Invalid, consumed, produced),
                    ErrorMode::Loose | ErrorMode::Translit => {
                        if !self.emit_replacement(dst, &mut produced) {
                            return (CodecResult::NoMem, consumed, produced);
                        }
                        consumed += 1;
                        continue;
                    }
                },
            }
        }
    }

    // `encode`'s `E2BIG` reports `NoMem` directly rather than going through
    // a ring: the retained-output requirement is specific to `decode`'s
    // UCS-4 side (its output feeds the Filter pivot, which is what the
    // ring bounds); `encode`'s output is the target charset's own bytes,
    // already covered by the general "`NoMem`, caller retries" contract
    // the native codecs use for their own `encode`.
    fn encode(&mut self, src: &[u8], dst: &mut [u8]) -> (CodecResult, usize, usize) {
        let Some(cd) = self.cd_encode.as_ref().map(|w| w.0) else {
            return (CodecResult::Invalid, 0, 0);
        };

        let mut consumed = 0usize;
        let mut produced = 0usize;
        loop {
            let (res, c, p) = iconv_conv(cd, &src[consumed..], &mut dst[produced..]);
            consumed += c;
            produced += p;
            match res {
                ConvResult::InputEmpty => return (CodecResult::Ok, consumed, produced),
                ConvResult::OutputFull => return (CodecResult::NoMem, consumed, produced),
                ConvResult::IncompleteSeq => return (CodecResult::NeedData, consumed, produced),
                ConvResult::InvalidSeq => match self.mode {
                    ErrorMode::Strict => return (CodecResult::Invalid, consumed, produced),
                    ErrorMode::Loose | ErrorMode::Translit => {
                        if dst.len() - produced < 1 {
                            return (CodecResult::NoMem, consumed, produced);
                        }
                        dst[produced] = b'?';
                        produced += 1;
                        consumed += 4;
                        continue;
                    }
                },
            }
        }
    }

    fn reset(&mut self) {
        self.partial_len = 0;
        self.last_was_repl = false;
        self.ring_pos = 0;
        self.ring_len = 0;
        if let Some(IconvWrap(cd)) = &self.cd_decode {
            iconv_reset(*cd);
        }
        if let Some(IconvWrap(cd)) = &self.cd_encode {
            iconv_reset(*cd);
        }
    }
}

/// Constructs [`IconvCodec`]s. Registered last in [`super::CodecRegistry::with_defaults`]
/// so the native codecs get first refusal; this factory claims whatever is
/// left.
pub struct IconvFactory;

impl CodecFactory for IconvFactory {
    fn handles(&self, _mib: u16) -> bool {
        true
    }

    fn create(&self, mib: u16, canonical_name: &str, mode: ErrorMode) -> Box<dyn Codec> {
        Box::new(IconvCodec::new(mib, canonical_name, mode))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn decodes_latin1() {
        let mut c = IconvCodec::new(0, "ISO-8859-1", ErrorMode::Strict);
        if c.cd_decode.is_none() {
            // iconv not available in this environment; skip.
            return;
        }
        let mut dst = [0u8; 32];
        // 0xE9 in Latin-1 is U+00E9 (é)
        let (res, consumed, produced) = c.decode(&[b'A', 0xE9], &mut dst);
        assert_eq!(res, CodecResult::Ok);
        assert_eq!(consumed, 2);
        assert_eq!(produced, 8);
        assert_eq!(u32::from_be_bytes(dst[0..4].try_into().unwrap()), 'A' as u32);
        assert_eq!(u32::from_be_bytes(dst[4..8].try_into().unwrap()), 0xE9);
    }

    #[test]
    fn e2big_buffers_pending_output_in_ring_and_drains_next_call() {
        let mut c = IconvCodec::new(0, "ISO-8859-1", ErrorMode::Strict);
        if c.cd_decode.is_none() {
            // iconv not available in this environment; skip.
            return;
        }
        // Five ASCII chars is 20 bytes of UCS-4 output; give `dst` room for
        // only the first two code points so the rest must go to the ring.
        let mut dst = [0u8; 8];
        let (res, consumed, produced) = c.decode(b"ABCDE", &mut dst);
        assert_eq!(res, CodecResult::Ok);
        assert_eq!(consumed, 5);
        assert_eq!(produced, 8);
        assert_eq!(u32::from_be_bytes(dst[0..4].try_into().unwrap()), 'A' as u32);
        assert_eq!(u32::from_be_bytes(dst[4..8].try_into().unwrap()), 'B' as u32);
        assert_eq!(c.ring_len - c.ring_pos, 12);

        // Next call, with no new input, must drain the ring before
        // anything else.
        let mut dst2 = [0u8; 16];
        let (res2, consumed2, produced2) = c.decode(&[], &mut dst2);
        assert_eq!(res2, CodecResult::Ok);
        assert_eq!(consumed2, 0);
        assert_eq!(produced2, 12);
        assert_eq!(u32::from_be_bytes(dst2[0..4].try_into().unwrap()), 'C' as u32);
        assert_eq!(u32::from_be_bytes(dst2[4..8].try_into().unwrap()), 'D' as u32);
        assert_eq!(u32::from_be_bytes(dst2[8..12].try_into().unwrap()), 'E' as u32);
        assert_eq!(c.ring_len, 0);
    }

    #[test]
    fn unsupported_charset_is_invalid() {
        let c = IconvCodec::new(0, "definitely-not-a-real-charset", ErrorMode::Strict);
        assert!(c.cd_decode.is_none());
    }
}
