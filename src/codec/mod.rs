//! The codec protocol and the registry that dispatches a canonicalized
//! encoding name to a concrete [`Codec`] implementation.

pub mod utf16;
pub mod utf8;

#[cfg(feature = "iconv")]
pub mod iconv;

use crate::alias::AliasTable;
use crate::error::Error;

/// IANA MIB enum values this crate treats specially. Values match the
/// IANA "character sets" registry.
pub const MIB_UTF8: u16 = 106;
pub const MIB_UTF16: u16 = 1015;
pub const MIB_UTF16BE: u16 = 1013;
pub const MIB_UTF16LE: u16 = 1014;
pub const MIB_UCS2: u16 = 1000;
pub const MIB_UCS4: u16 = 1001;
pub const MIB_UTF32: u16 = 1017;
pub const MIB_UTF32BE: u16 = 1018;
pub const MIB_UTF32LE: u16 = 1019;

/// How a codec reacts to unrepresentable (encode) or ill-formed (decode)
/// input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorMode {
    /// Return [`CodecResult::Invalid`] and stop.
    #[default]
    Strict,
    /// Substitute `U+FFFD` on decode, `U+3F` ('?') on encode for
    /// non-Unicode targets (`U+FFFD` if the target is itself Unicode).
    Loose,
    /// Reserved: transliteration is a non-goal, so this behaves exactly
    /// like `Loose`.
    Translit,
}

/// Why a call to [`Codec::encode`]/[`Codec::decode`] stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecResult {
    /// All of `src` was consumed and the output fit in `dst`.
    Ok,
    /// `dst` was exhausted; retry with a larger buffer. Bytes already
    /// folded into retained internal state are reflected in the returned
    /// consumed count and will not be re-consumed.
    NoMem,
    /// The next input is not representable (encode) or ill-formed
    /// (decode); the consumed count points at the offending input.
    Invalid,
    /// Input ends mid-sequence; the partial bytes are retained internally
    /// for the next call.
    NeedData,
}

/// A UCS-4 code point, encoded as on the wire: a big-endian 4-byte group in
/// the pivot buffer used by [`crate::filter::Filter`].
pub type Scalar = u32;

/// The capability set every codec exposes, in addition to `Drop`.
///
/// A codec's `mib` never changes after construction; to switch encodings,
/// drop it and construct a new one via [`CodecRegistry::create`].
pub trait Codec {
    /// The MIB enum this codec instance was constructed for.
    fn mib(&self) -> u16;

    /// Consumes UCS-4 code points (big-endian 4-byte groups) from `src` and
    /// emits this codec's native bytes into `dst`. Returns
    /// `(result, consumed, produced)`.
    fn encode(&mut self, src: &[u8], dst: &mut [u8]) -> (CodecResult, usize, usize);

    /// Consumes this codec's native bytes from `src` and emits UCS-4 code
    /// points (big-endian 4-byte groups) into `dst`. Returns
    /// `(result, consumed, produced)`.
    fn decode(&mut self, src: &[u8], dst: &mut [u8]) -> (CodecResult, usize, usize);

    /// Drops any retained partial input/output; afterwards this codec
    /// behaves like a freshly constructed one.
    fn reset(&mut self);
}

/// A factory that knows how to construct a [`Codec`] for the canonical
/// names it claims. Implementations register with [`CodecRegistry`] in
/// priority order; the first whose [`CodecFactory::handles`] returns true
/// for a given MIB is used.
pub trait CodecFactory {
    /// Returns true if this factory can construct a codec for `mib`.
    fn handles(&self, mib: u16) -> bool;

    /// Constructs a codec for `mib`/`canonical_name` with the given error
    /// mode. Only called after [`CodecFactory::handles`] returned true for
    /// the same `mib`.
    fn create(&self, mib: u16, canonical_name: &str, mode: ErrorMode) -> Box<dyn Codec>;
}

/// Dispatches a canonicalized encoding to the first registered
/// [`CodecFactory`] that claims it.
///
/// The default registry (see [`CodecRegistry::with_defaults`]) registers,
/// in priority order: the native UTF-8 codec, the native UTF-16 codec, and
/// (when the `iconv` feature is enabled) the system-iconv fallback that
/// handles everything else.
pub struct CodecRegistry {
    factories: Vec<Box<dyn CodecFactory>>,
}

impl CodecRegistry {
    /// An empty registry; factories must be added with
    /// [`CodecRegistry::register`].
    pub fn new() -> Self {
        Self {
            factories: Vec::new(),
        }
    }

    /// The registry most callers want: native UTF-8 and UTF-16, plus the
    /// iconv fallback if the `iconv` feature is enabled.
    pub fn with_defaults() -> Self {
        let mut reg = Self::new();
        reg.register(Box::new(utf8::Utf8Factory));
        reg.register(Box::new(utf16::Utf16Factory));
        #[cfg(feature = "iconv")]
        reg.register(Box::new(iconv::IconvFactory));
        reg
    }

    /// Appends a factory at the end of the priority order.
    pub fn register(&mut self, factory: Box<dyn CodecFactory>) {
        self.factories.push(factory);
    }

    /// Resolves `name` through `table` and constructs a codec for it using
    /// the first factory that claims the resulting MIB.
    pub fn create(
        &self,
        table: &AliasTable,
        name: &str,
        mode: ErrorMode,
    ) -> Result<Box<dyn Codec>, Error> {
        let canonical = table
            .canonicalise(name)
            .ok_or_else(|| Error::BadEncoding(name.to_string()))?;
        self.factories
            .iter()
            .find(|f| f.handles(canonical.mib))
            .map(|f| f.create(canonical.mib, &canonical.name, mode))
            .ok_or_else(|| Error::BadEncoding(canonical.name.clone()))
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
