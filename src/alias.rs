//! Encoding alias registry: canonicalizes the web's large, messy space of
//! encoding labels to a single MIB-enum identity.

use crate::error::Error;
use std::path::Path;
use tracing::debug;

/// Number of buckets in each hash table. Deliberately a small prime, as in
/// the original design — the tables are small (a few hundred entries at
/// most) and a chain of a handful of entries per bucket is fine.
const BUCKET_COUNT: usize = 43;

/// A long-lived, immutable record identifying one encoding.
///
/// Every encoding known to an [`AliasTable`] has exactly one `CanonicalName`;
/// aliases resolve to it by index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalName {
    /// The preferred string form of the encoding, as chosen by the alias
    /// table source.
    pub name: String,
    /// The IANA character-set MIB enum.
    pub mib: u16,
}

struct Entry {
    /// Normalized (filtered + case-folded) form of the label, used for
    /// equality checks once the hash has narrowed down the bucket.
    key: Vec<u8>,
    canonical_idx: usize,
}

/// Canonicalizes encoding labels (punctuation-insensitive, case-insensitive)
/// to a [`CanonicalName`] + MIB enum.
///
/// An `AliasTable` is an ordinary owned value — typically constructed once
/// and wrapped in an `Arc` by the caller so it can be shared read-only
/// across every [`crate::input_stream::InputStream`]/[`crate::filter::Filter`]
/// in a process. There is no global singleton and no explicit teardown
/// beyond ordinary `Drop`.
pub struct AliasTable {
    canonicals: Vec<CanonicalName>,
    canonical_buckets: Vec<Vec<Entry>>,
    alias_buckets: Vec<Vec<Entry>>,
}

/// Bytes to skip during comparison/hashing: whitespace and ASCII
/// punctuation, per the encoding-label normalization rule.
fn is_skipped(b: u8) -> bool {
    matches!(b, 0x09..=0x0D | 0x20..=0x2F | 0x3A..=0x40 | 0x5B..=0x60 | 0x7B..=0x7E)
}

/// Filters out punctuation/whitespace and folds case by clearing bit 0x20
/// (the transform is applied uniformly, not just to ASCII letters, to match
/// the hash folding rule exactly).
fn normalize_key(name: &[u8]) -> Vec<u8> {
    name.iter().copied().filter(|b| !is_skipped(*b)).map(|b| b & !0x20).collect()
}

/// djb2 variant over the normalized byte stream.
fn hash_key(key: &[u8]) -> usize {
    let mut h: u32 = 5381;
    for &b in key {
        h = h.wrapping_mul(33) ^ (b as u32);
    }
    (h as usize) % BUCKET_COUNT
}

impl AliasTable {
    /// The alias table bundled with this crate, covering the encodings the
    /// native and iconv codecs actually claim.
    pub fn builtin() -> Self {
        Self::from_str(include_str!("../data/aliases.psv"))
            .expect("bundled alias table must parse")
    }

    /// Loads an alias table from a file on disk. See [`Self::from_str`] for
    /// the format.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path)?;
        Self::from_str(&text)
    }

    /// Parses a text alias table: one record per line, whitespace-separated,
    /// `canonical-name mib-enum alias1 alias2 ...`. Blank lines and lines
    /// beginning with `#` are ignored. Fields contain no whitespace, there
    /// are no continuation lines, and a record with a canonical name but no
    /// trailing aliases is tolerated (reproduced as-is from the design this
    /// crate is based on).
    pub fn from_str(text: &str) -> Result<Self, Error> {
        let mut table = Self {
            canonicals: Vec::new(),
            canonical_buckets: (0..BUCKET_COUNT).map(|_| Vec::new()).collect(),
            alias_buckets: (0..BUCKET_COUNT).map(|_| Vec::new()).collect(),
        };
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split_whitespace();
            let canonical = fields.next().ok_or_else(|| {
                Error::BadParm("alias table record missing canonical name".into())
            })?;
            let mib: u16 = fields
                .next()
                .ok_or_else(|| Error::BadParm("alias table record missing MIB enum".into()))?
                .parse()
                .map_err(|_| Error::BadParm("alias table record has non-numeric MIB enum".into()))?;
            let aliases: Vec<&str> = fields.collect();
            table.insert_record(canonical, mib, &aliases);
        }
        debug!(count = table.canonicals.len(), "alias table loaded");
        Ok(table)
    }

    fn insert_record(&mut self, canonical: &str, mib: u16, aliases: &[&str]) {
        // Later entries win: if this canonical name was already registered,
        // replace its MIB and re-derive its aliases rather than leaving a
        // stale duplicate entry around.
        let key = normalize_key(canonical.as_bytes());
        let idx = if let Some(existing) = self.find_canonical_idx(&key) {
            self.canonicals[existing] = CanonicalName {
                name: canonical.to_string(),
                mib,
            };
            existing
        } else {
            self.canonicals.push(CanonicalName {
                name: canonical.to_string(),
                mib,
            });
            self.canonicals.len() - 1
        };
        let bucket = hash_key(&key);
        self.canonical_buckets[bucket].push(Entry {
            key,
            canonical_idx: idx,
        });
        for alias in aliases {
            let key = normalize_key(alias.as_bytes());
            let bucket = hash_key(&key);
            self.alias_buckets[bucket].push(Entry {
                key,
                canonical_idx: idx,
            });
        }
    }

    fn find_canonical_idx(&self, key: &[u8]) -> Option<usize> {
        let bucket = hash_key(key);
        self.canonical_buckets[bucket]
            .iter()
            .find(|e| e.key == key)
            .map(|e| e.canonical_idx)
    }

    /// Normalizes `name` and resolves it to the [`CanonicalName`] it (or one
    /// of its aliases) refers to, checking the canonical-name table before
    /// the alias table.
    pub fn canonicalise(&self, name: &str) -> Option<&CanonicalName> {
        let key = normalize_key(name.as_bytes());
        let bucket = hash_key(&key);
        if let Some(e) = self.canonical_buckets[bucket].iter().find(|e| e.key == key) {
            return Some(&self.canonicals[e.canonical_idx]);
        }
        if let Some(e) = self.alias_buckets[bucket].iter().find(|e| e.key == key) {
            return Some(&self.canonicals[e.canonical_idx]);
        }
        None
    }

    /// Resolves `name` to its MIB enum, or `0` if not found.
    pub fn mibenum_from_name(&self, name: &str) -> u16 {
        self.canonicalise(name).map(|c| c.mib).unwrap_or(0)
    }

    /// Resolves a MIB enum back to its canonical name. Called only on
    /// encoding transitions, so a linear scan is acceptable.
    pub fn mibenum_to_name(&self, mib: u16) -> Option<&str> {
        self.canonicals
            .iter()
            .find(|c| c.mib == mib)
            .map(|c| c.name.as_str())
    }

    /// True iff `mib` identifies one of UCS-4, UCS-2, UTF-8, or
    /// UTF-16/BE/LE/UTF-32/BE/LE.
    pub fn is_unicode(&self, mib: u16) -> bool {
        matches!(
            mib,
            crate::codec::MIB_UTF8
                | crate::codec::MIB_UTF16
                | crate::codec::MIB_UTF16BE
                | crate::codec::MIB_UTF16LE
                | crate::codec::MIB_UCS2
                | crate::codec::MIB_UCS4
                | crate::codec::MIB_UTF32
                | crate::codec::MIB_UTF32BE
                | crate::codec::MIB_UTF32LE
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample() -> AliasTable {
        AliasTable::from_str(
            "\
# comment line
UTF-8 106 utf8 u.t.f.8 unicode-1-1-utf-8
WINDOWS-1252 2252 latin1 cp1252

ISO-8859-1 4
",
        )
        .unwrap()
    }

    #[test]
    fn canonical_resolves_to_itself() {
        let t = sample();
        let c = t.canonicalise("UTF-8").unwrap();
        assert_eq!(c.name, "UTF-8");
        assert_eq!(c.mib, 106);
    }

    #[test]
    fn aliases_are_punctuation_and_case_insensitive() {
        let t = sample();
        let a = t.mibenum_from_name("u.t.f.8");
        let b = t.mibenum_from_name("UTF8");
        let c = t.mibenum_from_name("utf-8");
        assert_ne!(a, 0);
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(t.mibenum_to_name(a), Some("UTF-8"));
    }

    #[test]
    fn unknown_name_is_none() {
        let t = sample();
        assert!(t.canonicalise("not-a-real-encoding").is_none());
        assert_eq!(t.mibenum_from_name("not-a-real-encoding"), 0);
    }

    #[test]
    fn canonical_with_no_aliases_is_tolerated() {
        let t = sample();
        assert_eq!(t.mibenum_from_name("ISO-8859-1"), 4);
    }

    #[test]
    fn blank_and_comment_lines_are_skipped() {
        let t = sample();
        assert_eq!(t.canonicals.len(), 3);
    }

    #[test]
    fn later_canonical_wins_on_duplicate() {
        let t = AliasTable::from_str(
            "\
FOO 1 bar
FOO 2 baz
",
        )
        .unwrap();
        assert_eq!(t.mibenum_from_name("FOO"), 2);
        // the first alias list is gone, but the second's aliases still resolve
        assert_eq!(t.mibenum_from_name("baz"), 2);
    }

    #[test]
    fn builtin_table_parses() {
        let t = AliasTable::builtin();
        assert_ne!(t.mibenum_from_name("UTF-8"), 0);
        assert_ne!(t.mibenum_from_name("UTF-16"), 0);
    }

    #[test]
    fn hash_agrees_for_equal_names() {
        assert_eq!(hash_key(&normalize_key(b"UTF-8")), hash_key(&normalize_key(b"u.t.f.8")));
        assert_eq!(hash_key(&normalize_key(b"UTF-8")), hash_key(&normalize_key(b"utf8")));
    }

    #[test]
    fn is_unicode_covers_the_utf_family_only() {
        let t = sample();
        assert!(t.is_unicode(crate::codec::MIB_UTF8));
        assert!(t.is_unicode(crate::codec::MIB_UTF16));
        assert!(t.is_unicode(crate::codec::MIB_UTF16BE));
        assert!(t.is_unicode(crate::codec::MIB_UTF16LE));
        assert!(t.is_unicode(crate::codec::MIB_UCS2));
        assert!(t.is_unicode(crate::codec::MIB_UCS4));
        assert!(t.is_unicode(crate::codec::MIB_UTF32));
        assert!(!t.is_unicode(4)); // ISO-8859-1
        assert!(!t.is_unicode(2252)); // WINDOWS-1252
        assert!(!t.is_unicode(0));
    }
}
