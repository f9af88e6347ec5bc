//! Key types identifying a registered identity.
//!
//! Deployments key identities either by an operator-assigned name or by a
//! numeric id. Both map to a file stem so the directory store can derive one
//! file per identity and parse it back on load.

use std::fmt::Display;
use std::hash::Hash;

pub trait IdentityKey: Eq + Hash + Clone + Display + Send + Sync {
    /// File name (without extension) under which this key is persisted.
    fn file_stem(&self) -> String;

    /// Inverse of [`IdentityKey::file_stem`]. `None` for stems that do not
    /// name a key of this type.
    fn from_file_stem(stem: &str) -> Option<Self>;
}

impl IdentityKey for String {
    fn file_stem(&self) -> String {
        escape_stem(self)
    }

    fn from_file_stem(stem: &str) -> Option<Self> {
        unescape_stem(stem)
    }
}

macro_rules! numeric_key {
    ($($t:ty),*) => {
        $(
            impl IdentityKey for $t {
                fn file_stem(&self) -> String {
                    self.to_string()
                }

                fn from_file_stem(stem: &str) -> Option<Self> {
                    // Reject "+7" and "007" so each id has exactly one file name.
                    if stem.starts_with('+') || (stem.len() > 1 && stem.starts_with('0')) {
                        return None;
                    }
                    stem.parse().ok()
                }
            }
        )*
    };
}

numeric_key!(u32, u64);

fn is_plain(b: u8) -> bool {
    b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'_'
}

/// Percent-escapes every byte outside `[a-z0-9_-]` so that arbitrary
/// names (spaces, slashes, dots, non-ASCII) become portable file names.
/// Uppercase letters are escaped too: "Alice" and "alice" must stay distinct
/// on case-insensitive filesystems.
fn escape_stem(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for &b in name.as_bytes() {
        if is_plain(b) {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

fn unescape_stem(stem: &str) -> Option<String> {
    if stem.is_empty() {
        return None;
    }
    let bytes = stem.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = stem.get(i + 1..i + 3)?;
                if !hex.bytes().all(|c| c.is_ascii_digit() || (b'A'..=b'F').contains(&c)) {
                    return None;
                }
                let b = u8::from_str_radix(hex, 16).ok()?;
                if is_plain(b) {
                    // Escaping a plain byte would give one name two stems.
                    return None;
                }
                out.push(b);
                i += 3;
            }
            b if is_plain(b) => {
                out.push(b);
                i += 1;
            }
            _ => return None,
        }
    }
    String::from_utf8(out).ok()
}
