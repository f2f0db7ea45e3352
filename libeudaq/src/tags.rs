//! Key/value tags attached to events.
//!
//! Tags are stored as text. Typed access parses on read and falls back to the caller's
//! default when a key is missing or its value does not parse. Older data files carry
//! values written by many different producers, so a malformed tag is never an error.
use std::collections::BTreeMap;
use std::fmt::Display;

/// Format an integer as a `0x` prefixed, zero padded, upper case hexadecimal string.
///
/// A width of 0 means "no padding".
pub fn to_hex<T: std::fmt::UpperHex>(value: T, width: usize) -> String {
    format!("0x{value:0>width$X}")
}

/// Types that can be read back from a textual tag value.
pub trait TagValue: Sized {
    fn parse_tag(text: &str) -> Option<Self>;
}

macro_rules! impl_tag_value_int {
    ($($ty:ty),*) => {
        $(
            impl TagValue for $ty {
                fn parse_tag(text: &str) -> Option<Self> {
                    let text = text.trim();
                    if let Some(hex) = text
                        .strip_prefix("0x")
                        .or_else(|| text.strip_prefix("0X"))
                    {
                        <$ty>::from_str_radix(hex, 16).ok()
                    } else {
                        text.parse::<$ty>().ok()
                    }
                }
            }
        )*
    };
}

impl_tag_value_int!(u8, u16, u32, u64, usize, i8, i16, i32, i64, isize);

impl TagValue for f32 {
    fn parse_tag(text: &str) -> Option<Self> {
        text.trim().parse().ok()
    }
}

impl TagValue for f64 {
    fn parse_tag(text: &str) -> Option<Self> {
        text.trim().parse().ok()
    }
}

impl TagValue for bool {
    fn parse_tag(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Some(true),
            "0" | "false" | "no" => Some(false),
            _ => None,
        }
    }
}

impl TagValue for String {
    fn parse_tag(text: &str) -> Option<Self> {
        Some(text.to_string())
    }
}

/// Ordered key -> string map with typed get/set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagStore {
    tags: BTreeMap<String, String>,
}

impl TagStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a tag, overwriting any previous value.
    pub fn set<T: Display>(&mut self, key: &str, value: T) {
        self.tags.insert(key.to_string(), value.to_string());
    }

    /// Set an integer tag in hexadecimal notation. It reads back through [`TagStore::get`].
    pub fn set_hex<T: std::fmt::UpperHex>(&mut self, key: &str, value: T, width: usize) {
        self.tags.insert(key.to_string(), to_hex(value, width));
    }

    /// Typed read. Missing keys and unparsable values both yield `default`.
    pub fn get<T: TagValue>(&self, key: &str, default: T) -> T {
        self.try_get(key).unwrap_or(default)
    }

    /// Typed read returning None on a missing key or a parse failure.
    pub fn try_get<T: TagValue>(&self, key: &str) -> Option<T> {
        self.tags.get(key).and_then(|text| T::parse_tag(text))
    }

    /// Raw textual read.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    pub fn has(&self, key: &str) -> bool {
        self.tags.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.tags.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.tags.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Copy every tag of `other` into this store, overwriting on conflict.
    pub fn merge(&mut self, other: &TagStore) {
        for (k, v) in other.tags.iter() {
            self.tags.insert(k.clone(), v.clone());
        }
    }
}

impl<'a> IntoIterator for &'a TagStore {
    type Item = (&'a String, &'a String);
    type IntoIter = std::collections::btree_map::Iter<'a, String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.tags.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_overwrites() {
        let mut tags = TagStore::new();
        tags.set("FirmwareID", 12);
        tags.set("FirmwareID", 13);
        assert_eq!(tags.len(), 1);
        assert_eq!(tags.get("FirmwareID", 0u32), 13);
    }

    #[test]
    fn test_missing_key_uses_default() {
        let tags = TagStore::new();
        assert_eq!(tags.get("TimestampZero", 42u64), 42);
        assert!(!tags.has("TimestampZero"));
    }

    #[test]
    fn test_malformed_value_uses_default() {
        let mut tags = TagStore::new();
        tags.set("Threshold", "not-a-number");
        assert_eq!(tags.get("Threshold", 7i32), 7);
        assert_eq!(tags.get("Threshold", String::new()), "not-a-number");
    }

    #[test]
    fn test_hex_round_trip() {
        let mut tags = TagStore::new();
        tags.set_hex("Mask", 0xBEEFu32, 8);
        assert_eq!(tags.get_str("Mask"), Some("0x0000BEEF"));
        assert_eq!(tags.get("Mask", 0u32), 0xBEEF);
        tags.set("Lower", "0xff");
        assert_eq!(tags.get("Lower", 0u8), 255);
    }

    #[test]
    fn test_bool_and_float() {
        let mut tags = TagStore::new();
        tags.set("Enabled", "Yes");
        tags.set("Gain", 1.5);
        assert!(tags.get("Enabled", false));
        assert_eq!(tags.get("Gain", 0.0f64), 1.5);
    }

    #[test]
    fn test_to_hex_without_padding() {
        assert_eq!(to_hex(255u8, 0), "0xFF");
        assert_eq!(to_hex(1u64, 4), "0x0001");
    }
}
