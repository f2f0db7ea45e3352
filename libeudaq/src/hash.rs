//! String hashing for registry keys.
//!
//! Every product family (event types, converters, file backends, event builders) is keyed
//! by a 32-bit hash of a human readable name. The hash has to be identical to the one used
//! by existing data files and producers, which walk the string from the last byte to the
//! first: `h(i) = h(i + 1) * 33 ^ byte(i)` with `h(len) = 5381`. Bytes are sign extended
//! like a C `char` before the xor.

/// Compute the registry hash of a string at compile time.
pub const fn cstr2hash(name: &str) -> u32 {
    let bytes = name.as_bytes();
    let mut hash: u32 = 5381;
    let mut idx = bytes.len();
    while idx > 0 {
        idx -= 1;
        let byte = bytes[idx] as i8 as i32 as u32;
        hash = hash.wrapping_mul(33) ^ byte;
    }
    hash
}

/// Runtime alias of [`cstr2hash`], for names only known at runtime (tags, file extensions).
pub fn str2hash(name: &str) -> u32 {
    cstr2hash(name)
}
