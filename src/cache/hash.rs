//! Stable, non-cryptographic key for canonical query strings.
//!
//! The value must be identical across runs and processes, so it is
//! computed from the UTF-16 code units of the input rather than with
//! `std::hash`, whose `DefaultHasher` output is not guaranteed stable.

/// 32-bit polynomial rolling hash (`h = h * 31 + unit`), rendered as hex of
/// its absolute value.
pub fn query_hash(normalized: &str) -> String {
    let hash = normalized
        .encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(unit as i32));

    format!("{:x}", (hash as i64).abs())
}
