//! District name canonicalization.
//!
//! The normalized key is the only join key between the case table and the
//! boundary file. Two labels that normalize to the same key are treated as
//! the same district; distinct districts that collide are not detected here.

const DISTRICT_WORD: &str = "district";

/// Canonicalizes a district label for cross-source matching.
///
/// Lower-cases, drops all whitespace and removes every occurrence of the
/// word "district". Total over strings: an empty label yields an empty key.
pub fn normalize_district(label: &str) -> String {
    let mut key: String = label
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect();

    // Repeat until stable so the result is a fixed point.
    while key.contains(DISTRICT_WORD) {
        key = key.replace(DISTRICT_WORD, "");
    }

    key.trim().to_string()
}
