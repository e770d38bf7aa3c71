//! The insurer's country table.
//!
//! Maps canonical country names to the ISO alpha-2 codes the insurer's
//! pricing API expects. Slot normalization resolves free-text destinations
//! ("USA", "viet nam") against this table, so the set of quotable
//! destinations is exactly the set of rows here.

/// One row of the insurer country table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Country {
    /// Canonical display name.
    pub name: &'static str,
    /// ISO 3166-1 alpha-2 code sent on the wire.
    pub code: &'static str,
}

/// Canonical name + code rows, alphabetical by name.
pub const COUNTRIES: &[Country] = &[
    Country { name: "Australia", code: "AU" },
    Country { name: "Austria", code: "AT" },
    Country { name: "Belgium", code: "BE" },
    Country { name: "Brazil", code: "BR" },
    Country { name: "Cambodia", code: "KH" },
    Country { name: "Canada", code: "CA" },
    Country { name: "China", code: "CN" },
    Country { name: "Croatia", code: "HR" },
    Country { name: "Czechia", code: "CZ" },
    Country { name: "Denmark", code: "DK" },
    Country { name: "Egypt", code: "EG" },
    Country { name: "Finland", code: "FI" },
    Country { name: "France", code: "FR" },
    Country { name: "Germany", code: "DE" },
    Country { name: "Greece", code: "GR" },
    Country { name: "Hong Kong", code: "HK" },
    Country { name: "Iceland", code: "IS" },
    Country { name: "India", code: "IN" },
    Country { name: "Indonesia", code: "ID" },
    Country { name: "Ireland", code: "IE" },
    Country { name: "Israel", code: "IL" },
    Country { name: "Italy", code: "IT" },
    Country { name: "Japan", code: "JP" },
    Country { name: "Laos", code: "LA" },
    Country { name: "Malaysia", code: "MY" },
    Country { name: "Maldives", code: "MV" },
    Country { name: "Mexico", code: "MX" },
    Country { name: "Morocco", code: "MA" },
    Country { name: "Nepal", code: "NP" },
    Country { name: "Netherlands", code: "NL" },
    Country { name: "New Zealand", code: "NZ" },
    Country { name: "Norway", code: "NO" },
    Country { name: "Philippines", code: "PH" },
    Country { name: "Poland", code: "PL" },
    Country { name: "Portugal", code: "PT" },
    Country { name: "Singapore", code: "SG" },
    Country { name: "South Africa", code: "ZA" },
    Country { name: "South Korea", code: "KR" },
    Country { name: "Spain", code: "ES" },
    Country { name: "Sri Lanka", code: "LK" },
    Country { name: "Sweden", code: "SE" },
    Country { name: "Switzerland", code: "CH" },
    Country { name: "Taiwan", code: "TW" },
    Country { name: "Thailand", code: "TH" },
    Country { name: "Turkey", code: "TR" },
    Country { name: "United Arab Emirates", code: "AE" },
    Country { name: "United Kingdom", code: "GB" },
    Country { name: "United States", code: "US" },
    Country { name: "Vietnam", code: "VN" },
];

/// Common aliases resolved to canonical names (lowercased alias → name).
const ALIASES: &[(&str, &str)] = &[
    ("america", "United States"),
    ("britain", "United Kingdom"),
    ("czech republic", "Czechia"),
    ("great britain", "United Kingdom"),
    ("holland", "Netherlands"),
    ("korea", "South Korea"),
    ("uae", "United Arab Emirates"),
    ("uk", "United Kingdom"),
    ("us", "United States"),
    ("usa", "United States"),
    ("viet nam", "Vietnam"),
];

/// Resolve free-text input to a canonical country name.
///
/// Matching is case-insensitive and alias-aware. Returns `None` for
/// destinations the insurer cannot quote.
pub fn canonical_country(input: &str) -> Option<&'static str> {
    let needle = input.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }
    if let Some(row) = COUNTRIES
        .iter()
        .find(|c| c.name.to_lowercase() == needle || c.code.to_lowercase() == needle)
    {
        return Some(row.name);
    }
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == needle)
        .map(|(_, name)| *name)
}

/// The wire code for a canonical country name.
pub fn country_code(name: &str) -> Option<&'static str> {
    COUNTRIES.iter().find(|c| c.name == name).map(|c| c.code)
}
