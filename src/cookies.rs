//! Cookie input normalization.
//!
//! Callers hand the downloader cookies either as a browser-style header
//! string (`"k1=v1; k2=v2"`) or as an already-structured map. Both forms
//! normalize into a plain `HashMap` which the session merges into its
//! cookie jar. Cookie values are sensitive; never log them.

use std::collections::HashMap;

/// Parses a browser-style cookie header string into a map.
///
/// Malformed fragments (no `=`, empty key) are skipped rather than
/// rejected: cookie strings pasted from developer tools are frequently
/// ragged and partial input is still useful for login gates.
///
/// # Examples
///
/// ```
/// use novel_dl::cookies::parse_cookie_str;
///
/// let cookies = parse_cookie_str("sid=abc; over18=yes");
/// assert_eq!(cookies.get("sid").map(String::as_str), Some("abc"));
/// assert_eq!(cookies.get("over18").map(String::as_str), Some("yes"));
/// ```
#[must_use]
pub fn parse_cookie_str(raw: &str) -> HashMap<String, String> {
    let mut result = HashMap::new();
    for part in raw.split(';') {
        let Some((key, value)) = part.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        result.insert(key.to_string(), value.trim().to_string());
    }
    result
}

/// Normalizes an already-structured cookie map: trims keys and values,
/// drops entries whose key trims to empty.
#[must_use]
pub fn normalize_cookies(cookies: &HashMap<String, String>) -> HashMap<String, String> {
    cookies
        .iter()
        .filter_map(|(k, v)| {
            let key = k.trim();
            (!key.is_empty()).then(|| (key.to_string(), v.trim().to_string()))
        })
        .collect()
}
