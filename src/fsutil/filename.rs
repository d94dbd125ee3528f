//! Cross-platform filename sanitization.
//!
//! Book and chapter titles come straight from scraped markup and routinely
//! contain path separators, colons, and other characters that are illegal in
//! file names on at least one supported platform. Sidecar and media paths
//! are always passed through [`sanitize_filename`] before touching disk.

/// Default maximum filename length, matching common filesystem limits.
const DEFAULT_MAX_LENGTH: usize = 255;

/// Reserved Windows device stems (case-insensitive).
const WIN_RESERVED_STEMS: [&str; 22] = [
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Filename rule set to apply.
///
/// The current platform's rules are selected automatically by
/// [`sanitize_filename`]; tests exercise both variants explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// Replace `< > : " / \ | ? *` and control bytes; avoid reserved stems.
    Windows,
    /// Replace only `/` and NUL.
    Posix,
}

impl Platform {
    /// Returns the rule set for the compilation target.
    #[must_use]
    pub fn current() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else {
            Self::Posix
        }
    }

    fn is_illegal(self, ch: char) -> bool {
        match self {
            Self::Windows => {
                matches!(ch, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*')
                    || (ch as u32) < 0x20
            }
            Self::Posix => matches!(ch, '/' | '\0'),
        }
    }
}

/// Sanitizes a filename for the current platform with the default length cap.
///
/// Guarantees for every input: the result contains no illegal characters for
/// the platform, is non-empty, is at most 255 bytes of characters, and is a
/// fixed point (`sanitize(sanitize(s)) == sanitize(s)`).
#[must_use]
pub fn sanitize_filename(filename: &str) -> String {
    sanitize_filename_with(filename, Platform::current(), DEFAULT_MAX_LENGTH)
}

/// Sanitizes a filename under an explicit rule set and length cap.
///
/// Illegal characters are replaced with `_`, leading/trailing spaces and
/// dots are stripped, reserved Windows stems are prefixed with `_`, and the
/// result is truncated to `max_length` characters preserving the extension.
/// Inputs that sanitize to nothing become `_untitled`.
#[must_use]
pub fn sanitize_filename_with(filename: &str, platform: Platform, max_length: usize) -> String {
    let replaced: String = filename
        .chars()
        .map(|ch| if platform.is_illegal(ch) { '_' } else { ch })
        .collect();
    let name = replaced.trim_matches([' ', '.']);

    // Split on the first dot so multi-part extensions survive the length cap.
    let (stem, ext) = match name.split_once('.') {
        Some((stem, ext)) => (stem, Some(ext)),
        None => (name, None),
    };

    let stem = if platform == Platform::Windows
        && WIN_RESERVED_STEMS
            .iter()
            .any(|r| r.eq_ignore_ascii_case(stem))
    {
        format!("_{stem}")
    } else {
        stem.to_string()
    };

    let mut cleaned = match ext {
        Some(ext) => format!("{stem}.{ext}"),
        None => stem,
    };

    if max_length > 0 && cleaned.chars().count() > max_length {
        cleaned = match ext {
            Some(ext) if ext.chars().count() + 1 < max_length => {
                let keep = max_length - ext.chars().count() - 1;
                let head: String = cleaned.chars().take(keep).collect();
                format!("{head}.{ext}")
            }
            _ => cleaned.chars().take(max_length).collect(),
        };
        // Truncation can expose a trailing dot; re-strip so the result
        // stays a fixed point of this function.
        cleaned = cleaned.trim_matches([' ', '.']).to_string();
    }

    if cleaned.is_empty() {
        cleaned = "_untitled".to_string();
    }
    cleaned
}
