//! Human-readable size parsing (e.g., "2GB", "500MB").

use thiserror::Error;

const KB: u64 = 1024;
const MB: u64 = 1024 * KB;
const GB: u64 = 1024 * MB;

/// Error parsing a size string.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid size '{input}' - expected format like '2GB', '500MB', or '1024KB'")]
pub struct SizeParseError {
    input: String,
}

/// Parses a size string into bytes.
///
/// Bare numbers are bytes; `K`/`KB`, `M`/`MB` and `G`/`GB` suffixes are
/// binary multiples. Case-insensitive and whitespace tolerant.
///
/// ```
/// use tilevault::config::parse_size;
///
/// assert_eq!(parse_size("1024").unwrap(), 1024);
/// assert_eq!(parse_size("1 KB").unwrap(), 1024);
/// assert_eq!(parse_size("500mb").unwrap(), 500 * 1024 * 1024);
/// ```
pub fn parse_size(s: &str) -> Result<u64, SizeParseError> {
    let invalid = || SizeParseError {
        input: s.to_string(),
    };

    let trimmed = s.trim();
    let upper = trimmed.to_ascii_uppercase();
    let upper = upper.strip_suffix('B').unwrap_or(&upper);

    let (digits, multiplier) = match upper.char_indices().last() {
        Some((i, 'G')) => (&upper[..i], GB),
        Some((i, 'M')) => (&upper[..i], MB),
        Some((i, 'K')) => (&upper[..i], KB),
        Some(_) => (upper, 1),
        None => return Err(invalid()),
    };

    let number: u64 = digits.trim().parse().map_err(|_| invalid())?;
    number.checked_mul(multiplier).ok_or_else(invalid)
}

/// Formats a byte count using the largest exact suffix.
///
/// ```
/// use tilevault::config::format_size;
///
/// assert_eq!(format_size(1024), "1KB");
/// assert_eq!(format_size(500 * 1024 * 1024), "500MB");
/// assert_eq!(format_size(1500), "1500");
/// ```
pub fn format_size(bytes: u64) -> String {
    if bytes >= GB && bytes % GB == 0 {
        format!("{}GB", bytes / GB)
    } else if bytes >= MB && bytes % MB == 0 {
        format!("{}MB", bytes / MB)
    } else if bytes >= KB && bytes % KB == 0 {
        format!("{}KB", bytes / KB)
    } else {
        bytes.to_string()
    }
}

/// Whole megabytes, rounded down.
pub fn whole_megabytes(bytes: u64) -> u64 {
    bytes / 1024 / 1024
}
