use crate::error::{Error, Result};
use regex::Regex;

/// Extract capture group `group` of `pattern` from `value`.
///
/// Group 0 is the whole match. Fails if the pattern does not match at all or
/// the requested group does not exist (or did not participate in the match).
pub fn extract_value_from_pattern(pattern: &Regex, value: &str, group: usize) -> Result<String> {
    let captures = pattern.captures(value).ok_or_else(|| Error::PatternMismatch {
        value: value.to_string(),
        pattern: pattern.as_str().to_string(),
    })?;

    if group >= captures.len() {
        return Err(Error::GroupOutOfBounds { group });
    }

    captures
        .get(group)
        .map(|m| m.as_str().to_string())
        .ok_or(Error::GroupOutOfBounds { group })
}

/// Characteristic display names are matched with all spaces removed,
/// so "Current Temperature" is addressed as "CurrentTemperature".
pub fn strip_spaces(name: &str) -> String {
    name.chars().filter(|c| *c != ' ').collect()
}
