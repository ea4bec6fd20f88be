use std::sync::LazyLock;

use regex::Regex;

use super::ValidationError;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\w+([.+-]?\w+)*@\w+([.-]?\w+)*(\.[A-Za-z]{2,})+$").expect("email regex is valid")
});

static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+?[1-9]\d{0,15}$").expect("phone regex is valid"));

pub const MIN_PASSWORD_LEN: usize = 6;
pub const MIN_SEARCH_LEN: usize = 2;

/// Returns the trimmed value, or `"<label> is required"` when it is missing
/// or blank.
pub fn required(label: &str, value: Option<&str>) -> Result<String, ValidationError> {
    match value.map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value.to_string()),
        _ => Err(ValidationError(format!("{} is required", label))),
    }
}

pub fn max_len(label: &str, value: &str, max: usize) -> Result<(), ValidationError> {
    if value.chars().count() > max {
        return Err(ValidationError(format!(
            "{} cannot exceed {} characters",
            label, max
        )));
    }
    Ok(())
}

/// Lowercases and trims, then checks the shape of the address.
pub fn email(value: &str) -> Result<String, ValidationError> {
    let normalized = value.trim().to_lowercase();
    if !EMAIL_RE.is_match(&normalized) {
        return Err(ValidationError("Please enter a valid email".into()));
    }
    Ok(normalized)
}

/// Spaces and dashes are stripped before checking.
pub fn phone(value: &str) -> Result<String, ValidationError> {
    let normalized: String = value
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect();
    if !PHONE_RE.is_match(&normalized) {
        return Err(ValidationError("Please enter a valid phone number".into()));
    }
    Ok(normalized)
}

pub fn password(value: &str) -> Result<(), ValidationError> {
    if value.chars().count() < MIN_PASSWORD_LEN {
        return Err(ValidationError(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

/// `None` and blank terms mean "no search"; anything shorter than
/// [`MIN_SEARCH_LEN`] is rejected.
pub fn search_term(value: Option<&str>) -> Result<Option<String>, ValidationError> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(term) if term.chars().count() < MIN_SEARCH_LEN => Err(ValidationError(format!(
            "Search query must be at least {} characters",
            MIN_SEARCH_LEN
        ))),
        Some(term) => Ok(Some(term.to_string())),
    }
}

/// Wraps a user-supplied term for `ILIKE`, escaping the wildcards.
pub fn like_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}
