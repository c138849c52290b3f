//! Filter-list text handling.
//!
//! Lines starting with `!` are metadata, lines starting with `[` are section
//! headers, every other non-empty line is a rule. Rule syntax is never interpreted.

pub mod merger;

use thiserror::Error;

pub use merger::{CustomRules, Merger};

pub const DEFAULT_VERSION: &str = "0";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VersionError {
    #[error("malformed version header: {0:?}")]
    Malformed(String),
}

pub fn is_filter_rule(line: &str) -> bool {
    !line.is_empty() && !line.starts_with('[') && !line.starts_with('!')
}

/// Extracts the `! Version:` token from the header block of a filter list.
///
/// Scanning stops at the first rule line. Returns `Ok(None)` when no version
/// header exists and an error when the key is present without a usable token.
pub fn parse_version<'a, I>(lines: I) -> Result<Option<String>, VersionError>
where
    I: IntoIterator<Item = &'a str>,
{
    for line in lines {
        let line = line.trim_end_matches('\r');
        if is_filter_rule(line) {
            break;
        }
        let Some(meta) = line.strip_prefix('!') else {
            continue;
        };
        let Some((key, value)) = meta.split_once(':') else {
            continue;
        };
        if !key.trim().eq_ignore_ascii_case("version") {
            continue;
        }
        let value = value.trim();
        if value.is_empty() || value.contains(char::is_whitespace) {
            return Err(VersionError::Malformed(line.to_string()));
        }
        return Ok(Some(value.to_string()));
    }
    Ok(None)
}

/// Applies the build-dependent policy for malformed headers: debug builds
/// surface the error, release builds fall back to [`DEFAULT_VERSION`].
pub fn resolve_version(parsed: Result<Option<String>, VersionError>) -> Result<String, VersionError> {
    match parsed {
        Ok(Some(version)) => Ok(version),
        Ok(None) => Ok(DEFAULT_VERSION.to_string()),
        Err(e) if cfg!(debug_assertions) => Err(e),
        Err(e) => {
            tracing::warn!("{}, using default version", e);
            Ok(DEFAULT_VERSION.to_string())
        }
    }
}

pub fn to_allow_rule(domain: &str) -> String {
    if domain.starts_with("@@||") && domain.ends_with("^$document") {
        return domain.to_string();
    }
    format!("@@||{}^$document", domain)
}

pub fn to_block_rule(domain: &str) -> String {
    if domain.starts_with("||") && domain.ends_with('^') {
        return domain.to_string();
    }
    format!("||{}^", domain)
}
