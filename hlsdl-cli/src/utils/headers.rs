use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::debug;

use crate::error::AppError;

/// Parses `Name: Value` strings into a header map.
///
/// The line is split at the first `:` and both sides are trimmed. Blank lines are
/// skipped. A line without a colon, or with an empty name, is rejected. Later
/// values replace earlier ones with the same name.
pub fn parse_headers(lines: &[String]) -> Result<HeaderMap, AppError> {
    let mut headers = HeaderMap::new();
    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .map(|(name, value)| (name.trim(), value.trim()))
            .filter(|(name, _)| !name.is_empty())
            .ok_or_else(|| AppError::InvalidInput(format!("Invalid header format: {line}")))?;

        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| AppError::InvalidInput(format!("Invalid header name `{name}`: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| AppError::InvalidInput(format!("Invalid header value for {name}: {e}")))?;
        debug!(header = %name, "Added custom header");
        headers.insert(name, value);
    }
    Ok(headers)
}
