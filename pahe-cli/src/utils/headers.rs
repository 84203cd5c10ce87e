use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::debug;

use crate::error::AppError;

/// Parse a `-H "Name: Value"` argument into a header pair.
pub fn parse_header(header_str: &str) -> Result<(HeaderName, HeaderValue), AppError> {
    let (name, value) = header_str.split_once(':').ok_or_else(|| {
        AppError::InvalidInput(format!(
            "Invalid header format: '{header_str}'. Expected 'Name: Value'"
        ))
    })?;
    let name = name.trim();
    let value = value.trim();

    let header_name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| AppError::InvalidInput(format!("Invalid header name: '{name}'")))?;
    let header_value = HeaderValue::from_str(value)
        .map_err(|_| AppError::InvalidInput(format!("Invalid header value for '{name}'")))?;

    Ok((header_name, header_value))
}

/// Parse every `-H` argument; later occurrences of a name replace earlier ones.
pub fn parse_headers(header_strings: &[String]) -> Result<HeaderMap, AppError> {
    let mut headers = HeaderMap::new();

    for header_str in header_strings {
        let (name, value) = parse_header(header_str)?;
        debug!(header = %name, "Adding custom header");
        headers.insert(name, value);
    }

    Ok(headers)
}
