use alloy_primitives::Address;
use std::str::FromStr;

use crate::error::GuardianError;

/// Parsing of primitive types from caller-provided strings.
///
/// Every failure names the request attribute it came from so that the error
/// returned to the caller points at the offending field.
///
/// # Examples
/// ```rust
/// use alloy_primitives::Address;
/// use guardian_core::ParseFromRequest;
///
/// let to = Address::parse_from_request("0x000000000000000000000000000000000000dEaD", "to");
/// assert!(to.is_ok());
/// ```
pub trait ParseFromRequest {
    /// Parses `s`, reporting failures against `attr`.
    ///
    /// # Errors
    /// Returns [`GuardianError::InvalidInput`] if the value does not parse.
    fn parse_from_request(s: &str, attr: &'static str) -> Result<Self, GuardianError>
    where
        Self: Sized;
}

impl ParseFromRequest for Address {
    fn parse_from_request(s: &str, attr: &'static str) -> Result<Self, GuardianError> {
        if !s.starts_with("0x") {
            return Err(GuardianError::invalid_input(attr, "address must begin with 0x"));
        }
        Self::from_str(s).map_err(|e| GuardianError::invalid_input(attr, e.to_string()))
    }
}

/// Strips an optional `0x`/`0X` prefix.
#[must_use]
pub fn strip_hex_prefix(input: &str) -> &str {
    input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
        .unwrap_or(input)
}

/// Decodes a hex string that may carry a `0x` prefix.
///
/// # Errors
/// Returns the underlying decode error for odd-length or non-hex input.
pub fn decode_hex(input: &str) -> Result<Vec<u8>, hex::FromHexError> {
    hex::decode(strip_hex_prefix(input))
}
