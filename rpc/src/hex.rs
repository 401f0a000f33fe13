//! Hex helpers for 256-bit quantities
//!
//! The upstream node and the miners exchange unsigned 256-bit values as
//! `0x`-prefixed hex strings; some legacy callers still send plain decimal.

use ethereum_types::U256;
use std::fmt;

/// Error parsing a hex or decimal quantity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FromHexError {
    input: String,
}

impl FromHexError {
    fn new(input: impl Into<String>) -> Self {
        Self { input: input.into() }
    }
}

impl fmt::Display for FromHexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid 256-bit quantity: {:?}", self.input)
    }
}

impl std::error::Error for FromHexError {}

/// Parses a hex string with an optional `0x` prefix into a [U256]
pub fn parse_hex(input: &str) -> Result<U256, FromHexError> {
    let digits = input.strip_prefix("0x").unwrap_or(input);
    if digits.is_empty() {
        return Err(FromHexError::new(input));
    }
    U256::from_str_radix(digits, 16).map_err(|_| FromHexError::new(input))
}

/// Parses a quantity that is either `0x`-prefixed hex or plain decimal
pub fn parse_quantity(input: &str) -> Result<U256, FromHexError> {
    if input.starts_with("0x") {
        parse_hex(input)
    } else {
        U256::from_dec_str(input).map_err(|_| FromHexError::new(input))
    }
}

/// Emits `value` as a `0x`-prefixed hex string, zero-padded on the left to at
/// least `nibbles` digits
pub fn to_hex(value: U256, nibbles: usize) -> String {
    format!("0x{value:0nibbles$x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_with_and_without_prefix() {
        assert_eq!(parse_hex("0xff").unwrap(), U256::from(255u64));
        assert_eq!(parse_hex("ff").unwrap(), U256::from(255u64));
        assert_eq!(parse_hex("0x0").unwrap(), U256::zero());
        assert!(parse_hex("").is_err());
        assert!(parse_hex("0x").is_err());
        assert!(parse_hex("0xzz").is_err());
    }

    #[test]
    fn parses_quantities() {
        assert_eq!(parse_quantity("0x10").unwrap(), U256::from(16u64));
        assert_eq!(parse_quantity("16").unwrap(), U256::from(16u64));
        assert!(parse_quantity("sixteen").is_err());
    }

    #[test]
    fn pads_to_requested_width() {
        assert_eq!(to_hex(U256::from(1u64), 16), "0x0000000000000001");
        assert_eq!(to_hex(U256::from(0u64), 0), "0x0");
        // values wider than the requested width are emitted in full
        assert_eq!(to_hex(U256::from(0x1234u64), 2), "0x1234");
    }

    #[test]
    fn round_trips_random_values() {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        for _ in 0..64 {
            let value = U256::from(rng.gen::<u128>());
            for nibbles in [0usize, 16, 40, 64] {
                assert_eq!(parse_hex(&to_hex(value, nibbles)).unwrap(), value);
            }
        }
    }
}
