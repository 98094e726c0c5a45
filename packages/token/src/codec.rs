//! Base64url encoding and big-endian integer reconstruction
//!
//! Every segment of a compact token and every numeric JWK parameter is
//! base64url without padding (RFC 7515 section 2).

use crate::error::{TokenError, TokenResult};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rsa::BigUint;

/// Base64 URL-safe encoding without padding
#[inline]
pub fn base64url_encode(input: impl AsRef<[u8]>) -> String {
    URL_SAFE_NO_PAD.encode(input)
}

/// Base64 URL-safe decoding without padding
///
/// # Errors
/// Returns `TokenError::MalformedEncoding` on characters outside the url-safe
/// alphabet, on `=` padding, or on a truncated final group.
#[inline]
pub fn base64url_decode(input: &str) -> TokenResult<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(input)
        .map_err(|e| TokenError::malformed_encoding(e.to_string()))
}

/// Decode a base64url string into a big-endian unsigned integer
///
/// Used for the RSA modulus and exponent of a published key.
///
/// # Errors
/// Returns `TokenError::MalformedEncoding` if the input is not valid base64url.
pub fn decode_big_uint(input: &str) -> TokenResult<BigUint> {
    let bytes = base64url_decode(input)?;
    Ok(BigUint::from_bytes_be(&bytes))
}

/// Decode a base64url string into a `u64`, rejecting values wider than a machine word
pub(crate) fn decode_u64(input: &str) -> TokenResult<Option<u64>> {
    let bytes = base64url_decode(input)?;
    let significant: &[u8] = match bytes.iter().position(|b| *b != 0) {
        Some(first) => &bytes[first..],
        None => &[],
    };
    if significant.len() > 8 {
        return Ok(None);
    }
    Ok(Some(
        significant
            .iter()
            .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte)),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_unpadded_url_safe_alphabet() {
        assert_eq!(base64url_decode("-_8").unwrap(), vec![0xfb, 0xff]);
        assert_eq!(base64url_encode([0xfb, 0xff]), "-_8");
    }

    #[test]
    fn rejects_standard_alphabet_and_padding() {
        assert!(matches!(
            base64url_decode("+/8="),
            Err(TokenError::MalformedEncoding(_))
        ));
        assert!(matches!(
            base64url_decode("AQ=="),
            Err(TokenError::MalformedEncoding(_))
        ));
    }

    #[test]
    fn rejects_truncated_group() {
        assert!(matches!(
            base64url_decode("AQAB1"),
            Err(TokenError::MalformedEncoding(_))
        ));
    }

    #[test]
    fn big_uint_is_big_endian() {
        // 3233 = 0x0CA1
        let n = decode_big_uint(&base64url_encode([0x0c, 0xa1])).unwrap();
        assert_eq!(n, BigUint::from(3233u64));
    }

    #[test]
    fn standard_exponent_fits_machine_word() {
        assert_eq!(decode_u64("AQAB").unwrap(), Some(65537));
        assert_eq!(decode_u64(&base64url_encode([0u8, 0, 17])).unwrap(), Some(17));
        assert_eq!(decode_u64(&base64url_encode([1u8; 9])).unwrap(), None);
    }
}
