//! Key material for the three token families
//!
//! - [`SymmetricKey`]: shared HMAC secret for session tokens
//! - [`EcPrivateKey`]: P-256 signing key for client credentials, parsed from a
//!   PKCS#8 PEM (`.p8`) file
//! - [`RsaPublicComponents`]: provider public key rebuilt from the `n`/`e`
//!   parameters of a published key set entry

use crate::{
    codec::{decode_big_uint, decode_u64},
    error::{TokenError, TokenResult},
    token::Algorithm,
};
use hmac::{Hmac, Mac};
use p256::{
    ecdsa::{
        Signature as EcSignature, SigningKey, VerifyingKey as EcVerifyingKey,
        signature::{Signer as _, Verifier as _},
    },
    elliptic_curve::ALGORITHM_OID as EC_ALGORITHM_OID,
    pkcs8::{DecodePrivateKey, PrivateKeyInfo, SecretDocument},
};
use rsa::{
    BigUint, RsaPublicKey,
    pkcs1v15::{Signature as RsaSignature, VerifyingKey as RsaVerifyingKey},
    signature::Verifier as _,
};
use sha2::Sha256;
use std::fmt;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

type HmacSha256 = Hmac<Sha256>;

/// Smallest RSA modulus accepted for signature verification, in bits.
pub const MIN_RSA_MODULUS_BITS: usize = 2048;

/// Shared secret for HS256.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey {
    secret: Vec<u8>,
}

impl SymmetricKey {
    /// Wrap secret bytes.
    ///
    /// # Errors
    /// Returns `TokenError::InvalidKeyFormat` for an empty secret.
    pub fn new(secret: impl Into<Vec<u8>>) -> TokenResult<Self> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(TokenError::invalid_key("HMAC secret must not be empty"));
        }
        Ok(Self { secret })
    }

    fn mac(&self, input: &[u8]) -> TokenResult<Vec<u8>> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|_| TokenError::invalid_key("Invalid HMAC key"))?;
        mac.update(input);
        Ok(mac.finalize().into_bytes().to_vec())
    }

    /// HMAC-SHA256 over `input`.
    ///
    /// # Errors
    /// Returns `TokenError::InvalidKeyFormat` if the MAC cannot be keyed.
    pub fn sign(&self, input: &[u8]) -> TokenResult<Vec<u8>> {
        self.mac(input)
    }

    /// Recompute the MAC and compare in constant time.
    ///
    /// # Errors
    /// Returns `TokenError::SignatureInvalid` on mismatch.
    pub fn verify(&self, input: &[u8], signature: &[u8]) -> TokenResult<()> {
        let expected = self.mac(input)?;
        if bool::from(expected.as_slice().ct_eq(signature)) {
            Ok(())
        } else {
            Err(TokenError::SignatureInvalid)
        }
    }
}

impl TryFrom<&str> for SymmetricKey {
    type Error = TokenError;

    fn try_from(secret: &str) -> TokenResult<Self> {
        Self::new(secret.as_bytes())
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymmetricKey")
            .field("len", &self.secret.len())
            .finish_non_exhaustive()
    }
}

/// P-256 private key for ES256.
#[derive(Clone)]
pub struct EcPrivateKey {
    signing_key: SigningKey,
}

impl EcPrivateKey {
    /// Curve name, as used in the JWK `crv` parameter.
    pub const CURVE: &'static str = "P-256";

    /// Curve this key lives on.
    pub fn curve(&self) -> &'static str {
        Self::CURVE
    }

    /// Public half, for verifying what this key signed.
    pub fn verifying_key(&self) -> EcVerifyingKey {
        self.signing_key.verifying_key().clone()
    }

    /// ECDSA P-256 / SHA-256 over `input`, as the 64-byte `r || s` JWS encoding.
    pub fn sign(&self, input: &[u8]) -> Vec<u8> {
        let signature: EcSignature = self.signing_key.sign(input);
        signature.to_bytes().to_vec()
    }

    /// Verify a 64-byte `r || s` signature produced by this key.
    ///
    /// # Errors
    /// Returns `TokenError::SignatureInvalid` on a malformed or wrong signature.
    pub fn verify(&self, input: &[u8], signature: &[u8]) -> TokenResult<()> {
        let signature =
            EcSignature::from_slice(signature).map_err(|_| TokenError::SignatureInvalid)?;
        self.signing_key
            .verifying_key()
            .verify(input, &signature)
            .map_err(|_| TokenError::SignatureInvalid)
    }
}

impl fmt::Debug for EcPrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EcPrivateKey")
            .field("curve", &Self::CURVE)
            .finish_non_exhaustive()
    }
}

/// Parse a PKCS#8 PEM elliptic-curve private key (an Apple `.p8` AuthKey).
///
/// # Errors
/// Returns `TokenError::InvalidKeyFormat` if the input is not a
/// `PRIVATE KEY` PEM block, if the PKCS#8 algorithm is not `id-ecPublicKey`
/// (an RSA key, for instance), or if the curve is not P-256.
pub fn parse_ec_private_key(pem: &[u8]) -> TokenResult<EcPrivateKey> {
    let pem = std::str::from_utf8(pem)
        .map_err(|_| TokenError::invalid_key("Invalid UTF-8 in private key"))?;
    let (label, document) = SecretDocument::from_pem(pem)
        .map_err(|e| TokenError::invalid_key(format!("AuthKey must be a valid PEM file: {e}")))?;
    if label != "PRIVATE KEY" {
        return Err(TokenError::invalid_key(format!(
            "Expected a PKCS#8 'PRIVATE KEY' block, found '{label}'"
        )));
    }

    let info = PrivateKeyInfo::try_from(document.as_bytes())
        .map_err(|e| TokenError::invalid_key(format!("Invalid PKCS#8 structure: {e}")))?;
    if info.algorithm.oid != EC_ALGORITHM_OID {
        return Err(TokenError::invalid_key(format!(
            "AuthKey must be an elliptic-curve key, found algorithm {}",
            info.algorithm.oid
        )));
    }

    let signing_key = SigningKey::from_pkcs8_der(document.as_bytes()).map_err(|e| {
        TokenError::invalid_key(format!("Elliptic-curve key is not a P-256 key: {e}"))
    })?;
    Ok(EcPrivateKey { signing_key })
}

/// RSA public key as published in a key set: modulus and exponent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsaPublicComponents {
    /// Modulus `n`.
    pub modulus: BigUint,
    /// Public exponent `e`.
    pub exponent: u64,
}

impl RsaPublicComponents {
    /// Convert to a verification key.
    ///
    /// # Errors
    /// Returns `TokenError::InvalidKeyFormat` if the modulus is shorter than
    /// [`MIN_RSA_MODULUS_BITS`] or the pair is not a valid RSA public key.
    pub fn to_public_key(&self) -> TokenResult<RsaPublicKey> {
        let bits = self.modulus.bits();
        if bits < MIN_RSA_MODULUS_BITS {
            return Err(TokenError::invalid_key(format!(
                "RSA modulus is {bits} bits, at least {MIN_RSA_MODULUS_BITS} required"
            )));
        }
        RsaPublicKey::new(self.modulus.clone(), BigUint::from(self.exponent))
            .map_err(|e| TokenError::invalid_key(format!("Invalid RSA public key: {e}")))
    }

    /// Verify an RSASSA-PKCS1-v1_5 SHA-256 signature over `input`.
    ///
    /// # Errors
    /// - `InvalidKeyFormat` if the components do not form a usable key
    /// - `SignatureInvalid` if the signature does not verify
    pub fn verify(&self, input: &[u8], signature: &[u8]) -> TokenResult<()> {
        let verifying_key = RsaVerifyingKey::<Sha256>::new(self.to_public_key()?);
        let signature =
            RsaSignature::try_from(signature).map_err(|_| TokenError::SignatureInvalid)?;
        verifying_key
            .verify(input, &signature)
            .map_err(|_| TokenError::SignatureInvalid)
    }
}

/// Rebuild an RSA public key from base64url `n` and `e`.
///
/// # Errors
/// Returns `TokenError::InvalidKeyFormat` if either value is not base64url,
/// if the modulus is zero, or if the exponent is zero or wider than 64 bits.
pub fn build_rsa_public_key(
    modulus_b64: &str,
    exponent_b64: &str,
) -> TokenResult<RsaPublicComponents> {
    let modulus = decode_big_uint(modulus_b64)
        .map_err(|e| TokenError::invalid_key(format!("Invalid RSA modulus: {e}")))?;
    if modulus == BigUint::from(0u64) {
        return Err(TokenError::invalid_key("RSA modulus must be non-zero"));
    }

    let exponent = decode_u64(exponent_b64)
        .map_err(|e| TokenError::invalid_key(format!("Invalid RSA exponent: {e}")))?
        .ok_or_else(|| TokenError::invalid_key("RSA exponent does not fit a machine word"))?;
    if exponent == 0 {
        return Err(TokenError::invalid_key("RSA exponent must be non-zero"));
    }

    Ok(RsaPublicComponents { modulus, exponent })
}

/// Any key the engine signs or verifies with.
#[derive(Debug, Clone)]
pub enum KeyMaterial {
    /// HMAC secret.
    Symmetric(SymmetricKey),
    /// Elliptic-curve private key.
    EcPrivate(EcPrivateKey),
    /// RSA public key.
    RsaPublic(RsaPublicComponents),
}

impl KeyMaterial {
    /// The one algorithm this key is used with.
    pub fn algorithm(&self) -> Algorithm {
        match self {
            KeyMaterial::Symmetric(_) => Algorithm::HS256,
            KeyMaterial::EcPrivate(_) => Algorithm::ES256,
            KeyMaterial::RsaPublic(_) => Algorithm::RS256,
        }
    }

    /// Sign `input`.
    ///
    /// # Errors
    /// Returns `TokenError::InvalidKeyFormat` for a public-only key.
    pub fn sign(&self, input: &[u8]) -> TokenResult<Vec<u8>> {
        match self {
            KeyMaterial::Symmetric(key) => key.sign(input),
            KeyMaterial::EcPrivate(key) => Ok(key.sign(input)),
            KeyMaterial::RsaPublic(_) => Err(TokenError::invalid_key(
                "RSA public key cannot produce signatures",
            )),
        }
    }

    /// Verify `signature` over `input`.
    ///
    /// # Errors
    /// Returns `TokenError::SignatureInvalid` on mismatch.
    pub fn verify(&self, input: &[u8], signature: &[u8]) -> TokenResult<()> {
        match self {
            KeyMaterial::Symmetric(key) => key.verify(input, signature),
            KeyMaterial::EcPrivate(key) => key.verify(input, signature),
            KeyMaterial::RsaPublic(key) => key.verify(input, signature),
        }
    }
}

impl From<SymmetricKey> for KeyMaterial {
    fn from(key: SymmetricKey) -> Self {
        KeyMaterial::Symmetric(key)
    }
}

impl From<EcPrivateKey> for KeyMaterial {
    fn from(key: EcPrivateKey) -> Self {
        KeyMaterial::EcPrivate(key)
    }
}

impl From<RsaPublicComponents> for KeyMaterial {
    fn from(key: RsaPublicComponents) -> Self {
        KeyMaterial::RsaPublic(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::base64url_encode;

    const EC_PEM: &str = include_str!("../tests/fixtures/ec_private.pem");
    const EC_P384_PEM: &str = include_str!("../tests/fixtures/ec_p384_private.pem");
    const RSA_PEM: &str = include_str!("../tests/fixtures/rsa_private.pem");

    #[test]
    fn toy_rsa_components_reconstruct_exactly() {
        let n = base64url_encode(3233u32.to_be_bytes());
        let e = base64url_encode([17u8]);
        let key = build_rsa_public_key(&n, &e).unwrap();
        assert_eq!(key.modulus, decode_big_uint(&n).unwrap());
        assert_eq!(key.modulus, BigUint::from(3233u64));
        assert_eq!(key.exponent, 17);
    }

    #[test]
    fn toy_modulus_is_too_small_to_verify_with() {
        let key = RsaPublicComponents {
            modulus: BigUint::from(3233u64),
            exponent: 17,
        };
        assert!(matches!(
            key.to_public_key(),
            Err(TokenError::InvalidKeyFormat(_))
        ));
    }

    #[test]
    fn oversized_or_zero_exponent_is_rejected() {
        let n = base64url_encode([0xc5u8; 256]);
        assert!(build_rsa_public_key(&n, &base64url_encode([1u8; 9])).is_err());
        assert!(build_rsa_public_key(&n, &base64url_encode([0u8])).is_err());
        assert!(build_rsa_public_key("", "AQAB").is_err());
        assert!(build_rsa_public_key("not base64!", "AQAB").is_err());
    }

    #[test]
    fn parses_p256_pkcs8_pem() {
        let key = parse_ec_private_key(EC_PEM.as_bytes()).unwrap();
        assert_eq!(key.curve(), "P-256");

        let signature = key.sign(b"payload");
        assert_eq!(signature.len(), 64);
        assert!(key.verify(b"payload", &signature).is_ok());
        assert_eq!(
            key.verify(b"tampered", &signature),
            Err(TokenError::SignatureInvalid)
        );
    }

    #[test]
    fn rsa_pkcs8_is_not_an_ec_key() {
        let err = parse_ec_private_key(RSA_PEM.as_bytes()).unwrap_err();
        assert!(matches!(err, TokenError::InvalidKeyFormat(_)));
    }

    #[test]
    fn p384_key_is_rejected() {
        assert!(matches!(
            parse_ec_private_key(EC_P384_PEM.as_bytes()),
            Err(TokenError::InvalidKeyFormat(_))
        ));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(parse_ec_private_key(b"not a pem").is_err());
        assert!(parse_ec_private_key(&[0xff, 0xfe]).is_err());
    }

    #[test]
    fn hmac_verify_is_exact() {
        let key = SymmetricKey::try_from("s3cret").unwrap();
        let mac = key.sign(b"input").unwrap();
        assert!(key.verify(b"input", &mac).is_ok());
        assert_eq!(key.verify(b"input", &mac[..31]), Err(TokenError::SignatureInvalid));
        assert!(SymmetricKey::new(Vec::new()).is_err());
    }

    #[test]
    fn public_only_key_cannot_sign() {
        let material = KeyMaterial::from(RsaPublicComponents {
            modulus: BigUint::from(3233u64),
            exponent: 17,
        });
        assert_eq!(material.algorithm(), Algorithm::RS256);
        assert!(material.sign(b"x").is_err());
    }
}
