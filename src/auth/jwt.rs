//! RS256 identity token verification against a JSON Web Key Set.

use base64ct::{Base64UrlUnpadded, Encoding};
use rsa::{
    BigUint, RsaPublicKey,
    pkcs1v15::{Signature, VerifyingKey},
    signature::Verifier,
};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerifyError {
    #[error("token expired")]
    Expired,
    #[error("invalid audience")]
    InvalidAudience,
    #[error("invalid issuer")]
    InvalidIssuer,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlg(String),
    #[error("unknown key id: {0}")]
    UnknownKid(String),
    #[error("malformed token: {0}")]
    Malformed(&'static str),
    #[error("verification keys unavailable: {0}")]
    Keys(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

impl Jwks {
    #[must_use]
    pub fn find_by_kid(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|k| k.kid == kid)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Jwk {
    pub kty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    pub kid: String,
    pub n: String,
    pub e: String,
}

impl Jwk {
    /// # Errors
    /// Returns an error if the modulus or exponent are not valid base64url or
    /// do not form an RSA key.
    pub fn to_rsa_public_key(&self) -> Result<RsaPublicKey, VerifyError> {
        let n = Base64UrlUnpadded::decode_vec(&self.n)
            .map_err(|_| VerifyError::Keys(format!("bad modulus for kid {}", self.kid)))?;
        let e = Base64UrlUnpadded::decode_vec(&self.e)
            .map_err(|_| VerifyError::Keys(format!("bad exponent for kid {}", self.kid)))?;
        RsaPublicKey::new(BigUint::from_bytes_be(&n), BigUint::from_bytes_be(&e))
            .map_err(|err| VerifyError::Keys(err.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct Header {
    alg: String,
    #[serde(default)]
    kid: String,
}

/// `aud` may be a single string or a list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    #[must_use]
    pub fn contains(&self, audience: &str) -> bool {
        match self {
            Self::One(aud) => aud == audience,
            Self::Many(auds) => auds.iter().any(|aud| aud == audience),
        }
    }
}

/// Claims this service relies on. `hd` is the organisational (hosted) domain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdClaims {
    pub iss: String,
    pub aud: Audience,
    pub sub: String,
    #[serde(default)]
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hd: Option<String>,
    pub exp: i64,
    #[serde(default)]
    pub iat: i64,
}

fn decode_part<T: for<'de> Deserialize<'de>>(part: &str) -> Result<T, VerifyError> {
    let bytes = Base64UrlUnpadded::decode_vec(part).map_err(|_| VerifyError::Malformed("base64"))?;
    serde_json::from_slice(&bytes).map_err(|_| VerifyError::Malformed("json"))
}

/// Key id named in the token header, without verifying anything.
///
/// # Errors
/// Returns `Malformed` if the header cannot be decoded.
pub fn key_id(token: &str) -> Result<String, VerifyError> {
    let header_b64 = token
        .split('.')
        .next()
        .ok_or(VerifyError::Malformed("header"))?;
    Ok(decode_part::<Header>(header_b64)?.kid)
}

/// Verify signature, issuer, audience and expiry, in that order. Expiry is
/// checked last so an expired token is reported as expired only when
/// everything else about it holds.
///
/// # Errors
/// Returns the first check that failed.
pub fn verify_rs256(
    token: &str,
    jwks: &Jwks,
    issuers: &[String],
    audience: &str,
    now_unix_seconds: i64,
) -> Result<IdClaims, VerifyError> {
    let mut parts = token.split('.');
    let (Some(header_b64), Some(claims_b64), Some(sig_b64), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(VerifyError::Malformed("expected three segments"));
    };

    let header: Header = decode_part(header_b64)?;
    if header.alg != "RS256" {
        return Err(VerifyError::UnsupportedAlg(header.alg));
    }
    let jwk = jwks
        .find_by_kid(&header.kid)
        .ok_or_else(|| VerifyError::UnknownKid(header.kid.clone()))?;

    let verifying_key = VerifyingKey::<Sha256>::new(jwk.to_rsa_public_key()?);
    let signature_bytes =
        Base64UrlUnpadded::decode_vec(sig_b64).map_err(|_| VerifyError::Malformed("signature"))?;
    let signature = Signature::try_from(signature_bytes.as_slice())
        .map_err(|_| VerifyError::InvalidSignature)?;
    verifying_key
        .verify(format!("{header_b64}.{claims_b64}").as_bytes(), &signature)
        .map_err(|_| VerifyError::InvalidSignature)?;

    let claims: IdClaims = decode_part(claims_b64)?;
    if !issuers.iter().any(|iss| *iss == claims.iss) {
        return Err(VerifyError::InvalidIssuer);
    }
    if !claims.aud.contains(audience) {
        return Err(VerifyError::InvalidAudience);
    }
    if claims.exp <= now_unix_seconds {
        return Err(VerifyError::Expired);
    }
    Ok(claims)
}
