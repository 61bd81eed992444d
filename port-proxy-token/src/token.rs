use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::errors::{ParseTokenError, ParseTokenHashError, TokenMismatchError};

/// Number of random bytes in a token.
pub const TOKEN_LEN: usize = 32;

/// Number of random salt bytes mixed into a token hash.
pub const SALT_LEN: usize = 16;

const DIGEST_LEN: usize = 32;

/// Secret presented by the operator to start the daemon.
#[derive(Clone, PartialEq, Eq)]
pub struct Token {
    bytes: [u8; TOKEN_LEN],
}

impl Token {
    /// Generate a new token from the operating system's secure RNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_LEN];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; TOKEN_LEN] {
        &self.bytes
    }
}

// Never print the secret itself.
impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Token(..)")
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&data_encoding::BASE32_DNSSEC.encode(&self.bytes))
    }
}

impl std::str::FromStr for Token {
    type Err = ParseTokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decoded = data_encoding::BASE32_DNSSEC.decode(s.trim().as_bytes())?;
        let bytes: [u8; TOKEN_LEN] =
            decoded
                .as_slice()
                .try_into()
                .map_err(|_| ParseTokenError::Length {
                    expected: TOKEN_LEN,
                    actual: decoded.len(),
                })?;
        Ok(Self { bytes })
    }
}

/// Salted SHA-256 digest of a [`Token`], safe to store on disk or in the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenHash {
    salt: [u8; SALT_LEN],
    digest: [u8; DIGEST_LEN],
}

impl TokenHash {
    /// Hash `token` with a freshly generated salt.
    pub fn derive(token: &Token) -> Self {
        let mut salt = [0u8; SALT_LEN];
        rand::rngs::OsRng.fill_bytes(&mut salt);
        Self::with_salt(salt, token)
    }

    fn with_salt(salt: [u8; SALT_LEN], token: &Token) -> Self {
        Self {
            salt,
            digest: digest(&salt, token),
        }
    }

    /// Check `token` against this hash.
    pub fn verify(&self, token: &Token) -> Result<(), TokenMismatchError> {
        let candidate = digest(&self.salt, token);
        if bool::from(candidate.as_slice().ct_eq(self.digest.as_slice())) {
            Ok(())
        } else {
            Err(TokenMismatchError)
        }
    }
}

fn digest(salt: &[u8; SALT_LEN], token: &Token) -> [u8; DIGEST_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(token.as_bytes());
    let mut out = [0u8; DIGEST_LEN];
    out.copy_from_slice(&hasher.finalize());
    out
}

impl std::fmt::Display for TokenHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{}",
            data_encoding::BASE32_DNSSEC.encode(&self.salt),
            data_encoding::BASE32_DNSSEC.encode(&self.digest)
        )
    }
}

impl std::str::FromStr for TokenHash {
    type Err = ParseTokenHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (salt, digest) = s
            .trim()
            .split_once('.')
            .ok_or(ParseTokenHashError::MissingSeparator)?;
        Ok(Self {
            salt: decode_part("salt", salt)?,
            digest: decode_part("digest", digest)?,
        })
    }
}

fn decode_part<const N: usize>(
    part: &'static str,
    text: &str,
) -> Result<[u8; N], ParseTokenHashError> {
    let decoded = data_encoding::BASE32_DNSSEC
        .decode(text.as_bytes())
        .map_err(|source| ParseTokenHashError::Encoding { part, source })?;
    decoded
        .as_slice()
        .try_into()
        .map_err(|_| ParseTokenHashError::Length {
            part,
            expected: N,
            actual: decoded.len(),
        })
}
