//! # port-proxy-token
//!
//! Authentication tokens for starting the port-proxy daemon in the background.
//!
//! An operator generates a [`Token`] once and provisions only its salted digest
//! ([`TokenHash`]) on the host. Starting the daemon later requires presenting the
//! token again; the daemon hashes it with the stored salt and compares digests.
//!
//! ## Text formats
//!
//! - Token: 32 random bytes, `BASE32_DNSSEC` encoded (52 lowercase characters)
//! - Hash: `<salt>.<digest>`, both parts `BASE32_DNSSEC` encoded, where the
//!   digest is `SHA-256(salt || token bytes)`
//!
//! ## Quick Start
//!
//! ```
//! use port_proxy_token::{Token, TokenHash};
//!
//! let token = Token::generate();
//! let hash = TokenHash::derive(&token);
//!
//! // Store `hash.to_string()`, hand `token.to_string()` to the operator.
//! let provisioned: TokenHash = hash.to_string().parse()?;
//! let presented: Token = token.to_string().parse()?;
//! assert!(provisioned.verify(&presented).is_ok());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod errors;
mod token;

pub use errors::{ParseTokenError, ParseTokenHashError, TokenMismatchError};
pub use token::{SALT_LEN, TOKEN_LEN, Token, TokenHash};
