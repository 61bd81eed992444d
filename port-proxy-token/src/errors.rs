/// Error parsing a token from its text form.
#[derive(Debug, thiserror::Error)]
pub enum ParseTokenError {
    #[error("token is not valid BASE32_DNSSEC: {source}")]
    Encoding {
        #[from]
        source: data_encoding::DecodeError,
    },

    #[error("token must be {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },
}

/// Error parsing a provisioned token hash.
#[derive(Debug, thiserror::Error)]
pub enum ParseTokenHashError {
    #[error("token hash must look like '<salt>.<digest>'")]
    MissingSeparator,

    #[error("token hash {part} is not valid BASE32_DNSSEC: {source}")]
    Encoding {
        part: &'static str,
        source: data_encoding::DecodeError,
    },

    #[error("token hash {part} must be {expected} bytes, got {actual}")]
    Length {
        part: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// The presented token does not match the provisioned hash.
#[derive(Debug, thiserror::Error)]
#[error("token does not match the provisioned hash")]
pub struct TokenMismatchError;
