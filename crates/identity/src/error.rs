use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("identity RPC failed: {0}")]
    Rpc(String),

    #[error("all attempts to call the identity service failed: {0}")]
    RetriesExhausted(String),

    #[error("the token is invalid")]
    InvalidToken,

    #[error("the token has expired")]
    TokenExpired,

    #[error("the token is not a device token")]
    NotDeviceToken,

    #[error("the token is not an app token")]
    NotAppToken,

    #[error("invalid issuer claim in the token")]
    InvalidIssuer,

    #[error("no kid in the token header")]
    MissingKid,

    #[error("no signing key found for kid: {0}")]
    UnknownSigningKey(String),

    #[error("the token is not signed with an RSA key")]
    NotRsaSigned(String),

    #[error("malformed JWKS key material: {0}")]
    MalformedKey(String),

    #[error("invalid app private key: {0}")]
    InvalidPrivateKey(String),

    #[error("identity client is shutting down")]
    Shutdown,
}

impl From<jsonwebtoken::errors::Error> for IdentityError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;
        match err.kind() {
            ErrorKind::ExpiredSignature => IdentityError::TokenExpired,
            _ => IdentityError::InvalidToken,
        }
    }
}
