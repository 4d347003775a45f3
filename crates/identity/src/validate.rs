//! Device and app token validation.

use async_trait::async_trait;
use jsonwebtoken::{decode, decode_header, Algorithm, Validation};
use serde::{Deserialize, Serialize};

use crate::error::IdentityError;
use crate::jwks::JwksCache;

/// Issuer prefix every token from the identity service must carry.
pub const TOKEN_ISSUER_PREFIX: &str = "Fahrplan Identity Service";

const TOKEN_TYPE_DEVICE: &str = "device";
const TOKEN_TYPE_APP: &str = "app";

/// Claims carried by identity-service tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Issuer; must start with [`TOKEN_ISSUER_PREFIX`].
    pub iss: String,

    /// For device tokens, the unique ID assigned to the device at
    /// enrollment. For app tokens, the app ID.
    pub sub: String,

    /// Expiry, seconds since the epoch.
    pub exp: i64,

    /// Token type: `device` or `app`.
    pub typ: String,

    /// The tenant to which the device belongs.
    #[serde(default)]
    pub tid: String,

    /// The management service responsible for this device.
    #[serde(default)]
    pub ms: String,
}

/// Verifies tokens presented by devices (and apps) against the identity
/// service's signing keys. The response router depends on this seam so
/// tests can inject verified claims directly.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn validate_device_token(&self, token: &str) -> Result<TokenClaims, IdentityError>;

    async fn validate_app_token(&self, token: &str) -> Result<TokenClaims, IdentityError>;
}

#[async_trait]
impl TokenVerifier for JwksCache {
    async fn validate_device_token(&self, token: &str) -> Result<TokenClaims, IdentityError> {
        let claims = self.validate_common_claims(token).await?;
        if claims.typ != TOKEN_TYPE_DEVICE {
            return Err(IdentityError::NotDeviceToken);
        }
        Ok(claims)
    }

    async fn validate_app_token(&self, token: &str) -> Result<TokenClaims, IdentityError> {
        let claims = self.validate_common_claims(token).await?;
        if claims.typ != TOKEN_TYPE_APP {
            return Err(IdentityError::NotAppToken);
        }
        Ok(claims)
    }
}

impl JwksCache {
    /// Parse and validate the claims shared by device and app tokens:
    /// an RSA signature by a known `kid`, an unexpired `exp`, and an issuer
    /// carrying the identity-service prefix.
    async fn validate_common_claims(&self, token: &str) -> Result<TokenClaims, IdentityError> {
        let header = decode_header(token)?;
        let algorithm = match header.alg {
            Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512 => header.alg,
            other => return Err(IdentityError::NotRsaSigned(format!("{other:?}"))),
        };
        let kid = header.kid.ok_or(IdentityError::MissingKid)?;

        let key = self.signing_key(&kid).await?;

        let mut validation = Validation::new(algorithm);
        validation.validate_exp = true;
        let data = decode::<TokenClaims>(token, &key, &validation)?;

        if !data.claims.iss.starts_with(TOKEN_ISSUER_PREFIX) {
            return Err(IdentityError::InvalidIssuer);
        }
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claims_deserialize_with_optional_fields() {
        let json = r#"{"iss":"Fahrplan Identity Service v1","sub":"device-1",
            "exp":4102444800,"typ":"device","tid":"tenant-1","ms":"hpcem"}"#;
        let claims: TokenClaims = serde_json::from_str(json).unwrap();
        assert_eq!(claims.typ, "device");
        assert_eq!(claims.ms, "hpcem");

        let minimal = r#"{"iss":"x","sub":"app-1","exp":0,"typ":"app"}"#;
        let claims: TokenClaims = serde_json::from_str(minimal).unwrap();
        assert!(claims.tid.is_empty());
        assert!(claims.ms.is_empty());
    }
}
