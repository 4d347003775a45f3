//! JWKS signing-key cache.

use std::collections::HashMap;
use std::sync::Arc;

use jsonwebtoken::DecodingKey;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::IdentityError;

/// Key type expected for token signing keys.
const KTY_RSA: &str = "RSA";

/// A single key from the identity service's JWKS document.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonWebKey {
    pub kid: String,
    pub kty: String,
    #[serde(default)]
    pub alg: String,
    /// Modulus, base64url (RFC 7518 §6.3).
    pub n: String,
    /// Exponent, base64url.
    pub e: String,
}

#[derive(Debug, Clone, Deserialize)]
struct JwksDocument {
    keys: Vec<JsonWebKey>,
}

/// Cache of the identity service's token signing keys, keyed by `kid`.
///
/// A lookup miss refetches the JWKS document; negative lookups are retried
/// on every call so a key rotation is picked up at the first token signed
/// with the new key.
pub struct JwksCache {
    http: reqwest::Client,
    jwks_url: String,
    keys: RwLock<HashMap<String, Arc<DecodingKey>>>,
}

impl JwksCache {
    pub fn new(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            jwks_url: format!("{base_url}/v1/keys"),
            keys: RwLock::new(HashMap::new()),
        }
    }

    /// Get the public key for `kid`, refetching the JWKS document on miss.
    pub async fn signing_key(&self, kid: &str) -> Result<Arc<DecodingKey>, IdentityError> {
        if let Some(key) = self.keys.read().await.get(kid) {
            return Ok(key.clone());
        }

        self.refetch().await?;

        self.keys
            .read()
            .await
            .get(kid)
            .cloned()
            .ok_or_else(|| IdentityError::UnknownSigningKey(kid.to_string()))
    }

    async fn refetch(&self) -> Result<(), IdentityError> {
        let document: JwksDocument = self
            .http
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| IdentityError::Rpc(format!("JWKS fetch failed: {e}")))?
            .error_for_status()
            .map_err(|e| IdentityError::Rpc(format!("JWKS fetch failed: {e}")))?
            .json()
            .await
            .map_err(|e| IdentityError::Rpc(format!("JWKS parse failed: {e}")))?;

        let mut table = self.keys.write().await;
        for key in document.keys {
            if key.kty != KTY_RSA {
                warn!(kid = %key.kid, kty = %key.kty, "skipping non-RSA JWKS key");
                continue;
            }
            match decoding_key_from_components(&key.n, &key.e) {
                Ok(decoded) => {
                    table.insert(key.kid.clone(), Arc::new(decoded));
                }
                Err(err) => {
                    warn!(kid = %key.kid, error = %err, "skipping malformed JWKS key");
                }
            }
        }
        debug!(keys = table.len(), "refreshed JWKS signing keys");
        Ok(())
    }
}

/// Build an RSA decoding key from base64url modulus and exponent.
///
/// Some non-compliant JWKS documents carry trailing `=` padding on the
/// base64url values; RFC 7515 §2 requires it stripped before decoding.
pub(crate) fn decoding_key_from_components(
    n: &str,
    e: &str,
) -> Result<DecodingKey, IdentityError> {
    if n.is_empty() || e.is_empty() {
        return Err(IdentityError::MalformedKey("missing modulus or exponent".into()));
    }
    let n = n.trim_end_matches('=');
    let e = e.trim_end_matches('=');
    DecodingKey::from_rsa_components(n, e)
        .map_err(|err| IdentityError::MalformedKey(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2048-bit RSA modulus from RFC 7515 Appendix A.2, base64url.
    const SAMPLE_N: &str = "ofgWCuLjybRlzo0tZWJjNiuSfb4p4fAkd_wWJcyQoTbji9k0l8W26mPddx\
        HmfHQp-Vaw-4qPCJrcS2mJPMEzP1Pt0Bm4d4QlL-yRT-SFd2lZS-pCgNMsD1W_YpRPEwOWvG6b32690r2jZ\
        47soMZo9wGzjb_7OMg0LOL-bSf63kpaSHSXndS5z5rexMdbBYUsLA9e-KXBdQOS-UTo7WTBEMa2R2CapHg6\
        65xsmtdVMTBQY4uDZlxvb3qCo5ZwKh9kG4LT6_I5IhlJH7aGhyxXFvUK-DWNmoudF8NAco9_h9iaGNj8q2e\
        thFkMLs91kzk2PAcDTW9gb54h4FRWyuXpoQ";
    const SAMPLE_E: &str = "AQAB";

    #[test]
    fn rsa_components_build_a_key() {
        assert!(decoding_key_from_components(SAMPLE_N, SAMPLE_E).is_ok());
    }

    #[test]
    fn trailing_padding_is_tolerated() {
        let padded = format!("{SAMPLE_E}==");
        assert!(decoding_key_from_components(SAMPLE_N, &padded).is_ok());
    }

    #[test]
    fn missing_components_are_rejected() {
        assert!(matches!(
            decoding_key_from_components("", SAMPLE_E),
            Err(IdentityError::MalformedKey(_))
        ));
        assert!(matches!(
            decoding_key_from_components(SAMPLE_N, ""),
            Err(IdentityError::MalformedKey(_))
        ));
    }

    #[test]
    fn jwks_document_parses() {
        let json = format!(
            r#"{{"keys":[{{"kid":"key-1","kty":"RSA","alg":"RS512","n":"{SAMPLE_N}","e":"{SAMPLE_E}"}}]}}"#
        );
        let doc: JwksDocument = serde_json::from_str(&json).unwrap();
        assert_eq!(doc.keys.len(), 1);
        assert_eq!(doc.keys[0].kid, "key-1");
    }
}
