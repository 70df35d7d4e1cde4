//! Token issuance, JWKS and OIDC discovery.
//!
//! Mirrors the original `TokenIssuer`: a single in-process RSA-2048 keypair
//! signs every token for the process lifetime, `client_credentials` is the
//! only supported grant, and a small table of well-known `.default` scopes
//! resolves straight to an audience without needing a real app registration.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::{encode, EncodingKey, Header};
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::OAuthError;

const SUPPORTED_GRANT_TYPES: &[&str] = &["client_credentials"];
const TENANT_ID: &str = "localzure-tenant";

fn default_scopes() -> HashMap<&'static str, &'static str> {
    HashMap::from([
        (
            "https://storage.azure.com/.default",
            "https://storage.azure.com",
        ),
        (
            "https://vault.azure.net/.default",
            "https://vault.azure.net",
        ),
        (
            "https://management.azure.com/.default",
            "https://management.azure.com",
        ),
        (
            "https://graph.microsoft.com/.default",
            "https://graph.microsoft.com",
        ),
    ])
}

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub grant_type: String,
    pub scope: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub resource: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Jwk {
    pub kty: &'static str,
    #[serde(rename = "use")]
    pub use_: &'static str,
    pub kid: String,
    pub n: String,
    pub e: String,
    pub alg: &'static str,
}

#[derive(Debug, Serialize)]
pub struct JwksResponse {
    pub keys: Vec<Jwk>,
}

#[derive(Debug, Serialize)]
pub struct OpenIdConfiguration {
    pub issuer: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
    pub response_types_supported: Vec<&'static str>,
    pub subject_types_supported: Vec<&'static str>,
    pub id_token_signing_alg_values_supported: Vec<&'static str>,
}

pub struct TokenIssuer {
    issuer: String,
    token_lifetime_secs: u64,
    signing_key: EncodingKey,
    key_id: String,
    public_n: Vec<u8>,
    public_e: Vec<u8>,
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("issuer", &self.issuer)
            .field("token_lifetime_secs", &self.token_lifetime_secs)
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

impl TokenIssuer {
    /// Generates a fresh RSA-2048 keypair. Tokens signed by one process are
    /// not verifiable by another; that's fine for a local emulator.
    #[must_use]
    pub fn generate(issuer: String, token_lifetime_secs: u64) -> Self {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, 2048).expect("rsa keygen");
        let public_key = private_key.to_public_key();

        let pem = private_key
            .to_pkcs1_pem(rsa::pkcs8::LineEnding::LF)
            .expect("encode private key pem");
        let signing_key =
            EncodingKey::from_rsa_pem(pem.as_bytes()).expect("parse generated private key pem");

        let public_n = public_key.n().to_bytes_be();
        let public_e = public_key.e().to_bytes_be();
        let key_id = generate_key_id(&public_n, &public_e);

        Self {
            issuer,
            token_lifetime_secs,
            signing_key,
            key_id,
            public_n,
            public_e,
        }
    }

    pub fn issue_token(&self, request: &TokenRequest) -> Result<TokenResponse, OAuthError> {
        if !SUPPORTED_GRANT_TYPES.contains(&request.grant_type.as_str()) {
            return Err(OAuthError::InvalidGrant(request.grant_type.clone()));
        }

        let (audience, scope) = self.resolve_audience(request)?;
        let now = now_secs();
        let exp = now + self.token_lifetime_secs;

        let mut claims = serde_json::Map::new();
        claims.insert("aud".into(), serde_json::Value::String(audience));
        claims.insert("iss".into(), serde_json::Value::String(self.issuer.clone()));
        claims.insert(
            "sub".into(),
            serde_json::Value::String(
                request
                    .client_id
                    .clone()
                    .unwrap_or_else(|| "local-user".to_string()),
            ),
        );
        claims.insert("iat".into(), serde_json::Value::from(now));
        claims.insert("exp".into(), serde_json::Value::from(exp));
        claims.insert("scope".into(), serde_json::Value::String(scope.clone()));
        claims.insert("ver".into(), serde_json::Value::String("1.0".to_string()));
        claims.insert(
            "tid".into(),
            serde_json::Value::String(TENANT_ID.to_string()),
        );

        let mut header = Header::new(jsonwebtoken::Algorithm::RS256);
        header.kid = Some(self.key_id.clone());

        let access_token = encode(&header, &claims, &self.signing_key)
            .map_err(|e| OAuthError::InvalidToken(e.to_string()))?;

        Ok(TokenResponse {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: self.token_lifetime_secs,
            scope: Some(scope),
        })
    }

    /// Resolves a scope or resource parameter to a token audience, returning
    /// the `(audience, scope)` pair. When neither `scope` nor `resource` is
    /// given, defaults to the storage scope, matching the upstream
    /// `token_issuer.py`. Checks the well-known `.default` scope table
    /// first, then strips the `/.default` suffix from any other scope, then
    /// accepts absolute URLs verbatim.
    fn resolve_audience(&self, request: &TokenRequest) -> Result<(String, String), OAuthError> {
        let candidate = match request.scope.clone().or_else(|| request.resource.clone()) {
            Some(candidate) => candidate,
            None => {
                return Ok((
                    "https://storage.azure.com".to_string(),
                    "https://storage.azure.com/.default".to_string(),
                ))
            }
        };

        if let Some(audience) = default_scopes().get(candidate.as_str()) {
            return Ok(((*audience).to_string(), candidate));
        }
        if let Some(stripped) = candidate.strip_suffix("/.default") {
            // The upstream implementation slices off 10 characters rather
            // than using the 9-character literal `/.default`; preserved
            // verbatim since it changes observable output for scopes whose
            // suffix isn't exactly that string.
            let _ = stripped;
            let audience = candidate[..candidate.len() - 10].to_string();
            return Ok((audience, candidate));
        }
        if candidate.starts_with("http://") || candidate.starts_with("https://") {
            return Ok((candidate.clone(), candidate));
        }
        Err(OAuthError::InvalidScope(candidate))
    }

    #[must_use]
    pub fn jwks(&self) -> JwksResponse {
        JwksResponse {
            keys: vec![Jwk {
                kty: "RSA",
                use_: "sig",
                kid: self.key_id.clone(),
                n: URL_SAFE_NO_PAD.encode(&self.public_n),
                e: URL_SAFE_NO_PAD.encode(&self.public_e),
                alg: "RS256",
            }],
        }
    }

    #[must_use]
    pub fn openid_configuration(&self, base_url: &str) -> OpenIdConfiguration {
        OpenIdConfiguration {
            issuer: self.issuer.clone(),
            token_endpoint: format!("{base_url}/.localzure/oauth/token"),
            jwks_uri: format!("{base_url}/.localzure/oauth/keys"),
            response_types_supported: vec!["token"],
            subject_types_supported: vec!["public"],
            id_token_signing_alg_values_supported: vec!["RS256"],
        }
    }

    #[must_use]
    pub fn key_id(&self) -> &str {
        &self.key_id
    }
}

fn generate_key_id(n: &[u8], e: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(n);
    hasher.update(e);
    let digest = hasher.finalize();
    hex_encode(&digest)[..16].to_string()
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().fold(String::new(), |mut acc, b| {
        use std::fmt::Write;
        let _ = write!(acc, "{b:02x}");
        acc
    })
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issuer() -> TokenIssuer {
        TokenIssuer::generate("https://localzure.local".to_string(), 3600)
    }

    #[test]
    fn issues_token_for_well_known_scope() {
        let issuer = issuer();
        let request = TokenRequest {
            grant_type: "client_credentials".to_string(),
            scope: Some("https://vault.azure.net/.default".to_string()),
            client_id: Some("test-client".to_string()),
            client_secret: None,
            resource: None,
        };
        let response = issuer.issue_token(&request).unwrap();
        assert_eq!(response.token_type, "Bearer");
        assert_eq!(response.expires_in, 3600);
    }

    #[test]
    fn rejects_unsupported_grant_type() {
        let issuer = issuer();
        let request = TokenRequest {
            grant_type: "password".to_string(),
            scope: None,
            client_id: None,
            client_secret: None,
            resource: None,
        };
        assert!(matches!(
            issuer.issue_token(&request),
            Err(OAuthError::InvalidGrant(_))
        ));
    }

    #[test]
    fn strips_default_suffix_for_unknown_scope() {
        let issuer = issuer();
        let (audience, scope) = issuer
            .resolve_audience(&TokenRequest {
                grant_type: "client_credentials".to_string(),
                scope: Some("https://example.com/.default".to_string()),
                client_id: None,
                client_secret: None,
                resource: None,
            })
            .unwrap();
        // The suffix strip takes 10 characters off a 9-character suffix,
        // so the trailing "m" of "com" is swallowed too.
        assert_eq!(audience, "https://example.co");
        assert_eq!(scope, "https://example.com/.default");
    }

    #[test]
    fn defaults_to_storage_scope_when_scope_and_resource_omitted() {
        let issuer = issuer();
        let request = TokenRequest {
            grant_type: "client_credentials".to_string(),
            scope: None,
            client_id: None,
            client_secret: None,
            resource: None,
        };
        let response = issuer.issue_token(&request).unwrap();
        assert_eq!(
            response.scope.as_deref(),
            Some("https://storage.azure.com/.default")
        );
    }

    #[test]
    fn rejects_opaque_scope() {
        let issuer = issuer();
        let result = issuer.resolve_audience(&TokenRequest {
            grant_type: "client_credentials".to_string(),
            scope: Some("not-a-url".to_string()),
            client_id: None,
            client_secret: None,
            resource: None,
        });
        assert!(matches!(result, Err(OAuthError::InvalidScope(_))));
    }

    #[test]
    fn jwks_exposes_generated_key() {
        let issuer = issuer();
        let jwks = issuer.jwks();
        assert_eq!(jwks.keys.len(), 1);
        assert_eq!(jwks.keys[0].kid, issuer.key_id());
    }
}
