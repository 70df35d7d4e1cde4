//! Validates JWTs issued by [`super::issuer::TokenIssuer`]: signature via
//! JWKS, issuer, expiration and (optionally) audience. Never propagates an
//! error across the public API — callers get a [`ValidationResult`], same
//! as the Python `TokenValidator.validate_token`.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use super::issuer::JwksResponse;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenClaims {
    pub aud: String,
    pub iss: String,
    pub sub: String,
    pub exp: u64,
    pub iat: u64,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub tid: Option<String>,
}

#[derive(Debug)]
pub struct ValidationResult {
    pub valid: bool,
    pub claims: Option<TokenClaims>,
    pub error: Option<String>,
}

pub struct TokenValidator {
    issuer: String,
    audience: Option<String>,
    decoding_key: DecodingKey,
}

impl std::fmt::Debug for TokenValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenValidator")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .finish_non_exhaustive()
    }
}

impl TokenValidator {
    #[must_use]
    pub fn from_jwk(issuer: String, audience: Option<String>, jwks: &JwksResponse) -> Option<Self> {
        let key = jwks.keys.first()?;
        let decoding_key = DecodingKey::from_rsa_components(&key.n, &key.e).ok()?;
        Some(Self {
            issuer,
            audience,
            decoding_key,
        })
    }

    #[must_use]
    pub fn validate_token(&self, token: &str) -> ValidationResult {
        // Signature is checked here; expiration and issuer are re-checked
        // manually below so a malformed `exp`/`iss` claim gets a specific
        // error instead of jsonwebtoken's generic validation failure.
        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let claims: TokenClaims = match decode(token, &self.decoding_key, &validation) {
            Ok(data) => data.claims,
            Err(e) => {
                return ValidationResult {
                    valid: false,
                    claims: None,
                    error: Some(format!("token validation failed: {e}")),
                }
            }
        };

        if claims.iss != self.issuer {
            return ValidationResult {
                valid: false,
                claims: None,
                error: Some(format!(
                    "invalid issuer. expected: {}, got: {}",
                    self.issuer, claims.iss
                )),
            };
        }

        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system clock before epoch")
            .as_secs();
        if now >= claims.exp {
            return ValidationResult {
                valid: false,
                claims: None,
                error: Some(format!("token expired at {}", claims.exp)),
            };
        }

        if let Some(expected_audience) = &self.audience {
            if &claims.aud != expected_audience {
                return ValidationResult {
                    valid: false,
                    claims: None,
                    error: Some(format!(
                        "invalid audience. expected: {expected_audience}, got: {}",
                        claims.aud
                    )),
                };
            }
        }

        ValidationResult {
            valid: true,
            claims: Some(claims),
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::issuer::{TokenIssuer, TokenRequest};
    use super::*;

    #[test]
    fn validates_freshly_issued_token() {
        let issuer = TokenIssuer::generate("https://localzure.local".to_string(), 3600);
        let response = issuer
            .issue_token(&TokenRequest {
                grant_type: "client_credentials".to_string(),
                scope: Some("https://vault.azure.net/.default".to_string()),
                client_id: Some("client-a".to_string()),
                client_secret: None,
                resource: None,
            })
            .unwrap();

        let validator =
            TokenValidator::from_jwk("https://localzure.local".to_string(), None, &issuer.jwks())
                .unwrap();
        let result = validator.validate_token(&response.access_token);
        assert!(result.valid);
        assert_eq!(result.claims.unwrap().sub, "client-a");
    }

    #[test]
    fn rejects_token_with_wrong_issuer() {
        let issuer = TokenIssuer::generate("https://localzure.local".to_string(), 3600);
        let response = issuer
            .issue_token(&TokenRequest {
                grant_type: "client_credentials".to_string(),
                scope: Some("https://vault.azure.net/.default".to_string()),
                client_id: None,
                client_secret: None,
                resource: None,
            })
            .unwrap();

        let validator =
            TokenValidator::from_jwk("https://other.local".to_string(), None, &issuer.jwks())
                .unwrap();
        let result = validator.validate_token(&response.access_token);
        assert!(!result.valid);
    }

    #[test]
    fn rejects_token_for_wrong_audience() {
        let issuer = TokenIssuer::generate("https://localzure.local".to_string(), 3600);
        let response = issuer
            .issue_token(&TokenRequest {
                grant_type: "client_credentials".to_string(),
                scope: Some("https://vault.azure.net/.default".to_string()),
                client_id: None,
                client_secret: None,
                resource: None,
            })
            .unwrap();

        let validator = TokenValidator::from_jwk(
            "https://localzure.local".to_string(),
            Some("https://storage.azure.com".to_string()),
            &issuer.jwks(),
        )
        .unwrap();
        let result = validator.validate_token(&response.access_token);
        assert!(!result.valid);
    }
}
