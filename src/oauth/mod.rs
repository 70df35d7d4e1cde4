//! OAuth authority (§4.D): a self-contained client-credentials token
//! issuer backed by an in-process RSA keypair, plus the JWKS and OIDC
//! discovery documents clients need to validate tokens without ever
//! talking to a real Azure AD tenant.

pub mod issuer;
pub mod validator;

pub use issuer::{JwksResponse, OpenIdConfiguration, TokenIssuer, TokenResponse};
pub use validator::{TokenClaims, TokenValidator, ValidationResult};
