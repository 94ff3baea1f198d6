//! Bearer token verification and the `Principal` extractor.
//!
//! Tokens have the form `<user_id>:<role,role>:<hex hmac-sha256>`, where the
//! MAC covers `<user_id>:<role,role>`.

use std::sync::Arc;

use axum::extract::{FromRef, FromRequestParts};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::AdminError;
use crate::policy::Principal;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct TokenVerifier {
    secret: Arc<[u8]>,
}

impl std::fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenVerifier")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        if secret.is_empty() {
            tracing::warn!("Admin token secret not configured, skipping signature validation");
        }
        Self {
            secret: Arc::from(secret.as_bytes()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.secret.is_empty()
    }

    /// Resolve the principal for an optional `Authorization` header value.
    pub fn principal(&self, header: Option<&str>) -> Result<Principal, AdminError> {
        let Some(header) = header.map(str::trim).filter(|h| !h.is_empty()) else {
            return Ok(Principal::anonymous());
        };
        let token = header
            .split_once(' ')
            .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("bearer"))
            .map(|(_, token)| token.trim())
            .ok_or(AdminError::Unauthenticated)?;
        self.verify(token)
    }

    pub fn verify(&self, token: &str) -> Result<Principal, AdminError> {
        let (claims, signature) = token.rsplit_once(':').ok_or(AdminError::Unauthenticated)?;
        let (user_id, roles) = claims.split_once(':').ok_or(AdminError::Unauthenticated)?;
        let user_id: i64 = user_id.parse().map_err(|_| AdminError::Unauthenticated)?;

        if self.is_enabled() && !self.signature_matches(claims, signature) {
            tracing::debug!(user_id, "Rejected admin token with bad signature");
            return Err(AdminError::Unauthenticated);
        }

        Ok(Principal {
            user_id: Some(user_id),
            roles: roles
                .split(',')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string)
                .collect(),
        })
    }

    fn signature_matches(&self, claims: &str, signature: &str) -> bool {
        let sig_bytes = match hex::decode(signature) {
            Ok(b) => b,
            Err(_) => return false,
        };
        let mut mac = match HmacSha256::new_from_slice(&self.secret) {
            Ok(m) => m,
            Err(_) => return false,
        };
        mac.update(claims.as_bytes());
        mac.verify_slice(&sig_bytes).is_ok()
    }
}

impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
    TokenVerifier: FromRef<S>,
{
    type Rejection = AdminError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let header = match parts.headers.get(AUTHORIZATION) {
            Some(value) => Some(value.to_str().map_err(|_| AdminError::Unauthenticated)?),
            None => None,
        };
        TokenVerifier::from_ref(state).principal(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, claims: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(claims.as_bytes());
        format!("{claims}:{}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn missing_header_is_anonymous() {
        let verifier = TokenVerifier::new("s3cret");
        assert!(verifier.principal(None).unwrap().is_anonymous());
        assert!(verifier.principal(Some("  ")).unwrap().is_anonymous());
    }

    #[test]
    fn valid_token_yields_principal() {
        let verifier = TokenVerifier::new("s3cret");
        let token = sign("s3cret", "42:editor, viewer");
        let principal = verifier.principal(Some(&format!("Bearer {token}"))).unwrap();
        assert_eq!(principal.user_id, Some(42));
        assert_eq!(principal.roles, vec!["editor", "viewer"]);
    }

    #[test]
    fn bad_tokens_are_rejected() {
        let verifier = TokenVerifier::new("s3cret");
        let forged = sign("other", "1:admin");
        for header in [
            format!("Bearer {forged}"),
            "Bearer 1:admin:zz".to_string(),
            "Bearer nope".to_string(),
            "Bearer x:admin:00".to_string(),
            format!("Basic {}", sign("s3cret", "1:admin")),
        ] {
            assert!(
                matches!(verifier.principal(Some(&header)), Err(AdminError::Unauthenticated)),
                "{header}"
            );
        }
    }

    #[test]
    fn empty_secret_skips_signature() {
        let verifier = TokenVerifier::new("");
        assert!(!verifier.is_enabled());
        let principal = verifier.principal(Some("Bearer 9::unsigned")).unwrap();
        assert_eq!(principal.user_id, Some(9));
        assert!(principal.roles.is_empty());
    }
}
