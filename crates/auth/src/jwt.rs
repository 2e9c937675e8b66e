//! JWT decoding and signature verification (HS256).

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};

use crate::claims::{JwtClaims, TokenValidationError, validate_claims};

/// Verifies a bearer token and returns its claims.
///
/// Implementations own signature verification; time-window validation is the
/// deterministic [`validate_claims`] check so it can be tested without keys.
pub trait JwtValidator: Send + Sync {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, TokenValidationError>;
}

/// HS256 validator over a shared secret.
pub struct Hs256JwtValidator {
    key: DecodingKey,
}

impl Hs256JwtValidator {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_ref()),
        }
    }
}

impl JwtValidator for Hs256JwtValidator {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, TokenValidationError> {
        // Claims carry RFC3339 timestamps rather than numeric `exp`/`iat`;
        // the library only checks the signature, the window check is ours.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        let data = jsonwebtoken::decode::<JwtClaims>(token, &self.key, &validation)
            .map_err(|e| TokenValidationError::Malformed(e.to_string()))?;

        validate_claims(&data.claims, now)?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PrincipalId, Role};
    use chrono::Duration;
    use jsonwebtoken::{EncodingKey, Header};
    use rateforge_core::TenantId;

    fn mint(secret: &str, issued_offset_min: i64, expires_offset_min: i64) -> String {
        let now = Utc::now();
        let claims = JwtClaims {
            sub: PrincipalId::new(),
            tenant_id: TenantId::new(),
            roles: vec![Role::new("admin")],
            issued_at: now + Duration::minutes(issued_offset_min),
            expires_at: now + Duration::minutes(expires_offset_min),
        };
        jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn round_trips_a_valid_token() {
        let validator = Hs256JwtValidator::new(b"secret");
        let token = mint("secret", -1, 10);
        let claims = validator.validate(&token, Utc::now()).unwrap();
        assert_eq!(claims.roles, vec![Role::new("admin")]);
    }

    #[test]
    fn rejects_a_token_signed_with_a_different_secret() {
        let validator = Hs256JwtValidator::new(b"secret");
        let token = mint("other-secret", -1, 10);
        assert!(matches!(
            validator.validate(&token, Utc::now()),
            Err(TokenValidationError::Malformed(_))
        ));
    }

    #[test]
    fn rejects_an_expired_token() {
        let validator = Hs256JwtValidator::new(b"secret");
        let token = mint("secret", -20, -10);
        assert_eq!(
            validator.validate(&token, Utc::now()),
            Err(TokenValidationError::Expired)
        );
    }

    #[test]
    fn rejects_garbage() {
        let validator = Hs256JwtValidator::new(b"secret");
        assert!(matches!(
            validator.validate("not-a-jwt", Utc::now()),
            Err(TokenValidationError::Malformed(_))
        ));
    }
}
