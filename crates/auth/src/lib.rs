//! `rateforge-auth` — pure authentication/authorization boundary (zero-trust).
//!
//! This crate is intentionally decoupled from HTTP and storage. Two token
//! families exist:
//!
//! - operator tokens: HS256 JWTs carrying tenant/principal/role claims,
//! - the machine ingest token: a single static bearer secret presented by
//!   external rate feeds (no tenant claims; the ingest route derives scope
//!   from configuration).

pub mod authorize;
pub mod claims;
pub mod ingest;
pub mod jwt;
pub mod permissions;
pub mod principal;
pub mod roles;

pub use authorize::{AuthzError, CommandAuthorization, Principal, authorize};
pub use claims::{JwtClaims, TokenValidationError, validate_claims};
pub use ingest::StaticToken;
pub use jwt::{Hs256JwtValidator, JwtValidator};
pub use permissions::Permission;
pub use principal::{PrincipalId, TenantMembership};
pub use roles::Role;
