use axum::{Router, routing::get};

pub mod currencies;
pub mod formulas;
pub mod ingest;
pub mod orders;
pub mod products;
pub mod system;

use rateforge_auth::Permission;

/// Small helper wrapper to associate required permissions with a command.
pub struct CmdAuth<C> {
    pub inner: C,
    pub required: Vec<Permission>,
}

impl<C> rateforge_auth::CommandAuthorization for CmdAuth<C> {
    fn required_permissions(&self) -> &[Permission] {
        &self.required
    }
}

/// Router for all authenticated (tenant-scoped) endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/stream", get(system::stream))
        .nest("/currencies", currencies::router())
        .nest("/formulas", formulas::router())
        .nest("/products", products::router())
        .nest("/orders", orders::router())
}
