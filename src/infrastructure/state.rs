use std::sync::Arc;

use crate::{
    domain::policy::OrgAnchors,
    infrastructure::{auth::JwtKeys, config::Config, db::PgPool},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: PgPool,
    pub anchors: OrgAnchors,
    pub jwt_keys: JwtKeys,
}

impl AppState {
    pub fn new(config: Arc<Config>, pool: PgPool, anchors: OrgAnchors) -> Self {
        let jwt_keys = JwtKeys::new(&config.auth.jwt_secret);
        Self {
            config,
            pool,
            anchors,
            jwt_keys,
        }
    }
}
