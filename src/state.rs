use crate::{
    config::Config,
    policy::{AccessPolicy, UserDirectory},
    websocket::SessionRegistry,
};
use sqlx::{Pool, Postgres};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub db: Pool<Postgres>,
    pub registry: SessionRegistry,
    pub policy: Arc<dyn AccessPolicy>,
    pub directory: Arc<dyn UserDirectory>,
    pub config: Arc<Config>,
}
