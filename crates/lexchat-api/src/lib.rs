pub mod chat;
pub mod middleware;

use std::sync::Arc;

use lexchat_db::Database;
use lexchat_gateway::registry::Registry;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub registry: Registry,
    pub jwt_secret: String,
}
