use std::sync::Arc;

use super::store::{PlanTable, SqlitePlanTable};
use crate::config::ServerConfig;

pub struct ServerState {
    pub config: ServerConfig,
    pub plans: Arc<dyn PlanTable>,
}

impl ServerState {
    pub fn new(config: ServerConfig) -> anyhow::Result<Arc<Self>> {
        let plans = Arc::new(SqlitePlanTable::open(&config.db_path)?);
        Ok(Self::with_table(config, plans))
    }

    pub fn with_table(config: ServerConfig, plans: Arc<dyn PlanTable>) -> Arc<Self> {
        Arc::new(Self { config, plans })
    }
}
