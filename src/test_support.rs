use crate::config::CoreConfig;
use crate::db;
use crate::state::AppState;

pub fn test_config() -> CoreConfig {
    CoreConfig {
        database_url: "postgresql://postgres@localhost/postgres".to_string(),
        timezone: chrono_tz::Tz::UTC,
        max_equipment_ids: 3,
        default_lookback_months: 1,
        db_max_connections: 2,
        max_window_days: 40,
    }
}

pub fn test_state() -> AppState {
    let config = test_config();
    let db = db::connect_lazy(&config).expect("connect_lazy");
    AppState { config, db }
}
