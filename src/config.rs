//! Runtime configuration
//!
//! Every setting is a command-line flag with an environment fallback, so a
//! `.env` file (loaded by [`load_env`]) is enough for local runs.

use clap::Parser;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_ADMIN_PASSWORD: &str = "admin12345";
const DEV_JWT_SECRET: &str = "dev-secret-change-in-production-minimum-32-characters";

#[derive(Parser, Debug, Clone)]
#[command(name = "fleet")]
#[command(about = "Fleet management backend with realtime store sync")]
pub struct Config {
    /// Address the HTTP API listens on
    #[arg(long, env = "FLEET_BIND_ADDR", default_value = "0.0.0.0:3000")]
    pub bind_addr: SocketAddr,

    /// SQLite database file (":memory:" for a throwaway store)
    #[arg(long, env = "FLEET_DB_PATH", default_value = "fleet.db")]
    pub db_path: String,

    #[arg(long, env = "JWT_SECRET", default_value = DEV_JWT_SECRET, hide_env_values = true)]
    pub jwt_secret: String,

    /// Session token lifetime in hours
    #[arg(long, env = "JWT_EXPIRATION_HOURS", default_value = "24")]
    pub jwt_expiration_hours: i64,

    #[arg(long, env = "BCRYPT_COST", default_value = "12")]
    pub bcrypt_cost: u32,

    /// Firebase Realtime Database URL; without it an in-memory store is used
    #[arg(long, env = "FIREBASE_DATABASE_URL")]
    pub realtime_url: Option<String>,

    /// Database secret or ID token appended as `auth=`
    #[arg(long, env = "FIREBASE_AUTH_TOKEN", hide_env_values = true)]
    pub realtime_token: Option<String>,

    /// Run the boot reconciliation and the realtime listener
    #[arg(long, env = "SYNC_ENABLED", default_value_t = true, action = clap::ArgAction::Set)]
    pub sync_enabled: bool,

    /// Publish local rows missing or older in the realtime store during reconciliation
    #[arg(long, env = "SYNC_PUSH_LOCAL", default_value_t = true, action = clap::ArgAction::Set)]
    pub push_local: bool,

    #[arg(long, env = "LICENCE_SCAN_INTERVAL_SECS", default_value = "300")]
    pub licence_scan_interval_secs: u64,

    /// Warn this many days before a licence expires
    #[arg(long, env = "LICENCE_WARNING_DAYS", default_value = "30")]
    pub licence_warning_days: i64,

    #[arg(long, env = "ADMIN_EMAIL", default_value = "admin@fleet.local")]
    pub admin_email: String,

    #[arg(long, env = "ADMIN_PASSWORD", default_value = DEFAULT_ADMIN_PASSWORD, hide_env_values = true)]
    pub admin_password: String,

    /// Login attempts allowed per client IP per minute
    #[arg(long, env = "LOGIN_RATE_LIMIT", default_value = "10")]
    pub login_rate_limit: u32,
}

impl Config {
    pub fn licence_scan_interval(&self) -> Duration {
        Duration::from_secs(self.licence_scan_interval_secs.max(1))
    }

    pub fn uses_dev_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }
}

/// Load `.env` from the working directory (and parents), then from the
/// crate root.
pub fn load_env() {
    let _ = dotenv::dotenv();

    let manifest_env = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    if manifest_env.exists() {
        let _ = dotenv::from_path(&manifest_env);
    }
}
