use std::env;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    pub host: String,
    pub port: u16,
    /// Directory where uploaded scan files are stored for worker pickup.
    pub upload_dir: String,
    /// Number of background import workers to spawn.
    pub worker_count: usize,
    /// Seconds between claim attempts when the queue is empty.
    pub worker_poll_secs: u64,
    /// Lease duration for a claimed job; expired leases are reclaimable.
    pub job_lease_secs: i64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, env::VarError> {
        Ok(Self {
            database_url: env::var("DATABASE_URL")?,
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .unwrap_or(10),
            host: env::var("BACKEND_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("BACKEND_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .unwrap_or(3000),
            upload_dir: env::var("UPLOAD_DIR").unwrap_or_else(|_| "./uploads".to_string()),
            worker_count: env::var("IMPORT_WORKER_COUNT")
                .unwrap_or_else(|_| "2".to_string())
                .parse()
                .unwrap_or(2),
            worker_poll_secs: env::var("IMPORT_WORKER_POLL_SECS")
                .unwrap_or_else(|_| "2".to_string())
                .parse()
                .unwrap_or(2),
            job_lease_secs: env::var("IMPORT_JOB_LEASE_SECS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .unwrap_or(300),
        })
    }
}
