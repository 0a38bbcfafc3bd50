//! Development seeding utility: demo systems and control mappings.
//!
//! Run with: `cargo run --bin seed`

use fismatic::config::AppConfig;
use sqlx::PgPool;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "seed=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;
    let pool = fismatic::db::create_pool(&config.database_url, 5).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let systems = seed_systems(&pool).await?;
    let mappings = seed_control_mappings(&pool).await?;

    tracing::info!(systems, mappings, "Seeding complete");
    Ok(())
}

/// Insert demo inventory scopes, skipping ones that already exist.
async fn seed_systems(pool: &PgPool) -> anyhow::Result<u64> {
    let systems = [
        ("Payroll Processing System", "Production payroll environment"),
        ("Public Web Portal", "Citizen-facing web applications"),
        ("Internal Data Warehouse", "Analytics and reporting cluster"),
    ];

    let mut inserted = 0u64;
    for (name, description) in systems {
        let result = sqlx::query(
            "INSERT INTO systems (name, description) VALUES ($1, $2) \
             ON CONFLICT (name) DO NOTHING",
        )
        .bind(name)
        .bind(description)
        .execute(pool)
        .await?;
        inserted += result.rows_affected();

        let id = sqlx::query_scalar::<_, Uuid>("SELECT id FROM systems WHERE name = $1")
            .bind(name)
            .fetch_one(pool)
            .await?;
        tracing::info!(system = name, id = %id, "System available");
    }
    Ok(inserted)
}

/// Insert a starter set of signature-to-control mappings.
///
/// Signatures are CVEs or `plugin:<id>` check ids; controls are NIST 800-53
/// identifiers.
async fn seed_control_mappings(pool: &PgPool) -> anyhow::Result<u64> {
    let mappings = [
        // Flaw remediation for anything with a published CVE fix.
        ("CVE-2021-3449", "SI-2"),
        ("CVE-2023-45802", "SI-2"),
        ("CVE-2023-43622", "SI-2"),
        ("CVE-2023-21689", "SI-2"),
        ("CVE-2023-21690", "SI-2"),
        // Transmission confidentiality for TLS/SSH configuration checks.
        ("plugin:51192", "SC-8"),
        ("plugin:57582", "SC-8"),
        ("plugin:1.3.6.1.4.1.25623.1.0.105611", "SC-8"),
        // Configuration management for server hardening checks.
        ("plugin:1.3.6.1.4.1.25623.1.0.150501", "CM-6"),
        ("plugin:1.3.6.1.4.1.25623.1.0.150501", "SI-2"),
    ];

    let mut inserted = 0u64;
    for (signature, control_id) in mappings {
        let result = sqlx::query(
            "INSERT INTO control_mappings (signature, control_id) VALUES ($1, $2) \
             ON CONFLICT (signature, control_id) DO NOTHING",
        )
        .bind(signature)
        .bind(control_id)
        .execute(pool)
        .await?;
        inserted += result.rows_affected();
    }
    Ok(inserted)
}
