use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use sqlx::postgres::PgPoolOptions;

use gatehouse_auth::{
    Argon2Hasher, AuditSink, AuthError, AuthService, CredentialStore, InMemoryCredentialStore,
};
use gatehouse_infra::{
    AppConfig, PostgresAuditWriter, PostgresCredentialStore, SpawnedAuditSink, TracingAuditWriter,
    ensure_schema,
    seed::{seed_admin, seed_catalog},
};

pub type SharedStore = Arc<dyn CredentialStore>;

pub struct AppServices {
    pub auth: AuthService<SharedStore>,
}

impl AppServices {
    pub fn new(
        store: SharedStore,
        config: &AppConfig,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self, AuthError> {
        let hasher = Arc::new(Argon2Hasher::new(config.password_hash)?);
        let auth = AuthService::new(store, config.tokens, hasher, audit)
            .with_invalidation_policy(config.invalidation);
        Ok(Self { auth })
    }
}

/// Pick the persistent backend when a database is configured, otherwise run
/// fully in memory.
pub async fn build_services(config: &AppConfig) -> anyhow::Result<AppServices> {
    let (store, audit): (SharedStore, Arc<dyn AuditSink>) = match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(url)
                .await
                .context("failed to connect to postgres")?;
            ensure_schema(&pool)
                .await
                .context("failed to apply schema")?;

            let audit: Arc<dyn AuditSink> =
                Arc::new(SpawnedAuditSink::new(PostgresAuditWriter::new(pool.clone())));
            let store: SharedStore = Arc::new(PostgresCredentialStore::new(pool));
            (store, audit)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory credential store");
            let audit: Arc<dyn AuditSink> = Arc::new(SpawnedAuditSink::new(TracingAuditWriter));
            let store: SharedStore = Arc::new(InMemoryCredentialStore::new());
            (store, audit)
        }
    };

    bootstrap(&store, config).await?;
    Ok(AppServices::new(store, config, audit)?)
}

/// Install the role catalog and the bootstrap administrator, as configured.
pub async fn bootstrap(store: &SharedStore, config: &AppConfig) -> anyhow::Result<()> {
    if config.seed_catalog {
        let report = seed_catalog(store)
            .await
            .context("failed to seed role catalog")?;
        tracing::info!(
            permissions = report.permissions,
            roles = report.roles,
            "role catalog ready"
        );
    }

    if let Some(admin) = &config.admin {
        let hasher = Argon2Hasher::new(config.password_hash)?;
        let user_id = seed_admin(store, &hasher, admin)
            .await
            .context("failed to seed bootstrap administrator")?;
        tracing::info!(%user_id, email = %admin.email, "bootstrap administrator ready");
    }
    Ok(())
}

/// Periodically drop expired tokens. Failures are logged and retried on the
/// next tick.
pub fn spawn_token_purge(
    services: Arc<AppServices>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = services.auth.purge_expired_tokens(Utc::now()).await {
                tracing::warn!(error = %e, "expired token purge failed");
            }
        }
    })
}
