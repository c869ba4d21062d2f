// Token lifecycle against the SQLite store: proactive rotation, revoked
// grants, alert dedup and operator acknowledgement.

use std::sync::Arc;

use streamgate_core::application::{TokenConfig, TokenLifecycleManager};
use streamgate_core::domain::{
    AccessCredential, AlertCondition, AlertSeverity, Platform, RotationOutcome, TokenHealth,
    TokenRecord,
};
use streamgate_core::port::id_provider::mocks::SeqIdProvider;
use streamgate_core::port::notifier::mocks::RecordingNotifier;
use streamgate_core::port::time_provider::mocks::MockTimeProvider;
use streamgate_core::port::token_refresher::mocks::MockTokenRefresher;
use streamgate_core::port::{RefreshError, TimeProvider, TokenRepository};
use streamgate_infra_sqlite::{create_pool, run_migrations, SqliteTokenRepository};

const HOUR_MS: i64 = 60 * 60 * 1_000;
const MINUTE_MS: i64 = 60 * 1_000;

struct Harness {
    clock: Arc<MockTimeProvider>,
    repo: Arc<SqliteTokenRepository>,
    refresher: Arc<MockTokenRefresher>,
    manager: TokenLifecycleManager,
}

async fn harness() -> Harness {
    let pool = create_pool("sqlite::memory:").await.unwrap();
    run_migrations(&pool).await.unwrap();

    let clock = Arc::new(MockTimeProvider::new(1_000 * HOUR_MS));
    let repo = Arc::new(SqliteTokenRepository::new(pool));
    let refresher = Arc::new(MockTokenRefresher::new());
    let manager = TokenLifecycleManager::new(
        repo.clone(),
        refresher.clone(),
        Arc::new(RecordingNotifier::new()),
        clock.clone(),
        Arc::new(SeqIdProvider::new()),
        TokenConfig {
            refresh_lead_ms: HOUR_MS,
            refresh_timeout_ms: 1_000,
            max_refresh_failures: 3,
            alert_cooldown_ms: 6 * HOUR_MS,
        },
    );

    Harness {
        clock,
        repo,
        refresher,
        manager,
    }
}

async fn seed(h: &Harness, platform: Platform, expires_in_ms: i64, with_refresh: bool) {
    let now = h.clock.now_millis();
    h.repo
        .upsert(&TokenRecord::new(
            "tenant-a",
            platform,
            AccessCredential::new("access"),
            with_refresh.then(|| AccessCredential::new("refresh")),
            now + expires_in_ms,
            now,
        ))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_thirty_minute_token_rotated_before_expiry() {
    let h = harness().await;
    seed(&h, Platform::Twitch, 30 * MINUTE_MS, true).await;

    assert_eq!(
        h.manager.token_health("tenant-a", Platform::Twitch).await.unwrap(),
        Some(TokenHealth::ExpiringSoon)
    );

    assert_eq!(h.manager.sweep().await.unwrap(), 1);

    // expiring_soon -> healthy, never expired
    assert_eq!(
        h.manager.token_health("tenant-a", Platform::Twitch).await.unwrap(),
        Some(TokenHealth::Healthy)
    );
    let record = h.repo.find("tenant-a", Platform::Twitch).await.unwrap().unwrap();
    assert!(record.expires_at > h.clock.now_millis() + 24 * HOUR_MS);
    assert_eq!(record.version, 1);

    let history = h
        .manager
        .rotation_history("tenant-a", Some(Platform::Twitch))
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].outcome, RotationOutcome::Rotated);

    // The rotated credential is picked up, not re-rotated
    assert_eq!(h.manager.sweep().await.unwrap(), 0);
    assert_eq!(h.refresher.call_count(), 1);
}

#[tokio::test]
async fn test_revoked_grant_flow() {
    let h = harness().await;
    seed(&h, Platform::Spotify, 30 * MINUTE_MS, true).await;
    h.refresher
        .set_default(Err(RefreshError::Revoked("invalid_grant".into())));

    h.manager.sweep().await.unwrap();

    assert_eq!(
        h.manager.token_health("tenant-a", Platform::Spotify).await.unwrap(),
        Some(TokenHealth::NeedsReauth)
    );
    assert!(!h
        .manager
        .credential_usable("tenant-a", Platform::Spotify)
        .await
        .unwrap());

    // Exactly one critical alert, no storm across repeated sweeps
    h.manager.sweep().await.unwrap();
    h.manager.sweep().await.unwrap();
    let alerts = h.manager.pending_alerts("tenant-a").await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].condition, AlertCondition::ReauthRequired);
    assert_eq!(alerts[0].severity, AlertSeverity::Critical);

    // Operator acknowledges; re-auth stores a fresh credential and the
    // record is usable again
    assert_eq!(
        h.manager.acknowledge_all_alerts("tenant-a", Some(Platform::Spotify)).await.unwrap(),
        1
    );
    let now = h.clock.now_millis();
    h.manager
        .store_credential(&TokenRecord::new(
            "tenant-a",
            Platform::Spotify,
            AccessCredential::new("fresh-access"),
            Some(AccessCredential::new("fresh-refresh")),
            now + 48 * HOUR_MS,
            now,
        ))
        .await
        .unwrap();
    assert!(h
        .manager
        .credential_usable("tenant-a", Platform::Spotify)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_dashboard_across_platforms() {
    let h = harness().await;
    seed(&h, Platform::Twitch, 48 * HOUR_MS, true).await;
    seed(&h, Platform::Youtube, 30 * MINUTE_MS, false).await;

    h.manager.sweep().await.unwrap();

    let dashboard = h.manager.token_dashboard("tenant-a").await.unwrap();
    assert_eq!(dashboard.entries.len(), 2);

    let youtube = dashboard
        .entries
        .iter()
        .find(|e| e.platform == Platform::Youtube)
        .unwrap();
    assert_eq!(youtube.health, TokenHealth::ExpiringSoon);
    let twitch = dashboard
        .entries
        .iter()
        .find(|e| e.platform == Platform::Twitch)
        .unwrap();
    assert_eq!(twitch.health, TokenHealth::Healthy);
    // The un-rotatable youtube credential alerted
    assert_eq!(dashboard.pending_alerts, 1);
}

#[tokio::test]
async fn test_check_token_expiry_triggers_rotation() {
    let h = harness().await;
    seed(&h, Platform::Twitch, 30 * MINUTE_MS, true).await;
    seed(&h, Platform::Kick, 48 * HOUR_MS, true).await;

    let summary = h.manager.check_token_expiry("tenant-a").await.unwrap();
    assert_eq!(summary.expiring_soon, 1);
    assert_eq!(summary.healthy, 1);
    assert_eq!(summary.rotations_triggered, 1);
    assert_eq!(h.refresher.call_count(), 1);
}
