use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

use broadcaster_dispatcher::{
    dispatch_engine::{DeliveryFailure, DispatchEngine, PassRetryConfig},
    templates::TemplateResolver,
};
use broadcaster_domain::{
    categories::AlertCategory,
    entities::MuteWindow,
    ports::{Capability, Destination, Permissions, Severity},
    repositories::RegistrationRepository,
};
use broadcaster_testing_utils::{
    MockChatPlatform, MockPreferenceRepository, MockRegistrationRepository, RecordingOperatorLog,
    RegistrationBuilder,
};

struct Harness {
    registrations: Arc<MockRegistrationRepository>,
    preferences: Arc<MockPreferenceRepository>,
    platform: Arc<MockChatPlatform>,
    log: Arc<RecordingOperatorLog>,
    engine: DispatchEngine,
}

impl Harness {
    fn new(registrations: Vec<broadcaster_domain::entities::TenantAlertRegistration>) -> Self {
        let platform = Arc::new(MockChatPlatform::new());
        for registration in &registrations {
            platform.add_destination(registration.destination_id, registration.tenant_id);
        }
        let registrations = Arc::new(MockRegistrationRepository::with_registrations(registrations));
        let preferences = Arc::new(MockPreferenceRepository::new());
        let log = Arc::new(RecordingOperatorLog::new());
        let engine = DispatchEngine::new(
            registrations.clone(),
            preferences.clone(),
            platform.clone(),
            log.clone(),
            Arc::new(TemplateResolver::builtin("en").unwrap()),
            PassRetryConfig {
                max_attempts: 5,
                retry_delay: Duration::ZERO,
            },
        );
        Self {
            registrations,
            preferences,
            platform,
            log,
            engine,
        }
    }
}

fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 3, h, m, 0).unwrap()
}

#[tokio::test]
async fn test_failing_candidate_does_not_affect_others() {
    let harness = Harness::new(vec![
        RegistrationBuilder::new(1, AlertCategory::Medics).build(),
        RegistrationBuilder::new(2, AlertCategory::Medics).build(),
        RegistrationBuilder::new(3, AlertCategory::Medics).build(),
    ]);
    harness.platform.fail_sends_to(20);

    let report = harness
        .engine
        .run_pass(AlertCategory::Medics, at(9, 30))
        .await
        .unwrap();

    assert_eq!(report.sent_count(), 2);
    assert_eq!(report.error_count(), 1);
    let mut attempted = harness.platform.send_attempts();
    attempted.sort();
    assert_eq!(attempted, vec![10, 20, 30]);

    assert!(!harness.registrations.contains(2, AlertCategory::Medics));
    assert!(harness.registrations.contains(1, AlertCategory::Medics));
    assert!(harness.registrations.contains(3, AlertCategory::Medics));

    let notices = harness.platform.notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].0, 2);

    let errors = harness.log.entries_with(Severity::Error);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].tenant_id, Some(2));
    assert_eq!(errors[0].destination_id, Some(20));
    assert!(errors[0].silent);
    // 高频类别不发送汇总
    assert!(harness.log.entries_with(Severity::Info).is_empty());
}

#[tokio::test]
async fn test_missing_destination_is_purged_with_one_error_entry() {
    let harness = Harness::new(vec![]);
    harness
        .registrations
        .upsert(&RegistrationBuilder::new(1, AlertCategory::CrateRespawn).build())
        .await
        .unwrap();

    let report = harness
        .engine
        .run_pass(AlertCategory::CrateRespawn, at(0, 0))
        .await
        .unwrap();

    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.outcomes[0].result, Err(DeliveryFailure::NotFound));
    assert!(!harness.registrations.contains(1, AlertCategory::CrateRespawn));
    assert!(harness.platform.notices().is_empty());

    let errors = harness.log.entries_with(Severity::Error);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].category, Some(AlertCategory::CrateRespawn));
    assert!(!errors[0].silent);

    let summaries = harness.log.entries_with(Severity::Info);
    assert_eq!(summaries.len(), 1);
}

#[tokio::test]
async fn test_missing_permissions_are_reported() {
    let harness = Harness::new(vec![]);
    harness
        .registrations
        .upsert(&RegistrationBuilder::new(5, AlertCategory::Medics).build())
        .await
        .unwrap();
    harness.platform.add_destination_with(Destination {
        id: 50,
        tenant_id: 5,
        permissions: Permissions::from_capabilities(&[
            Capability::ViewChannel,
            Capability::SendMessages,
        ]),
        tenant_locale: None,
    });

    let report = harness
        .engine
        .run_pass(AlertCategory::Medics, at(10, 0))
        .await
        .unwrap();

    assert_eq!(
        report.outcomes[0].result,
        Err(DeliveryFailure::PermissionDenied {
            missing: vec![Capability::EmbedLinks]
        })
    );
    assert!(harness.platform.send_attempts().is_empty());
    let notices = harness.platform.notices();
    assert_eq!(notices.len(), 1);
    assert!(notices[0].1.contains("Embed Links"));
    assert!(!harness.registrations.contains(5, AlertCategory::Medics));
}

#[tokio::test]
async fn test_failure_notice_follows_platform_locale() {
    let harness = Harness::new(vec![]);
    for tenant in [5, 6] {
        harness
            .registrations
            .upsert(&RegistrationBuilder::new(tenant, AlertCategory::Medics).build())
            .await
            .unwrap();
        harness.platform.add_destination_with(Destination {
            id: tenant * 10,
            tenant_id: tenant,
            permissions: Permissions::from_capabilities(&[Capability::ViewChannel]),
            tenant_locale: Some("de-DE".to_string()),
        });
    }
    // 显式偏好优先于平台语言
    harness.preferences.set_locale(6, "en");

    harness
        .engine
        .run_pass(AlertCategory::Medics, at(10, 0))
        .await
        .unwrap();

    let mut notices = harness.platform.notices();
    notices.sort_by_key(|(tenant, _)| *tenant);
    assert_eq!(notices.len(), 2);
    assert!(notices[0].1.contains("Berechtigungen fehlen"));
    assert!(notices[1].1.contains("missing these permissions"));
}

#[tokio::test]
async fn test_candidate_failures_never_rerun_the_pass() {
    let harness = Harness::new(vec![
        RegistrationBuilder::new(1, AlertCategory::Medics).build(),
        RegistrationBuilder::new(2, AlertCategory::Medics).build(),
        RegistrationBuilder::new(3, AlertCategory::Medics).build(),
    ]);
    harness.platform.fail_sends_to(10);
    harness.platform.fail_sends_to(30);

    let report = harness
        .engine
        .run_pass(AlertCategory::Medics, at(9, 30))
        .await
        .unwrap();

    assert_eq!(report.attempts, 1);
    assert_eq!(harness.registrations.eligibility_calls(), 1);
    let mut attempted = harness.platform.send_attempts();
    attempted.sort();
    assert_eq!(attempted, vec![10, 20, 30]);
}

#[tokio::test]
async fn test_retried_pass_delivers_each_tenant_once() {
    let harness = Harness::new(vec![
        RegistrationBuilder::new(1, AlertCategory::Medics).build(),
        RegistrationBuilder::new(2, AlertCategory::Medics).build(),
        RegistrationBuilder::new(3, AlertCategory::Medics).build(),
    ]);
    harness.registrations.fail_next_eligibility(4);

    let report = harness
        .engine
        .run_pass(AlertCategory::Medics, at(9, 30))
        .await
        .unwrap();

    assert_eq!(report.attempts, 5);
    assert_eq!(report.sent_count(), 3);
    let mut attempted = harness.platform.send_attempts();
    attempted.sort();
    assert_eq!(attempted, vec![10, 20, 30]);
}

#[tokio::test]
async fn test_eligibility_failure_retries_exactly_max_attempts() {
    let harness = Harness::new(vec![RegistrationBuilder::new(1, AlertCategory::Medics).build()]);
    harness.registrations.fail_next_eligibility(100);

    let result = harness
        .engine
        .run_pass(AlertCategory::Medics, at(9, 0))
        .await;

    assert!(result.is_err());
    assert_eq!(harness.registrations.eligibility_calls(), 5);
    assert!(harness.platform.send_attempts().is_empty());
}

#[tokio::test]
async fn test_pass_recovers_after_transient_failures() {
    let harness = Harness::new(vec![RegistrationBuilder::new(1, AlertCategory::Medics).build()]);
    harness.registrations.fail_next_eligibility(2);

    let report = harness
        .engine
        .run_pass(AlertCategory::Medics, at(9, 0))
        .await
        .unwrap();

    assert_eq!(report.attempts, 3);
    assert_eq!(report.sent_count(), 1);
    assert_eq!(harness.platform.send_attempts(), vec![10]);
}

#[tokio::test]
async fn test_auto_delete_uses_category_delay() {
    let harness = Harness::new(vec![
        RegistrationBuilder::new(1, AlertCategory::CargoScramble)
            .auto_delete()
            .build(),
        RegistrationBuilder::new(2, AlertCategory::CargoScramble).build(),
    ]);

    harness
        .engine
        .run_pass(AlertCategory::CargoScramble, at(12, 0))
        .await
        .unwrap();

    let deletes = harness.platform.scheduled_deletes();
    assert_eq!(deletes.len(), 1);
    assert_eq!(deletes[0].0.destination_id, 10);
    assert_eq!(deletes[0].1, Duration::from_secs(10_800));
}

#[tokio::test]
async fn test_auto_delete_failure_still_counts_as_sent() {
    let harness = Harness::new(vec![RegistrationBuilder::new(1, AlertCategory::Medics)
        .auto_delete()
        .build()]);
    harness.platform.fail_deletes(true);

    let report = harness
        .engine
        .run_pass(AlertCategory::Medics, at(9, 0))
        .await
        .unwrap();

    assert_eq!(report.sent_count(), 1);
    assert!(harness.registrations.contains(1, AlertCategory::Medics));
    assert!(harness.log.entries_with(Severity::Error).is_empty());
}

#[tokio::test]
async fn test_muted_tenant_is_skipped_at_midnight() {
    let harness = Harness::new(vec![
        RegistrationBuilder::new(1, AlertCategory::CrateRespawn).build(),
        RegistrationBuilder::new(2, AlertCategory::CrateRespawn).build(),
    ]);
    let window = MuteWindow::from_buckets(1, AlertCategory::CrateRespawn, &[0]).unwrap();
    harness.registrations.save_mute_window(&window).await.unwrap();

    let report = harness
        .engine
        .run_pass(AlertCategory::CrateRespawn, at(0, 0))
        .await
        .unwrap();

    assert_eq!(report.sent_count(), 1);
    assert_eq!(harness.platform.send_attempts(), vec![20]);
}

#[tokio::test]
async fn test_premium_override_and_audience_tag() {
    let harness = Harness::new(vec![
        RegistrationBuilder::new(1, AlertCategory::CargoScramble)
            .with_audience(777)
            .build(),
        RegistrationBuilder::new(2, AlertCategory::CargoScramble).build(),
    ]);
    harness.platform.grant_premium(1);
    harness
        .preferences
        .set_override(1, AlertCategory::CargoScramble, "Go go go {timestamp}");
    harness
        .preferences
        .set_override(2, AlertCategory::CargoScramble, "not premium");

    harness
        .engine
        .run_pass(AlertCategory::CargoScramble, at(15, 0))
        .await
        .unwrap();

    let sent = harness.platform.sent_messages();
    let premium = sent.iter().find(|(d, _)| *d == 10).unwrap();
    assert_eq!(premium.1.audience_tag_id, Some(777));
    assert_eq!(
        premium.1.body,
        format!("Go go go <t:{}:R>", at(15, 0).timestamp())
    );

    let plain = sent.iter().find(|(d, _)| *d == 20).unwrap();
    assert_eq!(plain.1.audience_tag_id, None);
    assert!(!plain.1.body.contains("not premium"));
}

#[tokio::test]
async fn test_locale_preference_and_read_failure_fallback() {
    let harness = Harness::new(vec![RegistrationBuilder::new(1, AlertCategory::Medics).build()]);
    harness.preferences.set_locale(1, "de");

    harness
        .engine
        .run_pass(AlertCategory::Medics, at(9, 0))
        .await
        .unwrap();
    assert_eq!(harness.platform.sent_messages()[0].1.title, "Sanitäter & Vorräte");

    harness.preferences.fail_reads(true);
    let report = harness
        .engine
        .run_pass(AlertCategory::Medics, at(9, 30))
        .await
        .unwrap();
    assert_eq!(report.sent_count(), 1);
    assert_eq!(harness.platform.sent_messages()[1].1.title, "Medics & Supplies");
}

#[tokio::test]
async fn test_empty_pass_is_silent() {
    let harness = Harness::new(vec![]);

    let report = harness
        .engine
        .run_pass(AlertCategory::CrateRespawn, at(4, 0))
        .await
        .unwrap();

    assert!(report.outcomes.is_empty());
    assert_eq!(report.attempts, 1);
    assert!(harness.log.entries().is_empty());
}

mod sqlite {
    use super::*;
    use broadcaster_dispatcher::commands::{RegisterRequest, TenantCommandService};
    use broadcaster_infrastructure::{
        DatabaseManager, SqliteBlacklistRepository, SqlitePreferenceRepository,
        SqliteRegistrationRepository,
    };

    #[tokio::test]
    async fn test_registered_and_muted_tenants_against_sqlite() {
        let db = DatabaseManager::in_memory().await.unwrap();
        db.migrate().await.unwrap();
        let registrations = Arc::new(SqliteRegistrationRepository::new(db.pool().clone()));
        let preferences = Arc::new(SqlitePreferenceRepository::new(db.pool().clone()));
        let blacklist = Arc::new(SqliteBlacklistRepository::new(db.pool().clone()));
        let platform = Arc::new(MockChatPlatform::new());
        let templates = Arc::new(TemplateResolver::builtin("en").unwrap());

        let commands = TenantCommandService::new(
            registrations.clone(),
            preferences.clone(),
            blacklist,
            platform.clone(),
            templates.clone(),
            3,
        );
        for tenant in [1, 2, 3] {
            platform.add_destination(tenant * 10, tenant);
            commands
                .register_tenant(RegisterRequest {
                    tenant_id: tenant,
                    category: AlertCategory::CrateRespawn,
                    destination_id: tenant * 10,
                    audience_tag_id: None,
                    registered_by: 99,
                    schedule: None,
                    auto_delete: tenant == 3,
                })
                .await
                .unwrap();
        }
        commands
            .set_mute_window(2, AlertCategory::CrateRespawn, &[0])
            .await
            .unwrap();

        let engine = DispatchEngine::new(
            registrations.clone(),
            preferences,
            platform.clone(),
            Arc::new(RecordingOperatorLog::new()),
            templates,
            PassRetryConfig {
                max_attempts: 5,
                retry_delay: Duration::ZERO,
            },
        );
        let report = engine
            .run_pass(AlertCategory::CrateRespawn, at(0, 0))
            .await
            .unwrap();

        assert_eq!(report.sent_count(), 2);
        let mut attempted = platform.send_attempts();
        attempted.sort();
        assert_eq!(attempted, vec![10, 30]);
        let deletes = platform.scheduled_deletes();
        assert_eq!(deletes.len(), 1);
        assert_eq!(deletes[0].1, Duration::from_secs(14_100));
    }
}
