use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

use broadcaster_dispatcher::eligibility::EligibilityResolver;
use broadcaster_domain::{
    categories::AlertCategory,
    entities::{EligibilityPredicate, MuteWindow},
    repositories::RegistrationRepository,
};
use broadcaster_testing_utils::{MockRegistrationRepository, RegistrationBuilder};

/// 2024-01-03 是周三（ISO 3）
fn wed(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 3, h, m, 0).unwrap()
}

fn resolver(repo: &Arc<MockRegistrationRepository>) -> EligibilityResolver {
    EligibilityResolver::new(repo.clone())
}

fn tenant_ids(candidates: &[broadcaster_domain::entities::DispatchCandidate]) -> Vec<i64> {
    candidates.iter().map(|c| c.tenant_id).collect()
}

#[tokio::test]
async fn test_muted_bucket_excludes_tenant_at_midnight() {
    let repo = Arc::new(MockRegistrationRepository::with_registrations(vec![
        RegistrationBuilder::new(1, AlertCategory::CrateRespawn).build(),
        RegistrationBuilder::new(2, AlertCategory::CrateRespawn).build(),
    ]));
    let window = MuteWindow::from_buckets(1, AlertCategory::CrateRespawn, &[0]).unwrap();
    repo.save_mute_window(&window).await.unwrap();

    let midnight = resolver(&repo)
        .resolve(AlertCategory::CrateRespawn, wed(0, 0))
        .await
        .unwrap();
    assert_eq!(tenant_ids(&midnight.candidates), vec![2]);
    assert_eq!(midnight.event_at, wed(0, 0));

    let four = resolver(&repo)
        .resolve(AlertCategory::CrateRespawn, wed(4, 0))
        .await
        .unwrap();
    assert_eq!(tenant_ids(&four.candidates), vec![1, 2]);
}

#[tokio::test]
async fn test_missing_mute_row_counts_as_unmuted() {
    let repo = Arc::new(MockRegistrationRepository::with_registrations(vec![
        RegistrationBuilder::new(9, AlertCategory::CrateRespawn).build(),
    ]));
    assert_eq!(repo.mute_count(), 0);

    let result = resolver(&repo)
        .resolve(AlertCategory::CrateRespawn, wed(20, 0))
        .await
        .unwrap();
    assert_eq!(tenant_ids(&result.candidates), vec![9]);
}

#[tokio::test]
async fn test_instant_outside_buckets_yields_nothing_without_query() {
    let repo = Arc::new(MockRegistrationRepository::with_registrations(vec![
        RegistrationBuilder::new(1, AlertCategory::CrateRespawn).build(),
    ]));

    let result = resolver(&repo)
        .resolve(AlertCategory::CrateRespawn, wed(13, 0))
        .await
        .unwrap();
    assert!(result.candidates.is_empty());
    assert_eq!(repo.eligibility_calls(), 0);
}

#[tokio::test]
async fn test_cargo_early_warning_splits_audience() {
    let repo = Arc::new(MockRegistrationRepository::with_registrations(vec![
        RegistrationBuilder::new(1, AlertCategory::CargoScramble).build(),
        RegistrationBuilder::new(2, AlertCategory::CargoScramble)
            .early_warning()
            .build(),
    ]));

    let early = resolver(&repo)
        .resolve(AlertCategory::CargoScramble, wed(11, 0))
        .await
        .unwrap();
    assert_eq!(tenant_ids(&early.candidates), vec![2]);
    assert_eq!(early.event_at, wed(12, 0));

    let standard = resolver(&repo)
        .resolve(AlertCategory::CargoScramble, wed(12, 0))
        .await
        .unwrap();
    assert_eq!(tenant_ids(&standard.candidates), vec![1]);
    assert_eq!(standard.event_at, wed(12, 0));
}

#[tokio::test]
async fn test_early_warning_respects_mute_of_target_bucket() {
    let repo = Arc::new(MockRegistrationRepository::with_registrations(vec![
        RegistrationBuilder::new(2, AlertCategory::CargoScramble)
            .early_warning()
            .build(),
    ]));
    // 18:30 是第3个时段（下标2），预警时刻为 17:30
    let window = MuteWindow::from_buckets(2, AlertCategory::CargoScramble, &[2]).unwrap();
    repo.save_mute_window(&window).await.unwrap();

    let result = resolver(&repo)
        .resolve(AlertCategory::CargoScramble, wed(17, 30))
        .await
        .unwrap();
    assert!(result.candidates.is_empty());
}

#[tokio::test]
async fn test_weekday_matches_iso_reset_day() {
    let repo = Arc::new(MockRegistrationRepository::with_registrations(vec![
        RegistrationBuilder::new(1, AlertCategory::Purification)
            .reset_day(3)
            .build(),
        RegistrationBuilder::new(2, AlertCategory::Purification)
            .reset_day(5)
            .build(),
        // 未选择重置日
        RegistrationBuilder::new(3, AlertCategory::Purification).build(),
        RegistrationBuilder::new(4, AlertCategory::Controller)
            .reset_day(3)
            .build(),
    ]));

    let result = resolver(&repo)
        .resolve(AlertCategory::Purification, wed(0, 0))
        .await
        .unwrap();
    assert_eq!(tenant_ids(&result.candidates), vec![1]);
}

#[tokio::test]
async fn test_fixed_hour_matches_current_hour() {
    let repo = Arc::new(MockRegistrationRepository::with_registrations(vec![
        RegistrationBuilder::new(1, AlertCategory::Sproutlet)
            .reset_hour(7)
            .build(),
        RegistrationBuilder::new(2, AlertCategory::Sproutlet)
            .reset_hour(8)
            .build(),
    ]));

    let result = resolver(&repo)
        .resolve(AlertCategory::Sproutlet, wed(7, 15))
        .await
        .unwrap();
    assert_eq!(tenant_ids(&result.candidates), vec![1]);
}

#[tokio::test]
async fn test_unconditional_returns_all_sorted() {
    let repo = Arc::new(MockRegistrationRepository::with_registrations(vec![
        RegistrationBuilder::new(30, AlertCategory::Medics).build(),
        RegistrationBuilder::new(10, AlertCategory::Medics).build(),
        RegistrationBuilder::new(20, AlertCategory::Medics).build(),
        RegistrationBuilder::new(40, AlertCategory::CrateRespawn).build(),
    ]));

    let result = resolver(&repo)
        .resolve(AlertCategory::Medics, wed(9, 30))
        .await
        .unwrap();
    assert_eq!(tenant_ids(&result.candidates), vec![10, 20, 30]);
}

#[test]
fn test_predicate_for_each_class() {
    assert_eq!(
        EligibilityResolver::predicate_for(AlertCategory::CargoScramble, wed(17, 30)),
        Some((
            EligibilityPredicate::UnmutedBucket {
                bucket: 2,
                early_warning: true
            },
            wed(18, 30)
        ))
    );
    assert_eq!(
        EligibilityResolver::predicate_for(AlertCategory::Controller, wed(0, 0)),
        Some((EligibilityPredicate::ResetWeekday(3), wed(0, 0)))
    );
    assert_eq!(
        EligibilityResolver::predicate_for(AlertCategory::Sproutlet, wed(23, 15)),
        Some((EligibilityPredicate::ResetHour(23), wed(23, 15)))
    );
    assert_eq!(
        EligibilityResolver::predicate_for(AlertCategory::CrateRespawn, wed(3, 0)),
        None
    );
}
