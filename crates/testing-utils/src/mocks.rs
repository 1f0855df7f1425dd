//! Mock implementations for the repository and port traits
//!
//! In-memory doubles used by unit and integration tests. The registration
//! mock evaluates eligibility predicates with the same rules as the SQLite
//! queries so dispatch tests exercise realistic candidate sets.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use broadcaster_core::{BroadcastError, BroadcastResult};
use broadcaster_domain::{
    categories::AlertCategory,
    entities::{
        BlacklistEntry, DispatchCandidate, EligibilityPredicate, LocalePreference, MuteWindow,
        PremiumOverride, RegistrationSchedule, TenantAlertRegistration,
    },
    ports::{
        ChatPlatform, Destination, OperatorLog, OperatorLogEntry, OutboundMessage, Permissions,
        SentMessage, Severity,
    },
    repositories::{BlacklistRepository, PreferenceRepository, RegistrationRepository},
};

fn injected(what: &str) -> BroadcastError {
    BroadcastError::Internal(format!("injected failure: {what}"))
}

/// Mock implementation of RegistrationRepository for testing
#[derive(Debug, Clone, Default)]
pub struct MockRegistrationRepository {
    registrations: Arc<Mutex<HashMap<(i64, AlertCategory), TenantAlertRegistration>>>,
    mutes: Arc<Mutex<HashMap<(i64, AlertCategory), MuteWindow>>>,
    eligibility_calls: Arc<AtomicUsize>,
    pending_eligibility_failures: Arc<AtomicUsize>,
    fail_deletes: Arc<AtomicBool>,
}

impl MockRegistrationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_registrations(registrations: Vec<TenantAlertRegistration>) -> Self {
        let repo = Self::new();
        {
            let mut map = repo.registrations.lock().unwrap();
            for registration in registrations {
                map.insert((registration.tenant_id, registration.category), registration);
            }
        }
        repo
    }

    /// The next `count` eligibility queries fail
    pub fn fail_next_eligibility(&self, count: usize) {
        self.pending_eligibility_failures
            .store(count, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn eligibility_calls(&self) -> usize {
        self.eligibility_calls.load(Ordering::SeqCst)
    }

    pub fn count(&self) -> usize {
        self.registrations.lock().unwrap().len()
    }

    pub fn mute_count(&self) -> usize {
        self.mutes.lock().unwrap().len()
    }

    pub fn contains(&self, tenant_id: i64, category: AlertCategory) -> bool {
        self.registrations
            .lock()
            .unwrap()
            .contains_key(&(tenant_id, category))
    }

    fn matches(
        &self,
        registration: &TenantAlertRegistration,
        predicate: EligibilityPredicate,
    ) -> bool {
        match (predicate, registration.schedule) {
            (
                EligibilityPredicate::UnmutedBucket {
                    bucket,
                    early_warning,
                },
                RegistrationSchedule::Interval {
                    early_warning: registered_early,
                },
            ) => {
                let muted = self
                    .mutes
                    .lock()
                    .unwrap()
                    .get(&(registration.tenant_id, registration.category))
                    .map(|w| w.is_muted(bucket))
                    .unwrap_or(false);
                registered_early == early_warning && !muted
            }
            (
                EligibilityPredicate::ResetWeekday(day),
                RegistrationSchedule::Weekday { reset_day },
            ) => reset_day == Some(day),
            (EligibilityPredicate::ResetHour(hour), RegistrationSchedule::FixedHour { hour: h }) => {
                h == hour
            }
            (EligibilityPredicate::All, _) => true,
            _ => false,
        }
    }
}

#[async_trait]
impl RegistrationRepository for MockRegistrationRepository {
    async fn upsert(&self, registration: &TenantAlertRegistration) -> BroadcastResult<()> {
        let key = (registration.tenant_id, registration.category);
        self.registrations
            .lock()
            .unwrap()
            .insert(key, registration.clone());
        if registration.category.has_mute_window() {
            self.mutes
                .lock()
                .unwrap()
                .entry(key)
                .or_insert_with(|| MuteWindow::unmuted(key.0, key.1));
        }
        Ok(())
    }

    async fn find(
        &self,
        tenant_id: i64,
        category: AlertCategory,
    ) -> BroadcastResult<Option<TenantAlertRegistration>> {
        Ok(self
            .registrations
            .lock()
            .unwrap()
            .get(&(tenant_id, category))
            .cloned())
    }

    async fn find_by_tenant(&self, tenant_id: i64) -> BroadcastResult<Vec<TenantAlertRegistration>> {
        let mut rows: Vec<_> = self
            .registrations
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.tenant_id == tenant_id)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.category.as_str());
        Ok(rows)
    }

    async fn find_eligible(
        &self,
        category: AlertCategory,
        predicate: EligibilityPredicate,
    ) -> BroadcastResult<Vec<DispatchCandidate>> {
        self.eligibility_calls.fetch_add(1, Ordering::SeqCst);
        let pending = self.pending_eligibility_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.pending_eligibility_failures
                .store(pending - 1, Ordering::SeqCst);
            return Err(injected("eligibility query"));
        }

        let registrations: Vec<TenantAlertRegistration> = self
            .registrations
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.category == category)
            .cloned()
            .collect();

        let mut candidates: Vec<DispatchCandidate> = registrations
            .iter()
            .filter(|r| self.matches(r, predicate))
            .map(|r| DispatchCandidate {
                tenant_id: r.tenant_id,
                destination_id: r.destination_id,
                audience_tag_id: r.audience_tag_id,
                auto_delete: r.auto_delete,
            })
            .collect();
        candidates.sort_by_key(|c| c.tenant_id);
        Ok(candidates)
    }

    async fn delete(&self, tenant_id: i64, category: AlertCategory) -> BroadcastResult<bool> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(injected("delete registration"));
        }
        self.mutes.lock().unwrap().remove(&(tenant_id, category));
        Ok(self
            .registrations
            .lock()
            .unwrap()
            .remove(&(tenant_id, category))
            .is_some())
    }

    async fn delete_tenant(&self, tenant_id: i64) -> BroadcastResult<u64> {
        self.mutes.lock().unwrap().retain(|(t, _), _| *t != tenant_id);
        let mut registrations = self.registrations.lock().unwrap();
        let before = registrations.len();
        registrations.retain(|(t, _), _| *t != tenant_id);
        Ok((before - registrations.len()) as u64)
    }

    async fn delete_by_destination(&self, destination_id: i64) -> BroadcastResult<u64> {
        let mut registrations = self.registrations.lock().unwrap();
        let keys: Vec<(i64, AlertCategory)> = registrations
            .iter()
            .filter(|(_, r)| r.destination_id == destination_id)
            .map(|(k, _)| *k)
            .collect();
        let mut mutes = self.mutes.lock().unwrap();
        for key in &keys {
            registrations.remove(key);
            mutes.remove(key);
        }
        Ok(keys.len() as u64)
    }

    async fn save_mute_window(&self, window: &MuteWindow) -> BroadcastResult<()> {
        self.mutes
            .lock()
            .unwrap()
            .insert((window.tenant_id, window.category), *window);
        Ok(())
    }

    async fn find_mute_window(
        &self,
        tenant_id: i64,
        category: AlertCategory,
    ) -> BroadcastResult<Option<MuteWindow>> {
        Ok(self.mutes.lock().unwrap().get(&(tenant_id, category)).copied())
    }

    async fn count_tenants(&self) -> BroadcastResult<u64> {
        let tenants: HashSet<i64> = self
            .registrations
            .lock()
            .unwrap()
            .keys()
            .map(|(t, _)| *t)
            .collect();
        Ok(tenants.len() as u64)
    }
}

/// Mock implementation of PreferenceRepository for testing
#[derive(Debug, Clone, Default)]
pub struct MockPreferenceRepository {
    locales: Arc<Mutex<HashMap<i64, LocalePreference>>>,
    overrides: Arc<Mutex<HashMap<(i64, AlertCategory), PremiumOverride>>>,
    fail_reads: Arc<AtomicBool>,
}

impl MockPreferenceRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_locale(&self, tenant_id: i64, locale: &str) {
        self.locales.lock().unwrap().insert(
            tenant_id,
            LocalePreference {
                tenant_id,
                locale: locale.to_string(),
                set_by: 0,
                updated_at: Utc::now(),
            },
        );
    }

    pub fn set_override(&self, tenant_id: i64, category: AlertCategory, text: &str) {
        self.overrides.lock().unwrap().insert(
            (tenant_id, category),
            PremiumOverride {
                tenant_id,
                category,
                text: text.to_string(),
                updated_at: Utc::now(),
            },
        );
    }

    pub fn override_count(&self) -> usize {
        self.overrides.lock().unwrap().len()
    }
}

#[async_trait]
impl PreferenceRepository for MockPreferenceRepository {
    async fn find_locale(&self, tenant_id: i64) -> BroadcastResult<Option<LocalePreference>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(injected("locale lookup"));
        }
        Ok(self.locales.lock().unwrap().get(&tenant_id).cloned())
    }

    async fn save_locale(&self, preference: &LocalePreference) -> BroadcastResult<()> {
        self.locales
            .lock()
            .unwrap()
            .insert(preference.tenant_id, preference.clone());
        Ok(())
    }

    async fn delete_locale(&self, tenant_id: i64) -> BroadcastResult<bool> {
        Ok(self.locales.lock().unwrap().remove(&tenant_id).is_some())
    }

    async fn find_premium_override(
        &self,
        tenant_id: i64,
        category: AlertCategory,
    ) -> BroadcastResult<Option<PremiumOverride>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(injected("premium override lookup"));
        }
        Ok(self
            .overrides
            .lock()
            .unwrap()
            .get(&(tenant_id, category))
            .cloned())
    }

    async fn save_premium_override(&self, premium: &PremiumOverride) -> BroadcastResult<()> {
        self.overrides
            .lock()
            .unwrap()
            .insert((premium.tenant_id, premium.category), premium.clone());
        Ok(())
    }

    async fn delete_premium_override(
        &self,
        tenant_id: i64,
        category: AlertCategory,
    ) -> BroadcastResult<bool> {
        Ok(self
            .overrides
            .lock()
            .unwrap()
            .remove(&(tenant_id, category))
            .is_some())
    }

    async fn delete_tenant(&self, tenant_id: i64) -> BroadcastResult<u64> {
        let mut removed = 0;
        if self.locales.lock().unwrap().remove(&tenant_id).is_some() {
            removed += 1;
        }
        let mut overrides = self.overrides.lock().unwrap();
        let before = overrides.len();
        overrides.retain(|(t, _), _| *t != tenant_id);
        removed += (before - overrides.len()) as u64;
        Ok(removed)
    }
}

/// Mock implementation of BlacklistRepository for testing
#[derive(Debug, Clone, Default)]
pub struct MockBlacklistRepository {
    entries: Arc<Mutex<HashMap<i64, BlacklistEntry>>>,
}

impl MockBlacklistRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_strikes(tenant_id: i64, strikes: i64) -> Self {
        let repo = Self::new();
        repo.entries.lock().unwrap().insert(
            tenant_id,
            BlacklistEntry {
                tenant_id,
                strikes,
                last_strike_at: Utc::now(),
            },
        );
        repo
    }
}

#[async_trait]
impl BlacklistRepository for MockBlacklistRepository {
    async fn find(&self, tenant_id: i64) -> BroadcastResult<Option<BlacklistEntry>> {
        Ok(self.entries.lock().unwrap().get(&tenant_id).cloned())
    }

    async fn add_strike(&self, tenant_id: i64) -> BroadcastResult<BlacklistEntry> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.entry(tenant_id).or_insert(BlacklistEntry {
            tenant_id,
            strikes: 0,
            last_strike_at: Utc::now(),
        });
        entry.strikes += 1;
        entry.last_strike_at = Utc::now();
        Ok(entry.clone())
    }
}

/// Chat platform double that records every call
#[derive(Debug, Default)]
pub struct MockChatPlatform {
    destinations: Mutex<HashMap<i64, Destination>>,
    unresolvable_errors: Mutex<HashSet<i64>>,
    failing_sends: Mutex<HashSet<i64>>,
    premium_tenants: Mutex<HashSet<i64>>,
    fail_notices: AtomicBool,
    fail_deletes: AtomicBool,
    fail_tenant_count: AtomicBool,
    next_message_id: AtomicI64,
    send_attempts: Mutex<Vec<i64>>,
    sent: Mutex<Vec<(i64, OutboundMessage)>>,
    scheduled_deletes: Mutex<Vec<(SentMessage, Duration)>>,
    notices: Mutex<Vec<(i64, String)>>,
    tenant_counts: Mutex<Vec<u64>>,
}

impl MockChatPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a reachable destination with every permission granted
    pub fn add_destination(&self, destination_id: i64, tenant_id: i64) {
        self.add_destination_with(Destination {
            id: destination_id,
            tenant_id,
            permissions: Permissions::all(),
            tenant_locale: None,
        });
    }

    pub fn add_destination_with(&self, destination: Destination) {
        self.destinations
            .lock()
            .unwrap()
            .insert(destination.id, destination);
    }

    /// Destination lookups for this id return an error instead of "not found"
    pub fn fail_resolve(&self, destination_id: i64) {
        self.unresolvable_errors.lock().unwrap().insert(destination_id);
    }

    pub fn fail_sends_to(&self, destination_id: i64) {
        self.failing_sends.lock().unwrap().insert(destination_id);
    }

    pub fn grant_premium(&self, tenant_id: i64) {
        self.premium_tenants.lock().unwrap().insert(tenant_id);
    }

    pub fn fail_notices(&self, fail: bool) {
        self.fail_notices.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_tenant_count(&self, fail: bool) {
        self.fail_tenant_count.store(fail, Ordering::SeqCst);
    }

    pub fn send_attempts(&self) -> Vec<i64> {
        self.send_attempts.lock().unwrap().clone()
    }

    pub fn sent_messages(&self) -> Vec<(i64, OutboundMessage)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn scheduled_deletes(&self) -> Vec<(SentMessage, Duration)> {
        self.scheduled_deletes.lock().unwrap().clone()
    }

    pub fn notices(&self) -> Vec<(i64, String)> {
        self.notices.lock().unwrap().clone()
    }

    pub fn tenant_counts(&self) -> Vec<u64> {
        self.tenant_counts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatPlatform for MockChatPlatform {
    async fn resolve_destination(&self, destination_id: i64) -> BroadcastResult<Option<Destination>> {
        if self
            .unresolvable_errors
            .lock()
            .unwrap()
            .contains(&destination_id)
        {
            return Err(BroadcastError::Network("injected resolve failure".to_string()));
        }
        Ok(self.destinations.lock().unwrap().get(&destination_id).cloned())
    }

    async fn send_message(
        &self,
        destination_id: i64,
        message: &OutboundMessage,
    ) -> BroadcastResult<SentMessage> {
        self.send_attempts.lock().unwrap().push(destination_id);
        if self.failing_sends.lock().unwrap().contains(&destination_id) {
            return Err(BroadcastError::Platform(format!(
                "injected send failure for {destination_id}"
            )));
        }
        self.sent
            .lock()
            .unwrap()
            .push((destination_id, message.clone()));
        Ok(SentMessage {
            destination_id,
            message_id: self.next_message_id.fetch_add(1, Ordering::SeqCst) + 1,
        })
    }

    async fn schedule_delete(&self, message: SentMessage, delay: Duration) -> BroadcastResult<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(injected("schedule delete"));
        }
        self.scheduled_deletes.lock().unwrap().push((message, delay));
        Ok(())
    }

    async fn notify_tenant(&self, tenant_id: i64, text: &str) -> BroadcastResult<()> {
        if self.fail_notices.load(Ordering::SeqCst) {
            return Err(injected("tenant notice"));
        }
        self.notices
            .lock()
            .unwrap()
            .push((tenant_id, text.to_string()));
        Ok(())
    }

    async fn has_premium_entitlement(&self, tenant_id: i64) -> BroadcastResult<bool> {
        Ok(self.premium_tenants.lock().unwrap().contains(&tenant_id))
    }

    async fn update_tenant_count(&self, count: u64) -> BroadcastResult<()> {
        if self.fail_tenant_count.load(Ordering::SeqCst) {
            return Err(injected("tenant count display"));
        }
        self.tenant_counts.lock().unwrap().push(count);
        Ok(())
    }
}

/// Operator log that keeps every entry in memory
#[derive(Debug, Clone, Default)]
pub struct RecordingOperatorLog {
    entries: Arc<Mutex<Vec<OperatorLogEntry>>>,
}

impl RecordingOperatorLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<OperatorLogEntry> {
        self.entries.lock().unwrap().clone()
    }

    pub fn entries_with(&self, severity: Severity) -> Vec<OperatorLogEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.severity == severity)
            .collect()
    }
}

#[async_trait]
impl OperatorLog for RecordingOperatorLog {
    async fn log(&self, entry: OperatorLogEntry) {
        self.entries.lock().unwrap().push(entry);
    }
}
