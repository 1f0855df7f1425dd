//! Test data builders for creating test entities
//!
//! Defaults give a registration that is eligible at every trigger of its
//! category, except fixed-hour categories which default to hour 0.

use chrono::Utc;
use broadcaster_domain::{
    categories::AlertCategory,
    entities::{RegistrationSchedule, TenantAlertRegistration},
};

/// Builder for creating test TenantAlertRegistration entities
pub struct RegistrationBuilder {
    registration: TenantAlertRegistration,
}

impl RegistrationBuilder {
    /// Destination id defaults to `tenant_id * 10`
    pub fn new(tenant_id: i64, category: AlertCategory) -> Self {
        let schedule = RegistrationSchedule::default_for(category)
            .unwrap_or(RegistrationSchedule::FixedHour { hour: 0 });
        Self {
            registration: TenantAlertRegistration {
                tenant_id,
                category,
                destination_id: tenant_id * 10,
                audience_tag_id: None,
                registered_by: 1,
                schedule,
                auto_delete: false,
                registered_at: Utc::now(),
            },
        }
    }

    pub fn with_destination(mut self, destination_id: i64) -> Self {
        self.registration.destination_id = destination_id;
        self
    }

    pub fn with_audience(mut self, audience_tag_id: i64) -> Self {
        self.registration.audience_tag_id = Some(audience_tag_id);
        self
    }

    pub fn with_schedule(mut self, schedule: RegistrationSchedule) -> Self {
        self.registration.schedule = schedule;
        self
    }

    pub fn early_warning(self) -> Self {
        self.with_schedule(RegistrationSchedule::Interval {
            early_warning: true,
        })
    }

    pub fn reset_day(self, day: u8) -> Self {
        self.with_schedule(RegistrationSchedule::Weekday {
            reset_day: Some(day),
        })
    }

    pub fn reset_hour(self, hour: u8) -> Self {
        self.with_schedule(RegistrationSchedule::FixedHour { hour })
    }

    pub fn auto_delete(mut self) -> Self {
        self.registration.auto_delete = true;
        self
    }

    pub fn build(self) -> TenantAlertRegistration {
        self.registration
    }
}
