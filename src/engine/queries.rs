use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::now_ms;
use super::slots::generate_slots;
use super::{Engine, EngineError};

impl Engine {
    /// Bookable slots for a provider over `num_days` starting at
    /// `range_start`. `granularity_minutes` falls back to the configured
    /// default (60 unless overridden).
    ///
    /// Pure read: takes the provider read lock only, so availability
    /// queries run in parallel with each other.
    pub async fn get_availability(
        &self,
        provider_id: Ulid,
        range_start: NaiveDate,
        num_days: u32,
        granularity_minutes: Option<u32>,
    ) -> Result<Vec<Slot>, EngineError> {
        if num_days == 0 || num_days > MAX_QUERY_DAYS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        let granularity =
            granularity_minutes.unwrap_or(self.config.default_granularity_minutes);
        if !(MIN_SLOT_GRANULARITY_MIN..=MAX_SLOT_GRANULARITY_MIN).contains(&granularity) {
            return Err(EngineError::Validation("slot granularity out of range"));
        }
        let ps = self
            .get_provider(&provider_id)
            .ok_or(EngineError::NotFound(provider_id))?;
        let guard = ps.read().await;

        let started = std::time::Instant::now();
        let now = now_ms();
        let slots: Vec<Slot> =
            generate_slots(&guard, range_start, num_days, granularity, now).collect();

        metrics::counter!(observability::AVAILABILITY_QUERIES_TOTAL).increment(1);
        metrics::histogram!(observability::AVAILABILITY_QUERY_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        Ok(slots)
    }

    pub async fn get_booking(&self, booking_id: Ulid) -> Result<Booking, EngineError> {
        let provider_id = self
            .provider_of_booking(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let ps = self
            .get_provider(&provider_id)
            .ok_or(EngineError::NotFound(provider_id))?;
        let guard = ps.read().await;
        guard
            .booking(booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(booking_id))
    }

    /// All of a provider's bookings (any status), ordered by start time.
    pub async fn list_bookings(&self, provider_id: Ulid) -> Result<Vec<Booking>, EngineError> {
        let ps = self
            .get_provider(&provider_id)
            .ok_or(EngineError::NotFound(provider_id))?;
        let guard = ps.read().await;
        Ok(guard.bookings.clone())
    }

    pub async fn list_rules(
        &self,
        provider_id: Ulid,
    ) -> Result<Vec<AvailabilityRule>, EngineError> {
        let ps = self
            .get_provider(&provider_id)
            .ok_or(EngineError::NotFound(provider_id))?;
        let guard = ps.read().await;
        Ok(guard.rules.clone())
    }

    pub async fn list_time_off(
        &self,
        provider_id: Ulid,
    ) -> Result<Vec<TimeOffPeriod>, EngineError> {
        let ps = self
            .get_provider(&provider_id)
            .ok_or(EngineError::NotFound(provider_id))?;
        let guard = ps.read().await;
        Ok(guard.time_off.clone())
    }

    pub async fn list_services(&self, provider_id: Ulid) -> Result<Vec<Service>, EngineError> {
        let ps = self
            .get_provider(&provider_id)
            .ok_or(EngineError::NotFound(provider_id))?;
        let guard = ps.read().await;
        Ok(guard.services.clone())
    }

    pub fn list_providers(&self) -> Vec<ProviderInfo> {
        self.state
            .iter()
            .map(|entry| {
                let ps = entry.value().clone();
                let guard = ps.try_read().expect("list_providers: uncontended read");
                ProviderInfo {
                    id: guard.id,
                    display_name: guard.display_name.clone(),
                    policy: guard.policy,
                }
            })
            .collect()
    }
}
