use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tokio::sync::{RwLock, oneshot};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{check_no_conflict, now_ms, validate_span};
use super::fees::{FeeTrigger, compute_fee_and_refund, round2};
use super::lifecycle::{self, TransitionOutcome};
use super::{Engine, EngineError, WalCommand};

/// A client's request to book a provider's service.
#[derive(Debug, Clone)]
pub struct CreateBookingRequest {
    pub provider_id: Ulid,
    pub service_id: Ulid,
    pub client_id: Ulid,
    pub appointment_start: Ms,
    pub client_notes: Option<String>,
    pub design_reference_id: Option<Ulid>,
}

fn validate_policy(policy: &BookingPolicy) -> Result<(), EngineError> {
    if policy.cancellation_window_hours < 0 {
        return Err(EngineError::Validation(
            "cancellation window cannot be negative",
        ));
    }
    if policy.no_show_fee_percent < Decimal::ZERO {
        return Err(EngineError::Validation(
            "no-show fee percent cannot be negative",
        ));
    }
    Ok(())
}

impl Engine {
    // ── Provider CRUD ────────────────────────────────────────

    pub async fn create_provider(
        &self,
        id: Ulid,
        display_name: Option<String>,
        policy: BookingPolicy,
    ) -> Result<(), EngineError> {
        if self.state.len() >= MAX_PROVIDERS {
            return Err(EngineError::LimitExceeded("too many providers"));
        }
        if let Some(ref n) = display_name
            && n.len() > MAX_NAME_LEN
        {
            return Err(EngineError::LimitExceeded("provider name too long"));
        }
        validate_policy(&policy)?;
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::ProviderCreated {
            id,
            display_name: display_name.clone(),
            policy,
        };
        self.wal_append(&event).await?;
        let ps = ProviderState::new(id, display_name, policy);
        self.state.insert(id, Arc::new(RwLock::new(ps)));
        metrics::gauge!(observability::PROVIDERS_ACTIVE).set(self.state.len() as f64);
        tracing::info!(provider = %id, "provider created");
        Ok(())
    }

    pub async fn update_policy(
        &self,
        provider_id: Ulid,
        policy: BookingPolicy,
    ) -> Result<(), EngineError> {
        validate_policy(&policy)?;
        let ps = self
            .get_provider(&provider_id)
            .ok_or(EngineError::NotFound(provider_id))?;
        let mut guard = ps.write().await;

        let event = Event::ProviderPolicyUpdated {
            id: provider_id,
            policy,
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Providers with pending or confirmed bookings cannot be deleted.
    pub async fn delete_provider(&self, id: Ulid) -> Result<(), EngineError> {
        let ps = self.get_provider(&id).ok_or(EngineError::NotFound(id))?;
        let guard = ps.read().await;
        if guard.has_active_bookings() {
            return Err(EngineError::HasActiveBookings(id));
        }
        let booking_ids: Vec<Ulid> = guard.bookings.iter().map(|b| b.id).collect();
        drop(guard);

        let event = Event::ProviderDeleted { id };
        self.wal_append(&event).await?;
        self.state.remove(&id);
        for bid in booking_ids {
            self.booking_to_provider.remove(&bid);
        }
        metrics::gauge!(observability::PROVIDERS_ACTIVE).set(self.state.len() as f64);
        tracing::info!(provider = %id, "provider deleted");
        Ok(())
    }

    // ── Schedule configuration ───────────────────────────────

    /// Replace the provider's whole weekly rule set. There is no partial
    /// update — each save supersedes the previous rules wholesale.
    pub async fn replace_rules(
        &self,
        provider_id: Ulid,
        rules: Vec<AvailabilityRule>,
    ) -> Result<(), EngineError> {
        if rules.len() > MAX_RULES_PER_PROVIDER {
            return Err(EngineError::LimitExceeded("too many availability rules"));
        }
        for rule in &rules {
            if rule.day_of_week > 6 {
                return Err(EngineError::Validation("day_of_week out of range"));
            }
            // Midnight-spanning windows are not supported.
            if rule.end_time <= rule.start_time {
                return Err(EngineError::Validation("rule end must be after start"));
            }
        }
        let ps = self
            .get_provider(&provider_id)
            .ok_or(EngineError::NotFound(provider_id))?;
        let mut guard = ps.write().await;

        let event = Event::RulesReplaced { provider_id, rules };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn add_time_off(
        &self,
        id: Ulid,
        provider_id: Ulid,
        start_date: NaiveDate,
        end_date: NaiveDate,
        reason: Option<String>,
    ) -> Result<(), EngineError> {
        if end_date < start_date {
            return Err(EngineError::Validation("time off ends before it starts"));
        }
        if let Some(ref r) = reason
            && r.len() > MAX_REASON_LEN
        {
            return Err(EngineError::LimitExceeded("time off reason too long"));
        }
        let ps = self
            .get_provider(&provider_id)
            .ok_or(EngineError::NotFound(provider_id))?;
        let mut guard = ps.write().await;
        if guard.time_off.len() >= MAX_TIME_OFF_PER_PROVIDER {
            return Err(EngineError::LimitExceeded("too many time off periods"));
        }

        let event = Event::TimeOffAdded {
            id,
            provider_id,
            start_date,
            end_date,
            reason,
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn remove_time_off(&self, provider_id: Ulid, id: Ulid) -> Result<(), EngineError> {
        let ps = self
            .get_provider(&provider_id)
            .ok_or(EngineError::NotFound(provider_id))?;
        let mut guard = ps.write().await;
        if !guard.time_off.iter().any(|t| t.id == id) {
            return Err(EngineError::NotFound(id));
        }

        let event = Event::TimeOffRemoved { id, provider_id };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn add_service(
        &self,
        id: Ulid,
        provider_id: Ulid,
        name: String,
        price: Decimal,
        duration_minutes: u32,
    ) -> Result<(), EngineError> {
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(EngineError::Validation("service name length invalid"));
        }
        if price < Decimal::ZERO {
            return Err(EngineError::Validation("service price cannot be negative"));
        }
        if duration_minutes == 0 || duration_minutes > MAX_BOOKING_DURATION_MIN {
            return Err(EngineError::Validation("service duration out of range"));
        }
        let ps = self
            .get_provider(&provider_id)
            .ok_or(EngineError::NotFound(provider_id))?;
        let mut guard = ps.write().await;
        if guard.services.len() >= MAX_SERVICES_PER_PROVIDER {
            return Err(EngineError::LimitExceeded("too many services"));
        }
        if guard.service(id).is_some() {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::ServiceAdded {
            id,
            provider_id,
            name,
            price,
            duration_minutes,
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Existing bookings are untouched: they snapshotted price and duration
    /// at creation.
    pub async fn remove_service(&self, provider_id: Ulid, id: Ulid) -> Result<(), EngineError> {
        let ps = self
            .get_provider(&provider_id)
            .ok_or(EngineError::NotFound(provider_id))?;
        let mut guard = ps.write().await;
        if guard.service(id).is_none() {
            return Err(EngineError::NotFound(id));
        }

        let event = Event::ServiceRemoved { id, provider_id };
        self.persist_and_apply(&mut guard, &event).await
    }

    // ── Booking lifecycle ────────────────────────────────────

    /// Book a slot. The conflict check and the insert happen under one
    /// provider write lock, so two racing requests for overlapping
    /// intervals cannot both pass — the loser gets `SlotUnavailable`.
    pub async fn create_booking(
        &self,
        request: CreateBookingRequest,
    ) -> Result<Booking, EngineError> {
        if let Some(ref notes) = request.client_notes
            && notes.len() > MAX_NOTE_LEN
        {
            return Err(EngineError::LimitExceeded("client notes too long"));
        }
        let ps = self
            .get_provider(&request.provider_id)
            .ok_or(EngineError::NotFound(request.provider_id))?;
        let mut guard = ps.write().await;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_PROVIDER {
            return Err(EngineError::LimitExceeded("too many bookings on provider"));
        }

        let service = guard
            .service(request.service_id)
            .ok_or(EngineError::NotFound(request.service_id))?
            .clone();

        let now = now_ms();
        if request.appointment_start <= now {
            return Err(EngineError::Validation("appointment must be in the future"));
        }
        let span = Span::new(
            request.appointment_start,
            request.appointment_start + Ms::from(service.duration_minutes) * 60_000,
        );
        validate_span(&span)?;

        if let Err(e) = check_no_conflict(&guard, &span) {
            metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            tracing::debug!(provider = %request.provider_id, "booking rejected: slot conflict");
            return Err(e);
        }

        let service_fee_amount = round2(
            service.price * self.config.service_fee_percent / Decimal::ONE_HUNDRED,
        );
        let booking = Booking {
            id: Ulid::new(),
            provider_id: request.provider_id,
            client_id: request.client_id,
            service_id: request.service_id,
            design_reference_id: request.design_reference_id,
            appointment_start: request.appointment_start,
            duration_minutes: service.duration_minutes,
            service_price: service.price,
            service_fee_amount,
            total_price: service.price + service_fee_amount,
            payment_status: PaymentStatus::Pending,
            status: BookingStatus::Pending,
            cancellation_reason: None,
            cancelled_by: None,
            cancelled_at: None,
            no_show_fee_charged: false,
            no_show_fee_amount: None,
            refund_amount: None,
            refunded_at: None,
            client_notes: request.client_notes,
            tech_notes: None,
            created_at: now,
        };

        let event = Event::BookingCreated {
            provider_id: request.provider_id,
            booking: booking.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;

        metrics::counter!(observability::BOOKINGS_CREATED_TOTAL).increment(1);
        tracing::info!(booking = %booking.id, provider = %booking.provider_id, "booking created");
        self.notify.send(&lifecycle::creation_intent(&booking));
        Ok(booking)
    }

    /// Drive a booking along one lifecycle edge. Returns the updated
    /// snapshot, the notification to deliver, and — for paid
    /// cancellations/no-shows — the settlement the payment collaborator
    /// must execute.
    pub async fn transition_booking(
        &self,
        booking_id: Ulid,
        actor_id: Ulid,
        actor_role: ActorRole,
        action: BookingAction,
        reason: Option<String>,
    ) -> Result<TransitionOutcome, EngineError> {
        if let Some(ref r) = reason
            && r.len() > MAX_REASON_LEN
        {
            return Err(EngineError::LimitExceeded("reason too long"));
        }
        let (provider_id, mut guard) = self.resolve_booking_write(&booking_id).await?;
        let booking = guard
            .booking(booking_id)
            .ok_or(EngineError::NotFound(booking_id))?
            .clone();

        lifecycle::authorize(action, actor_id, actor_role, &booking)?;
        lifecycle::next_status(booking.status, action)?;

        let now = now_ms();
        let paid = booking.payment_status == PaymentStatus::Paid;
        let settlement = match action {
            BookingAction::Cancel if paid => Some(match actor_role {
                ActorRole::Client => compute_fee_and_refund(
                    booking.service_price,
                    booking.total_price,
                    booking.appointment_start,
                    now,
                    &guard.policy,
                    FeeTrigger::ClientCancel,
                ),
                // A provider cancellation always refunds the client in full.
                ActorRole::Provider => Settlement {
                    fee_charged: false,
                    fee_amount: Decimal::ZERO,
                    refund_amount: round2(booking.total_price),
                    anomaly: false,
                },
            }),
            BookingAction::NoShow if paid => Some(compute_fee_and_refund(
                booking.service_price,
                booking.total_price,
                booking.appointment_start,
                now,
                &guard.policy,
                FeeTrigger::NoShow,
            )),
            _ => None,
        };

        let event = match action {
            BookingAction::Confirm => Event::BookingConfirmed {
                id: booking_id,
                provider_id,
                at: now,
            },
            BookingAction::Complete => Event::BookingCompleted {
                id: booking_id,
                provider_id,
                at: now,
            },
            BookingAction::Cancel => Event::BookingCancelled {
                id: booking_id,
                provider_id,
                at: now,
                by: actor_role,
                reason,
                settlement,
            },
            BookingAction::NoShow => Event::BookingNoShow {
                id: booking_id,
                provider_id,
                at: now,
                settlement,
            },
        };
        self.persist_and_apply(&mut guard, &event).await?;

        let updated = guard
            .booking(booking_id)
            .ok_or(EngineError::NotFound(booking_id))?
            .clone();

        metrics::counter!(
            observability::TRANSITIONS_TOTAL,
            "action" => observability::action_label(action)
        )
        .increment(1);
        if settlement.is_some_and(|s| s.anomaly) {
            metrics::counter!(observability::SETTLEMENT_ANOMALIES_TOTAL).increment(1);
        }
        tracing::info!(
            booking = %booking_id,
            action = %action,
            status = %updated.status,
            "booking transitioned"
        );

        let notification = lifecycle::transition_intent(action, actor_role, &updated);
        self.notify.send(&notification);
        Ok(TransitionOutcome {
            booking: updated,
            notification,
            settlement,
        })
    }

    /// The payment collaborator reports a successful capture.
    pub async fn record_payment(&self, booking_id: Ulid) -> Result<Booking, EngineError> {
        let (provider_id, mut guard) = self.resolve_booking_write(&booking_id).await?;
        let booking = guard
            .booking(booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        if booking.status.is_terminal() {
            return Err(EngineError::Validation(
                "cannot record payment on a closed booking",
            ));
        }
        if booking.payment_status != PaymentStatus::Pending {
            return Err(EngineError::Validation("payment already recorded"));
        }

        let event = Event::PaymentRecorded {
            id: booking_id,
            provider_id,
            at: now_ms(),
        };
        self.persist_and_apply(&mut guard, &event).await?;

        let updated = guard
            .booking(booking_id)
            .ok_or(EngineError::NotFound(booking_id))?
            .clone();
        self.notify.send(&lifecycle::payment_intent(&updated));
        Ok(updated)
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Rewrite the WAL with only the events needed to recreate the current
    /// state. Caller-driven; there is no background compactor.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        for entry in self.state.iter() {
            let ps = entry.value().clone();
            let guard = ps.try_read().expect("compact: uncontended read");

            events.push(Event::ProviderCreated {
                id: guard.id,
                display_name: guard.display_name.clone(),
                policy: guard.policy,
            });
            if !guard.rules.is_empty() {
                events.push(Event::RulesReplaced {
                    provider_id: guard.id,
                    rules: guard.rules.clone(),
                });
            }
            for t in &guard.time_off {
                events.push(Event::TimeOffAdded {
                    id: t.id,
                    provider_id: guard.id,
                    start_date: t.start_date,
                    end_date: t.end_date,
                    reason: t.reason.clone(),
                });
            }
            for s in &guard.services {
                events.push(Event::ServiceAdded {
                    id: s.id,
                    provider_id: guard.id,
                    name: s.name.clone(),
                    price: s.price,
                    duration_minutes: s.duration_minutes,
                });
            }
            // Bookings replay from their full snapshots, terminal ones
            // included.
            for b in &guard.bookings {
                events.push(Event::BookingCreated {
                    provider_id: guard.id,
                    booking: b.clone(),
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
