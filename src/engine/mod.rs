mod conflict;
mod error;
mod fees;
mod lifecycle;
mod mutations;
mod queries;
mod slots;

pub use error::EngineError;
pub use fees::{FeeTrigger, compute_fee_and_refund};
pub use lifecycle::TransitionOutcome;
pub use mutations::CreateBookingRequest;
pub use slots::generate_slots;

use std::io;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::config::EngineConfig;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedProviderState = Arc<RwLock<ProviderState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task owning the WAL, batching appends for group commit:
/// block on the first append, drain whatever else is immediately queued,
/// flush the whole batch with one fsync, then answer every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush the batch before the non-append command.
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush so partially buffered bytes from a failed batch don't
    // leak into the next one.
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

// ── Engine ───────────────────────────────────────────────

pub struct Engine {
    pub state: DashMap<Ulid, SharedProviderState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) config: EngineConfig,
    /// Reverse lookup: booking id → provider id.
    pub(super) booking_to_provider: DashMap<Ulid, Ulid>,
}

/// Apply an event directly to a ProviderState (no locking — caller holds
/// the lock).
fn apply_to_provider(ps: &mut ProviderState, event: &Event, booking_index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::ProviderPolicyUpdated { policy, .. } => {
            ps.policy = *policy;
        }
        Event::RulesReplaced { rules, .. } => {
            ps.rules = rules.clone();
        }
        Event::TimeOffAdded {
            id,
            start_date,
            end_date,
            reason,
            ..
        } => {
            ps.time_off.push(TimeOffPeriod {
                id: *id,
                start_date: *start_date,
                end_date: *end_date,
                reason: reason.clone(),
            });
        }
        Event::TimeOffRemoved { id, .. } => {
            ps.time_off.retain(|t| t.id != *id);
        }
        Event::ServiceAdded {
            id,
            name,
            price,
            duration_minutes,
            ..
        } => {
            ps.services.push(Service {
                id: *id,
                name: name.clone(),
                price: *price,
                duration_minutes: *duration_minutes,
            });
        }
        Event::ServiceRemoved { id, .. } => {
            ps.services.retain(|s| s.id != *id);
        }
        Event::BookingCreated {
            provider_id,
            booking,
        } => {
            booking_index.insert(booking.id, *provider_id);
            ps.insert_booking(booking.clone());
        }
        Event::BookingConfirmed { id, .. } => {
            if let Some(b) = ps.booking_mut(*id) {
                b.status = BookingStatus::Confirmed;
            }
        }
        Event::BookingCompleted { id, .. } => {
            if let Some(b) = ps.booking_mut(*id) {
                b.status = BookingStatus::Completed;
            }
        }
        Event::BookingCancelled {
            id,
            at,
            by,
            reason,
            settlement,
            ..
        } => {
            if let Some(b) = ps.booking_mut(*id) {
                b.status = BookingStatus::Cancelled;
                b.cancelled_by = Some(*by);
                b.cancelled_at = Some(*at);
                b.cancellation_reason = reason.clone();
                apply_settlement(b, settlement.as_ref(), *at);
            }
        }
        Event::BookingNoShow { id, at, settlement, .. } => {
            if let Some(b) = ps.booking_mut(*id) {
                b.status = BookingStatus::NoShow;
                apply_settlement(b, settlement.as_ref(), *at);
            }
        }
        Event::PaymentRecorded { id, .. } => {
            if let Some(b) = ps.booking_mut(*id) {
                b.payment_status = PaymentStatus::Paid;
            }
        }
        // ProviderCreated/Deleted are handled at the DashMap level, not here
        Event::ProviderCreated { .. } | Event::ProviderDeleted { .. } => {}
    }
}

fn apply_settlement(b: &mut Booking, settlement: Option<&Settlement>, at: Ms) {
    let Some(s) = settlement else { return };
    b.no_show_fee_charged = s.fee_charged;
    b.no_show_fee_amount = s.fee_charged.then_some(s.fee_amount);
    b.refund_amount = Some(s.refund_amount);
    if s.refund_amount > rust_decimal::Decimal::ZERO {
        b.refunded_at = Some(at);
        b.payment_status = PaymentStatus::Refunded;
    }
}

impl Engine {
    pub fn new(config: EngineConfig, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::replay(&config.wal_path)?;
        let wal = Wal::open(&config.wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            notify,
            config,
            booking_to_provider: DashMap::new(),
        };

        // Replay — the engine is the sole owner of these Arcs here, so
        // try_write always succeeds instantly. blocking_write would panic
        // inside an async context.
        for event in &events {
            match event {
                Event::ProviderCreated {
                    id,
                    display_name,
                    policy,
                } => {
                    let ps = ProviderState::new(*id, display_name.clone(), *policy);
                    engine.state.insert(*id, Arc::new(RwLock::new(ps)));
                }
                Event::ProviderDeleted { id } => {
                    if let Some((_, ps)) = engine.state.remove(id) {
                        let guard = ps.try_read().expect("replay: uncontended read");
                        for b in &guard.bookings {
                            engine.booking_to_provider.remove(&b.id);
                        }
                    }
                }
                other => {
                    if let Some(provider_id) = event_provider_id(other)
                        && let Some(entry) = engine.state.get(&provider_id)
                    {
                        let ps_arc = entry.clone();
                        let mut guard = ps_arc.try_write().expect("replay: uncontended write");
                        apply_to_provider(&mut guard, other, &engine.booking_to_provider);
                    }
                }
            }
        }
        metrics::gauge!(crate::observability::PROVIDERS_ACTIVE).set(engine.state.len() as f64);

        Ok(engine)
    }

    /// Write an event to the WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_provider(&self, id: &Ulid) -> Option<SharedProviderState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn provider_of_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_to_provider.get(booking_id).map(|e| *e.value())
    }

    /// WAL-append then apply, in that order, under the caller's lock.
    pub(super) async fn persist_and_apply(
        &self,
        ps: &mut ProviderState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_provider(ps, event, &self.booking_to_provider);
        Ok(())
    }

    /// Lookup booking → provider, get the provider, acquire its write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<ProviderState>), EngineError> {
        let provider_id = self
            .provider_of_booking(booking_id)
            .ok_or(EngineError::NotFound(*booking_id))?;
        let ps = self
            .get_provider(&provider_id)
            .ok_or(EngineError::NotFound(provider_id))?;
        let guard = ps.write_owned().await;
        Ok((provider_id, guard))
    }
}

/// Extract the provider id from an event (for non-Create/Delete events).
fn event_provider_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::RulesReplaced { provider_id, .. }
        | Event::TimeOffAdded { provider_id, .. }
        | Event::TimeOffRemoved { provider_id, .. }
        | Event::ServiceAdded { provider_id, .. }
        | Event::ServiceRemoved { provider_id, .. }
        | Event::BookingCreated { provider_id, .. }
        | Event::BookingConfirmed { provider_id, .. }
        | Event::BookingCompleted { provider_id, .. }
        | Event::BookingCancelled { provider_id, .. }
        | Event::BookingNoShow { provider_id, .. }
        | Event::PaymentRecorded { provider_id, .. } => Some(*provider_id),
        Event::ProviderPolicyUpdated { id, .. } => Some(*id),
        Event::ProviderCreated { .. } | Event::ProviderDeleted { .. } => None,
    }
}
