use chrono::{NaiveDate, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only instant type.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

// ── Actors & statuses ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Client,
    Provider,
}

impl std::fmt::Display for ActorRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActorRole::Client => write!(f, "client"),
            ActorRole::Provider => write!(f, "provider"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
    NoShow,
}

impl BookingStatus {
    /// Active bookings occupy their time slot for conflict purposes.
    pub fn is_active(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Completed | BookingStatus::Cancelled | BookingStatus::NoShow
        )
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BookingStatus::Pending => write!(f, "pending"),
            BookingStatus::Confirmed => write!(f, "confirmed"),
            BookingStatus::Completed => write!(f, "completed"),
            BookingStatus::Cancelled => write!(f, "cancelled"),
            BookingStatus::NoShow => write!(f, "no_show"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Refunded,
}

/// The caller-requested lifecycle action on a booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingAction {
    Confirm,
    Cancel,
    Complete,
    NoShow,
}

impl BookingAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingAction::Confirm => "confirm",
            BookingAction::Cancel => "cancel",
            BookingAction::Complete => "complete",
            BookingAction::NoShow => "no_show",
        }
    }
}

impl std::fmt::Display for BookingAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Provider-side schedule entities ──────────────────────────────

/// A recurring weekly open window. `day_of_week` is 0 = Sunday … 6 = Saturday.
/// The rule set for a provider is superseded wholesale on each save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityRule {
    pub id: Ulid,
    pub day_of_week: u8,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub active: bool,
}

/// An explicit exclusion overriding availability rules for its span.
/// Dates are inclusive on both ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeOffPeriod {
    pub id: Ulid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub reason: Option<String>,
}

impl TimeOffPeriod {
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }
}

/// A bookable offering. Bookings snapshot `price` and `duration_minutes`
/// at creation time, so later edits never touch existing bookings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: Ulid,
    pub name: String,
    pub price: Decimal,
    pub duration_minutes: u32,
}

/// Per-provider cancellation/no-show policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingPolicy {
    /// Minimum notice (hours) before the appointment for a free cancellation.
    pub cancellation_window_hours: i64,
    pub no_show_fee_enabled: bool,
    /// Percentage of the service price charged on no-show or late cancel.
    pub no_show_fee_percent: Decimal,
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            cancellation_window_hours: 24,
            no_show_fee_enabled: true,
            no_show_fee_percent: Decimal::from(50),
        }
    }
}

/// Outcome of the fee/refund computation for a paid booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub fee_charged: bool,
    pub fee_amount: Decimal,
    pub refund_amount: Decimal,
    /// Set when the raw refund went negative and was clamped to zero —
    /// the record needs manual reconciliation.
    pub anomaly: bool,
}

// ── Booking ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub provider_id: Ulid,
    pub client_id: Ulid,
    pub service_id: Ulid,
    pub design_reference_id: Option<Ulid>,

    pub appointment_start: Ms,
    /// Snapshotted from the service at creation.
    pub duration_minutes: u32,

    pub service_price: Decimal,
    pub service_fee_amount: Decimal,
    pub total_price: Decimal,
    pub payment_status: PaymentStatus,

    pub status: BookingStatus,
    pub cancellation_reason: Option<String>,
    pub cancelled_by: Option<ActorRole>,
    pub cancelled_at: Option<Ms>,
    pub no_show_fee_charged: bool,
    pub no_show_fee_amount: Option<Decimal>,
    pub refund_amount: Option<Decimal>,
    pub refunded_at: Option<Ms>,

    pub client_notes: Option<String>,
    pub tech_notes: Option<String>,
    pub created_at: Ms,
}

impl Booking {
    pub fn span(&self) -> Span {
        let end = self.appointment_start + Ms::from(self.duration_minutes) * 60_000;
        Span::new(self.appointment_start, end)
    }
}

// ── Per-provider state ───────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ProviderState {
    pub id: Ulid,
    pub display_name: Option<String>,
    pub policy: BookingPolicy,
    pub rules: Vec<AvailabilityRule>,
    pub time_off: Vec<TimeOffPeriod>,
    pub services: Vec<Service>,
    /// All bookings (any status), sorted by `appointment_start`.
    pub bookings: Vec<Booking>,
}

impl ProviderState {
    pub fn new(id: Ulid, display_name: Option<String>, policy: BookingPolicy) -> Self {
        Self {
            id,
            display_name,
            policy,
            rules: Vec::new(),
            time_off: Vec::new(),
            services: Vec::new(),
            bookings: Vec::new(),
        }
    }

    /// Insert a booking maintaining sort order by appointment start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.appointment_start, |b| b.appointment_start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    pub fn service(&self, id: Ulid) -> Option<&Service> {
        self.services.iter().find(|s| s.id == id)
    }

    /// Active (pending/confirmed) bookings whose interval overlaps the query.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping_active(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        let right_bound = self
            .bookings
            .partition_point(|b| b.appointment_start < query.end);
        let query_start = query.start;
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.status.is_active() && b.span().end > query_start)
    }

    pub fn has_active_bookings(&self) -> bool {
        self.bookings.iter().any(|b| b.status.is_active())
    }
}

// ── WAL events ───────────────────────────────────────────────────

/// The event types — this is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ProviderCreated {
        id: Ulid,
        display_name: Option<String>,
        policy: BookingPolicy,
    },
    ProviderPolicyUpdated {
        id: Ulid,
        policy: BookingPolicy,
    },
    ProviderDeleted {
        id: Ulid,
    },
    RulesReplaced {
        provider_id: Ulid,
        rules: Vec<AvailabilityRule>,
    },
    TimeOffAdded {
        id: Ulid,
        provider_id: Ulid,
        start_date: NaiveDate,
        end_date: NaiveDate,
        reason: Option<String>,
    },
    TimeOffRemoved {
        id: Ulid,
        provider_id: Ulid,
    },
    ServiceAdded {
        id: Ulid,
        provider_id: Ulid,
        name: String,
        price: Decimal,
        duration_minutes: u32,
    },
    ServiceRemoved {
        id: Ulid,
        provider_id: Ulid,
    },
    /// Carries the full snapshot so compaction can replay terminal
    /// bookings in one record.
    BookingCreated {
        provider_id: Ulid,
        booking: Booking,
    },
    BookingConfirmed {
        id: Ulid,
        provider_id: Ulid,
        at: Ms,
    },
    BookingCompleted {
        id: Ulid,
        provider_id: Ulid,
        at: Ms,
    },
    BookingCancelled {
        id: Ulid,
        provider_id: Ulid,
        at: Ms,
        by: ActorRole,
        reason: Option<String>,
        settlement: Option<Settlement>,
    },
    BookingNoShow {
        id: Ulid,
        provider_id: Ulid,
        at: Ms,
        settlement: Option<Settlement>,
    },
    PaymentRecorded {
        id: Ulid,
        provider_id: Ulid,
        at: Ms,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderInfo {
    pub id: Ulid,
    pub display_name: Option<String>,
    pub policy: BookingPolicy,
}

/// A discrete offerable start time derived from a provider's weekly rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub start: Ms,
    pub bookable: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn booking_at(start: Ms, duration_minutes: u32, status: BookingStatus) -> Booking {
        Booking {
            id: Ulid::new(),
            provider_id: Ulid::new(),
            client_id: Ulid::new(),
            service_id: Ulid::new(),
            design_reference_id: None,
            appointment_start: start,
            duration_minutes,
            service_price: Decimal::from(100),
            service_fee_amount: Decimal::from(10),
            total_price: Decimal::from(110),
            payment_status: PaymentStatus::Pending,
            status,
            cancellation_reason: None,
            cancelled_by: None,
            cancelled_at: None,
            no_show_fee_charged: false,
            no_show_fee_amount: None,
            refund_amount: None,
            refunded_at: None,
            client_notes: None,
            tech_notes: None,
            created_at: 0,
        }
    }

    #[test]
    fn span_basics() {
        let s = Span::new(100, 200);
        assert_eq!(s.duration_ms(), 100);
        assert!(s.contains_instant(100));
        assert!(s.contains_instant(199));
        assert!(!s.contains_instant(200)); // half-open
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
    }

    #[test]
    fn booking_span_from_duration() {
        let b = booking_at(1_000_000, 30, BookingStatus::Pending);
        assert_eq!(b.span(), Span::new(1_000_000, 1_000_000 + 30 * 60_000));
    }

    #[test]
    fn bookings_stay_sorted() {
        let mut ps = ProviderState::new(Ulid::new(), None, BookingPolicy::default());
        ps.insert_booking(booking_at(300_000, 60, BookingStatus::Pending));
        ps.insert_booking(booking_at(100_000, 60, BookingStatus::Pending));
        ps.insert_booking(booking_at(200_000, 60, BookingStatus::Pending));
        let starts: Vec<Ms> = ps.bookings.iter().map(|b| b.appointment_start).collect();
        assert_eq!(starts, vec![100_000, 200_000, 300_000]);
    }

    #[test]
    fn overlapping_active_skips_terminal() {
        let mut ps = ProviderState::new(Ulid::new(), None, BookingPolicy::default());
        ps.insert_booking(booking_at(0, 60, BookingStatus::Cancelled));
        ps.insert_booking(booking_at(0, 60, BookingStatus::Completed));
        let query = Span::new(0, 3_600_000);
        assert_eq!(ps.overlapping_active(&query).count(), 0);

        ps.insert_booking(booking_at(0, 60, BookingStatus::Confirmed));
        assert_eq!(ps.overlapping_active(&query).count(), 1);
    }

    #[test]
    fn overlapping_active_adjacent_not_included() {
        let mut ps = ProviderState::new(Ulid::new(), None, BookingPolicy::default());
        // Ends exactly where the query begins — half-open, no overlap.
        ps.insert_booking(booking_at(0, 60, BookingStatus::Confirmed));
        let query = Span::new(3_600_000, 7_200_000);
        assert_eq!(ps.overlapping_active(&query).count(), 0);
    }

    #[test]
    fn overlapping_active_skips_past_and_future() {
        let mut ps = ProviderState::new(Ulid::new(), None, BookingPolicy::default());
        ps.insert_booking(booking_at(0, 60, BookingStatus::Confirmed));
        ps.insert_booking(booking_at(10 * 3_600_000, 60, BookingStatus::Confirmed));
        let query = Span::new(4 * 3_600_000, 5 * 3_600_000);
        assert_eq!(ps.overlapping_active(&query).count(), 0);
    }

    #[test]
    fn time_off_covers_inclusive() {
        let t = TimeOffPeriod {
            id: Ulid::new(),
            start_date: NaiveDate::from_ymd_opt(2030, 1, 10).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2030, 1, 12).unwrap(),
            reason: None,
        };
        assert!(t.covers(NaiveDate::from_ymd_opt(2030, 1, 10).unwrap()));
        assert!(t.covers(NaiveDate::from_ymd_opt(2030, 1, 12).unwrap()));
        assert!(!t.covers(NaiveDate::from_ymd_opt(2030, 1, 13).unwrap()));
    }

    #[test]
    fn status_activity() {
        assert!(BookingStatus::Pending.is_active());
        assert!(BookingStatus::Confirmed.is_active());
        assert!(!BookingStatus::Cancelled.is_active());
        assert!(BookingStatus::NoShow.is_terminal());
        assert!(!BookingStatus::Confirmed.is_terminal());
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::BookingCreated {
            provider_id: Ulid::new(),
            booking: booking_at(1_700_000_000_000, 45, BookingStatus::Pending),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
