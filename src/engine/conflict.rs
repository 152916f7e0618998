use crate::limits::*;
use crate::model::{Ms, ProviderState, Span};

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.end <= span.start {
        return Err(EngineError::Validation("interval end must be after start"));
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > Ms::from(MAX_BOOKING_DURATION_MIN) * 60_000 {
        return Err(EngineError::LimitExceeded("interval too wide"));
    }
    Ok(())
}

/// Decide whether a candidate interval collides with any active
/// (pending/confirmed) booking. Must run under the provider write lock the
/// calling mutation already holds, so the read is consistent with the
/// subsequent insert.
pub(crate) fn check_no_conflict(ps: &ProviderState, span: &Span) -> Result<(), EngineError> {
    if let Some(existing) = ps.overlapping_active(span).next() {
        return Err(EngineError::SlotUnavailable(existing.id));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use rust_decimal::Decimal;
    use ulid::Ulid;

    const H: Ms = 3_600_000;

    fn booking(start: Ms, end: Ms, status: BookingStatus) -> Booking {
        Booking {
            id: Ulid::new(),
            provider_id: Ulid::new(),
            client_id: Ulid::new(),
            service_id: Ulid::new(),
            design_reference_id: None,
            appointment_start: start,
            duration_minutes: ((end - start) / 60_000) as u32,
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

    fn provider_with(bookings: Vec<Booking>) -> ProviderState {
        let mut ps = ProviderState::new(Ulid::new(), None, BookingPolicy::default());
        for b in bookings {
            ps.insert_booking(b);
        }
        ps
    }

    #[test]
    fn overlap_is_a_conflict() {
        let existing = booking(10 * H, 11 * H, BookingStatus::Confirmed);
        let existing_id = existing.id;
        let ps = provider_with(vec![existing]);

        let result = check_no_conflict(&ps, &Span::new(10 * H + 30 * 60_000, 12 * H));
        assert!(matches!(result, Err(EngineError::SlotUnavailable(id)) if id == existing_id));
    }

    #[test]
    fn touching_endpoints_are_not_a_conflict() {
        let ps = provider_with(vec![booking(10 * H, 11 * H, BookingStatus::Confirmed)]);
        assert!(check_no_conflict(&ps, &Span::new(11 * H, 12 * H)).is_ok());
        assert!(check_no_conflict(&ps, &Span::new(9 * H, 10 * H)).is_ok());
    }

    #[test]
    fn terminal_bookings_do_not_conflict() {
        let ps = provider_with(vec![
            booking(10 * H, 11 * H, BookingStatus::Cancelled),
            booking(10 * H, 11 * H, BookingStatus::NoShow),
            booking(10 * H, 11 * H, BookingStatus::Completed),
        ]);
        assert!(check_no_conflict(&ps, &Span::new(10 * H, 11 * H)).is_ok());
    }

    #[test]
    fn pending_bookings_do_conflict() {
        let ps = provider_with(vec![booking(10 * H, 11 * H, BookingStatus::Pending)]);
        assert!(check_no_conflict(&ps, &Span::new(10 * H, 11 * H)).is_err());
    }

    #[test]
    fn malformed_span_rejected() {
        assert!(matches!(
            validate_span(&Span { start: 100, end: 100 }),
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            validate_span(&Span { start: 200, end: 100 }),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn out_of_range_span_rejected() {
        let result = validate_span(&Span::new(
            crate::limits::MAX_VALID_TIMESTAMP_MS,
            crate::limits::MAX_VALID_TIMESTAMP_MS + H,
        ));
        assert!(matches!(result, Err(EngineError::LimitExceeded(_))));
    }
}
