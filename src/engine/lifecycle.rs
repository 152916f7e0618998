use chrono::{DateTime, Utc};
use ulid::Ulid;

use crate::model::{ActorRole, Booking, BookingAction, BookingStatus, Ms, Settlement};
use crate::notify::{IntentKind, NotificationIntent};

use super::EngineError;

/// Result of a successful lifecycle transition: the updated booking, the
/// notification the delivery collaborator should send, and the monetary
/// decision the payment collaborator should execute (if any).
#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    pub booking: Booking,
    pub notification: NotificationIntent,
    pub settlement: Option<Settlement>,
}

/// The single transition table. Everything not listed here is an invalid
/// transition; terminal states have no outgoing edges at all.
pub fn next_status(from: BookingStatus, action: BookingAction) -> Result<BookingStatus, EngineError> {
    match (from, action) {
        (BookingStatus::Pending, BookingAction::Confirm) => Ok(BookingStatus::Confirmed),
        (BookingStatus::Pending, BookingAction::Cancel)
        | (BookingStatus::Confirmed, BookingAction::Cancel) => Ok(BookingStatus::Cancelled),
        (BookingStatus::Confirmed, BookingAction::Complete) => Ok(BookingStatus::Completed),
        (BookingStatus::Confirmed, BookingAction::NoShow) => Ok(BookingStatus::NoShow),
        (from, action) => Err(EngineError::InvalidTransition { from, action }),
    }
}

/// Role guard: confirm/complete/no-show belong to the provider; cancel is
/// open to either booking party. The actor must be the matching party on
/// this specific booking.
pub fn authorize(
    action: BookingAction,
    actor_id: Ulid,
    actor_role: ActorRole,
    booking: &Booking,
) -> Result<(), EngineError> {
    match action {
        BookingAction::Confirm | BookingAction::Complete | BookingAction::NoShow => {
            if actor_role == ActorRole::Provider && actor_id == booking.provider_id {
                Ok(())
            } else {
                Err(EngineError::Unauthorized("only the provider may do this"))
            }
        }
        BookingAction::Cancel => match actor_role {
            ActorRole::Provider if actor_id == booking.provider_id => Ok(()),
            ActorRole::Client if actor_id == booking.client_id => Ok(()),
            _ => Err(EngineError::Unauthorized("only a booking party may cancel")),
        },
    }
}

fn format_instant(ms: Ms) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ms.to_string())
}

/// Intent announcing a freshly created booking to the provider.
pub fn creation_intent(booking: &Booking) -> NotificationIntent {
    NotificationIntent {
        recipient_id: booking.provider_id,
        kind: IntentKind::BookingRequested,
        title: "New booking request".into(),
        message: format!(
            "A client requested an appointment on {}",
            format_instant(booking.appointment_start)
        ),
        related_id: booking.id,
    }
}

/// Intent for a completed transition. Cancellations notify the counterparty
/// of whoever cancelled; everything else notifies the client.
pub fn transition_intent(
    action: BookingAction,
    by: ActorRole,
    booking: &Booking,
) -> NotificationIntent {
    let when = format_instant(booking.appointment_start);
    let (recipient_id, kind, title, message) = match action {
        BookingAction::Confirm => (
            booking.client_id,
            IntentKind::BookingConfirmed,
            "Booking confirmed".to_string(),
            format!("Your appointment on {when} was confirmed"),
        ),
        BookingAction::Complete => (
            booking.client_id,
            IntentKind::BookingCompleted,
            "Appointment completed".to_string(),
            format!("Your appointment on {when} was marked completed"),
        ),
        BookingAction::NoShow => (
            booking.client_id,
            IntentKind::BookingNoShow,
            "Missed appointment".to_string(),
            format!("You were marked as a no-show for the appointment on {when}"),
        ),
        BookingAction::Cancel => {
            let recipient = match by {
                ActorRole::Client => booking.provider_id,
                ActorRole::Provider => booking.client_id,
            };
            (
                recipient,
                IntentKind::BookingCancelled,
                "Booking cancelled".to_string(),
                format!("The appointment on {when} was cancelled by the {by}"),
            )
        }
    };
    NotificationIntent {
        recipient_id,
        kind,
        title,
        message,
        related_id: booking.id,
    }
}

/// Intent telling the provider a payment came through.
pub fn payment_intent(booking: &Booking) -> NotificationIntent {
    NotificationIntent {
        recipient_id: booking.provider_id,
        kind: IntentKind::PaymentRecorded,
        title: "Payment received".into(),
        message: format!(
            "Payment received for the appointment on {}",
            format_instant(booking.appointment_start)
        ),
        related_id: booking.id,
    }
}
