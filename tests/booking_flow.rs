use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Days, NaiveTime, Utc};
use rust_decimal::Decimal;
use ulid::Ulid;

use slated::config::EngineConfig;
use slated::engine::Engine;
use slated::engine::CreateBookingRequest;
use slated::model::{ActorRole, AvailabilityRule, BookingAction, BookingPolicy, BookingStatus, PaymentStatus};
use slated::notify::{IntentKind, NotifyHub};

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("slated_test_integration");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn week_rules() -> Vec<AvailabilityRule> {
    (0u8..7)
        .map(|dow| AvailabilityRule {
            id: Ulid::new(),
            day_of_week: dow,
            start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
            active: true,
        })
        .collect()
}

/// End-to-end: a client books a slot, the provider confirms, payment lands,
/// the client cancels late — with every step observed through the notify
/// hub and the final state surviving a WAL replay.
#[tokio::test]
async fn booking_flow_end_to_end() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let path = test_wal_path("booking_flow.wal");
    let notify = Arc::new(NotifyHub::new());
    let engine = Engine::new(EngineConfig::new(&path), notify.clone()).unwrap();

    let provider = Ulid::new();
    let client = Ulid::new();
    // A 72h window guarantees that a booking made for tomorrow is always a
    // late cancellation, wherever in the day this test runs.
    let policy = BookingPolicy {
        cancellation_window_hours: 72,
        ..BookingPolicy::default()
    };
    engine
        .create_provider(provider, Some("Nailed It".into()), policy)
        .await
        .unwrap();
    let service = Ulid::new();
    engine
        .add_service(service, provider, "Gel set".into(), Decimal::from(100), 60)
        .await
        .unwrap();
    engine.replace_rules(provider, week_rules()).await.unwrap();

    let mut provider_inbox = notify.subscribe(provider);
    let mut client_inbox = notify.subscribe(client);

    // Book tomorrow 10:00.
    let day = Utc::now().date_naive() + Days::new(1);
    let ten = day.and_hms_opt(10, 0, 0).unwrap().and_utc().timestamp_millis();
    let booking = engine
        .create_booking(CreateBookingRequest {
            provider_id: provider,
            service_id: service,
            client_id: client,
            appointment_start: ten,
            client_notes: Some("first visit".into()),
            design_reference_id: None,
        })
        .await
        .unwrap();

    let requested = provider_inbox.recv().await.unwrap();
    assert_eq!(requested.kind, IntentKind::BookingRequested);
    assert_eq!(requested.related_id, booking.id);

    // The booked hour is no longer offered.
    let slots = engine
        .get_availability(provider, day, 1, None)
        .await
        .unwrap();
    assert!(!slots.iter().any(|s| s.start == ten));

    // Provider confirms; client hears about it.
    let outcome = engine
        .transition_booking(booking.id, provider, ActorRole::Provider, BookingAction::Confirm, None)
        .await
        .unwrap();
    assert_eq!(outcome.booking.status, BookingStatus::Confirmed);
    let confirmed = client_inbox.recv().await.unwrap();
    assert_eq!(confirmed.kind, IntentKind::BookingConfirmed);

    // Payment collaborator reports the capture.
    let paid = engine.record_payment(booking.id).await.unwrap();
    assert_eq!(paid.payment_status, PaymentStatus::Paid);
    let payment_note = provider_inbox.recv().await.unwrap();
    assert_eq!(payment_note.kind, IntentKind::PaymentRecorded);

    // Late cancellation (within the 72h window): half the service price is
    // kept, the rest refunded, and the provider is told.
    let outcome = engine
        .transition_booking(
            booking.id,
            client,
            ActorRole::Client,
            BookingAction::Cancel,
            Some("emergency".into()),
        )
        .await
        .unwrap();
    let settlement = outcome.settlement.expect("paid cancellation settles");
    assert_eq!(settlement.fee_amount, Decimal::new(5_000, 2));
    assert_eq!(settlement.refund_amount, Decimal::new(6_000, 2));
    assert!(!settlement.anomaly);

    let cancelled_note = provider_inbox.recv().await.unwrap();
    assert_eq!(cancelled_note.kind, IntentKind::BookingCancelled);

    // The slot opens back up.
    let slots = engine
        .get_availability(provider, day, 1, None)
        .await
        .unwrap();
    assert!(slots.iter().any(|s| s.start == ten));

    // A fresh engine replaying the same WAL sees the settled booking.
    let engine2 = Engine::new(EngineConfig::new(&path), Arc::new(NotifyHub::new())).unwrap();
    let replayed = engine2.get_booking(booking.id).await.unwrap();
    assert_eq!(replayed.status, BookingStatus::Cancelled);
    assert_eq!(replayed.payment_status, PaymentStatus::Refunded);
    assert_eq!(replayed.refund_amount, Some(Decimal::new(6_000, 2)));
    assert_eq!(replayed.cancelled_by, Some(ActorRole::Client));
}
