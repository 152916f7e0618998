use rust_decimal::{Decimal, RoundingStrategy};

use crate::model::{BookingPolicy, Ms, Settlement};

/// What pushed a paid booking into fee computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeTrigger {
    NoShow,
    ClientCancel,
}

const MS_PER_HOUR: Ms = 3_600_000;

pub(crate) fn round2(v: Decimal) -> Decimal {
    v.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Compute the fee and refund for a paid booking.
///
/// No-show: the configured percentage of the service price, if the fee is
/// enabled. Client cancel: the same fee applies only when the remaining
/// notice is shorter than the cancellation window; with sufficient notice
/// the refund is the full total.
///
/// The fee is capped at the service price and the refund never goes
/// negative — a clamped refund is flagged as an anomaly for manual
/// reconciliation instead of failing the transition.
pub fn compute_fee_and_refund(
    service_price: Decimal,
    total_price: Decimal,
    appointment_start: Ms,
    now: Ms,
    policy: &BookingPolicy,
    trigger: FeeTrigger,
) -> Settlement {
    let fee_applies = match trigger {
        FeeTrigger::NoShow => policy.no_show_fee_enabled,
        FeeTrigger::ClientCancel => {
            let notice_ms = appointment_start - now;
            let late = notice_ms < policy.cancellation_window_hours * MS_PER_HOUR;
            late && policy.no_show_fee_enabled
        }
    };

    if !fee_applies {
        return Settlement {
            fee_charged: false,
            fee_amount: Decimal::ZERO,
            refund_amount: round2(total_price),
            anomaly: false,
        };
    }

    let mut fee = round2(service_price * policy.no_show_fee_percent / Decimal::ONE_HUNDRED);
    if fee > service_price {
        tracing::warn!(%fee, %service_price, "fee exceeded service price, capping");
        fee = service_price;
    }

    let raw_refund = total_price - fee;
    let (refund, anomaly) = if raw_refund < Decimal::ZERO {
        tracing::warn!(%raw_refund, "negative refund clamped to zero, flagging for review");
        (Decimal::ZERO, true)
    } else {
        (round2(raw_refund), false)
    };

    Settlement {
        fee_charged: fee > Decimal::ZERO,
        fee_amount: fee,
        refund_amount: refund,
        anomaly,
    }
}
