use std::net::SocketAddr;

use crate::command::Command;
use crate::model::DayStatus;

// ── Slot computation ────────────────────────────────────────────

/// Counter: day schedules computed. Labels: status.
pub const SLOT_COMPUTATIONS_TOTAL: &str = "slotwise_slot_computations_total";

/// Counter: appointment records skipped because their date/time could not be parsed.
pub const MALFORMED_RECORDS_TOTAL: &str = "slotwise_malformed_records_total";

/// Counter: slots blocked only by the legacy slot-count rule, not by overlap.
pub const LEGACY_RULE_DIVERGENCE_TOTAL: &str = "slotwise_legacy_rule_divergence_total";

/// Counter: external calendar checks. Labels: outcome.
pub const CALENDAR_CHECKS_TOTAL: &str = "slotwise_calendar_checks_total";

// ── Waitlist ────────────────────────────────────────────────────

/// Gauge: waitlist entries still waiting or holding an open offer.
pub const WAITLIST_ENTRIES: &str = "slotwise_waitlist_entries";

/// Counter: offers issued (one per entry per batch).
pub const OFFERS_ISSUED_TOTAL: &str = "slotwise_offers_issued_total";

/// Counter: offer notifications that failed to send.
pub const OFFER_NOTIFICATIONS_FAILED_TOTAL: &str = "slotwise_offer_notifications_failed_total";

/// Counter: offers redeemed into a new appointment.
pub const OFFERS_CONFIRMED_TOTAL: &str = "slotwise_offers_confirmed_total";

/// Counter: offers expired, by TTL or by a sibling winning.
pub const OFFERS_EXPIRED_TOTAL: &str = "slotwise_offers_expired_total";

/// Counter: rejected redemptions. Labels: reason.
pub const OFFER_REJECTIONS_TOTAL: &str = "slotwise_offer_rejections_total";

// ── Command loop ────────────────────────────────────────────────

/// Counter: commands handled. Labels: command, status.
pub const COMMANDS_TOTAL: &str = "slotwise_commands_total";

/// Histogram: command latency in seconds. Labels: command.
pub const COMMAND_DURATION_SECONDS: &str = "slotwise_command_duration_seconds";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::warn!("failed to install Prometheus metrics exporter: {e}"),
    }
}

pub fn day_status_label(status: DayStatus) -> &'static str {
    match status {
        DayStatus::NoAvailability => "no_availability",
        DayStatus::OutsideBookingWindow => "outside_booking_window",
        DayStatus::FullyBooked => "fully_booked",
        DayStatus::Open => "open",
    }
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::Slots { .. } => "slots",
        Command::BookableDates { .. } => "bookable_dates",
        Command::Join { .. } => "join",
        Command::Leave { .. } => "leave",
        Command::Cancelled { .. } => "cancelled",
        Command::Confirm { .. } => "confirm",
        Command::Entry { .. } => "entry",
        Command::CalendarSlot { .. } => "calendar_slot",
        Command::CalendarDay { .. } => "calendar_day",
        Command::CalendarConflicts { .. } => "calendar_conflicts",
    }
}
