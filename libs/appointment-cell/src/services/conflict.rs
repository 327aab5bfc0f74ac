// libs/appointment-cell/src/services/conflict.rs
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use shared_database::BusyQuery;
use shared_models::appointment::Appointment;

/// Half-open `[start, end)` time window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn starting_at(start: DateTime<Utc>, minutes: i32) -> Self {
        Self::new(start, start + Duration::minutes(i64::from(minutes)))
    }

    pub fn of(appointment: &Appointment) -> Self {
        Self::new(appointment.start_time, appointment.end_time)
    }

    /// Touching endpoints do not overlap, so back-to-back bookings are fine.
    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        self.start < other.end && other.start < self.end
    }
}

pub fn conflicts_with_any<'a, I>(candidate: &TimeWindow, busy: I) -> bool
where
    I: IntoIterator<Item = &'a TimeWindow>,
{
    busy.into_iter().any(|window| candidate.overlaps(window))
}

/// Occupying appointments from `existing` that overlap `candidate`.
pub fn conflicting<'a>(candidate: &TimeWindow, existing: &'a [Appointment]) -> Vec<&'a Appointment> {
    existing
        .iter()
        .filter(|appointment| appointment.is_occupying())
        .filter(|appointment| candidate.overlaps(&TimeWindow::of(appointment)))
        .collect()
}

/// Busy-set fetch for a candidate. Appointments are selected by start time,
/// so the lower bound reaches back by the longest appointment we accept to
/// catch one that started earlier and is still running.
pub fn busy_query(
    clinic_id: Uuid,
    doctor_id: Uuid,
    candidate: &TimeWindow,
    max_appointment_minutes: i64,
    exclude_appointment_id: Option<Uuid>,
) -> BusyQuery {
    BusyQuery {
        clinic_id,
        doctor_id,
        starts_from: candidate.start - Duration::minutes(max_appointment_minutes),
        starts_before: candidate.end,
        exclude_appointment_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, hour, minute, 0).unwrap()
    }

    fn window(from: (u32, u32), to: (u32, u32)) -> TimeWindow {
        TimeWindow::new(at(from.0, from.1), at(to.0, to.1))
    }

    #[test]
    fn overlap_is_symmetric() {
        let pairs = [
            (window((9, 0), (9, 30)), window((9, 15), (9, 45))),
            (window((9, 0), (10, 0)), window((9, 15), (9, 30))),
            (window((9, 0), (9, 30)), window((9, 30), (10, 0))),
            (window((9, 0), (9, 30)), window((11, 0), (11, 30))),
        ];
        for (a, b) in pairs {
            assert_eq!(a.overlaps(&b), b.overlaps(&a), "{:?} vs {:?}", a, b);
        }
    }

    #[test]
    fn window_overlaps_itself() {
        let a = window((9, 0), (9, 30));
        assert!(a.overlaps(&a));
    }

    #[test]
    fn touching_windows_do_not_overlap() {
        let morning = window((9, 0), (9, 30));
        assert!(!morning.overlaps(&window((9, 30), (10, 0))));
        assert!(!morning.overlaps(&window((8, 30), (9, 0))));
        assert!(morning.overlaps(&window((9, 29), (10, 0))));
    }

    #[test]
    fn containment_counts_as_overlap() {
        assert!(window((9, 0), (12, 0)).overlaps(&window((10, 0), (10, 15))));
    }

    #[test]
    fn conflicts_with_any_scans_the_whole_list() {
        let busy = vec![window((8, 0), (8, 30)), window((10, 0), (10, 30))];
        assert!(conflicts_with_any(&window((10, 15), (10, 45)), &busy));
        assert!(!conflicts_with_any(&window((8, 30), (10, 0)), &busy));
        assert!(!conflicts_with_any(&window((8, 30), (10, 0)), &[]));
    }

    #[test]
    fn busy_query_reaches_back_by_max_duration() {
        let candidate = window((9, 0), (9, 30));
        let query = busy_query(Uuid::nil(), Uuid::nil(), &candidate, 480, None);
        assert_eq!(query.starts_from, at(1, 0));
        assert_eq!(query.starts_before, at(9, 30));
    }
}
