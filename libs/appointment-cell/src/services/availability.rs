// libs/appointment-cell/src/services/availability.rs
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::debug;
use uuid::Uuid;

use shared_config::SchedulingSettings;
use shared_database::{AppointmentStore, BusyQuery};

use crate::models::{AppointmentError, Slot};
use crate::services::conflict::{conflicts_with_any, TimeWindow};
use crate::services::event_type::EventTypeResolver;

/// Fixed-size windows stepped across a working period. Iterating is lazy
/// and can be restarted any number of times.
#[derive(Debug, Clone, Copy)]
pub struct SlotGrid {
    period: TimeWindow,
    step: Duration,
    length: Duration,
}

impl SlotGrid {
    pub fn new(period: TimeWindow, step_minutes: i64, duration_minutes: i32) -> Self {
        Self {
            period,
            step: Duration::minutes(step_minutes.max(1)),
            length: Duration::minutes(i64::from(duration_minutes)),
        }
    }

    /// Every candidate whose end still fits in the period, in time order.
    pub fn iter(&self) -> impl Iterator<Item = TimeWindow> + '_ {
        let SlotGrid { period, step, length } = *self;
        std::iter::successors(Some(period.start), move |cursor| Some(*cursor + step))
            .map(move |start| TimeWindow::new(start, start + length))
            .take_while(move |candidate| candidate.end <= period.end)
    }

    pub fn free<'a>(&'a self, busy: &'a [TimeWindow]) -> impl Iterator<Item = TimeWindow> + 'a {
        self.iter().filter(move |candidate| !conflicts_with_any(candidate, busy))
    }
}

/// Local wall-clock time on `date` as a UTC instant. A time that falls in a
/// DST gap is pushed forward by an hour.
pub fn local_instant(tz: Tz, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    let local = date.and_time(time);
    tz.from_local_datetime(&local)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(local + Duration::hours(1))).earliest())
        .map(|instant| instant.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&local))
}

pub struct AvailabilityEngine {
    appointments: Arc<dyn AppointmentStore>,
    resolver: Arc<EventTypeResolver>,
    settings: SchedulingSettings,
}

impl AvailabilityEngine {
    pub fn new(
        appointments: Arc<dyn AppointmentStore>,
        resolver: Arc<EventTypeResolver>,
        settings: SchedulingSettings,
    ) -> Self {
        Self {
            appointments,
            resolver,
            settings,
        }
    }

    /// Working period of `date` in the clinic's timezone.
    pub fn working_period(&self, date: NaiveDate) -> TimeWindow {
        let tz = self.settings.clinic_timezone;
        TimeWindow::new(
            local_instant(tz, date, self.settings.workday_start),
            local_instant(tz, date, self.settings.workday_end),
        )
    }

    /// Bookable slots for the doctor on `date`, in time order. Slots that
    /// start before `now` are not offered.
    pub async fn compute_slots(
        &self,
        clinic_id: Uuid,
        doctor_id: Uuid,
        date: NaiveDate,
        event_type_id: Option<Uuid>,
        duration_minutes: Option<i32>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Slot>, AppointmentError> {
        let resolved = self
            .resolver
            .resolve(clinic_id, event_type_id, duration_minutes)
            .await?;

        let period = self.working_period(date);
        if period.end <= period.start {
            return Ok(Vec::new());
        }

        let busy: Vec<TimeWindow> = self
            .appointments
            .list_occupying(&BusyQuery {
                clinic_id,
                doctor_id,
                starts_from: period.start - Duration::minutes(self.settings.max_appointment_minutes),
                starts_before: period.end,
                exclude_appointment_id: None,
            })
            .await?
            .iter()
            .map(TimeWindow::of)
            .collect();

        let grid = SlotGrid::new(period, self.settings.slot_step_minutes, resolved.minutes);
        let tz = self.settings.clinic_timezone;
        let slots: Vec<Slot> = grid
            .free(&busy)
            .filter(|candidate| candidate.start >= now)
            .map(|candidate| Slot {
                start: candidate.start,
                end: candidate.end,
                display: candidate.start.with_timezone(&tz).format("%H:%M").to_string(),
            })
            .collect();

        debug!(
            "{} free {}-minute slots for doctor {} on {} ({} busy)",
            slots.len(),
            resolved.minutes,
            doctor_id,
            date,
            busy.len()
        );
        Ok(slots)
    }
}
