use chrono::{Days, NaiveDateTime, NaiveTime};

/// Midnight at the start of the day after `now`.
pub fn next_midnight(now: NaiveDateTime) -> NaiveDateTime {
    let tomorrow = now.date().checked_add_days(Days::new(1)).unwrap_or(now.date());
    tomorrow.and_time(NaiveTime::MIN)
}

/// Daily trigger for the catalog export, in local wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportSchedule {
    next: NaiveDateTime,
}

impl ExportSchedule {
    /// First run at the coming midnight.
    pub fn starting(now: NaiveDateTime) -> Self {
        Self {
            next: next_midnight(now),
        }
    }

    /// A schedule due at an explicit instant.
    pub fn at(next: NaiveDateTime) -> Self {
        Self { next }
    }

    pub fn next(&self) -> NaiveDateTime {
        self.next
    }

    pub fn is_due(&self, now: NaiveDateTime) -> bool {
        now >= self.next
    }

    /// Move the trigger to the midnight following `now`.
    pub fn advance(&mut self, now: NaiveDateTime) {
        self.next = next_midnight(now);
    }
}
