use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// Per-user, per-day usage counters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsageStats {
    pub user_id: String,
    pub day: NaiveDate,
    pub queries_today: u32,
    pub queries_this_month: u32,
    pub streak_days: u32,
    pub avg_daily: f64,
}

impl UsageStats {
    /// Open the row for `day`, carrying the monthly counter and streak
    /// forward from the user's most recent earlier row.
    pub fn open_day(user_id: impl Into<String>, day: NaiveDate, previous: Option<&UsageStats>) -> Self {
        let (queries_this_month, streak_days) = match previous {
            Some(prev) if prev.day < day => {
                let month = if same_month(prev.day, day) {
                    prev.queries_this_month
                } else {
                    0
                };
                let streak = if day.pred_opt() == Some(prev.day) && prev.queries_today > 0 {
                    prev.streak_days + 1
                } else {
                    1
                };
                (month, streak)
            }
            _ => (0, 1),
        };

        Self {
            user_id: user_id.into(),
            day,
            queries_today: 0,
            queries_this_month,
            streak_days,
            avg_daily: average_for(queries_this_month, day),
        }
    }

    /// Counters after one more consumed query
    pub fn consumed(&self) -> Self {
        let queries_this_month = self.queries_this_month + 1;
        Self {
            queries_today: self.queries_today + 1,
            queries_this_month,
            avg_daily: average_for(queries_this_month, self.day),
            ..self.clone()
        }
    }
}

/// Average queries per elapsed day of the month
pub fn average_for(queries_this_month: u32, day: NaiveDate) -> f64 {
    queries_this_month as f64 / day.day() as f64
}

fn same_month(a: NaiveDate, b: NaiveDate) -> bool {
    a.year() == b.year() && a.month() == b.month()
}
