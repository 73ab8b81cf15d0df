//! Grouping of sessions by creation day.

use chrono::{DateTime, Days, NaiveDate, TimeZone};
use kube_chat_core::{Session, SessionId};
use serde::{Deserialize, Serialize};

/// Session list entry without the message bodies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: SessionId,
    pub name: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub message_count: usize,
    pub model: String,
    pub cluster: String,
}

impl From<&Session> for SessionSummary {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id.clone(),
            name: session.name.clone(),
            created_at: session.created_at,
            updated_at: session.updated_at,
            message_count: session.messages.len(),
            model: session.model.clone(),
            cluster: session.cluster.clone(),
        }
    }
}

/// Sessions partitioned by creation time, newest first within each group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecencyGroups {
    pub today: Vec<SessionSummary>,
    pub yesterday: Vec<SessionSummary>,
    #[serde(rename = "last7Days")]
    pub last_seven_days: Vec<SessionSummary>,
    pub older: Vec<SessionSummary>,
}

impl RecencyGroups {
    #[must_use]
    pub fn len(&self) -> usize {
        self.today.len() + self.yesterday.len() + self.last_seven_days.len() + self.older.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Epoch millis of local midnight starting `date`, in `tz`.
fn midnight_millis<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> i64 {
    let naive = date.and_hms_opt(0, 0, 0).unwrap_or_default();
    // Midnight can be skipped by a DST jump; fall back to treating it as UTC.
    tz.from_local_datetime(&naive)
        .earliest()
        .map_or_else(|| naive.and_utc().timestamp_millis(), |dt| dt.timestamp_millis())
}

/// Partition `sessions` by `created_at` relative to the midnights before `now`.
#[must_use]
pub fn group_by_recency_at<Tz: TimeZone>(sessions: &[Session], now: &DateTime<Tz>) -> RecencyGroups {
    let tz = now.timezone();
    let today = now.date_naive();
    let day_start = |days_back: u64| {
        let date = today.checked_sub_days(Days::new(days_back)).unwrap_or(today);
        midnight_millis(&tz, date)
    };
    let today_start = day_start(0);
    let yesterday_start = day_start(1);
    let week_start = day_start(7);

    let mut groups = RecencyGroups::default();
    for session in sessions {
        let summary = SessionSummary::from(session);
        let bucket = if session.created_at >= today_start {
            &mut groups.today
        } else if session.created_at >= yesterday_start {
            &mut groups.yesterday
        } else if session.created_at >= week_start {
            &mut groups.last_seven_days
        } else {
            &mut groups.older
        };
        bucket.push(summary);
    }
    for bucket in [
        &mut groups.today,
        &mut groups.yesterday,
        &mut groups.last_seven_days,
        &mut groups.older,
    ] {
        bucket.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    }
    groups
}

#[cfg(test)]
mod tests {
    use chrono::{FixedOffset, Utc};

    use super::*;

    const HOUR: i64 = 3_600_000;
    const DAY: i64 = 24 * HOUR;

    fn session(id: &str, created_at: i64) -> Session {
        Session {
            id: id.into(),
            name: id.into(),
            messages: vec![],
            created_at,
            updated_at: created_at,
            model: String::new(),
            cluster: String::new(),
        }
    }

    fn ids(group: &[SessionSummary]) -> Vec<&str> {
        group.iter().map(|s| s.id.as_str()).collect()
    }

    #[test]
    fn partitions_on_midnight_boundaries() {
        // 2024-03-10 10:00 UTC
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 10, 0, 0).unwrap();
        let midnight = Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap().timestamp_millis();

        let sessions = vec![
            session("early-today", midnight),
            session("late-yesterday", midnight - 1),
            session("today", midnight + 9 * HOUR),
            session("yesterday-start", midnight - DAY),
            session("three-days", midnight - 3 * DAY),
            session("week-edge", midnight - 7 * DAY),
            session("ancient", midnight - 7 * DAY - 1),
        ];
        let groups = group_by_recency_at(&sessions, &now);

        assert_eq!(ids(&groups.today), vec!["today", "early-today"]);
        assert_eq!(ids(&groups.yesterday), vec!["late-yesterday", "yesterday-start"]);
        assert_eq!(ids(&groups.last_seven_days), vec!["three-days", "week-edge"]);
        assert_eq!(ids(&groups.older), vec!["ancient"]);
        assert_eq!(groups.len(), sessions.len());
    }

    #[test]
    fn midnight_follows_the_local_offset() {
        let shanghai = FixedOffset::east_opt(8 * 3600).unwrap();
        // 2024-03-10 01:00 in UTC+8 is still 2024-03-09 in UTC.
        let now = shanghai.with_ymd_and_hms(2024, 3, 10, 1, 0, 0).unwrap();
        let created = shanghai
            .with_ymd_and_hms(2024, 3, 10, 0, 30, 0)
            .unwrap()
            .timestamp_millis();

        let groups = group_by_recency_at(&[session("s", created)], &now);
        assert_eq!(ids(&groups.today), vec!["s"]);
        assert!(groups.yesterday.is_empty());
    }
}
