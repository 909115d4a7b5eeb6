//! Cron-driven calendar provider.
//!
//! Every fire time of the schedule becomes one item.  Source ids embed the
//! fire time, so a restarted monitor with a durable ledger never replays a
//! reminder it already delivered.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

use crate::error::{MonitorError, Result};
use crate::provider::{EventProvider, RawItem};

/// Upper bound on items produced by one poll, for monitors that were idle
/// through many fire times.
const MAX_FIRES_PER_POLL: usize = 32;

/// Normalize a cron expression: 5-field standard cron gets a leading
/// seconds field of `0`.
fn normalize_cron_expr(expr: &str) -> String {
    if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    }
}

fn parse_schedule(expr: &str) -> Result<cron::Schedule> {
    cron::Schedule::from_str(&normalize_cron_expr(expr)).map_err(|e| MonitorError::InvalidCron {
        expression: expr.to_string(),
        reason: e.to_string(),
    })
}

/// Emits an item at each fire time of a cron schedule.
#[derive(Debug, Clone)]
pub struct CalendarProvider {
    name: String,
    title: String,
    schedule: cron::Schedule,
}

impl CalendarProvider {
    /// `title` becomes the body of every emitted item.
    pub fn new(name: impl Into<String>, cron_expr: &str, title: impl Into<String>) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            title: title.into(),
            schedule: parse_schedule(cron_expr)?,
        })
    }

    /// Items for the fire times in `(since, until]`, oldest first.
    pub fn fires_between(&self, since: DateTime<Utc>, until: DateTime<Utc>) -> Vec<RawItem> {
        self.schedule
            .after(&since)
            .take_while(|fire| *fire <= until)
            .take(MAX_FIRES_PER_POLL)
            .map(|fire| self.item_for(fire))
            .collect()
    }

    fn item_for(&self, fire: DateTime<Utc>) -> RawItem {
        let stamp = fire.to_rfc3339_opts(SecondsFormat::Secs, true);
        let mut item = RawItem::new(format!("{}:{stamp}", self.name), self.title.clone());
        item.received_at = Some(fire);
        item.metadata.insert("calendar".into(), Value::String(self.name.clone()));
        item.metadata.insert("firesAt".into(), Value::String(stamp));
        item
    }
}

#[async_trait]
impl EventProvider for CalendarProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_since(&self, since: DateTime<Utc>) -> Result<Vec<RawItem>> {
        Ok(self.fires_between(since, Utc::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn five_field_expressions_gain_seconds() {
        assert_eq!(normalize_cron_expr("30 8 * * *"), "0 30 8 * * *");
        assert_eq!(normalize_cron_expr("0 30 8 * * *"), "0 30 8 * * *");
    }

    #[test]
    fn fires_in_half_open_window() {
        let cal = CalendarProvider::new("meds", "0 8 * * *", "Take morning pills").unwrap();
        let items = cal.fires_between(at("2026-03-01T08:00:00Z"), at("2026-03-03T08:00:00Z"));
        let ids: Vec<_> = items.iter().filter_map(|i| i.source_id.as_deref()).collect();
        // The fire at `since` itself was delivered by the previous poll.
        assert_eq!(ids, vec!["meds:2026-03-02T08:00:00Z", "meds:2026-03-03T08:00:00Z"]);
        assert_eq!(items[0].body.as_deref(), Some("Take morning pills"));
        assert_eq!(items[0].received_at, Some(at("2026-03-02T08:00:00Z")));
        assert_eq!(items[0].metadata["calendar"], "meds");
    }

    #[test]
    fn long_gaps_are_capped() {
        let cal = CalendarProvider::new("tick", "* * * * *", "tick").unwrap();
        let items = cal.fires_between(at("2026-03-01T00:00:00Z"), at("2026-03-02T00:00:00Z"));
        assert_eq!(items.len(), MAX_FIRES_PER_POLL);
    }

    #[test]
    fn invalid_expression_is_rejected() {
        let err = CalendarProvider::new("bad", "every tuesday", "x").unwrap_err();
        assert!(matches!(err, MonitorError::InvalidCron { .. }));
    }
}
