//! Schedule requests carried in job properties.
//!
//! A scheduled job is an ordinary [`Job`] with exactly one trigger
//! property. A job with none of them is a request to stop the schedule
//! with the same id.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{JobError, Result};
use crate::job::Job;

/// Cron expression (`sec min hour day-of-month month day-of-week [year]`).
pub const PROPERTY_TIMED_SCHEDULE: &str = "event.timed.scheduler";
/// Period in seconds, integer or fractional.
pub const PROPERTY_TIMED_PERIOD: &str = "event.timed.period";
/// RFC 3339 instant for a one-shot firing.
pub const PROPERTY_TIMED_DATE: &str = "event.timed.date";

const TRIGGER_PROPERTIES: [&str; 3] = [PROPERTY_TIMED_SCHEDULE, PROPERTY_TIMED_PERIOD, PROPERTY_TIMED_DATE];

/// When a scheduled job fires.
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    Cron(String),
    Period(Duration),
    Date(DateTime<Utc>),
}

/// A validated schedule request.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleInfo {
    pub schedule_id: String,
    pub topic: String,
    /// `None` stops the schedule.
    pub trigger: Option<Trigger>,
}

impl ScheduleInfo {
    /// Identity of a schedule: its topic plus the caller-supplied id, if any.
    pub fn schedule_id_for(job: &Job) -> String {
        let id = if job.synthetic_id { "" } else { job.id.as_str() };
        format!("TimedEvent: {}:{}", job.topic, id)
    }

    pub fn from_job(job: &Job) -> Result<Self> {
        if job.topic.is_empty() {
            return Err(JobError::InvalidSchedule("missing topic".to_string()));
        }

        let present: Vec<&str> = TRIGGER_PROPERTIES
            .iter()
            .copied()
            .filter(|p| job.properties.contains_key(*p))
            .collect();
        if present.len() > 1 {
            return Err(JobError::InvalidSchedule(format!(
                "only one of {} may be set",
                present.join(", ")
            )));
        }

        let trigger = match present.first() {
            None => None,
            Some(&name) => Some(parse_trigger(name, &job.properties[name])?),
        };
        Ok(Self {
            schedule_id: Self::schedule_id_for(job),
            topic: job.topic.clone(),
            trigger,
        })
    }

    pub fn is_stop(&self) -> bool {
        self.trigger.is_none()
    }
}

fn parse_trigger(name: &str, value: &Value) -> Result<Trigger> {
    let invalid = |reason: &str| JobError::InvalidSchedule(format!("{}: {}", name, reason));
    match name {
        PROPERTY_TIMED_SCHEDULE => {
            let expr = value.as_str().ok_or_else(|| invalid("expected a string"))?;
            cron::Schedule::from_str(expr).map_err(|e| invalid(&e.to_string()))?;
            Ok(Trigger::Cron(expr.to_string()))
        }
        PROPERTY_TIMED_PERIOD => {
            let secs = value.as_f64().ok_or_else(|| invalid("expected a number"))?;
            if !secs.is_finite() || secs <= 0.0 {
                return Err(invalid("must be positive"));
            }
            let period = Duration::try_from_secs_f64(secs).map_err(|e| invalid(&e.to_string()))?;
            Ok(Trigger::Period(period))
        }
        _ => {
            let raw = value.as_str().ok_or_else(|| invalid("expected an RFC 3339 string"))?;
            let at = DateTime::parse_from_rfc3339(raw).map_err(|e| invalid(&e.to_string()))?;
            Ok(Trigger::Date(at.with_timezone(&Utc)))
        }
    }
}

/// Job properties without the schedule bookkeeping, as published on firing.
pub fn event_properties(properties: &Map<String, Value>) -> Map<String, Value> {
    properties
        .iter()
        .filter(|(k, _)| !TRIGGER_PROPERTIES.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}
