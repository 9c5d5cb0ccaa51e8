//! Expands stored appointment definitions into the concrete occurrences that
//! fall on a calendar date.
//!
//! Monthly recurrences match on the day of month only. A definition that
//! starts on the 31st therefore has no occurrence in 30-day months or in
//! February; nothing is rolled over to the last day of a shorter month.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate, NaiveTime};
use serde::Serialize;
use thiserror::Error;

use crate::appointment::{AppointmentDefinition, RecurringType};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("appointment {id} is marked recurring but has no recurring type")]
    MissingRecurringType { id: String },
}

/// A dated instance of a definition. Borrowed from the definitions slice it
/// was resolved against, so it cannot outlive (or go stale against) them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Occurrence<'a> {
    pub definition: &'a AppointmentDefinition,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub duration_hours: f64,
}

impl<'a> Occurrence<'a> {
    fn of(definition: &'a AppointmentDefinition, date: NaiveDate) -> Self {
        Self {
            definition,
            date,
            time: definition.time,
            duration_hours: definition.duration_hours,
        }
    }
}

pub fn occurs_on(definition: &AppointmentDefinition, date: NaiveDate) -> Result<bool, ResolveError> {
    let kind = if definition.is_recurring {
        Some(
            definition
                .recurring_type
                .ok_or_else(|| ResolveError::MissingRecurringType {
                    id: definition.id.clone(),
                })?,
        )
    } else {
        None
    };

    if definition.start_date == date {
        return Ok(true);
    }

    let Some(kind) = kind else {
        return Ok(false);
    };

    let start = definition.start_date;
    if date < start {
        return Ok(false);
    }
    if let Some(end) = definition.recurring_end_date
        && date > end
    {
        return Ok(false);
    }

    Ok(match kind {
        RecurringType::Daily => true,
        RecurringType::Weekly => date.weekday() == start.weekday(),
        RecurringType::Monthly => date.day() == start.day(),
        RecurringType::Yearly => date.day() == start.day() && date.month() == start.month(),
    })
}

/// Occurrences on `date`, ordered by time of day. Definitions sharing a
/// start time keep their input order.
#[tracing::instrument(level = "trace", skip(definitions), fields(count = definitions.len()))]
pub fn occurrences_on(
    definitions: &[AppointmentDefinition],
    date: NaiveDate,
) -> Result<Vec<Occurrence<'_>>, ResolveError> {
    let mut out = Vec::new();
    for definition in definitions {
        if occurs_on(definition, date)? {
            out.push(Occurrence::of(definition, date));
        }
    }
    out.sort_by_key(|occurrence| occurrence.time);
    Ok(out)
}

pub fn occurrences_in_range<'a, I>(
    definitions: &'a [AppointmentDefinition],
    dates: I,
) -> Result<BTreeMap<NaiveDate, Vec<Occurrence<'a>>>, ResolveError>
where
    I: IntoIterator<Item = NaiveDate>,
{
    let mut out = BTreeMap::new();
    for date in dates {
        out.insert(date, occurrences_on(definitions, date)?);
    }
    Ok(out)
}
