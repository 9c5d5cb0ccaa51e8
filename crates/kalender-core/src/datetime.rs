use anyhow::{
  Context,
  anyhow
};
use chrono::{
  Datelike,
  Duration,
  NaiveDate,
  Utc,
  Weekday
};
use chrono_tz::Tz;
use regex::Regex;

pub const TIMEZONE_ENV_VAR: &str =
  "KALENDER_TIMEZONE";
pub const DEFAULT_TIMEZONE: &str =
  "Europe/Berlin";

/// Picks the timezone used to decide
/// what "today" is. The environment
/// variable wins over the configured
/// value; anything unparsable falls
/// back to the default.
pub fn resolve_timezone(
  configured: Option<&str>
) -> Tz {
  if let Ok(raw) =
    std::env::var(TIMEZONE_ENV_VAR)
    && let Some(tz) = parse_timezone(
      &raw,
      TIMEZONE_ENV_VAR
    )
  {
    return tz;
  }

  if let Some(raw) = configured
    && let Some(tz) =
      parse_timezone(raw, "config")
  {
    return tz;
  }

  parse_timezone(
    DEFAULT_TIMEZONE,
    "DEFAULT_TIMEZONE"
  )
  .unwrap_or_else(|| {
    tracing::error!(
      "failed to parse fallback \
       timezone; using UTC"
    );
    chrono_tz::UTC
  })
}

fn parse_timezone(
  raw: &str,
  source: &str
) -> Option<Tz> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    tracing::warn!(
      source,
      "timezone source was empty"
    );
    return None;
  }

  match trimmed.parse::<Tz>() {
    | Ok(tz) => {
      tracing::debug!(
        source,
        timezone = %trimmed,
        "resolved calendar timezone"
      );
      Some(tz)
    }
    | Err(err) => {
      tracing::error!(
        source,
        timezone = %trimmed,
        error = %err,
        "failed to parse timezone id"
      );
      None
    }
  }
}

#[must_use]
pub fn today(tz: &Tz) -> NaiveDate {
  Utc::now()
    .with_timezone(tz)
    .date_naive()
}

/// `None` when the offset leaves the
/// range chrono can represent.
#[must_use]
pub fn checked_add_days(
  date: NaiveDate,
  days: i64
) -> Option<NaiveDate> {
  Duration::try_days(days).and_then(
    |delta| {
      date.checked_add_signed(delta)
    }
  )
}

/// Grid arithmetic on dates well inside
/// the supported range; user input goes
/// through [`checked_add_days`].
#[must_use]
pub fn add_days(
  date: NaiveDate,
  days: i64
) -> NaiveDate {
  checked_add_days(date, days)
    .unwrap_or(date)
}

#[must_use]
pub fn first_day_of_month(
  year: i32,
  month: u32
) -> NaiveDate {
  NaiveDate::from_ymd_opt(
    year, month, 1
  )
  .unwrap_or(NaiveDate::MIN)
}

#[must_use]
pub fn last_day_of_month(
  year: i32,
  month: u32
) -> NaiveDate {
  let (next_year, next_month) =
    if month >= 12 {
      (year.saturating_add(1), 1_u32)
    } else {
      (year, month + 1)
    };
  add_days(
    first_day_of_month(
      next_year, next_month
    ),
    -1
  )
}

#[must_use]
pub fn days_in_month(
  year: i32,
  month: u32
) -> u32 {
  last_day_of_month(year, month).day()
}

/// Moves by whole months, clamping the
/// day to the length of the target
/// month (Jan 31 + 1 month = Feb 28/29).
#[must_use]
pub fn shift_months(
  date: NaiveDate,
  months: i32
) -> NaiveDate {
  let mut year = date.year();
  let mut month =
    date.month() as i32 + months;

  while month < 1 {
    month += 12;
    year = year.saturating_sub(1);
  }
  while month > 12 {
    month -= 12;
    year = year.saturating_add(1);
  }

  let month = month as u32;
  let day = date
    .day()
    .min(days_in_month(year, month));
  NaiveDate::from_ymd_opt(
    year, month, day
  )
  .unwrap_or(date)
}

#[must_use]
pub fn start_of_week(
  day: NaiveDate
) -> NaiveDate {
  let diff = day
    .weekday()
    .num_days_from_monday()
    as i64;
  add_days(day, -diff)
}

#[tracing::instrument(skip(today), fields(input = input))]
pub fn parse_date_expr(
  input: &str,
  today: NaiveDate
) -> anyhow::Result<NaiveDate> {
  let token = input.trim();
  let lower =
    token.to_lowercase();

  match lower.as_str() {
    | "today" | "heute" => {
      return Ok(today);
    }
    | "tomorrow" | "morgen" => {
      return offset_date(today, 1, input);
    }
    | "yesterday" | "gestern" => {
      return offset_date(
        today, -1, input
      );
    }
    | _ => {}
  }

  if let Some(target) =
    parse_weekday_name(&lower)
  {
    return Ok(next_weekday_date(
      today, target
    ));
  }

  let rel_re = Regex::new(
    r"^(?P<sign>[+-])(?P<num>\d+)(?P<unit>[dw])$"
  )
  .map_err(|e| {
    anyhow!(
      "internal regex compile \
       failure: {e}"
    )
  })?;

  if let Some(caps) =
    rel_re.captures(&lower)
  {
    let num: i64 = caps
      .name("num")
      .map(|m| m.as_str())
      .ok_or_else(|| {
        anyhow!(
          "missing relative amount"
        )
      })?
      .parse()
      .with_context(|| {
        format!(
          "invalid relative number: \
           {input}"
        )
      })?;
    let days = match caps
      .name("unit")
      .map(|m| m.as_str())
    {
      | Some("w") => num.checked_mul(7),
      | _ => Some(num)
    }
    .ok_or_else(|| {
      anyhow!(
        "date out of range: {input}"
      )
    })?;
    let signed = match caps
      .name("sign")
      .map(|m| m.as_str())
    {
      | Some("-") => -days,
      | _ => days
    };
    return offset_date(
      today, signed, input
    );
  }

  if let Ok(date) =
    NaiveDate::parse_from_str(
      token, "%Y-%m-%d"
    )
  {
    return Ok(date);
  }

  if let Ok(date) =
    NaiveDate::parse_from_str(
      token, "%d.%m.%Y"
    )
  {
    return Ok(date);
  }

  Err(anyhow!(
    "unrecognized date expression: \
     {input}"
  ))
  .with_context(|| {
    "supported formats: \
     today/heute, tomorrow/morgen, \
     yesterday/gestern, weekday names \
     (e.g. monday or montag), \
     +Nd/-Nd, +Nw/-Nw, YYYY-MM-DD, \
     DD.MM.YYYY"
  })
}

fn offset_date(
  today: NaiveDate,
  days: i64,
  input: &str
) -> anyhow::Result<NaiveDate> {
  checked_add_days(today, days)
    .ok_or_else(|| {
      anyhow!(
        "date out of range: {input}"
      )
    })
}

fn parse_weekday_name(
  token: &str
) -> Option<Weekday> {
  match token.trim() {
    | "monday" | "mon" | "montag"
    | "mo" => Some(Weekday::Mon),
    | "tuesday" | "tue" | "dienstag"
    | "di" => Some(Weekday::Tue),
    | "wednesday" | "wed"
    | "mittwoch" | "mi" => {
      Some(Weekday::Wed)
    }
    | "thursday" | "thu"
    | "donnerstag" | "do" => {
      Some(Weekday::Thu)
    }
    | "friday" | "fri" | "freitag"
    | "fr" => Some(Weekday::Fri),
    | "saturday" | "sat" | "samstag"
    | "sa" => Some(Weekday::Sat),
    | "sunday" | "sun" | "sonntag"
    | "so" => Some(Weekday::Sun),
    | _ => None
  }
}

fn next_weekday_date(
  from: NaiveDate,
  target: Weekday
) -> NaiveDate {
  let from_idx = from
    .weekday()
    .num_days_from_monday()
    as i64;
  let target_idx = target
    .num_days_from_monday()
    as i64;
  let mut delta =
    (7 + target_idx - from_idx) % 7;
  if delta == 0 {
    delta = 7;
  }
  add_days(from, delta)
}

/// Accepts `HH:MM`, `H:MM` and 12-hour
/// clock times such as `3:15pm`.
pub fn parse_clock_time(
  token: &str
) -> Option<chrono::NaiveTime> {
  let clock_re = Regex::new(
    r"(?i)^(?P<hour>\d{1,2}):(?P<minute>\d{2})\s*(?P<ampm>[ap]m)?$",
  )
  .ok()?;
  let captures =
    clock_re.captures(token.trim())?;

  let raw_hour = captures
    .name("hour")?
    .as_str()
    .parse::<u32>()
    .ok()?;
  let minute = captures
    .name("minute")?
    .as_str()
    .parse::<u32>()
    .ok()?;
  if minute > 59 {
    return None;
  }

  let hour = if let Some(ampm_match) =
    captures.name("ampm")
  {
    if raw_hour == 0 || raw_hour > 12 {
      return None;
    }
    match ampm_match
      .as_str()
      .to_ascii_lowercase()
      .as_str()
    {
      | "am" => raw_hour % 12,
      | "pm" => raw_hour % 12 + 12,
      | _ => return None
    }
  } else {
    if raw_hour > 23 {
      return None;
    }
    raw_hour
  };

  chrono::NaiveTime::from_hms_opt(
    hour, minute, 0
  )
}

/// serde adapter storing a time of day
/// as `HH:MM`.
pub mod hhmm {
  use chrono::NaiveTime;
  use serde::{
    Deserialize,
    Deserializer,
    Serializer
  };

  pub fn serialize<S>(
    time: &NaiveTime,
    serializer: S
  ) -> Result<S::Ok, S::Error>
  where
    S: Serializer
  {
    serializer.serialize_str(
      &time.format("%H:%M").to_string()
    )
  }

  pub fn deserialize<'de, D>(
    deserializer: D
  ) -> Result<NaiveTime, D::Error>
  where
    D: Deserializer<'de>
  {
    let raw = String::deserialize(
      deserializer
    )?;
    NaiveTime::parse_from_str(
      raw.trim(),
      "%H:%M"
    )
    .map_err(serde::de::Error::custom)
  }
}
