use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{
  Datelike,
  NaiveDate
};
use serde::{
  Deserialize,
  Serialize
};

use crate::datetime::{
  add_days,
  first_day_of_month,
  last_day_of_month,
  shift_months,
  start_of_week
};

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
  Day,
  Week,
  Month
}

impl Granularity {
  pub fn all() -> [Self; 3] {
    [Self::Day, Self::Week, Self::Month]
  }

  pub fn as_key(self) -> &'static str {
    match self {
      | Self::Day => "day",
      | Self::Week => "week",
      | Self::Month => "month"
    }
  }
}

impl fmt::Display for Granularity {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.write_str(self.as_key())
  }
}

impl FromStr for Granularity {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    let key =
      s.trim().to_ascii_lowercase();
    Self::all()
      .into_iter()
      .find(|g| g.as_key() == key)
      .ok_or_else(|| {
        anyhow!(
          "unknown calendar view: {s} \
           (expected day, week or \
           month)"
        )
      })
  }
}

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Default,
  Serialize,
  Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
  #[default]
  De,
  En
}

impl FromStr for Locale {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match s
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "de" | "de-de" | "de_de" => {
        Ok(Self::De)
      }
      | "en" | "en-us" | "en-gb"
      | "en_us" | "en_gb" => Ok(Self::En),
      | other => {
        Err(anyhow!(
          "unsupported locale: {other}"
        ))
      }
    }
  }
}

const MONTHS_DE: [&str; 12] = [
  "Januar",
  "Februar",
  "März",
  "April",
  "Mai",
  "Juni",
  "Juli",
  "August",
  "September",
  "Oktober",
  "November",
  "Dezember"
];

const MONTHS_EN: [&str; 12] = [
  "January",
  "February",
  "March",
  "April",
  "May",
  "June",
  "July",
  "August",
  "September",
  "October",
  "November",
  "December"
];

// Monday first.
const WEEKDAYS_DE: [&str; 7] = [
  "Montag",
  "Dienstag",
  "Mittwoch",
  "Donnerstag",
  "Freitag",
  "Samstag",
  "Sonntag"
];

const WEEKDAYS_EN: [&str; 7] = [
  "Monday",
  "Tuesday",
  "Wednesday",
  "Thursday",
  "Friday",
  "Saturday",
  "Sunday"
];

pub fn month_name(
  month: u32,
  locale: Locale
) -> &'static str {
  let idx = (month.clamp(1, 12) - 1)
    as usize;
  match locale {
    | Locale::De => MONTHS_DE[idx],
    | Locale::En => MONTHS_EN[idx]
  }
}

pub fn weekday_name(
  date: NaiveDate,
  locale: Locale
) -> &'static str {
  let idx = date
    .weekday()
    .num_days_from_monday()
    as usize;
  match locale {
    | Locale::De => WEEKDAYS_DE[idx],
    | Locale::En => WEEKDAYS_EN[idx]
  }
}

/// Two-letter column headers, Monday
/// first.
pub fn weekday_labels(
  locale: Locale
) -> Vec<String> {
  let names = match locale {
    | Locale::De => WEEKDAYS_DE,
    | Locale::En => WEEKDAYS_EN
  };
  names
    .iter()
    .map(|name| {
      name.chars().take(2).collect()
    })
    .collect()
}

/// The cells to draw for `reference`
/// at the given granularity. Weeks run
/// Monday to Sunday; a month grid is
/// padded with days of the adjacent
/// months so it always holds whole
/// weeks.
pub fn build_grid(
  reference: NaiveDate,
  granularity: Granularity
) -> Vec<NaiveDate> {
  let (start, end) = match granularity
  {
    | Granularity::Day => {
      (reference, reference)
    }
    | Granularity::Week => {
      let start =
        start_of_week(reference);
      (start, add_days(start, 6))
    }
    | Granularity::Month => {
      let first = first_day_of_month(
        reference.year(),
        reference.month()
      );
      let last = last_day_of_month(
        reference.year(),
        reference.month()
      );
      (
        start_of_week(first),
        add_days(
          start_of_week(last),
          6
        )
      )
    }
  };

  start
    .iter_days()
    .take_while(|day| *day <= end)
    .collect()
}

pub fn is_outside_month(
  cell: NaiveDate,
  reference: NaiveDate
) -> bool {
  cell.year() != reference.year()
    || cell.month() != reference.month()
}

/// ISO-8601 week number. The date is
/// moved to the Thursday of its week;
/// the week number counts whole weeks
/// from the first Thursday of that
/// Thursday's year.
pub fn iso_week(date: NaiveDate) -> u32 {
  let offset = date
    .weekday()
    .num_days_from_monday()
    as i64;
  let thursday =
    add_days(date, 3 - offset);

  let jan_first = first_day_of_month(
    thursday.year(),
    1
  );
  let to_thursday = (3 + 7
    - jan_first
      .weekday()
      .num_days_from_monday()
      as i64)
    % 7;
  let first_thursday =
    add_days(jan_first, to_thursday);

  let weeks = (thursday
    - first_thursday)
    .num_days()
    / 7;
  weeks as u32 + 1
}

/// Previous/next navigation: one day,
/// one week or one calendar month per
/// step.
pub fn shift_focus(
  focus: NaiveDate,
  granularity: Granularity,
  step: i64
) -> NaiveDate {
  match granularity {
    | Granularity::Day => {
      add_days(focus, step)
    }
    | Granularity::Week => {
      add_days(focus, step * 7)
    }
    | Granularity::Month => {
      shift_months(
        focus,
        i32::try_from(step)
          .unwrap_or(0)
      )
    }
  }
}

pub fn long_date(
  date: NaiveDate,
  locale: Locale
) -> String {
  let weekday =
    weekday_name(date, locale);
  let month =
    month_name(date.month(), locale);
  match locale {
    | Locale::De => {
      format!(
        "{weekday}, {}. {month} {}",
        date.day(),
        date.year()
      )
    }
    | Locale::En => {
      format!(
        "{weekday}, {month} {}, {}",
        date.day(),
        date.year()
      )
    }
  }
}

pub fn short_date(
  date: NaiveDate,
  locale: Locale
) -> String {
  match locale {
    | Locale::De => {
      date.format("%d.%m.%Y").to_string()
    }
    | Locale::En => {
      date.format("%Y-%m-%d").to_string()
    }
  }
}

pub fn header_label(
  reference: NaiveDate,
  granularity: Granularity,
  locale: Locale
) -> String {
  match granularity {
    | Granularity::Day => {
      long_date(reference, locale)
    }
    | Granularity::Week => {
      let start =
        start_of_week(reference);
      let end = add_days(start, 6);
      let week = iso_week(reference);
      let prefix = match locale {
        | Locale::De => "KW",
        | Locale::En => "Week"
      };
      format!(
        "{prefix} {week}: {} – {}",
        short_date(start, locale),
        short_date(end, locale)
      )
    }
    | Granularity::Month => {
      format!(
        "{} {}",
        month_name(
          reference.month(),
          locale
        ),
        reference.year()
      )
    }
  }
}

#[cfg(test)]
mod tests {
  use chrono::{
    Datelike,
    NaiveDate,
    Weekday
  };

  use super::*;

  fn date(
    y: i32,
    m: u32,
    d: u32
  ) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d)
      .expect("valid date")
  }

  #[test]
  fn day_grid_is_single_cell() {
    assert_eq!(
      build_grid(
        date(2024, 6, 20),
        Granularity::Day
      ),
      vec![date(2024, 6, 20)]
    );
  }

  #[test]
  fn week_grid_runs_monday_to_sunday() {
    let grid = build_grid(
      date(2024, 6, 23),
      Granularity::Week
    );
    assert_eq!(grid.len(), 7);
    assert_eq!(grid[0], date(2024, 6, 17));
    assert_eq!(grid[6], date(2024, 6, 23));
  }

  #[test]
  fn month_grid_holds_whole_weeks() {
    let mut reference = date(2019, 1, 1);
    while reference <= date(2026, 12, 1)
    {
      let grid = build_grid(
        reference,
        Granularity::Month
      );
      assert_eq!(grid.len() % 7, 0);
      assert_eq!(
        grid[0].weekday(),
        Weekday::Mon
      );
      assert_eq!(
        grid[grid.len() - 1].weekday(),
        Weekday::Sun
      );
      assert!(grid.contains(&reference));
      assert!(grid.windows(2).all(|w| {
        w[1] == add_days(w[0], 1)
      }));
      reference =
        shift_months(reference, 1);
    }
  }

  #[test]
  fn month_grid_pads_from_neighbours() {
    // June 2024 starts on a Saturday
    // and ends on a Sunday.
    let grid = build_grid(
      date(2024, 6, 12),
      Granularity::Month
    );
    assert_eq!(grid.len(), 35);
    assert_eq!(grid[0], date(2024, 5, 27));
    assert_eq!(
      grid[34],
      date(2024, 6, 30)
    );
    let outside = grid
      .iter()
      .filter(|d| {
        is_outside_month(
          **d,
          date(2024, 6, 12)
        )
      })
      .count();
    assert_eq!(outside, 5);

    // February 2021 fits exactly in
    // four weeks.
    assert_eq!(
      build_grid(
        date(2021, 2, 1),
        Granularity::Month
      )
      .len(),
      28
    );
  }

  #[test]
  fn iso_week_known_values() {
    assert_eq!(
      iso_week(date(2024, 1, 1)),
      1
    );
    assert_eq!(
      iso_week(date(2021, 1, 1)),
      53
    );
    assert_eq!(
      iso_week(date(2022, 1, 1)),
      52
    );
    assert_eq!(
      iso_week(date(2024, 12, 30)),
      1
    );
    assert_eq!(
      iso_week(date(2026, 12, 31)),
      53
    );
  }

  #[test]
  fn iso_week_agrees_with_chrono() {
    let mut day = date(1999, 12, 1);
    while day <= date(2031, 1, 31) {
      assert_eq!(
        iso_week(day),
        day.iso_week().week(),
        "{day}"
      );
      day = add_days(day, 1);
    }
  }

  #[test]
  fn header_labels_per_view() {
    let reference = date(2024, 6, 20);
    assert_eq!(
      header_label(
        reference,
        Granularity::Day,
        Locale::De
      ),
      "Donnerstag, 20. Juni 2024"
    );
    assert_eq!(
      header_label(
        reference,
        Granularity::Week,
        Locale::De
      ),
      "KW 25: 17.06.2024 – 23.06.2024"
    );
    assert_eq!(
      header_label(
        reference,
        Granularity::Month,
        Locale::En
      ),
      "June 2024"
    );
    assert_eq!(
      weekday_labels(Locale::De)[0],
      "Mo"
    );
  }

  #[test]
  fn navigation_steps() {
    let focus = date(2024, 1, 31);
    assert_eq!(
      shift_focus(
        focus,
        Granularity::Month,
        1
      ),
      date(2024, 2, 29)
    );
    assert_eq!(
      shift_focus(
        focus,
        Granularity::Week,
        -1
      ),
      date(2024, 1, 24)
    );
    assert_eq!(
      shift_focus(
        focus,
        Granularity::Day,
        1
      ),
      date(2024, 2, 1)
    );
  }
}
