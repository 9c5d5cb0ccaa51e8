use std::collections::BTreeMap;
use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::{Datelike, NaiveDate};
use unicode_width::UnicodeWidthStr;

use crate::appointment::{AppointmentDefinition, Customer, customer_display_name};
use crate::config::Config;
use crate::grid::{
    Granularity, Locale, header_label, is_outside_month, iso_week, long_date, short_date,
    weekday_labels,
};
use crate::recurrence::Occurrence;

/// Occurrences per grid cell, as produced by the range resolver.
pub type DayOccurrences<'a> = BTreeMap<NaiveDate, Vec<Occurrence<'a>>>;

// Entries listed inside a month cell before collapsing into "+N".
const MONTH_CELL_LIMIT: usize = 2;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
    locale: Locale,
    today: NaiveDate,
}

impl Renderer {
    pub fn new(cfg: &Config, today: NaiveDate) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => io::stdout().is_terminal(),
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self {
            color,
            locale: cfg.locale()?,
            today,
        })
    }

    pub fn plain(locale: Locale, today: NaiveDate) -> Self {
        Self {
            color: false,
            locale,
            today,
        }
    }

    #[tracing::instrument(skip(self, out, by_day, customers))]
    pub fn write_calendar<W: Write>(
        &self,
        out: &mut W,
        reference: NaiveDate,
        view: Granularity,
        by_day: &DayOccurrences<'_>,
        customers: &[Customer],
    ) -> anyhow::Result<()> {
        let header = header_label(reference, view, self.locale);
        writeln!(out, "{}", self.paint(&header, "1"))?;
        if view != Granularity::Week {
            let week_label = match self.locale {
                Locale::De => "KW",
                Locale::En => "Week",
            };
            writeln!(out, "{week_label} {}", iso_week(reference))?;
        }
        writeln!(out)?;

        match view {
            Granularity::Day => {
                let empty = Vec::new();
                let occurrences = by_day.get(&reference).unwrap_or(&empty);
                self.write_day_entries(out, occurrences, customers)?;
            }
            Granularity::Week => {
                for (day, occurrences) in by_day {
                    let label = format!("{} {}", long_date(*day, self.locale), self.today_marker(*day));
                    writeln!(out, "{}", self.paint(label.trim_end(), "36"))?;
                    self.write_day_entries(out, occurrences, customers)?;
                }
            }
            Granularity::Month => {
                self.write_month_grid(out, reference, by_day)?;
                writeln!(out)?;
                for (day, occurrences) in by_day {
                    if occurrences.is_empty() || is_outside_month(*day, reference) {
                        continue;
                    }
                    writeln!(out, "{}", self.paint(&short_date(*day, self.locale), "36"))?;
                    self.write_day_entries(out, occurrences, customers)?;
                }
            }
        }

        Ok(())
    }

    fn write_day_entries<W: Write>(
        &self,
        out: &mut W,
        occurrences: &[Occurrence<'_>],
        customers: &[Customer],
    ) -> anyhow::Result<()> {
        if occurrences.is_empty() {
            let none = match self.locale {
                Locale::De => "keine Termine",
                Locale::En => "no appointments",
            };
            writeln!(out, "  {none}")?;
            return Ok(());
        }

        let rows = occurrences
            .iter()
            .map(|occurrence| {
                let def = occurrence.definition;
                vec![
                    format!("  {}", occurrence.time.format("%H:%M")),
                    format_hours(occurrence.duration_hours),
                    customer_display_name(customers, def.customer_id.as_deref()),
                    def.task.clone(),
                    def.status.label().to_string(),
                    self.recurrence_badge(def),
                    self.paint(&def.id, "33"),
                ]
            })
            .collect();

        write_rows(out, rows)
    }

    fn write_month_grid<W: Write>(
        &self,
        out: &mut W,
        reference: NaiveDate,
        by_day: &DayOccurrences<'_>,
    ) -> anyhow::Result<()> {
        let headers = weekday_labels(self.locale);
        let cells: Vec<String> = by_day
            .iter()
            .map(|(day, occurrences)| {
                let mut cell = format!("{:>2}", day.day());
                if *day == self.today {
                    cell.push('*');
                }
                if !occurrences.is_empty() {
                    let shown = occurrences
                        .iter()
                        .take(MONTH_CELL_LIMIT)
                        .map(|o| o.time.format("%H:%M").to_string())
                        .collect::<Vec<_>>()
                        .join(",");
                    cell.push(' ');
                    cell.push_str(&shown);
                    if occurrences.len() > MONTH_CELL_LIMIT {
                        cell.push_str(&format!(" +{}", occurrences.len() - MONTH_CELL_LIMIT));
                    }
                }
                if is_outside_month(*day, reference) {
                    self.paint(&cell, "2")
                } else {
                    cell
                }
            })
            .collect();

        let rows = cells.chunks(7).map(<[String]>::to_vec).collect();
        write_table(out, headers, rows)
    }

    #[tracing::instrument(skip(self, out, appointments, customers))]
    pub fn write_appointment_table<W: Write>(
        &self,
        out: &mut W,
        appointments: &[&AppointmentDefinition],
        customers: &[Customer],
    ) -> anyhow::Result<()> {
        let headers = ["ID", "Datum", "Zeit", "Dauer", "Kunde", "Aufgabe", "Kategorie", "Status", "Wiederholung"]
            .iter()
            .map(|h| h.to_string())
            .collect();

        let rows = appointments
            .iter()
            .map(|def| {
                vec![
                    self.paint(&def.id, "33"),
                    short_date(def.start_date, self.locale),
                    def.time.format("%H:%M").to_string(),
                    format_hours(def.duration_hours),
                    customer_display_name(customers, def.customer_id.as_deref()),
                    def.task.clone(),
                    def.category.label().to_string(),
                    def.status.label().to_string(),
                    self.recurrence_badge(def),
                ]
            })
            .collect();

        write_table(out, headers, rows)
    }

    pub fn write_appointment_info<W: Write>(
        &self,
        out: &mut W,
        def: &AppointmentDefinition,
        customers: &[Customer],
    ) -> anyhow::Result<()> {
        writeln!(out, "id          {}", def.id)?;
        writeln!(out, "task        {}", def.task)?;
        writeln!(
            out,
            "customer    {}",
            customer_display_name(customers, def.customer_id.as_deref())
        )?;
        writeln!(out, "date        {}", long_date(def.start_date, self.locale))?;
        writeln!(out, "time        {}", def.time.format("%H:%M"))?;
        writeln!(
            out,
            "duration    {} ({} min)",
            format_hours(def.duration_hours),
            def.duration_minutes()
        )?;
        if def.is_recurring {
            writeln!(out, "repeats     {}", self.recurrence_badge(def))?;
            if let Some(end) = def.recurring_end_date {
                writeln!(out, "until       {}", short_date(end, self.locale))?;
            }
        }
        writeln!(out, "status      {}", def.status.label())?;
        writeln!(out, "category    {}", def.category.label())?;
        if def.hours_worked > 0.0 {
            writeln!(out, "worked      {}", format_hours(def.hours_worked))?;
        }
        if let Some(notes) = &def.notes {
            writeln!(out, "notes       {notes}")?;
        }
        if !def.materials.is_empty() {
            writeln!(out, "materials")?;
            for (idx, material) in def.materials.iter().enumerate() {
                writeln!(out, "  {}. {material}", idx + 1)?;
            }
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, out, customers))]
    pub fn write_customer_table<W: Write>(&self, out: &mut W, customers: &[&Customer]) -> anyhow::Result<()> {
        let headers = ["ID", "Name", "Firma", "Adresse", "Telefon", "E-Mail"]
            .iter()
            .map(|h| h.to_string())
            .collect();

        let rows = customers
            .iter()
            .map(|c| {
                vec![
                    self.paint(&c.id, "33"),
                    c.name.clone(),
                    c.company.clone().unwrap_or_default(),
                    c.address_line(),
                    c.phone.clone(),
                    c.email.clone().unwrap_or_default(),
                ]
            })
            .collect();

        write_table(out, headers, rows)
    }

    pub fn write_customer_info<W: Write>(
        &self,
        out: &mut W,
        customer: &Customer,
        appointments: &[&AppointmentDefinition],
        customers: &[Customer],
    ) -> anyhow::Result<()> {
        writeln!(out, "id        {}", customer.id)?;
        writeln!(out, "name      {}", customer.display_name())?;
        writeln!(out, "address   {}", customer.address_line())?;
        writeln!(out, "phone     {}", customer.phone)?;
        if let Some(email) = &customer.email {
            writeln!(out, "email     {email}")?;
        }
        writeln!(out)?;
        if appointments.is_empty() {
            writeln!(out, "(no appointments)")?;
            return Ok(());
        }
        self.write_appointment_table(out, appointments, customers)
    }

    fn recurrence_badge(&self, def: &AppointmentDefinition) -> String {
        match (def.is_recurring, def.recurring_type) {
            (true, Some(kind)) => match self.locale {
                Locale::De => kind.label().to_string(),
                Locale::En => kind.as_key().to_string(),
            },
            _ => String::new(),
        }
    }

    fn today_marker(&self, day: NaiveDate) -> &'static str {
        if day == self.today {
            match self.locale {
                Locale::De => "(heute)",
                Locale::En => "(today)",
            }
        } else {
            ""
        }
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn format_hours(hours: f64) -> String {
    if hours.fract() == 0.0 {
        format!("{hours:.0}h")
    } else {
        format!("{hours:.1}h")
    }
}

fn write_rows<W: Write>(writer: &mut W, rows: Vec<Vec<String>>) -> anyhow::Result<()> {
    let column_count = rows.iter().map(Vec::len).max().unwrap_or(0);
    let widths = column_widths(&[], &rows, column_count);

    for row in rows {
        write_padded_row(writer, &row, &widths)?;
    }
    Ok(())
}

fn write_table<W: Write>(writer: &mut W, headers: Vec<String>, rows: Vec<Vec<String>>) -> anyhow::Result<()> {
    let column_count = headers.len();
    let widths = column_widths(&headers, &rows, column_count);

    write_padded_row(writer, &headers, &widths)?;
    for width in &widths {
        write!(writer, "{:-<width$} ", "", width = *width)?;
    }
    writeln!(writer)?;

    for row in rows {
        write_padded_row(writer, &row, &widths)?;
    }

    Ok(())
}

fn column_widths(headers: &[String], rows: &[Vec<String>], column_count: usize) -> Vec<usize> {
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate().take(column_count) {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    widths
}

fn write_padded_row<W: Write>(writer: &mut W, row: &[String], widths: &[usize]) -> anyhow::Result<()> {
    let mut line = String::new();
    for (cell, width) in row.iter().zip(widths) {
        let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
        let padding = width.saturating_sub(visible_width);
        line.push_str(cell);
        line.push_str(&" ".repeat(padding));
        line.push(' ');
    }
    writeln!(writer, "{}", line.trim_end())?;
    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}
