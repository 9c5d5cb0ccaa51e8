use std::fmt;

use chrono::{NaiveDate, NaiveTime};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::datetime::hhmm;

pub const UNKNOWN_CUSTOMER: &str = "Unbekannter Kunde";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RecurringType {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl RecurringType {
    pub fn as_key(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Daily => "täglich",
            Self::Weekly => "wöchentlich",
            Self::Monthly => "monatlich",
            Self::Yearly => "jährlich",
        }
    }
}

impl fmt::Display for RecurringType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_key())
    }
}

/// Progress of the job behind an appointment.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum JobStatus {
    #[default]
    #[serde(rename = "geplant")]
    #[value(name = "geplant")]
    Planned,
    #[serde(rename = "in_arbeit")]
    #[value(name = "in_arbeit")]
    InProgress,
    #[serde(rename = "abgeschlossen")]
    #[value(name = "abgeschlossen")]
    Done,
    #[serde(rename = "verschoben")]
    #[value(name = "verschoben")]
    Postponed,
}

impl JobStatus {
    pub fn label(self) -> &'static str {
        match self {
            Self::Planned => "Geplant",
            Self::InProgress => "In Arbeit",
            Self::Done => "Abgeschlossen",
            Self::Postponed => "Verschoben",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum JobCategory {
    #[default]
    Allgemein,
    Wartung,
    Reparatur,
    Renovierung,
    Installation,
    Sanitaer,
    Heizung,
    Elektrik,
}

impl JobCategory {
    pub fn label(self) -> &'static str {
        match self {
            Self::Allgemein => "Allgemein",
            Self::Wartung => "Wartung",
            Self::Reparatur => "Reparatur",
            Self::Renovierung => "Renovierung",
            Self::Installation => "Installation",
            Self::Sanitaer => "Sanitär",
            Self::Heizung => "Heizung",
            Self::Elektrik => "Elektrik",
        }
    }
}

/// A material line on a job. Stored either as a bare name or as
/// `{ name, quantity }`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(from = "MaterialRepr")]
pub struct Material {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MaterialRepr {
    Name(String),
    Full {
        name: String,
        #[serde(default)]
        quantity: Option<String>,
    },
}

impl From<MaterialRepr> for Material {
    fn from(repr: MaterialRepr) -> Self {
        match repr {
            MaterialRepr::Name(name) => Self { name, quantity: None },
            MaterialRepr::Full { name, quantity } => Self { name, quantity },
        }
    }
}

impl fmt::Display for Material {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.quantity.as_deref().filter(|q| !q.trim().is_empty()) {
            Some(quantity) => write!(f, "{} ({quantity})", self.name),
            None => f.write_str(&self.name),
        }
    }
}

fn is_zero(value: &f64) -> bool {
    *value == 0.0
}

/// The stored appointment record. Recurring definitions expand into
/// occurrences at query time; nothing derived is persisted here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentDefinition {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,

    #[serde(rename = "date")]
    pub start_date: NaiveDate,

    #[serde(with = "hhmm")]
    pub time: NaiveTime,

    pub task: String,

    #[serde(rename = "duration")]
    pub duration_hours: f64,

    #[serde(default)]
    pub is_recurring: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurring_type: Option<RecurringType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurring_end_date: Option<NaiveDate>,

    #[serde(default)]
    pub status: JobStatus,

    #[serde(default)]
    pub category: JobCategory,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub materials: Vec<Material>,

    /// Hours actually worked, as opposed to the planned duration.
    #[serde(default, rename = "hours", skip_serializing_if = "is_zero")]
    pub hours_worked: f64,
}

impl AppointmentDefinition {
    pub fn new(start_date: NaiveDate, time: NaiveTime, task: String, duration_hours: f64) -> Self {
        Self {
            id: new_id(),
            customer_id: None,
            start_date,
            time,
            task,
            duration_hours,
            is_recurring: false,
            recurring_type: None,
            recurring_end_date: None,
            status: JobStatus::default(),
            category: JobCategory::default(),
            notes: None,
            materials: Vec::new(),
            hours_worked: 0.0,
        }
    }

    pub fn with_recurrence(mut self, kind: RecurringType, end: Option<NaiveDate>) -> Self {
        self.is_recurring = true;
        self.recurring_type = Some(kind);
        self.recurring_end_date = end;
        self
    }

    /// Drops recurrence fields that carry no meaning on a one-off appointment.
    pub fn normalize(&mut self) {
        if !self.is_recurring {
            self.recurring_type = None;
            self.recurring_end_date = None;
        }
        if self.notes.as_deref().is_some_and(|n| n.trim().is_empty()) {
            self.notes = None;
        }
    }

    pub fn add_material(&mut self, name: &str, quantity: Option<&str>) -> Result<(), FieldError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(FieldError::new("materials", "Materialname ist erforderlich."));
        }
        self.materials.push(Material {
            name: name.to_string(),
            quantity: quantity
                .map(str::trim)
                .filter(|q| !q.is_empty())
                .map(str::to_string),
        });
        Ok(())
    }

    /// Removes the material at a 1-based position, as listed by `info`.
    pub fn remove_material(&mut self, position: usize) -> Option<Material> {
        let idx = position.checked_sub(1)?;
        (idx < self.materials.len()).then(|| self.materials.remove(idx))
    }

    pub fn duration_minutes(&self) -> u32 {
        (self.duration_hours * 60.0).round().max(0.0) as u32
    }

    pub fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();

        if self.task.trim().is_empty() {
            errors.push(FieldError::new("task", "Aufgabe ist erforderlich."));
        }
        if !self.duration_hours.is_finite() || self.duration_hours <= 0.0 {
            errors.push(FieldError::new("duration", "Dauer muss positiv sein."));
        }
        if !self.hours_worked.is_finite() || self.hours_worked < 0.0 {
            errors.push(FieldError::new(
                "hours",
                "Arbeitsstunden dürfen nicht negativ sein.",
            ));
        }
        if self.materials.iter().any(|m| m.name.trim().is_empty()) {
            errors.push(FieldError::new("materials", "Materialname ist erforderlich."));
        }
        if self.is_recurring {
            if self.recurring_type.is_none() {
                errors.push(FieldError::new(
                    "recurringType",
                    "Art der Wiederholung ist erforderlich.",
                ));
            }
            if let Some(end) = self.recurring_end_date
                && end < self.start_date
            {
                errors.push(FieldError::new(
                    "recurringEndDate",
                    "Enddatum der Wiederholung darf nicht vor dem Startdatum liegen.",
                ));
            }
        }

        errors
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: String,
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,

    #[serde(default)]
    pub street: String,

    #[serde(default)]
    pub postal_code: String,

    #[serde(default)]
    pub city: String,

    #[serde(default)]
    pub phone: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Customer {
    pub fn new(name: String) -> Self {
        Self {
            id: new_id(),
            name,
            company: None,
            street: String::new(),
            postal_code: String::new(),
            city: String::new(),
            phone: String::new(),
            email: None,
        }
    }

    pub fn display_name(&self) -> String {
        match self.company.as_deref().filter(|c| !c.trim().is_empty()) {
            Some(company) => format!("{} ({company})", self.name),
            None => self.name.clone(),
        }
    }

    pub fn address_line(&self) -> String {
        format!("{}, {} {}", self.street, self.postal_code, self.city)
    }

    pub fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();

        if self.name.trim().is_empty() {
            errors.push(FieldError::new("name", "Name ist erforderlich."));
        }
        if self.street.trim().is_empty() {
            errors.push(FieldError::new(
                "street",
                "Straße und Hausnummer sind erforderlich.",
            ));
        }
        let plz = self.postal_code.trim();
        if plz.is_empty() {
            errors.push(FieldError::new("postalCode", "PLZ ist erforderlich."));
        } else if plz.len() != 5 || !plz.chars().all(|c| c.is_ascii_digit()) {
            errors.push(FieldError::new("postalCode", "PLZ muss 5-stellig sein."));
        }
        if self.city.trim().is_empty() {
            errors.push(FieldError::new("city", "Stadt ist erforderlich."));
        }
        if self.phone.trim().is_empty() {
            errors.push(FieldError::new("phone", "Telefonnummer ist erforderlich."));
        }
        if let Some(email) = self.email.as_deref().map(str::trim)
            && !email.is_empty()
            && !looks_like_email(email)
        {
            errors.push(FieldError::new("email", "E-Mail-Adresse ist ungültig."));
        }

        errors
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    fn new(field: &'static str, message: &str) -> Self {
        Self {
            field,
            message: message.to_string(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Read-time join of an appointment's customer reference.
pub fn customer_display_name(customers: &[Customer], customer_id: Option<&str>) -> String {
    customer_id
        .and_then(|id| customers.iter().find(|c| c.id == id))
        .map(|c| c.name.clone())
        .unwrap_or_else(|| UNKNOWN_CUSTOMER.to_string())
}

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn looks_like_email(raw: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$")
        .map(|re| re.is_match(raw))
        .unwrap_or(false)
}
