use std::path::Path;

use anyhow::{Context, anyhow};
use chrono::{NaiveDate, NaiveTime};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::appointment::{AppointmentDefinition, Customer, JobCategory, JobStatus, RecurringType};
use crate::store::{FileStore, KeyValueStore};

pub const APPOINTMENTS_KEY: &str = "appointments";
pub const CUSTOMERS_KEY: &str = "customers";

/// What happens to a customer's appointments when the customer is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustomerDeletePolicy {
    Cascade,
    Keep,
}

#[derive(Debug)]
pub struct CustomerRemoval {
    pub customer: Customer,
    pub removed_appointments: Vec<AppointmentDefinition>,
}

/// Appointment and customer catalog on top of a [`KeyValueStore`]. Every
/// mutation loads the current collection, rewrites whole records and saves
/// the collection back.
#[derive(Debug)]
pub struct DataStore<S> {
    store: S,
}

impl DataStore<FileStore> {
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        Ok(Self::new(FileStore::open(data_dir)?))
    }
}

impl<S: KeyValueStore> DataStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    #[tracing::instrument(skip(self))]
    pub fn load_appointments(&self) -> anyhow::Result<Vec<AppointmentDefinition>> {
        load_collection(&self.store, APPOINTMENTS_KEY)
    }

    #[tracing::instrument(skip(self))]
    pub fn load_customers(&self) -> anyhow::Result<Vec<Customer>> {
        load_collection(&self.store, CUSTOMERS_KEY)
    }

    #[tracing::instrument(skip(self, appointments), fields(count = appointments.len()))]
    pub fn save_appointments(&mut self, appointments: &[AppointmentDefinition]) -> anyhow::Result<()> {
        save_collection(&mut self.store, APPOINTMENTS_KEY, appointments)
    }

    #[tracing::instrument(skip(self, customers), fields(count = customers.len()))]
    pub fn save_customers(&mut self, customers: &[Customer]) -> anyhow::Result<()> {
        save_collection(&mut self.store, CUSTOMERS_KEY, customers)
    }

    pub fn appointment(&self, id: &str) -> anyhow::Result<AppointmentDefinition> {
        self.load_appointments()?
            .into_iter()
            .find(|a| a.id == id)
            .ok_or_else(|| anyhow!("appointment not found: {id}"))
    }

    pub fn customer(&self, id: &str) -> anyhow::Result<Customer> {
        self.load_customers()?
            .into_iter()
            .find(|c| c.id == id)
            .ok_or_else(|| anyhow!("customer not found: {id}"))
    }

    #[tracing::instrument(skip(self, appointment), fields(id = %appointment.id))]
    pub fn add_appointment(
        &mut self,
        mut appointment: AppointmentDefinition,
    ) -> anyhow::Result<AppointmentDefinition> {
        let mut appointments = self.load_appointments()?;
        if appointment.id.trim().is_empty() {
            appointment.id = crate::appointment::new_id();
        }
        if appointments.iter().any(|a| a.id == appointment.id) {
            return Err(anyhow!("appointment id already exists: {}", appointment.id));
        }
        appointment.normalize();
        appointments.push(appointment.clone());
        self.save_appointments(&appointments)?;
        info!(id = %appointment.id, "added appointment");
        Ok(appointment)
    }

    #[tracing::instrument(skip(self, appointment), fields(id = %appointment.id))]
    pub fn replace_appointment(&mut self, mut appointment: AppointmentDefinition) -> anyhow::Result<()> {
        let mut appointments = self.load_appointments()?;
        let slot = appointments
            .iter_mut()
            .find(|a| a.id == appointment.id)
            .ok_or_else(|| anyhow!("appointment not found: {}", appointment.id))?;
        appointment.normalize();
        *slot = appointment;
        self.save_appointments(&appointments)
    }

    #[tracing::instrument(skip(self))]
    pub fn delete_appointment(&mut self, id: &str) -> anyhow::Result<AppointmentDefinition> {
        let mut appointments = self.load_appointments()?;
        let idx = appointments
            .iter()
            .position(|a| a.id == id)
            .ok_or_else(|| anyhow!("appointment not found: {id}"))?;
        let removed = appointments.remove(idx);
        self.save_appointments(&appointments)?;
        info!(id, "deleted appointment");
        Ok(removed)
    }

    #[tracing::instrument(skip(self, customer), fields(id = %customer.id))]
    pub fn add_customer(&mut self, mut customer: Customer) -> anyhow::Result<Customer> {
        let mut customers = self.load_customers()?;
        if customer.id.trim().is_empty() {
            customer.id = crate::appointment::new_id();
        }
        if customers.iter().any(|c| c.id == customer.id) {
            return Err(anyhow!("customer id already exists: {}", customer.id));
        }
        customers.push(customer.clone());
        self.save_customers(&customers)?;
        info!(id = %customer.id, "added customer");
        Ok(customer)
    }

    #[tracing::instrument(skip(self, customer), fields(id = %customer.id))]
    pub fn replace_customer(&mut self, customer: Customer) -> anyhow::Result<()> {
        let mut customers = self.load_customers()?;
        let slot = customers
            .iter_mut()
            .find(|c| c.id == customer.id)
            .ok_or_else(|| anyhow!("customer not found: {}", customer.id))?;
        *slot = customer;
        self.save_customers(&customers)
    }

    #[tracing::instrument(skip(self))]
    pub fn delete_customer(
        &mut self,
        id: &str,
        policy: CustomerDeletePolicy,
    ) -> anyhow::Result<CustomerRemoval> {
        let mut customers = self.load_customers()?;
        let idx = customers
            .iter()
            .position(|c| c.id == id)
            .ok_or_else(|| anyhow!("customer not found: {id}"))?;

        let customer = customers.remove(idx);
        self.save_customers(&customers)?;

        // The two collections are separate writes. Customers go first so a
        // failed second write leaves orphaned appointments, never lost ones.
        let mut removed_appointments = Vec::new();
        if policy == CustomerDeletePolicy::Cascade {
            let (removed, kept): (Vec<_>, Vec<_>) = self
                .load_appointments()?
                .into_iter()
                .partition(|a| a.customer_id.as_deref() == Some(id));
            if !removed.is_empty() {
                self.save_appointments(&kept)?;
            }
            removed_appointments = removed;
        }
        info!(
            id,
            ?policy,
            removed_appointments = removed_appointments.len(),
            "deleted customer"
        );
        Ok(CustomerRemoval {
            customer,
            removed_appointments,
        })
    }

    /// Installs the demo customers and appointments, but only into an empty
    /// catalog. Returns whether anything was written.
    #[tracing::instrument(skip(self))]
    pub fn seed_sample_data(&mut self) -> anyhow::Result<bool> {
        if !self.load_customers()?.is_empty() || !self.load_appointments()?.is_empty() {
            debug!("catalog not empty; skipping sample data");
            return Ok(false);
        }
        let (customers, appointments) = sample_data()?;
        self.save_customers(&customers)?;
        self.save_appointments(&appointments)?;
        info!(
            customers = customers.len(),
            appointments = appointments.len(),
            "installed sample data"
        );
        Ok(true)
    }
}

fn load_collection<T, S>(store: &S, key: &str) -> anyhow::Result<Vec<T>>
where
    T: DeserializeOwned,
    S: KeyValueStore,
{
    let Some(raw) = store.get(key)? else {
        debug!(key, "collection missing; starting empty");
        return Ok(Vec::new());
    };
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    let items: Vec<T> =
        serde_json::from_str(&raw).with_context(|| format!("failed parsing stored {key}"))?;
    debug!(key, count = items.len(), "loaded collection");
    Ok(items)
}

fn save_collection<T, S>(store: &mut S, key: &str, items: &[T]) -> anyhow::Result<()>
where
    T: Serialize,
    S: KeyValueStore,
{
    let raw = serde_json::to_string(items)?;
    store
        .set(key, &raw)
        .with_context(|| format!("failed to save {key}"))
}

fn sample_data() -> anyhow::Result<(Vec<Customer>, Vec<AppointmentDefinition>)> {
    let customer = |id: &str,
                    name: &str,
                    company: Option<&str>,
                    street: &str,
                    plz: &str,
                    city: &str,
                    phone: &str,
                    email: &str| Customer {
        id: id.to_string(),
        name: name.to_string(),
        company: company.map(str::to_string),
        street: street.to_string(),
        postal_code: plz.to_string(),
        city: city.to_string(),
        phone: phone.to_string(),
        email: Some(email.to_string()),
    };

    let customers = vec![
        customer("c1", "Max Mustermann", Some("Muster GmbH"), "Musterweg 1", "12345", "Musterstadt", "0123-4567890", "max@muster.de"),
        customer("c2", "Erika Mustermann", None, "Beispielallee 2a", "54321", "Beispielhausen", "0987-6543210", "erika@beispiel.com"),
        customer("c3", "John Doe", Some("Doe AG"), "Ahornstraße 15", "98765", "Ahornfeld", "0111-2233445", "john.doe@doeag.com"),
        customer("c4", "Jane Roe", None, "Birkenweg 7", "12321", "Birkenhain", "0222-3344556", "jane.roe@example.net"),
    ];

    type Row = (&'static str, &'static str, &'static str, &'static str, &'static str, f64, JobCategory, Option<(RecurringType, Option<&'static str>)>);
    let rows: [Row; 7] = [
        ("a1", "c1", "2024-06-10", "10:00", "Heizungswartung", 2.0, JobCategory::Heizung, None),
        ("a2", "c2", "2024-06-10", "14:00", "Sanitärinstallation", 3.0, JobCategory::Sanitaer, None),
        ("a3", "c1", "2024-06-12", "09:00", "Reparatur Wasserhahn", 1.0, JobCategory::Reparatur, None),
        ("a4", "c3", "2024-06-14", "11:00", "Klimaanlagen-Check", 2.5, JobCategory::Wartung, None),
        ("a5", "c2", "2024-07-01", "08:30", "Badplanung Besprechung", 1.5, JobCategory::Sanitaer, None),
        ("a6", "c4", "2024-06-20", "13:00", "Dachrinnenreinigung", 2.0, JobCategory::Allgemein, Some((RecurringType::Monthly, Some("2025-12-31")))),
        ("a7", "c1", "2024-01-15", "10:00", "Jährliche Wartung", 2.0, JobCategory::Wartung, Some((RecurringType::Yearly, None))),
    ];

    let mut appointments = Vec::with_capacity(rows.len());
    for (id, customer_id, date, time, task, duration, category, recurrence) in rows {
        let start = NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .with_context(|| format!("invalid sample date {date}"))?;
        let time = NaiveTime::parse_from_str(time, "%H:%M")
            .with_context(|| format!("invalid sample time {time}"))?;
        let mut appointment = AppointmentDefinition::new(start, time, task.to_string(), duration);
        appointment.id = id.to_string();
        appointment.customer_id = Some(customer_id.to_string());
        appointment.category = category;
        if let Some((kind, end)) = recurrence {
            let end = end
                .map(|raw| NaiveDate::parse_from_str(raw, "%Y-%m-%d"))
                .transpose()
                .with_context(|| format!("invalid sample end date for {id}"))?;
            appointment = appointment.with_recurrence(kind, end);
        }
        match id {
            "a1" => {
                appointment.status = JobStatus::Done;
                appointment.hours_worked = 2.5;
                appointment.notes = Some("Gasheizung Viessmann, Baujahr 2018.".to_string());
            }
            "a2" => {
                appointment.status = JobStatus::InProgress;
                for (name, quantity) in [("Fliesenkleber", "5 Sack"), ("Fugenmasse", "2 Eimer")] {
                    appointment
                        .add_material(name, Some(quantity))
                        .map_err(|e| anyhow!("invalid sample material: {e}"))?;
                }
            }
            _ => {}
        }
        appointments.push(appointment);
    }

    Ok((customers, appointments))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn seeded() -> DataStore<MemoryStore> {
        let mut store = DataStore::new(MemoryStore::new());
        assert!(store.seed_sample_data().expect("seed"));
        store
    }

    #[test]
    fn seeding_only_touches_empty_catalog() {
        let mut store = seeded();
        assert_eq!(store.load_customers().expect("customers").len(), 4);
        assert_eq!(store.load_appointments().expect("appointments").len(), 7);
        assert!(!store.seed_sample_data().expect("seed again"));
    }

    #[test]
    fn replace_rewrites_whole_record() {
        let mut store = seeded();
        let mut a6 = store.appointment("a6").expect("a6");
        a6.task = "Dachrinne + Fallrohr".to_string();
        a6.is_recurring = false;
        store.replace_appointment(a6).expect("replace");

        let stored = store.appointment("a6").expect("a6");
        assert_eq!(stored.task, "Dachrinne + Fallrohr");
        assert_eq!(stored.recurring_type, None);
        assert_eq!(stored.recurring_end_date, None);

        let mut ghost = stored.clone();
        ghost.id = "nope".to_string();
        assert!(store.replace_appointment(ghost).is_err());
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut store = seeded();
        let dup = store.appointment("a1").expect("a1");
        assert!(store.add_appointment(dup).is_err());

        let mut fresh = store.appointment("a1").expect("a1");
        fresh.id = String::new();
        let added = store.add_appointment(fresh).expect("add");
        assert!(!added.id.is_empty());
        assert_eq!(store.load_appointments().expect("appointments").len(), 8);
    }

    #[test]
    fn deleting_customer_cascades_by_default_policy() {
        let mut store = seeded();
        let removal = store
            .delete_customer("c1", CustomerDeletePolicy::Cascade)
            .expect("delete");
        assert_eq!(removal.customer.name, "Max Mustermann");
        let mut removed: Vec<String> = removal.removed_appointments.iter().map(|a| a.id.clone()).collect();
        removed.sort();
        assert_eq!(removed, vec!["a1", "a3", "a7"]);
        let remaining = store.load_appointments().expect("appointments");
        assert!(remaining.iter().all(|a| a.customer_id.as_deref() != Some("c1")));
        assert_eq!(remaining.len(), 4);
    }

    #[test]
    fn keep_policy_leaves_orphans() {
        let mut store = seeded();
        let removal = store
            .delete_customer("c2", CustomerDeletePolicy::Keep)
            .expect("delete");
        assert!(removal.removed_appointments.is_empty());
        assert_eq!(store.load_appointments().expect("appointments").len(), 7);
        assert!(store.customer("c2").is_err());
    }

    /// Memory store whose appointment writes fail once armed.
    struct BrokenAppointments {
        inner: MemoryStore,
        armed: bool,
    }

    impl KeyValueStore for BrokenAppointments {
        fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
            self.inner.get(key)
        }

        fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
            if self.armed && key == APPOINTMENTS_KEY {
                return Err(anyhow!("disk full"));
            }
            self.inner.set(key, value)
        }

        fn remove(&mut self, key: &str) -> anyhow::Result<()> {
            self.inner.remove(key)
        }
    }

    #[test]
    fn failed_cascade_write_keeps_appointments() {
        let mut store = DataStore::new(BrokenAppointments {
            inner: MemoryStore::new(),
            armed: false,
        });
        store.seed_sample_data().expect("seed");
        store.store.armed = true;

        let err = store
            .delete_customer("c1", CustomerDeletePolicy::Cascade)
            .expect_err("appointment write fails");
        assert!(format!("{err:#}").contains("disk full"));

        assert!(store.customer("c1").is_err());
        let appointments = store.load_appointments().expect("appointments");
        assert_eq!(appointments.len(), 7);
        assert!(appointments.iter().any(|a| a.id == "a1"));
    }

    #[test]
    fn corrupt_collection_reports_key() {
        let mut raw = MemoryStore::new();
        raw.set(APPOINTMENTS_KEY, "{not json").expect("set");
        let store = DataStore::new(raw);
        let err = store.load_appointments().expect_err("corrupt");
        assert!(format!("{err:#}").contains("appointments"));
    }
}
