use crate::appointment::{AppointmentDefinition, Customer};

/// Appointments whose task, notes, materials or customer (name, company)
/// contain `term`, ignoring case. An empty term finds nothing.
pub fn search_appointments<'a>(
    definitions: &'a [AppointmentDefinition],
    customers: &[Customer],
    term: &str,
) -> Vec<&'a AppointmentDefinition> {
    let needle = term.trim().to_lowercase();
    if needle.is_empty() {
        return Vec::new();
    }

    let mut hits: Vec<&AppointmentDefinition> = definitions
        .iter()
        .filter(|definition| {
            let customer = definition
                .customer_id
                .as_deref()
                .and_then(|id| customers.iter().find(|c| c.id == id));
            let customer_hit = customer.is_some_and(|c| {
                contains(&c.name, &needle) || c.company.as_deref().is_some_and(|f| contains(f, &needle))
            });
            customer_hit
                || contains(&definition.task, &needle)
                || definition.notes.as_deref().is_some_and(|n| contains(n, &needle))
                || definition.materials.iter().any(|m| contains(&m.name, &needle))
        })
        .collect();

    hits.sort_by_key(|d| (d.start_date, d.time));
    hits
}

/// Customers matching `term` on any contact field. An empty term lists all.
pub fn search_customers<'a>(customers: &'a [Customer], term: &str) -> Vec<&'a Customer> {
    let needle = term.trim().to_lowercase();
    customers
        .iter()
        .filter(|c| {
            needle.is_empty()
                || contains(&c.name, &needle)
                || c.company.as_deref().is_some_and(|f| contains(f, &needle))
                || contains(&c.street, &needle)
                || contains(&c.postal_code, &needle)
                || contains(&c.city, &needle)
                || contains(&c.phone, &needle)
        })
        .collect()
}

fn contains(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::DataStore;
    use crate::store::MemoryStore;

    fn sample() -> (Vec<AppointmentDefinition>, Vec<Customer>) {
        let mut store = DataStore::new(MemoryStore::new());
        store.seed_sample_data().expect("seed");
        (
            store.load_appointments().expect("appointments"),
            store.load_customers().expect("customers"),
        )
    }

    #[test]
    fn finds_by_customer_company_and_task() {
        let (appointments, customers) = sample();

        let by_company: Vec<&str> = search_appointments(&appointments, &customers, "doe ag")
            .iter()
            .map(|a| a.id.as_str())
            .collect();
        assert_eq!(by_company, vec!["a4"]);

        let by_name: Vec<&str> = search_appointments(&appointments, &customers, "erika")
            .iter()
            .map(|a| a.id.as_str())
            .collect();
        assert_eq!(by_name, vec!["a2", "a5"]);

        let by_task: Vec<&str> = search_appointments(&appointments, &customers, "WARTUNG")
            .iter()
            .map(|a| a.id.as_str())
            .collect();
        assert_eq!(by_task, vec!["a7", "a1"]);
    }

    #[test]
    fn finds_by_notes_and_materials() {
        let (appointments, customers) = sample();
        let ids = |term: &str| -> Vec<String> {
            search_appointments(&appointments, &customers, term)
                .iter()
                .map(|a| a.id.clone())
                .collect()
        };
        assert_eq!(ids("viessmann"), vec!["a1"]);
        assert_eq!(ids("fugenmasse"), vec!["a2"]);
    }

    #[test]
    fn empty_term_behaviour() {
        let (appointments, customers) = sample();
        assert!(search_appointments(&appointments, &customers, "  ").is_empty());
        assert_eq!(search_customers(&customers, "").len(), 4);
    }

    #[test]
    fn customer_search_covers_address_and_phone() {
        let (_, customers) = sample();
        let ids = |term: &str| -> Vec<String> {
            search_customers(&customers, term)
                .iter()
                .map(|c| c.id.clone())
                .collect()
        };
        assert_eq!(ids("birkenhain"), vec!["c4"]);
        assert_eq!(ids("54321"), vec!["c2"]);
        assert_eq!(ids("0111"), vec!["c3"]);
        assert_eq!(ids("mustermann"), vec!["c1", "c2"]);
    }
}
