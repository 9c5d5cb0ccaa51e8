use chrono::{NaiveDate, NaiveTime};
use kalender_core::appointment::{AppointmentDefinition, Customer, RecurringType};
use kalender_core::datastore::{CustomerDeletePolicy, DataStore};
use kalender_core::grid::{Granularity, build_grid, iso_week};
use kalender_core::recurrence::{occurrences_in_range, occurrences_on};
use kalender_core::state::{Action, CalendarState, reduce};
use tempfile::tempdir;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

fn time(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).expect("valid time")
}

#[test]
fn file_backed_catalog_roundtrip_and_cascade() {
    let temp = tempdir().expect("tempdir");
    let mut store = DataStore::open(temp.path()).expect("open datastore");

    let mut customer = Customer::new("Anna Beispiel".to_string());
    customer.street = "Hauptstraße 12".to_string();
    customer.postal_code = "99894".to_string();
    customer.city = "Friedrichroda".to_string();
    customer.phone = "03623/123456".to_string();
    assert!(customer.validate().is_empty());
    let customer = store.add_customer(customer).expect("add customer");

    let mut visit = AppointmentDefinition::new(date(2024, 6, 20), time(13, 0), "Dachrinnenreinigung".to_string(), 2.0)
        .with_recurrence(RecurringType::Monthly, Some(date(2025, 12, 31)));
    visit.customer_id = Some(customer.id.clone());
    let visit = store.add_appointment(visit).expect("add appointment");

    let other = AppointmentDefinition::new(date(2024, 6, 21), time(9, 0), "Angebot schreiben".to_string(), 0.5);
    store.add_appointment(other).expect("add one-off");

    // A second handle on the same directory sees what the first one wrote.
    let reopened = DataStore::open(temp.path()).expect("reopen datastore");
    let appointments = reopened.load_appointments().expect("load appointments");
    assert_eq!(appointments.len(), 2);
    assert_eq!(reopened.appointment(&visit.id).expect("visit"), visit);

    let removal = store
        .delete_customer(&customer.id, CustomerDeletePolicy::Cascade)
        .expect("delete customer");
    assert_eq!(removal.removed_appointments.len(), 1);
    assert_eq!(removal.removed_appointments[0].id, visit.id);

    let remaining = store.load_appointments().expect("load appointments");
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].task, "Angebot schreiben");
    assert!(store.load_customers().expect("load customers").is_empty());
}

#[test]
fn monthly_definition_resolves_through_end_date() {
    let a1 = AppointmentDefinition {
        id: "a1".to_string(),
        ..AppointmentDefinition::new(date(2024, 6, 20), time(10, 0), "Wartung".to_string(), 1.0)
            .with_recurrence(RecurringType::Monthly, Some(date(2025, 12, 31)))
    };
    let defs = vec![a1];

    let hits = occurrences_on(&defs, date(2024, 7, 20)).expect("resolve");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].definition.id, "a1");
    assert_eq!(hits[0].date, date(2024, 7, 20));

    assert!(occurrences_on(&defs, date(2024, 7, 21)).expect("resolve").is_empty());
    assert!(occurrences_on(&defs, date(2026, 1, 20)).expect("resolve").is_empty());
}

#[test]
fn navigating_a_seeded_month_view() {
    let temp = tempdir().expect("tempdir");
    let mut store = DataStore::open(temp.path()).expect("open datastore");
    assert!(store.seed_sample_data().expect("seed"));
    let appointments = store.load_appointments().expect("load appointments");

    let state = CalendarState::new(date(2024, 6, 20), Granularity::Month);
    let state = reduce(state, Action::Next);
    assert_eq!(state.focus, date(2024, 7, 20));

    let grid = build_grid(state.focus, state.view);
    assert_eq!(grid.first().copied(), Some(date(2024, 7, 1)));
    assert_eq!(grid.last().copied(), Some(date(2024, 8, 4)));
    assert_eq!(grid.len() % 7, 0);

    let by_day = occurrences_in_range(&appointments, grid).expect("resolve range");
    let busy: Vec<NaiveDate> = by_day
        .iter()
        .filter(|(_, hits)| !hits.is_empty())
        .map(|(day, _)| *day)
        .collect();
    // a5 on its start date and the monthly a6 on the 20th.
    assert_eq!(busy, vec![date(2024, 7, 1), date(2024, 7, 20)]);
    assert_eq!(iso_week(date(2024, 7, 20)), 29);
}
