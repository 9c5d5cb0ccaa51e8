use std::io::{self, BufRead, Write};

use anyhow::{Context, anyhow};
use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::appointment::{AppointmentDefinition, Customer, FieldError};
use crate::cli::{AppointmentArgs, Command, CustomerArgs};
use crate::config::Config;
use crate::datastore::{CustomerDeletePolicy, DataStore};
use crate::datetime::{parse_clock_time, parse_date_expr};
use crate::grid::build_grid;
use crate::recurrence::occurrences_in_range;
use crate::render::Renderer;
use crate::search::{search_appointments, search_customers};
use crate::state::{Action, CalendarState, reduce};
use crate::store::KeyValueStore;

/// Everything a command needs besides its own arguments.
pub struct CommandContext<'a, S, W> {
    pub store: &'a mut DataStore<S>,
    pub cfg: &'a Config,
    pub renderer: &'a Renderer,
    pub today: NaiveDate,
    pub out: &'a mut W,
}

#[derive(Serialize)]
struct Export {
    customers: Vec<Customer>,
    appointments: Vec<AppointmentDefinition>,
}

#[instrument(skip(ctx, command))]
pub fn dispatch<S, W>(ctx: &mut CommandContext<'_, S, W>, command: Command) -> anyhow::Result<()>
where
    S: KeyValueStore,
    W: Write,
{
    debug!(?command, "dispatching command");
    match command {
        Command::Show {
            date,
            view,
            next,
            prev,
        } => {
            let focus = match date {
                Some(raw) => parse_date_expr(&raw, ctx.today)?,
                None => ctx.today,
            };
            let view = match view {
                Some(view) => view,
                None => ctx.cfg.default_view()?,
            };
            let mut state = CalendarState::new(focus, view);
            for _ in 0..next {
                state = reduce(state, Action::Next);
            }
            for _ in 0..prev {
                state = reduce(state, Action::Previous);
            }
            show(ctx, &state)
        }
        Command::Today => {
            let state = reduce(
                CalendarState::new(ctx.today, ctx.cfg.default_view()?),
                Action::Today(ctx.today),
            );
            show(ctx, &state)
        }
        Command::Add(args) => add_appointment(ctx, args),
        Command::Edit {
            id,
            fields,
            no_repeat,
            no_until,
        } => edit_appointment(ctx, &id, fields, no_repeat, no_until),
        Command::MaterialAdd { id, name, quantity } => {
            let mut def = ctx.store.appointment(&id)?;
            def.add_material(&name, quantity.as_deref())
                .map_err(|e| anyhow!("invalid input: {e}"))?;
            ctx.store.replace_appointment(def)?;
            writeln!(ctx.out, "Material \"{}\" zu Termin {id} hinzugefügt.", name.trim())?;
            Ok(())
        }
        Command::MaterialRemove { id, position } => {
            let mut def = ctx.store.appointment(&id)?;
            let removed = def
                .remove_material(position)
                .ok_or_else(|| anyhow!("appointment {id} has no material at position {position}"))?;
            ctx.store.replace_appointment(def)?;
            writeln!(ctx.out, "Material \"{}\" von Termin {id} entfernt.", removed.name)?;
            Ok(())
        }
        Command::Delete { id, yes } => delete_appointment(ctx, &id, yes),
        Command::Info { id } => {
            let def = ctx.store.appointment(&id)?;
            let customers = ctx.store.load_customers()?;
            ctx.renderer.write_appointment_info(ctx.out, &def, &customers)
        }
        Command::Search { term } => {
            let appointments = ctx.store.load_appointments()?;
            let customers = ctx.store.load_customers()?;
            let hits = search_appointments(&appointments, &customers, &term);
            info!(term = %term, hits = hits.len(), "searched appointments");
            ctx.renderer.write_appointment_table(ctx.out, &hits, &customers)
        }
        Command::Customers { term } => {
            let customers = ctx.store.load_customers()?;
            let hits = search_customers(&customers, term.as_deref().unwrap_or_default());
            ctx.renderer.write_customer_table(ctx.out, &hits)
        }
        Command::CustomerAdd(args) => add_customer(ctx, args),
        Command::CustomerEdit { id, fields } => edit_customer(ctx, &id, fields),
        Command::CustomerInfo { id } => {
            let customer = ctx.store.customer(&id)?;
            let customers = ctx.store.load_customers()?;
            let appointments = ctx.store.load_appointments()?;
            let mut owned: Vec<&AppointmentDefinition> = appointments
                .iter()
                .filter(|a| a.customer_id.as_deref() == Some(id.as_str()))
                .collect();
            owned.sort_by_key(|a| (a.start_date, a.time));
            ctx.renderer
                .write_customer_info(ctx.out, &customer, &owned, &customers)
        }
        Command::CustomerDelete {
            id,
            yes,
            keep_appointments,
        } => delete_customer(ctx, &id, yes, keep_appointments),
        Command::Seed => {
            if ctx.store.seed_sample_data()? {
                writeln!(ctx.out, "Beispieldaten angelegt.")?;
            } else {
                writeln!(ctx.out, "Kalender ist nicht leer; keine Beispieldaten angelegt.")?;
            }
            Ok(())
        }
        Command::Export => {
            let export = Export {
                customers: ctx.store.load_customers()?,
                appointments: ctx.store.load_appointments()?,
            };
            serde_json::to_writer_pretty(&mut *ctx.out, &export).context("failed to write export")?;
            writeln!(ctx.out)?;
            Ok(())
        }
    }
}

fn show<S, W>(ctx: &mut CommandContext<'_, S, W>, state: &CalendarState) -> anyhow::Result<()>
where
    S: KeyValueStore,
    W: Write,
{
    let appointments = ctx.store.load_appointments()?;
    let customers = ctx.store.load_customers()?;
    let grid = build_grid(state.focus, state.view);
    debug!(focus = %state.focus, view = %state.view, cells = grid.len(), "built calendar grid");

    let by_day = occurrences_in_range(&appointments, grid)?;
    ctx.renderer
        .write_calendar(ctx.out, state.focus, state.view, &by_day, &customers)
}

fn add_appointment<S, W>(ctx: &mut CommandContext<'_, S, W>, args: AppointmentArgs) -> anyhow::Result<()>
where
    S: KeyValueStore,
    W: Write,
{
    let date = match args.date.as_deref() {
        Some(raw) => parse_date_expr(raw, ctx.today)?,
        None => ctx.today,
    };
    let time = parse_time_arg(args.time.as_deref().ok_or_else(|| anyhow!("--time is required"))?)?;
    let task = args.task.clone().ok_or_else(|| anyhow!("--task is required"))?;
    let duration = args.duration.unwrap_or(1.0);

    let mut def = AppointmentDefinition::new(date, time, task, duration);
    apply_appointment_args(ctx, &mut def, &args)?;
    ensure_valid(def.validate())?;

    let stored = ctx.store.add_appointment(def)?;
    writeln!(ctx.out, "Termin {} angelegt.", stored.id)?;
    Ok(())
}

fn edit_appointment<S, W>(
    ctx: &mut CommandContext<'_, S, W>,
    id: &str,
    args: AppointmentArgs,
    no_repeat: bool,
    no_until: bool,
) -> anyhow::Result<()>
where
    S: KeyValueStore,
    W: Write,
{
    let mut def = ctx.store.appointment(id)?;
    if let Some(raw) = args.date.as_deref() {
        def.start_date = parse_date_expr(raw, ctx.today)?;
    }
    if let Some(raw) = args.time.as_deref() {
        def.time = parse_time_arg(raw)?;
    }
    if let Some(task) = args.task.clone() {
        def.task = task;
    }
    if let Some(duration) = args.duration {
        def.duration_hours = duration;
    }
    if no_repeat {
        def.is_recurring = false;
    }
    if no_until {
        def.recurring_end_date = None;
    }
    apply_appointment_args(ctx, &mut def, &args)?;
    def.normalize();
    ensure_valid(def.validate())?;

    ctx.store.replace_appointment(def)?;
    writeln!(ctx.out, "Termin {id} gespeichert.")?;
    Ok(())
}

/// Fields shared by add and edit: customer reference, recurrence and job
/// tracking.
fn apply_appointment_args<S, W>(
    ctx: &CommandContext<'_, S, W>,
    def: &mut AppointmentDefinition,
    args: &AppointmentArgs,
) -> anyhow::Result<()>
where
    S: KeyValueStore,
{
    if let Some(customer_id) = args.customer.as_deref() {
        ctx.store
            .customer(customer_id)
            .context("--customer must reference an existing customer")?;
        def.customer_id = Some(customer_id.to_string());
    }
    if let Some(kind) = args.repeat {
        def.is_recurring = true;
        def.recurring_type = Some(kind);
    }
    if let Some(raw) = args.until.as_deref() {
        if !def.is_recurring {
            warn!("--until given for a one-off appointment; ignoring");
        }
        def.recurring_end_date = Some(parse_date_expr(raw, ctx.today)?);
    }
    if let Some(status) = args.status {
        def.status = status;
    }
    if let Some(category) = args.category {
        def.category = category;
    }
    if let Some(notes) = args.notes.as_deref() {
        def.notes = Some(notes.trim().to_string()).filter(|n| !n.is_empty());
    }
    if let Some(hours) = args.hours {
        def.hours_worked = hours;
    }
    Ok(())
}

fn delete_appointment<S, W>(ctx: &mut CommandContext<'_, S, W>, id: &str, yes: bool) -> anyhow::Result<()>
where
    S: KeyValueStore,
    W: Write,
{
    let def = ctx.store.appointment(id)?;
    let prompt = format!(
        "Sind Sie sicher, dass Sie den Termin \"{}\" am {} löschen möchten?",
        def.task, def.start_date
    );
    if !yes && !confirm(&prompt)? {
        writeln!(ctx.out, "Abgebrochen.")?;
        return Ok(());
    }
    ctx.store.delete_appointment(id)?;
    writeln!(ctx.out, "Termin {id} gelöscht.")?;
    Ok(())
}

fn add_customer<S, W>(ctx: &mut CommandContext<'_, S, W>, args: CustomerArgs) -> anyhow::Result<()>
where
    S: KeyValueStore,
    W: Write,
{
    let name = args.name.clone().ok_or_else(|| anyhow!("--name is required"))?;
    let mut customer = Customer::new(name);
    apply_customer_args(&mut customer, args);
    ensure_valid(customer.validate())?;

    let stored = ctx.store.add_customer(customer)?;
    writeln!(ctx.out, "Kunde {} angelegt.", stored.id)?;
    Ok(())
}

fn edit_customer<S, W>(ctx: &mut CommandContext<'_, S, W>, id: &str, args: CustomerArgs) -> anyhow::Result<()>
where
    S: KeyValueStore,
    W: Write,
{
    let mut customer = ctx.store.customer(id)?;
    apply_customer_args(&mut customer, args);
    ensure_valid(customer.validate())?;

    ctx.store.replace_customer(customer)?;
    writeln!(ctx.out, "Kunde {id} gespeichert.")?;
    Ok(())
}

fn apply_customer_args(customer: &mut Customer, args: CustomerArgs) {
    if let Some(name) = args.name {
        customer.name = name;
    }
    if let Some(company) = args.company {
        customer.company = Some(company).filter(|c| !c.trim().is_empty());
    }
    if let Some(street) = args.street {
        customer.street = street;
    }
    if let Some(plz) = args.postal_code {
        customer.postal_code = plz;
    }
    if let Some(city) = args.city {
        customer.city = city;
    }
    if let Some(phone) = args.phone {
        customer.phone = phone;
    }
    if let Some(email) = args.email {
        customer.email = Some(email).filter(|e| !e.trim().is_empty());
    }
}

fn delete_customer<S, W>(
    ctx: &mut CommandContext<'_, S, W>,
    id: &str,
    yes: bool,
    keep_appointments: bool,
) -> anyhow::Result<()>
where
    S: KeyValueStore,
    W: Write,
{
    let customer = ctx.store.customer(id)?;
    let policy = if keep_appointments {
        CustomerDeletePolicy::Keep
    } else {
        ctx.cfg.customer_delete_policy()
    };

    let prompt = match policy {
        CustomerDeletePolicy::Cascade => format!(
            "Sind Sie sicher, dass Sie den Kunden \"{}\" und alle zugehörigen Termine löschen möchten?",
            customer.name
        ),
        CustomerDeletePolicy::Keep => format!(
            "Sind Sie sicher, dass Sie den Kunden \"{}\" löschen möchten?",
            customer.name
        ),
    };
    if !yes && !confirm(&prompt)? {
        writeln!(ctx.out, "Abgebrochen.")?;
        return Ok(());
    }

    let removal = ctx.store.delete_customer(id, policy)?;
    writeln!(
        ctx.out,
        "Kunde {id} gelöscht ({} Termine entfernt).",
        removal.removed_appointments.len()
    )?;
    Ok(())
}

fn parse_time_arg(raw: &str) -> anyhow::Result<chrono::NaiveTime> {
    parse_clock_time(raw).ok_or_else(|| anyhow!("invalid time: {raw} (expected HH:MM)"))
}

fn ensure_valid(errors: Vec<FieldError>) -> anyhow::Result<()> {
    if errors.is_empty() {
        return Ok(());
    }
    let joined = errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ");
    Err(anyhow!("invalid input: {joined}"))
}

/// Asks on the terminal; anything but an explicit yes declines.
fn confirm(prompt: &str) -> anyhow::Result<bool> {
    let mut stderr = io::stderr().lock();
    write!(stderr, "{prompt} [j/N] ")?;
    stderr.flush()?;

    let mut answer = String::new();
    io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("failed to read confirmation")?;
    Ok(matches!(
        answer.trim().to_ascii_lowercase().as_str(),
        "j" | "ja" | "y" | "yes"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::GlobalCli;
    use crate::appointment::JobStatus;
    use crate::grid::Locale;
    use crate::store::MemoryStore;
    use clap::Parser;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn run(store: &mut DataStore<MemoryStore>, args: &[&str]) -> anyhow::Result<String> {
        let cfg = Config::default();
        let today = date(2024, 6, 20);
        let renderer = Renderer::plain(Locale::De, today);
        let mut out = Vec::new();
        let cli = GlobalCli::try_parse_from(std::iter::once("kalender").chain(args.iter().copied()))?;
        let command = cli.command.ok_or_else(|| anyhow!("no command"))?;
        {
            let mut ctx = CommandContext {
                store,
                cfg: &cfg,
                renderer: &renderer,
                today,
                out: &mut out,
            };
            dispatch(&mut ctx, command)?;
        }
        Ok(String::from_utf8(out)?)
    }

    fn seeded() -> DataStore<MemoryStore> {
        let mut store = DataStore::new(MemoryStore::new());
        store.seed_sample_data().expect("seed");
        store
    }

    #[test]
    fn add_then_show_week() {
        let mut store = DataStore::new(MemoryStore::new());
        run(
            &mut store,
            &["add", "--date", "2024-06-17", "--time", "7:30", "--task", "Baustelle Nord", "--repeat", "weekly"],
        )
        .expect("add");

        let text = run(&mut store, &["show", "--view", "week", "--next", "1"]).expect("show");
        assert!(text.starts_with("KW 26: 24.06.2024 – 30.06.2024"));
        assert!(text.contains("07:30"));
        assert!(text.contains("Baustelle Nord"));
        assert!(text.contains("Unbekannter Kunde"));
    }

    #[test]
    fn add_rejects_invalid_input() {
        let mut store = DataStore::new(MemoryStore::new());
        let err = run(
            &mut store,
            &["add", "--time", "10:00", "--task", "x", "--duration", "0"],
        )
        .expect_err("zero duration");
        assert!(err.to_string().contains("Dauer muss positiv sein."));

        let err = run(
            &mut store,
            &["add", "--time", "10:00", "--task", "x", "--customer", "missing"],
        )
        .expect_err("unknown customer");
        assert!(format!("{err:#}").contains("customer not found"));
        assert!(store.load_appointments().expect("appointments").is_empty());
    }

    #[test]
    fn edit_replaces_and_can_drop_recurrence() {
        let mut store = seeded();
        run(&mut store, &["edit", "a6", "--time", "15:00", "--no-repeat"]).expect("edit");
        let a6 = store.appointment("a6").expect("a6");
        assert_eq!(a6.time, chrono::NaiveTime::from_hms_opt(15, 0, 0).expect("valid time"));
        assert!(!a6.is_recurring);
        assert_eq!(a6.recurring_end_date, None);
        assert_eq!(a6.task, "Dachrinnenreinigung");
    }

    #[test]
    fn edit_can_drop_end_date_and_track_job() {
        let mut store = seeded();
        run(
            &mut store,
            &["edit", "a6", "--no-until", "--status", "abgeschlossen", "--hours", "1.5", "--notes", "Fallrohr frei"],
        )
        .expect("edit");
        let a6 = store.appointment("a6").expect("a6");
        assert!(a6.is_recurring);
        assert_eq!(a6.recurring_end_date, None);
        assert_eq!(a6.status, JobStatus::Done);
        assert_eq!(a6.hours_worked, 1.5);
        assert_eq!(a6.notes.as_deref(), Some("Fallrohr frei"));

        run(&mut store, &["edit", "a6", "--notes", ""]).expect("clear notes");
        assert_eq!(store.appointment("a6").expect("a6").notes, None);

        let err = run(&mut store, &["edit", "a6", "--hours=-2"]).expect_err("negative hours");
        assert!(err.to_string().contains("Arbeitsstunden"));
    }

    #[test]
    fn materials_are_added_listed_and_removed() {
        let mut store = seeded();
        run(&mut store, &["material-add", "a1", "Brennerdüse", "--quantity", "1 Stk"]).expect("add material");

        let info = run(&mut store, &["info", "a1"]).expect("info");
        assert!(info.contains("Abgeschlossen"));
        assert!(info.contains("Heizung"));
        assert!(info.contains("1. Brennerdüse (1 Stk)"));

        let err = run(&mut store, &["material-remove", "a1", "2"]).expect_err("only one material");
        assert!(err.to_string().contains("position 2"));

        run(&mut store, &["material-remove", "a1", "1"]).expect("remove material");
        assert!(store.appointment("a1").expect("a1").materials.is_empty());
        assert!(run(&mut store, &["material-add", "a1", "  "]).is_err());
    }

    #[test]
    fn delete_with_yes_cascades_customer() {
        let mut store = seeded();
        let text = run(&mut store, &["customer-delete", "c2", "--yes"]).expect("delete");
        assert!(text.contains("2 Termine entfernt"));
        assert_eq!(store.load_appointments().expect("appointments").len(), 5);

        run(&mut store, &["delete", "a1", "-y"]).expect("delete appointment");
        assert!(store.appointment("a1").is_err());
    }

    #[test]
    fn customer_add_validates_postal_code() {
        let mut store = DataStore::new(MemoryStore::new());
        let err = run(
            &mut store,
            &[
                "customer-add", "--name", "Anna Beispiel", "--street", "Hauptstraße 12", "--plz", "9989",
                "--city", "Friedrichroda", "--phone", "03623/123456",
            ],
        )
        .expect_err("short plz");
        assert!(err.to_string().contains("PLZ muss 5-stellig sein."));

        run(
            &mut store,
            &[
                "customer-add", "--name", "Anna Beispiel", "--street", "Hauptstraße 12", "--plz", "99894",
                "--city", "Friedrichroda", "--phone", "03623/123456",
            ],
        )
        .expect("valid customer");
        assert_eq!(store.load_customers().expect("customers").len(), 1);
    }

    #[test]
    fn export_round_trips_through_json() {
        let mut store = seeded();
        let text = run(&mut store, &["export"]).expect("export");
        let value: serde_json::Value = serde_json::from_str(&text).expect("json");
        assert_eq!(value["customers"].as_array().map(Vec::len), Some(4));
        assert_eq!(value["appointments"].as_array().map(Vec::len), Some(7));
    }

    #[test]
    fn search_lists_matches() {
        let mut store = seeded();
        let text = run(&mut store, &["search", "erika"]).expect("search");
        assert!(text.contains("Sanitärinstallation"));
        assert!(text.contains("Badplanung Besprechung"));
        assert!(!text.contains("Heizungswartung"));
    }
}
