use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::grid::{Granularity, shift_focus};

/// What the calendar is currently looking at. Front ends own one value and
/// replace it with the result of [`reduce`] on every user action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarState {
    pub focus: NaiveDate,
    pub view: Granularity,
    pub selected_date: Option<NaiveDate>,
    pub selected_appointment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Next,
    Previous,
    Today(NaiveDate),
    SetView(Granularity),
    SelectDate(NaiveDate),
    SelectAppointment(String),
    ClearSelection,
}

impl CalendarState {
    pub fn new(focus: NaiveDate, view: Granularity) -> Self {
        Self {
            focus,
            view,
            selected_date: None,
            selected_appointment: None,
        }
    }
}

pub fn reduce(state: CalendarState, action: Action) -> CalendarState {
    match action {
        Action::Next => CalendarState {
            focus: shift_focus(state.focus, state.view, 1),
            ..state
        },
        Action::Previous => CalendarState {
            focus: shift_focus(state.focus, state.view, -1),
            ..state
        },
        Action::Today(today) => CalendarState {
            focus: today,
            view: Granularity::Day,
            selected_date: Some(today),
            ..state
        },
        Action::SetView(view) => CalendarState { view, ..state },
        Action::SelectDate(date) => CalendarState {
            focus: date,
            view: Granularity::Day,
            selected_date: Some(date),
            ..state
        },
        Action::SelectAppointment(id) => CalendarState {
            selected_appointment: Some(id),
            ..state
        },
        Action::ClearSelection => CalendarState {
            selected_date: None,
            selected_appointment: None,
            ..state
        },
    }
}
