pub mod event;
pub mod exchange;

pub use event::{
    is_valid_scenario_name, Event, EventContext, EventStatus, DURATION_KEY, SCENARIO_NAME_PATTERN,
};
pub use exchange::{AlertRequest, HttpExchange, Occurrence};
