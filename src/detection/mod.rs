pub mod aggregator;
pub mod bucket;
pub mod engine;
pub mod registry;
pub mod scenario;

pub use aggregator::{
    AggregationError, EventAggregator, RecordOutcome, RequestScope, ValidationError,
};
pub use engine::ScenarioEngine;
pub use registry::{RegistryError, ScenarioOption, ScenarioRegistry};
pub use scenario::{PageScan, Scenario, ScenarioSpec, UserEnumeration};
