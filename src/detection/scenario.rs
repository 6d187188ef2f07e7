//! Detection scenarios
//!
//! A scenario pairs a set of leaky-bucket tunables with a classifier over
//! observed HTTP exchanges. The built-in variants live here; hosts can add
//! their own by implementing [`Scenario`] and registering it.

use crate::models::{HttpExchange, Occurrence};

pub const DEFAULT_LEAK_SPEED: i64 = 10;
pub const DEFAULT_BUCKET_CAPACITY: u32 = 10;
pub const DEFAULT_BLACK_HOLE: i64 = 3600;
pub const DEFAULT_DURATION: i64 = 3600;

/// Immutable tunables of a scenario
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioSpec {
    name: String,
    description: String,
    leak_speed: i64,
    bucket_capacity: u32,
    black_hole: i64,
    duration: i64,
}

impl ScenarioSpec {
    pub fn new(name: &str, description: &str) -> Self {
        ScenarioSpec {
            name: name.to_string(),
            description: description.to_string(),
            leak_speed: DEFAULT_LEAK_SPEED,
            bucket_capacity: DEFAULT_BUCKET_CAPACITY,
            black_hole: DEFAULT_BLACK_HOLE,
            duration: DEFAULT_DURATION,
        }
    }

    /// Seconds needed to leak one unit
    pub fn with_leak_speed(mut self, seconds: i64) -> Self {
        self.leak_speed = seconds;
        self
    }

    pub fn with_bucket_capacity(mut self, capacity: u32) -> Self {
        self.bucket_capacity = capacity;
        self
    }

    pub fn with_black_hole(mut self, seconds: i64) -> Self {
        self.black_hole = seconds;
        self
    }

    pub fn with_duration(mut self, seconds: i64) -> Self {
        self.duration = seconds;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn leak_speed(&self) -> i64 {
        self.leak_speed
    }

    pub fn bucket_capacity(&self) -> u32 {
        self.bucket_capacity
    }

    pub fn black_hole(&self) -> i64 {
        self.black_hole
    }

    pub fn duration(&self) -> i64 {
        self.duration
    }
}

/// A detection scenario
pub trait Scenario: Send + Sync {
    fn spec(&self) -> &ScenarioSpec;

    /// Classify one exchange; `Some` means the scenario fired for its ip
    fn detect(&self, exchange: &HttpExchange) -> Option<Occurrence>;

    fn name(&self) -> &str {
        self.spec().name()
    }
}

/// Bursts of "not found" responses from one address
pub struct PageScan {
    spec: ScenarioSpec,
}

impl PageScan {
    pub const NAME: &'static str = "crowdsec-page-scan";

    pub fn new() -> Self {
        PageScan {
            spec: ScenarioSpec::new(Self::NAME, "Detect pages scan"),
        }
    }
}

impl Default for PageScan {
    fn default() -> Self {
        Self::new()
    }
}

impl Scenario for PageScan {
    fn spec(&self) -> &ScenarioSpec {
        &self.spec
    }

    fn detect(&self, exchange: &HttpExchange) -> Option<Occurrence> {
        if exchange.status == 404 {
            Some(Occurrence::for_ip(&exchange.ip))
        } else {
            None
        }
    }
}

/// Repeated rejected logins from an anonymous client
pub struct UserEnumeration {
    spec: ScenarioSpec,
    login_paths: Vec<String>,
}

impl UserEnumeration {
    pub const NAME: &'static str = "crowdsec-user-enum";

    pub fn new(login_paths: Vec<String>) -> Self {
        UserEnumeration {
            spec: ScenarioSpec::new(Self::NAME, "Detect user enumeration"),
            login_paths,
        }
    }

    fn is_login_path(&self, path: &str) -> bool {
        let path = path.split('?').next().unwrap_or(path);
        self.login_paths.iter().any(|login| path.starts_with(login.as_str()))
    }
}

impl Default for UserEnumeration {
    fn default() -> Self {
        Self::new(default_login_paths())
    }
}

impl Scenario for UserEnumeration {
    fn spec(&self) -> &ScenarioSpec {
        &self.spec
    }

    fn detect(&self, exchange: &HttpExchange) -> Option<Occurrence> {
        let rejected = matches!(exchange.status, 401 | 403);
        if !exchange.authenticated
            && rejected
            && exchange.method.eq_ignore_ascii_case("POST")
            && self.is_login_path(&exchange.path)
        {
            Some(Occurrence::for_ip(&exchange.ip))
        } else {
            None
        }
    }
}

pub fn default_login_paths() -> Vec<String> {
    vec![
        "/customer/account/loginPost".to_string(),
        "/login".to_string(),
    ]
}
