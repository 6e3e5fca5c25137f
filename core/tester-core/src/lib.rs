//! # tester-core
//!
//! Core library for the battery tester: the test-session state machine and
//! the durable logging/recovery engine behind it.
//!
//! ## Design Principles
//!
//! - **Synchronous**: one logical thread drives the state machine; no async
//!   runtime.
//! - **Explicit durability**: the in-memory store never writes to disk by
//!   itself; the driver decides when a sync-to-disk happens.
//! - **Never lose more than one sampling interval**: persistence failures
//!   degrade to warnings and monitoring keeps running from memory.
//! - **No process globals**: storage paths and thresholds are threaded
//!   through explicitly so tests run concurrently against temp roots.

pub mod clock;
pub mod config;
pub mod driver;
pub mod durability;
pub mod error;
pub mod hardware;
pub mod migrate;
pub mod model;
pub mod resume;
pub mod sampler;
pub mod sensor;
pub mod storage;
pub mod store;
pub mod validation;

pub use clock::SessionClock;
pub use config::TesterConfig;
pub use driver::{DriverPhase, PollOutcome, SessionDriver};
pub use durability::{Durability, LoadOutcome};
pub use error::{Result, TesterError};
pub use model::{
    BatteryHealth, LaptopRecord, LogEntry, LowBatteryEvent, PowerEvent, PowerEventKind,
    RootDocument, RunStatus, TestRun, CURRENT_DATA_VERSION,
};
pub use resume::{ResumePoint, StartupState};
pub use sampler::{SampleBaseline, SampleCandidate, Sampler};
pub use sensor::{BatteryReading, PlatformSensor, Sensor, SensorError};
pub use storage::StorageConfig;
pub use store::SessionStore;
pub use validation::{validate_pretest, ValidationReport};
