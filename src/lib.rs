// src/lib.rs - Print farm scheduling core
//!
//! Fleet-level scheduling for a 3D printer farm: a stateless optimizer that
//! places jobs on compatible printers, a stateful scheduler that drives each
//! job through its lifecycle, a monitor that turns telemetry into alerts and
//! metrics, and a maintenance predictor fed by finished prints.

pub mod clock;
pub mod config;
pub mod events;
pub mod maintenance;
pub mod monitor;
pub mod optimizer;
pub mod print_job;
pub mod printer;
pub mod scheduler;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{FarmConfig, load_config};
pub use events::{CallbackError, Subscriber};
pub use maintenance::MaintenancePredictor;
pub use monitor::FarmMonitor;
pub use optimizer::{FarmOptimizer, OptimizationGoal};
pub use print_job::{JobState, PrintJob, PrintJobError, ScheduledJob};
pub use printer::{BuildVolume, PrinterCapability, PrinterProfile};
pub use scheduler::{FarmScheduler, ScheduleStatus};
