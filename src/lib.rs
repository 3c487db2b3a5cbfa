//! Klaxon: Multi-Tenant Alert Evaluation and Notification Runtime
//!
//! Turns labeled numeric series into alert state and notifications:
//!
//! - **Condition Evaluator**: reduces each series to a scalar and applies
//!   a threshold operator, with explicit no-data semantics
//! - **State Manager**: per-instance (rule x label-set) state machine
//!   with hysteresis, policy redirection and heartbeat TTLs
//! - **Notification Dispatcher**: at-most-once delivery per state version
//!   via an optimistic pending/complete protocol
//! - **Multi-Tenant Supervisor**: one isolated alertmanager runtime per
//!   organization, reconciled against the live tenant list, with optional
//!   gossip clustering for cross-process de-duplication
//!
//! # Example
//!
//! ```no_run
//! use klaxon::eval::{Condition, Reducer, ThresholdEvaluator};
//! use klaxon::model::{Point, TimeSeries};
//!
//! let condition = Condition {
//!     reducer: Reducer::Avg,
//!     evaluator: ThresholdEvaluator::Gt { threshold: 100.0 },
//! };
//!
//! let series = TimeSeries::new("cpu").with_points(vec![
//!     Point::new(120.0, 1000),
//!     Point::new(150.0, 2000),
//! ]);
//!
//! let result = condition.eval(&[series]);
//! assert!(result.firing);
//! ```

pub mod api;
pub mod bus;
pub mod cluster;
pub mod config;
pub mod eval;
pub mod metrics;
pub mod model;
pub mod notify;
pub mod state;
pub mod tenant;

// Re-export commonly used types
pub use bus::{BusError, DispatchBus, InMemoryBus};
pub use config::Settings;
pub use metrics::Metrics;
pub use model::{AlertInstance, AlertRule, LabelSet, State, TimeSeries};
