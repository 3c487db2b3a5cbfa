//! Condition evaluation: reducers, threshold evaluators and per-tick
//! series classification

pub mod condition;
pub mod evaluator;
pub mod reducer;
pub mod runner;

pub use condition::{Condition, ConditionResult, EvalMatch, NO_DATA_METRIC};
pub use evaluator::ThresholdEvaluator;
pub use reducer::Reducer;
pub use runner::{EvalError, EvalResult, RuleEvaluator, SeriesSource, QUERY_REF_ID};
