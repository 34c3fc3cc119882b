//! Macro table and the evaluator seams used to resolve conditionals and
//! expanded values.

pub mod context;
pub mod evaluator;
pub mod expression;

pub use context::{MacroContext, MacroValue};
pub use evaluator::{
    BasicConditionEvaluator, BasicEvaluator, ConditionEvaluator, ExpandError, MacroEvaluator,
    Truth,
};
