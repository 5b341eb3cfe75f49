//! Strategy registry collaborator contract (§6.4).
//!
//! The core never imports a concrete strategy implementation. It consumes
//! an opaque capability `{feature_requirements(), invoke(ctx, params)}`
//! behind a registry. Strategies do not inherit from a common base; the WFS
//! Engine is parametric over this capability, which is exactly what lets
//! tests substitute a dummy spec.

use crate::error::{CoreError, CoreResult};
use crate::features::FeatureBundle;
use crate::resolver::FeatureRequirement;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// What a strategy invocation sees: the resolved Feature Bundle for its job.
pub struct StrategyContext<'a> {
    pub bundle: &'a FeatureBundle,
}

/// A strategy's output for one invocation. `intents` is left opaque (`Value`)
/// since concrete strategy semantics are outside the core's scope.
#[derive(Debug, Clone)]
pub struct StrategyOutput {
    pub intents: Vec<Value>,
    pub score: f64,
}

/// The capability set a strategy registry entry exposes. No inheritance: any
/// type implementing this trait can be registered.
pub trait StrategyCapability: Send + Sync {
    fn strategy_id(&self) -> &str;
    fn version(&self) -> &str;
    fn param_schema(&self) -> &Value;
    fn defaults(&self) -> &Value;
    fn feature_requirements(&self) -> &[FeatureRequirement];
    fn invoke(&self, ctx: &StrategyContext<'_>, params: &Value) -> CoreResult<StrategyOutput>;
}

/// Read-only strategy registry, primed once via an explicit (idempotent)
/// bootstrap call, never auto-populated.
#[derive(Default)]
pub struct StrategyRegistry {
    entries: HashMap<String, Arc<dyn StrategyCapability>>,
    primed: bool,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `entries`. Calling this more than once is not an error: later
    /// calls overwrite entries with the same `strategy_id`.
    pub fn bootstrap(&mut self, entries: Vec<Arc<dyn StrategyCapability>>) {
        for entry in entries {
            self.entries.insert(entry.strategy_id().to_string(), entry);
        }
        self.primed = true;
    }

    pub fn is_primed(&self) -> bool {
        self.primed
    }

    pub fn get(&self, strategy_id: &str) -> CoreResult<Arc<dyn StrategyCapability>> {
        self.entries
            .get(strategy_id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("strategy: {strategy_id}")))
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;

    /// A deterministic strategy double for resolver/WFS tests: requires one
    /// feature and reports a fixed score regardless of its value.
    pub struct FixedScoreStrategy {
        pub id: String,
        pub requirements: Vec<FeatureRequirement>,
        pub schema: Value,
        pub fixed_score: f64,
    }

    impl StrategyCapability for FixedScoreStrategy {
        fn strategy_id(&self) -> &str {
            &self.id
        }
        fn version(&self) -> &str {
            "1.0.0"
        }
        fn param_schema(&self) -> &Value {
            &self.schema
        }
        fn defaults(&self) -> &Value {
            &self.schema
        }
        fn feature_requirements(&self) -> &[FeatureRequirement] {
            &self.requirements
        }
        fn invoke(&self, _ctx: &StrategyContext<'_>, _params: &Value) -> CoreResult<StrategyOutput> {
            Ok(StrategyOutput { intents: vec![], score: self.fixed_score })
        }
    }
}
