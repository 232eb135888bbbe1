//! Selection rule language
//!
//! A small, sandboxed boolean expression language evaluated against a
//! [`MatchContext`]. Rules cannot perform I/O, call into the cluster, or loop:
//! the only inputs are the `spec` and `metadata` variables, and evaluation is
//! capped by a step budget.
//!
//! ```text
//! spec.engine.type == "vllm" && spec.serving.mode in ["aggregated", "disaggregated"]
//! has(spec.resources.gpu) ? spec.resources.gpu.count <= 8 : true
//! metadata.labels["team"].startsWith("search")
//! ```

mod ast;
mod eval;
mod lexer;
mod parser;

use serde_json::Value;
use switchyard_common::MatchContext;

use crate::error::{EvalError, ParseError};

/// Maximum rule source length in bytes
pub const MAX_SOURCE_LEN: usize = 4096;

/// Maximum expression nesting depth
pub const MAX_DEPTH: usize = 32;

/// Evaluation step budget per rule
pub const STEP_BUDGET: u32 = 10_000;

/// A parsed rule, ready to evaluate any number of times
#[derive(Clone, Debug, PartialEq)]
pub struct CompiledRule {
    source: String,
    expr: ast::Expr,
}

impl CompiledRule {
    /// Parse rule text
    pub fn compile(source: &str) -> Result<Self, ParseError> {
        Ok(Self {
            source: source.to_string(),
            expr: parser::parse(source)?,
        })
    }

    /// Original rule text
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate against a context. Anything other than a boolean result is an error.
    pub fn evaluate(&self, ctx: &MatchContext) -> Result<bool, EvalError> {
        self.evaluate_with_budget(ctx, STEP_BUDGET)
    }

    /// Evaluate with an explicit step budget
    pub fn evaluate_with_budget(&self, ctx: &MatchContext, budget: u32) -> Result<bool, EvalError> {
        match eval::Evaluator::new(ctx, budget).eval(&self.expr)?.as_ref() {
            Value::Bool(b) => Ok(*b),
            other => Err(EvalError::NonBoolean(eval::describe(other))),
        }
    }

    /// Field paths this rule reads unconditionally, e.g. `spec.engine.type`.
    ///
    /// Paths probed through `has()` are excluded.
    pub fn field_paths(&self) -> Vec<String> {
        let mut paths = Vec::new();
        self.expr.field_paths(&mut paths);
        paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use switchyard_common::crd::{
        EngineType, GpuSpec, ModelDeploymentSpec, RoleScaling, ServingMode,
    };

    fn ctx() -> MatchContext {
        let mut spec = ModelDeploymentSpec::default();
        spec.model.id = "meta-llama/Llama-3.1-70B-Instruct".to_string();
        spec.engine.engine_type = EngineType::Sglang;
        spec.serving.mode = ServingMode::Disaggregated;
        spec.resources.gpu = Some(GpuSpec {
            count: 4,
            gpu_type: Some("nvidia-h100".to_string()),
        });
        spec.scaling.prefill = Some(RoleScaling {
            replicas: 2,
            gpus: 4,
        });
        spec.scaling.decode = Some(RoleScaling {
            replicas: 1,
            gpus: 8,
        });
        let labels = BTreeMap::from([("team".to_string(), "Search-Infra".to_string())]);
        MatchContext::build(&spec, "llama", "ml", &labels, &BTreeMap::new()).expect("context")
    }

    fn eval(src: &str) -> Result<bool, crate::error::RuleError> {
        let rule = CompiledRule::compile(src)?;
        Ok(rule.evaluate(&ctx())?)
    }

    fn holds(src: &str) -> bool {
        eval(src).unwrap_or_else(|e| panic!("{src}: {e}"))
    }

    #[test]
    fn equality_and_membership() {
        assert!(holds(r#"spec.engine.type == "sglang""#));
        assert!(holds(r#"spec.serving.mode != 'aggregated'"#));
        assert!(holds(r#"spec.engine.type in ["vllm", "sglang"]"#));
        assert!(holds(r#""team" in metadata.labels"#));
        assert!(!holds(r#""owner" in metadata.labels"#));
    }

    #[test]
    fn numeric_comparison_across_int_and_double() {
        assert!(holds("spec.resources.gpu.count >= 4"));
        assert!(holds("spec.resources.gpu.count == 4.0"));
        assert!(holds("spec.scaling.prefill.gpus + spec.scaling.decode.gpus == 12"));
        assert!(holds("spec.scaling.decode.gpus / 3 == 2"));
        assert!(holds("spec.scaling.decode.gpus % 3 == 2"));
        assert!(holds("-spec.scaling.prefill.replicas < 0"));
        assert!(holds("1.5 * 2 == 3"));
    }

    #[test]
    fn string_methods_and_size() {
        assert!(holds(r#"metadata.labels["team"].lower() == "search-infra""#));
        assert!(holds(r#"spec.model.id.startsWith("meta-llama/")"#));
        assert!(holds(r#"spec.model.id.endsWith("Instruct")"#));
        assert!(holds(r#"spec.model.id.contains("70B")"#));
        assert!(holds(r#"size(metadata.name) == 5"#));
        assert!(holds(r#"size(metadata.labels) == 1"#));
        assert!(holds(r#"["a", "b"].contains("b")"#));
        assert!(holds(r#""ab" + "c" == "abc""#));
    }

    #[test]
    fn has_probes_optional_fields() {
        assert!(holds("has(spec.resources.gpu)"));
        assert!(holds(r#"has(spec.resources.gpu.type)"#));
        assert!(!holds("has(spec.provider)"));
        assert!(!holds("has(spec.provider.name)"));
        assert!(holds(r#"has(metadata.labels["team"])"#));
        assert!(holds("has(spec.provider) ? spec.provider.name == \"x\" : true"));
    }

    #[test]
    fn logical_operators_short_circuit() {
        // Right side would error on the missing key
        assert!(!holds(r#"false && spec.provider.name == "x""#));
        assert!(holds(r#"true || spec.provider.name == "x""#));
    }

    #[test]
    fn missing_fields_are_errors_not_false() {
        assert!(matches!(
            eval(r#"spec.provider.name == "x""#),
            Err(crate::error::RuleError::Eval(EvalError::NoSuchKey(_)))
        ));
        assert!(matches!(
            eval("status.phase == \"Ready\""),
            Err(crate::error::RuleError::Eval(EvalError::UnknownVariable(_)))
        ));
    }

    #[test]
    fn non_boolean_results_are_errors() {
        assert_eq!(
            CompiledRule::compile("spec.engine.type")
                .expect("compile")
                .evaluate(&ctx()),
            Err(EvalError::NonBoolean("string".to_string()))
        );
        assert!(eval("1").is_err());
    }

    #[test]
    fn type_errors() {
        assert!(matches!(
            eval(r#"spec.engine.type < 3"#),
            Err(crate::error::RuleError::Eval(EvalError::Type(_)))
        ));
        assert!(matches!(
            eval("!spec.engine.type"),
            Err(crate::error::RuleError::Eval(EvalError::Type(_)))
        ));
        assert!(matches!(
            eval("spec.engine.type.upper() == \"X\""),
            Err(crate::error::RuleError::Eval(EvalError::Call(_)))
        ));
        assert!(matches!(
            eval("exec(\"rm\")"),
            Err(crate::error::RuleError::Eval(EvalError::Call(_)))
        ));
        assert!(matches!(
            eval("1 / 0 == 1"),
            Err(crate::error::RuleError::Eval(EvalError::Arithmetic(_)))
        ));
    }

    #[test]
    fn step_budget_bounds_evaluation() {
        let rule = CompiledRule::compile(r#"spec.engine.type == "sglang""#).expect("compile");
        assert_eq!(rule.evaluate_with_budget(&ctx(), 1000), Ok(true));
        assert_eq!(
            rule.evaluate_with_budget(&ctx(), 3),
            Err(EvalError::BudgetExceeded { limit: 3 })
        );

        // A wide rule still stops at the budget
        let wide = vec!["spec.engine.type == \"sglang\""; 30].join(" && ");
        let rule = CompiledRule::compile(&wide).expect("compile");
        assert_eq!(
            rule.evaluate_with_budget(&ctx(), 100),
            Err(EvalError::BudgetExceeded { limit: 100 })
        );
        assert_eq!(rule.evaluate(&ctx()), Ok(true));
    }

    /// A deployment carrying a large override block
    fn heavy_ctx() -> MatchContext {
        let mut spec = ModelDeploymentSpec::default();
        spec.model.id = "meta-llama/Llama-3.1-8B-Instruct".to_string();
        let filler: serde_json::Map<String, Value> = (0..20_000)
            .map(|i| (format!("key{i}"), Value::from(i)))
            .collect();
        spec.provider = Some(switchyard_common::crd::ProviderSpec {
            name: None,
            overrides: Some(serde_json::json!({ "spec": filler })),
        });
        MatchContext::build(&spec, "llama", "ml", &BTreeMap::new(), &BTreeMap::new())
            .expect("context")
    }

    #[test]
    fn path_reads_do_not_pay_for_the_rest_of_the_spec() {
        let rule = CompiledRule::compile(r#"spec.model.id != """#).expect("compile");
        assert_eq!(rule.evaluate_with_budget(&heavy_ctx(), 10), Ok(true));
        assert_eq!(rule.evaluate_with_budget(&ctx(), 10), Ok(true));
    }

    #[test]
    fn copying_or_comparing_large_values_is_charged_by_size() {
        let heavy = heavy_ctx();
        for src in ["[spec] == [spec]", "spec == spec", "size([spec]) == 1"] {
            let rule = CompiledRule::compile(src).expect("compile");
            assert_eq!(
                rule.evaluate(&heavy),
                Err(EvalError::BudgetExceeded { limit: STEP_BUDGET }),
                "{src}"
            );
            assert_eq!(rule.evaluate(&ctx()), Ok(true), "{src}");
        }
    }

    #[test]
    fn exposes_source() {
        let rule = CompiledRule::compile("true").expect("compile");
        assert_eq!(rule.source(), "true");
        assert!(rule.field_paths().is_empty());
    }
}
