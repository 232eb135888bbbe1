//! Provider selection
//!
//! Given a deployment and a snapshot of registry entries, pick exactly one
//! provider or none:
//!
//! 1. Keep entries that are fresh and whose capabilities cover the requested
//!    engine, serving mode and accelerator.
//! 2. An explicit provider override selects that entry if it survived step 1
//!    and never falls through to rules.
//! 3. Otherwise each entry's rules are evaluated; an entry scores the highest
//!    priority among its matching rules. Rules that fail to compile or
//!    evaluate do not match.
//! 4. Highest score wins; equal scores go to the lexically smallest name.
//!
//! When nothing matches and some rule failed, the result is an error rather
//! than "no provider", since the failed rule might have matched.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use kube::ResourceExt;
use switchyard_common::crd::{EngineType, InferenceProvider, ModelDeploymentSpec, ServingMode};
use switchyard_common::MatchContext;
use tracing::{debug, warn};

use crate::cache::RuleCache;
use crate::error::{RuleError, RuleFailure, SelectionError};

/// The selection-relevant projection of a deployment spec
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectionRequest {
    /// Requested engine
    pub engine: EngineType,
    /// Requested serving mode
    pub mode: ServingMode,
    /// Whether any worker requests a GPU
    pub wants_gpu: bool,
    /// Explicitly requested provider
    pub provider_override: Option<String>,
}

impl SelectionRequest {
    /// Project a spec
    pub fn from_spec(spec: &ModelDeploymentSpec) -> Self {
        Self {
            engine: spec.engine.engine_type,
            mode: spec.serving.mode,
            wants_gpu: spec.requests_gpu(),
            provider_override: spec.provider_override().map(str::to_string),
        }
    }

    fn accelerator(&self) -> &'static str {
        if self.wants_gpu {
            "gpu"
        } else {
            "cpu"
        }
    }
}

impl std::fmt::Display for SelectionRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "engine={} mode={} accelerator={}",
            self.engine,
            self.mode,
            self.accelerator()
        )
    }
}

/// A chosen provider
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Selection {
    /// Provider id
    pub provider: String,
    /// apiVersion of the provider's native resource
    pub api_version: String,
    /// Kind of the provider's native resource
    pub kind: String,
    /// Priority of the winning rule; `None` for an explicit override
    pub priority: Option<i32>,
    /// Human-readable explanation
    pub reason: String,
}

/// Outcome of a selection pass that did not hit an evaluation error
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SelectionOutcome {
    /// A provider was chosen
    Selected(Selection),
    /// No provider can serve the request with the current registry
    NoMatch {
        /// Why nothing was chosen
        reason: String,
    },
}

/// Selection engine holding the compiled-rule cache
#[derive(Clone, Default)]
pub struct SelectionEngine {
    cache: Arc<RuleCache>,
}

impl SelectionEngine {
    /// Create an engine with an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// The engine's rule cache
    pub fn cache(&self) -> &RuleCache {
        &self.cache
    }

    /// Select a provider for `spec` from a registry snapshot.
    ///
    /// `candidates` is never mutated. The result depends only on the
    /// arguments, so repeated calls with the same inputs agree.
    pub fn select(
        &self,
        spec: &ModelDeploymentSpec,
        ctx: &MatchContext,
        candidates: &[InferenceProvider],
        now: DateTime<Utc>,
    ) -> Result<SelectionOutcome, SelectionError> {
        let request = SelectionRequest::from_spec(spec);

        self.cache.retain_live(
            candidates
                .iter()
                .flat_map(|p| p.spec.selection_rules.iter().map(|r| r.expression.as_str())),
        );

        let mut eligible: Vec<&InferenceProvider> = Vec::new();
        let mut rejected: Vec<String> = Vec::new();
        for provider in candidates {
            match ineligibility(provider, &request, now) {
                None => eligible.push(provider),
                Some(why) => rejected.push(format!("{}: {why}", provider.name_any())),
            }
        }
        eligible.sort_by_key(|p| p.name_any());
        rejected.sort();

        if let Some(wanted) = &request.provider_override {
            return Ok(select_override(wanted, &eligible, &rejected, &request));
        }

        if eligible.is_empty() {
            return Ok(SelectionOutcome::NoMatch {
                reason: no_eligible_reason(&request, &rejected),
            });
        }

        let mut best: Option<(&InferenceProvider, i32, &str)> = None;
        let mut failures = Vec::new();

        for provider in &eligible {
            let name = provider.name_any();
            let Some((priority, rule)) = self.best_matching_rule(provider, ctx, &mut failures)
            else {
                debug!(provider = %name, "No selection rule matched");
                continue;
            };
            // eligible is sorted by name, so only a strictly higher priority
            // replaces the current best
            if best.map_or(true, |(_, p, _)| priority > p) {
                best = Some((provider, priority, rule));
            }
        }

        match best {
            Some((provider, priority, rule)) => Ok(SelectionOutcome::Selected(Selection {
                provider: provider.name_any(),
                api_version: provider.spec.resource.api_version.clone(),
                kind: provider.spec.resource.kind.clone(),
                priority: Some(priority),
                reason: format!("matched rule `{rule}` with priority {priority}"),
            })),
            None if !failures.is_empty() => Err(SelectionError::Evaluation { failures }),
            None => Ok(SelectionOutcome::NoMatch {
                reason: format!(
                    "no selection rule matched {request} among eligible providers [{}]",
                    eligible
                        .iter()
                        .map(|p| p.name_any())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            }),
        }
    }

    /// Highest-priority matching rule of one provider, recording failures
    fn best_matching_rule<'p>(
        &self,
        provider: &'p InferenceProvider,
        ctx: &MatchContext,
        failures: &mut Vec<RuleFailure>,
    ) -> Option<(i32, &'p str)> {
        let name = provider.name_any();
        let mut best: Option<(i32, &str)> = None;

        for rule in &provider.spec.selection_rules {
            if best.is_some_and(|(p, _)| rule.priority <= p) {
                continue;
            }
            let compiled = self.cache.get_or_compile(&rule.expression);
            let outcome = match compiled.as_ref() {
                Ok(compiled) => compiled.evaluate(ctx).map_err(RuleError::from),
                Err(e) => Err(RuleError::from(e.clone())),
            };
            match outcome {
                Ok(true) => best = Some((rule.priority, rule.expression.as_str())),
                Ok(false) => {}
                Err(error) => {
                    warn!(
                        provider = %name,
                        rule = %rule.expression,
                        error = %error,
                        "Selection rule failed, treating as non-matching"
                    );
                    failures.push(RuleFailure {
                        provider: name.clone(),
                        expression: rule.expression.clone(),
                        error,
                    });
                }
            }
        }
        best
    }
}

/// Why a provider cannot take this request, or `None` if it can
fn ineligibility(
    provider: &InferenceProvider,
    request: &SelectionRequest,
    now: DateTime<Utc>,
) -> Option<String> {
    if !provider.is_fresh(now) {
        let ready = provider.status.as_ref().is_some_and(|s| s.ready);
        return Some(if ready {
            "heartbeat is stale".to_string()
        } else {
            "not ready".to_string()
        });
    }
    let caps = &provider.spec.capabilities;
    if !caps.supports_engine(request.engine) {
        return Some(format!("engine {} not supported", request.engine));
    }
    if !caps.supports_mode(request.mode) {
        return Some(format!("serving mode {} not supported", request.mode));
    }
    if !caps.supports_accelerator(request.wants_gpu) {
        return Some(format!("{} serving not supported", request.accelerator()));
    }
    None
}

fn select_override(
    wanted: &str,
    eligible: &[&InferenceProvider],
    rejected: &[String],
    request: &SelectionRequest,
) -> SelectionOutcome {
    if let Some(provider) = eligible.iter().find(|p| p.name_any() == wanted) {
        return SelectionOutcome::Selected(Selection {
            provider: wanted.to_string(),
            api_version: provider.spec.resource.api_version.clone(),
            kind: provider.spec.resource.kind.clone(),
            priority: None,
            reason: "explicit provider override".to_string(),
        });
    }

    let prefix = format!("{wanted}: ");
    let reason = match rejected.iter().find(|r| r.starts_with(&prefix)) {
        Some(why) => format!("requested provider cannot serve {request}: {why}"),
        None => format!("requested provider {wanted} is not registered"),
    };
    SelectionOutcome::NoMatch { reason }
}

fn no_eligible_reason(request: &SelectionRequest, rejected: &[String]) -> String {
    if rejected.is_empty() {
        return "no inference providers are registered".to_string();
    }
    format!(
        "no ready provider supports {request} ({})",
        rejected.join("; ")
    )
}
