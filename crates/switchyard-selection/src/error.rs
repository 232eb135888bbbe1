//! Error types for rule compilation, evaluation and selection

use thiserror::Error;

/// A rule failed to compile
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ParseError {
    /// Source exceeds the maximum rule length
    #[error("rule is {len} bytes, limit is {limit}")]
    TooLong {
        /// Rule length in bytes
        len: usize,
        /// Maximum accepted length
        limit: usize,
    },

    /// Expression nesting exceeds the maximum depth
    #[error("rule nesting exceeds depth {limit}")]
    TooDeep {
        /// Maximum accepted depth
        limit: usize,
    },

    /// Lexical or grammatical error
    #[error("syntax error at offset {offset}: {message}")]
    Syntax {
        /// Byte offset into the rule text
        offset: usize,
        /// What was expected or found
        message: String,
    },
}

impl ParseError {
    pub(crate) fn syntax(offset: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            offset,
            message: message.into(),
        }
    }
}

/// A compiled rule failed while evaluating against a match context
#[derive(Clone, Debug, Error, PartialEq)]
pub enum EvalError {
    /// The step budget ran out
    #[error("evaluation exceeded {limit} steps")]
    BudgetExceeded {
        /// Step budget
        limit: u32,
    },

    /// A root variable other than `spec` or `metadata` was referenced
    #[error("unknown variable '{0}'")]
    UnknownVariable(String),

    /// A field or key is absent
    #[error("no such key '{0}'")]
    NoSuchKey(String),

    /// An operator or function was applied to the wrong types
    #[error("type error: {0}")]
    Type(String),

    /// Unknown function or method, or wrong argument count
    #[error("invalid call: {0}")]
    Call(String),

    /// Division by zero or integer overflow
    #[error("arithmetic error: {0}")]
    Arithmetic(String),

    /// The rule produced something other than a boolean
    #[error("rule evaluated to {0}, expected a boolean")]
    NonBoolean(String),
}

/// Why a rule produced no decision
#[derive(Clone, Debug, Error, PartialEq)]
pub enum RuleError {
    /// Rule text does not compile
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// Rule compiled but evaluation failed
    #[error(transparent)]
    Eval(#[from] EvalError),
}

/// One rule that failed during a selection pass
#[derive(Clone, Debug, PartialEq)]
pub struct RuleFailure {
    /// Provider owning the rule
    pub provider: String,
    /// Rule source text
    pub expression: String,
    /// What went wrong
    pub error: RuleError,
}

impl std::fmt::Display for RuleFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: `{}`: {}", self.provider, self.expression, self.error)
    }
}

/// Selection could not reach a decision
#[derive(Debug, Error)]
pub enum SelectionError {
    /// No rule matched and at least one rule errored, so "no provider"
    /// cannot be distinguished from a broken rule
    #[error("rule evaluation failed for {} rule(s): {}", failures.len(), summarize(failures))]
    Evaluation {
        /// Every rule that failed
        failures: Vec<RuleFailure>,
    },
}

fn summarize(failures: &[RuleFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
