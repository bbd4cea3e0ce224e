//! Boolean expressions for `if` conditions and loop breaks.
//!
//! [`SimpleExpression`] understands comparisons joined by `&&` and `||`:
//!
//! ```text
//! task_status == 'Success' || looped_times == 5
//! outputs.result != "retry" && pipeline_status == 'Running'
//! ```
//!
//! `&&` binds tighter than `||`. Quoted literals may not contain `&&` or `||`.

use crate::errors::{ReconcileError, Result};
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

static COMPARISON: LazyLock<std::result::Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^(.+?)\s*(==|!=)\s*(.+)$"));

static IDENTIFIER: LazyLock<std::result::Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_\-]*(\.[A-Za-z0-9_\-]+)*$"));

/// Prefix of variables that read task outputs.
pub const OUTPUTS_PREFIX: &str = "outputs.";

/// Evaluates boolean expressions over string variables.
pub trait ExpressionEvaluator: Send + Sync {
    /// Evaluates `expr`.
    fn evaluate(&self, expr: &str, vars: &HashMap<String, String>) -> Result<bool>;
}

/// Comparison-only evaluator.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleExpression;

impl SimpleExpression {
    /// Creates the evaluator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn compiled(re: &'static LazyLock<std::result::Result<Regex, regex::Error>>) -> Result<&'static Regex> {
        re.as_ref()
            .map_err(|e| ReconcileError::Config(format!("expression grammar: {e}")))
    }

    fn operand(expr: &str, token: &str, vars: &HashMap<String, String>) -> Result<String> {
        let token = token.trim();
        for quote in ['\'', '"'] {
            if token.len() >= 2 && token.starts_with(quote) && token.ends_with(quote) {
                return Ok(token[1..token.len() - 1].to_string());
            }
        }
        if token.parse::<f64>().is_ok() || token == "true" || token == "false" {
            return Ok(token.to_string());
        }
        if !Self::compiled(&IDENTIFIER)?.is_match(token) {
            return Err(invalid(expr, format!("unexpected token {token:?}")));
        }
        match vars.get(token) {
            Some(value) => Ok(value.clone()),
            None if token.starts_with(OUTPUTS_PREFIX) => Ok(String::new()),
            None => Err(invalid(expr, format!("unknown variable {token:?}"))),
        }
    }

    fn term(expr: &str, term: &str, vars: &HashMap<String, String>) -> Result<bool> {
        let term = term.trim();
        if term.is_empty() {
            return Err(invalid(expr, "empty operand"));
        }
        if let Some(caps) = Self::compiled(&COMPARISON)?.captures(term) {
            let left = Self::operand(expr, &caps[1], vars)?;
            let right = Self::operand(expr, &caps[3], vars)?;
            let equal = match (left.parse::<f64>(), right.parse::<f64>()) {
                (Ok(l), Ok(r)) => (l - r).abs() < f64::EPSILON,
                _ => left == right,
            };
            return Ok(if &caps[2] == "==" { equal } else { !equal });
        }
        match Self::operand(expr, term, vars)?.as_str() {
            "true" => Ok(true),
            "false" | "" => Ok(false),
            other => Err(invalid(expr, format!("{other:?} is not a boolean"))),
        }
    }
}

impl ExpressionEvaluator for SimpleExpression {
    fn evaluate(&self, expr: &str, vars: &HashMap<String, String>) -> Result<bool> {
        if expr.trim().is_empty() {
            return Err(invalid(expr, "empty expression"));
        }
        for alternative in expr.split("||") {
            let mut all = true;
            for term in alternative.split("&&") {
                if !Self::term(expr, term, vars)? {
                    all = false;
                }
            }
            if all {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

fn invalid(expr: &str, reason: impl Into<String>) -> ReconcileError {
    ReconcileError::Expression {
        expr: expr.to_string(),
        reason: reason.into(),
    }
}
