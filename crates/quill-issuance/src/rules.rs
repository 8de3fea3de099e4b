use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use quill_core::claims::{self, Claims};
use quill_core::{CoreError, RuleDefinition};
use serde_json::Value;

/// Rule building and evaluation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuleError {
    #[error("no rule factory registered for type '{0}'")]
    UnknownRuleType(String),

    #[error("unknown operator '{0}'")]
    UnknownOperator(String),

    #[error("invalid rule configuration: {0}")]
    InvalidConfiguration(String),

    #[error("rule not satisfied: {0}")]
    NotSatisfied(String),
}

impl From<RuleError> for CoreError {
    fn from(err: RuleError) -> Self {
        match err {
            RuleError::NotSatisfied(_) => CoreError::Unauthorized(err.to_string()),
            _ => CoreError::Configuration(err.to_string()),
        }
    }
}

/// A built rule, ready to run against a claim set.
pub trait CredentialRule: Send + Sync + fmt::Debug {
    fn evaluate(&self, claims: &Claims) -> Result<(), RuleError>;
}

/// Builds rules of one type from their JSON configuration.
pub trait CredentialRuleFactory: Send + Sync {
    fn create(&self, configuration: &Value) -> Result<Box<dyn CredentialRule>, RuleError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Neq,
    Gt,
    Geq,
    Lt,
    Leq,
}

impl Operator {
    fn is_ordering(self) -> bool {
        !matches!(self, Self::Eq | Self::Neq)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Eq => "EQ",
            Self::Neq => "NEQ",
            Self::Gt => "GT",
            Self::Geq => "GEQ",
            Self::Lt => "LT",
            Self::Leq => "LEQ",
        };
        f.write_str(s)
    }
}

impl FromStr for Operator {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "EQ" | "=" | "==" => Ok(Self::Eq),
            "NEQ" | "!=" => Ok(Self::Neq),
            "GT" | ">" => Ok(Self::Gt),
            "GEQ" | ">=" => Ok(Self::Geq),
            "LT" | "<" => Ok(Self::Lt),
            "LEQ" | "<=" => Ok(Self::Leq),
            _ => Err(RuleError::UnknownOperator(s.to_string())),
        }
    }
}

/// Compares the claim at a dotted path against a configured value.
///
/// EQ and NEQ compare string forms. The ordering operators need an integer
/// claim and an integer configured value; anything else fails the rule.
#[derive(Debug)]
pub struct ExpressionRule {
    path: String,
    operator: Operator,
    value: Value,
    bound: Option<i64>,
}

impl ExpressionRule {
    pub fn new(path: impl Into<String>, operator: Operator, value: Value) -> Result<Self, RuleError> {
        let path = path.into();
        if path.trim().is_empty() {
            return Err(RuleError::InvalidConfiguration("claim path must not be empty".into()));
        }
        let bound = match &value {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        };
        Ok(Self {
            path,
            operator,
            value,
            bound,
        })
    }

    fn not_satisfied(&self, actual: &Value) -> RuleError {
        RuleError::NotSatisfied(format!(
            "'{}' {} {} does not hold for value {}",
            self.path, self.operator, self.value, actual
        ))
    }
}

impl CredentialRule for ExpressionRule {
    fn evaluate(&self, claims: &Claims) -> Result<(), RuleError> {
        let actual = claims::navigate(claims, &self.path)
            .ok_or_else(|| RuleError::NotSatisfied(format!("claim '{}' not found", self.path)))?;

        let holds = if self.operator.is_ordering() {
            let (Some(bound), Some(actual)) = (self.bound, actual.as_i64()) else {
                return Err(RuleError::NotSatisfied(format!(
                    "'{}' {} {} needs integer operands, got {}",
                    self.path, self.operator, self.value, actual
                )));
            };
            match self.operator {
                Operator::Gt => actual > bound,
                Operator::Geq => actual >= bound,
                Operator::Lt => actual < bound,
                _ => actual <= bound,
            }
        } else {
            let equal = claims::stringify(actual) == claims::stringify(&self.value);
            equal == (self.operator == Operator::Eq)
        };

        if holds {
            Ok(())
        } else {
            Err(self.not_satisfied(actual))
        }
    }
}

/// Builds `expression` rules from `{"claim", "operator", "value"}`.
pub struct ExpressionRuleFactory;

impl ExpressionRuleFactory {
    pub const TYPE: &'static str = "expression";
}

impl CredentialRuleFactory for ExpressionRuleFactory {
    fn create(&self, configuration: &Value) -> Result<Box<dyn CredentialRule>, RuleError> {
        let path = configuration
            .get("claim")
            .and_then(Value::as_str)
            .ok_or_else(|| RuleError::InvalidConfiguration("'claim' must be a string".into()))?;
        let operator: Operator = configuration
            .get("operator")
            .and_then(Value::as_str)
            .ok_or_else(|| RuleError::InvalidConfiguration("'operator' must be a string".into()))?
            .parse()?;
        let value = configuration
            .get("value")
            .cloned()
            .ok_or_else(|| RuleError::InvalidConfiguration("'value' is required".into()))?;
        Ok(Box::new(ExpressionRule::new(path, operator, value)?))
    }
}

/// Builds rules by type and evaluates a definition's rules against claims.
pub struct RuleEngine {
    factories: HashMap<String, Arc<dyn CredentialRuleFactory>>,
}

impl RuleEngine {
    /// An engine with no rule types registered.
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register(&mut self, rule_type: impl Into<String>, factory: Arc<dyn CredentialRuleFactory>) {
        self.factories.insert(rule_type.into(), factory);
    }

    pub fn build(&self, definition: &RuleDefinition) -> Result<Box<dyn CredentialRule>, RuleError> {
        self.factories
            .get(&definition.rule_type)
            .ok_or_else(|| RuleError::UnknownRuleType(definition.rule_type.clone()))?
            .create(&definition.configuration)
    }

    /// All rules must pass. Every rule is built before any is evaluated, so a
    /// misconfigured rule is reported even when an earlier one would fail.
    pub fn evaluate(&self, rules: &[RuleDefinition], claims: &Claims) -> Result<(), RuleError> {
        let built = rules.iter().map(|r| self.build(r)).collect::<Result<Vec<_>, _>>()?;
        for rule in &built {
            if let Err(err) = rule.evaluate(claims) {
                tracing::debug!(rule = ?rule, error = %err, "rule rejected claims");
                return Err(err);
            }
        }
        Ok(())
    }
}

impl Default for RuleEngine {
    fn default() -> Self {
        let mut engine = Self::empty();
        engine.register(ExpressionRuleFactory::TYPE, Arc::new(ExpressionRuleFactory));
        engine
    }
}
