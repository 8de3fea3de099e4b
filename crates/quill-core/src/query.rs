use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::claims::{navigate_value, stringify};
use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CriterionOperator {
    Eq,
    Neq,
    In,
    Contains,
}

impl fmt::Display for CriterionOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eq => write!(f, "="),
            Self::Neq => write!(f, "!="),
            Self::In => write!(f, "in"),
            Self::Contains => write!(f, "contains"),
        }
    }
}

impl FromStr for CriterionOperator {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "=" | "eq" => Ok(Self::Eq),
            "!=" | "neq" => Ok(Self::Neq),
            "in" => Ok(Self::In),
            "contains" => Ok(Self::Contains),
            other => Err(CoreError::Validation(format!("unsupported criterion operator '{other}'"))),
        }
    }
}

/// One filter condition: `<path> <operator> <value>`, evaluated against the
/// JSON form of a stored object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Criterion {
    pub operand_left: String,
    pub operator: CriterionOperator,
    pub operand_right: Value,
}

impl Criterion {
    pub fn new(operand_left: impl Into<String>, operator: CriterionOperator, operand_right: impl Into<Value>) -> Self {
        Self {
            operand_left: operand_left.into(),
            operator,
            operand_right: operand_right.into(),
        }
    }

    pub fn eq(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(path, CriterionOperator::Eq, value)
    }

    pub fn neq(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(path, CriterionOperator::Neq, value)
    }

    pub fn contains(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(path, CriterionOperator::Contains, value)
    }

    pub fn matches(&self, subject: &Value) -> bool {
        let actual = navigate_value(subject, &self.operand_left);
        match self.operator {
            CriterionOperator::Eq => actual.is_some_and(|a| loosely_equal(a, &self.operand_right)),
            CriterionOperator::Neq => !actual.is_some_and(|a| loosely_equal(a, &self.operand_right)),
            CriterionOperator::In => match (&self.operand_right, actual) {
                (Value::Array(options), Some(a)) => options.iter().any(|o| loosely_equal(a, o)),
                _ => false,
            },
            CriterionOperator::Contains => match actual {
                Some(Value::Array(items)) => items.iter().any(|i| loosely_equal(i, &self.operand_right)),
                Some(Value::String(s)) => s.contains(&stringify(&self.operand_right)),
                _ => false,
            },
        }
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.operand_left, self.operator, self.operand_right)
    }
}

fn loosely_equal(a: &Value, b: &Value) -> bool {
    a == b || stringify(a) == stringify(b)
}

/// A conjunction of criteria plus paging.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuerySpec {
    #[serde(default)]
    pub filter: Vec<Criterion>,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl QuerySpec {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn new(filter: Vec<Criterion>) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    pub fn with_criterion(mut self, criterion: Criterion) -> Self {
        self.filter.push(criterion);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn matches(&self, subject: &Value) -> bool {
        self.filter.iter().all(|c| c.matches(subject))
    }

    /// Apply offset and limit to an already-filtered sequence.
    pub fn page<T>(&self, items: impl IntoIterator<Item = T>) -> Vec<T> {
        let iter = items.into_iter().skip(self.offset);
        match self.limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        }
    }
}
