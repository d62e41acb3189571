//! Typed data carried between saga steps.

use std::collections::BTreeMap;

use domain::{CreditDecision, CreditRecord, Money};
use serde::{Deserialize, Serialize};

use crate::error::StepError;

/// Context key the executor fills with the id of the running instance.
pub const INSTANCE_ID_KEY: &str = "instance_id";

/// A single value stored in a [`SagaContext`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum ContextValue {
    Bool(bool),
    Integer(i64),
    Decimal(f64),
    Text(String),
    Money(Money),
    TextList(Vec<String>),
    Credit(CreditRecord),
    Decision(CreditDecision),
}

impl ContextValue {
    /// Returns the variant name, used in type mismatch errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            ContextValue::Bool(_) => "Bool",
            ContextValue::Integer(_) => "Integer",
            ContextValue::Decimal(_) => "Decimal",
            ContextValue::Text(_) => "Text",
            ContextValue::Money(_) => "Money",
            ContextValue::TextList(_) => "TextList",
            ContextValue::Credit(_) => "Credit",
            ContextValue::Decision(_) => "Decision",
        }
    }
}

impl From<bool> for ContextValue {
    fn from(value: bool) -> Self {
        ContextValue::Bool(value)
    }
}

impl From<i64> for ContextValue {
    fn from(value: i64) -> Self {
        ContextValue::Integer(value)
    }
}

impl From<f64> for ContextValue {
    fn from(value: f64) -> Self {
        ContextValue::Decimal(value)
    }
}

impl From<&str> for ContextValue {
    fn from(value: &str) -> Self {
        ContextValue::Text(value.to_string())
    }
}

impl From<String> for ContextValue {
    fn from(value: String) -> Self {
        ContextValue::Text(value)
    }
}

impl From<Money> for ContextValue {
    fn from(value: Money) -> Self {
        ContextValue::Money(value)
    }
}

impl From<Vec<String>> for ContextValue {
    fn from(value: Vec<String>) -> Self {
        ContextValue::TextList(value)
    }
}

impl From<CreditRecord> for ContextValue {
    fn from(value: CreditRecord) -> Self {
        ContextValue::Credit(value)
    }
}

impl From<CreditDecision> for ContextValue {
    fn from(value: CreditDecision) -> Self {
        ContextValue::Decision(value)
    }
}

/// Key/value data accumulated by a saga instance.
///
/// Step outputs use the same type and are merged into the instance context
/// on success, later keys overwriting earlier ones. Typed getters fail with
/// a permanent [`StepError`], since a missing or mistyped key means the
/// request or the definition is wrong and retrying cannot fix it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SagaContext {
    values: BTreeMap<String, ContextValue>,
}

macro_rules! typed_getter {
    ($name:ident, $variant:ident, $ty:ty) => {
        pub fn $name(&self, key: &str) -> Result<$ty, StepError> {
            match self.require(key)? {
                ContextValue::$variant(v) => Ok(v.clone()),
                other => Err(Self::mismatch(key, stringify!($variant), other)),
            }
        }
    };
}

impl SagaContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ContextValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ContextValue>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&ContextValue> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ContextValue)> {
        self.values.iter()
    }

    /// Copies every entry of `output` into this context.
    pub fn merge(&mut self, output: &SagaContext) {
        for (key, value) in &output.values {
            self.values.insert(key.clone(), value.clone());
        }
    }

    /// Returns the value for `key` or a permanent error naming the key.
    pub fn require(&self, key: &str) -> Result<&ContextValue, StepError> {
        self.values
            .get(key)
            .ok_or_else(|| StepError::permanent(format!("context key '{key}' is missing")))
    }

    typed_getter!(get_bool, Bool, bool);
    typed_getter!(get_integer, Integer, i64);
    typed_getter!(get_decimal, Decimal, f64);
    typed_getter!(get_text, Text, String);
    typed_getter!(get_money, Money, Money);
    typed_getter!(get_text_list, TextList, Vec<String>);
    typed_getter!(get_credit, Credit, CreditRecord);
    typed_getter!(get_decision, Decision, CreditDecision);

    fn mismatch(key: &str, expected: &str, found: &ContextValue) -> StepError {
        StepError::permanent(format!(
            "context key '{key}' holds {}, expected {expected}",
            found.type_name()
        ))
    }
}

impl FromIterator<(String, ContextValue)> for SagaContext {
    fn from_iter<I: IntoIterator<Item = (String, ContextValue)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}
