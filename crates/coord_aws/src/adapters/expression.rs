//! Renders store conditions and updates as DynamoDB expression strings.
//!
//! Attribute names always go through `#n<i>` placeholders (so reserved words
//! such as `timeout` and `ttl` need no special casing) and values through
//! `:v<i>` placeholders. One builder is used per request so placeholders are
//! unique across the condition and the update expression.

use std::collections::{BTreeMap, HashMap};

use coord_core::store::{AttrValue, Condition, Update};

#[derive(Debug, Default)]
pub struct ExpressionBuilder {
    names: BTreeMap<String, String>,
    placeholder_by_name: HashMap<String, String>,
    values: BTreeMap<String, AttrValue>,
}

impl ExpressionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn condition(&mut self, condition: &Condition) -> String {
        match condition {
            Condition::AttributeNotExists(name) => {
                format!("attribute_not_exists({})", self.name(name))
            }
            Condition::AttributeExists(name) => format!("attribute_exists({})", self.name(name)),
            Condition::Equals(name, value) => {
                format!("{} = {}", self.name(name), self.value(value.clone()))
            }
            Condition::LessThan(name, value) => {
                format!("{} < {}", self.name(name), self.value(value.clone()))
            }
            Condition::And(left, right) => {
                format!("({} AND {})", self.condition(left), self.condition(right))
            }
            Condition::Or(left, right) => {
                format!("({} OR {})", self.condition(left), self.condition(right))
            }
        }
    }

    /// `SET` clause for `updates`; `None` when there is nothing to update.
    pub fn update(&mut self, updates: &[Update]) -> Option<String> {
        if updates.is_empty() {
            return None;
        }
        let clauses: Vec<String> = updates
            .iter()
            .map(|update| match update {
                Update::Set(name, value) => {
                    format!("{} = {}", self.name(name), self.value(value.clone()))
                }
                Update::Increment { name, by } => {
                    let name = self.name(name);
                    let zero = self.value(AttrValue::N(0));
                    let by = self.value(AttrValue::N(*by));
                    format!("{name} = if_not_exists({name}, {zero}) + {by}")
                }
            })
            .collect();
        Some(format!("SET {}", clauses.join(", ")))
    }

    /// Placeholder to attribute name.
    pub fn names(&self) -> &BTreeMap<String, String> {
        &self.names
    }

    /// Placeholder to value.
    pub fn values(&self) -> &BTreeMap<String, AttrValue> {
        &self.values
    }

    fn name(&mut self, name: &str) -> String {
        if let Some(placeholder) = self.placeholder_by_name.get(name) {
            return placeholder.clone();
        }
        let placeholder = format!("#n{}", self.names.len());
        self.names.insert(placeholder.clone(), name.to_string());
        self.placeholder_by_name
            .insert(name.to_string(), placeholder.clone());
        placeholder
    }

    fn value(&mut self, value: AttrValue) -> String {
        let placeholder = format!(":v{}", self.values.len());
        self.values.insert(placeholder.clone(), value);
        placeholder
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_acquire_condition_and_update_share_placeholders() {
        let mut builder = ExpressionBuilder::new();
        let condition = builder.condition(
            &Condition::not_exists("SK").or(Condition::lt("timeout", "2024-05-01T12:00:00")),
        );
        let update = builder
            .update(&[
                Update::set("transaction_id", "tx-1"),
                Update::set("timeout", "2024-05-01T12:00:05"),
            ])
            .expect("update expression");

        assert_eq!(condition, "(attribute_not_exists(#n0) OR #n1 < :v0)");
        assert_eq!(update, "SET #n2 = :v1, #n1 = :v2");
        assert_eq!(builder.names().get("#n1").map(String::as_str), Some("timeout"));
        assert_eq!(
            builder.values().get(":v2"),
            Some(&AttrValue::S("2024-05-01T12:00:05".to_string()))
        );
    }

    #[test]
    fn increment_defaults_missing_counter_to_zero() {
        let mut builder = ExpressionBuilder::new();
        let update = builder
            .update(&[Update::increment("counter", 3)])
            .expect("update expression");

        assert_eq!(update, "SET #n0 = if_not_exists(#n0, :v0) + :v1");
        assert_eq!(builder.values().get(":v0"), Some(&AttrValue::N(0)));
        assert_eq!(builder.values().get(":v1"), Some(&AttrValue::N(3)));
    }

    #[test]
    fn nested_conjunctions_are_parenthesized() {
        let mut builder = ExpressionBuilder::new();
        let condition = builder.condition(
            &Condition::not_exists("PK")
                .and(Condition::not_exists("SK"))
                .and(Condition::eq("transaction_id", "tx")),
        );

        assert_eq!(
            condition,
            "((attribute_not_exists(#n0) AND attribute_not_exists(#n1)) AND #n2 = :v0)"
        );
    }

    #[test]
    fn empty_update_list_renders_nothing() {
        let mut builder = ExpressionBuilder::new();
        assert!(builder.update(&[]).is_none());
        assert!(builder.names().is_empty());
    }
}
