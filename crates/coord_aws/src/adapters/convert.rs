//! Conversions between store values and DynamoDB attribute values.

use std::collections::{BTreeMap, HashMap};

use aws_sdk_dynamodb::types::AttributeValue;
use coord_core::store::{AttrValue, Item, ItemKey};

pub fn to_attribute_value(value: &AttrValue) -> AttributeValue {
    match value {
        AttrValue::S(text) => AttributeValue::S(text.clone()),
        AttrValue::N(number) => AttributeValue::N(number.to_string()),
    }
}

/// `None` for attribute types the store model does not carry (sets, maps,
/// binary, non-integer numbers).
pub fn from_attribute_value(value: &AttributeValue) -> Option<AttrValue> {
    match value {
        AttributeValue::S(text) => Some(AttrValue::S(text.clone())),
        AttributeValue::N(number) => number.parse().ok().map(AttrValue::N),
        _ => None,
    }
}

pub fn to_sdk_item(item: &Item) -> HashMap<String, AttributeValue> {
    item.iter()
        .map(|(name, value)| (name.clone(), to_attribute_value(value)))
        .collect()
}

pub fn to_sdk_key(key: &ItemKey) -> HashMap<String, AttributeValue> {
    to_sdk_item(&key.to_item())
}

pub fn from_sdk_item(item: &HashMap<String, AttributeValue>) -> Item {
    let mut converted = BTreeMap::new();
    for (name, value) in item {
        match from_attribute_value(value) {
            Some(value) => {
                converted.insert(name.clone(), value);
            }
            None => tracing::debug!(attribute = %name, "skipping attribute with unsupported type"),
        }
    }
    converted
}

pub fn to_sdk_values(values: &BTreeMap<String, AttrValue>) -> Option<HashMap<String, AttributeValue>> {
    if values.is_empty() {
        return None;
    }
    Some(
        values
            .iter()
            .map(|(placeholder, value)| (placeholder.clone(), to_attribute_value(value)))
            .collect(),
    )
}

pub fn to_sdk_names(names: &BTreeMap<String, String>) -> Option<HashMap<String, String>> {
    if names.is_empty() {
        return None;
    }
    Some(names.clone().into_iter().collect())
}
