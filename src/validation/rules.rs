use validator::Validate;

use crate::{
    domain::models::ItemType,
    services::{errors::ServiceError, requests::ItemInput},
};

/// Line item after field-level and type-conditional checks, with text trimmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedItem {
    pub item_type: ItemType,
    pub item_name: String,
    pub quantity: Option<i32>,
    pub unit: Option<String>,
    pub price_per_unit: i64,
    pub note: Option<String>,
}

pub fn validate_request_name(name: &str) -> Result<String, ServiceError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ServiceError::Validation(
            "purchase request name is required".into(),
        ));
    }
    Ok(trimmed.to_string())
}

pub fn normalize_description(description: Option<&str>) -> Option<String> {
    description
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

pub fn validate_items(items: &[ItemInput]) -> Result<Vec<ValidatedItem>, ServiceError> {
    if items.is_empty() {
        return Err(ServiceError::Validation(
            "purchase request needs at least one item".into(),
        ));
    }
    items
        .iter()
        .enumerate()
        .map(|(index, item)| validate_item(index, item))
        .collect()
}

pub fn validate_item(index: usize, item: &ItemInput) -> Result<ValidatedItem, ServiceError> {
    item.validate()
        .map_err(|err| ServiceError::Validation(format!("item {}: {err}", index + 1)))?;

    let item_name = item.item_name.trim();
    if item_name.is_empty() {
        return Err(item_error(index, "item_name is required"));
    }
    let unit = non_blank(item.unit.as_deref());
    let note = non_blank(item.note.as_deref());

    if let Some(quantity) = item.quantity {
        if quantity <= 0 {
            return Err(item_error(index, "quantity must be greater than zero"));
        }
    }

    match item.item_type {
        ItemType::Goods => {
            if item.quantity.is_none() {
                return Err(item_error(index, "goods require a quantity"));
            }
            if unit.is_none() {
                return Err(item_error(index, "goods require a unit"));
            }
        }
        ItemType::Service => {
            if note.is_none() {
                return Err(item_error(index, "services require a note"));
            }
        }
    }

    Ok(ValidatedItem {
        item_type: item.item_type,
        item_name: item_name.to_string(),
        quantity: item.quantity,
        unit,
        price_per_unit: item.price_per_unit,
        note,
    })
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn item_error(index: usize, message: &str) -> ServiceError {
    ServiceError::Validation(format!("item {}: {message}", index + 1))
}
