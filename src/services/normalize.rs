//! Turns a product-details payload into a [`ProductRecord`].

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::models::product::{Nutrient, NutrientBase, ProductAttributes, ProductRecord};

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("Payload has no data field")]
    MissingData,

    #[error("Payload does not match the product schema: {0}")]
    Schema(#[from] serde_json::Error),

    #[error("Payload carries no product key")]
    MissingKey,
}

/// Accept a JSON string or number (or nothing) and keep it as text.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ProductData {
    #[serde(rename = "SKU", deserialize_with = "string_or_number")]
    sku: String,
    #[serde(rename = "ImageURL", deserialize_with = "string_or_number")]
    image_url: String,
    product_out: ProductOut,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ProductOut {
    overview: Overview,
    nutrient: NutrientSection,
    #[serde(deserialize_with = "string_or_number")]
    ingredients: String,
    allergen: Allergen,
    #[serde(deserialize_with = "string_or_number")]
    percentage_of_alcohol: String,
    #[serde(deserialize_with = "string_or_number")]
    composition: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct Overview {
    #[serde(deserialize_with = "string_or_number")]
    name: String,
    #[serde(deserialize_with = "string_or_number")]
    brand: String,
    #[serde(deserialize_with = "string_or_number")]
    price: String,
    #[serde(deserialize_with = "string_or_number")]
    base_unit_price: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct Allergen {
    #[serde(deserialize_with = "string_or_number")]
    description: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct NutrientSection {
    base: Quantity,
    nutrients: NutrientList,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NutrientList {
    #[serde(rename = "List")]
    list: Vec<NutrientEntry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct NutrientEntry {
    #[serde(deserialize_with = "string_or_number")]
    description: String,
    #[serde(deserialize_with = "string_or_number")]
    parent_code: String,
    quantity_contained: Quantity,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Quantity {
    #[serde(rename = "UoM", deserialize_with = "string_or_number")]
    unit: String,
    #[serde(rename = "Value", deserialize_with = "string_or_number")]
    value: String,
}

/// Build a record from a raw payload. The record is keyed by the requested
/// `identifier`; the payload SKU is used only when the identifier is blank.
pub fn normalize(identifier: &str, payload: &Value) -> Result<ProductRecord, NormalizeError> {
    let data = match payload.get("data") {
        Some(Value::Null) | None => return Err(NormalizeError::MissingData),
        Some(data) => data,
    };

    let data = ProductData::deserialize(data)?;
    let identifier = identifier.trim();
    let sku = data.sku.trim();
    let key = if identifier.is_empty() { sku } else { identifier };
    if key.is_empty() {
        return Err(NormalizeError::MissingKey);
    }
    if !sku.is_empty() && sku != key {
        tracing::warn!(sku = %key, payload_sku = %sku, "Payload SKU differs from requested identifier");
    }
    let key = key.to_string();

    let out = data.product_out;
    let nutrients = out
        .nutrient
        .nutrients
        .list
        .into_iter()
        .map(|n| Nutrient {
            name: n.description,
            value: if n.quantity_contained.value.is_empty() {
                "0".to_string()
            } else {
                n.quantity_contained.value
            },
            unit: n.quantity_contained.unit,
            parent_code: n.parent_code,
        })
        .collect();

    let attributes = ProductAttributes {
        name: out.overview.name,
        brand: out.overview.brand,
        price: if out.overview.price.is_empty() {
            "0".to_string()
        } else {
            out.overview.price
        },
        base_unit_price: out.overview.base_unit_price,
        image_url: data.image_url,
        ingredients: out.ingredients,
        allergens: out.allergen.description,
        percentage_alcohol: out.percentage_of_alcohol,
        composition: out.composition,
        nutrients_base: NutrientBase {
            unit: out.nutrient.base.unit,
            value: out.nutrient.base.value,
        },
    };

    Ok(ProductRecord::new(key, attributes, nutrients))
}
