use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Storage-assigned document id of a product.
pub type StorageId = i64;

/// One nutrient line, in the order the product page lists them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Nutrient {
    pub name: String,
    pub value: String,
    pub unit: String,
    #[serde(default)]
    pub parent_code: String,
}

/// Reference quantity the nutrient values are expressed against (e.g. 100 g).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NutrientBase {
    pub unit: String,
    pub value: String,
}

/// Descriptive product fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProductAttributes {
    pub name: String,
    pub brand: String,
    pub price: String,
    pub base_unit_price: String,
    pub image_url: String,
    pub ingredients: String,
    pub allergens: String,
    pub percentage_alcohol: String,
    pub composition: String,
    pub nutrients_base: NutrientBase,
}

/// Normalized result of a successful product fetch. `key` is unique in storage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductRecord {
    pub key: String,
    pub attributes: ProductAttributes,
    pub nutrients: Vec<Nutrient>,
    pub fetched_at: DateTime<Utc>,
}

impl ProductRecord {
    pub fn new(key: impl Into<String>, attributes: ProductAttributes, nutrients: Vec<Nutrient>) -> Self {
        Self {
            key: key.into(),
            attributes,
            nutrients,
            fetched_at: Utc::now(),
        }
    }
}
