//! Test fixtures: sitemap documents and product-details payloads

#![allow(dead_code)]

use serde_json::{json, Value};

/// A product listed in a fixture sitemap
#[derive(Debug, Clone)]
pub struct ProductFixture {
    pub sku: &'static str,
    pub slug: &'static str,
    pub name: &'static str,
    pub price: &'static str,
}

pub const PRODUCTS: &[ProductFixture] = &[
    ProductFixture {
        sku: "553975",
        slug: "plus-boerentrots-bbq-worst-tuinkruiden-krimp-280-g",
        name: "PLUS Boerentrots BBQ worst tuinkruiden",
        price: "3.49",
    },
    ProductFixture {
        sku: "100231",
        slug: "plus-halfvolle-melk-1-l",
        name: "PLUS Halfvolle melk",
        price: "1.19",
    },
    ProductFixture {
        sku: "214408",
        slug: "plus-jonge-kaas-48-plakken-190-g",
        name: "PLUS Jonge kaas 48+ plakken",
        price: "2.79",
    },
    ProductFixture {
        sku: "887120",
        slug: "plus-volkoren-brood-heel-800-g",
        name: "PLUS Volkoren brood heel",
        price: "2.15",
    },
];

impl ProductFixture {
    pub fn locator(&self) -> String {
        format!("https://www.plus.nl/product/{}-{}", self.slug, self.sku)
    }
}

/// Sitemap document listing `products` in order
pub fn sitemap_xml(products: &[ProductFixture]) -> String {
    let mut xml = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<urlset xmlns=\"http://www.sitemaps.org/schemas/sitemap/0.9\">\n",
    );
    for product in products {
        xml.push_str(&format!(
            "  <url><loc>{}</loc><lastmod>2025-04-24T01:00:15+00:00</lastmod></url>\n",
            product.locator()
        ));
    }
    xml.push_str("</urlset>\n");
    xml
}

/// Successful product-details response
pub fn product_payload(sku: &str, name: &str, price: &str) -> Value {
    json!({
        "versionInfo": { "hasModuleVersionChanged": false, "hasApiVersionChanged": false },
        "data": {
            "SKU": sku,
            "ImageURL": format!("https://images.plus.nl/{sku}.png"),
            "ProductOut": {
                "Overview": {
                    "Name": name,
                    "Brand": "PLUS",
                    "Price": price,
                    "BaseUnitPrice": ""
                },
                "Ingredients": "",
                "Allergen": { "Description": "" },
                "PercentageOfAlcohol": "",
                "Composition": "",
                "Nutrient": {
                    "Base": { "UoM": "g", "Value": 100 },
                    "Nutrients": {
                        "List": [
                            { "Description": "Energie", "ParentCode": "", "QuantityContained": { "Value": "250", "UoM": "kJ" } },
                            { "Description": "Vet", "ParentCode": "", "QuantityContained": { "Value": 1.5, "UoM": "g" } }
                        ]
                    }
                }
            }
        }
    })
}

/// Response the API gives for a stale session: no `data` field
pub fn error_payload() -> Value {
    json!({
        "exception": {
            "name": "ServerException",
            "specificType": "OutSystems.RESTService.ErrorHandling.ExposeRestException",
            "message": "Invalid CSRF token"
        }
    })
}
