//! Read-only product context used to seed the agent's system instructions.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductContext {
    pub name: String,
    pub url: String,
    /// Human label -> selector learned while crawling the product.
    #[serde(default)]
    pub element_map: BTreeMap<String, String>,
    #[serde(default)]
    pub demo_script: Vec<String>,
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_language() -> String {
    "en".to_string()
}

/// Narrow read interface onto the session/product registry.
#[async_trait]
pub trait ProductRegistry: Send + Sync {
    async fn get(&self, product_id: &str) -> Option<ProductContext>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryProductRegistry {
    products: HashMap<String, ProductContext>,
}

impl InMemoryProductRegistry {
    pub fn new(products: HashMap<String, ProductContext>) -> Self {
        Self { products }
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }
}

#[async_trait]
impl ProductRegistry for InMemoryProductRegistry {
    async fn get(&self, product_id: &str) -> Option<ProductContext> {
        self.products.get(product_id).cloned()
    }
}

const BASE_INSTRUCTIONS: &str = "You are Aura, a friendly AI sales agent giving a live product demo. \
You can see the browser through periodic screenshots and control it with the browser_action tool. \
Narrate what you are doing, keep answers short, and never read personal data aloud.";

/// Build the session-level system instructions, optionally grounded in a product.
pub fn build_instructions(product: Option<&ProductContext>) -> String {
    let Some(product) = product else {
        return BASE_INSTRUCTIONS.to_string();
    };

    let mut out = String::from(BASE_INSTRUCTIONS);
    out.push_str(&format!(
        "\n\nProduct: {} ({}). Speak in language '{}'.",
        product.name, product.url, product.language
    ));

    if !product.element_map.is_empty() {
        out.push_str("\nKnown elements (label -> selector):");
        for (label, selector) in &product.element_map {
            out.push_str(&format!("\n- {} -> {}", label, selector));
        }
    }

    if !product.demo_script.is_empty() {
        out.push_str("\nSuggested demo flow:");
        for (i, step) in product.demo_script.iter().enumerate() {
            out.push_str(&format!("\n{}. {}", i + 1, step));
        }
    }

    out
}
