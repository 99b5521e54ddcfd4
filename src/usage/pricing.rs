//! Pricing calculation for Claude models

use serde::Serialize;

use crate::usage::models::TokenCounts;

/// Pricing per million tokens (USD)
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ModelPricing {
    pub input: f64,
    pub output: f64,
    pub cache_creation: f64,
    pub cache_read: f64,
}

impl ModelPricing {
    pub const fn new(input: f64, output: f64, cache_creation: f64, cache_read: f64) -> Self {
        Self {
            input,
            output,
            cache_creation,
            cache_read,
        }
    }

    /// Cost of the given tokens at these rates, unrounded
    pub fn cost(&self, tokens: &TokenCounts) -> f64 {
        tokens.input_tokens as f64 * (self.input / 1_000_000.0)
            + tokens.output_tokens as f64 * (self.output / 1_000_000.0)
            + tokens.cache_creation_tokens as f64 * (self.cache_creation / 1_000_000.0)
            + tokens.cache_read_tokens as f64 * (self.cache_read / 1_000_000.0)
    }
}

/// A model family recognised by a substring of the lowercased model name
#[derive(Debug, Clone, PartialEq)]
pub struct ModelFamily {
    pub name: &'static str,
    pub pricing: ModelPricing,
}

pub const OPUS_PRICING: ModelPricing = ModelPricing::new(15.0, 75.0, 18.75, 1.5);
pub const SONNET_PRICING: ModelPricing = ModelPricing::new(3.0, 15.0, 3.75, 0.3);
pub const HAIKU_PRICING: ModelPricing = ModelPricing::new(0.8, 4.0, 1.0, 0.08);

/// Calculator for API costs based on token usage
///
/// Families are tested in order and the first one whose name occurs in the
/// lowercased model wins. Unknown models fall back to the default family.
#[derive(Debug, Clone)]
pub struct PricingCalculator {
    families: Vec<ModelFamily>,
    default_family: ModelFamily,
}

impl Default for PricingCalculator {
    fn default() -> Self {
        Self::new()
    }
}

impl PricingCalculator {
    pub fn new() -> Self {
        let sonnet = ModelFamily {
            name: "sonnet",
            pricing: SONNET_PRICING,
        };

        Self {
            families: vec![
                ModelFamily {
                    name: "opus",
                    pricing: OPUS_PRICING,
                },
                sonnet.clone(),
                ModelFamily {
                    name: "haiku",
                    pricing: HAIKU_PRICING,
                },
            ],
            default_family: sonnet,
        }
    }

    /// Build a calculator from an explicit ordered family table
    pub fn with_families(families: Vec<ModelFamily>, default_family: ModelFamily) -> Self {
        Self {
            families,
            default_family,
        }
    }

    /// Resolve the family used to price a model
    pub fn family_for(&self, model: &str) -> &ModelFamily {
        let model_lower = model.to_lowercase();
        self.families
            .iter()
            .find(|family| model_lower.contains(family.name))
            .unwrap_or(&self.default_family)
    }

    /// Calculate cost for token usage
    pub fn cost(&self, tokens: &TokenCounts, model: &str) -> f64 {
        self.family_for(model).pricing.cost(tokens)
    }
}
