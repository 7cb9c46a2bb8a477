use std::env;
use std::path::PathBuf;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::session::Resolution;

const DEFAULT_PRICING_JSON: &str = include_str!("../resources/default_pricing.json");

/// Token counts reported by the generation client for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

/// Running metered totals for one wizard session. Monotone between resets.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionCosts {
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub image_count: u64,
    pub estimated_cost_usd: f64,
}

/// USD rates for metered usage. Token rates are quoted per million tokens;
/// image generation is a flat fee per resolution tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingTable {
    pub input_usd_per_1m_tokens: f64,
    pub output_usd_per_1m_tokens: f64,
    pub image_usd_by_resolution: IndexMap<Resolution, f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct PricingOverlay {
    input_usd_per_1m_tokens: Option<f64>,
    output_usd_per_1m_tokens: Option<f64>,
    #[serde(default)]
    image_usd_by_resolution: IndexMap<Resolution, f64>,
}

impl PricingTable {
    pub fn builtin() -> Self {
        serde_json::from_str(DEFAULT_PRICING_JSON).unwrap_or_else(|_| Self {
            input_usd_per_1m_tokens: 2.0,
            output_usd_per_1m_tokens: 8.0,
            image_usd_by_resolution: IndexMap::from([
                (Resolution::OneK, 0.13),
                (Resolution::TwoK, 0.13),
                (Resolution::FourK, 0.24),
            ]),
        })
    }

    pub fn input_usd_per_token(&self) -> f64 {
        self.input_usd_per_1m_tokens / 1_000_000.0
    }

    pub fn output_usd_per_token(&self) -> f64 {
        self.output_usd_per_1m_tokens / 1_000_000.0
    }

    pub fn image_usd(&self, resolution: Resolution) -> f64 {
        self.image_usd_by_resolution
            .get(&resolution)
            .copied()
            .unwrap_or(0.0)
    }

    fn apply_overlay(&mut self, overlay: PricingOverlay) {
        if let Some(rate) = overlay.input_usd_per_1m_tokens {
            self.input_usd_per_1m_tokens = rate;
        }
        if let Some(rate) = overlay.output_usd_per_1m_tokens {
            self.output_usd_per_1m_tokens = rate;
        }
        for (resolution, fee) in overlay.image_usd_by_resolution {
            self.image_usd_by_resolution.insert(resolution, fee);
        }
    }
}

/// Builtin rates merged with any user overrides from
/// `~/.vitrine/pricing_overrides.json`. Unreadable or malformed overrides
/// are ignored.
pub fn load_pricing() -> PricingTable {
    let mut pricing = PricingTable::builtin();
    if let Some(path) = pricing_override_path() {
        if let Ok(raw) = std::fs::read_to_string(path) {
            if let Ok(overlay) = serde_json::from_str::<PricingOverlay>(&raw) {
                pricing.apply_overlay(overlay);
            }
        }
    }
    pricing
}

fn pricing_override_path() -> Option<PathBuf> {
    env::var_os("HOME")
        .map(PathBuf::from)
        .map(|home| home.join(".vitrine").join("pricing_overrides.json"))
}

/// Folds one usage event into the running totals and re-quotes the estimate.
///
/// The per-image component is priced at `resolution` for the entire image
/// count, i.e. the session's current resolution setting, not the resolution
/// each historical image was generated at. That mirrors the product's
/// original accounting and is kept deliberately.
pub fn apply_usage(
    costs: &SessionCosts,
    usage: &TokenUsage,
    resolution: Resolution,
    pricing: &PricingTable,
) -> SessionCosts {
    let total_input_tokens = costs.total_input_tokens + usage.input_tokens;
    let total_output_tokens = costs.total_output_tokens + usage.output_tokens;
    let image_count = costs.image_count + 1;

    let token_cost = total_input_tokens as f64 * pricing.input_usd_per_token()
        + total_output_tokens as f64 * pricing.output_usd_per_token();
    let image_cost = image_count as f64 * pricing.image_usd(resolution);

    SessionCosts {
        total_input_tokens,
        total_output_tokens,
        image_count,
        estimated_cost_usd: token_cost + image_cost,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f64 = 1e-12;

    fn usage(input: u64, output: u64) -> TokenUsage {
        TokenUsage {
            input_tokens: input,
            output_tokens: output,
            total_tokens: input + output,
        }
    }

    #[test]
    fn builtin_table_parses_the_embedded_rates() {
        let pricing = PricingTable::builtin();
        assert!((pricing.input_usd_per_1m_tokens - 2.0).abs() < EPSILON);
        assert!((pricing.output_usd_per_1m_tokens - 8.0).abs() < EPSILON);
        assert!((pricing.image_usd(Resolution::OneK) - 0.13).abs() < EPSILON);
        assert!((pricing.image_usd(Resolution::TwoK) - 0.13).abs() < EPSILON);
        assert!((pricing.image_usd(Resolution::FourK) - 0.24).abs() < EPSILON);
    }

    #[test]
    fn one_event_quotes_tokens_plus_flat_image_fee() {
        let pricing = PricingTable::builtin();
        let costs = apply_usage(
            &SessionCosts::default(),
            &usage(1000, 500),
            Resolution::OneK,
            &pricing,
        );

        assert_eq!(costs.total_input_tokens, 1000);
        assert_eq!(costs.total_output_tokens, 500);
        assert_eq!(costs.image_count, 1);
        let expected = 1000.0 * pricing.input_usd_per_token()
            + 500.0 * pricing.output_usd_per_token()
            + pricing.image_usd(Resolution::OneK);
        assert!((costs.estimated_cost_usd - expected).abs() < EPSILON);
    }

    #[test]
    fn second_event_doubles_counts_and_requotes() {
        let pricing = PricingTable::builtin();
        let once = apply_usage(
            &SessionCosts::default(),
            &usage(1000, 500),
            Resolution::OneK,
            &pricing,
        );
        let twice = apply_usage(&once, &usage(1000, 500), Resolution::OneK, &pricing);

        assert_eq!(twice.total_input_tokens, 2000);
        assert_eq!(twice.total_output_tokens, 1000);
        assert_eq!(twice.image_count, 2);
        let expected = 2000.0 * pricing.input_usd_per_token()
            + 1000.0 * pricing.output_usd_per_token()
            + 2.0 * pricing.image_usd(Resolution::OneK);
        assert!((twice.estimated_cost_usd - expected).abs() < EPSILON);
    }

    #[test]
    fn current_resolution_reprices_the_whole_image_count() {
        // The fee tier in force at update time applies to every image
        // generated so far, including ones produced under another tier.
        let pricing = PricingTable::builtin();
        let first = apply_usage(
            &SessionCosts::default(),
            &usage(100, 100),
            Resolution::OneK,
            &pricing,
        );
        let second = apply_usage(&first, &usage(100, 100), Resolution::FourK, &pricing);

        let expected = 200.0 * pricing.input_usd_per_token()
            + 200.0 * pricing.output_usd_per_token()
            + 2.0 * pricing.image_usd(Resolution::FourK);
        assert!((second.estimated_cost_usd - expected).abs() < EPSILON);
    }
}
