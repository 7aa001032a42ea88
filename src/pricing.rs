use crate::error::RelayError;
use crate::urp::Usage;
use serde::Serialize;
use std::collections::HashMap;

/// nano-USD per token at a ratio of 1.0 (1 USD per 1M tokens).
const NANO_USD_PER_TOKEN_AT_UNIT_RATIO: f64 = 1_000.0;
const NANO_USD_PER_USD: f64 = 1_000_000_000.0;

/// Token ratios are USD per 1M tokens and `completion_ratio` multiplies
/// `input_ratio`. `image_price` is USD per image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ModelConfig {
    pub input_ratio: f64,
    pub completion_ratio: f64,
    pub cached_input_ratio: Option<f64>,
    pub image_price: Option<f64>,
}

impl ModelConfig {
    pub const fn tokens(input_ratio: f64, completion_ratio: f64) -> Self {
        Self {
            input_ratio,
            completion_ratio,
            cached_input_ratio: None,
            image_price: None,
        }
    }

    pub const fn with_cached_input(mut self, cached_input_ratio: f64) -> Self {
        self.cached_input_ratio = Some(cached_input_ratio);
        self
    }

    pub fn is_image(&self) -> bool {
        self.image_price.is_some()
    }

    pub const fn image(price: f64) -> Self {
        Self {
            input_ratio: 0.0,
            completion_ratio: 0.0,
            cached_input_ratio: None,
            image_price: Some(price),
        }
    }
}

/// One row of a vendor table. Aliases are separate rows sharing a `ModelConfig` constant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelSpec {
    pub name: &'static str,
    pub vendor_id: &'static str,
    pub config: ModelConfig,
}

pub const fn model(name: &'static str, vendor_id: &'static str, config: ModelConfig) -> ModelSpec {
    ModelSpec {
        name,
        vendor_id,
        config,
    }
}

/// Read-only after construction; shared by all requests without locking.
#[derive(Debug, Clone)]
pub struct ModelPricingTable {
    entries: HashMap<&'static str, ModelSpec>,
}

impl ModelPricingTable {
    pub fn new(specs: &[ModelSpec]) -> Self {
        Self {
            entries: specs.iter().map(|spec| (spec.name, *spec)).collect(),
        }
    }

    pub fn get(&self, model: &str) -> Result<&ModelSpec, RelayError> {
        self.entries
            .get(model)
            .ok_or_else(|| RelayError::UnknownModel(model.to_string()))
    }

    pub fn contains(&self, model: &str) -> bool {
        self.entries.contains_key(model)
    }

    pub fn vendor_id(&self, model: &str) -> Result<&'static str, RelayError> {
        self.get(model).map(|spec| spec.vendor_id)
    }

    pub fn models(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.entries.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn specs(&self) -> impl Iterator<Item = &ModelSpec> {
        self.entries.values()
    }

    pub fn price(&self, model: &str, usage: &Usage) -> Result<Charge, RelayError> {
        let spec = self.get(model)?;
        Ok(compute_charge(&spec.config, usage))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Charge {
    pub prompt_nano_usd: i128,
    pub cached_nano_usd: i128,
    pub completion_nano_usd: i128,
    pub image_nano_usd: i128,
    pub total_nano_usd: i128,
}

impl Charge {
    pub fn total_usd(&self) -> f64 {
        self.total_nano_usd as f64 / NANO_USD_PER_USD
    }
}

/// A set `image_price` prices by image count and ignores tokens. Otherwise
/// cached tokens are carved out of `prompt_tokens` and billed only at the
/// cached rate, falling back to the input rate when none is configured.
pub fn compute_charge(config: &ModelConfig, usage: &Usage) -> Charge {
    if let Some(price) = config.image_price {
        let image = round_nano(usage.image_count as f64 * price * NANO_USD_PER_USD);
        return Charge {
            image_nano_usd: image,
            total_nano_usd: image,
            ..Charge::default()
        };
    }

    let cached_tokens = usage.cached_tokens.min(usage.prompt_tokens);
    let uncached_tokens = usage.prompt_tokens - cached_tokens;
    let cached_ratio = config.cached_input_ratio.unwrap_or(config.input_ratio);

    let prompt = token_charge(uncached_tokens, config.input_ratio);
    let cached = token_charge(cached_tokens, cached_ratio);
    let completion = token_charge(
        usage.completion_tokens,
        config.input_ratio * config.completion_ratio,
    );

    Charge {
        prompt_nano_usd: prompt,
        cached_nano_usd: cached,
        completion_nano_usd: completion,
        image_nano_usd: 0,
        total_nano_usd: prompt + cached + completion,
    }
}

fn token_charge(tokens: u64, ratio: f64) -> i128 {
    round_nano(tokens as f64 * ratio * NANO_USD_PER_TOKEN_AT_UNIT_RATIO)
}

fn round_nano(value: f64) -> i128 {
    if !value.is_finite() || value <= 0.0 {
        return 0;
    }
    value.round() as i128
}

#[cfg(test)]
mod tests {
    use super::*;

    const GPT_4O: ModelConfig = ModelConfig::tokens(2.5, 4.0).with_cached_input(1.25);
    const FLAT: ModelConfig = ModelConfig::tokens(2.0, 3.0);
    const IMAGE: ModelConfig = ModelConfig::image(0.04);

    fn table() -> ModelPricingTable {
        ModelPricingTable::new(&[
            model("gpt-4o", "gpt-4o", GPT_4O),
            model("gpt-4o-2024-08-06", "gpt-4o-2024-08-06", GPT_4O),
            model("flat", "flat-v1", FLAT),
            model("dall-e-3", "dall-e-3", IMAGE),
        ])
    }

    fn usage(prompt: u64, completion: u64, cached: u64, images: u64) -> Usage {
        Usage {
            prompt_tokens: prompt,
            completion_tokens: completion,
            cached_tokens: cached,
            image_count: images,
        }
    }

    #[test]
    fn cached_tokens_are_billed_only_at_cached_rate() {
        let charge = table().price("gpt-4o", &usage(1000, 500, 400, 0)).unwrap();
        assert_eq!(charge.prompt_nano_usd, 1_500_000);
        assert_eq!(charge.cached_nano_usd, 500_000);
        assert_eq!(charge.completion_nano_usd, 5_000_000);
        assert_eq!(charge.total_nano_usd, 7_000_000);
    }

    #[test]
    fn completion_ratio_multiplies_input_ratio() {
        let charge = table().price("flat", &usage(1_000_000, 1_000_000, 0, 0)).unwrap();
        assert_eq!(charge.prompt_nano_usd, 2_000_000_000);
        assert_eq!(charge.completion_nano_usd, 6_000_000_000);
        assert!((charge.total_usd() - 8.0).abs() < 1e-9);
    }

    #[test]
    fn missing_cached_ratio_falls_back_to_input_ratio() {
        let charge = table().price("flat", &usage(100, 0, 40, 0)).unwrap();
        assert_eq!(charge.prompt_nano_usd, 120_000);
        assert_eq!(charge.cached_nano_usd, 80_000);
        assert_eq!(charge.total_nano_usd, 200_000);
    }

    #[test]
    fn image_price_ignores_tokens() {
        let charge = table().price("dall-e-3", &usage(5000, 5000, 0, 3)).unwrap();
        assert_eq!(charge.image_nano_usd, 120_000_000);
        assert_eq!(charge.total_nano_usd, 120_000_000);
        assert_eq!(charge.prompt_nano_usd, 0);
    }

    #[test]
    fn aliases_price_identically() {
        let t = table();
        let u = usage(321, 123, 11, 0);
        assert_eq!(
            t.price("gpt-4o", &u).unwrap(),
            t.price("gpt-4o-2024-08-06", &u).unwrap()
        );
    }

    #[test]
    fn unknown_model_is_an_error() {
        let err = table().price("gpt-5-ultra", &Usage::default()).unwrap_err();
        assert!(matches!(err, RelayError::UnknownModel(m) if m == "gpt-5-ultra"));
        assert!(table().vendor_id("nope").is_err());
    }

    #[test]
    fn vendor_id_resolves_through_table() {
        assert_eq!(table().vendor_id("flat").unwrap(), "flat-v1");
        assert_eq!(table().models(), vec!["dall-e-3", "flat", "gpt-4o", "gpt-4o-2024-08-06"]);
    }
}
