//! Per-model token pricing.

use helpline_core::config::PricingOverride;

/// Rates in currency units per 1,000 tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rate {
    pub prompt: f64,
    pub completion: f64,
}

/// Family → rate table. Versioned model names collapse to the longest
/// matching family prefix; unknown models are billed at the default family.
#[derive(Debug, Clone)]
pub struct PricingTable {
    families: Vec<(String, Rate)>,
    default_family: String,
}

impl Default for PricingTable {
    fn default() -> Self {
        Self {
            families: vec![
                (
                    "gpt-3.5-turbo".into(),
                    Rate {
                        prompt: 0.001,
                        completion: 0.002,
                    },
                ),
                (
                    "gpt-4".into(),
                    Rate {
                        prompt: 0.03,
                        completion: 0.06,
                    },
                ),
                (
                    "gpt-4o".into(),
                    Rate {
                        prompt: 0.005,
                        completion: 0.015,
                    },
                ),
                (
                    "gpt-4o-mini".into(),
                    Rate {
                        prompt: 0.00015,
                        completion: 0.0006,
                    },
                ),
            ],
            default_family: "gpt-3.5-turbo".into(),
        }
    }
}

impl PricingTable {
    /// Default table with configured overrides applied (overrides may add families).
    pub fn with_overrides(overrides: &[PricingOverride]) -> Self {
        let mut table = Self::default();
        for o in overrides {
            table.set(
                &o.family,
                Rate {
                    prompt: o.prompt,
                    completion: o.completion,
                },
            );
        }
        table
    }

    pub fn set(&mut self, family: &str, rate: Rate) {
        match self.families.iter_mut().find(|(f, _)| f == family) {
            Some((_, r)) => *r = rate,
            None => self.families.push((family.to_string(), rate)),
        }
    }

    /// Base family a model name belongs to.
    pub fn family<'a>(&'a self, model: &'a str) -> &'a str {
        self.families
            .iter()
            .filter(|(f, _)| model.starts_with(f.as_str()))
            .max_by_key(|(f, _)| f.len())
            .map(|(f, _)| f.as_str())
            .unwrap_or(model)
    }

    pub fn rate(&self, model: &str) -> Rate {
        let family = self.family(model);
        self.families
            .iter()
            .find(|(f, _)| f == family)
            .or_else(|| self.families.iter().find(|(f, _)| *f == self.default_family))
            .map(|(_, r)| *r)
            .unwrap_or(Rate {
                prompt: 0.0,
                completion: 0.0,
            })
    }

    pub fn cost(&self, model: &str, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        let rate = self.rate(model);
        prompt_tokens as f64 / 1000.0 * rate.prompt
            + completion_tokens as f64 / 1000.0 * rate.completion
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn test_family_normalization() {
        let table = PricingTable::default();
        assert_eq!(table.family("gpt-3.5-turbo-0125"), "gpt-3.5-turbo");
        assert_eq!(table.family("gpt-4-0613"), "gpt-4");
        assert_eq!(table.family("gpt-4o-2024-08-06"), "gpt-4o");
        assert_eq!(table.family("gpt-4o-mini-2024-07-18"), "gpt-4o-mini");
        assert_eq!(table.family("llama3"), "llama3");
    }

    #[test]
    fn test_cost() {
        let table = PricingTable::default();
        assert!(approx(table.cost("gpt-3.5-turbo", 1000, 1000), 0.003));
        assert!(approx(table.cost("gpt-4-turbo", 500, 250), 0.015 + 0.015));
    }

    #[test]
    fn test_unknown_model_uses_default_rate() {
        let table = PricingTable::default();
        assert!(approx(
            table.cost("mystery-model", 1000, 0),
            table.cost("gpt-3.5-turbo", 1000, 0)
        ));
    }

    #[test]
    fn test_overrides() {
        let table = PricingTable::with_overrides(&[
            PricingOverride {
                family: "gpt-4".into(),
                prompt: 0.01,
                completion: 0.02,
            },
            PricingOverride {
                family: "claude-3".into(),
                prompt: 0.003,
                completion: 0.015,
            },
        ]);
        assert!(approx(table.cost("gpt-4-0613", 1000, 1000), 0.03));
        assert!(approx(table.cost("claude-3-haiku", 1000, 0), 0.003));
    }
}
