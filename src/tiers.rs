//! Tier enum, default escalation order, tier<->provider mapping, and the
//! registry of `TierEngine` adapters (spec §6, C1).
//!
//! Grounded on `original_source/app/tier_mapping.py`: a dynamic
//! dispatch-by-string-name in the source is replaced here with a closed
//! enum plus a pure mapping function, per the redesign flags in spec §9.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::ocr::engine::TierEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Tesseract,
    Easyocr,
    Paddleocr,
    Rapidocr,
    AppleVision,
    LlmLocal,
    LlmCloud,
}

impl Tier {
    pub const DEFAULT_ORDER: [Tier; 7] = [
        Tier::Tesseract,
        Tier::Easyocr,
        Tier::Paddleocr,
        Tier::Rapidocr,
        Tier::AppleVision,
        Tier::LlmLocal,
        Tier::LlmCloud,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Tesseract => "tesseract",
            Tier::Easyocr => "easyocr",
            Tier::Paddleocr => "paddleocr",
            Tier::Rapidocr => "rapidocr",
            Tier::AppleVision => "apple_vision",
            Tier::LlmLocal => "llm_local",
            Tier::LlmCloud => "llm_cloud",
        }
    }

    pub fn from_str(s: &str) -> Option<Tier> {
        match s {
            "tesseract" => Some(Tier::Tesseract),
            "easyocr" => Some(Tier::Easyocr),
            "paddleocr" => Some(Tier::Paddleocr),
            "rapidocr" => Some(Tier::Rapidocr),
            "apple_vision" => Some(Tier::AppleVision),
            "llm_local" => Some(Tier::LlmLocal),
            "llm_cloud" => Some(Tier::LlmCloud),
            _ => None,
        }
    }

    /// Fixed tier -> engine/provider-name mapping (spec §6).
    pub fn to_provider(&self) -> &'static str {
        match self {
            Tier::Tesseract => "tesseract",
            Tier::Easyocr => "easyocr",
            Tier::Paddleocr => "paddleocr",
            Tier::Rapidocr => "rapidocr",
            Tier::AppleVision => "apple_vision",
            Tier::LlmLocal => "llm_proxy_vision",
            Tier::LlmCloud => "llm_proxy_cloud",
        }
    }

    pub fn from_provider(provider: &str) -> Option<Tier> {
        match provider {
            "tesseract" => Some(Tier::Tesseract),
            "easyocr" => Some(Tier::Easyocr),
            "paddleocr" => Some(Tier::Paddleocr),
            "rapidocr" => Some(Tier::Rapidocr),
            "apple_vision" => Some(Tier::AppleVision),
            "llm_proxy_vision" => Some(Tier::LlmLocal),
            "llm_proxy_cloud" => Some(Tier::LlmCloud),
            _ => None,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Intersect the configured enabled-tier subset with the default order,
/// preserving order (spec §6).
pub fn enabled_tier_order(enabled: &[Tier]) -> Vec<Tier> {
    Tier::DEFAULT_ORDER
        .iter()
        .filter(|t| enabled.contains(t))
        .copied()
        .collect()
}

pub fn parse_enabled_tiers(csv: &str) -> Vec<Tier> {
    csv.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(Tier::from_str)
        .collect()
}

/// Registry of adapters behind the `TierEngine` trait, one per tier name
/// (spec §4.3 / DESIGN.md). Built once at startup; no module-level
/// singletons.
#[derive(Clone)]
pub struct TierRegistry {
    engines: HashMap<Tier, Arc<dyn TierEngine>>,
}

impl TierRegistry {
    pub fn new() -> Self {
        Self {
            engines: HashMap::new(),
        }
    }

    pub fn register(&mut self, tier: Tier, engine: Arc<dyn TierEngine>) {
        self.engines.insert(tier, engine);
    }

    pub fn get(&self, tier: Tier) -> Option<Arc<dyn TierEngine>> {
        self.engines.get(&tier).cloned()
    }
}

impl Default for TierRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_provider_round_trip() {
        for tier in Tier::DEFAULT_ORDER {
            let provider = tier.to_provider();
            assert_eq!(Tier::from_provider(provider), Some(tier));
        }
    }

    #[test]
    fn enabled_order_preserves_default_ordering() {
        let enabled = vec![Tier::LlmCloud, Tier::Tesseract, Tier::AppleVision];
        let ordered = enabled_tier_order(&enabled);
        assert_eq!(ordered, vec![Tier::Tesseract, Tier::AppleVision, Tier::LlmCloud]);
    }

    #[test]
    fn parse_enabled_tiers_ignores_unknown_and_whitespace() {
        let parsed = parse_enabled_tiers(" tesseract, bogus ,apple_vision,");
        assert_eq!(parsed, vec![Tier::Tesseract, Tier::AppleVision]);
    }
}
