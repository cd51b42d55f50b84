//! Section Registry
//!
//! Known section identifiers, the copy slots each one requires, default copy
//! and per-section byte budgets.

use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SectionId {
    HeroBasic,
    Features3Col,
    CtaSimple,
    PricingSimple,
    FaqAccordion,
}

pub const DEFAULT_SECTIONS: [SectionId; 2] = [SectionId::HeroBasic, SectionId::CtaSimple];

/// Total page weight allowed before `budgets.ok` flips to false.
pub const PAGE_BUDGET_BYTES: u32 = 45_000;

impl SectionId {
    pub const ALL: [SectionId; 5] = [
        SectionId::HeroBasic,
        SectionId::Features3Col,
        SectionId::CtaSimple,
        SectionId::PricingSimple,
        SectionId::FaqAccordion,
    ];

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "hero-basic" => Some(SectionId::HeroBasic),
            "features-3col" => Some(SectionId::Features3Col),
            "cta-simple" => Some(SectionId::CtaSimple),
            "pricing-simple" => Some(SectionId::PricingSimple),
            "faq-accordion" => Some(SectionId::FaqAccordion),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SectionId::HeroBasic => "hero-basic",
            SectionId::Features3Col => "features-3col",
            SectionId::CtaSimple => "cta-simple",
            SectionId::PricingSimple => "pricing-simple",
            SectionId::FaqAccordion => "faq-accordion",
        }
    }

    pub fn slots(self) -> &'static [&'static str] {
        match self {
            SectionId::HeroBasic => &["HERO_TITLE", "HERO_SUB", "CTA_LABEL"],
            SectionId::Features3Col => &[
                "F1_TITLE", "F1_BODY", "F2_TITLE", "F2_BODY", "F3_TITLE", "F3_BODY",
            ],
            SectionId::CtaSimple => &["CTA_HEAD", "CTA_LABEL"],
            SectionId::PricingSimple => &[
                "PRICING_TITLE", "PLAN_1_NAME", "PLAN_1_PRICE", "PLAN_2_NAME", "PLAN_2_PRICE",
            ],
            SectionId::FaqAccordion => &["FAQ_TITLE", "Q1", "A1", "Q2", "A2"],
        }
    }

    pub fn budget_bytes(self) -> u32 {
        match self {
            SectionId::HeroBasic => 8_000,
            SectionId::Features3Col => 16_000,
            SectionId::CtaSimple => 6_000,
            SectionId::PricingSimple => 12_000,
            SectionId::FaqAccordion => 10_000,
        }
    }

    /// Estimated layout shift contributed by the section.
    pub fn shift_estimate(self) -> f64 {
        match self {
            SectionId::HeroBasic => 0.02,
            SectionId::Features3Col => 0.03,
            SectionId::CtaSimple => 0.01,
            SectionId::PricingSimple => 0.04,
            SectionId::FaqAccordion => 0.05,
        }
    }
}

pub fn default_copy(slot: &str) -> Option<&'static str> {
    let text = match slot {
        "HERO_TITLE" => "Build faster. Ship calmer.",
        "HERO_SUB" => "Clean blocks, real-time preview.",
        "CTA_LABEL" => "Get started",
        "CTA_HEAD" => "Ready when you are",
        "F1_TITLE" => "Fast",
        "F1_BODY" => "Idea to live URL in minutes.",
        "F2_TITLE" => "Safe",
        "F2_BODY" => "Sandboxed runs with strict limits.",
        "F3_TITLE" => "Visible",
        "F3_BODY" => "Unified logs and live events.",
        "PRICING_TITLE" => "Simple pricing",
        "PLAN_1_NAME" => "Starter",
        "PLAN_1_PRICE" => "Free",
        "PLAN_2_NAME" => "Pro",
        "PLAN_2_PRICE" => "Contact us",
        "FAQ_TITLE" => "Questions",
        "Q1" => "How long does setup take?",
        "A1" => "A few minutes.",
        "Q2" => "Can I export my page?",
        "A2" => "Yes, at any time.",
        _ => return None,
    };
    Some(text)
}

/// Known sections from `raw`, order-preserving, first occurrence wins.
/// Falls back to the default layout when nothing survives.
pub fn normalize_sections(raw: &[String]) -> Vec<SectionId> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for id in raw.iter().filter_map(|s| SectionId::parse(s)) {
        if seen.insert(id) {
            out.push(id);
        }
    }
    if out.is_empty() {
        out.extend_from_slice(&DEFAULT_SECTIONS);
    }
    out
}

pub fn allowed_slots(sections: &[SectionId]) -> BTreeSet<&'static str> {
    sections.iter().flat_map(|s| s.slots().iter().copied()).collect()
}

/// Default copy for every slot the given sections require.
pub fn defaults_for_sections(sections: &[SectionId]) -> BTreeMap<String, String> {
    allowed_slots(sections)
        .into_iter()
        .filter_map(|slot| default_copy(slot).map(|d| (slot.to_string(), d.to_string())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_slot_has_a_default() {
        for section in SectionId::ALL {
            for slot in section.slots() {
                assert!(default_copy(slot).is_some(), "missing default for {}", slot);
            }
        }
    }

    #[test]
    fn test_normalize_drops_unknown_and_duplicates() {
        let raw = vec![
            "cta-simple".to_string(),
            "mystery-widget".to_string(),
            "hero-basic".to_string(),
            "cta-simple".to_string(),
        ];
        assert_eq!(
            normalize_sections(&raw),
            vec![SectionId::CtaSimple, SectionId::HeroBasic]
        );
    }

    #[test]
    fn test_normalize_falls_back_to_default_layout() {
        let raw = vec!["nope".to_string()];
        assert_eq!(normalize_sections(&raw), DEFAULT_SECTIONS.to_vec());
    }

    #[test]
    fn test_parse_roundtrips_names() {
        for s in SectionId::ALL {
            assert_eq!(SectionId::parse(s.as_str()), Some(s));
        }
    }
}
