//! Deterministic strategies: the quick keyword guess, the broad classifier
//! used when no remote model is configured, the last-resort default and
//! clarifying chips.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeMap;

use super::{Intent, IntentResolution, IntentSource};
use crate::contracts::{Brand, Patch, Spec};

pub const QUICK_GUESS_CONFIDENCE: f64 = 0.7;
pub const QUICK_GUESS_MIN_COVERAGE: f64 = 0.5;
pub const DEFAULT_CONFIDENCE: f64 = 0.55;
const INTENT_FIELDS: f64 = 7.0;

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap()
}

lazy_static! {
    static ref DEV: Regex = re(r"\bdev(eloper|elopers|s)?\b|\bengineers?\b|\bcoders?\b|\bprogrammers?\b");
    static ref FOUNDER: Regex = re(r"\bfounders?\b|\bstartup\s*(ceo|cto|team)\b");
    static ref SHOPPER: Regex = re(r"\bshoppers?\b|\bconsumers?\b");
    static ref WAITLIST: Regex = re(r"\bwaitlist\b");
    static ref DEMO: Regex = re(r"\bdemo\b");
    static ref PURCHASE: Regex = re(r"\b(buy|purchase)\b");
    static ref CONTACT: Regex = re(r"\bcontact\b");
    static ref SAAS: Regex = re(r"\bsaas\b");
    static ref ECOMMERCE: Regex = re(r"\becomm(erce)?\b");
    static ref PORTFOLIO: Regex = re(r"\bportfolio\b");
    static ref MINIMAL: Regex = re(r"\bminimal\b");
    static ref BOLD: Regex = re(r"\bbold\b");
    static ref PLAYFUL: Regex = re(r"\bplayful\b");
    static ref SERIOUS: Regex = re(r"\bserious\b");
    static ref DARK: Regex = re(r"\bdark\b");
    static ref LIGHT: Regex = re(r"\blight\b");
    static ref SIMPLE: Regex = re(r"\bsimple\b");
    static ref FEATURES: Regex = re(r"\bfeatures?\b");
    static ref DARK_LITERAL: Regex = re(r"(?i)(^|\s)dark(\s|$)");

    static ref BROAD_AUDIENCE: Vec<(Regex, &'static str)> = vec![
        (re(r"\bdev(s|elopers)?\b|\bapi\b|\bsdk\b|\bcli\b"), "developers"),
        (re(r"\b(founder|startup|b2b)\b"), "founders"),
        (re(r"\bdesigners?\b|\bfigma\b|\bdribbble\b"), "designers"),
        (re(r"\bmarketers?\b|\bcampaign\b|\bseo\b|\bcrm\b"), "marketers"),
        (re(r"\b(shopper|customer|consumer|store)s?\b"), "consumers"),
    ];
    static ref BROAD_GOAL: Vec<(Regex, &'static str)> = vec![
        (re(r"\b(waitlist|notify|early access)\b"), "waitlist"),
        (re(r"\b(sign ?up|join|create account|register)\b"), "signup"),
        (re(r"\b(buy|checkout|cart|price|pricing|purchase)\b"), "purchase"),
        (re(r"\b(book|demo|schedule|meeting)\b"), "demo"),
        (re(r"\b(contact|reach|email us)\b"), "contact"),
        (re(r"\b(info|overview|about)\b"), "info"),
    ];
    static ref BROAD_INDUSTRY: Vec<(Regex, &'static str)> = vec![
        (re(r"\b(saas|b2b|dashboard|subscription)\b"), "saas"),
        (re(r"\b(shop|store|e-?com(merce)?|cart|products?)\b"), "ecommerce"),
        (re(r"\b(portfolio|photograph\w*|resume|cv|case study)\b"), "portfolio"),
        (re(r"\b(ai|model|llm|prompt|genai)\b"), "ai"),
        (re(r"\b(crypto|token|defi|wallet|web3)\b"), "crypto"),
        (re(r"\b(health|medical|clinic|fitness|wellness)\b"), "health"),
        (re(r"\b(edu|education|course|learn|student|teacher|lms)\b"), "edu"),
    ];
    static ref BROAD_VIBE: Vec<(Regex, &'static str)> = vec![
        (re(r"\b(minimal|clean|simple|sleek|airy)\b"), "minimal"),
        (re(r"\b(playful|fun|whimsical|quirky)\b"), "playful"),
        (re(r"\b(serious|formal|enterprise|professional)\b"), "serious"),
        (re(r"\b(bold|loud|impact|punchy)\b"), "bold"),
        (re(r"\b(elegant|lux|luxury|premium|refined)\b"), "elegant"),
    ];
    static ref BROAD_DENSITY_MINIMAL: Regex = re(r"\b(minimal|simple|single(-|\s)?page)\b");
    static ref BROAD_DENSITY_RICH: Regex = re(r"\b(rich|heavy|long|content)\b");
    static ref BROAD_DARK: Regex = re(r"\b(dark|black|night|neon)\b");
    static ref BROAD_LIGHT: Regex = re(r"\b(light|white|bright)\b");
    static ref BROAD_ADVANCED: Regex = re(r"\b(dashboard|docs|blog|auth|admin|multi(-|\s)?page)\b");
    static ref BROAD_MEDIUM: Regex = re(r"\b(pricing|faq|features|contact)\b");
    static ref BROAD_HERO: Regex = re(r"\b(hero|headline|above the fold|landing)\b");
    static ref BROAD_FEATURES: Regex = re(r"\b(features?|grid|cards?|benefits?|value)\b");
    static ref BROAD_CTA: Regex = re(r"\b(cta|signup|button|lead|waitlist|join)\b");
    static ref BROAD_PRICING: Regex = re(r"\b(pricing|plans?|tiers?)\b");
    static ref BROAD_FAQ: Regex = re(r"\b(faq|questions)\b");
}

fn first_match(p: &str, pairs: &[(Regex, &'static str)], default: &'static str) -> String {
    pairs
        .iter()
        .find(|(re, _)| re.is_match(p))
        .map(|(_, v)| *v)
        .unwrap_or(default)
        .to_string()
}

fn pick<'a>(p: &str, options: &[(&Regex, &'a str)]) -> &'a str {
    options
        .iter()
        .find(|(re, _)| re.is_match(p))
        .map(|(_, v)| *v)
        .unwrap_or("")
}

/// Clarifying chips offered alongside an intent.
pub fn chips_for(intent: &Intent) -> Vec<String> {
    vec![
        if intent.color_scheme != "light" { "Switch to light" } else { "Use dark mode" }.to_string(),
        if intent.vibe == "minimal" || intent.density == "minimal" {
            "More playful"
        } else {
            "More minimal"
        }
        .to_string(),
        if intent.goal == "waitlist" { "Use email signup CTA" } else { "Use waitlist" }.to_string(),
    ]
}

/// Literal keyword guess. Returns `None` unless at least half of the seven
/// intent fields could be filled.
pub fn quick_guess(prompt: &str) -> Option<IntentResolution> {
    let p = prompt.to_lowercase();

    let audience = if DEV.is_match(&p) {
        "developers"
    } else if FOUNDER.is_match(&p) {
        "founders"
    } else if SHOPPER.is_match(&p) {
        "shoppers"
    } else {
        ""
    };

    let mut sections = vec!["hero-basic".to_string(), "cta-simple".to_string()];
    if FEATURES.is_match(&p) {
        sections.push("features-3col".to_string());
    }

    let intent = Intent {
        audience: audience.to_string(),
        goal: pick(&p, &[(&WAITLIST, "waitlist"), (&DEMO, "demo"), (&PURCHASE, "purchase"), (&CONTACT, "contact")]).to_string(),
        industry: pick(&p, &[(&SAAS, "saas"), (&ECOMMERCE, "ecommerce"), (&PORTFOLIO, "portfolio")]).to_string(),
        vibe: pick(&p, &[(&MINIMAL, "minimal"), (&BOLD, "bold"), (&PLAYFUL, "playful"), (&SERIOUS, "serious")]).to_string(),
        color_scheme: pick(&p, &[(&DARK, "dark"), (&LIGHT, "light")]).to_string(),
        density: pick(&p, &[(&MINIMAL, "minimal")]).to_string(),
        complexity: pick(&p, &[(&SIMPLE, "simple")]).to_string(),
        sections,
    };

    let coverage = intent.filled_fields() as f64 / INTENT_FIELDS;
    if coverage < QUICK_GUESS_MIN_COVERAGE {
        return None;
    }
    let chips = chips_for(&intent);
    Some(IntentResolution::new(intent, QUICK_GUESS_CONFIDENCE, chips, IntentSource::RuleGuess))
}

/// Keyword classifier over a wider vocabulary. Always answers; confidence
/// grows with the number of non-default fields (0.4..=0.95).
pub fn broad_classify(prompt: &str) -> IntentResolution {
    let p = prompt.to_lowercase();

    let audience = first_match(&p, &BROAD_AUDIENCE, "general");
    let goal = first_match(&p, &BROAD_GOAL, "signup");
    let industry = first_match(&p, &BROAD_INDUSTRY, "other");
    let vibe = first_match(&p, &BROAD_VIBE, "serious");
    let density = if BROAD_DENSITY_MINIMAL.is_match(&p) {
        "minimal"
    } else if BROAD_DENSITY_RICH.is_match(&p) {
        "rich"
    } else {
        "standard"
    };
    let color_scheme = if BROAD_DARK.is_match(&p) {
        "dark"
    } else if BROAD_LIGHT.is_match(&p) {
        "light"
    } else {
        "brand"
    };
    let complexity = if BROAD_ADVANCED.is_match(&p) {
        "advanced"
    } else if BROAD_MEDIUM.is_match(&p) {
        "medium"
    } else {
        "simple"
    };

    let mut sections = Vec::new();
    if BROAD_HERO.is_match(&p) {
        sections.push("hero-basic");
    }
    if BROAD_FEATURES.is_match(&p) {
        sections.push("features-3col");
    }
    if BROAD_PRICING.is_match(&p) {
        sections.push("pricing-simple");
    }
    if BROAD_FAQ.is_match(&p) {
        sections.push("faq-accordion");
    }
    if BROAD_CTA.is_match(&p) {
        sections.push("cta-simple");
    }
    if sections.is_empty() {
        sections = vec!["hero-basic", "features-3col", "cta-simple"];
    }

    let hits = [
        audience != "general",
        goal != "signup",
        industry != "other",
        vibe != "serious",
        color_scheme != "brand",
        complexity != "simple",
    ]
    .iter()
    .filter(|b| **b)
    .count();
    let confidence = (0.4 + 0.08 * hits as f64).min(0.95);

    let chips = vec![
        if color_scheme == "dark" { "Switch to light" } else { "Use dark mode" }.to_string(),
        if density == "minimal" { "More content" } else { "Keep it minimal" }.to_string(),
        if goal == "signup" { "Use waitlist" } else { "Use email signup CTA" }.to_string(),
    ];

    let intent = Intent {
        audience,
        goal,
        industry,
        vibe,
        color_scheme: color_scheme.to_string(),
        density: density.to_string(),
        complexity: complexity.to_string(),
        sections: sections.into_iter().map(String::from).collect(),
    };
    IntentResolution::new(intent, confidence, chips, IntentSource::Classifier)
}

/// Last rung: only the dark/light literal is read from the prompt.
pub fn safe_default(prompt: &str) -> IntentResolution {
    let dark = DARK_LITERAL.is_match(prompt);
    let intent = Intent {
        goal: "waitlist".to_string(),
        vibe: "minimal".to_string(),
        color_scheme: if dark { "dark" } else { "light" }.to_string(),
        sections: vec!["hero-basic".to_string(), "cta-simple".to_string()],
        ..Default::default()
    };
    let chips = chips_for(&intent);
    IntentResolution::new(intent, DEFAULT_CONFIDENCE, chips, IntentSource::Fallback)
}

/// Translates a clarifying chip into a patch over `spec`. Unknown chips
/// yield `None`.
pub fn chip_patch(spec: &Spec, chip: &str) -> Option<Patch> {
    let chip = chip.trim().to_lowercase();
    let brand = |dark: Option<bool>, tone: Option<&str>| Brand {
        primary: None,
        dark,
        tone: tone.map(String::from),
    };
    let cta = |label: &str, head: &str| {
        let mut copy = BTreeMap::new();
        copy.insert("CTA_LABEL".to_string(), label.to_string());
        copy.insert("CTA_HEAD".to_string(), head.to_string());
        copy
    };

    let patch = match chip.as_str() {
        "switch to light" => Patch {
            brand: Some(brand(Some(false), None)),
            ..Default::default()
        },
        "use dark mode" => Patch {
            brand: Some(brand(Some(true), None)),
            ..Default::default()
        },
        "more minimal" | "keep it minimal" => Patch {
            brand: Some(brand(None, Some("minimal"))),
            ..Default::default()
        },
        "more playful" => Patch {
            brand: Some(brand(None, Some("playful"))),
            ..Default::default()
        },
        "add 3-card features" | "more content" => {
            let mut sections = spec.layout.sections.clone();
            if !sections.iter().any(|s| s == "features-3col") {
                sections.push("features-3col".to_string());
            }
            Patch {
                sections: Some(sections),
                ..Default::default()
            }
        }
        "use 2-column features" => Patch {
            sections: Some(
                spec.layout
                    .sections
                    .iter()
                    .filter(|s| *s != "features-3col")
                    .cloned()
                    .collect(),
            ),
            ..Default::default()
        },
        "use email signup cta" => Patch {
            copy: Some(cta("Get started", "Ready when you are")),
            ..Default::default()
        },
        "use waitlist" | "use waitlist instead" => Patch {
            copy: Some(cta("Join the waitlist", "Be first in line")),
            ..Default::default()
        },
        _ => return None,
    };
    Some(patch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quick_guess_accepts_rich_prompt() {
        let res = quick_guess("Minimal dark SaaS waitlist page for developers").unwrap();
        assert_eq!(res.source, IntentSource::RuleGuess);
        assert_eq!(res.intent.audience, "developers");
        assert_eq!(res.intent.goal, "waitlist");
        assert_eq!(res.intent.industry, "saas");
        assert_eq!(res.intent.color_scheme, "dark");
        assert_eq!(res.chips, vec!["Switch to light", "More playful", "Use email signup CTA"]);
        assert!((res.confidence - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn test_quick_guess_rejects_thin_prompt() {
        // audience + color only: 2/7 coverage
        assert!(quick_guess("page for developers, dark").is_none());
    }

    #[test]
    fn test_quick_guess_adds_features_section() {
        let res = quick_guess("simple minimal saas demo with features").unwrap();
        assert!(res.intent.sections.contains(&"features-3col".to_string()));
    }

    #[test]
    fn test_broad_classifier_confidence_is_calibrated() {
        let empty = broad_classify("something");
        assert!((empty.confidence - 0.4).abs() < 1e-9);
        assert_eq!(empty.intent.sections, vec!["hero-basic", "features-3col", "cta-simple"]);

        let rich = broad_classify("playful dark crypto wallet landing with pricing for developers, book a demo");
        assert!(rich.confidence > 0.8 && rich.confidence <= 0.95);
        // "pricing" outranks "demo" in goal precedence
        assert_eq!(rich.intent.goal, "purchase");
        assert_eq!(rich.intent.industry, "crypto");
        assert!(rich.intent.sections.contains(&"pricing-simple".to_string()));
    }

    #[test]
    fn test_safe_default_reads_dark_literal_only() {
        let res = safe_default("Make it DARK please");
        assert_eq!(res.intent.color_scheme, "dark");
        assert!((res.confidence - 0.55).abs() < f64::EPSILON);
        assert_eq!(res.source, IntentSource::Fallback);

        let res = safe_default("darkness falls");
        assert_eq!(res.intent.color_scheme, "light");
    }

    #[test]
    fn test_chip_patch() {
        let mut spec = Spec::default();
        spec.layout.sections = vec!["hero-basic".into(), "cta-simple".into()];

        let p = chip_patch(&spec, "Use dark mode").unwrap();
        assert_eq!(p.brand.unwrap().dark, Some(true));

        let p = chip_patch(&spec, "More content").unwrap();
        assert_eq!(p.sections.unwrap(), vec!["hero-basic", "cta-simple", "features-3col"]);

        let p = chip_patch(&spec, "use waitlist").unwrap();
        assert_eq!(p.copy.unwrap()["CTA_LABEL"], "Join the waitlist");

        assert!(chip_patch(&spec, "make it pop").is_none());
    }
}
