//! Static plays for briefs we have already seen many times.

use lazy_static::lazy_static;
use regex::Regex;

use super::{canonical_prompt, Intent, IntentResolution, IntentSource};

const PLAYBOOK_CONFIDENCE: f64 = 0.8;

struct Play {
    when: Regex,
    sections: &'static [&'static str],
    vibe: &'static str,
    dark: bool,
    audience: &'static str,
    goal: &'static str,
    industry: &'static str,
    brand_color: &'static str,
}

lazy_static! {
    static ref PLAYS: Vec<Play> = vec![
        Play {
            when: Regex::new(r"saas.*dark.*(dev|developer)").unwrap(),
            sections: &["hero-basic", "cta-simple"],
            vibe: "minimal",
            dark: true,
            audience: "developers",
            goal: "waitlist",
            industry: "saas",
            brand_color: "#7c3aed",
        },
        Play {
            when: Regex::new(r"(e-?commerce|shop).*(dark|bold)").unwrap(),
            sections: &["hero-basic", "features-3col", "cta-simple"],
            vibe: "bold",
            dark: true,
            audience: "shoppers",
            goal: "purchase",
            industry: "ecommerce",
            brand_color: "#ef4444",
        },
        Play {
            when: Regex::new(r"portfolio.*(designer|photographer)").unwrap(),
            sections: &["hero-basic", "features-3col", "cta-simple"],
            vibe: "minimal",
            dark: false,
            audience: "clients",
            goal: "contact",
            industry: "portfolio",
            brand_color: "#111827",
        },
    ];
}

pub fn pick_from_playbook(prompt: &str) -> Option<IntentResolution> {
    let key = canonical_prompt(prompt);
    let play = PLAYS.iter().find(|p| p.when.is_match(&key))?;

    let intent = Intent {
        audience: play.audience.to_string(),
        goal: play.goal.to_string(),
        industry: play.industry.to_string(),
        vibe: play.vibe.to_string(),
        color_scheme: if play.dark { "dark" } else { "light" }.to_string(),
        density: if play.vibe == "minimal" { "minimal" } else { "" }.to_string(),
        complexity: "simple".to_string(),
        sections: play.sections.iter().map(|s| s.to_string()).collect(),
    };
    let chips = vec![
        if play.dark { "Switch to light" } else { "Use dark mode" }.to_string(),
        if play.vibe == "minimal" { "More content" } else { "Keep it minimal" }.to_string(),
        if play.goal == "waitlist" { "Use email signup CTA" } else { "Use waitlist" }.to_string(),
    ];

    let mut res = IntentResolution::new(intent, PLAYBOOK_CONFIDENCE, chips, IntentSource::Playbook);
    res.brand_color = Some(play.brand_color.to_string());
    Some(res)
}
