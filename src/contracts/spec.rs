//! Page description types.
//!
//! A [`Spec`] is replaced wholesale, never edited in place. A [`Patch`] is a
//! partial spec proposed on top of a base.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::intent::Intent;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Layout {
    #[serde(default)]
    pub sections: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Brand {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dark: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tone: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Spec {
    #[serde(default)]
    pub layout: Layout,
    #[serde(default)]
    pub copy: BTreeMap<String, String>,
    #[serde(default)]
    pub brand: Brand,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sections: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copy: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<Brand>,
}

impl Patch {
    pub fn is_empty(&self) -> bool {
        self.sections.is_none() && self.copy.is_none() && self.brand.is_none()
    }
}

/// Deep-merges `patch` over `base`. Patch fields win; `sections` replaces
/// the base list wholesale when present; `copy` and `brand` merge per key.
pub fn merge_patch(base: &Spec, patch: &Patch) -> Spec {
    let mut out = base.clone();

    if let Some(sections) = &patch.sections {
        out.layout.sections = sections.clone();
    }
    if let Some(copy) = &patch.copy {
        for (k, v) in copy {
            out.copy.insert(k.clone(), v.clone());
        }
    }
    if let Some(brand) = &patch.brand {
        if brand.primary.is_some() {
            out.brand.primary = brand.primary.clone();
        }
        if brand.dark.is_some() {
            out.brand.dark = brand.dark;
        }
        if brand.tone.is_some() {
            out.brand.tone = brand.tone.clone();
        }
    }
    out
}
