//! Failure Playbook
//!
//! The only source of user-facing failure copy. [`pick_failure_fallback`] is
//! pure: equal inputs give equal outputs.

use serde::{Deserialize, Serialize};

use crate::error::FailureKind;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureContext {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Accepted for callers that have it; the copy does not vary by audience yet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,
}

impl FailureContext {
    pub fn new(kind: FailureKind) -> Self {
        Self {
            kind: kind.as_str().to_string(),
            ..Default::default()
        }
    }

    pub fn route(mut self, route: &str) -> Self {
        self.route = Some(route.to_string());
        self
    }

    pub fn reason(mut self, reason: Option<String>) -> Self {
        self.reason = reason;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fallback {
    pub status: String,
    pub code: String,
    pub title: String,
    pub body: String,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cta_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cta_href: Option<String>,
}

pub fn pick_failure_fallback(ctx: &FailureContext) -> Fallback {
    let kind = FailureKind::normalize(&ctx.kind);
    let route = ctx.route.as_deref().filter(|r| !r.is_empty());
    let reason = ctx
        .reason
        .as_deref()
        .map(|r| r.trim().to_lowercase())
        .filter(|r| !r.is_empty());

    let make = |title: &str, body: &str, retryable: bool, with_cta: bool| {
        let code = match (kind, &reason) {
            (FailureKind::SupBlock, Some(r)) => format!("sup_block.{}", r),
            _ => format!("{}.generic", kind.as_str()),
        };
        Fallback {
            status: "fallback".to_string(),
            code,
            title: title.to_string(),
            body: body.to_string(),
            retryable,
            cta_label: with_cta.then(|| "Try again".to_string()),
            cta_href: route.filter(|_| with_cta).map(String::from),
        }
    };

    match kind {
        FailureKind::SupBlock => make(
            "We paused this draft",
            "This draft tripped one of our safety checks. Nothing was published, and no changes were applied.",
            false,
            false,
        ),
        FailureKind::ContractsFailed => make(
            "We couldn’t finalize this change",
            "The result didn’t meet the contracts we require for this route. We kept your live content as-is.",
            false,
            false,
        ),
        FailureKind::QuotaExceeded => make(
            "Too many requests right now",
            "You’ve hit the current usage limit for this workspace. Try again in a bit, or upgrade your plan to get more headroom.",
            true,
            true,
        ),
        FailureKind::BodyTooLarge => make(
            "This request was too large",
            "The payload for this request was larger than we accept in one go. Try again with a smaller brief or fewer assets.",
            true,
            false,
        ),
        FailureKind::AbuseDetected => make(
            "We can’t help with that",
            "This request looks like something we’re not allowed to assist with. If you think this is a mistake, adjust the wording and try again.",
            false,
            false,
        ),
        FailureKind::InternalError => make(
            "Something went wrong on our side",
            "We hit an internal error while trying to handle this request. Your live content is unchanged.",
            true,
            true,
        ),
        FailureKind::Unknown => make(
            "We couldn’t finish this request",
            "We weren’t able to complete this action. Nothing was changed on your live content.",
            true,
            true,
        ),
    }
}
