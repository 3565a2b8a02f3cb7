//! Model-name classification: family, header style, and Gemini 3 tier
//! normalization.

use std::fmt;

/// Which upstream model family a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelFamily {
    Gemini,
    Claude,
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelFamily::Gemini => write!(f, "gemini"),
            ModelFamily::Claude => write!(f, "claude"),
        }
    }
}

/// Which of the two fixed header personalities (and default endpoint) to use.
/// Each maps to a separate quota on the upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeaderStyle {
    Antigravity,
    GeminiCli,
}

impl fmt::Display for HeaderStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderStyle::Antigravity => write!(f, "antigravity"),
            HeaderStyle::GeminiCli => write!(f, "gemini-cli"),
        }
    }
}

/// Family inference is case-insensitive; `claude`, `opus` and `sonnet` all
/// mark the Claude family.
pub fn family_of(model: &str) -> ModelFamily {
    let lower = model.to_lowercase();
    if lower.contains("claude") || lower.contains("opus") || lower.contains("sonnet") {
        ModelFamily::Claude
    } else {
        ModelFamily::Gemini
    }
}

/// Quota routing:
/// - Claude models only exist behind the `antigravity` personality;
/// - an explicit `:antigravity` marker forces it;
/// - Gemini 3 models without a `-preview` marker use it too (legacy rule);
/// - everything else defaults to `gemini-cli`.
pub fn style_of(model: &str) -> HeaderStyle {
    if family_of(model) == ModelFamily::Claude {
        return HeaderStyle::Antigravity;
    }

    let lower = model.to_lowercase();
    if lower.contains(":antigravity") {
        return HeaderStyle::Antigravity;
    }
    if lower.contains("gemini-3") && !lower.contains("-preview") {
        return HeaderStyle::Antigravity;
    }
    HeaderStyle::GeminiCli
}

/// Remove a trailing `:antigravity` marker (case-insensitive).
pub fn strip_style_marker(model: &str) -> &str {
    let lower = model.to_lowercase();
    if let Some(stripped_len) = lower.strip_suffix(":antigravity").map(str::len) {
        &model[..stripped_len]
    } else {
        model
    }
}

const TIERS: &[&str] = &["minimal", "low", "medium", "high"];
const DEFAULT_TIER: &str = "low";

/// A trailing `-(minimal|low|medium|high)` tier marker, lowercased, plus the
/// model name without it.
fn split_tier(model: &str) -> (&str, Option<&'static str>) {
    let lower = model.to_lowercase();
    for tier in TIERS.iter().copied() {
        if lower.ends_with(&format!("-{tier}")) {
            let base_len = model.len() - tier.len() - 1;
            return (&model[..base_len], Some(tier));
        }
    }
    (model, None)
}

/// Resolve a Gemini 3 model name and thinking level.
///
/// Gemini 3 Pro encodes the tier in the model name (`gemini-3-pro-low`);
/// Gemini 3 Flash wants the bare name with the tier passed as a field. Other
/// models pass through untouched.
pub fn resolve_gemini3(model: &str) -> (String, Option<String>) {
    let lower = model.to_lowercase();
    if !lower.contains("gemini-3") {
        return (model.to_string(), None);
    }

    let (base, tier) = split_tier(model);

    if lower.contains("gemini-3-pro") {
        return match tier {
            Some(tier) => (model.to_string(), Some(tier.to_string())),
            None => (
                format!("{base}-{DEFAULT_TIER}"),
                Some(DEFAULT_TIER.to_string()),
            ),
        };
    }

    if lower.contains("gemini-3-flash") {
        return (
            base.to_string(),
            Some(tier.unwrap_or(DEFAULT_TIER).to_string()),
        );
    }

    (model.to_string(), tier.map(ToString::to_string))
}
