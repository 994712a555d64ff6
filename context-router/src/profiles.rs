//! Per-application extraction thresholds.
//!
//! A pure lookup table: the first rule whose glob pattern matches the app's
//! bundle ID (or, failing that, its display name) wins. Configured rules are
//! checked before the built-in table.

use crate::config::ThresholdConfig;
use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Which accessibility attributes the desktop backend should favour
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeProfile {
    #[default]
    Standard,
    CodeEditor,
    Terminal,
    Chat,
}

impl AttributeProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeProfile::Standard => "standard",
            AttributeProfile::CodeEditor => "code_editor",
            AttributeProfile::Terminal => "terminal",
            AttributeProfile::Chat => "chat",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppProfile {
    /// Minimum trimmed characters for an accessibility capture to count
    pub minimum_chars: usize,
    pub attribute_profile: AttributeProfile,
}

/// Editors and other apps whose accessible text is naturally sparse
const BUILTIN_PROFILES: &[(&str, usize, AttributeProfile)] = &[
    ("com.microsoft.VSCode*", 120, AttributeProfile::CodeEditor),
    ("com.visualstudio.code*", 120, AttributeProfile::CodeEditor),
    ("com.todesktop.*", 120, AttributeProfile::CodeEditor),
    ("com.jetbrains.*", 120, AttributeProfile::CodeEditor),
    ("com.apple.dt.Xcode", 120, AttributeProfile::CodeEditor),
    ("dev.zed.Zed*", 120, AttributeProfile::CodeEditor),
    ("com.sublimetext.*", 120, AttributeProfile::CodeEditor),
    ("com.apple.Terminal", 160, AttributeProfile::Terminal),
    ("com.googlecode.iterm2", 160, AttributeProfile::Terminal),
    ("com.tinyspeck.slackmacgap", 180, AttributeProfile::Chat),
    ("com.microsoft.teams*", 180, AttributeProfile::Chat),
];

#[derive(Debug, Clone)]
struct ProfileRule {
    pattern: Pattern,
    profile: AppProfile,
}

#[derive(Debug, Clone)]
pub struct ProfileTable {
    default: AppProfile,
    rules: Vec<ProfileRule>,
}

impl ProfileTable {
    /// Built-in rules with the given default threshold
    pub fn builtin(default_minimum_chars: usize) -> Self {
        let rules = BUILTIN_PROFILES
            .iter()
            .filter_map(|(pattern, minimum_chars, attribute_profile)| {
                Pattern::new(pattern).ok().map(|pattern| ProfileRule {
                    pattern,
                    profile: AppProfile {
                        minimum_chars: *minimum_chars,
                        attribute_profile: *attribute_profile,
                    },
                })
            })
            .collect();

        Self {
            default: AppProfile {
                minimum_chars: default_minimum_chars,
                attribute_profile: AttributeProfile::Standard,
            },
            rules,
        }
    }

    /// Configured overrides first, then the built-in table
    pub fn from_config(config: &ThresholdConfig) -> Self {
        let mut table = Self::builtin(config.accessibility_min_chars);
        let mut overrides = Vec::with_capacity(config.app_profiles.len());

        for entry in &config.app_profiles {
            match Pattern::new(&entry.pattern) {
                Ok(pattern) => overrides.push(ProfileRule {
                    pattern,
                    profile: AppProfile {
                        minimum_chars: entry.minimum_chars,
                        attribute_profile: entry.attribute_profile,
                    },
                }),
                Err(e) => warn!("Ignoring invalid app profile pattern '{}': {}", entry.pattern, e),
            }
        }

        overrides.append(&mut table.rules);
        table.rules = overrides;
        table
    }

    pub fn default_profile(&self) -> AppProfile {
        self.default
    }

    /// Profile for an app, matched by bundle ID and then by display name
    pub fn lookup(&self, bundle_id: &str, app_name: &str) -> AppProfile {
        let options = MatchOptions {
            case_sensitive: false,
            require_literal_separator: false,
            require_literal_leading_dot: false,
        };

        [bundle_id, app_name]
            .iter()
            .filter(|candidate| !candidate.is_empty())
            .find_map(|candidate| {
                self.rules
                    .iter()
                    .find(|rule| rule.pattern.matches_with(candidate, options))
            })
            .map(|rule| rule.profile)
            .unwrap_or(self.default)
    }
}

impl Default for ProfileTable {
    fn default() -> Self {
        Self::from_config(&ThresholdConfig::default())
    }
}
