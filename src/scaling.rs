//! Fixed per-key conversions applied before a value is exposed.
//!
//! The cloud reports some readings as integers in fixed-point form
//! (`salt_level_tenths = 455` means 45.5 %). Numeric values whose key
//! matches a rule are divided by the rule's divisor; everything else is
//! passed through untouched.

use crate::property::PropertyValue;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KeyPattern {
    Exact(&'static str),
    Suffix(&'static str),
    Contains(&'static str),
}

impl KeyPattern {
    pub fn matches(&self, key: &str) -> bool {
        match self {
            KeyPattern::Exact(k) => key == *k,
            KeyPattern::Suffix(s) => key.ends_with(s),
            KeyPattern::Contains(s) => key.contains(s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalingRule {
    pub pattern: KeyPattern,
    pub divisor: f64,
}

/// First match wins.
pub const SCALING_RULES: &[ScalingRule] = &[
    ScalingRule {
        pattern: KeyPattern::Suffix("_tenths"),
        divisor: 10.0,
    },
    ScalingRule {
        pattern: KeyPattern::Contains("_tenths_"),
        divisor: 10.0,
    },
    ScalingRule {
        pattern: KeyPattern::Exact("avg_salt_per_regen_lbs"),
        divisor: 1000.0,
    },
];

pub fn rule_for(key: &str) -> Option<&'static ScalingRule> {
    SCALING_RULES.iter().find(|rule| rule.pattern.matches(key))
}

pub fn scale(key: &str, value: &PropertyValue) -> PropertyValue {
    match (value, rule_for(key)) {
        (PropertyValue::Number(n), Some(rule)) => PropertyValue::Number(n / rule.divisor),
        _ => value.clone(),
    }
}

pub fn scale_f64(key: &str, raw: f64) -> f64 {
    rule_for(key).map_or(raw, |rule| raw / rule.divisor)
}
