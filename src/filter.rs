//! Filter Engine
//!
//! Decides whether a candidate resource should be deleted from its name,
//! creation (or first-seen) time and tags. Exclusion always wins over
//! inclusion.

use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::HashMap;

/// Tag that protects a resource from deletion regardless of rules
pub const EXCLUSION_TAG_KEY: &str = "cloud-nuke-excluded";

/// Value of [`EXCLUSION_TAG_KEY`] that activates the protection
pub const EXCLUSION_TAG_VALUE: &str = "true";

/// Tag holding an RFC3339 time before which the resource is protected
/// (only honoured when `protect_until_expire` is set for the type)
pub const EXPIRE_AFTER_TAG_KEY: &str = "cloud-nuke-after";

/// Filter input for a single candidate
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceValue {
    pub name: Option<String>,
    pub time: Option<DateTime<Utc>>,
    pub tags: HashMap<String, String>,
}

impl ResourceValue {
    pub fn new(
        name: Option<String>,
        time: Option<DateTime<Utc>>,
        tags: HashMap<String, String>,
    ) -> Self {
        Self { name, time, tags }
    }
}

/// One side (include or exclude) of a filter
#[derive(Debug, Clone, Default)]
pub struct Rule {
    pub names_regex: Vec<Regex>,
    pub tags: HashMap<String, Regex>,
    pub time_after: Option<DateTime<Utc>>,
    pub time_before: Option<DateTime<Utc>>,
}

impl Rule {
    /// Whether the rule carries name or tag matchers
    pub fn has_matchers(&self) -> bool {
        !self.names_regex.is_empty() || !self.tags.is_empty()
    }

    fn matches_name(&self, name: Option<&str>) -> bool {
        let Some(name) = name else {
            return false;
        };
        self.names_regex.iter().any(|re| re.is_match(name))
    }

    fn matches_tags(&self, tags: &HashMap<String, String>) -> bool {
        self.tags.iter().any(|(key, re)| {
            tags.get(key)
                .map(|value| re.is_match(value))
                .unwrap_or(false)
        })
    }

    fn matches_name_or_tags(&self, value: &ResourceValue) -> bool {
        self.matches_name(value.name.as_deref()) || self.matches_tags(&value.tags)
    }
}

/// Include/exclude rules for one resource type
#[derive(Debug, Clone)]
pub struct FilterRule {
    pub include: Rule,
    pub exclude: Rule,
    pub protect_until_expire: bool,
    /// Reference point for [`EXPIRE_AFTER_TAG_KEY`]; fixed when the rule is built
    pub evaluated_at: DateTime<Utc>,
}

impl Default for FilterRule {
    fn default() -> Self {
        Self {
            include: Rule::default(),
            exclude: Rule::default(),
            protect_until_expire: false,
            evaluated_at: Utc::now(),
        }
    }
}

impl FilterRule {
    pub fn new(include: Rule, exclude: Rule) -> Self {
        Self {
            include,
            exclude,
            ..Default::default()
        }
    }

    /// Returns true iff the candidate should be deleted.
    pub fn should_include(&self, value: &ResourceValue) -> bool {
        if is_protected_by_tag(&value.tags) {
            return false;
        }

        if self.protect_until_expire && self.is_before_expiry(&value.tags) {
            return false;
        }

        if self.exclude.matches_name(value.name.as_deref()) {
            return false;
        }

        if self.exclude.matches_tags(&value.tags) {
            return false;
        }

        // No timestamp means nothing to compare against
        if let Some(time) = value.time {
            if matches!(self.exclude.time_after, Some(after) if time > after) {
                return false;
            }
            if matches!(self.exclude.time_before, Some(before) if time < before) {
                return false;
            }
            if matches!(self.include.time_after, Some(after) if time < after) {
                return false;
            }
            if matches!(self.include.time_before, Some(before) if time > before) {
                return false;
            }
        }

        if self.include.has_matchers() {
            return self.include.matches_name_or_tags(value);
        }

        true
    }

    fn is_before_expiry(&self, tags: &HashMap<String, String>) -> bool {
        tags.get(EXPIRE_AFTER_TAG_KEY)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|expiry| expiry.with_timezone(&Utc) > self.evaluated_at)
            .unwrap_or(false)
    }
}

fn is_protected_by_tag(tags: &HashMap<String, String>) -> bool {
    tags.get(EXCLUSION_TAG_KEY)
        .map(|v| v.eq_ignore_ascii_case(EXCLUSION_TAG_VALUE))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
    }

    fn named(name: &str) -> ResourceValue {
        ResourceValue::new(Some(name.to_string()), Some(t0()), HashMap::new())
    }

    fn names(patterns: &[&str]) -> Rule {
        Rule {
            names_regex: patterns.iter().map(|p| Regex::new(p).unwrap()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn empty_rule_includes_everything() {
        assert!(FilterRule::default().should_include(&named("anything")));
        assert!(FilterRule::default().should_include(&ResourceValue::default()));
    }

    #[test]
    fn exclude_name_regex_drops_candidate() {
        let rule = FilterRule::new(Rule::default(), names(&["^prod-"]));
        assert!(!rule.should_include(&named("prod-db")));
        assert!(rule.should_include(&named("dev-db")));
    }

    #[test]
    fn exclude_wins_over_include() {
        let rule = FilterRule::new(names(&["-db$"]), names(&["^prod-"]));
        assert!(!rule.should_include(&named("prod-db")));
        assert!(rule.should_include(&named("dev-db")));
        assert!(!rule.should_include(&named("dev-cache")));
    }

    #[test]
    fn exclude_tag_matches_present_tag_only() {
        let exclude = Rule {
            tags: HashMap::from([("env".to_string(), Regex::new("^prod$").unwrap())]),
            ..Default::default()
        };
        let rule = FilterRule::new(Rule::default(), exclude);

        let mut value = named("svc");
        assert!(rule.should_include(&value));

        value.tags.insert("env".to_string(), "prod".to_string());
        assert!(!rule.should_include(&value));

        // Case sensitive on both key and value
        value.tags.clear();
        value.tags.insert("ENV".to_string(), "prod".to_string());
        assert!(rule.should_include(&value));
        value.tags.clear();
        value.tags.insert("env".to_string(), "PROD".to_string());
        assert!(rule.should_include(&value));
    }

    #[test]
    fn exclude_time_window() {
        let exclude = Rule {
            time_after: Some(t0() - Duration::hours(1)),
            ..Default::default()
        };
        let rule = FilterRule::new(Rule::default(), exclude);
        assert!(!rule.should_include(&named("recent")));

        let exclude = Rule {
            time_before: Some(t0() + Duration::hours(1)),
            ..Default::default()
        };
        let rule = FilterRule::new(Rule::default(), exclude);
        assert!(!rule.should_include(&named("old")));
    }

    #[test]
    fn missing_time_passes_time_checks() {
        let exclude = Rule {
            time_after: Some(t0()),
            time_before: Some(t0()),
            ..Default::default()
        };
        let rule = FilterRule::new(Rule::default(), exclude);
        let value = ResourceValue::new(Some("x".to_string()), None, HashMap::new());
        assert!(rule.should_include(&value));
    }

    #[test]
    fn include_requires_a_name_or_tag_match() {
        let include = Rule {
            names_regex: vec![Regex::new("^ci-").unwrap()],
            tags: HashMap::from([("owner".to_string(), Regex::new("^bot$").unwrap())]),
            ..Default::default()
        };
        let rule = FilterRule::new(include, Rule::default());

        assert!(rule.should_include(&named("ci-runner")));
        assert!(!rule.should_include(&named("web")));

        let mut tagged = named("web");
        tagged.tags.insert("owner".to_string(), "bot".to_string());
        assert!(rule.should_include(&tagged));

        // Missing name cannot satisfy a name matcher
        assert!(!rule.should_include(&ResourceValue::default()));
    }

    #[test]
    fn include_time_after_keeps_only_newer() {
        let include = Rule {
            time_after: Some(t0() + Duration::minutes(5)),
            ..Default::default()
        };
        let rule = FilterRule::new(include, Rule::default());
        assert!(!rule.should_include(&named("older")));
    }

    #[test]
    fn exclusion_tag_always_protects() {
        let mut value = named("ci-runner");
        value
            .tags
            .insert(EXCLUSION_TAG_KEY.to_string(), "true".to_string());
        let rule = FilterRule::new(names(&["^ci-"]), Rule::default());
        assert!(!rule.should_include(&value));
    }

    #[test]
    fn protect_until_expire_honours_future_expiry() {
        let mut rule = FilterRule::default();
        rule.protect_until_expire = true;
        rule.evaluated_at = t0();

        let mut value = named("temp");
        value.tags.insert(
            EXPIRE_AFTER_TAG_KEY.to_string(),
            (t0() + Duration::days(1)).to_rfc3339(),
        );
        assert!(!rule.should_include(&value));

        value.tags.insert(
            EXPIRE_AFTER_TAG_KEY.to_string(),
            (t0() - Duration::days(1)).to_rfc3339(),
        );
        assert!(rule.should_include(&value));

        rule.protect_until_expire = false;
        value.tags.insert(
            EXPIRE_AFTER_TAG_KEY.to_string(),
            (t0() + Duration::days(1)).to_rfc3339(),
        );
        assert!(rule.should_include(&value));
    }
}
