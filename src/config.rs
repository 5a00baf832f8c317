//! Configuration Management
//!
//! Filter configuration for a run: a YAML file keyed by resource type name,
//! plus the age overlay from the command line.
//!
//! ```yaml
//! compute-instances:
//!   include:
//!     names_regex: ["^ci-"]
//!   exclude:
//!     tags: { env: "^prod$" }
//!     time_after: "2024-01-01T00:00:00Z"
//! pubsub-topics:
//!   protect_until_expire: true
//! ```

use crate::error::ConfigError;
use crate::filter::{FilterRule, Rule};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// One side of a filter as written in the config file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawRule {
    #[serde(default)]
    pub names_regex: Vec<String>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    #[serde(default)]
    pub time_after: Option<String>,
    #[serde(default)]
    pub time_before: Option<String>,
}

impl RawRule {
    fn compile(&self) -> Result<Rule, ConfigError> {
        let names_regex = self
            .names_regex
            .iter()
            .map(|p| compile_regex(p))
            .collect::<Result<Vec<_>, _>>()?;

        let tags = self
            .tags
            .iter()
            .map(|(key, p)| Ok((key.clone(), compile_regex(p)?)))
            .collect::<Result<HashMap<_, _>, ConfigError>>()?;

        Ok(Rule {
            names_regex,
            tags,
            time_after: self.time_after.as_deref().map(parse_time).transpose()?,
            time_before: self.time_before.as_deref().map(parse_time).transpose()?,
        })
    }
}

/// Per resource type section of the config file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceTypeConfig {
    #[serde(default)]
    pub include: RawRule,
    #[serde(default)]
    pub exclude: RawRule,
    #[serde(default)]
    pub protect_until_expire: bool,
}

impl ResourceTypeConfig {
    fn compile(&self) -> Result<FilterRule, ConfigError> {
        let mut rule = FilterRule::new(self.include.compile()?, self.exclude.compile()?);
        rule.protect_until_expire = self.protect_until_expire;
        Ok(rule)
    }
}

/// Compiled filter configuration for every resource type
#[derive(Debug, Clone, Default)]
pub struct NukeConfig {
    rules: HashMap<String, FilterRule>,
    /// Candidates created after this are kept (`--older-than`)
    exclude_after: Option<DateTime<Utc>>,
    /// Candidates created before this are kept (`--newer-than`)
    include_after: Option<DateTime<Utc>>,
}

impl NukeConfig {
    /// Load and compile a YAML config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_yaml_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let raw: Option<HashMap<String, ResourceTypeConfig>> = serde_yaml::from_str(content)?;
        let rules = raw
            .unwrap_or_default()
            .iter()
            .map(|(type_name, section)| Ok((type_name.clone(), section.compile()?)))
            .collect::<Result<HashMap<_, _>, ConfigError>>()?;

        Ok(Self {
            rules,
            ..Default::default()
        })
    }

    /// Keep everything younger than `age`
    pub fn with_older_than(mut self, age: Duration, now: DateTime<Utc>) -> Result<Self, ConfigError> {
        self.exclude_after = Some(cutoff(age, now)?);
        Ok(self)
    }

    /// Keep everything older than `age`
    pub fn with_newer_than(mut self, age: Duration, now: DateTime<Utc>) -> Result<Self, ConfigError> {
        self.include_after = Some(cutoff(age, now)?);
        Ok(self)
    }

    /// Effective filter for a resource type: its own section, tightened by
    /// the command line overlay
    pub fn filter_for(&self, type_name: &str) -> FilterRule {
        let mut rule = self.rules.get(type_name).cloned().unwrap_or_default();

        if let Some(after) = self.exclude_after {
            rule.exclude.time_after = Some(match rule.exclude.time_after {
                Some(existing) => existing.min(after),
                None => after,
            });
        }
        if let Some(after) = self.include_after {
            rule.include.time_after = Some(match rule.include.time_after {
                Some(existing) => existing.max(after),
                None => after,
            });
        }

        rule
    }

    /// Type names that have a section in the config file
    pub fn configured_types(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.rules.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Reject sections for resource types that do not exist
    pub fn validate_types(&self, known: &[&str]) -> Result<(), ConfigError> {
        match self.configured_types().into_iter().find(|t| !known.contains(t)) {
            Some(unknown) => Err(ConfigError::UnknownResourceType(unknown.to_string())),
            None => Ok(()),
        }
    }
}

/// `now - age`, rejecting ages that reach past the representable range
fn cutoff(age: Duration, now: DateTime<Utc>) -> Result<DateTime<Utc>, ConfigError> {
    now.checked_sub_signed(age)
        .ok_or_else(|| ConfigError::InvalidDuration(format!("{}s", age.num_seconds())))
}

fn compile_regex(pattern: &str) -> Result<Regex, ConfigError> {
    Regex::new(pattern).map_err(|source| ConfigError::InvalidRegex {
        pattern: pattern.to_string(),
        source,
    })
}

fn parse_time(s: &str) -> Result<DateTime<Utc>, ConfigError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| ConfigError::InvalidTime(s.to_string()))
}

/// Parse an age like `90s`, `30m`, `24h`, `7d` or `2w`
pub fn parse_duration(s: &str) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::InvalidDuration(s.to_string());
    let s = s.trim();
    let unit_at = s.len().checked_sub(1).ok_or_else(invalid)?;
    if !s.is_char_boundary(unit_at) {
        return Err(invalid());
    }
    let (value, unit) = s.split_at(unit_at);
    let value: i64 = value.parse().map_err(|_| invalid())?;
    if value < 0 {
        return Err(invalid());
    }

    match unit {
        "s" => Duration::try_seconds(value),
        "m" => Duration::try_minutes(value),
        "h" => Duration::try_hours(value),
        "d" => Duration::try_days(value),
        "w" => Duration::try_weeks(value),
        _ => None,
    }
    .ok_or_else(invalid)
}

/// Get effective project (CLI > environment > gcloud default)
pub fn resolve_project(cli: Option<&str>) -> Option<String> {
    cli.map(str::to_string)
        .or_else(crate::gcp::auth::get_default_project)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::ResourceValue;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
    }

    fn value(name: &str, time: DateTime<Utc>) -> ResourceValue {
        ResourceValue::new(Some(name.to_string()), Some(time), HashMap::new())
    }

    #[test]
    fn parses_rules_per_type() {
        let config = NukeConfig::from_yaml_str(
            r#"
compute-instances:
  include:
    names_regex: ["^ci-"]
  exclude:
    tags:
      env: "^prod$"
    time_after: "2024-01-01T00:00:00Z"
pubsub-topics:
  protect_until_expire: true
"#,
        )
        .unwrap();

        assert_eq!(
            config.configured_types(),
            vec!["compute-instances", "pubsub-topics"]
        );

        let rule = config.filter_for("compute-instances");
        assert_eq!(rule.include.names_regex.len(), 1);
        assert!(rule.exclude.tags.contains_key("env"));
        assert!(rule.exclude.time_after.is_some());
        assert!(config.filter_for("pubsub-topics").protect_until_expire);
    }

    #[test]
    fn unconfigured_type_gets_empty_rule() {
        let config = NukeConfig::from_yaml_str("").unwrap();
        let rule = config.filter_for("compute-disks");
        assert!(!rule.include.has_matchers());
        assert!(rule.should_include(&value("anything", t0())));
    }

    #[test]
    fn invalid_regex_is_rejected() {
        let err = NukeConfig::from_yaml_str("compute-disks:\n  exclude:\n    names_regex: [\"(\"]\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRegex { .. }));
    }

    #[test]
    fn invalid_time_is_rejected() {
        let err = NukeConfig::from_yaml_str("compute-disks:\n  exclude:\n    time_after: yesterday\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTime(_)));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = NukeConfig::from_yaml_str("compute-disks:\n  exclude:\n    name_regex: [a]\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn older_than_keeps_recent_resources() {
        let config = NukeConfig::default()
            .with_older_than(Duration::hours(24), t0())
            .unwrap();
        let rule = config.filter_for("compute-disks");

        assert!(rule.should_include(&value("old", t0() - Duration::days(2))));
        assert!(!rule.should_include(&value("new", t0() - Duration::hours(1))));
    }

    #[test]
    fn newer_than_keeps_old_resources() {
        let config = NukeConfig::default()
            .with_newer_than(Duration::hours(24), t0())
            .unwrap();
        let rule = config.filter_for("compute-disks");

        assert!(!rule.should_include(&value("old", t0() - Duration::days(2))));
        assert!(rule.should_include(&value("new", t0() - Duration::hours(1))));
    }

    #[test]
    fn huge_age_is_an_error_not_a_panic() {
        let age = parse_duration("100000000d").unwrap();

        let err = NukeConfig::default().with_older_than(age, t0()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDuration(_)));
        let err = NukeConfig::default().with_newer_than(age, t0()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDuration(_)));
    }

    #[test]
    fn overlay_tightens_file_rules() {
        let config = NukeConfig::from_yaml_str(
            "compute-disks:\n  exclude:\n    time_after: \"2024-04-01T00:00:00Z\"\n",
        )
        .unwrap()
        .with_older_than(Duration::days(7), t0())
        .unwrap();

        // File cutoff (April 1st) is earlier than now - 7d, so it wins
        let rule = config.filter_for("compute-disks");
        assert_eq!(
            rule.exclude.time_after,
            Some(Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn validate_types_against_registry() {
        let config = NukeConfig::from_yaml_str("compute-vms: {}\n").unwrap();
        let err = config
            .validate_types(&["compute-instances", "compute-disks"])
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownResourceType(t) if t == "compute-vms"));
    }

    #[test]
    fn durations() {
        assert_eq!(parse_duration("90s").unwrap(), Duration::seconds(90));
        assert_eq!(parse_duration("30m").unwrap(), Duration::minutes(30));
        assert_eq!(parse_duration("24h").unwrap(), Duration::hours(24));
        assert_eq!(parse_duration("7d").unwrap(), Duration::days(7));
        assert_eq!(parse_duration("2w").unwrap(), Duration::weeks(2));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("h").is_err());
        assert!(parse_duration("5y").is_err());
        assert!(parse_duration("-5d").is_err());
        assert!(parse_duration("5é").is_err());
    }

    #[test]
    fn cli_project_wins() {
        assert_eq!(resolve_project(Some("my-project-1")).as_deref(), Some("my-project-1"));
    }
}
