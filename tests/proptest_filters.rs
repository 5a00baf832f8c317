//! Property-based tests using proptest
//!
//! These tests verify the filter engine, first-seen tagging and CLI input
//! parsing against randomized inputs.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use cloud_nuke::config::parse_duration;
use cloud_nuke::filter::{FilterRule, ResourceValue, Rule, EXCLUSION_TAG_KEY};
use cloud_nuke::first_seen::{get_or_create_first_seen_at, TagWriter, FIRST_SEEN_TAG_KEY};
use cloud_nuke::gcp::auth::validate_project_id;
use proptest::prelude::*;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Mutex;

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// Arbitrary candidate: name, creation time within ~3 years, a few tags
fn arb_value() -> impl Strategy<Value = ResourceValue> {
    (
        prop::option::of("[a-z][a-z0-9-]{0,30}"),
        prop::option::of(0i64..100_000_000),
        prop::collection::hash_map("[a-z]{1,8}", "[a-z0-9]{0,8}", 0..4),
    )
        .prop_map(|(name, offset, tags)| {
            let time = offset.map(|secs| base_time() + Duration::seconds(secs));
            ResourceValue::new(name, time, tags)
        })
}

fn arb_rule() -> impl Strategy<Value = Rule> {
    (
        prop::collection::vec(prop_oneof![Just("^ci-"), Just("-tmp$"), Just("test"), Just("^[a-m]")], 0..3),
        prop::option::of(0i64..100_000_000),
        prop::option::of(0i64..100_000_000),
    )
        .prop_map(|(patterns, after, before)| Rule {
            names_regex: patterns.iter().map(|p| Regex::new(p).unwrap()).collect(),
            time_after: after.map(|s| base_time() + Duration::seconds(s)),
            time_before: before.map(|s| base_time() + Duration::seconds(s)),
            ..Default::default()
        })
}

fn arb_filter() -> impl Strategy<Value = FilterRule> {
    (arb_rule(), arb_rule()).prop_map(|(include, exclude)| FilterRule::new(include, exclude))
}

proptest! {
    /// A rule with no matchers and no time bounds keeps every unprotected candidate
    #[test]
    fn empty_rule_includes_all(value in arb_value()) {
        prop_assume!(!value.tags.contains_key(EXCLUSION_TAG_KEY));
        prop_assert!(FilterRule::default().should_include(&value));
    }

    /// The exclusion tag wins over any rule
    #[test]
    fn exclusion_tag_always_excludes(mut value in arb_value(), filter in arb_filter()) {
        value.tags.insert(EXCLUSION_TAG_KEY.to_string(), "true".to_string());
        prop_assert!(!filter.should_include(&value));
    }

    /// A name matched by the exclude side is never included, whatever the include side says
    #[test]
    fn exclude_name_takes_precedence(value in arb_value(), include in arb_rule()) {
        let Some(name) = value.name.clone() else {
            return Ok(());
        };
        let exclude = Rule {
            names_regex: vec![Regex::new(&format!("^{}$", regex::escape(&name))).unwrap()],
            ..Default::default()
        };
        let filter = FilterRule::new(include, exclude);
        prop_assert!(!filter.should_include(&value));
    }

    /// Evaluation is pure
    #[test]
    fn evaluation_is_deterministic(value in arb_value(), filter in arb_filter()) {
        prop_assert_eq!(filter.should_include(&value), filter.should_include(&value));
    }

    /// Adding exclude constraints never lets more candidates through
    #[test]
    fn stricter_exclude_never_includes_more(value in arb_value(), include in arb_rule()) {
        let loose = FilterRule::new(include.clone(), Rule::default());
        let strict = FilterRule::new(include, Rule {
            names_regex: vec![Regex::new("-").unwrap()],
            ..Default::default()
        });
        if strict.should_include(&value) {
            prop_assert!(loose.should_include(&value));
        }
    }
}

/// Records every tag write
#[derive(Default)]
struct RecordingWriter {
    writes: Mutex<Vec<HashMap<String, String>>>,
}

#[async_trait]
impl TagWriter for RecordingWriter {
    async fn write_tags(&self, _identifier: &str, tags: &HashMap<String, String>) -> anyhow::Result<()> {
        self.writes.lock().unwrap().push(tags.clone());
        Ok(())
    }
}

proptest! {
    /// Once a marker is written, every later observation returns the same time
    /// and writes nothing
    #[test]
    fn first_seen_is_stable(
        tags in prop::collection::hash_map("[a-z]{1,8}", "[a-z0-9]{0,8}", 0..4),
        first in 0i64..100_000_000,
        later in 1i64..10_000_000,
    ) {
        let writer = RecordingWriter::default();
        let first_at = base_time() + Duration::seconds(first);

        let seen = tokio_test::block_on(get_or_create_first_seen_at(&writer, "r1", &tags, first_at)).unwrap();
        prop_assert_eq!(seen, first_at);

        let persisted = writer.writes.lock().unwrap()[0].clone();
        prop_assert!(persisted.contains_key(FIRST_SEEN_TAG_KEY));
        for (key, value) in &tags {
            prop_assert_eq!(persisted.get(key), Some(value));
        }

        let again = tokio_test::block_on(get_or_create_first_seen_at(
            &writer,
            "r1",
            &persisted,
            first_at + Duration::seconds(later),
        ))
        .unwrap();
        prop_assert_eq!(again, first_at);
        prop_assert_eq!(writer.writes.lock().unwrap().len(), 1);
    }
}

/// Tests for CLI input parsing
mod input_validation_tests {
    use super::*;

    proptest! {
        /// Every `<n><unit>` duration parses to the expected span
        #[test]
        fn durations_parse(n in 1i64..10_000, unit in prop_oneof!["s", "m", "h", "d", "w"]) {
            let expected = match unit.as_str() {
                "s" => Duration::seconds(n),
                "m" => Duration::minutes(n),
                "h" => Duration::hours(n),
                "d" => Duration::days(n),
                _ => Duration::weeks(n),
            };
            prop_assert_eq!(parse_duration(&format!("{n}{unit}")).unwrap(), expected);
        }

        /// Garbage never parses as a duration
        #[test]
        fn junk_durations_rejected(s in "[a-z]{1,6}") {
            prop_assert!(parse_duration(&s).is_err());
        }

        /// Valid project IDs are accepted
        #[test]
        fn valid_project_ids_accepted(id in "[a-z][a-z0-9-]{4,28}[a-z0-9]") {
            prop_assert!(validate_project_id(&id));
        }

        /// Project IDs starting with a digit are rejected
        #[test]
        fn project_ids_starting_with_digit_rejected(id in "[0-9][a-z0-9-]{5,29}") {
            prop_assert!(!validate_project_id(&id));
        }

        /// Uppercase characters are rejected
        #[test]
        fn uppercase_project_ids_rejected(id in "[a-z][a-zA-Z0-9-]{4,28}[A-Z]") {
            prop_assert!(!validate_project_id(&id));
        }
    }
}
