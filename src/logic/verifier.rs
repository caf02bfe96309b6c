use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::logic::expected::ExpectedResult;
use crate::logic::match_criteria::MatchEvaluator;
use crate::model::{Id, InstanceProperties, MatchCriteria, SearchableInstance};

/// The predicate a search was issued with, in the form used to re-check
/// instances independently of the repository
#[derive(Debug, Clone)]
pub enum SearchPredicate {
    /// Exact match properties (literal values, before any regex escaping)
    MatchProperties {
        properties: InstanceProperties,
        criteria: MatchCriteria,
    },
    /// A regex over a single string attribute
    AttributeRegex {
        attribute: String,
        regex: Regex,
        criteria: MatchCriteria,
    },
    /// Free-text search: any string property fully matching
    PropertyValue { regex: Regex },
}

impl SearchPredicate {
    pub fn admits(&self, properties: &InstanceProperties) -> bool {
        match self {
            SearchPredicate::MatchProperties {
                properties: match_props,
                criteria,
            } => MatchEvaluator::satisfies(properties, Some(match_props), *criteria),
            SearchPredicate::AttributeRegex {
                attribute,
                regex,
                criteria,
            } => MatchEvaluator::satisfies_regex(properties, attribute, regex, *criteria),
            SearchPredicate::PropertyValue { regex } => {
                MatchEvaluator::any_string_matches(properties, regex)
            }
        }
    }

    pub fn describe(&self) -> String {
        match self {
            SearchPredicate::MatchProperties {
                properties,
                criteria,
            } => {
                let pairs: Vec<String> = properties
                    .iter()
                    .map(|(name, value)| format!("{}={}", name, value))
                    .collect();
                format!("{} of [{}]", criteria, pairs.join(", "))
            }
            SearchPredicate::AttributeRegex {
                attribute,
                regex,
                criteria,
            } => format!("{} {} ~ /{}/", criteria, attribute, regex.as_str()),
            SearchPredicate::PropertyValue { regex } => format!("any value ~ /{}/", regex.as_str()),
        }
    }
}

/// Checks applied to a search result, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchCheck {
    NonNull,
    Size,
    Content,
    Contamination,
}

/// Outcome of verifying one search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchVerdict {
    pub non_null_ok: bool,
    pub size_ok: bool,
    pub content_ok: bool,
    pub contamination_free: bool,
    pub page_limited: bool,
    pub actual_count: usize,
    pub expected_count: usize,
    /// Expected ids absent from the result
    pub missing: Vec<Id>,
    /// Returned ids outside the expected set
    pub extras: Vec<Id>,
    /// Extras that do not independently satisfy the predicate
    pub contaminants: Vec<Id>,
}

impl SearchVerdict {
    pub fn passed(&self) -> bool {
        self.first_failure().is_none()
    }

    pub fn first_failure(&self) -> Option<SearchCheck> {
        if !self.non_null_ok {
            Some(SearchCheck::NonNull)
        } else if !self.size_ok {
            Some(SearchCheck::Size)
        } else if !self.content_ok {
            Some(SearchCheck::Content)
        } else if !self.contamination_free {
            Some(SearchCheck::Contamination)
        } else {
            None
        }
    }
}

pub struct SearchVerifier;

impl SearchVerifier {
    /// Compare an actual search result against the expected ids.
    ///
    /// When the expectation is page limited it is a lower bound: a larger result
    /// is acceptable so long as every extra instance satisfies the predicate on
    /// its own properties. Otherwise the result must match exactly and any extra
    /// instance is contamination.
    pub fn verify<I: SearchableInstance>(
        actual: Option<&[I]>,
        expected: &ExpectedResult,
        predicate: &SearchPredicate,
    ) -> SearchVerdict {
        let page_limited = expected.page_limited;
        let expected_count = expected.ids.len();

        let results = match actual {
            Some(results) if !results.is_empty() => results,
            // An absent result is only correct when nothing was expected
            _ => {
                let nothing_expected = expected.is_empty();
                return SearchVerdict {
                    non_null_ok: nothing_expected,
                    size_ok: nothing_expected,
                    content_ok: nothing_expected,
                    contamination_free: true,
                    page_limited,
                    actual_count: 0,
                    expected_count,
                    missing: expected.ids.clone(),
                    extras: Vec::new(),
                    contaminants: Vec::new(),
                };
            }
        };

        let actual_count = results.len();
        let size_ok = if page_limited {
            actual_count >= expected_count
        } else {
            actual_count == expected_count
        };

        let returned: HashSet<&str> = results.iter().map(|r| r.guid()).collect();
        let missing: Vec<Id> = expected
            .ids
            .iter()
            .filter(|id| !returned.contains(id.as_str()))
            .cloned()
            .collect();

        let wanted: HashSet<&str> = expected.ids.iter().map(String::as_str).collect();
        let extra_instances: Vec<&I> = results
            .iter()
            .filter(|r| !wanted.contains(r.guid()))
            .collect();
        let extras: Vec<Id> = extra_instances
            .iter()
            .map(|r| r.guid().to_string())
            .collect();

        let content_ok = missing.is_empty() && (page_limited || extras.is_empty());

        let contaminants: Vec<Id> = extra_instances
            .iter()
            .filter(|r| !page_limited || !predicate.admits(r.properties()))
            .map(|r| r.guid().to_string())
            .collect();

        SearchVerdict {
            non_null_ok: true,
            size_ok,
            content_ok,
            contamination_free: contaminants.is_empty(),
            page_limited,
            actual_count,
            expected_count,
            missing,
            extras,
            contaminants,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::match_criteria::{full_match_regex, literalise};
    use crate::model::{EntityDetail, InstanceHeader, InstanceSnapshot, PrimitiveValue};

    fn entity(guid: &str, name: &str, count: i32) -> InstanceSnapshot {
        let mut properties = InstanceProperties::new();
        properties.insert("name".into(), PrimitiveValue::String(name.into()));
        properties.insert("count".into(), PrimitiveValue::Int(count));
        InstanceSnapshot::from(EntityDetail {
            header: InstanceHeader::new(guid.into(), "t".into(), "Thing".into(), "mc".into(), "u"),
            properties,
        })
    }

    fn expect(ids: &[&str], page_limited: bool) -> ExpectedResult {
        ExpectedResult {
            ids: ids.iter().map(|s| s.to_string()).collect(),
            page_limited,
        }
    }

    fn name_is(value: &str, criteria: MatchCriteria) -> SearchPredicate {
        let mut properties = InstanceProperties::new();
        properties.insert("name".into(), PrimitiveValue::String(value.into()));
        SearchPredicate::MatchProperties {
            properties,
            criteria,
        }
    }

    #[test]
    fn test_exact_match_passes() {
        let actual = vec![entity("e1", "name.1", 43), entity("e2", "name.1", 44)];
        let verdict = SearchVerifier::verify(
            Some(actual.as_slice()),
            &expect(&["e2", "e1"], false),
            &name_is("name.1", MatchCriteria::All),
        );
        assert!(verdict.passed(), "{:?}", verdict);
    }

    #[test]
    fn test_absent_result_only_ok_when_nothing_expected() {
        let predicate = name_is("name.9", MatchCriteria::All);
        let none: Option<&[InstanceSnapshot]> = None;

        assert!(SearchVerifier::verify(none, &expect(&[], false), &predicate).passed());

        let verdict = SearchVerifier::verify(none, &expect(&["e1"], false), &predicate);
        assert_eq!(verdict.first_failure(), Some(SearchCheck::NonNull));
        assert_eq!(verdict.missing, vec!["e1".to_string()]);
    }

    #[test]
    fn test_missing_instance_fails_content() {
        let actual = vec![entity("e1", "name.1", 43), entity("e3", "name.1", 45)];
        let verdict = SearchVerifier::verify(
            Some(actual.as_slice()),
            &expect(&["e1", "e2"], false),
            &name_is("name.1", MatchCriteria::All),
        );
        assert!(verdict.size_ok);
        assert!(!verdict.content_ok);
        assert_eq!(verdict.missing, vec!["e2".to_string()]);
    }

    #[test]
    fn test_extra_without_page_limit_is_contamination() {
        // The extra instance satisfies the predicate but the survey was exhaustive
        let actual = vec![entity("e1", "name.1", 43), entity("e9", "name.1", 49)];
        let verdict = SearchVerifier::verify(
            Some(actual.as_slice()),
            &expect(&["e1"], false),
            &name_is("name.1", MatchCriteria::All),
        );
        assert!(!verdict.size_ok);
        assert!(!verdict.contamination_free);
        assert_eq!(verdict.contaminants, vec!["e9".to_string()]);
    }

    #[test]
    fn test_page_limited_superset_with_legitimate_extras() {
        let actual = vec![
            entity("e1", "name.1", 43),
            entity("e2", "name.1", 44),
            entity("e9", "name.1", 49),
        ];
        let verdict = SearchVerifier::verify(
            Some(actual.as_slice()),
            &expect(&["e1", "e2"], true),
            &name_is("name.1", MatchCriteria::All),
        );
        assert!(verdict.passed(), "{:?}", verdict);
        assert_eq!(verdict.extras, vec!["e9".to_string()]);
        assert!(verdict.contaminants.is_empty());
    }

    #[test]
    fn test_page_limited_extra_that_fails_predicate_is_contamination() {
        let actual = vec![entity("e1", "name.1", 43), entity("e9", "name.0", 42)];
        let verdict = SearchVerifier::verify(
            Some(actual.as_slice()),
            &expect(&["e1"], true),
            &name_is("name.1", MatchCriteria::All),
        );
        assert!(verdict.size_ok);
        assert!(verdict.content_ok);
        assert_eq!(verdict.first_failure(), Some(SearchCheck::Contamination));
    }

    #[test]
    fn test_page_limited_none_criterion() {
        let actual = vec![entity("e0", "name.0", 42), entity("e8", "name.2", 48)];
        let verdict = SearchVerifier::verify(
            Some(actual.as_slice()),
            &expect(&["e0"], true),
            &name_is("name.1", MatchCriteria::None),
        );
        assert!(verdict.passed(), "{:?}", verdict);
    }

    #[test]
    fn test_property_value_predicate_rejects_similar_value() {
        let regex = full_match_regex(&literalise("name.0")).unwrap();
        let predicate = SearchPredicate::PropertyValue { regex };
        let actual = vec![entity("e0", "name.0", 42), entity("e7", "name.10", 52)];
        let verdict = SearchVerifier::verify(Some(actual.as_slice()), &expect(&["e0"], true), &predicate);
        assert_eq!(verdict.contaminants, vec!["e7".to_string()]);
    }
}
