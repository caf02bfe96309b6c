use regex::Regex;

use crate::model::{InstanceProperties, MatchCriteria, PrimitiveValue};

/// Decides whether an instance's properties satisfy a set of match properties
/// combined under a match criterion.
///
/// A property missing from the instance never matches. Under NONE that makes
/// the missing key automatically compliant.
pub struct MatchEvaluator;

impl MatchEvaluator {
    /// Value-equality evaluation
    pub fn satisfies(
        instance_props: &InstanceProperties,
        match_props: Option<&InstanceProperties>,
        criteria: MatchCriteria,
    ) -> bool {
        Self::satisfies_with(instance_props, match_props, criteria, |expected, actual| {
            expected == actual
        })
    }

    /// Evaluation with a caller-supplied notion of a single key matching
    pub fn satisfies_with<F>(
        instance_props: &InstanceProperties,
        match_props: Option<&InstanceProperties>,
        criteria: MatchCriteria,
        matches: F,
    ) -> bool
    where
        F: Fn(&PrimitiveValue, &PrimitiveValue) -> bool,
    {
        let match_props = match match_props {
            Some(props) if !props.is_empty() => props,
            _ => return true,
        };

        let mut mirrored = match_props.iter().map(|(name, expected)| {
            instance_props
                .get(name)
                .map(|actual| matches(expected, actual))
                .unwrap_or(false)
        });

        match criteria {
            MatchCriteria::All => mirrored.all(|hit| hit),
            MatchCriteria::Any => mirrored.any(|hit| hit),
            MatchCriteria::None => !mirrored.any(|hit| hit),
        }
    }

    /// Single-attribute regex check. ALL and ANY both need a positive full match
    /// on the named string attribute; NONE needs its negation.
    pub fn satisfies_regex(
        instance_props: &InstanceProperties,
        attribute_name: &str,
        regex: &Regex,
        criteria: MatchCriteria,
    ) -> bool {
        let hit = instance_props
            .get(attribute_name)
            .and_then(PrimitiveValue::as_str)
            .map(|value| regex.is_match(value))
            .unwrap_or(false);

        match criteria {
            MatchCriteria::All | MatchCriteria::Any => hit,
            MatchCriteria::None => !hit,
        }
    }

    /// Whether any string property of the instance fully matches `regex`
    pub fn any_string_matches(instance_props: &InstanceProperties, regex: &Regex) -> bool {
        instance_props
            .values()
            .filter_map(PrimitiveValue::as_str)
            .any(|value| regex.is_match(value))
    }
}

/// Escape a literal string so that, as a regex, it matches exactly that string
pub fn literalise(value: &str) -> String {
    regex::escape(value)
}

/// Compile `pattern` so it must match a whole value rather than a substring
pub fn full_match_regex(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("^(?:{})$", pattern))
}

/// Copy of a property bag with every string value literalised, for use as regex search input
pub fn literalise_properties(props: &InstanceProperties) -> InstanceProperties {
    props
        .iter()
        .map(|(name, value)| {
            let value = match value {
                PrimitiveValue::String(s) => PrimitiveValue::String(literalise(s)),
                other => other.clone(),
            };
            (name.clone(), value)
        })
        .collect()
}

/// Convenience wrapper over [`MatchEvaluator::satisfies`]
pub fn satisfies(
    instance_props: &InstanceProperties,
    match_props: Option<&InstanceProperties>,
    criteria: MatchCriteria,
) -> bool {
    MatchEvaluator::satisfies(instance_props, match_props, criteria)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bag(pairs: &[(&str, PrimitiveValue)]) -> InstanceProperties {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn s(value: &str) -> PrimitiveValue {
        PrimitiveValue::String(value.to_string())
    }

    #[test]
    fn test_absent_or_empty_match_props_always_pass() {
        let instance = bag(&[("name", s("name.0"))]);
        for criteria in MatchCriteria::EVERY {
            assert!(satisfies(&instance, None, criteria));
            assert!(satisfies(&instance, Some(&InstanceProperties::new()), criteria));
        }
    }

    #[test]
    fn test_all_requires_every_key() {
        let instance = bag(&[("name", s("name.1")), ("count", PrimitiveValue::Int(43))]);
        let both = bag(&[("name", s("name.1")), ("count", PrimitiveValue::Int(43))]);
        let one_wrong = bag(&[("name", s("name.1")), ("count", PrimitiveValue::Int(44))]);
        let missing = bag(&[("name", s("name.1")), ("owner", s("owner.1"))]);

        assert!(satisfies(&instance, Some(&both), MatchCriteria::All));
        assert!(!satisfies(&instance, Some(&one_wrong), MatchCriteria::All));
        assert!(!satisfies(&instance, Some(&missing), MatchCriteria::All));
    }

    #[test]
    fn test_any_requires_one_key() {
        let instance = bag(&[("name", s("name.1")), ("count", PrimitiveValue::Int(43))]);
        let one_right = bag(&[("name", s("name.0")), ("count", PrimitiveValue::Int(43))]);
        let none_right = bag(&[("name", s("name.0")), ("owner", s("owner.1"))]);

        assert!(satisfies(&instance, Some(&one_right), MatchCriteria::Any));
        assert!(!satisfies(&instance, Some(&none_right), MatchCriteria::Any));
    }

    #[test]
    fn test_none_treats_missing_property_as_compliant() {
        let instance = bag(&[("name", s("name.0"))]);
        let missing_only = bag(&[("owner", s("owner.1"))]);
        let mirrored = bag(&[("owner", s("owner.1")), ("name", s("name.0"))]);
        let differing = bag(&[("name", s("name.1"))]);

        assert!(satisfies(&instance, Some(&missing_only), MatchCriteria::None));
        assert!(!satisfies(&instance, Some(&mirrored), MatchCriteria::None));
        assert!(satisfies(&instance, Some(&differing), MatchCriteria::None));
    }

    #[test]
    fn test_regex_variant() {
        let instance = bag(&[("qualifiedName", s("qualifiedName.1")), ("count", PrimitiveValue::Int(1))]);
        let prefix = full_match_regex(&format!("{}.*", literalise("qualifiedName."))).unwrap();

        assert!(MatchEvaluator::satisfies_regex(&instance, "qualifiedName", &prefix, MatchCriteria::All));
        assert!(MatchEvaluator::satisfies_regex(&instance, "qualifiedName", &prefix, MatchCriteria::Any));
        assert!(!MatchEvaluator::satisfies_regex(&instance, "qualifiedName", &prefix, MatchCriteria::None));
        // Non-string and absent attributes never match
        assert!(!MatchEvaluator::satisfies_regex(&instance, "count", &prefix, MatchCriteria::Any));
        assert!(MatchEvaluator::satisfies_regex(&instance, "owner", &prefix, MatchCriteria::None));
    }

    #[test]
    fn test_literalised_value_matches_only_itself() {
        let exact = full_match_regex(&literalise("qualifiedName.0")).unwrap();
        assert!(exact.is_match("qualifiedName.0"));
        assert!(!exact.is_match("qualifiedName.10"));
        assert!(!exact.is_match("qualifiedNameX0"));

        let tricky = "a+b (c)? [d] $e^ {f}|g\\h";
        assert!(full_match_regex(&literalise(tricky)).unwrap().is_match(tricky));
    }

    #[test]
    fn test_literalise_properties_leaves_non_strings() {
        let original = bag(&[("name", s("name.1")), ("count", PrimitiveValue::Int(43))]);
        let literal = literalise_properties(&original);
        assert_eq!(literal["name"], s("name\\.1"));
        assert_eq!(literal["count"], PrimitiveValue::Int(43));
    }
}
