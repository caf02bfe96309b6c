use itertools::Itertools;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::model::{
    Id, InstanceProperties, MatchCriteria, PrimitiveValue, SearchableInstance, TypedAttribute,
};

/// Expected ids for a search, plus whether they are only a lower bound
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpectedResult {
    pub ids: Vec<Id>,
    /// The survey this was computed from was truncated by paging
    pub page_limited: bool,
}

impl ExpectedResult {
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Combine two id buckets under a match criterion
///
/// ANY is the union, ALL the intersection and NONE the complement of the
/// union within `all_known`. Order follows the first occurrence.
pub fn expected(criteria: MatchCriteria, set_a: &[Id], set_b: &[Id], all_known: &[Id]) -> Vec<Id> {
    match criteria {
        MatchCriteria::Any => set_a.iter().chain(set_b).unique().cloned().collect(),
        MatchCriteria::All => {
            let in_b: HashSet<&Id> = set_b.iter().collect();
            set_a
                .iter()
                .filter(|id| in_b.contains(id))
                .unique()
                .cloned()
                .collect()
        }
        MatchCriteria::None => {
            let excluded: HashSet<&Id> = set_a.iter().chain(set_b).collect();
            all_known
                .iter()
                .filter(|id| !excluded.contains(id))
                .unique()
                .cloned()
                .collect()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueBucket {
    pub value: PrimitiveValue,
    pub ids: Vec<Id>,
}

/// Attribute name -> observed value -> ids holding that value, built once from a
/// broad survey search so narrower searches need no further queries
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReversePropertyIndex {
    buckets: BTreeMap<String, Vec<ValueBucket>>,
    all_ids: Vec<Id>,
    page_limited: bool,
}

impl ReversePropertyIndex {
    pub fn build<I: SearchableInstance>(
        survey: &[I],
        attributes: &[TypedAttribute],
        page_limited: bool,
    ) -> Self {
        let mut index = Self {
            buckets: BTreeMap::new(),
            all_ids: Vec::with_capacity(survey.len()),
            page_limited,
        };

        for instance in survey {
            let guid = instance.guid().to_string();
            if !index.all_ids.contains(&guid) {
                index.all_ids.push(guid.clone());
            }
            for attribute in attributes {
                if let Some(value) = instance.properties().get(&attribute.name) {
                    index.record(&attribute.name, value, &guid);
                }
            }
        }
        index
    }

    fn record(&mut self, attribute: &str, value: &PrimitiveValue, guid: &Id) {
        let buckets = self.buckets.entry(attribute.to_string()).or_default();
        match buckets.iter_mut().find(|bucket| &bucket.value == value) {
            Some(bucket) => {
                if !bucket.ids.contains(guid) {
                    bucket.ids.push(guid.clone());
                }
            }
            None => buckets.push(ValueBucket {
                value: value.clone(),
                ids: vec![guid.clone()],
            }),
        }
    }

    pub fn is_page_limited(&self) -> bool {
        self.page_limited
    }

    pub fn all_ids(&self) -> &[Id] {
        &self.all_ids
    }

    pub fn attributes(&self) -> impl Iterator<Item = &str> {
        self.buckets.keys().map(String::as_str)
    }

    pub fn values(&self, attribute: &str) -> &[ValueBucket] {
        self.buckets
            .get(attribute)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Ids holding `value` for `attribute`; empty when the value was never observed
    pub fn bucket(&self, attribute: &str, value: &PrimitiveValue) -> &[Id] {
        self.values(attribute)
            .iter()
            .find(|bucket| &bucket.value == value)
            .map(|bucket| bucket.ids.as_slice())
            .unwrap_or(&[])
    }

    /// Baseline expectation for a single-property exact match
    pub fn expected_single(&self, attribute: &str, value: &PrimitiveValue) -> ExpectedResult {
        self.result(self.bucket(attribute, value).to_vec())
    }

    /// Expectation for a multi-property match, folding buckets under the criterion
    pub fn expected_for(
        &self,
        match_props: &InstanceProperties,
        criteria: MatchCriteria,
    ) -> ExpectedResult {
        let mut buckets = match_props
            .iter()
            .map(|(attribute, value)| self.bucket(attribute, value).to_vec());

        let ids = match buckets.next() {
            None => self.all_ids.clone(),
            Some(first) => {
                let folded = match criteria {
                    MatchCriteria::All => buckets.fold(first, |acc, next| {
                        expected(MatchCriteria::All, &acc, &next, &self.all_ids)
                    }),
                    MatchCriteria::Any | MatchCriteria::None => buckets.fold(first, |acc, next| {
                        expected(MatchCriteria::Any, &acc, &next, &self.all_ids)
                    }),
                };
                if criteria == MatchCriteria::None {
                    expected(MatchCriteria::None, &folded, &[], &self.all_ids)
                } else {
                    folded
                }
            }
        };
        self.result(ids)
    }

    /// Expectation for a regex over one string attribute
    pub fn expected_regex(
        &self,
        attribute: &str,
        regex: &Regex,
        criteria: MatchCriteria,
    ) -> ExpectedResult {
        let hits: Vec<Id> = self
            .values(attribute)
            .iter()
            .filter(|bucket| bucket.value.as_str().map(|s| regex.is_match(s)).unwrap_or(false))
            .flat_map(|bucket| bucket.ids.iter().cloned())
            .unique()
            .collect();

        let ids = match criteria {
            MatchCriteria::All | MatchCriteria::Any => hits,
            MatchCriteria::None => expected(MatchCriteria::None, &hits, &[], &self.all_ids),
        };
        self.result(ids)
    }

    /// Expectation for a free-text search: any string attribute fully matching
    pub fn expected_property_value(&self, regex: &Regex) -> ExpectedResult {
        let ids = self
            .buckets
            .values()
            .flatten()
            .filter(|bucket| bucket.value.as_str().map(|s| regex.is_match(s)).unwrap_or(false))
            .flat_map(|bucket| bucket.ids.iter().cloned())
            .unique()
            .collect();
        self.result(ids)
    }

    fn result(&self, ids: Vec<Id>) -> ExpectedResult {
        ExpectedResult {
            ids,
            page_limited: self.page_limited,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::generator::populate;
    use crate::logic::match_criteria::{full_match_regex, literalise};
    use crate::model::{
        EntityDetail, InstanceHeader, InstanceSnapshot, PrimitiveCategory,
    };

    fn ids(list: &[&str]) -> Vec<Id> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_set_algebra_fixture() {
        let a = ids(&["e1", "e2"]);
        let b = ids(&["e2", "e3"]);
        let all = ids(&["e1", "e2", "e3", "e4", "e5"]);

        assert_eq!(expected(MatchCriteria::All, &a, &b, &all), ids(&["e2"]));
        assert_eq!(expected(MatchCriteria::Any, &a, &b, &all), ids(&["e1", "e2", "e3"]));
        assert_eq!(expected(MatchCriteria::None, &a, &b, &all), ids(&["e4", "e5"]));
    }

    #[test]
    fn test_union_deduplicates() {
        let a = ids(&["e1", "e1", "e2"]);
        assert_eq!(expected(MatchCriteria::Any, &a, &a, &[]), ids(&["e1", "e2"]));
    }

    fn population() -> (Vec<TypedAttribute>, Vec<InstanceSnapshot>) {
        let attributes = vec![
            TypedAttribute::new("name", PrimitiveCategory::String),
            TypedAttribute::new("count", PrimitiveCategory::Int),
        ];
        let mut survey = Vec::new();
        for (set, token) in ["0", "1", "2"].iter().enumerate() {
            for n in 0..2 {
                let header = InstanceHeader::new(
                    format!("s{}-{}", set, n),
                    "t".into(),
                    "Thing".into(),
                    "mc".into(),
                    "tester",
                );
                let properties = populate(&attributes, token).unwrap();
                survey.push(InstanceSnapshot::from(EntityDetail { header, properties }));
            }
        }
        (attributes, survey)
    }

    #[test]
    fn test_reverse_index_buckets() {
        let (attributes, survey) = population();
        let index = ReversePropertyIndex::build(&survey, &attributes, false);

        assert_eq!(index.all_ids().len(), 6);
        assert_eq!(
            index.bucket("name", &PrimitiveValue::String("name.1".into())),
            ids(&["s1-0", "s1-1", "s2-0", "s2-1"]).as_slice()
        );
        assert_eq!(
            index.bucket("count", &PrimitiveValue::Int(44)),
            ids(&["s2-0", "s2-1"]).as_slice()
        );
        assert!(index.bucket("count", &PrimitiveValue::Int(99)).is_empty());
        assert!(!index.is_page_limited());
    }

    #[test]
    fn test_expected_for_name_scenario() {
        let (attributes, survey) = population();
        let index = ReversePropertyIndex::build(&survey, &attributes, false);
        let mut props = InstanceProperties::new();
        props.insert("name".into(), PrimitiveValue::String("name.1".into()));

        let all = index.expected_for(&props, MatchCriteria::All);
        assert_eq!(all.ids, ids(&["s1-0", "s1-1", "s2-0", "s2-1"]));

        let none = index.expected_for(&props, MatchCriteria::None);
        assert_eq!(none.ids, ids(&["s0-0", "s0-1"]));
    }

    #[test]
    fn test_expected_for_two_attributes() {
        let (attributes, survey) = population();
        let index = ReversePropertyIndex::build(&survey, &attributes, true);
        let mut props = InstanceProperties::new();
        props.insert("name".into(), PrimitiveValue::String("name.1".into()));
        props.insert("count".into(), PrimitiveValue::Int(44));

        assert_eq!(index.expected_for(&props, MatchCriteria::All).ids, ids(&["s2-0", "s2-1"]));
        assert_eq!(
            index.expected_for(&props, MatchCriteria::Any).ids.len(),
            4
        );
        let none = index.expected_for(&props, MatchCriteria::None);
        assert_eq!(none.ids, ids(&["s0-0", "s0-1"]));
        assert!(none.page_limited);
    }

    #[test]
    fn test_regex_and_property_value_expectations() {
        let (attributes, survey) = population();
        let index = ReversePropertyIndex::build(&survey, &attributes, false);

        let prefix = full_match_regex(&format!("{}.*", literalise("name."))).unwrap();
        assert_eq!(index.expected_regex("name", &prefix, MatchCriteria::Any).ids.len(), 6);
        assert!(index.expected_regex("name", &prefix, MatchCriteria::None).is_empty());

        let exact = full_match_regex(&literalise("name.0")).unwrap();
        assert_eq!(index.expected_property_value(&exact).ids, ids(&["s0-0", "s0-1"]));
    }
}
