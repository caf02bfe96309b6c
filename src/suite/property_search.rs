//! Property search conformance for one entity or relationship type.
//!
//! Three populations are created at the repository under test. A broad survey
//! of the type builds a reverse property index, and every narrower search is
//! checked against the ids the index predicts. When the survey was cut short
//! by paging the prediction is a lower bound and extra hits are re-checked
//! against the search predicate instead of failing outright.

use std::sync::Arc;

use crate::logic::{
    full_match_regex, literalise, literalise_properties, overlap_attribute, populate, ExpectedResult,
    ReversePropertyIndex, SearchPredicate, SearchVerdict, SearchVerifier, SET_TOKENS,
};
use crate::model::{
    Id, InstanceProperties, InstanceSnapshot, MatchCriteria, PageRequest, PrimitiveValue, TypeDef,
    TypeDefCategory, TypedAttribute,
};
use crate::store::{ErrorClass, MetadataCollection, RepositoryError};
use crate::suite::error::HarnessError;
use crate::suite::operations::{self, capitalised, OperationContext};
use crate::suite::phase::{ConformanceTestCase, PhaseTracker, TestPhase};
use crate::suite::report::{AssertionIds, Requirement};
use crate::suite::workpad::{Workpad, SET_COUNT};

pub struct PropertySearchTestCase {
    test_case_id: String,
    category: TypeDefCategory,
    type_name: String,
    tracker: PhaseTracker,
    type_def: Option<TypeDef>,
    attributes: Vec<TypedAttribute>,
    /// Property bag per population, empty when the type has no attributes
    templates: Vec<InstanceProperties>,
    end_types: Option<(TypeDef, TypeDef)>,
    end_entities: Vec<Id>,
    /// Set when a capability gap or missing attributes make the searches moot
    skipped: bool,
    assertion_ids: AssertionIds,
}

/// A search to issue and the predicate used to re-check its results
struct PlannedSearch {
    description: String,
    kind: SearchKind,
    expected: ExpectedResult,
    predicate: SearchPredicate,
}

enum SearchKind {
    ByProperty {
        match_properties: InstanceProperties,
        criteria: MatchCriteria,
    },
    ByValue {
        search_criteria: String,
    },
}

impl PropertySearchTestCase {
    pub fn new(category: TypeDefCategory, type_name: impl Into<String>) -> Self {
        let type_name = type_name.into();
        Self {
            test_case_id: format!("repository-{}-property-search-{}", category.as_str(), type_name),
            category,
            type_name,
            tracker: PhaseTracker::new(),
            type_def: None,
            attributes: Vec::new(),
            templates: Vec::new(),
            end_types: None,
            end_entities: Vec::new(),
            skipped: false,
            assertion_ids: AssertionIds::new(format!("repository-{}-property-search", category.as_str())),
        }
    }

    fn type_def(&self) -> Result<&TypeDef, HarnessError> {
        self.type_def
            .as_ref()
            .ok_or_else(|| HarnessError::Workpad(format!("{} was not seeded", self.test_case_id)))
    }

    fn requirement(&self, by_value: bool) -> Requirement {
        match (self.category, by_value) {
            (TypeDefCategory::Entity, false) => Requirement::ENTITY_PROPERTY_SEARCH,
            (TypeDefCategory::Entity, true) => Requirement::ENTITY_VALUE_SEARCH,
            (TypeDefCategory::Relationship, false) => Requirement::RELATIONSHIP_PROPERTY_SEARCH,
            (TypeDefCategory::Relationship, true) => Requirement::RELATIONSHIP_VALUE_SEARCH,
        }
    }

    fn seed(&mut self, workpad: &Workpad) -> Result<(), HarnessError> {
        let type_def = workpad.type_def(&self.type_name)?.clone();
        self.attributes = workpad.types.all_attributes(&type_def.name);

        let templates: Option<Vec<InstanceProperties>> = SET_TOKENS
            .iter()
            .map(|token| populate(&self.attributes, token))
            .collect();
        match templates {
            Some(templates) => self.templates = templates,
            None => {
                log::info!("{}: type has no searchable properties", self.test_case_id);
                self.skipped = true;
            }
        }

        if type_def.category == TypeDefCategory::Relationship {
            self.end_types = Some(workpad.end_types(&type_def)?);
        }
        self.type_def = Some(type_def);
        Ok(())
    }

    async fn create(&mut self, workpad: &mut Workpad) -> Result<(), HarnessError> {
        if self.skipped {
            return Ok(());
        }
        let tut = workpad.tut().clone();
        let user_id = workpad.user_id().to_string();
        let type_def = self.type_def()?.clone();

        let ends = match self.end_types.clone() {
            Some((end_one, end_two)) => {
                let context = OperationContext::new("addEntity", "creating relationship end entities")
                    .param("endOneType", &end_one.name)
                    .param("endTwoType", &end_two.name);
                let (one, two) = match operations::add_end_entities(tut.as_ref(), &user_id, &end_one, &end_two).await {
                    Ok(ends) => ends,
                    Err(e) => return self.creation_failed(workpad, &context, e),
                };
                self.end_entities = vec![one.header.guid.clone(), two.header.guid.clone()];
                Some((one.header.guid, two.header.guid))
            }
            None => None,
        };

        for set in 0..SET_COUNT {
            for _ in 0..workpad.settings.instances_per_set {
                let context = OperationContext::new(
                    format!("add{}", capitalised(self.category.as_str())),
                    format!("creating population {} of {}", set, type_def.name),
                )
                .param("typeGUID", &type_def.guid)
                .param("set", set);
                let created = operations::add_instance(
                    tut.as_ref(),
                    &user_id,
                    &type_def,
                    Some(self.templates[set].clone()),
                    ends.as_ref().map(|(one, two)| (one, two)),
                )
                .await;
                match created {
                    Ok(instance) => workpad.add_instance(self.category, &self.type_name, set, instance),
                    Err(e) => return self.creation_failed(workpad, &context, e),
                }
            }
        }
        Ok(())
    }

    fn creation_failed(
        &mut self,
        workpad: &mut Workpad,
        context: &OperationContext,
        error: RepositoryError,
    ) -> Result<(), HarnessError> {
        if error.class() == ErrorClass::CapabilityGap {
            let assertion_id = self.assertion_ids.next();
            workpad
                .report
                .add_not_supported(&assertion_id, error.to_string(), self.requirement(false));
            self.skipped = true;
            Ok(())
        } else {
            Err(context.fault(error))
        }
    }

    async fn execute(&mut self, workpad: &mut Workpad) -> Result<(), HarnessError> {
        if self.skipped {
            return Ok(());
        }
        let tut = workpad.tut().clone();
        let type_def = self.type_def()?.clone();
        let page = PageRequest::first(workpad.settings.page_size);

        let Some(index) = self.survey(workpad, &tut, &type_def, page).await? else {
            return Ok(());
        };

        for search in self.planned_searches(&index)? {
            if !self.run_search(workpad, &tut, &type_def, page, search).await? {
                break;
            }
        }
        Ok(())
    }

    /// Search the whole type and index what came back
    async fn survey(
        &mut self,
        workpad: &mut Workpad,
        tut: &Arc<dyn MetadataCollection>,
        type_def: &TypeDef,
        page: PageRequest,
    ) -> Result<Option<ReversePropertyIndex>, HarnessError> {
        let context = OperationContext::new(
            format!("find{}sByProperty", capitalised(self.category.as_str())),
            format!("surveying every instance of {}", type_def.name),
        )
        .param("typeGUID", &type_def.guid)
        .param("pageSize", page.page_size);
        let survey = match operations::find_by_property(
            tut.as_ref(),
            workpad.user_id(),
            self.category,
            Some(&type_def.guid),
            None,
            MatchCriteria::Any,
            page,
        )
        .await
        {
            Ok(found) => found.unwrap_or_default(),
            Err(e) if e.class() == ErrorClass::CapabilityGap => {
                let assertion_id = self.assertion_ids.next();
                workpad
                    .report
                    .add_not_supported(&assertion_id, e.to_string(), self.requirement(false));
                return Ok(None);
            }
            Err(e) => return Err(context.fault(e)),
        };

        let page_limited = page.truncates(survey.len());
        if page_limited {
            log::info!(
                "{}: survey filled the page of {}; expectations are lower bounds",
                self.test_case_id,
                page.page_size
            );
        } else {
            let created = workpad.all_instances(self.category, &self.type_name);
            let missing: Vec<&str> = created
                .iter()
                .map(InstanceSnapshot::guid)
                .filter(|guid| !survey.iter().any(|found| found.guid() == *guid))
                .collect();
            let assertion_id = self.assertion_ids.next();
            workpad.report.assert_condition(
                missing.is_empty(),
                &assertion_id,
                format!(
                    "survey of {} returned {} instances; created instances missing: {:?}",
                    type_def.name,
                    survey.len(),
                    missing
                ),
                self.requirement(false),
                Some(context.timing()),
            )?;
        }

        Ok(Some(ReversePropertyIndex::build(&survey, &self.attributes, page_limited)))
    }

    /// Every search to run, each with its expected ids
    fn planned_searches(&self, index: &ReversePropertyIndex) -> Result<Vec<PlannedSearch>, HarnessError> {
        let mut searches = Vec::new();

        // One property at a time, for the values of populations 0 and 1
        for attribute in &self.attributes {
            for set in 0..2 {
                let Some(value) = self.templates[set].get(&attribute.name) else {
                    continue;
                };
                let properties = single(&attribute.name, value.clone());
                searches.push(PlannedSearch {
                    description: format!("{} = {} (population {})", attribute.name, value, set),
                    kind: SearchKind::ByProperty {
                        match_properties: literalise_properties(&properties),
                        criteria: MatchCriteria::All,
                    },
                    expected: index.expected_single(&attribute.name, value),
                    predicate: SearchPredicate::MatchProperties {
                        properties,
                        criteria: MatchCriteria::All,
                    },
                });
            }
        }

        // Overlap attribute from population 1 combined with another from population 2
        if let Some(properties) = self.paired_properties() {
            for criteria in MatchCriteria::EVERY {
                searches.push(PlannedSearch {
                    description: format!("{} over two properties", criteria),
                    kind: SearchKind::ByProperty {
                        match_properties: literalise_properties(&properties),
                        criteria,
                    },
                    expected: index.expected_for(&properties, criteria),
                    predicate: SearchPredicate::MatchProperties {
                        properties: properties.clone(),
                        criteria,
                    },
                });
            }
        }

        // Free-text search for each string value of population 0
        for attribute in self.attributes.iter().filter(|attribute| attribute.category.is_string()) {
            let Some(PrimitiveValue::String(value)) = self.templates[0].get(&attribute.name) else {
                continue;
            };
            let search_criteria = literalise(value);
            let regex = full_match_regex(&search_criteria)?;
            searches.push(PlannedSearch {
                description: format!("any value = {}", value),
                kind: SearchKind::ByValue {
                    search_criteria,
                },
                expected: index.expected_property_value(&regex),
                predicate: SearchPredicate::PropertyValue { regex },
            });
        }

        // Regex over the overlap attribute: prefix match, and exclusion of population 0
        if let Some(attribute) = overlap_attribute(&self.attributes) {
            let prefix = format!("{}.*", literalise(&format!("{}.", attribute.name)));
            let mut regex_searches = vec![(prefix, MatchCriteria::Any)];
            if let Some(PrimitiveValue::String(value)) = self.templates[0].get(&attribute.name) {
                regex_searches.push((literalise(value), MatchCriteria::None));
            }
            for (pattern, criteria) in regex_searches {
                let regex = full_match_regex(&pattern)?;
                searches.push(PlannedSearch {
                    description: format!("{} {} ~ {}", criteria, attribute.name, pattern),
                    kind: SearchKind::ByProperty {
                        match_properties: single(&attribute.name, PrimitiveValue::String(pattern.clone())),
                        criteria,
                    },
                    expected: index.expected_regex(&attribute.name, &regex, criteria),
                    predicate: SearchPredicate::AttributeRegex {
                        attribute: attribute.name.clone(),
                        regex,
                        criteria,
                    },
                });
            }
        }

        Ok(searches)
    }

    /// The overlap attribute at its population 1 value plus the first other
    /// attribute at its population 2 value
    fn paired_properties(&self) -> Option<InstanceProperties> {
        let overlap = overlap_attribute(&self.attributes)?;
        let overlap_value = self.templates[1].get(&overlap.name)?;
        let (other, other_value) = self
            .attributes
            .iter()
            .filter(|attribute| attribute.name != overlap.name)
            .find_map(|attribute| {
                self.templates[2]
                    .get(&attribute.name)
                    .map(|value| (attribute, value))
            })?;

        let mut properties = InstanceProperties::new();
        properties.insert(overlap.name.clone(), overlap_value.clone());
        properties.insert(other.name.clone(), other_value.clone());
        Some(properties)
    }

    /// Issue one search and record its verdict. Returns false when the
    /// repository does not support the search and the rest should be skipped.
    async fn run_search(
        &mut self,
        workpad: &mut Workpad,
        tut: &Arc<dyn MetadataCollection>,
        type_def: &TypeDef,
        page: PageRequest,
        search: PlannedSearch,
    ) -> Result<bool, HarnessError> {
        let by_value = matches!(search.kind, SearchKind::ByValue { .. });
        let noun = capitalised(self.category.as_str());
        let (context, result) = match &search.kind {
            SearchKind::ByProperty {
                match_properties,
                criteria,
            } => {
                let context = OperationContext::new(
                    format!("find{}sByProperty", noun),
                    format!("searching {} for {}", type_def.name, search.description),
                )
                .param("typeGUID", &type_def.guid)
                .param("matchCriteria", criteria)
                .param("matchProperties", format!("{:?}", match_properties))
                .param("pageSize", page.page_size);
                let result = operations::find_by_property(
                    tut.as_ref(),
                    workpad.user_id(),
                    self.category,
                    Some(&type_def.guid),
                    Some(match_properties),
                    *criteria,
                    page,
                )
                .await;
                (context, result)
            }
            SearchKind::ByValue { search_criteria } => {
                let context = OperationContext::new(
                    format!("find{}sByPropertyValue", noun),
                    format!("searching {} for {}", type_def.name, search.description),
                )
                .param("typeGUID", &type_def.guid)
                .param("searchCriteria", search_criteria)
                .param("pageSize", page.page_size);
                let result = operations::find_by_property_value(
                    tut.as_ref(),
                    workpad.user_id(),
                    self.category,
                    Some(&type_def.guid),
                    search_criteria,
                    page,
                )
                .await;
                (context, result)
            }
        };

        let found = match result {
            Ok(found) => found,
            Err(e) if e.class() == ErrorClass::CapabilityGap => {
                let assertion_id = self.assertion_ids.next();
                workpad
                    .report
                    .add_not_supported(&assertion_id, e.to_string(), self.requirement(by_value));
                return Ok(false);
            }
            Err(e) => return Err(context.fault(e)),
        };

        let verdict = SearchVerifier::verify(found.as_deref(), &search.expected, &search.predicate);
        let assertion_id = self.assertion_ids.next();
        workpad.report.assert_condition(
            verdict.passed(),
            &assertion_id,
            verdict_message(type_def, &search, &verdict),
            self.requirement(by_value),
            Some(context.timing()),
        )?;
        Ok(true)
    }

    async fn clean(&mut self, workpad: &mut Workpad) -> Result<(), HarnessError> {
        let tut = workpad.tut().clone();
        let user_id = workpad.user_id().to_string();
        let created = workpad.remove_instances(self.category, &self.type_name);

        let mut first_error = None;
        let targets = created
            .iter()
            .map(|instance| (self.category, instance.header.guid.clone()))
            .chain(
                self.end_entities
                    .drain(..)
                    .map(|guid| (TypeDefCategory::Entity, guid)),
            );
        for (category, guid) in targets {
            if let Err(e) = operations::cleanup_master(tut.as_ref(), &user_id, category, &guid).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[async_trait::async_trait]
impl ConformanceTestCase for PropertySearchTestCase {
    fn test_case_id(&self) -> &str {
        &self.test_case_id
    }

    async fn run(&mut self, phase: TestPhase, workpad: &mut Workpad) -> Result<(), HarnessError> {
        self.tracker.enter(&self.test_case_id, phase)?;
        match phase {
            TestPhase::Seed => self.seed(workpad),
            TestPhase::Create => self.create(workpad).await,
            TestPhase::Execute => self.execute(workpad).await,
            TestPhase::Clean => self.clean(workpad).await,
        }
    }
}

fn single(name: &str, value: PrimitiveValue) -> InstanceProperties {
    let mut properties = InstanceProperties::new();
    properties.insert(name.to_string(), value);
    properties
}

fn verdict_message(type_def: &TypeDef, search: &PlannedSearch, verdict: &SearchVerdict) -> String {
    match verdict.first_failure() {
        None => format!(
            "search of {} for {} returned {} of {} expected{}",
            type_def.name,
            search.description,
            verdict.actual_count,
            verdict.expected_count,
            if verdict.page_limited { " (page limited)" } else { "" }
        ),
        Some(check) => format!(
            "search of {} for {} [{}] failed {:?} check: {} returned, {} expected; missing {:?}, extras {:?}, contaminants {:?}",
            type_def.name,
            search.description,
            search.predicate.describe(),
            check,
            verdict.actual_count,
            verdict.expected_count,
            verdict.missing,
            verdict.extras,
            verdict.contaminants
        ),
    }
}
