use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::logic::{PollPolicy, MIN_POLL_INTERVAL};
use crate::store::Capabilities;
use crate::suite::{HarnessError, RunSettings};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub run: RunConfig,
    pub cts: RepositoryConfig,
    pub tut: RepositoryConfig,
    /// Optional operations of the in-memory repository under test
    pub capabilities: Capabilities,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub user_id: String,
    /// 0 means unlimited
    pub page_size: usize,
    pub instances_per_set: usize,
    pub poll_interval_ms: u64,
    pub poll_max_attempts: u32,
    pub type_filter: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    pub metadata_collection_id: String,
    pub metadata_collection_name: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            user_id: "cts-user".to_string(),
            page_size: 50,
            instances_per_set: 2,
            poll_interval_ms: MIN_POLL_INTERVAL.as_millis() as u64,
            poll_max_attempts: 50,
            type_filter: None,
        }
    }
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            metadata_collection_id: String::new(),
            metadata_collection_name: String::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, an optional `conformance` file and
    /// `CTS_` environment variables, in that order
    pub fn load() -> anyhow::Result<Self> {
        let mut config = config::Config::builder();

        // Add default configuration
        config = config.add_source(config::Config::try_from(&AppConfig::default())?);

        // Add config file if it exists
        config = config.add_source(config::File::with_name("conformance").required(false));

        // Add environment variables, e.g. CTS_RUN__PAGE_SIZE=10
        config = config.add_source(
            config::Environment::with_prefix("CTS")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("run.type_filter")
                .try_parsing(true),
        );

        let config = config.build()?;
        let mut app_config: AppConfig = config.try_deserialize()?;
        app_config.fill_repository_defaults();
        app_config.validate()?;

        Ok(app_config)
    }

    fn fill_repository_defaults(&mut self) {
        for (repository, default_id) in [(&mut self.cts, "cts"), (&mut self.tut, "tut")] {
            if repository.metadata_collection_id.is_empty() {
                repository.metadata_collection_id = format!("{}-{}", default_id, crate::model::generate_id());
            }
            if repository.metadata_collection_name.is_empty() {
                repository.metadata_collection_name = format!("{} in-memory repository", default_id);
            }
        }
    }

    /// Reject out-of-range settings instead of clamping them
    pub fn validate(&self) -> Result<(), HarnessError> {
        if self.run.instances_per_set < 2 {
            return Err(HarnessError::Config(format!(
                "instances_per_set must be at least 2, got {}",
                self.run.instances_per_set
            )));
        }
        if self.run.user_id.trim().is_empty() {
            return Err(HarnessError::Config("user_id must not be empty".to_string()));
        }
        if !self.cts.metadata_collection_id.is_empty()
            && self.cts.metadata_collection_id == self.tut.metadata_collection_id
        {
            return Err(HarnessError::Config(format!(
                "cts and tut share metadata collection id {}",
                self.cts.metadata_collection_id
            )));
        }
        self.poll_policy()?;
        Ok(())
    }

    pub fn poll_policy(&self) -> Result<PollPolicy, HarnessError> {
        PollPolicy::new(
            Duration::from_millis(self.run.poll_interval_ms),
            self.run.poll_max_attempts,
        )
        .map_err(|e| HarnessError::Config(e.to_string()))
    }

    pub fn run_settings(&self) -> Result<RunSettings, HarnessError> {
        Ok(RunSettings {
            user_id: self.run.user_id.clone(),
            page_size: self.run.page_size,
            instances_per_set: self.run.instances_per_set,
            poll: self.poll_policy()?,
            type_filter: self.run.type_filter.clone(),
        })
    }
}
