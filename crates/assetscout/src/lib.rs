pub mod broadcast;
pub mod config;
pub mod db;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod logging;
pub mod model;
pub mod secrets;
pub mod store;
pub mod worker;

pub use broadcast::{JobProgressBroadcaster, JobProgressEvent, JobProgressKind};
pub use config::{load_config, load_config_from_str, EngineConfig};
pub use discovery::{
    DiscoveryTask, PrimaryOutcome, SupplementaryOutcome, SupplementaryRequest,
};
pub use engine::{Engine, EngineDeps};
pub use error::{ConfigError, EngineError, Result, StoreError, TaskError, TaskErrorKind};
pub use logging::init_logging;
pub use model::{Asset, CompanyEntry, Job, JobCounts, JobResult, JobStatus, Usage};
pub use secrets::{ConfiguredCredentials, CredentialRef, CredentialSource, SecretError};
pub use store::{AssetRepository, JobRepository};
