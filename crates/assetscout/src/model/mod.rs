//! Domain types shared by the engine, the repositories and the task body.

pub mod asset;
pub mod company;
pub mod job;

pub use asset::Asset;
pub use company::{identity_key, name_is_unique, normalize_name, CompanyEntry, IdentityKey};
pub use job::{
    timestamp_now, Job, JobCounts, JobPatch, JobResult, JobStatus, ResultStatus, Usage,
};
