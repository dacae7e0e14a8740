pub mod github_pr;
pub mod manifest;

pub use github_pr::{GitHubError, GitHubPrCreator, PrResult};
pub use manifest::build_execution_plan;
