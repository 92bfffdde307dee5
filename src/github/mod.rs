//! GitHub access through the `gh` command line client

mod cli;

pub use cli::{
    DEFAULT_GH_TIMEOUT, GhCli, GhOutput, MilestoneInfo, PullRequestInfo, ReleaseAsset, ReleaseInfo, WorkflowRunInfo,
};
