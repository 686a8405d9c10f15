mod backend;
mod config;
mod dryrun;
mod history;
mod http;
mod orchestrator;
mod retry;
mod reveal;
mod submission;

pub use backend::{
    default_backend_registry, BackendRegistry, CaptionBackend, CaptionOutcome, CaptionParams,
    DescribeOutcome,
};
pub use config::{parse_dotenv, EngineConfig};
pub use dryrun::DryrunBackend;
pub use history::HistoryCache;
pub use http::HttpBackend;
pub use orchestrator::Orchestrator;
pub use retry::RetryPolicy;
pub use reveal::{revealed_prefix, RevealFrame, RevealPlan, RevealScheduler, RevealTiming};
pub use submission::{
    Applied, CaptionJob, DescribeJob, Failure, HistoryView, ImageSubmission, Phase,
    ResolvedDescription, ResultOrigin, Stage, SubmissionId, SubmissionMachine, SubmissionState,
    TransitionError,
};
