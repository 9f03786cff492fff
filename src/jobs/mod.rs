//! Job model shared by the queue, workers, and API.

mod models;

pub use models::{
    generate_job_id, AiAnalysisResult, DeadLetter, ExtractedEntity, IndicatorOfCompromise, Job,
    JobKind, JobResults, JobSpec, JobState, SecurityMetadata,
};
