//! Best-effort enrichment through the external security and AI services.

mod client;
mod models;

pub use client::{EnrichmentService, HttpEnrichmentClient};
pub use models::{AnalysisRequest, EnrichmentError, SecurityConfigRequest, Service};
