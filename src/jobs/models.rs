//! Job data model and lifecycle state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::EngineError;

/// Raw extraction output attached to a job.
pub type JobResults = Map<String, Value>;

/// Kind of intelligence-gathering job. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    #[serde(alias = "email_discovery")]
    Email,
    #[serde(alias = "subdomain_discovery")]
    Subdomain,
    #[serde(alias = "social_profile", alias = "social")]
    SocialMedia,
    #[serde(alias = "general_content")]
    General,
}

impl JobKind {
    pub const ALL: [JobKind; 4] = [
        JobKind::Email,
        JobKind::Subdomain,
        JobKind::SocialMedia,
        JobKind::General,
    ];

    /// Wire name, as sent to the enrichment services.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Email => "email",
            JobKind::Subdomain => "subdomain",
            JobKind::SocialMedia => "social_media",
            JobKind::General => "general",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "email" | "email_discovery" => Ok(JobKind::Email),
            "subdomain" | "subdomain_discovery" => Ok(JobKind::Subdomain),
            "social_media" | "social_profile" | "social" => Ok(JobKind::SocialMedia),
            "general" | "general_content" => Ok(JobKind::General),
            _ => Err(EngineError::InvalidJobKind(s.to_string())),
        }
    }
}

/// Lifecycle state of a job.
///
/// Happy path: `Queued -> Claimed -> SecurityConfiguring -> Scraping -> Analyzing -> Completed`.
/// Any in-flight state may fall to `Failed`, which either re-enters `Queued` or ends in
/// `DeadLettered`. A `Failed` job that is persisted as such is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Claimed,
    SecurityConfiguring,
    Scraping,
    Analyzing,
    Completed,
    Failed,
    DeadLettered,
}

impl JobState {
    pub const ALL: [JobState; 8] = [
        JobState::Queued,
        JobState::Claimed,
        JobState::SecurityConfiguring,
        JobState::Scraping,
        JobState::Analyzing,
        JobState::Completed,
        JobState::Failed,
        JobState::DeadLettered,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Claimed => "claimed",
            JobState::SecurityConfiguring => "security_configuring",
            JobState::Scraping => "scraping",
            JobState::Analyzing => "analyzing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::DeadLettered => "dead_lettered",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        JobState::ALL.into_iter().find(|state| state.as_str() == s)
    }

    /// True while a worker holds the job.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            JobState::Claimed
                | JobState::SecurityConfiguring
                | JobState::Scraping
                | JobState::Analyzing
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::DeadLettered
        )
    }

    /// Whether the state machine allows `self -> next`.
    ///
    /// In-flight states may also return to `Queued` when their claim is released
    /// during shutdown or crash recovery.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (Queued, Claimed) => true,
            (Claimed, SecurityConfiguring) => true,
            (SecurityConfiguring, Scraping) => true,
            (Scraping, Analyzing) => true,
            (Analyzing, Completed) => true,
            (from, Failed) if from.is_in_flight() => true,
            (from, Queued) if from.is_in_flight() => true,
            (Failed, Queued) | (Failed, DeadLettered) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata returned by the security service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecurityMetadata {
    pub fingerprint: String,
    pub proxy_used: String,
    pub tls_profile: String,
    pub user_agent: String,
    pub detection_risk: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedEntity {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub value: String,
    pub confidence: f64,
}

/// Indicator of compromise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorOfCompromise {
    #[serde(rename = "type")]
    pub ioc_type: String,
    pub value: String,
    pub confidence: f64,
    pub threat_type: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Analysis returned by the AI service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AiAnalysisResult {
    pub threat_level: String,
    #[serde(default)]
    pub entities: Vec<ExtractedEntity>,
    pub sentiment: String,
    pub classification: String,
    #[serde(default)]
    pub iocs: Vec<IndicatorOfCompromise>,
    #[serde(default)]
    pub related_campaigns: Vec<String>,
}

impl AiAnalysisResult {
    /// Checks that every confidence score lies in `[0, 1]`.
    pub fn validate(&self) -> Result<(), String> {
        let entity_scores = self
            .entities
            .iter()
            .map(|e| (e.value.as_str(), e.confidence));
        let ioc_scores = self.iocs.iter().map(|i| (i.value.as_str(), i.confidence));
        for (value, confidence) in entity_scores.chain(ioc_scores) {
            if !(0.0..=1.0).contains(&confidence) {
                return Err(format!(
                    "confidence {} for '{}' is outside [0, 1]",
                    confidence, value
                ));
            }
        }
        Ok(())
    }
}

/// A submission request, before validation.
#[derive(Debug, Clone, Deserialize)]
pub struct JobSpec {
    #[serde(alias = "type")]
    pub kind: String,
    pub target: String,
    #[serde(default)]
    pub config: HashMap<String, Value>,
    #[serde(default)]
    pub priority: i32,
}

impl JobSpec {
    pub fn new(kind: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            target: target.into(),
            config: HashMap::new(),
            priority: 0,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_config(mut self, key: impl Into<String>, value: Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }
}

/// A unit of scrape-and-enrich work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: JobKind,
    pub target: String,
    pub config: HashMap<String, Value>,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Not claimable before this instant. Equals `created_at` until a retry is scheduled.
    pub available_at: DateTime<Utc>,
    #[serde(rename = "status")]
    pub state: JobState,
    /// Number of times the job has been claimed.
    pub attempts: u32,
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<String>,
    pub results: Option<JobResults>,
    pub security_meta: Option<SecurityMetadata>,
    pub ai_analysis: Option<AiAnalysisResult>,
}

impl Job {
    /// Creates a fresh queued job with a newly generated id.
    pub fn new(
        kind: JobKind,
        target: String,
        config: HashMap<String, Value>,
        priority: i32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: generate_job_id(now),
            kind,
            target,
            config,
            priority,
            created_at: now,
            updated_at: now,
            available_at: now,
            state: JobState::Queued,
            attempts: 0,
            last_error: None,
            claimed_by: None,
            results: None,
            security_meta: None,
            ai_analysis: None,
        }
    }

    /// Moves the job to `next`, rejecting transitions the state machine forbids.
    pub fn transition(&mut self, next: JobState) -> Result<(), EngineError> {
        if !self.state.can_transition_to(next) {
            return Err(EngineError::InvalidTransition {
                id: self.id.clone(),
                from: self.state.as_str(),
                to: next.as_str(),
            });
        }
        self.state = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// `job_<unix seconds>_<8 hex chars>`
pub fn generate_job_id(now: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("job_{}_{}", now.timestamp(), &suffix[..8])
}

/// Entry of the dead-letter set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeadLetter {
    pub job_id: String,
    pub kind: JobKind,
    pub attempts: u32,
    pub error: String,
    pub dead_lettered_at: DateTime<Utc>,
}
