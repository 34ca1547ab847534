use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// Version pinned by runs scored under the built-in fallback policy.
pub const DEFAULT_POLICY_VERSION: &str = "1.0.0";
pub const DEFAULT_POLICY_NAME: &str = "Default Global Policy";

/// Versioned, time-boxed scoring configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub id: Uuid,
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub rules: PolicyRules,
    pub thresholds: Thresholds,
    /// Stored per source for reporting; scoring uses the flat tier points in `rules`.
    pub source_weights: BTreeMap<String, f64>,
    pub is_active: bool,
    /// `None` means the policy applies globally.
    pub destination_country: Option<String>,
    pub effective_from: DateTime<Utc>,
    pub effective_until: Option<DateTime<Utc>>,
}

impl Policy {
    /// Fallback used whenever no stored policy is in effect.
    pub fn default_policy() -> Self {
        let mut source_weights = BTreeMap::new();
        source_weights.insert("sanctions".to_string(), 0.5);
        source_weights.insert("pep".to_string(), 0.3);
        source_weights.insert("documents".to_string(), 0.2);

        Self {
            id: Uuid::nil(),
            name: DEFAULT_POLICY_NAME.to_string(),
            version: DEFAULT_POLICY_VERSION.to_string(),
            description: Some("Default verification policy for all applications".to_string()),
            rules: PolicyRules::default(),
            thresholds: Thresholds::default(),
            source_weights,
            is_active: true,
            destination_country: None,
            effective_from: Utc
                .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
                .single()
                .unwrap_or_default(),
            effective_until: None,
        }
    }

    /// Active and inside `[effective_from, effective_until)`.
    pub fn is_in_effect(&self, at: DateTime<Utc>) -> bool {
        self.is_active
            && self.effective_from <= at
            && self.effective_until.map_or(true, |until| until > at)
    }

    pub fn is_global(&self) -> bool {
        self.destination_country.is_none()
    }

    fn targets(&self, destination: &str) -> bool {
        self.destination_country
            .as_deref()
            .is_some_and(|country| country.eq_ignore_ascii_case(destination))
    }
}

/// Per-category rule set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRules {
    pub sanctions: TieredRule,
    pub pep: TieredRule,
    pub documents: DocumentRule,
    pub face_match: FaceMatchRule,
}

impl Default for PolicyRules {
    fn default() -> Self {
        Self {
            sanctions: TieredRule {
                enabled: true,
                high_confidence_above: 80.0,
                high_tier_points: 70.0,
                low_tier_points: 30.0,
            },
            pep: TieredRule {
                enabled: true,
                high_confidence_above: 80.0,
                high_tier_points: 40.0,
                low_tier_points: 20.0,
            },
            documents: DocumentRule {
                enabled: true,
                failure_points: 25.0,
                low_confidence_points: 15.0,
                min_confidence: 70.0,
            },
            face_match: FaceMatchRule {
                enabled: true,
                threshold: 0.7,
            },
        }
    }
}

/// Two-tier contribution: any hit above `high_confidence_above` earns the high
/// tier, otherwise any hit at all earns the low tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TieredRule {
    pub enabled: bool,
    pub high_confidence_above: f64,
    pub high_tier_points: f64,
    pub low_tier_points: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRule {
    pub enabled: bool,
    pub failure_points: f64,
    pub low_confidence_points: f64,
    pub min_confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceMatchRule {
    pub enabled: bool,
    pub threshold: f64,
}

/// Decision bands: clear up to `clear.max`, review within `review`, not clear from
/// `not_clear.min`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub clear: UpperBound,
    pub review: Band,
    pub not_clear: LowerBound,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            clear: UpperBound { max: 29.0 },
            review: Band {
                min: 30.0,
                max: 59.0,
            },
            not_clear: LowerBound { min: 60.0 },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpperBound {
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LowerBound {
    pub min: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("policy store unavailable: {0}")]
    Unavailable(String),
    #[error("pinned policy {id} (version '{version}') no longer exists")]
    UnknownPinned { id: Uuid, version: String },
}

/// Storage abstraction for policy rows.
pub trait PolicyRepository: Send + Sync {
    /// Candidate policies for the destination at the given instant. The resolver
    /// re-applies the time window, so implementations may over-select.
    fn find_active(
        &self,
        destination: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<Vec<Policy>, PolicyError>;

    /// The stored policy with exactly this id and version.
    fn find_pinned(&self, id: Uuid, version: &str) -> Result<Option<Policy>, PolicyError>;
}

/// Picks the policy in effect, falling back to [`Policy::default_policy`].
#[derive(Clone)]
pub struct PolicyResolver {
    repository: Arc<dyn PolicyRepository>,
}

impl PolicyResolver {
    pub fn new(repository: Arc<dyn PolicyRepository>) -> Self {
        Self { repository }
    }

    /// Destination-specific policies win over global ones; within a tier the most
    /// recent `effective_from` wins.
    pub fn resolve_active(
        &self,
        destination: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<Policy, PolicyError> {
        let candidates = self.repository.find_active(destination, at)?;

        let in_effect = candidates
            .into_iter()
            .filter(|policy| policy.is_in_effect(at));

        let (targeted, global): (Vec<Policy>, Vec<Policy>) = in_effect
            .filter(|policy| {
                policy.is_global() || destination.is_some_and(|country| policy.targets(country))
            })
            .partition(|policy| !policy.is_global());

        let selected = latest(targeted).or_else(|| latest(global));
        match selected {
            Some(policy) => Ok(policy),
            None => {
                info!(
                    destination = destination.unwrap_or("global"),
                    "no policy in effect, using default policy"
                );
                Ok(Policy::default_policy())
            }
        }
    }

    /// Load the policy a run pinned at admission. Versions are not unique
    /// across policies, so the id must match too.
    pub fn resolve_pinned(&self, id: Uuid, version: &str) -> Result<Policy, PolicyError> {
        match self.repository.find_pinned(id, version)? {
            Some(policy) => Ok(policy),
            None if id.is_nil() && version == DEFAULT_POLICY_VERSION => {
                Ok(Policy::default_policy())
            }
            None => Err(PolicyError::UnknownPinned {
                id,
                version: version.to_string(),
            }),
        }
    }
}

fn latest(policies: Vec<Policy>) -> Option<Policy> {
    policies
        .into_iter()
        .max_by_key(|policy| policy.effective_from)
}

/// In-process policy table used by the service and tests.
#[derive(Default)]
pub struct InMemoryPolicyRepository {
    policies: RwLock<Vec<Policy>>,
}

impl InMemoryPolicyRepository {
    pub fn with_policies(policies: Vec<Policy>) -> Self {
        Self {
            policies: RwLock::new(policies),
        }
    }

    pub fn insert(&self, policy: Policy) -> Result<(), PolicyError> {
        let mut guard = self
            .policies
            .write()
            .map_err(|_| PolicyError::Unavailable("policy lock poisoned".to_string()))?;
        guard.retain(|existing| {
            !(existing.name == policy.name && existing.version == policy.version)
        });
        guard.push(policy);
        Ok(())
    }
}

impl PolicyRepository for InMemoryPolicyRepository {
    fn find_active(
        &self,
        _destination: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<Vec<Policy>, PolicyError> {
        let guard = self
            .policies
            .read()
            .map_err(|_| PolicyError::Unavailable("policy lock poisoned".to_string()))?;
        Ok(guard
            .iter()
            .filter(|policy| policy.is_in_effect(at))
            .cloned()
            .collect())
    }

    fn find_pinned(&self, id: Uuid, version: &str) -> Result<Option<Policy>, PolicyError> {
        let guard = self
            .policies
            .read()
            .map_err(|_| PolicyError::Unavailable("policy lock poisoned".to_string()))?;
        Ok(guard
            .iter()
            .find(|policy| policy.id == id && policy.version == version)
            .cloned())
    }
}
