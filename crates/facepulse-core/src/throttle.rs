//! Throttled refresh of expensive per-entity attributes (identity, demographics)

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::BiometricsConfig;
use crate::error::CollaboratorError;

/// Estimated age: a number of years, or a label such as "Unknown"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Age {
    Years(f64),
    Label(String),
}

impl fmt::Display for Age {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Age::Years(years) => write!(f, "{}", years),
            Age::Label(label) => f.write_str(label),
        }
    }
}

impl From<f64> for Age {
    fn from(years: f64) -> Self {
        Age::Years(years)
    }
}

impl From<&str> for Age {
    fn from(label: &str) -> Self {
        Age::Label(label.to_string())
    }
}

/// Cached result of the last identity/demographics refresh
#[derive(Debug, Clone, PartialEq)]
pub struct Biometrics {
    pub identity: String,
    pub gender: String,
    pub age: Age,
    pub last_refresh_frame: u64,
}

impl Biometrics {
    /// Safe defaults recorded when the first refresh attempt fails
    pub fn defaults(config: &BiometricsConfig, frame_id: u64) -> Self {
        Self {
            identity: config.default_identity.clone(),
            gender: config.default_gender.clone(),
            age: config.default_age.clone(),
            last_refresh_frame: frame_id,
        }
    }
}

/// Fresh attributes returned by the identity and demographics collaborators
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshedBiometrics {
    pub identity: String,
    pub gender: String,
    pub age: Age,
}

/// Frame-count throttle for the biometric collaborators
#[derive(Debug, Clone)]
pub struct ThrottledRefreshPolicy {
    interval: u64,
}

impl ThrottledRefreshPolicy {
    pub fn new(interval: u64) -> Self {
        Self { interval }
    }

    pub fn interval(&self) -> u64 {
        self.interval
    }

    /// True when nothing is cached yet or the cache is at least `interval` frames old
    pub fn should_refresh(&self, cached: Option<&Biometrics>, frame_id: u64) -> bool {
        match cached {
            None => true,
            Some(bio) => frame_id.saturating_sub(bio.last_refresh_frame) >= self.interval,
        }
    }

    /// Fold a refresh attempt into the cached record.
    ///
    /// Success replaces the record. Failure keeps a stale record untouched,
    /// including its `last_refresh_frame`, so the next tick retries. A first
    /// attempt that fails records the configured defaults.
    pub fn apply(
        &self,
        cached: Option<Biometrics>,
        outcome: Result<RefreshedBiometrics, CollaboratorError>,
        frame_id: u64,
        defaults: &BiometricsConfig,
    ) -> Biometrics {
        match (outcome, cached) {
            (Ok(fresh), _) => Biometrics {
                identity: fresh.identity,
                gender: fresh.gender,
                age: fresh.age,
                last_refresh_frame: frame_id,
            },
            (Err(err), Some(stale)) => {
                log::warn!(
                    "Biometric refresh failed at frame {}, keeping stale record from frame {}: {}",
                    frame_id,
                    stale.last_refresh_frame,
                    err
                );
                stale
            }
            (Err(err), None) => {
                log::warn!(
                    "First biometric refresh failed at frame {}, using defaults: {}",
                    frame_id,
                    err
                );
                Biometrics::defaults(defaults, frame_id)
            }
        }
    }
}

impl Default for ThrottledRefreshPolicy {
    fn default() -> Self {
        Self::new(BiometricsConfig::default().refresh_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh(identity: &str, age: f64) -> RefreshedBiometrics {
        RefreshedBiometrics {
            identity: identity.to_string(),
            gender: "Woman".to_string(),
            age: Age::Years(age),
        }
    }

    #[test]
    fn test_absent_record_always_refreshes() {
        let policy = ThrottledRefreshPolicy::new(30);
        assert!(policy.should_refresh(None, 0));
        assert!(policy.should_refresh(None, 12345));
    }

    #[test]
    fn test_refresh_every_interval() {
        let policy = ThrottledRefreshPolicy::new(30);
        let defaults = BiometricsConfig::default();
        let mut cached = None;
        let mut refreshed_at = Vec::new();

        for frame in 0..100u64 {
            if policy.should_refresh(cached.as_ref(), frame) {
                refreshed_at.push(frame);
                cached = Some(policy.apply(cached, Ok(fresh("alice", 31.0)), frame, &defaults));
            }
        }
        assert_eq!(refreshed_at, vec![0, 30, 60, 90]);
    }

    #[test]
    fn test_failure_keeps_stale_and_retries() {
        let policy = ThrottledRefreshPolicy::new(30);
        let defaults = BiometricsConfig::default();
        let first = policy.apply(None, Ok(fresh("alice", 31.0)), 0, &defaults);

        let after_fail = policy.apply(
            Some(first.clone()),
            Err(CollaboratorError::failed("model offline")),
            30,
            &defaults,
        );
        assert_eq!(after_fail, first);
        assert_eq!(after_fail.last_refresh_frame, 0);
        assert!(policy.should_refresh(Some(&after_fail), 31));

        let recovered = policy.apply(Some(after_fail), Ok(fresh("alice", 32.0)), 31, &defaults);
        assert_eq!(recovered.last_refresh_frame, 31);
        assert_eq!(recovered.age, Age::Years(32.0));
        assert!(!policy.should_refresh(Some(&recovered), 60));
    }

    #[test]
    fn test_first_failure_populates_defaults() {
        let policy = ThrottledRefreshPolicy::new(30);
        let defaults = BiometricsConfig::default();
        let bio = policy.apply(
            None,
            Err(CollaboratorError::TimedOut(std::time::Duration::from_millis(5))),
            7,
            &defaults,
        );
        assert_eq!(bio.identity, "Guest");
        assert_eq!(bio.gender, "Unknown");
        assert_eq!(bio.age, Age::Label("Unknown".to_string()));
        assert_eq!(bio.last_refresh_frame, 7);
        assert!(!policy.should_refresh(Some(&bio), 8));
        assert!(policy.should_refresh(Some(&bio), 37));
    }

    #[test]
    fn test_zero_interval_refreshes_every_frame() {
        let policy = ThrottledRefreshPolicy::new(0);
        let bio = Biometrics::defaults(&BiometricsConfig::default(), 5);
        assert!(policy.should_refresh(Some(&bio), 5));
    }

    #[test]
    fn test_age_serde_untagged() {
        assert_eq!(serde_json::to_string(&Age::Years(29.0)).unwrap(), "29.0");
        assert_eq!(serde_json::to_string(&Age::from("Unknown")).unwrap(), "\"Unknown\"");
        let parsed: Age = serde_json::from_str("41.5").unwrap();
        assert_eq!(parsed, Age::Years(41.5));
        assert_eq!(Age::from("Unknown").to_string(), "Unknown");
    }
}
