//! Two-step onboarding wizard producing a config entry.
//!
//! `user` collects and validates the API key against the all-sites
//! endpoint; `site` picks a site and polling interval. When an entry for
//! the domain already exists its key is reused and `user` is skipped.
//! Rendering the forms is the host's job; this module only decides what
//! to show next.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::api::{ApiError, HttpTransport, RwisClient};
use crate::config::{ConfigEntry, EntryData, UpdateInterval, DEFAULT_UPDATE_INTERVAL};
use crate::model::SiteOption;
use crate::{DOMAIN, NAME};

/// Form key for errors not tied to a single field.
pub const BASE_ERROR: &str = "base";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStep {
    User,
    Site,
}

impl FlowStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowStep::User => "user",
            FlowStep::Site => "site",
        }
    }
}

/// Error and abort reasons, rendered with the host's translation keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FlowError {
    #[error("invalid_auth")]
    InvalidAuth,
    #[error("cannot_connect")]
    CannotConnect,
    #[error("unknown")]
    Unknown,
    #[error("invalid_site")]
    InvalidSite,
    #[error("invalid_update_interval")]
    InvalidUpdateInterval,
    #[error("already_configured")]
    AlreadyConfigured,
}

impl From<&ApiError> for FlowError {
    fn from(err: &ApiError) -> Self {
        if err.is_unauthorized() {
            FlowError::InvalidAuth
        } else if err.is_connectivity() {
            FlowError::CannotConnect
        } else {
            FlowError::Unknown
        }
    }
}

/// What the host should do after a step.
#[derive(Debug, Clone, PartialEq)]
pub enum FlowResult {
    ShowForm {
        step: FlowStep,
        errors: BTreeMap<&'static str, FlowError>,
        /// Choices for the site selector; empty on the `user` step.
        sites: Vec<SiteOption>,
    },
    CreateEntry {
        title: String,
        unique_id: String,
        data: EntryData,
    },
    Abort {
        reason: FlowError,
    },
}

#[derive(Debug, Clone)]
pub struct UserInput {
    pub api_key: String,
}

#[derive(Debug, Clone)]
pub struct SiteInput {
    pub site_id: String,
    /// Minutes; `None` takes the default.
    pub update_interval: Option<i64>,
}

pub struct ConfigFlow {
    transport: Arc<dyn HttpTransport>,
    base_url: String,
    existing: Vec<ConfigEntry>,
    api_key: Option<String>,
    sites: Option<Vec<SiteOption>>,
}

impl ConfigFlow {
    /// Start a flow. `existing` is the host's current entry list.
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        base_url: impl Into<String>,
        existing: &[ConfigEntry],
    ) -> Self {
        Self {
            transport,
            base_url: base_url.into(),
            existing: existing
                .iter()
                .filter(|e| e.domain == DOMAIN)
                .cloned()
                .collect(),
            api_key: None,
            sites: None,
        }
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    /// Entry point. Returns the API key form, or moves straight on to site
    /// selection when a stored key can be reused.
    pub async fn step_user(&mut self, input: Option<UserInput>) -> FlowResult {
        let mut errors = BTreeMap::new();

        if let Some(entry) = self.existing.first() {
            log::debug!("[ConfigFlow] reusing API key of entry {}", entry.entry_id);
            self.api_key = Some(entry.data.api_key.clone());
            return self.step_site(None).await;
        }

        if let Some(input) = input {
            let api_key = input.api_key.trim().to_string();
            match self.fetch_sites(&api_key).await {
                Ok(sites) => {
                    self.api_key = Some(api_key);
                    self.sites = Some(sites);
                    return self.step_site(None).await;
                }
                Err(e) => {
                    errors.insert(BASE_ERROR, e);
                }
            }
        }

        FlowResult::ShowForm {
            step: FlowStep::User,
            errors,
            sites: Vec::new(),
        }
    }

    /// Site selection. Fetches the site list first if it is not known yet.
    pub async fn step_site(&mut self, input: Option<SiteInput>) -> FlowResult {
        let Some(api_key) = self.api_key.clone() else {
            return FlowResult::ShowForm {
                step: FlowStep::User,
                errors: BTreeMap::new(),
                sites: Vec::new(),
            };
        };

        if self.sites.as_ref().map_or(true, Vec::is_empty) {
            match self.fetch_sites(&api_key).await {
                Ok(sites) => self.sites = Some(sites),
                Err(reason) => return FlowResult::Abort { reason },
            }
        }
        let sites = self.sites.clone().unwrap_or_default();

        let mut errors = BTreeMap::new();
        if let Some(input) = input {
            let site = sites.iter().find(|s| s.id == input.site_id);
            let interval = UpdateInterval::new(
                input
                    .update_interval
                    .unwrap_or(i64::from(DEFAULT_UPDATE_INTERVAL)),
            );

            match (site, interval) {
                (Some(site), Ok(update_interval)) => {
                    let unique_id = format!("{}_{}", DOMAIN, site.id);
                    if self
                        .existing
                        .iter()
                        .any(|e| e.unique_id.as_deref() == Some(unique_id.as_str()))
                    {
                        return FlowResult::Abort {
                            reason: FlowError::AlreadyConfigured,
                        };
                    }

                    log::info!("[ConfigFlow] creating entry for site {}", site.id);
                    return FlowResult::CreateEntry {
                        title: format!("{} - {}", NAME, site.name),
                        unique_id,
                        data: EntryData {
                            api_key,
                            site_id: site.id.clone(),
                            update_interval,
                        },
                    };
                }
                (site, interval) => {
                    if site.is_none() {
                        errors.insert("site_id", FlowError::InvalidSite);
                    }
                    if interval.is_err() {
                        errors.insert("update_interval", FlowError::InvalidUpdateInterval);
                    }
                }
            }
        }

        FlowResult::ShowForm {
            step: FlowStep::Site,
            errors,
            sites,
        }
    }

    async fn fetch_sites(&self, api_key: &str) -> Result<Vec<SiteOption>, FlowError> {
        let client = RwisClient::new(self.transport.clone(), self.base_url.clone(), api_key);
        client.fetch_all_sites().await.map_err(|e| {
            let reason = FlowError::from(&e);
            match reason {
                FlowError::Unknown => {
                    log::error!("[ConfigFlow] unexpected error during API key validation: {}", e)
                }
                _ => log::warn!("[ConfigFlow] site list fetch failed: {}", e),
            }
            reason
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::*;
    use serde_json::json;

    fn sites_json() -> serde_json::Value {
        json!({"features": [
            {"properties": {"id": 123, "name": "Bozeman Pass"}},
            {"properties": {"id": 456, "name": "Lolo Pass"}}
        ]})
    }

    fn flow(mock: &Arc<MockTransport>, existing: &[ConfigEntry]) -> ConfigFlow {
        ConfigFlow::new(mock.clone(), BASE, existing)
    }

    fn stored_entry(site: &str, key: &str) -> ConfigEntry {
        ConfigEntry::new(
            "stored",
            Some(format!("mdt_rwis_{}", site)),
            EntryData {
                api_key: key.into(),
                site_id: site.into(),
                update_interval: UpdateInterval::default(),
            },
        )
    }

    #[tokio::test]
    async fn first_show_is_api_key_form() {
        let mock = MockTransport::new();
        let result = flow(&mock, &[]).step_user(None).await;
        assert_eq!(
            result,
            FlowResult::ShowForm {
                step: FlowStep::User,
                errors: BTreeMap::new(),
                sites: vec![],
            }
        );
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn unauthorized_key_is_invalid_auth() {
        let mock = MockTransport::new();
        mock.raw(SITES_PATH, 401, b"unauthorized");
        let result = flow(&mock, &[])
            .step_user(Some(UserInput { api_key: "bad".into() }))
            .await;
        match result {
            FlowResult::ShowForm { step, errors, .. } => {
                assert_eq!(step, FlowStep::User);
                assert_eq!(errors.get(BASE_ERROR), Some(&FlowError::InvalidAuth));
            }
            other => panic!("expected form, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn other_statuses_are_cannot_connect() {
        for status in [400u16, 403, 404, 429, 500, 502, 503, 201, 204] {
            let mock = MockTransport::new();
            mock.raw(SITES_PATH, status, b"");
            let result = flow(&mock, &[])
                .step_user(Some(UserInput { api_key: "k".into() }))
                .await;
            match result {
                FlowResult::ShowForm { errors, .. } => assert_eq!(
                    errors.get(BASE_ERROR),
                    Some(&FlowError::CannotConnect),
                    "status {}",
                    status
                ),
                other => panic!("status {}: expected form, got {:?}", status, other),
            }
        }
    }

    #[tokio::test]
    async fn network_error_is_cannot_connect() {
        let mock = MockTransport::new();
        mock.reply(SITES_PATH, Reply::Fail("connection refused".into()));
        let result = flow(&mock, &[])
            .step_user(Some(UserInput { api_key: "k".into() }))
            .await;
        assert!(matches!(
            result,
            FlowResult::ShowForm { ref errors, .. } if errors.get(BASE_ERROR) == Some(&FlowError::CannotConnect)
        ));
    }

    #[tokio::test]
    async fn malformed_site_list_is_unknown() {
        let mock = MockTransport::new();
        mock.json(SITES_PATH, 200, &json!({"unexpected": true}));
        let result = flow(&mock, &[])
            .step_user(Some(UserInput { api_key: "k".into() }))
            .await;
        assert!(matches!(
            result,
            FlowResult::ShowForm { ref errors, .. } if errors.get(BASE_ERROR) == Some(&FlowError::Unknown)
        ));
    }

    #[tokio::test]
    async fn valid_key_then_site_creates_entry() {
        let mock = MockTransport::new();
        mock.json(SITES_PATH, 200, &sites_json());
        let mut f = flow(&mock, &[]);

        let result = f.step_user(Some(UserInput { api_key: " k1 ".into() })).await;
        match &result {
            FlowResult::ShowForm { step, sites, errors } => {
                assert_eq!(*step, FlowStep::Site);
                assert!(errors.is_empty());
                assert_eq!(sites.len(), 2);
                assert_eq!(sites[0].id, "123");
            }
            other => panic!("expected site form, got {:?}", other),
        }
        assert_eq!(mock.call_count(SITES_PATH), 1);

        let result = f
            .step_site(Some(SiteInput {
                site_id: "123".into(),
                update_interval: Some(5),
            }))
            .await;
        assert_eq!(
            result,
            FlowResult::CreateEntry {
                title: "Montana DOT RWIS - Bozeman Pass".into(),
                unique_id: "mdt_rwis_123".into(),
                data: EntryData {
                    api_key: "k1".into(),
                    site_id: "123".into(),
                    update_interval: UpdateInterval::new(5).unwrap(),
                },
            }
        );
        // Site list is reused from the user step.
        assert_eq!(mock.call_count(SITES_PATH), 1);
    }

    #[tokio::test]
    async fn interval_defaults_and_bounds() {
        let mock = MockTransport::new();
        mock.json(SITES_PATH, 200, &sites_json());

        let mut f = flow(&mock, &[]);
        f.step_user(Some(UserInput { api_key: "k".into() })).await;
        let result = f
            .step_site(Some(SiteInput { site_id: "456".into(), update_interval: None }))
            .await;
        match result {
            FlowResult::CreateEntry { data, .. } => {
                assert_eq!(data.update_interval.minutes(), DEFAULT_UPDATE_INTERVAL)
            }
            other => panic!("expected entry, got {:?}", other),
        }

        for (minutes, accepted) in [(1, true), (60, true), (0, false), (61, false)] {
            let mut f = flow(&mock, &[]);
            f.step_user(Some(UserInput { api_key: "k".into() })).await;
            let result = f
                .step_site(Some(SiteInput {
                    site_id: "456".into(),
                    update_interval: Some(minutes),
                }))
                .await;
            match result {
                FlowResult::CreateEntry { data, .. } => {
                    assert!(accepted, "{} should be rejected", minutes);
                    assert_eq!(i64::from(data.update_interval.minutes()), minutes);
                }
                FlowResult::ShowForm { errors, .. } => {
                    assert!(!accepted, "{} should be accepted", minutes);
                    assert_eq!(
                        errors.get("update_interval"),
                        Some(&FlowError::InvalidUpdateInterval)
                    );
                }
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn unknown_site_is_rejected() {
        let mock = MockTransport::new();
        mock.json(SITES_PATH, 200, &sites_json());
        let mut f = flow(&mock, &[]);
        f.step_user(Some(UserInput { api_key: "k".into() })).await;
        let result = f
            .step_site(Some(SiteInput { site_id: "999".into(), update_interval: None }))
            .await;
        assert!(matches!(
            result,
            FlowResult::ShowForm { step: FlowStep::Site, ref errors, .. }
                if errors.get("site_id") == Some(&FlowError::InvalidSite)
        ));
    }

    #[tokio::test]
    async fn existing_entry_skips_key_prompt() {
        let mock = MockTransport::new();
        mock.json(SITES_PATH, 200, &sites_json());
        let existing = vec![stored_entry("123", "stored-key")];

        let mut f = flow(&mock, &existing);
        let result = f.step_user(None).await;
        assert!(matches!(result, FlowResult::ShowForm { step: FlowStep::Site, .. }));
        assert_eq!(f.api_key(), Some("stored-key"));

        let (url, _) = &mock.calls()[0];
        assert!(url.contains("apiKey=stored-key"));

        let result = f
            .step_site(Some(SiteInput { site_id: "456".into(), update_interval: Some(30) }))
            .await;
        match result {
            FlowResult::CreateEntry { data, unique_id, .. } => {
                assert_eq!(data.api_key, "stored-key");
                assert_eq!(unique_id, "mdt_rwis_456");
            }
            other => panic!("expected entry, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn same_site_twice_aborts() {
        let mock = MockTransport::new();
        mock.json(SITES_PATH, 200, &sites_json());
        let existing = vec![stored_entry("123", "k")];
        let mut f = flow(&mock, &existing);
        f.step_user(None).await;
        let result = f
            .step_site(Some(SiteInput { site_id: "123".into(), update_interval: None }))
            .await;
        assert_eq!(
            result,
            FlowResult::Abort { reason: FlowError::AlreadyConfigured }
        );
    }

    #[tokio::test]
    async fn site_fetch_failure_with_stored_key_aborts() {
        let mock = MockTransport::new();
        mock.raw(SITES_PATH, 401, b"");
        let existing = vec![stored_entry("123", "revoked")];
        let result = flow(&mock, &existing).step_user(None).await;
        assert_eq!(result, FlowResult::Abort { reason: FlowError::InvalidAuth });

        let mock = MockTransport::new();
        mock.raw(SITES_PATH, 500, b"");
        let result = flow(&mock, &existing).step_user(None).await;
        assert_eq!(result, FlowResult::Abort { reason: FlowError::CannotConnect });
    }

    #[tokio::test]
    async fn entries_of_other_domains_are_ignored() {
        let mock = MockTransport::new();
        let mut foreign = stored_entry("1", "other");
        foreign.domain = "other_domain".into();
        let result = flow(&mock, &[foreign]).step_user(None).await;
        assert!(matches!(result, FlowResult::ShowForm { step: FlowStep::User, .. }));
    }

    #[test]
    fn error_keys_match_host_translations() {
        assert_eq!(FlowError::InvalidAuth.to_string(), "invalid_auth");
        assert_eq!(FlowError::CannotConnect.to_string(), "cannot_connect");
        assert_eq!(FlowStep::Site.as_str(), "site");
    }
}
