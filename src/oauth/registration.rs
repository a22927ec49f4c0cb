//! Dynamic client registration (RFC 7591 shaped)
//!
//! Every client shares the service's own app registration: requested
//! redirect URIs are merged into that registration (as the service, via the
//! downstream API) and the service's client credentials are returned.

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::config::IdentityConfig;
use crate::downstream::{ApiClient, odata_string, path_segment};
use crate::{Error, Result};

/// Registration request body
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistrationRequest {
    /// Redirect URIs the client will use
    #[serde(default)]
    pub redirect_uris: Option<Vec<String>>,
    /// Requested scope string
    #[serde(default)]
    pub scope: Option<String>,
}

/// Registration response body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationResponse {
    /// The service's client ID
    pub client_id: String,
    /// The service's client secret
    pub client_secret: String,
    /// The redirect URIs from the request
    pub redirect_uris: Vec<String>,
    /// Effective scope string
    pub scope: String,
}

#[derive(Debug, Deserialize)]
struct ApplicationList {
    #[serde(default)]
    value: Vec<Application>,
}

#[derive(Debug, Deserialize)]
struct Application {
    id: String,
    #[serde(default)]
    web: Option<WebSettings>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WebSettings {
    #[serde(default)]
    redirect_uris: Vec<String>,
}

/// Union of `existing` and `requested`, first-seen order, no duplicates.
///
/// Returns the merged list and how many requested URIs were new.
#[must_use]
pub fn merge_redirect_uris(existing: &[String], requested: &[String]) -> (Vec<String>, usize) {
    let mut merged: Vec<String> = Vec::with_capacity(existing.len() + requested.len());
    push_distinct(&mut merged, existing);
    let added = push_distinct(&mut merged, requested);
    (merged, added)
}

/// Append the URIs not yet in `list`; returns how many were appended
fn push_distinct(list: &mut Vec<String>, uris: &[String]) -> usize {
    let before = list.len();
    for uri in uris {
        if !list.contains(uri) {
            list.push(uri.clone());
        }
    }
    list.len() - before
}

/// Scope returned when the client asks for none
#[must_use]
pub fn default_scope(client_id: &str) -> String {
    format!("{client_id}/.default openid profile email offline_access")
}

/// Register a client against the service's own app registration.
///
/// `service` must authenticate as the service identity.
///
/// # Errors
///
/// [`Error::Registration`] when the app registration does not exist, or the
/// downstream/delegation error of the failed lookup or update.
pub async fn register(
    service: &ApiClient,
    identity: &IdentityConfig,
    request: RegistrationRequest,
) -> Result<RegistrationResponse> {
    let requested = request.redirect_uris.unwrap_or_default();

    let lookup = format!(
        "/v1.0/applications?$filter=appId eq {}&$select=id,web",
        odata_string(&identity.client_id)
    );
    let applications: ApplicationList = service.get(&lookup).await?;
    let application = applications.value.into_iter().next().ok_or_else(|| {
        Error::Registration(format!(
            "Application with Client ID {} not found.",
            identity.client_id
        ))
    })?;

    let existing = application.web.unwrap_or_default().redirect_uris;
    let (merged, added) = merge_redirect_uris(&existing, &requested);

    if added > 0 {
        let _: serde_json::Value = service
            .patch(
                &format!("/v1.0/applications/{}", path_segment(&application.id)),
                &json!({ "web": { "redirectUris": merged } }),
            )
            .await?;
        info!(added, "Updated redirect URIs on app registration");
    } else {
        debug!("Redirect URIs already registered");
    }

    Ok(RegistrationResponse {
        client_id: identity.client_id.clone(),
        client_secret: identity.client_secret.expose().to_string(),
        redirect_uris: requested,
        scope: request
            .scope
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| default_scope(&identity.client_id)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn uris(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn merge_adds_new_uris_in_order() {
        let (merged, added) = merge_redirect_uris(
            &uris(&["https://a/cb"]),
            &uris(&["https://b/cb", "https://a/cb", "https://b/cb"]),
        );

        assert_eq!(added, 1);
        assert_eq!(merged, uris(&["https://a/cb", "https://b/cb"]));
    }

    #[test]
    fn merge_is_idempotent() {
        // GIVEN: a URI that is already registered
        let existing = uris(&["https://a/cb", "https://b/cb"]);

        // WHEN: it is requested again (in any order)
        let (merged, added) = merge_redirect_uris(&existing, &uris(&["https://b/cb"]));

        // THEN: nothing changes
        assert_eq!(added, 0);
        assert_eq!(merged, existing);
    }

    #[test]
    fn merge_with_nothing_requested_does_not_grow() {
        let (_, added) = merge_redirect_uris(&uris(&["https://a/cb"]), &[]);
        assert_eq!(added, 0);
    }

    #[test]
    fn merge_counts_only_new_uris_when_registration_has_duplicates() {
        // GIVEN: an app registration holding the same URI three times
        let existing = uris(&["https://a/cb", "https://a/cb", "https://a/cb"]);

        // WHEN: one new URI is requested
        let (merged, added) = merge_redirect_uris(&existing, &uris(&["https://b/cb"]));

        // THEN: the duplicates collapse and exactly one URI counts as added
        assert_eq!(added, 1);
        assert_eq!(merged, uris(&["https://a/cb", "https://b/cb"]));
    }

    #[test]
    fn default_scope_names_client() {
        assert_eq!(
            default_scope("app-1"),
            "app-1/.default openid profile email offline_access"
        );
    }
}
