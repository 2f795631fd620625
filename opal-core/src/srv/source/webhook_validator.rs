/*
    Copyright 2025 MydriaTech AB

    Licensed under the Apache License 2.0 with Free world makers exception
    1.0.0 (the "License"); you may not use this file except in compliance with
    the License. You should have obtained a copy of the License with the source
    or binary distribution in file named

        LICENSE-Apache-2.0-with-FWM-Exception-1.0.0

    Unless required by applicable law or agreed to in writing, software
    distributed under the License is distributed on an "AS IS" BASIS,
    WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
    See the License for the specific language governing permissions and
    limitations under the License.
*/

//! Validation of inbound policy webhook requests.

use crate::conf::SourceConfig;
use crate::conf::WebhookScheme;
use crate::srv::ServerError;
use crate::srv::ServerErrorKind;
use hmac::Hmac;
use hmac::Mac;
use regex::Regex;
use sha2::Sha256;
use sha2::Sha512;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Validates webhook secrets and decides whether a request should trigger a
/// tracker re-check.
///
/// Schemes:
/// - bearer: the shared secret is presented verbatim in the
///   `Authorization` header.
/// - HMAC: the signature header carries `sha256=<hex>` (or `sha512=`) over
///   the raw request body.
pub struct WebhookValidator {
    secret: String,
    scheme: WebhookScheme,
    signature_header: String,
    event_header: String,
    event_regex: Option<Regex>,
    branch: String,
    require_branch: bool,
}

impl WebhookValidator {
    /// Return a new instance. An invalid event regex refuses startup.
    pub fn new(source_config: &SourceConfig) -> Result<Arc<Self>, ServerError> {
        let event_regex = match source_config.webhook_event_regex() {
            "" => None,
            pattern => Some(Regex::new(pattern).map_err(|e| {
                ServerErrorKind::Configuration
                    .error_with_msg(format!("Invalid webhook event regex: {e}"))
            })?),
        };
        Ok(Arc::new(Self {
            secret: source_config.webhook_secret().to_string(),
            scheme: source_config.webhook_scheme(),
            signature_header: source_config.webhook_signature_header().to_lowercase(),
            event_header: source_config.webhook_event_header().to_lowercase(),
            event_regex,
            branch: source_config.branch().to_string(),
            require_branch: source_config.webhook_require_branch(),
        }))
    }

    /// Validate a webhook request.
    ///
    /// Returns `Ok(true)` when the tracker should re-check, `Ok(false)` for
    /// an authentic request that is filtered out (wrong branch or event
    /// type) and an error for secret mismatches.
    pub fn validate(
        &self,
        headers: &BTreeMap<String, String>,
        body: &[u8],
    ) -> Result<bool, ServerError> {
        if self.secret.is_empty() {
            Err(ServerErrorKind::WebhookRejected
                .error_with_msg("No webhook secret is configured."))?;
        }
        match self.scheme {
            WebhookScheme::Token => self.validate_token(headers)?,
            WebhookScheme::HmacSha256 | WebhookScheme::HmacSha512 => {
                self.validate_signature(headers, body)?
            }
        }
        if let Some(event_regex) = &self.event_regex {
            let event = headers.get(&self.event_header).cloned().unwrap_or_default();
            if !event_regex.is_match(&event) {
                log::debug!("Ignoring webhook event '{event}'.");
                return Ok(false);
            }
        }
        if self.require_branch && !self.names_tracked_branch(body) {
            log::debug!("Ignoring webhook that does not name branch '{}'.", &self.branch);
            return Ok(false);
        }
        Ok(true)
    }

    /// Bearer scheme: compare the presented secret.
    fn validate_token(&self, headers: &BTreeMap<String, String>) -> Result<(), ServerError> {
        let presented = headers
            .get("authorization")
            .map(|value| {
                value
                    .trim()
                    .strip_prefix("Bearer")
                    .map(|s| s.trim())
                    .unwrap_or(value.trim())
            })
            .unwrap_or_default();
        // Compare MACs of both values so the comparison is constant time.
        let mut expected = <Hmac<Sha256> as Mac>::new_from_slice(b"webhook-token").unwrap();
        expected.update(self.secret.as_bytes());
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(b"webhook-token").unwrap();
        mac.update(presented.as_bytes());
        mac.verify_slice(&expected.finalize().into_bytes())
            .map_err(|_| {
                ServerErrorKind::WebhookRejected.error_with_msg("Webhook secret mismatch.")
            })
    }

    /// HMAC scheme: verify the signature header over the body.
    fn validate_signature(
        &self,
        headers: &BTreeMap<String, String>,
        body: &[u8],
    ) -> Result<(), ServerError> {
        let signature = headers.get(&self.signature_header).ok_or_else(|| {
            ServerErrorKind::WebhookRejected.error_with_msg(format!(
                "Missing signature header '{}'.",
                &self.signature_header
            ))
        })?;
        let hex_signature = signature
            .trim()
            .trim_start_matches("sha256=")
            .trim_start_matches("sha512=");
        let signature_bytes = hex::decode(hex_signature).map_err(|_| {
            ServerErrorKind::WebhookRejected.error_with_msg("Malformed webhook signature.")
        })?;
        let verified = match self.scheme {
            WebhookScheme::HmacSha512 => {
                let mut mac =
                    <Hmac<Sha512> as Mac>::new_from_slice(self.secret.as_bytes()).unwrap();
                mac.update(body);
                mac.verify_slice(&signature_bytes).is_ok()
            }
            _ => {
                let mut mac =
                    <Hmac<Sha256> as Mac>::new_from_slice(self.secret.as_bytes()).unwrap();
                mac.update(body);
                mac.verify_slice(&signature_bytes).is_ok()
            }
        };
        if verified {
            Ok(())
        } else {
            Err(ServerErrorKind::WebhookRejected.error_with_msg("Webhook signature mismatch."))
        }
    }

    /// Check whether the payload names the tracked branch (git push event
    /// `ref` field).
    fn names_tracked_branch(&self, body: &[u8]) -> bool {
        serde_json::from_slice::<serde_json::Value>(body)
            .ok()
            .and_then(|payload| {
                payload
                    .get("ref")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
            })
            .is_some_and(|git_ref| {
                git_ref == self.branch
                    || git_ref == format!("refs/heads/{}", &self.branch)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator(scheme: &str, require_branch: bool) -> Arc<WebhookValidator> {
        let source_config: SourceConfig = serde_json::from_value(serde_json::json!({
            "sourcetype": "git",
            "repourl": "https://example.invalid/repo.git",
            "branch": "main",
            "clonepath": "./clone",
            "pollingintervalseconds": 0,
            "bundleurl": "",
            "webhooksecret": "s3cr3t",
            "webhookscheme": scheme,
            "webhooksignatureheader": "X-Hub-Signature-256",
            "webhookeventheader": "X-GitHub-Event",
            "webhookeventregex": "",
            "webhookrequirebranch": require_branch,
            "extensions": ".rego,.json",
            "ignoreglobs": "",
            "manifestfilename": ".manifest",
            "leaderlockpath": "./leader.lock",
            "leaderttlseconds": 30,
        }))
        .unwrap();
        WebhookValidator::new(&source_config).unwrap()
    }

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn valid_signature_triggers_recheck() {
        let validator = validator("hmac-sha256", false);
        let body = br#"{"ref":"refs/heads/main"}"#;
        let headers = BTreeMap::from([(
            "x-hub-signature-256".to_string(),
            sign("s3cr3t", body),
        )]);
        assert!(validator.validate(&headers, body).unwrap());
    }

    #[test]
    fn invalid_signature_is_rejected() {
        let validator = validator("hmac-sha256", false);
        let body = br#"{"ref":"refs/heads/main"}"#;
        let headers = BTreeMap::from([(
            "x-hub-signature-256".to_string(),
            sign("wrong-secret", body),
        )]);
        assert!(validator.validate(&headers, body).is_err());
        assert!(validator.validate(&BTreeMap::new(), body).is_err());
    }

    #[test]
    fn token_scheme_compares_the_shared_secret() {
        let validator = validator("token", false);
        let ok = BTreeMap::from([("authorization".to_string(), "Bearer s3cr3t".to_string())]);
        assert!(validator.validate(&ok, b"{}").unwrap());
        let bad = BTreeMap::from([("authorization".to_string(), "Bearer nope".to_string())]);
        assert!(validator.validate(&bad, b"{}").is_err());
    }

    #[test]
    fn other_branches_are_filtered_not_rejected() {
        let validator = validator("hmac-sha256", true);
        let body = br#"{"ref":"refs/heads/feature"}"#;
        let headers = BTreeMap::from([(
            "x-hub-signature-256".to_string(),
            sign("s3cr3t", body),
        )]);
        assert!(!validator.validate(&headers, body).unwrap());
        let body = br#"{"ref":"refs/heads/main"}"#;
        let headers = BTreeMap::from([(
            "x-hub-signature-256".to_string(),
            sign("s3cr3t", body),
        )]);
        assert!(validator.validate(&headers, body).unwrap());
    }
}
