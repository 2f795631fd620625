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

//! JWT-based identity verification and master-token gated minting.

use super::PeerIdentity;
use super::PeerKind;
use crate::conf::AuthConfig;
use crate::conf::JwtAlgorithm;
use crate::srv::ServerError;
use crate::srv::ServerErrorKind;
use jsonwebtoken::Algorithm;
use jsonwebtoken::DecodingKey;
use jsonwebtoken::EncodingKey;
use jsonwebtoken::Header;
use jsonwebtoken::Validation;
use serde::Deserialize;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

/// Claims carried by minted peer tokens.
#[derive(Debug, Deserialize, Serialize)]
struct PeerClaims {
    sub: String,
    aud: String,
    iss: String,
    exp: u64,
    iat: u64,
    peer_type: PeerKind,
}

/** Auth gate.

Two credentials exist:

- The **master token** (static secret) is only accepted at the token
  minting endpoint.
- **JWTs** signed by the configured key are presented by clients on
  websocket connect and by data publishers on the update endpoint.

With `jwtalgorithm = open` the gate accepts every peer, which is logged
loudly at startup.
*/
pub struct AuthGate {
    master_token: Option<String>,
    algorithm: JwtAlgorithm,
    encoding_key: Option<EncodingKey>,
    decoding_key: Option<DecodingKey>,
    audience: String,
    issuer: String,
    token_ttl_seconds: u64,
}

impl AuthGate {
    /// Return a new instance. Fails on unreadable or malformed key
    /// material, which refuses startup.
    pub fn new(auth_config: &AuthConfig) -> Result<Arc<Self>, ServerError> {
        let algorithm = auth_config.jwt_algorithm();
        let (encoding_key, decoding_key) = match algorithm {
            JwtAlgorithm::Open => {
                log::warn!(
                    "Auth gate is running OPEN: every client and datasource is accepted. \
                     Configure a JWT algorithm for production use."
                );
                (None, None)
            }
            JwtAlgorithm::Hs256 => {
                let secret = auth_config.hs256_secret();
                if secret.is_empty() {
                    Err(ServerErrorKind::Configuration
                        .error_with_msg("JWT algorithm hs256 requires a secret."))?;
                }
                (
                    Some(EncodingKey::from_secret(secret.as_bytes())),
                    Some(DecodingKey::from_secret(secret.as_bytes())),
                )
            }
            JwtAlgorithm::Rs256 => {
                let private_pem = std::fs::read(auth_config.rs256_private_key_file())
                    .map_err(|e| {
                        ServerErrorKind::Configuration.error_with_msg(format!(
                            "Unable to read private key '{}': {e}",
                            auth_config.rs256_private_key_file()
                        ))
                    })?;
                let public_pem =
                    std::fs::read(auth_config.rs256_public_key_file()).map_err(|e| {
                        ServerErrorKind::Configuration.error_with_msg(format!(
                            "Unable to read public key '{}': {e}",
                            auth_config.rs256_public_key_file()
                        ))
                    })?;
                (
                    Some(EncodingKey::from_rsa_pem(&private_pem).map_err(|e| {
                        ServerErrorKind::Configuration
                            .error_with_msg(format!("Malformed private key: {e}"))
                    })?),
                    Some(DecodingKey::from_rsa_pem(&public_pem).map_err(|e| {
                        ServerErrorKind::Configuration
                            .error_with_msg(format!("Malformed public key: {e}"))
                    })?),
                )
            }
        };
        Ok(Arc::new(Self {
            master_token: auth_config.master_token().map(str::to_string),
            algorithm,
            encoding_key,
            decoding_key,
            audience: auth_config.audience().to_string(),
            issuer: auth_config.issuer().to_string(),
            token_ttl_seconds: auth_config.token_ttl_seconds(),
        }))
    }

    /// The jsonwebtoken algorithm for the configured signing mode.
    fn signing_algorithm(&self) -> Algorithm {
        match self.algorithm {
            JwtAlgorithm::Rs256 => Algorithm::RS256,
            _ => Algorithm::HS256,
        }
    }

    /// Assert that the caller presented the configured master token.
    pub fn assert_master_token(&self, presented: Option<&str>) -> Result<(), ServerError> {
        let Some(master_token) = &self.master_token else {
            Err(ServerErrorKind::Unauthorized
                .error_with_msg("No master token is configured; minting is disabled."))?
        };
        match presented {
            Some(presented) if presented == master_token => Ok(()),
            _ => Err(ServerErrorKind::Unauthorized.error_with_msg("Master token mismatch.")),
        }
    }

    /// Mint a JWT for a peer of the requested kind.
    pub fn mint(&self, kind: PeerKind) -> Result<String, ServerError> {
        let Some(encoding_key) = &self.encoding_key else {
            Err(ServerErrorKind::Configuration
                .error_with_msg("Minting requires a configured JWT algorithm."))?
        };
        let iat = opal_client::time::get_timestamp_micros() / 1_000_000;
        let claims = PeerClaims {
            sub: match kind {
                PeerKind::Client => "opal-client".to_string(),
                PeerKind::Datasource => "opal-datasource".to_string(),
            },
            aud: self.audience.clone(),
            iss: self.issuer.clone(),
            exp: iat + self.token_ttl_seconds,
            iat,
            peer_type: kind,
        };
        jsonwebtoken::encode(&Header::new(self.signing_algorithm()), &claims, encoding_key)
            .map_err(|e| {
                ServerErrorKind::Unspecified.error_with_msg(format!("Failed to mint token: {e}"))
            })
    }

    /// Verify a bearer token and return the peer identity.
    ///
    /// With an open gate every peer is accepted as the requested fallback
    /// kind.
    pub fn verify(
        &self,
        bearer_token: Option<&str>,
        fallback_kind: PeerKind,
    ) -> Result<PeerIdentity, ServerError> {
        let Some(decoding_key) = &self.decoding_key else {
            return Ok(PeerIdentity::new(fallback_kind, "anonymous"));
        };
        let bearer_token = bearer_token.ok_or_else(|| {
            ServerErrorKind::AuthenticationFailure.error_with_msg("Missing bearer token.")
        })?;
        let validation = {
            let mut validation = Validation::new(self.signing_algorithm());
            validation.set_audience(&[&self.audience]);
            validation.validate_exp = true;
            validation.validate_aud = true;
            validation.iss = Some(HashSet::from_iter([self.issuer.clone()]));
            validation.required_spec_claims.insert("iss".to_string());
            validation
        };
        let token_data =
            jsonwebtoken::decode::<PeerClaims>(bearer_token, decoding_key, &validation).map_err(
                |e| {
                    ServerErrorKind::AuthenticationFailure
                        .error_with_msg(format!("Token validation failed: {e}"))
                },
            )?;
        Ok(PeerIdentity::new(
            token_data.claims.peer_type,
            &token_data.claims.sub,
        ))
    }

    /// Extract the bearer token from an `Authorization` header value.
    pub fn bearer_from_header(header_value: &str) -> Option<&str> {
        header_value
            .trim()
            .strip_prefix("Bearer")
            .map(|s| s.trim_start_matches(':'))
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> Arc<AuthGate> {
        Arc::new(AuthGate {
            master_token: Some("master-secret".to_string()),
            algorithm: JwtAlgorithm::Hs256,
            encoding_key: Some(EncodingKey::from_secret(b"test-secret")),
            decoding_key: Some(DecodingKey::from_secret(b"test-secret")),
            audience: "opal".to_string(),
            issuer: "opal-server".to_string(),
            token_ttl_seconds: 3600,
        })
    }

    #[test]
    fn mint_and_verify_round_trip() {
        let gate = gate();
        let token = gate.mint(PeerKind::Datasource).unwrap();
        let identity = gate.verify(Some(&token), PeerKind::Client).unwrap();
        assert_eq!(identity.kind(), PeerKind::Datasource);
        assert_eq!(identity.identity_string(), "opal-datasource");
    }

    #[test]
    fn tampered_token_is_rejected() {
        let gate = gate();
        let token = gate.mint(PeerKind::Client).unwrap();
        let mut tampered = token.clone();
        tampered.pop();
        assert!(gate.verify(Some(&tampered), PeerKind::Client).is_err());
        assert!(gate.verify(None, PeerKind::Client).is_err());
    }

    #[test]
    fn master_token_gate() {
        let gate = gate();
        assert!(gate.assert_master_token(Some("master-secret")).is_ok());
        assert!(gate.assert_master_token(Some("wrong")).is_err());
        assert!(gate.assert_master_token(None).is_err());
    }

    #[test]
    fn bearer_header_parsing() {
        assert_eq!(
            AuthGate::bearer_from_header("Bearer abc.def.ghi"),
            Some("abc.def.ghi")
        );
        assert_eq!(AuthGate::bearer_from_header("Bearer   "), None);
        assert_eq!(AuthGate::bearer_from_header("Basic abc"), None);
    }
}
