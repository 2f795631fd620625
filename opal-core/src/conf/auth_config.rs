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

//! Parsing of configuration for the auth gate.

use config::ConfigBuilder;
use config::builder::BuilderState;
use serde::{Deserialize, Serialize};

use super::ServerConfigDefaults;

/// JWT signing algorithm of the auth gate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JwtAlgorithm {
    /// Auth disabled: every peer is accepted.
    Open,
    /// HMAC-SHA256 with a shared secret.
    Hs256,
    /// RSASSA-PKCS1-v1_5 with SHA-256 and PEM key pair files.
    Rs256,
}

/// Configuration for the auth gate.
#[derive(Debug, Deserialize, Serialize)]
pub struct AuthConfig {
    /// See [Self::master_token()].
    mastertoken: String,
    /// See [Self::jwt_algorithm()].
    jwtalgorithm: String,
    /// See [Self::hs256_secret()].
    jwtsecret: String,
    /// See [Self::rs256_private_key_file()].
    jwtprivatekeyfile: String,
    /// See [Self::rs256_public_key_file()].
    jwtpublickeyfile: String,
    /// See [Self::audience()].
    audience: String,
    /// See [Self::issuer()].
    issuer: String,
    /// See [Self::token_ttl_seconds()].
    tokenttlseconds: u64,
}

impl ServerConfigDefaults for AuthConfig {
    /// Provide defaults for this part of the configuration
    fn set_defaults<T: BuilderState>(
        config_builder: ConfigBuilder<T>,
        prefix: &str,
    ) -> ConfigBuilder<T> {
        config_builder
            .set_default(prefix.to_string() + "." + "mastertoken", "")
            .unwrap()
            .set_default(prefix.to_string() + "." + "jwtalgorithm", "open")
            .unwrap()
            .set_default(prefix.to_string() + "." + "jwtsecret", "")
            .unwrap()
            .set_default(prefix.to_string() + "." + "jwtprivatekeyfile", "")
            .unwrap()
            .set_default(prefix.to_string() + "." + "jwtpublickeyfile", "")
            .unwrap()
            .set_default(prefix.to_string() + "." + "audience", "opal")
            .unwrap()
            .set_default(prefix.to_string() + "." + "issuer", "opal-server")
            .unwrap()
            .set_default(prefix.to_string() + "." + "tokenttlseconds", "86400")
            .unwrap()
    }
}

impl AuthConfig {
    /// Static secret allowed to mint JWTs at the token endpoint. Empty
    /// disables minting.
    pub fn master_token(&self) -> Option<&str> {
        let trimmed = self.mastertoken.trim();
        if trimmed.is_empty() { None } else { Some(trimmed) }
    }

    /// JWT algorithm: `open` (no verification), `hs256` or `rs256`. Unknown
    /// values refuse startup.
    pub fn jwt_algorithm(&self) -> JwtAlgorithm {
        match self.jwtalgorithm.trim().to_lowercase().as_str() {
            "open" | "" => JwtAlgorithm::Open,
            "hs256" => JwtAlgorithm::Hs256,
            "rs256" => JwtAlgorithm::Rs256,
            unknown => panic!("Unknown JWT algorithm '{unknown}'."),
        }
    }

    /// Shared secret for `hs256`.
    pub fn hs256_secret(&self) -> &str {
        self.jwtsecret.trim()
    }

    /// PEM file with the RSA private key for `rs256` (minting).
    pub fn rs256_private_key_file(&self) -> &str {
        self.jwtprivatekeyfile.trim()
    }

    /// PEM file with the RSA public key for `rs256` (verification).
    pub fn rs256_public_key_file(&self) -> &str {
        self.jwtpublickeyfile.trim()
    }

    /// Expected `aud` claim.
    pub fn audience(&self) -> &str {
        &self.audience
    }

    /// Expected `iss` claim.
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Lifetime of minted tokens.
    pub fn token_ttl_seconds(&self) -> u64 {
        self.tokenttlseconds.max(60)
    }
}
