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

//! Peer authentication from HTTP requests.

use actix_web::HttpRequest;
use actix_web::http::header::HeaderValue;
use opal_core::srv::ServerError;
use opal_core::srv::ServerErrorKind;
use opal_core::srv::auth::AuthGate;
use opal_core::srv::auth::PeerIdentity;
use opal_core::srv::auth::PeerKind;

/// Extract the `Authorization` bearer token, if any.
pub fn bearer_token(http_request: &HttpRequest) -> Result<Option<String>, ServerError> {
    let Some(header_value) = http_request
        .headers()
        .get(actix_web::http::header::AUTHORIZATION)
    else {
        return Ok(None);
    };
    let header_value = HeaderValue::to_str(header_value).map_err(|e| {
        ServerErrorKind::AuthenticationFailure
            .error_with_msg(format!("Invalid 'Authorization' HTTP header: {e}"))
    })?;
    Ok(AuthGate::bearer_from_header(header_value).map(str::to_string))
}

/// Verify the request's bearer token at the auth gate.
pub fn get_identity(
    auth_gate: &AuthGate,
    http_request: &HttpRequest,
    fallback_kind: PeerKind,
) -> Result<PeerIdentity, ServerError> {
    let bearer_token = bearer_token(http_request)?;
    auth_gate.verify(bearer_token.as_deref(), fallback_kind)
}
