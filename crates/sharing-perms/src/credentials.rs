//! Credentials exchanged between the owner and each recipient.
//!
//! Tokens are opaque random strings, checked by equality. The party that
//! mints a token is the party that verifies it.

use rand::RngCore;
use serde::{Deserialize, Serialize};

use sharing_core::XorKey;

/// A fresh random token, hex encoded.
pub fn new_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// A short random code, for preview links.
pub fn new_code() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Identifies the peer's client registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthClient {
    pub client_id: String,
}

impl OAuthClient {
    pub fn generate() -> Self {
        Self {
            client_id: new_code(),
        }
    }
}

/// A bearer token and the token to refresh it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    pub refresh_token: String,
}

impl AccessToken {
    pub fn generate() -> Self {
        Self {
            access_token: new_token(),
            refresh_token: new_token(),
        }
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessToken(..)")
    }
}

/// Credentials of one owner/recipient pair, as seen from one side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Single-use token identifying the invitation until it is answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// Our client on the peer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<OAuthClient>,
    /// Token we present when calling the peer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<AccessToken>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xor_key: Option<XorKey>,
    /// The peer's client on our side.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inbound_client_id: Option<String>,
    /// Token the peer must present when calling us.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inbound: Option<AccessToken>,
}

impl Credentials {
    /// Credentials of a new invitation.
    pub fn invitation() -> Self {
        Self {
            state: Some(new_token()),
            ..Default::default()
        }
    }

    /// Mint the inbound client and token the peer will use to call us.
    pub fn mint_inbound(&mut self) -> (String, AccessToken) {
        let client_id = OAuthClient::generate().client_id;
        let token = AccessToken::generate();
        self.inbound_client_id = Some(client_id.clone());
        self.inbound = Some(token.clone());
        (client_id, token)
    }

    /// Whether the peer presented the current inbound access token.
    pub fn accepts(&self, token: &str) -> bool {
        !token.is_empty()
            && self
                .inbound
                .as_ref()
                .is_some_and(|t| t.access_token == token)
    }

    /// Whether the peer presented the current inbound refresh token.
    pub fn accepts_refresh(&self, refresh_token: &str) -> bool {
        !refresh_token.is_empty()
            && self
                .inbound
                .as_ref()
                .is_some_and(|t| t.refresh_token == refresh_token)
    }

    pub fn outbound_token(&self) -> Option<&str> {
        self.access_token.as_ref().map(|t| t.access_token.as_str())
    }

    pub fn is_cleared(&self) -> bool {
        *self == Credentials::default()
    }

    pub fn clear(&mut self) {
        *self = Credentials::default();
    }
}
