use base64::Engine as _;
use log::{debug, warn};
use md5::{Digest, Md5};
use std::collections::HashMap;

/// A parsed `WWW-Authenticate` challenge.
#[derive(Debug, Clone, PartialEq)]
pub enum Challenge {
    /// `Digest realm=..., nonce=...`
    Digest {
        /// Protection space the credentials apply to.
        realm: String,
        /// Server nonce folded into every digest response.
        nonce: String,
    },
    /// `Basic realm=...`
    Basic {
        /// Protection space the credentials apply to.
        realm: String,
    },
}

impl Challenge {
    /// Parses a `WWW-Authenticate` value. Unknown schemes and challenges
    /// without a realm (or a Digest challenge without a nonce) give `None`.
    pub fn parse(header: &str) -> Option<Self> {
        let header = header.trim();
        let (scheme, params) = header.split_once(|c: char| c.is_ascii_whitespace())?;
        let params: HashMap<_, _> = params
            .split(',')
            .filter_map(|part| {
                let (key, value) = part.trim().split_once('=')?;
                Some((key.trim(), value.trim().trim_matches('"')))
            })
            .collect();

        let realm = params.get("realm")?.to_string();
        match scheme {
            "Digest" => Some(Challenge::Digest {
                realm,
                nonce: params.get("nonce")?.to_string(),
            }),
            "Basic" => Some(Challenge::Basic { realm }),
            _ => None,
        }
    }
}

/// Credentials plus whatever the server has challenged us with so far.
///
/// Absent fields mean no credentials or no challenge yet. Only the 401 path
/// mutates the realm and nonce.
#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    realm: Option<String>,
    nonce: Option<String>,
    username: Option<String>,
    password: Option<String>,
}

impl AuthContext {
    /// Creates a context holding the given credentials and no challenge.
    pub fn new(username: Option<String>, password: Option<String>) -> Self {
        Self {
            username,
            password,
            ..Self::default()
        }
    }

    /// Realm of the accepted challenge.
    pub fn realm(&self) -> Option<&str> {
        self.realm.as_deref()
    }

    /// Nonce of the accepted Digest challenge.
    pub fn nonce(&self) -> Option<&str> {
        self.nonce.as_deref()
    }

    /// Records a challenge and reports whether the request should be resent.
    ///
    /// Refuses when the header is missing or unparseable, when a realm was
    /// already recorded by an earlier challenge, or when no credentials are
    /// configured.
    pub fn on_challenge(&mut self, www_authenticate: Option<&str>) -> bool {
        let Some(challenge) = www_authenticate.and_then(Challenge::parse) else {
            warn!("401 without a usable WWW-Authenticate challenge");
            return false;
        };
        if let Some(realm) = &self.realm {
            warn!("Credentials for realm '{}' were rejected", realm);
            return false;
        }
        if self.username.is_none() || self.password.is_none() {
            warn!("Server requires authentication but no credentials are configured");
            return false;
        }

        match challenge {
            Challenge::Digest { realm, nonce } => {
                debug!("Digest challenge - realm: {}, nonce: {}", realm, nonce);
                self.realm = Some(realm);
                self.nonce = Some(nonce);
            }
            Challenge::Basic { realm } => {
                debug!("Basic challenge - realm: {}", realm);
                self.realm = Some(realm);
                self.nonce = None;
            }
        }
        true
    }

    /// Digest response over username, realm, password, method, uri and nonce.
    pub fn compute_digest_response(&self, method: &str, uri: &str) -> Option<String> {
        let (username, password) = self.credentials()?;
        let realm = self.realm.as_deref()?;
        let nonce = self.nonce.as_deref()?;

        let ha1 = md5_hash(&format!("{}:{}:{}", username, realm, password));
        let ha2 = md5_hash(&format!("{}:{}", method, uri));
        Some(md5_hash(&format!("{}:{}:{}", ha1, nonce, ha2)))
    }

    /// Value for the `Authorization` header of a request, recomputed for
    /// every send. `None` until a challenge has been accepted.
    pub fn authorization(&self, method: &str, uri: &str) -> Option<String> {
        let (username, password) = self.credentials()?;
        let realm = self.realm.as_deref()?;

        match self.nonce.as_deref() {
            Some(nonce) => {
                let response = self.compute_digest_response(method, uri)?;
                Some(format!(
                    r#"Digest username="{}", realm="{}", nonce="{}", uri="{}", response="{}""#,
                    username, realm, nonce, uri, response
                ))
            }
            None => {
                let token = base64::engine::general_purpose::STANDARD
                    .encode(format!("{}:{}", username, password).as_bytes());
                Some(format!("Basic {}", token))
            }
        }
    }

    fn credentials(&self) -> Option<(&str, &str)> {
        Some((self.username.as_deref()?, self.password.as_deref()?))
    }
}

pub(crate) fn md5_hash(s: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(s.as_bytes());
    format!("{:x}", hasher.finalize())
}
