//! Client and session identity.
//!
//! The client id is minted locally once and kept forever. The session id is
//! assigned by the server (`SESSION_ESTABLISHED`) and mirrored into both
//! storage and the `session_id` query parameter of the current location.

use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

use crate::error::ClientError;
use crate::storage::{KvStore, StorageError};

pub const CLIENT_ID_KEY: &str = "app_client_id";
pub const SESSION_ID_KEY: &str = "app_session_id";
pub const SESSION_QUERY_PARAM: &str = "session_id";

/// The page address the client was opened with, plus the entries pushed
/// onto its history since. Rewrites never reload anything.
#[derive(Debug, Clone)]
pub struct Location {
    current: Url,
    history: Vec<Url>,
}

impl Location {
    pub fn parse(input: &str) -> Result<Self, url::ParseError> {
        Ok(Self::new(Url::parse(input)?))
    }

    pub fn new(url: Url) -> Self {
        Self {
            current: url,
            history: Vec::new(),
        }
    }

    pub fn current(&self) -> &Url {
        &self.current
    }

    /// Entries pushed before the current one
    pub fn history(&self) -> &[Url] {
        &self.history
    }

    pub fn query_param(&self, name: &str) -> Option<String> {
        self.current
            .query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }

    /// Push a copy of the current URL with `name` set to `value`, or removed
    /// when `value` is `None`. Other parameters keep their order.
    pub fn push_query_param(&mut self, name: &str, value: Option<&str>) {
        let mut next = self.current.clone();
        let kept: Vec<(String, String)> = next
            .query_pairs()
            .filter(|(key, _)| key != name)
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        if kept.is_empty() && value.is_none() {
            next.set_query(None);
        } else {
            let mut pairs = next.query_pairs_mut();
            pairs.clear();
            for (k, v) in &kept {
                pairs.append_pair(k, v);
            }
            if let Some(value) = value {
                pairs.append_pair(name, value);
            }
        }

        let previous = std::mem::replace(&mut self.current, next);
        self.history.push(previous);
    }
}

/// Resolves and persists the client/session identifiers
pub struct SessionIdentity {
    store: KvStore,
    location: Location,
}

impl SessionIdentity {
    pub fn new(store: KvStore, location: Location) -> Self {
        Self { store, location }
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Persisted client id, minted and stored on first use
    pub fn client_id(&self) -> Result<String, StorageError> {
        if let Some(existing) = self.store.get(CLIENT_ID_KEY)? {
            return Ok(existing);
        }
        let client_id = new_client_id();
        self.store.set(CLIENT_ID_KEY, &client_id)?;
        info!(
            component = "identity",
            event = "identity.client_id.created",
            client_id = %client_id,
            "Generated new client id"
        );
        Ok(client_id)
    }

    /// Session id from the URL first (mirrored into storage), then storage
    pub fn session_id(&self) -> Result<Option<String>, StorageError> {
        if let Some(from_url) = self
            .location
            .query_param(SESSION_QUERY_PARAM)
            .filter(|s| !s.is_empty())
        {
            self.store.set(SESSION_ID_KEY, &from_url)?;
            return Ok(Some(from_url));
        }
        Ok(self
            .store
            .get(SESSION_ID_KEY)?
            .filter(|s| !s.is_empty()))
    }

    pub fn set_session_id(&mut self, session_id: &str) -> Result<(), StorageError> {
        self.store.set(SESSION_ID_KEY, session_id)?;
        self.location
            .push_query_param(SESSION_QUERY_PARAM, Some(session_id));
        debug!(
            component = "identity",
            event = "identity.session.set",
            session_id = %session_id,
            "Session id stored"
        );
        Ok(())
    }

    /// Forget the session. The client id is untouched.
    pub fn clear_session(&mut self) -> Result<(), StorageError> {
        self.store.remove(SESSION_ID_KEY)?;
        self.location.push_query_param(SESSION_QUERY_PARAM, None);
        debug!(
            component = "identity",
            event = "identity.session.cleared",
            "Session id cleared"
        );
        Ok(())
    }

    /// `<base>/ws/<clientId>`, plus `?session_id=<id>` once a session exists
    pub fn connection_url(&self, server_base: &str) -> Result<Url, ClientError> {
        let client_id = self.client_id()?;
        let mut url = Url::parse(&format!(
            "{}/ws/{}",
            server_base.trim_end_matches('/'),
            client_id
        ))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ClientError::UnsupportedScheme(url.scheme().to_string()));
        }
        if let Some(session_id) = self.session_id()? {
            url.query_pairs_mut()
                .append_pair(SESSION_QUERY_PARAM, &session_id);
        }
        Ok(url)
    }
}

fn new_client_id() -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!("client_{}", &random[..10])
}
