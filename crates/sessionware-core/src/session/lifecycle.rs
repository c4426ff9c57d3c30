//! Per-request session lifecycle.
//!
//! One [`SessionLifecycle`] exists per request. It loads the session from the
//! cookie or the external store on first use, hands it to handler code, and
//! at the end of the request commits exactly once:
//!
//! | session at commit | action |
//! |---|---|
//! | never accessed | nothing |
//! | cleared, nothing was loaded | nothing |
//! | cleared, a session was loaded | destroy store entry, clear cookie |
//! | unchanged, no rolling/renew/forced save | nothing |
//! | changed or forced | write store entry and key cookie, or payload cookie |
//!
//! Load problems of any kind (bad signature, corrupt payload, expiry, store
//! miss or store read failure) leave the request without a session. Store
//! write failures are returned to the caller.

use cookie::Cookie;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{Session, now_millis};
use crate::codec::fingerprint;
use crate::cookies::{self, RequestCookies};
use crate::error::Result;
use crate::options::{MaxAge, SessionOptions};
use crate::store::{STORE_TTL_GRACE, StoreOptions};

/// Why a session is written back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveReason {
    /// Handler asked for a save (`save()` or a max age override)
    Force,
    /// Content differs from what was loaded
    Changed,
    /// Rolling mode re-saves every request
    Rolling,
    /// Less than half of the lifetime remains
    Renew,
}

/// What a commit did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Nothing to write
    Skipped,
    /// Session written to the cookie or store
    Saved(SaveReason),
    /// Store entry destroyed and cookie cleared
    Removed,
    /// Commit already ran for this request
    AlreadyCommitted,
}

/// Session state for a single request
pub struct SessionLifecycle {
    options: Arc<SessionOptions>,
    cookies: RequestCookies,
    loaded: bool,
    session: Option<Session>,
    prev_hash: Option<String>,
    external_key: Option<String>,
    outgoing: Vec<Cookie<'static>>,
    committed: bool,
}

impl SessionLifecycle {
    /// Create the lifecycle for a request carrying `cookies`
    pub fn new(options: Arc<SessionOptions>, cookies: RequestCookies) -> Self {
        Self {
            options,
            cookies,
            loaded: false,
            session: None,
            prev_hash: None,
            external_key: None,
            outgoing: Vec::new(),
            committed: false,
        }
    }

    /// Active options
    pub fn options(&self) -> &Arc<SessionOptions> {
        &self.options
    }

    /// Whether the session has been loaded
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Whether commit has run
    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// External key of the stored session, store mode only
    pub fn external_key(&self) -> Option<&str> {
        self.external_key.as_deref()
    }

    /// Load the session once; later calls do nothing.
    pub async fn load(&mut self) {
        if self.loaded {
            return;
        }
        self.loaded = true;

        let loaded = if self.options.store().is_some() {
            self.init_from_external().await
        } else {
            self.init_from_cookie()
        };

        if let Some((session, external_key)) = loaded {
            self.prev_hash = Some(fingerprint(&session.to_json()));
            self.external_key = external_key;
            self.session = Some(session);
        }
    }

    async fn init_from_external(&self) -> Option<(Session, Option<String>)> {
        let options = &self.options;
        let store = options.store()?;

        let Some(external_key) = self.cookies.get(&options.key, options.signed, options.keys())
        else {
            if self.cookies.contains(&options.key) {
                debug!(key = %options.key, "session key cookie failed verification");
            }
            return None;
        };

        let store_opts = StoreOptions {
            rolling: options.rolling,
            changed: false,
        };
        let payload = match store.get(&external_key, options.max_age, store_opts).await {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                debug!(external_key = %external_key, "session not found in store");
                return None;
            }
            Err(err) => {
                warn!(error = %err, "session store read failed, continuing without session");
                return None;
            }
        };

        let session = valid_session(payload)?;
        debug!(external_key = %external_key, "session loaded from store");
        Some((session, Some(external_key)))
    }

    fn init_from_cookie(&self) -> Option<(Session, Option<String>)> {
        let options = &self.options;

        let Some(raw) = self.cookies.get(&options.key, options.signed, options.keys()) else {
            if self.cookies.contains(&options.key) {
                debug!(key = %options.key, "session cookie failed verification");
            }
            return None;
        };

        let Some(payload) = options.codec().decode(&raw) else {
            debug!(key = %options.key, "session cookie failed to decode");
            return None;
        };

        let session = valid_session(payload)?;
        debug!(key = %options.key, "session loaded from cookie");
        Some((session, None))
    }

    /// Current session, `None` if there is none
    pub async fn get(&mut self) -> Option<&Session> {
        self.load().await;
        self.session.as_ref()
    }

    /// Mutable access to the current session without creating one
    pub async fn get_mut(&mut self) -> Option<&mut Session> {
        self.load().await;
        self.session.as_mut()
    }

    /// Current session, creating an empty one if needed
    pub async fn get_or_create(&mut self) -> &mut Session {
        self.load().await;
        self.session.get_or_insert_with(Session::new)
    }

    /// Replace the session wholesale; `None` deletes it at commit
    pub async fn set(&mut self, value: Option<Session>) {
        self.load().await;
        self.session = value;
    }

    /// Drop the current session and start an empty one under a new key.
    ///
    /// The old store entry is destroyed immediately and the old cookie is
    /// cleared unless the new session gets saved.
    pub async fn regenerate(&mut self) -> Result<()> {
        self.load().await;
        self.remove().await?;
        self.prev_hash = None;
        self.session = Some(Session::new());
        Ok(())
    }

    /// Decide whether the current session needs writing
    pub fn should_save(&self) -> Option<SaveReason> {
        let session = self.session.as_ref()?;

        if session.requires_save() {
            return Some(SaveReason::Force);
        }

        let hash = fingerprint(&session.to_json());
        match &self.prev_hash {
            // New sessions that stayed empty are never written
            None if session.is_empty() => return None,
            Some(prev) if *prev == hash => {}
            _ => return Some(SaveReason::Changed),
        }

        if self.options.rolling {
            return Some(SaveReason::Rolling);
        }

        if self.options.renew {
            let max_age = session.max_age().unwrap_or(self.options.max_age);
            if let (Some(remaining), Some(lifetime)) =
                (session.remaining(now_millis()), max_age.duration())
            {
                if remaining < lifetime / 2 {
                    return Some(SaveReason::Renew);
                }
            }
        }

        None
    }

    /// Persist the outcome of the request. Runs at most once.
    pub async fn commit(&mut self) -> Result<CommitOutcome> {
        if self.committed {
            return Ok(CommitOutcome::AlreadyCommitted);
        }
        self.committed = true;

        if !self.loaded {
            debug!("session never accessed, nothing to commit");
            return Ok(CommitOutcome::Skipped);
        }

        if self.session.is_none() {
            if self.prev_hash.is_none() {
                return Ok(CommitOutcome::Skipped);
            }
            self.remove().await?;
            debug!("session removed");
            return Ok(CommitOutcome::Removed);
        }

        match self.should_save() {
            Some(reason) => {
                self.save(reason).await?;
                Ok(CommitOutcome::Saved(reason))
            }
            None => {
                debug!("session unchanged, skipping save");
                Ok(CommitOutcome::Skipped)
            }
        }
    }

    /// Lifetime the current session would be saved with
    pub fn effective_max_age(&self) -> MaxAge {
        self.session
            .as_ref()
            .and_then(Session::max_age)
            .unwrap_or(self.options.max_age)
    }

    /// Cookies to send with the response
    pub fn take_cookies(&mut self) -> Vec<Cookie<'static>> {
        std::mem::take(&mut self.outgoing)
    }

    async fn remove(&mut self) -> Result<()> {
        let options = Arc::clone(&self.options);

        if let (Some(store), Some(key)) = (options.store(), self.external_key.take()) {
            let store_opts = StoreOptions {
                rolling: options.rolling,
                changed: false,
            };
            store.destroy(&key, store_opts).await?;
        }

        if self.prev_hash.is_some() || self.cookies.contains(&options.key) {
            self.queue_cookie(cookies::removal_cookie(&options));
        }
        Ok(())
    }

    async fn save(&mut self, reason: SaveReason) -> Result<()> {
        let options = Arc::clone(&self.options);

        let (payload, max_age) = {
            let Some(session) = self.session.as_mut() else {
                return Ok(());
            };
            let max_age = session.max_age().unwrap_or(options.max_age);
            (session.to_wire(max_age, now_millis()), max_age)
        };

        let value = match options.store() {
            Some(store) => {
                let key = self
                    .external_key
                    .clone()
                    .unwrap_or_else(|| options.generate_id());
                let store_opts = StoreOptions {
                    rolling: options.rolling,
                    changed: reason == SaveReason::Changed,
                };
                let stored_key = store
                    .set(&key, payload, max_age.with_grace(STORE_TTL_GRACE), store_opts)
                    .await?;
                self.external_key = Some(stored_key.clone());
                stored_key
            }
            None => options.codec().encode(&payload)?,
        };

        debug!(?reason, max_age = %max_age, "session saved");
        self.queue_cookie(cookies::session_cookie(&options, value, max_age));
        Ok(())
    }

    // Later cookies of the same name replace earlier ones
    fn queue_cookie(&mut self, cookie: Cookie<'static>) {
        self.outgoing.retain(|c| c.name() != cookie.name());
        self.outgoing.push(cookie);
    }
}

fn valid_session(payload: serde_json::Value) -> Option<Session> {
    let Some(session) = Session::from_wire(payload) else {
        debug!("session payload is not an object");
        return None;
    };
    if session.is_expired(now_millis()) {
        debug!("session expired");
        return None;
    }
    Some(session)
}
