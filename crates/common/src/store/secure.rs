use serde::de::DeserializeOwned;
use serde::Serialize;

use super::meta::paths;
use super::{Context, StoreError, StoreMeta};
use crate::graph::{GraphStore, Location};
use crate::identity::Identity;

/// Lifecycle of a store handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreState {
    /// No location yet
    Unbound,
    /// Location known, metadata not read
    Bound,
    Created,
    Joined,
    Unlocked,
    /// Unlocked or created, subscriptions attached
    Established,
}

/// Location binding, sign-on and existence checks shared by every store
///
/// Binding without an identity is valid: such a handle can still answer
/// whether a store exists at its location.
#[derive(Debug, Clone)]
pub struct SecureStore {
    ctx: Context,
    location: Option<Location>,
    identity: Option<Identity>,
    state: StoreState,
}

impl SecureStore {
    pub fn new(ctx: Context) -> Self {
        let identity = ctx.identity().cloned();
        Self {
            ctx,
            location: None,
            identity,
            state: StoreState::Unbound,
        }
    }

    pub fn at(ctx: Context, location: Location) -> Self {
        let mut store = Self::new(ctx);
        store.bind(location);
        store
    }

    /// Point this handle at `location`, forgetting any previous state
    pub fn bind(&mut self, location: Location) {
        self.location = Some(location);
        self.state = StoreState::Bound;
    }

    /// Adopt `identity`, or confirm that one is already signed on
    pub fn signon(&mut self, identity: Option<Identity>) -> Result<&Identity, StoreError> {
        if let Some(identity) = identity {
            self.identity = Some(identity);
        }
        self.identity.as_ref().ok_or(StoreError::NotAuthenticated)
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn graph(&self) -> &dyn GraphStore {
        self.ctx.graph().as_ref()
    }

    pub fn location(&self) -> Result<&Location, StoreError> {
        self.location.as_ref().ok_or(StoreError::NoLocation)
    }

    pub fn identity(&self) -> Result<&Identity, StoreError> {
        self.identity.as_ref().ok_or(StoreError::NotAuthenticated)
    }

    pub fn has_identity(&self) -> bool {
        self.identity.is_some()
    }

    pub fn state(&self) -> StoreState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: StoreState) {
        tracing::trace!(from = ?self.state, to = ?state, "store state change");
        self.state = state;
    }

    /// Whether store metadata is visible right now
    pub async fn is(&self) -> Result<bool, StoreError> {
        let location = self.location()?;
        Ok(self.graph().exists(&paths::owner(location)).await?)
    }

    /// Whether the store exists, tolerating late visibility with one
    /// delayed re-check
    pub async fn exists(&self) -> Result<bool, StoreError> {
        if self.is().await? {
            return Ok(true);
        }
        let delay = self.ctx.config().visibility_retry();
        tracing::debug!(
            location = %self.location()?,
            ?delay,
            "store not visible yet, checking again"
        );
        tokio::time::sleep(delay).await;
        self.is().await
    }

    pub(crate) async fn load_meta(&self) -> Result<StoreMeta, StoreError> {
        if !self.exists().await? {
            return Err(StoreError::StoreExistsNot);
        }
        StoreMeta::load(self.graph(), self.location()?)
            .await?
            .ok_or(StoreError::StoreExistsNot)
    }

    pub(crate) async fn read_json<T: DeserializeOwned>(
        &self,
        path: &Location,
    ) -> Result<Option<T>, StoreError> {
        match self.graph().get(path).await? {
            Some(value) => Ok(Some(serde_json::from_str(&value)?)),
            None => Ok(None),
        }
    }

    pub(crate) async fn write_json<T: Serialize + ?Sized>(
        &self,
        path: &Location,
        value: &T,
    ) -> Result<(), StoreError> {
        self.graph()
            .put(path, serde_json::to_string(value)?)
            .await?;
        Ok(())
    }
}
