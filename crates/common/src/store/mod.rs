/**
 * Secure stores: encrypted, membership-controlled views over
 *  a location in the graph.
 * Every specialization goes through the same lifecycle:
 *  bind to a location, sign on with an identity, then create
 *  a new store or join / unlock an existing one.
 */
mod channel;
mod context;
mod listeners;
mod meta;
mod object;
mod secure;
mod shared;
mod twin;

pub use channel::{Channel, ChannelMessage};
pub use context::Context;
pub use listeners::{ListenerId, Listeners};
pub use meta::{Invitee, MemberEntry, StoreMeta};
pub use object::{ObjectChange, ObjectStore, ObjectValue};
pub use secure::{SecureStore, StoreState};
pub use shared::SharedStore;
pub use twin::TwinStore;

pub(crate) use meta::paths;

use crate::crypto::CryptoError;
use crate::graph::GraphError;
use crate::identity::IdentityError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// An operation needed an identity and none was signed on
    #[error("not authenticated")]
    NotAuthenticated,
    /// The signed-on identity lacks the membership or key the
    ///  operation requires
    #[error("no permission")]
    NoPermission,
    #[error("store is not bound to a location")]
    NoLocation,
    #[error("store already exists")]
    StoreExists,
    #[error("store does not exist")]
    StoreExistsNot,
    #[error("identity not found: {0}")]
    IdentityNotFound(String),
    #[error("could not verify or decrypt stored value")]
    CantDecrypt,
    #[error("entry {0} is not a store reference")]
    NotAReference(String),
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("graph error: {0}")]
    Graph(#[from] GraphError),
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("store error: {0}")]
    Default(#[from] anyhow::Error),
}

impl From<IdentityError> for StoreError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::NoPermission => StoreError::NoPermission,
            IdentityError::CantDecrypt => StoreError::CantDecrypt,
            IdentityError::Crypto(e) => StoreError::Crypto(e),
            IdentityError::Serde(e) => StoreError::Serde(e),
        }
    }
}
