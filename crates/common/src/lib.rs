/**
 * Runtime settings: visibility re-check delay,
 *  request timeout and log level.
 */
pub mod config;
/**
 * Cryptographic types and operations.
 *  - Signing, key agreement and RSA keys
 *  - Symmetric envelopes and signed messages
 *  - Proof-of-work key stretching
 */
pub mod crypto;
/**
 * The backing graph store interface, plus an
 *  in-memory implementation with live subscriptions.
 */
pub mod graph;
/**
 * Keypair identities and the pairwise operations
 *  two identities can perform together.
 */
pub mod identity;
/**
 * Request/response RPC between anonymous
 *  requesters and a queue owner.
 */
pub mod queue;
/**
 * Access-controlled stores layered on the graph:
 *  shared group stores, nested object stores,
 *  channels and two-party stores.
 */
pub mod store;
/**
 * In-process multi-party harness for tests:
 *  one shared graph, one directory, named parties.
 */
pub mod testkit;
/**
 * Passphrase-sealed storage for keypairs
 *  and other secrets.
 */
pub mod vault;

pub mod prelude {
    pub use crate::config::Config;
    pub use crate::crypto::{KeyPairSet, PublicKeys, Secret};
    pub use crate::graph::{GraphStore, Location, MemoryGraph};
    pub use crate::identity::{Identity, IdentityDirectory, SharedCryptoCapability};
    pub use crate::queue::{Queue, QueueError, ResponseSink, ServiceRequest};
    pub use crate::store::{
        Channel, Context, ObjectStore, ObjectValue, SharedStore, StoreError, TwinStore,
    };
    pub use crate::vault::{Vault, VaultError};
}
