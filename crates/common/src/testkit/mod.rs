/// Lightweight harness for multi-party tests
///
/// All parties share one in-memory graph and one identity directory, so
/// stores created by one party are visible to the others in-process.
///
/// # Example
///
/// ```rust,ignore
/// use common::store::SharedStore;
/// use common::testkit::TestNetwork;
///
/// #[tokio::test]
/// async fn test_invite() -> anyhow::Result<()> {
///     let mut net = TestNetwork::new();
///     net.add_party("alice")?;
///     net.add_party("bob")?;
///
///     let mut store = SharedStore::at(net.context("alice")?, net.location()?);
///     store.create().await?;
///     store.invite("bob").await?;
///     Ok(())
/// }
/// ```
mod network;
mod party;

pub use network::TestNetwork;
pub use party::TestParty;
