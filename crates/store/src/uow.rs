//! The unit-of-work port.

use std::future::Future;

use async_trait::async_trait;

use crate::{Result, StoreError};

/// Opens atomic transactions.
///
/// `Tx` is a cheap, clonable handle. Clones share one underlying
/// transaction, so repositories, idempotency stores and projectors can all
/// hold it while a command runs. Once `commit` or `rollback` consumed a
/// handle, every remaining clone fails with [`StoreError::TransactionClosed`].
/// Dropping all handles without committing rolls back.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    type Tx: Clone + Send + Sync + 'static;

    async fn begin(&self) -> Result<Self::Tx>;

    async fn commit(&self, tx: Self::Tx) -> Result<()>;

    async fn rollback(&self, tx: Self::Tx) -> Result<()>;
}

/// Runs `work` inside a fresh transaction.
///
/// Commits when `work` returns `Ok`, rolls back when it returns `Err`. A
/// failed rollback is logged and the original error is returned. A failed
/// commit is returned as-is (converted into `E`).
pub async fn with_transaction<U, T, E, F, Fut>(uow: &U, work: F) -> std::result::Result<T, E>
where
    U: UnitOfWork + ?Sized,
    F: FnOnce(U::Tx) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: From<StoreError>,
{
    let tx = uow.begin().await?;

    match work(tx.clone()).await {
        Ok(value) => {
            uow.commit(tx).await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = uow.rollback(tx).await {
                tracing::warn!(error = %rollback_err, "rollback failed");
            }
            Err(err)
        }
    }
}
