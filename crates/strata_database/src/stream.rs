//! Transactions driven by asynchronous argument sources.

use std::future::Future;

use strata_foundation::{Name, Result, Value};
use tokio::sync::mpsc::Receiver;
use tracing::{debug, warn};

use crate::database::Database;
use crate::reconcile::TransactionEnvelope;

impl Database {
    /// Awaits `args`, then runs the transaction as a confirmed entry.
    ///
    /// # Errors
    ///
    /// Returns the future's error or the transaction's error. The failure is
    /// logged and the database is left untouched.
    pub async fn transact_async<F>(&self, name: impl Into<Name>, args: F) -> Result<Value>
    where
        F: Future<Output = Result<Value>>,
    {
        let name = name.into();
        let outcome = match args.await {
            Ok(args) => self.transact(name.clone(), args),
            Err(err) => Err(err),
        };
        if let Err(err) = &outcome {
            warn!(name = %name, error = %err, "async transaction failed");
        }
        outcome
    }

    /// Re-runs a transaction for every value received on `args`.
    ///
    /// Each value replaces the previous provisional entry under one id. When
    /// the channel closes, the last value is committed as a confirmed entry
    /// under the same id and its result is returned. A channel that closes
    /// without values commits nothing and returns [`Value::Nil`].
    ///
    /// # Errors
    ///
    /// An error item or a failing application cancels the provisional entry,
    /// stops the stream, and is returned.
    pub async fn transact_stream(
        &self,
        name: impl Into<Name>,
        mut args: Receiver<Result<Value>>,
    ) -> Result<Value> {
        let name = name.into();
        let id = self.next_transaction_id();
        let mut last = Value::Nil;
        let mut received = 0_usize;

        while let Some(item) = args.recv().await {
            let applied = item.and_then(|value| {
                let envelope = TransactionEnvelope::new(id, name.clone(), value.clone(), -self.now());
                self.apply(envelope).map(|_| value)
            });
            match applied {
                Ok(value) => {
                    last = value;
                    received += 1;
                }
                Err(err) => {
                    args.close();
                    self.cancel(id)?;
                    warn!(id, name = %name, error = %err, "transaction stream stopped");
                    return Err(err);
                }
            }
        }

        debug!(id, name = %name, received, "transaction stream closed");
        if received == 0 {
            return Ok(Value::Nil);
        }
        let envelope = TransactionEnvelope::new(id, name.clone(), last, self.now());
        match self.apply(envelope) {
            Ok(result) => Ok(result.map_or(Value::Nil, |result| result.value)),
            Err(err) => {
                self.cancel(id)?;
                warn!(id, name = %name, error = %err, "transaction stream commit failed");
                Err(err)
            }
        }
    }
}
