//! The transactional command pipeline.

use std::sync::Arc;

use async_trait::async_trait;
use common::{AggregateId, EdgeError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use store::{EventEnvelope, UnitOfWork, with_transaction};
use thiserror::Error;

use crate::aggregate::Aggregate;
use crate::command::{CommandName, CommandRegistry, ErasedCommand};
use crate::repository::AggregateRepository;

/// Input to one command invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandRequest {
    /// Target aggregate; `None` for creation commands.
    #[serde(default)]
    pub aggregate_id: Option<AggregateId>,

    #[serde(default)]
    pub payload: Value,
}

impl CommandRequest {
    pub fn create(payload: Value) -> Self {
        Self {
            aggregate_id: None,
            payload,
        }
    }

    pub fn for_aggregate(aggregate_id: AggregateId, payload: Value) -> Self {
        Self {
            aggregate_id: Some(aggregate_id),
            payload,
        }
    }
}

/// A subscriber failed while handling persisted events.
#[derive(Debug, Error)]
#[error("Publishing to {target} failed: {reason}")]
pub struct PublishError {
    pub target: String,
    pub reason: String,
}

impl From<PublishError> for EdgeError {
    fn from(err: PublishError) -> Self {
        EdgeError::infrastructure(err.to_string())
    }
}

/// Receives the events of each save inside the same transaction.
#[async_trait]
pub trait EventPublisher<Tx>: Send + Sync {
    async fn publish(&self, events: &[EventEnvelope], tx: &Tx) -> Result<(), PublishError>;
}

/// Runs commands for one aggregate type.
///
/// Each invocation resolves the command, opens a transaction, loads the
/// target, executes, saves, publishes the saved events and commits. A
/// failure at any step after `begin` rolls all of it back.
pub struct CommandHandler<U: UnitOfWork, A: Aggregate, K: CommandName> {
    uow: Arc<U>,
    repository: Arc<dyn AggregateRepository<A, U::Tx>>,
    commands: CommandRegistry<A, K>,
    publisher: Option<Arc<dyn EventPublisher<U::Tx>>>,
}

impl<U, A, K> CommandHandler<U, A, K>
where
    U: UnitOfWork,
    A: Aggregate,
    K: CommandName,
{
    pub fn new(
        uow: Arc<U>,
        repository: Arc<dyn AggregateRepository<A, U::Tx>>,
        commands: CommandRegistry<A, K>,
    ) -> Self {
        Self {
            uow,
            repository,
            commands,
            publisher: None,
        }
    }

    /// Wires a publisher (usually a projection manager) into the pipeline.
    pub fn with_publisher(mut self, publisher: Arc<dyn EventPublisher<U::Tx>>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn unit_of_work(&self) -> &Arc<U> {
        &self.uow
    }

    pub fn commands(&self) -> &CommandRegistry<A, K> {
        &self.commands
    }

    /// Parses a string command name, rejecting unknown ones.
    pub fn parse_name(name: &str) -> Result<K, EdgeError> {
        name.parse()
            .map_err(|_| EdgeError::bad_request(format!("Unknown command '{name}'")))
    }

    /// Executes a command in its own transaction. Unregistered commands are
    /// rejected before a transaction is opened.
    pub async fn execute(&self, name: K, request: CommandRequest) -> Result<Value, EdgeError> {
        if let Err(err) = self.resolve(name) {
            record_outcome(name, err.kind().as_str());
            tracing::warn!(command = %name, error = %err, "command rejected");
            return Err(err);
        }

        let result = with_transaction(self.uow.as_ref(), |tx| async move {
            self.execute_in(&tx, name, request).await
        })
        .await;

        if let Err(err) = &result
            && err.is_retryable()
        {
            tracing::warn!(command = %name, error = %err, "command transaction aborted");
        }
        result
    }

    /// Like [`execute`](Self::execute), for callers holding a name as text.
    pub async fn execute_named(
        &self,
        name: &str,
        request: CommandRequest,
    ) -> Result<Value, EdgeError> {
        let name = Self::parse_name(name)?;
        self.execute(name, request).await
    }

    /// Executes a command inside a transaction the caller owns.
    ///
    /// Nothing is committed here; the caller commits or rolls back.
    #[tracing::instrument(
        skip(self, tx, name, request),
        fields(command = %name, aggregate_type = A::aggregate_type(), aggregate_id = ?request.aggregate_id)
    )]
    pub async fn execute_in(
        &self,
        tx: &U::Tx,
        name: K,
        request: CommandRequest,
    ) -> Result<Value, EdgeError> {
        let result = self.run(tx, name, request).await;

        let outcome = match &result {
            Ok(_) => {
                tracing::info!("command executed");
                "ok"
            }
            Err(err) => {
                match err {
                    EdgeError::Infrastructure { .. } => {
                        tracing::error!(error = %err, "command failed")
                    }
                    _ => tracing::warn!(error = %err, "command rejected"),
                }
                err.kind().as_str()
            }
        };
        record_outcome(name, outcome);

        result
    }

    fn resolve(&self, name: K) -> Result<&dyn ErasedCommand<A>, EdgeError> {
        self.commands
            .resolve(name)
            .ok_or_else(|| EdgeError::bad_request(format!("Command '{name}' is not registered")))
    }

    async fn run(&self, tx: &U::Tx, name: K, request: CommandRequest) -> Result<Value, EdgeError> {
        let command = self.resolve(name)?;

        let current = match &request.aggregate_id {
            Some(id) => Some(
                self.repository
                    .find_by_id(tx, id)
                    .await?
                    .ok_or_else(|| EdgeError::not_found(A::aggregate_type(), id))?,
            ),
            None => None,
        };

        let output = command.execute_json(request.payload, current)?;
        let mut aggregate = output.aggregate;

        if let Some(target) = &request.aggregate_id
            && aggregate.id() != target
        {
            return Err(EdgeError::bad_request(format!(
                "Command '{name}' returned {} {} instead of {target}",
                A::aggregate_type(),
                aggregate.id()
            )));
        }

        if aggregate.root().pending().is_empty() {
            tracing::debug!("command raised no events, nothing to persist");
            return Ok(output.response);
        }

        let events = self.repository.save(tx, &mut aggregate).await?;

        if let Some(publisher) = &self.publisher {
            publisher.publish(&events, tx).await?;
        }

        tracing::debug!(
            version = %aggregate.version(),
            events = events.len(),
            "aggregate persisted"
        );
        Ok(output.response)
    }
}

fn record_outcome<K: CommandName>(name: K, outcome: &'static str) {
    metrics::counter!(
        "kernel_commands_total",
        "command" => name.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}
