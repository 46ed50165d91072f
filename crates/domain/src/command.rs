//! Commands and the typed command registry.

use std::collections::HashMap;
use std::fmt::{self, Display};
use std::hash::Hash;
use std::str::FromStr;

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::aggregate::Aggregate;
use crate::error::CommandError;

/// The next aggregate state plus the DTO returned to the caller.
#[derive(Debug)]
pub struct CommandOutput<A, R> {
    pub aggregate: A,
    pub response: R,
}

impl<A, R> CommandOutput<A, R> {
    pub fn new(aggregate: A, response: R) -> Self {
        Self {
            aggregate,
            response,
        }
    }
}

/// A business operation against one aggregate type.
///
/// Commands do no I/O. They receive the decoded payload and the current
/// aggregate (`None` for creation commands), check invariants, raise events
/// and hand back the resulting aggregate. Time and id generation come from
/// dependencies injected at construction.
pub trait Command<A: Aggregate>: Send + Sync + 'static {
    type Payload: DeserializeOwned;
    type Response: Serialize;

    fn execute(
        &self,
        payload: Self::Payload,
        aggregate: Option<A>,
    ) -> Result<CommandOutput<A, Self::Response>, CommandError>;
}

/// Unwraps the target of a mutation command.
pub fn require_existing<A>(aggregate: Option<A>) -> Result<A, CommandError> {
    aggregate.ok_or(CommandError::AggregateRequired)
}

/// Fails if a creation command was handed an existing aggregate.
pub fn require_new<A>(aggregate: Option<A>) -> Result<(), CommandError> {
    match aggregate {
        Some(_) => Err(CommandError::AggregateExists),
        None => Ok(()),
    }
}

/// Identifier type for a registry, usually a fieldless enum.
pub trait CommandName: Copy + Eq + Hash + Display + FromStr + Send + Sync + 'static {}

impl<T> CommandName for T where T: Copy + Eq + Hash + Display + FromStr + Send + Sync + 'static {}

/// A command with its payload and response types erased to JSON.
pub(crate) trait ErasedCommand<A>: Send + Sync {
    fn execute_json(
        &self,
        payload: Value,
        aggregate: Option<A>,
    ) -> Result<CommandOutput<A, Value>, CommandError>;
}

impl<A, C> ErasedCommand<A> for C
where
    A: Aggregate,
    C: Command<A>,
{
    fn execute_json(
        &self,
        payload: Value,
        aggregate: Option<A>,
    ) -> Result<CommandOutput<A, Value>, CommandError> {
        let payload = serde_json::from_value(payload)
            .map_err(|e| CommandError::InvalidPayload(e.to_string()))?;
        let output = self.execute(payload, aggregate)?;
        let response = serde_json::to_value(&output.response)?;
        Ok(CommandOutput::new(output.aggregate, response))
    }
}

/// Maps command names to implementations for one aggregate type.
pub struct CommandRegistry<A, K> {
    commands: HashMap<K, Box<dyn ErasedCommand<A>>>,
}

impl<A: Aggregate, K: CommandName> CommandRegistry<A, K> {
    pub fn new() -> Self {
        Self {
            commands: HashMap::new(),
        }
    }

    /// Registers `command` under `name`, replacing any earlier registration.
    pub fn register<C: Command<A>>(mut self, name: K, command: C) -> Self {
        self.commands.insert(name, Box::new(command));
        self
    }

    pub fn contains(&self, name: K) -> bool {
        self.commands.contains_key(&name)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub(crate) fn resolve(&self, name: K) -> Option<&dyn ErasedCommand<A>> {
        self.commands.get(&name).map(Box::as_ref)
    }
}

impl<A: Aggregate, K: CommandName> Default for CommandRegistry<A, K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A, K: Display> fmt::Debug for CommandRegistry<A, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = self.commands.keys().map(ToString::to_string).collect();
        names.sort();
        f.debug_struct("CommandRegistry")
            .field("commands", &names)
            .finish()
    }
}
