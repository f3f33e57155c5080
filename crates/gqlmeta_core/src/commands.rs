use std::time::Instant;

use tracing::info;

use crate::context::ExecutionContext;
use crate::driver::{DriverFactory, DriverRequest, HttpDriverFactory};
use crate::errors::CommandError;
use crate::logging::{EVENT_END, EVENT_END_ERROR, EVENT_START};
use crate::metadata::{MetadataAction, execute_metadata};

/// One metadata command bound to its execution context.
#[derive(Debug)]
pub struct CommandOptions<'a> {
    context: &'a ExecutionContext,
    action: MetadataAction,
}

impl<'a> CommandOptions<'a> {
    pub fn new(context: &'a ExecutionContext, action: MetadataAction) -> Self {
        Self { context, action }
    }

    pub fn action(&self) -> MetadataAction {
        self.action
    }

    pub fn context(&self) -> &'a ExecutionContext {
        self.context
    }

    /// Connect to the engine and run the action.
    pub fn run(self) -> Result<(), CommandError> {
        self.run_with(&HttpDriverFactory::from_env())
    }

    /// Same as [`CommandOptions::run`] with an explicit driver factory.
    ///
    /// Driver failures are returned unchanged. Action failures are wrapped in
    /// [`CommandError::Action`] with the original error as source. The error
    /// itself is not logged here; reporting it is left to the caller.
    pub fn run_with<F>(self, factory: &F) -> Result<(), CommandError>
    where
        F: DriverFactory,
    {
        let op = format!("metadata.{}", self.action);
        let started = Instant::now();
        info!(op = %op, event = EVENT_START, endpoint = %self.context.server.parsed_endpoint);

        let result = self.execute(factory);

        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        match &result {
            Ok(()) => info!(op = %op, event = EVENT_END, duration_ms),
            Err(err) => info!(
                op = %op,
                event = EVENT_END_ERROR,
                duration_ms,
                setup = err.action().is_none(),
            ),
        }
        result
    }

    fn execute<F>(&self, factory: &F) -> Result<(), CommandError>
    where
        F: DriverFactory,
    {
        let context = self.context;
        let mut driver = factory.connect(&DriverRequest {
            migrations_dir: &context.migrations_dir,
            endpoint: &context.server.parsed_endpoint,
            admin_secret: context.server.admin_secret.as_deref(),
            logger: &context.logger,
            version: &context.version,
        })?;

        execute_metadata(self.action, &mut driver, &context.metadata_file).map_err(|source| {
            CommandError::Action {
                action: self.action,
                source,
            }
        })
    }
}
