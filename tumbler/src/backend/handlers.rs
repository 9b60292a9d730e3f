//! Registry of handlers that render keyword steps into shell text.

use crate::errors::BackendError;
use crate::model::Command;
use std::collections::HashMap;
use std::sync::Arc;

/// Renders a keyword step (`name key: 'value', ...`) into shell text.
pub trait StepHandler: Send + Sync {
    /// Returns the step name this handler serves.
    fn name(&self) -> &str;

    /// Renders the parameters into a shell command line.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::MissingParameter`] when a required parameter is
    /// absent.
    fn render(&self, params: &HashMap<String, String>) -> Result<String, BackendError>;
}

/// Quotes a value for POSIX shells.
#[must_use]
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn required<'a>(
    step: &str,
    params: &'a HashMap<String, String>,
    key: &str,
) -> Result<&'a str, BackendError> {
    params
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| BackendError::MissingParameter {
            name: step.to_string(),
            parameter: key.to_string(),
        })
}

/// `sh script: '...'` runs the script verbatim.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShHandler;

impl StepHandler for ShHandler {
    fn name(&self) -> &str {
        "sh"
    }

    fn render(&self, params: &HashMap<String, String>) -> Result<String, BackendError> {
        required(self.name(), params, "script").map(String::from)
    }
}

/// `git url: '...', branch: '...'` clones a repository.
///
/// `credentialsId` is accepted and ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitHandler;

impl StepHandler for GitHandler {
    fn name(&self) -> &str {
        "git"
    }

    fn render(&self, params: &HashMap<String, String>) -> Result<String, BackendError> {
        let url = required(self.name(), params, "url")?;
        Ok(match params.get("branch") {
            Some(branch) => format!(
                "git clone --branch {} {}",
                shell_quote(branch),
                shell_quote(url)
            ),
            None => format!("git clone {}", shell_quote(url)),
        })
    }
}

/// Step handlers keyed by step name.
///
/// Owned by the backend that uses it; there is no process-wide registry.
#[derive(Clone, Default)]
pub struct StepHandlers {
    handlers: HashMap<String, Arc<dyn StepHandler>>,
}

impl StepHandlers {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the `sh` and `git` handlers.
    #[must_use]
    pub fn with_builtins() -> Self {
        Self::new().with_handler(ShHandler).with_handler(GitHandler)
    }

    /// Registers a handler, replacing any handler with the same name.
    #[must_use]
    pub fn with_handler(mut self, handler: impl StepHandler + 'static) -> Self {
        self.register(Arc::new(handler));
        self
    }

    /// Registers a handler, replacing any handler with the same name.
    pub fn register(&mut self, handler: Arc<dyn StepHandler>) {
        self.handlers.insert(handler.name().to_string(), handler);
    }

    /// Returns true if a handler is registered for the name.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Lists the registered step names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Renders a command into the shell text to execute.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::UnknownCommand`] for keyword steps without a
    /// handler, or the handler's own error.
    pub fn render(&self, command: &Command) -> Result<String, BackendError> {
        match command {
            Command::Shell { text } => Ok(text.clone()),
            Command::Invoke { name, params } => self
                .handlers
                .get(name)
                .ok_or_else(|| BackendError::UnknownCommand { name: name.clone() })?
                .render(params),
        }
    }
}

impl std::fmt::Debug for StepHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepHandlers")
            .field("handlers", &self.names())
            .finish()
    }
}
