//! Steps and their translation into backend commands.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// One executable directive inside a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "form", rename_all = "snake_case")]
pub enum Step {
    /// `echo 'hello'`: a command with one bare quoted value.
    SingleArg {
        /// The command name.
        command: String,
        /// The unquoted value.
        value: String,
    },
    /// `git branch: 'master', url: '...'`: a command with keyword parameters.
    MultiArg {
        /// The command name.
        command: String,
        /// Parameters in source order.
        params: Vec<Param>,
    },
}

/// A `key: 'value'` parameter of a multi-argument step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    /// The parameter key.
    pub key: String,
    /// The unquoted value.
    pub value: String,
}

impl Param {
    /// Creates a new parameter.
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// The canonical form of a step handed to an execution backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Command {
    /// Shell text run as is.
    Shell {
        /// The full command line.
        text: String,
    },
    /// A named command whose parameters a step handler interprets.
    Invoke {
        /// The command name.
        name: String,
        /// Parameter mapping.
        params: HashMap<String, String>,
    },
}

impl Command {
    /// Returns the command name (the shell text for shell commands).
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Shell { text } => text,
            Self::Invoke { name, .. } => name,
        }
    }

    /// Returns the parameter mapping, if any.
    #[must_use]
    pub fn params(&self) -> Option<&HashMap<String, String>> {
        match self {
            Self::Shell { .. } => None,
            Self::Invoke { params, .. } => Some(params),
        }
    }
}

impl Step {
    /// Creates a single-argument step.
    #[must_use]
    pub fn single(command: impl Into<String>, value: impl Into<String>) -> Self {
        Self::SingleArg {
            command: command.into(),
            value: value.into(),
        }
    }

    /// Creates a multi-argument step.
    #[must_use]
    pub fn multi<K, V>(command: impl Into<String>, params: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self::MultiArg {
            command: command.into(),
            params: params.into_iter().map(|(k, v)| Param::new(k, v)).collect(),
        }
    }

    /// Returns the step's command name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::SingleArg { command, .. } | Self::MultiArg { command, .. } => command,
        }
    }

    /// Translates the step into its canonical command.
    ///
    /// Single-argument steps become the shell text `command 'value'`; the
    /// value is inserted verbatim.
    #[must_use]
    pub fn to_command(&self) -> Command {
        match self {
            Self::SingleArg { command, value } => Command::Shell {
                text: format!("{command} '{value}'"),
            },
            Self::MultiArg { command, params } => Command::Invoke {
                name: command.clone(),
                params: params
                    .iter()
                    .map(|p| (p.key.clone(), p.value.clone()))
                    .collect(),
            },
        }
    }

    /// Returns the first parameter key that appears more than once.
    #[must_use]
    pub fn duplicate_param(&self) -> Option<&str> {
        let Self::MultiArg { params, .. } = self else {
            return None;
        };
        params
            .iter()
            .enumerate()
            .find(|(i, p)| params[..*i].iter().any(|earlier| earlier.key == p.key))
            .map(|(_, p)| p.key.as_str())
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SingleArg { command, value } => write!(f, "{command} '{value}'"),
            Self::MultiArg { command, params } => {
                write!(f, "{command} ")?;
                for (i, param) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: '{}'", param.key, param.value)?;
                }
                Ok(())
            }
        }
    }
}
