//! Structured commands understood by the remote agent.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Command verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verb {
    Diagnose,
    Analyze,
    Execute,
    Help,
}

impl Verb {
    pub const ALL: [Self; 4] = [Self::Diagnose, Self::Analyze, Self::Execute, Self::Help];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Diagnose => "diagnose",
            Self::Analyze => "analyze",
            Self::Execute => "execute",
            Self::Help => "help",
        }
    }

    /// Look up a verb by name, ignoring ASCII case.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|verb| verb.as_str().eq_ignore_ascii_case(name))
    }

    /// Agent endpoint serving this verb. The agent has no help endpoint, so
    /// help requests go to the analyzer.
    #[must_use]
    pub const fn endpoint(self) -> &'static str {
        match self {
            Self::Diagnose => "/diagnose",
            Self::Execute => "/execute",
            Self::Analyze | Self::Help => "/analyze",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed command ready for dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub verb: Verb,
    /// Argument string as typed, quoting preserved.
    pub args: String,
    /// False when the verb was synthesized for plain text input.
    pub explicit: bool,
}

impl Command {
    #[must_use]
    pub fn new(verb: Verb, args: impl Into<String>, explicit: bool) -> Self {
        Self {
            verb,
            args: args.into(),
            explicit,
        }
    }

    /// Wrap free text in the default `execute` verb.
    #[must_use]
    pub fn execute(text: impl Into<String>) -> Self {
        Self::new(Verb::Execute, text, false)
    }

    /// Command line as sent to the agent, without the leading slash.
    #[must_use]
    pub fn command_line(&self) -> String {
        format!("{} {}", self.verb, self.args)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{} {}", self.verb, self.args)
    }
}
