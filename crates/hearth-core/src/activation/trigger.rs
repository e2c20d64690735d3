use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::activation::error::ActivationError;

/// The kind of runtime event a trigger listens for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ActivationKind {
    Startup,
    Command,
    View,
    Language,
    FileType,
    Uri,
    Configuration,
    Authentication,
    Menu,
}

impl ActivationKind {
    pub const ALL: [ActivationKind; 9] = [
        ActivationKind::Startup,
        ActivationKind::Command,
        ActivationKind::View,
        ActivationKind::Language,
        ActivationKind::FileType,
        ActivationKind::Uri,
        ActivationKind::Configuration,
        ActivationKind::Authentication,
        ActivationKind::Menu,
    ];

    /// The manifest spelling, e.g. `onCommand`
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivationKind::Startup => "onStartup",
            ActivationKind::Command => "onCommand",
            ActivationKind::View => "onView",
            ActivationKind::Language => "onLanguage",
            ActivationKind::FileType => "onFileType",
            ActivationKind::Uri => "onUri",
            ActivationKind::Configuration => "onConfiguration",
            ActivationKind::Authentication => "onAuthentication",
            ActivationKind::Menu => "onMenu",
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == prefix)
    }
}

impl fmt::Display for ActivationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn split_kind_argument(text: &str) -> Result<(ActivationKind, Option<String>), ActivationError> {
    let text = text.trim();
    let (prefix, argument) = match text.split_once(':') {
        Some((prefix, arg)) => (prefix, Some(arg.trim())),
        None => (text, None),
    };
    let kind = ActivationKind::from_prefix(prefix).ok_or_else(|| ActivationError::InvalidTrigger {
        trigger: text.to_string(),
        reason: format!("unknown activation kind '{}'", prefix),
    })?;
    let argument = argument.filter(|a| !a.is_empty()).map(str::to_string);
    Ok((kind, argument))
}

/// A trigger declared in a manifest's `activationEvents`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ActivationTrigger {
    /// `*`: matches every event
    Any,
    On {
        kind: ActivationKind,
        argument: Option<String>,
    },
}

impl ActivationTrigger {
    pub fn on(kind: ActivationKind, argument: impl Into<String>) -> Self {
        ActivationTrigger::On {
            kind,
            argument: Some(argument.into()),
        }
    }

    pub fn startup() -> Self {
        ActivationTrigger::On {
            kind: ActivationKind::Startup,
            argument: None,
        }
    }

    pub fn parse(text: &str) -> Result<Self, ActivationError> {
        if text.trim() == "*" {
            return Ok(ActivationTrigger::Any);
        }
        let (kind, argument) = split_kind_argument(text)?;
        Ok(ActivationTrigger::On { kind, argument })
    }

    /// Same kind and matching argument; a missing argument on either side matches.
    pub fn matches(&self, event: &ActivationEvent) -> bool {
        match self {
            ActivationTrigger::Any => true,
            ActivationTrigger::On { kind, argument } => {
                *kind == event.kind
                    && match (argument, &event.argument) {
                        (Some(a), Some(b)) => a == b,
                        _ => true,
                    }
            }
        }
    }
}

impl fmt::Display for ActivationTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivationTrigger::Any => f.write_str("*"),
            ActivationTrigger::On { kind, argument: Some(arg) } => write!(f, "{}:{}", kind, arg),
            ActivationTrigger::On { kind, argument: None } => write!(f, "{}", kind),
        }
    }
}

impl FromStr for ActivationTrigger {
    type Err = ActivationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActivationTrigger::parse(s)
    }
}

/// An event fired by the host, e.g. a command invocation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActivationEvent {
    pub kind: ActivationKind,
    pub argument: Option<String>,
}

impl ActivationEvent {
    pub fn new(kind: ActivationKind, argument: Option<String>) -> Self {
        Self { kind, argument }
    }

    pub fn startup() -> Self {
        Self::new(ActivationKind::Startup, None)
    }

    pub fn command(id: impl Into<String>) -> Self {
        Self::new(ActivationKind::Command, Some(id.into()))
    }

    pub fn view(id: impl Into<String>) -> Self {
        Self::new(ActivationKind::View, Some(id.into()))
    }

    pub fn menu(id: impl Into<String>) -> Self {
        Self::new(ActivationKind::Menu, Some(id.into()))
    }

    pub fn language(culture: impl Into<String>) -> Self {
        Self::new(ActivationKind::Language, Some(culture.into()))
    }

    pub fn file_type(extension: impl Into<String>) -> Self {
        Self::new(ActivationKind::FileType, Some(extension.into()))
    }

    pub fn uri(scheme: impl Into<String>) -> Self {
        Self::new(ActivationKind::Uri, Some(scheme.into()))
    }

    pub fn configuration(key: impl Into<String>) -> Self {
        Self::new(ActivationKind::Configuration, Some(key.into()))
    }

    pub fn authentication(event: impl Into<String>) -> Self {
        Self::new(ActivationKind::Authentication, Some(event.into()))
    }

    /// Parses the same `onKind[:argument]` syntax triggers use; `*` is not an event.
    pub fn parse(text: &str) -> Result<Self, ActivationError> {
        let (kind, argument) = split_kind_argument(text)?;
        Ok(Self { kind, argument })
    }
}

impl fmt::Display for ActivationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.argument {
            Some(arg) => write!(f, "{}:{}", self.kind, arg),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl FromStr for ActivationEvent {
    type Err = ActivationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActivationEvent::parse(s)
    }
}
