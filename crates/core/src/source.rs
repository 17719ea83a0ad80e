//! Source kinds and admin-time naming rules.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Names are word characters, 2 to 32 long.
static NAME_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\w{2,32}$").unwrap());

/// Modules may additionally live under a `node_modules/` prefix so scripts
/// can require vendored dependencies by their packaged path.
static MODULE_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(node_modules/)?\w{2,32}$").unwrap());

/// The six kinds of persisted script sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Module,
    Controller,
    Daemon,
    Crontab,
    Template,
    Resource,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Module => "module",
            SourceKind::Controller => "controller",
            SourceKind::Daemon => "daemon",
            SourceKind::Crontab => "crontab",
            SourceKind::Template => "template",
            SourceKind::Resource => "resource",
        }
    }

    /// Kinds that occupy a URL and therefore participate in the
    /// active-URL uniqueness rule.
    pub fn is_routable(&self) -> bool {
        matches!(self, SourceKind::Controller | SourceKind::Resource)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "module" => Ok(SourceKind::Module),
            "controller" => Ok(SourceKind::Controller),
            "daemon" => Ok(SourceKind::Daemon),
            "crontab" => Ok(SourceKind::Crontab),
            "template" => Ok(SourceKind::Template),
            "resource" => Ok(SourceKind::Resource),
            _ => Err(CoreError::Validation(
                "type must be module, controller, daemon, crontab, template or resource".into(),
            )),
        }
    }
}

/// Validate a source name against the naming rules for its kind.
pub fn validate_name(kind: SourceKind, name: &str) -> Result<(), CoreError> {
    let (re, shape): (&Regex, &str) = match kind {
        SourceKind::Module => (&MODULE_NAME_RE, "/(node_modules/)?[A-Za-z0-9_]{2,32}/"),
        _ => (&NAME_RE, "/[A-Za-z0-9_]{2,32}/"),
    };
    if !re.is_match(name) {
        return Err(CoreError::Validation(format!(
            "name is required, it must be a string that matches {shape}"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
