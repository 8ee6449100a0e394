use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

/// Console command that makes a running server print its full player listing.
pub const DEFAULT_LIST_COMMAND: &str = "list";
/// Delay before the first roster listing is requested after tracking starts.
pub const DEFAULT_INITIAL_RECONCILE_DELAY: Duration = Duration::from_secs(3);
/// Interval between roster listing requests while a server is tracked.
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(60);

/// Terminal escapes (OSC, CSI, two-byte) and `§` formatting codes.
static ESCAPE_SEQUENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b\[[0-?]*[ -/]*[@-~]|\x1b[@-Z\\\-_]|\x1b|§[0-9a-fk-orA-FK-OR]",
    )
    .expect("escape sequence pattern is valid")
});

static LIST_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*").expect("list separator pattern is valid"));

/// A classified event derived from one console line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Signal {
    Join(String),
    Leave(String),
    /// Authoritative full listing. An empty list means nobody is online.
    RosterSnapshot(Vec<String>),
    /// A player's unique id was resolved; seeds the roster without announcing.
    IdentityProbe(String),
    NoMatch,
}

impl Signal {
    pub fn is_match(&self) -> bool {
        !matches!(self, Signal::NoMatch)
    }
}

/// Log dialect of a server implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerFamily {
    /// Vanilla Java edition and its forks (Paper, Spigot, Purpur, Fabric, Forge).
    Java,
    /// Bedrock dedicated server.
    Bedrock,
    /// PocketMine-MP and Nukkit.
    Pocket,
}

impl ServerFamily {
    /// Every known family in classification priority order.
    pub const ALL: [ServerFamily; 3] = [ServerFamily::Java, ServerFamily::Bedrock, ServerFamily::Pocket];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServerFamily::Java => "java",
            ServerFamily::Bedrock => "bedrock",
            ServerFamily::Pocket => "pocket",
        }
    }
}

impl fmt::Display for ServerFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServerFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "java" | "vanilla" | "paper" | "spigot" | "purpur" | "fabric" | "forge" | "neoforge" => {
                Ok(ServerFamily::Java)
            }
            "bedrock" | "bds" => Ok(ServerFamily::Bedrock),
            "pocket" | "pocketmine" | "nukkit" => Ok(ServerFamily::Pocket),
            other => Err(format!("unknown server family: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Joined,
    Left,
}

/// User-facing presence announcement, delivered beside the roster rather than in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub server_id: String,
    pub kind: NotificationKind,
    pub player: String,
}

impl Notification {
    pub fn joined(server_id: impl Into<String>, player: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            kind: NotificationKind::Joined,
            player: player.into(),
        }
    }

    pub fn left(server_id: impl Into<String>, player: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            kind: NotificationKind::Left,
            player: player.into(),
        }
    }

    pub fn message(&self) -> String {
        match self.kind {
            NotificationKind::Joined => format!("{} joined", self.player),
            NotificationKind::Left => format!("{} left", self.player),
        }
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.server_id, self.message())
    }
}

/// Removes terminal escape sequences and formatting codes from `raw`.
pub fn strip_escapes(raw: &str) -> String {
    ESCAPE_SEQUENCE.replace_all(raw, "").into_owned()
}

/// Canonical form of a captured player name, or `None` if nothing is left of it.
pub fn normalize_name(raw: &str) -> Option<String> {
    let stripped = strip_escapes(raw);
    let name = stripped
        .trim_start()
        .trim_end_matches(|c: char| c == '.' || c.is_whitespace());

    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Splits the name list of a roster listing; blank entries are dropped.
pub fn split_roster_list(raw: &str) -> Vec<String> {
    LIST_SEPARATOR
        .split(raw)
        .filter_map(normalize_name)
        .collect()
}
