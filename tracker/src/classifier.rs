//! Console line classification for the supported server log dialects
//!
//! This module turns one raw console line into at most one presence [`Signal`]:
//! - Family-specific join/leave lines (Java, Bedrock, Pocket dialects)
//! - A dialect-agnostic join/leave fallback for unknown server builds
//! - Roster listings printed in response to the `list` command
//! - Identity probes that some servers print before the join line
//!
//! Recognition is driven by an ordered rule table. Tiers are evaluated in table
//! order and the first rule whose pattern matches claims the line, so a single
//! line can never produce two signals.

use regex::Regex;
use shared::{normalize_name, split_roster_list, strip_escapes, ServerFamily, Signal};
use std::sync::LazyLock;

/// Priority group a recognizer rule belongs to
///
/// Groups are evaluated in the order they appear in the table: every family
/// group first, then the fallback, then roster listings, then identity probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleTier {
    Family(ServerFamily),
    Fallback,
    Snapshot,
    Identity,
}

/// Which signal constructor a rule feeds its capture into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    Join,
    Leave,
    Snapshot,
    IdentityProbe,
}

/// Built-in recognizers in evaluation order.
///
/// Name captures use the `name` group, roster listings the `list` group and,
/// where the line states one, the player count in the `count` group.
const BUILTIN_RULES: &[(RuleTier, SignalKind, &str)] = &[
    // [12:00:00 INFO]: Alice joined the game
    (
        RuleTier::Family(ServerFamily::Java),
        SignalKind::Join,
        r"(?P<name>\S+) joined the game",
    ),
    (
        RuleTier::Family(ServerFamily::Java),
        SignalKind::Leave,
        r"(?P<name>\S+) left the game",
    ),
    // [2024-01-01 12:00:00:000 INFO] Player connected: Alice, xuid: 2535...
    (
        RuleTier::Family(ServerFamily::Bedrock),
        SignalKind::Join,
        r"Player connected:\s*(?P<name>[^,]+)",
    ),
    (
        RuleTier::Family(ServerFamily::Bedrock),
        SignalKind::Leave,
        r"Player disconnected:\s*(?P<name>[^,]+)",
    ),
    // [Server thread/INFO]: Alice[/127.0.0.1:53412] logged in with entity id 1 at ...
    (
        RuleTier::Family(ServerFamily::Pocket),
        SignalKind::Join,
        r"(?P<name>[^\s\[\]]+)\[/[^\]]*\] logged in",
    ),
    (
        RuleTier::Family(ServerFamily::Pocket),
        SignalKind::Leave,
        r"(?P<name>[^\s\[\]]+)\[/[^\]]*\] logged out",
    ),
    // Anything of the form "...: Alice joined" / "...: Alice has left"
    (
        RuleTier::Fallback,
        SignalKind::Join,
        r":\s+(?P<name>\S+)\s+(?:has\s+)?joined\b",
    ),
    (
        RuleTier::Fallback,
        SignalKind::Leave,
        r":\s+(?P<name>\S+)\s+(?:has\s+)?(?:left|disconnected)\b",
    ),
    // There are 1 of a max of 20 players online: Alice
    // There are 1/20 players online: Alice
    // Bedrock and Essentials print the names of the latter two forms on the
    // following lines, so a nonzero count with no names is not a listing.
    (
        RuleTier::Snapshot,
        SignalKind::Snapshot,
        r"(?i)there are\s+(?P<count>\d+)\s*(?:of a max of|out of maximum|/)\s*\d+\s+players online:?(?P<list>.*)$",
    ),
    // Online players (2): Alice, Bob
    (
        RuleTier::Snapshot,
        SignalKind::Snapshot,
        r"(?i)players\s*\(\s*(?P<count>\d+)(?:\s*/\s*\d+)?\s*\)\s*:?(?P<list>.*)$",
    ),
    // UUID of player Alice is 069a79f4-44e9-4726-a5be-fca90e38aaf5
    (
        RuleTier::Identity,
        SignalKind::IdentityProbe,
        r"UUID of player (?P<name>\S+) is\b",
    ),
];

static DEFAULT_CLASSIFIER: LazyLock<Classifier> = LazyLock::new(Classifier::default);

/// One entry of the recognition table
#[derive(Debug, Clone)]
pub struct RecognizerRule {
    pub tier: RuleTier,
    pub kind: SignalKind,
    pattern: Regex,
}

impl RecognizerRule {
    /// Compiles a rule. The pattern should expose a `name` group for
    /// join/leave/identity rules or a `list` group for roster listings;
    /// otherwise the first capture group is used.
    pub fn new(tier: RuleTier, kind: SignalKind, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            tier,
            kind,
            pattern: Regex::new(pattern)?,
        })
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    /// Returns the signal for `line` if this rule's pattern matches it.
    ///
    /// A match always claims the line; a capture that normalizes to nothing
    /// yields `NoMatch` rather than letting a lower tier try. So does a
    /// listing whose stated count is nonzero but whose names are elsewhere.
    fn recognize(&self, line: &str) -> Option<Signal> {
        let caps = self.pattern.captures(line)?;
        let capture = caps
            .name("name")
            .or_else(|| caps.name("list"))
            .or_else(|| caps.get(1))
            .map(|m| m.as_str())
            .unwrap_or("");

        let signal = match self.kind {
            SignalKind::Snapshot => {
                let names = split_roster_list(capture);
                let count = caps
                    .name("count")
                    .and_then(|m| m.as_str().parse::<u32>().ok());
                match count {
                    Some(count) if count > 0 && names.is_empty() => Signal::NoMatch,
                    _ => Signal::RosterSnapshot(names),
                }
            }
            SignalKind::Join => normalize_name(capture).map_or(Signal::NoMatch, Signal::Join),
            SignalKind::Leave => normalize_name(capture).map_or(Signal::NoMatch, Signal::Leave),
            SignalKind::IdentityProbe => {
                normalize_name(capture).map_or(Signal::NoMatch, Signal::IdentityProbe)
            }
        };

        Some(signal)
    }
}

/// Compiles the built-in table, keeping only the family groups `family` allows.
pub fn builtin_rules(family: Option<ServerFamily>) -> Result<Vec<RecognizerRule>, regex::Error> {
    BUILTIN_RULES
        .iter()
        .filter(|(tier, _, _)| match (tier, family) {
            (RuleTier::Family(rule_family), Some(wanted)) => *rule_family == wanted,
            _ => true,
        })
        .map(|(tier, kind, pattern)| RecognizerRule::new(*tier, *kind, pattern))
        .collect()
}

/// Stateless line classifier over an ordered rule table
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: Vec<RecognizerRule>,
}

impl Classifier {
    /// Classifier for one known server family, or every family when `None`.
    pub fn for_family(family: Option<ServerFamily>) -> Self {
        let rules = builtin_rules(family).expect("built-in recognizer patterns are valid");
        Self { rules }
    }

    /// Classifier over a caller-supplied table, evaluated in the given order.
    pub fn with_rules(rules: Vec<RecognizerRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[RecognizerRule] {
        &self.rules
    }

    /// Maps one console line to exactly one signal. Never fails.
    pub fn classify(&self, line: &str) -> Signal {
        self.classify_with_rule(line)
            .map(|(_, signal)| signal)
            .unwrap_or(Signal::NoMatch)
    }

    /// Like [`Classifier::classify`], but also reports which rule claimed the line.
    pub fn classify_with_rule(&self, line: &str) -> Option<(&RecognizerRule, Signal)> {
        let visible = strip_escapes(line);
        self.rules
            .iter()
            .find_map(|rule| rule.recognize(&visible).map(|signal| (rule, signal)))
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::for_family(None)
    }
}

/// Classifies `line` with the all-families classifier.
pub fn classify(line: &str) -> Signal {
    DEFAULT_CLASSIFIER.classify(line)
}
