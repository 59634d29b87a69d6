#![forbid(unsafe_code)]
#![warn(clippy::all)]

use crate::rights::Rights;
use crate::trie::TrieNode;

/// Collapse `//` runs, trim a trailing `/`, and drop the leading `/`,
/// yielding the same non-empty segment sequence [`crate::trie::compile`]
/// would produce while inserting a rule at this path. An absent path is
/// represented as `None` by the caller, not by this function.
pub fn normalize_segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Which step of the fixed shortcut ordering produced a decision. Carried
/// only by [`check_access_explained`]; the hot [`check_access`] path
/// never builds one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    /// The query path was absent; judged from the root's upper bound alone.
    PathAbsent,
    /// Shortcut A fired after walking `depth` segments: the subtree rooted
    /// here cannot satisfy `required` no matter how deep the query goes.
    ShortcutA { depth: usize },
    /// Shortcut B fired after walking `depth` segments: every node in this
    /// subtree already guarantees `required`.
    ShortcutB { depth: usize },
    /// Shortcut C fired after walking `depth` segments: the min/max bounds
    /// agree on every bit `required` cares about.
    ShortcutC { depth: usize },
    /// No shortcut fired; the walk ran to the end of the path (or fell off
    /// the trie onto inherited access) and the final recursive/
    /// non-recursive rule decided it.
    WalkedToEnd { depth: usize },
}

/// An access decision together with the reasoning step that produced it,
/// for the CLI's `check` subcommand to report to an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub reason: Reason,
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reason::PathAbsent => write!(f, "path absent; judged from the root's upper bound"),
            Reason::ShortcutA { depth } => {
                write!(f, "shortcut A at depth {depth}: no node below here can grant the required rights")
            }
            Reason::ShortcutB { depth } => {
                write!(f, "shortcut B at depth {depth}: every node below here already grants the required rights")
            }
            Reason::ShortcutC { depth } => {
                write!(f, "shortcut C at depth {depth}: the subtree's bounds agree on the required bits")
            }
            Reason::WalkedToEnd { depth } => {
                write!(f, "walked the full path ({depth} segment(s)); decided by the node reached there")
            }
        }
    }
}

/// Walk a finalized trie along `path` and decide whether `required`
/// rights hold, using the fixed shortcut ordering below.
///
/// `path` of `None` means "does the user have this access anywhere in
/// the repository at all", answered from the root's upper bound alone.
pub fn check_access(root: &TrieNode, path: Option<&str>, required: Rights, recursive: bool) -> bool {
    check_access_explained(root, path, required, recursive).allowed
}

/// Same walk as [`check_access`], additionally reporting which shortcut
/// (or the final rule) decided the outcome.
pub fn check_access_explained(root: &TrieNode, path: Option<&str>, required: Rights, recursive: bool) -> Decision {
    let Some(path) = path else {
        return Decision {
            allowed: root.max_rights.satisfies(required),
            reason: Reason::PathAbsent,
        };
    };

    let segments = normalize_segments(path);

    let mut current = root;
    let mut effective_access = root.own_access.unwrap_or(Rights::empty());
    let mut min = root.min_rights;
    let mut max = root.max_rights;

    for (depth, segment) in segments.iter().enumerate() {
        // Shortcut A: even the most generous descendant lacks `required`.
        if !max.satisfies(required) {
            return Decision {
                allowed: false,
                reason: Reason::ShortcutA { depth },
            };
        }
        // Shortcut B: every descendant already guarantees `required`.
        if min.satisfies(required) {
            return Decision {
                allowed: true,
                reason: Reason::ShortcutB { depth },
            };
        }
        // Shortcut C: the bounds agree on every bit `required` cares about.
        if (min & required) == (max & required) {
            return Decision {
                allowed: (min & required) == required,
                reason: Reason::ShortcutC { depth },
            };
        }

        match current.children.get(*segment) {
            Some(child) => {
                effective_access = child.own_access.unwrap_or(effective_access);
                min = child.min_rights;
                max = child.max_rights;
                current = child;
            }
            None => {
                // No rule exists below here; the remainder of the path
                // inherits the current effective access unchanged.
                min = effective_access;
                max = effective_access;
                break;
            }
        }
    }

    let allowed = if recursive {
        min.satisfies(required)
    } else {
        effective_access.satisfies(required)
    };
    Decision {
        allowed,
        reason: Reason::WalkedToEnd { depth: segments.len() },
    }
}
