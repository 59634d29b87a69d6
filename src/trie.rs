#![forbid(unsafe_code)]
#![warn(clippy::all)]

use indexmap::IndexMap;
use log::trace;

use crate::config::{classify_section_name, Config, SectionKind};
use crate::principals::PrincipalSet;
use crate::rights::Rights;

/// One node of a compiled access trie. The root's `segment` is empty.
///
/// `own_access` is `None` until a rule lands on this exact node; a node
/// with no rule just routes to deeper ones and inherits from its parent.
/// `min_rights`/`max_rights` are meaningless before [`finalize`] runs.
#[derive(Debug, Clone)]
pub struct TrieNode {
    pub segment: String,
    pub own_access: Option<Rights>,
    pub min_rights: Rights,
    pub max_rights: Rights,
    pub children: IndexMap<String, TrieNode>,
}

impl TrieNode {
    fn leaf(segment: String) -> Self {
        TrieNode {
            segment,
            own_access: None,
            min_rights: Rights::empty(),
            max_rights: Rights::empty(),
            children: IndexMap::new(),
        }
    }
}

/// Split a rule section's path into its non-empty segments. The leading
/// `/` produces an empty first element, which is dropped; `/` itself
/// yields no segments at all (the root).
fn path_segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Aggregate mask contributed by one path-rule section for a given
/// principal set: union the rights of every entry whose match string
/// applies, where "applies" is membership XOR inversion. `None` means no
/// entry applied at all, distinct from an applying entry with an empty
/// rights value (`* =`). The caller must not insert a node for `None`.
fn evaluate_section(entries: impl Iterator<Item = (String, Rights)>, principals: &PrincipalSet) -> Option<Rights> {
    let mut mask = Rights::empty();
    let mut matched = false;
    for (match_string, rights) in entries {
        let (token, inverted) = match match_string.strip_prefix('~') {
            Some(rest) => (rest, true),
            None => (match_string.as_str(), false),
        };
        let is_member = principals.contains(token);
        let applies = is_member != inverted;
        if applies {
            matched = true;
            mask |= rights;
        }
    }
    matched.then_some(mask)
}

/// Compile a finalized access trie for one `(repository, principal set)`
/// pair. `repo` is the query's repository name; pass `""` when the
/// caller has none to offer. Sections without a `repo:` prefix still
/// match in that case, only repo-scoped sections are excluded.
pub fn compile(config: &Config, repo: &str, principals: &PrincipalSet) -> TrieNode {
    let mut root = TrieNode::leaf(String::new());

    for (name, section) in config.sections() {
        let Some(SectionKind::PathRule { repo: rule_repo, path }) = classify_section_name(name) else {
            continue;
        };
        if let Some(rule_repo) = &rule_repo {
            if rule_repo != repo {
                continue;
            }
        }

        let entries = section
            .entries()
            .map(|(match_string, value)| (match_string.to_string(), Rights::parse(value).unwrap_or(Rights::empty())));
        let Some(mask) = evaluate_section(entries, principals) else {
            continue;
        };

        let segments = path_segments(&path);
        let mut node = &mut root;
        for segment in segments {
            node = node
                .children
                .entry(segment.to_string())
                .or_insert_with(|| TrieNode::leaf(segment.to_string()));
        }
        assert!(
            node.own_access.is_none(),
            "duplicate own_access assignment to path '{path}' in repo '{repo}'; the validator should have rejected this config"
        );
        node.own_access = Some(mask);
    }

    finalize(&mut root, Rights::empty());
    trace!("compiled trie for repo '{repo}' with {} principal(s)", principals.len());
    root
}

/// Single depth-first finalization pass: each node's effective mask is
/// its own_access or the value inherited from its parent; min/max start
/// at that effective value and widen as children report back.
fn finalize(node: &mut TrieNode, inherited: Rights) -> Rights {
    let effective = node.own_access.unwrap_or(inherited);
    if node.own_access.is_none() {
        node.own_access = Some(effective);
    }

    let mut min_rights = effective;
    let mut max_rights = effective;

    for child in node.children.values_mut() {
        let child_effective = finalize(child, effective);
        let _ = child_effective;
        min_rights &= child.min_rights;
        max_rights |= child.max_rights;
    }

    node.min_rights = min_rights;
    node.max_rights = max_rights;
    effective
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::principals::{resolve_principals, MembershipIndex};
    use pretty_assertions::assert_eq;

    fn spec_example_config() -> Config {
        Config::parse(
            "\
[groups]
devs = alice, bob, @leads
leads = carol

[aliases]
al = alice

[/]
* = r

[project:/trunk]
@devs = rw
~&al  = r

[project:/trunk/secret]
@leads = rw
* =
"
            .as_bytes(),
            None,
        )
        .unwrap()
    }

    fn principals_for(config: &Config, user: Option<&str>) -> PrincipalSet {
        let index = MembershipIndex::build(config);
        resolve_principals(config, &index, user)
    }

    #[test]
    fn root_default_is_empty_when_unmatched() {
        let config = Config::empty();
        let principals = principals_for(&config, Some("alice"));
        let root = compile(&config, "project", &principals);
        assert_eq!(root.own_access, Some(Rights::empty()));
        assert_eq!(root.max_rights, Rights::empty());
    }

    #[test]
    fn alice_gets_union_of_devs_and_inverted_alias_rule() {
        let config = spec_example_config();
        let principals = principals_for(&config, Some("alice"));
        let root = compile(&config, "project", &principals);
        let trunk = root.children.get("trunk").unwrap();
        // alice matches @devs (rw) but not ~&al (she *is* &al, so inversion excludes her)
        assert_eq!(trunk.own_access, Some(Rights::READ | Rights::WRITE));
    }

    #[test]
    fn bob_gets_devs_plus_inverted_alias_rule() {
        let config = spec_example_config();
        let principals = principals_for(&config, Some("bob"));
        let root = compile(&config, "project", &principals);
        let trunk = root.children.get("trunk").unwrap();
        // bob matches @devs (rw) and also ~&al since he isn't &al
        assert_eq!(trunk.own_access, Some(Rights::READ | Rights::WRITE));
    }

    #[test]
    fn repo_scoped_rule_is_excluded_for_other_repos() {
        let config = spec_example_config();
        let principals = principals_for(&config, Some("alice"));
        let root = compile(&config, "unrelated-repo", &principals);
        assert!(root.children.get("trunk").is_none());
    }

    #[test]
    fn secret_subtree_denies_bob_despite_trunk_grant() {
        let config = spec_example_config();
        let principals = principals_for(&config, Some("bob"));
        let root = compile(&config, "project", &principals);
        let secret = root
            .children
            .get("trunk")
            .unwrap()
            .children
            .get("secret")
            .unwrap();
        assert_eq!(secret.own_access, Some(Rights::empty()));
    }

    #[test]
    fn section_with_no_matching_entry_inserts_no_node() {
        let config = Config::parse(
            "\
[/]
* = r

[project:/trunk/private]
bob = rw
"
            .as_bytes(),
            None,
        )
        .unwrap();
        let principals = principals_for(&config, Some("alice"));
        let root = compile(&config, "project", &principals);
        // alice matches nothing in [project:/trunk/private], so no node
        // was ever inserted there for her, not even one with an empty
        // own_access. Only the root rule exists.
        assert!(root.children.is_empty());
        assert_eq!(root.own_access, Some(Rights::READ));
    }

    #[test]
    fn finalization_propagates_bounds_upward() {
        let config = spec_example_config();
        let principals = principals_for(&config, Some("bob"));
        let root = compile(&config, "project", &principals);
        let trunk = root.children.get("trunk").unwrap();
        // bob gets rw at /trunk itself but the /trunk/secret subtree denies him,
        // so the subtree's upper bound still reports write reachable while the
        // lower bound does not guarantee it everywhere beneath /trunk.
        assert!(trunk.max_rights.contains(Rights::WRITE));
        assert!(!trunk.min_rights.contains(Rights::WRITE));
    }
}
