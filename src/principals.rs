#![forbid(unsafe_code)]
#![warn(clippy::all)]

use std::collections::{HashSet, VecDeque};

use indexmap::IndexMap;
use log::trace;

use crate::config::Config;
use crate::validate::split_members;

/// The full set of match-string tokens a query's user resolves to: the
/// literal user name, every alias pointing at it, the transitive closure
/// of every group it belongs to (directly or through a subgroup), and the
/// pseudo-principals implied by whether the query is anonymous.
///
/// Built once per `(user, anonymous)` pair and consulted by the Trie
/// Compiler while selecting which rule in a path's section applies.
#[derive(Debug, Clone, Default)]
pub struct PrincipalSet {
    tokens: HashSet<String>,
}

impl PrincipalSet {
    pub fn contains(&self, token: &str) -> bool {
        self.tokens.contains(token)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().map(String::as_str)
    }
}

/// Precomputed reverse index (member -> set of groups it belongs to
/// directly) used to seed the BFS closure without re-scanning the whole
/// `[groups]` section for every query.
#[derive(Debug, Clone, Default)]
pub struct MembershipIndex {
    /// member token (user name, `&alias`, or `@group`) -> groups it is a
    /// direct member of.
    direct_groups: IndexMap<String, Vec<String>>,
}

impl MembershipIndex {
    pub fn build(config: &Config) -> MembershipIndex {
        let mut direct_groups: IndexMap<String, Vec<String>> = IndexMap::new();
        if let Some(groups) = config.section("groups") {
            for (group_name, members_value) in groups.entries() {
                for member in split_members(members_value) {
                    direct_groups
                        .entry(member.to_string())
                        .or_default()
                        .push(group_name.to_string());
                }
            }
        }
        MembershipIndex { direct_groups }
    }

    fn groups_for(&self, member: &str) -> &[String] {
        self.direct_groups.get(member).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Resolve the full principal set for a query.
///
/// `user` is `None` for an anonymous request. `aliases` maps alias name
/// (without the leading `&`) to the user name it stands for; every alias
/// whose target equals `user` is seeded into the BFS alongside the bare
/// user name, since a group may list either the user or one of their
/// aliases as a member.
pub fn resolve_principals(
    config: &Config,
    index: &MembershipIndex,
    user: Option<&str>,
) -> PrincipalSet {
    let mut tokens: HashSet<String> = HashSet::new();
    tokens.insert("*".to_string());

    match user {
        None => {
            tokens.insert("$anonymous".to_string());
        }
        Some(name) => {
            tokens.insert("$authenticated".to_string());
            tokens.insert(name.to_string());
        }
    }

    let mut queue: VecDeque<String> = VecDeque::new();
    let mut seed = |member: String, queue: &mut VecDeque<String>, tokens: &mut HashSet<String>| {
        for group in index.groups_for(&member) {
            let group_token = format!("@{group}");
            if tokens.insert(group_token.clone()) {
                queue.push_back(group.clone());
            }
        }
    };

    if let Some(name) = user {
        seed(name.to_string(), &mut queue, &mut tokens);
        for alias_name in aliases_for_user(config, name) {
            let alias_token = format!("&{alias_name}");
            tokens.insert(alias_token.clone());
            seed(alias_token, &mut queue, &mut tokens);
        }
    }

    let mut visited_groups: HashSet<String> = HashSet::new();
    while let Some(group) = queue.pop_front() {
        if !visited_groups.insert(group.clone()) {
            continue;
        }
        let member_token = format!("@{group}");
        seed(member_token, &mut queue, &mut tokens);
    }

    trace!("resolved {} principal token(s) for user {:?}", tokens.len(), user);
    PrincipalSet { tokens }
}

fn aliases_for_user<'a>(config: &'a Config, user: &str) -> Vec<&'a str> {
    let Some(aliases) = config.section("aliases") else {
        return Vec::new();
    };
    aliases
        .entries()
        .filter(|(_, target)| *target == user)
        .map(|(alias_name, _)| alias_name)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_from(src: &str) -> Config {
        Config::parse(src.as_bytes(), None).unwrap()
    }

    #[test]
    fn anonymous_gets_wildcard_and_anonymous_pseudo() {
        let config = config_from("");
        let index = MembershipIndex::build(&config);
        let principals = resolve_principals(&config, &index, None);
        assert!(principals.contains("*"));
        assert!(principals.contains("$anonymous"));
        assert!(!principals.contains("$authenticated"));
    }

    #[test]
    fn authenticated_user_gets_wildcard_authenticated_and_name() {
        let config = config_from("");
        let index = MembershipIndex::build(&config);
        let principals = resolve_principals(&config, &index, Some("alice"));
        assert!(principals.contains("*"));
        assert!(principals.contains("$authenticated"));
        assert!(principals.contains("alice"));
        assert!(!principals.contains("$anonymous"));
    }

    #[test]
    fn closes_over_transitive_group_membership() {
        let config = config_from(
            "[groups]\ndevs = alice\nleads = @devs\nall-staff = @leads\n",
        );
        let index = MembershipIndex::build(&config);
        let principals = resolve_principals(&config, &index, Some("alice"));
        assert!(principals.contains("@devs"));
        assert!(principals.contains("@leads"));
        assert!(principals.contains("@all-staff"));
    }

    #[test]
    fn includes_groups_reached_only_through_an_alias() {
        let config = config_from("[aliases]\nal = alice\n[groups]\ndevs = &al\n");
        let index = MembershipIndex::build(&config);
        let principals = resolve_principals(&config, &index, Some("alice"));
        assert!(principals.contains("&al"));
        assert!(principals.contains("@devs"));
    }

    #[test]
    fn unrelated_group_is_excluded() {
        let config = config_from("[groups]\ndevs = alice\nqa = bob\n");
        let index = MembershipIndex::build(&config);
        let principals = resolve_principals(&config, &index, Some("alice"));
        assert!(principals.contains("@devs"));
        assert!(!principals.contains("@qa"));
    }

    #[test]
    fn diamond_shaped_group_graph_does_not_loop() {
        let config = config_from(
            "[groups]\nbase = alice\nleft = @base\nright = @base\ntop = @left, @right\n",
        );
        let index = MembershipIndex::build(&config);
        let principals = resolve_principals(&config, &index, Some("alice"));
        assert!(principals.contains("@top"));
    }
}
