#![forbid(unsafe_code)]
#![warn(clippy::all)]

use std::collections::{HashMap, HashSet};

use itertools::Itertools;
use log::info;

use crate::config::{classify_section_name, Config, SectionKind};
use crate::error::{AuthzError, Result};
use crate::rights::Rights;

/// Split a `groups` member-list value ("alice, bob, @leads") into its
/// trimmed, non-empty tokens.
pub(crate) fn split_members(value: &str) -> Vec<&str> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unique()
        .collect()
}

/// Check a single match-string token (as written, with its optional `~`)
/// against the grammar rules a match string must satisfy. Returns the
/// token with any leading `~` stripped.
fn validate_match_token<'a>(
    token: &'a str,
    aliases: &HashSet<&str>,
    groups: &HashSet<&str>,
) -> Result<&'a str> {
    if let Some(rest) = token.strip_prefix('~') {
        if rest.starts_with('~') {
            return Err(AuthzError::invalid_config(format!(
                "match string '{token}' uses double negation, which is not allowed"
            )));
        }
        if rest == "*" {
            return Err(AuthzError::invalid_config(
                "'~*' would match nobody and is almost certainly a mistake",
            ));
        }
        validate_bare_token(rest, aliases, groups)?;
        Ok(rest)
    } else {
        validate_bare_token(token, aliases, groups)?;
        Ok(token)
    }
}

fn validate_bare_token(token: &str, aliases: &HashSet<&str>, groups: &HashSet<&str>) -> Result<()> {
    if token == "*" {
        return Ok(());
    }
    if let Some(alias) = token.strip_prefix('&') {
        if !aliases.contains(alias) {
            return Err(AuthzError::invalid_config(format!(
                "match string references undefined alias '&{alias}'"
            )));
        }
        return Ok(());
    }
    if let Some(group) = token.strip_prefix('@') {
        if !groups.contains(group) {
            return Err(AuthzError::invalid_config(format!(
                "match string references undefined group '@{group}'"
            )));
        }
        return Ok(());
    }
    if let Some(pseudo) = token.strip_prefix('$') {
        if pseudo != "anonymous" && pseudo != "authenticated" {
            return Err(AuthzError::invalid_config(format!(
                "'${pseudo}' is not a recognized pseudo-principal (only $anonymous and $authenticated are)"
            )));
        }
        return Ok(());
    }
    // A literal user name: any non-empty token not otherwise prefixed.
    if token.is_empty() {
        return Err(AuthzError::invalid_config("empty match string"));
    }
    Ok(())
}

fn validate_rights_value(value: &str) -> Result<()> {
    Rights::parse(value).map(|_| ()).map_err(|bad_char| {
        AuthzError::invalid_config(format!(
            "rights value '{value}' contains illegal character '{bad_char}' (only 'r', 'w', and whitespace are allowed)"
        ))
    })
}

/// `/a/b/c`, no `.`/`..` segments, no doubled `/`, no trailing `/` except
/// for the root path `/` itself.
fn validate_canonical_path(path: &str) -> Result<()> {
    if !path.starts_with('/') {
        return Err(AuthzError::invalid_config(format!(
            "path '{path}' must start with '/'"
        )));
    }
    if path == "/" {
        return Ok(());
    }
    if path.ends_with('/') {
        return Err(AuthzError::invalid_config(format!(
            "path '{path}' has a trailing '/'"
        )));
    }
    if path.contains("//") {
        return Err(AuthzError::invalid_config(format!(
            "path '{path}' has a doubled '/'"
        )));
    }
    for segment in path.split('/').skip(1) {
        if segment == "." || segment == ".." {
            return Err(AuthzError::invalid_config(format!(
                "path '{path}' contains a non-canonical '{segment}' segment"
            )));
        }
    }
    Ok(())
}

/// Validate a freshly loaded [`Config`] once, before any query is served.
/// On success, the Trie Compiler and Membership Resolver may trust every
/// invariant checked here without re-checking it themselves.
pub fn validate(config: &Config) -> Result<()> {
    let alias_names: HashSet<&str> = config
        .section("aliases")
        .map(|s| s.entries().map(|(k, _)| k).collect())
        .unwrap_or_default();

    let group_names: HashSet<&str> = config
        .section("groups")
        .map(|s| s.entries().map(|(k, _)| k).collect())
        .unwrap_or_default();

    validate_group_members(config, &alias_names, &group_names)?;
    validate_group_graph_acyclic(config, &group_names)?;

    let mut global_paths: HashSet<String> = HashSet::new();
    let mut repo_paths: HashMap<String, HashSet<String>> = HashMap::new();

    for (name, section) in config.sections() {
        let Some(kind) = classify_section_name(name) else {
            continue;
        };
        let SectionKind::PathRule { repo, path } = kind else {
            continue;
        };
        validate_canonical_path(&path)?;

        for (match_token, rights_value) in section.entries() {
            validate_match_token(match_token, &alias_names, &group_names)?;
            validate_rights_value(rights_value)?;
        }

        match repo {
            None => {
                global_paths.insert(path);
            }
            Some(repo_name) => {
                repo_paths.entry(repo_name).or_default().insert(path);
            }
        }
    }

    for (repo_name, paths) in &repo_paths {
        for path in paths {
            if global_paths.contains(path) {
                return Err(AuthzError::invalid_config(format!(
                    "path '{path}' is defined both globally and for repo '{repo_name}'; \
                     this would assign conflicting own_access to the same trie node"
                )));
            }
        }
    }

    info!(
        "validated config: {} alias(es), {} group(s), {} global path rule(s), {} repo(s) with path rules",
        alias_names.len(),
        group_names.len(),
        global_paths.len(),
        repo_paths.len()
    );

    Ok(())
}

fn validate_group_members(
    config: &Config,
    alias_names: &HashSet<&str>,
    group_names: &HashSet<&str>,
) -> Result<()> {
    let Some(groups) = config.section("groups") else {
        return Ok(());
    };
    for (_, members_value) in groups.entries() {
        for member in split_members(members_value) {
            validate_bare_token(member, alias_names, group_names)?;
        }
    }
    Ok(())
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Depth-first cycle detection over the `groups` membership graph (an
/// edge `a -> b` means group `a` lists subgroup `@b` as a member).
fn validate_group_graph_acyclic(config: &Config, group_names: &HashSet<&str>) -> Result<()> {
    let Some(groups) = config.section("groups") else {
        return Ok(());
    };

    let mut colors: HashMap<&str, Color> = group_names.iter().map(|&g| (g, Color::White)).collect();
    let mut stack: Vec<&str> = Vec::new();

    for &group in group_names {
        if colors[group] == Color::White {
            visit(group, groups, &mut colors, &mut stack)?;
        }
    }
    Ok(())
}

fn visit<'a>(
    group: &'a str,
    groups: &'a crate::config::Section,
    colors: &mut HashMap<&'a str, Color>,
    stack: &mut Vec<&'a str>,
) -> Result<()> {
    colors.insert(group, Color::Gray);
    stack.push(group);

    if let Some(members_value) = groups.get(group) {
        for member in split_members(members_value) {
            if let Some(subgroup) = member.strip_prefix('@') {
                match colors.get(subgroup).copied() {
                    Some(Color::Gray) => {
                        return Err(AuthzError::invalid_config(format!(
                            "group membership cycle detected between '{group}' and '{subgroup}'"
                        )));
                    }
                    Some(Color::White) => {
                        visit(subgroup, groups, colors, stack)?;
                    }
                    _ => {}
                }
            }
        }
    }

    stack.pop();
    colors.insert(group, Color::Black);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use pretty_assertions::assert_eq;

    fn parse(src: &str) -> Config {
        crate::config::Config::parse(src.as_bytes(), None).unwrap()
    }

    #[test]
    fn accepts_the_spec_example() {
        let config = parse(
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
",
        );
        validate(&config).unwrap();
    }

    #[test]
    fn rejects_undefined_subgroup() {
        let config = parse("[groups]\ndevs = alice, @ghosts\n");
        let err = validate(&config).unwrap_err();
        assert!(matches!(err, AuthzError::InvalidConfig { .. }));
    }

    #[test]
    fn rejects_group_cycle() {
        let config = parse("[groups]\ndevs = @leads\nleads = @devs\n");
        let err = validate(&config).unwrap_err();
        assert!(matches!(err, AuthzError::InvalidConfig { .. }));
    }

    #[test]
    fn rejects_illegal_rights_character() {
        let config = parse("[/trunk]\nalice = rx\n");
        let err = validate(&config).unwrap_err();
        assert!(matches!(err, AuthzError::InvalidConfig { .. }));
    }

    #[test]
    fn ignores_section_missing_leading_slash() {
        let config = parse("[project:trunk]\nalice = r\n");
        validate(&config).unwrap();
    }

    #[test]
    fn rejects_non_canonical_path() {
        let config = parse("[/trunk/../etc]\nalice = r\n");
        let err = validate(&config).unwrap_err();
        assert!(matches!(err, AuthzError::InvalidConfig { .. }));
    }

    #[test]
    fn rejects_double_negation() {
        let config = parse("[/trunk]\n~~alice = r\n");
        let err = validate(&config).unwrap_err();
        assert!(matches!(err, AuthzError::InvalidConfig { .. }));
    }

    #[test]
    fn rejects_negated_wildcard() {
        let config = parse("[/trunk]\n~* = r\n");
        let err = validate(&config).unwrap_err();
        assert!(matches!(err, AuthzError::InvalidConfig { .. }));
    }

    #[test]
    fn rejects_unknown_pseudo_principal() {
        let config = parse("[/trunk]\n$root = r\n");
        let err = validate(&config).unwrap_err();
        assert!(matches!(err, AuthzError::InvalidConfig { .. }));
    }

    #[test]
    fn rejects_same_path_global_and_repo_scoped() {
        let config = parse("[/trunk]\n* = r\n[project:/trunk]\nalice = rw\n");
        let err = validate(&config).unwrap_err();
        assert!(matches!(err, AuthzError::InvalidConfig { .. }));
    }

    #[test]
    fn split_members_trims_and_dedupes() {
        assert_eq!(
            split_members(" alice, bob ,alice, @leads"),
            vec!["alice", "bob", "@leads"]
        );
    }
}
