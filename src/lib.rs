#![forbid(unsafe_code)]
#![warn(clippy::all)]

//! A path-based access-control engine: parse a Subversion-style authz
//! configuration, resolve a user's principal set, compile a per-repository
//! access trie, and answer allow/deny queries against it with no I/O on
//! the hot path.

pub mod config;
pub mod error;
pub mod lookup;
pub mod principals;
pub mod rights;
pub mod trie;
pub mod validate;

use std::path::Path;

use log::debug;

use config::{Config, LoadOptions, RepositoryResolver};
use error::{AuthzError, Result};
use principals::MembershipIndex;
use rights::Rights;
use trie::TrieNode;

/// A validated configuration, ready to serve queries.
///
/// Building an `Authz` runs the Validator once; every subsequent
/// [`Authz::check_access`] call only resolves principals and compiles a
/// trie, neither of which touches I/O.
#[derive(Debug, Clone)]
pub struct Authz {
    config: Config,
    membership_index: MembershipIndex,
}

impl Authz {
    /// Load and validate a configuration from a filesystem path or,
    /// with `opts.accept_urls` set, a `file://` URL resolved through
    /// `resolver`.
    pub fn load(path: &Path, opts: &LoadOptions, resolver: Option<&dyn RepositoryResolver>) -> Result<Authz> {
        let config = Config::load(path, opts, resolver)?;
        Authz::from_config(config)
    }

    /// Parse and validate a configuration directly from a byte stream.
    pub fn parse<R: std::io::Read>(reader: R, groups_reader: Option<R>) -> Result<Authz> {
        let config = Config::parse(reader, groups_reader)?;
        Authz::from_config(config)
    }

    /// Wrap an already-loaded `Config`, running validation.
    pub fn from_config(config: Config) -> Result<Authz> {
        validate::validate(&config)?;
        let membership_index = MembershipIndex::build(&config);
        Ok(Authz {
            config,
            membership_index,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Resolve the principal set for `user` against this configuration.
    pub fn principals(&self, user: Option<&str>) -> principals::PrincipalSet {
        principals::resolve_principals(&self.config, &self.membership_index, user)
    }

    /// Compile the access trie for `(repo, user)`. Callers serving many
    /// queries against the same repository/user pair should cache the
    /// result themselves; compilation is cheap but not free.
    pub fn compile_trie(&self, repo: &str, user: Option<&str>) -> TrieNode {
        let principal_set = self.principals(user);
        trie::compile(&self.config, repo, &principal_set)
    }

    /// Answer one access query.
    ///
    /// `path` of `None` asks "does this user have `required` access
    /// anywhere in `repo`"; a `Some(path)` not starting with `/` is an
    /// `invalid-argument` error.
    pub fn check_access(
        &self,
        repo: &str,
        path: Option<&str>,
        user: Option<&str>,
        required: Rights,
        recursive: bool,
    ) -> Result<bool> {
        self.check_access_explained(repo, path, user, required, recursive)
            .map(|decision| decision.allowed)
    }

    /// Same query as [`Authz::check_access`], additionally reporting which
    /// shortcut (or the final rule) decided the outcome. The CLI's `check`
    /// subcommand uses this to print a reasoning trail; most library
    /// callers only need `check_access`.
    pub fn check_access_explained(
        &self,
        repo: &str,
        path: Option<&str>,
        user: Option<&str>,
        required: Rights,
        recursive: bool,
    ) -> Result<lookup::Decision> {
        if let Some(p) = path {
            if !p.is_empty() && !p.starts_with('/') {
                return Err(AuthzError::invalid_argument(format!(
                    "path '{p}' must be absent or start with '/'"
                )));
            }
        }

        let root = self.compile_trie(repo, user);
        let decision = lookup::check_access_explained(&root, path, required, recursive);
        debug!(
            "check_access repo={repo:?} path={path:?} user={user:?} required={required} recursive={recursive} -> {} ({})",
            decision.allowed, decision.reason
        );
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SPEC_EXAMPLE: &str = "\
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
";

    fn authz() -> Authz {
        Authz::parse(SPEC_EXAMPLE.as_bytes(), None).unwrap()
    }

    #[test]
    fn end_to_end_scenarios_from_the_worked_example() {
        let authz = authz();

        assert_eq!(
            authz
                .check_access("project", Some("/trunk/src/file.c"), Some("alice"), Rights::WRITE, false)
                .unwrap(),
            true
        );
        assert_eq!(
            authz
                .check_access("project", Some("/trunk/secret/k"), Some("alice"), Rights::READ, false)
                .unwrap(),
            false
        );
        assert_eq!(
            authz
                .check_access("project", Some("/trunk/secret/k"), Some("carol"), Rights::WRITE, false)
                .unwrap(),
            true
        );
        assert_eq!(
            authz
                .check_access("project", Some("/trunk"), Some("bob"), Rights::READ | Rights::WRITE, true)
                .unwrap(),
            false
        );
        assert_eq!(
            authz
                .check_access("project", Some("/"), Some("dave"), Rights::READ, false)
                .unwrap(),
            true
        );
        assert_eq!(
            authz
                .check_access("project", Some("/trunk/secret"), Some("dave"), Rights::READ, true)
                .unwrap(),
            false
        );
        assert_eq!(
            authz
                .check_access("project", Some("/trunk"), None, Rights::READ, false)
                .unwrap(),
            true
        );
    }

    #[test]
    fn invalid_config_is_rejected_at_construction() {
        let err = Authz::parse("[groups]\ndevs = @ghosts\n".as_bytes(), None).unwrap_err();
        assert!(matches!(err, AuthzError::InvalidConfig { .. }));
    }

    #[test]
    fn relative_path_query_is_an_invalid_argument() {
        let authz = authz();
        let err = authz
            .check_access("project", Some("trunk"), Some("alice"), Rights::READ, false)
            .unwrap_err();
        assert!(matches!(err, AuthzError::InvalidArgument { .. }));
    }
}
