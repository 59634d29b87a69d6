#![forbid(unsafe_code)]
#![warn(clippy::all)]

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use derive_builder::Builder;
use indexmap::IndexMap;
use lazy_static::lazy_static;
use log::{debug, info};
use regex::Regex;

use crate::error::{AuthzError, Result};

lazy_static! {
    /// Matches the two legal path-rule section shapes: `repo:/abs/path`
    /// or `/abs/path`. A section whose path part doesn't start with `/`
    /// (e.g. `project:trunk`) simply doesn't match and is treated as an
    /// unrecognized section, per the "ignored, not a path rule" scenario.
    static ref PATH_RULE_RE: Regex = Regex::new(r"^(?:([^:]+):)?(/.*)$").unwrap();
}

/// One `[section]` block: an insertion-ordered map from key to value.
/// Re-declaring a key within the same section overwrites the value in
/// place (its original position is kept).
#[derive(Debug, Clone, Default)]
pub struct Section {
    entries: IndexMap<String, String>,
}

impl Section {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn set(&mut self, key: String, value: String) {
        self.entries.insert(key, value);
    }
}

/// An ordered map of section name to [`Section`]. Section and key
/// comparisons are case-sensitive, and iteration order matches the order
/// sections/keys were first encountered while loading.
#[derive(Debug, Clone, Default)]
pub struct Config {
    sections: IndexMap<String, Section>,
}

/// What kind of section a section name denotes. `None` from
/// [`classify_section_name`] means the section isn't recognized and
/// should be ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SectionKind {
    Aliases,
    Groups,
    /// `repo` is `None` for a section with no `repo:` prefix, meaning it
    /// applies to every repository.
    PathRule { repo: Option<String>, path: String },
}

pub fn classify_section_name(name: &str) -> Option<SectionKind> {
    if name == "aliases" {
        return Some(SectionKind::Aliases);
    }
    if name == "groups" {
        return Some(SectionKind::Groups);
    }
    let captures = PATH_RULE_RE.captures(name)?;
    let repo = captures.get(1).map(|m| m.as_str().to_string());
    let path = captures.get(2).map(|m| m.as_str().to_string())?;
    Some(SectionKind::PathRule { repo, path })
}

impl Config {
    pub fn empty() -> Self {
        Config {
            sections: IndexMap::new(),
        }
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.get(name)
    }

    pub fn sections(&self) -> impl Iterator<Item = (&str, &Section)> {
        self.sections.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn has_section(&self, name: &str) -> bool {
        self.sections.contains_key(name)
    }

    /// Merge another config's `groups` section into this one. Errors if
    /// this config already declares `groups` itself, per the "groups-only
    /// source" loader rule, or if `other` declares anything besides
    /// `groups`.
    pub fn merge_groups_only(&mut self, other: Config) -> Result<()> {
        if self.has_section("groups") {
            return Err(AuthzError::invalid_config(
                "main config already declares a [groups] section; cannot merge a groups-only source",
            ));
        }
        for (name, section) in other.sections.iter() {
            if name != "groups" {
                return Err(AuthzError::invalid_config(format!(
                    "groups-only config source may only contain [groups], found [{name}]"
                )));
            }
            self.sections.insert(name.clone(), section.clone());
        }
        Ok(())
    }

    fn set(&mut self, section: String, key: String, value: String) {
        self.sections.entry(section).or_default().set(key, value);
    }
}

/// Caller-supplied bridge to the host's version-control storage, used only
/// when loading a config referenced by a `file://` URL. Locates the
/// repository root, opens it read-only at its newest revision, and
/// returns the file's bytes.
pub trait RepositoryResolver {
    fn fetch(&self, path_in_repo: &Path) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone, Builder)]
#[builder(setter(into))]
pub struct LoadOptions {
    /// Path to a second "groups-only" config source, merged in after the
    /// main config loads.
    #[builder(default)]
    pub groups_path: Option<PathBuf>,
    /// If the source is missing, fail instead of returning an empty config.
    #[builder(default = "true")]
    pub must_exist: bool,
    /// Interpret `path` as a `file://` URL resolved inside a repository
    /// rather than a plain filesystem path.
    #[builder(default)]
    pub accept_urls: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        LoadOptions {
            groups_path: None,
            must_exist: true,
            accept_urls: false,
        }
    }
}

impl Config {
    /// Load a config from a filesystem path or, when `opts.accept_urls` is
    /// set, a `file://` URL resolved through `resolver`.
    pub fn load(
        path: &Path,
        opts: &LoadOptions,
        resolver: Option<&dyn RepositoryResolver>,
    ) -> Result<Config> {
        let path_str = path.to_string_lossy();
        let mut config = if opts.accept_urls && path_str.starts_with("file://") {
            load_from_url(&path_str, resolver)?
        } else {
            load_from_path(path, opts.must_exist)?
        };

        if let Some(groups_path) = &opts.groups_path {
            let groups_config = load_from_path(groups_path, opts.must_exist)?;
            config.merge_groups_only(groups_config)?;
        }

        info!(
            "loaded config with {} section(s) from {}",
            config.sections.len(),
            path.display()
        );
        Ok(config)
    }

    /// Parse a config directly from a byte stream, with an optional
    /// second groups-only stream merged in.
    pub fn parse<R: Read>(mut reader: R, groups_reader: Option<R>) -> Result<Config> {
        let mut contents = String::new();
        reader.read_to_string(&mut contents)?;
        let mut config = parse_str(&contents, "<stream>")?;

        if let Some(mut groups_reader) = groups_reader {
            let mut groups_contents = String::new();
            groups_reader.read_to_string(&mut groups_contents)?;
            let groups_config = parse_str(&groups_contents, "<groups-stream>")?;
            config.merge_groups_only(groups_config)?;
        }

        Ok(config)
    }
}

fn load_from_path(path: &Path, must_exist: bool) -> Result<Config> {
    if !path.exists() {
        if must_exist {
            return Err(AuthzError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }
        debug!("config source {} missing, using empty config", path.display());
        return Ok(Config::empty());
    }
    let contents = fs::read_to_string(path)?;
    parse_str(&contents, &path.display().to_string())
}

fn load_from_url(url: &str, resolver: Option<&dyn RepositoryResolver>) -> Result<Config> {
    let resolver = resolver.ok_or_else(|| AuthzError::IllegalTarget {
        url: url.to_string(),
        reason: "accept_urls was set but no RepositoryResolver was supplied".to_string(),
    })?;
    let path_in_repo = url.strip_prefix("file://").ok_or_else(|| AuthzError::IllegalTarget {
        url: url.to_string(),
        reason: "expected a file:// URL".to_string(),
    })?;
    let bytes = resolver.fetch(Path::new(path_in_repo))?;
    let contents = String::from_utf8(bytes).map_err(|_| AuthzError::IllegalTarget {
        url: url.to_string(),
        reason: "repository content was not valid UTF-8".to_string(),
    })?;
    parse_str(&contents, url)
}

/// Hand-rolled line-oriented parser for the authz grammar. Section names
/// embed a `repo:` prefix and a `/path`, and entry keys start with `~`,
/// `@`, `&`, `$`, or `*`, all of which standard bare-key grammars reject.
fn parse_str(contents: &str, source_desc: &str) -> Result<Config> {
    let mut config = Config::empty();
    let mut current_section: Option<String> = None;

    for (idx, raw_line) in contents.lines().enumerate() {
        let line_no = idx + 1;
        let line = strip_comment(raw_line).trim();

        if line.is_empty() {
            continue;
        }

        if let Some(header) = line.strip_prefix('[') {
            let name = header.strip_suffix(']').ok_or_else(|| {
                AuthzError::config_parse(source_desc, line_no, "unterminated section header")
            })?;
            if name.is_empty() {
                return Err(AuthzError::config_parse(source_desc, line_no, "empty section name"));
            }
            config.sections.entry(name.to_string()).or_default();
            current_section = Some(name.to_string());
            continue;
        }

        let Some(section_name) = current_section.clone() else {
            return Err(AuthzError::config_parse(
                source_desc,
                line_no,
                "entry found before any [section] header",
            ));
        };

        let Some((key, value)) = line.split_once('=') else {
            return Err(AuthzError::config_parse(
                source_desc,
                line_no,
                "expected 'key = value'",
            ));
        };

        config.set(section_name, key.trim().to_string(), value.trim().to_string());
    }

    Ok(config)
}

/// Strip a `;` or `#` comment. Neither character is legal inside a match
/// string or rights value, so truncating at the first occurrence is safe.
fn strip_comment(line: &str) -> &str {
    match line.find([';', '#']) {
        Some(idx) => &line[..idx],
        None => line,
    }
}
