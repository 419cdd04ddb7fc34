//! Package spec parsing.
//!
//! Parses package specifications like:
//! - `react`, `react@18.2.0`, `react@^18.0.0`, `react@next`
//! - `@types/node`, `@types/node@^20`
//! - `./local-dir`, `file:../pkg.tgz`
//! - `github:user/repo`, `user/repo`, `git+https://host/repo.git`
//! - `https://host/pkg.tgz`
//! - `alias@npm:real@^1.0.0`

use super::error::PkgError;
use super::version::{is_valid_range, parse_version, DEFAULT_TAG};
use std::fmt;

/// How a spec would be fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecType {
    Version,
    Range,
    Tag,
    Git,
    Directory,
    File,
    Remote,
    Alias,
}

impl SpecType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Version => "version",
            Self::Range => "range",
            Self::Tag => "tag",
            Self::Git => "git",
            Self::Directory => "directory",
            Self::File => "file",
            Self::Remote => "remote",
            Self::Alias => "alias",
        }
    }
}

impl fmt::Display for SpecType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed package specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSpec {
    /// Full package name (e.g., "@scope/name" or "name"); `None` for bare
    /// paths, URLs and git shorthands.
    pub name: Option<String>,
    /// Scope without the @ prefix, if scoped.
    pub scope: Option<String>,
    /// The input as given.
    pub raw: String,
    /// Everything after `name@`, empty when only a name was given.
    pub raw_spec: String,
    /// What would actually be fetched: `latest` for a bare name, the trimmed
    /// range, the path without `file:`, or the alias target spec.
    pub fetch_spec: String,
    pub spec_type: SpecType,
    /// Target of an `npm:` alias.
    pub sub_spec: Option<Box<ParsedSpec>>,
}

impl ParsedSpec {
    /// Parse a command-line package specification string.
    ///
    /// # Errors
    /// Returns an error if the spec is invalid.
    pub fn parse(input: &str) -> Result<Self, PkgError> {
        let input = input.trim();

        if input.is_empty() {
            return Err(PkgError::spec_invalid("Empty package spec"));
        }

        if is_path(input) || is_url(input) || is_git_shorthand(input) {
            let (spec_type, fetch_spec, _) = classify(input)?;
            return Ok(Self {
                name: None,
                scope: None,
                raw: input.to_string(),
                raw_spec: input.to_string(),
                fetch_spec,
                spec_type,
                sub_spec: None,
            });
        }

        let (name, raw_spec) = split_name(input)?;
        Self::resolve(name, raw_spec).map(|mut spec| {
            spec.raw = input.to_string();
            spec
        })
    }

    /// Classify a dependency declared as `name: spec` in a manifest.
    ///
    /// # Errors
    /// Returns an error if the name or spec is invalid.
    pub fn resolve(name: &str, raw_spec: &str) -> Result<Self, PkgError> {
        let scope = validate_name(name)?;
        let raw_spec = raw_spec.trim();
        let (spec_type, fetch_spec, sub_spec) = classify(raw_spec)?;
        Ok(Self {
            name: Some(name.to_string()),
            scope,
            raw: if raw_spec.is_empty() {
                name.to_string()
            } else {
                format!("{name}@{raw_spec}")
            },
            raw_spec: raw_spec.to_string(),
            fetch_spec,
            spec_type,
            sub_spec: sub_spec.map(Box::new),
        })
    }

    /// Whether the spec resolves through the registry.
    #[must_use]
    pub fn is_registry(&self) -> bool {
        matches!(
            self.spec_type,
            SpecType::Version | SpecType::Range | SpecType::Tag | SpecType::Alias
        )
    }

    /// Registry package name, following an alias to its target.
    #[must_use]
    pub fn registry_name(&self) -> Option<&str> {
        match &self.sub_spec {
            Some(sub) => sub.name.as_deref(),
            None => self.name.as_deref(),
        }
    }

    /// Range or tag sent to the registry, following an alias to its target.
    #[must_use]
    pub fn registry_fetch_spec(&self) -> &str {
        match &self.sub_spec {
            Some(sub) => &sub.fetch_spec,
            None => &self.fetch_spec,
        }
    }
}

/// URL-encode a package name for registry requests.
///
/// For scoped packages, encodes the `/` as `%2F`.
#[must_use]
pub fn url_encoded_name(name: &str) -> String {
    if name.starts_with('@') {
        name.replace('/', "%2F")
    } else {
        name.to_string()
    }
}

fn split_name(input: &str) -> Result<(&str, &str), PkgError> {
    // the version delimiter is the first @ after a scope's leading @
    let search_from = usize::from(input.starts_with('@'));
    match input[search_from..].find('@') {
        Some(pos) => {
            let at = pos + search_from;
            let (name, spec) = (&input[..at], &input[at + 1..]);
            if spec.is_empty() {
                return Err(PkgError::spec_invalid(format!(
                    "Invalid package spec: empty version range in '{input}'"
                )));
            }
            Ok((name, spec))
        }
        None => Ok((input, "")),
    }
}

/// Returns the scope when the name is scoped.
fn validate_name(name: &str) -> Result<Option<String>, PkgError> {
    if name.is_empty() {
        return Err(PkgError::spec_invalid("Empty package name"));
    }

    let Some(scoped) = name.strip_prefix('@') else {
        check_chars(name)?;
        return Ok(None);
    };

    let Some((scope, pkg)) = scoped.split_once('/') else {
        return Err(PkgError::spec_invalid(format!(
            "Invalid scoped package: missing '/' in '{name}'"
        )));
    };
    if scope.is_empty() {
        return Err(PkgError::spec_invalid(format!(
            "Invalid scoped package: empty scope in '{name}'"
        )));
    }
    if pkg.is_empty() {
        return Err(PkgError::spec_invalid(format!(
            "Invalid scoped package: empty name in '{name}'"
        )));
    }
    check_chars(scope)?;
    check_chars(pkg)?;
    Ok(Some(scope.to_string()))
}

fn check_chars(name: &str) -> Result<(), PkgError> {
    for c in name.chars() {
        if !c.is_alphanumeric() && c != '-' && c != '_' && c != '.' {
            return Err(PkgError::spec_invalid(format!(
                "Invalid character '{c}' in package name '{name}'"
            )));
        }
    }
    Ok(())
}

fn is_path(s: &str) -> bool {
    s.starts_with("file:")
        || s.starts_with("./")
        || s.starts_with("../")
        || s.starts_with('/')
        || s.starts_with("~/")
        || s == "."
        || s == ".."
}

fn is_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

fn is_git_shorthand(s: &str) -> bool {
    const HOSTED: [&str; 4] = ["github:", "gitlab:", "bitbucket:", "gist:"];
    if is_path(s) {
        return false;
    }
    if s.starts_with("git+") || s.starts_with("git://") || HOSTED.iter().any(|p| s.starts_with(p))
    {
        return true;
    }
    // `user/repo` with an optional `#ref`
    let repo = s.split('#').next().unwrap_or_default();
    match repo.split_once('/') {
        Some((user, name)) => {
            !s.starts_with('@')
                && !user.is_empty()
                && !name.is_empty()
                && !name.contains('/')
                && !repo.contains(':')
                && !repo.contains('@')
        }
        None => false,
    }
}

fn is_tarball(path: &str) -> bool {
    path.ends_with(".tgz") || path.ends_with(".tar.gz") || path.ends_with(".tar")
}

/// Classify everything after `name@`.
fn classify(raw_spec: &str) -> Result<(SpecType, String, Option<ParsedSpec>), PkgError> {
    if raw_spec.is_empty() {
        return Ok((SpecType::Tag, DEFAULT_TAG.to_string(), None));
    }

    if let Some(target) = raw_spec.strip_prefix("npm:") {
        let sub = ParsedSpec::parse(target)?;
        if sub.name.is_none() || !sub.is_registry() || sub.spec_type == SpecType::Alias {
            return Err(PkgError::spec_invalid(format!(
                "Aliases only work for registry packages: '{raw_spec}'"
            )));
        }
        return Ok((SpecType::Alias, target.to_string(), Some(sub)));
    }

    if is_git_shorthand(raw_spec) {
        return Ok((SpecType::Git, raw_spec.to_string(), None));
    }
    if is_url(raw_spec) {
        return Ok((SpecType::Remote, raw_spec.to_string(), None));
    }
    if is_path(raw_spec) {
        let path = raw_spec.strip_prefix("file:").unwrap_or(raw_spec);
        let spec_type = if is_tarball(path) {
            SpecType::File
        } else {
            SpecType::Directory
        };
        return Ok((spec_type, path.to_string(), None));
    }

    if parse_version(raw_spec).is_some() {
        return Ok((SpecType::Version, raw_spec.to_string(), None));
    }
    if is_valid_range(raw_spec) {
        return Ok((SpecType::Range, raw_spec.to_string(), None));
    }

    // tags must be URL-safe and never look like a version
    if raw_spec
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Ok((SpecType::Tag, raw_spec.to_string(), None));
    }

    Err(PkgError::spec_invalid(format!(
        "Invalid version range or tag: '{raw_spec}'"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple() {
        let spec = ParsedSpec::parse("react").unwrap();
        assert_eq!(spec.name.as_deref(), Some("react"));
        assert_eq!(spec.scope, None);
        assert_eq!(spec.raw_spec, "");
        assert_eq!(spec.fetch_spec, "latest");
        assert_eq!(spec.spec_type, SpecType::Tag);
    }

    #[test]
    fn test_parse_with_version() {
        let spec = ParsedSpec::parse("react@18.2.0").unwrap();
        assert_eq!(spec.name.as_deref(), Some("react"));
        assert_eq!(spec.raw_spec, "18.2.0");
        assert_eq!(spec.spec_type, SpecType::Version);
    }

    #[test]
    fn test_parse_with_range_and_tag() {
        let spec = ParsedSpec::parse("react@^18.0.0").unwrap();
        assert_eq!(spec.spec_type, SpecType::Range);
        assert_eq!(spec.fetch_spec, "^18.0.0");

        let spec = ParsedSpec::parse("react@next").unwrap();
        assert_eq!(spec.spec_type, SpecType::Tag);
        assert_eq!(spec.fetch_spec, "next");
    }

    #[test]
    fn test_parse_scoped() {
        let spec = ParsedSpec::parse("@types/node@^20").unwrap();
        assert_eq!(spec.name.as_deref(), Some("@types/node"));
        assert_eq!(spec.scope.as_deref(), Some("types"));
        assert_eq!(spec.raw_spec, "^20");

        let spec = ParsedSpec::parse("@types/node").unwrap();
        assert_eq!(spec.name.as_deref(), Some("@types/node"));
        assert_eq!(spec.raw_spec, "");
    }

    #[test]
    fn test_parse_invalid() {
        assert!(ParsedSpec::parse("").is_err());
        assert!(ParsedSpec::parse("   ").is_err());
        assert!(ParsedSpec::parse("@").is_err());
        assert!(ParsedSpec::parse("@scope").is_err());
        assert!(ParsedSpec::parse("@scope/").is_err());
        assert!(ParsedSpec::parse("react@").is_err());
        assert!(ParsedSpec::parse("re act").is_err());
    }

    #[test]
    fn test_parse_paths() {
        let spec = ParsedSpec::parse("./packages/a").unwrap();
        assert_eq!(spec.name, None);
        assert_eq!(spec.spec_type, SpecType::Directory);

        let spec = ParsedSpec::parse("file:../dist/a-1.0.0.tgz").unwrap();
        assert_eq!(spec.spec_type, SpecType::File);
        assert_eq!(spec.fetch_spec, "../dist/a-1.0.0.tgz");

        let spec = ParsedSpec::resolve("a", "file:./a").unwrap();
        assert_eq!(spec.spec_type, SpecType::Directory);
        assert!(!spec.is_registry());
    }

    #[test]
    fn test_parse_git_and_remote() {
        for input in ["github:user/repo", "user/repo", "user/repo#v1", "git+https://h/r.git"] {
            let spec = ParsedSpec::parse(input).unwrap();
            assert_eq!(spec.spec_type, SpecType::Git, "{input}");
        }
        let spec = ParsedSpec::resolve("x", "https://example.com/x.tgz").unwrap();
        assert_eq!(spec.spec_type, SpecType::Remote);
        assert_eq!(spec.spec_type.to_string(), "remote");
    }

    #[test]
    fn test_alias_targets_registry() {
        let spec = ParsedSpec::resolve("old", "npm:new-name@^2.0.0").unwrap();
        assert_eq!(spec.spec_type, SpecType::Alias);
        assert!(spec.is_registry());
        assert_eq!(spec.registry_name(), Some("new-name"));
        assert_eq!(spec.registry_fetch_spec(), "^2.0.0");

        assert!(ParsedSpec::resolve("old", "npm:./dir").is_err());
    }

    #[test]
    fn test_url_encoded_name() {
        assert_eq!(url_encoded_name("react"), "react");
        assert_eq!(url_encoded_name("@types/node"), "@types%2Fnode");
    }
}
