//! Version range matching using semver.
//!
//! npm range syntax is wider than what `semver::VersionReq` accepts, so each
//! `||` alternative is normalized into a comma-joined comparator list before
//! parsing. Prerelease handling is left to `VersionReq`, which only admits a
//! prerelease when a comparator in the same set names the same
//! `major.minor.patch` with a prerelease tag.

use super::error::PkgError;
use super::manifest::{Packument, VersionManifest};
use semver::{Version, VersionReq};

/// Dist-tag used when a spec carries no range.
pub const DEFAULT_TAG: &str = "latest";

/// A parsed npm range: an OR of comparator sets.
#[derive(Debug, Clone)]
pub struct Range {
    raw: String,
    sets: Vec<VersionReq>,
}

impl Range {
    /// Parse an npm range.
    ///
    /// # Errors
    /// Returns `SpecInvalid` if any alternative fails to parse.
    pub fn parse(raw: &str) -> Result<Self, PkgError> {
        let mut sets = Vec::new();
        for alt in raw.split("||") {
            let converted = normalize_set(alt).ok_or_else(|| invalid(raw, "bad comparator"))?;
            let req = VersionReq::parse(&converted).map_err(|e| invalid(raw, &e.to_string()))?;
            sets.push(req);
        }
        Ok(Self {
            raw: raw.trim().to_string(),
            sets,
        })
    }

    /// Whether `version` satisfies any comparator set.
    #[must_use]
    pub fn matches(&self, version: &Version) -> bool {
        self.sets.iter().any(|req| req.matches(version))
    }

    /// The range as written.
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }
}

fn invalid(range: &str, reason: &str) -> PkgError {
    PkgError::spec_invalid(format!("Invalid version range '{range}': {reason}"))
}

/// Parse a version string loosely (leading `v`/`=` and whitespace allowed).
#[must_use]
pub fn parse_version(version: &str) -> Option<Version> {
    let v = version.trim().trim_start_matches('=').trim_start_matches('v');
    Version::parse(v).ok()
}

/// Whether `range` is a syntactically valid npm range.
#[must_use]
pub fn is_valid_range(range: &str) -> bool {
    Range::parse(range).is_ok()
}

/// Whether `version` satisfies `range`. Invalid input never satisfies.
#[must_use]
pub fn satisfies(version: &str, range: &str) -> bool {
    match (parse_version(version), Range::parse(range)) {
        (Some(v), Ok(r)) => r.matches(&v),
        _ => false,
    }
}

/// Highest version from `versions` satisfying `range`.
///
/// Unparseable candidates are ignored; an invalid range yields `None`.
pub fn max_satisfying<'a, I>(versions: I, range: &str) -> Option<Version>
where
    I: IntoIterator<Item = &'a str>,
{
    let range = Range::parse(range).ok()?;
    versions
        .into_iter()
        .filter_map(parse_version)
        .filter(|v| range.matches(v))
        .max()
}

/// Highest satisfying key, returned as the original string.
fn max_satisfying_key<'a>(keys: impl Iterator<Item = &'a str>, range: &Range) -> Option<&'a str> {
    keys.filter_map(|k| parse_version(k).map(|v| (v, k)))
        .filter(|(v, _)| range.matches(v))
        .max_by(|a, b| a.0.cmp(&b.0))
        .map(|(_, k)| k)
}

/// A version chosen from a packument.
#[derive(Debug, Clone, Copy)]
pub struct Picked<'a> {
    /// The `versions` key that was chosen.
    pub version: &'a str,
    pub manifest: &'a VersionManifest,
}

/// Choose a published version for `spec` (a range or dist-tag).
///
/// - `""` or `*`: the `latest` dist-tag when it names a published version,
///   otherwise the highest version
/// - a valid range: the highest satisfying version
/// - anything else is looked up as a dist-tag
///
/// # Errors
/// Returns `NoMatchingVersion` if nothing fits.
pub fn pick_manifest<'a>(packument: &'a Packument, spec: &str) -> Result<Picked<'a>, PkgError> {
    let spec = spec.trim();
    let name = packument.name.as_str();
    let picked = |version: &str| {
        packument
            .versions
            .get_key_value(version)
            .map(|(version, manifest)| Picked {
                version: version.as_str(),
                manifest,
            })
    };

    if spec.is_empty() || spec == "*" {
        if let Some(p) = packument.latest().and_then(picked) {
            return Ok(p);
        }
    }

    let found = match Range::parse(spec) {
        Ok(range) => max_satisfying_key(packument.version_keys(), &range).and_then(picked),
        Err(_) => packument.dist_tags.get(spec).and_then(|v| picked(v.as_str())),
    };
    found.ok_or_else(|| PkgError::no_matching_version(name, spec))
}

/// Normalize one `||` alternative into `VersionReq` syntax.
///
/// Returns `None` for a malformed comparator.
fn normalize_set(set: &str) -> Option<String> {
    let set = set.trim();
    if set.is_empty() {
        return Some("*".to_string());
    }

    if let Some((lo, hi)) = parse_hyphen_range(set) {
        let mut parts = Vec::new();
        let lo = Partial::parse(lo)?;
        if lo.major.is_some() {
            parts.push(format!(">={}", lo.floor()));
        }
        let hi = Partial::parse(hi)?;
        if let Some(upper) = hi.hyphen_upper() {
            parts.push(upper);
        }
        return Some(join(parts));
    }

    let mut parts = Vec::new();
    for token in comparator_tokens(set) {
        let (op, rest) = split_operator(&token);
        let partial = Partial::parse(rest)?;
        if let Some(cmp) = partial.comparator(op) {
            parts.push(cmp);
        }
    }
    Some(join(parts))
}

fn join(parts: Vec<String>) -> String {
    if parts.is_empty() {
        "*".to_string()
    } else {
        parts.join(", ")
    }
}

/// Parse a hyphen range like "1.0.0 - 2.0.0".
fn parse_hyphen_range(range: &str) -> Option<(&str, &str)> {
    let (start, end) = range.split_once(" - ")?;
    let (start, end) = (start.trim(), end.trim());
    if start.is_empty() || end.is_empty() {
        return None;
    }
    Some((start, end))
}

/// Split on whitespace, gluing bare operators to the following version.
///
/// npm allows ">= 2.1.2 < 3.0.0" meaning ">=2.1.2 AND <3.0.0".
fn comparator_tokens(set: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut pending = String::new();
    for word in set.split_whitespace() {
        pending.push_str(word);
        if word.chars().all(|c| matches!(c, '<' | '>' | '=' | '~' | '^')) {
            continue;
        }
        tokens.push(std::mem::take(&mut pending));
    }
    if !pending.is_empty() {
        tokens.push(pending);
    }
    tokens
}

fn split_operator(token: &str) -> (&str, &str) {
    for op in [">=", "<=", "~>", ">", "<", "=", "~", "^"] {
        if let Some(rest) = token.strip_prefix(op) {
            return (op, rest);
        }
    }
    ("", token)
}

/// A possibly partial version: `1`, `1.2`, `1.x`, `1.2.3-beta.1`.
#[derive(Debug, Default)]
struct Partial {
    major: Option<u64>,
    minor: Option<u64>,
    patch: Option<u64>,
    pre: String,
}

impl Partial {
    fn parse(text: &str) -> Option<Self> {
        let text = text.trim().trim_start_matches('=').trim_start_matches('v');
        // build metadata never participates in matching
        let text = text.split('+').next().unwrap_or_default();
        if text.is_empty() {
            return Some(Self::default());
        }

        let (core, pre) = match text.split_once('-') {
            Some((core, pre)) if !pre.is_empty() => (core, pre),
            Some(_) => return None,
            None => (text, ""),
        };

        let mut nums = [None; 3];
        let mut wild = false;
        let mut count = 0;
        for (i, part) in core.split('.').enumerate() {
            if i >= 3 {
                return None;
            }
            count += 1;
            if matches!(part, "x" | "X" | "*") {
                wild = true;
                continue;
            }
            // nothing concrete may follow a wildcard
            if wild {
                continue;
            }
            nums[i] = Some(part.parse::<u64>().ok()?);
        }
        if count == 0 {
            return None;
        }
        if !pre.is_empty() && nums[2].is_none() {
            return None;
        }

        Some(Self {
            major: nums[0],
            minor: nums[1],
            patch: nums[2],
            pre: pre.to_string(),
        })
    }

    /// Lowest version the partial covers.
    fn floor(&self) -> String {
        let mut s = format!(
            "{}.{}.{}",
            self.major.unwrap_or(0),
            self.minor.unwrap_or(0),
            self.patch.unwrap_or(0)
        );
        if !self.pre.is_empty() {
            s.push('-');
            s.push_str(&self.pre);
        }
        s
    }

    /// Prefix without wildcard components, e.g. `1.2` for `1.2.x`.
    fn prefix(&self) -> Option<String> {
        match (self.major, self.minor, self.patch) {
            (None, _, _) => None,
            (Some(m), None, _) => Some(m.to_string()),
            (Some(m), Some(n), None) => Some(format!("{m}.{n}")),
            (Some(_), Some(_), Some(_)) => Some(self.floor()),
        }
    }

    /// Upper bound of a hyphen range: partial uppers exclude the next step.
    fn hyphen_upper(&self) -> Option<String> {
        match (self.major, self.minor, self.patch) {
            (None, _, _) => None,
            (Some(m), None, _) => Some(format!("<{}.0.0-0", m + 1)),
            (Some(m), Some(n), None) => Some(format!("<{m}.{}.0-0", n + 1)),
            (Some(_), Some(_), Some(_)) => Some(format!("<={}", self.floor())),
        }
    }

    fn comparator(&self, op: &str) -> Option<String> {
        let Some(prefix) = self.prefix() else {
            // `*` with a bound operator: `<*` admits nothing, the rest admit anything
            return match op {
                "<" | ">" => Some("<0.0.0-0".to_string()),
                _ => None,
            };
        };
        Some(match op {
            "" | "=" => format!("={prefix}"),
            "~>" => format!("~{prefix}"),
            other => format!("{other}{prefix}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pkg::error::ErrorKind;

    fn make_packument(versions: &[&str], latest: &str) -> Packument {
        let mut packument = Packument {
            name: "test-pkg".to_string(),
            ..Packument::default()
        };
        packument
            .dist_tags
            .insert("latest".to_string(), latest.to_string());
        for v in versions {
            packument
                .versions
                .insert((*v).to_string(), VersionManifest::new("test-pkg", *v));
        }
        packument
    }

    fn pick(packument: &Packument, spec: &str) -> String {
        pick_manifest(packument, spec).unwrap().version.to_string()
    }

    #[test]
    fn test_pick_latest_for_star_and_empty() {
        let packument = make_packument(&["1.0.0", "2.0.0", "3.0.0"], "2.0.0");
        assert_eq!(pick(&packument, "*"), "2.0.0");
        assert_eq!(pick(&packument, ""), "2.0.0");
        assert_eq!(pick(&packument, "latest"), "2.0.0");
    }

    #[test]
    fn test_pick_star_without_latest_tag() {
        let mut packument = make_packument(&["1.0.0", "3.0.0"], "9.9.9");
        assert_eq!(pick(&packument, "*"), "3.0.0");
        packument.dist_tags.clear();
        assert_eq!(pick(&packument, "*"), "3.0.0");
    }

    #[test]
    fn test_pick_dist_tag() {
        let mut packument = make_packument(&["1.0.0", "2.0.0-rc.1"], "1.0.0");
        packument
            .dist_tags
            .insert("next".to_string(), "2.0.0-rc.1".to_string());
        assert_eq!(pick(&packument, "next"), "2.0.0-rc.1");

        let err = pick_manifest(&packument, "beta").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoMatchingVersion);
    }

    #[test]
    fn test_pick_exact_version() {
        let packument = make_packument(&["1.0.0", "2.0.0", "3.0.0"], "3.0.0");
        assert_eq!(pick(&packument, "2.0.0"), "2.0.0");
        assert_eq!(pick(&packument, "v2.0.0"), "2.0.0");
        assert!(pick_manifest(&packument, "2.0.1").is_err());
    }

    #[test]
    fn test_pick_caret_range() {
        let packument = make_packument(&["1.0.0", "1.5.0", "2.0.0", "2.5.0"], "2.5.0");
        assert_eq!(pick(&packument, "^1.0.0"), "1.5.0");
    }

    #[test]
    fn test_pick_tilde_range() {
        let packument = make_packument(&["1.0.0", "1.0.5", "1.1.0", "2.0.0"], "2.0.0");
        assert_eq!(pick(&packument, "~1.0.0"), "1.0.5");
    }

    #[test]
    fn test_major_only_is_a_range() {
        let packument = make_packument(&["1.0.0", "1.5.0", "2.0.0", "2.5.0"], "2.5.0");
        assert_eq!(pick(&packument, "2"), "2.5.0");
        assert_eq!(pick(&packument, "1.5"), "1.5.0");
    }

    #[test]
    fn test_no_match_reports_name_and_range() {
        let packument = make_packument(&["1.0.0", "2.0.0"], "2.0.0");
        let err = pick_manifest(&packument, "^3.0.0").unwrap_err();
        assert_eq!(
            err.message(),
            "No matching version found for test-pkg@^3.0.0"
        );
    }

    #[test]
    fn test_prerelease_excluded_unless_named() {
        let versions = ["1.0.0", "2.0.0-alpha.1", "2.0.0-beta.1"];
        assert_eq!(
            max_satisfying(versions, "^1.0.0 || >=1.5.0").map(|v| v.to_string()),
            Some("1.0.0".to_string())
        );
        assert_eq!(
            max_satisfying(versions, ">=2.0.0-alpha.0").map(|v| v.to_string()),
            Some("2.0.0-beta.1".to_string())
        );
        assert!(!satisfies("2.0.0-beta.1", "*"));
    }

    #[test]
    fn test_or_range_picks_highest() {
        let packument = make_packument(&["1.5.0", "2.5.0", "3.0.0"], "3.0.0");
        assert_eq!(pick(&packument, "^1.0.0 || ^2.0.0"), "2.5.0");
        assert_eq!(pick(&packument, "^14.0.0||^1.0.0"), "1.5.0");
        assert!(pick_manifest(&packument, "^4.0.0 || ^5.0.0").is_err());
    }

    #[test]
    fn test_x_ranges() {
        assert!(satisfies("1.5.0", "1.x"));
        assert!(!satisfies("2.0.0", "1.x"));
        assert!(satisfies("1.2.9", "1.2.*"));
        assert!(!satisfies("1.3.0", "1.2.X"));
        assert!(satisfies("0.0.1", "x"));
        assert!(satisfies("4.0.0", ""));
        assert!(satisfies("1.9.0", "^1.x"));
    }

    #[test]
    fn test_hyphen_ranges() {
        assert!(satisfies("2.0.0", "1.0.0 - 2.0.0"));
        assert!(!satisfies("2.0.1", "1.0.0 - 2.0.0"));
        assert!(satisfies("2.9.9", "1.0.0 - 2"));
        assert!(!satisfies("3.0.0", "1.0.0 - 2"));
        assert!(satisfies("2.3.9", "1 - 2.3"));
        assert!(!satisfies("2.4.0", "1 - 2.3"));
        assert!(!satisfies("0.9.0", "1 - 2.3"));
    }

    #[test]
    fn test_space_separated_comparators() {
        assert!(satisfies("2.5.0", ">= 2.1.2 < 3.0.0"));
        assert!(satisfies("2.1.2", ">=2.1.2 <3.0.0"));
        assert!(!satisfies("3.0.0", ">= 2.1.2 < 3.0.0"));
        assert!(!satisfies("2.1.1", ">= 2.1.2 < 3.0.0"));
    }

    #[test]
    fn test_partial_comparators() {
        assert!(satisfies("1.3.0", ">1.2"));
        assert!(!satisfies("1.2.9", ">1.2"));
        assert!(satisfies("1.2.9", "<=1.2"));
        assert!(!satisfies("1.3.0", "<=1.2"));
        assert!(satisfies("1.2.3", "=v1.2.3"));
    }

    #[test]
    fn test_invalid_ranges() {
        for range in ["not-a-range!!!", "latest", "1.2.3.4", "git+ssh://x", ">=abc"] {
            assert!(!is_valid_range(range), "{range} should be invalid");
        }
        for range in ["1.0.0", "~1.0.0", "x", "*", "", "^1.2.3-beta.2", "1.2.3+build"] {
            assert!(is_valid_range(range), "{range} should be valid");
        }
    }

    #[test]
    fn test_max_satisfying_is_maximal_element() {
        let versions = [
            "0.1.0", "0.9.9", "1.0.0", "1.2.3", "1.10.0", "1.9.0", "2.0.0-rc.1", "2.0.0", "junk",
        ];
        let ranges = [
            "*", "^1.0.0", "~1.2.0", ">=0.5.0 <1.5.0", "1.x || 2", "<0.1.0", "^0.9.0", "=2.0.0",
        ];

        for range in ranges {
            let parsed = Range::parse(range).unwrap();
            let satisfying: Vec<Version> = versions
                .iter()
                .filter_map(|v| parse_version(v))
                .filter(|v| parsed.matches(v))
                .collect();

            match max_satisfying(versions, range) {
                None => assert!(satisfying.is_empty(), "{range}: missed a candidate"),
                Some(best) => {
                    assert!(parsed.matches(&best));
                    assert!(versions.contains(&best.to_string().as_str()));
                    assert!(satisfying.iter().all(|v| v <= &best), "{range}: not maximal");
                }
            }
        }
    }
}
