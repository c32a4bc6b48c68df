//! Method and route restrictions
//!
//! Resources may limit themselves to certain HTTP methods and route
//! patterns; a resource failing its restrictions is skipped silently.
//! The `*` glob used for routes is shared with the filesystem
//! accessor: a star matches any run of non-slash characters, except a
//! sole trailing `*` segment, which matches any suffix.

use crate::context::RequestContext;
use crate::workflow::RunSpec;

/// Whether a resource's restrictions admit the live request.
/// Empty restriction lists admit everything; restrictions with no
/// request to check against admit nothing.
pub fn matches_restrictions(run: &RunSpec, request: Option<&RequestContext>) -> bool {
    if run.restrict_to_http_methods.is_empty() && run.restrict_to_routes.is_empty() {
        return true;
    }
    let Some(request) = request else {
        return false;
    };

    if !run.restrict_to_http_methods.is_empty()
        && !run
            .restrict_to_http_methods
            .iter()
            .any(|m| m.eq_ignore_ascii_case(&request.method))
    {
        return false;
    }

    if !run.restrict_to_routes.is_empty()
        && !run
            .restrict_to_routes
            .iter()
            .any(|pattern| glob_match(pattern, &request.path))
    {
        return false;
    }

    true
}

/// Glob match over slash-separated paths. `*` matches within one
/// segment; a sole trailing `*` segment matches any remaining suffix.
pub fn glob_match(pattern: &str, path: &str) -> bool {
    let pattern = pattern.trim_matches('/');
    let path = path.trim_matches('/');
    let pattern_segments: Vec<&str> = if pattern.is_empty() {
        Vec::new()
    } else {
        pattern.split('/').collect()
    };
    let path_segments: Vec<&str> = if path.is_empty() {
        Vec::new()
    } else {
        path.split('/').collect()
    };

    let trailing_any = pattern_segments.last() == Some(&"*");
    let fixed = if trailing_any {
        &pattern_segments[..pattern_segments.len() - 1]
    } else {
        &pattern_segments[..]
    };

    if trailing_any {
        if path_segments.len() < fixed.len() {
            return false;
        }
    } else if path_segments.len() != fixed.len() {
        return false;
    }

    fixed
        .iter()
        .zip(path_segments.iter())
        .all(|(pat, seg)| segment_match(pat, seg))
}

/// Wildcard match within a single segment; `*` matches any run of
/// characters (none of which can be a slash, segments are slash-free)
fn segment_match(pattern: &str, segment: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let s: Vec<char> = segment.chars().collect();
    let (mut pi, mut si) = (0usize, 0usize);
    let (mut star, mut mark) = (None::<usize>, 0usize);

    while si < s.len() {
        if pi < p.len() && (p[pi] == s[si] || p[pi] == '?') {
            pi += 1;
            si += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            mark = si;
            pi += 1;
        } else if let Some(sp) = star {
            pi = sp + 1;
            mark += 1;
            si = mark;
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::RunSpec;

    #[test]
    fn star_matches_within_a_segment() {
        assert!(glob_match("/api/*/status", "/api/v1/status"));
        assert!(!glob_match("/api/*/status", "/api/v1/extra/status"));
        assert!(glob_match("*.txt", "notes.txt"));
        assert!(!glob_match("*.txt", "dir/notes.txt"));
    }

    #[test]
    fn sole_trailing_star_matches_any_suffix() {
        assert!(glob_match("/api/*", "/api/v1/users/7"));
        assert!(glob_match("/api/*", "/api"));
        assert!(glob_match("*", "/anything/at/all"));
        assert!(!glob_match("/api/*", "/other/v1"));
    }

    #[test]
    fn exact_routes_still_match() {
        assert!(glob_match("/health", "/health"));
        assert!(!glob_match("/health", "/healthz"));
    }

    #[test]
    fn restrictions_admit_matching_requests_only() {
        let run = RunSpec {
            restrict_to_http_methods: vec!["POST".to_string()],
            restrict_to_routes: vec!["/api/v1/*".to_string()],
            ..Default::default()
        };

        let post = RequestContext::new("post", "/api/v1/items");
        assert!(matches_restrictions(&run, Some(&post)));

        let get = RequestContext::new("GET", "/api/v1/items");
        assert!(!matches_restrictions(&run, Some(&get)));

        let wrong_route = RequestContext::new("POST", "/internal/items");
        assert!(!matches_restrictions(&run, Some(&wrong_route)));

        assert!(!matches_restrictions(&run, None));
    }

    #[test]
    fn unrestricted_resources_admit_anything() {
        let run = RunSpec::default();
        assert!(matches_restrictions(&run, None));
        let req = RequestContext::new("DELETE", "/x");
        assert!(matches_restrictions(&run, Some(&req)));
    }

    #[test]
    fn restriction_decision_is_idempotent() {
        let run = RunSpec {
            restrict_to_http_methods: vec!["GET".to_string()],
            ..Default::default()
        };
        let req = RequestContext::new("GET", "/");
        let first = matches_restrictions(&run, Some(&req));
        for _ in 0..3 {
            assert_eq!(matches_restrictions(&run, Some(&req)), first);
        }
    }
}
