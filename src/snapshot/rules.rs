//! Eligibility rules and client classification.

use axum::http::HeaderMap;
use regex::Regex;

const PDF_EXTENSION: &str = ".pdf";
const REQUESTED_WITH: &str = "x-requested-with";

/// Decides whether an un-suffixed path may be rendered.
pub trait RenderRules: Send + Sync {
    fn accepts(&self, path: &str) -> bool;
}

/// Detects clients that prefer a `Ready` notification over the PDF body.
pub trait ClientClassifier: Send + Sync {
    fn is_async(&self, headers: &HeaderMap) -> bool;
}

/// A request is a render candidate when its path ends in `.pdf` and the rules
/// accept the path without that suffix.
pub fn is_render_candidate(path: &str, rules: &dyn RenderRules) -> bool {
    match path.strip_suffix(PDF_EXTENSION) {
        Some(stripped) => rules.accepts(stripped),
        None => false,
    }
}

/// `only` / `except` regex lists.
///
/// When `only` is non-empty a path must match one of its patterns. Otherwise,
/// when `except` is non-empty, a path must match none of them. With both lists
/// empty every path is accepted.
#[derive(Debug, Clone, Default)]
pub struct PathConditions {
    only: Vec<Regex>,
    except: Vec<Regex>,
}

impl PathConditions {
    pub fn new(only: Vec<Regex>, except: Vec<Regex>) -> Self {
        Self { only, except }
    }

    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn from_patterns(only: &[String], except: &[String]) -> Result<Self, regex::Error> {
        let compile = |patterns: &[String]| {
            patterns
                .iter()
                .map(|pattern| Regex::new(pattern))
                .collect::<Result<Vec<_>, _>>()
        };
        Ok(Self::new(compile(only)?, compile(except)?))
    }
}

impl RenderRules for PathConditions {
    fn accepts(&self, path: &str) -> bool {
        if !self.only.is_empty() {
            self.only.iter().any(|pattern| pattern.is_match(path))
        } else if !self.except.is_empty() {
            !self.except.iter().any(|pattern| pattern.is_match(path))
        } else {
            true
        }
    }
}

/// Treats `X-Requested-With: XMLHttpRequest` as an async-aware client.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderClientClassifier;

impl ClientClassifier for HeaderClientClassifier {
    fn is_async(&self, headers: &HeaderMap) -> bool {
        headers
            .get(REQUESTED_WITH)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.eq_ignore_ascii_case("XMLHttpRequest"))
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn patterns(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn only_pdf_paths_are_candidates() {
        let rules = PathConditions::allow_all();
        assert!(is_render_candidate("/invoices/42.pdf", &rules));
        assert!(!is_render_candidate("/invoices/42", &rules));
        assert!(!is_render_candidate("/invoices/42.pdf/edit", &rules));
    }

    #[test]
    fn only_list_restricts_paths() {
        let rules =
            PathConditions::from_patterns(&patterns(&["^/invoices/"]), &[]).expect("valid");
        assert!(is_render_candidate("/invoices/42.pdf", &rules));
        assert!(!is_render_candidate("/admin/report.pdf", &rules));
    }

    #[test]
    fn except_list_excludes_paths() {
        let rules =
            PathConditions::from_patterns(&[], &patterns(&["^/admin", "secret$"])).expect("valid");
        assert!(is_render_candidate("/invoices/42.pdf", &rules));
        assert!(!is_render_candidate("/admin/report.pdf", &rules));
        assert!(!is_render_candidate("/docs/secret.pdf", &rules));
    }

    #[test]
    fn only_takes_precedence_over_except() {
        let rules = PathConditions::from_patterns(
            &patterns(&["^/admin"]),
            &patterns(&["^/admin"]),
        )
        .expect("valid");
        assert!(rules.accepts("/admin/report"));
    }

    #[test]
    fn rules_see_unsuffixed_path() {
        let rules = PathConditions::from_patterns(&patterns(&["/doc$"]), &[]).expect("valid");
        assert!(is_render_candidate("/doc.pdf", &rules));
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        assert!(PathConditions::from_patterns(&patterns(&["("]), &[]).is_err());
    }

    #[test]
    fn xhr_header_marks_async_client() {
        let classifier = HeaderClientClassifier;
        let mut headers = HeaderMap::new();
        assert!(!classifier.is_async(&headers));

        headers.insert(REQUESTED_WITH, HeaderValue::from_static("xmlhttprequest"));
        assert!(classifier.is_async(&headers));

        headers.insert(REQUESTED_WITH, HeaderValue::from_static("fetch"));
        assert!(!classifier.is_async(&headers));
    }
}
