use super::{parse, MatchOp, PromqlError, VectorSelector};

/// Guardrail names as accepted by `--guardrails` and the config file.
pub const DISALLOW_EXPLICIT_NAME_LABEL: &str = "disallow-explicit-name-label";
pub const REQUIRE_LABEL_MATCHER: &str = "require-label-matcher";
pub const DISALLOW_BLANKET_REGEX: &str = "disallow-blanket-regex";

const NAME_LABEL: &str = "__name__";

/// Safety checks applied to every query before it reaches the backend.
///
/// Each rule can be toggled independently; the default enables all of
/// them. A query is checked by parsing it and inspecting every vector
/// selector, so a syntactically invalid query is rejected outright.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Guardrails {
    /// Reject selectors that address a metric only via `{__name__="..."}`.
    pub disallow_explicit_name_label: bool,
    /// Every selector must carry at least one non-name label matcher.
    pub require_label_matcher: bool,
    /// Reject `=~`/`!~` matchers whose pattern is `.*` or `.+`.
    pub disallow_blanket_regex: bool,
}

impl Default for Guardrails {
    fn default() -> Self {
        Self {
            disallow_explicit_name_label: true,
            require_label_matcher: true,
            disallow_blanket_regex: true,
        }
    }
}

impl Guardrails {
    /// Parse a guardrails spec: `all` (or empty) enables every rule,
    /// `none` disables checking entirely, otherwise a comma-separated
    /// list of rule names enables just those rules.
    pub fn parse(value: &str) -> Result<Option<Self>, PromqlError> {
        match value.trim().to_lowercase().as_str() {
            "none" => Ok(None),
            "" | "all" => Ok(Some(Self::default())),
            other => {
                let mut guardrails = Self {
                    disallow_explicit_name_label: false,
                    require_label_matcher: false,
                    disallow_blanket_regex: false,
                };

                for name in other.split(',') {
                    match name.trim() {
                        "" => continue,
                        DISALLOW_EXPLICIT_NAME_LABEL => {
                            guardrails.disallow_explicit_name_label = true;
                        }
                        REQUIRE_LABEL_MATCHER => {
                            guardrails.require_label_matcher = true;
                        }
                        DISALLOW_BLANKET_REGEX => {
                            guardrails.disallow_blanket_regex = true;
                        }
                        unknown => {
                            return Err(PromqlError::UnknownGuardrail(unknown.to_string()));
                        }
                    }
                }

                Ok(Some(guardrails))
            }
        }
    }

    /// Check a query against the enabled rules.
    pub fn check(&self, query: &str) -> Result<(), PromqlError> {
        let expr = parse(query)?;
        for selector in expr.selectors() {
            self.check_selector(selector)?;
        }
        Ok(())
    }

    fn check_selector(&self, selector: &VectorSelector) -> Result<(), PromqlError> {
        let mut has_non_name_matcher = false;

        for matcher in &selector.matchers {
            if self.disallow_explicit_name_label
                && matcher.name == NAME_LABEL
                && selector.name.is_none()
            {
                return Err(PromqlError::Unsafe(DISALLOW_EXPLICIT_NAME_LABEL));
            }

            if matcher.name != NAME_LABEL {
                has_non_name_matcher = true;
            }

            if self.disallow_blanket_regex
                && matches!(matcher.op, MatchOp::Regex | MatchOp::NotRegex)
                && (matcher.value == ".*" || matcher.value == ".+")
            {
                return Err(PromqlError::Unsafe(DISALLOW_BLANKET_REGEX));
            }
        }

        if self.require_label_matcher && !has_non_name_matcher {
            return Err(PromqlError::Unsafe(REQUIRE_LABEL_MATCHER));
        }

        Ok(())
    }
}
