//! Domain rule matching.
//!
//! Exact rules block the domain itself and every name below it, so
//! `tiktok.com` covers `www.tiktok.com` and `cdn.tiktok.com` but neither
//! `nottiktok.com` nor `tiktok.com.evil.net`. Regex rules are searched
//! (unanchored) in the whole normalized hostname.
//!
//! Exact rules win over regex rules; within one kind the earliest rule in
//! insertion order is reported.

use std::collections::HashMap;

use hickory_proto::rr::Name;
use regex::Regex;

use crate::store::{DomainRule, RuleId, RuleKind};

/// Why a request was blocked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockReason {
    /// A domain rule matched.
    Rule(RuleId),
    /// Fail-closed policy: the traffic could not be attributed to a tenant.
    Policy,
}

/// Outcome of evaluating a hostname for a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    Blocked(BlockReason),
}

impl Verdict {
    #[inline]
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked(_))
    }

    /// Id of the rule that caused the block, if any.
    pub fn rule_id(&self) -> Option<&str> {
        match self {
            Self::Blocked(BlockReason::Rule(id)) => Some(id),
            _ => None,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Allowed => "allowed",
            Self::Blocked(_) => "blocked",
        }
    }
}

/// Lowercase a hostname and strip a single trailing dot.
///
/// `www.` is deliberately kept: `www.example.com` and `example.com` are
/// different hosts as far as regex rules are concerned.
pub fn normalize_host(host: &str) -> String {
    let host = host.strip_suffix('.').unwrap_or(host);
    host.to_ascii_lowercase()
}

/// Punycode form of an internationalized domain; ASCII input is returned
/// as is. Names IDNA rejects are kept unchanged and simply never match.
fn to_ascii_domain(domain: &str) -> String {
    if domain.is_ascii() {
        return domain.to_string();
    }
    Name::from_utf8(domain).map_or_else(|_| domain.to_string(), |name| name.to_ascii())
}

/// A rule ready for matching.
#[derive(Debug, Clone)]
pub enum CompiledRule {
    Exact { id: RuleId, domain: String },
    Regex { id: RuleId, regex: Regex },
}

impl CompiledRule {
    /// Compile a stored rule.
    ///
    /// # Errors
    ///
    /// Returns the regex error for an invalid pattern.
    pub fn compile(rule: &DomainRule) -> Result<Self, regex::Error> {
        match rule.kind {
            RuleKind::Exact => {
                let domain = normalize_host(&to_ascii_domain(rule.domain.trim()));
                let domain = domain
                    .strip_prefix("*.")
                    .map(str::to_string)
                    .unwrap_or(domain);
                Ok(Self::Exact {
                    id: rule.id.clone(),
                    domain,
                })
            }
            RuleKind::Regex => Ok(Self::Regex {
                id: rule.id.clone(),
                regex: Regex::new(&rule.domain)?,
            }),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Exact { id, .. } | Self::Regex { id, .. } => id,
        }
    }
}

/// Rules compiled for lookup: a domain index for exact rules and the regex
/// rules in insertion order.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    /// Domain -> (insertion position, rule id). The first rule for a domain wins.
    exact: HashMap<String, (usize, RuleId)>,
    regexes: Vec<(RuleId, Regex)>,
    inserted: usize,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a compiled rule after every rule already present.
    pub fn push(&mut self, rule: CompiledRule) {
        let position = self.inserted;
        self.inserted += 1;
        match rule {
            CompiledRule::Exact { id, domain } => {
                if domain.is_empty() {
                    tracing::warn!(rule = %id, "ignoring exact rule with empty domain");
                    return;
                }
                self.exact.entry(domain).or_insert((position, id));
            }
            CompiledRule::Regex { id, regex } => self.regexes.push((id, regex)),
        }
    }

    /// Number of distinct exact domains plus regex rules.
    #[inline]
    pub fn len(&self) -> usize {
        self.exact.len() + self.regexes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.regexes.is_empty()
    }

    /// Find the rule blocking `host`, which must already be normalized.
    pub fn find(&self, host: &str) -> Option<&str> {
        self.find_exact(host).or_else(|| self.find_regex(host))
    }

    /// Evaluate a normalized hostname.
    pub fn evaluate(&self, host: &str) -> Verdict {
        match self.find(host) {
            Some(id) => Verdict::Blocked(BlockReason::Rule(id.to_string())),
            None => Verdict::Allowed,
        }
    }

    fn find_exact(&self, host: &str) -> Option<&str> {
        if self.exact.is_empty() || host.is_empty() {
            return None;
        }

        // Walk the host and each of its parent domains: a.b.c, b.c, c.
        let mut best: Option<&(usize, RuleId)> = self.exact.get(host);
        let mut rest = host;
        while let Some(dot) = rest.find('.') {
            rest = &rest[dot + 1..];
            if rest.is_empty() {
                break;
            }
            if let Some(hit) = self.exact.get(rest)
                && best.is_none_or(|(pos, _)| hit.0 < *pos)
            {
                best = Some(hit);
            }
        }

        best.map(|(_, id)| id.as_str())
    }

    fn find_regex(&self, host: &str) -> Option<&str> {
        self.regexes
            .iter()
            .find(|(_, regex)| regex.is_match(host))
            .map(|(id, _)| id.as_str())
    }
}
