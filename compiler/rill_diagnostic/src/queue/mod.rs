//! Diagnostic queue and dispatch report.
//!
//! The queue collects every non-fatal finding from a compilation run and
//! drops exact duplicates (both backends resolve the same call sites, so the
//! same fallback is usually reported twice). The dispatch report keeps the
//! dynamic-dispatch fallbacks in a form the driver can summarize.

use std::fmt::Write as _;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::{Diagnostic, Location, Severity};

/// Collected diagnostics, in first-report order.
#[derive(Default, Debug)]
pub struct DiagnosticQueue {
    diagnostics: Vec<Diagnostic>,
    seen: FxHashSet<Diagnostic>,
}

impl DiagnosticQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a diagnostic. Returns false when an identical one was already queued.
    pub fn push(&mut self, diagnostic: Diagnostic) -> bool {
        if self.seen.contains(&diagnostic) {
            return false;
        }
        self.seen.insert(diagnostic.clone());
        self.diagnostics.push(diagnostic);
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter()
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }

    /// Diagnostics sorted by severity, then location.
    pub fn sorted(&self) -> Vec<&Diagnostic> {
        let mut out: Vec<&Diagnostic> = self.diagnostics.iter().collect();
        out.sort_by(|a, b| {
            a.severity
                .cmp(&b.severity)
                .then_with(|| a.location.cmp(&b.location))
        });
        out
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.diagnostics
    }
}

/// One dynamic-dispatch fallback.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct DynamicSite {
    pub class: String,
    pub method: String,
    pub location: Location,
}

/// Every call site that fell back to dynamic dispatch.
#[derive(Default, Debug)]
pub struct DispatchReport {
    sites: Vec<DynamicSite>,
    seen: FxHashSet<DynamicSite>,
}

impl DispatchReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, site: DynamicSite) -> bool {
        if !self.seen.insert(site.clone()) {
            return false;
        }
        self.sites.push(site);
        true
    }

    pub fn sites(&self) -> &[DynamicSite] {
        &self.sites
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    /// Informational summary grouped by `(class, method)`, most frequent first.
    pub fn summary(&self) -> String {
        if self.sites.is_empty() {
            return String::from("all call sites dispatched statically\n");
        }
        let mut groups: FxHashMap<(&str, &str), Vec<&Location>> = FxHashMap::default();
        for site in &self.sites {
            groups
                .entry((site.class.as_str(), site.method.as_str()))
                .or_default()
                .push(&site.location);
        }
        let mut ordered: Vec<_> = groups.into_iter().collect();
        ordered.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then_with(|| a.0.cmp(&b.0)));

        let mut out = String::new();
        let _ = writeln!(
            out,
            "{} call site(s) use dynamic dispatch:",
            self.sites.len()
        );
        for ((class, method), locations) in ordered {
            let _ = writeln!(out, "  {class}#{method} ({} site(s))", locations.len());
            for location in locations {
                let _ = writeln!(out, "    at {location}");
            }
        }
        out
    }
}

#[cfg(test)]
mod tests;
