//! Per-site content selectors for German news pages.
//!
//! Each site gets the CSS selectors that isolate its article body, tried in
//! order. Unknown domains fall back to the generic `article`/`main`/body
//! chain. Selectors drift as sites redesign; keeping them in one table makes
//! the fixups cheap.

/// Content selectors for one site, most specific first.
pub(crate) struct SiteSelectors {
    /// Domain suffix the rule applies to.
    pub domain: &'static str,
    /// Candidate selectors for the article body.
    pub content: &'static [&'static str],
}

pub(crate) const SITE_SELECTORS: &[SiteSelectors] = &[
    SiteSelectors {
        domain: "tagesschau.de",
        content: &["article.container__content", "div.copytext", "article"],
    },
    SiteSelectors {
        domain: "dw.com",
        content: &["div.rich-text", "div.longText", "article"],
    },
    SiteSelectors {
        domain: "nachrichtenleicht.de",
        content: &["div.article-content", "section.b-teaser-text", "article"],
    },
    SiteSelectors {
        domain: "spiegel.de",
        content: &["div[data-article-body]", "div.RichText", "article"],
    },
    SiteSelectors {
        domain: "sueddeutsche.de",
        content: &["div.sz-article-body", "section#article-body", "article"],
    },
    SiteSelectors {
        domain: "t3n.de",
        content: &["div.c-entry__content", "article"],
    },
    SiteSelectors {
        domain: "geo.de",
        content: &["div.article-body", "article"],
    },
];

/// Selector chain used when no site rule matches.
pub(crate) const GENERIC_SELECTORS: &[&str] = &["article", "main", "div[role=main]", "body"];

/// Find the selector list for a domain, if a site rule exists.
pub(crate) fn selectors_for(domain: &str) -> &'static [&'static str] {
    SITE_SELECTORS
        .iter()
        .find(|site| domain == site.domain || domain.ends_with(&format!(".{}", site.domain)))
        .map(|site| site.content)
        .unwrap_or(GENERIC_SELECTORS)
}
