//! Article content extraction: HTML page → clean Markdown text.
//!
//! Feed entries usually carry only a teaser. This crate pulls the full
//! article body out of the fetched page using per-site CSS selectors (with a
//! generic fallback), converts it to Markdown via `htmd`, and runs cleanup
//! passes that strip the boilerplate news pages leak into their bodies.

mod cleanup;
mod sites;

use scraper::{Html, Selector};
use tracing::{debug, instrument};

use feedharvest_shared::{FeedHarvestError, Result};

/// Minimum plausible article body length, in characters. Anything shorter is
/// a teaser, paywall stub, or extraction miss.
pub const MIN_CONTENT_CHARS: usize = 300;

/// Result of extracting an article body from a page.
#[derive(Debug, Clone)]
pub struct ExtractedArticle {
    /// Cleaned Markdown body.
    pub content: String,
    /// Title from the page's H1, when present.
    pub title: Option<String>,
    /// Approximate word count of the body.
    pub word_count: usize,
    /// The selector that matched, for extraction debugging.
    pub matched_selector: String,
}

/// Extract the article body from a fetched page.
///
/// `source_domain` routes to the site's selector table. Returns an error when
/// no selector yields a plausible body — callers treat that as a permanent
/// per-item failure (the page layout is not one we can read).
#[instrument(skip(html), fields(domain = %source_domain))]
pub fn extract_article(html: &str, source_domain: &str) -> Result<ExtractedArticle> {
    let doc = Html::parse_document(html);

    let title = {
        let h1_sel = Selector::parse("h1").expect("static selector");
        doc.select(&h1_sel)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .filter(|t| !t.is_empty())
    };

    for selector_str in sites::selectors_for(source_domain) {
        let Ok(selector) = Selector::parse(selector_str) else {
            continue;
        };
        let Some(element) = doc.select(&selector).next() else {
            continue;
        };

        let content_html = element.html();
        let markdown = convert_to_markdown(&content_html)?;
        let cleaned = cleanup::run_pipeline(&markdown);

        if cleaned.chars().count() >= MIN_CONTENT_CHARS {
            let word_count = cleaned.split_whitespace().count();
            debug!(
                selector = selector_str,
                chars = cleaned.len(),
                word_count,
                "article body extracted"
            );
            return Ok(ExtractedArticle {
                content: cleaned,
                title,
                word_count,
                matched_selector: selector_str.to_string(),
            });
        }

        debug!(
            selector = selector_str,
            chars = cleaned.chars().count(),
            "selector matched but body too short, trying next"
        );
    }

    Err(FeedHarvestError::Extraction(format!(
        "no selector produced at least {MIN_CONTENT_CHARS} chars for {source_domain}"
    )))
}

/// Convert extracted HTML to Markdown.
fn convert_to_markdown(content_html: &str) -> Result<String> {
    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(vec![
            "script", "style", "nav", "iframe", "noscript", "svg", "figure", "aside",
        ])
        .build();

    converter
        .convert(content_html)
        .map_err(|e| FeedHarvestError::Extraction(format!("htmd conversion failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paragraphs(n: usize) -> String {
        (0..n)
            .map(|i| {
                format!(
                    "<p>Absatz {i}: Der Bundestag hat heute über den Haushalt beraten und \
                     dabei zahlreiche Änderungsanträge der Opposition diskutiert.</p>"
                )
            })
            .collect()
    }

    #[test]
    fn extracts_from_known_site_selector() {
        let html = format!(
            r#"<html><body>
                <nav><a href="/">Startseite</a></nav>
                <h1>Haushaltsdebatte im Bundestag</h1>
                <article class="container__content">{}</article>
                <footer>Impressum</footer>
            </body></html>"#,
            paragraphs(6)
        );

        let result = extract_article(&html, "www.tagesschau.de").expect("extract");
        assert_eq!(result.matched_selector, "article.container__content");
        assert_eq!(result.title.as_deref(), Some("Haushaltsdebatte im Bundestag"));
        assert!(result.content.contains("Absatz 0"));
        assert!(result.word_count > 50);
        assert!(!result.content.contains("Impressum"));
    }

    #[test]
    fn falls_back_to_generic_selectors() {
        let html = format!(
            r#"<html><body><main>{}</main></body></html>"#,
            paragraphs(6)
        );
        let result = extract_article(&html, "blog.example.com").expect("extract");
        assert_eq!(result.matched_selector, "main");
    }

    #[test]
    fn short_bodies_are_an_extraction_error() {
        let html = r#"<html><body><article><p>Zu kurz.</p></article></body></html>"#;
        let err = extract_article(html, "www.tagesschau.de").unwrap_err();
        assert!(err.to_string().contains("no selector"));
    }

    #[test]
    fn boilerplate_is_cleaned_from_the_body() {
        let html = format!(
            r#"<html><body><article>{}<p>Lesen Sie auch: Zehn Tipps</p><p>Quelle: dpa</p></article></body></html>"#,
            paragraphs(6)
        );
        let result = extract_article(&html, "unknown.example").expect("extract");
        assert!(!result.content.contains("Lesen Sie auch"));
        assert!(!result.content.contains("Quelle: dpa"));
    }
}
