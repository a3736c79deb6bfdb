//! Post-conversion cleanup passes for extracted article Markdown.
//!
//! Each pass is a function `&str -> String` applied in sequence. The passes
//! remove the boilerplate lines news pages leak into their article bodies and
//! normalize whitespace; they never touch the article's language itself.

use std::sync::LazyLock;

use regex::Regex;

/// Run the full cleanup pipeline on converted Markdown.
pub(crate) fn run_pipeline(md: &str) -> String {
    let mut result = md.to_string();

    result = drop_boilerplate_lines(&result);
    result = strip_stray_images(&result);
    result = collapse_blank_lines(&result);
    result = normalize_whitespace(&result);
    result = ensure_trailing_newline(&result);

    result
}

// ---------------------------------------------------------------------------
// Pass 1: Boilerplate lines
// ---------------------------------------------------------------------------

/// Lines that are navigation, sharing, or legal boilerplate rather than
/// article text.
static BOILERPLATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)^\s*(?:",
        r"startseite|menü|suche|",
        r"teilen|drucken|merken|",
        r"folgen sie uns.*|newsletter.*abonnieren.*|",
        r"lesen sie (?:auch|mehr).*|das könnte sie.*interessieren.*|",
        r"mehr zum thema.*|weitere artikel.*|",
        r"quelle:\s.*|mit material von.*|",
        r"©.*rechte vorbehalten.*|copyright.*",
        r")\s*$"
    ))
    .expect("valid regex")
});

fn drop_boilerplate_lines(md: &str) -> String {
    md.lines()
        .filter(|line| !BOILERPLATE_RE.is_match(line))
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Pass 2: Images
// ---------------------------------------------------------------------------

/// Remove image references; stored articles are text-only.
fn strip_stray_images(md: &str) -> String {
    static IMAGE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"!\[[^\]]*\]\([^)]*\)").expect("valid regex"));
    IMAGE_RE.replace_all(md, "").to_string()
}

// ---------------------------------------------------------------------------
// Pass 3: Blank lines
// ---------------------------------------------------------------------------

/// Collapse runs of 3+ newlines into a paragraph break.
fn collapse_blank_lines(md: &str) -> String {
    static MULTI_BLANK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));
    MULTI_BLANK_RE.replace_all(md, "\n\n").to_string()
}

// ---------------------------------------------------------------------------
// Pass 4: Whitespace
// ---------------------------------------------------------------------------

/// Trim trailing spaces and collapse runs of spaces/tabs inside lines.
fn normalize_whitespace(md: &str) -> String {
    static MULTI_SPACE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"[ \t]{2,}").expect("valid regex"));

    md.lines()
        .map(|line| MULTI_SPACE_RE.replace_all(line.trim_end(), " ").to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

fn ensure_trailing_newline(md: &str) -> String {
    let trimmed = md.trim_start_matches('\n');
    if trimmed.ends_with('\n') {
        trimmed.to_string()
    } else {
        format!("{trimmed}\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boilerplate_lines_are_dropped() {
        let md = "Der Artikeltext bleibt.\n\nLesen Sie auch: Mehr zum Wetter\nQuelle: dpa\n\nEin zweiter Absatz.";
        let cleaned = run_pipeline(md);
        assert!(cleaned.contains("Der Artikeltext bleibt."));
        assert!(cleaned.contains("Ein zweiter Absatz."));
        assert!(!cleaned.contains("Lesen Sie auch"));
        assert!(!cleaned.contains("Quelle: dpa"));
    }

    #[test]
    fn images_are_removed() {
        let md = "Text davor. ![Bildunterschrift](https://example.com/b.jpg) Text danach.";
        let cleaned = run_pipeline(md);
        assert!(!cleaned.contains("!["));
        assert!(cleaned.contains("Text davor."));
        assert!(cleaned.contains("Text danach."));
    }

    #[test]
    fn blank_lines_collapse() {
        let md = "Absatz eins.\n\n\n\n\nAbsatz zwei.";
        let cleaned = run_pipeline(md);
        assert_eq!(cleaned, "Absatz eins.\n\nAbsatz zwei.\n");
    }

    #[test]
    fn inner_whitespace_is_normalized() {
        let md = "Museum   Louvre  ist\tgeöffnet.";
        let cleaned = run_pipeline(md);
        assert_eq!(cleaned, "Museum Louvre ist geöffnet.\n");
    }

    #[test]
    fn german_text_is_untouched() {
        let md = "Der Bundestag hat das Gesetz verabschiedet. Die Opposition kritisierte den Entwurf scharf.";
        let cleaned = run_pipeline(md);
        assert_eq!(cleaned.trim_end(), md);
    }
}
