//! Prompt construction for the generative-text stages.
//!
//! Prompts are replaceable leaf detail: the stages only depend on the JSON
//! shapes these ask for. Content is truncated before interpolation to keep
//! token usage bounded.

/// Character budgets per stage, matching the model's context economics.
const ANALYZE_CONTENT_CHARS: usize = 4000;
const CLEAN_CONTENT_CHARS: usize = 8000;
const ENHANCE_CONTENT_CHARS: usize = 6000;

/// System message for the CEFR analysis stage.
pub const ANALYZE_SYSTEM: &str = "You are a German language expert specializing in CEFR level \
assessment and language learning. Provide accurate, structured analysis.";

/// System message for the content cleaning stage.
pub const CLEAN_SYSTEM: &str = "You are a professional content editor preparing German news \
articles for language learners. You remove boilerplate and fix formatting without changing \
the language itself.";

/// System message for the learning enhancement stage.
pub const ENHANCE_SYSTEM: &str = "You are an experienced German language teacher preparing \
authentic German articles for intermediate (B1-B2) learners.";

/// Analysis prompt: CEFR level, topics, vocabulary, grammar patterns.
pub fn analyze_prompt(title: &str, content: &str) -> String {
    let content = truncate_chars(content, ANALYZE_CONTENT_CHARS);
    format!(
        r#"Analyze this German article for language learning purposes. Provide a structured JSON response.

Article Title: {title}

Article Content:
{content}

Provide analysis in this exact JSON format:
{{
  "language_level": "A1|A2|B1|B2|C1|C2",
  "topics": ["topic1", "topic2"],
  "vocabulary": [
    {{"word": "example", "artikel": "der|die|das", "english": "translation", "plural": "plural_form"}}
  ],
  "grammar_patterns": ["Pattern 1: Brief explanation"]
}}

Guidelines:
1. Language Level (CEFR): assess vocabulary complexity, sentence structure, and topic sophistication.
2. Topics: identify 2-4 main topics (e.g., "politics", "technology", "health").
3. Vocabulary: extract 5-15 important topic-related words with artikel, English translation, and plural form (artikel/plural null for non-nouns).
4. Grammar Patterns: identify 2-4 key grammar structures worth learning.

Return ONLY the JSON, no additional text."#
    )
}

/// Cleaning prompt: strip boilerplate, preserve the article's language.
pub fn clean_prompt(title: &str, topics: &[String], language_level: &str, content: &str) -> String {
    let content = truncate_chars(content, CLEAN_CONTENT_CHARS);
    let topics = if topics.is_empty() {
        "general".to_string()
    } else {
        topics.join(", ")
    };
    format!(
        r#"Clean this German news article for language learners at {language_level} level.

Article Title: {title}
Main Topics: {topics}

Original Content:
{content}

Remove completely: HTML artifacts, navigation elements, author bylines, social media prompts, article recommendations ("Lesen Sie auch", "Das könnte Sie interessieren"), related teasers, copyright notices, advertisements, non-German text, repeated paragraphs, off-topic tangents, and trailing source citations ("Quelle: dpa").

Fix: merged words (missing spaces), excessive line breaks, excessive spacing, punctuation spacing, stray special characters; keep one blank line between paragraphs.

Preserve: all core information, original vocabulary and grammar, direct quotes, facts, dates, and numbers. Do NOT simplify, summarize, translate, or add content. If unsure whether something is core, keep it.

Return ONLY the cleaned article text, no commentary."#
    )
}

/// Enhancement prompt: vocabulary, grammar, culture, comprehension questions.
pub fn enhance_prompt(title: &str, theme: &str, content: &str) -> String {
    let content = truncate_chars(content, ENHANCE_CONTENT_CHARS);
    format!(
        r#"Analyze this German article and create educational enhancements for B1-B2 learners.

IMPORTANT RULES:
- DO NOT modify, simplify, or translate the original article text.
- Focus on B1-B2 level vocabulary and grammar.
- Output ONLY valid JSON (no markdown, no explanations).

Article Information:
Title: {title}
Theme: {theme}

Article Text:
{content}

Create:
1. VOCABULARY (10-15 words): key words for understanding the article. Avoid obvious cognates ("Computer") and basic A1-A2 words. For nouns include article and plural; show a context sentence from the article, an English translation, and a simple German explanation.
2. GRAMMAR PATTERNS (3-5): key structures with an example sentence from the text and a brief German explanation.
3. CULTURAL NOTES (2-3): German institutions, customs, or idioms referenced.
4. COMPREHENSION QUESTIONS (3-5): open-ended questions in German.
5. DIFFICULTY & READING TIME: CEFR estimate (B1, B2, or C1) and minutes for a B1-B2 learner.

Return ONLY this JSON structure:
{{
  "estimated_difficulty": "B1|B2|C1",
  "estimated_reading_time": 5,
  "key_vocabulary": [
    {{"word": "Bundestag", "article": "der", "plural": "die Bundestage", "context": "...", "english_translation": "...", "german_explanation": "...", "cefr_level": "B1"}}
  ],
  "grammar_patterns": [
    {{"pattern": "...", "example": "...", "explanation": "..."}}
  ],
  "cultural_notes": ["..."],
  "comprehension_questions": ["...?"]
}}"#
    )
}

/// Truncate to a character budget on a char boundary.
fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analysis_prompt_embeds_article() {
        let prompt = analyze_prompt("Titel", "Der Inhalt des Artikels.");
        assert!(prompt.contains("Titel"));
        assert!(prompt.contains("Der Inhalt des Artikels."));
        assert!(prompt.contains("language_level"));
    }

    #[test]
    fn content_is_truncated_to_budget() {
        let long = "ä".repeat(10_000);
        let prompt = analyze_prompt("T", &long);
        assert!(prompt.chars().filter(|c| *c == 'ä').count() <= 4000);
    }

    #[test]
    fn clean_prompt_defaults_topics() {
        let prompt = clean_prompt("T", &[], "B2", "Inhalt");
        assert!(prompt.contains("Main Topics: general"));
        assert!(prompt.contains("B2 level"));
    }
}
