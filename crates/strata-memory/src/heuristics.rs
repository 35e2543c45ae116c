//! Deterministic fallbacks used when no [`Summarizer`][crate::Summarizer] is
//! configured or a provider call fails.

use std::collections::{BTreeSet, HashMap};

use strata_types::{ChunkSummary, Role, Turn};

const TURN_SNIPPET_CHARS: usize = 80;
const SUMMARY_MAX_CHARS: usize = 400;
const CHILD_SUMMARY_CHARS: usize = 200;
const EMBED_TEXT_CHARS: usize = 500;
const MAX_FACTS: usize = 5;
const MAX_THEMES: usize = 5;

const FACT_OPENERS: [&str; 9] = [
    "i am ", "i'm ", "my ", "i like ", "i prefer ", "i work ", "i live ", "i need ", "we ",
];

const STOPWORDS: [&str; 16] = [
    "about", "after", "again", "assistant", "because", "before", "could", "other", "should",
    "their", "there", "these", "thing", "which", "would", "user",
];

/// Cut `text` to at most `max` characters on a char boundary.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// `role: snippet` for each turn, joined and capped.
pub fn summarize_turns(turns: &[Turn]) -> String {
    let joined = turns
        .iter()
        .filter(|t| !t.content.trim().is_empty())
        .map(|t| {
            let flat = t.content.split_whitespace().collect::<Vec<_>>().join(" ");
            format!("{}: {}", t.role, truncate_chars(&flat, TURN_SNIPPET_CHARS))
        })
        .collect::<Vec<_>>()
        .join("; ");
    truncate_chars(&joined, SUMMARY_MAX_CHARS).to_string()
}

/// Concatenate truncated child summaries.
pub fn merge_summaries(summaries: &[String]) -> String {
    summaries
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| truncate_chars(s, CHILD_SUMMARY_CHARS))
        .collect::<Vec<_>>()
        .join(" | ")
}

/// First-person statements from user turns.
pub fn extract_facts(turns: &[Turn]) -> BTreeSet<String> {
    turns
        .iter()
        .filter(|t| t.role == Role::User)
        .flat_map(|t| t.content.split(['.', '!', '?', '\n']))
        .map(str::trim)
        .filter(|s| (8..=200).contains(&s.len()))
        .filter(|s| {
            let lower = s.to_lowercase();
            FACT_OPENERS.iter().any(|o| lower.starts_with(o))
        })
        .take(MAX_FACTS)
        .map(str::to_string)
        .collect()
}

/// Most frequent long words across chunk summaries.
pub fn extract_themes(chunks: &[ChunkSummary]) -> BTreeSet<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for chunk in chunks {
        for word in chunk.summary.split(|c: char| !c.is_alphanumeric()) {
            let word = word.to_lowercase();
            if word.chars().count() >= 5 && !STOPWORDS.contains(&word.as_str()) {
                *counts.entry(word).or_default() += 1;
            }
        }
    }
    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.into_iter().take(MAX_THEMES).map(|(w, _)| w).collect()
}

/// Plain text used for embedding a chunk that has no summary yet.
pub fn turns_to_text(turns: &[Turn]) -> String {
    turns
        .iter()
        .map(|t| format!("{}: {}", t.role, truncate_chars(&t.content, EMBED_TEXT_CHARS)))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_types::{ChunkType, TurnRange};

    fn summary(text: &str) -> ChunkSummary {
        ChunkSummary {
            chunk_id: "c".into(),
            chunk_type: ChunkType::Micro,
            turn_range: TurnRange::new(0, 1),
            summary: text.into(),
            themes: BTreeSet::new(),
            token_count: 0,
            embedding: None,
        }
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 10), "hi");
    }

    #[test]
    fn summarize_skips_empty_turns_and_caps_length() {
        let turns = vec![
            Turn::new(Role::User, "  "),
            Turn::new(Role::User, "How do I\nbake bread?"),
            Turn::new(Role::Assistant, "x".repeat(500)),
        ];
        let s = summarize_turns(&turns);
        assert!(s.starts_with("user: How do I bake bread?; assistant: "));
        assert!(s.chars().count() <= SUMMARY_MAX_CHARS);
    }

    #[test]
    fn merge_joins_truncated_non_empty_summaries() {
        let merged = merge_summaries(&["first".into(), "".into(), "y".repeat(300)]);
        assert_eq!(merged, format!("first | {}", "y".repeat(CHILD_SUMMARY_CHARS)));
    }

    #[test]
    fn facts_come_from_first_person_user_statements() {
        let turns = vec![
            Turn::new(Role::User, "Hello there. My name is Ada. I prefer tea over coffee!"),
            Turn::new(Role::Assistant, "My pleasure to help."),
        ];
        let facts = extract_facts(&turns);
        assert!(facts.contains("My name is Ada"));
        assert!(facts.contains("I prefer tea over coffee"));
        assert_eq!(facts.len(), 2);
    }

    #[test]
    fn themes_rank_by_frequency() {
        let chunks = vec![
            summary("bread baking and bread flour"),
            summary("sourdough bread starter"),
            summary("user asked about flour"),
        ];
        let themes = extract_themes(&chunks);
        assert!(themes.contains("bread"));
        assert!(themes.contains("flour"));
        assert!(!themes.contains("user"));
        assert!(!themes.contains("and"));
    }
}
