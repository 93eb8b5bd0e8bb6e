//! Detection of words that mix Latin and Cyrillic letters.

use crate::variation::REVERSE_SUBSTITUTIONS;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    Latin,
    Cyrillic,
}

pub fn script_of(c: char) -> Option<Script> {
    if !c.is_alphabetic() {
        return None;
    }
    match c {
        'A'..='Z' | 'a'..='z' | '\u{00C0}'..='\u{024F}' => Some(Script::Latin),
        '\u{0400}'..='\u{052F}' => Some(Script::Cyrillic),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MixedWord {
    pub word: String,
    pub latin: usize,
    pub cyrillic: usize,
}

fn words(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
}

fn tally(word: &str) -> (usize, usize) {
    word.chars()
        .fold((0, 0), |(latin, cyrillic), c| match script_of(c) {
            Some(Script::Latin) => (latin + 1, cyrillic),
            Some(Script::Cyrillic) => (latin, cyrillic + 1),
            None => (latin, cyrillic),
        })
}

pub fn mixed_words(text: &str) -> Vec<MixedWord> {
    words(text)
        .filter_map(|word| {
            let (latin, cyrillic) = tally(word);
            (latin > 0 && cyrillic > 0).then(|| MixedWord {
                word: word.to_owned(),
                latin,
                cyrillic,
            })
        })
        .collect()
}

fn normalize_word(word: &str, out: &mut String) {
    let (_, cyrillic) = tally(word);
    if cyrillic == 0 {
        out.push_str(word);
        return;
    }
    out.extend(word.chars().map(to_cyrillic));
}

fn to_cyrillic(c: char) -> char {
    REVERSE_SUBSTITUTIONS.get(&c).copied().unwrap_or(c)
}

/// Rewrites Latin look-alikes back to Cyrillic inside words that carry at
/// least one Cyrillic letter. Separators and purely Latin words are kept.
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut word_start = None;

    for (i, c) in text.char_indices() {
        if c.is_alphanumeric() {
            word_start.get_or_insert(i);
            continue;
        }
        if let Some(start) = word_start.take() {
            normalize_word(&text[start..i], &mut out);
        }
        out.push(c);
    }
    if let Some(start) = word_start {
        normalize_word(&text[start..], &mut out);
    }
    out
}

/// Maps every look-alike to its Cyrillic form regardless of context, so two
/// texts that render the same compare equal.
pub fn skeleton(text: &str) -> String {
    text.chars().map(to_cyrillic).collect()
}

pub fn is_variation_of(candidate: &str, template: &str) -> bool {
    skeleton(candidate) == skeleton(template)
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub mixed: Vec<MixedWord>,
    pub normalized: String,
}

pub fn check(text: &str) -> Report {
    Report {
        mixed: mixed_words(text),
        normalized: normalize(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variation::{generate, Limits};
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn classifies_scripts() {
        assert_eq!(script_of('a'), Some(Script::Latin));
        assert_eq!(script_of('é'), Some(Script::Latin));
        assert_eq!(script_of('ж'), Some(Script::Cyrillic));
        assert_eq!(script_of('7'), None);
        assert_eq!(script_of(' '), None);
    }

    #[test]
    fn finds_mixed_words() {
        // "пpивeт" carries a Latin p and e.
        let mixed = mixed_words("пpивeт, мир! hello");
        assert_eq!(
            mixed,
            vec![MixedWord {
                word: "пpивeт".into(),
                latin: 2,
                cyrillic: 4,
            }]
        );
        assert!(mixed_words("чистый текст").is_empty());
    }

    #[test]
    fn normalizes_cyrillic_words_only() {
        assert_eq!(normalize("пpивeт, мир!"), "привет, мир!");
        assert_eq!(normalize("copy paste"), "copy paste");
        // One Cyrillic letter is enough to treat the word as Cyrillic.
        assert_eq!(normalize("cоpy"), "сору");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn generated_variations_are_recognized() {
        let template = "Собрание в среду, приходите вовремя";
        let outcome = generate(
            template,
            &Limits::default(),
            &mut StdRng::seed_from_u64(3),
        )
        .unwrap();
        assert!(!outcome.variations.is_empty());
        for variation in &outcome.variations {
            assert!(is_variation_of(variation, template), "{variation}");
        }
        assert!(!is_variation_of("Собрание в четверг", template));
    }

    #[test]
    fn report_collects_both_views() {
        let report = check("нoвoсти");
        assert_eq!(report.mixed.len(), 1);
        assert_eq!(report.normalized, "новости");
    }
}
