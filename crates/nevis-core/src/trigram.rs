//! Trigram similarity in the style of PostgreSQL's `pg_trgm`.
//!
//! Text is lowercased and split into alphanumeric words; each word is padded
//! with two leading blanks and one trailing blank before its 3-character
//! windows are taken. `"cat"` yields `"  c"`, `" ca"`, `"cat"`, `"at "`.
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Trigrams(BTreeSet<String>);

impl Trigrams {
    pub fn of(text: &str) -> Self {
        let mut set = BTreeSet::new();
        for word in text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
            let padded: Vec<char> = "  ".chars().chain(word.chars().flat_map(char::to_lowercase)).chain(" ".chars()).collect();
            for w in padded.windows(3) {
                set.insert(w.iter().collect());
            }
        }
        Self(set)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn shared(&self, other: &Self) -> usize {
        self.0.intersection(&other.0).count()
    }

    /// Fraction of `self`'s trigrams that also occur in `target`.
    pub fn containment_in(&self, target: &Self) -> f32 {
        if self.is_empty() {
            return 0.0;
        }
        self.shared(target) as f32 / self.len() as f32
    }

    /// Jaccard overlap of the two sets.
    pub fn jaccard(&self, other: &Self) -> f32 {
        let shared = self.shared(other);
        let union = self.len() + other.len() - shared;
        if union == 0 {
            return 0.0;
        }
        shared as f32 / union as f32
    }
}

/// `pg_trgm`'s `similarity(a, b)`.
pub fn similarity(a: &str, b: &str) -> f32 {
    Trigrams::of(a).jaccard(&Trigrams::of(b))
}

/// How much of `query` is found somewhere in `target`, in `[0, 1]`.
///
/// A query that is a whole word or substring-of-words of the target scores
/// close to 1 no matter how long the target is.
pub fn word_similarity(query: &str, target: &str) -> f32 {
    Trigrams::of(query).containment_in(&Trigrams::of(target))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pads_words_like_pg_trgm() {
        let t = Trigrams::of("Cat");
        let got: Vec<&str> = t.iter().collect();
        assert_eq!(got, vec!["  c", " ca", "at ", "cat"]);
    }

    #[test]
    fn contained_word_scores_one() {
        assert_eq!(word_similarity("smith", "john smith jr"), 1.0);
        assert!(word_similarity("smyth", "john smith") > 0.0);
        assert_eq!(word_similarity("xyz", "john smith"), 0.0);
        assert_eq!(word_similarity("", "john"), 0.0);
    }

    #[test]
    fn jaccard_is_symmetric() {
        assert_eq!(similarity("word", "words"), similarity("words", "word"));
        assert_eq!(similarity("same", "same"), 1.0);
    }
}
