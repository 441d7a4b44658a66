use std::collections::BTreeSet;

use unicode_segmentation::UnicodeSegmentation;

use crate::config::IndexConfig;

/// Splits field text into index terms
#[derive(Clone, Debug)]
pub struct Tokenizer {
    config: IndexConfig,
}

impl Tokenizer {
    pub fn new(config: &IndexConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Tokenize text into a vector of terms, in document order
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        text.unicode_words()
            .map(|word| {
                if self.config.lowercase {
                    word.to_lowercase()
                } else {
                    word.to_string()
                }
            })
            .filter(|token| {
                token.len() >= self.config.min_token_length
                    && token.len() <= self.config.max_token_length
            })
            .collect()
    }

    /// Get unique terms from text
    pub fn unique_terms(&self, text: &str) -> BTreeSet<String> {
        self.tokenize(text).into_iter().collect()
    }
}
