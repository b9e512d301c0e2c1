use crate::analysis::token::Token;
use unicode_segmentation::UnicodeSegmentation;

/// Splits raw text into positioned tokens
pub trait Tokenizer: Send + Sync {
    fn tokenize(&self, text: &str) -> Vec<Token>;

    fn name(&self) -> &str;
}

/// Unicode word-boundary tokenizer (UAX #29)
#[derive(Debug, Clone)]
pub struct StandardTokenizer {
    max_token_length: usize,
    name: String,
}

impl Default for StandardTokenizer {
    fn default() -> Self {
        Self::new(255)
    }
}

impl StandardTokenizer {
    pub fn new(max_token_length: usize) -> Self {
        Self { max_token_length, name: format!("standard:max={max_token_length}") }
    }

    pub fn max_token_length(&self) -> usize {
        self.max_token_length
    }
}

impl Tokenizer for StandardTokenizer {
    fn tokenize(&self, text: &str) -> Vec<Token> {
        let mut tokens = Vec::new();

        for (position, (offset, word)) in text.unicode_word_indices().enumerate() {
            // Overlong words keep their position so phrase offsets stay aligned.
            if word.len() > self.max_token_length {
                continue;
            }
            tokens.push(Token::new(word, position as u32, offset, word.len()));
        }

        tokens
    }

    fn name(&self) -> &str {
        &self.name
    }
}
