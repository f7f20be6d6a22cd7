//! Lexer for the PubSubSQL command language.
//!
//! Converts a command string into a stream of tokens. Handles:
//! - Keywords (case-insensitive)
//! - Identifiers
//! - Numeric literals
//! - Single-quoted strings (doubled quote escapes a literal quote)
//! - Punctuation
//! - Whitespace (skipped)

use crate::token::{Keyword, Token};
use std::str::Chars;

/// A pull-based lexer; `next_token` produces one token at a time and EOF is
/// sticky.
pub struct Lexer<'a> {
    /// The source text being lexed.
    source: &'a str,
    /// Iterator over characters.
    chars: Chars<'a>,
    /// Current byte position.
    pos: usize,
    /// Peeked character (if any).
    peeked: Option<char>,
}

impl<'a> Lexer<'a> {
    /// Creates a new lexer for the given source.
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.chars(),
            pos: 0,
            peeked: None,
        }
    }

    /// Returns the source text.
    pub fn source(&self) -> &'a str {
        self.source
    }

    /// Peeks at the next character without consuming it.
    fn peek(&mut self) -> Option<char> {
        if self.peeked.is_none() {
            self.peeked = self.chars.next();
        }
        self.peeked
    }

    /// Advances to the next character.
    fn advance(&mut self) -> Option<char> {
        let c = if let Some(c) = self.peeked.take() {
            c
        } else {
            self.chars.next()?
        };
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    /// Scans an identifier or keyword.
    fn scan_ident(&mut self, start: usize) -> Token {
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                self.advance();
            } else {
                break;
            }
        }

        let text = &self.source[start..self.pos];
        match Keyword::from_str(text) {
            Some(kw) => Token::Keyword(kw),
            None => Token::Ident(text.to_string()),
        }
    }

    /// Scans a numeric literal: digits with an optional fraction.
    fn scan_number(&mut self, start: usize) -> Token {
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                self.advance();
            } else {
                break;
            }
        }

        if self.peek() == Some('.') {
            // Only consume the dot when a digit follows; "3." is not a number.
            let mut lookahead = self.chars.clone();
            let after_dot = if self.peeked.is_some() {
                lookahead.next()
            } else {
                lookahead.next();
                lookahead.next()
            };
            if after_dot.is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
                while let Some(c) = self.peek() {
                    if c.is_ascii_digit() {
                        self.advance();
                    } else {
                        break;
                    }
                }
            }
        }

        Token::Number(self.source[start..self.pos].to_string())
    }

    /// Scans a single-quoted string literal.
    fn scan_string(&mut self) -> Token {
        let mut value = String::new();

        loop {
            match self.advance() {
                Some('\'') => {
                    // Doubled quote escapes a literal quote.
                    if self.peek() == Some('\'') {
                        self.advance();
                        value.push('\'');
                    } else {
                        return Token::Str(value);
                    }
                },
                Some(c) => value.push(c),
                None => {
                    return Token::Error("unterminated string literal".to_string());
                },
            }
        }
    }

    /// Scans the next token.
    pub fn next_token(&mut self) -> Token {
        self.skip_whitespace();

        let start = self.pos;

        let c = match self.advance() {
            Some(c) => c,
            None => return Token::Eof,
        };

        match c {
            'a'..='z' | 'A'..='Z' | '_' => self.scan_ident(start),
            '0'..='9' => self.scan_number(start),
            '\'' => self.scan_string(),
            '(' => Token::LParen,
            ')' => Token::RParen,
            ',' => Token::Comma,
            '*' => Token::Star,
            '=' => Token::Eq,
            _ => Token::Error(format!("unexpected character: '{}'", c)),
        }
    }

    /// Tokenizes the entire source, returning all tokens including EOF.
    pub fn tokenize(mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token();
            let is_eof = token.is_eof();
            tokens.push(token);
            if is_eof {
                break;
            }
        }
        tokens
    }
}

/// Tokenizes source text into a vector of tokens.
pub fn tokenize(source: &str) -> Vec<Token> {
    Lexer::new(source).tokenize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty() {
        assert_eq!(tokenize(""), vec![Token::Eof]);
    }

    #[test]
    fn test_whitespace_only() {
        assert_eq!(tokenize("   \n\t  "), vec![Token::Eof]);
    }

    #[test]
    fn test_keywords_case_insensitive() {
        assert_eq!(
            tokenize("SELECT from WhErE"),
            vec![
                Token::Keyword(Keyword::Select),
                Token::Keyword(Keyword::From),
                Token::Keyword(Keyword::Where),
                Token::Eof
            ]
        );
    }

    #[test]
    fn test_identifiers() {
        assert_eq!(
            tokenize("stocks user_id _private Ticker9"),
            vec![
                Token::Ident("stocks".to_string()),
                Token::Ident("user_id".to_string()),
                Token::Ident("_private".to_string()),
                Token::Ident("Ticker9".to_string()),
                Token::Eof
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            tokenize("0 42 14.5645"),
            vec![
                Token::Number("0".to_string()),
                Token::Number("42".to_string()),
                Token::Number("14.5645".to_string()),
                Token::Eof
            ]
        );
    }

    #[test]
    fn test_number_trailing_dot() {
        // "3." is the number 3 followed by an unexpected character.
        let tokens = tokenize("3.");
        assert_eq!(tokens[0], Token::Number("3".to_string()));
        assert!(matches!(&tokens[1], Token::Error(_)));
    }

    #[test]
    fn test_strings() {
        assert_eq!(
            tokenize("'IBM' 'two words'"),
            vec![
                Token::Str("IBM".to_string()),
                Token::Str("two words".to_string()),
                Token::Eof
            ]
        );
    }

    #[test]
    fn test_doubled_quote_escape() {
        assert_eq!(
            tokenize("'it''s'"),
            vec![Token::Str("it's".to_string()), Token::Eof]
        );
    }

    #[test]
    fn test_empty_string() {
        assert_eq!(
            tokenize("''"),
            vec![Token::Str(String::new()), Token::Eof]
        );
    }

    #[test]
    fn test_unterminated_string() {
        let tokens = tokenize("'unterminated");
        assert!(matches!(
            &tokens[0],
            Token::Error(msg) if msg.contains("unterminated")
        ));
    }

    #[test]
    fn test_punctuation() {
        assert_eq!(
            tokenize("( ) , * ="),
            vec![
                Token::LParen,
                Token::RParen,
                Token::Comma,
                Token::Star,
                Token::Eq,
                Token::Eof
            ]
        );
    }

    #[test]
    fn test_unexpected_character() {
        let tokens = tokenize("select ; from");
        assert!(matches!(
            &tokens[1],
            Token::Error(msg) if msg.contains("unexpected")
        ));
    }

    #[test]
    fn test_sticky_eof() {
        let mut lexer = Lexer::new("select");
        assert_eq!(lexer.next_token(), Token::Keyword(Keyword::Select));
        assert_eq!(lexer.next_token(), Token::Eof);
        assert_eq!(lexer.next_token(), Token::Eof);
        assert_eq!(lexer.next_token(), Token::Eof);
    }

    #[test]
    fn test_insert_statement() {
        assert_eq!(
            tokenize("insert into stocks (ticker, bid) values (IBM, 12)"),
            vec![
                Token::Keyword(Keyword::Insert),
                Token::Keyword(Keyword::Into),
                Token::Ident("stocks".to_string()),
                Token::LParen,
                Token::Ident("ticker".to_string()),
                Token::Comma,
                Token::Ident("bid".to_string()),
                Token::RParen,
                Token::Keyword(Keyword::Values),
                Token::LParen,
                Token::Ident("IBM".to_string()),
                Token::Comma,
                Token::Number("12".to_string()),
                Token::RParen,
                Token::Eof
            ]
        );
    }

    #[test]
    fn test_where_clause() {
        assert_eq!(
            tokenize("where ticker = 'IBM'"),
            vec![
                Token::Keyword(Keyword::Where),
                Token::Ident("ticker".to_string()),
                Token::Eq,
                Token::Str("IBM".to_string()),
                Token::Eof
            ]
        );
    }

    #[test]
    fn test_adjacent_tokens() {
        assert_eq!(
            tokenize("(a,b)=('x',1)"),
            vec![
                Token::LParen,
                Token::Ident("a".to_string()),
                Token::Comma,
                Token::Ident("b".to_string()),
                Token::RParen,
                Token::Eq,
                Token::LParen,
                Token::Str("x".to_string()),
                Token::Comma,
                Token::Number("1".to_string()),
                Token::RParen,
                Token::Eof
            ]
        );
    }

    #[test]
    fn test_source_accessor() {
        let source = "select * from stocks";
        let lexer = Lexer::new(source);
        assert_eq!(lexer.source(), source);
    }
}
