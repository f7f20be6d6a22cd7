//! Statement parser for the PubSubSQL command language.
//!
//! One statement per command, recursive descent, no backtracking: every
//! statement is discriminated by its leading keyword. The first mismatched
//! token aborts the parse with an error naming the expected construct.

use crate::error::{ParseError, ParseResult};
use crate::lexer::Lexer;
use crate::request::{ColumnValue, Filter, Request, UnsubscribeTarget};
use crate::token::{Keyword, Token};

/// Statement parser.
pub struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
}

impl<'a> Parser<'a> {
    /// Creates a new parser for the given source.
    pub fn new(source: &'a str) -> Self {
        let mut lexer = Lexer::new(source);
        let current = lexer.next_token();
        Self { lexer, current }
    }

    /// Returns the current token.
    pub fn current(&self) -> &Token {
        &self.current
    }

    /// Advances to the next token, returning the one just consumed.
    fn advance(&mut self) -> Token {
        std::mem::replace(&mut self.current, self.lexer.next_token())
    }

    /// Consumes the current token if it equals `token`.
    fn eat(&mut self, token: &Token) -> bool {
        if &self.current == token {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Builds the error for a token that does not fit `expected`.
    fn mismatch(&self, expected: &str) -> ParseError {
        match &self.current {
            Token::Eof => ParseError::unexpected_eof(expected),
            Token::Error(msg) => ParseError::invalid(msg.clone()),
            token => ParseError::unexpected(expected, token),
        }
    }

    fn expect_keyword(&mut self, keyword: Keyword) -> ParseResult<()> {
        if self.current == Token::Keyword(keyword) {
            self.advance();
            Ok(())
        } else {
            Err(self.mismatch(&format!("'{}'", keyword)))
        }
    }

    fn expect_token(&mut self, token: Token, expected: &str) -> ParseResult<()> {
        if self.current == token {
            self.advance();
            Ok(())
        } else {
            Err(self.mismatch(expected))
        }
    }

    fn expect_ident(&mut self, expected: &str) -> ParseResult<String> {
        if matches!(self.current, Token::Ident(_)) {
            match self.advance() {
                Token::Ident(name) => Ok(name),
                _ => unreachable!(),
            }
        } else {
            Err(self.mismatch(expected))
        }
    }

    fn expect_value(&mut self, expected: &str) -> ParseResult<String> {
        if self.current.is_value() {
            let token = self.advance();
            Ok(token.value_text().unwrap_or_default().to_string())
        } else {
            Err(self.mismatch(expected))
        }
    }

    fn expect_eof(&mut self) -> ParseResult<()> {
        if self.current.is_eof() {
            Ok(())
        } else {
            Err(self.mismatch("end of statement"))
        }
    }

    /// Parses an optional WHERE clause: a single equality predicate.
    fn parse_where(&mut self) -> ParseResult<Option<Filter>> {
        if !self.eat(&Token::Keyword(Keyword::Where)) {
            return Ok(None);
        }
        let column = self.expect_ident("column name")?;
        self.expect_token(Token::Eq, "'='")?;
        let value = self.expect_value("value")?;
        Ok(Some(Filter { column, value }))
    }

    fn parse_insert(&mut self) -> ParseResult<Request> {
        self.advance();
        self.expect_keyword(Keyword::Into)?;
        let table = self.expect_ident("table name")?;

        self.expect_token(Token::LParen, "'('")?;
        let mut columns = vec![self.expect_ident("column name")?];
        while self.eat(&Token::Comma) {
            columns.push(self.expect_ident("column name")?);
        }
        self.expect_token(Token::RParen, "')'")?;

        self.expect_keyword(Keyword::Values)?;
        self.expect_token(Token::LParen, "'('")?;
        let mut values = vec![self.expect_value("value")?];
        while self.eat(&Token::Comma) {
            values.push(self.expect_value("value")?);
        }
        self.expect_token(Token::RParen, "')'")?;

        if columns.len() != values.len() {
            return Err(ParseError::invalid(format!(
                "expected {} values but found {}",
                columns.len(),
                values.len()
            )));
        }

        let column_values = columns
            .into_iter()
            .zip(values)
            .map(|(column, value)| ColumnValue { column, value })
            .collect();

        Ok(Request::Insert {
            table,
            column_values,
        })
    }

    fn parse_select(&mut self) -> ParseResult<Request> {
        self.advance();
        self.expect_token(Token::Star, "'*'")?;
        self.expect_keyword(Keyword::From)?;
        let table = self.expect_ident("table name")?;
        let filter = self.parse_where()?;
        Ok(Request::Select { table, filter })
    }

    fn parse_update(&mut self) -> ParseResult<Request> {
        self.advance();
        let table = self.expect_ident("table name")?;
        self.expect_keyword(Keyword::Set)?;

        let mut column_values = vec![self.parse_assignment()?];
        while self.eat(&Token::Comma) {
            column_values.push(self.parse_assignment()?);
        }

        let filter = self.parse_where()?;
        Ok(Request::Update {
            table,
            column_values,
            filter,
        })
    }

    fn parse_assignment(&mut self) -> ParseResult<ColumnValue> {
        let column = self.expect_ident("column name")?;
        self.expect_token(Token::Eq, "'='")?;
        let value = self.expect_value("value")?;
        Ok(ColumnValue { column, value })
    }

    fn parse_delete(&mut self) -> ParseResult<Request> {
        self.advance();
        self.expect_keyword(Keyword::From)?;
        let table = self.expect_ident("table name")?;
        let filter = self.parse_where()?;
        Ok(Request::Delete { table, filter })
    }

    fn parse_subscribe(&mut self) -> ParseResult<Request> {
        self.advance();
        self.expect_token(Token::Star, "'*'")?;
        self.expect_keyword(Keyword::From)?;
        let table = self.expect_ident("table name")?;
        let filter = self.parse_where()?;
        Ok(Request::Subscribe { table, filter })
    }

    fn parse_unsubscribe(&mut self) -> ParseResult<Request> {
        self.advance();
        self.expect_keyword(Keyword::From)?;

        let target = match &self.current {
            Token::Number(text) => {
                let pubsubid = text
                    .parse::<u64>()
                    .map_err(|_| ParseError::invalid(format!("invalid pubsubid: {}", text)))?;
                self.advance();
                UnsubscribeTarget::PubSubId(pubsubid)
            },
            Token::Ident(_) => {
                let table = self.expect_ident("table name")?;
                let filter = self.parse_where()?;
                UnsubscribeTarget::Table { table, filter }
            },
            _ => return Err(self.mismatch("table name or pubsubid")),
        };

        Ok(Request::Unsubscribe { target })
    }

    fn parse_key(&mut self) -> ParseResult<Request> {
        self.advance();
        let table = self.expect_ident("table name")?;
        let column = self.expect_ident("column name")?;
        Ok(Request::Key { table, column })
    }

    fn parse_tag(&mut self) -> ParseResult<Request> {
        self.advance();
        let table = self.expect_ident("table name")?;
        let column = self.expect_ident("column name")?;
        Ok(Request::Tag { table, column })
    }

    fn parse_statement(&mut self) -> ParseResult<Request> {
        match &self.current {
            Token::Keyword(Keyword::Insert) => self.parse_insert(),
            Token::Keyword(Keyword::Select) => self.parse_select(),
            Token::Keyword(Keyword::Update) => self.parse_update(),
            Token::Keyword(Keyword::Delete) => self.parse_delete(),
            Token::Keyword(Keyword::Subscribe) => self.parse_subscribe(),
            Token::Keyword(Keyword::Unsubscribe) => self.parse_unsubscribe(),
            Token::Keyword(Keyword::Key) => self.parse_key(),
            Token::Keyword(Keyword::Tag) => self.parse_tag(),
            _ => Err(self.mismatch("statement")),
        }
    }

    /// Parses a complete statement; trailing input is an error.
    pub fn parse(mut self) -> ParseResult<Request> {
        let request = self.parse_statement()?;
        self.expect_eof()?;
        Ok(request)
    }
}

/// Parses one command into a request.
pub fn parse(source: &str) -> ParseResult<Request> {
    Parser::new(source).parse()
}
