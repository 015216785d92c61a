//! Lexical analyzer

use std::iter::Peekable;
use std::rc::Rc;
use std::str::CharIndices;

use crate::ctx::Context;
use crate::diag::{Diagnostics, Position, StaticError};
use crate::token::{Token, TokenKind};

/// Turn source text into a sequence of tokens terminated by [`TokenKind::Eof`].
///
/// Errors are reported to `diags` and scanning carries on, so one pass reports as many lexical
/// errors as possible.  Callers must not parse the tokens if `diags` gained errors.
#[tracing::instrument(level = "debug", skip_all)]
pub fn scan(source: &str, ctx: &Rc<Context>, diags: &mut Diagnostics) -> Vec<Token> {
    let mut scanner = Scanner::new(source, ctx.clone());
    let mut tokens = vec![];
    loop {
        let token = scanner.get_token(diags);
        let eof = token.is_eof();
        tokens.push(token);
        if eof {
            break;
        }
    }
    tracing::debug!(tokens = tokens.len(), errors = diags.len(), "scanned");
    tokens
}

struct Scanner<'s> {
    source: &'s str,
    input: Peekable<CharIndices<'s>>,
    line: Position,
    ctx: Rc<Context>,
}

impl<'s> Scanner<'s> {
    fn new(source: &'s str, ctx: Rc<Context>) -> Scanner<'s> {
        Scanner {
            source,
            input: source.char_indices().peekable(),
            line: 1,
            ctx,
        }
    }

    /// Scan next token and return it.  Returns `Eof` forever once input is exhausted.
    fn get_token(&mut self, diags: &mut Diagnostics) -> Token {
        loop {
            let (start, ch) = match self.input.next() {
                None => return Token::new(TokenKind::Eof, "", self.line),
                Some(next) => next,
            };
            let line = self.line;
            let kind = match ch {
                '\n' => {
                    self.line += 1;
                    continue;
                }
                c if c.is_whitespace() => continue,
                '(' => TokenKind::LeftParen,
                ')' => TokenKind::RightParen,
                '{' => TokenKind::LeftCurly,
                '}' => TokenKind::RightCurly,
                '[' => TokenKind::LeftBracket,
                ']' => TokenKind::RightBracket,
                ',' => TokenKind::Comma,
                '.' => TokenKind::Dot,
                ';' => TokenKind::Semicolon,
                '*' => TokenKind::Star,
                '?' => TokenKind::Question,
                ':' => TokenKind::Colon,
                '+' => self.either('+', TokenKind::PlusPlus, TokenKind::Plus),
                '-' => self.either('-', TokenKind::MinusMinus, TokenKind::Minus),
                '!' => self.either('=', TokenKind::BangEqual, TokenKind::Bang),
                '=' => self.either('=', TokenKind::EqualEqual, TokenKind::Equal),
                '<' => self.either('=', TokenKind::LessEqual, TokenKind::Less),
                '>' => self.either('=', TokenKind::GreaterEqual, TokenKind::Greater),
                '/' => {
                    if self.next_is('/') {
                        self.skip_line_comment();
                        continue;
                    } else if self.next_is('*') {
                        self.skip_block_comment(diags);
                        continue;
                    } else {
                        TokenKind::Slash
                    }
                }
                '"' => match self.scan_string(start) {
                    Some(kind) => kind,
                    None => {
                        diags.error_at_line(line, StaticError::UnterminatedString);
                        continue;
                    }
                },
                '0'..='9' => match self.scan_number(start) {
                    Ok(kind) => kind,
                    Err(e) => {
                        diags.error_at_line(line, e);
                        continue;
                    }
                },
                'a'..='z' | 'A'..='Z' | '_' => self.scan_identifier(start),
                _ => {
                    diags.error_at_line(line, StaticError::BadChar(ch));
                    continue;
                }
            };
            return Token::new(kind, &self.source[start..self.offset()], line);
        }
    }

    /// Consume the next character if it is `expected`.
    fn next_is(&mut self, expected: char) -> bool {
        self.input.next_if(|&(_, ch)| ch == expected).is_some()
    }

    fn either(&mut self, second: char, double: TokenKind, single: TokenKind) -> TokenKind {
        if self.next_is(second) {
            double
        } else {
            single
        }
    }

    /// Byte offset of the next unconsumed character.
    fn offset(&mut self) -> usize {
        self.input
            .peek()
            .map(|&(i, _)| i)
            .unwrap_or(self.source.len())
    }

    fn peek_char(&mut self) -> Option<char> {
        self.input.peek().map(|&(_, ch)| ch)
    }

    fn skip_line_comment(&mut self) {
        while self.input.next_if(|&(_, ch)| ch != '\n').is_some() {}
    }

    /// Block comments do not nest: the first `*/` closes the comment.
    fn skip_block_comment(&mut self, diags: &mut Diagnostics) {
        let line = self.line;
        while let Some((_, ch)) = self.input.next() {
            match ch {
                '*' if self.next_is('/') => return,
                '\n' => self.line += 1,
                _ => (),
            }
        }
        diags.error_at_line(line, StaticError::UnterminatedComment);
    }

    /// Scan up to the closing quote.  Returns `None` if input ends first.
    fn scan_string(&mut self, start: usize) -> Option<TokenKind> {
        for (i, ch) in self.input.by_ref() {
            match ch {
                '"' => return Some(TokenKind::Str(Rc::from(&self.source[start + 1..i]))),
                '\n' => self.line += 1,
                _ => (),
            }
        }
        None
    }

    fn skip_digits(&mut self) {
        while self.input.next_if(|&(_, ch)| ch.is_ascii_digit()).is_some() {}
    }

    fn skip_identifier_chars(&mut self) {
        while self.input.next_if(|&(_, ch)| is_identifier_char(ch)).is_some() {}
    }

    fn scan_number(&mut self, start: usize) -> Result<TokenKind, StaticError> {
        self.skip_digits();
        if self.next_is('.') {
            if !self.peek_char().map_or(false, |ch| ch.is_ascii_digit()) {
                return Err(StaticError::DanglingDecimalPoint);
            }
            self.skip_digits();
        }
        if self.peek_char().map_or(false, is_identifier_char) {
            // Swallow the rest of the word so it does not resurface as an identifier.
            self.skip_identifier_chars();
            return Err(StaticError::NumberAbutsIdentifier);
        }

        let end = self.offset();
        // Digits with an optional fraction always parse as f64.
        let n = self.source[start..end]
            .parse::<f64>()
            .map_err(|_| StaticError::DanglingDecimalPoint)?;
        Ok(TokenKind::Number(n))
    }

    fn scan_identifier(&mut self, start: usize) -> TokenKind {
        self.skip_identifier_chars();
        let end = self.offset();
        let sym = self.ctx.symbol(&self.source[start..end]);
        if let Some(kind) = self.ctx.keyword(&sym) {
            kind
        } else {
            TokenKind::Identifier(sym)
        }
    }
}

fn is_identifier_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_'
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn scan_with_ctx(input: &str, ctx: &Rc<Context>) -> Result<Vec<TokenKind>, Diagnostics> {
        let mut diags = Diagnostics::new();
        let tokens = scan(input, ctx, &mut diags);
        if diags.has_errors() {
            return Err(diags);
        }
        let mut kinds: Vec<TokenKind> = tokens.into_iter().map(|t| t.kind).collect();
        assert_eq!(kinds.pop(), Some(TokenKind::Eof));
        Ok(kinds)
    }

    fn scan_kinds(input: &str) -> Result<Vec<TokenKind>, Diagnostics> {
        scan_with_ctx(input, &Context::new())
    }

    fn scan_errors(input: &str) -> Vec<StaticError> {
        match scan_kinds(input) {
            Err(diags) => diags.errors(),
            Ok(kinds) => panic!("unexpected output: {:?}", kinds),
        }
    }

    #[test]
    fn scan_single_token() -> Result<(), Diagnostics> {
        assert_eq!(scan_kinds("+")?, vec![TokenKind::Plus]);
        Ok(())
    }

    #[test]
    fn fixed_tokens() -> Result<(), Diagnostics> {
        assert_eq!(
            scan_kinds("( ) { } [ ] , . - + ; * / ? : ! != = == > >= < <= ++ --")?,
            vec![
                TokenKind::LeftParen,
                TokenKind::RightParen,
                TokenKind::LeftCurly,
                TokenKind::RightCurly,
                TokenKind::LeftBracket,
                TokenKind::RightBracket,
                TokenKind::Comma,
                TokenKind::Dot,
                TokenKind::Minus,
                TokenKind::Plus,
                TokenKind::Semicolon,
                TokenKind::Star,
                TokenKind::Slash,
                TokenKind::Question,
                TokenKind::Colon,
                TokenKind::Bang,
                TokenKind::BangEqual,
                TokenKind::Equal,
                TokenKind::EqualEqual,
                TokenKind::Greater,
                TokenKind::GreaterEqual,
                TokenKind::Less,
                TokenKind::LessEqual,
                TokenKind::PlusPlus,
                TokenKind::MinusMinus,
            ]
        );
        Ok(())
    }

    #[test]
    fn blanks_are_ignored() -> Result<(), Diagnostics> {
        assert_eq!(scan_kinds(" \t\r\n+")?, vec![TokenKind::Plus]);
        Ok(())
    }

    #[test]
    fn numbers() -> Result<(), Diagnostics> {
        assert_eq!(scan_kinds("1")?, vec![TokenKind::Number(1.0)]);
        assert_eq!(scan_kinds("42")?, vec![TokenKind::Number(42.0)]);
        assert_eq!(scan_kinds("4.25")?, vec![TokenKind::Number(4.25)]);
        assert_eq!(scan_kinds("007")?, vec![TokenKind::Number(7.0)]);
        Ok(())
    }

    #[test]
    fn bad_numbers() {
        assert_eq!(scan_errors("1."), vec![StaticError::DanglingDecimalPoint]);
        assert_eq!(scan_errors("1_"), vec![StaticError::NumberAbutsIdentifier]);
        assert_eq!(scan_errors("1a"), vec![StaticError::NumberAbutsIdentifier]);
        assert_eq!(scan_errors("1.5e3"), vec![StaticError::NumberAbutsIdentifier]);
    }

    #[test]
    fn scan_several_tokens_without_blanks() -> Result<(), Diagnostics> {
        assert_eq!(
            scan_kinds("42+24")?,
            vec![
                TokenKind::Number(42.0),
                TokenKind::Plus,
                TokenKind::Number(24.0)
            ]
        );
        Ok(())
    }

    #[test]
    fn scanner_keeps_track_of_lines() {
        let ctx = Context::new();
        let mut diags = Diagnostics::new();
        let lines: Vec<Position> = scan("1\n2 3\n4", &ctx, &mut diags)
            .iter()
            .map(|t| t.line)
            .collect();
        assert_eq!(lines, vec![1, 2, 2, 3, 3]);
    }

    #[test]
    fn lexemes_are_source_slices() {
        let ctx = Context::new();
        let mut diags = Diagnostics::new();
        let lexemes: Vec<String> = scan("foo >= 3.5 \"hi\"", &ctx, &mut diags)
            .iter()
            .map(|t| t.lexeme.to_string())
            .collect();
        assert_eq!(lexemes, vec!["foo", ">=", "3.5", "\"hi\"", ""]);
    }

    #[test]
    fn identifier() -> Result<(), Diagnostics> {
        let ctx = Context::new();
        assert_eq!(
            scan_with_ctx("f foo _foo t42", &ctx)?,
            vec![
                TokenKind::Identifier(ctx.symbol("f")),
                TokenKind::Identifier(ctx.symbol("foo")),
                TokenKind::Identifier(ctx.symbol("_foo")),
                TokenKind::Identifier(ctx.symbol("t42"))
            ]
        );
        Ok(())
    }

    #[test]
    fn keywords() -> Result<(), Diagnostics> {
        assert_eq!(
            scan_kinds(
                "and class else false for fun if nil or return super this true var while break"
            )?,
            vec![
                TokenKind::And,
                TokenKind::Class,
                TokenKind::Else,
                TokenKind::False,
                TokenKind::For,
                TokenKind::Fun,
                TokenKind::If,
                TokenKind::Nil,
                TokenKind::Or,
                TokenKind::Return,
                TokenKind::Super,
                TokenKind::This,
                TokenKind::True,
                TokenKind::Var,
                TokenKind::While,
                TokenKind::Break,
            ]
        );
        Ok(())
    }

    #[test]
    fn strings() -> Result<(), Diagnostics> {
        assert_eq!(
            scan_kinds("\"abc\" \"\"")?,
            vec![TokenKind::Str(Rc::from("abc")), TokenKind::Str(Rc::from(""))]
        );
        Ok(())
    }

    #[test]
    fn multi_line_string_advances_line() {
        let ctx = Context::new();
        let mut diags = Diagnostics::new();
        let tokens = scan("\"a\nb\" x", &ctx, &mut diags);
        assert_eq!(tokens[0].kind, TokenKind::Str(Rc::from("a\nb")));
        assert_eq!(tokens[0].line, 1);
        assert_eq!(tokens[1].line, 2);
    }

    #[test]
    fn unterminated_string() {
        let ctx = Context::new();
        let mut diags = Diagnostics::new();
        let tokens = scan("\"abc", &ctx, &mut diags);
        assert_eq!(diags.errors(), vec![StaticError::UnterminatedString]);
        assert_eq!(tokens.len(), 1);
        assert!(tokens[0].is_eof());
    }

    #[test]
    fn comments_are_ignored() -> Result<(), Diagnostics> {
        assert_eq!(scan_kinds("true // false")?, vec![TokenKind::True]);
        assert_eq!(
            scan_kinds("true /* false \n nil */ true")?,
            vec![TokenKind::True, TokenKind::True]
        );
        Ok(())
    }

    #[test]
    fn block_comments_do_not_nest() -> Result<(), Diagnostics> {
        assert_eq!(
            scan_kinds("/* a /* b */ nil */")?,
            vec![TokenKind::Nil, TokenKind::Star, TokenKind::Slash]
        );
        Ok(())
    }

    #[test]
    fn unterminated_block_comment() {
        assert_eq!(scan_errors("1 /* abc"), vec![StaticError::UnterminatedComment]);
    }

    #[test]
    fn scanning_continues_after_errors() {
        assert_eq!(
            scan_errors("@ 1 # 2."),
            vec![
                StaticError::BadChar('@'),
                StaticError::BadChar('#'),
                StaticError::DanglingDecimalPoint
            ]
        );
    }

    #[test]
    fn eof_carries_final_line() {
        let ctx = Context::new();
        let mut diags = Diagnostics::new();
        let tokens = scan("1\n\n", &ctx, &mut diags);
        assert_eq!(tokens.last().map(|t| t.line), Some(3));
    }
}
