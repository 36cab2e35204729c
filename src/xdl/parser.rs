// Line-based XDL parser.
//
// XDL is one operation per line, `#` starts a comment, and the expression
// sub-grammar is small enough for a hand-written lexer plus recursive
// descent. Parse errors are positional (1-based line number) and fatal for
// the whole game.

use crate::error::{Result, XentError};

use super::ast::{CmpOp, Expr, Op, Program};

/// Parse a complete game source into a program.
pub fn parse_program(source: &str) -> Result<Program> {
    let mut ops = Vec::new();
    let mut last_beacon: Option<usize> = None;

    for (idx, raw_line) in source.lines().enumerate() {
        let line_num = (idx + 1) as u32;
        let line = strip_comment(raw_line);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let op = parse_statement(line, line_num, last_beacon)?;
        if matches!(op, Op::Beacon { .. }) {
            last_beacon = Some(ops.len());
        }
        ops.push(op);
    }

    Ok(Program { ops })
}

/// Remove a trailing `#` comment, respecting string literals.
fn strip_comment(line: &str) -> &str {
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        match c {
            '\\' if in_string && !escaped => escaped = true,
            '"' if !escaped => {
                in_string = !in_string;
                escaped = false;
            }
            '#' if !in_string => return &line[..i],
            _ => escaped = false,
        }
    }
    line
}

fn parse_statement(line: &str, line_num: u32, last_beacon: Option<usize>) -> Result<Op> {
    let mut lex = Lexer::new(line, line_num);
    let head = match lex.next()? {
        Token::Ident(name) => name,
        other => {
            return Err(err(line_num, format!("expected operation name, found {other}")));
        }
    };
    lex.expect(Token::LParen)?;

    let op = match head.as_str() {
        "assign" => {
            let name = lex.ident()?;
            lex.expect(Token::Assign)?;
            let expr = parse_expr(&mut lex)?;
            Op::Assign { line: line_num, name, expr }
        }
        "reveal" => {
            let mut names = vec![lex.ident()?];
            while lex.peek()? == &Token::Comma {
                lex.next()?;
                names.push(lex.ident()?);
            }
            Op::Reveal { line: line_num, names }
        }
        "elicit" => {
            let name = lex.ident()?;
            lex.expect(Token::Comma)?;
            let max_tokens = match lex.next()? {
                Token::Num(n) if n >= 0.0 && n.fract() == 0.0 => n as u32,
                other => {
                    return Err(err(
                        line_num,
                        format!("elicit needs a non-negative integer token budget, found {other}"),
                    ));
                }
            };
            Op::Elicit { line: line_num, name, max_tokens }
        }
        "ensure" => {
            let mut predicates = vec![parse_expr(&mut lex)?];
            while lex.peek()? == &Token::Comma {
                lex.next()?;
                predicates.push(parse_expr(&mut lex)?);
            }
            Op::Ensure { line: line_num, predicates, beacon: last_beacon }
        }
        "beacon" => Op::Beacon { line: line_num },
        "reward" => {
            let expr = parse_expr(&mut lex)?;
            Op::Reward { line: line_num, expr }
        }
        other => return Err(err(line_num, format!("unknown operation `{other}`"))),
    };

    lex.expect(Token::RParen)?;
    lex.expect(Token::End)?;
    Ok(op)
}

// --- Expressions ---

fn parse_expr(lex: &mut Lexer) -> Result<Expr> {
    let lhs = parse_concat(lex)?;
    let op = match lex.peek()? {
        Token::Ge => CmpOp::Ge,
        Token::Le => CmpOp::Le,
        Token::EqEq => CmpOp::Eq,
        _ => return Ok(lhs),
    };
    lex.next()?;
    let rhs = parse_concat(lex)?;
    Ok(Expr::Cmp { op, lhs: Box::new(lhs), rhs: Box::new(rhs) })
}

fn parse_concat(lex: &mut Lexer) -> Result<Expr> {
    let mut expr = parse_primary(lex)?;
    while lex.peek()? == &Token::Plus {
        lex.next()?;
        let rhs = parse_primary(lex)?;
        expr = Expr::Concat(Box::new(expr), Box::new(rhs));
    }
    Ok(expr)
}

fn parse_primary(lex: &mut Lexer) -> Result<Expr> {
    match lex.next()? {
        Token::Str(s) => Ok(Expr::Str(s)),
        Token::Num(n) => Ok(Expr::Num(n)),
        Token::LParen => {
            let inner = parse_expr(lex)?;
            lex.expect(Token::RParen)?;
            Ok(inner)
        }
        Token::Ident(name) => {
            if lex.peek()? != &Token::LParen {
                return Ok(Expr::Var(name));
            }
            lex.next()?;
            let call = parse_call(lex, &name)?;
            lex.expect(Token::RParen)?;
            Ok(call)
        }
        other => Err(err(lex.line, format!("expected expression, found {other}"))),
    }
}

fn parse_call(lex: &mut Lexer, name: &str) -> Result<Expr> {
    match name {
        "story" => Ok(Expr::Story),
        "len" => Ok(Expr::Len(Box::new(parse_expr(lex)?))),
        "remove_common_words" => {
            let a = parse_expr(lex)?;
            lex.expect(Token::Comma)?;
            let b = parse_expr(lex)?;
            Ok(Expr::RemoveCommonWords(Box::new(a), Box::new(b)))
        }
        "xed" => {
            let text = Box::new(parse_expr(lex)?);
            let context = if lex.peek()? == &Token::Pipe {
                lex.next()?;
                Some(Box::new(parse_expr(lex)?))
            } else {
                None
            };
            Ok(Expr::Xed { text, context })
        }
        "dex" | "nex" => {
            let text = Box::new(parse_expr(lex)?);
            lex.expect(Token::Pipe)?;
            let context = Box::new(parse_expr(lex)?);
            if name == "dex" {
                Ok(Expr::Dex { text, context })
            } else {
                Ok(Expr::Nex { text, context })
            }
        }
        other => Err(err(lex.line, format!("unknown function `{other}`"))),
    }
}

fn err(line: u32, message: String) -> XentError {
    XentError::Parse { line, message }
}

// --- Lexer ---

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(f64),
    LParen,
    RParen,
    Comma,
    Pipe,
    Plus,
    Assign,
    Ge,
    Le,
    EqEq,
    End,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Ident(s) => write!(f, "`{s}`"),
            Token::Str(_) => write!(f, "string literal"),
            Token::Num(n) => write!(f, "`{n}`"),
            Token::LParen => write!(f, "`(`"),
            Token::RParen => write!(f, "`)`"),
            Token::Comma => write!(f, "`,`"),
            Token::Pipe => write!(f, "`|`"),
            Token::Plus => write!(f, "`+`"),
            Token::Assign => write!(f, "`=`"),
            Token::Ge => write!(f, "`>=`"),
            Token::Le => write!(f, "`<=`"),
            Token::EqEq => write!(f, "`==`"),
            Token::End => write!(f, "end of line"),
        }
    }
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    peeked: Option<Token>,
}

impl Lexer {
    fn new(input: &str, line: u32) -> Self {
        Self { chars: input.chars().collect(), pos: 0, line, peeked: None }
    }

    fn peek(&mut self) -> Result<&Token> {
        if self.peeked.is_none() {
            self.peeked = Some(self.lex()?);
        }
        Ok(self.peeked.as_ref().unwrap())
    }

    fn next(&mut self) -> Result<Token> {
        match self.peeked.take() {
            Some(tok) => Ok(tok),
            None => self.lex(),
        }
    }

    fn expect(&mut self, want: Token) -> Result<()> {
        let got = self.next()?;
        if got == want {
            Ok(())
        } else {
            Err(err(self.line, format!("expected {want}, found {got}")))
        }
    }

    fn ident(&mut self) -> Result<String> {
        match self.next()? {
            Token::Ident(s) => Ok(s),
            other => Err(err(self.line, format!("expected identifier, found {other}"))),
        }
    }

    fn lex(&mut self) -> Result<Token> {
        while self.pos < self.chars.len() && self.chars[self.pos].is_whitespace() {
            self.pos += 1;
        }
        let Some(&c) = self.chars.get(self.pos) else {
            return Ok(Token::End);
        };

        match c {
            '(' => {
                self.pos += 1;
                Ok(Token::LParen)
            }
            ')' => {
                self.pos += 1;
                Ok(Token::RParen)
            }
            ',' => {
                self.pos += 1;
                Ok(Token::Comma)
            }
            '|' => {
                self.pos += 1;
                Ok(Token::Pipe)
            }
            '+' => {
                self.pos += 1;
                Ok(Token::Plus)
            }
            '=' => {
                if self.chars.get(self.pos + 1) == Some(&'=') {
                    self.pos += 2;
                    Ok(Token::EqEq)
                } else {
                    self.pos += 1;
                    Ok(Token::Assign)
                }
            }
            '>' | '<' => {
                if self.chars.get(self.pos + 1) != Some(&'=') {
                    return Err(err(self.line, format!("expected `{c}=`")));
                }
                self.pos += 2;
                Ok(if c == '>' { Token::Ge } else { Token::Le })
            }
            '"' => self.lex_string(),
            c if c.is_ascii_digit() => self.lex_number(),
            c if c.is_alphabetic() || c == '_' => {
                let start = self.pos;
                while self
                    .chars
                    .get(self.pos)
                    .is_some_and(|c| c.is_alphanumeric() || *c == '_')
                {
                    self.pos += 1;
                }
                Ok(Token::Ident(self.chars[start..self.pos].iter().collect()))
            }
            other => Err(err(self.line, format!("unexpected character `{other}`"))),
        }
    }

    fn lex_string(&mut self) -> Result<Token> {
        self.pos += 1; // opening quote
        let mut out = String::new();
        loop {
            let Some(&c) = self.chars.get(self.pos) else {
                return Err(err(self.line, "unterminated string literal".to_string()));
            };
            self.pos += 1;
            match c {
                '"' => return Ok(Token::Str(out)),
                '\\' => {
                    let Some(&esc) = self.chars.get(self.pos) else {
                        return Err(err(self.line, "unterminated escape".to_string()));
                    };
                    self.pos += 1;
                    match esc {
                        'n' => out.push('\n'),
                        't' => out.push('\t'),
                        '"' => out.push('"'),
                        '\\' => out.push('\\'),
                        other => {
                            return Err(err(self.line, format!("unknown escape `\\{other}`")));
                        }
                    }
                }
                other => out.push(other),
            }
        }
    }

    fn lex_number(&mut self) -> Result<Token> {
        let start = self.pos;
        while self
            .chars
            .get(self.pos)
            .is_some_and(|c| c.is_ascii_digit() || *c == '.')
        {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        text.parse::<f64>()
            .map(Token::Num)
            .map_err(|_| err(self.line, format!("bad number `{text}`")))
    }
}
