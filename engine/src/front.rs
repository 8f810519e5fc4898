// front.rs — Textual algorithm front end.
//
// One function application per line: `loop(0, b2) = a1`, `add(a1, b1) = c`,
// `send(c)`. Lexed with logos, parsed by recursive descent, lowered
// straight to IR functions. `#` starts a line comment.
//
// Preconditions: input is UTF-8 text.
// Postconditions: the returned functions satisfy the producer/consumer
//   invariants (each variable produced once, every variable consumed).
// Failure modes: every malformed line, unknown function name, duplicate
//   producer or dangling variable is a `Parse` error naming the line.
// Side effects: none.

use std::collections::BTreeMap;

use logos::Logos;

use crate::error::EngineError;
use crate::ir::{Var, F};
use crate::value::Val;

// ── Tokens ──────────────────────────────────────────────────────────────────

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r]+|#[^\n]*")]
enum Token {
    #[regex(r"[A-Za-z_][A-Za-z0-9_@'!]*", |lex| lex.slice().to_string())]
    Ident(String),

    #[regex(r"-?[0-9]+(\.[0-9]+)?", |lex| lex.slice().to_string())]
    Number(String),

    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token(",")]
    Comma,
    #[token("=")]
    Equals,
    #[token("\n")]
    Newline,
}

// ── Parsing ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Arg {
    Number(String),
    Var(Var),
}

struct Line {
    no: usize,
    name: String,
    args: Vec<Arg>,
    outs: Vec<Var>,
}

fn parse_err(line: usize, msg: impl Into<String>) -> EngineError {
    EngineError::Parse(format!("line {line}: {}", msg.into()))
}

fn lex(src: &str) -> Result<Vec<Vec<Token>>, EngineError> {
    let mut lines: Vec<Vec<Token>> = vec![Vec::new()];
    for (tok, span) in Token::lexer(src).spanned() {
        match tok {
            Ok(Token::Newline) => lines.push(Vec::new()),
            Ok(t) => lines.last_mut().unwrap().push(t),
            Err(()) => {
                return Err(parse_err(
                    lines.len(),
                    format!("unexpected character at byte {}", span.start),
                ))
            }
        }
    }
    Ok(lines)
}

fn parse_line(no: usize, tokens: &[Token]) -> Result<Line, EngineError> {
    let mut it = tokens.iter().peekable();

    let name = match it.next() {
        Some(Token::Ident(name)) => name.clone(),
        Some(t) => return Err(parse_err(no, format!("expected a function name, got {t:?}"))),
        None => unreachable!("empty lines are filtered before parsing"),
    };

    if it.next() != Some(&Token::LParen) {
        return Err(parse_err(no, format!("expected '(' after '{name}'")));
    }
    let mut args = Vec::new();
    if it.peek() == Some(&&Token::RParen) {
        it.next();
    } else {
        loop {
            match it.next() {
                Some(Token::Ident(v)) => args.push(Arg::Var(v.clone())),
                Some(Token::Number(n)) => args.push(Arg::Number(n.clone())),
                other => {
                    return Err(parse_err(no, format!("expected an argument, got {other:?}")))
                }
            }
            match it.next() {
                Some(Token::Comma) => {}
                Some(Token::RParen) => break,
                other => return Err(parse_err(no, format!("expected ',' or ')', got {other:?}"))),
            }
        }
    }

    let mut outs = Vec::new();
    match it.next() {
        None => {}
        Some(Token::Equals) => loop {
            match it.next() {
                Some(Token::Ident(v)) => outs.push(v.clone()),
                other => return Err(parse_err(no, format!("expected a variable, got {other:?}"))),
            }
            match it.next() {
                Some(Token::Comma) => {}
                None => break,
                other => return Err(parse_err(no, format!("expected ',' or end, got {other:?}"))),
            }
        },
        Some(t) => return Err(parse_err(no, format!("unexpected {t:?} after ')'"))),
    }

    Ok(Line {
        no,
        name,
        args,
        outs,
    })
}

// ── Lowering ────────────────────────────────────────────────────────────────

fn number<T: Val>(line: &Line, i: usize) -> Result<T, EngineError> {
    match line.args.get(i) {
        Some(Arg::Number(n)) => {
            T::parse_literal(n).map_err(|e| parse_err(line.no, e))
        }
        _ => Err(parse_err(
            line.no,
            format!("'{}' needs a literal in position {}", line.name, i + 1),
        )),
    }
}

fn var(line: &Line, i: usize) -> Result<Var, EngineError> {
    match line.args.get(i) {
        Some(Arg::Var(v)) => Ok(v.clone()),
        _ => Err(parse_err(
            line.no,
            format!("'{}' needs a variable in position {}", line.name, i + 1),
        )),
    }
}

fn addr(line: &Line, i: usize) -> Result<usize, EngineError> {
    match line.args.get(i) {
        Some(Arg::Number(n)) => n
            .parse()
            .map_err(|_| parse_err(line.no, format!("'{n}' is not an address"))),
        _ => Err(parse_err(
            line.no,
            format!("'{}' needs an address in position {}", line.name, i + 1),
        )),
    }
}

fn expect_arity(line: &Line, args: usize, outs_min: usize) -> Result<(), EngineError> {
    if line.args.len() != args {
        return Err(parse_err(
            line.no,
            format!("'{}' takes {} argument(s)", line.name, args),
        ));
    }
    if line.outs.len() < outs_min {
        return Err(parse_err(
            line.no,
            format!("'{}' needs at least {} output(s)", line.name, outs_min),
        ));
    }
    Ok(())
}

fn lower<T: Val>(line: &Line) -> Result<F<T>, EngineError> {
    let f = match line.name.as_str() {
        "constant" => {
            expect_arity(line, 1, 1)?;
            F::Constant {
                value: number(line, 0)?,
                outs: line.outs.clone(),
            }
        }
        "reg" => {
            expect_arity(line, 1, 1)?;
            F::Reg {
                input: var(line, 0)?,
                outs: line.outs.clone(),
            }
        }
        "add" | "sub" | "mul" => {
            expect_arity(line, 2, 1)?;
            let (a, b) = (var(line, 0)?, var(line, 1)?);
            let outs = line.outs.clone();
            match line.name.as_str() {
                "add" => F::Add { a, b, outs },
                "sub" => F::Sub { a, b, outs },
                _ => F::Mul { a, b, outs },
            }
        }
        "div" => {
            expect_arity(line, 2, 1)?;
            F::Div {
                numer: var(line, 0)?,
                denom: var(line, 1)?,
                quotient: vec![line.outs[0].clone()],
                remainder: line.outs[1..].to_vec(),
            }
        }
        "shiftl" | "shiftr" => {
            expect_arity(line, 2, 1)?;
            let steps = addr(line, 0)? as u32;
            let input = var(line, 1)?;
            let outs = line.outs.clone();
            if line.name == "shiftl" {
                F::ShiftL { steps, input, outs }
            } else {
                F::ShiftR { steps, input, outs }
            }
        }
        "loop" => {
            expect_arity(line, 2, 1)?;
            F::Loop {
                init: number(line, 0)?,
                input: var(line, 1)?,
                outs: line.outs.clone(),
            }
        }
        "send" => {
            expect_arity(line, 1, 0)?;
            if !line.outs.is_empty() {
                return Err(parse_err(line.no, "'send' has no outputs"));
            }
            F::Send {
                input: var(line, 0)?,
            }
        }
        "receive" => {
            expect_arity(line, 0, 1)?;
            F::Receive {
                outs: line.outs.clone(),
            }
        }
        "framinput" => {
            expect_arity(line, 1, 1)?;
            F::FramInput {
                addr: addr(line, 0)?,
                outs: line.outs.clone(),
            }
        }
        "framoutput" => {
            expect_arity(line, 2, 0)?;
            if !line.outs.is_empty() {
                return Err(parse_err(line.no, "'framoutput' has no outputs"));
            }
            F::FramOutput {
                addr: addr(line, 0)?,
                input: var(line, 1)?,
            }
        }
        other => return Err(parse_err(line.no, format!("unknown function '{other}'"))),
    };
    Ok(f)
}

/// Parse and lower an algorithm file.
pub fn parse_algorithm<T: Val>(src: &str) -> Result<Vec<F<T>>, EngineError> {
    let mut fs: Vec<(usize, F<T>)> = Vec::new();
    for (i, tokens) in lex(src)?.into_iter().enumerate() {
        if tokens.is_empty() {
            continue;
        }
        let line = parse_line(i + 1, &tokens)?;
        fs.push((line.no, lower(&line)?));
    }

    // producer/consumer validation
    let mut producers: BTreeMap<Var, usize> = BTreeMap::new();
    for (no, f) in &fs {
        for v in f.outputs() {
            if let Some(first) = producers.insert(v.clone(), *no) {
                return Err(parse_err(
                    *no,
                    format!("'{v}' already produced at line {first}"),
                ));
            }
        }
    }
    let mut consumers: BTreeMap<Var, usize> = BTreeMap::new();
    for (_, f) in &fs {
        for v in f.inputs() {
            *consumers.entry(v).or_insert(0) += 1;
        }
    }
    for (no, f) in &fs {
        for v in f.inputs() {
            if !producers.contains_key(&v) {
                return Err(parse_err(*no, format!("'{v}' is never produced")));
            }
        }
        for v in f.outputs() {
            match consumers.get(&v).copied().unwrap_or(0) {
                0 => return Err(parse_err(*no, format!("'{v}' is never consumed"))),
                1 => {}
                n => {
                    return Err(parse_err(
                        *no,
                        format!(
                            "'{v}' is consumed {n} times; fan-out needs one alias output per consumer"
                        ),
                    ))
                }
            }
        }
    }

    Ok(fs.into_iter().map(|(_, f)| f).collect())
}

// ── Tests ───────────────────────────────────────────────────────────────────
