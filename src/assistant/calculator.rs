//! Arithmetic expression evaluator used by the `calculate` tool
//!
//! Supports `+ - * / // **`, parentheses, the constants `pi`, `e`, `tau`
//! and the usual math functions (`sqrt`, `sin`, `log`, `round`, ...).
//! Nothing but these names can be referenced.

use std::f64::consts;

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Num(f64),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
    Comma,
}

/// Evaluate `expression`, returning a message in Python's wording on failure
pub fn evaluate(expression: &str) -> Result<f64, String> {
    let tokens = lex(expression)?;
    if tokens.is_empty() {
        return Err("empty expression".to_string());
    }

    let mut parser = Parser { tokens, pos: 0 };
    let value = parser.expr()?;
    if parser.pos != parser.tokens.len() {
        return Err("invalid syntax".to_string());
    }
    if !value.is_finite() {
        return Err("result is not a finite number".to_string());
    }
    Ok(value)
}

fn lex(input: &str) -> Result<Vec<Tok>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                // Exponent only when digits follow: `2e3`, `1.5E-2`
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        i = j;
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| format!("invalid number '{}'", text))?;
                tokens.push(Tok::Num(value));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Tok::Ident(chars[start..i].iter().collect()));
            }
            '*' | '/' if chars.get(i + 1) == Some(&c) => {
                tokens.push(Tok::Op(if c == '*' { "**" } else { "//" }));
                i += 2;
            }
            '+' => {
                tokens.push(Tok::Op("+"));
                i += 1;
            }
            '-' => {
                tokens.push(Tok::Op("-"));
                i += 1;
            }
            '*' => {
                tokens.push(Tok::Op("*"));
                i += 1;
            }
            '/' => {
                tokens.push(Tok::Op("/"));
                i += 1;
            }
            '(' => {
                tokens.push(Tok::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Tok::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Tok::Comma);
                i += 1;
            }
            other => return Err(format!("unexpected character '{}'", other)),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Tok>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos)
    }

    fn eat_op(&mut self, ops: &[&'static str]) -> Option<&'static str> {
        match self.peek() {
            Some(Tok::Op(op)) if ops.contains(op) => {
                let op = *op;
                self.pos += 1;
                Some(op)
            }
            _ => None,
        }
    }

    fn expect(&mut self, tok: Tok) -> Result<(), String> {
        if self.peek() == Some(&tok) {
            self.pos += 1;
            Ok(())
        } else {
            Err("invalid syntax".to_string())
        }
    }

    fn expr(&mut self) -> Result<f64, String> {
        let mut value = self.term()?;
        while let Some(op) = self.eat_op(&["+", "-"]) {
            let rhs = self.term()?;
            value = if op == "+" { value + rhs } else { value - rhs };
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<f64, String> {
        let mut value = self.unary()?;
        while let Some(op) = self.eat_op(&["*", "/", "//"]) {
            let rhs = self.unary()?;
            value = match op {
                "*" => value * rhs,
                _ if rhs == 0.0 => return Err("division by zero".to_string()),
                "/" => value / rhs,
                _ => (value / rhs).floor(),
            };
        }
        Ok(value)
    }

    fn unary(&mut self) -> Result<f64, String> {
        match self.eat_op(&["+", "-"]) {
            Some("-") => Ok(-self.unary()?),
            Some(_) => self.unary(),
            None => self.power(),
        }
    }

    // Binds tighter than a unary minus on its left: -2**2 == -4
    fn power(&mut self) -> Result<f64, String> {
        let base = self.primary()?;
        if self.eat_op(&["**"]).is_some() {
            let exponent = self.unary()?;
            if base == 0.0 && exponent < 0.0 {
                return Err("0.0 cannot be raised to a negative power".to_string());
            }
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<f64, String> {
        match self.tokens.get(self.pos).cloned() {
            Some(Tok::Num(value)) => {
                self.pos += 1;
                Ok(value)
            }
            Some(Tok::LParen) => {
                self.pos += 1;
                let value = self.expr()?;
                self.expect(Tok::RParen)?;
                Ok(value)
            }
            Some(Tok::Ident(name)) => {
                self.pos += 1;
                if self.peek() == Some(&Tok::LParen) {
                    self.pos += 1;
                    let args = self.arguments()?;
                    call(&name, &args)
                } else {
                    constant(&name)
                }
            }
            _ => Err("invalid syntax".to_string()),
        }
    }

    fn arguments(&mut self) -> Result<Vec<f64>, String> {
        let mut args = Vec::new();
        if self.peek() == Some(&Tok::RParen) {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.expr()?);
            match self.peek() {
                Some(Tok::Comma) => self.pos += 1,
                Some(Tok::RParen) => {
                    self.pos += 1;
                    return Ok(args);
                }
                _ => return Err("invalid syntax".to_string()),
            }
        }
    }
}

fn constant(name: &str) -> Result<f64, String> {
    match name {
        "pi" => Ok(consts::PI),
        "e" => Ok(consts::E),
        "tau" => Ok(consts::TAU),
        _ => Err(format!("name '{}' is not defined", name)),
    }
}

fn domain(ok: bool, value: f64) -> Result<f64, String> {
    if ok {
        Ok(value)
    } else {
        Err("math domain error".to_string())
    }
}

fn call(name: &str, args: &[f64]) -> Result<f64, String> {
    let arity = |expected: usize| -> Result<(), String> {
        if args.len() == expected {
            Ok(())
        } else {
            Err(format!(
                "{}() takes exactly {} argument{} ({} given)",
                name,
                expected,
                if expected == 1 { "" } else { "s" },
                args.len()
            ))
        }
    };

    match name {
        "log" => match args {
            [x] => domain(*x > 0.0, x.ln()),
            [x, base] => domain(*x > 0.0 && *base > 0.0 && *base != 1.0, x.log(*base)),
            _ => Err(format!("log() takes 1 or 2 arguments ({} given)", args.len())),
        },
        "round" => match args {
            [x] => Ok(x.round_ties_even()),
            [x, digits] => {
                let factor = 10f64.powi(*digits as i32);
                Ok((x * factor).round_ties_even() / factor)
            }
            _ => Err(format!("round() takes 1 or 2 arguments ({} given)", args.len())),
        },
        "pow" | "atan2" | "hypot" | "fmod" | "copysign" => {
            arity(2)?;
            let (a, b) = (args[0], args[1]);
            match name {
                "pow" => Ok(a.powf(b)),
                "atan2" => Ok(a.atan2(b)),
                "hypot" => Ok(a.hypot(b)),
                "fmod" => domain(b != 0.0, a % b),
                _ => Ok(a.copysign(b)),
            }
        }
        _ => {
            let unary: fn(f64) -> Result<f64, String> = match name {
                "sqrt" => |x| domain(x >= 0.0, x.sqrt()),
                "exp" => |x| Ok(x.exp()),
                "log10" => |x| domain(x > 0.0, x.log10()),
                "log2" => |x| domain(x > 0.0, x.log2()),
                "sin" => |x| Ok(x.sin()),
                "cos" => |x| Ok(x.cos()),
                "tan" => |x| Ok(x.tan()),
                "asin" => |x| domain((-1.0..=1.0).contains(&x), x.asin()),
                "acos" => |x| domain((-1.0..=1.0).contains(&x), x.acos()),
                "atan" => |x| Ok(x.atan()),
                "sinh" => |x| Ok(x.sinh()),
                "cosh" => |x| Ok(x.cosh()),
                "tanh" => |x| Ok(x.tanh()),
                "abs" | "fabs" => |x| Ok(x.abs()),
                "floor" => |x| Ok(x.floor()),
                "ceil" => |x| Ok(x.ceil()),
                "trunc" => |x| Ok(x.trunc()),
                "degrees" => |x| Ok(x.to_degrees()),
                "radians" => |x| Ok(x.to_radians()),
                "factorial" => factorial,
                _ => return Err(format!("name '{}' is not defined", name)),
            };
            arity(1)?;
            unary(args[0])
        }
    }
}

fn factorial(x: f64) -> Result<f64, String> {
    if x.fract() != 0.0 {
        return Err("factorial() only accepts integral values".to_string());
    }
    if x < 0.0 {
        return Err("factorial() not defined for negative values".to_string());
    }
    // 171! no longer fits in an f64
    if x > 170.0 {
        return Err("result is not a finite number".to_string());
    }
    Ok((1..=x as u64).map(|n| n as f64).product())
}
