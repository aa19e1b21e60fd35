//! Sandboxed dice arithmetic
//!
//! Field text is untrusted, so arithmetic is never handed to a general
//! evaluator. The accepted language is exactly:
//!
//! - non-negative integer literals and `NdM` dice terms
//! - unary `+` / `-`
//! - binary `+ - * / // % **` with the usual precedence
//!   (`**` is right-associative and binds tighter than a unary minus on its left)
//! - parentheses
//!
//! Everything else is rejected with an [`UnsafeExpressionError`] before any
//! evaluation takes place.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use logos::Logos;
use rand::Rng;
use std::fmt;
use std::ops::RangeInclusive;
use thiserror::Error;

/// Upper bound on the dice count of a single `NdM` term.
pub const MAX_DICE: i64 = 100_000;

/// Upper bound on parenthesis / unary nesting.
const MAX_NESTING: usize = 64;

/// Characters allowed in arithmetic text besides whitespace and dice terms.
pub const ARITHMETIC_CHARS: &str = "0123456789()%*/+-";

/// The evaluator refused an expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("while evaluating '{expr}': {message}, this expression will not be resolved")]
pub struct UnsafeExpressionError {
    pub expr: String,
    pub message: String,
}

impl UnsafeExpressionError {
    fn new(expr: &str, message: impl Into<String>) -> Self {
        Self {
            expr: expr.to_string(),
            message: message.into(),
        }
    }
}

/// Result of evaluating arithmetic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }

    /// Integer value of the result, truncating floats toward zero.
    pub fn truncate(self) -> i64 {
        match self {
            Number::Int(i) => i,
            Number::Float(f) => f.trunc() as i64,
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Int(i) => write!(f, "{i}"),
            Number::Float(x) if x.fract() == 0.0 && x.abs() < 1e16 => write!(f, "{x:.1}"),
            Number::Float(x) => write!(f, "{x}"),
        }
    }
}

/// Possible totals of `count` dice with `sides` sides each.
///
/// Non-positive counts or sides always total `0`.
pub fn dice_range(count: i64, sides: i64) -> RangeInclusive<i64> {
    if count <= 0 || sides <= 0 {
        return 0..=0;
    }
    count..=count.saturating_mul(sides)
}

/// Roll `count` dice with `sides` sides each and sum them.
pub fn roll_dice<R: Rng + ?Sized>(count: i64, sides: i64, rng: &mut R) -> i64 {
    if count <= 0 || sides <= 0 {
        return 0;
    }
    (0..count).map(|_| rng.random_range(1..=sides)).sum()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Plus,
    Minus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

impl BinaryOp {
    fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::FloorDiv => "//",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "**",
        }
    }
}

/// Restricted expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Int(i64),
    Dice { count: i64, sides: i64 },
    Unary(UnaryOp, Box<Node>),
    Binary(BinaryOp, Box<Node>, Box<Node>),
}

/// A parsed dice-arithmetic expression.
///
/// Parsing happens once; every call to [`DiceArith::evaluate`] rolls its
/// dice again.
#[derive(Debug, Clone, PartialEq)]
pub struct DiceArith {
    raw: String,
    tree: Node,
}

impl DiceArith {
    pub fn parse(text: &str) -> Result<Self, UnsafeExpressionError> {
        let tree = parse_tree(text)?;
        Ok(Self {
            raw: text.to_string(),
            tree,
        })
    }

    /// The text this expression was parsed from
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn tree(&self) -> &Node {
        &self.tree
    }

    pub fn evaluate<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Number, UnsafeExpressionError> {
        let value = eval(&self.tree, rng).map_err(|m| UnsafeExpressionError::new(&self.raw, m))?;
        match value {
            Number::Float(f) if !f.is_finite() => Err(UnsafeExpressionError::new(
                &self.raw,
                "result is not a finite number",
            )),
            v => Ok(v),
        }
    }
}

/// Parse and evaluate `text` in one go.
pub fn eval_dice_arithmetic<R: Rng + ?Sized>(
    text: &str,
    rng: &mut R,
) -> Result<Number, UnsafeExpressionError> {
    DiceArith::parse(text)?.evaluate(rng)
}

/// Arithmetic token, with dice terms and integers already range-checked.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Int(i64),
    Dice(i64, i64),
    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    DoubleSlash,
    Percent,
    LParen,
    RParen,
}

impl Token {
    /// Does an operand have to follow this token? A sign after such a
    /// token is unary.
    fn expects_operand(self) -> bool {
        !matches!(self, Token::Int(_) | Token::Dice(..) | Token::RParen)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Int(i) => write!(f, "{i}"),
            Token::Dice(n, m) => write!(f, "{n}d{m}"),
            Token::Plus => f.write_str("+"),
            Token::Minus => f.write_str("-"),
            Token::Star => f.write_str("*"),
            Token::DoubleStar => f.write_str("**"),
            Token::Slash => f.write_str("/"),
            Token::DoubleSlash => f.write_str("//"),
            Token::Percent => f.write_str("%"),
            Token::LParen => f.write_str("("),
            Token::RParen => f.write_str(")"),
        }
    }
}

/// Raw logos token, converted to [`Token`] once its text is checked.
#[derive(Logos, Debug, Clone, Copy, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
enum RawToken {
    #[regex(r"[0-9]+d[0-9]+")]
    Dice,

    #[regex(r"[0-9]+")]
    Int,

    #[token("+")]
    Plus,

    #[token("-")]
    Minus,

    #[token("*")]
    Star,

    #[token("**")]
    DoubleStar,

    #[token("/")]
    Slash,

    #[token("//")]
    DoubleSlash,

    #[token("%")]
    Percent,

    #[token("(")]
    LParen,

    #[token(")")]
    RParen,
}

fn read_int(expr: &str, digits: &str) -> Result<i64, UnsafeExpressionError> {
    digits
        .parse::<i64>()
        .map_err(|_| UnsafeExpressionError::new(expr, format!("integer '{digits}' is too large")))
}

fn dice_token(expr: &str, term: &str) -> Result<Token, UnsafeExpressionError> {
    let (count, sides) = term.split_once('d').unwrap_or((term, ""));
    let count = read_int(expr, count)?;
    let sides = read_int(expr, sides)?;
    if count > MAX_DICE {
        return Err(UnsafeExpressionError::new(
            expr,
            format!("dice count {count} exceeds the limit of {MAX_DICE}"),
        ));
    }
    if count.checked_mul(sides).is_none() {
        return Err(UnsafeExpressionError::new(
            expr,
            format!("dice term '{term}' is too large"),
        ));
    }
    Ok(Token::Dice(count, sides))
}

/// Lex `text`, stopping at the first character outside the arithmetic
/// alphabet.
fn lex(text: &str) -> Result<Vec<(Token, SimpleSpan)>, UnsafeExpressionError> {
    let mut tokens = Vec::new();
    let mut lexer = RawToken::lexer(text);

    while let Some(result) = lexer.next() {
        let span = lexer.span();
        let slice = lexer.slice();
        let token = match result {
            Ok(RawToken::Dice) => dice_token(text, slice)?,
            Ok(RawToken::Int) => Token::Int(read_int(text, slice)?),
            Ok(RawToken::Plus) => Token::Plus,
            Ok(RawToken::Minus) => Token::Minus,
            Ok(RawToken::Star) => Token::Star,
            Ok(RawToken::DoubleStar) => Token::DoubleStar,
            Ok(RawToken::Slash) => Token::Slash,
            Ok(RawToken::DoubleSlash) => Token::DoubleSlash,
            Ok(RawToken::Percent) => Token::Percent,
            Ok(RawToken::LParen) => Token::LParen,
            Ok(RawToken::RParen) => Token::RParen,
            Err(()) => {
                let bad = slice.chars().next().unwrap_or('?');
                return Err(UnsafeExpressionError::new(
                    text,
                    format!(
                        "found non-math character '{bad}' at offset {} (allowed: {ARITHMETIC_CHARS} and NdM dice)",
                        span.start
                    ),
                ));
            }
        };
        tokens.push((token, SimpleSpan::from(span)));
    }

    Ok(tokens)
}

/// Deepest nesting of parentheses, unary signs and `**` chains.
fn nesting_depth(tokens: &[(Token, SimpleSpan)]) -> usize {
    // length of the open sign / power chain at each parenthesis level
    let mut chains = vec![0usize];
    let mut current = 0;
    let mut deepest = 0;
    let mut previous: Option<Token> = None;

    for &(token, _) in tokens {
        let unary = previous.is_none_or(Token::expects_operand);
        match token {
            Token::LParen => {
                chains.push(0);
                current += 1;
            }
            Token::RParen if chains.len() > 1 => {
                if let Some(chain) = chains.pop() {
                    current -= chain + 1;
                }
            }
            Token::Plus | Token::Minus if unary => {
                if let Some(chain) = chains.last_mut() {
                    *chain += 1;
                }
                current += 1;
            }
            Token::DoubleStar => {
                if let Some(chain) = chains.last_mut() {
                    *chain += 1;
                }
                current += 1;
            }
            t if t.expects_operand() => {
                if let Some(chain) = chains.last_mut() {
                    current -= *chain;
                    *chain = 0;
                }
            }
            _ => {}
        }
        deepest = deepest.max(current);
        previous = Some(token);
    }
    deepest
}

fn binary(lhs: Node, (op, rhs): (BinaryOp, Node)) -> Node {
    Node::Binary(op, Box::new(lhs), Box::new(rhs))
}

/// The restricted arithmetic grammar:
///
/// ```text
/// expr   := term (('+' | '-') term)*
/// term   := factor (('*' | '/' | '//' | '%') factor)*
/// factor := ('+' | '-') factor | atom ('**' factor)?
/// atom   := INT | DICE | '(' expr ')'
/// ```
fn arith_parser<'a, I>() -> impl Parser<'a, I, Node, extra::Err<Rich<'a, Token>>> + Clone
where
    I: ValueInput<'a, Token = Token, Span = SimpleSpan>,
{
    recursive(|expr| {
        let number = select! {
            Token::Int(i) => Node::Int(i),
            Token::Dice(count, sides) => Node::Dice { count, sides },
        }
        .labelled("number or dice");
        let atom = number.or(expr.delimited_by(just(Token::LParen), just(Token::RParen)));

        let factor = recursive(|factor| {
            let sign = select! {
                Token::Plus => UnaryOp::Plus,
                Token::Minus => UnaryOp::Minus,
            };
            let unary = sign
                .then(factor.clone())
                .map(|(op, operand)| Node::Unary(op, Box::new(operand)));
            let power = atom
                .then(just(Token::DoubleStar).ignore_then(factor).or_not())
                .map(|(base, exponent)| match exponent {
                    Some(exponent) => Node::Binary(BinaryOp::Pow, Box::new(base), Box::new(exponent)),
                    None => base,
                });
            unary.or(power)
        });

        let product = select! {
            Token::Star => BinaryOp::Mul,
            Token::Slash => BinaryOp::Div,
            Token::DoubleSlash => BinaryOp::FloorDiv,
            Token::Percent => BinaryOp::Mod,
        };
        let term = factor.clone().foldl(product.then(factor).repeated(), binary);

        let sum = select! {
            Token::Plus => BinaryOp::Add,
            Token::Minus => BinaryOp::Sub,
        };
        term.clone().foldl(sum.then(term).repeated(), binary)
    })
}

fn parse_tree(text: &str) -> Result<Node, UnsafeExpressionError> {
    let tokens = lex(text)?;
    if tokens.is_empty() {
        return Err(UnsafeExpressionError::new(text, "empty expression"));
    }
    if nesting_depth(&tokens) > MAX_NESTING {
        return Err(UnsafeExpressionError::new(
            text,
            format!("nesting deeper than {MAX_NESTING} levels"),
        ));
    }

    let eoi: SimpleSpan = (text.len()..text.len()).into();
    let stream = Stream::from_iter(tokens).map(eoi, |(t, s): (_, _)| (t, s));
    arith_parser()
        .then_ignore(end())
        .parse(stream)
        .into_result()
        .map_err(|errors| {
            let message = errors
                .first()
                .map(ToString::to_string)
                .unwrap_or_else(|| "invalid expression".to_string());
            UnsafeExpressionError::new(text, message)
        })
}

fn eval<R: Rng + ?Sized>(node: &Node, rng: &mut R) -> Result<Number, String> {
    match node {
        Node::Int(i) => Ok(Number::Int(*i)),
        Node::Dice { count, sides } => Ok(Number::Int(roll_dice(*count, *sides, rng))),
        Node::Unary(op, operand) => {
            let value = eval(operand, rng)?;
            match (op, value) {
                (UnaryOp::Plus, v) => Ok(v),
                (UnaryOp::Minus, Number::Int(i)) => i
                    .checked_neg()
                    .map(Number::Int)
                    .ok_or_else(|| "integer overflow".to_string()),
                (UnaryOp::Minus, Number::Float(f)) => Ok(Number::Float(-f)),
            }
        }
        Node::Binary(op, lhs, rhs) => {
            let lhs = eval(lhs, rng)?;
            let rhs = eval(rhs, rng)?;
            apply(*op, lhs, rhs)
        }
    }
}

fn overflow(op: BinaryOp) -> String {
    format!("integer overflow in '{}'", op.symbol())
}

fn apply(op: BinaryOp, lhs: Number, rhs: Number) -> Result<Number, String> {
    use Number::{Float, Int};

    match (op, lhs, rhs) {
        (BinaryOp::Div | BinaryOp::FloorDiv | BinaryOp::Mod, _, rhs) if rhs.as_f64() == 0.0 => {
            Err("division by zero".to_string())
        }
        (BinaryOp::Div, a, b) => Ok(Float(a.as_f64() / b.as_f64())),

        (BinaryOp::Add, Int(a), Int(b)) => a.checked_add(b).map(Int).ok_or_else(|| overflow(op)),
        (BinaryOp::Sub, Int(a), Int(b)) => a.checked_sub(b).map(Int).ok_or_else(|| overflow(op)),
        (BinaryOp::Mul, Int(a), Int(b)) => a.checked_mul(b).map(Int).ok_or_else(|| overflow(op)),
        (BinaryOp::FloorDiv, Int(a), Int(b)) => {
            let q = a.checked_div(b).ok_or_else(|| overflow(op))?;
            if a % b != 0 && ((a < 0) != (b < 0)) {
                Ok(Int(q - 1))
            } else {
                Ok(Int(q))
            }
        }
        (BinaryOp::Mod, Int(a), Int(b)) => {
            let r = a.checked_rem(b).ok_or_else(|| overflow(op))?;
            if r != 0 && ((r < 0) != (b < 0)) {
                Ok(Int(r + b))
            } else {
                Ok(Int(r))
            }
        }
        (BinaryOp::Pow, Int(a), Int(b)) if b >= 0 => {
            let exp = u32::try_from(b).map_err(|_| overflow(op))?;
            a.checked_pow(exp).map(Int).ok_or_else(|| overflow(op))
        }
        (BinaryOp::Pow, a, b) => {
            if a.as_f64() == 0.0 && b.as_f64() < 0.0 {
                return Err("division by zero".to_string());
            }
            if a.as_f64() < 0.0 && b.as_f64().fract() != 0.0 {
                return Err("fractional power of a negative number".to_string());
            }
            Ok(Float(a.as_f64().powf(b.as_f64())))
        }

        (BinaryOp::Add, a, b) => Ok(Float(a.as_f64() + b.as_f64())),
        (BinaryOp::Sub, a, b) => Ok(Float(a.as_f64() - b.as_f64())),
        (BinaryOp::Mul, a, b) => Ok(Float(a.as_f64() * b.as_f64())),
        (BinaryOp::FloorDiv, a, b) => Ok(Float((a.as_f64() / b.as_f64()).floor())),
        (BinaryOp::Mod, a, b) => {
            let (a, b) = (a.as_f64(), b.as_f64());
            let r = a % b;
            if r != 0.0 && ((r < 0.0) != (b < 0.0)) {
                Ok(Float(r + b))
            } else {
                Ok(Float(r))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use proptest::prelude::any;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn eval_str(text: &str) -> Result<Number, UnsafeExpressionError> {
        let mut rng = StdRng::seed_from_u64(7);
        eval_dice_arithmetic(text, &mut rng)
    }

    fn shown(text: &str) -> String {
        eval_str(text).unwrap().to_string()
    }

    #[test]
    fn test_integer_arithmetic() {
        assert_eq!(shown("1 + 2 * 3"), "7");
        assert_eq!(shown("(1 + 2) * 3"), "9");
        assert_eq!(shown("10 - 4 - 3"), "3");
        assert_eq!(shown("+5"), "5");
        assert_eq!(shown("--5"), "5");
    }

    #[test]
    fn test_true_division_is_float() {
        assert_eq!(shown("7 / 2"), "3.5");
        assert_eq!(shown("6 / 3"), "2.0");
    }

    #[test]
    fn test_floor_division_and_modulo_follow_the_divisor() {
        assert_eq!(shown("7 // 2"), "3");
        assert_eq!(shown("7 // -2"), "-4");
        assert_eq!(shown("-7 // 2"), "-4");
        assert_eq!(shown("-7 % 3"), "2");
        assert_eq!(shown("7 % -3"), "-2");
        assert_eq!(shown("7 / 2 // 1"), "3.0");
    }

    #[test]
    fn test_power_binds_right_and_tighter_than_unary_minus() {
        assert_eq!(shown("2 ** 3 ** 2"), "512");
        assert_eq!(shown("-2 ** 2"), "-4");
        assert_eq!(shown("2 ** -1"), "0.5");
    }

    #[test]
    fn test_mixed_expression() {
        assert_eq!(shown("-(1 + 2 - 3 * 4 / 5 ** 6 // 7) - +(8 + 9 + 10)"), "-30.0");
    }

    #[test]
    fn test_rejects_non_math_characters() {
        let err = eval_str("__import__('os')").unwrap_err();
        assert!(err.message.contains("non-math character '_'"));
        assert!(eval_str("1 + x").is_err());
        assert!(eval_str("1.5 + 2").is_err());
        assert!(eval_str("d6").is_err());
        assert!(eval_str("2d").is_err());
    }

    #[test]
    fn test_rejects_malformed_syntax() {
        assert!(eval_str("").is_err());
        assert!(eval_str("   ").is_err());
        assert!(eval_str("1 +").is_err());
        assert!(eval_str("(1 + 2").is_err());
        assert!(eval_str("1 + 2)").is_err());
        assert!(eval_str("1 2").is_err());
        assert!(eval_str("* 3").is_err());
        assert!(eval_str("1 *** 2").is_err());
    }

    #[test]
    fn test_runtime_failures_are_rejected() {
        assert!(eval_str("1 / 0").unwrap_err().message.contains("division by zero"));
        assert!(eval_str("1 // 0").is_err());
        assert!(eval_str("1 % 0").is_err());
        assert!(eval_str("0 ** -1").is_err());
        assert!(eval_str("9 ** 9 ** 9").unwrap_err().message.contains("overflow"));
        assert!(eval_str("9223372036854775807 + 1").is_err());
    }

    #[test]
    fn test_excessive_nesting_is_rejected() {
        let deep = format!("{}1{}", "(".repeat(200), ")".repeat(200));
        assert!(eval_str(&deep).unwrap_err().message.contains("nesting"));
        let ok = format!("{}1{}", "(".repeat(20), ")".repeat(20));
        assert_eq!(shown(&ok), "1");

        let signs = format!("{}1", "- ".repeat(100));
        assert!(eval_str(&signs).unwrap_err().message.contains("nesting"));
        let powers = format!("1{}", " ** 1".repeat(100));
        assert!(eval_str(&powers).unwrap_err().message.contains("nesting"));
    }

    #[test]
    fn test_long_flat_chains_are_not_nesting() {
        let sum = vec!["1"; 500].join(" + ");
        assert_eq!(shown(&sum), "500");
        let products = vec!["(-1)"; 200].join(" * ");
        assert_eq!(shown(&products), "1");
    }

    #[test]
    fn test_nesting_depth_counts_open_chains() {
        let depth = |text: &str| nesting_depth(&lex(text).unwrap());
        assert_eq!(depth("1 + 2 - 3"), 0);
        assert_eq!(depth("-1"), 1);
        assert_eq!(depth("-(1 - -2)"), 3);
        assert_eq!(depth("2 ** 3 ** 2"), 2);
        assert_eq!(depth("(1) + (2) + (3)"), 1);
    }

    #[test]
    fn test_dice_limits() {
        assert!(eval_str("100001d6").is_err());
        assert!(eval_str("5d9223372036854775807").is_err());
    }

    #[test]
    fn test_zero_dice_total_zero() {
        assert_eq!(shown("0d6"), "0");
        assert_eq!(shown("3d0"), "0");
        assert_eq!(dice_range(0, 6), 0..=0);
        assert_eq!(dice_range(2, 6), 2..=12);
    }

    #[test]
    fn test_each_dice_term_rolls_independently() {
        let expr = DiceArith::parse("1d1000000 - 1d1000000").unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let any_nonzero = (0..20).any(|_| expr.evaluate(&mut rng).unwrap() != Number::Int(0));
        assert!(any_nonzero);
    }

    #[test]
    fn test_parse_keeps_raw_text() {
        let expr = DiceArith::parse("2d6 + 3").unwrap();
        assert_eq!(expr.raw(), "2d6 + 3");
        assert_eq!(
            expr.tree(),
            &Node::Binary(
                BinaryOp::Add,
                Box::new(Node::Dice { count: 2, sides: 6 }),
                Box::new(Node::Int(3)),
            )
        );
    }

    #[test]
    fn test_number_truncate() {
        assert_eq!(Number::Float(2.9).truncate(), 2);
        assert_eq!(Number::Float(-2.9).truncate(), -2);
        assert_eq!(Number::Int(4).truncate(), 4);
    }

    proptest! {
        #[test]
        fn dice_total_within_bounds(count in 1i64..50, sides in 1i64..100, seed in any::<u64>()) {
            let mut rng = StdRng::seed_from_u64(seed);
            let total = eval_dice_arithmetic(&format!("{count}d{sides}"), &mut rng).unwrap();
            prop_assert!(dice_range(count, sides).contains(&total.truncate()));
        }

        #[test]
        fn non_positive_dice_roll_zero(count in -50i64..=0, sides in -50i64..100, seed in any::<u64>()) {
            let mut rng = StdRng::seed_from_u64(seed);
            prop_assert_eq!(roll_dice(count, sides, &mut rng), 0);
            prop_assert_eq!(roll_dice(sides.abs() + 1, -sides.abs(), &mut rng), 0);
        }

        #[test]
        fn two_d_six_plus_three(seed in any::<u64>()) {
            let mut rng = StdRng::seed_from_u64(seed);
            let value = eval_dice_arithmetic("2d6+3", &mut rng).unwrap().truncate();
            prop_assert!((5..=15).contains(&value));
        }
    }
}
