// Parser for symbolic index expressions.
//
// Grammar (left-associative, usual precedence):
//   expr    = product (("+" | "-") product)*
//   product = unary (("*" | "//" | "%") unary)*
//   unary   = "-"* (literal | atom)
//   literal = "-"? INT
//   atom    = INT | IDENT | "(" expr ")"
// A "-" directly before an integer belongs to the literal, so `-3` is the
// constant -3 and `-(3)` is its negation.
// Uses chumsky combinators over the token stream from `lexer::lex()`.
//
// Preconditions: none.
// Postconditions: returns an `IndexExpr` covering the whole input.
// Failure modes: lex or parse errors produce `ValidationError::IndexSyntax`.
// Side effects: none.

use chumsky::error::RichReason;
use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

use crate::diag::ValidationError;
use crate::indexing::{BinOp, IndexExpr, Symbol};
use crate::lexer::Token;

/// Parse an index expression such as `M * 2 + (K // 4)`.
pub fn parse_index_expr(source: &str) -> Result<IndexExpr, ValidationError> {
    let lex_result = crate::lexer::lex(source);
    if let Some(err) = lex_result.errors.first() {
        return Err(ValidationError::IndexSyntax {
            text: source.to_string(),
            message: format!("{} at {}..{}", err.message, err.span.start, err.span.end),
        });
    }
    let len = source.len();

    let token_iter = lex_result.tokens.into_iter().map(|(tok, span)| {
        let cspan: SimpleSpan = (span.start..span.end).into();
        (tok, cspan)
    });
    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(token_iter).map(eoi, |(t, s): (_, _)| (t, s));

    expr_parser(source)
        .then_ignore(end())
        .parse(stream)
        .into_result()
        .map_err(|errors| ValidationError::IndexSyntax {
            text: source.to_string(),
            message: errors
                .iter()
                .map(describe)
                .collect::<Vec<_>>()
                .join("; "),
        })
}

fn describe(err: &Rich<'_, Token, SimpleSpan>) -> String {
    let span = err.span();
    if let RichReason::Custom(msg) = err.reason() {
        return format!("{} at {}..{}", msg, span.start, span.end);
    }
    match err.found() {
        Some(tok) => format!("unexpected '{}' at {}..{}", tok, span.start, span.end),
        None => format!("unexpected end of input at {}", span.start),
    }
}

/// Signed value of a literal with magnitude `n`.
fn literal(negative: bool, n: u64) -> Option<i64> {
    let v = if negative { -i128::from(n) } else { i128::from(n) };
    i64::try_from(v).ok()
}

fn expr_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
) -> impl Parser<'tokens, I, IndexExpr, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    recursive(move |expr| {
        let symbol = just(Token::Ident).map_with(move |_, e| {
            let span: SimpleSpan = e.span();
            IndexExpr::Sym(Symbol::new(&source[span.start..span.end]))
        });
        let int = just(Token::Minus)
            .or_not()
            .then(select! { Token::Int(n) => n })
            .try_map(|(minus, n), span| {
                let negative = minus.is_some();
                literal(negative, n).map(IndexExpr::Const).ok_or_else(|| {
                    let sign = if negative { "-" } else { "" };
                    Rich::custom(span, format!("integer literal {sign}{n} out of range"))
                })
            });
        let atom = int
            .or(symbol)
            .or(expr.delimited_by(just(Token::LParen), just(Token::RParen)));

        // Leave the last "-" before an integer to the literal.
        let negate = just(Token::Minus)
            .then_ignore(any().filter(|t| !matches!(t, Token::Int(_))).rewind());
        let unary = negate
            .repeated()
            .foldr(atom, |_, operand| IndexExpr::Neg(Box::new(operand)));

        let product_op = choice((
            just(Token::Star).to(BinOp::Mul),
            just(Token::SlashSlash).to(BinOp::FloorDiv),
            just(Token::Percent).to(BinOp::Mod),
        ));
        let product = unary
            .clone()
            .foldl(product_op.then(unary).repeated(), |lhs, (op, rhs)| {
                IndexExpr::binary(op, lhs, rhs)
            });

        let sum_op = choice((
            just(Token::Plus).to(BinOp::Add),
            just(Token::Minus).to(BinOp::Sub),
        ));
        product
            .clone()
            .foldl(sum_op.then(product).repeated(), |lhs, (op, rhs)| {
                IndexExpr::binary(op, lhs, rhs)
            })
    })
}
