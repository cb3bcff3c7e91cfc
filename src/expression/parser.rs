use serde_json::Value as Json;
use sqlparser::ast as sql_ast;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::Token;

use super::ast::{BinaryOp, Expr};
use crate::core::{PlatformError, Result};

/// Parses a boolean/filter expression such as
/// `Status = 'Paid' AND input.Total >= 100`.
pub fn parse_expression(input: &str) -> Result<Expr> {
    if input.trim().is_empty() {
        return Err(PlatformError::Expression("Empty expression".into()));
    }
    let dialect = GenericDialect {};
    let mut parser = Parser::new(&dialect).try_with_sql(input)?;
    let expr = parser.parse_expr()?;
    if parser.peek_token().token != Token::EOF {
        return Err(PlatformError::Expression(format!(
            "Unexpected trailing input in '{}'",
            input
        )));
    }
    convert(expr)
}

fn convert(expr: sql_ast::Expr) -> Result<Expr> {
    match expr {
        sql_ast::Expr::Identifier(ident) => Ok(Expr::Path(vec![ident.value])),
        sql_ast::Expr::CompoundIdentifier(idents) => Ok(Expr::Path(
            idents.into_iter().map(|i| i.value).collect(),
        )),
        sql_ast::Expr::Value(val) => Ok(Expr::Literal(convert_value(&val.value)?)),
        sql_ast::Expr::Nested(inner) => convert(*inner),
        sql_ast::Expr::UnaryOp { op, expr } => {
            let inner = convert(*expr)?;
            match op {
                sql_ast::UnaryOperator::Not => Ok(Expr::Not(Box::new(inner))),
                sql_ast::UnaryOperator::Minus => Ok(Expr::Negate(Box::new(inner))),
                sql_ast::UnaryOperator::Plus => Ok(inner),
                other => Err(PlatformError::Expression(format!(
                    "Unsupported unary operator: {}",
                    other
                ))),
            }
        }
        sql_ast::Expr::BinaryOp { left, op, right } => Ok(Expr::Binary {
            left: Box::new(convert(*left)?),
            op: convert_binary_op(&op)?,
            right: Box::new(convert(*right)?),
        }),
        sql_ast::Expr::IsNull(inner) => Ok(Expr::IsNull {
            expr: Box::new(convert(*inner)?),
            negated: false,
        }),
        sql_ast::Expr::IsNotNull(inner) => Ok(Expr::IsNull {
            expr: Box::new(convert(*inner)?),
            negated: true,
        }),
        sql_ast::Expr::InList {
            expr,
            list,
            negated,
        } => Ok(Expr::InList {
            expr: Box::new(convert(*expr)?),
            list: list.into_iter().map(convert).collect::<Result<Vec<_>>>()?,
            negated,
        }),
        sql_ast::Expr::Like {
            negated,
            expr,
            pattern,
            escape_char,
            ..
        } => {
            if escape_char.is_some() {
                return Err(PlatformError::Expression("LIKE ESCAPE not supported".into()));
            }
            Ok(Expr::Like {
                expr: Box::new(convert(*expr)?),
                pattern: Box::new(convert(*pattern)?),
                negated,
                case_insensitive: false,
            })
        }
        sql_ast::Expr::ILike {
            negated,
            expr,
            pattern,
            escape_char,
            ..
        } => {
            if escape_char.is_some() {
                return Err(PlatformError::Expression("ILIKE ESCAPE not supported".into()));
            }
            Ok(Expr::Like {
                expr: Box::new(convert(*expr)?),
                pattern: Box::new(convert(*pattern)?),
                negated,
                case_insensitive: true,
            })
        }
        other => Err(PlatformError::Expression(format!(
            "Unsupported expression: {}",
            other
        ))),
    }
}

fn convert_value(val: &sql_ast::Value) -> Result<Json> {
    match val {
        sql_ast::Value::Number(n, _) => {
            if let Ok(i) = n.parse::<i64>() {
                Ok(Json::from(i))
            } else if let Ok(f) = n.parse::<f64>() {
                serde_json::Number::from_f64(f)
                    .map(Json::Number)
                    .ok_or_else(|| PlatformError::Expression(format!("Invalid number: {}", n)))
            } else {
                Err(PlatformError::Expression(format!("Invalid number: {}", n)))
            }
        }
        sql_ast::Value::SingleQuotedString(s) | sql_ast::Value::DoubleQuotedString(s) => {
            Ok(Json::String(s.clone()))
        }
        sql_ast::Value::Boolean(b) => Ok(Json::Bool(*b)),
        sql_ast::Value::Null => Ok(Json::Null),
        other => Err(PlatformError::Expression(format!(
            "Unsupported literal: {}",
            other
        ))),
    }
}

fn convert_binary_op(op: &sql_ast::BinaryOperator) -> Result<BinaryOp> {
    use sql_ast::BinaryOperator as Op;
    match op {
        Op::Eq => Ok(BinaryOp::Eq),
        Op::NotEq => Ok(BinaryOp::NotEq),
        Op::Lt => Ok(BinaryOp::Lt),
        Op::LtEq => Ok(BinaryOp::LtEq),
        Op::Gt => Ok(BinaryOp::Gt),
        Op::GtEq => Ok(BinaryOp::GtEq),
        Op::And => Ok(BinaryOp::And),
        Op::Or => Ok(BinaryOp::Or),
        Op::Plus => Ok(BinaryOp::Plus),
        Op::Minus => Ok(BinaryOp::Minus),
        Op::Multiply => Ok(BinaryOp::Multiply),
        Op::Divide => Ok(BinaryOp::Divide),
        Op::Modulo => Ok(BinaryOp::Modulo),
        other => Err(PlatformError::Expression(format!(
            "Unsupported operator: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_comparison_chain() {
        let expr = parse_expression("Status = 'Paid' AND input.Total >= 100").unwrap();
        match expr {
            Expr::Binary {
                op: BinaryOp::And,
                right,
                ..
            } => match *right {
                Expr::Binary { left, op, right } => {
                    assert_eq!(*left, Expr::path("input.Total"));
                    assert_eq!(op, BinaryOp::GtEq);
                    assert_eq!(*right, Expr::Literal(json!(100)));
                }
                other => panic!("unexpected right side: {:?}", other),
            },
            other => panic!("unexpected expression: {:?}", other),
        }
    }

    #[test]
    fn test_parse_in_like_and_null_checks() {
        assert!(matches!(
            parse_expression("Region NOT IN ('EU', 'US')").unwrap(),
            Expr::InList { negated: true, .. }
        ));
        assert!(matches!(
            parse_expression("Email LIKE '%@example.com'").unwrap(),
            Expr::Like { negated: false, .. }
        ));
        assert!(matches!(
            parse_expression("ShippedAt IS NOT NULL").unwrap(),
            Expr::IsNull { negated: true, .. }
        ));
    }

    #[test]
    fn test_unsupported_constructs_are_rejected() {
        assert!(parse_expression("").is_err());
        assert!(parse_expression("1 = 1 garbage").is_err());
        assert!(parse_expression("(SELECT 1)").is_err());
        assert!(parse_expression("Total BETWEEN 1 AND 5").is_err());
    }
}
