//! The filter operator mini-language.
//!
//! A filter is written `"<column> <tail>"`; this module parses the tail:
//!
//! ```text
//! tail     := "..." tail            -- or-null: (col IS NULL OR col <op> ?)
//!           | "IS " ("NULL" | "NOT NULL")
//!           | "NOT " tail
//!           | operator token*
//!           | ""                    -- EQ, or IN for a subquery argument
//! operator := "=" | "<>" | "<" | "<=" | ">" | ">=" | "LIKE" | "BETWEEN" | "IN"
//! token    := "?" | "%?" | "?%" | "%?%" | any other word (skipped)
//! ```
//!
//! Placeholder tokens consume arguments positionally; the `%` forms wrap
//! the corresponding value in LIKE wildcards.

use super::select::Select;
use crate::error::{Error, Result};
use crate::statement::Statement;
use crate::value::{SqlValue, ToSqlValue};

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// `=`
    Eq,
    /// `<`
    Lt,
    /// `>`
    Gt,
    /// `LIKE`
    Like,
    /// `BETWEEN ? AND ?`
    Between,
    /// `IN (...)`
    In,
    /// `IS NULL`
    IsNull,
}

/// A predicate argument: a bound value or a subquery.
#[derive(Debug, Clone)]
pub enum Arg {
    /// A value bound as a parameter.
    Value(SqlValue),
    /// A query rendered inline, its own parameters included.
    Subquery(Box<Select>),
    /// A pre-rendered statement used as a subquery.
    Statement(Statement),
}

impl Arg {
    /// Wraps anything convertible to a value.
    pub fn value(v: impl ToSqlValue) -> Self {
        Self::Value(v.to_sql_value())
    }

    const fn is_subquery(&self) -> bool {
        matches!(self, Self::Subquery(_) | Self::Statement(_))
    }

    const fn is_null(&self) -> bool {
        matches!(self, Self::Value(SqlValue::Null))
    }
}

impl From<SqlValue> for Arg {
    fn from(v: SqlValue) -> Self {
        Self::Value(v)
    }
}

impl From<Select> for Arg {
    fn from(s: Select) -> Self {
        Self::Subquery(Box::new(s))
    }
}

impl From<Statement> for Arg {
    fn from(s: Statement) -> Self {
        Self::Statement(s)
    }
}

/// A parsed condition on one column.
#[derive(Debug, Clone)]
pub struct Predicate {
    operator: Operator,
    not: bool,
    or_null: bool,
    args: Vec<Arg>,
}

impl Predicate {
    /// Builds a predicate from an explicit operator.
    #[must_use]
    pub const fn new(operator: Operator, args: Vec<Arg>) -> Self {
        Self {
            operator,
            not: false,
            or_null: false,
            args,
        }
    }

    /// Parses the operator tail of a filter.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidPredicate`] on an unknown operator, a malformed
    /// `IS` clause or a wrong number of arguments.
    pub fn parse(tail: &str, args: Vec<Arg>) -> Result<Self> {
        let mut predicate = Self::new(Operator::Eq, args);
        Parser {
            src: tail,
            predicate: &mut predicate,
        }
        .tail(tail)?;
        Ok(predicate)
    }

    /// The operator.
    #[must_use]
    pub const fn operator(&self) -> Operator {
        self.operator
    }

    /// Whether the condition is negated.
    #[must_use]
    pub const fn is_not(&self) -> bool {
        self.not
    }

    /// Whether NULL also satisfies the condition.
    #[must_use]
    pub const fn is_or_null(&self) -> bool {
        self.or_null
    }

    /// Arguments after wildcard rewriting.
    #[must_use]
    pub fn args(&self) -> &[Arg] {
        &self.args
    }

    /// Whether the predicate must be left out of the statement: every
    /// operator but IS NULL needs a first argument that is not NULL.
    #[must_use]
    pub fn is_off(&self) -> bool {
        self.operator != Operator::IsNull && self.args.first().is_none_or(Arg::is_null)
    }
}

struct Parser<'a> {
    src: &'a str,
    predicate: &'a mut Predicate,
}

impl Parser<'_> {
    fn error(&self, message: impl Into<String>) -> Error {
        Error::InvalidPredicate {
            text: self.src.to_owned(),
            message: message.into(),
        }
    }

    fn tail(&mut self, s: &str) -> Result<()> {
        if let Some(rest) = s.strip_prefix("...") {
            self.predicate.or_null = true;
            return self.tail(rest);
        }
        if let Some(rest) = s.strip_prefix("IS ") {
            self.predicate.operator = Operator::IsNull;
            return self.is_clause(rest);
        }
        if let Some(rest) = s.strip_prefix("NOT ") {
            self.predicate.not = true;
            return self.tail(rest);
        }

        let mut tokens = s.split_whitespace().peekable();
        match tokens.peek() {
            None => return self.implicit(),
            // A bare placeholder: LIKE when it carries wildcards.
            Some(&op) if op.contains('?') => {
                self.predicate.operator = if op.contains('%') {
                    Operator::Like
                } else {
                    Operator::Eq
                };
            }
            Some(&op) => {
                self.operator(op)?;
                tokens.next();
            }
        }
        self.check_arity()?;
        if self.predicate.is_off() {
            return Ok(());
        }
        self.placeholders(tokens);
        Ok(())
    }

    fn is_clause(&mut self, s: &str) -> Result<()> {
        let tokens: Vec<&str> = s.split_whitespace().collect();
        match tokens.as_slice() {
            ["NULL"] => {}
            ["NOT", "NULL"] => self.predicate.not = true,
            [] => return Err(self.error("unfinished IS")),
            _ => return Err(self.error("IS must be followed by NULL or NOT NULL")),
        }
        if !self.predicate.args.is_empty() {
            return Err(self.error("no argument can be set for IS [NOT] NULL"));
        }
        Ok(())
    }

    fn implicit(&mut self) -> Result<()> {
        let args = &self.predicate.args;
        if args.first().is_some_and(Arg::is_subquery) {
            self.predicate.operator = Operator::In;
            return Ok(());
        }
        if args.len() > 1 {
            return Err(self.error("several arguments need an explicit operator"));
        }
        self.predicate.operator = Operator::Eq;
        Ok(())
    }

    fn operator(&mut self, op: &str) -> Result<()> {
        let (operator, negate) = match op {
            "=" => (Operator::Eq, false),
            "<>" => (Operator::Eq, true),
            "<" => (Operator::Lt, false),
            "<=" => (Operator::Gt, true),
            ">" => (Operator::Gt, false),
            ">=" => (Operator::Lt, true),
            "LIKE" => (Operator::Like, false),
            "BETWEEN" => (Operator::Between, false),
            "IN" => (Operator::In, false),
            other => return Err(self.error(format!("invalid operator {other}"))),
        };
        self.predicate.operator = operator;
        if negate {
            self.predicate.not = !self.predicate.not;
        }
        Ok(())
    }

    fn check_arity(&self) -> Result<()> {
        let n = self.predicate.args.len();
        match self.predicate.operator {
            Operator::In | Operator::IsNull => Ok(()),
            Operator::Between if n != 2 => {
                Err(self.error("exactly 2 arguments must be set for BETWEEN"))
            }
            Operator::Between => Ok(()),
            op if n != 1 => Err(self.error(format!("exactly 1 argument must be set for {op:?}"))),
            _ => Ok(()),
        }
    }

    fn placeholders<'t>(&mut self, tokens: impl Iterator<Item = &'t str>) {
        let mut i = 0;
        for token in tokens {
            let (prefix, suffix) = match token {
                "?" => ("", ""),
                "%?" => ("%", ""),
                "?%" => ("", "%"),
                "%?%" => ("%", "%"),
                _ => continue,
            };
            if let Some(Arg::Value(v)) = self.predicate.args.get_mut(i) {
                if !(prefix.is_empty() && suffix.is_empty()) && !v.is_null() {
                    *v = SqlValue::Text(format!("{prefix}{}{suffix}", v.to_loose_string()));
                }
            }
            i += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(tail: &str, args: &[SqlValue]) -> Predicate {
        Predicate::parse(tail, args.iter().cloned().map(Arg::Value).collect()).unwrap()
    }

    fn text(s: &str) -> SqlValue {
        SqlValue::Text(s.into())
    }

    fn bound(p: &Predicate) -> Vec<SqlValue> {
        p.args()
            .iter()
            .filter_map(|a| match a {
                Arg::Value(v) => Some(v.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_empty_tail_is_eq() {
        let p = parse("", &[SqlValue::Int(1)]);
        assert_eq!(p.operator(), Operator::Eq);
        assert!(!p.is_not());
    }

    #[test]
    fn test_operator_table() {
        let cases = [
            ("=", Operator::Eq, false),
            ("<>", Operator::Eq, true),
            ("<", Operator::Lt, false),
            ("<=", Operator::Gt, true),
            (">", Operator::Gt, false),
            (">=", Operator::Lt, true),
            ("LIKE", Operator::Like, false),
        ];
        for (tail, op, not) in cases {
            let p = parse(tail, &[SqlValue::Int(1)]);
            assert_eq!((p.operator(), p.is_not()), (op, not), "{tail}");
        }
    }

    #[test]
    fn test_not_toggles_with_negated_operator() {
        let p = parse("NOT <>", &[SqlValue::Int(1)]);
        assert_eq!(p.operator(), Operator::Eq);
        assert!(!p.is_not());
    }

    #[test]
    fn test_wildcards() {
        assert_eq!(bound(&parse("LIKE %?%", &[text("abc")])), [text("%abc%")]);
        assert_eq!(bound(&parse("LIKE ?%", &[text("abc")])), [text("abc%")]);
        assert_eq!(bound(&parse("LIKE %?", &[text("abc")])), [text("%abc")]);
        assert_eq!(bound(&parse("LIKE ?", &[text("abc")])), [text("abc")]);
    }

    #[test]
    fn test_bare_placeholder() {
        let p = parse("%?%", &[text("abc")]);
        assert_eq!(p.operator(), Operator::Like);
        assert_eq!(bound(&p), [text("%abc%")]);
        let p = parse("?", &[text("abc")]);
        assert_eq!(p.operator(), Operator::Eq);
        assert_eq!(bound(&p), [text("abc")]);
    }

    #[test]
    fn test_between_skips_and_token() {
        let p = parse("BETWEEN ?% AND %?", &[text("a"), text("b")]);
        assert_eq!(p.operator(), Operator::Between);
        assert_eq!(bound(&p), [text("a%"), text("%b")]);
    }

    #[test]
    fn test_is_null_forms() {
        let p = parse("IS NULL", &[]);
        assert_eq!(p.operator(), Operator::IsNull);
        assert!(!p.is_not());
        assert!(!p.is_off());
        let p = parse("IS NOT NULL", &[]);
        assert!(p.is_not());
    }

    #[test]
    fn test_or_null_prefix() {
        let p = parse("...>=", &[SqlValue::Int(3)]);
        assert!(p.is_or_null());
        assert_eq!(p.operator(), Operator::Lt);
        assert!(p.is_not());
    }

    #[test]
    fn test_off_rule() {
        assert!(parse("", &[SqlValue::Null]).is_off());
        assert!(parse("", &[]).is_off());
        assert!(parse("LIKE %?%", &[SqlValue::Null]).is_off());
        assert!(parse("IN", &[]).is_off());
        assert!(!parse("IN", &[SqlValue::Int(1), SqlValue::Int(2)]).is_off());
    }

    #[test]
    fn test_off_predicate_is_not_rewritten() {
        let p = parse("BETWEEN ?% AND ?%", &[SqlValue::Null, text("z")]);
        assert!(p.is_off());
        assert_eq!(bound(&p), [SqlValue::Null, text("z")]);
    }

    #[test]
    fn test_errors() {
        let bad = |tail: &str, args: Vec<Arg>| Predicate::parse(tail, args).unwrap_err();
        assert!(matches!(bad("~", vec![Arg::value(1)]), Error::InvalidPredicate { .. }));
        assert!(matches!(bad("IS", vec![]), Error::InvalidPredicate { .. }));
        assert!(matches!(bad("IS ", vec![]), Error::InvalidPredicate { .. }));
        assert!(matches!(bad("IS NOT", vec![]), Error::InvalidPredicate { .. }));
        assert!(matches!(bad("IS NULL", vec![Arg::value(1)]), Error::InvalidPredicate { .. }));
        assert!(matches!(bad("BETWEEN", vec![Arg::value(1)]), Error::InvalidPredicate { .. }));
        assert!(matches!(
            bad("=", vec![Arg::value(1), Arg::value(2)]),
            Error::InvalidPredicate { .. }
        ));
    }
}
