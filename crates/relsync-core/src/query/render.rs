//! ANSI rendering of queries, shared by every dialect.

use super::filter::Filter;
use super::predicate::{Arg, Operator, Predicate};
use super::select::{Join, Part, ResultColumn, Select};
use crate::dialect::Dialect;
use crate::error::{Error, Result};
use crate::physical::PhysicalColumn;
use crate::statement::Statement;
use crate::value::SqlValue;

pub(crate) fn select<D: Dialect + ?Sized>(dialect: &D, select: &Select) -> Result<Statement> {
    let mut st = Statement::new("SELECT ");
    let has_joins = !select.joins().is_empty();
    for column in select.part().columns() {
        result_column(&mut st, select.part(), column, has_joins, false);
    }
    for join in select.joins() {
        for column in join.part().columns() {
            result_column(&mut st, join.part(), column, true, true);
        }
    }
    if st.last_char() == Some(',') {
        st.set_last_char(' ');
    } else {
        st.push_str("* ");
    }
    from(&mut st, select);
    for join in select.joins() {
        join_clause(dialect, &mut st, join)?;
    }
    where_clause(dialect, &mut st, select.part())?;
    if let Some(order) = select.order() {
        st.push_str(" ORDER BY ");
        st.push_str(order);
    }
    Ok(match select.page() {
        Some((offset, limit)) => dialect.paginate(st, offset, limit),
        None => st,
    })
}

pub(crate) fn count<D: Dialect + ?Sized>(dialect: &D, select: &Select) -> Result<Statement> {
    let mut st = Statement::new("SELECT COUNT(*) ");
    from(&mut st, select);
    for join in select.joins().iter().filter(|j| j.is_inner()) {
        join_clause(dialect, &mut st, join)?;
    }
    where_clause(dialect, &mut st, select.part())?;
    Ok(st)
}

pub(crate) fn delete<D: Dialect + ?Sized>(dialect: &D, select: &Select) -> Result<Statement> {
    let table = select.table();
    if select.joins().is_empty() {
        let mut st = Statement::new(format!("DELETE FROM {}", table.name()));
        if select.part().alias() != table.name() {
            st.push_str(&dialect.delete_alias(select.part().alias()));
        }
        where_clause(dialect, &mut st, select.part())?;
        return Ok(st);
    }
    let pk = table.scalar_pk()?.name();
    let mut st = Statement::new(format!(
        "DELETE FROM {} WHERE {pk} IN (SELECT {}.{pk} ",
        table.name(),
        select.part().alias()
    ));
    from(&mut st, select);
    for join in select.joins() {
        join_clause(dialect, &mut st, join)?;
    }
    where_clause(dialect, &mut st, select.part())?;
    st.push(')');
    Ok(st)
}

pub(crate) fn predicate<D: Dialect + ?Sized>(
    dialect: &D,
    st: &mut Statement,
    predicate: &Predicate,
    column: &PhysicalColumn,
) -> Result<()> {
    let ty = Some(column.ty);
    let args = predicate.args();
    match predicate.operator() {
        Operator::IsNull => st.push_str(" IS NULL"),
        Operator::Eq => st.push_param("=?", value(predicate, args, 0)?, ty),
        Operator::Gt => st.push_param(">?", value(predicate, args, 0)?, ty),
        Operator::Lt => st.push_param("<?", value(predicate, args, 0)?, ty),
        Operator::Like => st.push_param(" LIKE ?", value(predicate, args, 0)?, ty),
        Operator::Between => {
            st.push_param(" BETWEEN ?", value(predicate, args, 0)?, ty);
            st.push_param(" AND ?", value(predicate, args, 1)?, ty);
        }
        Operator::In => {
            st.push_str(" IN(");
            match args {
                [Arg::Subquery(sub)] => {
                    st.append(dialect.select_statement(sub)?);
                    st.push(')');
                }
                [Arg::Statement(sub)] => {
                    st.append(sub.clone());
                    st.push(')');
                }
                _ => {
                    for i in 0..args.len() {
                        st.push_param("?,", value(predicate, args, i)?, ty);
                    }
                    st.set_last_char(')');
                }
            }
        }
    }
    Ok(())
}

fn value(predicate: &Predicate, args: &[Arg], i: usize) -> Result<SqlValue> {
    match args.get(i) {
        Some(Arg::Value(v)) => Ok(v.clone()),
        Some(_) => Err(Error::InvalidPredicate {
            text: format!("{:?}", predicate.operator()),
            message: String::from("a subquery is only allowed with IN"),
        }),
        None => Err(Error::InvalidPredicate {
            text: format!("{:?}", predicate.operator()),
            message: format!("argument {} is missing", i + 1),
        }),
    }
}

fn result_column(
    st: &mut Statement,
    part: &Part,
    column: &ResultColumn,
    qualified: bool,
    labelled_by_alias: bool,
) {
    if qualified {
        st.push_str(part.alias());
        st.push('.');
    }
    st.push_str(column.name());
    st.push_str(" \"");
    match column.label() {
        Some(label) => st.push_str(label),
        None => {
            if labelled_by_alias {
                st.push_str(&part.alias().to_lowercase());
                st.push('.');
            }
            st.push_str(&column.name().to_lowercase());
        }
    }
    st.push_str("\",");
}

fn from(st: &mut Statement, select: &Select) {
    let name = select.table().name();
    st.push_str("FROM ");
    st.push_str(name);
    if select.part().alias() != name {
        st.push(' ');
        st.push_str(select.part().alias());
    }
}

fn join_clause<D: Dialect + ?Sized>(dialect: &D, st: &mut Statement, join: &Join) -> Result<()> {
    let part = join.part();
    let name = part.table().name();
    st.push_str(if join.is_inner() {
        " INNER JOIN "
    } else {
        " LEFT JOIN "
    });
    st.push_str(name);
    if part.alias() != name {
        st.push(' ');
        st.push_str(part.alias());
    }
    st.push_str(" ON ");
    let filtered = !part.filters().is_empty();
    if filtered {
        st.push('(');
    }
    st.push_str(&join.condition().sql());
    if filtered {
        st.push_str(" AND ");
        filters(dialect, st, part)?;
        st.push(')');
    }
    Ok(())
}

fn where_clause<D: Dialect + ?Sized>(dialect: &D, st: &mut Statement, part: &Part) -> Result<()> {
    if part.filters().is_empty() {
        return Ok(());
    }
    st.push_str(" WHERE ");
    filters(dialect, st, part)
}

fn filters<D: Dialect + ?Sized>(dialect: &D, st: &mut Statement, part: &Part) -> Result<()> {
    for (i, f) in part.filters().iter().enumerate() {
        if i > 0 {
            st.push_str(" AND ");
        }
        filter(dialect, st, part, f)?;
    }
    Ok(())
}

fn filter<D: Dialect + ?Sized>(
    dialect: &D,
    st: &mut Statement,
    part: &Part,
    f: &Filter,
) -> Result<()> {
    let chained = !f.alternatives().is_empty();
    if chained {
        st.push('(');
    }
    let p = f.predicate();
    let qualified = format!("{}.{}", part.alias(), f.column());
    if p.is_or_null() {
        st.push('(');
        st.push_str(&qualified);
        st.push_str(" IS NULL OR ");
    }
    if p.is_not() {
        st.push_str("NOT(");
    }
    st.push_str(&qualified);
    let column = part.table().require_column(f.column())?.physical();
    dialect.render_predicate(st, p, column)?;
    if p.is_not() {
        st.push(')');
    }
    if p.is_or_null() {
        st.push(')');
    }
    for alternative in f.alternatives() {
        st.push_str(" OR ");
        filter(dialect, st, part, alternative)?;
    }
    if chained {
        st.push(')');
    }
    Ok(())
}
