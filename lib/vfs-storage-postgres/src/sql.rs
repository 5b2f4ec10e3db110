//! SQL rendering for queries, inserts and updates.
//!
//! Rendering is pure: a statement is SQL text plus its parameters, each
//! tagged with the generic column type used to bind it.

use vfs_storage::{Condition, Entity, Insert, Order, Query, Relation, StoreError, Update, Value};

/// Prefix of the JSONB columns carrying eagerly loaded relations.
pub const RELATION_PREFIX: &str = "__rel_";

const BIGINT_MAX: u64 = i64::MAX as u64;

/// A bound parameter: the value plus the generic column type it targets.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub value: Value,
    pub column_type: &'static str,
}

/// SQL text and its parameters, in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Param>,
}

impl Statement {
    fn new() -> Self {
        Self {
            sql: String::new(),
            params: Vec::new(),
        }
    }

    /// Add a parameter and return its placeholder.
    fn bind(&mut self, value: Value, column_type: &'static str) -> String {
        self.params.push(Param { value, column_type });
        format!("${}", self.params.len())
    }
}

/// Qualify own columns with the table name; anything else is left as written.
fn column<T: Entity>(name: &str) -> String {
    if T::columns().contains(&name) {
        format!("{}.{}", T::table_name(), name)
    } else {
        name.to_string()
    }
}

fn render_condition<T: Entity>(stmt: &mut Statement, condition: &Condition) -> String {
    let compare = |stmt: &mut Statement, col: &str, op: &str, value: &Value| {
        let p = stmt.bind(value.clone(), T::column_type(col));
        format!("{} {} {}", column::<T>(col), op, p)
    };

    match condition {
        Condition::Eq(col, Value::Null) => format!("{} IS NULL", column::<T>(col)),
        Condition::Ne(col, Value::Null) => format!("{} IS NOT NULL", column::<T>(col)),
        Condition::Eq(col, value) => compare(stmt, col, "=", value),
        Condition::Ne(col, value) => compare(stmt, col, "!=", value),
        Condition::Gt(col, value) => compare(stmt, col, ">", value),
        Condition::Gte(col, value) => compare(stmt, col, ">=", value),
        Condition::Lt(col, value) => compare(stmt, col, "<", value),
        Condition::Lte(col, value) => compare(stmt, col, "<=", value),
        Condition::In(col, values) => {
            let p = stmt.bind(values.clone(), T::column_type(col));
            format!("{} = ANY({})", column::<T>(col), p)
        }
        Condition::NotIn(col, values) => {
            let p = stmt.bind(values.clone(), T::column_type(col));
            format!("{} <> ALL({})", column::<T>(col), p)
        }
        Condition::IsNull(col) => format!("{} IS NULL", column::<T>(col)),
        Condition::IsNotNull(col) => format!("{} IS NOT NULL", column::<T>(col)),
        Condition::ILike(col, pattern) => {
            let p = stmt.bind(Value::String(pattern.clone()), "text");
            format!("{} ILIKE {}", column::<T>(col), p)
        }
        Condition::And(conditions) => join_conditions::<T>(stmt, conditions, " AND ", "TRUE"),
        Condition::Or(conditions) => join_conditions::<T>(stmt, conditions, " OR ", "FALSE"),
        Condition::Not(inner) => format!("NOT ({})", render_condition::<T>(stmt, inner)),
        Condition::Raw(sql, args) => {
            let mut args = args.iter().peekable();
            let mut rendered = String::with_capacity(sql.len());
            for c in sql.chars() {
                match (c, args.next_if(|_| c == '?')) {
                    (_, Some(arg)) => rendered.push_str(&stmt.bind(arg.clone(), "")),
                    (c, None) => rendered.push(c),
                }
            }
            format!("({})", rendered)
        }
    }
}

fn join_conditions<T: Entity>(
    stmt: &mut Statement,
    conditions: &[Condition],
    separator: &str,
    empty: &str,
) -> String {
    if conditions.is_empty() {
        return empty.to_string();
    }
    let parts: Vec<String> = conditions
        .iter()
        .map(|c| render_condition::<T>(stmt, c))
        .collect();
    format!("({})", parts.join(separator))
}

fn push_where<T: Entity>(stmt: &mut Statement, filters: &[Condition]) {
    if filters.is_empty() {
        return;
    }
    let clauses: Vec<String> = filters
        .iter()
        .map(|c| render_condition::<T>(stmt, c))
        .collect();
    let clause = format!(" WHERE {}", clauses.join(" AND "));
    stmt.sql.push_str(&clause);
}

/// Relations requested by `query`, resolved against `T`.
pub fn relations<T: Entity>(query: &Query<T>) -> Result<Vec<&'static Relation>, StoreError> {
    query
        .relations()
        .into_iter()
        .map(|name| {
            T::relation(name).ok_or_else(|| {
                StoreError::Unsupported(format!("{} has no relation {}", T::table_name(), name))
            })
        })
        .collect()
}

/// `SELECT` with own columns, one LEFT JOIN per relation, filters, sort and window.
pub fn render_select<T: Entity>(query: &Query<T>) -> Result<Statement, StoreError> {
    let table = T::table_name();
    let mut projection: Vec<String> = query
        .selected_columns()
        .into_iter()
        .map(|c| format!("{}.{}", table, c))
        .collect();
    let mut joins = String::new();

    for (idx, relation) in relations(query)?.into_iter().enumerate() {
        let target = (relation.target)();
        let alias = format!("r{}", idx);
        let fields: Vec<String> = target
            .columns
            .iter()
            .map(|c| format!("'{}', {}.{}", c, alias, c))
            .collect();
        projection.push(format!(
            "CASE WHEN {alias}.{foreign} IS NULL THEN NULL ELSE jsonb_build_object({fields}) END AS {prefix}{name}",
            alias = alias,
            foreign = relation.foreign,
            fields = fields.join(", "),
            prefix = RELATION_PREFIX,
            name = relation.name,
        ));
        joins.push_str(&format!(
            " LEFT JOIN {} AS {} ON {}.{} = {}.{}",
            target.table, alias, alias, relation.foreign, table, relation.local
        ));
    }

    let mut stmt = Statement::new();
    stmt.sql = format!("SELECT {} FROM {}{}", projection.join(", "), table, joins);
    push_where::<T>(&mut stmt, &query.filters);

    if !query.order_by.is_empty() {
        let clauses: Vec<String> = query
            .order_by
            .iter()
            .map(|sort| {
                let dir = match sort.order {
                    Order::Asc => "ASC",
                    Order::Desc => "DESC",
                };
                format!("{} {}", column::<T>(&sort.column), dir)
            })
            .collect();
        stmt.sql.push_str(&format!(" ORDER BY {}", clauses.join(", ")));
    }
    // LIMIT and OFFSET are bigint.
    if let Some(limit) = query.limit {
        stmt.sql.push_str(&format!(" LIMIT {}", limit.min(BIGINT_MAX)));
    }
    if let Some(offset) = query.offset {
        stmt.sql.push_str(&format!(" OFFSET {}", offset.min(BIGINT_MAX)));
    }

    Ok(stmt)
}

/// `SELECT COUNT(*)` over the query's filters; sort and window are ignored.
pub fn render_count<T: Entity>(query: &Query<T>) -> Statement {
    let mut stmt = Statement::new();
    stmt.sql = format!("SELECT COUNT(*) FROM {}", T::table_name());
    push_where::<T>(&mut stmt, &query.filters);
    stmt
}

/// `INSERT ... RETURNING *`.
pub fn render_insert<T: Entity>(insert: &Insert<T>) -> Statement {
    let mut stmt = Statement::new();
    if insert.values.is_empty() {
        stmt.sql = format!("INSERT INTO {} DEFAULT VALUES RETURNING *", T::table_name());
        return stmt;
    }

    let columns: Vec<&str> = insert.values.iter().map(|a| a.column).collect();
    let placeholders: Vec<String> = insert
        .values
        .iter()
        .map(|a| stmt.bind(a.value.clone(), a.column_type))
        .collect();
    stmt.sql = format!(
        "INSERT INTO {} ({}) VALUES ({}) RETURNING *",
        T::table_name(),
        columns.join(", "),
        placeholders.join(", ")
    );
    stmt
}

/// `UPDATE ... SET ... WHERE ...`. With nothing to set, the id is assigned to
/// itself so the statement still reports matched rows.
pub fn render_update<T: Entity>(update: &Update<T>) -> Statement {
    let mut stmt = Statement::new();
    let assignments: Vec<String> = if update.assignments.is_empty() {
        vec![format!("{} = {}", T::id_column(), T::id_column())]
    } else {
        update
            .assignments
            .iter()
            .map(|a| {
                let p = stmt.bind(a.value.clone(), a.column_type);
                format!("{} = {}", a.column, p)
            })
            .collect()
    };
    stmt.sql = format!("UPDATE {} SET {}", T::table_name(), assignments.join(", "));
    push_where::<T>(&mut stmt, &update.filters);
    stmt
}
