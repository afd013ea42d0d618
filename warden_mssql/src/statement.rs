//! Statements with named parameters.
//!
//! tiberius binds positional `@P1..@Pn` parameters. A [`Statement`] names
//! its parameters instead and renders a `DECLARE` prologue that copies each
//! positional parameter into a variable of that name, so the SQL text can
//! refer to `@name`, `@login` and so on.
//!
//! DDL cannot take parameters at all, so DDL statements are built as
//! dynamic SQL: a T-SQL string expression assembled into `@sql` from
//! static keywords and `QUOTENAME`d or literal-quoted variables, then run
//! with `EXEC (@sql)`. No caller value ever appears in the statement text.

/// A bound value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Param {
    /// Bound as `nvarchar(max)`.
    Text(String),
    /// Bound as `bigint`.
    Int(i64),
}

impl Param {
    fn sql_type(&self) -> &'static str {
        match self {
            Param::Text(_) => "nvarchar(max)",
            Param::Int(_) => "bigint",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Body {
    Query(String),
    Dynamic {
        head: String,
        parts: Vec<String>,
        options: Vec<(&'static str, String)>,
        guard: Option<String>,
    },
}

/// A statement and its named parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Statement {
    params: Vec<(&'static str, Param)>,
    body: Body,
}

impl Statement {
    /// Plain SQL text referring to parameters as `@name`.
    pub fn query<S: Into<String>>(sql: S) -> Self {
        Self {
            params: vec![],
            body: Body::Query(sql.into()),
        }
    }

    /// Dynamic SQL starting with the string expression `head`.
    pub fn dynamic<S: Into<String>>(head: S) -> Self {
        Self {
            params: vec![],
            body: Body::Dynamic {
                head: head.into(),
                parts: vec![],
                options: vec![],
                guard: None,
            },
        }
    }

    /// Bind `value` to `@name` as text.
    pub fn text<S: Into<String>>(mut self, name: &'static str, value: S) -> Self {
        self.params.push((name, Param::Text(value.into())));
        self
    }

    /// Bind `value` to `@name` as an integer.
    pub fn int(mut self, name: &'static str, value: i64) -> Self {
        self.params.push((name, Param::Int(value)));
        self
    }

    /// Append a string expression to the dynamic SQL.
    pub fn push<S: Into<String>>(mut self, expr: S) -> Self {
        debug_assert!(
            matches!(self.body, Body::Dynamic { .. }),
            "push on a plain query"
        );
        if let Body::Dynamic { parts, .. } = &mut self.body {
            parts.push(expr.into());
        }
        self
    }

    /// Append `KEYWORD = <expr>` to the option list. The first option is
    /// introduced by ` WITH `, the rest by `, `.
    pub fn option<S: Into<String>>(mut self, keyword: &'static str, expr: S) -> Self {
        debug_assert!(
            matches!(self.body, Body::Dynamic { .. }),
            "option on a plain query"
        );
        if let Body::Dynamic { options, .. } = &mut self.body {
            options.push((keyword, expr.into()));
        }
        self
    }

    /// Only run the dynamic SQL when `condition` holds.
    pub fn guard<S: Into<String>>(mut self, condition: S) -> Self {
        debug_assert!(
            matches!(self.body, Body::Dynamic { .. }),
            "guard on a plain query"
        );
        if let Body::Dynamic { guard, .. } = &mut self.body {
            *guard = Some(condition.into());
        }
        self
    }

    /// Bound values in positional order.
    pub fn params(&self) -> impl Iterator<Item = &Param> + '_ {
        self.params.iter().map(|(_, p)| p)
    }

    /// The value bound to `@name`.
    pub fn param(&self, name: &str) -> Option<&Param> {
        self.params
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, p)| p)
    }

    /// The full batch sent to the server.
    pub fn render(&self) -> String {
        let mut sql = String::new();
        if !self.params.is_empty() {
            let declarations = self
                .params
                .iter()
                .enumerate()
                .map(|(i, (name, p))| format!("@{name} {} = @P{}", p.sql_type(), i + 1))
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(&format!("DECLARE {declarations};\n"));
        }
        match &self.body {
            Body::Query(query) => sql.push_str(query),
            Body::Dynamic {
                head,
                parts,
                options,
                guard,
            } => {
                sql.push_str(&format!("DECLARE @sql nvarchar(max) = {head};\n"));
                for part in parts {
                    sql.push_str(&format!("SET @sql = @sql + {part};\n"));
                }
                for (i, (keyword, expr)) in options.iter().enumerate() {
                    let separator = if i == 0 { " WITH " } else { ", " };
                    sql.push_str(&format!(
                        "SET @sql = @sql + '{separator}{keyword} = ' + {expr};\n"
                    ));
                }
                match guard {
                    Some(condition) => sql.push_str(&format!("IF {condition} EXEC (@sql);")),
                    None => sql.push_str("EXEC (@sql);"),
                }
            }
        }
        sql
    }
}

/// `@var` as a bracket-quoted identifier.
pub fn ident(var: &str) -> String {
    format!("QUOTENAME(@{var})")
}

/// `@var` as a single-quoted string literal. `QUOTENAME` is not used since
/// it returns `NULL` for input longer than 128 characters.
pub fn literal(var: &str) -> String {
    format!("'''' + REPLACE(@{var}, '''', '''''') + ''''")
}

/// `name` bracket-quoted in Rust, for statements such as `USE` that take
/// no variables. `name` must already be length-checked.
pub fn bracket(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

/// Static text as a T-SQL string expression.
pub fn keyword(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queries_declare_their_parameters() {
        let stmt = Statement::query("SELECT name FROM sys.databases WHERE name = @name")
            .text("name", "db1");
        assert_eq!(
            stmt.render(),
            "DECLARE @name nvarchar(max) = @P1;\nSELECT name FROM sys.databases WHERE name = @name"
        );
        assert_eq!(stmt.params().count(), 1);
    }

    #[test]
    fn queries_without_parameters_have_no_prologue() {
        assert_eq!(Statement::query("SELECT 1").render(), "SELECT 1");
    }

    #[test]
    fn first_option_uses_with_and_the_rest_commas() {
        let stmt = Statement::dynamic(format!("'ALTER USER ' + {}", ident("name")))
            .text("name", "alice")
            .option("DEFAULT_SCHEMA", ident("schema"))
            .text("schema", "sales")
            .option("PASSWORD", literal("password"))
            .text("password", "it's");
        let sql = stmt.render();
        assert!(sql.starts_with(
            "DECLARE @name nvarchar(max) = @P1, @schema nvarchar(max) = @P2, \
             @password nvarchar(max) = @P3;\n"
        ));
        let with = sql
            .find("' WITH DEFAULT_SCHEMA = ' + QUOTENAME(@schema)")
            .unwrap();
        let comma = sql.find("', PASSWORD = ' + ''''").unwrap();
        assert!(with < comma);
        assert!(!sql.contains("it's"));
        assert!(sql.ends_with("EXEC (@sql);"));
        assert_eq!(stmt.param("password"), Some(&Param::Text("it's".to_owned())));
    }

    #[test]
    fn guards_wrap_the_exec() {
        let sql = Statement::dynamic("'DROP ROLE ' + QUOTENAME(@name)")
            .text("name", "r")
            .guard("DATABASE_PRINCIPAL_ID(@name) IS NOT NULL")
            .render();
        assert!(sql.ends_with("IF DATABASE_PRINCIPAL_ID(@name) IS NOT NULL EXEC (@sql);"));
    }

    #[test]
    fn keywords_escape_quotes() {
        assert_eq!(keyword(" ON OBJECT::"), "' ON OBJECT::'");
        assert_eq!(keyword("a'b"), "'a''b'");
    }

    #[test]
    fn bracket_doubles_closing_brackets() {
        assert_eq!(bracket("db1"), "[db1]");
        assert_eq!(bracket("we]ird"), "[we]]ird]");
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "guard on a plain query")]
    fn plain_queries_take_no_guard() {
        let _ = Statement::query("SELECT 1").guard("1 = 1");
    }
}
