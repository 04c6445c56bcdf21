use rusqlite::functions::FunctionFlags;
use rusqlite::types::{Value, ValueRef};
use rusqlite::{params_from_iter, Connection, Row};

use crate::cascade::{values_differ, CompareOptions};
use crate::error::StoreError;
use crate::normalize::{dedupe, normalize};

use super::{
    ColumnPair, CountOp, DatasetHandle, DuplicateExample, KeyProfile, MatchedRow, RowSet, Side,
    TablePair, TableStore, Window,
};

/// SQL name of the cascade comparison: `recon_differs(left, right, tolerance, flags)`.
const DIFFERS_FN: &str = "recon_differs";

/// In-memory SQLite store. Every staged column is TEXT; empty cells are NULL.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        register_functions(&conn)?;
        Ok(Self { conn })
    }

    /// Create `name` from a header row and data rows.
    ///
    /// Headers are normalized and de-duplicated. Short rows are padded with
    /// NULL; a row wider than the header is rejected.
    pub fn stage_table<I>(&self, name: &str, headers: &[String], rows: I) -> Result<DatasetHandle, StoreError>
    where
        I: IntoIterator<Item = Vec<String>>,
    {
        let table = normalize(name);
        if table.is_empty() {
            return Err(StoreError::new(format!("invalid table name '{name}'")));
        }
        if self.table_exists(&table)? {
            return Err(StoreError::new(format!("table '{table}' is already staged")));
        }
        let columns = dedupe(headers);
        if columns.is_empty() {
            return Err(StoreError::new(format!("table '{table}' has no columns")));
        }

        let defs: Vec<String> = columns.iter().map(|c| format!("{} TEXT", ident(c))).collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
        let insert = format!("INSERT INTO {} VALUES ({})", ident(&table), placeholders.join(", "));

        // A rejected row rolls back the CREATE as well.
        let tx = self.conn.unchecked_transaction()?;
        tx.execute_batch(&format!("CREATE TABLE {} ({});", ident(&table), defs.join(", ")))?;
        let mut row_count = 0u64;
        {
            let mut stmt = tx.prepare(&insert)?;
            for (idx, row) in rows.into_iter().enumerate() {
                if row.len() > columns.len() {
                    return Err(StoreError::new(format!(
                        "table '{table}', data row {}: {} fields but header has {}",
                        idx + 1,
                        row.len(),
                        columns.len()
                    )));
                }
                let cells = (0..columns.len()).map(|i| row.get(i).map(String::as_str).filter(|v| !v.is_empty()));
                stmt.execute(params_from_iter(cells))?;
                row_count += 1;
            }
        }
        tx.commit()?;

        Ok(DatasetHandle {
            table,
            columns,
            row_count,
            excluded: Vec::new(),
        })
    }

    fn table_exists(&self, table: &str) -> Result<bool, StoreError> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |row| row.get(0),
        )?;
        Ok(n > 0)
    }

    fn query_count(&self, sql: &str, params: &[Value]) -> Result<u64, StoreError> {
        let n: i64 = self
            .conn
            .query_row(sql, params_from_iter(params.iter()), |row| row.get(0))?;
        Ok(n.max(0) as u64)
    }
}

fn register_functions(conn: &Connection) -> Result<(), StoreError> {
    conn.create_scalar_function(
        DIFFERS_FN,
        4,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let left = value_text(ctx.get_raw(0));
            let right = value_text(ctx.get_raw(1));
            let tolerance: f64 = ctx.get(2)?;
            let flags: i64 = ctx.get(3)?;
            let options = CompareOptions::from_flags(tolerance, flags);
            Ok(values_differ(left.as_deref(), right.as_deref(), &options) as i64)
        },
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// SQL fragments
// ---------------------------------------------------------------------------

fn ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Type-agnostic key form: trimmed text.
fn key_expr(alias: Option<&str>, column: &str) -> String {
    match alias {
        Some(a) => format!("TRIM(CAST({a}.{} AS TEXT))", ident(column)),
        None => format!("TRIM(CAST({} AS TEXT))", ident(column)),
    }
}

fn key_predicate(key: &[ColumnPair]) -> String {
    key.iter()
        .map(|k| format!("{} = {}", key_expr(Some("l"), &k.left), key_expr(Some("r"), &k.right)))
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Table (or a window of it) aliased, carrying its staging position as `__row`.
fn source(table: &str, alias: &str, window: Option<Window>) -> String {
    let limit = match window {
        Some(w) => format!(" LIMIT {} OFFSET {}", w.limit, w.offset),
        None => String::new(),
    };
    format!(
        "(SELECT _rowid_ AS \"__row\", * FROM {} ORDER BY _rowid_{limit}) AS {alias}",
        ident(table)
    )
}

fn differs_clause(columns: &[ColumnPair]) -> String {
    columns
        .iter()
        .map(|c| {
            format!(
                "{DIFFERS_FN}(l.{}, r.{}, ?1, ?2) = 1",
                ident(&c.left),
                ident(&c.right)
            )
        })
        .collect::<Vec<_>>()
        .join(" OR ")
}

fn value_text(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(t) | ValueRef::Blob(t) => Some(String::from_utf8_lossy(t).into_owned()),
    }
}

fn text_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<String>> {
    Ok(value_text(row.get_ref(idx)?))
}

fn require_key(table: &str, key: &[String]) -> Result<(), StoreError> {
    if key.is_empty() {
        return Err(StoreError::new(format!("empty key for table '{table}'")));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// TableStore
// ---------------------------------------------------------------------------

impl TableStore for SqliteStore {
    fn row_count(&self, table: &str) -> Result<u64, StoreError> {
        self.query_count(&format!("SELECT COUNT(*) FROM {}", ident(table)), &[])
    }

    fn columns(&self, table: &str) -> Result<Vec<String>, StoreError> {
        let mut stmt = self.conn.prepare(&format!("PRAGMA table_info({})", ident(table)))?;
        let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
        let mut out = Vec::new();
        for name in names {
            out.push(name?);
        }
        if out.is_empty() {
            return Err(StoreError::new(format!("no such table: {table}")));
        }
        Ok(out)
    }

    fn sample_values(&self, table: &str, column: &str, limit: usize) -> Result<Vec<String>, StoreError> {
        let sql = format!(
            "SELECT {c} FROM {t} WHERE {c} IS NOT NULL ORDER BY _rowid_ LIMIT ?1",
            c = ident(column),
            t = ident(table)
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let values = stmt.query_map([limit as i64], |row| text_at(row, 0))?;
        let mut out = Vec::new();
        for v in values {
            if let Some(v) = v? {
                out.push(v);
            }
        }
        Ok(out)
    }

    fn key_profile(&self, table: &str, key: &[String]) -> Result<KeyProfile, StoreError> {
        require_key(table, key)?;
        let total_rows = self.row_count(table)?;

        if let [column] = key {
            // Single column: non-null count against distinct count.
            let expr = key_expr(None, column);
            let (non_null, unique): (i64, i64) = self.conn.query_row(
                &format!("SELECT COUNT({expr}), COUNT(DISTINCT {expr}) FROM {}", ident(table)),
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            let groups = self.query_count(
                &format!(
                    "SELECT COUNT(*) FROM (SELECT 1 FROM {} WHERE {expr} IS NOT NULL \
                     GROUP BY {expr} HAVING COUNT(*) > 1)",
                    ident(table)
                ),
                &[],
            )?;
            return Ok(KeyProfile {
                total_rows,
                non_null_rows: non_null.max(0) as u64,
                unique_values: unique.max(0) as u64,
                duplicate_groups: groups,
            });
        }

        // Composite: group by every key column.
        let exprs: Vec<String> = key.iter().map(|k| key_expr(None, k)).collect();
        let not_null: Vec<String> = exprs.iter().map(|e| format!("{e} IS NOT NULL")).collect();
        let sql = format!(
            "SELECT COUNT(*), COALESCE(SUM(n), 0), COALESCE(SUM(n > 1), 0) FROM \
             (SELECT COUNT(*) AS n FROM {} WHERE {} GROUP BY {})",
            ident(table),
            not_null.join(" AND "),
            exprs.join(", ")
        );
        let (unique, non_null, groups): (i64, i64, i64) =
            self.conn.query_row(&sql, [], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?;
        Ok(KeyProfile {
            total_rows,
            non_null_rows: non_null.max(0) as u64,
            unique_values: unique.max(0) as u64,
            duplicate_groups: groups.max(0) as u64,
        })
    }

    fn duplicate_examples(
        &self,
        table: &str,
        key: &[String],
        limit: usize,
    ) -> Result<Vec<DuplicateExample>, StoreError> {
        require_key(table, key)?;
        let exprs: Vec<String> = key.iter().map(|k| key_expr(None, k)).collect();
        let not_null: Vec<String> = exprs.iter().map(|e| format!("{e} IS NOT NULL")).collect();
        let sql = format!(
            "SELECT {cols}, COUNT(*) AS n FROM {t} WHERE {nn} GROUP BY {cols} \
             HAVING COUNT(*) > 1 ORDER BY n DESC, {cols} LIMIT ?1",
            cols = exprs.join(", "),
            t = ident(table),
            nn = not_null.join(" AND ")
        );
        let width = key.len();
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([limit as i64], |row| {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                values.push(text_at(row, i)?.unwrap_or_default());
            }
            let n: i64 = row.get(width)?;
            Ok(DuplicateExample { values, occurrences: n.max(0) as u64 })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    fn index_keys(&self, table: &str, key: &[String]) -> Result<(), StoreError> {
        require_key(table, key)?;
        let exprs: Vec<String> = key.iter().map(|k| key_expr(None, k)).collect();
        let name = format!("{table}__key__{}", key.join("__"));
        self.conn.execute_batch(&format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} ({});",
            ident(&name),
            ident(table),
            exprs.join(", ")
        ))?;
        Ok(())
    }

    fn count(&self, pair: &TablePair, op: &CountOp<'_>, window: Option<Window>) -> Result<u64, StoreError> {
        if pair.key.is_empty() {
            return Err(StoreError::new(format!("empty key for table '{}'", pair.left)));
        }
        let pred = key_predicate(&pair.key);
        match op {
            CountOp::Matched => self.query_count(
                &format!(
                    "SELECT COUNT(*) FROM {} JOIN {} AS r ON {pred}",
                    source(&pair.left, "l", window),
                    ident(&pair.right)
                ),
                &[],
            ),
            CountOp::OnlyLeft => self.query_count(
                &format!(
                    "SELECT COUNT(*) FROM {} WHERE NOT EXISTS (SELECT 1 FROM {} AS r WHERE {pred})",
                    source(&pair.left, "l", window),
                    ident(&pair.right)
                ),
                &[],
            ),
            CountOp::OnlyRight => self.query_count(
                &format!(
                    "SELECT COUNT(*) FROM {} WHERE NOT EXISTS (SELECT 1 FROM {} AS l WHERE {pred})",
                    source(&pair.right, "r", window),
                    ident(&pair.left)
                ),
                &[],
            ),
            CountOp::Differing { columns, options } => {
                if columns.is_empty() {
                    return Ok(0);
                }
                self.query_count(
                    &format!(
                        "SELECT COUNT(*) FROM {} JOIN {} AS r ON {pred} WHERE {}",
                        source(&pair.left, "l", window),
                        ident(&pair.right),
                        differs_clause(columns)
                    ),
                    &[Value::Real(options.tolerance), Value::Integer(options.flags())],
                )
            }
        }
    }

    fn matched_rows(
        &self,
        pair: &TablePair,
        columns: &[ColumnPair],
        window: Option<Window>,
    ) -> Result<Vec<MatchedRow>, StoreError> {
        let mut select: Vec<String> = pair.key.iter().map(|k| format!("l.{}", ident(&k.left))).collect();
        for c in columns {
            select.push(format!("l.{}", ident(&c.left)));
            select.push(format!("r.{}", ident(&c.right)));
        }
        let sql = format!(
            "SELECT {} FROM {} JOIN {} AS r ON {} ORDER BY l.\"__row\"",
            select.join(", "),
            source(&pair.left, "l", window),
            ident(&pair.right),
            key_predicate(&pair.key)
        );
        let key_width = pair.key.len();
        let value_width = columns.len();

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            let mut key = Vec::with_capacity(key_width);
            for i in 0..key_width {
                key.push(text_at(row, i)?);
            }
            let mut values = Vec::with_capacity(value_width);
            for i in 0..value_width {
                let base = key_width + i * 2;
                values.push((text_at(row, base)?, text_at(row, base + 1)?));
            }
            Ok(MatchedRow { key, values })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    fn unmatched_rows(&self, pair: &TablePair, side: Side, window: Option<Window>) -> Result<RowSet, StoreError> {
        let table = pair.table(side);
        let columns = self.columns(table)?;
        let (alias, other, other_alias) = match side {
            Side::Left => ("l", &pair.right, "r"),
            Side::Right => ("r", &pair.left, "l"),
        };
        let select: Vec<String> = columns.iter().map(|c| format!("{alias}.{}", ident(c))).collect();
        let sql = format!(
            "SELECT {} FROM {} WHERE NOT EXISTS (SELECT 1 FROM {} AS {other_alias} WHERE {}) \
             ORDER BY {alias}.\"__row\"",
            select.join(", "),
            source(table, alias, window),
            ident(other),
            key_predicate(&pair.key)
        );
        let width = columns.len();
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            let mut cells = Vec::with_capacity(width);
            for i in 0..width {
                cells.push(text_at(row, i)?);
            }
            Ok(cells)
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(RowSet { columns, rows: out })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn stage(store: &SqliteStore, name: &str, headers: &[&str], rows: &[&[&str]]) -> DatasetHandle {
        store
            .stage_table(name, &strings(headers), rows.iter().map(|r| strings(r)))
            .unwrap()
    }

    fn pair() -> TablePair {
        TablePair {
            left: "left".into(),
            right: "right".into(),
            key: vec![ColumnPair::new("id", "id")],
        }
    }

    fn fixture() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        stage(&store, "left", &["ID", "Amount"], &[&["1", "100"], &["2", "200"], &["3", "300"]]);
        stage(&store, "right", &["id", "amount"], &[&[" 2", "200.00"], &["3 ", "$301"], &["4", "400"]]);
        store
    }

    #[test]
    fn staging_normalizes_headers_and_nulls_empty_cells() {
        let store = SqliteStore::open_in_memory().unwrap();
        let handle = stage(&store, "Left Data", &["Order ID", "order-id", "Note"], &[&["1", "1", ""], &["2", "2"]]);
        assert_eq!(handle.table, "left_data");
        assert_eq!(handle.columns, vec!["order_id", "order_id_2", "note"]);
        assert_eq!(handle.row_count, 2);
        assert_eq!(store.sample_values("left_data", "note", 10).unwrap(), Vec::<String>::new());
    }

    #[test]
    fn staging_rejects_wide_rows_and_restaging() {
        let store = SqliteStore::open_in_memory().unwrap();
        let err = store
            .stage_table("t", &strings(&["a"]), vec![strings(&["1", "2"])])
            .unwrap_err();
        assert!(err.message.contains("2 fields but header has 1"));
        stage(&store, "t", &["a"], &[&["1"]]);

        stage(&store, "u", &["a"], &[]);
        assert!(store.stage_table("u", &strings(&["a"]), Vec::<Vec<String>>::new()).is_err());
    }

    #[test]
    fn user_rowid_column_does_not_reorder_windows() {
        let store = SqliteStore::open_in_memory().unwrap();
        stage(&store, "left", &["id", "rowid"], &[&["1", "9"], &["2", "8"], &["3", "7"]]);
        stage(&store, "right", &["id"], &[&["9"]]);

        let window = Some(Window { offset: 0, limit: 2 });
        let rows = store.unmatched_rows(&pair(), Side::Left, window).unwrap();
        assert_eq!(rows.columns, vec!["id", "rowid"]);
        let ids: Vec<Option<String>> = rows.rows.iter().map(|r| r[0].clone()).collect();
        assert_eq!(ids, vec![Some("1".to_string()), Some("2".to_string())]);
        assert_eq!(store.sample_values("left", "id", 2).unwrap(), vec!["1", "2"]);
    }

    #[test]
    fn counts_use_trimmed_key_equality() {
        let store = fixture();
        let p = pair();
        assert_eq!(store.count(&p, &CountOp::Matched, None).unwrap(), 2);
        assert_eq!(store.count(&p, &CountOp::OnlyLeft, None).unwrap(), 1);
        assert_eq!(store.count(&p, &CountOp::OnlyRight, None).unwrap(), 1);
    }

    #[test]
    fn differing_count_runs_cascade_in_sql() {
        let store = fixture();
        let p = pair();
        let columns = vec![ColumnPair::new("amount", "amount")];
        let exact = CountOp::Differing {
            columns: &columns,
            options: CompareOptions { tolerance: 0.0, ..CompareOptions::default() },
        };
        assert_eq!(store.count(&p, &exact, None).unwrap(), 1);
        let loose = CountOp::Differing {
            columns: &columns,
            options: CompareOptions { tolerance: 1.0, ..CompareOptions::default() },
        };
        assert_eq!(store.count(&p, &loose, None).unwrap(), 0);
    }

    #[test]
    fn windows_partition_the_driving_table() {
        let store = fixture();
        let p = pair();
        let first = Window { offset: 0, limit: 2 };
        let second = Window { offset: 2, limit: 2 };
        let a = store.count(&p, &CountOp::Matched, Some(first)).unwrap();
        let b = store.count(&p, &CountOp::Matched, Some(second)).unwrap();
        assert_eq!((a, b), (1, 1));
    }

    #[test]
    fn single_and_composite_profiles() {
        let store = SqliteStore::open_in_memory().unwrap();
        stage(
            &store,
            "t",
            &["id", "region"],
            &[&["1", "a"], &["1", "b"], &["2", "a"], &["2", "a"], &["", "a"]],
        );
        let single = store.key_profile("t", &strings(&["id"])).unwrap();
        assert_eq!(single.total_rows, 5);
        assert_eq!(single.non_null_rows, 4);
        assert_eq!(single.unique_values, 2);
        assert_eq!(single.duplicate_count(), 2);
        assert_eq!(single.duplicate_groups, 2);

        let composite = store.key_profile("t", &strings(&["id", "region"])).unwrap();
        assert_eq!(composite.unique_values, 3);
        assert_eq!(composite.duplicate_groups, 1);
        assert_eq!(composite.duplicate_count(), 1);

        let examples = store.duplicate_examples("t", &strings(&["id", "region"]), 10).unwrap();
        assert_eq!(examples, vec![DuplicateExample { values: strings(&["2", "a"]), occurrences: 2 }]);
    }

    #[test]
    fn matched_and_unmatched_rows() {
        let store = fixture();
        let p = pair();
        store.index_keys("right", &strings(&["id"])).unwrap();
        let rows = store
            .matched_rows(&p, &[ColumnPair::new("amount", "amount")], None)
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].key, vec![Some("2".to_string())]);
        assert_eq!(rows[1].values[0], (Some("300".to_string()), Some("$301".to_string())));

        let only_right = store.unmatched_rows(&p, Side::Right, None).unwrap();
        assert_eq!(only_right.columns, strings(&["id", "amount"]));
        assert_eq!(only_right.rows, vec![vec![Some("4".to_string()), Some("400".to_string())]]);
    }

    #[test]
    fn missing_table_is_an_error() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.columns("nope").is_err());
        assert!(store.row_count("nope").is_err());
    }
}
