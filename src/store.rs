//! Reverse-index fact store
//!
//! SQLite-backed store holding the five normalized tables plus the
//! function-level mapping. The schema namespace (`DB_SCHEMA`) names the
//! database file, so parallel indexes can coexist side by side.
//!
//! Writes happen in per-batch transactions with cached statements; the
//! reverse index is always rebuilt from dependencies (it is a cache, not
//! a source of truth). All query primitives return rows joined to the
//! test registry.

use std::collections::HashSet;
use std::path::Path;

use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::{ImpactError, Result};
use crate::paths::ensure_directory;

/// One row of `test_registry`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestRow {
    pub test_id: String,
    pub file_path: String,
    pub class_name: Option<String>,
    pub method_name: String,
    pub test_type: String,
    pub line_number: Option<i64>,
}

/// One row of `test_dependencies`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyRow {
    pub test_id: String,
    pub referenced_class: String,
    pub import_type: String,
}

/// One row of `reverse_index`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReverseIndexRow {
    pub production_class: String,
    pub test_id: String,
    pub test_file_path: String,
    pub reference_type: String,
}

/// One row of `test_function_mapping`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionMappingRow {
    pub test_id: String,
    pub module_name: String,
    pub function_name: String,
    pub call_type: String,
    pub source: String,
}

/// One row of `test_metadata`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataRow {
    pub test_id: String,
    pub description: String,
    pub markers: Vec<String>,
    pub is_async: bool,
    pub is_parameterized: bool,
    pub pattern: String,
    pub line_number: Option<i64>,
}

/// One row of `test_structure`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructureRow {
    pub directory_path: String,
    pub category: String,
    pub file_count: i64,
    pub total_lines: i64,
}

/// A query result joined to the test registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchedTestRow {
    pub test_id: String,
    pub class_name: Option<String>,
    pub method_name: String,
    pub test_file_path: String,
    pub test_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// SQLite-backed fact store
pub struct FactStore {
    conn: Connection,
    schema: String,
}

impl FactStore {
    /// Open (or create) the store at the given path
    pub fn open(path: &Path, schema: &str) -> Result<Self> {
        if let Some(parent) = path.parent() {
            ensure_directory(parent)?;
        }
        let conn = Connection::open(path).map_err(|e| ImpactError::StoreUnavailable {
            message: format!("cannot open {}: {}", path.display(), e),
        })?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| ImpactError::StoreUnavailable {
                message: format!("cannot enable foreign keys: {}", e),
            })?;
        Ok(Self {
            conn,
            schema: schema.to_string(),
        })
    }

    /// In-memory store, used by tests
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| ImpactError::StoreUnavailable {
            message: format!("cannot open in-memory store: {}", e),
        })?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self {
            conn,
            schema: "planon1".to_string(),
        })
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Create all tables and indexes (idempotent)
    pub fn ensure_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(
                r#"
            CREATE TABLE IF NOT EXISTS test_registry (
                test_id TEXT PRIMARY KEY,
                file_path TEXT NOT NULL,
                class_name TEXT,
                method_name TEXT NOT NULL,
                test_type TEXT,
                line_number INTEGER,
                created_at TEXT DEFAULT (datetime('now'))
            );
            CREATE INDEX IF NOT EXISTS idx_test_registry_file
                ON test_registry(file_path);
            CREATE INDEX IF NOT EXISTS idx_test_registry_class
                ON test_registry(class_name);
            CREATE INDEX IF NOT EXISTS idx_test_registry_type
                ON test_registry(test_type);

            CREATE TABLE IF NOT EXISTS test_dependencies (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                test_id TEXT NOT NULL REFERENCES test_registry(test_id) ON DELETE CASCADE,
                referenced_class TEXT NOT NULL,
                import_type TEXT,
                created_at TEXT DEFAULT (datetime('now'))
            );
            CREATE INDEX IF NOT EXISTS idx_dependencies_test
                ON test_dependencies(test_id);
            CREATE INDEX IF NOT EXISTS idx_dependencies_class
                ON test_dependencies(referenced_class);

            CREATE TABLE IF NOT EXISTS reverse_index (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                production_class TEXT NOT NULL,
                test_id TEXT NOT NULL REFERENCES test_registry(test_id) ON DELETE CASCADE,
                test_file_path TEXT,
                reference_type TEXT DEFAULT 'direct_import',
                created_at TEXT DEFAULT (datetime('now'))
            );
            CREATE INDEX IF NOT EXISTS idx_reverse_class
                ON reverse_index(production_class);
            CREATE INDEX IF NOT EXISTS idx_reverse_test
                ON reverse_index(test_id);
            CREATE INDEX IF NOT EXISTS idx_reverse_class_test
                ON reverse_index(production_class, test_id);
            CREATE INDEX IF NOT EXISTS idx_reverse_reference_type
                ON reverse_index(reference_type);

            CREATE TABLE IF NOT EXISTS test_metadata (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                test_id TEXT UNIQUE NOT NULL REFERENCES test_registry(test_id) ON DELETE CASCADE,
                description TEXT,
                markers TEXT,
                is_async INTEGER DEFAULT 0,
                is_parameterized INTEGER DEFAULT 0,
                pattern TEXT,
                line_number INTEGER,
                embedding BLOB,
                created_at TEXT DEFAULT (datetime('now'))
            );
            CREATE INDEX IF NOT EXISTS idx_metadata_test
                ON test_metadata(test_id);
            CREATE INDEX IF NOT EXISTS idx_metadata_pattern
                ON test_metadata(pattern);

            CREATE TABLE IF NOT EXISTS test_structure (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                directory_path TEXT NOT NULL,
                category TEXT,
                file_count INTEGER,
                total_lines INTEGER,
                created_at TEXT DEFAULT (datetime('now'))
            );
            CREATE INDEX IF NOT EXISTS idx_structure_category
                ON test_structure(category);
            CREATE INDEX IF NOT EXISTS idx_structure_path
                ON test_structure(directory_path);

            CREATE TABLE IF NOT EXISTS test_function_mapping (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                test_id TEXT NOT NULL REFERENCES test_registry(test_id) ON DELETE CASCADE,
                module_name TEXT NOT NULL,
                function_name TEXT NOT NULL,
                call_type TEXT,
                source TEXT,
                created_at TEXT DEFAULT (datetime('now'))
            );
            CREATE INDEX IF NOT EXISTS idx_func_mapping_module_func
                ON test_function_mapping(module_name, function_name);
            CREATE INDEX IF NOT EXISTS idx_func_mapping_test
                ON test_function_mapping(test_id);
            CREATE INDEX IF NOT EXISTS idx_func_mapping_function
                ON test_function_mapping(function_name);
            "#,
            )
            .map_err(|e| ImpactError::StoreUnavailable {
                message: format!("schema creation failed: {}", e),
            })?;
        Ok(())
    }

    /// Whether the schema has been created
    pub fn schema_exists(&self) -> bool {
        self.conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'test_registry'",
                [],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map(|r| r.is_some())
            .unwrap_or(false)
    }

    /// Error with `SchemaMissing` unless the schema exists
    pub fn require_schema(&self) -> Result<()> {
        if self.schema_exists() {
            Ok(())
        } else {
            Err(ImpactError::SchemaMissing {
                schema: self.schema.clone(),
            })
        }
    }

    // ========================================================================
    // Loaders (idempotent upserts, one transaction per batch)
    // ========================================================================

    /// Upsert registry rows by `test_id`. A plain REPLACE would cascade
    /// child rows away, so conflicts update in place.
    pub fn upsert_tests(&mut self, rows: &[TestRow]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO test_registry
                 (test_id, file_path, class_name, method_name, test_type, line_number)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(test_id) DO UPDATE SET
                     file_path = excluded.file_path,
                     class_name = excluded.class_name,
                     method_name = excluded.method_name,
                     test_type = excluded.test_type,
                     line_number = excluded.line_number",
            )?;
            for row in rows {
                stmt.execute(params![
                    row.test_id,
                    row.file_path,
                    row.class_name,
                    row.method_name,
                    row.test_type,
                    row.line_number,
                ])?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    /// Replace dependency rows for every test in scope. Tests in scope
    /// with no rows in the batch end up with none, so re-runs converge.
    pub fn replace_dependencies(&mut self, scope: &[String], rows: &[DependencyRow]) -> Result<usize> {
        let test_ids: HashSet<&str> = scope
            .iter()
            .map(|s| s.as_str())
            .chain(rows.iter().map(|r| r.test_id.as_str()))
            .collect();
        let tx = self.conn.transaction()?;
        {
            let mut delete = tx.prepare_cached("DELETE FROM test_dependencies WHERE test_id = ?1")?;
            for test_id in &test_ids {
                delete.execute(params![test_id])?;
            }
            let mut insert = tx.prepare_cached(
                "INSERT INTO test_dependencies (test_id, referenced_class, import_type)
                 VALUES (?1, ?2, ?3)",
            )?;
            for row in rows {
                insert.execute(params![row.test_id, row.referenced_class, row.import_type])?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    /// Rebuild the reverse index from scratch (it is a materialized view)
    pub fn replace_reverse_index(&mut self, rows: &[ReverseIndexRow]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        {
            tx.execute("DELETE FROM reverse_index", [])?;
            let mut insert = tx.prepare_cached(
                "INSERT INTO reverse_index
                 (production_class, test_id, test_file_path, reference_type)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for row in rows {
                insert.execute(params![
                    row.production_class,
                    row.test_id,
                    row.test_file_path,
                    row.reference_type,
                ])?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    /// Replace function-mapping rows for every test in scope
    pub fn replace_function_mappings(
        &mut self,
        scope: &[String],
        rows: &[FunctionMappingRow],
    ) -> Result<usize> {
        let test_ids: HashSet<&str> = scope
            .iter()
            .map(|s| s.as_str())
            .chain(rows.iter().map(|r| r.test_id.as_str()))
            .collect();
        let tx = self.conn.transaction()?;
        {
            let mut delete =
                tx.prepare_cached("DELETE FROM test_function_mapping WHERE test_id = ?1")?;
            for test_id in &test_ids {
                delete.execute(params![test_id])?;
            }
            let mut insert = tx.prepare_cached(
                "INSERT INTO test_function_mapping
                 (test_id, module_name, function_name, call_type, source)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for row in rows {
                insert.execute(params![
                    row.test_id,
                    row.module_name,
                    row.function_name,
                    row.call_type,
                    row.source,
                ])?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    /// Upsert metadata rows (exactly one per test). An existing embedding
    /// survives the upsert.
    pub fn upsert_metadata(&mut self, rows: &[MetadataRow]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO test_metadata
                 (test_id, description, markers, is_async, is_parameterized, pattern, line_number)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(test_id) DO UPDATE SET
                     description = excluded.description,
                     markers = excluded.markers,
                     is_async = excluded.is_async,
                     is_parameterized = excluded.is_parameterized,
                     pattern = excluded.pattern,
                     line_number = excluded.line_number",
            )?;
            for row in rows {
                let markers_json = serde_json::to_string(&row.markers)?;
                stmt.execute(params![
                    row.test_id,
                    row.description,
                    markers_json,
                    row.is_async,
                    row.is_parameterized,
                    row.pattern,
                    row.line_number,
                ])?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    /// Replace the structure summary
    pub fn replace_structure(&mut self, rows: &[StructureRow]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        {
            tx.execute("DELETE FROM test_structure", [])?;
            let mut insert = tx.prepare_cached(
                "INSERT INTO test_structure (directory_path, category, file_count, total_lines)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for row in rows {
                insert.execute(params![
                    row.directory_path,
                    row.category,
                    row.file_count,
                    row.total_lines,
                ])?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    /// Delete tests and (via cascade) all their child rows
    pub fn delete_tests(&mut self, test_ids: &[String]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut removed = 0;
        {
            let mut stmt = tx.prepare_cached("DELETE FROM test_registry WHERE test_id = ?1")?;
            for test_id in test_ids {
                removed += stmt.execute(params![test_id])?;
            }
        }
        tx.commit()?;
        Ok(removed)
    }

    // ========================================================================
    // Registry reads
    // ========================================================================

    /// Highest assigned numeric test id, if any (`test_0042` → 42)
    pub fn max_test_id(&self) -> Result<Option<u64>> {
        let mut stmt = self.conn.prepare("SELECT test_id FROM test_registry")?;
        let ids = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut max = None;
        for id in ids.flatten() {
            if let Some(num) = id.strip_prefix("test_").and_then(|n| n.parse::<u64>().ok()) {
                max = Some(max.map_or(num, |m: u64| m.max(num)));
            }
        }
        Ok(max)
    }

    pub fn count_tests(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM test_registry", [], |r| r.get(0))?)
    }

    /// Row count of an arbitrary fact table (diagnostics)
    pub fn count_rows(&self, table: &str) -> Result<i64> {
        let allowed = [
            "test_registry",
            "test_dependencies",
            "reverse_index",
            "test_metadata",
            "test_structure",
            "test_function_mapping",
        ];
        if !allowed.contains(&table) {
            return Err(ImpactError::InputMalformed {
                message: format!("unknown table: {table}"),
            });
        }
        Ok(self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))?)
    }

    pub fn all_tests(&self) -> Result<Vec<TestRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT test_id, file_path, class_name, method_name, test_type, line_number
             FROM test_registry ORDER BY test_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(TestRow {
                test_id: row.get(0)?,
                file_path: row.get(1)?,
                class_name: row.get(2)?,
                method_name: row.get(3)?,
                test_type: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                line_number: row.get(5)?,
            })
        })?;
        Ok(rows.flatten().collect())
    }

    pub fn distinct_file_paths(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT file_path FROM test_registry ORDER BY file_path")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows.flatten().collect())
    }

    /// Sample production classes matching a prefix (diagnostics)
    pub fn sample_production_classes(&self, prefix: &str, limit: usize) -> Result<Vec<(String, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT production_class, reference_type FROM reverse_index
             WHERE production_class LIKE ?1 OR production_class = ?2
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            params![format!("{prefix}%"), prefix, limit as i64],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        )?;
        Ok(rows.flatten().collect())
    }

    // ========================================================================
    // Query primitives
    // ========================================================================

    /// Tests referencing a production class: exact name or `name.` prefix.
    /// Deduplicated per test, exact matches first, `string_ref` first.
    pub fn tests_for_class(&self, name: &str) -> Result<Vec<MatchedTestRow>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT tr.test_id, tr.class_name, tr.method_name, tr.file_path,
                    tr.test_type, ri.reference_type,
                    CASE WHEN ri.production_class = ?1 THEN 1 ELSE 2 END AS exact_priority,
                    CASE WHEN ri.reference_type = 'string_ref' THEN 1 ELSE 2 END AS ref_priority
             FROM reverse_index ri
             JOIN test_registry tr ON ri.test_id = tr.test_id
             WHERE ri.production_class = ?1 OR ri.production_class LIKE ?2
             ORDER BY exact_priority, ref_priority, tr.test_id",
        )?;
        let rows = stmt.query_map(params![name, format!("{name}.%")], row_with_reference)?;
        Ok(dedup_by_test_id(rows.flatten()))
    }

    /// Tests for a module prefix. With `prefer_direct`, prefix matches are
    /// restricted to direct references; `specific_classes` narrows broad
    /// module matches to the classes actually changed.
    pub fn tests_for_module_pattern(
        &self,
        prefix: &str,
        prefer_direct: bool,
        specific_classes: Option<&[String]>,
    ) -> Result<Vec<MatchedTestRow>> {
        let collected: Vec<MatchedTestRow> = match (prefer_direct, specific_classes) {
            (true, Some(classes)) if !classes.is_empty() => {
                let placeholders = classes
                    .iter()
                    .enumerate()
                    .map(|(i, _)| format!("?{}", i + 3))
                    .collect::<Vec<_>>()
                    .join(", ");
                let sql = format!(
                    "SELECT tr.test_id, tr.class_name, tr.method_name, tr.file_path,
                            tr.test_type, ri.reference_type,
                            CASE WHEN ri.production_class = ?1 THEN 1 ELSE 2 END AS exact_priority,
                            CASE WHEN ri.reference_type IN ('direct_import', 'string_ref')
                                 THEN 1 ELSE 2 END AS ref_priority
                     FROM reverse_index ri
                     JOIN test_registry tr ON ri.test_id = tr.test_id
                     WHERE ri.production_class IN ({placeholders})
                        OR (ri.production_class = ?2
                            AND ri.reference_type IN ('direct_import', 'string_ref'))
                     ORDER BY exact_priority, ref_priority, tr.test_id"
                );
                let mut stmt = self.conn.prepare(&sql)?;
                let mut bindings: Vec<&dyn rusqlite::ToSql> = vec![&prefix, &prefix];
                for class in classes {
                    bindings.push(class);
                }
                let rows = stmt.query_map(params_from_iter(bindings), row_with_reference)?;
                rows.flatten().collect()
            }
            (true, _) => {
                let mut stmt = self.conn.prepare_cached(
                    "SELECT tr.test_id, tr.class_name, tr.method_name, tr.file_path,
                            tr.test_type, ri.reference_type,
                            CASE WHEN ri.production_class = ?1 THEN 1 ELSE 2 END AS exact_priority,
                            CASE WHEN ri.reference_type IN ('direct_import', 'string_ref')
                                 THEN 1 ELSE 2 END AS ref_priority
                     FROM reverse_index ri
                     JOIN test_registry tr ON ri.test_id = tr.test_id
                     WHERE ri.production_class = ?1
                        OR (ri.production_class LIKE ?2
                            AND ri.reference_type IN ('direct_import', 'string_ref'))
                     ORDER BY exact_priority, ref_priority, tr.test_id",
                )?;
                let rows =
                    stmt.query_map(params![prefix, format!("{prefix}.%")], row_with_reference)?;
                rows.flatten().collect()
            }
            (false, _) => {
                let mut stmt = self.conn.prepare_cached(
                    "SELECT tr.test_id, tr.class_name, tr.method_name, tr.file_path,
                            tr.test_type, ri.reference_type,
                            1 AS exact_priority, 1 AS ref_priority
                     FROM reverse_index ri
                     JOIN test_registry tr ON ri.test_id = tr.test_id
                     WHERE ri.production_class = ?1 OR ri.production_class LIKE ?2
                     ORDER BY tr.test_id",
                )?;
                let rows =
                    stmt.query_map(params![prefix, format!("{prefix}.%")], row_with_reference)?;
                rows.flatten().collect()
            }
        };
        Ok(dedup_by_test_id(collected.into_iter()))
    }

    /// Tests that call or patch a specific production function.
    /// `patch_ref` rows rank ahead of `method_call` rows.
    pub fn tests_for_function(&self, module: &str, function: &str) -> Result<Vec<MatchedTestRow>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT tr.test_id, tr.class_name, tr.method_name, tr.file_path,
                    tr.test_type, tfm.call_type, tfm.source,
                    CASE WHEN tfm.source = 'patch_ref' THEN 1 ELSE 2 END AS source_priority
             FROM test_function_mapping tfm
             JOIN test_registry tr ON tfm.test_id = tr.test_id
             WHERE tfm.module_name = ?1 AND tfm.function_name = ?2
             ORDER BY source_priority, tr.test_id",
        )?;
        let rows = stmt.query_map(params![module, function], |row| {
            Ok(MatchedTestRow {
                test_id: row.get(0)?,
                class_name: row.get(1)?,
                method_name: row.get(2)?,
                test_file_path: row.get(3)?,
                test_type: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                reference_type: None,
                call_type: row.get(5)?,
                source: row.get(6)?,
            })
        })?;
        Ok(dedup_by_test_id(rows.flatten()))
    }

    /// Tests whose file path matches a separator-tolerant wildcard
    pub fn tests_by_path_pattern(&self, pattern: &str) -> Result<Vec<MatchedTestRow>> {
        let like = pattern.replace('\\', "/").replace('*', "%");
        let mut stmt = self.conn.prepare_cached(
            "SELECT test_id, class_name, method_name, file_path, test_type
             FROM test_registry
             WHERE REPLACE(file_path, '\\', '/') LIKE ?1
             ORDER BY test_id",
        )?;
        let rows = stmt.query_map(params![like], |row| {
            Ok(MatchedTestRow {
                test_id: row.get(0)?,
                class_name: row.get(1)?,
                method_name: row.get(2)?,
                test_file_path: row.get(3)?,
                test_type: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                reference_type: None,
                call_type: None,
                source: None,
            })
        })?;
        Ok(rows.flatten().collect())
    }

    /// As [`tests_for_class`], restricted to integration / e2e tests
    pub fn integration_tests_for_class(&self, name: &str) -> Result<Vec<MatchedTestRow>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT tr.test_id, tr.class_name, tr.method_name, tr.file_path,
                    tr.test_type, ri.reference_type
             FROM reverse_index ri
             JOIN test_registry tr ON ri.test_id = tr.test_id
             WHERE ri.production_class = ?1
               AND tr.test_type IN ('integration', 'e2e')
             ORDER BY tr.test_type, tr.test_id",
        )?;
        let rows = stmt.query_map(params![name], row_with_reference)?;
        Ok(dedup_by_test_id(rows.flatten()))
    }

    // ========================================================================
    // Embedding column (relational vector backend)
    // ========================================================================

    /// Store a vector for one test as little-endian f32 bytes
    pub fn set_embedding(&mut self, test_id: &str, vector: &[f32]) -> Result<bool> {
        let mut bytes = Vec::with_capacity(vector.len() * 4);
        for value in vector {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        let updated = self.conn.execute(
            "UPDATE test_metadata SET embedding = ?1 WHERE test_id = ?2",
            params![bytes, test_id],
        )?;
        Ok(updated > 0)
    }

    /// All tests carrying an embedding, joined to the registry
    pub fn tests_with_embeddings(&self) -> Result<Vec<(MatchedTestRow, Vec<f32>)>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT tm.test_id, tr.class_name, tr.method_name, tr.file_path,
                    tr.test_type, tm.embedding
             FROM test_metadata tm
             JOIN test_registry tr ON tm.test_id = tr.test_id
             WHERE tm.embedding IS NOT NULL
             ORDER BY tm.test_id",
        )?;
        let rows = stmt.query_map([], |row| {
            let blob: Vec<u8> = row.get(5)?;
            Ok((
                MatchedTestRow {
                    test_id: row.get(0)?,
                    class_name: row.get(1)?,
                    method_name: row.get(2)?,
                    test_file_path: row.get(3)?,
                    test_type: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                    reference_type: None,
                    call_type: None,
                    source: None,
                },
                blob.chunks_exact(4)
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            ))
        })?;
        Ok(rows.flatten().collect())
    }

    pub fn count_embeddings(&self) -> Result<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM test_metadata WHERE embedding IS NOT NULL",
            [],
            |r| r.get(0),
        )?)
    }

    pub fn clear_embeddings(&mut self) -> Result<usize> {
        Ok(self
            .conn
            .execute("UPDATE test_metadata SET embedding = NULL", [])?)
    }
}

fn row_with_reference(row: &rusqlite::Row) -> rusqlite::Result<MatchedTestRow> {
    Ok(MatchedTestRow {
        test_id: row.get(0)?,
        class_name: row.get(1)?,
        method_name: row.get(2)?,
        test_file_path: row.get(3)?,
        test_type: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
        reference_type: row.get(5)?,
        call_type: None,
        source: None,
    })
}

/// Keep the first row per test id, preserving query ordering
fn dedup_by_test_id(rows: impl Iterator<Item = MatchedTestRow>) -> Vec<MatchedTestRow> {
    let mut seen = HashSet::new();
    let mut result = Vec::new();
    for row in rows {
        if seen.insert(row.test_id.clone()) {
            result.push(row);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_fixture() -> FactStore {
        let mut store = FactStore::open_in_memory().unwrap();
        store.ensure_schema().unwrap();

        store
            .upsert_tests(&[
                TestRow {
                    test_id: "test_0001".into(),
                    file_path: "/repo/unit/test_agent.py".into(),
                    class_name: Some("TestAgent".into()),
                    method_name: "test_initialize".into(),
                    test_type: "unit".into(),
                    line_number: Some(10),
                },
                TestRow {
                    test_id: "test_0002".into(),
                    file_path: "/repo/unit/test_agent.py".into(),
                    class_name: Some("TestAgent".into()),
                    method_name: "test_shutdown".into(),
                    test_type: "unit".into(),
                    line_number: Some(30),
                },
                TestRow {
                    test_id: "test_0003".into(),
                    file_path: "/repo/integration/test_workflow.py".into(),
                    class_name: None,
                    method_name: "test_full_workflow".into(),
                    test_type: "integration".into(),
                    line_number: Some(5),
                },
            ])
            .unwrap();

        store
            .replace_reverse_index(&[
                ReverseIndexRow {
                    production_class: "agent.langgraph_agent".into(),
                    test_id: "test_0001".into(),
                    test_file_path: "/repo/unit/test_agent.py".into(),
                    reference_type: "direct_import".into(),
                },
                ReverseIndexRow {
                    production_class: "agent.langgraph_agent.LangGraphAgent".into(),
                    test_id: "test_0001".into(),
                    test_file_path: "/repo/unit/test_agent.py".into(),
                    reference_type: "string_ref".into(),
                },
                ReverseIndexRow {
                    production_class: "agent.langgraph_agent".into(),
                    test_id: "test_0002".into(),
                    test_file_path: "/repo/unit/test_agent.py".into(),
                    reference_type: "indirect".into(),
                },
                ReverseIndexRow {
                    production_class: "agent.langgraph_agent".into(),
                    test_id: "test_0003".into(),
                    test_file_path: "/repo/integration/test_workflow.py".into(),
                    reference_type: "direct_import".into(),
                },
            ])
            .unwrap();

        store
            .replace_function_mappings(&[], &[
                FunctionMappingRow {
                    test_id: "test_0001".into(),
                    module_name: "agent.langgraph_agent".into(),
                    function_name: "initialize".into(),
                    call_type: "method".into(),
                    source: "method_call".into(),
                },
                FunctionMappingRow {
                    test_id: "test_0002".into(),
                    module_name: "agent.langgraph_agent".into(),
                    function_name: "initialize".into(),
                    call_type: "patch_ref".into(),
                    source: "patch_ref".into(),
                },
            ])
            .unwrap();

        store
    }

    #[test]
    fn test_tests_for_class_exact_and_prefix() {
        let store = store_with_fixture();
        let rows = store.tests_for_class("agent.langgraph_agent").unwrap();
        // all three tests reference the class or a prefixed symbol
        assert_eq!(rows.len(), 3);
        // deduplicated: test_0001 appears once despite two index rows
        assert_eq!(
            rows.iter().filter(|r| r.test_id == "test_0001").count(),
            1
        );
    }

    #[test]
    fn test_tests_for_function_ranks_patch_ref_first() {
        let store = store_with_fixture();
        let rows = store
            .tests_for_function("agent.langgraph_agent", "initialize")
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].test_id, "test_0002");
        assert_eq!(rows[0].source.as_deref(), Some("patch_ref"));
    }

    #[test]
    fn test_module_pattern_prefers_direct_references() {
        let store = store_with_fixture();
        let rows = store
            .tests_for_module_pattern("agent", true, None)
            .unwrap();
        // test_0002 only has an indirect reference to a prefixed class,
        // so direct-preferring mode drops it
        assert!(rows.iter().any(|r| r.test_id == "test_0001"));
        assert!(!rows.iter().any(|r| r.test_id == "test_0002"));

        let broad = store
            .tests_for_module_pattern("agent", false, None)
            .unwrap();
        assert!(broad.iter().any(|r| r.test_id == "test_0002"));
    }

    #[test]
    fn test_module_pattern_specific_classes() {
        let store = store_with_fixture();
        let rows = store
            .tests_for_module_pattern(
                "agent",
                true,
                Some(&["agent.langgraph_agent".to_string()]),
            )
            .unwrap();
        assert!(rows.iter().any(|r| r.test_id == "test_0001"));
        assert!(rows.iter().any(|r| r.test_id == "test_0003"));
    }

    #[test]
    fn test_integration_scope() {
        let store = store_with_fixture();
        let rows = store
            .integration_tests_for_class("agent.langgraph_agent")
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].test_id, "test_0003");
        assert_eq!(rows[0].test_type, "integration");
    }

    #[test]
    fn test_path_pattern_is_separator_tolerant() {
        let store = store_with_fixture();
        let rows = store.tests_by_path_pattern("%/test_agent.py").unwrap();
        assert_eq!(rows.len(), 2);
        let wildcard = store.tests_by_path_pattern("*test_workflow*").unwrap();
        assert_eq!(wildcard.len(), 1);
    }

    #[test]
    fn test_cascade_delete_children() {
        let mut store = store_with_fixture();
        store.delete_tests(&["test_0001".to_string()]).unwrap();
        assert_eq!(store.count_tests().unwrap(), 2);
        assert_eq!(
            store
                .tests_for_function("agent.langgraph_agent", "initialize")
                .unwrap()
                .len(),
            1
        );
        let remaining = store.tests_for_class("agent.langgraph_agent").unwrap();
        assert!(!remaining.iter().any(|r| r.test_id == "test_0001"));
    }

    #[test]
    fn test_max_test_id_and_counter_continuation() {
        let store = store_with_fixture();
        assert_eq!(store.max_test_id().unwrap(), Some(3));
        let empty = FactStore::open_in_memory().unwrap();
        empty.ensure_schema().unwrap();
        assert_eq!(empty.max_test_id().unwrap(), None);
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let mut store = store_with_fixture();
        let rows = store.all_tests().unwrap();
        store.upsert_tests(&rows).unwrap();
        assert_eq!(store.count_tests().unwrap(), 3);
    }

    #[test]
    fn test_embedding_round_trip() {
        let mut store = store_with_fixture();
        store
            .upsert_metadata(&[MetadataRow {
                test_id: "test_0001".into(),
                description: "checks agent init".into(),
                markers: vec!["asyncio".into()],
                is_async: true,
                is_parameterized: false,
                pattern: "test_prefix".into(),
                line_number: Some(10),
            }])
            .unwrap();

        let vector = vec![0.25_f32, -1.5, 3.0];
        assert!(store.set_embedding("test_0001", &vector).unwrap());
        let stored = store.tests_with_embeddings().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].1, vector);

        store.clear_embeddings().unwrap();
        assert_eq!(store.count_embeddings().unwrap(), 0);
    }

    #[test]
    fn test_schema_missing_detection() {
        let store = FactStore::open_in_memory().unwrap();
        assert!(!store.schema_exists());
        assert!(matches!(
            store.require_schema(),
            Err(ImpactError::SchemaMissing { .. })
        ));
        store.ensure_schema().unwrap();
        assert!(store.require_schema().is_ok());
    }
}
