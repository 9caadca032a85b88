// OLAPスキーマのSQL
//
// スタースキーマのDDL、ディメンション・ファクトの一括挿入、
// テナントマートの再構築、エクスポート用クエリを組み立てる。
// 識別子は固定値またはTenantコードのみを埋め込み、値はすべてバインドする。

use crate::domain::{ExportDataset, Tenant};

/// スタースキーマのDDL（実行順）
pub const SCHEMA_STATEMENTS: [&str; 6] = [
    r#"CREATE SCHEMA IF NOT EXISTS "OLAP""#,
    r#"CREATE TABLE IF NOT EXISTS "OLAP".dim_time (
    time_id SERIAL PRIMARY KEY,
    "timestamp" TIMESTAMP NOT NULL,
    hour INTEGER NOT NULL,
    day INTEGER NOT NULL,
    month INTEGER NOT NULL,
    year INTEGER NOT NULL,
    CONSTRAINT uq_dim_time UNIQUE ("timestamp", hour, day, month, year)
)"#,
    r#"CREATE TABLE IF NOT EXISTS "OLAP".dim_location (
    location_id SERIAL PRIMARY KEY,
    country VARCHAR(100) NOT NULL,
    region VARCHAR(100) NOT NULL,
    city VARCHAR(100) NOT NULL,
    zip_code VARCHAR(20) NOT NULL,
    latitude DOUBLE PRECISION NOT NULL,
    longitude DOUBLE PRECISION NOT NULL,
    CONSTRAINT uq_dim_location UNIQUE (country, region, city, zip_code, latitude, longitude)
)"#,
    r#"CREATE TABLE IF NOT EXISTS "OLAP".dim_user (
    user_id SERIAL PRIMARY KEY,
    role VARCHAR(100) NOT NULL,
    origin VARCHAR(100) NOT NULL,
    CONSTRAINT uq_dim_user UNIQUE (role, origin)
)"#,
    r#"CREATE TABLE IF NOT EXISTS "OLAP".dim_service (
    service_id SERIAL PRIMARY KEY,
    destination VARCHAR(100) NOT NULL,
    api_version VARCHAR(50) NOT NULL,
    service_type VARCHAR(50) NOT NULL,
    CONSTRAINT uq_dim_service UNIQUE (destination, api_version, service_type)
)"#,
    r#"CREATE TABLE IF NOT EXISTS "OLAP".fact_log_transactions (
    log_id BIGINT PRIMARY KEY,
    time_id INTEGER NOT NULL REFERENCES "OLAP".dim_time (time_id),
    location_id INTEGER NOT NULL REFERENCES "OLAP".dim_location (location_id),
    user_id INTEGER NOT NULL REFERENCES "OLAP".dim_user (user_id),
    service_id INTEGER NOT NULL REFERENCES "OLAP".dim_service (service_id),
    request_method VARCHAR(20),
    request_url TEXT,
    request_headers TEXT,
    request_body TEXT,
    response_status_code INTEGER,
    response_body TEXT,
    execution_time_ms INTEGER,
    error_message TEXT
)"#,
];

/// 1文で送るキー・ファクトの最大件数
pub const LOAD_CHUNK_SIZE: usize = 5_000;

/// ディメンションテーブルの定義
///
/// キー列は列ごとの配列としてバインドし、`UNNEST`で行に展開する。
/// `array_types`は`columns`と同じ順のPostgres配列要素型。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimension {
    pub table: &'static str,
    pub id_column: &'static str,
    pub constraint: &'static str,
    pub columns: &'static [&'static str],
    pub array_types: &'static [&'static str],
}

pub const DIM_TIME: Dimension = Dimension {
    table: "dim_time",
    id_column: "time_id",
    constraint: "uq_dim_time",
    columns: &["timestamp", "hour", "day", "month", "year"],
    array_types: &["timestamp", "int4", "int4", "int4", "int4"],
};

pub const DIM_LOCATION: Dimension = Dimension {
    table: "dim_location",
    id_column: "location_id",
    constraint: "uq_dim_location",
    columns: &[
        "country",
        "region",
        "city",
        "zip_code",
        "latitude",
        "longitude",
    ],
    array_types: &["text", "text", "text", "text", "float8", "float8"],
};

pub const DIM_USER: Dimension = Dimension {
    table: "dim_user",
    id_column: "user_id",
    constraint: "uq_dim_user",
    columns: &["role", "origin"],
    array_types: &["text", "text"],
};

pub const DIM_SERVICE: Dimension = Dimension {
    table: "dim_service",
    id_column: "service_id",
    constraint: "uq_dim_service",
    columns: &["destination", "api_version", "service_type"],
    array_types: &["text", "text", "text"],
};

fn quoted(columns: &[&str]) -> Vec<String> {
    columns.iter().map(|c| format!("\"{}\"", c)).collect()
}

/// `UNNEST($1::type[], $2::type[], ...)`
fn unnest(array_types: &[&str]) -> String {
    let arrays = array_types
        .iter()
        .enumerate()
        .map(|(i, ty)| format!("${}::{}[]", i + 1, ty))
        .collect::<Vec<_>>()
        .join(", ");
    format!("UNNEST({})", arrays)
}

impl Dimension {
    /// キー配列をまとめて挿入する（既存のキーは無視）
    pub fn insert_batch_sql(&self) -> String {
        let columns = quoted(self.columns).join(", ");
        format!(
            r#"INSERT INTO "OLAP".{table} ({columns})
SELECT {columns} FROM {source} AS k({columns})
ON CONFLICT ON CONSTRAINT {constraint} DO NOTHING"#,
            table = self.table,
            columns = columns,
            source = unnest(self.array_types),
            constraint = self.constraint,
        )
    }

    /// キー配列の各要素のIDを取得する
    ///
    /// 1列目は配列内の位置（1始まり）、2列目がID。
    pub fn lookup_batch_sql(&self) -> String {
        let predicate = quoted(self.columns)
            .iter()
            .map(|c| format!("d.{} = k.{}", c, c))
            .collect::<Vec<_>>()
            .join(" AND ");
        format!(
            r#"SELECT k.ord, d.{id}
FROM {source} WITH ORDINALITY AS k({columns}, ord)
JOIN "OLAP".{table} d ON {predicate}"#,
            id = self.id_column,
            source = unnest(self.array_types),
            columns = quoted(self.columns).join(", "),
            table = self.table,
            predicate = predicate,
        )
    }
}

/// ファクト列の配列要素型（`FACT_COLUMNS`と同じ順）
const FACT_ARRAY_TYPES: [&str; 13] = [
    "int8", "int4", "int4", "int4", "int4", "text", "text", "text", "text", "int4", "text",
    "int4", "text",
];

/// ファクト行をまとめて挿入する（既存のlog_idは無視）
pub fn insert_facts_sql() -> String {
    let columns = quoted(&FACT_COLUMNS).join(", ");
    format!(
        r#"INSERT INTO "OLAP".fact_log_transactions ({columns})
SELECT {columns} FROM {source} AS f({columns})
ON CONFLICT (log_id) DO NOTHING"#,
        columns = columns,
        source = unnest(&FACT_ARRAY_TYPES),
    )
}

/// マートの列（型付き）と取得元の式
const MART_COLUMNS: [(&str, &str, &str); 25] = [
    ("log_id", "BIGINT PRIMARY KEY", "f.log_id"),
    ("timestamp", "TIMESTAMP NOT NULL", "t.\"timestamp\""),
    ("hour", "INTEGER NOT NULL", "t.hour"),
    ("day", "INTEGER NOT NULL", "t.day"),
    ("month", "INTEGER NOT NULL", "t.month"),
    ("year", "INTEGER NOT NULL", "t.year"),
    ("country", "VARCHAR(100) NOT NULL", "l.country"),
    ("region", "VARCHAR(100) NOT NULL", "l.region"),
    ("city", "VARCHAR(100) NOT NULL", "l.city"),
    ("zip_code", "VARCHAR(20) NOT NULL", "l.zip_code"),
    ("latitude", "DOUBLE PRECISION NOT NULL", "l.latitude"),
    ("longitude", "DOUBLE PRECISION NOT NULL", "l.longitude"),
    ("role", "VARCHAR(100) NOT NULL", "u.role"),
    ("origin", "VARCHAR(100) NOT NULL", "u.origin"),
    ("destination", "VARCHAR(100) NOT NULL", "s.destination"),
    ("api_version", "VARCHAR(50) NOT NULL", "s.api_version"),
    ("service_type", "VARCHAR(50) NOT NULL", "s.service_type"),
    ("request_method", "VARCHAR(20)", "f.request_method"),
    ("request_url", "TEXT", "f.request_url"),
    ("request_headers", "TEXT", "f.request_headers"),
    ("request_body", "TEXT", "f.request_body"),
    ("response_status_code", "INTEGER", "f.response_status_code"),
    ("response_body", "TEXT", "f.response_body"),
    ("execution_time_ms", "INTEGER", "f.execution_time_ms"),
    ("error_message", "TEXT", "f.error_message"),
];

/// ファクトと全ディメンションの結合
const STAR_JOIN: &str = r#"FROM "OLAP".fact_log_transactions f
JOIN "OLAP".dim_time t ON t.time_id = f.time_id
JOIN "OLAP".dim_location l ON l.location_id = f.location_id
JOIN "OLAP".dim_user u ON u.user_id = f.user_id
JOIN "OLAP".dim_service s ON s.service_id = f.service_id"#;

/// テナントのスライス条件（$1..$2がウィンドウ、$3がテナント表示名）
///
/// テナントから呼び出した行と、テナントが呼び出された行の両方を含む。
const TENANT_SLICE: &str =
    r#"WHERE t."timestamp" >= $1 AND t."timestamp" < $2 AND (u.origin = $3 OR s.destination = $3)"#;

/// テナントマートのテーブル名
pub fn mart_table(tenant: Tenant) -> String {
    format!("mart_{}", tenant.code())
}

/// テナントマートの作成（存在しない場合のみ）
pub fn create_mart_sql(tenant: Tenant) -> String {
    let columns = MART_COLUMNS
        .iter()
        .map(|(name, ty, _)| format!("    \"{}\" {}", name, ty))
        .collect::<Vec<_>>()
        .join(",\n");
    format!(
        "CREATE TABLE IF NOT EXISTS \"OLAP\".{} (\n{}\n)",
        mart_table(tenant),
        columns
    )
}

/// テナントマートの全行削除
pub fn clear_mart_sql(tenant: Tenant) -> String {
    format!("DELETE FROM \"OLAP\".{}", mart_table(tenant))
}

/// テナントマートへのウィンドウ分の挿入
pub fn fill_mart_sql(tenant: Tenant) -> String {
    let names = MART_COLUMNS
        .iter()
        .map(|(name, _, _)| format!("\"{}\"", name))
        .collect::<Vec<_>>()
        .join(", ");
    let sources = MART_COLUMNS
        .iter()
        .map(|(_, _, source)| *source)
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO \"OLAP\".{} ({})\nSELECT {}\n{}\n{}",
        mart_table(tenant),
        names,
        sources,
        STAR_JOIN,
        TENANT_SLICE
    )
}

/// ファクトテーブルの列
const FACT_COLUMNS: [&str; 13] = [
    "log_id",
    "time_id",
    "location_id",
    "user_id",
    "service_id",
    "request_method",
    "request_url",
    "request_headers",
    "request_body",
    "response_status_code",
    "response_body",
    "execution_time_ms",
    "error_message",
];

/// 時間ディメンションの列
const TIME_COLUMNS: [&str; 6] = ["time_id", "timestamp", "hour", "day", "month", "year"];

fn text_columns(alias: &str, columns: &[&str]) -> String {
    columns
        .iter()
        .map(|c| format!("{}.\"{}\"::text AS \"{}\"", alias, c, c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// エクスポート用クエリ
///
/// すべての列をテキストとして取得する。バインドは`$1..$2`がウィンドウ、
/// `binds_tenant`の場合は`$3`にテナント表示名。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetQuery {
    pub sql: String,
    pub columns: Vec<&'static str>,
    pub binds_tenant: bool,
}

pub fn dataset_query(dataset: ExportDataset, tenant: Tenant) -> DatasetQuery {
    match dataset {
        ExportDataset::SalesFact => DatasetQuery {
            sql: format!(
                "SELECT {}\n{}\n{}\nORDER BY f.log_id",
                text_columns("f", &FACT_COLUMNS),
                STAR_JOIN,
                TENANT_SLICE
            ),
            columns: FACT_COLUMNS.to_vec(),
            binds_tenant: true,
        },
        ExportDataset::TimeDim => DatasetQuery {
            sql: format!(
                "SELECT {}\nFROM \"OLAP\".dim_time t\nWHERE t.\"timestamp\" >= $1 AND t.\"timestamp\" < $2\nORDER BY t.\"timestamp\", t.time_id",
                text_columns("t", &TIME_COLUMNS)
            ),
            columns: TIME_COLUMNS.to_vec(),
            binds_tenant: false,
        },
        ExportDataset::Mart => {
            let columns: Vec<&'static str> = MART_COLUMNS.iter().map(|(name, _, _)| *name).collect();
            DatasetQuery {
                sql: format!(
                    "SELECT {}\nFROM \"OLAP\".{} m\nWHERE m.\"timestamp\" >= $1 AND m.\"timestamp\" < $2\nORDER BY m.\"timestamp\", m.log_id",
                    text_columns("m", &columns),
                    mart_table(tenant)
                ),
                columns,
                binds_tenant: false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_statements_order() {
        assert!(SCHEMA_STATEMENTS[0].contains("CREATE SCHEMA IF NOT EXISTS \"OLAP\""));
        // ファクトは参照先のディメンションの後に作る
        assert!(SCHEMA_STATEMENTS[5].contains("fact_log_transactions"));
        for ddl in &SCHEMA_STATEMENTS[1..] {
            assert!(ddl.starts_with("CREATE TABLE IF NOT EXISTS"));
        }
    }

    #[test]
    fn test_dimension_insert_batch_sql() {
        assert_eq!(
            DIM_USER.insert_batch_sql(),
            r#"INSERT INTO "OLAP".dim_user ("role", "origin")
SELECT "role", "origin" FROM UNNEST($1::text[], $2::text[]) AS k("role", "origin")
ON CONFLICT ON CONSTRAINT uq_dim_user DO NOTHING"#
        );
    }

    #[test]
    fn test_dimension_lookup_batch_sql() {
        let sql = DIM_TIME.lookup_batch_sql();

        assert!(sql.starts_with("SELECT k.ord, d.time_id\n"));
        assert!(sql.contains(
            "UNNEST($1::timestamp[], $2::int4[], $3::int4[], $4::int4[], $5::int4[]) WITH ORDINALITY"
        ));
        assert!(sql.contains(r#"AS k("timestamp", "hour", "day", "month", "year", ord)"#));
        assert!(sql.contains(r#"d."timestamp" = k."timestamp" AND d."hour" = k."hour""#));
        assert!(sql.ends_with(r#"d."year" = k."year""#));
    }

    #[test]
    fn test_dimension_columns_match_ddl() {
        for (dimension, ddl) in [
            (DIM_TIME, SCHEMA_STATEMENTS[1]),
            (DIM_LOCATION, SCHEMA_STATEMENTS[2]),
            (DIM_USER, SCHEMA_STATEMENTS[3]),
            (DIM_SERVICE, SCHEMA_STATEMENTS[4]),
        ] {
            assert!(ddl.contains(dimension.table));
            assert!(ddl.contains(&format!("CONSTRAINT {}", dimension.constraint)));
            assert!(ddl.contains(&format!("{} SERIAL PRIMARY KEY", dimension.id_column)));
            assert_eq!(dimension.columns.len(), dimension.array_types.len());
            for column in dimension.columns {
                assert!(ddl.contains(column), "{} not in {}", column, dimension.table);
            }
        }
    }

    #[test]
    fn test_insert_facts_sql() {
        let sql = insert_facts_sql();

        assert!(sql.starts_with(r#"INSERT INTO "OLAP".fact_log_transactions ("log_id", "time_id""#));
        assert!(sql.contains("UNNEST($1::int8[], $2::int4[]"));
        assert!(sql.contains("$13::text[]) AS f("));
        assert!(!sql.contains("$14"));
        assert!(sql.ends_with("ON CONFLICT (log_id) DO NOTHING"));
    }

    #[test]
    fn test_mart_sql_per_tenant() {
        assert_eq!(mart_table(Tenant::Evntgarde), "mart_evntgarde");

        let create = create_mart_sql(Tenant::Campus);
        assert!(create.starts_with("CREATE TABLE IF NOT EXISTS \"OLAP\".mart_campus ("));
        assert!(create.contains("\"log_id\" BIGINT PRIMARY KEY"));
        assert!(create.contains("\"service_type\" VARCHAR(50) NOT NULL"));

        assert_eq!(
            clear_mart_sql(Tenant::Teleo),
            "DELETE FROM \"OLAP\".mart_teleo"
        );

        let fill = fill_mart_sql(Tenant::Pillars);
        assert!(fill.starts_with("INSERT INTO \"OLAP\".mart_pillars ("));
        assert!(fill.contains("JOIN \"OLAP\".dim_service s ON s.service_id = f.service_id"));
        assert!(fill.contains("(u.origin = $3 OR s.destination = $3)"));
    }

    #[test]
    fn test_dataset_query() {
        let sales = dataset_query(ExportDataset::SalesFact, Tenant::Campus);
        assert!(sales.binds_tenant);
        assert!(sales.sql.contains("f.\"log_id\"::text AS \"log_id\""));
        assert!(sales.sql.contains("u.origin = $3"));
        assert_eq!(sales.columns.len(), 13);

        let time = dataset_query(ExportDataset::TimeDim, Tenant::Campus);
        assert!(!time.binds_tenant);
        assert!(time.sql.contains("FROM \"OLAP\".dim_time t"));
        assert!(!time.sql.contains("$3"));
        assert_eq!(
            time.columns,
            vec!["time_id", "timestamp", "hour", "day", "month", "year"]
        );

        let mart = dataset_query(ExportDataset::Mart, Tenant::Teleo);
        assert!(!mart.binds_tenant);
        assert!(mart.sql.contains("FROM \"OLAP\".mart_teleo m"));
        assert!(mart.sql.contains("m.\"error_message\"::text AS \"error_message\""));
        assert_eq!(mart.columns.first(), Some(&"log_id"));
        assert_eq!(mart.columns.len(), 25);
    }
}
