//! Catalog module: demo tables administered through the admin layer.

use diesel_async::AsyncPgConnection;
use diesel_async::SimpleAsyncConnection;

/// SQL migration for catalog tables.
///
/// Products soft-delete through `active` and carry audit columns.
pub const MIGRATION_SQL: &str = r#"
-- ================================================================
-- Catalog Tables
-- ================================================================

CREATE TABLE IF NOT EXISTS catalog_categories (
    id              BIGSERIAL PRIMARY KEY,
    name            VARCHAR(255) NOT NULL,
    description     TEXT,
    create_date     TIMESTAMPTZ DEFAULT NOW()
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_catalog_categories_name ON catalog_categories (name);

CREATE TABLE IF NOT EXISTS catalog_tags (
    id              BIGSERIAL PRIMARY KEY,
    name            VARCHAR(64) NOT NULL,
    color           VARCHAR(16)
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_catalog_tags_name ON catalog_tags (name);

CREATE TABLE IF NOT EXISTS catalog_products (
    id              BIGSERIAL PRIMARY KEY,
    name            VARCHAR(255) NOT NULL,
    slug            VARCHAR(255) NOT NULL,
    sku             VARCHAR(64) NOT NULL,
    description     TEXT,
    price           NUMERIC(12, 2) NOT NULL DEFAULT 0,
    stock           INTEGER NOT NULL DEFAULT 0,
    published       BOOLEAN NOT NULL DEFAULT FALSE,
    release_date    DATE,
    attributes      JSONB,
    image           VARCHAR(512),
    category_id     BIGINT REFERENCES catalog_categories(id) ON DELETE SET NULL,
    active          BOOLEAN NOT NULL DEFAULT TRUE,
    create_uid      BIGINT,
    create_date     TIMESTAMPTZ DEFAULT NOW(),
    write_uid       BIGINT,
    write_date      TIMESTAMPTZ DEFAULT NOW()
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_catalog_products_sku ON catalog_products (sku);
CREATE INDEX IF NOT EXISTS idx_catalog_products_category ON catalog_products (category_id);
CREATE INDEX IF NOT EXISTS idx_catalog_products_published ON catalog_products (published);

CREATE TABLE IF NOT EXISTS catalog_product_variants (
    id              BIGSERIAL PRIMARY KEY,
    product_id      BIGINT NOT NULL REFERENCES catalog_products(id) ON DELETE CASCADE,
    name            VARCHAR(255) NOT NULL,
    sku             VARCHAR(64),
    price           NUMERIC(12, 2),
    stock           INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_catalog_product_variants_product ON catalog_product_variants (product_id);

CREATE TABLE IF NOT EXISTS catalog_product_tags (
    product_id      BIGINT NOT NULL REFERENCES catalog_products(id) ON DELETE CASCADE,
    tag_id          BIGINT NOT NULL REFERENCES catalog_tags(id) ON DELETE CASCADE,
    PRIMARY KEY (product_id, tag_id)
);

CREATE INDEX IF NOT EXISTS idx_catalog_product_tags_tag ON catalog_product_tags (tag_id);
"#;

/// Run catalog migration.
pub async fn run_migration(conn: &mut AsyncPgConnection) -> anyhow::Result<()> {
    conn.batch_execute(MIGRATION_SQL)
        .await
        .map_err(|e| anyhow::anyhow!("catalog migration failed: {e}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migration_is_rerunnable() {
        let statements = MIGRATION_SQL
            .split(';')
            .map(str::trim)
            .filter(|s| s.starts_with("CREATE"));
        for statement in statements {
            assert!(statement.contains("IF NOT EXISTS"), "{statement}");
        }
    }

    #[test]
    fn migration_creates_every_catalog_table() {
        for table in [
            "catalog_categories",
            "catalog_tags",
            "catalog_products",
            "catalog_product_variants",
            "catalog_product_tags",
        ] {
            assert!(
                MIGRATION_SQL.contains(&format!("CREATE TABLE IF NOT EXISTS {table} (")),
                "{table}"
            );
        }
    }
}
