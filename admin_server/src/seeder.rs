//! Catalog demo data.

use diesel_async::AsyncPgConnection;
use diesel_async::RunQueryDsl;

/// Seed categories, tags, products, variants, and tag links.
///
/// Idempotent: uses ON CONFLICT DO NOTHING against the unique indexes.
pub async fn seed_catalog(conn: &mut AsyncPgConnection) -> anyhow::Result<()> {
    // ── 1. Categories ──
    let categories: Vec<(&str, &str)> = vec![
        ("Lighting", "Lamps, bulbs and fixtures"),
        ("Furniture", "Desks, chairs and shelving"),
        ("Accessories", "Small items for the workspace"),
    ];
    for (name, description) in &categories {
        diesel::sql_query(format!(
            "INSERT INTO catalog_categories (name, description) VALUES ('{name}', '{description}') \
             ON CONFLICT (name) DO NOTHING"
        ))
        .execute(conn)
        .await?;
    }

    // ── 2. Tags ──
    let tags: Vec<(&str, &str)> = vec![
        ("new", "#2e7d32"),
        ("sale", "#c62828"),
        ("eco", "#558b2f"),
        ("bestseller", "#f9a825"),
    ];
    for (name, color) in &tags {
        diesel::sql_query(format!(
            "INSERT INTO catalog_tags (name, color) VALUES ('{name}', '{color}') \
             ON CONFLICT (name) DO NOTHING"
        ))
        .execute(conn)
        .await?;
    }

    // ── 3. Products ──
    let products: Vec<(&str, &str, &str, &str, i32, bool, &str)> = vec![
        ("Desk Lamp", "desk-lamp", "LMP-001", "49.90", 24, true, "Lighting"),
        ("Floor Lamp", "floor-lamp", "LMP-002", "129.00", 3, true, "Lighting"),
        ("Standing Desk", "standing-desk", "FRN-001", "549.00", 7, true, "Furniture"),
        ("Office Chair", "office-chair", "FRN-002", "289.50", 0, false, "Furniture"),
        ("Cable Tray", "cable-tray", "ACC-001", "19.99", 120, true, "Accessories"),
    ];
    for (name, slug, sku, price, stock, published, category) in &products {
        diesel::sql_query(format!(
            "INSERT INTO catalog_products (name, slug, sku, price, stock, published, category_id) \
             SELECT '{name}', '{slug}', '{sku}', {price}, {stock}, {published}, id \
             FROM catalog_categories WHERE name = '{category}' \
             ON CONFLICT (sku) DO NOTHING"
        ))
        .execute(conn)
        .await?;
    }

    // ── 4. Variants (only for products without any) ──
    let variants: Vec<(&str, &str, &str, i32)> = vec![
        ("LMP-001", "Black", "LMP-001-BK", 12),
        ("LMP-001", "White", "LMP-001-WH", 12),
        ("FRN-001", "Oak top", "FRN-001-OK", 4),
        ("FRN-001", "Walnut top", "FRN-001-WN", 3),
    ];
    for (product_sku, name, sku, stock) in &variants {
        diesel::sql_query(format!(
            "INSERT INTO catalog_product_variants (product_id, name, sku, stock) \
             SELECT p.id, '{name}', '{sku}', {stock} FROM catalog_products p \
             WHERE p.sku = '{product_sku}' \
             AND NOT EXISTS (SELECT 1 FROM catalog_product_variants v WHERE v.sku = '{sku}')"
        ))
        .execute(conn)
        .await?;
    }

    // ── 5. Tag links ──
    let links: Vec<(&str, &str)> = vec![
        ("LMP-001", "bestseller"),
        ("LMP-002", "new"),
        ("FRN-001", "eco"),
        ("ACC-001", "sale"),
    ];
    for (sku, tag) in &links {
        diesel::sql_query(format!(
            "INSERT INTO catalog_product_tags (product_id, tag_id) \
             SELECT p.id, t.id FROM catalog_products p, catalog_tags t \
             WHERE p.sku = '{sku}' AND t.name = '{tag}' \
             ON CONFLICT DO NOTHING"
        ))
        .execute(conn)
        .await?;
    }

    tracing::info!(
        categories = categories.len(),
        tags = tags.len(),
        products = products.len(),
        "Catalog seed applied"
    );
    Ok(())
}
