//! PostgreSQL store.
//!
//! Stock-moving transactions take `FOR UPDATE` locks on the product rows
//! they read, so two sessions reserving the same product serialize on the
//! row instead of both reading a stale `count`.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use sqlx::FromRow;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::{BasketItem, NewAccount, NewReview, OrderLine, OrderView, ProductDetail, ProfileUpdate, Store};
use crate::domain::aggregates::{
    Account, Basket, BasketLine, CardDetails, Category, Image, LineChange, Order, OrderDetails, OrderError, OrderStatus,
    Payment, Product, Profile, Review, Sale, Specification, Tag,
};
use crate::domain::catalog::{CatalogPage, CatalogQuery, SortType};
use crate::domain::value_objects::{Money, Quantity};
use crate::{Result, ShopError};

const PRODUCT_COLUMNS: &str =
    "id, category_id, price, count, date, title, description, full_description, free_delivery, rating, limited, sale";
const ORDER_COLUMNS: &str =
    "id, created_at, full_name, email, phone, delivery_type, payment_type, total_cost, status, city, address";
const CATALOG_WHERE: &str = "sale = FALSE \
    AND ($1::TEXT IS NULL OR title ILIKE '%' || $1 || '%') \
    AND price >= $2 AND price <= $3 \
    AND (NOT $4 OR free_delivery) \
    AND (NOT $5 OR count > 0) \
    AND ($6::BIGINT IS NULL OR category_id = $6)";

/// Constraint violations the caller can act on. Unique violations are
/// conflicts; foreign-key violations mean a referenced row does not exist.
fn constraint_error(code: Option<&str>, message: &str) -> Option<ShopError> {
    match code? {
        "23505" => Some(ShopError::Conflict(message.to_string())),
        "23503" => Some(ShopError::Validation(message.to_string())),
        _ => None,
    }
}

impl From<sqlx::Error> for ShopError {
    fn from(e: sqlx::Error) -> Self {
        if let Some(db) = e.as_database_error() {
            if let Some(err) = constraint_error(db.code().as_deref(), db.message()) {
                return err;
            }
        }
        ShopError::Storage(e.to_string())
    }
}

/// `OFFSET`/`LIMIT` for the catalog window.
fn sql_window(query: &CatalogQuery) -> Result<(i64, i64)> {
    let (start, end) = query.window();
    let out_of_range = |_| ShopError::Validation("currentPage is out of range".into());
    Ok((i64::try_from(start).map_err(out_of_range)?, i64::try_from(end - start).map_err(out_of_range)?))
}

fn storage(what: impl std::fmt::Display) -> ShopError { ShopError::Storage(what.to_string()) }

fn to_db_count(count: Quantity) -> Result<i32> { i32::try_from(count.value()).map_err(storage) }

// =============================================================================
// Rows
// =============================================================================

#[derive(FromRow)]
struct ProductRow {
    id: i64,
    category_id: i64,
    price: Decimal,
    count: i32,
    date: DateTime<Utc>,
    title: String,
    description: Option<String>,
    full_description: Option<String>,
    free_delivery: bool,
    rating: f32,
    limited: bool,
    sale: bool,
}

impl TryFrom<ProductRow> for Product {
    type Error = ShopError;
    fn try_from(r: ProductRow) -> Result<Self> {
        Ok(Product {
            id: r.id, category: r.category_id, price: Money::new(r.price), count: Quantity::new(u32::try_from(r.count).map_err(storage)?),
            date: r.date, title: r.title, description: r.description, full_description: r.full_description,
            free_delivery: r.free_delivery, rating: r.rating, limited: r.limited, sale: r.sale,
            tags: vec![], images: vec![], specifications: vec![],
        })
    }
}

#[derive(FromRow)]
struct OrderRow {
    id: i64,
    created_at: DateTime<Utc>,
    full_name: String,
    email: String,
    phone: String,
    delivery_type: Option<String>,
    payment_type: Option<String>,
    total_cost: Decimal,
    status: String,
    city: String,
    address: String,
}

impl TryFrom<OrderRow> for Order {
    type Error = ShopError;
    fn try_from(r: OrderRow) -> Result<Self> {
        Ok(Order {
            id: r.id, created_at: r.created_at, full_name: r.full_name, email: r.email, phone: r.phone,
            delivery_type: r.delivery_type.map(|d| d.parse()).transpose().map_err(storage)?,
            payment_type: r.payment_type.map(|p| p.parse()).transpose().map_err(storage)?,
            total_cost: Money::new(r.total_cost), status: r.status.parse().map_err(storage)?,
            city: r.city, address: r.address, products: vec![],
        })
    }
}

#[derive(FromRow)]
struct ReviewRow { id: i64, product_id: i64, author: String, email: String, text: String, rate: i16, date: DateTime<Utc> }

impl TryFrom<ReviewRow> for Review {
    type Error = ShopError;
    fn try_from(r: ReviewRow) -> Result<Self> {
        Ok(Review { id: r.id, product: r.product_id, author: r.author, email: r.email, text: r.text, rate: u8::try_from(r.rate).map_err(storage)?, date: r.date })
    }
}

#[derive(FromRow)]
struct ProfileRow { account_id: i64, full_name: String, email: Option<String>, phone: Option<String>, avatar_src: Option<String>, avatar_alt: Option<String> }

impl From<ProfileRow> for Profile {
    fn from(r: ProfileRow) -> Self {
        let avatar = r.avatar_src.map(|src| Image { src, alt: r.avatar_alt.unwrap_or_default() });
        Profile { account: r.account_id, full_name: r.full_name, email: r.email, phone: r.phone, avatar }
    }
}

#[derive(FromRow)]
struct AccountRow { id: i64, username: String, first_name: String, password_hash: String }

impl From<AccountRow> for Account {
    fn from(r: AccountRow) -> Self { Account { id: r.id, username: r.username, first_name: r.first_name, password_hash: r.password_hash } }
}

// =============================================================================
// Store
// =============================================================================

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }

    /// Connects and brings the schema up to date.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new().max_connections(max_connections).connect(url).await?;
        sqlx::migrate!("./migrations").run(&pool).await.map_err(storage)?;
        info!(max_connections, "database ready");
        Ok(Self::new(pool))
    }
}

/// Fills in tags, images and specifications for a batch of product rows.
async fn hydrate(conn: &mut PgConnection, rows: Vec<ProductRow>) -> Result<Vec<Product>> {
    let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
    let tags: Vec<(i64, i64)> = sqlx::query_as("SELECT product_id, tag_id FROM product_tags WHERE product_id = ANY($1) ORDER BY tag_id")
        .bind(ids.as_slice()).fetch_all(&mut *conn).await?;
    let images: Vec<(i64, String, String)> = sqlx::query_as("SELECT product_id, src, alt FROM product_images WHERE product_id = ANY($1) ORDER BY id")
        .bind(ids.as_slice()).fetch_all(&mut *conn).await?;
    let specs: Vec<(i64, String, String)> = sqlx::query_as("SELECT product_id, name, value FROM specifications WHERE product_id = ANY($1) ORDER BY id")
        .bind(ids.as_slice()).fetch_all(&mut *conn).await?;

    let mut products = rows.into_iter().map(Product::try_from).collect::<Result<Vec<_>>>()?;
    for p in &mut products {
        p.tags = tags.iter().filter(|(pid, _)| *pid == p.id).map(|(_, t)| *t).collect();
        p.images = images.iter().filter(|(pid, ..)| *pid == p.id).map(|(_, src, alt)| Image { src: src.clone(), alt: alt.clone() }).collect();
        p.specifications = specs.iter().filter(|(pid, ..)| *pid == p.id).map(|(_, name, value)| Specification { name: name.clone(), value: value.clone() }).collect();
    }
    Ok(products)
}

async fn load_products(conn: &mut PgConnection, ids: &[i64]) -> Result<HashMap<i64, Product>> {
    let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ANY($1)");
    let rows = sqlx::query_as::<_, ProductRow>(&sql).bind(ids).fetch_all(&mut *conn).await?;
    Ok(hydrate(conn, rows).await?.into_iter().map(|p| (p.id, p)).collect())
}

/// Locks a catalog row for the rest of the transaction.
async fn lock_product(conn: &mut PgConnection, id: i64) -> Result<Product> {
    let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1 AND sale = FALSE FOR UPDATE");
    let row = sqlx::query_as::<_, ProductRow>(&sql).bind(id).fetch_optional(&mut *conn).await?
        .ok_or(ShopError::ProductNotFound(id))?;
    hydrate(conn, vec![row]).await?.pop().ok_or(ShopError::ProductNotFound(id))
}

async fn write_count(conn: &mut PgConnection, product: &Product) -> Result<()> {
    sqlx::query("UPDATE products SET count = $2 WHERE id = $1")
        .bind(product.id).bind(to_db_count(product.count)?).execute(&mut *conn).await?;
    Ok(())
}

async fn insert_product_row(conn: &mut PgConnection, p: &Product) -> Result<i64> {
    let (id,): (i64,) = sqlx::query_as(
        "INSERT INTO products (category_id, price, count, date, title, description, full_description, free_delivery, rating, limited, sale) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) RETURNING id")
        .bind(p.category).bind(p.price.amount()).bind(to_db_count(p.count)?).bind(p.date).bind(&p.title)
        .bind(&p.description).bind(&p.full_description).bind(p.free_delivery).bind(p.rating).bind(p.limited).bind(p.sale)
        .fetch_one(&mut *conn).await?;
    write_relations(conn, id, p).await?;
    Ok(id)
}

async fn write_relations(conn: &mut PgConnection, id: i64, p: &Product) -> Result<()> {
    for tag in &p.tags {
        sqlx::query("INSERT INTO product_tags (product_id, tag_id) VALUES ($1, $2) ON CONFLICT DO NOTHING")
            .bind(id).bind(tag).execute(&mut *conn).await?;
    }
    for image in &p.images {
        sqlx::query("INSERT INTO product_images (product_id, src, alt) VALUES ($1, $2, $3)")
            .bind(id).bind(&image.src).bind(&image.alt).execute(&mut *conn).await?;
    }
    for spec in &p.specifications {
        sqlx::query("INSERT INTO specifications (product_id, name, value) VALUES ($1, $2, $3)")
            .bind(id).bind(&spec.name).bind(&spec.value).execute(&mut *conn).await?;
    }
    Ok(())
}

async fn load_basket(conn: &mut PgConnection, session: Uuid, lock: bool) -> Result<Basket> {
    let sql = format!(
        "SELECT product_id, count FROM basket_lines WHERE session_id = $1 ORDER BY product_id{}",
        if lock { " FOR UPDATE" } else { "" }
    );
    let rows: Vec<(i64, i32)> = sqlx::query_as(&sql).bind(session).fetch_all(&mut *conn).await?;
    let lines = rows
        .into_iter()
        .map(|(product, count)| Ok(BasketLine { session, product, count: Quantity::new(u32::try_from(count).map_err(storage)?) }))
        .collect::<Result<Vec<_>>>()?;
    Ok(Basket::from_lines(session, lines))
}

async fn apply_change(conn: &mut PgConnection, change: &LineChange) -> Result<()> {
    match change {
        LineChange::Upsert(line) => {
            sqlx::query("INSERT INTO basket_lines (session_id, product_id, count) VALUES ($1, $2, $3) \
                         ON CONFLICT (session_id, product_id) DO UPDATE SET count = EXCLUDED.count")
                .bind(line.session).bind(line.product).bind(to_db_count(line.count)?).execute(&mut *conn).await?;
        }
        LineChange::Remove { session, product } => {
            sqlx::query("DELETE FROM basket_lines WHERE session_id = $1 AND product_id = $2")
                .bind(session).bind(product).execute(&mut *conn).await?;
        }
    }
    Ok(())
}

async fn load_order(conn: &mut PgConnection, id: i64, lock: bool) -> Result<Order> {
    let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1{}", if lock { " FOR UPDATE" } else { "" });
    let row = sqlx::query_as::<_, OrderRow>(&sql).bind(id).fetch_optional(&mut *conn).await?.ok_or(ShopError::OrderNotFound(id))?;
    let mut order = Order::try_from(row)?;
    let links: Vec<(i64,)> = sqlx::query_as("SELECT product_id FROM order_products WHERE order_id = $1 ORDER BY position")
        .bind(id).fetch_all(&mut *conn).await?;
    order.products = links.into_iter().map(|(p,)| p).collect();
    Ok(order)
}

async fn order_views(conn: &mut PgConnection, rows: Vec<OrderRow>) -> Result<Vec<OrderView>> {
    let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
    let links: Vec<(i64, i64)> = sqlx::query_as("SELECT order_id, product_id FROM order_products WHERE order_id = ANY($1) ORDER BY order_id, position")
        .bind(ids.as_slice()).fetch_all(&mut *conn).await?;
    let product_ids: Vec<i64> = links.iter().map(|(_, p)| *p).collect();
    let products = load_products(conn, &product_ids).await?;
    rows.into_iter()
        .map(|row| {
            let mut order = Order::try_from(row)?;
            order.products = links.iter().filter(|(o, _)| *o == order.id).map(|(_, p)| *p).collect();
            let snapshots = order.products.iter().filter_map(|id| products.get(id).cloned()).collect();
            Ok(OrderView { order, snapshots })
        })
        .collect()
}

async fn sale_images(conn: &mut PgConnection, ids: &[i64]) -> Result<Vec<(i64, String, String)>> {
    Ok(sqlx::query_as("SELECT sale_id, src, alt FROM sale_images WHERE sale_id = ANY($1) ORDER BY id")
        .bind(ids).fetch_all(&mut *conn).await?)
}

#[async_trait]
impl Store for PgStore {
    async fn categories(&self) -> Result<Vec<Category>> {
        let mut conn = self.pool.acquire().await?;
        let rows: Vec<(i64, String, Option<String>, Option<String>)> =
            sqlx::query_as("SELECT id, title, image_src, image_alt FROM categories ORDER BY id").fetch_all(&mut *conn).await?;
        let subs: Vec<(i64, i64)> = sqlx::query_as("SELECT category_id, subcategory_id FROM category_subcategories ORDER BY subcategory_id")
            .fetch_all(&mut *conn).await?;
        Ok(rows
            .into_iter()
            .map(|(id, title, src, alt)| Category {
                id, title,
                image: src.map(|src| Image { src, alt: alt.unwrap_or_default() }),
                subcategories: subs.iter().filter(|(c, _)| *c == id).map(|(_, s)| *s).collect(),
            })
            .collect())
    }

    async fn tags(&self, category: i64) -> Result<Vec<Tag>> {
        let rows: Vec<(i64, i64, String)> = sqlx::query_as("SELECT id, category_id, name FROM tags WHERE category_id = $1 ORDER BY id")
            .bind(category).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|(id, category, name)| Tag { id, category, name }).collect())
    }

    #[instrument(skip(self))]
    async fn catalog(&self, query: &CatalogQuery) -> Result<CatalogPage> {
        let f = &query.filter;
        let name = f.name.as_ref().map(|n| n.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_"));
        let (offset, limit) = sql_window(query)?;
        let order = match query.sort { SortType::Inc => "ASC", SortType::Dec => "DESC" };
        let mut conn = self.pool.acquire().await?;

        let (total,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM products WHERE {CATALOG_WHERE}"))
            .bind(&name).bind(f.min_price).bind(f.max_price).bind(f.free_delivery).bind(f.available).bind(f.category)
            .fetch_one(&mut *conn).await?;
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE {CATALOG_WHERE} ORDER BY price {order}, id OFFSET $7 LIMIT $8");
        let rows = sqlx::query_as::<_, ProductRow>(&sql)
            .bind(&name).bind(f.min_price).bind(f.max_price).bind(f.free_delivery).bind(f.available).bind(f.category)
            .bind(offset).bind(limit)
            .fetch_all(&mut *conn).await?;
        let items = hydrate(&mut conn, rows).await?;
        debug!(total, returned = items.len(), "catalog page");
        Ok(CatalogPage { items, current_page: query.page, last_page: query.last_page(total as usize) })
    }

    async fn limited_products(&self, limit: usize) -> Result<Vec<Product>> {
        let mut conn = self.pool.acquire().await?;
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE limited AND sale = FALSE ORDER BY price, id LIMIT $1");
        let rows = sqlx::query_as::<_, ProductRow>(&sql).bind(limit as i64).fetch_all(&mut *conn).await?;
        hydrate(&mut conn, rows).await
    }

    async fn product_detail(&self, id: i64) -> Result<ProductDetail> {
        let mut conn = self.pool.acquire().await?;
        let product = load_products(&mut conn, &[id]).await?.remove(&id).ok_or(ShopError::ProductNotFound(id))?;
        let reviews = sqlx::query_as::<_, ReviewRow>("SELECT id, product_id, author, email, text, rate, date FROM reviews WHERE product_id = $1 ORDER BY id")
            .bind(id).fetch_all(&mut *conn).await?
            .into_iter().map(Review::try_from).collect::<Result<Vec<_>>>()?;
        let tags: Vec<(i64, i64, String)> = sqlx::query_as("SELECT id, category_id, name FROM tags WHERE id = ANY($1) ORDER BY id")
            .bind(product.tags.as_slice()).fetch_all(&mut *conn).await?;
        let tag_details = tags.into_iter().map(|(id, category, name)| Tag { id, category, name }).collect();
        Ok(ProductDetail { product, reviews, tag_details })
    }

    #[instrument(skip(self, review), fields(rate = review.rate))]
    async fn add_review(&self, product: i64, review: NewReview) -> Result<(Vec<Review>, f32)> {
        let mut tx = self.pool.begin().await?;
        let mut row = lock_product(&mut tx, product).await?;
        sqlx::query("INSERT INTO reviews (product_id, author, email, text, rate, date) VALUES ($1, $2, $3, $4, $5, $6)")
            .bind(product).bind(&review.author).bind(&review.email).bind(&review.text).bind(i16::from(review.rate)).bind(Utc::now())
            .execute(&mut *tx).await?;
        let reviews = sqlx::query_as::<_, ReviewRow>("SELECT id, product_id, author, email, text, rate, date FROM reviews WHERE product_id = $1 ORDER BY id")
            .bind(product).fetch_all(&mut *tx).await?
            .into_iter().map(Review::try_from).collect::<Result<Vec<_>>>()?;
        let rates: Vec<u8> = reviews.iter().map(|r| r.rate).collect();
        row.apply_rating(&rates);
        sqlx::query("UPDATE products SET rating = $2 WHERE id = $1").bind(product).bind(row.rating).execute(&mut *tx).await?;
        tx.commit().await?;
        Ok((reviews, row.rating))
    }

    async fn active_sales(&self, now: DateTime<Utc>) -> Result<Vec<Sale>> {
        let mut conn = self.pool.acquire().await?;
        let rows: Vec<(i64, String, Decimal, Decimal, DateTime<Utc>, DateTime<Utc>)> = sqlx::query_as(
            "SELECT id, title, price, sale_price, date_from, date_to FROM sales WHERE date_from <= $1 AND date_to >= $1 ORDER BY id")
            .bind(now).fetch_all(&mut *conn).await?;
        let ids: Vec<i64> = rows.iter().map(|r| r.0).collect();
        let images = sale_images(&mut conn, &ids).await?;
        Ok(rows
            .into_iter()
            .map(|(id, title, price, sale_price, date_from, date_to)| Sale {
                id, title, price: Money::new(price), sale_price: Money::new(sale_price), date_from, date_to,
                images: images.iter().filter(|(s, ..)| *s == id).map(|(_, src, alt)| Image { src: src.clone(), alt: alt.clone() }).collect(),
            })
            .collect())
    }

    async fn basket(&self, session: Uuid) -> Result<Vec<BasketItem>> {
        let mut conn = self.pool.acquire().await?;
        let basket = load_basket(&mut conn, session, false).await?;
        let ids: Vec<i64> = basket.lines().iter().map(|l| l.product).collect();
        let mut products = load_products(&mut conn, &ids).await?;
        basket
            .lines()
            .iter()
            .map(|line| {
                let product = products.remove(&line.product).ok_or(ShopError::ProductNotFound(line.product))?;
                Ok(BasketItem { line: line.clone(), product })
            })
            .collect()
    }

    #[instrument(skip(self))]
    async fn reserve(&self, session: Uuid, product: i64, qty: u32) -> Result<BasketLine> {
        let mut tx = self.pool.begin().await?;
        let mut row = lock_product(&mut tx, product).await?;
        let mut basket = load_basket(&mut tx, session, true).await?;
        let change = basket.reserve(&mut row, qty)?;
        apply_change(&mut tx, &change).await?;
        write_count(&mut tx, &row).await?;
        tx.commit().await?;
        match change {
            LineChange::Upsert(line) => Ok(line),
            LineChange::Remove { .. } => Err(storage("reserve removed a basket line")),
        }
    }

    #[instrument(skip(self))]
    async fn release(&self, session: Uuid, product: i64, qty: u32) -> Result<Option<BasketLine>> {
        let mut tx = self.pool.begin().await?;
        let mut row = lock_product(&mut tx, product).await?;
        let mut basket = load_basket(&mut tx, session, true).await?;
        let change = basket.release(&mut row, qty)?;
        apply_change(&mut tx, &change).await?;
        write_count(&mut tx, &row).await?;
        tx.commit().await?;
        Ok(match change {
            LineChange::Upsert(line) => Some(line),
            LineChange::Remove { .. } => None,
        })
    }

    #[instrument(skip(self))]
    async fn move_basket(&self, from: Uuid, to: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        if !load_basket(&mut tx, to, true).await?.is_empty() {
            return Err(ShopError::Conflict(format!("session {to} already holds a basket")));
        }
        let moved = sqlx::query("UPDATE basket_lines SET session_id = $2 WHERE session_id = $1")
            .bind(from).bind(to).execute(&mut *tx).await?.rows_affected();
        tx.commit().await?;
        debug!(moved, "basket moved");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn clear_basket(&self, session: Uuid) -> Result<u32> {
        let mut tx = self.pool.begin().await?;
        // products first, in id order, like every other stock-moving transaction
        let ids: Vec<(i64,)> = sqlx::query_as("SELECT product_id FROM basket_lines WHERE session_id = $1 ORDER BY product_id")
            .bind(session).fetch_all(&mut *tx).await?;
        let ids: Vec<i64> = ids.into_iter().map(|(id,)| id).collect();
        sqlx::query("SELECT id FROM products WHERE id = ANY($1) ORDER BY id FOR UPDATE").bind(ids.as_slice()).execute(&mut *tx).await?;

        let mut basket = load_basket(&mut tx, session, true).await?;
        let mut released = 0;
        for line in basket.lines().to_vec() {
            let mut row = lock_product(&mut tx, line.product).await?;
            let change = basket.release(&mut row, line.count.value())?;
            apply_change(&mut tx, &change).await?;
            write_count(&mut tx, &row).await?;
            released += line.count.value();
        }
        tx.commit().await?;
        debug!(released, "basket cleared");
        Ok(released)
    }

    async fn basket_sessions(&self) -> Result<Vec<Uuid>> {
        let rows: Vec<(Uuid,)> = sqlx::query_as("SELECT DISTINCT session_id FROM basket_lines").fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    #[instrument(skip(self, lines), fields(line_count = lines.len()))]
    async fn place_order(&self, session: Uuid, lines: &[OrderLine]) -> Result<Order> {
        if lines.is_empty() { return Err(OrderError::Empty.into()); }
        if lines.iter().any(|l| l.count == 0) { return Err(ShopError::InvalidQuantity); }
        let mut tx = self.pool.begin().await?;

        // Lock every product up front in id order so concurrent checkouts cannot deadlock.
        let mut ids: Vec<i64> = lines.iter().map(|l| l.product).collect();
        ids.sort_unstable();
        ids.dedup();
        sqlx::query("SELECT id FROM products WHERE id = ANY($1) ORDER BY id FOR UPDATE").bind(ids.as_slice()).execute(&mut *tx).await?;

        let mut order = Order::open();
        let (id,): (i64,) = sqlx::query_as("INSERT INTO orders (created_at, status) VALUES ($1, $2) RETURNING id")
            .bind(order.created_at).bind(order.status.as_str()).fetch_one(&mut *tx).await?;
        order.id = id;

        let mut basket = load_basket(&mut tx, session, true).await?;
        for (position, line) in lines.iter().enumerate() {
            let mut row = lock_product(&mut tx, line.product).await?;
            let (covered, change) = basket.consume(line.product, line.count);
            if let Some(change) = change {
                apply_change(&mut tx, &change).await?;
            }
            row.take_stock(line.count - covered)?;
            write_count(&mut tx, &row).await?;

            let mut snapshot = row.snapshot(line.count);
            snapshot.id = insert_product_row(&mut tx, &snapshot).await?;
            order.add_snapshot(&snapshot);
            sqlx::query("INSERT INTO order_products (order_id, product_id, position) VALUES ($1, $2, $3)")
                .bind(order.id).bind(snapshot.id).bind(position as i32).execute(&mut *tx).await?;
        }
        sqlx::query("UPDATE orders SET total_cost = $2 WHERE id = $1")
            .bind(order.id).bind(order.total_cost.amount()).execute(&mut *tx).await?;
        tx.commit().await?;
        info!(order_id = order.id, total = %order.total_cost, "order placed");
        Ok(order)
    }

    async fn orders(&self) -> Result<Vec<OrderView>> {
        let mut conn = self.pool.acquire().await?;
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders ORDER BY id");
        let rows = sqlx::query_as::<_, OrderRow>(&sql).fetch_all(&mut *conn).await?;
        order_views(&mut conn, rows).await
    }

    async fn order(&self, id: i64) -> Result<OrderView> {
        let mut conn = self.pool.acquire().await?;
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1");
        let row = sqlx::query_as::<_, OrderRow>(&sql).bind(id).fetch_optional(&mut *conn).await?.ok_or(ShopError::OrderNotFound(id))?;
        order_views(&mut conn, vec![row]).await?.pop().ok_or(ShopError::OrderNotFound(id))
    }

    #[instrument(skip(self, details))]
    async fn confirm_order(&self, id: i64, details: OrderDetails) -> Result<Order> {
        let mut tx = self.pool.begin().await?;
        let mut order = load_order(&mut tx, id, true).await?;
        order.confirm(details)?;
        sqlx::query("UPDATE orders SET full_name = $2, email = $3, phone = $4, delivery_type = $5, payment_type = $6, city = $7, address = $8, status = $9 WHERE id = $1")
            .bind(id).bind(&order.full_name).bind(&order.email).bind(&order.phone)
            .bind(order.delivery_type.map(|d| d.as_str())).bind(order.payment_type.map(|p| p.as_str()))
            .bind(&order.city).bind(&order.address).bind(order.status.as_str())
            .execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(order)
    }

    #[instrument(skip(self, card))]
    async fn record_payment(&self, order: i64, card: &CardDetails) -> Result<Payment> {
        let mut tx = self.pool.begin().await?;
        let mut row = load_order(&mut tx, order, true).await?;
        let (exists,): (bool,) = sqlx::query_as("SELECT EXISTS (SELECT 1 FROM payments WHERE order_id = $1)")
            .bind(order).fetch_one(&mut *tx).await?;
        if exists { return Err(OrderError::AlreadyPaid(order).into()); }
        row.mark_paid()?;

        let mut payment = Payment::record(order, card);
        let (id,): (i64,) = sqlx::query_as("INSERT INTO payments (order_id, number, name, month, year) VALUES ($1, $2, $3, $4, $5) RETURNING id")
            .bind(order).bind(&payment.number).bind(&payment.name).bind(i16::from(payment.month))
            .bind(i16::try_from(payment.year).map_err(storage)?)
            .fetch_one(&mut *tx).await?;
        payment.id = id;
        sqlx::query("UPDATE orders SET status = $2 WHERE id = $1").bind(order).bind(OrderStatus::Paid.as_str()).execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(payment)
    }

    #[instrument(skip(self, account), fields(username = %account.username))]
    async fn create_account(&self, account: NewAccount) -> Result<Account> {
        let mut tx = self.pool.begin().await?;
        let (id,): (i64,) = sqlx::query_as("INSERT INTO accounts (username, first_name, password_hash) VALUES ($1, $2, $3) RETURNING id")
            .bind(&account.username).bind(&account.first_name).bind(&account.password_hash)
            .fetch_one(&mut *tx).await?;
        sqlx::query("INSERT INTO profiles (account_id, full_name) VALUES ($1, $2)")
            .bind(id).bind(&account.first_name).execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(Account { id, username: account.username, first_name: account.first_name, password_hash: account.password_hash })
    }

    async fn account_by_username(&self, username: &str) -> Result<Option<Account>> {
        let row = sqlx::query_as::<_, AccountRow>("SELECT id, username, first_name, password_hash FROM accounts WHERE username = $1")
            .bind(username).fetch_optional(&self.pool).await?;
        Ok(row.map(Account::from))
    }

    async fn account(&self, id: i64) -> Result<Account> {
        sqlx::query_as::<_, AccountRow>("SELECT id, username, first_name, password_hash FROM accounts WHERE id = $1")
            .bind(id).fetch_optional(&self.pool).await?.map(Account::from).ok_or(ShopError::AccountNotFound)
    }

    async fn set_password(&self, id: i64, password_hash: String) -> Result<()> {
        let done = sqlx::query("UPDATE accounts SET password_hash = $2 WHERE id = $1").bind(id).bind(password_hash).execute(&self.pool).await?;
        if done.rows_affected() == 0 { return Err(ShopError::AccountNotFound); }
        Ok(())
    }

    async fn profile(&self, account: i64) -> Result<Profile> {
        sqlx::query_as::<_, ProfileRow>("SELECT account_id, full_name, email, phone, avatar_src, avatar_alt FROM profiles WHERE account_id = $1")
            .bind(account).fetch_optional(&self.pool).await?.map(Profile::from).ok_or(ShopError::AccountNotFound)
    }

    async fn update_profile(&self, account: i64, update: ProfileUpdate) -> Result<Profile> {
        sqlx::query_as::<_, ProfileRow>(
            "UPDATE profiles SET full_name = $2, email = $3, phone = $4 WHERE account_id = $1 \
             RETURNING account_id, full_name, email, phone, avatar_src, avatar_alt")
            .bind(account).bind(&update.full_name).bind(&update.email).bind(&update.phone)
            .fetch_optional(&self.pool).await?.map(Profile::from).ok_or(ShopError::AccountNotFound)
    }

    async fn insert_category(&self, mut category: Category) -> Result<Category> {
        let mut tx = self.pool.begin().await?;
        let (id,): (i64,) = sqlx::query_as("INSERT INTO categories (title, image_src, image_alt) VALUES ($1, $2, $3) RETURNING id")
            .bind(&category.title).bind(category.image.as_ref().map(|i| &i.src)).bind(category.image.as_ref().map(|i| &i.alt))
            .fetch_one(&mut *tx).await?;
        for sub in &category.subcategories {
            sqlx::query("INSERT INTO category_subcategories (category_id, subcategory_id) VALUES ($1, $2)")
                .bind(id).bind(sub).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        category.id = id;
        Ok(category)
    }

    async fn insert_tag(&self, mut tag: Tag) -> Result<Tag> {
        let (id,): (i64,) = sqlx::query_as("INSERT INTO tags (category_id, name) VALUES ($1, $2) RETURNING id")
            .bind(tag.category).bind(&tag.name).fetch_one(&self.pool).await?;
        tag.id = id;
        Ok(tag)
    }

    async fn insert_product(&self, mut product: Product) -> Result<Product> {
        let mut tx = self.pool.begin().await?;
        product.id = insert_product_row(&mut tx, &product).await?;
        tx.commit().await?;
        Ok(product)
    }

    #[instrument(skip(self, product), fields(product_id = product.id))]
    async fn update_product(&self, product: Product) -> Result<Product> {
        let mut tx = self.pool.begin().await?;
        lock_product(&mut tx, product.id).await?;
        sqlx::query(
            "UPDATE products SET category_id = $2, price = $3, count = $4, title = $5, description = $6, full_description = $7, \
             free_delivery = $8, rating = $9, limited = $10 WHERE id = $1")
            .bind(product.id).bind(product.category).bind(product.price.amount()).bind(to_db_count(product.count)?)
            .bind(&product.title).bind(&product.description).bind(&product.full_description)
            .bind(product.free_delivery).bind(product.rating).bind(product.limited)
            .execute(&mut *tx).await?;
        for table in ["product_tags", "product_images", "specifications"] {
            sqlx::query(&format!("DELETE FROM {table} WHERE product_id = $1")).bind(product.id).execute(&mut *tx).await?;
        }
        write_relations(&mut tx, product.id, &product).await?;
        tx.commit().await?;
        Ok(product)
    }

    async fn insert_sale(&self, mut sale: Sale) -> Result<Sale> {
        let mut tx = self.pool.begin().await?;
        let (id,): (i64,) = sqlx::query_as("INSERT INTO sales (title, price, sale_price, date_from, date_to) VALUES ($1, $2, $3, $4, $5) RETURNING id")
            .bind(&sale.title).bind(sale.price.amount()).bind(sale.sale_price.amount()).bind(sale.date_from).bind(sale.date_to)
            .fetch_one(&mut *tx).await?;
        for image in &sale.images {
            sqlx::query("INSERT INTO sale_images (sale_id, src, alt) VALUES ($1, $2, $3)")
                .bind(id).bind(&image.src).bind(&image.alt).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        sale.id = id;
        Ok(sale)
    }
}
