//! In-process store. Used when no database is configured and by the tests.
//!
//! All tables sit behind one async mutex. A transaction works on a copy of
//! the tables and swaps it in only when the closure succeeds, so a failed
//! operation leaves no partial writes behind.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::{BasketItem, NewAccount, NewReview, OrderLine, OrderView, ProductDetail, ProfileUpdate, Store};
use crate::domain::aggregates::{
    Account, Basket, BasketLine, CardDetails, Category, LineChange, Order, OrderDetails, OrderError, Payment, Product,
    Profile, Review, Sale, Tag,
};
use crate::domain::catalog::{CatalogPage, CatalogQuery};
use crate::{Result, ShopError};

#[derive(Clone, Default)]
struct Tables {
    last_id: i64,
    categories: BTreeMap<i64, Category>,
    tags: BTreeMap<i64, Tag>,
    products: BTreeMap<i64, Product>,
    reviews: BTreeMap<i64, Review>,
    baskets: HashMap<Uuid, Basket>,
    orders: BTreeMap<i64, Order>,
    payments: BTreeMap<i64, Payment>,
    sales: BTreeMap<i64, Sale>,
    accounts: BTreeMap<i64, Account>,
    profiles: BTreeMap<i64, Profile>,
}

impl Tables {
    fn next_id(&mut self) -> i64 { self.last_id += 1; self.last_id }

    /// Catalog rows only. Snapshots are invisible to stock operations.
    fn stock_product(products: &mut BTreeMap<i64, Product>, id: i64) -> Result<&mut Product> {
        products.get_mut(&id).filter(|p| !p.sale).ok_or(ShopError::ProductNotFound(id))
    }

    fn order_view(&self, order: &Order) -> OrderView {
        let snapshots = order.products.iter().filter_map(|id| self.products.get(id).cloned()).collect();
        OrderView { order: order.clone(), snapshots }
    }

    fn ensure_unique_contact(&self, account: i64, update: &ProfileUpdate) -> Result<()> {
        for other in self.profiles.values().filter(|p| p.account != account) {
            if update.email.is_some() && other.email == update.email {
                return Err(ShopError::Conflict("email is already in use".into()));
            }
            if update.phone.is_some() && other.phone == update.phone {
                return Err(ShopError::Conflict("phone is already in use".into()));
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    async fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Tables) -> Result<T> + Send,
    {
        let tables = self.tables.lock().await;
        f(&tables)
    }

    async fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Tables) -> Result<T> + Send,
    {
        let mut tables = self.tables.lock().await;
        let mut tx = tables.clone();
        let out = f(&mut tx)?;
        *tables = tx;
        Ok(out)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn categories(&self) -> Result<Vec<Category>> {
        self.read(|t| Ok(t.categories.values().cloned().collect())).await
    }

    async fn tags(&self, category: i64) -> Result<Vec<Tag>> {
        self.read(|t| Ok(t.tags.values().filter(|tag| tag.category == category).cloned().collect())).await
    }

    async fn catalog(&self, query: &CatalogQuery) -> Result<CatalogPage> {
        self.read(|t| Ok(query.apply(t.products.values().cloned()))).await
    }

    async fn limited_products(&self, limit: usize) -> Result<Vec<Product>> {
        self.read(|t| {
            let mut limited: Vec<Product> = t.products.values().filter(|p| p.limited && !p.sale).cloned().collect();
            limited.sort_by(|a, b| a.price.cmp(&b.price).then(a.id.cmp(&b.id)));
            limited.truncate(limit);
            Ok(limited)
        })
        .await
    }

    async fn product_detail(&self, id: i64) -> Result<ProductDetail> {
        self.read(|t| {
            let product = t.products.get(&id).cloned().ok_or(ShopError::ProductNotFound(id))?;
            let reviews = t.reviews.values().filter(|r| r.product == id).cloned().collect();
            let tag_details = product.tags.iter().filter_map(|tag| t.tags.get(tag).cloned()).collect();
            Ok(ProductDetail { product, reviews, tag_details })
        })
        .await
    }

    async fn add_review(&self, product: i64, review: NewReview) -> Result<(Vec<Review>, f32)> {
        self.transaction(|t| {
            Tables::stock_product(&mut t.products, product)?;
            let id = t.next_id();
            t.reviews.insert(id, Review {
                id, product, author: review.author, email: review.email, text: review.text, rate: review.rate, date: Utc::now(),
            });
            let reviews: Vec<Review> = t.reviews.values().filter(|r| r.product == product).cloned().collect();
            let rates: Vec<u8> = reviews.iter().map(|r| r.rate).collect();
            let row = Tables::stock_product(&mut t.products, product)?;
            row.apply_rating(&rates);
            Ok((reviews, row.rating))
        })
        .await
    }

    async fn active_sales(&self, now: DateTime<Utc>) -> Result<Vec<Sale>> {
        self.read(|t| Ok(t.sales.values().filter(|s| s.is_active(now)).cloned().collect())).await
    }

    async fn basket(&self, session: Uuid) -> Result<Vec<BasketItem>> {
        self.read(|t| {
            let Some(basket) = t.baskets.get(&session) else { return Ok(vec![]) };
            basket
                .lines()
                .iter()
                .map(|line| {
                    let product = t.products.get(&line.product).cloned().ok_or(ShopError::ProductNotFound(line.product))?;
                    Ok(BasketItem { line: line.clone(), product })
                })
                .collect()
        })
        .await
    }

    async fn reserve(&self, session: Uuid, product: i64, qty: u32) -> Result<BasketLine> {
        self.transaction(|t| {
            let row = Tables::stock_product(&mut t.products, product)?;
            let basket = t.baskets.entry(session).or_insert_with(|| Basket::new(session));
            match basket.reserve(row, qty)? {
                LineChange::Upsert(line) => {
                    debug!(%session, product, qty, reserved = line.count.value(), "reserved stock");
                    Ok(line)
                }
                LineChange::Remove { .. } => Err(ShopError::Storage("reserve removed a basket line".into())),
            }
        })
        .await
    }

    async fn release(&self, session: Uuid, product: i64, qty: u32) -> Result<Option<BasketLine>> {
        self.transaction(|t| {
            let row = Tables::stock_product(&mut t.products, product)?;
            let basket = t.baskets.get_mut(&session).ok_or(ShopError::NotInBasket(product))?;
            let change = basket.release(row, qty)?;
            if basket.is_empty() {
                t.baskets.remove(&session);
            }
            debug!(%session, product, qty, "released stock");
            Ok(match change {
                LineChange::Upsert(line) => Some(line),
                LineChange::Remove { .. } => None,
            })
        })
        .await
    }

    async fn move_basket(&self, from: Uuid, to: Uuid) -> Result<()> {
        self.transaction(|t| {
            if t.baskets.contains_key(&to) {
                return Err(ShopError::Conflict(format!("session {to} already holds a basket")));
            }
            if let Some(basket) = t.baskets.remove(&from) {
                t.baskets.insert(to, basket.hand_over(to));
            }
            Ok(())
        })
        .await
    }

    async fn clear_basket(&self, session: Uuid) -> Result<u32> {
        self.transaction(|t| {
            let Some(mut basket) = t.baskets.remove(&session) else { return Ok(0) };
            let mut released = 0;
            for line in basket.lines().to_vec() {
                let row = Tables::stock_product(&mut t.products, line.product)?;
                basket.release(row, line.count.value())?;
                released += line.count.value();
            }
            debug!(%session, released, "basket cleared");
            Ok(released)
        })
        .await
    }

    async fn basket_sessions(&self) -> Result<Vec<Uuid>> {
        self.read(|t| Ok(t.baskets.keys().copied().collect())).await
    }

    async fn place_order(&self, session: Uuid, lines: &[OrderLine]) -> Result<Order> {
        self.transaction(|t| {
            if lines.is_empty() { return Err(OrderError::Empty.into()); }
            let mut order = Order::open();
            order.id = t.next_id();
            let mut basket = t.baskets.remove(&session).unwrap_or_else(|| Basket::new(session));
            for line in lines {
                if line.count == 0 { return Err(ShopError::InvalidQuantity); }
                let row = Tables::stock_product(&mut t.products, line.product)?;
                let (covered, _) = basket.consume(line.product, line.count);
                row.take_stock(line.count - covered)?;
                let mut snapshot = row.snapshot(line.count);
                snapshot.id = t.next_id();
                order.add_snapshot(&snapshot);
                t.products.insert(snapshot.id, snapshot);
            }
            if !basket.is_empty() {
                t.baskets.insert(session, basket);
            }
            t.orders.insert(order.id, order.clone());
            Ok(order)
        })
        .await
    }

    async fn orders(&self) -> Result<Vec<OrderView>> {
        self.read(|t| Ok(t.orders.values().map(|o| t.order_view(o)).collect())).await
    }

    async fn order(&self, id: i64) -> Result<OrderView> {
        self.read(|t| t.orders.get(&id).map(|o| t.order_view(o)).ok_or(ShopError::OrderNotFound(id))).await
    }

    async fn confirm_order(&self, id: i64, details: OrderDetails) -> Result<Order> {
        self.transaction(|t| {
            let order = t.orders.get_mut(&id).ok_or(ShopError::OrderNotFound(id))?;
            order.confirm(details)?;
            Ok(order.clone())
        })
        .await
    }

    async fn record_payment(&self, order: i64, card: &CardDetails) -> Result<Payment> {
        self.transaction(|t| {
            if t.payments.values().any(|p| p.order == order) {
                return Err(OrderError::AlreadyPaid(order).into());
            }
            t.orders.get_mut(&order).ok_or(ShopError::OrderNotFound(order))?.mark_paid()?;
            let mut payment = Payment::record(order, card);
            payment.id = t.next_id();
            t.payments.insert(payment.id, payment.clone());
            Ok(payment)
        })
        .await
    }

    async fn create_account(&self, account: NewAccount) -> Result<Account> {
        self.transaction(|t| {
            if t.accounts.values().any(|a| a.username == account.username) {
                return Err(ShopError::Conflict(format!("username {:?} is taken", account.username)));
            }
            let account = Account {
                id: t.next_id(), username: account.username, first_name: account.first_name, password_hash: account.password_hash,
            };
            t.profiles.insert(account.id, Profile::for_account(&account));
            t.accounts.insert(account.id, account.clone());
            Ok(account)
        })
        .await
    }

    async fn account_by_username(&self, username: &str) -> Result<Option<Account>> {
        self.read(|t| Ok(t.accounts.values().find(|a| a.username == username).cloned())).await
    }

    async fn account(&self, id: i64) -> Result<Account> {
        self.read(|t| t.accounts.get(&id).cloned().ok_or(ShopError::AccountNotFound)).await
    }

    async fn set_password(&self, id: i64, password_hash: String) -> Result<()> {
        self.transaction(|t| {
            t.accounts.get_mut(&id).ok_or(ShopError::AccountNotFound)?.password_hash = password_hash;
            Ok(())
        })
        .await
    }

    async fn profile(&self, account: i64) -> Result<Profile> {
        self.read(|t| t.profiles.get(&account).cloned().ok_or(ShopError::AccountNotFound)).await
    }

    async fn update_profile(&self, account: i64, update: ProfileUpdate) -> Result<Profile> {
        self.transaction(|t| {
            t.ensure_unique_contact(account, &update)?;
            let profile = t.profiles.get_mut(&account).ok_or(ShopError::AccountNotFound)?;
            profile.full_name = update.full_name;
            profile.email = update.email;
            profile.phone = update.phone;
            Ok(profile.clone())
        })
        .await
    }

    async fn insert_category(&self, mut category: Category) -> Result<Category> {
        self.transaction(|t| {
            category.id = t.next_id();
            t.categories.insert(category.id, category.clone());
            Ok(category)
        })
        .await
    }

    async fn insert_tag(&self, mut tag: Tag) -> Result<Tag> {
        self.transaction(|t| {
            if !t.categories.contains_key(&tag.category) {
                return Err(ShopError::Validation(format!("category {} does not exist", tag.category)));
            }
            tag.id = t.next_id();
            t.tags.insert(tag.id, tag.clone());
            Ok(tag)
        })
        .await
    }

    async fn insert_product(&self, mut product: Product) -> Result<Product> {
        self.transaction(|t| {
            if !t.categories.contains_key(&product.category) {
                return Err(ShopError::Validation(format!("category {} does not exist", product.category)));
            }
            product.id = t.next_id();
            t.products.insert(product.id, product.clone());
            Ok(product)
        })
        .await
    }

    async fn update_product(&self, product: Product) -> Result<Product> {
        self.transaction(|t| {
            let row = Tables::stock_product(&mut t.products, product.id)?;
            *row = product.clone();
            Ok(product)
        })
        .await
    }

    async fn insert_sale(&self, mut sale: Sale) -> Result<Sale> {
        self.transaction(|t| {
            sale.id = t.next_id();
            t.sales.insert(sale.id, sale.clone());
            Ok(sale)
        })
        .await
    }
}
