//! Catalog, product and review endpoints

use std::str::FromStr;

use axum::{extract::{Path, Query, State}, Json};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::instrument;
use validator::Validate;

use super::AppState;
use crate::domain::aggregates::{Category, Image, Product, Review, Sale, Tag};
use crate::domain::catalog::{CatalogFilter, CatalogPage, CatalogQuery, SortType};
use crate::domain::events::{CatalogEvent, DomainEvent};
use crate::store::{NewReview, ProductDetail};
use crate::{Result, ShopError};

const LIMITED_PAGE: usize = 16;
const SALES_PAGE: u32 = 20;

#[derive(Debug, Serialize)]
pub struct CategoryView {
    pub id: i64,
    pub title: String,
    pub image: Option<Image>,
    pub subcategories: Vec<Category>,
}

pub async fn list_categories(State(s): State<AppState>) -> Result<Json<Vec<CategoryView>>> {
    let categories = s.store.categories().await?;
    let views = categories
        .iter()
        .map(|c| CategoryView {
            id: c.id,
            title: c.title.clone(),
            image: c.image.clone(),
            subcategories: c.subcategories.iter().filter_map(|id| categories.iter().find(|sub| sub.id == *id).cloned()).collect(),
        })
        .collect();
    Ok(Json(views))
}

#[derive(Debug, Default, Deserialize)]
pub struct CatalogParams {
    #[serde(rename = "filter[name]")] pub name: Option<String>,
    #[serde(rename = "filter[minPrice]")] pub min_price: Option<String>,
    #[serde(rename = "filter[maxPrice]")] pub max_price: Option<String>,
    #[serde(rename = "filter[freeDelivery]")] pub free_delivery: Option<bool>,
    #[serde(rename = "filter[available]")] pub available: Option<bool>,
    pub category: Option<i64>,
    #[serde(rename = "sortType")] pub sort_type: Option<String>,
    #[serde(rename = "currentPage")] pub current_page: Option<u32>,
    pub limit: Option<u32>,
}

fn price(raw: Option<&str>, key: &str, default: Decimal) -> Result<Decimal> {
    match raw.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(default),
        Some(v) => Decimal::from_str(v).map_err(|e| ShopError::Validation(format!("{key}: {e}"))),
    }
}

impl CatalogParams {
    pub fn into_query(self) -> Result<CatalogQuery> {
        let defaults = CatalogFilter::default();
        let filter = CatalogFilter {
            name: self.name.filter(|n| !n.trim().is_empty()),
            min_price: price(self.min_price.as_deref(), "minPrice", defaults.min_price)?,
            max_price: price(self.max_price.as_deref(), "maxPrice", defaults.max_price)?,
            free_delivery: self.free_delivery.unwrap_or(defaults.free_delivery),
            available: self.available.unwrap_or(defaults.available),
            category: self.category,
        };
        let (page, limit) = (self.current_page.unwrap_or(1), self.limit.unwrap_or(20));
        CatalogQuery::new(filter, SortType::parse(self.sort_type.as_deref()), page, limit)
            .ok_or_else(|| ShopError::Validation("currentPage and limit must be positive".into()))
    }
}

#[instrument(skip(s))]
pub async fn list_catalog(State(s): State<AppState>, Query(p): Query<CatalogParams>) -> Result<Json<CatalogPage>> {
    let query = p.into_query()?;
    Ok(Json(s.store.catalog(&query).await?))
}

pub async fn list_limited(State(s): State<AppState>) -> Result<Json<Vec<Product>>> {
    Ok(Json(s.store.limited_products(LIMITED_PAGE).await?))
}

#[derive(Debug, Deserialize)]
pub struct SalesParams { #[serde(rename = "currentPage")] pub current_page: Option<u32> }

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SalesPage { pub items: Vec<Sale>, pub current_page: u32, pub last_page: u32 }

pub async fn list_sales(State(s): State<AppState>, Query(p): Query<SalesParams>) -> Result<Json<SalesPage>> {
    let page = p.current_page.unwrap_or(1).max(1);
    let sales = s.store.active_sales(Utc::now()).await?;
    let last_page = sales.len().div_ceil(SALES_PAGE as usize) as u32;
    let offset = ((page - 1) as usize).saturating_mul(SALES_PAGE as usize);
    let items = sales.into_iter().skip(offset).take(SALES_PAGE as usize).collect();
    Ok(Json(SalesPage { items, current_page: page, last_page }))
}

#[derive(Debug, Deserialize)]
pub struct TagParams { pub category: Option<i64> }

pub async fn list_tags(State(s): State<AppState>, Query(p): Query<TagParams>) -> Result<Json<Vec<Tag>>> {
    let category = p.category.ok_or_else(|| ShopError::Validation("category is required".into()))?;
    Ok(Json(s.store.tags(category).await?))
}

pub async fn get_product(State(s): State<AppState>, Path(id): Path<i64>) -> Result<Json<ProductDetail>> {
    Ok(Json(s.store.product_detail(id).await?))
}

#[derive(Debug, Deserialize, Validate)]
pub struct ReviewRequest {
    #[validate(length(min = 1, max = 50))]
    pub author: String,
    #[validate(email, length(max = 50))]
    pub email: String,
    #[validate(length(min = 1, max = 500))]
    pub text: String,
    #[validate(range(min = 1, max = 5))]
    pub rate: u8,
}

#[instrument(skip(s, r), fields(rate = r.rate))]
pub async fn add_review(State(s): State<AppState>, Path(id): Path<i64>, Json(r): Json<ReviewRequest>) -> Result<Json<Vec<Review>>> {
    r.validate()?;
    let (reviews, rating) = s.store.add_review(id, NewReview { author: r.author, email: r.email, text: r.text, rate: r.rate }).await?;
    s.events.publish(DomainEvent::Catalog(CatalogEvent::Reviewed { product_id: id, rating })).await;
    Ok(Json(reviews))
}
