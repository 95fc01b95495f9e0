//! Demo catalog for local runs (`SEED_DB=true`).

use chrono::{Duration, Utc};
use rand::{seq::SliceRandom, Rng};
use rust_decimal::Decimal;
use tracing::info;

use crate::domain::aggregates::{Category, Image, Product, Sale, Specification, Tag};
use crate::domain::value_objects::Money;
use crate::store::{NewReview, Store};
use crate::Result;

const CATEGORIES: usize = 9;
const TAGS_PER_CATEGORY: usize = 3;
const SALES: usize = 5;

fn image(kind: &str, i: usize) -> Image {
    Image { src: format!("/static/{kind}/{kind}{i}.png"), alt: format!("{kind}{i}") }
}

/// Products get a random price in 1000..=10000, stock in 10..=100 and a random tag of their category.
fn products(categories: &[Category], tags: &[Tag]) -> Vec<Product> {
    let mut rng = rand::thread_rng();
    categories
        .iter()
        .enumerate()
        .map(|(i, category)| {
            let i = i + 1;
            let price = Decimal::new(rng.gen_range(100_000..=1_000_000), 2);
            let mut p = Product::create(category.id, format!("product{i}"), Money::new(price)).with_stock(rng.gen_range(10..=100));
            p.description = Some(format!("description{i}"));
            p.full_description = Some(format!("fullDescription{i}"));
            p.free_delivery = rng.gen_bool(0.5);
            p.limited = rng.gen_bool(0.5);
            p.images = vec![image("products", i)];
            p.specifications = vec![
                Specification { name: "weight".into(), value: format!("{} g", rng.gen_range(100..=5000)) },
                Specification { name: "colour".into(), value: ["black", "white", "red"].choose(&mut rng).copied().unwrap_or("black").into() },
            ];
            let own: Vec<&Tag> = tags.iter().filter(|t| t.category == category.id).collect();
            p.tags = own.choose(&mut rng).map(|t| vec![t.id]).unwrap_or_default();
            p
        })
        .collect()
}

pub async fn seed(store: &dyn Store) -> Result<()> {
    let mut categories = Vec::with_capacity(CATEGORIES);
    for i in 1..=CATEGORIES {
        let category = Category { id: 0, title: format!("category{i}"), image: Some(image("categories", i)), subcategories: vec![] };
        categories.push(store.insert_category(category).await?);
    }

    let mut tags = Vec::new();
    for category in &categories {
        for n in 1..=TAGS_PER_CATEGORY {
            tags.push(store.insert_tag(Tag { id: 0, category: category.id, name: format!("tag{}-{n}", category.id) }).await?);
        }
    }

    let mut inserted = Vec::new();
    for product in products(&categories, &tags) {
        inserted.push(store.insert_product(product).await?);
    }

    for (n, product) in inserted.iter().enumerate().take(3) {
        let review = NewReview { author: format!("author{n}"), email: format!("author{n}@example.com"), text: "Works as described".into(), rate: 4 + (n % 2) as u8 };
        store.add_review(product.id, review).await?;
    }

    let now = Utc::now();
    for (i, product) in inserted.iter().enumerate().take(SALES) {
        let sale_price = Money::new(product.price.amount() * Decimal::new(8, 1));
        let sale = Sale {
            id: 0,
            title: product.title.clone(),
            price: product.price,
            sale_price,
            date_from: now - Duration::days(1),
            date_to: now + Duration::days(7 * (i as i64 + 1)),
            images: product.images.clone(),
        };
        store.insert_sale(sale).await?;
    }

    info!(categories = categories.len(), tags = tags.len(), products = inserted.len(), "catalog seeded");
    Ok(())
}
