//! Product catalog
//!
//! Read at purchase creation only; the price it returns is snapshotted into
//! the transaction.

use anyhow::{Context, bail};
use async_trait::async_trait;
use std::collections::HashMap;

use crate::config::CatalogConfig;
use crate::purchase::types::Rail;

/// Credits sold for a fixed fiat / crypto price
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditPackage {
    pub package_id: String,
    pub credits: i64,
    pub price_idr: Option<u128>,
    pub price_wei: Option<u128>,
}

impl CreditPackage {
    /// Price in the rail's currency; `None` if not sold on that rail
    pub fn price_for(&self, rail: Rail) -> Option<u128> {
        match rail {
            Rail::Qris => self.price_idr,
            Rail::Crypto => self.price_wei,
            Rail::Balance => None,
        }
    }
}

/// Decoration / badge sold in the shop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogItem {
    pub item_ref: String,
    pub name: String,
    pub price_credits: Option<u128>,
    pub price_idr: Option<u128>,
    pub price_wei: Option<u128>,
}

impl CatalogItem {
    pub fn price_for(&self, rail: Rail) -> Option<u128> {
        match rail {
            Rail::Qris => self.price_idr,
            Rail::Crypto => self.price_wei,
            Rail::Balance => self.price_credits,
        }
    }
}

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn credit_package(&self, package_id: &str) -> Option<CreditPackage>;
    async fn item(&self, item_ref: &str) -> Option<CatalogItem>;
}

/// Catalog loaded once from `AppConfig::catalog`
#[derive(Debug, Default)]
pub struct StaticCatalog {
    packages: HashMap<String, CreditPackage>,
    items: HashMap<String, CatalogItem>,
}

fn parse_wei(raw: &Option<String>, what: &str) -> anyhow::Result<Option<u128>> {
    match raw {
        Some(s) => {
            let wei: u128 = s
                .trim()
                .parse()
                .with_context(|| format!("{}: invalid wei amount '{}'", what, s))?;
            Ok(Some(wei))
        }
        None => Ok(None),
    }
}

fn positive(price: Option<u128>, what: &str) -> anyhow::Result<Option<u128>> {
    if price == Some(0) {
        bail!("{}: price must be greater than zero", what);
    }
    Ok(price)
}

impl StaticCatalog {
    pub fn from_config(config: &CatalogConfig) -> anyhow::Result<Self> {
        let mut packages = HashMap::new();
        for p in &config.credit_packages {
            let what = format!("credit package {}", p.package_id);
            if p.credits <= 0 {
                bail!("{}: credits must be greater than zero", what);
            }
            let package = CreditPackage {
                package_id: p.package_id.clone(),
                credits: p.credits,
                price_idr: positive(p.price_idr.map(u128::from), &what)?,
                price_wei: positive(parse_wei(&p.price_wei, &what)?, &what)?,
            };
            if packages.insert(p.package_id.clone(), package).is_some() {
                bail!("{}: duplicate package id", what);
            }
        }

        let mut items = HashMap::new();
        for i in &config.items {
            let what = format!("item {}", i.item_ref);
            let price_credits = match i.price_credits {
                Some(c) if c <= 0 => bail!("{}: price must be greater than zero", what),
                Some(c) => Some(c as u128),
                None => None,
            };
            let item = CatalogItem {
                item_ref: i.item_ref.clone(),
                name: i.name.clone(),
                price_credits,
                price_idr: positive(i.price_idr.map(u128::from), &what)?,
                price_wei: positive(parse_wei(&i.price_wei, &what)?, &what)?,
            };
            if items.insert(i.item_ref.clone(), item).is_some() {
                bail!("{}: duplicate item ref", what);
            }
        }

        tracing::info!(
            packages = packages.len(),
            items = items.len(),
            "Catalog loaded"
        );
        Ok(Self { packages, items })
    }
}

#[async_trait]
impl Catalog for StaticCatalog {
    async fn credit_package(&self, package_id: &str) -> Option<CreditPackage> {
        self.packages.get(package_id).cloned()
    }

    async fn item(&self, item_ref: &str) -> Option<CatalogItem> {
        self.items.get(item_ref).cloned()
    }
}
