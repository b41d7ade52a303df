use std::collections::HashMap;

use async_trait::async_trait;
use supplynet_types::{CompanyId, ProductId};

use crate::error::FulfillmentResult;

/// The external relationship/permission service, seen from the engine: which
/// suppliers a company may source a product from. The engine assumes the
/// permission check has already passed for anything it is asked to allocate.
#[async_trait]
pub trait SupplierDirectory: Send + Sync {
    async fn eligible_suppliers(
        &self,
        buyer: &CompanyId,
        product: &ProductId,
    ) -> FulfillmentResult<Vec<CompanyId>>;
}

#[derive(Clone, Debug)]
struct SupplierEntry {
    supplier: CompanyId,
    /// `None` means every product
    products: Option<Vec<ProductId>>,
}

/// In-process directory built from a fixed list of relationships.
#[derive(Clone, Debug, Default)]
pub struct StaticSupplierDirectory {
    relationships: HashMap<CompanyId, Vec<SupplierEntry>>,
}

impl StaticSupplierDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// `buyer` may source any product from `supplier`.
    pub fn with_supplier(mut self, buyer: CompanyId, supplier: CompanyId) -> Self {
        self.relationships
            .entry(buyer)
            .or_default()
            .push(SupplierEntry {
                supplier,
                products: None,
            });
        self
    }

    /// `buyer` may source only `products` from `supplier`.
    pub fn with_supplier_for(
        mut self,
        buyer: CompanyId,
        supplier: CompanyId,
        products: Vec<ProductId>,
    ) -> Self {
        self.relationships
            .entry(buyer)
            .or_default()
            .push(SupplierEntry {
                supplier,
                products: Some(products),
            });
        self
    }
}

#[async_trait]
impl SupplierDirectory for StaticSupplierDirectory {
    async fn eligible_suppliers(
        &self,
        buyer: &CompanyId,
        product: &ProductId,
    ) -> FulfillmentResult<Vec<CompanyId>> {
        let mut suppliers: Vec<CompanyId> = self
            .relationships
            .get(buyer)
            .into_iter()
            .flatten()
            .filter(|entry| {
                entry
                    .products
                    .as_ref()
                    .map_or(true, |products| products.contains(product))
            })
            .map(|entry| entry.supplier.clone())
            .collect();
        suppliers.sort();
        suppliers.dedup();
        Ok(suppliers)
    }
}
