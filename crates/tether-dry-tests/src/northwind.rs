// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Northwind-style schema fixture.
//!
//! Relationships covered:
//! - `Customer.Orders` / `Order.Customer`: one-to-many, optional GUID fk,
//! - `Employee.Orders` / `Order.Employee`: one-to-many, optional int fk,
//! - `Order.OrderDetails` / `OrderDetail.Order`: one-to-many, fk inside a
//!   composite key,
//! - `OrderDetail.Product`: unidirectional scalar,
//! - `Region.Territories`: unidirectional collection, required fk on the
//!   child,
//! - `Order.Tags` / `Tag.Orders`: many-to-many.
//!
//! `Customer.Address` and `Order.ShipTo` are nested `Location` values;
//! `Customer.Aliases` is a primitive collection and `Employee.Addresses` a
//! nested value collection.

use std::sync::Arc;

use tether_core::{
    AutoGeneratedKeyType, CacheError, CacheOptions, ComplexTypeDef, DataPropertyDef, DataType,
    EntityManager, EntityTypeDef, NavigationDef, Schema, SchemaBuilder,
};

/// Namespace every entity type is declared in.
pub const NAMESPACE: &str = "Northwind";

/// The Northwind fixture schema.
pub fn northwind_schema() -> Result<Arc<Schema>, CacheError> {
    SchemaBuilder::new()
        .complex_type(
            ComplexTypeDef::new("Location")
                .namespace(NAMESPACE)
                .property(DataPropertyDef::new("Address", DataType::String).max_length(60))
                .property(DataPropertyDef::new("City", DataType::String).max_length(15))
                .property(DataPropertyDef::new("PostalCode", DataType::String)),
        )
        .entity_type(
            EntityTypeDef::new("Customer")
                .namespace(NAMESPACE)
                .key(DataPropertyDef::new("CustomerID", DataType::Guid))
                .property(
                    DataPropertyDef::new("CompanyName", DataType::String)
                        .nullable(false)
                        .max_length(40),
                )
                .property(DataPropertyDef::new("ContactName", DataType::String))
                .property(DataPropertyDef::complex("Address", "Location"))
                .property(DataPropertyDef::new("Aliases", DataType::String).collection())
                .navigation(
                    NavigationDef::collection("Orders", "Order").association("Customer_Orders"),
                )
                .auto_generated_key(AutoGeneratedKeyType::KeyGenerator),
        )
        .entity_type(
            EntityTypeDef::new("Employee")
                .namespace(NAMESPACE)
                .key(DataPropertyDef::new("EmployeeID", DataType::Int32))
                .property(DataPropertyDef::new("LastName", DataType::String).nullable(false))
                .property(DataPropertyDef::new("FirstName", DataType::String))
                .property(DataPropertyDef::complex("Addresses", "Location").collection())
                .navigation(
                    NavigationDef::collection("Orders", "Order").association("Employee_Orders"),
                )
                .auto_generated_key(AutoGeneratedKeyType::Identity),
        )
        .entity_type(
            EntityTypeDef::new("Order")
                .namespace(NAMESPACE)
                .key(DataPropertyDef::new("OrderID", DataType::Int32))
                .property(DataPropertyDef::new("CustomerID", DataType::Guid))
                .property(DataPropertyDef::new("EmployeeID", DataType::Int32))
                .property(DataPropertyDef::new("OrderDate", DataType::DateTime))
                .property(DataPropertyDef::new("Freight", DataType::Decimal))
                .property(DataPropertyDef::new("ShipName", DataType::String).max_length(40))
                .property(DataPropertyDef::complex("ShipTo", "Location"))
                .navigation(
                    NavigationDef::scalar("Customer", "Customer")
                        .association("Customer_Orders")
                        .foreign_keys(["CustomerID"]),
                )
                .navigation(
                    NavigationDef::scalar("Employee", "Employee")
                        .association("Employee_Orders")
                        .foreign_keys(["EmployeeID"]),
                )
                .navigation(
                    NavigationDef::collection("OrderDetails", "OrderDetail")
                        .association("Order_Details"),
                )
                .navigation(NavigationDef::collection("Tags", "Tag").association("Order_Tags"))
                .auto_generated_key(AutoGeneratedKeyType::Identity),
        )
        .entity_type(
            EntityTypeDef::new("OrderDetail")
                .namespace(NAMESPACE)
                .key(DataPropertyDef::new("OrderID", DataType::Int32))
                .key(DataPropertyDef::new("ProductID", DataType::Int32))
                .property(DataPropertyDef::new("UnitPrice", DataType::Decimal))
                .property(DataPropertyDef::new("Quantity", DataType::Int16))
                .navigation(
                    NavigationDef::scalar("Order", "Order")
                        .association("Order_Details")
                        .foreign_keys(["OrderID"]),
                )
                .navigation(NavigationDef::scalar("Product", "Product").foreign_keys(["ProductID"])),
        )
        .entity_type(
            EntityTypeDef::new("Product")
                .namespace(NAMESPACE)
                .key(DataPropertyDef::new("ProductID", DataType::Int32))
                .property(DataPropertyDef::new("ProductName", DataType::String).nullable(false)),
        )
        .entity_type(
            EntityTypeDef::new("Region")
                .namespace(NAMESPACE)
                .key(DataPropertyDef::new("RegionID", DataType::Int32))
                .property(DataPropertyDef::new("RegionDescription", DataType::String))
                .navigation(
                    NavigationDef::collection("Territories", "Territory")
                        .inv_foreign_keys(["RegionID"]),
                ),
        )
        .entity_type(
            EntityTypeDef::new("Territory")
                .namespace(NAMESPACE)
                .key(DataPropertyDef::new("TerritoryID", DataType::Int32))
                .property(DataPropertyDef::new("RegionID", DataType::Int32).nullable(false))
                .property(DataPropertyDef::new("TerritoryDescription", DataType::String)),
        )
        .entity_type(
            EntityTypeDef::new("Tag")
                .namespace(NAMESPACE)
                .key(DataPropertyDef::new("TagID", DataType::Int32))
                .property(DataPropertyDef::new("Name", DataType::String))
                .navigation(NavigationDef::collection("Orders", "Order").association("Order_Tags")),
        )
        .build()
}

/// An empty cache over [`northwind_schema`] with default options.
pub fn northwind_manager() -> Result<EntityManager, CacheError> {
    Ok(EntityManager::new(northwind_schema()?))
}

/// An empty cache over [`northwind_schema`] with `options`.
pub fn northwind_manager_with(options: CacheOptions) -> Result<EntityManager, CacheError> {
    EntityManager::with_options(northwind_schema()?, options)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn schema_builds_and_resolves_relationships() {
        let schema = northwind_schema().unwrap();
        let order = schema.entity_type_by_name("Order").unwrap();
        let (_, customer) = order.navigation_property("Customer").unwrap();
        assert!(customer.inverse.is_some());
        let region = schema.entity_type_by_name("Region").unwrap();
        let (_, territories) = region.navigation_property("Territories").unwrap();
        assert!(territories.inverse.is_none());
        assert_eq!(
            schema.entity_type_by_name("OrderDetail").unwrap().key_properties.len(),
            2
        );
        assert!(schema.complex_type_by_name("Northwind.Location").is_ok());
    }
}
