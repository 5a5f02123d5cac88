//! Staging catalogue: the sheets the workbook is expected to carry, the
//! staging table each one lands in, and the typed columns of that table.
//! Column order here must match `sql/create_tables.sql`.

use crate::pipeline::types::ColumnKind::{self, Bool, Date, Decimal, Int, Text};

#[derive(Debug)]
pub struct StagingColumn {
    pub name: &'static str,
    pub kind: ColumnKind,
}

#[derive(Debug)]
pub struct StagingTable {
    /// Sheet name as it usually appears in the workbook
    pub sheet: &'static str,
    pub table: &'static str,
    pub columns: &'static [StagingColumn],
}

const fn col(name: &'static str, kind: ColumnKind) -> StagingColumn {
    StagingColumn { name, kind }
}

pub const STAGING_TABLES: &[StagingTable] = &[
    StagingTable {
        sheet: "Products",
        table: "staging_products",
        columns: &[
            col("product_id", Int),
            col("product_name", Text),
            col("supplier_id", Int),
            col("category_id", Int),
            col("quantity_per_unit", Text),
            col("unit_price", Decimal),
            col("units_in_stock", Int),
            col("units_on_order", Int),
            col("reorder_level", Int),
            col("discontinued", Bool),
        ],
    },
    StagingTable {
        sheet: "Region",
        table: "staging_region",
        columns: &[col("region_id", Int), col("region_description", Text)],
    },
    StagingTable {
        sheet: "Shippers",
        table: "staging_shippers",
        columns: &[
            col("shipper_id", Int),
            col("company_name", Text),
            col("phone", Text),
        ],
    },
    StagingTable {
        sheet: "Suppliers",
        table: "staging_suppliers",
        columns: &[
            col("supplier_id", Int),
            col("company_name", Text),
            col("contact_name", Text),
            col("contact_title", Text),
            col("address", Text),
            col("city", Text),
            col("region", Text),
            col("postal_code", Text),
            col("country", Text),
            col("phone", Text),
            col("fax", Text),
            col("home_page", Text),
        ],
    },
    StagingTable {
        sheet: "Territories",
        table: "staging_territories",
        columns: &[
            col("territory_id", Text),
            col("territory_description", Text),
            col("region_id", Int),
        ],
    },
    StagingTable {
        sheet: "Orders",
        table: "staging_orders",
        columns: &[
            col("order_id", Int),
            col("customer_id", Text),
            col("employee_id", Int),
            col("order_date", Date),
            col("required_date", Date),
            col("shipped_date", Date),
            col("ship_via", Int),
            col("freight", Decimal),
            col("ship_name", Text),
            col("ship_address", Text),
            col("ship_city", Text),
            col("ship_region", Text),
            col("ship_postal_code", Text),
            col("ship_country", Text),
            col("territory_id", Text),
        ],
    },
    StagingTable {
        sheet: "Customers",
        table: "staging_customers",
        columns: &[
            col("customer_id", Text),
            col("company_name", Text),
            col("contact_name", Text),
            col("contact_title", Text),
            col("address", Text),
            col("city", Text),
            col("region", Text),
            col("postal_code", Text),
            col("country", Text),
            col("phone", Text),
            col("fax", Text),
        ],
    },
    StagingTable {
        sheet: "Employees",
        table: "staging_employees",
        columns: &[
            col("employee_id", Int),
            col("last_name", Text),
            col("first_name", Text),
            col("title", Text),
            col("title_of_courtesy", Text),
            col("birth_date", Date),
            col("hire_date", Date),
            col("address", Text),
            col("city", Text),
            col("region", Text),
            col("postal_code", Text),
            col("country", Text),
            col("home_phone", Text),
            col("extension", Text),
            col("notes", Text),
            col("reports_to", Int),
        ],
    },
    StagingTable {
        sheet: "Order Details",
        table: "staging_order_details",
        columns: &[
            col("order_id", Int),
            col("product_id", Int),
            col("unit_price", Decimal),
            col("quantity", Int),
            col("discount", Decimal),
        ],
    },
    StagingTable {
        sheet: "Categories",
        table: "staging_categories",
        columns: &[
            col("category_id", Int),
            col("category_name", Text),
            col("description", Text),
        ],
    },
];

/// Lowercase and drop everything that is not a letter or digit, so that
/// `Order Details`, `OrderDetails` and `order_details` compare equal, as do
/// `CustomerID` and `customer_id`.
pub fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

impl StagingTable {
    /// Does a workbook sheet name refer to this table's sheet?
    pub fn matches_sheet(&self, sheet_name: &str) -> bool {
        normalize_name(sheet_name) == normalize_name(self.sheet)
    }

    /// Find this table's sheet among the workbook's sheet names
    pub fn find_sheet<'a>(&self, sheet_names: &'a [String]) -> Option<&'a str> {
        sheet_names
            .iter()
            .find(|name| self.matches_sheet(name))
            .map(String::as_str)
    }

    /// Parameterized insert covering every staging column
    pub fn insert_sql(&self) -> String {
        let names: Vec<&str> = self.columns.iter().map(|c| c.name).collect();
        let placeholders: Vec<String> = (1..=self.columns.len()).map(|i| format!("${}", i)).collect();

        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.table,
            names.join(", "),
            placeholders.join(", ")
        )
    }
}

pub fn staging_table(table: &str) -> Option<&'static StagingTable> {
    STAGING_TABLES.iter().find(|t| t.table == table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("Order Details"), "orderdetails");
        assert_eq!(normalize_name("OrderDetails"), "orderdetails");
        assert_eq!(normalize_name("CustomerID"), "customerid");
        assert_eq!(normalize_name("customer_id"), "customerid");
        assert_eq!(normalize_name(" Ship Via "), "shipvia");
    }

    #[test]
    fn test_both_order_detail_spellings_match() {
        let details = staging_table("staging_order_details").unwrap();
        assert!(details.matches_sheet("Order Details"));
        assert!(details.matches_sheet("OrderDetails"));
        assert!(!details.matches_sheet("Orders"));

        let names = vec!["Orders".to_string(), "OrderDetails".to_string()];
        assert_eq!(details.find_sheet(&names), Some("OrderDetails"));
    }

    #[test]
    fn test_catalogue_covers_every_entity_once() {
        assert_eq!(STAGING_TABLES.len(), 10);

        let tables: HashSet<_> = STAGING_TABLES.iter().map(|t| t.table).collect();
        assert_eq!(tables.len(), STAGING_TABLES.len());

        for table in STAGING_TABLES {
            let columns: HashSet<_> = table.columns.iter().map(|c| normalize_name(c.name)).collect();
            assert_eq!(columns.len(), table.columns.len(), "{} has clashing columns", table.table);
        }
    }

    #[test]
    fn test_insert_sql() {
        let region = staging_table("staging_region").unwrap();
        assert_eq!(
            region.insert_sql(),
            "INSERT INTO staging_region (region_id, region_description) VALUES ($1, $2)"
        );
    }
}
