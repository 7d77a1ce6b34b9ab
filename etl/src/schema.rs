use arrow::datatypes::{DataType, Field, Schema};
use common::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Utf8,
    Int64,
    Float64,
}

impl ColumnType {
    pub fn to_arrow(self) -> DataType {
        match self {
            ColumnType::Utf8 => DataType::Utf8,
            ColumnType::Int64 => DataType::Int64,
            ColumnType::Float64 => DataType::Float64,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub name: &'static str,
    pub column_type: ColumnType,
}

const fn column(name: &'static str, column_type: ColumnType) -> Column {
    Column { name, column_type }
}

/// Named, versioned column layout exchanged between two stages.
#[derive(Debug)]
pub struct SchemaContract {
    pub name: &'static str,
    pub version: &'static str,
    pub columns: &'static [Column],
}

impl SchemaContract {
    pub fn column_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.columns.iter().map(|c| c.name)
    }

    /// Fails unless every contract column appears in `header`. Column order
    /// and extra columns are not checked.
    pub fn check_header<'a>(&self, header: impl IntoIterator<Item = &'a str>) -> Result<()> {
        let header: Vec<&str> = header.into_iter().collect();
        let missing: Vec<&str> = self
            .column_names()
            .filter(|name| !header.contains(name))
            .collect();

        if missing.is_empty() {
            return Ok(());
        }

        Err(Error::SchemaMismatch(format!(
            "{} {} expects columns [{}], missing [{}] (found [{}])",
            self.name,
            self.version,
            self.column_names().collect::<Vec<_>>().join(", "),
            missing.join(", "),
            header.join(", ")
        )))
    }

    pub fn arrow_schema(&self) -> Schema {
        Schema::new(
            self.columns
                .iter()
                .map(|c| Field::new(c.name, c.column_type.to_arrow(), true))
                .collect::<Vec<_>>(),
        )
    }
}

/// Raw sales export landed in the bronze layer.
pub const BRONZE_SALES_V1: SchemaContract = SchemaContract {
    name: "bronze_sales",
    version: "v1",
    columns: &[
        column("order_id", ColumnType::Utf8),
        column("product_name", ColumnType::Utf8),
        column("category", ColumnType::Utf8),
        column("price", ColumnType::Float64),
        column("date", ColumnType::Utf8),
        column("source", ColumnType::Utf8),
    ],
};

/// Cleaned sales rows; the warehouse COPY loads these columns by position.
pub const SILVER_SALES_V1: SchemaContract = SchemaContract {
    name: "silver_sales",
    version: "v1",
    columns: &[
        column("order_id", ColumnType::Utf8),
        column("product_name", ColumnType::Utf8),
        column("category", ColumnType::Utf8),
        column("price", ColumnType::Float64),
        column("date", ColumnType::Utf8),
        column("source", ColumnType::Utf8),
        column("price_category", ColumnType::Utf8),
    ],
};

/// One row per ordered item.
pub const SILVER_ORDERS_V1: SchemaContract = SchemaContract {
    name: "silver_orders",
    version: "v1",
    columns: &[
        column("order_id", ColumnType::Utf8),
        column("customer_name", ColumnType::Utf8),
        column("customer_email", ColumnType::Utf8),
        column("order_date", ColumnType::Utf8),
        column("product_name", ColumnType::Utf8),
        column("quantity", ColumnType::Int64),
        column("price", ColumnType::Float64),
    ],
};
