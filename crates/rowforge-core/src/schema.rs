//! Relational schema model materialized by an ingest job.

use serde::{Deserialize, Serialize};

use crate::kind::Kind;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub kind: Kind,
}

impl Column {
    pub fn new(name: impl Into<String>, kind: Kind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// A table definition. Column order is significant: it is the
/// document-declared order recovered during ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub cols: Vec<Column>,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cols: Vec::new(),
        }
    }

    pub fn find_col(&self, name: &str) -> Option<&Column> {
        self.cols.iter().find(|c| c.name == name)
    }

    pub fn col_names(&self) -> Vec<String> {
        self.cols.iter().map(|c| c.name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_col() {
        let mut tbl = Table::new("data");
        tbl.cols.push(Column::new("a", Kind::Int));
        tbl.cols.push(Column::new("b", Kind::Text));

        assert_eq!(tbl.find_col("b").unwrap().kind, Kind::Text);
        assert!(tbl.find_col("c").is_none());
    }

    #[test]
    fn equality_is_order_sensitive() {
        let mut t1 = Table::new("data");
        t1.cols.push(Column::new("a", Kind::Int));
        t1.cols.push(Column::new("b", Kind::Text));

        let mut t2 = Table::new("data");
        t2.cols.push(Column::new("b", Kind::Text));
        t2.cols.push(Column::new("a", Kind::Int));

        assert_ne!(t1, t2);
    }
}
