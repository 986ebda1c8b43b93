pub mod data_set;
pub mod row;
pub mod table;

pub use data_set::{DataSet, default_table_name};
pub use row::{DataRow, RowState};
pub use table::DataTable;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DbValue;

    fn people() -> DataTable {
        let mut t = DataTable::new("people", vec!["id".into(), "name".into()]);
        t.add_row_values(vec![DbValue::Int(1), DbValue::Text("alice".into())]);
        t.add_row_values(vec![DbValue::Int(2), DbValue::Text("bob".into())]);
        t
    }

    #[test]
    fn row_lookup_is_case_insensitive_fallback() {
        let t = people();
        assert_eq!(t.rows()[0].get("NAME"), Some(&DbValue::Text("alice".into())));
        assert_eq!(t.rows()[1].get("id"), Some(&DbValue::Int(2)));
        assert!(t.rows()[0].get("missing").is_none());
    }

    #[test]
    fn accept_changes_drops_deleted_rows() {
        let mut t = people();
        t.rows_mut()[0].delete();
        assert!(t.rows_mut()[1].set("name", "robert"));
        t.insert_row(vec![DbValue::Int(3), DbValue::Text("carol".into())]);
        assert_eq!(t.rows()[1].state(), RowState::Modified);
        assert_eq!(t.rows()[2].state(), RowState::Added);

        t.accept_changes();
        assert_eq!(t.row_count(), 2);
        assert!(t.rows().iter().all(|r| r.state() == RowState::Unchanged));
    }

    #[test]
    fn same_named_tables_merge_on_add() {
        let mut ds = DataSet::new();
        ds.add_or_merge(people());
        ds.add_or_merge(people());
        assert_eq!(ds.len(), 1);
        assert_eq!(ds.table("People").map(DataTable::row_count), Some(4));
    }

    #[test]
    fn default_names_follow_fill_convention() {
        assert_eq!(default_table_name(0), "Table");
        assert_eq!(default_table_name(2), "Table2");
    }
}
