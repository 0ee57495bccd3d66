use dashmap::DashMap;
use serde_json::Value;
use tracing::debug;

use ritus_types::ProjectId;

/// One stored content record: its id and the raw JSON it was saved as.
///
/// The data is kept as text so a malformed row only costs that row.
#[derive(Clone, Debug, PartialEq)]
pub struct ContentRow {
    pub id: u64,
    pub data: String,
}

impl ContentRow {
    pub fn new(id: u64, data: impl Into<String>) -> Self {
        Self {
            id,
            data: data.into(),
        }
    }
}

/// Destination and source of per-project content rows.
pub trait ContentStore: Send + Sync {
    /// Rows in id order.
    fn rows(&self, project: ProjectId) -> Vec<ContentRow>;

    /// Replace every row of the project, assigning ids `1..=n` in order.
    fn replace(&self, project: ProjectId, records: Vec<Value>);
}

/// In-process [`ContentStore`].
#[derive(Debug, Default)]
pub struct MemoryContentStore {
    rows: DashMap<ProjectId, Vec<ContentRow>>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store raw rows as-is, for callers that already hold serialized data.
    pub fn insert_raw(&self, project: ProjectId, rows: Vec<ContentRow>) {
        self.rows.insert(project, rows);
    }
}

impl ContentStore for MemoryContentStore {
    fn rows(&self, project: ProjectId) -> Vec<ContentRow> {
        let mut rows = self
            .rows
            .get(&project)
            .map(|rows| rows.clone())
            .unwrap_or_default();
        rows.sort_by_key(|row| row.id);
        rows
    }

    fn replace(&self, project: ProjectId, records: Vec<Value>) {
        let rows: Vec<ContentRow> = records
            .into_iter()
            .enumerate()
            .map(|(i, record)| ContentRow::new(i as u64 + 1, record.to_string()))
            .collect();
        debug!("replacing content of project {project} with {} rows", rows.len());
        self.rows.insert(project, rows);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn replace_renumbers_rows() {
        let store = MemoryContentStore::new();
        let project = ProjectId(1);
        store.insert_raw(project, vec![ContentRow::new(9, "{}"), ContentRow::new(4, "[")]);
        assert_eq!(store.rows(project)[0].id, 4);

        store.replace(project, vec![json!({"a": 1}), json!({"b": 2})]);
        let rows = store.rows(project);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], ContentRow::new(1, r#"{"a":1}"#));
        assert_eq!(rows[1].id, 2);
    }

    #[test]
    fn unknown_project_has_no_rows() {
        assert!(MemoryContentStore::new().rows(ProjectId(3)).is_empty());
    }
}
