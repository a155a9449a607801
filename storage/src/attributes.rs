use crate::error::StoreError;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use unfurl_core::model::{EntityId, EntityKind, Namespace, Value, ValueKind};

struct Column {
    kind: ValueKind,
    values: HashMap<EntityId, Value>,
}

#[derive(Default)]
struct Table {
    columns: BTreeMap<String, Column>,
}

/// Typed attribute tables keyed by (entity kind, namespace).
///
/// Columns are created on first write (schema-on-write) and keep the type of
/// that first write for their lifetime.
#[derive(Default)]
pub struct AttributeStore {
    tables: HashMap<(EntityKind, Namespace), Table>,
}

impl AttributeStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self, namespace: Namespace, entity: EntityKind) -> Option<&Table> {
        self.tables.get(&(entity, namespace))
    }

    fn conflict(
        namespace: Namespace,
        entity: EntityKind,
        column: &str,
        expected: ValueKind,
        actual: ValueKind,
    ) -> StoreError {
        StoreError::TypeConflict {
            namespace,
            entity,
            column: column.to_string(),
            expected,
            actual,
        }
    }

    pub fn ensure_column(
        &mut self,
        namespace: Namespace,
        entity: EntityKind,
        name: &str,
        kind: ValueKind,
    ) -> Result<(), StoreError> {
        let table = self.tables.entry((entity, namespace)).or_default();
        match table.columns.get(name) {
            Some(column) if column.kind != kind => {
                Err(Self::conflict(namespace, entity, name, column.kind, kind))
            }
            Some(_) => Ok(()),
            None => {
                tracing::debug!("creating {} column '{}' ({}) as {}", entity, name, namespace, kind);
                table.columns.insert(
                    name.to_string(),
                    Column {
                        kind,
                        values: HashMap::new(),
                    },
                );
                Ok(())
            }
        }
    }

    pub fn set(
        &mut self,
        namespace: Namespace,
        entity: EntityKind,
        id: EntityId,
        name: &str,
        value: impl Into<Value>,
    ) -> Result<(), StoreError> {
        let value = value.into();
        self.ensure_column(namespace, entity, name, value.kind())?;
        if let Some(column) = self
            .tables
            .get_mut(&(entity, namespace))
            .and_then(|table| table.columns.get_mut(name))
        {
            column.values.insert(id, value);
        }
        Ok(())
    }

    /// Stored value, or `default` when the column or cell is absent.
    pub fn get(
        &self,
        namespace: Namespace,
        entity: EntityKind,
        id: EntityId,
        name: &str,
        expected: ValueKind,
        default: Option<Value>,
    ) -> Result<Option<Value>, StoreError> {
        let Some(column) = self.table(namespace, entity).and_then(|t| t.columns.get(name)) else {
            return Ok(default);
        };
        if column.kind != expected {
            return Err(Self::conflict(namespace, entity, name, column.kind, expected));
        }
        Ok(column.values.get(&id).cloned().or(default))
    }

    pub fn get_bool(
        &self,
        namespace: Namespace,
        entity: EntityKind,
        id: EntityId,
        name: &str,
        default: bool,
    ) -> Result<bool, StoreError> {
        let value = self.get(namespace, entity, id, name, ValueKind::Bool, None)?;
        Ok(value.and_then(|v| v.as_bool()).unwrap_or(default))
    }

    pub fn get_long(
        &self,
        namespace: Namespace,
        entity: EntityKind,
        id: EntityId,
        name: &str,
    ) -> Result<Option<i64>, StoreError> {
        let value = self.get(namespace, entity, id, name, ValueKind::Long, None)?;
        Ok(value.and_then(|v| v.as_long()))
    }

    pub fn get_string(
        &self,
        namespace: Namespace,
        entity: EntityKind,
        id: EntityId,
        name: &str,
    ) -> Result<Option<String>, StoreError> {
        let value = self.get(namespace, entity, id, name, ValueKind::String, None)?;
        Ok(value.and_then(|v| match v {
            Value::String(s) => Some(s),
            _ => None,
        }))
    }

    pub fn get_long_list(
        &self,
        namespace: Namespace,
        entity: EntityKind,
        id: EntityId,
        name: &str,
    ) -> Result<Vec<i64>, StoreError> {
        let value = self.get(namespace, entity, id, name, ValueKind::LongList, None)?;
        Ok(match value {
            Some(Value::LongList(items)) => items,
            _ => Vec::new(),
        })
    }

    /// Raw cell access without a type expectation.
    pub fn raw(
        &self,
        namespace: Namespace,
        entity: EntityKind,
        id: EntityId,
        name: &str,
    ) -> Option<&Value> {
        self.table(namespace, entity)
            .and_then(|t| t.columns.get(name))
            .and_then(|c| c.values.get(&id))
    }

    /// Ids whose `name` cell equals `value` exactly. An `Int` value matches a
    /// `Long` column; any other kind mismatch is a conflict.
    pub fn find_entities_with_value(
        &self,
        namespace: Namespace,
        entity: EntityKind,
        name: &str,
        value: &Value,
    ) -> Result<BTreeSet<EntityId>, StoreError> {
        let Some(column) = self.table(namespace, entity).and_then(|t| t.columns.get(name)) else {
            return Ok(BTreeSet::new());
        };
        let wanted = value
            .promote(column.kind)
            .ok_or_else(|| Self::conflict(namespace, entity, name, column.kind, value.kind()))?;

        Ok(column
            .values
            .iter()
            .filter(|(_, stored)| **stored == wanted)
            .map(|(id, _)| *id)
            .collect())
    }

    pub fn has_column(&self, namespace: Namespace, entity: EntityKind, name: &str) -> bool {
        self.column_kind(namespace, entity, name).is_some()
    }

    pub fn column_kind(
        &self,
        namespace: Namespace,
        entity: EntityKind,
        name: &str,
    ) -> Option<ValueKind> {
        self.table(namespace, entity)
            .and_then(|t| t.columns.get(name))
            .map(|c| c.kind)
    }

    pub fn column_names(&self, namespace: Namespace, entity: EntityKind) -> Vec<String> {
        self.table(namespace, entity)
            .map(|t| t.columns.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Unset one cell; the column itself stays.
    pub fn remove(
        &mut self,
        namespace: Namespace,
        entity: EntityKind,
        id: EntityId,
        name: &str,
    ) -> Option<Value> {
        self.tables
            .get_mut(&(entity, namespace))
            .and_then(|t| t.columns.get_mut(name))
            .and_then(|c| c.values.remove(&id))
    }

    /// Delete every cell of the given entities in every namespace.
    pub fn delete_rows(&mut self, entity: EntityKind, ids: &BTreeSet<EntityId>) {
        if ids.is_empty() {
            return;
        }
        for namespace in Namespace::ALL {
            if let Some(table) = self.tables.get_mut(&(entity, namespace)) {
                for column in table.columns.values_mut() {
                    column.values.retain(|id, _| !ids.contains(id));
                }
            }
        }
    }
}
