//! Column and schema definitions.

use crate::types::TypeId;

/// A single column in a schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    /// Column name.
    name: String,
    /// Column type.
    type_id: TypeId,
    /// Byte offset of the inlined slot within a tuple, assigned by
    /// `Schema::new`.
    offset: usize,
}

impl Column {
    /// Creates a new column. The offset is assigned when the column is
    /// placed into a schema.
    pub fn new(name: impl Into<String>, type_id: TypeId) -> Self {
        Self {
            name: name.into(),
            type_id,
            offset: 0,
        }
    }

    /// Returns the column name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the column type.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Returns the byte offset of the inlined slot within the tuple.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Returns the inlined slot size in bytes.
    pub fn inline_size(&self) -> usize {
        self.type_id.inline_size()
    }

    /// Returns true if the full value is stored inline.
    pub fn is_inlined(&self) -> bool {
        self.type_id.is_inlined()
    }
}

/// The shape of a row: an ordered list of columns with computed offsets.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    columns: Vec<Column>,
    /// Total size of the inlined portion of a tuple.
    inline_size: usize,
}

impl Schema {
    /// Creates a schema, laying columns out back-to-back in declaration
    /// order. Variable-length columns get a 4-byte indirection slot.
    pub fn new(mut columns: Vec<Column>) -> Self {
        let mut offset = 0;
        for col in &mut columns {
            col.offset = offset;
            offset += col.inline_size();
        }
        Self {
            columns,
            inline_size: offset,
        }
    }

    /// Returns the column at `idx`.
    pub fn column(&self, idx: usize) -> &Column {
        &self.columns[idx]
    }

    /// Returns all columns.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Returns the number of columns.
    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// Returns the size of the inlined portion of a tuple.
    pub fn inline_size(&self) -> usize {
        self.inline_size
    }

    /// Finds a column index by name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Builds a schema holding the named subset of this schema's columns,
    /// in the given order.
    pub fn project(&self, indices: &[usize]) -> Schema {
        Schema::new(
            indices
                .iter()
                .map(|&i| Column::new(self.columns[i].name.clone(), self.columns[i].type_id))
                .collect(),
        )
    }

    /// Concatenates two schemas (used by join outputs).
    pub fn join(left: &Schema, right: &Schema) -> Schema {
        let mut columns: Vec<Column> = Vec::with_capacity(left.num_columns() + right.num_columns());
        for c in left.columns() {
            columns.push(Column::new(c.name.clone(), c.type_id));
        }
        for c in right.columns() {
            columns.push(Column::new(c.name.clone(), c.type_id));
        }
        Schema::new(columns)
    }
}
