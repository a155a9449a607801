//! Streaming reader for one JSON table: a header array of column names
//! followed by row arrays of scalar cells.
//!
//! Tables are pulled through serde's `SeqAccess` one cell at a time. A table
//! that fails is drained with `IgnoredAny`, so the deserializer is left just
//! past it and whatever follows can still be read.

use crate::error::ReadError;
use crate::source::{Cursor, Position, Tracked};
use serde::de::{self, DeserializeSeed, Deserializer, IgnoredAny, MapAccess, SeqAccess, Visitor};
use std::fmt;
use std::io::Read;
use unfurl_core::model::{Value, ValueKind};

/// One parsed row. `types` holds the column types established so far, so a
/// null cell can still report the type of its column.
#[derive(Debug)]
pub struct Row<'a> {
    pub index: usize,
    pub position: Position,
    pub values: &'a [Option<Value>],
    pub types: &'a [Option<ValueKind>],
}

impl Row<'_> {
    pub fn value(&self, column: usize) -> Option<&Value> {
        self.values.get(column).and_then(|v| v.as_ref())
    }
}

pub trait TableSink {
    fn on_header(&mut self, columns: &[String], position: Position) -> Result<(), ReadError>;
    fn on_row(&mut self, row: &Row<'_>) -> Result<(), ReadError>;
    fn on_done(&mut self) -> Result<(), ReadError> {
        Ok(())
    }
}

/// Parse one table from `input`. Returns the number of rows read.
pub fn read_table<R: Read, S: TableSink>(input: R, sink: &mut S) -> Result<usize, ReadError> {
    let source = Tracked::new(input);
    let cursor = source.cursor();
    let mut deserializer = serde_json::Deserializer::from_reader(source);
    let rows = TableSeed::new(sink, cursor)
        .deserialize(&mut deserializer)
        .map_err(ReadError::from_json)??;
    deserializer.end().map_err(ReadError::from_json)?;
    Ok(rows)
}

/// Reads a table in place within a larger document.
///
/// The outer `Result` carries deserializer errors, which end the whole read.
/// The inner one is the table's own failure, after the table was skipped.
pub struct TableSeed<'s, S> {
    sink: &'s mut S,
    cursor: Cursor,
}

impl<'s, S> TableSeed<'s, S> {
    pub fn new(sink: &'s mut S, cursor: Cursor) -> Self {
        Self { sink, cursor }
    }
}

impl<'de, S: TableSink> DeserializeSeed<'de> for TableSeed<'_, S> {
    type Value = Result<usize, ReadError>;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        ArraySeed(TableHandler {
            sink: self.sink,
            cursor: self.cursor,
        })
        .deserialize(deserializer)
    }
}

/// Why a level stopped early: the deserializer failed, or the table did.
enum Halt<E> {
    Json(E),
    Table(ReadError),
}

impl<E> From<ReadError> for Halt<E> {
    fn from(error: ReadError) -> Self {
        Halt::Table(error)
    }
}

fn drain<'de, A: SeqAccess<'de>>(seq: &mut A) -> Result<(), A::Error> {
    while seq.next_element::<IgnoredAny>()?.is_some() {}
    Ok(())
}

/// Finish a level: a table failure drains the rest of the array.
fn settle<'de, A: SeqAccess<'de>, T>(
    seq: &mut A,
    result: Result<T, Halt<A::Error>>,
) -> Result<Result<T, ReadError>, A::Error> {
    match result {
        Ok(value) => Ok(Ok(value)),
        Err(Halt::Json(e)) => Err(e),
        Err(Halt::Table(error)) => {
            drain(seq)?;
            Ok(Err(error))
        }
    }
}

/// One level of the table grammar that must be an array.
trait ArrayHandler<'de> {
    type Output;

    fn describe(&self) -> String;
    fn cursor(&self) -> &Cursor;
    fn array<A: SeqAccess<'de>>(self, seq: A) -> Result<Result<Self::Output, ReadError>, A::Error>;

    fn mismatch(&self, found: &str) -> ReadError {
        ReadError::parse(
            self.cursor().position(),
            format!("{} must be an array, found {}", self.describe(), found),
        )
    }
}

/// Accepts any JSON value; anything but an array is consumed and reported
/// as a positioned [`ReadError::Parse`].
struct ArraySeed<H>(H);

impl<'de, H: ArrayHandler<'de>> DeserializeSeed<'de> for ArraySeed<H> {
    type Value = Result<H::Output, ReadError>;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_any(self)
    }
}

impl<'de, H: ArrayHandler<'de>> Visitor<'de> for ArraySeed<H> {
    type Value = Result<H::Output, ReadError>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} array", self.0.describe())
    }

    fn visit_seq<A: SeqAccess<'de>>(self, seq: A) -> Result<Self::Value, A::Error> {
        self.0.array(seq)
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(Err(self.0.mismatch("null")))
    }

    fn visit_bool<E: de::Error>(self, _: bool) -> Result<Self::Value, E> {
        Ok(Err(self.0.mismatch("boolean")))
    }

    fn visit_i64<E: de::Error>(self, _: i64) -> Result<Self::Value, E> {
        Ok(Err(self.0.mismatch("number")))
    }

    fn visit_u64<E: de::Error>(self, _: u64) -> Result<Self::Value, E> {
        Ok(Err(self.0.mismatch("number")))
    }

    fn visit_f64<E: de::Error>(self, _: f64) -> Result<Self::Value, E> {
        Ok(Err(self.0.mismatch("number")))
    }

    fn visit_str<E: de::Error>(self, _: &str) -> Result<Self::Value, E> {
        Ok(Err(self.0.mismatch("string")))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        while map.next_entry::<IgnoredAny, IgnoredAny>()?.is_some() {}
        Ok(Err(self.0.mismatch("object")))
    }
}

/// A single cell as it came off the wire.
enum Cell {
    Scalar(Option<Value>),
    Nested(&'static str),
    OutOfRange(u64),
}

impl<'de> de::Deserialize<'de> for Cell {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct CellVisitor;

        impl<'de> Visitor<'de> for CellVisitor {
            type Value = Cell;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a null, boolean, string or number cell")
            }

            fn visit_unit<E: de::Error>(self) -> Result<Cell, E> {
                Ok(Cell::Scalar(None))
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> Result<Cell, E> {
                Ok(Cell::Scalar(Some(Value::Bool(v))))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Cell, E> {
                Ok(Cell::Scalar(Some(Value::Long(v))))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Cell, E> {
                Ok(match i64::try_from(v) {
                    Ok(n) => Cell::Scalar(Some(Value::Long(n))),
                    Err(_) => Cell::OutOfRange(v),
                })
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Cell, E> {
                Ok(Cell::Scalar(Some(Value::Double(v))))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Cell, E> {
                Ok(Cell::Scalar(Some(Value::String(v.to_owned()))))
            }

            fn visit_string<E: de::Error>(self, v: String) -> Result<Cell, E> {
                Ok(Cell::Scalar(Some(Value::String(v))))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Cell, A::Error> {
                drain(&mut seq)?;
                Ok(Cell::Nested("array"))
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Cell, A::Error> {
                while map.next_entry::<IgnoredAny, IgnoredAny>()?.is_some() {}
                Ok(Cell::Nested("object"))
            }
        }

        deserializer.deserialize_any(CellVisitor)
    }
}

struct TableHandler<'s, S> {
    sink: &'s mut S,
    cursor: Cursor,
}

impl<'de, S: TableSink> ArrayHandler<'de> for TableHandler<'_, S> {
    type Output = usize;

    fn describe(&self) -> String {
        "table".to_string()
    }

    fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    fn array<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Result<usize, ReadError>, A::Error> {
        let result = self.rows(&mut seq);
        settle(&mut seq, result)
    }
}

impl<S: TableSink> TableHandler<'_, S> {
    fn rows<'de, A: SeqAccess<'de>>(self, seq: &mut A) -> Result<usize, Halt<A::Error>> {
        let header = HeaderHandler {
            cursor: self.cursor.clone(),
        };
        let header_position = self.cursor.position();
        let columns = match seq.next_element_seed(ArraySeed(header)).map_err(Halt::Json)? {
            None => return Ok(0),
            Some(columns) => columns?,
        };

        // A table with no columns is empty; rows must then be empty too.
        let silent = columns.is_empty();
        if !silent {
            tracing::debug!("table header {:?}", columns);
            self.sink.on_header(&columns, header_position)?;
        }

        let width = columns.len();
        let mut values: Vec<Option<Value>> = vec![None; width];
        let mut types: Vec<Option<ValueKind>> = vec![None; width];
        let mut index = 0;

        loop {
            let row = RowHandler {
                index,
                columns: &columns,
                values: &mut values,
                types: &mut types,
                cursor: self.cursor.clone(),
            };
            let position = match seq.next_element_seed(ArraySeed(row)).map_err(Halt::Json)? {
                None => break,
                Some(position) => position?,
            };
            if !silent {
                self.sink.on_row(&Row {
                    index,
                    position,
                    values: &values,
                    types: &types,
                })?;
            }
            index += 1;
        }

        if !silent {
            self.sink.on_done()?;
        }
        Ok(index)
    }
}

struct HeaderHandler {
    cursor: Cursor,
}

impl<'de> ArrayHandler<'de> for HeaderHandler {
    type Output = Vec<String>;

    fn describe(&self) -> String {
        "header".to_string()
    }

    fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    fn array<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Result<Vec<String>, ReadError>, A::Error> {
        let result = self.columns(&mut seq);
        settle(&mut seq, result)
    }
}

impl HeaderHandler {
    fn columns<'de, A: SeqAccess<'de>>(&self, seq: &mut A) -> Result<Vec<String>, Halt<A::Error>> {
        let mut columns: Vec<String> = Vec::new();
        while let Some(cell) = seq.next_element::<Cell>().map_err(Halt::Json)? {
            let index = columns.len();
            let position = self.cursor.position();
            let problem = match cell {
                Cell::Scalar(Some(Value::String(name))) if name.is_empty() => {
                    format!("header cell {} is an empty string", index)
                }
                Cell::Scalar(Some(Value::String(name))) => {
                    if columns.contains(&name) {
                        format!("header cell {} repeats column name '{}'", index, name)
                    } else {
                        columns.push(name);
                        continue;
                    }
                }
                Cell::Scalar(None) => format!("header cell {} is null", index),
                Cell::Scalar(Some(other)) => format!(
                    "header cell {} is a {}, header cells must be strings",
                    index,
                    other.kind()
                ),
                Cell::Nested(found) => {
                    format!("header cell {} is an {}, header cells must be strings", index, found)
                }
                Cell::OutOfRange(n) => {
                    format!("header cell {} is the number {}, header cells must be strings", index, n)
                }
            };
            return Err(ReadError::parse(position, problem).into());
        }
        Ok(columns)
    }
}

struct RowHandler<'r> {
    index: usize,
    columns: &'r [String],
    values: &'r mut [Option<Value>],
    types: &'r mut [Option<ValueKind>],
    cursor: Cursor,
}

impl<'de> ArrayHandler<'de> for RowHandler<'_> {
    type Output = Position;

    fn describe(&self) -> String {
        format!("row {}", self.index)
    }

    fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    fn array<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Result<Position, ReadError>, A::Error> {
        let position = self.cursor.position();
        let result = self.cells(&mut seq).map(|()| position);
        settle(&mut seq, result)
    }
}

impl RowHandler<'_> {
    fn cells<'de, A: SeqAccess<'de>>(self, seq: &mut A) -> Result<(), Halt<A::Error>> {
        let width = self.columns.len();
        let mut cell = 0;
        while let Some(parsed) = seq.next_element::<Cell>().map_err(Halt::Json)? {
            let position = self.cursor.position();
            if cell >= width {
                return Err(ReadError::parse(
                    position,
                    format!("row {} has more cells than the {} header columns", self.index, width),
                )
                .into());
            }
            let column = &self.columns[cell];

            let value = match parsed {
                Cell::Scalar(value) => value,
                Cell::Nested(found) => {
                    return Err(ReadError::parse(
                        position,
                        format!(
                            "row {} column '{}': {} is not a valid cell, cells must be null, boolean, string or number",
                            self.index, column, found
                        ),
                    )
                    .into())
                }
                Cell::OutOfRange(n) => {
                    return Err(ReadError::parse(
                        position,
                        format!("row {} column '{}': {} does not fit in a long", self.index, column, n),
                    )
                    .into())
                }
            };

            if let Some(seen) = value.as_ref().map(Value::kind) {
                match self.types[cell] {
                    None => self.types[cell] = Some(seen),
                    Some(expected) if expected != seen => {
                        return Err(ReadError::ColumnTypeConflict {
                            column: column.clone(),
                            row: self.index,
                            seen,
                            expected,
                            position,
                        }
                        .into())
                    }
                    Some(_) => {}
                }
            }
            self.values[cell] = value;
            cell += 1;
        }

        if cell < width {
            return Err(ReadError::parse(
                self.cursor.position(),
                format!("row {} has {} cells but the header has {}", self.index, cell, width),
            )
            .into());
        }
        Ok(())
    }
}
