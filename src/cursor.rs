//! Forward-only readers returned by the cursor execution modes.
//!
//! A reader holds the connection's single cursor slot until its rows are exhausted or it is
//! closed. When the helper opened the connection for the call, the reader also closes the
//! connection at that point.

use std::collections::HashMap;
use std::sync::Arc;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::backend::RawCursor;
use crate::connection::{CursorToken, SqlConnection};
use crate::error::SqlHelperError;
use crate::parameter::{SqlParameter, apply_output_values, find_parameter};
use crate::results::row::build_index;
use crate::results::{DataRow, DataTable};

/// Forward-only cursor over the first result set of a command.
///
/// Output and return values only exist once every row has been read; they are written into
/// [`parameters`](Self::parameters) at that point and handed back by [`close`](Self::close).
pub struct SqlDataReader {
    connection: SqlConnection,
    cursor: Option<Box<dyn RawCursor>>,
    cursor_token: CursorToken,
    column_names: Arc<Vec<String>>,
    column_index_cache: Arc<HashMap<String, usize>>,
    current: Option<DataRow>,
    parameters: Vec<SqlParameter>,
    close_connection: bool,
}

impl std::fmt::Debug for SqlDataReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlDataReader")
            .field("column_names", &self.column_names)
            .field("closed", &self.is_closed())
            .field("close_connection", &self.close_connection)
            .finish_non_exhaustive()
    }
}

impl SqlDataReader {
    pub(crate) fn new(
        connection: SqlConnection,
        cursor: Box<dyn RawCursor>,
        cursor_token: CursorToken,
        parameters: Vec<SqlParameter>,
        close_connection: bool,
    ) -> Self {
        let column_names = cursor.column_names();
        let column_index_cache = Arc::new(build_index(&column_names));
        Self {
            connection,
            cursor: Some(cursor),
            cursor_token,
            column_names,
            column_index_cache,
            current: None,
            parameters,
            close_connection,
        }
    }

    #[must_use]
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    /// Advance to the next row. Returns `false` once the rows are exhausted, at which point the
    /// reader has completed and released its connection.
    ///
    /// # Errors
    /// Returns the backend's error if fetching the row fails, or if closing an owned connection
    /// on completion fails.
    pub async fn read(&mut self) -> Result<bool, SqlHelperError> {
        let Some(cursor) = self.cursor.as_mut() else {
            self.current = None;
            return Ok(false);
        };
        match cursor.next_row().await? {
            Some(values) => {
                self.current = Some(DataRow::with_cache(
                    self.column_names.clone(),
                    values,
                    self.column_index_cache.clone(),
                ));
                Ok(true)
            }
            None => {
                self.current = None;
                self.complete().await?;
                Ok(false)
            }
        }
    }

    /// The row the reader is positioned on.
    #[must_use]
    pub fn current(&self) -> Option<&DataRow> {
        self.current.as_ref()
    }

    /// Advance and take the next row.
    ///
    /// # Errors
    /// Same as [`read`](Self::read).
    pub async fn next_row(&mut self) -> Result<Option<DataRow>, SqlHelperError> {
        if self.read().await? {
            Ok(self.current.take())
        } else {
            Ok(None)
        }
    }

    /// Read every remaining row into a table.
    ///
    /// # Errors
    /// Same as [`read`](Self::read).
    pub async fn read_table(&mut self, name: &str) -> Result<DataTable, SqlHelperError> {
        let mut table = DataTable::new(name, self.column_names.to_vec());
        while let Some(row) = self.next_row().await? {
            table.add_row_values(row.values);
        }
        Ok(table)
    }

    /// Parameters carried by the reader. Output values are populated once the reader completes.
    #[must_use]
    pub fn parameters(&self) -> &[SqlParameter] {
        &self.parameters
    }

    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&SqlParameter> {
        find_parameter(&self.parameters, name)
    }

    /// True once the rows are exhausted or the reader was closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cursor.is_none()
    }

    /// Skip any unread rows, complete the reader and return its parameters with output values
    /// populated.
    ///
    /// # Errors
    /// Same as [`read`](Self::read).
    pub async fn close(mut self) -> Result<Vec<SqlParameter>, SqlHelperError> {
        while self.read().await? {}
        Ok(std::mem::take(&mut self.parameters))
    }

    async fn complete(&mut self) -> Result<(), SqlHelperError> {
        let Some(mut cursor) = self.cursor.take() else {
            return Ok(());
        };
        let outputs = cursor.take_output_values();
        drop(cursor);
        apply_output_values(&mut self.parameters, &outputs);
        self.connection.release_cursor(self.cursor_token);
        if self.close_connection {
            debug!("reader completed, closing the connection it owns");
            self.connection.close().await?;
        }
        Ok(())
    }
}

impl Drop for SqlDataReader {
    fn drop(&mut self) {
        if self.cursor.take().is_none() {
            return;
        }
        self.connection.release_cursor(self.cursor_token);
        if self.close_connection {
            if let Ok(handle) = Handle::try_current() {
                let connection = self.connection.clone();
                handle.spawn(async move {
                    if let Err(e) = connection.close().await {
                        warn!(error = %e, "failed to close connection of dropped reader");
                    }
                });
            }
        }
    }
}

/// A top-level element of an XML result, with its attributes in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlElement {
    pub name: String,
    pub attributes: Vec<(String, String)>,
}

/// Reader over `FOR XML` output.
///
/// The server streams the document as text fragments spread over rows of a single column;
/// the fragments concatenate to the full document.
#[derive(Debug)]
pub struct SqlXmlReader {
    inner: SqlDataReader,
}

impl SqlXmlReader {
    pub(crate) fn new(inner: SqlDataReader) -> Self {
        Self { inner }
    }

    /// The next text fragment, or `None` when the output is exhausted.
    ///
    /// # Errors
    /// Same as [`SqlDataReader::read`].
    pub async fn read_fragment(&mut self) -> Result<Option<String>, SqlHelperError> {
        let Some(row) = self.inner.next_row().await? else {
            return Ok(None);
        };
        let fragment = match row.get_by_index(0) {
            Some(value) if value.is_null() => String::new(),
            Some(value) => value
                .as_text()
                .map_or_else(|| value.to_json().to_string(), str::to_string),
            None => String::new(),
        };
        Ok(Some(fragment))
    }

    /// Read every remaining fragment and join them.
    ///
    /// # Errors
    /// Same as [`SqlDataReader::read`].
    pub async fn read_to_string(&mut self) -> Result<String, SqlHelperError> {
        let mut xml = String::new();
        while let Some(fragment) = self.read_fragment().await? {
            xml.push_str(&fragment);
        }
        Ok(xml)
    }

    /// Read the remaining output and parse its top-level elements.
    ///
    /// # Errors
    /// Returns `SqlHelperError::DependencyFailure` if the server produced malformed XML, besides
    /// the errors of [`SqlDataReader::read`].
    pub async fn read_elements(&mut self) -> Result<Vec<XmlElement>, SqlHelperError> {
        let xml = self.read_to_string().await?;
        parse_top_level_elements(&xml)
    }

    #[must_use]
    pub fn parameters(&self) -> &[SqlParameter] {
        self.inner.parameters()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// # Errors
    /// Same as [`SqlDataReader::close`].
    pub async fn close(self) -> Result<Vec<SqlParameter>, SqlHelperError> {
        self.inner.close().await
    }
}

fn parse_top_level_elements(xml: &str) -> Result<Vec<XmlElement>, SqlHelperError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut elements = Vec::new();
    let mut depth = 0usize;
    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Start(start) => {
                if depth == 0 {
                    elements.push(to_element(&start)?);
                }
                depth += 1;
            }
            Event::Empty(start) if depth == 0 => elements.push(to_element(&start)?),
            Event::End(_) => depth = depth.saturating_sub(1),
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(elements)
}

fn to_element(start: &BytesStart<'_>) -> Result<XmlElement, SqlHelperError> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(xml_error)?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().map_err(xml_error)?.into_owned();
        attributes.push((key, value));
    }
    Ok(XmlElement { name, attributes })
}

fn xml_error(err: impl std::fmt::Display) -> SqlHelperError {
    SqlHelperError::DependencyFailure(format!("malformed XML result: {err}"))
}
