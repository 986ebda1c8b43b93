use super::SqlHelper;
use crate::cache::FieldSource;
use crate::cursor::SqlXmlReader;
use crate::error::SqlHelperError;
use crate::parameter::{ParamArg, SqlParameter};
use crate::target::Target;
use crate::types::{CommandType, ReadMode};

impl SqlHelper {
    /// Execute a `FOR XML` command and open a reader over its output.
    ///
    /// Ownership and parameter handling follow [`execute_reader`](Self::execute_reader).
    ///
    /// # Errors
    /// Same as [`execute_reader`](Self::execute_reader).
    pub async fn execute_xml_reader<'a>(
        &self,
        target: impl Into<Target<'a>>,
        command_type: CommandType,
        command_text: &str,
        parameters: &mut Vec<SqlParameter>,
    ) -> Result<SqlXmlReader, SqlHelperError> {
        let reader = self
            .open_reader(
                target.into(),
                command_type,
                command_text,
                parameters,
                ReadMode::Xml,
            )
            .await?;
        Ok(SqlXmlReader::new(reader))
    }

    /// # Errors
    /// As [`execute_xml_reader`](Self::execute_xml_reader) and
    /// [`execute_non_query_sp`](Self::execute_non_query_sp).
    pub async fn execute_xml_reader_sp<'a>(
        &self,
        target: impl Into<Target<'a>>,
        procedure_name: &str,
        values: &[ParamArg],
    ) -> Result<SqlXmlReader, SqlHelperError> {
        let target = target.into();
        let mut parameters = self
            .positional_parameters(target, procedure_name, values)
            .await?;
        self.execute_xml_reader(
            target,
            CommandType::StoredProcedure,
            procedure_name,
            &mut parameters,
        )
        .await
    }

    /// # Errors
    /// As [`execute_xml_reader`](Self::execute_xml_reader) and
    /// [`execute_non_query_typed_params`](Self::execute_non_query_typed_params).
    pub async fn execute_xml_reader_typed_params<'a, R: FieldSource + ?Sized>(
        &self,
        target: impl Into<Target<'a>>,
        procedure_name: &str,
        record: &R,
    ) -> Result<SqlXmlReader, SqlHelperError> {
        let target = target.into();
        let mut parameters = self
            .record_parameters(target, procedure_name, record)
            .await?;
        self.execute_xml_reader(
            target,
            CommandType::StoredProcedure,
            procedure_name,
            &mut parameters,
        )
        .await
    }
}
