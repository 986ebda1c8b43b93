use super::SqlHelper;
use crate::backend::Command;
use crate::cache::FieldSource;
use crate::error::SqlHelperError;
use crate::parameter::{ParamArg, SqlParameter};
use crate::results::{DataSet, default_table_name};
use crate::target::Target;
use crate::types::CommandType;

impl SqlHelper {
    /// Execute a command and materialize every result set.
    ///
    /// Tables are named `Table`, `Table1`, `Table2`, ... in the order the server returned them.
    ///
    /// # Errors
    /// Same as [`execute_non_query`](Self::execute_non_query).
    pub async fn execute_dataset<'a>(
        &self,
        target: impl Into<Target<'a>>,
        command_type: CommandType,
        command_text: &str,
        parameters: &mut [SqlParameter],
    ) -> Result<DataSet, SqlHelperError> {
        let mut data_set = DataSet::new();
        self.fill_dataset(
            target,
            command_type,
            command_text,
            &mut data_set,
            &[],
            parameters,
        )
        .await?;
        Ok(data_set)
    }

    /// Execute a stored procedure with positional values into a new data set.
    ///
    /// # Errors
    /// As [`execute_non_query_sp`](Self::execute_non_query_sp).
    pub async fn execute_dataset_sp<'a>(
        &self,
        target: impl Into<Target<'a>>,
        procedure_name: &str,
        values: &[ParamArg],
    ) -> Result<DataSet, SqlHelperError> {
        let target = target.into();
        let mut parameters = self
            .positional_parameters(target, procedure_name, values)
            .await?;
        self.execute_dataset(
            target,
            CommandType::StoredProcedure,
            procedure_name,
            &mut parameters,
        )
        .await
    }

    /// Execute a stored procedure bound from a record into a new data set.
    ///
    /// # Errors
    /// As [`execute_non_query_typed_params`](Self::execute_non_query_typed_params).
    pub async fn execute_dataset_typed_params<'a, R: FieldSource + ?Sized>(
        &self,
        target: impl Into<Target<'a>>,
        procedure_name: &str,
        record: &R,
    ) -> Result<DataSet, SqlHelperError> {
        let target = target.into();
        let mut parameters = self
            .record_parameters(target, procedure_name, record)
            .await?;
        self.execute_dataset(
            target,
            CommandType::StoredProcedure,
            procedure_name,
            &mut parameters,
        )
        .await
    }

    /// Execute a command and add its result sets to `data_set`.
    ///
    /// The first `table_names.len()` result sets are named from `table_names` in order; the rest
    /// keep their generated names. A result set whose name already exists in `data_set` with the
    /// same columns has its rows appended to that table.
    ///
    /// # Errors
    /// `SqlHelperError::InvalidArgument` if any table name is empty, checked before the command
    /// runs; otherwise as [`execute_non_query`](Self::execute_non_query).
    pub async fn fill_dataset<'a>(
        &self,
        target: impl Into<Target<'a>>,
        command_type: CommandType,
        command_text: &str,
        data_set: &mut DataSet,
        table_names: &[&str],
        parameters: &mut [SqlParameter],
    ) -> Result<(), SqlHelperError> {
        validate_table_names(table_names)?;
        let prepared = self
            .prepare(target.into(), command_text, parameters)
            .await?;
        let mut command = Command::new(command_type, command_text, parameters);
        let outcome = prepared.connection.fill(&mut command).await;
        let tables = prepared.finish(outcome).await?;

        for (index, mut table) in tables.into_iter().enumerate() {
            table.name = table_names
                .get(index)
                .map_or_else(|| default_table_name(index), |name| (*name).to_string());
            data_set.add_or_merge(table);
        }
        Ok(())
    }

    /// Execute a stored procedure with positional values and add its result sets to `data_set`.
    ///
    /// # Errors
    /// As [`fill_dataset`](Self::fill_dataset) and
    /// [`execute_non_query_sp`](Self::execute_non_query_sp).
    pub async fn fill_dataset_sp<'a>(
        &self,
        target: impl Into<Target<'a>>,
        procedure_name: &str,
        data_set: &mut DataSet,
        table_names: &[&str],
        values: &[ParamArg],
    ) -> Result<(), SqlHelperError> {
        validate_table_names(table_names)?;
        let target = target.into();
        let mut parameters = self
            .positional_parameters(target, procedure_name, values)
            .await?;
        self.fill_dataset(
            target,
            CommandType::StoredProcedure,
            procedure_name,
            data_set,
            table_names,
            &mut parameters,
        )
        .await
    }
}

fn validate_table_names(table_names: &[&str]) -> Result<(), SqlHelperError> {
    if table_names.iter().any(|name| name.is_empty()) {
        return Err(SqlHelperError::InvalidArgument(
            "The table names must contain a list of tables, a value was provided as an empty string."
                .into(),
        ));
    }
    Ok(())
}
