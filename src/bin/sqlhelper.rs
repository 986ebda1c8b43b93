use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use serde_json::{Value as JsonValue, json};
use sql_helper::config::redact_connection_string;
use sql_helper::prelude::*;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    NonQuery,
    Dataset,
    Reader,
    Scalar,
    Xml,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Run a stored procedure or command text against SQL Server")]
struct Args {
    /// Procedure name or command text
    command: String,
    #[arg(long, value_enum, default_value = "scalar")]
    mode: Mode,
    #[arg(long, value_enum, default_value = "stored-procedure")]
    command_type: CommandType,
    /// Falls back to the `SQLConnection` environment variable
    #[arg(long)]
    connection_string: Option<String>,
    /// Positional procedure argument (`null`, numbers and booleans are parsed)
    #[arg(long = "arg")]
    args: Vec<String>,
    /// Named input parameter for command text, as `@name=value`
    #[arg(long = "param")]
    params: Vec<String>,
    /// Table names applied to dataset results in order
    #[arg(long = "table")]
    tables: Vec<String>,
    #[arg(long, default_value = "warn")]
    log_level: String,
}

fn parse_named(raw: &str) -> Result<SqlParameter, SqlHelperError> {
    let (name, value) = raw.split_once('=').ok_or_else(|| {
        SqlHelperError::InvalidArgument(format!("expected @name=value, got '{raw}'"))
    })?;
    Ok(SqlParameter::input(name.trim(), Some(DbValue::parse_literal(value))))
}

fn parameters_json(parameters: &[SqlParameter]) -> JsonValue {
    let map = parameters
        .iter()
        .filter(|p| p.direction.receives_value())
        .map(|p| (p.name.clone(), p.value_or_null().to_json()))
        .collect::<serde_json::Map<_, _>>();
    JsonValue::Object(map)
}

async fn run(args: Args) -> Result<JsonValue, SqlHelperError> {
    let connection_string = ConnectionSettings::new(args.connection_string).connection_string()?;
    debug!(connection = %redact_connection_string(&connection_string), "resolved connection");

    let helper = SqlHelper::new(Arc::new(MssqlDriver::new()));
    let target = connection_string.as_str();
    let positional = args
        .args
        .iter()
        .map(|raw| ParamArg::from(DbValue::parse_literal(raw)))
        .collect::<Vec<_>>();
    let mut parameters = args
        .params
        .iter()
        .map(|raw| parse_named(raw))
        .collect::<Result<Vec<_>, _>>()?;
    let use_positional =
        args.command_type == CommandType::StoredProcedure && parameters.is_empty();
    let command = args.command.as_str();

    let output = match args.mode {
        Mode::NonQuery => {
            let rows = if use_positional {
                helper.execute_non_query_sp(target, command, &positional).await?
            } else {
                helper
                    .execute_non_query(target, args.command_type, command, &mut parameters)
                    .await?
            };
            json!({ "rows_affected": rows, "parameters": parameters_json(&parameters) })
        }
        Mode::Scalar => {
            let value = if use_positional {
                helper.execute_scalar_sp(target, command, &positional).await?
            } else {
                helper
                    .execute_scalar(target, args.command_type, command, &mut parameters)
                    .await?
            };
            json!({ "value": value.to_json(), "parameters": parameters_json(&parameters) })
        }
        Mode::Dataset => {
            let names = args.tables.iter().map(String::as_str).collect::<Vec<_>>();
            let mut data_set = DataSet::new();
            if use_positional {
                helper
                    .fill_dataset_sp(target, command, &mut data_set, &names, &positional)
                    .await?;
            } else {
                helper
                    .fill_dataset(
                        target,
                        args.command_type,
                        command,
                        &mut data_set,
                        &names,
                        &mut parameters,
                    )
                    .await?;
            }
            json!({ "tables": data_set.to_json(), "parameters": parameters_json(&parameters) })
        }
        Mode::Reader => {
            let mut reader = if use_positional {
                helper.execute_reader_sp(target, command, &positional).await?
            } else {
                helper
                    .execute_reader(target, args.command_type, command, &mut parameters)
                    .await?
            };
            let table = reader.read_table("Table").await?;
            let parameters = reader.close().await?;
            json!({ "rows": table.to_json(), "parameters": parameters_json(&parameters) })
        }
        Mode::Xml => {
            let mut reader = if use_positional {
                helper.execute_xml_reader_sp(target, command, &positional).await?
            } else {
                helper
                    .execute_xml_reader(target, args.command_type, command, &mut parameters)
                    .await?
            };
            let xml = reader.read_to_string().await?;
            let parameters = reader.close().await?;
            json!({ "xml": xml, "parameters": parameters_json(&parameters) })
        }
    };
    Ok(output)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match run(args).await {
        Ok(output) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&output).unwrap_or_else(|_| output.to_string())
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e}");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
