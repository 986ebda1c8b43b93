use std::fmt::Write;

use tiberius::Config as TiberiusConfig;

use crate::error::SqlHelperError;

/// Parse an ADO.NET style connection string (`Server=...;Database=...;User Id=...`).
///
/// # Errors
/// Returns `SqlHelperError::ConfigError` if tiberius rejects the string.
pub fn parse_connection_string(connection_string: &str) -> Result<TiberiusConfig, SqlHelperError> {
    TiberiusConfig::from_ado_string(connection_string)
        .map_err(|e| SqlHelperError::ConfigError(format!("invalid SQL Server connection string: {e}")))
}

/// Connection settings for SQL Server, rendered to the connection string the helper keys on.
#[derive(Debug, Clone)]
pub struct MssqlOptions {
    pub server: String,
    pub database: String,
    pub user: String,
    pub password: String,
    pub port: Option<u16>,
    pub instance_name: Option<String>,
    pub trust_cert: bool,
}

impl MssqlOptions {
    #[must_use]
    pub fn new(server: String, database: String, user: String, password: String) -> Self {
        Self {
            server,
            database,
            user,
            password,
            port: None,
            instance_name: None,
            trust_cert: false,
        }
    }

    #[must_use]
    pub fn with_port(mut self, port: Option<u16>) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_instance_name(mut self, instance_name: Option<String>) -> Self {
        self.instance_name = instance_name;
        self
    }

    /// The ADO.NET connection string for these options.
    #[must_use]
    pub fn to_connection_string(&self) -> String {
        let mut server = format!("tcp:{}", self.server);
        if let Some(instance) = &self.instance_name {
            let _ = write!(server, "\\{instance}");
        }
        if let Some(port) = self.port {
            let _ = write!(server, ",{port}");
        }
        let mut cs = format!(
            "Server={server};Database={};User Id={};Password={}",
            self.database,
            escape(&self.user),
            escape(&self.password)
        );
        if self.trust_cert {
            cs.push_str(";TrustServerCertificate=true");
        }
        cs
    }
}

/// Fluent builder for MSSQL options.
#[derive(Debug, Clone)]
pub struct MssqlOptionsBuilder {
    opts: MssqlOptions,
}

impl MssqlOptionsBuilder {
    #[must_use]
    pub fn new(server: String, database: String, user: String, password: String) -> Self {
        Self {
            opts: MssqlOptions::new(server, database, user, password),
        }
    }

    #[must_use]
    pub fn port(mut self, port: Option<u16>) -> Self {
        self.opts.port = port;
        self
    }

    #[must_use]
    pub fn instance_name(mut self, instance_name: Option<String>) -> Self {
        self.opts.instance_name = instance_name;
        self
    }

    /// Accept the server certificate without validation. Development only.
    #[must_use]
    pub fn trust_cert(mut self, trust: bool) -> Self {
        self.opts.trust_cert = trust;
        self
    }

    #[must_use]
    pub fn finish(self) -> MssqlOptions {
        self.opts
    }
}

// Values containing a separator or quote must be quoted, with embedded quotes doubled.
fn escape(value: &str) -> String {
    if value.contains([';', '\'', '"']) || value.starts_with(' ') || value.ends_with(' ') {
        format!("'{}'", value.replace('\'', "''"))
    } else {
        value.to_string()
    }
}
