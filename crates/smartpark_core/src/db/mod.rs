//! Keyspace bootstrap and schema declarations.
//!
//! # Responsibility
//! - Declare the structured types and tables a keyspace needs.
//! - Bring a keyspace to a ready binding before any entity query runs.
//!
//! # Invariants
//! - Structured types are declared before the version marker is written.
//! - Every bootstrap failure names the phase it happened in.
//!
//! # See also
//! - `store` for the table-store contract the bootstrapper drives.

use crate::store::StoreError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod bootstrap;
pub mod schema;

pub use bootstrap::ConnectionBootstrapper;

/// Bootstrap phase, as reported in logs and error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapPhase {
    VersionCheck,
    UdtLoad,
    OpenConnection,
}

impl BootstrapPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::VersionCheck => "dbVersionCheck",
            Self::UdtLoad => "udtLoad",
            Self::OpenConnection => "openConnection",
        }
    }
}

impl Display for BootstrapPhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type ConnectResult<T> = Result<T, ConnectError>;

#[derive(Debug)]
pub enum ConnectError {
    /// Transport, open or timeout failure.
    Connection {
        phase: BootstrapPhase,
        source: StoreError,
    },
    /// Structured type or version marker write failure.
    Bootstrap {
        phase: BootstrapPhase,
        source: StoreError,
    },
}

impl ConnectError {
    pub fn phase(&self) -> BootstrapPhase {
        match self {
            Self::Connection { phase, .. } | Self::Bootstrap { phase, .. } => *phase,
        }
    }

    pub fn store_error(&self) -> &StoreError {
        match self {
            Self::Connection { source, .. } | Self::Bootstrap { source, .. } => source,
        }
    }

    /// Timeouts may succeed on retry; everything else is reported as final.
    pub fn is_retryable(&self) -> bool {
        self.store_error().is_timeout()
    }
}

impl Display for ConnectError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connection { phase, source } => {
                write!(f, "connection failed during {phase}: {source}")
            }
            Self::Bootstrap { phase, source } => {
                write!(f, "bootstrap failed during {phase}: {source}")
            }
        }
    }
}

impl Error for ConnectError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(self.store_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn phases_use_wire_names() {
        assert_eq!(BootstrapPhase::VersionCheck.to_string(), "dbVersionCheck");
        assert_eq!(BootstrapPhase::UdtLoad.to_string(), "udtLoad");
        assert_eq!(BootstrapPhase::OpenConnection.to_string(), "openConnection");
    }

    #[test]
    fn only_timeouts_are_retryable() {
        let timeout = ConnectError::Connection {
            phase: BootstrapPhase::VersionCheck,
            source: StoreError::Timeout {
                operation: "version.find".to_string(),
                after: Duration::from_millis(10),
            },
        };
        assert!(timeout.is_retryable());
        assert!(timeout.to_string().contains("dbVersionCheck"));

        let udt = ConnectError::Bootstrap {
            phase: BootstrapPhase::UdtLoad,
            source: StoreError::Injected("boom".to_string()),
        };
        assert!(!udt.is_retryable());
        assert_eq!(udt.phase(), BootstrapPhase::UdtLoad);
    }
}
