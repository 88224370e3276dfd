use miette::Diagnostic;
use std::sync::Arc;
use thiserror::Error;
use volplane_core::VolumeError;

/// Registry error type
///
/// `Clone` so one failed initialization can be handed to every caller that
/// was waiting on it.
#[derive(Error, Debug, Diagnostic, Clone)]
pub enum RegistryError {
    /// Driver name registered twice
    #[error("Driver already registered: {name}")]
    #[diagnostic(
        code(volplane::registry::duplicate_driver),
        help("Each driver name may be registered once. The first registration stays in effect; rename or remove the second backend")
    )]
    DuplicateDriver {
        #[allow(unused)]
        name: String,
    },

    /// No driver with this name was registered
    #[error("Driver not registered: {name}")]
    #[diagnostic(
        code(volplane::registry::driver_not_registered),
        help("Use `registered()` to list the available drivers and check the spelling of the name")
    )]
    DriverNotRegistered {
        #[allow(unused)]
        name: String,
    },

    /// Driver is registered but has not been initialized
    #[error("Driver not initialized: {name}")]
    #[diagnostic(
        code(volplane::registry::driver_not_initialized),
        help("Resolve the driver with `get()` and its init parameters first")
    )]
    DriverNotInitialized {
        #[allow(unused)]
        name: String,
    },

    /// Driver initializer returned an error
    #[error("Driver '{name}' failed to initialize: {source}")]
    #[diagnostic(
        code(volplane::registry::init_failed),
        help("Initialization errors are not cached. Fix the cause and call `get()` again")
    )]
    InitFailed {
        #[allow(unused)]
        name: String,
        #[source]
        source: Arc<VolumeError>,
    },

    /// Registry was shut down
    #[error("Driver registry is shut down")]
    #[diagnostic(
        code(volplane::registry::closed),
        help("The process is tearing down and no longer resolves drivers")
    )]
    RegistryClosed,
}

/// Result type alias for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;

impl RegistryError {
    pub fn duplicate_driver(name: impl Into<String>) -> Self {
        Self::DuplicateDriver { name: name.into() }
    }

    pub fn driver_not_registered(name: impl Into<String>) -> Self {
        Self::DriverNotRegistered { name: name.into() }
    }

    pub fn driver_not_initialized(name: impl Into<String>) -> Self {
        Self::DriverNotInitialized { name: name.into() }
    }

    pub fn init_failed(name: impl Into<String>, source: VolumeError) -> Self {
        Self::InitFailed {
            name: name.into(),
            source: Arc::new(source),
        }
    }

    /// The underlying driver error, if initialization failed
    pub fn init_error(&self) -> Option<&VolumeError> {
        match self {
            Self::InitFailed { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_failed_keeps_cause() {
        let err = RegistryError::init_failed(
            "nfs",
            VolumeError::invalid_config("missing uri", "set uri"),
        );
        assert!(err.to_string().contains("nfs"));
        assert!(err.to_string().contains("missing uri"));
        assert!(matches!(
            err.clone().init_error(),
            Some(VolumeError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_duplicate_names_driver() {
        let err = RegistryError::duplicate_driver("nfs");
        assert_eq!(err.to_string(), "Driver already registered: nfs");
        assert!(err.init_error().is_none());
    }
}
