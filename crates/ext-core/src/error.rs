use std::fmt;

/// Errors that can occur while installing or uninstalling extensions.
///
/// Errors are `Clone` because a single task outcome is observed by every
/// caller that was deduplicated onto that task.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Manifest missing, unreadable or invalid.
    #[error("invalid extension '{extension}': {reason}")]
    Validation { extension: String, reason: String },

    /// The catalog reported the extension as malicious.
    #[error("can't install '{0}' extension since it was reported to be problematic")]
    Malicious(String),

    /// No version of the extension fits the host.
    #[error(
        "can't install '{extension}' extension because it is not compatible with the current host version {host_version}"
    )]
    Incompatible {
        extension: String,
        host_version: String,
    },

    /// Downloading the extension archive failed.
    #[error("failed to download '{extension}': {reason}")]
    Download { extension: String, reason: String },

    /// Files of the extension are still in use and cannot be replaced.
    #[error("unable to install '{0}': please restart the host before reinstalling")]
    RestartRequired(String),

    /// Other installed extensions depend on the extension being removed.
    #[error("{}", dependents_message(.extension, .included.as_deref(), .dependents))]
    Dependents {
        /// Display name of the extension the caller asked to uninstall.
        extension: String,
        /// Display name of the pack member that is blocked, when it is not
        /// the requested extension itself.
        included: Option<String>,
        /// Display names of the blocking dependents.
        dependents: Vec<String>,
    },

    /// The extension is not installed.
    #[error("extension '{0}' is not installed")]
    NotInstalled(String),

    /// The extension could not be found on disk or in the catalog.
    #[error("could not find extension '{0}'")]
    NotFound(String),

    /// The operation was cancelled before it finished.
    #[error("installation of '{0}' was cancelled")]
    Cancelled(String),

    /// The catalog is not enabled.
    #[error("the extension catalog is not enabled")]
    CatalogDisabled,

    /// A store or filesystem operation failed.
    #[error("{0}")]
    Local(String),

    /// Several operations failed; messages are joined in order.
    #[error("{message}")]
    Multiple { code: ErrorCode, message: String },

    /// Anything that cannot be classified.
    #[error("{0}")]
    Unknown(String),
}

/// Stable classification of an [`Error`], used by telemetry and by
/// uninstall notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Validating,
    Malicious,
    Incompatible,
    Downloading,
    RestartRequired,
    Dependents,
    NotInstalled,
    NotFound,
    Cancelled,
    CatalogDisabled,
    Local,
    Unknown,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validating => "validating",
            Self::Malicious => "malicious",
            Self::Incompatible => "incompatible",
            Self::Downloading => "downloading",
            Self::RestartRequired => "restartRequired",
            Self::Dependents => "dependents",
            Self::NotInstalled => "notInstalled",
            Self::NotFound => "notFound",
            Self::Cancelled => "cancelled",
            Self::CatalogDisabled => "catalogDisabled",
            Self::Local => "local",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    pub fn validation(extension: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Validation {
            extension: extension.into(),
            reason: reason.to_string(),
        }
    }

    pub fn download(extension: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Download {
            extension: extension.into(),
            reason: reason.to_string(),
        }
    }

    pub fn local(message: impl fmt::Display) -> Self {
        Self::Local(message.to_string())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation { .. } => ErrorCode::Validating,
            Self::Malicious(_) => ErrorCode::Malicious,
            Self::Incompatible { .. } => ErrorCode::Incompatible,
            Self::Download { .. } => ErrorCode::Downloading,
            Self::RestartRequired(_) => ErrorCode::RestartRequired,
            Self::Dependents { .. } => ErrorCode::Dependents,
            Self::NotInstalled(_) => ErrorCode::NotInstalled,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Cancelled(_) => ErrorCode::Cancelled,
            Self::CatalogDisabled => ErrorCode::CatalogDisabled,
            Self::Local(_) => ErrorCode::Local,
            Self::Multiple { code, .. } => *code,
            Self::Unknown(_) => ErrorCode::Unknown,
        }
    }

    /// Combine the failures of one wave or cascade into a single error.
    ///
    /// A single error is returned unchanged. Several errors are merged into
    /// [`Error::Multiple`] with their messages joined by `,` and tagged with
    /// the first classified code, or [`ErrorCode::Unknown`] when none is.
    pub fn join(mut errors: Vec<Error>) -> Error {
        match errors.len() {
            0 => Error::Unknown("unknown error".to_string()),
            1 => errors.remove(0),
            _ => {
                let code = errors
                    .iter()
                    .map(Error::code)
                    .find(|code| *code != ErrorCode::Unknown)
                    .unwrap_or(ErrorCode::Unknown);
                let message = errors
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(",");
                Error::Multiple { code, message }
            }
        }
    }
}

fn dependents_message(extension: &str, included: Option<&str>, dependents: &[String]) -> String {
    let first = dependents.first().map(String::as_str).unwrap_or_default();
    let second = dependents.get(1).map(String::as_str).unwrap_or_default();
    match (included, dependents.len()) {
        (None, 1) => format!(
            "Cannot uninstall '{extension}' extension. '{first}' extension depends on this."
        ),
        (None, 2) => format!(
            "Cannot uninstall '{extension}' extension. '{first}' and '{second}' extensions depend on this."
        ),
        (None, _) => format!(
            "Cannot uninstall '{extension}' extension. '{first}', '{second}' and others depend on this."
        ),
        (Some(included), 1) => format!(
            "Cannot uninstall '{extension}' extension. It includes uninstalling '{included}' extension and '{first}' extension depends on this."
        ),
        (Some(included), 2) => format!(
            "Cannot uninstall '{extension}' extension. It includes uninstalling '{included}' extension and '{first}' and '{second}' extensions depend on this."
        ),
        (Some(included), _) => format!(
            "Cannot uninstall '{extension}' extension. It includes uninstalling '{included}' extension and '{first}', '{second}' and others depend on this."
        ),
    }
}

pub type Result<T> = std::result::Result<T, Error>;
