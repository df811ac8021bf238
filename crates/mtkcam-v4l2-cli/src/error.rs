// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use std::fmt;
use std::process::ExitCode;

/// CLI-specific error type with exit code mapping
#[derive(Debug)]
pub enum CliError {
    /// Invalid command-line arguments
    InvalidArgs(String),
    /// Media or video device not found or inaccessible
    DeviceNotFound(String),
    /// libmtkcam_v4l2.so could not be loaded
    LibraryUnavailable(String),
    /// Media graph or pipeline construction failed
    Pipeline(String),
    /// A frame cycle failed while streaming
    Stream(String),
    /// General error from the pipeline library
    General(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::InvalidArgs(msg) => write!(f, "Invalid arguments: {}", msg),
            CliError::DeviceNotFound(msg) => write!(f, "Device not found: {}", msg),
            CliError::LibraryUnavailable(msg) => write!(f, "Library unavailable: {}", msg),
            CliError::Pipeline(msg) => write!(f, "Pipeline error: {}", msg),
            CliError::Stream(msg) => write!(f, "Stream error: {}", msg),
            CliError::General(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for CliError {}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> ExitCode {
        match self {
            CliError::InvalidArgs(_) => ExitCode::from(2),
            CliError::DeviceNotFound(_) => ExitCode::from(3),
            CliError::LibraryUnavailable(_) => ExitCode::from(4),
            CliError::Pipeline(_) => ExitCode::from(5),
            CliError::Stream(_) => ExitCode::from(6),
            CliError::General(_) => ExitCode::from(1),
        }
    }
}

/// Map mtkcam_v4l2::Error to CliError with appropriate exit codes
impl From<mtkcam_v4l2::Error> for CliError {
    fn from(err: mtkcam_v4l2::Error) -> Self {
        use mtkcam_v4l2::Error;

        match err {
            Error::LibraryNotLoaded(lib_err) => {
                CliError::LibraryUnavailable(format!("Failed to load library: {}", lib_err))
            }

            Error::Io(io_err) => match io_err.kind() {
                std::io::ErrorKind::NotFound => {
                    CliError::DeviceNotFound(format!("Device not found: {}", io_err))
                }
                std::io::ErrorKind::PermissionDenied => {
                    CliError::DeviceNotFound(format!("Permission denied: {}", io_err))
                }
                _ => CliError::General(format!("I/O error: {}", io_err)),
            },

            // Requests the tables cannot satisfy
            Error::UnknownPipeline(_)
            | Error::InvalidSensor(_)
            | Error::UnsupportedFormat(_)
            | Error::UnsupportedColorProfile(_)
            | Error::UnsupportedTransform(_) => CliError::InvalidArgs(err.to_string()),

            Error::MediaGraph(_)
            | Error::PipelineMismatch { .. }
            | Error::NotBuilt
            | Error::AlreadyBuilt => CliError::Pipeline(err.to_string()),

            Error::InvalidState { .. }
            | Error::BufferSetupFailed(_)
            | Error::NoBufferAvailable
            | Error::BufferNotFound
            | Error::BufferInUse(_)
            | Error::EnqueueFailed(_)
            | Error::RecordNotFound
            | Error::InvalidCaller(_) => CliError::Stream(err.to_string()),

            Error::CString(_)
            | Error::TryFromInt(_)
            | Error::NullPointer
            | Error::DestinationNotEmpty => CliError::General(err.to_string()),
        }
    }
}

/// Helper function to convert result to exit code
pub fn result_to_exit_code<T>(result: Result<T, CliError>) -> ExitCode {
    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            e.exit_code()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mtkcam_v4l2::pipe_mgr::PipeTag;

    #[test]
    fn test_exit_codes() {
        assert_eq!(
            CliError::InvalidArgs("test".into()).exit_code(),
            ExitCode::from(2)
        );
        assert_eq!(
            CliError::DeviceNotFound("test".into()).exit_code(),
            ExitCode::from(3)
        );
        assert_eq!(
            CliError::LibraryUnavailable("test".into()).exit_code(),
            ExitCode::from(4)
        );
        assert_eq!(
            CliError::Pipeline("test".into()).exit_code(),
            ExitCode::from(5)
        );
        assert_eq!(
            CliError::Stream("test".into()).exit_code(),
            ExitCode::from(6)
        );
        assert_eq!(
            CliError::General("test".into()).exit_code(),
            ExitCode::from(1)
        );
    }

    #[test]
    fn test_library_error_mapping() {
        let err: CliError = mtkcam_v4l2::Error::UnknownPipeline(PipeTag::Unknown).into();
        assert!(matches!(err, CliError::InvalidArgs(_)));

        let err: CliError = mtkcam_v4l2::Error::RecordNotFound.into();
        assert!(matches!(err, CliError::Stream(_)));

        let err: CliError = mtkcam_v4l2::Error::MediaGraph("open".into()).into();
        assert!(matches!(err, CliError::Pipeline(_)));

        let io = std::io::Error::from_raw_os_error(2);
        let err: CliError = mtkcam_v4l2::Error::Io(io).into();
        assert!(matches!(err, CliError::DeviceNotFound(_)));
    }

    #[test]
    fn test_error_display() {
        let err = CliError::DeviceNotFound("mtk-cam-p1".to_string());
        assert_eq!(format!("{}", err), "Device not found: mtk-cam-p1");
    }
}
