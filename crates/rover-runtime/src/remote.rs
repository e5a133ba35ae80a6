//! Shared HTTP plumbing for the remote perception collaborators.
//!
//! Both the detector and the navigator upload one JPEG frame as the
//! multipart field `file` and read back a JSON body.

use reqwest::multipart::{Form, Part};
use rover_types::RoverError;
use thiserror::Error;

/// Errors from a remote perception call.
#[derive(Error, Debug)]
pub enum RemoteError {
    /// The HTTP request failed, timed out, or returned an error status.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// The response body did not have the expected shape.
    #[error("Unexpected response format: {0}")]
    BadResponse(String),
    /// No endpoint URL is configured.
    #[error("no endpoint configured")]
    NotConfigured,
}

impl RemoteError {
    /// Lift into the workspace error, tagged with the collaborator name.
    pub fn into_rover(self, component: &str) -> RoverError {
        RoverError::Transport {
            component: component.to_string(),
            details: self.to_string(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RemoteError::Http(e) if e.is_timeout())
    }
}

/// Multipart form carrying `frame` as `file` (`frame.jpg`, `image/jpeg`).
pub fn frame_form(frame: &[u8]) -> Result<Form, RemoteError> {
    let part = Part::bytes(frame.to_vec())
        .file_name("frame.jpg")
        .mime_str("image/jpeg")?;
    Ok(Form::new().part("file", part))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_error_maps_to_transport() {
        let err = RemoteError::BadResponse("missing result".into()).into_rover("navigator");
        match err {
            RoverError::Transport { component, details } => {
                assert_eq!(component, "navigator");
                assert!(details.contains("missing result"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn frame_form_builds() {
        assert!(frame_form(&[0xFF, 0xD8, 0xFF, 0xD9]).is_ok());
        assert!(!RemoteError::NotConfigured.is_timeout());
    }
}
