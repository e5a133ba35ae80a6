//! Generic `Camera` trait for locally attached image sources, plus a
//! directory-replay implementation.

use std::fs;
use std::path::{Path, PathBuf};

use rover_types::RoverError;

/// One JPEG-encoded frame captured by a local camera.
#[derive(Debug, Clone)]
pub struct CameraFrame {
    pub jpeg: Vec<u8>,
    /// Monotonic capture counter, starting at 0.
    pub sequence: u64,
}

/// A locally attached camera or frame source.
///
/// Drivers are polled by the device ingestion producer from a blocking
/// thread, so `capture` may block for up to one frame interval.
pub trait Camera: Send {
    /// Stable identifier, e.g. `"front"`.
    fn id(&self) -> &str;

    /// Capture and return the next frame.
    ///
    /// # Errors
    ///
    /// Returns [`RoverError::Transport`] when the device cannot deliver a
    /// frame (disconnected, unreadable).
    fn capture(&mut self) -> Result<CameraFrame, RoverError>;
}

/// Replays the `.jpg` / `.jpeg` files of a directory in name order, looping
/// forever.  Used for bench testing without a camera.
pub struct ReplayCamera {
    id: String,
    files: Vec<PathBuf>,
    next: usize,
    sequence: u64,
}

impl ReplayCamera {
    /// # Errors
    ///
    /// Returns [`RoverError::Config`] if `dir` is unreadable or holds no JPEG
    /// files.
    pub fn open(id: &str, dir: &Path) -> Result<Self, RoverError> {
        let entries = fs::read_dir(dir).map_err(|e| {
            RoverError::Config(format!("cannot read replay directory {}: {e}", dir.display()))
        })?;
        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| is_jpeg_path(path))
            .collect();
        if files.is_empty() {
            return Err(RoverError::Config(format!(
                "no JPEG files in replay directory {}",
                dir.display()
            )));
        }
        files.sort();
        Ok(Self {
            id: id.to_string(),
            files,
            next: 0,
            sequence: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl Camera for ReplayCamera {
    fn id(&self) -> &str {
        &self.id
    }

    fn capture(&mut self) -> Result<CameraFrame, RoverError> {
        let path = &self.files[self.next];
        let jpeg = fs::read(path).map_err(|e| RoverError::Transport {
            component: self.id.clone(),
            details: format!("{}: {e}", path.display()),
        })?;
        self.next = (self.next + 1) % self.files.len();
        let frame = CameraFrame {
            jpeg,
            sequence: self.sequence,
        };
        self.sequence += 1;
        Ok(frame)
    }
}

fn is_jpeg_path(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replays_files_in_order_and_loops() {
        let dir = tempfile::tempdir().expect("tmp dir");
        fs::write(dir.path().join("b.jpg"), [0xFF, 0xD8, 2, 0xFF, 0xD9]).unwrap();
        fs::write(dir.path().join("a.JPEG"), [0xFF, 0xD8, 1, 0xFF, 0xD9]).unwrap();
        fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let mut cam = ReplayCamera::open("bench", dir.path()).unwrap();
        assert_eq!(cam.id(), "bench");
        assert_eq!(cam.len(), 2);

        let tags: Vec<u8> = (0..3).map(|_| cam.capture().unwrap().jpeg[2]).collect();
        assert_eq!(tags, vec![1, 2, 1]);
    }

    #[test]
    fn sequence_increments() {
        let dir = tempfile::tempdir().expect("tmp dir");
        fs::write(dir.path().join("f.jpg"), [0xFF, 0xD8, 0xFF, 0xD9]).unwrap();
        let mut cam = ReplayCamera::open("bench", dir.path()).unwrap();
        assert_eq!(cam.capture().unwrap().sequence, 0);
        assert_eq!(cam.capture().unwrap().sequence, 1);
    }

    #[test]
    fn empty_directory_is_rejected() {
        let dir = tempfile::tempdir().expect("tmp dir");
        assert!(matches!(
            ReplayCamera::open("bench", dir.path()),
            Err(RoverError::Config(_))
        ));
    }

    #[test]
    fn vanished_file_is_a_transport_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("f.jpg");
        fs::write(&path, [0xFF, 0xD8, 0xFF, 0xD9]).unwrap();
        let mut cam = ReplayCamera::open("bench", dir.path()).unwrap();
        fs::remove_file(&path).unwrap();
        assert!(matches!(cam.capture(), Err(RoverError::Transport { .. })));
    }
}
