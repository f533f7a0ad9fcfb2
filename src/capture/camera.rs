//! Single-shot camera commands
//!
//! Photo capture, preview-frame capture and detection each run the capture
//! tool to completion. For the file-producing commands the existence of the
//! output file after exit is the only success signal; the exit code is logged
//! but not trusted.

use std::future::Future;
use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

use crate::error::{CaptureError, Result};

/// A camera detected by the capture tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraInfo {
    /// Camera model, e.g. "Canon"
    pub model: String,
    /// Port the camera is attached to, e.g. "usb:001,004"
    pub port: String,
}

/// Single-shot camera operations
///
/// Implemented by [`ToolCamera`] for real hardware; tests substitute fakes.
pub trait Camera: Send + Sync + 'static {
    /// List attached cameras
    fn detect(&self) -> impl Future<Output = Result<Vec<CameraInfo>>> + Send;

    /// Capture a full-resolution photo into `dest`
    fn capture_image(&self, dest: &Path) -> impl Future<Output = Result<()>> + Send;

    /// Capture a low-resolution preview frame into `dest`
    fn capture_preview(&self, dest: &Path) -> impl Future<Output = Result<()>> + Send;
}

/// Camera driven by an external command-line tool (gphoto2-compatible)
#[derive(Debug, Clone)]
pub struct ToolCamera {
    program: String,
}

impl ToolCamera {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(CaptureError::Spawn)?;

        if !output.status.success() {
            tracing::debug!(
                program = %self.program,
                args = ?args,
                status = %output.status,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "Capture tool exited with failure"
            );
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn run_to_file(&self, args: &[&str], dest: &Path) -> Result<()> {
        self.run(args).await?;
        ensure_output(dest).await
    }
}

impl Default for ToolCamera {
    fn default() -> Self {
        Self::new("gphoto2")
    }
}

impl Camera for ToolCamera {
    async fn detect(&self) -> Result<Vec<CameraInfo>> {
        let listing = self.run(&["--auto-detect"]).await?;
        Ok(parse_auto_detect(&listing))
    }

    async fn capture_image(&self, dest: &Path) -> Result<()> {
        let path = dest.to_string_lossy().into_owned();
        self.run_to_file(
            &[
                "--capture-image-and-download",
                "--filename",
                path.as_str(),
                "--skip-existing",
            ],
            dest,
        )
        .await
    }

    async fn capture_preview(&self, dest: &Path) -> Result<()> {
        let path = dest.to_string_lossy().into_owned();
        self.run_to_file(
            &["--capture-preview", "--force-overwrite", "--filename", path.as_str()],
            dest,
        )
        .await
    }
}

/// Fail with [`CaptureError::NoOutput`] unless `path` exists and is non-empty
pub async fn ensure_output(path: &Path) -> Result<()> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(()),
        _ => Err(CaptureError::NoOutput(path.display().to_string()).into()),
    }
}

/// Parse `--auto-detect` output
///
/// ```text
/// Model                          Port
/// ----------------------------------------------------------
/// Canon EOS 600D                 usb:001,004
/// ```
///
/// The first two lines are headers. Remaining lines are split on runs of
/// whitespace; the first token is the model and the last is the port.
pub fn parse_auto_detect(listing: &str) -> Vec<CameraInfo> {
    listing
        .lines()
        .skip(2)
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 2 {
                return None;
            }
            Some(CameraInfo {
                model: parts[0].to_string(),
                port: parts[parts.len() - 1].to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_auto_detect() {
        let listing = "Model                          Port\n\
                       ----------------------------------------------------------\n\
                       Canon EOS 600D                 usb:001,004\n\
                       \n\
                       Nikon DSC D3200                usb:001,007\n";

        let cameras = parse_auto_detect(listing);
        assert_eq!(cameras.len(), 2);
        assert_eq!(cameras[0].model, "Canon");
        assert_eq!(cameras[0].port, "usb:001,004");
        assert_eq!(cameras[1].model, "Nikon");
        assert_eq!(cameras[1].port, "usb:001,007");
    }

    #[test]
    fn test_parse_auto_detect_no_cameras() {
        let listing = "Model                          Port\n\
                       ----------------------------------------------------------\n";
        assert!(parse_auto_detect(listing).is_empty());
        assert!(parse_auto_detect("").is_empty());
    }

    #[tokio::test]
    async fn test_ensure_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.jpg");

        let missing = ensure_output(&path).await.unwrap_err();
        assert_eq!(missing.code(), "photo_not_created");

        tokio::fs::write(&path, b"").await.unwrap();
        assert!(ensure_output(&path).await.is_err());

        tokio::fs::write(&path, [0xFF, 0xD8, 0xFF, 0xD9]).await.unwrap();
        assert!(ensure_output(&path).await.is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_tool_camera_without_output_file() {
        let dir = tempfile::tempdir().unwrap();
        let camera = ToolCamera::new("true");

        let err = camera
            .capture_image(&dir.path().join("photo_1.jpg"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "photo_not_created");
    }

    #[tokio::test]
    async fn test_tool_camera_missing_program() {
        let camera = ToolCamera::new("/nonexistent/capture-tool-xyz");
        let err = camera.detect().await.unwrap_err();
        assert_eq!(err.code(), "spawn_failed");
    }
}
