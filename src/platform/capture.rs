//! Screen capture by shelling out to the OS screenshot tools.

use async_trait::async_trait;
use tracing::debug;

use super::command;
use crate::error::CaptureError;
use crate::eyes::ScreenCapturer;

/// One screenshot tool invocation. `{out}` is replaced with the target file.
#[derive(Debug, Clone)]
struct CaptureCommand {
    program: &'static str,
    args: &'static [&'static str],
}

const SCREENCAPTURE: CaptureCommand = CaptureCommand {
    program: "screencapture",
    args: &["-C", "-x", "{out}"],
};

const COPY_FROM_SCREEN: &str = "Add-Type -AssemblyName System.Windows.Forms,System.Drawing; \
$b = [System.Windows.Forms.SystemInformation]::VirtualScreen; \
$bmp = New-Object System.Drawing.Bitmap $b.Width, $b.Height; \
$g = [System.Drawing.Graphics]::FromImage($bmp); \
$g.CopyFromScreen($b.Left, $b.Top, 0, 0, $bmp.Size); \
$bmp.Save('{out}', [System.Drawing.Imaging.ImageFormat]::Png)";

const POWERSHELL: CaptureCommand = CaptureCommand {
    program: "powershell",
    args: &["-NoProfile", "-ExecutionPolicy", "Bypass", "-Command", COPY_FROM_SCREEN],
};

const GRIM: CaptureCommand = CaptureCommand {
    program: "grim",
    args: &["{out}"],
};

const IMPORT: CaptureCommand = CaptureCommand {
    program: "import",
    args: &["-window", "root", "{out}"],
};

/// Tries each tool in order and returns the first image produced.
#[derive(Debug, Clone)]
pub struct CommandCapturer {
    commands: Vec<CaptureCommand>,
}

impl CommandCapturer {
    pub fn macos() -> Self {
        Self {
            commands: vec![SCREENCAPTURE],
        }
    }

    pub fn windows() -> Self {
        Self {
            commands: vec![POWERSHELL],
        }
    }

    pub fn linux() -> Self {
        Self {
            commands: vec![GRIM, IMPORT],
        }
    }
}

#[async_trait]
impl ScreenCapturer for CommandCapturer {
    async fn capture_screen(&self) -> Result<Vec<u8>, CaptureError> {
        let target = tempfile::Builder::new()
            .prefix("capture-")
            .suffix(".png")
            .tempfile()
            .map_err(|e| CaptureError::CaptureFailed(e.to_string()))?
            .into_temp_path();
        let out = target.to_string_lossy().into_owned();

        let mut last_error = None;
        for cmd in &self.commands {
            let args: Vec<String> = cmd.args.iter().map(|a| a.replace("{out}", &out)).collect();
            let result = match command::output(cmd.program, &args).await {
                Ok(output) => command::checked_stdout(cmd.program, &output).map(drop),
                Err(e) => Err(format!("{}: {e}", cmd.program)),
            };
            if let Err(e) = result {
                debug!(program = cmd.program, error = %e, "capture tool failed");
                last_error = Some(e);
                continue;
            }

            let bytes = tokio::fs::read(&target)
                .await
                .map_err(|e| CaptureError::CaptureFailed(e.to_string()))?;
            if bytes.is_empty() {
                last_error = Some(format!("{} wrote an empty image", cmd.program));
                continue;
            }
            return Ok(bytes);
        }

        Err(last_error.map_or(CaptureError::NotAvailable, CaptureError::CaptureFailed))
    }
}

/// In-process capture of the primary monitor.
#[cfg(feature = "xcap")]
pub mod native {
    use std::io::Cursor;

    use async_trait::async_trait;
    use image::ImageFormat;
    use xcap::Monitor;

    use crate::error::CaptureError;
    use crate::eyes::ScreenCapturer;

    #[derive(Debug, Default, Clone)]
    pub struct XcapCapturer;

    fn capture_primary() -> Result<Vec<u8>, CaptureError> {
        let failed = |e: xcap::XCapError| CaptureError::CaptureFailed(e.to_string());
        let monitors = Monitor::all().map_err(failed)?;
        let monitor = monitors
            .into_iter()
            .find(|m| m.is_primary().unwrap_or(false))
            .ok_or(CaptureError::NotAvailable)?;
        let frame = monitor.capture_image().map_err(failed)?;

        let mut png = Cursor::new(Vec::new());
        frame
            .write_to(&mut png, ImageFormat::Png)
            .map_err(|e| CaptureError::Decode(e.to_string()))?;
        Ok(png.into_inner())
    }

    #[async_trait]
    impl ScreenCapturer for XcapCapturer {
        async fn capture_screen(&self) -> Result<Vec<u8>, CaptureError> {
            tokio::task::spawn_blocking(capture_primary)
                .await
                .map_err(|e| CaptureError::CaptureFailed(e.to_string()))?
        }
    }
}
