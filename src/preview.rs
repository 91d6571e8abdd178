// src/preview.rs - Optional live window showing the rendered output
use image::RgbImage;

use crate::error::ExportError;
use crate::pipeline::{Control, FrameObserver, FrameOutcome};

/// Packs RGB8 pixels into minifb's `0RGB` words.
pub fn pack_rgb(frame: &RgbImage, buffer: &mut Vec<u32>) {
    buffer.clear();
    buffer.extend(
        frame
            .pixels()
            .map(|p| (u32::from(p[0]) << 16) | (u32::from(p[1]) << 8) | u32::from(p[2])),
    );
}

#[cfg(feature = "preview")]
mod window {
    use minifb::{Key, Window, WindowOptions};

    use super::*;

    /// Shows each output frame. Escape or closing the window stops the run.
    pub struct PreviewWindow {
        window: Window,
        buffer: Vec<u32>,
    }

    impl PreviewWindow {
        pub fn open(title: &str, width: u32, height: u32) -> Result<Self, ExportError> {
            let window = Window::new(
                title,
                width as usize,
                height as usize,
                WindowOptions {
                    resize: true,
                    ..WindowOptions::default()
                },
            )
            .map_err(|e| ExportError::Preview(e.to_string()))?;

            Ok(Self {
                window,
                buffer: Vec::with_capacity(width as usize * height as usize),
            })
        }

        fn is_open(&self) -> bool {
            self.window.is_open() && !self.window.is_key_down(Key::Escape)
        }
    }

    impl FrameObserver for PreviewWindow {
        fn on_frame(&mut self, _outcome: &FrameOutcome, frame: &RgbImage) -> Result<Control, ExportError> {
            if !self.is_open() {
                return Ok(Control::Stop);
            }
            pack_rgb(frame, &mut self.buffer);
            self.window
                .update_with_buffer(&self.buffer, frame.width() as usize, frame.height() as usize)
                .map_err(|e| ExportError::Preview(e.to_string()))?;

            Ok(if self.is_open() { Control::Continue } else { Control::Stop })
        }
    }
}

#[cfg(not(feature = "preview"))]
mod window {
    use super::*;

    /// Stand-in when built without the `preview` feature; never opens.
    pub struct PreviewWindow;

    impl PreviewWindow {
        pub fn open(_title: &str, _width: u32, _height: u32) -> Result<Self, ExportError> {
            Err(ExportError::Preview(
                "built without the `preview` feature".to_string(),
            ))
        }
    }

    impl FrameObserver for PreviewWindow {
        fn on_frame(&mut self, _outcome: &FrameOutcome, _frame: &RgbImage) -> Result<Control, ExportError> {
            Ok(Control::Stop)
        }
    }
}

pub use window::PreviewWindow;
