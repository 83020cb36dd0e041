use std::io::{self, Write};

use anyhow::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use crossterm::{
    cursor,
    terminal::{Clear, ClearType},
};
use png::{BitDepth, ColorType, Encoder};
use texview_core::{CursorShape, RenderImage};

pub mod canvas;
pub mod input;

pub use canvas::Canvas;
pub use input::{EventMapper, TerminalLayout, UiEvent};

pub struct KittyRenderer<W: Write> {
    writer: W,
    image_id: u32,
    placement_id: u32,
    pointer: Option<CursorShape>,
}

/// Placement of one image, in terminal cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawParams {
    pub column: u16,
    pub row: u16,
    pub columns: u32,
    pub rows: u32,
}

impl DrawParams {
    pub fn clamped(column: u16, row: u16, columns: u32, rows: u32) -> Self {
        Self {
            column,
            row,
            columns: columns.max(1),
            rows: rows.max(1),
        }
    }
}

impl<W: Write> KittyRenderer<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            image_id: 1,
            placement_id: 1,
            pointer: None,
        }
    }

    pub fn writer(&mut self) -> &mut W {
        &mut self.writer
    }

    /// Transmits `image` as PNG and places it, replacing the previous frame.
    pub fn draw(&mut self, image: &RenderImage, params: DrawParams) -> Result<()> {
        let mut buffer = Vec::new();
        let mut encoder = Encoder::new(&mut buffer, image.width, image.height);
        encoder.set_color(ColorType::Rgba);
        encoder.set_depth(BitDepth::Eight);
        let mut writer = encoder.write_header()?;
        writer.write_image_data(&image.pixels)?;
        writer.finish()?;

        crossterm::queue!(&mut self.writer, cursor::MoveTo(params.column, params.row))?;

        let encoded = BASE64.encode(&buffer);
        let mut chunks = encoded.as_bytes().chunks(4096).peekable();
        let mut first = true;

        while let Some(chunk) = chunks.next() {
            let more = chunks.peek().is_some();
            if first {
                write!(
                    self.writer,
                    "\u{1b}_Ga=T,f=100,C=1,q=2,i={},p={},c={},r={},s={},v={},z=-1,m={}",
                    self.image_id,
                    self.placement_id,
                    params.columns,
                    params.rows,
                    image.width,
                    image.height,
                    u8::from(more)
                )?;
                first = false;
            } else {
                write!(self.writer, "\u{1b}_Gm={},q=2", u8::from(more))?;
            }
            if !chunk.is_empty() {
                self.writer.write_all(b";")?;
                self.writer.write_all(chunk)?;
            }
            write!(self.writer, "\u{1b}\\")?;
        }

        self.writer.flush()?;
        Ok(())
    }

    /// Sets the mouse pointer shape (OSC 22). Repeated shapes are not resent.
    pub fn set_pointer(&mut self, shape: CursorShape) -> Result<()> {
        if self.pointer == Some(shape) {
            return Ok(());
        }
        write!(self.writer, "\u{1b}]22;{}\u{1b}\\", pointer_name(shape))?;
        self.writer.flush()?;
        self.pointer = Some(shape);
        Ok(())
    }

    pub fn begin_sync_update(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026h")?;
        Ok(())
    }

    /// Ends a synchronized update; the terminal shows the buffered frame at once.
    pub fn end_sync_update(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026l")?;
        self.writer.flush()?;
        Ok(())
    }

    /// Clears the screen and deletes every placed image.
    pub fn clear_all(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}_Ga=d,q=2\u{1b}\\")?;
        crossterm::execute!(
            &mut self.writer,
            Clear(ClearType::All),
            cursor::MoveTo(0, 0)
        )?;
        Ok(())
    }
}

fn pointer_name(shape: CursorShape) -> &'static str {
    match shape {
        CursorShape::Arrow => "default",
        CursorShape::PointingHand => "pointer",
        CursorShape::OpenHand => "grab",
        CursorShape::ClosedHand => "grabbing",
        CursorShape::Magnifier => "zoom-in",
        CursorShape::Sync => "crosshair",
    }
}

/// Writes `label` padded or truncated to `width` characters.
pub fn write_status_line<W: Write>(writer: &mut W, label: &str, width: usize) -> io::Result<()> {
    let mut text: String = label.chars().take(width).collect();
    let used = text.chars().count();
    if used < width {
        text.push_str(&" ".repeat(width - used));
    }
    write!(writer, "{}", text)?;
    writer.flush()
}
