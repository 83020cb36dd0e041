//! Terminal input to viewer commands and pointer events.

use crossterm::event::{
    Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers, MouseButton, MouseEvent, MouseEventKind,
};
use texview_core::{
    Command, KeyInput, Modifiers, PointF, PointerButton, PointerEvent, PointerKind, SizeF, Tool,
};

#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    Command(Command),
    Pointer(PointerEvent),
    Key(KeyInput),
    /// Scroll by a fraction of the viewport.
    Pan { delta_x: f64, delta_y: f64 },
    CloseActive,
    Resize,
    Quit,
    None,
}

/// Where the page image sits on screen, in terminal cells, and which part of
/// the page it shows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TerminalLayout {
    pub cell: SizeF,
    pub origin_column: u16,
    pub origin_row: u16,
    /// Page-image pixel shown at the top-left of the placement.
    pub scroll: PointF,
}

impl TerminalLayout {
    /// Terminals that do not report a pixel size get a typical cell.
    pub const FALLBACK_CELL: SizeF = SizeF::new(8.0, 16.0);

    pub fn from_window(columns: u16, rows: u16, width: u16, height: u16) -> Self {
        let cell = if columns == 0 || rows == 0 || width == 0 || height == 0 {
            Self::FALLBACK_CELL
        } else {
            SizeF::new(
                f64::from(width) / f64::from(columns),
                f64::from(height) / f64::from(rows),
            )
        };
        Self {
            cell,
            origin_column: 0,
            origin_row: 0,
            scroll: PointF::default(),
        }
    }

    /// Cells needed to show `pixels` without scaling.
    pub fn cells_for(&self, pixels: SizeF) -> (u32, u32) {
        let columns = (pixels.width / self.cell.width).ceil().max(1.0);
        let rows = (pixels.height / self.cell.height).ceil().max(1.0);
        (columns as u32, rows as u32)
    }

    /// Centre of `column`/`row` relative to the placement's top-left.
    pub fn screen_point(&self, column: u16, row: u16) -> PointF {
        let column = f64::from(column) - f64::from(self.origin_column);
        let row = f64::from(row) - f64::from(self.origin_row);
        PointF::new(
            (column + 0.5) * self.cell.width,
            (row + 0.5) * self.cell.height,
        )
    }
}

impl Default for TerminalLayout {
    fn default() -> Self {
        Self {
            cell: Self::FALLBACK_CELL,
            origin_column: 0,
            origin_row: 0,
            scroll: PointF::default(),
        }
    }
}

#[derive(Debug, Default)]
pub struct EventMapper {
    pending_count: Option<usize>,
    pending_digits: String,
    layout: TerminalLayout,
}

impl EventMapper {
    pub const PAN_STEP: f64 = 0.1;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_layout(&mut self, layout: TerminalLayout) {
        self.layout = layout;
    }

    pub fn layout(&self) -> TerminalLayout {
        self.layout
    }

    pub fn map_event(&mut self, event: Event) -> UiEvent {
        match event {
            Event::Key(key) if key.kind != KeyEventKind::Release => self.map_key(key),
            Event::Mouse(mouse) => self.map_mouse(mouse),
            Event::Resize(..) => UiEvent::Resize,
            _ => UiEvent::None,
        }
    }

    fn map_key(&mut self, event: KeyEvent) -> UiEvent {
        let KeyEvent {
            code, modifiers, ..
        } = event;
        match (code, modifiers) {
            (KeyCode::Modifier(_), modifiers) => UiEvent::Key(KeyInput {
                modifiers: modifiers_from(modifiers),
            }),
            (KeyCode::Char(c), KeyModifiers::NONE) if c.is_ascii_digit() => {
                if let Some(digit) = c.to_digit(10) {
                    self.push_digit(digit as usize);
                }
                UiEvent::None
            }
            (KeyCode::Char('c'), modifiers) if modifiers.contains(KeyModifiers::CONTROL) => {
                self.reset_count();
                UiEvent::Quit
            }
            (KeyCode::Char('q'), _) => {
                self.reset_count();
                UiEvent::Quit
            }
            (KeyCode::Char('j'), KeyModifiers::NONE)
            | (KeyCode::Char(' '), KeyModifiers::NONE)
            | (KeyCode::PageDown, _) => {
                let count = self.take_count();
                UiEvent::Command(Command::NextPage { count })
            }
            (KeyCode::Char('k'), KeyModifiers::NONE) | (KeyCode::PageUp, _) => {
                let count = self.take_count();
                UiEvent::Command(Command::PrevPage { count })
            }
            (KeyCode::Char('g'), KeyModifiers::NONE) | (KeyCode::Home, _) => {
                match self.pending_count.take() {
                    Some(page) if page > 0 => {
                        self.reset_count();
                        UiEvent::Command(Command::GotoPage { page: page - 1 })
                    }
                    _ => {
                        self.reset_count();
                        UiEvent::Command(Command::FirstPage)
                    }
                }
            }
            (KeyCode::Char('G'), _) | (KeyCode::End, _) => {
                self.reset_count();
                UiEvent::Command(Command::LastPage)
            }
            (KeyCode::Left, _) | (KeyCode::Char('h'), KeyModifiers::NONE) => {
                self.pan(-Self::PAN_STEP, 0.0)
            }
            (KeyCode::Right, _) | (KeyCode::Char('l'), KeyModifiers::NONE) => {
                self.pan(Self::PAN_STEP, 0.0)
            }
            (KeyCode::Up, _) | (KeyCode::Char('K'), _) => self.pan(0.0, -Self::PAN_STEP),
            (KeyCode::Down, _) | (KeyCode::Char('J'), _) => self.pan(0.0, Self::PAN_STEP),
            (KeyCode::Char('+'), _) => self.command(Command::ZoomIn),
            (KeyCode::Char('-'), _) => self.command(Command::ZoomOut),
            (KeyCode::Char('='), _) => self.command(Command::ActualSize),
            (KeyCode::Char('w'), KeyModifiers::NONE) => self.command(Command::FitWidth),
            (KeyCode::Char('f'), KeyModifiers::NONE) => self.command(Command::FitWindow),
            (KeyCode::Char('F'), _) | (KeyCode::F(11), _) => {
                self.command(Command::ToggleFullScreen)
            }
            (KeyCode::Char('m'), KeyModifiers::NONE) => self.command(Command::SetTool {
                tool: Tool::Magnifier,
            }),
            (KeyCode::Char('s'), KeyModifiers::NONE) => {
                self.command(Command::SetTool { tool: Tool::Scroll })
            }
            (KeyCode::Char('M'), _) => self.command(Command::CycleMagnifierSize),
            (KeyCode::Char('c'), KeyModifiers::NONE) => {
                self.command(Command::ToggleMagnifierShape)
            }
            (KeyCode::Tab, _) => match self.pending_count.take() {
                Some(index) if index > 0 => {
                    self.reset_count();
                    UiEvent::Command(Command::SwitchDocument { index: index - 1 })
                }
                _ => self.command(Command::NextDocument),
            },
            (KeyCode::Char('x'), KeyModifiers::NONE) => {
                self.reset_count();
                UiEvent::CloseActive
            }
            _ => {
                self.reset_count();
                UiEvent::None
            }
        }
    }

    fn map_mouse(&mut self, event: MouseEvent) -> UiEvent {
        let (kind, button) = match event.kind {
            MouseEventKind::Down(button) => (PointerKind::Press, button_from(button)),
            MouseEventKind::Up(button) => (PointerKind::Release, button_from(button)),
            MouseEventKind::Drag(button) => (PointerKind::Move, button_from(button)),
            MouseEventKind::Moved => (PointerKind::Move, PointerButton::None),
            MouseEventKind::ScrollDown => return self.pan(0.0, Self::PAN_STEP),
            MouseEventKind::ScrollUp => return self.pan(0.0, -Self::PAN_STEP),
            MouseEventKind::ScrollRight => return self.pan(Self::PAN_STEP, 0.0),
            MouseEventKind::ScrollLeft => return self.pan(-Self::PAN_STEP, 0.0),
        };
        let screen = self.layout.screen_point(event.column, event.row);
        let position = PointF::new(
            screen.x + self.layout.scroll.x,
            screen.y + self.layout.scroll.y,
        );
        UiEvent::Pointer(
            PointerEvent::new(kind, button, position)
                .with_screen(screen)
                .with_modifiers(modifiers_from(event.modifiers)),
        )
    }

    fn command(&mut self, command: Command) -> UiEvent {
        self.reset_count();
        UiEvent::Command(command)
    }

    fn push_digit(&mut self, digit: usize) {
        let current = self.pending_count.unwrap_or(0);
        let next = current.saturating_mul(10).saturating_add(digit);
        self.pending_count = Some(next);
        if let Some(c) = char::from_digit(digit as u32, 10) {
            self.pending_digits.push(c);
        }
    }

    fn take_count(&mut self) -> usize {
        let count = self
            .pending_count
            .take()
            .filter(|&count| count > 0)
            .unwrap_or(1);
        self.pending_digits.clear();
        count
    }

    fn reset_count(&mut self) {
        self.pending_count = None;
        self.pending_digits.clear();
    }

    fn pan(&mut self, delta_x: f64, delta_y: f64) -> UiEvent {
        let multiplier = self.take_count() as f64;
        UiEvent::Pan {
            delta_x: delta_x * multiplier,
            delta_y: delta_y * multiplier,
        }
    }

    pub fn pending_input(&self) -> Option<String> {
        if self.pending_digits.is_empty() {
            None
        } else {
            Some(self.pending_digits.clone())
        }
    }
}

fn button_from(button: MouseButton) -> PointerButton {
    match button {
        MouseButton::Left => PointerButton::Left,
        MouseButton::Right => PointerButton::Right,
        MouseButton::Middle => PointerButton::Middle,
    }
}

fn modifiers_from(modifiers: KeyModifiers) -> Modifiers {
    Modifiers {
        control: modifiers.contains(KeyModifiers::CONTROL),
        shift: modifiers.contains(KeyModifiers::SHIFT),
        alt: modifiers.contains(KeyModifiers::ALT),
    }
}
