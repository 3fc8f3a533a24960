//! Terminal rendering surfaces.
//!
//! A surface receives raw pty bytes, can propose a best-fit size for its
//! viewport, and is disposed exactly once when its session ends.

use std::io::Write as _;

use dashterm_protocol::Resize;

const DEFAULT_SCROLLBACK_LINES: usize = 10000;

#[derive(Debug, thiserror::Error)]
pub enum SurfaceError {
    #[error("surface has no layout yet")]
    NotLaidOut,
    #[error("failed to measure terminal: {0}")]
    Measure(#[from] std::io::Error),
}

pub trait Surface {
    /// Render bytes received from the remote pty, unmodified.
    fn write(&mut self, data: &[u8]) -> std::io::Result<()>;

    /// Fit the surface to its viewport and return the resulting size.
    /// `Ok(None)` means no size can be proposed right now.
    fn fit(&mut self) -> Result<Option<Resize>, SurfaceError>;

    /// Whether the surface is still attached to something that can be fitted.
    fn is_attached(&self) -> bool;

    /// Release the surface. Later writes are dropped.
    fn dispose(&mut self);
}

/// The local terminal, written through stdout.
pub struct LocalTerminal {
    stdout: Option<std::io::Stdout>,
}

impl LocalTerminal {
    #[must_use]
    pub fn new() -> Self {
        Self {
            stdout: Some(std::io::stdout()),
        }
    }
}

impl Default for LocalTerminal {
    fn default() -> Self {
        Self::new()
    }
}

impl Surface for LocalTerminal {
    fn write(&mut self, data: &[u8]) -> std::io::Result<()> {
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(());
        };
        let mut lock = stdout.lock();
        lock.write_all(data)?;
        lock.flush()
    }

    fn fit(&mut self) -> Result<Option<Resize>, SurfaceError> {
        let (cols, rows) = crossterm::terminal::size()?;
        if rows == 0 || cols == 0 {
            return Ok(None);
        }
        Ok(Some(Resize { rows, cols }))
    }

    fn is_attached(&self) -> bool {
        self.stdout.is_some()
    }

    fn dispose(&mut self) {
        if let Some(stdout) = self.stdout.take() {
            let _ = stdout.lock().flush();
        }
    }
}

/// A headless surface backed by a vt100 emulator.
pub struct VirtualTerminal {
    parser: Option<vt100::Parser>,
    viewport: Option<Resize>,
}

impl VirtualTerminal {
    #[must_use]
    pub fn new(rows: u16, cols: u16) -> Self {
        Self {
            parser: Some(vt100::Parser::new(rows, cols, DEFAULT_SCROLLBACK_LINES)),
            viewport: Some(Resize { rows, cols }),
        }
    }

    /// Change the viewport the next `fit` adapts to. `None` simulates a
    /// container that has not been laid out.
    pub fn set_viewport(&mut self, viewport: Option<Resize>) {
        self.viewport = viewport;
    }

    /// Current screen contents, empty once disposed.
    #[must_use]
    pub fn contents(&self) -> String {
        self.parser
            .as_ref()
            .map(|p| p.screen().contents())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn size(&self) -> Option<Resize> {
        self.parser.as_ref().map(|p| {
            let (rows, cols) = p.screen().size();
            Resize { rows, cols }
        })
    }
}

impl Surface for VirtualTerminal {
    fn write(&mut self, data: &[u8]) -> std::io::Result<()> {
        if let Some(parser) = self.parser.as_mut() {
            parser.process(data);
        }
        Ok(())
    }

    fn fit(&mut self) -> Result<Option<Resize>, SurfaceError> {
        let viewport = self.viewport.ok_or(SurfaceError::NotLaidOut)?;
        let Some(parser) = self.parser.as_mut() else {
            return Ok(None);
        };
        if viewport.rows == 0 || viewport.cols == 0 {
            return Ok(None);
        }
        parser.set_size(viewport.rows, viewport.cols);
        Ok(Some(viewport))
    }

    fn is_attached(&self) -> bool {
        self.parser.is_some()
    }

    fn dispose(&mut self) {
        self.parser = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_virtual_terminal_renders_bytes() {
        let mut term = VirtualTerminal::new(24, 80);
        term.write(b"hello\r\nworld").unwrap();
        assert!(term.contents().starts_with("hello\nworld"));
    }

    #[test]
    fn test_virtual_terminal_fit_follows_viewport() {
        let mut term = VirtualTerminal::new(24, 80);
        term.set_viewport(Some(Resize { rows: 40, cols: 132 }));
        assert_eq!(term.fit().unwrap(), Some(Resize { rows: 40, cols: 132 }));
        assert_eq!(term.size(), Some(Resize { rows: 40, cols: 132 }));
    }

    #[test]
    fn test_virtual_terminal_without_layout() {
        let mut term = VirtualTerminal::new(24, 80);
        term.set_viewport(None);
        assert!(matches!(term.fit(), Err(SurfaceError::NotLaidOut)));
        term.set_viewport(Some(Resize { rows: 0, cols: 80 }));
        assert_eq!(term.fit().unwrap(), None);
    }

    #[test]
    fn test_virtual_terminal_dispose() {
        let mut term = VirtualTerminal::new(24, 80);
        assert!(term.is_attached());
        term.dispose();
        assert!(!term.is_attached());
        term.write(b"ignored").unwrap();
        assert_eq!(term.contents(), "");
        assert_eq!(term.fit().unwrap(), None);
    }
}
