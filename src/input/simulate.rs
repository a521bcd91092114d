//! enigo-backed input simulation.

use anyhow::{bail, Result};
use enigo::{Axis, Button, Coordinate, Direction, Enigo, Key, Keyboard, Mouse, Settings};
use tracing::debug;

use super::InputInjector;
use crate::protocol::{KeyboardEvent, MouseButton, MouseEvent};

/// Injects events through enigo.
pub struct Simulator {
    enigo: Enigo,
}

impl Simulator {
    pub fn new() -> Result<Self> {
        let enigo = Enigo::new(&Settings::default())?;
        Ok(Self { enigo })
    }

    fn click_at(&mut self, x: i32, y: i32, button: MouseButton) -> Result<()> {
        self.enigo.move_mouse(x, y, Coordinate::Abs)?;
        self.enigo.button(to_button(button), Direction::Click)?;
        Ok(())
    }
}

impl InputInjector for Simulator {
    fn mouse(&mut self, event: &MouseEvent) -> Result<()> {
        debug!(?event, "injecting mouse event");
        match *event {
            MouseEvent::Move { x, y } => {
                self.enigo.move_mouse(x, y, Coordinate::Abs)?;
            }
            MouseEvent::Click { x, y, button } => self.click_at(x, y, button)?,
            MouseEvent::DoubleClick { x, y, button } => {
                self.click_at(x, y, button)?;
                self.click_at(x, y, button)?;
            }
            MouseEvent::Drag { x, y, button } => {
                // Press at the current position, glide to the target, release
                let btn = to_button(button);
                self.enigo.button(btn, Direction::Press)?;
                self.enigo.move_mouse(x, y, Coordinate::Abs)?;
                self.enigo.button(btn, Direction::Release)?;
            }
            MouseEvent::Scroll { amount } => {
                // Wire convention: positive scrolls up; enigo's axis grows down
                self.enigo.scroll(-amount, Axis::Vertical)?;
            }
        }
        Ok(())
    }

    fn keyboard(&mut self, event: &KeyboardEvent) -> Result<()> {
        debug!(?event, "injecting keyboard event");
        match event {
            KeyboardEvent::Key { key } => {
                self.enigo.key(key_from_name(key)?, Direction::Click)?;
            }
            KeyboardEvent::Hotkey { keys } => {
                // Hold the chord in order, release in reverse
                let parsed: Vec<Key> = keys
                    .iter()
                    .map(|k| key_from_name(k))
                    .collect::<Result<_>>()?;
                for key in &parsed {
                    self.enigo.key(*key, Direction::Press)?;
                }
                for key in parsed.iter().rev() {
                    self.enigo.key(*key, Direction::Release)?;
                }
            }
            KeyboardEvent::Write { text } => {
                self.enigo.text(text)?;
            }
        }
        Ok(())
    }
}

fn to_button(button: MouseButton) -> Button {
    match button {
        MouseButton::Left => Button::Left,
        MouseButton::Right => Button::Right,
        MouseButton::Middle => Button::Middle,
    }
}

/// Map a wire key name to an enigo key. Names are case-insensitive; any
/// single character maps to a unicode keypress. Modifier names come from
/// the fixed wire set `ctrl` / `alt` / `shift`.
pub fn key_from_name(name: &str) -> Result<Key> {
    let normalized = name.to_ascii_lowercase();
    let key = match normalized.as_str() {
        "ctrl" | "control" => Key::Control,
        "alt" => Key::Alt,
        "shift" => Key::Shift,
        "meta" | "super" | "win" => Key::Meta,
        "enter" | "return" => Key::Return,
        "tab" => Key::Tab,
        "esc" | "escape" => Key::Escape,
        "space" => Key::Space,
        "backspace" => Key::Backspace,
        "delete" | "del" => Key::Delete,
        "home" => Key::Home,
        "end" => Key::End,
        "pageup" => Key::PageUp,
        "pagedown" => Key::PageDown,
        "up" => Key::UpArrow,
        "down" => Key::DownArrow,
        "left" => Key::LeftArrow,
        "right" => Key::RightArrow,
        "f1" => Key::F1,
        "f2" => Key::F2,
        "f3" => Key::F3,
        "f4" => Key::F4,
        "f5" => Key::F5,
        "f6" => Key::F6,
        "f7" => Key::F7,
        "f8" => Key::F8,
        "f9" => Key::F9,
        "f10" => Key::F10,
        "f11" => Key::F11,
        "f12" => Key::F12,
        other => {
            let mut chars = other.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Key::Unicode(c),
                _ => bail!("unknown key name: {name}"),
            }
        }
    };
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_names_are_case_insensitive() {
        assert_eq!(key_from_name("CTRL").unwrap(), Key::Control);
        assert_eq!(key_from_name("Enter").unwrap(), Key::Return);
        assert_eq!(key_from_name("F5").unwrap(), Key::F5);
    }

    #[test]
    fn single_characters_become_unicode_presses() {
        assert_eq!(key_from_name("a").unwrap(), Key::Unicode('a'));
        assert_eq!(key_from_name("A").unwrap(), Key::Unicode('a'));
        assert_eq!(key_from_name("7").unwrap(), Key::Unicode('7'));
    }

    #[test]
    fn modifier_set_is_covered() {
        for name in ["ctrl", "alt", "shift"] {
            assert!(key_from_name(name).is_ok());
        }
    }

    #[test]
    fn unknown_names_are_rejected() {
        assert!(key_from_name("florb").is_err());
        assert!(key_from_name("").is_err());
    }
}
