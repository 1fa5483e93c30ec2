use std::io::{self, IsTerminal};

use ansi_term::{Colour, Style};

pub struct Theme;

impl Theme {
    pub fn title() -> Style {
        Colour::Green.bold()
    }

    pub fn tool_name() -> Style {
        Colour::Cyan.bold()
    }

    pub fn param_type() -> Style {
        Colour::Yellow.normal()
    }

    pub fn error() -> Style {
        Colour::Red.bold()
    }

    pub fn label() -> Style {
        Colour::Fixed(244).bold()
    }

    pub fn value() -> Style {
        Style::new()
    }

    pub fn dimmed() -> Style {
        Colour::Fixed(244).normal()
    }
}

fn paint_if(enabled: bool, style: Style, text: &str) -> String {
    if enabled {
        style.paint(text).to_string()
    } else {
        text.to_string()
    }
}

/// Paint `text` for stdout; plain unless stdout is a terminal.
pub fn paint(style: Style, text: &str) -> String {
    paint_if(io::stdout().is_terminal(), style, text)
}

/// Paint `text` for stderr; plain unless stderr is a terminal.
pub fn paint_err(style: Style, text: &str) -> String {
    paint_if(io::stderr().is_terminal(), style, text)
}
