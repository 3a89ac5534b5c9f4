use anyhow::Result;
use console::{Style, Term};
use std::time::Duration;

use crate::orchestrator::{ErrorClass, RetryObserver, RetryState};
use crate::utils::{format_duration, truncate_diagnostic};
use crate::CrystalError;

pub mod menu;

const BANNER: &str = r#"   ______                __        ____  ___         ___
  / ____/______  _______/ /_____ _/ /  |/  /__  ____/ (_)___ _
 / /   / ___/ / / / ___/ __/ __ `/ / /|_/ / _ \/ __  / / __ `/
/ /___/ /  / /_/ (__  ) /_/ /_/ / / /  / /  __/ /_/ / / /_/ /
\____/_/   \__, /____/\__/\__,_/_/_/  /_/\___/\__,_/_/\__,_/
          /____/"#;

const RULE: &str = "══════════════════════════════════════════════════════";

/// Terminal colors, fixed for the life of the process
#[derive(Debug, Clone)]
pub struct Theme {
    pub logo: Style,
    pub accent: Style,
    pub muted: Style,
    pub warning: Style,
    pub error: Style,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            logo: Style::new().cyan().bright().bold(),
            accent: Style::new().cyan(),
            muted: Style::new().dim(),
            warning: Style::new().yellow(),
            error: Style::new().red(),
        }
    }
}

/// Styled access to the terminal for menus and status lines
#[derive(Debug, Clone)]
pub struct Screen {
    term: Term,
    theme: Theme,
    show_splash: bool,
}

impl Screen {
    pub fn new(theme: Theme, show_splash: bool) -> Self {
        Self {
            term: Term::stdout(),
            theme,
            show_splash,
        }
    }

    pub fn theme(&self) -> &Theme {
        &self.theme
    }

    /// Clear the screen and redraw the banner
    pub fn refresh(&self) {
        if self.term.is_term() {
            let _ = self.term.clear_screen();
        }
        if self.show_splash {
            println!("{}", self.theme.logo.apply_to(BANNER));
            println!("{}", self.theme.accent.apply_to(format!("v{}", env!("CARGO_PKG_VERSION"))));
            println!("{}", self.theme.accent.apply_to(RULE));
            println!();
        }
    }

    pub fn say(&self, text: impl AsRef<str>) {
        println!("{}", self.theme.accent.apply_to(text.as_ref()));
    }

    pub fn warn(&self, text: impl AsRef<str>) {
        println!("{}", self.theme.warning.apply_to(text.as_ref()));
    }

    pub fn error(&self, text: impl AsRef<str>) {
        println!("{}", self.theme.error.apply_to(text.as_ref()));
    }

    /// Read one line of input after a styled prompt
    pub async fn ask(&self, prompt: &str) -> Result<String> {
        let term = self.term.clone();
        let prompt = format!("{}", self.theme.accent.apply_to(prompt));

        let line = tokio::task::spawn_blocking(move || -> std::io::Result<Option<String>> {
            term.write_str(&prompt)?;
            if term.is_term() {
                return term.read_line().map(Some);
            }

            let mut line = String::new();
            let read = std::io::stdin().read_line(&mut line)?;
            Ok((read > 0).then_some(line))
        })
        .await??;

        match line {
            Some(line) => Ok(line.trim().to_string()),
            None => Err(CrystalError::InputClosed.into()),
        }
    }

    pub fn restore_cursor(&self) {
        let _ = self.term.show_cursor();
    }
}

/// Reports retry activity as styled status lines
pub struct TerminalObserver {
    screen: Screen,
    diagnostic_chars: usize,
}

impl TerminalObserver {
    pub fn new(screen: Screen, diagnostic_chars: usize) -> Self {
        Self {
            screen,
            diagnostic_chars,
        }
    }
}

impl RetryObserver for TerminalObserver {
    fn on_attempt_failed(&self, state: &RetryState, class: ErrorClass, message: &str) {
        self.screen.warn(format!(
            "Attempt {} of {} failed ({}): {}",
            state.attempt,
            state.ceiling,
            class,
            truncate_diagnostic(message, self.diagnostic_chars)
        ));
    }

    fn on_identity_rotated(&self, _identity: &str) {
        self.screen.say("Possible throttling detected. Rotating user-agent...");
    }

    fn on_backoff(&self, state: &RetryState, delay: Duration) {
        self.screen.say(format!(
            "Backing off {} before attempt {} of {}...",
            format_duration(delay),
            state.attempt + 1,
            state.ceiling
        ));
    }
}
