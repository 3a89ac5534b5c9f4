use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

/// Routes Ctrl+C to the download in flight.
///
/// While a download is armed, Ctrl+C cancels it and control returns to the caller. With
/// nothing armed, Ctrl+C exits the process.
#[derive(Clone, Default)]
pub struct Interrupts {
    active: Arc<Mutex<Option<CancellationToken>>>,
}

impl Interrupts {
    /// Start listening for Ctrl+C
    pub fn install() -> Self {
        let interrupts = Self::default();
        let listener = interrupts.clone();

        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if listener.cancel_active() {
                    tracing::info!("interrupt received, cancelling download");
                } else {
                    let _ = console::Term::stdout().show_cursor();
                    println!();
                    std::process::exit(130);
                }
            }
        });

        interrupts
    }

    /// Arm a fresh cancellation token for one download; dropping the guard disarms it
    pub fn arm(&self) -> ArmedToken {
        let token = CancellationToken::new();
        *self.lock() = Some(token.clone());
        ArmedToken {
            token,
            interrupts: self.clone(),
        }
    }

    /// Cancel the armed download, returning whether there was one
    pub fn cancel_active(&self) -> bool {
        match self.lock().as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cancellation token registered with [`Interrupts`] for the duration of one download
pub struct ArmedToken {
    token: CancellationToken,
    interrupts: Interrupts,
}

impl ArmedToken {
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Drop for ArmedToken {
    fn drop(&mut self) {
        *self.interrupts.lock() = None;
    }
}
