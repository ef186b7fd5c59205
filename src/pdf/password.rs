//! Password prompts for protected documents

use std::fmt;
use std::io::{self, BufRead, Write};
use std::sync::Arc;

use flume::Sender;

/// Why the engine is asking for a password.
///
/// Engines define the codes; only the first two are known here, anything else
/// is passed through to the callback untouched.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PasswordReason(pub u8);

impl PasswordReason {
    /// First request for this document.
    pub const NEED_PASSWORD: Self = Self(1);
    /// The previous password was rejected.
    pub const INCORRECT_PASSWORD: Self = Self(2);

    #[must_use]
    pub const fn code(self) -> u8 {
        self.0
    }
}

impl fmt::Display for PasswordReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::NEED_PASSWORD => f.write_str("password required"),
            Self::INCORRECT_PASSWORD => f.write_str("incorrect password"),
            Self(code) => write!(f, "password reason {code}"),
        }
    }
}

/// Hands a password back to the loading task that asked for it.
///
/// May be kept and answered later; the load stays pending until then.
#[derive(Clone, Debug)]
pub struct PasswordResponder {
    tx: Sender<String>,
}

impl PasswordResponder {
    pub(crate) fn new(tx: Sender<String>) -> Self {
        Self { tx }
    }

    /// Returns `false` when the load is already gone.
    pub fn respond(&self, password: impl Into<String>) -> bool {
        self.tx.send(password.into()).is_ok()
    }
}

pub type PasswordCallback = Arc<dyn Fn(PasswordResponder, PasswordReason) + Send + Sync>;

/// Caller-supplied load options. Can be swapped while a load is in flight;
/// the latest callback answers the next request.
#[derive(Clone, Default)]
pub struct LoadOptions {
    pub on_password: Option<PasswordCallback>,
}

impl LoadOptions {
    #[must_use]
    pub fn with_password_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(PasswordResponder, PasswordReason) + Send + Sync + 'static,
    {
        self.on_password = Some(Arc::new(callback));
        self
    }

    /// Offer `password` when the document first asks for one. A rejection,
    /// or any other reason, is left unanswered and the load stays pending.
    #[must_use]
    pub fn with_password(self, password: impl Into<String>) -> Self {
        let password = password.into();
        self.with_password_callback(move |responder, reason| {
            if reason == PasswordReason::NEED_PASSWORD {
                responder.respond(password.clone());
            } else {
                log::warn!("Fixed password not offered again ({reason}); load stays pending");
            }
        })
    }

    pub(crate) fn dispatch(&self, responder: PasswordResponder, reason: PasswordReason) {
        match &self.on_password {
            Some(callback) => callback(responder, reason),
            None => prompt_on_terminal(responder, reason),
        }
    }
}

impl fmt::Debug for LoadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadOptions")
            .field("on_password", &self.on_password.is_some())
            .finish()
    }
}

fn prompt_text(reason: PasswordReason) -> Option<&'static str> {
    match reason {
        PasswordReason::NEED_PASSWORD => Some("Enter the password to open this PDF file."),
        PasswordReason::INCORRECT_PASSWORD => Some("Invalid password. Please try again."),
        _ => None,
    }
}

/// Fallback when no callback is configured: ask on the terminal.
/// Unknown reasons are left unanswered, so the load stays pending.
pub fn prompt_on_terminal(responder: PasswordResponder, reason: PasswordReason) {
    let Some(text) = prompt_text(reason) else {
        log::warn!("Unhandled password request ({reason}); load stays pending");
        return;
    };

    let mut stderr = io::stderr();
    let _ = write!(stderr, "{text} ");
    let _ = stderr.flush();

    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(_) => {
            responder.respond(line.trim_end_matches(['\r', '\n']));
        }
        Err(e) => log::warn!("Could not read password: {e}"),
    }
}
