//! Engine Configuration
//!
//! Settings and reporting hooks live in thread-local storage, next to the
//! rest of the engine state. Each thread (and therefore each test) starts
//! from [`Config::default`] and can be reset with [`reset`].
//!
//! The hooks are how recovered failures leave the engine: a user watcher's
//! getter or callback error is handed to the [`ErrorHandler`], misuse of the
//! structural mutation API to the [`WarnHandler`]. Without hooks, both fall
//! back to `tracing`.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::reactive::Owner;

/// Reporting hook for recovered failures: `(error, owner, location)`.
pub type ErrorHandler = Rc<dyn Fn(&(dyn std::error::Error + 'static), Option<&Owner>, &str)>;

/// Reporting hook for warnings: `(message, owner)`.
pub type WarnHandler = Rc<dyn Fn(&str, Option<&Owner>)>;

/// How deferred work reaches the next tick boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickMode {
    /// The host drains ticks itself (`tick::run_pending`), typically once
    /// per frame.
    #[default]
    Manual,

    /// The first callback of a batch spawns a tokio local task that drains
    /// the batch. Requires a running `LocalSet`.
    Local,
}

/// Plain engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Defer scheduler flushes to the next tick. When false, a queued
    /// watcher flushes immediately and Deps notify in id order.
    pub async_flush: bool,

    /// Number of times one watcher may re-queue itself within a flush before
    /// the flush is aborted as an infinite update loop.
    pub max_update_count: u32,

    /// Suppress warnings entirely.
    pub silent: bool,

    /// Tick timing policy.
    pub tick: TickMode,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            async_flush: true,
            max_update_count: 100,
            silent: false,
            tick: TickMode::Manual,
        }
    }
}

impl Settings {
    /// Parse settings from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

/// Settings plus reporting hooks.
#[derive(Clone, Default)]
pub struct Config {
    pub settings: Settings,
    pub error_handler: Option<ErrorHandler>,
    pub warn_handler: Option<WarnHandler>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("settings", &self.settings)
            .field("error_handler", &self.error_handler.is_some())
            .field("warn_handler", &self.warn_handler.is_some())
            .finish()
    }
}

thread_local! {
    static CONFIG: RefCell<Config> = RefCell::new(Config::default());
}

/// Modify the current thread's configuration.
pub fn configure<F>(f: F)
where
    F: FnOnce(&mut Config),
{
    CONFIG.with(|config| f(&mut config.borrow_mut()));
}

/// Install the hook that receives recovered failures.
pub fn set_error_handler<F>(handler: F)
where
    F: Fn(&(dyn std::error::Error + 'static), Option<&Owner>, &str) + 'static,
{
    configure(|config| config.error_handler = Some(Rc::new(handler)));
}

/// Install the hook that receives warnings.
pub fn set_warn_handler<F>(handler: F)
where
    F: Fn(&str, Option<&Owner>) + 'static,
{
    configure(|config| config.warn_handler = Some(Rc::new(handler)));
}

/// Snapshot of the current thread's settings.
pub fn settings() -> Settings {
    CONFIG.with(|config| config.borrow().settings.clone())
}

/// Restore the default configuration.
pub fn reset() {
    CONFIG.with(|config| *config.borrow_mut() = Config::default());
}

/// Report a recovered failure.
///
/// The handler is cloned out before it is called, so it may itself touch
/// reactive state or reconfigure the engine.
pub(crate) fn handle_error(
    err: &(dyn std::error::Error + 'static),
    owner: Option<&Owner>,
    location: &str,
) {
    let handler = CONFIG.with(|config| config.borrow().error_handler.clone());
    match handler {
        Some(handler) => handler(err, owner, location),
        None => tracing::error!(
            owner = owner.map(Owner::name).unwrap_or("<root>"),
            "error in {location}: {err}"
        ),
    }
}

/// Report misuse that the engine tolerates.
pub(crate) fn warn(message: &str, owner: Option<&Owner>) {
    let (silent, handler) = CONFIG.with(|config| {
        let config = config.borrow();
        (config.settings.silent, config.warn_handler.clone())
    });
    if silent {
        return;
    }
    match handler {
        Some(handler) => handler(message, owner),
        None => tracing::warn!(owner = owner.map(Owner::name).unwrap_or("<root>"), "{message}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn settings_default_and_from_json() {
        assert_eq!(Settings::default().max_update_count, 100);

        let parsed = Settings::from_json(r#"{ "async_flush": false, "tick": "local" }"#).unwrap();
        assert!(!parsed.async_flush);
        assert_eq!(parsed.tick, TickMode::Local);
        assert_eq!(parsed.max_update_count, 100);
    }

    #[test]
    fn warn_routes_to_handler_unless_silent() {
        reset();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        set_warn_handler(move |msg, _| sink.borrow_mut().push(msg.to_string()));

        warn("first", None);
        configure(|c| c.settings.silent = true);
        warn("second", None);

        assert_eq!(*seen.borrow(), vec!["first".to_string()]);
        reset();
    }

    #[test]
    fn handle_error_routes_to_handler() {
        reset();
        let seen = Rc::new(RefCell::new(None));
        let sink = seen.clone();
        set_error_handler(move |err, _, location| {
            *sink.borrow_mut() = Some(format!("{location}: {err}"));
        });

        let err: crate::BoxError = "bad".into();
        handle_error(&*err, None, "getter for watcher \"a\"");

        assert_eq!(seen.borrow().as_deref(), Some("getter for watcher \"a\": bad"));
        reset();
    }
}
