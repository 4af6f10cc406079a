use ime_config::logging::{directive_from_env, init_logging};
use ime_config::{log_backend_error, log_preload_warn, Config};
use ime_redirect::raw::{self, RawStderr};
use ime_redirect::BackendError;

use crate::native::NativeBackend;
use crate::INTERCEPTOR;

/// Process start: snapshot the environment, bind the native client and open
/// the gate. Anything that goes wrong leaves the process in pass-through.
pub fn run() {
    if let Some(directive) = directive_from_env() {
        if let Err(e) = init_logging(&directive, || RawStderr) {
            raw::write_line(libc::STDERR_FILENO, &e);
        }
    }

    let config = Config::load();
    raw::write_line(libc::STDOUT_FILENO, &config);

    match INTERCEPTOR.bootstrap(config, NativeBackend::load) {
        Ok(_) => {}
        Err(BackendError::AlreadyStarted) => {
            log_preload_warn!("start hook entered twice");
        }
        Err(e) => {
            log_backend_error!(
                "native client unavailable, passing calls through",
                error = tracing::field::display(&e),
            );
        }
    }
}
