// common.rs - console printing and fatal errors

use parking_lot::Mutex;

pub const MAXPRINTMSG: usize = 4096;

// ============================================================
// Redirect buffer for Com_Printf
// ============================================================

static RD_BUFFER: Mutex<Option<String>> = parking_lot::const_mutex(None);

/// Begin redirecting printf output into a buffer.
pub fn com_begin_redirect() {
    *RD_BUFFER.lock() = Some(String::new());
}

/// End redirect and return the captured output.
pub fn com_end_redirect() -> Option<String> {
    RD_BUFFER.lock().take()
}

fn redirect(msg: &str) -> bool {
    let mut buf = RD_BUFFER.lock();
    match buf.as_mut() {
        Some(s) => {
            if s.len() + msg.len() <= MAXPRINTMSG {
                s.push_str(msg);
            }
            true
        }
        None => false,
    }
}

// ============================================================
// Com_Printf / Com_DPrintf / Com_Error
// ============================================================

/// General-purpose print. Goes to the redirect buffer if one is active,
/// otherwise out as an info event.
pub fn com_printf(msg: &str) {
    if redirect(msg) {
        return;
    }
    tracing::info!(target: "ufo_common", "{}", msg.trim_end());
}

/// Developer-only print, controlled by the "developer" cvar.
pub fn com_dprintf(msg: &str) {
    if crate::cvar::cvar_variable_value("developer") == 0.0 {
        return;
    }
    if redirect(msg) {
        return;
    }
    tracing::debug!(target: "ufo_common", "{}", msg.trim_end());
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// programming error: bad indices handed in by the caller
    Fatal,
    /// map data does not match what the tracer expects
    Drop,
}

/// Engine error handler. Collision results after an invariant violation
/// are unusable, so both codes abort.
pub fn com_error(code: ErrorCode, msg: &str) -> ! {
    match code {
        ErrorCode::Fatal => {
            tracing::error!(target: "ufo_common", "Error: {}", msg);
        }
        ErrorCode::Drop => {
            tracing::error!(target: "ufo_common", "********************\nERROR: {}\n********************", msg);
        }
    }
    panic!("{}", msg);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redirect_captures_printf() {
        com_begin_redirect();
        com_printf("tile loaded\n");
        com_printf("second line\n");
        let out = com_end_redirect().unwrap();
        assert!(out.contains("tile loaded\n"));
        assert!(out.contains("second line\n"));
        assert!(com_end_redirect().is_none());
    }

    #[test]
    #[should_panic(expected = "headnode out of bounds")]
    fn test_com_error_panics() {
        com_error(ErrorCode::Drop, "headnode out of bounds");
    }
}
