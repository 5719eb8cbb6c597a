use std::ffi::OsStr;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

static HOME_LOCK: Mutex<()> = Mutex::new(());

/// Runs `run` with `HOME` pointed at a fresh directory. The closure receives
/// the (already created) `~/.diagram-crop` directory.
pub(crate) fn with_config_home<R>(run: impl FnOnce(&Path) -> R) -> R {
    let _lock = HOME_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    let home = tempfile::tempdir().expect("temporary home");
    let config_dir = home.path().join(".diagram-crop");
    std::fs::create_dir_all(&config_dir).expect("config dir");

    let previous = std::env::var_os("HOME");
    set_home(Some(home.path().as_os_str()));
    let result = run(&config_dir);
    set_home(previous.as_deref());
    result
}

fn set_home(value: Option<&OsStr>) {
    // SAFETY: every writer holds HOME_LOCK.
    unsafe {
        match value {
            Some(value) => std::env::set_var("HOME", value),
            None => std::env::remove_var("HOME"),
        }
    }
}
