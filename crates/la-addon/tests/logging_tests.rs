use std::ffi::CStr;
use std::os::raw::{c_char, c_void};
use std::ptr;
use std::sync::Mutex;

use la_addon::{la_runtime_create, la_runtime_destroy, la_set_log_callback, LaStatus, Runtime};

static CALLS: Mutex<Vec<(usize, String)>> = Mutex::new(Vec::new());

extern "C" fn on_log(_level: i32, text: *const c_char, user_data: *mut c_void) {
    let text = unsafe { CStr::from_ptr(text) }.to_string_lossy().into_owned();
    CALLS.lock().unwrap().push((user_data as usize, text));
}

unsafe fn create_with_callback(tag: usize) -> *mut Runtime {
    let mut runtime: *mut Runtime = ptr::null_mut();
    assert_eq!(la_runtime_create(ptr::null(), &mut runtime), LaStatus::Ok);
    assert_eq!(
        la_set_log_callback(runtime, Some(on_log), tag as *mut c_void),
        LaStatus::Ok
    );
    runtime
}

fn lines_for(tag: usize) -> Vec<String> {
    CALLS
        .lock()
        .unwrap()
        .iter()
        .filter(|(t, _)| *t == tag)
        .map(|(_, text)| text.clone())
        .collect()
}

#[test]
fn test_destroyed_runtime_stops_receiving_logs() {
    unsafe {
        let first = create_with_callback(1);
        log::warn!("line for the first runtime");
        assert_eq!(la_runtime_destroy(first), LaStatus::Ok);
        log::warn!("line with no runtime alive");

        let second = create_with_callback(2);
        log::warn!("line for the second runtime");
        assert_eq!(la_runtime_destroy(second), LaStatus::Ok);
        log::warn!("line after both runtimes");
    }

    let first = lines_for(1);
    assert!(first.iter().any(|l| l.contains("line for the first runtime")));
    assert!(!first.iter().any(|l| l.contains("no runtime alive")));
    assert!(!first.iter().any(|l| l.contains("second runtime")));
    assert!(!first.iter().any(|l| l.contains("after both")));

    let second = lines_for(2);
    assert!(second.iter().any(|l| l.contains("line for the second runtime")));
    assert!(!second.iter().any(|l| l.contains("first runtime")));
    assert!(!second.iter().any(|l| l.contains("after both")));
}
