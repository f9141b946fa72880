use std::time::Duration;

use serde::Serialize;

/// Microphone consent state as reported by the OS permission subsystem.
#[derive(Debug, Clone, Serialize)]
pub struct MicrophoneStatus {
    pub status: String, // granted|denied|not_determined|unknown
}

pub fn microphone_status() -> MicrophoneStatus {
    MicrophoneStatus {
        status: platform_status().to_string(),
    }
}

/// Ask the OS to show the consent prompt when it has not been answered
/// yet, then wait (bounded) for the user's choice. Every failure mode is
/// swallowed: the backend records audio, not the wrapper, and a denied or
/// broken prompt must never block startup.
pub fn request_microphone_access_best_effort(timeout: Duration) -> MicrophoneStatus {
    if platform_status() != "not_determined" {
        return microphone_status();
    }
    platform_request(timeout);
    microphone_status()
}

#[cfg(target_os = "macos")]
fn platform_status() -> &'static str {
    use objc::runtime::{Class, Object};
    use objc::msg_send;
    use objc::sel;
    use objc::sel_impl;

    let (Some(device), Some(nsstring)) = (
        Class::get("AVCaptureDevice"),
        Class::get("NSString"),
    ) else {
        return "unknown";
    };
    unsafe {
        let media: *mut Object =
            msg_send![nsstring, stringWithUTF8String: b"soun\0".as_ptr()];
        let status: i64 = msg_send![device, authorizationStatusForMediaType: media];
        // AVAuthorizationStatus: 0=notDetermined, 1=restricted, 2=denied, 3=authorized
        match status {
            3 => "granted",
            1 | 2 => "denied",
            0 => "not_determined",
            _ => "unknown",
        }
    }
}

#[cfg(target_os = "macos")]
fn platform_request(timeout: Duration) {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };
    use block::ConcreteBlock;
    use objc::runtime::{Class, Object, BOOL};
    use objc::msg_send;
    use objc::sel;
    use objc::sel_impl;

    let (Some(device), Some(nsstring)) = (
        Class::get("AVCaptureDevice"),
        Class::get("NSString"),
    ) else {
        return;
    };

    let answered = Arc::new(AtomicBool::new(false));
    let answered2 = answered.clone();
    let handler = ConcreteBlock::new(move |_granted: BOOL| {
        answered2.store(true, Ordering::SeqCst);
    })
    .copy();

    unsafe {
        let media: *mut Object =
            msg_send![nsstring, stringWithUTF8String: b"soun\0".as_ptr()];
        let _: () = msg_send![device, requestAccessForMediaType: media completionHandler: &*handler];
    }

    // The completion block fires on an arbitrary queue; a flag poll stands
    // in for an NSRunLoop spin and keeps the main loop untouched.
    let deadline = std::time::Instant::now() + timeout;
    while !answered.load(Ordering::SeqCst) {
        if std::time::Instant::now() >= deadline {
            return;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
}

#[cfg(not(target_os = "macos"))]
fn platform_status() -> &'static str {
    "granted"
}

#[cfg(not(target_os = "macos"))]
fn platform_request(_timeout: Duration) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_one_of_the_documented_values() {
        let st = microphone_status();
        assert!(
            ["granted", "denied", "not_determined", "unknown"].contains(&st.status.as_str()),
            "unexpected status {}",
            st.status
        );
    }

    #[cfg(not(target_os = "macos"))]
    #[test]
    fn request_is_a_no_op_off_macos() {
        let st = request_microphone_access_best_effort(Duration::from_millis(10));
        assert_eq!(st.status, "granted");
    }
}
