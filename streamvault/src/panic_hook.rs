//! Global panic hook that routes panics through `tracing`.
//!
//! A panic in a spawned supervisor task is contained by the fleet, but
//! without a hook its details only reach stderr. Install this once at
//! startup so panics land in the same log stream as everything else. The
//! default hook still runs afterwards.

use std::backtrace::Backtrace;
use std::panic::{PanicHookInfo, take_hook};
use std::thread;

pub fn install() {
    let previous_hook = take_hook();

    std::panic::set_hook(Box::new(move |panic_info: &PanicHookInfo<'_>| {
        let payload = panic_payload_to_string(panic_info);
        let location = panic_info
            .location()
            .map(|loc| format!("{}:{}:{}", loc.file(), loc.line(), loc.column()))
            .unwrap_or_else(|| "<unknown>".to_string());
        let thread_name = thread::current()
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| "<unnamed>".to_string());
        let backtrace = Backtrace::force_capture();

        tracing::error!(
            target: "streamvault::panic",
            "PANIC thread={thread_name} location={location} payload={payload}\nBacktrace:\n{backtrace}"
        );

        previous_hook(panic_info);
    }));
}

fn panic_payload_to_string(panic_info: &PanicHookInfo<'_>) -> String {
    if let Some(s) = panic_info.payload().downcast_ref::<&'static str>() {
        return (*s).to_string();
    }
    if let Some(s) = panic_info.payload().downcast_ref::<String>() {
        return s.clone();
    }
    panic_info.to_string()
}
