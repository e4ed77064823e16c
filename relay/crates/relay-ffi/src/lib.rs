//! Relay C ABI
//!
//! C-compatible entry points for embedders driving an [`IsolateHost`]:
//! - Host creation and disposal
//! - Isolate id reservation, allocation and disposal
//! - Consumer access to an isolate's active buffer
//! - Payload release
//!
//! The host pointer is opaque and must only be used from the thread that
//! created it. Isolate id `0` is never issued and doubles as the failure
//! value.

use std::ptr;

use relay_core::{CommandRecord, IsolateConfig, IsolateHost, IsolateId, RelayConfig, ThreadGroupId};
use relay_util::NativeString;

unsafe fn host_mut<'a>(host: *mut IsolateHost) -> Option<&'a mut IsolateHost> {
    host.as_mut()
}

/// Create a host configured from the environment
///
/// Returns null if the configuration is invalid.
#[no_mangle]
pub extern "C" fn relay_host_create() -> *mut IsolateHost {
    match IsolateHost::new(RelayConfig::from_env()) {
        Ok(host) => Box::into_raw(Box::new(host)),
        Err(e) => {
            log::error!("Failed to create isolate host: {}", e);
            ptr::null_mut()
        },
    }
}

/// Remove every isolate, join every worker and free the host
///
/// # Safety
///
/// `host` must come from [`relay_host_create`] and must not be used again.
#[no_mangle]
pub unsafe extern "C" fn relay_host_dispose(host: *mut IsolateHost) -> bool {
    if host.is_null() {
        return false;
    }
    let mut host = Box::from_raw(host);
    match host.dispose() {
        Ok(()) => true,
        Err(e) => {
            log::error!("Failed to dispose isolate host: {}", e);
            false
        },
    }
}

/// Reserve an isolate id; `0` if `host` is null
///
/// # Safety
///
/// `host` must be null or a live pointer from [`relay_host_create`].
#[no_mangle]
pub unsafe extern "C" fn relay_new_isolate_id(host: *mut IsolateHost) -> u64 {
    match host_mut(host) {
        Some(host) => host.next_isolate_id().as_u64(),
        None => 0,
    }
}

/// Create isolate `id`
///
/// Dedicated isolates run on `group`'s worker thread; the others on the
/// host's thread, with `group` ignored.
///
/// # Safety
///
/// `host` must be null or a live pointer from [`relay_host_create`].
#[no_mangle]
pub unsafe extern "C" fn relay_isolate_alloc(
    host: *mut IsolateHost,
    id: u64,
    dedicated: bool,
    group: u32,
) -> bool {
    let Some(host) = host_mut(host) else {
        return false;
    };
    if id == 0 {
        return false;
    }

    let config = if dedicated {
        IsolateConfig::dedicated(ThreadGroupId::new(group))
    } else {
        IsolateConfig::shared()
    };
    match host.add_isolate_with_id(IsolateId::new(id), config) {
        Ok(()) => true,
        Err(e) => {
            log::error!("Failed to allocate isolate#{}: {}", id, e);
            false
        },
    }
}

/// Remove isolate `id`
///
/// Records the host never read are dropped with their payloads; the batch
/// currently handed out stays the caller's to release.
///
/// # Safety
///
/// `host` must be null or a live pointer from [`relay_host_create`].
#[no_mangle]
pub unsafe extern "C" fn relay_isolate_dispose(host: *mut IsolateHost, id: u64) -> bool {
    let Some(host) = host_mut(host) else {
        return false;
    };
    match host.remove_isolate(IsolateId::new(id)) {
        Ok(mut removal) => {
            let released = removal.reader.release_unread();
            if released > 0 {
                log::debug!("isolate#{}: released {} unread payloads", id, released);
            }
            true
        },
        Err(e) => {
            log::error!("Failed to dispose isolate#{}: {}", id, e);
            false
        },
    }
}

/// Records of the isolate's current batch; null if there is none
///
/// Takes the next published batch when the previous one was cleared. Call
/// it before [`relay_get_command_kind_mask`] and [`relay_get_command_size`].
/// Valid until [`relay_clear_commands`] for the same isolate.
///
/// # Safety
///
/// `host` must be null or a live pointer from [`relay_host_create`].
#[no_mangle]
pub unsafe extern "C" fn relay_get_command_data(
    host: *mut IsolateHost,
    id: u64,
) -> *const CommandRecord {
    let Some(reader) = host_mut(host).and_then(|host| host.reader(IsolateId::new(id)).ok()) else {
        return ptr::null();
    };
    let data = reader.data();
    if reader.size() == 0 {
        return ptr::null();
    }
    data
}

/// Category bits of the batch taken by [`relay_get_command_data`]
///
/// # Safety
///
/// `host` must be null or a live pointer from [`relay_host_create`].
#[no_mangle]
pub unsafe extern "C" fn relay_get_command_kind_mask(host: *mut IsolateHost, id: u64) -> u32 {
    host_mut(host)
        .and_then(|host| host.reader(IsolateId::new(id)).ok())
        .map_or(0, |reader| reader.kind_mask().bits())
}

/// Number of records in the batch taken by [`relay_get_command_data`]
///
/// # Safety
///
/// `host` must be null or a live pointer from [`relay_host_create`].
#[no_mangle]
pub unsafe extern "C" fn relay_get_command_size(host: *mut IsolateHost, id: u64) -> usize {
    host_mut(host)
        .and_then(|host| host.reader(IsolateId::new(id)).ok())
        .map_or(0, |reader| reader.size())
}

/// Acknowledge the isolate's current batch
///
/// # Safety
///
/// `host` must be null or a live pointer from [`relay_host_create`].
#[no_mangle]
pub unsafe extern "C" fn relay_clear_commands(host: *mut IsolateHost, id: u64) {
    if let Some(reader) = host_mut(host).and_then(|host| host.reader(IsolateId::new(id)).ok()) {
        reader.clear_active();
    }
}

/// Release a record payload
///
/// # Safety
///
/// `data` and `len` must be a record's `payload_ref` and `payload_len`,
/// released at most once.
#[no_mangle]
pub unsafe extern "C" fn relay_free_native_string(data: *mut u16, len: i32) {
    if data.is_null() || len < 0 {
        return;
    }
    drop(NativeString::from_raw_parts(data, len as usize));
}
