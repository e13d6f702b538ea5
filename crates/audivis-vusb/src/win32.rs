//! Win32 control channel to the virtual USB hub driver.
//!
//! The hub is found through its device interface class, opened for
//! overlapped I/O, and every control request waits for its own completion
//! before returning.

// Raw Win32 calls throughout
#![allow(unsafe_code)]

use std::ffi::c_void;
use std::mem::{self, offset_of};
use std::ptr;

use parking_lot::Mutex;
use tracing::{debug, info, warn};
use windows_sys::Win32::Devices::DeviceAndDriverInstallation::{
    DIGCF_DEVICEINTERFACE, DIGCF_PRESENT, HDEVINFO, SP_DEVICE_INTERFACE_DATA,
    SP_DEVICE_INTERFACE_DETAIL_DATA_W, SetupDiDestroyDeviceInfoList, SetupDiEnumDeviceInterfaces,
    SetupDiGetClassDevsW, SetupDiGetDeviceInterfaceDetailW,
};
use windows_sys::Win32::Foundation::{
    CloseHandle, ERROR_INVALID_PARAMETER, ERROR_IO_PENDING, FALSE, GENERIC_READ, GENERIC_WRITE,
    GetLastError, HANDLE, INVALID_HANDLE_VALUE, TRUE,
};
use windows_sys::Win32::Storage::FileSystem::{
    CreateFileW, FILE_ATTRIBUTE_NORMAL, FILE_FLAG_NO_BUFFERING, FILE_FLAG_OVERLAPPED,
    FILE_FLAG_WRITE_THROUGH, FILE_SHARE_READ, FILE_SHARE_WRITE, OPEN_EXISTING,
};
use windows_sys::Win32::System::IO::{DeviceIoControl, GetOverlappedResult, OVERLAPPED};
use windows_sys::Win32::System::Threading::CreateEventW;
use windows_sys::core::GUID;

use crate::channel::{ControlChannel, ControlCode};
use crate::error::{VusbError, VusbResult};

/// Device interface class registered by the hub driver.
pub const HUB_INTERFACE_GUID: GUID = GUID::from_u128(0x25efc209_91fe_4460_a4b7_6a9e31c0d0f1);

fn last_error() -> u32 {
    // SAFETY: reads thread-local state only.
    unsafe { GetLastError() }
}

fn to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

/// Owned Win32 event handle, closed on drop.
#[derive(Debug)]
pub struct Win32Event(HANDLE);

// SAFETY: event handles are process-wide kernel objects usable from any thread.
unsafe impl Send for Win32Event {}

impl Win32Event {
    fn create(name: Option<&str>, manual_reset: bool) -> Result<Self, u32> {
        let wide = name.map(to_wide);
        let name_ptr = wide.as_ref().map_or(ptr::null(), |w| w.as_ptr());
        let manual = if manual_reset { TRUE } else { FALSE };
        // SAFETY: `name_ptr` is null or points into `wide`, a NUL-terminated
        // buffer that outlives the call.
        let handle = unsafe { CreateEventW(ptr::null(), manual, FALSE, name_ptr) };
        if handle.is_null() {
            return Err(last_error());
        }
        Ok(Self(handle))
    }
}

impl Drop for Win32Event {
    fn drop(&mut self) {
        // SAFETY: the handle came from `CreateEventW` and is closed once.
        unsafe { CloseHandle(self.0) };
    }
}

/// Device info set returned by `SetupDiGetClassDevsW`, destroyed on drop.
struct DeviceInfoSet(HDEVINFO);

impl Drop for DeviceInfoSet {
    fn drop(&mut self) {
        // SAFETY: the set came from `SetupDiGetClassDevsW` and is destroyed once.
        unsafe { SetupDiDestroyDeviceInfoList(self.0) };
    }
}

/// Device paths of every present interface of `guid`, NUL-terminated.
fn interface_paths(guid: &GUID) -> Vec<Vec<u16>> {
    let flags = DIGCF_PRESENT | DIGCF_DEVICEINTERFACE;
    // SAFETY: `guid` is a valid reference; null enumerator and parent window are allowed.
    let info = unsafe { SetupDiGetClassDevsW(guid, ptr::null(), ptr::null_mut(), flags) };
    if info as isize == -1 {
        warn!(error = last_error(), "Failed to enumerate device interfaces");
        return Vec::new();
    }
    let info = DeviceInfoSet(info);

    let mut paths = Vec::new();
    for index in 0u32.. {
        // SAFETY: plain C struct for which all-zero is a valid value.
        let mut interface: SP_DEVICE_INTERFACE_DATA = unsafe { mem::zeroed() };
        interface.cbSize = mem::size_of::<SP_DEVICE_INTERFACE_DATA>() as u32;
        // SAFETY: `info` is a live set and `interface.cbSize` is set.
        let found = unsafe {
            SetupDiEnumDeviceInterfaces(info.0, ptr::null(), guid, index, &mut interface)
        };
        if found == FALSE {
            break;
        }

        let mut required = 0u32;
        // SAFETY: a null detail buffer of size zero only queries `required`.
        unsafe {
            SetupDiGetDeviceInterfaceDetailW(
                info.0,
                &interface,
                ptr::null_mut(),
                0,
                &mut required,
                ptr::null_mut(),
            );
        }
        let path_offset = offset_of!(SP_DEVICE_INTERFACE_DETAIL_DATA_W, DevicePath);
        if (required as usize) <= path_offset {
            continue;
        }

        // u64 storage keeps the detail struct aligned
        let mut storage = vec![0u64; (required as usize).div_ceil(8)];
        let detail = storage.as_mut_ptr().cast::<SP_DEVICE_INTERFACE_DETAIL_DATA_W>();
        // SAFETY: `storage` is 8-byte aligned and at least `required` bytes,
        // which is larger than the struct header.
        unsafe {
            (*detail).cbSize = mem::size_of::<SP_DEVICE_INTERFACE_DETAIL_DATA_W>() as u32;
        }
        // SAFETY: `detail` is properly sized (`required` bytes) and cbSize is set.
        let ok = unsafe {
            SetupDiGetDeviceInterfaceDetailW(
                info.0,
                &interface,
                detail,
                required,
                ptr::null_mut(),
                ptr::null_mut(),
            )
        };
        if ok == FALSE {
            debug!(index, error = last_error(), "Failed to read interface detail");
            continue;
        }

        let max_chars = (required as usize - path_offset) / 2;
        // SAFETY: `max_chars` u16s past `path_offset` lie within the
        // `required` bytes of `storage`, all initialised.
        let path = unsafe {
            let start = storage.as_ptr().cast::<u8>().add(path_offset).cast::<u16>();
            std::slice::from_raw_parts(start, max_chars)
        };
        let len = path.iter().position(|&c| c == 0).unwrap_or(path.len());
        let mut wide = path[..len].to_vec();
        wide.push(0);
        paths.push(wide);
    }
    paths
}

/// Control channel over an overlapped handle to the hub driver.
#[derive(Debug)]
pub struct Win32ControlChannel {
    handle: HANDLE,
    path: String,
    io: Mutex<()>,
}

// SAFETY: the handle is only used for I/O while `io` is held.
unsafe impl Send for Win32ControlChannel {}
unsafe impl Sync for Win32ControlChannel {}

impl Win32ControlChannel {
    /// Open the first present hub interface.
    ///
    /// # Errors
    /// Returns [`VusbError::Registry`] when no interface exists or none of
    /// them can be opened.
    pub fn open() -> VusbResult<Self> {
        Self::open_interface(&HUB_INTERFACE_GUID)
    }

    /// Open the first present interface of `guid` that accepts a handle.
    ///
    /// # Errors
    /// See [`open`](Self::open).
    pub fn open_interface(guid: &GUID) -> VusbResult<Self> {
        let paths = interface_paths(guid);
        if paths.is_empty() {
            return Err(VusbError::Registry("no virtual USB hub interface present".to_string()));
        }

        for wide in &paths {
            let path = String::from_utf16_lossy(&wide[..wide.len() - 1]);
            // SAFETY: `wide` is NUL-terminated and outlives the call.
            let handle = unsafe {
                CreateFileW(
                    wide.as_ptr(),
                    GENERIC_READ | GENERIC_WRITE,
                    FILE_SHARE_READ | FILE_SHARE_WRITE,
                    ptr::null(),
                    OPEN_EXISTING,
                    FILE_ATTRIBUTE_NORMAL
                        | FILE_FLAG_NO_BUFFERING
                        | FILE_FLAG_OVERLAPPED
                        | FILE_FLAG_WRITE_THROUGH,
                    ptr::null_mut(),
                )
            };
            if handle == INVALID_HANDLE_VALUE {
                debug!(%path, error = last_error(), "Failed to open hub interface");
                continue;
            }
            info!(%path, "Opened virtual USB hub");
            return Ok(Self { handle, path, io: Mutex::new(()) });
        }

        Err(VusbError::Registry(format!(
            "none of {} hub interfaces could be opened",
            paths.len()
        )))
    }

    fn is_valid(&self) -> bool {
        !self.handle.is_null() && self.handle != INVALID_HANDLE_VALUE
    }

    fn ioctl(
        &self,
        code: ControlCode,
        input: *const c_void,
        input_len: usize,
        output: *mut c_void,
        output_len: usize,
    ) -> VusbResult<usize> {
        if !self.is_valid() {
            return Err(VusbError::InvalidHandle { code });
        }
        let too_large = |_| VusbError::Control { code, os_error: ERROR_INVALID_PARAMETER };
        let input_len = u32::try_from(input_len).map_err(too_large)?;
        let output_len = u32::try_from(output_len).map_err(too_large)?;

        let _io = self.io.lock();
        let completion = Win32Event::create(None, true)
            .map_err(|os_error| VusbError::Control { code, os_error })?;

        // SAFETY: plain C struct for which all-zero is a valid value.
        let mut overlapped: OVERLAPPED = unsafe { mem::zeroed() };
        overlapped.hEvent = completion.0;
        let mut transferred = 0u32;

        // SAFETY: the buffers are valid for their lengths and, together with
        // `overlapped`, outlive the request because we wait for it below.
        let ok = unsafe {
            DeviceIoControl(
                self.handle,
                code.get(),
                input,
                input_len,
                output,
                output_len,
                &mut transferred,
                &mut overlapped,
            )
        };
        if ok == FALSE {
            let error = last_error();
            if error != ERROR_IO_PENDING {
                return Err(VusbError::Control { code, os_error: error });
            }
        }

        // SAFETY: `overlapped` belongs to the request just issued on this handle.
        let ok = unsafe { GetOverlappedResult(self.handle, &overlapped, &mut transferred, TRUE) };
        if ok == FALSE {
            return Err(VusbError::Control { code, os_error: last_error() });
        }
        Ok(transferred as usize)
    }
}

impl ControlChannel for Win32ControlChannel {
    type Event = Win32Event;

    fn request(&self, code: ControlCode, input: &[u8]) -> VusbResult<()> {
        self.ioctl(code, input.as_ptr().cast(), input.len(), ptr::null_mut(), 0).map(|_| ())
    }

    fn request_inout(&self, code: ControlCode, buf: &mut [u8]) -> VusbResult<usize> {
        let len = buf.len();
        let ptr = buf.as_mut_ptr().cast::<c_void>();
        self.ioctl(code, ptr, len, ptr, len)
    }

    fn create_event(&self, name: Option<&str>) -> VusbResult<Win32Event> {
        Win32Event::create(name, false).map_err(|os_error| VusbError::Event {
            name: name.unwrap_or("<anonymous>").to_string(),
            os_error,
        })
    }
}

impl Drop for Win32ControlChannel {
    fn drop(&mut self) {
        if self.is_valid() {
            // SAFETY: the handle came from `CreateFileW` and is closed once.
            unsafe { CloseHandle(self.handle) };
            debug!(path = %self.path, "Closed virtual USB hub");
        }
    }
}
