//! NFS sessions using libnfs
//!
//! This module provides a safe Rust wrapper around the libnfs C library.
//! Each `NfsSession` represents a single NFS mount and is NOT thread-safe.
//!
//! Key safety considerations:
//! - One session per thread (libnfs contexts are not thread-safe)
//! - RAII for automatic cleanup (unmount + destroy on drop)
//! - Async callback state is reference counted, so a listing may be
//!   dropped before its callback fires

use crate::config::NfsUrl;
use crate::error::{NfsError, NfsResult};
use crate::nfs::transport::{Events, PendingListing, Session, Transport};
use crate::nfs::types::{is_special_name, Entry, EntryType};
use std::cell::RefCell;
use std::ffi::{c_char, c_void, CStr, CString};
use std::os::unix::io::RawFd;
use std::ptr;
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, warn};

#[allow(
    non_upper_case_globals,
    non_camel_case_types,
    non_snake_case,
    dead_code,
    clippy::all
)]
pub(crate) mod ffi {
    include!(concat!(env!("OUT_DIR"), "/nfs_bindings.rs"));
}

/// Opens libnfs sessions with retry support
#[derive(Debug, Clone)]
pub struct NfsTransport {
    url: NfsUrl,
    timeout: Duration,
    retries: u32,
}

impl NfsTransport {
    pub fn new(url: NfsUrl) -> Self {
        Self {
            url,
            timeout: Duration::from_secs(30),
            retries: 3,
        }
    }

    /// Set RPC timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set retry count for connection setup
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }
}

impl Transport for NfsTransport {
    type Session = NfsSession;

    fn open(&self) -> NfsResult<NfsSession> {
        let mut last_error = None;

        for attempt in 0..=self.retries {
            if attempt > 0 {
                // Exponential backoff: 100ms, 200ms, 400ms, ...
                let delay = Duration::from_millis(100 * (1 << (attempt - 1).min(10)));
                std::thread::sleep(delay);
            }

            match NfsSession::connect(&self.url, self.timeout) {
                Ok(session) => {
                    debug!(
                        server = %self.url.server,
                        export = %self.url.export,
                        attempt,
                        "NFS session mounted"
                    );
                    return Ok(session);
                }
                Err(e) => {
                    warn!(attempt, error = %e, "NFS connect attempt failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| NfsError::ConnectionFailed {
            server: self.url.server.clone(),
            reason: "No connection attempts made".into(),
        }))
    }

    fn endpoint(&self) -> String {
        self.url.to_display_string()
    }
}

/// One mounted libnfs context
///
/// Owns the context and cleans up on drop. It is Send but NOT Sync.
pub struct NfsSession {
    /// libnfs context pointer (never null after construction)
    context: *mut ffi::nfs_context,

    /// Server we're connected to
    server: String,

    /// Export path we're mounted on
    export: String,

    /// Whether we're currently mounted
    mounted: bool,
}

// A session moves to its worker thread and stays there
unsafe impl Send for NfsSession {}

impl NfsSession {
    /// Create a context and mount the export of `url`
    pub fn connect(url: &NfsUrl, timeout: Duration) -> NfsResult<Self> {
        let context = unsafe { ffi::nfs_init_context() };

        if context.is_null() {
            return Err(NfsError::InitFailed(
                "nfs_init_context() returned null".into(),
            ));
        }

        // From here on Drop destroys the context
        let mut session = Self {
            context,
            server: url.server.clone(),
            export: url.export.clone(),
            mounted: false,
        };

        unsafe {
            ffi::nfs_set_timeout(context, timeout.as_millis().min(i32::MAX as u128) as i32);

            // Authenticate as the current user
            ffi::nfs_set_uid(context, libc::getuid() as i32);
            ffi::nfs_set_gid(context, libc::getgid() as i32);
        }

        let mount_url = url.mount_url();
        let url_cstr = CString::new(mount_url.as_str()).map_err(|_| NfsError::InvalidUrl {
            url: mount_url.clone(),
            reason: "URL contains null bytes".into(),
        })?;

        // Applies URL options (version, nfsport, ...) to the context
        let parsed = unsafe { ffi::nfs_parse_url_dir(context, url_cstr.as_ptr()) };
        if parsed.is_null() {
            return Err(NfsError::InvalidUrl {
                url: mount_url,
                reason: session.get_error(),
            });
        }

        let result = unsafe { ffi::nfs_mount(context, (*parsed).server, (*parsed).path) };
        unsafe { ffi::nfs_destroy_url(parsed) };

        if result != 0 {
            return Err(NfsError::MountFailed {
                server: session.server.clone(),
                export: session.export.clone(),
                reason: session.get_error(),
            });
        }

        session.mounted = true;
        Ok(session)
    }

    /// Get the current error message from libnfs
    fn get_error(&self) -> String {
        let err_ptr = unsafe { ffi::nfs_get_error(self.context) };
        if err_ptr.is_null() {
            return "Unknown error".into();
        }

        let c_str = unsafe { CStr::from_ptr(err_ptr) };
        c_str.to_string_lossy().into_owned()
    }

    fn path_cstring(path: &str) -> NfsResult<CString> {
        CString::new(path).map_err(|_| NfsError::ReadDirFailed {
            path: path.into(),
            reason: "Path contains null bytes".into(),
        })
    }
}

impl Session for NfsSession {
    type Listing = NfsListing;

    fn list(&mut self, path: &str) -> NfsResult<Vec<Entry>> {
        let path_cstr = Self::path_cstring(path)?;

        let mut dir_handle: *mut ffi::nfsdir = ptr::null_mut();
        let result =
            unsafe { ffi::nfs_opendir(self.context, path_cstr.as_ptr(), &mut dir_handle) };

        if result != 0 {
            return Err(NfsError::from_status(path, result, self.get_error()));
        }

        let entries = unsafe { read_entries(self.context, dir_handle, path) };
        unsafe { ffi::nfs_closedir(self.context, dir_handle) };

        Ok(entries)
    }

    fn list_async(&mut self, path: &str) -> NfsResult<NfsListing> {
        let path_cstr = Self::path_cstring(path)?;

        let state = Rc::new(RefCell::new(ListingState {
            path: path.to_string(),
            result: None,
        }));

        // One reference is handed to the callback and reclaimed there
        let private = Rc::into_raw(Rc::clone(&state));
        let result = unsafe {
            ffi::nfs_opendir_async(
                self.context,
                path_cstr.as_ptr(),
                Some(opendir_callback),
                private as *mut c_void,
            )
        };

        if result != 0 {
            unsafe { drop(Rc::from_raw(private)) };
            return Err(NfsError::from_status(path, result, self.get_error()));
        }

        Ok(NfsListing {
            path: path.to_string(),
            state,
        })
    }

    fn descriptor(&self) -> RawFd {
        unsafe { ffi::nfs_get_fd(self.context) }
    }

    fn desired_events(&self) -> Events {
        let events = unsafe { ffi::nfs_which_events(self.context) };
        Events::from_bits(events as i16)
    }

    fn service(&mut self, revents: Events) -> NfsResult<()> {
        let result = unsafe { ffi::nfs_service(self.context, revents.bits() as i32) };

        if result < 0 {
            return Err(NfsError::ConnectionFailed {
                server: self.server.clone(),
                reason: self.get_error(),
            });
        }

        Ok(())
    }
}

impl Drop for NfsSession {
    fn drop(&mut self) {
        if !self.context.is_null() {
            if self.mounted {
                unsafe {
                    ffi::nfs_umount(self.context);
                }
                self.mounted = false;
            }

            // Fires outstanding callbacks with an error, releasing their state
            unsafe {
                ffi::nfs_destroy_context(self.context);
            }
            self.context = ptr::null_mut();
        }
    }
}

/// Callback state shared between a listing and libnfs
struct ListingState {
    path: String,
    result: Option<NfsResult<Vec<Entry>>>,
}

/// An in-flight `nfs_opendir_async` request
pub struct NfsListing {
    path: String,
    state: Rc<RefCell<ListingState>>,
}

impl PendingListing for NfsListing {
    fn path(&self) -> &str {
        &self.path
    }

    fn is_ready(&self) -> NfsResult<bool> {
        match &self.state.borrow().result {
            None => Ok(false),
            Some(Ok(_)) => Ok(true),
            Some(Err(e)) => Err(e.clone()),
        }
    }

    fn drain(self) -> Vec<Entry> {
        match self.state.borrow_mut().result.take() {
            Some(Ok(entries)) => entries,
            _ => Vec::new(),
        }
    }
}

/// Read every entry of an open directory, skipping "." and ".."
///
/// Safety: `dir` must be a valid open directory of `context`
unsafe fn read_entries(
    context: *mut ffi::nfs_context,
    dir: *mut ffi::nfsdir,
    parent: &str,
) -> Vec<Entry> {
    let mut entries = Vec::new();

    loop {
        let dirent = ffi::nfs_readdir(context, dir);
        if dirent.is_null() {
            break;
        }

        // Safety: dirent is valid until next readdir call or closedir
        let d = &*dirent;
        if d.name.is_null() {
            continue;
        }

        let name = CStr::from_ptr(d.name).to_string_lossy();
        if is_special_name(&name) {
            continue;
        }

        entries.push(Entry::child(parent, &name, EntryType::from_mode(d.mode)));
    }

    entries
}

/// C callback for nfs_opendir_async
///
/// Reads the whole directory and closes it, whether or not the listing
/// is still around to collect the result.
unsafe extern "C" fn opendir_callback(
    status: i32,
    nfs: *mut ffi::nfs_context,
    data: *mut c_void,
    private_data: *mut c_void,
) {
    let state = Rc::from_raw(private_data as *const RefCell<ListingState>);
    let path = state.borrow().path.clone();

    let result = if status < 0 {
        let message = if data.is_null() {
            "Unknown error".to_string()
        } else {
            CStr::from_ptr(data as *const c_char)
                .to_string_lossy()
                .into_owned()
        };
        Err(NfsError::from_status(&path, status, message))
    } else {
        let dir = data as *mut ffi::nfsdir;
        let entries = read_entries(nfs, dir, &path);
        ffi::nfs_closedir(nfs, dir);
        Ok(entries)
    };

    state.borrow_mut().result = Some(result);
}
