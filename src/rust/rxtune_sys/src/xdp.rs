use libbpf_sys::{
    bpf_object, bpf_object__close, bpf_object__find_program_by_name, bpf_object__load,
    bpf_object__open_mem, bpf_program__fd, bpf_xdp_attach, libbpf_set_strict_mode,
    LIBBPF_STRICT_ALL, XDP_FLAGS_DRV_MODE, XDP_FLAGS_HW_MODE, XDP_FLAGS_SKB_MODE,
    XDP_FLAGS_UPDATE_IF_NOEXIST,
};
use nix::libc::{c_void, geteuid, if_nametoindex};
use std::ffi::CString;
use thiserror::Error;
use tracing::{info, warn};

/// The drop program, compiled from `src/bpf/drop.bpf.c` by the build script.
pub(crate) const DROP_OBJECT: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/drop.bpf.o"));
const DROP_PROGRAM: &str = "drop";

/// The packet-counting XDP program, attached to one interface. Detaches
/// itself and frees the loaded object when dropped.
pub struct XdpProgram {
    interface: String,
    interface_index: i32,
    object: *mut bpf_object,
}

// The object pointer is only touched from the owning thread and on drop.
unsafe impl Send for XdpProgram {}

impl XdpProgram {
    /// Loads the embedded drop program and attaches it to `interface`,
    /// using the fastest XDP mode the driver accepts.
    ///
    /// ## Arguments
    ///
    /// * `interface` - the interface under tuning (e.g. `enp52s0f1np1`).
    pub fn attach(interface: &str) -> Result<Self, XdpError> {
        check_root()?;
        let interface_index = interface_name_to_index(interface)?;
        set_strict_mode()?;

        let object = unsafe {
            bpf_object__open_mem(
                DROP_OBJECT.as_ptr() as *const c_void,
                DROP_OBJECT.len() as _,
                std::ptr::null(),
            )
        };
        if object.is_null() {
            return Err(XdpError::Open);
        }
        // From here on `Drop` owns the object, so early returns clean up.
        let mut program = Self {
            interface: interface.to_string(),
            interface_index: 0,
            object,
        };

        let err = unsafe { bpf_object__load(object) };
        if err != 0 {
            return Err(XdpError::Load(err));
        }
        let name = CString::new(DROP_PROGRAM).map_err(|_| XdpError::MissingProgram)?;
        let prog = unsafe { bpf_object__find_program_by_name(object, name.as_ptr()) };
        if prog.is_null() {
            return Err(XdpError::MissingProgram);
        }
        let prog_fd = unsafe { bpf_program__fd(prog) };

        let mode = unsafe { attach_xdp_best_available(interface_index, prog_fd) }.map_err(
            |err| XdpError::Attach {
                interface: interface.to_string(),
                err,
            },
        )?;
        program.interface_index = interface_index;
        info!("XDP program attached to {interface} in {mode} mode");
        Ok(program)
    }

    /// Removes whatever XDP program is attached to `interface`.
    pub fn detach(interface: &str) -> Result<(), XdpError> {
        let interface_index = interface_name_to_index(interface)?;
        unsafe { detach_index(interface_index) }.map_err(|err| XdpError::Detach {
            interface: interface.to_string(),
            err,
        })?;
        info!("XDP program detached from {interface}");
        Ok(())
    }

    /// The interface this program is attached to.
    pub fn interface(&self) -> &str {
        &self.interface
    }
}

impl Drop for XdpProgram {
    fn drop(&mut self) {
        if self.interface_index > 0 {
            match unsafe { detach_index(self.interface_index) } {
                Ok(()) => info!("XDP program detached from {}", self.interface),
                Err(err) => warn!("Unable to detach XDP from {}: error {err}", self.interface),
            }
        }
        unsafe { bpf_object__close(self.object) };
    }
}

unsafe fn attach_xdp_best_available(interface_index: i32, prog_fd: i32) -> Result<&'static str, i32> {
    // Hardware offload, then driver, then generic SKB, then whatever is left.
    for (flags, mode) in [
        (XDP_FLAGS_HW_MODE, "hardware"),
        (XDP_FLAGS_DRV_MODE, "driver"),
        (XDP_FLAGS_SKB_MODE, "SKB"),
    ] {
        if try_xdp_attach(interface_index, prog_fd, flags).is_ok() {
            return Ok(mode);
        }
    }
    try_xdp_attach(interface_index, prog_fd, 0).map(|_| "default")
}

unsafe fn try_xdp_attach(interface_index: i32, prog_fd: i32, connect_mode: u32) -> Result<(), i32> {
    let err = bpf_xdp_attach(
        interface_index,
        prog_fd,
        XDP_FLAGS_UPDATE_IF_NOEXIST | connect_mode,
        std::ptr::null(),
    );
    if err != 0 {
        Err(err)
    } else {
        Ok(())
    }
}

unsafe fn detach_index(interface_index: i32) -> Result<(), i32> {
    let err = bpf_xdp_attach(
        interface_index,
        -1,
        XDP_FLAGS_UPDATE_IF_NOEXIST,
        std::ptr::null(),
    );
    if err != 0 {
        Err(err)
    } else {
        Ok(())
    }
}

fn set_strict_mode() -> Result<(), XdpError> {
    let err = unsafe { libbpf_set_strict_mode(LIBBPF_STRICT_ALL) };
    if err != 0 {
        Err(XdpError::StrictMode(err))
    } else {
        Ok(())
    }
}

fn check_root() -> Result<(), XdpError> {
    if unsafe { geteuid() } == 0 {
        Ok(())
    } else {
        Err(XdpError::NotRoot)
    }
}

fn interface_name_to_index(interface_name: &str) -> Result<i32, XdpError> {
    let if_name = CString::new(interface_name)
        .map_err(|_| XdpError::UnknownInterface(interface_name.to_string()))?;
    let index = unsafe { if_nametoindex(if_name.as_ptr()) };
    if index == 0 {
        return Err(XdpError::UnknownInterface(interface_name.to_string()));
    }
    i32::try_from(index).map_err(|_| XdpError::UnknownInterface(interface_name.to_string()))
}

/// Errors from loading, attaching or detaching the XDP program.
#[derive(Debug, Error)]
pub enum XdpError {
    /// Attaching XDP programs requires root
    #[error("You need to be root to do this.")]
    NotRoot,
    /// The interface does not exist
    #[error("Unknown interface: {0}")]
    UnknownInterface(String),
    /// libbpf refused strict mode
    #[error("Unable to activate BPF strict mode: error {0}")]
    StrictMode(i32),
    /// The embedded object is not a usable BPF ELF
    #[error("Unable to open the embedded XDP object")]
    Open,
    /// The kernel verifier rejected the object
    #[error("Unable to load the XDP object: error {0}")]
    Load(i32),
    /// The object has no `drop` program
    #[error("XDP object has no '{DROP_PROGRAM}' program")]
    MissingProgram,
    /// No XDP mode accepted the program
    #[error("Unable to attach XDP to {interface}: error {err}")]
    Attach {
        /// Target interface
        interface: String,
        /// libbpf return code
        err: i32,
    },
    /// The kernel refused to remove the program
    #[error("Unable to detach XDP from {interface}: error {err}")]
    Detach {
        /// Target interface
        interface: String,
        /// libbpf return code
        err: i32,
    },
}
