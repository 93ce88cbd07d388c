//! Memory holding generated machine code.

use std::{io, ptr, slice};

/// A private anonymous mapping that is writable while the code is copied in
/// and executable afterwards, never both at once.
///
/// On Apple silicon the mapping is created with `MAP_JIT` and write
/// protection is toggled per thread instead.
#[derive(Debug)]
pub struct ExecutableMemory {
    ptr: *mut u8,
    len: usize,
}

impl ExecutableMemory {
    pub fn new(code: &[u8]) -> io::Result<Self> {
        if code.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "no code to map",
            ));
        }
        let ptr = map(code.len())?;
        let mem = ExecutableMemory {
            ptr,
            len: code.len(),
        };
        // on failure `mem` is dropped and the mapping released
        unsafe { write_and_seal(mem.ptr, code)? };
        Ok(mem)
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.ptr, self.len) }
    }
}

impl Drop for ExecutableMemory {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.cast(), self.len);
        }
    }
}

fn map(len: usize) -> io::Result<*mut u8> {
    cfg_if::cfg_if! {
        if #[cfg(all(target_os = "macos", target_arch = "aarch64"))] {
            let prot = libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC;
            let flags = libc::MAP_ANON | libc::MAP_PRIVATE | libc::MAP_JIT;
        } else {
            let prot = libc::PROT_READ | libc::PROT_WRITE;
            let flags = libc::MAP_ANON | libc::MAP_PRIVATE;
        }
    }
    let ptr = unsafe { libc::mmap(ptr::null_mut(), len, prot, flags, -1, 0) };
    if ptr == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }
    Ok(ptr.cast())
}

cfg_if::cfg_if! {
    if #[cfg(all(target_os = "macos", target_arch = "aarch64"))] {
        extern "C" {
            fn pthread_jit_write_protect_np(enabled: libc::c_int);
            fn sys_icache_invalidate(start: *mut libc::c_void, len: libc::size_t);
        }

        unsafe fn write_and_seal(dst: *mut u8, code: &[u8]) -> io::Result<()> {
            pthread_jit_write_protect_np(0);
            ptr::copy_nonoverlapping(code.as_ptr(), dst, code.len());
            pthread_jit_write_protect_np(1);
            sys_icache_invalidate(dst.cast(), code.len());
            Ok(())
        }
    } else {
        #[cfg(target_arch = "aarch64")]
        extern "C" {
            fn __clear_cache(begin: *mut libc::c_char, end: *mut libc::c_char);
        }

        unsafe fn write_and_seal(dst: *mut u8, code: &[u8]) -> io::Result<()> {
            ptr::copy_nonoverlapping(code.as_ptr(), dst, code.len());
            if libc::mprotect(dst.cast(), code.len(), libc::PROT_READ | libc::PROT_EXEC) != 0 {
                return Err(io::Error::last_os_error());
            }
            #[cfg(target_arch = "aarch64")]
            __clear_cache(dst.cast(), dst.add(code.len()).cast());
            Ok(())
        }
    }
}
